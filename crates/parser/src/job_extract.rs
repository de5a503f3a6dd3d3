use scraper::Html;
use url::Url;

use crate::selector::{attr_of, text_of, Acceptor, FieldFallback, ListingLocator, Strategy};

/// Raw, un-normalized field values pulled off one listing container. The
/// Data Validator (C6) turns this into a [`jobharvest_core::Job`].
#[derive(Debug, Clone, Default)]
pub struct RawJobFields {
    pub url: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub work_mode: Option<String>,
    pub level: Option<String>,
    pub salary: Option<String>,
    pub description: Option<String>,
    pub technologies: Option<String>,
    pub benefits: Option<String>,
    pub posted_at: Option<String>,
}

/// Wires the Selector Fallback engine (C5) with field-specific strategy
/// chains for job-listing pages. Strategy locators are plausible generic
/// job-board markup; real scores drift as sites are observed.
pub struct JobExtractor {
    pub containers: ListingLocator,
    pub url: FieldFallback,
    pub title: FieldFallback,
    pub company: FieldFallback,
    pub location: FieldFallback,
    pub work_mode: FieldFallback,
    pub level: FieldFallback,
    pub salary: FieldFallback,
    pub description: FieldFallback,
    pub technologies: FieldFallback,
    pub benefits: FieldFallback,
    pub posted_at: FieldFallback,
}

impl Default for JobExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl JobExtractor {
    pub fn new() -> Self {
        let containers = ListingLocator::new(vec![
            ("job-card", "[data-job-id], .job-card, article.job"),
            ("listing-item", ".listing, .job-listing, li.job-result"),
            ("generic-card", ".card"),
        ]);

        let url = FieldFallback::new(
            "url",
            vec![
                Strategy::new("self-link", "a.job-link, a.job-title, h2 a, h3 a", attr_of("href")),
                Strategy::new("any-anchor", "a", attr_of("href")),
            ],
            Acceptor::matching(1, 2048, crate::selector::URL_PATTERN.clone()),
        );

        let title = FieldFallback::new(
            "title",
            vec![
                Strategy::new("title-class", ".job-title, .title", text_of()),
                Strategy::new("heading", "h2, h3", text_of()),
                Strategy::new("link-text", "a", text_of()),
            ],
            Acceptor::free_text(2, 200),
        );

        let company = FieldFallback::new(
            "company",
            vec![
                Strategy::new("company-class", ".company, .company-name", text_of()),
                Strategy::new("itemprop", "[itemprop=hiringOrganization]", text_of()),
                Strategy::new("data-attr", "[data-company]", attr_of("data-company")),
            ],
            Acceptor::free_text(1, 120),
        );

        let location = FieldFallback::new(
            "location",
            vec![
                Strategy::new("location-class", ".location, .job-location", text_of()),
                Strategy::new("itemprop", "[itemprop=jobLocation]", text_of()),
            ],
            Acceptor::free_text(1, 120),
        );

        let work_mode = FieldFallback::new(
            "work_mode",
            vec![
                Strategy::new("workmode-class", ".work-mode, .remote-badge", text_of()),
                Strategy::new("data-attr", "[data-work-mode]", attr_of("data-work-mode")),
            ],
            Acceptor::free_text(1, 40),
        );

        let level = FieldFallback::new(
            "level",
            vec![
                Strategy::new("level-class", ".level, .seniority", text_of()),
                Strategy::new("data-attr", "[data-level]", attr_of("data-level")),
            ],
            Acceptor::free_text(1, 40),
        );

        let salary = FieldFallback::new(
            "salary",
            vec![
                Strategy::new("salary-class", ".salary, .compensation", text_of()),
                Strategy::new("itemprop", "[itemprop=baseSalary]", text_of()),
            ],
            Acceptor::free_text(1, 80),
        );

        let description = FieldFallback::new(
            "description",
            vec![
                Strategy::new("description-class", ".description, .job-description", text_of()),
                Strategy::new("summary", ".summary, p", text_of()),
            ],
            Acceptor::free_text(1, 20_000),
        );

        let technologies = FieldFallback::new(
            "technologies",
            vec![
                Strategy::new("tech-class", ".technologies, .tags, .stack", text_of()),
                Strategy::new("data-attr", "[data-technologies]", attr_of("data-technologies")),
            ],
            Acceptor::free_text(1, 2000),
        );

        let benefits = FieldFallback::new(
            "benefits",
            vec![Strategy::new("benefits-class", ".benefits, .perks", text_of())],
            Acceptor::free_text(1, 2000),
        );

        let posted_at = FieldFallback::new(
            "posted_at",
            vec![
                Strategy::new("time-datetime", "time", attr_of("datetime")),
                Strategy::new("posted-class", ".posted, .posted-date", text_of()),
            ],
            Acceptor::free_text(1, 60),
        );

        Self {
            containers,
            url,
            title,
            company,
            location,
            work_mode,
            level,
            salary,
            description,
            technologies,
            benefits,
            posted_at,
        }
    }

    /// Extracts every candidate job listing on one fetched page. `base_url`
    /// resolves relative `href`s to absolute URLs before the validator
    /// canonicalizes them.
    pub fn extract_page(&self, html_body: &str, base_url: &Url) -> Vec<RawJobFields> {
        let document = Html::parse_document(html_body);
        let containers = self.containers.locate(&document);

        containers
            .iter()
            .map(|container| {
                let url = self
                    .url
                    .extract(container)
                    .and_then(|href| base_url.join(&href).ok())
                    .map(|u| u.to_string());

                RawJobFields {
                    url,
                    title: self.title.extract(container),
                    company: self.company.extract(container),
                    location: self.location.extract(container),
                    work_mode: self.work_mode.extract(container),
                    level: self.level.extract(container),
                    salary: self.salary.extract(container),
                    description: self.description.extract(container),
                    technologies: self.technologies.extract(container),
                    benefits: self.benefits.extract(container),
                    posted_at: self.posted_at.extract(container),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fields_from_a_typical_job_card() {
        let html = r#"
            <html><body>
            <article class="job">
                <h2 class="job-title"><a class="job-link" href="/jobs/42">Senior Backend Engineer</a></h2>
                <span class="company-name">Acme Corp</span>
                <span class="job-location">Berlin, Germany</span>
                <span class="salary">€70k - €90k</span>
                <div class="job-description">We build distributed systems for logistics at scale.</div>
                <div class="tags">Rust, Kubernetes, PostgreSQL</div>
                <time datetime="2026-07-01">July 1</time>
            </article>
            </body></html>
        "#;
        let extractor = JobExtractor::new();
        let base = Url::parse("https://jobs.example.com/listing").unwrap();
        let jobs = extractor.extract_page(html, &base);

        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.title.as_deref(), Some("Senior Backend Engineer"));
        assert_eq!(job.company.as_deref(), Some("Acme Corp"));
        assert_eq!(job.url.as_deref(), Some("https://jobs.example.com/jobs/42"));
        assert_eq!(job.posted_at.as_deref(), Some("2026-07-01"));
    }

    /// A board that has dropped its usual `.job-title`/`.company-name`
    /// classes still yields a job through each field's fallback strategies
    /// (bare heading text, `itemprop` microdata, `data-company`).
    #[test]
    fn falls_back_when_primary_markup_has_drifted() {
        let html = r#"
            <html><body>
            <div class="card" data-job-id="99">
                <h3><a href="/jobs/99">Platform Engineer</a></h3>
                <span itemprop="hiringOrganization">Globex</span>
                <span itemprop="jobLocation">Remote</span>
                <p>A short blurb about the role that is long enough to not be flagged.</p>
            </div>
            </body></html>
        "#;
        let extractor = JobExtractor::new();
        let base = Url::parse("https://jobs.example.com/listing").unwrap();
        let jobs = extractor.extract_page(html, &base);

        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.title.as_deref(), Some("Platform Engineer"));
        assert_eq!(job.company.as_deref(), Some("Globex"));
        assert_eq!(job.location.as_deref(), Some("Remote"));
        assert_eq!(job.url.as_deref(), Some("https://jobs.example.com/jobs/99"));
    }
}
