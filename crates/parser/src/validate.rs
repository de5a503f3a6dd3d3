use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use jobharvest_core::canonical::canonicalize;
use jobharvest_core::fingerprint::source_fingerprint;
use jobharvest_core::{Job, Level, WorkMode};

use crate::job_extract::RawJobFields;

/// Tunable bounds for the Data Validator (§4.6). Defaults are generous;
/// operators narrow them per the job market they scrape.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub min_salary: u64,
    pub max_salary: u64,
    pub min_description_len: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_salary: 0,
            max_salary: 2_000_000,
            min_description_len: 80,
        }
    }
}

/// Outcome of validating one page's worth of candidate jobs (§4.6).
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub jobs: Vec<Job>,
    pub rejected: u64,
    pub quality_score: f64,
}

static TECH_VOCABULARY: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "rust", "python", "java", "javascript", "typescript", "go", "golang", "c", "c++", "c#",
        "ruby", "php", "kotlin", "swift", "scala", "elixir", "haskell", "sql", "nosql",
        "postgres", "postgresql", "mysql", "mongodb", "redis", "kafka", "rabbitmq", "graphql",
        "rest", "grpc", "docker", "kubernetes", "terraform", "ansible", "aws", "gcp", "azure",
        "linux", "react", "vue", "angular", "svelte", "node", "nodejs", "django", "flask",
        "spring", "rails", "laravel", "tensorflow", "pytorch", "spark", "hadoop", "airflow",
        "git", "ci/cd", "jenkins", "github-actions", "gitlab-ci",
    ]
    .into_iter()
    .collect()
});

static SALARY_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d.,]+").expect("valid regex"));

/// Validates and normalizes a page's raw extraction output into [`Job`]
/// records, rejecting schema violations and flagging non-fatal anomalies
/// (§4.6). `now` is injected so tests are deterministic.
pub fn validate_batch(raw: Vec<RawJobFields>, config: &ValidatorConfig, now: DateTime<Utc>) -> ValidationOutcome {
    let total = raw.len();
    let mut jobs = Vec::with_capacity(total);
    let mut rejected = 0u64;

    for field in raw {
        match build_job(field, config, now) {
            Some(job) => jobs.push(job),
            None => rejected += 1,
        }
    }

    let anomaly_fraction = flag_salary_anomalies(&mut jobs);

    let quality_score = if total == 0 {
        1.0
    } else {
        (1.0 - (rejected as f64 + anomaly_fraction * jobs.len() as f64 * 0.5) / total as f64)
            .clamp(0.0, 1.0)
    };

    ValidationOutcome {
        jobs,
        rejected,
        quality_score,
    }
}

fn build_job(raw: RawJobFields, config: &ValidatorConfig, now: DateTime<Utc>) -> Option<Job> {
    let url = raw.url.as_deref().and_then(canonicalize)?;
    let title = normalize_text(raw.title.as_deref()?);
    if title.is_empty() {
        return None;
    }

    let company = raw.company.as_deref().map(normalize_text).unwrap_or_default();
    let description = raw
        .description
        .as_deref()
        .map(normalize_text)
        .unwrap_or_default();
    if company.is_empty() && description.is_empty() {
        return None;
    }

    let location = raw
        .location
        .as_deref()
        .map(normalize_text)
        .unwrap_or_default();
    let work_mode = normalize_work_mode(raw.work_mode.as_deref(), &location, &description);
    let level = normalize_level(raw.level.as_deref(), &title);
    let technologies = normalize_technologies(raw.technologies.as_deref().unwrap_or(""));
    let benefits = raw
        .benefits
        .as_deref()
        .map(|b| split_list(b))
        .unwrap_or_default();
    let (mut salary_min, mut salary_max) =
        parse_salary_range(raw.salary.as_deref().unwrap_or(""), config);
    if let (Some(lo), Some(hi)) = (salary_min, salary_max) {
        if lo > hi {
            std::mem::swap(&mut salary_min, &mut salary_max);
        }
    }
    let posted_at = raw.posted_at.as_deref().and_then(parse_posted_at);

    let mut anomalies = Vec::new();
    if description.chars().count() < config.min_description_len {
        anomalies.push("description_too_short".to_string());
    }
    if title.eq_ignore_ascii_case(&company) {
        anomalies.push("company_equals_title".to_string());
    }
    if let Some(posted) = posted_at {
        if posted > now {
            anomalies.push("posted_at_in_future".to_string());
        } else if now - posted > ChronoDuration::days(365 * 2) {
            anomalies.push("posted_at_too_old".to_string());
        }
    }

    let source_fingerprint = source_fingerprint(
        &title,
        &company,
        &location,
        &technologies,
        salary_min,
        salary_max,
        &description,
    );

    Some(Job {
        url,
        title,
        company,
        location,
        work_mode,
        level,
        salary_min,
        salary_max,
        description,
        technologies,
        benefits,
        posted_at,
        collected_at: now,
        source_fingerprint,
        anomalies,
    })
}

/// Flags salary anomalies outside the interquartile fences of the batch
/// (§4.6). Needs at least four salaried samples to compute meaningful
/// quartiles; returns the fraction of jobs carrying any anomaly.
fn flag_salary_anomalies(jobs: &mut [Job]) -> f64 {
    let mut midpoints: Vec<f64> = jobs
        .iter()
        .filter_map(|j| midpoint(j.salary_min, j.salary_max))
        .collect();

    if midpoints.len() >= 4 {
        midpoints.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let q1 = percentile(&midpoints, 0.25);
        let q3 = percentile(&midpoints, 0.75);
        let iqr = q3 - q1;
        let lower = q1 - 1.5 * iqr;
        let upper = q3 + 1.5 * iqr;

        for job in jobs.iter_mut() {
            if let Some(mid) = midpoint(job.salary_min, job.salary_max) {
                if mid < lower || mid > upper {
                    job.anomalies.push("salary_outlier".to_string());
                }
            }
        }
    }

    let flagged = jobs.iter().filter(|j| !j.anomalies.is_empty()).count();
    if jobs.is_empty() {
        0.0
    } else {
        flagged as f64 / jobs.len() as f64
    }
}

fn midpoint(min: Option<u64>, max: Option<u64>) -> Option<f64> {
    match (min, max) {
        (Some(a), Some(b)) => Some((a + b) as f64 / 2.0),
        (Some(a), None) => Some(a as f64),
        (None, Some(b)) => Some(b as f64),
        (None, None) => None,
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (p * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

pub fn normalize_text(raw: &str) -> String {
    strip_html(raw.trim())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn normalize_work_mode(raw: Option<&str>, location: &str, description: &str) -> WorkMode {
    let haystack = format!(
        "{} {} {}",
        raw.unwrap_or_default(),
        location,
        description
    )
    .to_lowercase();
    if haystack.contains("remote") {
        WorkMode::Remote
    } else if haystack.contains("hybrid") {
        WorkMode::Hybrid
    } else if haystack.contains("on-site") || haystack.contains("onsite") || haystack.contains("on site") {
        WorkMode::OnSite
    } else {
        WorkMode::Unknown
    }
}

fn normalize_level(raw: Option<&str>, title: &str) -> Level {
    let haystack = format!("{} {}", raw.unwrap_or_default(), title).to_lowercase();
    if haystack.contains("intern") {
        Level::Intern
    } else if haystack.contains("junior") || haystack.contains("jr.") {
        Level::Junior
    } else if haystack.contains("senior") || haystack.contains("sr.") {
        Level::Senior
    } else if haystack.contains("lead") || haystack.contains("principal") {
        Level::Lead
    } else if haystack.contains("director") || haystack.contains("head of") {
        Level::Director
    } else if haystack.contains("mid") {
        Level::Mid
    } else {
        Level::Unknown
    }
}

/// Splits on common separators, lowercases, de-accents, and keeps only
/// tokens in the vocabulary allow-list or passing the "likely technology"
/// heuristic: length 2-40 and not purely numeric (§4.6).
fn normalize_technologies(raw: &str) -> Vec<String> {
    let mut tokens: Vec<String> = split_list(raw)
        .into_iter()
        .map(|t| deaccent(&t.to_lowercase()))
        .filter(|t| {
            let len = t.chars().count();
            if !(2..=40).contains(&len) {
                return false;
            }
            if t.chars().all(|c| c.is_ascii_digit()) {
                return false;
            }
            TECH_VOCABULARY.contains(t.as_str()) || looks_like_technology(t)
        })
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

fn looks_like_technology(token: &str) -> bool {
    token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '#' | '-' | '/'))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| matches!(c, ',' | ';' | '|' | '/' | '\n'))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn deaccent(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Maps a salary string to an `(min, max)` pair of integers, honoring
/// "mil"/"k" suffixes and bounding to the configured range (§4.6).
fn parse_salary_range(raw: &str, config: &ValidatorConfig) -> (Option<u64>, Option<u64>) {
    let lower = raw.to_lowercase();
    let numbers: Vec<u64> = SALARY_DIGITS
        .find_iter(&lower)
        .filter_map(|m| parse_salary_token(&lower, m.start(), m.as_str()))
        .collect();

    let bound = |n: u64| n.clamp(config.min_salary, config.max_salary);

    match numbers.as_slice() {
        [] => (None, None),
        [single] => (Some(bound(*single)), Some(bound(*single))),
        [lo, hi, ..] => (Some(bound(*lo)), Some(bound(*hi))),
    }
}

fn parse_salary_token(haystack: &str, match_start: usize, token: &str) -> Option<u64> {
    let cleaned: String = token.chars().filter(|c| *c != ',').collect();
    let value: f64 = cleaned.parse().ok()?;

    let tail = &haystack[match_start + token.len()..];
    let tail = tail.trim_start();
    let multiplier = if tail.starts_with('k') {
        1_000.0
    } else if tail.starts_with("mil") {
        1_000.0
    } else if tail.starts_with('m') {
        1_000_000.0
    } else {
        1.0
    };

    Some((value * multiplier).round() as u64)
}

fn parse_posted_at(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(DateTime::from_naive_utc_and_offset(
            date.and_hms_opt(0, 0, 0)?,
            Utc,
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(url: &str, title: &str, company: &str, description: &str) -> RawJobFields {
        RawJobFields {
            url: Some(url.to_string()),
            title: Some(title.to_string()),
            company: Some(company.to_string()),
            location: Some("Berlin, Germany".to_string()),
            work_mode: Some("remote".to_string()),
            level: Some("senior".to_string()),
            salary: Some("€70k - €90k".to_string()),
            description: Some(description.to_string()),
            technologies: Some("Rust, Kubernetes, 2024".to_string()),
            benefits: Some("Health insurance; Remote stipend".to_string()),
            posted_at: Some("2026-07-01".to_string()),
        }
    }

    #[test]
    fn builds_job_and_computes_quality_score() {
        let description = "We build distributed systems for logistics at a global scale, shipping daily.";
        let raw = vec![sample(
            "https://jobs.example.com/42?utm_source=x",
            "Senior Backend Engineer",
            "Acme Corp",
            description,
        )];
        let outcome = validate_batch(raw, &ValidatorConfig::default(), Utc::now());
        assert_eq!(outcome.rejected, 0);
        assert_eq!(outcome.jobs.len(), 1);
        let job = &outcome.jobs[0];
        assert_eq!(job.url, "https://jobs.example.com/42");
        assert_eq!(job.salary_min, Some(70_000));
        assert_eq!(job.salary_max, Some(90_000));
        assert!(job.technologies.contains(&"rust".to_string()));
        assert!(!job.technologies.contains(&"2024".to_string()));
        assert_eq!(job.work_mode, WorkMode::Remote);
        assert_eq!(job.level, Level::Senior);
        assert!((outcome.quality_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_record_missing_required_fields() {
        let mut raw = sample("https://jobs.example.com/1", "Engineer", "Acme", "short");
        raw.title = None;
        let outcome = validate_batch(vec![raw], &ValidatorConfig::default(), Utc::now());
        assert_eq!(outcome.rejected, 1);
        assert!(outcome.jobs.is_empty());
    }

    #[test]
    fn swaps_inverted_salary_range() {
        let mut raw = sample("https://jobs.example.com/2", "Engineer", "Acme", "x".repeat(100).as_str());
        raw.salary = Some("€90k - €70k".to_string());
        let outcome = validate_batch(vec![raw], &ValidatorConfig::default(), Utc::now());
        let job = &outcome.jobs[0];
        assert_eq!(job.salary_min, Some(70_000));
        assert_eq!(job.salary_max, Some(90_000));
    }

    #[test]
    fn flags_company_equals_title_anomaly() {
        let raw = sample("https://jobs.example.com/3", "Acme", "Acme", &"x".repeat(100));
        let outcome = validate_batch(vec![raw], &ValidatorConfig::default(), Utc::now());
        assert!(outcome.jobs[0].anomalies.contains(&"company_equals_title".to_string()));
    }

    #[test]
    fn accepts_record_with_description_but_no_company() {
        let mut raw = sample("https://jobs.example.com/4", "Backend Engineer", "Acme", &"x".repeat(100));
        raw.company = None;
        let outcome = validate_batch(vec![raw], &ValidatorConfig::default(), Utc::now());
        assert_eq!(outcome.rejected, 0);
        assert_eq!(outcome.jobs[0].company, "");
    }

    #[test]
    fn rejects_record_with_neither_company_nor_description() {
        let mut raw = sample("https://jobs.example.com/5", "Backend Engineer", "Acme", &"x".repeat(100));
        raw.company = None;
        raw.description = None;
        let outcome = validate_batch(vec![raw], &ValidatorConfig::default(), Utc::now());
        assert_eq!(outcome.rejected, 1);
        assert!(outcome.jobs.is_empty());
    }

    #[test]
    fn parses_mil_suffix_as_thousand_not_million() {
        let mut raw = sample("https://jobs.example.com/6", "Engineer", "Acme", &"x".repeat(100));
        raw.salary = Some("R$ 5 mil - R$ 8 mil".to_string());
        let outcome = validate_batch(vec![raw], &ValidatorConfig::default(), Utc::now());
        let job = &outcome.jobs[0];
        assert_eq!(job.salary_min, Some(5_000));
        assert_eq!(job.salary_max, Some(8_000));
    }
}
