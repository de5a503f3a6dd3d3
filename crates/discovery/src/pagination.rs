use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use jobharvest_parser::selector::{attr_of, Acceptor, FieldFallback, Strategy};

/// Pagination style detected on a listing page (§4.12 step 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationStyle {
    /// A `<a>` pointing at the next page, with its resolved href.
    NextLink(String),
    /// Numbered page links were found; highest page number seen.
    Numeric(u32),
    /// A load-more button or `data-infinite-scroll` marker is present.
    InfiniteScroll,
    None,
}

static PAGE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,5}$").expect("valid regex"));

/// Detects how a listing page paginates, trying the same ordered
/// strategy-with-acceptor mechanism the field extractor uses (§4.5) rather
/// than a single hard-coded selector per style.
pub struct PaginationDetector {
    next_link: FieldFallback,
    infinite_scroll: Selector,
}

impl PaginationDetector {
    pub fn new() -> Self {
        let next_link = FieldFallback::new(
            "next_link",
            vec![
                Strategy::new(r#"rel=next"#, r#"a[rel="next"]"#, attr_of("href")),
                Strategy::new("aria-label-next", r#"a[aria-label="Next"]"#, attr_of("href")),
                Strategy::new("class-next", "a.next, a.pagination-next", attr_of("href")),
                Strategy::new("text-next", "a.page-link", attr_of("href")),
            ],
            Acceptor::matching(1, 2048, PAGE_NUMBER_OR_PATH.clone()),
        );

        Self {
            next_link,
            infinite_scroll: Selector::parse(
                "[data-infinite-scroll], .infinite-scroll, button.load-more, .load-more-jobs",
            )
            .expect("valid selector"),
        }
    }

    pub fn detect(&self, document: &Html) -> PaginationStyle {
        if let Some(href) = self.next_link.extract(&document.root_element()) {
            debug!(href, "pagination: next link detected");
            return PaginationStyle::NextLink(href);
        }

        if let Some(max_page) = self.highest_numeric_page(document) {
            return PaginationStyle::Numeric(max_page);
        }

        if document.select(&self.infinite_scroll).next().is_some() {
            return PaginationStyle::InfiniteScroll;
        }

        PaginationStyle::None
    }

    fn highest_numeric_page(&self, document: &Html) -> Option<u32> {
        let selector = Selector::parse(".pagination a, .pager a, nav[aria-label=pagination] a").ok()?;
        document
            .select(&selector)
            .filter_map(|el| {
                let text = el.text().collect::<Vec<_>>().join("").trim().to_string();
                if PAGE_NUMBER.is_match(&text) {
                    text.parse::<u32>().ok()
                } else {
                    None
                }
            })
            .max()
    }
}

impl Default for PaginationDetector {
    fn default() -> Self {
        Self::new()
    }
}

static PAGE_NUMBER_OR_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S+$").expect("valid regex"));

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(html: &str) -> Html {
        Html::parse_document(html)
    }

    #[test]
    fn detects_explicit_next_link() {
        let detector = PaginationDetector::new();
        let document = doc(r#"<div><a rel="next" href="/jobs?page=2">Next</a></div>"#);
        assert_eq!(
            detector.detect(&document),
            PaginationStyle::NextLink("/jobs?page=2".to_string())
        );
    }

    #[test]
    fn detects_numeric_pagination_without_a_next_link() {
        let detector = PaginationDetector::new();
        let document = doc(
            r#"<nav class="pagination"><a href="?p=1">1</a><a href="?p=2">2</a><a href="?p=3">3</a></nav>"#,
        );
        assert_eq!(detector.detect(&document), PaginationStyle::Numeric(3));
    }

    #[test]
    fn detects_infinite_scroll_marker() {
        let detector = PaginationDetector::new();
        let document = doc(r#"<div class="results"><button class="load-more">Load more</button></div>"#);
        assert_eq!(detector.detect(&document), PaginationStyle::InfiniteScroll);
    }

    #[test]
    fn returns_none_when_no_pagination_markers_exist() {
        let detector = PaginationDetector::new();
        let document = doc(r#"<div class="results"><p>No more results</p></div>"#);
        assert_eq!(detector.detect(&document), PaginationStyle::None);
    }
}
