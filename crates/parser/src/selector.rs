use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// Ordered extraction strategies with adaptive scoring (C5). A strategy
/// carries its own CSS locator and a post-processing callable, so the
/// fallback engine never hard-codes the underlying DOM query language.
#[derive(Clone)]
pub struct Strategy {
    pub name: String,
    pub locator: String,
    pub evaluate: Arc<dyn Fn(&ElementRef) -> Option<String> + Send + Sync>,
}

impl Strategy {
    pub fn new(
        name: impl Into<String>,
        locator: impl Into<String>,
        evaluate: Arc<dyn Fn(&ElementRef) -> Option<String> + Send + Sync>,
    ) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
            evaluate,
        }
    }
}

/// Extracts the trimmed, whitespace-collapsed text content of an element.
pub fn text_of() -> Arc<dyn Fn(&ElementRef) -> Option<String> + Send + Sync> {
    Arc::new(|el: &ElementRef| {
        let raw = el.text().collect::<Vec<_>>().join(" ");
        let collapsed = collapse_whitespace(raw.trim());
        if collapsed.is_empty() {
            None
        } else {
            Some(collapsed)
        }
    })
}

/// Extracts an attribute value from an element.
pub fn attr_of(name: &'static str) -> Arc<dyn Fn(&ElementRef) -> Option<String> + Send + Sync> {
    Arc::new(move |el: &ElementRef| {
        el.value()
            .attr(name)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lightweight per-field acceptor: length bounds and an optional shape
/// regex (§4.5 step 3).
pub struct Acceptor {
    pub min_len: usize,
    pub max_len: usize,
    pub pattern: Option<Regex>,
}

impl Acceptor {
    pub fn free_text(min_len: usize, max_len: usize) -> Self {
        Self {
            min_len,
            max_len,
            pattern: None,
        }
    }

    pub fn matching(min_len: usize, max_len: usize, pattern: Regex) -> Self {
        Self {
            min_len,
            max_len,
            pattern: Some(pattern),
        }
    }

    fn accepts(&self, value: &str) -> bool {
        let len = value.chars().count();
        if len < self.min_len || len > self.max_len {
            return false;
        }
        match &self.pattern {
            Some(re) => re.is_match(value),
            None => true,
        }
    }
}

#[derive(Default, Clone, Copy)]
struct ScoreState {
    successes: u64,
    failures: u64,
}

impl ScoreState {
    fn score(&self) -> f64 {
        (self.successes as f64 + 1.0) / (self.successes as f64 + self.failures as f64 + 2.0)
    }
}

/// Shared scoring bookkeeping used by both [`FieldFallback`] and
/// [`ListingLocator`]: `score = (successes + 1) / (successes + failures + 2)`,
/// re-sorted on every lookup and persisted across runs (§4.5).
struct AdaptiveScorer {
    scores: Mutex<HashMap<String, ScoreState>>,
}

impl AdaptiveScorer {
    fn new(names: &[String]) -> Self {
        let mut scores = HashMap::new();
        for name in names {
            scores.insert(name.clone(), ScoreState::default());
        }
        Self {
            scores: Mutex::new(scores),
        }
    }

    fn record(&self, name: &str, success: bool) {
        let mut scores = self.scores.lock().expect("selector score lock poisoned");
        let entry = scores.entry(name.to_string()).or_default();
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
    }

    /// Current evaluation order, highest score first. Ties keep the
    /// original declaration order since `sort_by` is stable.
    fn ordered(&self, declared: &[String]) -> Vec<String> {
        let scores = self.scores.lock().expect("selector score lock poisoned");
        let mut ordered: Vec<String> = declared.to_vec();
        ordered.sort_by(|a, b| {
            let sa = scores.get(a).copied().unwrap_or_default().score();
            let sb = scores.get(b).copied().unwrap_or_default().score();
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        });
        ordered
    }

    fn snapshot(&self) -> HashMap<String, (u64, u64)> {
        self.scores
            .lock()
            .expect("selector score lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), (v.successes, v.failures)))
            .collect()
    }

    fn load(&self, data: &HashMap<String, (u64, u64)>) {
        let mut scores = self.scores.lock().expect("selector score lock poisoned");
        for (name, (successes, failures)) in data {
            scores.insert(
                name.clone(),
                ScoreState {
                    successes: *successes,
                    failures: *failures,
                },
            );
        }
    }
}

/// Extracts a single field value, trying strategies in adaptive score order
/// until one produces an accepted value, or reports `fallback_exhausted`
/// (§4.5).
pub struct FieldFallback {
    pub field: String,
    strategies: Vec<Strategy>,
    acceptor: Acceptor,
    scorer: AdaptiveScorer,
}

impl FieldFallback {
    pub fn new(field: impl Into<String>, strategies: Vec<Strategy>, acceptor: Acceptor) -> Self {
        let names: Vec<String> = strategies.iter().map(|s| s.name.clone()).collect();
        Self {
            field: field.into(),
            strategies,
            acceptor,
            scorer: AdaptiveScorer::new(&names),
        }
    }

    pub fn extract(&self, container: &ElementRef) -> Option<String> {
        let declared: Vec<String> = self.strategies.iter().map(|s| s.name.clone()).collect();
        for name in self.scorer.ordered(&declared) {
            let Some(strategy) = self.strategies.iter().find(|s| s.name == name) else {
                continue;
            };
            let raw = Selector::parse(&strategy.locator)
                .ok()
                .and_then(|sel| container.select(&sel).next())
                .and_then(|el| (strategy.evaluate)(&el));

            match raw {
                Some(value) if self.acceptor.accepts(&value) => {
                    self.scorer.record(&strategy.name, true);
                    return Some(value);
                }
                _ => self.scorer.record(&strategy.name, false),
            }
        }
        debug!(field = %self.field, "selector fallback exhausted");
        None
    }

    pub fn scores(&self) -> HashMap<String, (u64, u64)> {
        self.scorer.snapshot()
    }

    pub fn load_scores(&self, data: &HashMap<String, (u64, u64)>) {
        self.scorer.load(data);
    }
}

/// Locates the repeated elements that represent individual listings on a
/// page, trying candidate container selectors in adaptive score order
/// (§4.5, applied to container discovery rather than a single field).
pub struct ListingLocator {
    candidates: Vec<(String, String)>,
    scorer: AdaptiveScorer,
}

impl ListingLocator {
    pub fn new(candidates: Vec<(&str, &str)>) -> Self {
        let candidates: Vec<(String, String)> = candidates
            .into_iter()
            .map(|(name, css)| (name.to_string(), css.to_string()))
            .collect();
        let names: Vec<String> = candidates.iter().map(|(n, _)| n.clone()).collect();
        Self {
            candidates,
            scorer: AdaptiveScorer::new(&names),
        }
    }

    pub fn locate<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        let declared: Vec<String> = self.candidates.iter().map(|(n, _)| n.clone()).collect();
        for name in self.scorer.ordered(&declared) {
            let Some((_, css)) = self.candidates.iter().find(|(n, _)| *n == name) else {
                continue;
            };
            if let Ok(sel) = Selector::parse(css) {
                let matches: Vec<ElementRef<'a>> = document.select(&sel).collect();
                if !matches.is_empty() {
                    self.scorer.record(&name, true);
                    return matches;
                }
            }
            self.scorer.record(&name, false);
        }
        Vec::new()
    }

    pub fn scores(&self) -> HashMap<String, (u64, u64)> {
        self.scorer.snapshot()
    }

    pub fn load_scores(&self, data: &HashMap<String, (u64, u64)>) {
        self.scorer.load(data);
    }
}

pub static URL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S+$").expect("valid regex"));
