use std::collections::HashSet;
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

use lru::LruCache;
use tracing::debug;

use jobharvest_core::{DedupReport, DuplicateReason, Job};

const DEFAULT_LRU_SIZE: usize = 500;
const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;
const COMPANY_TOKEN_OVERLAP: f64 = 0.5;

/// Four-level duplicate detector (C10): URL exact, fingerprint exact,
/// case-folded (title, company) pair, then fuzzy title + company token
/// overlap (§4.10). Levels are tried in that order; the first match wins.
pub struct Deduplicator {
    seen_urls: Mutex<HashSet<String>>,
    seen_fingerprints: Mutex<HashSet<String>>,
    seen_title_company: Mutex<HashSet<String>>,
    recent_titles: Mutex<LruCache<String, String>>,
    similarity_threshold: f64,
}

impl Deduplicator {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            seen_urls: Mutex::new(HashSet::new()),
            seen_fingerprints: Mutex::new(HashSet::new()),
            seen_title_company: Mutex::new(HashSet::new()),
            recent_titles: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_LRU_SIZE).expect("nonzero cache size"),
            )),
            similarity_threshold,
        }
    }

    pub fn default_threshold() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }

    /// Classifies each job in order, keeping only the first occurrence at
    /// each level and recording the reason for every duplicate (§4.10).
    pub fn dedupe(&self, jobs: Vec<Job>) -> (Vec<Job>, DedupReport) {
        let mut report = DedupReport {
            total: jobs.len(),
            ..Default::default()
        };
        let mut unique = Vec::with_capacity(jobs.len());

        for job in jobs {
            match self.classify(&job) {
                Some(reason) => {
                    report.record(reason);
                    debug!(url = %job.url, ?reason, "duplicate job dropped");
                }
                None => {
                    self.remember(&job);
                    unique.push(job);
                }
            }
        }

        report.unique = unique.len();
        (unique, report)
    }

    fn classify(&self, job: &Job) -> Option<DuplicateReason> {
        if self.seen_urls.lock().expect("dedup lock poisoned").contains(&job.url) {
            return Some(DuplicateReason::Url);
        }
        if self
            .seen_fingerprints
            .lock()
            .expect("dedup lock poisoned")
            .contains(&job.source_fingerprint)
        {
            return Some(DuplicateReason::Fingerprint);
        }
        let key = title_company_key(&job.title, &job.company);
        if self
            .seen_title_company
            .lock()
            .expect("dedup lock poisoned")
            .contains(&key)
        {
            return Some(DuplicateReason::TitleCompany);
        }
        if self.fuzzy_match(job) {
            return Some(DuplicateReason::FuzzyTitle);
        }
        None
    }

    fn fuzzy_match(&self, job: &Job) -> bool {
        let recent = self.recent_titles.lock().expect("dedup lock poisoned");
        let normalized_title = job.title.to_lowercase();
        for (seen_title, seen_company) in recent.iter() {
            let distance = strsim::levenshtein(&normalized_title, seen_title);
            let max_len = normalized_title.len().max(seen_title.len()).max(1);
            let similarity = 1.0 - (distance as f64 / max_len as f64);
            if similarity >= self.similarity_threshold
                && token_overlap(&job.company, seen_company) >= COMPANY_TOKEN_OVERLAP
            {
                return true;
            }
        }
        false
    }

    fn remember(&self, job: &Job) {
        self.seen_urls
            .lock()
            .expect("dedup lock poisoned")
            .insert(job.url.clone());
        self.seen_fingerprints
            .lock()
            .expect("dedup lock poisoned")
            .insert(job.source_fingerprint.clone());
        self.seen_title_company
            .lock()
            .expect("dedup lock poisoned")
            .insert(title_company_key(&job.title, &job.company));
        self.recent_titles
            .lock()
            .expect("dedup lock poisoned")
            .put(job.title.to_lowercase(), job.company.to_lowercase());
    }

    /// Dedupes a JSON array file of jobs in place. Backs up the original to
    /// a `.bak` sibling before rewriting (§4.10).
    pub fn clean_file(&self, path: &Path) -> anyhow::Result<DedupReport> {
        let raw = fs::read_to_string(path)?;
        let jobs: Vec<Job> = serde_json::from_str(&raw)?;

        let backup_path = path.with_extension("json.bak");
        fs::copy(path, &backup_path)?;

        let (unique, report) = self.dedupe(jobs);

        let json = serde_json::to_vec_pretty(&unique)?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &json)?;
        fs::rename(&tmp_path, path)?;

        Ok(report)
    }
}

fn title_company_key(title: &str, company: &str) -> String {
    format!("{}|{}", title.to_lowercase(), company.to_lowercase())
}

fn token_overlap(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<&str> = a.split_whitespace().collect();
    let tokens_b: HashSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let smaller = tokens_a.len().min(tokens_b.len());
    intersection as f64 / smaller as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobharvest_core::{Level, WorkMode};

    fn sample_job(url: &str, title: &str, company: &str, fingerprint: &str) -> Job {
        Job {
            url: url.to_string(),
            title: title.to_string(),
            company: company.to_string(),
            location: "Berlin".to_string(),
            work_mode: WorkMode::Remote,
            level: Level::Senior,
            salary_min: None,
            salary_max: None,
            description: "x".repeat(100),
            technologies: vec![],
            benefits: vec![],
            posted_at: None,
            collected_at: Utc::now(),
            source_fingerprint: fingerprint.to_string(),
            anomalies: vec![],
        }
    }

    #[test]
    fn drops_exact_url_duplicate() {
        let dedup = Deduplicator::default_threshold();
        let jobs = vec![
            sample_job("https://x.com/1", "Engineer", "Acme", "fp1"),
            sample_job("https://x.com/1", "Engineer", "Acme", "fp2"),
        ];
        let (unique, report) = dedup.dedupe(jobs);
        assert_eq!(unique.len(), 1);
        assert_eq!(report.by_url, 1);
        assert_eq!(report.duplicates(), 1);
    }

    #[test]
    fn drops_fingerprint_duplicate_with_different_url() {
        let dedup = Deduplicator::default_threshold();
        let jobs = vec![
            sample_job("https://x.com/1", "Engineer", "Acme", "fp1"),
            sample_job("https://x.com/1?utm=ref", "Engineer", "Acme", "fp1"),
        ];
        let (unique, report) = dedup.dedupe(jobs);
        assert_eq!(unique.len(), 1);
        assert_eq!(report.by_fingerprint, 1);
    }

    #[test]
    fn drops_title_company_duplicate_case_insensitively() {
        let dedup = Deduplicator::default_threshold();
        let jobs = vec![
            sample_job("https://x.com/1", "Senior Engineer", "Acme", "fp1"),
            sample_job("https://x.com/2", "SENIOR ENGINEER", "acme", "fp2"),
        ];
        let (unique, report) = dedup.dedupe(jobs);
        assert_eq!(unique.len(), 1);
        assert_eq!(report.by_title_company, 1);
    }

    #[test]
    fn fuzzy_title_match_requires_company_token_overlap() {
        let dedup = Deduplicator::default_threshold();
        let jobs = vec![
            sample_job("https://x.com/1", "Senior Backend Engineer", "Acme Corp", "fp1"),
            sample_job("https://x.com/2", "Senior Backend Engineers", "Acme Corp", "fp2"),
            sample_job("https://x.com/3", "Senior Backend Engineer", "Globex Inc", "fp3"),
        ];
        let (unique, report) = dedup.dedupe(jobs);
        assert_eq!(unique.len(), 2);
        assert_eq!(report.by_fuzzy_title, 1);
    }

    /// A fresh pass over an already-deduped list changes nothing: dedupe is
    /// idempotent on its output, not just stateful within one pass.
    #[test]
    fn deduping_an_already_unique_set_is_a_no_op() {
        let jobs = vec![
            sample_job("https://x.com/1", "Senior Backend Engineer", "Acme Corp", "fp1"),
            sample_job("https://x.com/2", "Platform Engineer", "Globex Inc", "fp2"),
            sample_job("https://x.com/3", "Data Scientist", "Initech", "fp3"),
        ];
        let (once, report_once) = Deduplicator::default_threshold().dedupe(jobs);
        assert_eq!(report_once.duplicates(), 0);

        let (twice, report_twice) = Deduplicator::default_threshold().dedupe(once.clone());
        assert_eq!(once, twice);
        assert_eq!(report_twice.duplicates(), 0);
        assert_eq!(report_twice.unique, once.len());
    }

    #[test]
    fn clean_file_backs_up_and_rewrites_with_dedupe_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let jobs = vec![
            sample_job("https://x.com/1", "Engineer", "Acme", "fp1"),
            sample_job("https://x.com/1", "Engineer", "Acme", "fp2"),
        ];
        fs::write(&path, serde_json::to_vec(&jobs).unwrap()).unwrap();

        let dedup = Deduplicator::default_threshold();
        let report = dedup.clean_file(&path).unwrap();

        assert_eq!(report.duplicates(), 1);
        assert!(dir.path().join("jobs.json.bak").exists());
        let remaining: Vec<Job> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(remaining.len(), 1);
    }
}
