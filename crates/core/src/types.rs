use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Work arrangement for a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkMode {
    OnSite,
    Hybrid,
    Remote,
    Unknown,
}

impl Default for WorkMode {
    fn default() -> Self {
        WorkMode::Unknown
    }
}

/// Seniority level for a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Level {
    Intern,
    Junior,
    Mid,
    Senior,
    Lead,
    Director,
    Unknown,
}

impl Default for Level {
    fn default() -> Self {
        Level::Unknown
    }
}

/// A single job-listing record, normalized and validated (§3).
///
/// Mutated only by the validator; every other component treats it as
/// immutable once it leaves the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub url: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub work_mode: WorkMode,
    pub level: Level,
    pub salary_min: Option<u64>,
    pub salary_max: Option<u64>,
    pub description: String,
    pub technologies: Vec<String>,
    pub benefits: Vec<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    pub source_fingerprint: String,
    /// Non-fatal anomaly flags attached by the validator (§4.6).
    #[serde(default)]
    pub anomalies: Vec<String>,
}

/// One compressed group of [`Job`]s captured from a single page fetch (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheBlob {
    pub url: String,
    pub page: u32,
    pub captured_at: DateTime<Utc>,
    pub jobs: Vec<Job>,
}

/// Multi-valued facets extracted from a [`CacheBlob`] at index time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Facets {
    pub companies: BTreeSet<String>,
    pub technologies: BTreeSet<String>,
    pub locations: BTreeSet<String>,
    pub levels: BTreeSet<String>,
}

/// Metadata record about one [`CacheBlob`], the unit of search (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub cache_key: String,
    pub file_path: String,
    pub source_url: String,
    pub captured_at: DateTime<Utc>,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub compression_ratio: f64,
    pub job_count: usize,
    pub facets: Facets,
}

/// Multi-facet search filter for the Cache Index (§4.8).
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub companies: Vec<String>,
    pub technologies: Vec<String>,
    pub locations: Vec<String>,
    pub levels: Vec<String>,
    pub min_jobs: Option<usize>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

/// One incremental-processor session summary, persisted in the checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSession {
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub new: u64,
    pub known: u64,
}

/// Durable checkpoint for the Incremental Processor (§3, §4.9, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub schema: u32,
    pub seen_urls: BTreeSet<String>,
    pub seen_fingerprints: BTreeSet<String>,
    pub sessions: Vec<CheckpointSession>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            schema: 1,
            seen_urls: BTreeSet::new(),
            seen_fingerprints: BTreeSet::new(),
            sessions: Vec::new(),
        }
    }
}

/// Classification result from the Incremental Processor (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    New,
    Known,
    Changed,
}

/// Reason a [`Job`] was identified as a duplicate by the Deduplicator (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateReason {
    Url,
    Fingerprint,
    TitleCompany,
    FuzzyTitle,
}

/// Report from the dedup operations (§4.10, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupReport {
    pub total: usize,
    pub unique: usize,
    pub by_url: usize,
    pub by_fingerprint: usize,
    pub by_title_company: usize,
    pub by_fuzzy_title: usize,
}

impl DedupReport {
    pub fn record(&mut self, reason: DuplicateReason) {
        match reason {
            DuplicateReason::Url => self.by_url += 1,
            DuplicateReason::Fingerprint => self.by_fingerprint += 1,
            DuplicateReason::TitleCompany => self.by_title_company += 1,
            DuplicateReason::FuzzyTitle => self.by_fuzzy_title += 1,
        }
    }

    pub fn duplicates(&self) -> usize {
        self.by_url + self.by_fingerprint + self.by_title_company + self.by_fuzzy_title
    }
}

/// Outcome of a cache prune pass (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneReport {
    pub scanned: usize,
    pub pruned: usize,
    pub reclaimed_bytes: u64,
}

/// Counts of per-kind errors (§7), plus top samples, for the [`RunReport`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub counts: HashMap<String, u64>,
    pub samples: Vec<String>,
}

/// Status of an individual host/seed within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostOutcome {
    pub host: String,
    pub pages_fetched: u64,
    pub jobs_ingested: u64,
    pub circuit_tripped: bool,
}

/// Final report returned by `Orchestrator::run` (§4.12, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub trace_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub jobs_ingested: u64,
    pub jobs_deduped: u64,
    pub pages_fetched: u64,
    pub cache_blobs_written: u64,
    pub health_score: f64,
    pub hosts: Vec<HostOutcome>,
    pub errors: ErrorSummary,
    pub output_paths: Vec<String>,
}
