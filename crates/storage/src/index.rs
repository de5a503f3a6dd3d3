use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use jobharvest_core::{CacheBlob, Facets, IndexEntry, SearchCriteria};

use crate::cache::{CacheBlobStat, CacheError, CompressedCache};

const INDEX_SCHEMA: u32 = 1;

/// On-disk representation of the index, persisted as `cache_index.json`
/// via atomic write (§4.8). Mirrors [`IndexState`] field for field so a
/// reload needs no reconciliation pass.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    schema: u32,
    entries: HashMap<String, IndexEntry>,
    by_date: HashMap<String, Vec<String>>,
    by_company: HashMap<String, Vec<String>>,
    by_tech: HashMap<String, Vec<String>>,
    by_location: HashMap<String, Vec<String>>,
    stats: IndexStats,
}

/// Summary counters carried alongside the index, refreshed on every
/// `put`/`rebuild` so `status` doesn't need to re-walk the entries map.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_entries: usize,
    pub total_jobs: usize,
    pub total_compressed_bytes: u64,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: HashMap<String, IndexEntry>,
    by_date: HashMap<String, Vec<String>>,
    by_company: HashMap<String, Vec<String>>,
    by_tech: HashMap<String, Vec<String>>,
    by_location: HashMap<String, Vec<String>>,
    stats: IndexStats,
}

impl IndexState {
    fn insert(&mut self, cache_key: &str, entry: IndexEntry) {
        bucket_push(&mut self.by_date, &day_bucket(entry.captured_at), cache_key);
        for company in &entry.facets.companies {
            bucket_push(&mut self.by_company, company, cache_key);
        }
        for tech in &entry.facets.technologies {
            bucket_push(&mut self.by_tech, tech, cache_key);
        }
        for location in &entry.facets.locations {
            bucket_push(&mut self.by_location, location, cache_key);
        }
        self.stats.total_jobs += entry.job_count;
        self.stats.total_compressed_bytes += entry.compressed_size;
        self.entries.insert(cache_key.to_string(), entry);
        self.stats.total_entries = self.entries.len();
    }

    fn to_file(&self) -> IndexFile {
        IndexFile {
            schema: INDEX_SCHEMA,
            entries: self.entries.clone(),
            by_date: self.by_date.clone(),
            by_company: self.by_company.clone(),
            by_tech: self.by_tech.clone(),
            by_location: self.by_location.clone(),
            stats: self.stats.clone(),
        }
    }

    fn from_file(file: IndexFile) -> Self {
        Self {
            entries: file.entries,
            by_date: file.by_date,
            by_company: file.by_company,
            by_tech: file.by_tech,
            by_location: file.by_location,
            stats: file.stats,
        }
    }
}

fn bucket_push(index: &mut HashMap<String, Vec<String>>, key: &str, cache_key: &str) {
    let bucket = index.entry(key.to_string()).or_default();
    if !bucket.iter().any(|k| k == cache_key) {
        bucket.push(cache_key.to_string());
    }
}

fn day_bucket(captured_at: chrono::DateTime<chrono::Utc>) -> String {
    captured_at.format("%Y-%m-%d").to_string()
}

/// Wraps the Compressed Cache with inverted indices for multi-facet search
/// (C8). A single `RwLock` gives readers a consistent snapshot while one
/// writer at a time mutates the index (§4.8 concurrency contract).
pub struct CacheIndex {
    cache: CompressedCache,
    index_path: PathBuf,
    state: RwLock<IndexState>,
}

impl CacheIndex {
    /// Loads `cache_index.json` if present; if it is missing or its entry
    /// count diverges from the blobs on disk, rebuilds it by rescanning
    /// blobs (§4.8). Rebuilding is idempotent.
    pub fn open(cache: CompressedCache, index_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let index_dir = index_dir.into();
        fs::create_dir_all(&index_dir)?;
        let index_path = index_dir.join("cache_index.json");

        let mut index = Self {
            cache,
            index_path,
            state: RwLock::new(IndexState::default()),
        };

        let loaded = index.load_from_disk();
        let blob_count = index.cache.list_keys().map(|k| k.len()).unwrap_or(0);
        let entry_count = index.state.read().expect("index lock poisoned").entries.len();

        if !loaded || entry_count != blob_count {
            info!(entry_count, blob_count, "cache index: rebuilding from blobs");
            index.rebuild()?;
        }

        Ok(index)
    }

    fn load_from_disk(&mut self) -> bool {
        let Ok(raw) = fs::read_to_string(&self.index_path) else {
            return false;
        };
        let Ok(file) = serde_json::from_str::<IndexFile>(&raw) else {
            warn!(path = %self.index_path.display(), "cache index file unreadable, will rebuild");
            return false;
        };
        if file.schema != INDEX_SCHEMA {
            warn!(schema = file.schema, "cache index has unknown schema version, will rebuild");
            return false;
        }
        *self.state.write().expect("index lock poisoned") = IndexState::from_file(file);
        true
    }

    /// Rescans every blob on disk and reconstructs index entries, inverted
    /// indices, and stats from their contents.
    pub fn rebuild(&mut self) -> std::io::Result<()> {
        let keys = self.cache.list_keys()?;
        let mut rebuilt = IndexState::default();
        for key in keys {
            match self.cache.get::<CacheBlob>(&key) {
                Ok(blob) => {
                    let stat = blob_stat_from_disk(&self.cache, &key, &blob);
                    let entry = entry_from_blob(&self.cache, &key, &blob, &stat);
                    rebuilt.insert(&key, entry);
                }
                Err(CacheError::Corrupt(k, reason)) => {
                    warn!(cache_key = %k, reason, "skipping corrupt blob during rebuild");
                }
                Err(_) => {}
            }
        }
        *self.state.write().expect("index lock poisoned") = rebuilt;
        self.persist()
    }

    fn persist(&self) -> std::io::Result<()> {
        let file = self.state.read().expect("index lock poisoned").to_file();
        let json = serde_json::to_vec_pretty(&file)?;

        let tmp_path = self.index_path.with_extension("json.tmp");
        fs::write(&tmp_path, &json)?;
        fs::rename(&tmp_path, &self.index_path)?;
        Ok(())
    }

    /// Stores `blob` via the Compressed Cache, extracts its facets, and
    /// updates the inverted indices plus the primary entry (§4.8).
    pub fn put(&self, cache_key: &str, blob: &CacheBlob) -> Result<IndexEntry, CacheError> {
        let stat = self.cache.put(cache_key, blob)?;
        let entry = entry_from_blob(&self.cache, cache_key, blob, &stat);
        self.state
            .write()
            .expect("index lock poisoned")
            .insert(cache_key, entry.clone());
        let _ = self.persist();
        Ok(entry)
    }

    pub fn get_blob(&self, cache_key: &str) -> Result<CacheBlob, CacheError> {
        self.cache.get(cache_key)
    }

    /// Multi-facet filter: OR within a facet list, AND across facets (§4.8).
    /// Narrows via the inverted indices first when a facet list is given,
    /// then filters the candidate set; never touches blob files.
    pub fn search(&self, criteria: &SearchCriteria) -> Vec<IndexEntry> {
        let state = self.state.read().expect("index lock poisoned");

        let candidates = narrow_candidates(&state, criteria);
        let mut matches: Vec<IndexEntry> = match candidates {
            Some(keys) => keys
                .into_iter()
                .filter_map(|k| state.entries.get(&k))
                .filter(|e| matches_criteria(e, criteria))
                .cloned()
                .collect(),
            None => state
                .entries
                .values()
                .filter(|e| matches_criteria(e, criteria))
                .cloned()
                .collect(),
        };
        matches.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        matches
    }

    pub fn top_companies(&self, k: usize) -> Vec<(String, u64)> {
        self.top_facet(k, |s| &s.by_company)
    }

    pub fn top_technologies(&self, k: usize) -> Vec<(String, u64)> {
        self.top_facet(k, |s| &s.by_tech)
    }

    fn top_facet(
        &self,
        k: usize,
        select: impl Fn(&IndexState) -> &HashMap<String, Vec<String>>,
    ) -> Vec<(String, u64)> {
        let state = self.state.read().expect("index lock poisoned");
        let mut ranked: Vec<(String, u64)> = select(&state)
            .iter()
            .map(|(value, keys)| (value.clone(), keys.len() as u64))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }

    pub fn stats(&self) -> IndexStats {
        self.state.read().expect("index lock poisoned").stats.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("index lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cache_dir(&self) -> &Path {
        self.cache.dir()
    }
}

/// Intersects the per-facet candidate sets named in `criteria`, returning
/// `None` when no facet filter was given (caller then scans everything).
fn narrow_candidates(state: &IndexState, criteria: &SearchCriteria) -> Option<Vec<String>> {
    let mut sets: Vec<std::collections::HashSet<String>> = Vec::new();
    if !criteria.companies.is_empty() {
        sets.push(union_keys(&state.by_company, &criteria.companies));
    }
    if !criteria.technologies.is_empty() {
        sets.push(union_keys(&state.by_tech, &criteria.technologies));
    }
    if !criteria.locations.is_empty() {
        sets.push(union_keys(&state.by_location, &criteria.locations));
    }
    if sets.is_empty() {
        return None;
    }
    let mut iter = sets.into_iter();
    let mut acc = iter.next().unwrap_or_default();
    for set in iter {
        acc.retain(|k| set.contains(k));
    }
    Some(acc.into_iter().collect())
}

fn union_keys(index: &HashMap<String, Vec<String>>, values: &[String]) -> std::collections::HashSet<String> {
    let mut out = std::collections::HashSet::new();
    for value in values {
        if let Some(keys) = index.get(value) {
            out.extend(keys.iter().cloned());
        }
    }
    out
}

fn entry_from_blob(
    cache: &CompressedCache,
    cache_key: &str,
    blob: &CacheBlob,
    stat: &CacheBlobStat,
) -> IndexEntry {
    let facets = facets_from_blob(blob);

    IndexEntry {
        cache_key: cache_key.to_string(),
        file_path: cache
            .dir()
            .join(format!("{cache_key}.json.gz"))
            .to_string_lossy()
            .to_string(),
        source_url: blob.url.clone(),
        captured_at: blob.captured_at,
        uncompressed_size: stat.uncompressed_size,
        compressed_size: stat.compressed_size,
        compression_ratio: stat.compression_ratio(),
        job_count: blob.jobs.len(),
        facets,
    }
}

/// Reconstructs blob size stats from disk during a rebuild, where no fresh
/// [`CacheBlobStat`] from a `put` call is available.
fn blob_stat_from_disk(cache: &CompressedCache, cache_key: &str, blob: &CacheBlob) -> CacheBlobStat {
    let uncompressed_size = serde_json::to_vec(blob).map(|v| v.len() as u64).unwrap_or(0);
    let compressed_size = fs::metadata(cache.dir().join(format!("{cache_key}.json.gz")))
        .map(|m| m.len())
        .unwrap_or(0);
    CacheBlobStat {
        path: cache.dir().join(format!("{cache_key}.json.gz")),
        uncompressed_size,
        compressed_size,
    }
}

fn facets_from_blob(blob: &CacheBlob) -> Facets {
    let mut facets = Facets::default();
    for job in &blob.jobs {
        facets.companies.insert(job.company.clone());
        facets.locations.insert(job.location.clone());
        facets.levels.insert(format!("{:?}", job.level).to_lowercase());
        for tech in &job.technologies {
            facets.technologies.insert(tech.clone());
        }
    }
    facets
}

fn matches_criteria(entry: &IndexEntry, criteria: &SearchCriteria) -> bool {
    if !criteria.companies.is_empty()
        && !criteria.companies.iter().any(|c| entry.facets.companies.contains(c))
    {
        return false;
    }
    if !criteria.technologies.is_empty()
        && !criteria
            .technologies
            .iter()
            .any(|t| entry.facets.technologies.contains(t))
    {
        return false;
    }
    if !criteria.locations.is_empty()
        && !criteria.locations.iter().any(|l| entry.facets.locations.contains(l))
    {
        return false;
    }
    if !criteria.levels.is_empty()
        && !criteria.levels.iter().any(|l| entry.facets.levels.contains(l))
    {
        return false;
    }
    if let Some(min_jobs) = criteria.min_jobs {
        if entry.job_count < min_jobs {
            return false;
        }
    }
    if let Some(from) = criteria.date_from {
        if entry.captured_at < from {
            return false;
        }
    }
    if let Some(to) = criteria.date_to {
        if entry.captured_at > to {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobharvest_core::{Job, Level, WorkMode};

    fn sample_job(company: &str, tech: &str) -> Job {
        Job {
            url: format!("https://jobs.example.com/{company}"),
            title: "Engineer".to_string(),
            company: company.to_string(),
            location: "Berlin".to_string(),
            work_mode: WorkMode::Remote,
            level: Level::Senior,
            salary_min: Some(80_000),
            salary_max: Some(100_000),
            description: "x".repeat(100),
            technologies: vec![tech.to_string()],
            benefits: vec![],
            posted_at: None,
            collected_at: Utc::now(),
            source_fingerprint: format!("fp-{company}"),
            anomalies: vec![],
        }
    }

    #[test]
    fn put_then_search_finds_entry_by_company_and_tech() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompressedCache::new(dir.path().join("blobs"), 6, 0).unwrap();
        let index = CacheIndex::open(cache, dir.path().join("index")).unwrap();

        let blob = CacheBlob {
            url: "https://jobs.example.com/page1".to_string(),
            page: 1,
            captured_at: Utc::now(),
            jobs: vec![sample_job("Acme", "rust")],
        };
        index.put("key1", &blob).unwrap();

        let mut criteria = SearchCriteria::default();
        criteria.companies = vec!["Acme".to_string()];
        let results = index.search(&criteria);
        assert_eq!(results.len(), 1);

        let mut criteria2 = SearchCriteria::default();
        criteria2.technologies = vec!["go".to_string()];
        assert!(index.search(&criteria2).is_empty());
    }

    #[test]
    fn rebuild_recovers_index_from_blobs_alone() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompressedCache::new(dir.path().join("blobs"), 6, 0).unwrap();
        let index = CacheIndex::open(cache, dir.path().join("index")).unwrap();
        let blob = CacheBlob {
            url: "https://jobs.example.com/page1".to_string(),
            page: 1,
            captured_at: Utc::now(),
            jobs: vec![sample_job("Acme", "rust")],
        };
        index.put("key1", &blob).unwrap();
        drop(index);

        fs::remove_file(dir.path().join("index").join("cache_index.json")).unwrap();

        let cache2 = CompressedCache::new(dir.path().join("blobs"), 6, 0).unwrap();
        let rebuilt = CacheIndex::open(cache2, dir.path().join("index")).unwrap();
        assert_eq!(rebuilt.len(), 1);
    }

    #[test]
    fn persisted_index_file_carries_schema_and_inverted_facets() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompressedCache::new(dir.path().join("blobs"), 6, 0).unwrap();
        let index = CacheIndex::open(cache, dir.path().join("index")).unwrap();
        let blob = CacheBlob {
            url: "https://jobs.example.com/page1".to_string(),
            page: 1,
            captured_at: Utc::now(),
            jobs: vec![sample_job("Acme", "rust")],
        };
        index.put("key1", &blob).unwrap();

        let raw = fs::read_to_string(dir.path().join("index").join("cache_index.json")).unwrap();
        let file: IndexFile = serde_json::from_str(&raw).unwrap();
        assert_eq!(file.schema, INDEX_SCHEMA);
        assert!(file.by_company.get("Acme").unwrap().contains(&"key1".to_string()));
        assert!(file.by_tech.get("rust").unwrap().contains(&"key1".to_string()));
        assert_eq!(file.stats.total_entries, 1);
        assert_eq!(file.stats.total_jobs, 1);
    }

    #[test]
    fn top_companies_ranks_by_inverted_index_size() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompressedCache::new(dir.path().join("blobs"), 6, 0).unwrap();
        let index = CacheIndex::open(cache, dir.path().join("index")).unwrap();

        index
            .put(
                "key1",
                &CacheBlob {
                    url: "https://jobs.example.com/1".to_string(),
                    page: 1,
                    captured_at: Utc::now(),
                    jobs: vec![sample_job("Acme", "rust"), sample_job("Acme", "go")],
                },
            )
            .unwrap();
        index
            .put(
                "key2",
                &CacheBlob {
                    url: "https://jobs.example.com/2".to_string(),
                    page: 1,
                    captured_at: Utc::now(),
                    jobs: vec![sample_job("Globex", "rust")],
                },
            )
            .unwrap();

        let top = index.top_companies(1);
        assert_eq!(top[0].0, "Acme");
    }
}
