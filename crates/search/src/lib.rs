use jobharvest_core::{IndexEntry, SearchCriteria};
use jobharvest_storage::CacheIndex;

/// Programmatic search facade over the Cache Index (§6). Ties in
/// `top_companies`/`top_technologies` are already broken lexically by
/// [`CacheIndex`]; this crate adds no logic of its own beyond naming the
/// three operations the interface exposes.
pub struct SearchEngine<'a> {
    index: &'a CacheIndex,
}

impl<'a> SearchEngine<'a> {
    pub fn new(index: &'a CacheIndex) -> Self {
        Self { index }
    }

    pub fn search(&self, criteria: &SearchCriteria) -> Vec<IndexEntry> {
        self.index.search(criteria)
    }

    pub fn top_companies(&self, k: usize) -> Vec<(String, u64)> {
        self.index.top_companies(k)
    }

    pub fn top_technologies(&self, k: usize) -> Vec<(String, u64)> {
        self.index.top_technologies(k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobharvest_core::{CacheBlob, Job, Level, WorkMode};
    use jobharvest_storage::CompressedCache;

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
    fn search_and_top_facets_delegate_to_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompressedCache::new(dir.path().join("blobs"), 6, 0).unwrap();
        let index = CacheIndex::open(cache, dir.path().join("index")).unwrap();

        index
            .put(
                "key1",
                &CacheBlob {
                    url: "https://jobs.example.com/page1".to_string(),
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
                    url: "https://jobs.example.com/page2".to_string(),
                    page: 1,
                    captured_at: Utc::now(),
                    jobs: vec![sample_job("Globex", "rust")],
                },
            )
            .unwrap();

        let engine = SearchEngine::new(&index);

        let mut criteria = SearchCriteria::default();
        criteria.technologies = vec!["rust".to_string()];
        assert_eq!(engine.search(&criteria).len(), 2);

        let top = engine.top_companies(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].0, "Acme");

        let top_tech = engine.top_technologies(10);
        assert!(top_tech.iter().any(|(name, _)| name == "rust"));
    }
}
