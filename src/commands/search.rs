use anyhow::Result;
use jobharvest_core::{SearchCriteria, Settings};
use jobharvest_search::SearchEngine;
use jobharvest_storage::{CacheIndex, CompressedCache};

#[allow(clippy::too_many_arguments)]
pub fn run(
    settings: &Settings,
    companies: Vec<String>,
    technologies: Vec<String>,
    locations: Vec<String>,
    levels: Vec<String>,
    limit: usize,
) -> Result<()> {
    let cache = CompressedCache::new(
        &settings.cache.dir,
        settings.scraping.compression_level,
        settings.cache.max_age_hours,
    )?;
    let index = CacheIndex::open(cache, std::path::Path::new(&settings.cache.dir).join("index"))?;
    let engine = SearchEngine::new(&index);

    let criteria = SearchCriteria {
        companies,
        technologies,
        locations,
        levels,
        ..Default::default()
    };

    let mut results = engine.search(&criteria);
    results.truncate(limit);

    println!("{} matching blob(s):", results.len());
    for entry in &results {
        println!(
            "  {} | {} jobs | {} | captured {}",
            entry.source_url, entry.job_count, entry.cache_key, entry.captured_at
        );
    }

    println!("\nTop companies:");
    for (name, count) in engine.top_companies(10) {
        println!("  {name}: {count}");
    }

    println!("\nTop technologies:");
    for (name, count) in engine.top_technologies(10) {
        println!("  {name}: {count}");
    }

    Ok(())
}
