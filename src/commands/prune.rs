use anyhow::Result;
use jobharvest_core::Settings;
use jobharvest_storage::{CacheIndex, CompressedCache};

pub fn run(settings: &Settings, max_age_hours: Option<u64>) -> Result<()> {
    let max_age_hours = max_age_hours.unwrap_or(settings.cache.max_age_hours);

    let cache = CompressedCache::new(
        &settings.cache.dir,
        settings.scraping.compression_level,
        settings.cache.max_age_hours,
    )?;
    let outcome = cache.prune_expired(max_age_hours)?;

    let mut index = CacheIndex::open(cache, std::path::Path::new(&settings.cache.dir).join("index"))?;
    index.rebuild()?;

    println!("cache prune (max age {max_age_hours}h):");
    println!("  scanned:         {}", outcome.scanned);
    println!("  pruned:          {}", outcome.pruned);
    println!("  reclaimed bytes: {}", outcome.reclaimed_bytes);
    println!("  blobs remaining: {}", index.len());

    Ok(())
}
