use anyhow::Result;
use jobharvest_core::Settings;
use jobharvest_frontier::IncrementalProcessor;
use jobharvest_storage::{CacheIndex, CompressedCache};

pub fn run(settings: &Settings) -> Result<()> {
    let cache = CompressedCache::new(
        &settings.cache.dir,
        settings.scraping.compression_level,
        settings.cache.max_age_hours,
    )?;
    let index = CacheIndex::open(cache, std::path::Path::new(&settings.cache.dir).join("index"))?;
    let checkpoint = IncrementalProcessor::open(
        std::path::Path::new(&settings.cache.dir).join("checkpoint.json"),
    );
    let summary = checkpoint.summary();

    println!("+----------------------------------------+");
    println!("| jobharvest status                       |");
    println!("+----------------------------------------+");
    let stats = index.stats();
    println!("cache dir:        {}", index.cache_dir().display());
    println!("indexed blobs:    {}", index.len());
    println!("indexed jobs:     {}", stats.total_jobs);
    println!("compressed bytes: {}", stats.total_compressed_bytes);
    println!("seen urls:        {}", summary.seen_urls);
    println!("seen fingerprints:{}", summary.seen_fingerprints);
    println!("sessions recorded:{}", summary.sessions);
    match summary.last_session {
        Some(session) => {
            println!(
                "last session:     started {} | new={} known={}",
                session.started_at, session.new, session.known
            );
            match session.ended_at {
                Some(ended) => println!("                   ended {ended}"),
                None => println!("                   (did not complete cleanly)"),
            }
        }
        None => println!("last session:     none recorded yet"),
    }
    println!("output dir:       {}", settings.output.dir);

    Ok(())
}
