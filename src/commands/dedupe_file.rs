use std::path::Path;

use anyhow::Result;
use jobharvest_frontier::Deduplicator;

pub fn run(path: &Path, similarity_threshold: f64) -> Result<()> {
    let dedup = Deduplicator::new(similarity_threshold);
    let report = dedup.clean_file(path)?;

    println!("deduped {}", path.display());
    println!("  total:          {}", report.total);
    println!("  unique:         {}", report.unique);
    println!("  by url:         {}", report.by_url);
    println!("  by fingerprint: {}", report.by_fingerprint);
    println!("  by title/company: {}", report.by_title_company);
    println!("  by fuzzy title: {}", report.by_fuzzy_title);
    println!("  total dropped:  {}", report.duplicates());

    Ok(())
}
