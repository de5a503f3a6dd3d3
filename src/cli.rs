use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "jobharvest", about = "Fault-tolerant job listing ingestion pipeline")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one ingestion pass over the configured seed URLs
    Crawl,
    /// Search the cache index by company, technology, location, or level
    Search {
        #[arg(long, value_delimiter = ',')]
        company: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        technology: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        location: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        level: Vec<String>,

        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show cache, index, and checkpoint status
    Status,
    /// Deduplicate a standalone JSON job file in place
    DedupeFile {
        path: PathBuf,

        #[arg(long, default_value = "0.85")]
        similarity_threshold: f64,
    },
    /// Prune expired cache blobs and rebuild the index
    PruneCache {
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
}
