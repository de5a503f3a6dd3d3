mod cli;
mod commands;
mod orchestrator;

use anyhow::Result;
use clap::Parser;
use uuid::Uuid;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use jobharvest_core::{CoreContext, Settings};

use crate::cli::{Cli, Commands};
use crate::orchestrator::Orchestrator;

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;

    let _logging_guards = jobharvest_core::logging::init(
        &settings.logging.dir,
        &settings.logging.level,
        settings.logging.rotation_max_bytes,
        settings.logging.rotation_max_files,
    )?;

    let ctx = CoreContext::new(Uuid::new_v4().to_string());

    match cli.command {
        Commands::Crawl => {
            let report = Orchestrator::run(&settings, &ctx).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Search {
            company,
            technology,
            location,
            level,
            limit,
        } => {
            commands::search::run(&settings, company, technology, location, level, limit)?;
        }
        Commands::Status => {
            commands::status::run(&settings)?;
        }
        Commands::DedupeFile {
            path,
            similarity_threshold,
        } => {
            commands::dedupe_file::run(&path, similarity_threshold)?;
        }
        Commands::PruneCache { max_age_hours } => {
            commands::prune::run(&settings, max_age_hours)?;
        }
    }

    Ok(())
}
