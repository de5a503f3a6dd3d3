use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scraper::Html;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;
use url::Url;

use jobharvest_core::canonical::canonicalize;
use jobharvest_core::fingerprint::cache_key;
use jobharvest_core::metrics::health_score;
use jobharvest_core::{
    CacheBlob, CoreContext, DedupReport, ErrorSummary, HostOutcome, Job, JobStatus, RunReport,
    Settings,
};
use jobharvest_discovery::{PaginationDetector, PaginationStyle};
use jobharvest_frontier::{Deduplicator, IncrementalProcessor};
use jobharvest_networks::{FetchError, Fetcher, PagePool, Strategy};
use jobharvest_output::{OutputFormat, OutputWriter};
use jobharvest_parser::{validate_batch, JobExtractor, ValidatorConfig};
use jobharvest_storage::{CacheIndex, CompressedCache};

const CIRCUIT_PROBE_COUNT: usize = 3;
const PAGE_MAX_USES: u64 = 500;
const MAX_ERROR_SAMPLES: usize = 20;

/// Ties the pipeline's collaborators together for one end-to-end run (§4.12):
/// fetch -> paginate -> extract -> validate -> checkpoint -> cache/index ->
/// dedupe -> write output, with one concurrent task per seed host.
pub struct Orchestrator;

impl Orchestrator {
    pub async fn run(settings: &Settings, ctx: &CoreContext) -> anyhow::Result<RunReport> {
        let started_at = Utc::now();

        let fetcher = Arc::new(Fetcher::new(
            settings.scraping.rate_per_second,
            settings.scraping.burst,
            CIRCUIT_PROBE_COUNT,
            Strategy::from_id(&settings.performance.retry_strategy),
            settings.browser.user_agent.clone(),
            Duration::from_secs(settings.performance.navigation_timeout_seconds),
        )?);

        let pool = Arc::new(PagePool::new(
            settings.performance.pool_min,
            settings.performance.pool_max,
            Duration::from_secs(settings.performance.pool_max_age_seconds),
            PAGE_MAX_USES,
        ));

        let cache = CompressedCache::new(
            &settings.cache.dir,
            settings.scraping.compression_level,
            settings.cache.max_age_hours,
        )?;
        let mut index = CacheIndex::open(cache, Path::new(&settings.cache.dir).join("index"))?;
        if settings.cache.rebuild_on_startup {
            index.rebuild()?;
        }
        let index = Arc::new(index);

        let checkpoint = Arc::new(IncrementalProcessor::open(
            Path::new(&settings.cache.dir).join("checkpoint.json"),
        ));
        let extractor = Arc::new(JobExtractor::new());
        let pagination = Arc::new(PaginationDetector::new());
        let validator_config = Arc::new(ValidatorConfig::default());

        let semaphore = Arc::new(Semaphore::new(settings.scraping.max_concurrent.max(1)));
        let mut join_set: JoinSet<SeedOutcome> = JoinSet::new();

        for seed in settings.scraping.seed_urls.clone() {
            let fetcher = fetcher.clone();
            let pool = pool.clone();
            let index = index.clone();
            let checkpoint = checkpoint.clone();
            let extractor = extractor.clone();
            let pagination = pagination.clone();
            let validator_config = validator_config.clone();
            let semaphore = semaphore.clone();
            let max_pages = settings.scraping.max_pages;
            let incremental = settings.scraping.incremental;

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                crawl_seed(
                    seed,
                    fetcher,
                    pool,
                    index,
                    checkpoint,
                    extractor,
                    pagination,
                    validator_config,
                    max_pages,
                    incremental,
                )
                .await
            });
        }

        let mut all_jobs: Vec<Job> = Vec::new();
        let mut hosts: Vec<HostOutcome> = Vec::new();
        let mut errors = ErrorSummary::default();
        let mut quality_scores: Vec<f64> = Vec::new();
        let mut pages_fetched_total = 0u64;
        let mut cache_blobs_written = 0u64;
        let mut pages_ok_total = 0u64;
        let mut pages_failed_total = 0u64;

        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(outcome) => {
                    pages_fetched_total += outcome.host.pages_fetched;
                    cache_blobs_written += outcome.cache_blobs_written;
                    pages_ok_total += outcome.pages_ok;
                    pages_failed_total += outcome.pages_failed;
                    quality_scores.extend(outcome.quality_scores);
                    for (kind, count) in outcome.error_counts {
                        *errors.counts.entry(kind).or_insert(0) += count;
                    }
                    errors.samples.extend(outcome.error_samples);
                    all_jobs.extend(outcome.jobs);
                    hosts.push(outcome.host);
                }
                Err(join_err) => {
                    warn!(error = %join_err, "seed task did not complete");
                    *errors.counts.entry("task_panicked".to_string()).or_insert(0) += 1;
                }
            }
        }

        let (unique_jobs, dedup_report) = if settings.scraping.dedup {
            Deduplicator::default_threshold().dedupe(all_jobs)
        } else {
            let total = all_jobs.len();
            (
                all_jobs,
                DedupReport {
                    total,
                    unique: total,
                    ..Default::default()
                },
            )
        };

        let output_formats: Vec<OutputFormat> = settings
            .output
            .formats
            .iter()
            .filter_map(|f| OutputFormat::parse(f))
            .collect();
        let writer = OutputWriter::new(&settings.output.dir)?;
        let output_paths = writer.write_all(&unique_jobs, &output_formats, Utc::now())?;

        checkpoint.flush()?;
        pool.close().await;

        let success_ratio = if pages_ok_total + pages_failed_total == 0 {
            1.0
        } else {
            pages_ok_total as f64 / (pages_ok_total + pages_failed_total) as f64
        };
        let mean_quality = if quality_scores.is_empty() {
            1.0
        } else {
            quality_scores.iter().sum::<f64>() / quality_scores.len() as f64
        };
        let open_circuits = fetcher.open_circuit_count().await;
        let score = health_score(success_ratio, mean_quality, open_circuits);

        ctx.metrics.set_gauge("health_score", score as i64);
        ctx.metrics.incr("jobs.ingested", unique_jobs.len() as i64);
        ctx.metrics.incr("pages.fetched", pages_fetched_total as i64);

        Ok(RunReport {
            trace_id: ctx.trace_id.clone(),
            started_at: Some(started_at),
            ended_at: Some(Utc::now()),
            jobs_ingested: unique_jobs.len() as u64,
            jobs_deduped: dedup_report.duplicates() as u64,
            pages_fetched: pages_fetched_total,
            cache_blobs_written,
            health_score: score,
            hosts,
            errors,
            output_paths: output_paths
                .into_iter()
                .map(|p| p.display().to_string())
                .collect(),
        })
    }
}

struct SeedOutcome {
    host: HostOutcome,
    jobs: Vec<Job>,
    quality_scores: Vec<f64>,
    pages_ok: u64,
    pages_failed: u64,
    cache_blobs_written: u64,
    error_counts: HashMap<String, u64>,
    error_samples: Vec<String>,
}

impl SeedOutcome {
    fn unreachable(seed: String) -> Self {
        Self {
            host: HostOutcome {
                host: seed,
                pages_fetched: 0,
                jobs_ingested: 0,
                circuit_tripped: false,
            },
            jobs: Vec::new(),
            quality_scores: Vec::new(),
            pages_ok: 0,
            pages_failed: 0,
            cache_blobs_written: 0,
            error_counts: HashMap::new(),
            error_samples: Vec::new(),
        }
    }
}

/// Crawls one seed until `max_pages`, an early-stop signal, or the absence
/// of a further page is reached (§4.9, §4.12).
#[allow(clippy::too_many_arguments)]
async fn crawl_seed(
    seed: String,
    fetcher: Arc<Fetcher>,
    pool: Arc<PagePool>,
    index: Arc<CacheIndex>,
    checkpoint: Arc<IncrementalProcessor>,
    extractor: Arc<JobExtractor>,
    pagination: Arc<PaginationDetector>,
    validator_config: Arc<ValidatorConfig>,
    max_pages: u32,
    incremental: bool,
) -> SeedOutcome {
    let Ok(mut current_url) = Url::parse(&seed) else {
        warn!(seed, "skipping unparseable seed url");
        return SeedOutcome::unreachable(seed);
    };
    let host = current_url.host_str().unwrap_or(&seed).to_string();

    let mut jobs_acc: Vec<Job> = Vec::new();
    let mut quality_scores = Vec::new();
    let mut error_counts: HashMap<String, u64> = HashMap::new();
    let mut error_samples = Vec::new();
    let mut pages_ok = 0u64;
    let mut pages_failed = 0u64;
    let mut cache_blobs_written = 0u64;
    let mut host_pages = 0u64;
    let mut host_jobs = 0u64;
    let mut page_num: u32 = 1;

    loop {
        if page_num > max_pages {
            break;
        }

        let mut lease = pool.acquire().await;
        let page = match fetcher.fetch(current_url.as_str()).await {
            Ok(page) => {
                lease.mark_success();
                pages_ok += 1;
                page
            }
            Err(e) => {
                lease.mark_error();
                pages_failed += 1;
                *error_counts.entry(error_kind(&e)).or_insert(0) += 1;
                if error_samples.len() < MAX_ERROR_SAMPLES {
                    error_samples.push(format!("{current_url}: {e}"));
                }
                warn!(url = %current_url, error = %e, "fetch failed");
                break;
            }
        };
        drop(lease);

        host_pages += 1;

        let document = Html::parse_document(&page.body);
        let raw_fields = extractor.extract_page(&page.body, &current_url);
        let raw_count = raw_fields.len() as u64;
        let outcome = validate_batch(raw_fields, &validator_config, Utc::now());
        quality_scores.push(outcome.quality_score);

        let mut page_new = 0u64;
        for job in &outcome.jobs {
            let status = checkpoint.classify(job);
            checkpoint.record(job, status);
            if status != JobStatus::Known {
                page_new += 1;
            }
        }
        host_jobs += outcome.jobs.len() as u64;

        let canonical = canonicalize(current_url.as_str()).unwrap_or_else(|| current_url.to_string());
        let key = cache_key(&canonical, page_num);
        let blob = CacheBlob {
            url: canonical,
            page: page_num,
            captured_at: Utc::now(),
            jobs: outcome.jobs.clone(),
        };
        if index.put(&key, &blob).is_ok() {
            cache_blobs_written += 1;
        }
        jobs_acc.extend(outcome.jobs);

        let forced = !incremental;
        if !checkpoint.should_continue(page_new, raw_count, forced) {
            break;
        }

        let next_url = match pagination.detect(&document) {
            PaginationStyle::NextLink(href) => current_url.join(&href).ok(),
            PaginationStyle::Numeric(_) => Some(with_page_param(&current_url, page_num + 1)),
            PaginationStyle::InfiniteScroll | PaginationStyle::None => None,
        };
        let Some(next_url) = next_url else {
            break;
        };
        current_url = next_url;
        page_num += 1;
    }

    let circuit_tripped = fetcher.host_circuit_open(&host).await;

    SeedOutcome {
        host: HostOutcome {
            host,
            pages_fetched: host_pages,
            jobs_ingested: host_jobs,
            circuit_tripped,
        },
        jobs: jobs_acc,
        quality_scores,
        pages_ok,
        pages_failed,
        cache_blobs_written,
        error_counts,
        error_samples,
    }
}

fn error_kind(err: &FetchError) -> String {
    match err {
        FetchError::Http { .. } => "http".to_string(),
        FetchError::Transport(_) => "transport".to_string(),
        FetchError::CircuitOpen(_) => "circuit_open".to_string(),
        FetchError::Exhausted { .. } => "exhausted".to_string(),
    }
}

/// Rewrites `page` as a `page=N` query parameter, preserving every other
/// parameter, for sites whose pagination is a bare numbered-link list with
/// no machine-readable "next" affordance (§4.12 step 2).
fn with_page_param(url: &Url, page: u32) -> Url {
    let mut next = url.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "page")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = next.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair("page", &page.to_string());
    }
    next
}
