use serde::Deserialize;

use crate::error::IngestError;

/// Strongly typed configuration (C14). Load order is built-in defaults
/// (`config/default.toml`, embedded as a fallback) then the file on disk
/// then environment overrides (§6); validation rejects out-of-range values
/// and the loader never partially applies a change — overrides are applied
/// to a scratch copy and only swapped in once every check has passed.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub scraping: ScrapingConfig,
    pub cache: CacheConfig,
    pub performance: PerformanceConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
    pub browser: BrowserConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapingConfig {
    pub seed_urls: Vec<String>,
    pub max_concurrent: usize,
    pub max_pages: u32,
    pub rate_per_second: f64,
    pub burst: u32,
    pub incremental: bool,
    pub dedup: bool,
    pub compression_level: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub dir: String,
    pub max_age_hours: u64,
    pub auto_cleanup: bool,
    pub max_size_mb: u64,
    pub rebuild_on_startup: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceConfig {
    pub navigation_timeout_seconds: u64,
    pub element_wait_seconds: u64,
    pub retry_strategy: String,
    pub pool_min: usize,
    pub pool_max: usize,
    pub pool_max_age_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub dir: String,
    pub formats: Vec<String>,
    pub max_files_per_type: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: String,
    pub rotation_max_bytes: u64,
    pub rotation_max_files: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: Option<String>,
    pub launch_args: Vec<String>,
}

impl Settings {
    /// Load settings: embedded defaults -> file on disk -> environment
    /// overrides. The loader validates on a scratch copy before returning so
    /// an invalid override never leaves a half-applied `Settings` behind.
    pub fn load(path: &str) -> Result<Self, IngestError> {
        let raw = std::fs::read_to_string(path).unwrap_or_else(|_| {
            tracing::warn!(path, "config file not found, using embedded defaults");
            include_str!("../config/default.toml").to_string()
        });

        let mut settings: Settings = toml::from_str(&raw)
            .map_err(|e| IngestError::ConfigInvalid(format!("{path}: {e}")))?;

        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("JOBHARVEST_CACHE_DIR") {
            self.cache.dir = v;
        }
        if let Ok(v) = std::env::var("JOBHARVEST_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("JOBHARVEST_RATE") {
            if let Ok(n) = v.parse() {
                self.scraping.rate_per_second = n;
            } else {
                tracing::debug!(value = %v, "ignoring unparseable JOBHARVEST_RATE");
            }
        }
        if let Ok(v) = std::env::var("JOBHARVEST_BURST") {
            if let Ok(n) = v.parse() {
                self.scraping.burst = n;
            } else {
                tracing::debug!(value = %v, "ignoring unparseable JOBHARVEST_BURST");
            }
        }
        if let Ok(v) = std::env::var("JOBHARVEST_MAX_PAGES") {
            if let Ok(n) = v.parse() {
                self.scraping.max_pages = n;
            } else {
                tracing::debug!(value = %v, "ignoring unparseable JOBHARVEST_MAX_PAGES");
            }
        }
        if let Ok(v) = std::env::var("JOBHARVEST_MAX_CONCURRENT") {
            if let Ok(n) = v.parse() {
                self.scraping.max_concurrent = n;
            } else {
                tracing::debug!(value = %v, "ignoring unparseable JOBHARVEST_MAX_CONCURRENT");
            }
        }
        if let Ok(v) = std::env::var("JOBHARVEST_COMPRESSION_LEVEL") {
            if let Ok(n) = v.parse() {
                self.scraping.compression_level = n;
            } else {
                tracing::debug!(value = %v, "ignoring unparseable JOBHARVEST_COMPRESSION_LEVEL");
            }
        }
    }

    fn validate(&self) -> Result<(), IngestError> {
        if self.scraping.rate_per_second <= 0.0 {
            return Err(IngestError::ConfigInvalid(
                "scraping.rate_per_second must be > 0".into(),
            ));
        }
        if self.scraping.max_concurrent == 0 {
            return Err(IngestError::ConfigInvalid(
                "scraping.max_concurrent must be > 0".into(),
            ));
        }
        if !(1..=9).contains(&self.scraping.compression_level) {
            return Err(IngestError::ConfigInvalid(
                "scraping.compression_level must be in 1..=9".into(),
            ));
        }
        if self.performance.pool_min > self.performance.pool_max {
            return Err(IngestError::ConfigInvalid(
                "performance.pool_min must be <= performance.pool_max".into(),
            ));
        }
        if self.output.formats.iter().any(|f| {
            !matches!(f.as_str(), "json" | "csv" | "text")
        }) {
            return Err(IngestError::ConfigInvalid(format!(
                "output.formats contains an unsupported format: {:?}",
                self.output.formats
            )));
        }
        Ok(())
    }
}
