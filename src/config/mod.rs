use crate::dates::YearPolicy;
use crate::venues::VenueProfile;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Extra venues, or replacements for built-in ones with the same id.
    #[serde(default)]
    pub venues: Vec<VenueProfile>,
}

/// HTTP fetch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_accept")]
    pub accept: String,

    #[serde(default = "default_accept_language")]
    pub accept_language: String,

    /// Fetch each event's own page when the listing had no description.
    #[serde(default)]
    pub detail_pages: bool,

    /// Most detail pages fetched per venue run.
    #[serde(default = "default_detail_page_limit")]
    pub detail_page_limit: usize,
}

/// Which duplicate policy applies when an event's natural key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDuplicate {
    #[default]
    Skip,
    Overwrite,
}

/// Where scraped events are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    DuckDb,
    MongoDb,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Unset means MongoDB when a connection string is known, else DuckDB.
    #[serde(default)]
    pub backend: Option<StorageBackend>,

    /// DuckDB file. Always used for the scrape-run log.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,

    #[serde(default)]
    pub on_duplicate: OnDuplicate,

    /// Falls back to the `MONGODB_URI` environment variable.
    #[serde(default)]
    pub mongodb_uri: Option<String>,

    /// Used when the connection string names no database.
    #[serde(default = "default_mongodb_database")]
    pub mongodb_database: String,
}

impl StorageConfig {
    pub fn selected_backend(&self) -> StorageBackend {
        match (self.backend, &self.mongodb_uri) {
            (Some(backend), _) => backend,
            (None, Some(_)) => StorageBackend::MongoDb,
            (None, None) => StorageBackend::DuckDb,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub year_policy: YearPolicy,

    #[serde(default = "default_description_max_chars")]
    pub description_max_chars: usize,
}

/// Scraper health reporting
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Consecutive failed or empty runs before a venue is reported unhealthy.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: usize,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_timeout_secs() -> u64 {
    20
}
fn default_request_delay_ms() -> u64 {
    750
}
fn default_jitter_ms() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    2
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}
fn default_accept() -> String {
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string()
}
fn default_accept_language() -> String {
    "en-US,en;q=0.9".to_string()
}
fn default_detail_page_limit() -> usize {
    10
}
fn default_mongodb_database() -> String {
    "events".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/events.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    1
}
fn default_description_max_chars() -> usize {
    500
}
fn default_alert_threshold() -> usize {
    3
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
            accept: default_accept(),
            accept_language: default_accept_language(),
            detail_pages: false,
            detail_page_limit: default_detail_page_limit(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: None,
            db_path: default_db_path(),
            run_migrations: true,
            on_duplicate: OnDuplicate::Skip,
            mongodb_uri: None,
            mongodb_database: default_mongodb_database(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            year_policy: YearPolicy::default(),
            description_max_chars: default_description_max_chars(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self { alert_threshold: default_alert_threshold() }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("EVENTS").separator("__"))
            .build()
            .context("Failed to read configuration")?;

        let mut cfg: AppConfig = cfg.try_deserialize().context("Invalid configuration")?;
        if cfg.storage.mongodb_uri.is_none() {
            cfg.storage.mongodb_uri = std::env::var("MONGODB_URI").ok().filter(|s| !s.is_empty());
        }
        Ok(cfg)
    }
}
