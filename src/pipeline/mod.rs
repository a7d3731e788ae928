//! Pipeline orchestrator: ties venue scrapers → storage together.
//!
//! Each selected venue is one independent job:
//!   fetch listing page → parse → clean rows into events → dedupe → write.
//! Fetches run under a semaphore (`pipeline.concurrency`, 1 by default);
//! writes happen on the calling task, one venue at a time, so the DuckDB
//! connection never leaves it. Events go to DuckDB or MongoDB; the run log
//! always stays in DuckDB.
//!
//! A venue whose page is gone, forbidden or unreachable logs zero events
//! for the run instead of failing the batch.

use crate::config::{AppConfig, StorageBackend};
use crate::models::Event;
use crate::scraper::http_client::{FetchError, HttpClient};
use crate::scraper::{EventSource, VenueScraper};
use crate::storage::mongo::MongoStore;
use crate::storage::{EventSink, Repository, RunStatus, SaveOutcome};
use crate::venues::{Catalogue, City};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Which venues a run covers. Empty means every enabled venue.
#[derive(Debug, Clone, Default)]
pub struct ScrapeFilter {
    pub city: Option<City>,
    pub venue: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct PipelineStats {
    pub venues: usize,
    pub events_found: usize,
    pub duplicates_in_run: usize,
    pub saved: SaveOutcome,
    pub soft_failures: usize,
    pub errors: usize,
}

impl PipelineStats {
    /// Every selected venue failed outright.
    pub fn all_failed(&self) -> bool {
        self.venues > 0 && self.errors == self.venues
    }
}

/// Where a run's events end up.
pub enum Destination<'a> {
    /// JSON lines on a writer; nothing is stored or logged.
    DryRun(&'a mut dyn Write),
    Store {
        events: &'a dyn EventSink,
        runs: &'a Repository,
    },
}

pub struct Pipeline {
    config: AppConfig,
    catalogue: Catalogue,
    dry_run: bool,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        let catalogue = Catalogue::with_overrides(&config.venues);
        Self {
            config,
            catalogue,
            dry_run: false,
        }
    }

    /// Print events as JSON lines instead of writing them.
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    pub async fn run(&self, filter: &ScrapeFilter) -> Result<PipelineStats> {
        let profiles = self.catalogue.select(filter.city, filter.venue.as_deref())?;
        if profiles.is_empty() {
            warn!("No enabled venues match {:?}", filter);
            return Ok(PipelineStats::default());
        }

        let client = Arc::new(
            HttpClient::new(&self.config.scraper).context("Failed to build HTTP client")?,
        );

        let detail_pages = if self.config.scraper.detail_pages {
            self.config.scraper.detail_page_limit
        } else {
            0
        };
        let sources: Vec<Arc<dyn EventSource>> = profiles
            .into_iter()
            .map(|profile| {
                let scraper = VenueScraper::new(
                    Arc::clone(&client),
                    profile,
                    self.config.pipeline.year_policy,
                    self.config.pipeline.description_max_chars,
                )
                .with_detail_pages(detail_pages);
                Arc::new(scraper) as Arc<dyn EventSource>
            })
            .collect();

        if self.dry_run {
            let mut out = std::io::stdout().lock();
            return self.run_sources(sources, Destination::DryRun(&mut out)).await;
        }

        let storage = &self.config.storage;
        let runs = Repository::open(&storage.db_path).context("Failed to open DuckDB")?;
        if storage.run_migrations {
            runs.run_migrations()?;
        }

        match storage.selected_backend() {
            StorageBackend::DuckDb => {
                self.run_sources(sources, Destination::Store { events: &runs, runs: &runs })
                    .await
            }
            StorageBackend::MongoDb => {
                let mongo = MongoStore::connect(storage).await?;
                self.run_sources(sources, Destination::Store { events: &mongo, runs: &runs })
                    .await
            }
        }
    }

    /// Drive already-built sources into `dest`.
    pub async fn run_sources(
        &self,
        sources: Vec<Arc<dyn EventSource>>,
        mut dest: Destination<'_>,
    ) -> Result<PipelineStats> {
        info!("=== Scraping {} venues ===", sources.len());
        let repo = match &dest {
            Destination::Store { events, runs } => {
                info!("Writing events to {}", events.name());
                Some(*runs)
            }
            Destination::DryRun(_) => None,
        };

        let sem = Arc::new(Semaphore::new(self.config.pipeline.concurrency.max(1)));
        let mut handles = Vec::new();

        for source in sources {
            let id = source.id().to_string();
            let run_id = match repo {
                Some(repo) => Some(repo.begin_scrape_run(&id)?),
                None => None,
            };
            let sem = Arc::clone(&sem);

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await?;
                source.fetch_events().await
            });
            handles.push((id, run_id, handle));
        }

        let mut stats = PipelineStats {
            venues: handles.len(),
            ..Default::default()
        };
        let mut seen = HashSet::new();

        for (id, run_id, handle) in handles {
            let fetched = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Task panic for {}: {}", id, e);
                    Err(anyhow::anyhow!("task failed: {e}"))
                }
            };

            let (status, found, outcome, error_msg) = match fetched {
                Ok(events) => {
                    let found = events.len();
                    let (events, dupes) = dedupe_in_run(events, &mut seen);
                    stats.duplicates_in_run += dupes;

                    let outcome = self
                        .write(&events, &mut dest)
                        .await
                        .with_context(|| format!("Failed to save events for {}", id))?;

                    let status = if found == 0 { RunStatus::Empty } else { RunStatus::Success };
                    info!(
                        "{}: {} found | {} new | {} updated | {} skipped | {} repeated in run",
                        id, found, outcome.inserted, outcome.updated, outcome.skipped, dupes
                    );
                    (status, found, outcome, None)
                }
                Err(e) if is_soft_failure(&e) => {
                    warn!("{}: {:#} (recorded as no events)", id, e);
                    stats.soft_failures += 1;
                    (RunStatus::Empty, 0, SaveOutcome::default(), Some(format!("{e:#}")))
                }
                Err(e) => {
                    warn!("{}: {:#}", id, e);
                    stats.errors += 1;
                    (RunStatus::Error, 0, SaveOutcome::default(), Some(format!("{e:#}")))
                }
            };

            stats.events_found += found;
            stats.saved.absorb(outcome);

            if let (Some(repo), Some(run_id)) = (repo, run_id) {
                repo.finish_scrape_run(run_id, status, found, outcome, error_msg.as_deref())
                    .ok();
            }
        }

        if let Some(repo) = repo {
            self.report_health(repo);
        }

        info!(
            "=== Done: {} venues | {} events | {} new | {} updated | {} skipped | {} soft failures | {} errors ===",
            stats.venues, stats.events_found, stats.saved.inserted, stats.saved.updated,
            stats.saved.skipped, stats.soft_failures, stats.errors,
        );
        Ok(stats)
    }

    async fn write(&self, events: &[Event], dest: &mut Destination<'_>) -> Result<SaveOutcome> {
        match dest {
            Destination::Store { events: sink, .. } => {
                sink.store(events, self.config.storage.on_duplicate).await
            }
            Destination::DryRun(out) => {
                write_json_lines(events, out)?;
                Ok(SaveOutcome::default())
            }
        }
    }

    fn report_health(&self, repo: &Repository) {
        let threshold = self.config.monitoring.alert_threshold;
        match repo.venue_health(threshold) {
            Ok(report) => {
                for venue in report.iter().filter(|v| !v.healthy) {
                    warn!(
                        "{}: {} consecutive runs without events (last: {}{})",
                        venue.venue_id,
                        venue.consecutive_failures,
                        venue.last_status,
                        venue.last_error.as_deref().map(|e| format!(", {e}")).unwrap_or_default(),
                    );
                }
            }
            Err(e) => warn!("Health check failed: {:#}", e),
        }
    }
}

fn write_json_lines<W: Write + ?Sized>(events: &[Event], out: &mut W) -> Result<()> {
    for event in events {
        serde_json::to_writer(&mut *out, event)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Drop events whose natural key was already produced earlier in this run.
pub fn dedupe_in_run(events: Vec<Event>, seen: &mut HashSet<String>) -> (Vec<Event>, usize) {
    let before = events.len();
    let kept: Vec<Event> = events
        .into_iter()
        .filter(|e| seen.insert(e.natural_key()))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

fn is_soft_failure(err: &anyhow::Error) -> bool {
    err.downcast_ref::<FetchError>().is_some_and(FetchError::is_soft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OnDuplicate;
    use crate::models::Venue;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use reqwest::StatusCode;
    use std::cell::RefCell;

    fn event(title: &str, day: u32) -> Event {
        let at = NaiveDate::from_ymd_opt(2025, 7, day).unwrap().and_hms_opt(20, 0, 0).unwrap();
        Event {
            title: title.into(),
            start_date: Some(at),
            end_date: None,
            venue: Venue {
                name: "Webster Hall".into(),
                address: "125 E 11th St".into(),
                city: "New York".into(),
                province: "NY".into(),
                country: "United States".into(),
                coordinates: None,
            },
            description: title.into(),
            url: "https://www.websterhall.com".into(),
            image_url: None,
            price: None,
            categories: vec!["music".into()],
            source: "webster-hall".into(),
            city: "New York".into(),
            scraped_at: at,
        }
    }

    enum Canned {
        Events(Vec<Event>),
        Status(u16),
        Broken,
    }

    struct FakeSource {
        id: String,
        canned: Canned,
    }

    #[async_trait]
    impl EventSource for FakeSource {
        fn id(&self) -> &str {
            &self.id
        }

        async fn fetch_events(&self) -> Result<Vec<Event>> {
            match &self.canned {
                Canned::Events(events) => Ok(events.clone()),
                Canned::Status(code) => Err(FetchError::Status {
                    url: format!("https://example.org/{}", self.id),
                    status: StatusCode::from_u16(*code).unwrap(),
                })
                .context("Failed to fetch listing page"),
                Canned::Broken => Err(anyhow::anyhow!("selector exploded")),
            }
        }
    }

    fn source(id: &str, canned: Canned) -> Arc<dyn EventSource> {
        Arc::new(FakeSource { id: id.into(), canned })
    }

    #[test]
    fn test_dedupe_in_run() {
        let mut seen = HashSet::new();
        let (kept, dropped) = dedupe_in_run(
            vec![event("Jazz Night", 20), event("jazz  night", 20), event("Jazz Night", 21)],
            &mut seen,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 1);

        let (kept, dropped) = dedupe_in_run(vec![event("Jazz Night", 21)], &mut seen);
        assert!(kept.is_empty());
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_run_sources_classifies_failures() {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();

        let mut config = AppConfig::default();
        config.pipeline.concurrency = 2;
        config.storage.on_duplicate = OnDuplicate::Skip;
        let pipeline = Pipeline::new(config);

        let sources = vec![
            source("webster-hall", Canned::Events(vec![event("Jazz Night", 20), event("Poetry Slam", 21)])),
            source("bowery-ballroom", Canned::Events(vec![event("Jazz Night", 20)])),
            source("gone-venue", Canned::Status(404)),
            source("broken-venue", Canned::Broken),
        ];

        let dest = Destination::Store { events: &repo, runs: &repo };
        let stats = tokio_test::block_on(pipeline.run_sources(sources, dest)).unwrap();
        assert_eq!(stats.venues, 4);
        assert_eq!(stats.events_found, 3);
        assert_eq!(stats.duplicates_in_run, 1);
        assert_eq!(stats.saved.inserted, 2);
        assert_eq!(stats.soft_failures, 1);
        assert_eq!(stats.errors, 1);
        assert!(!stats.all_failed());
        assert_eq!(repo.event_count().unwrap(), 2);

        let health = repo.venue_health(1).unwrap();
        let gone = health.iter().find(|h| h.venue_id == "gone-venue").unwrap();
        assert_eq!(gone.last_status, "empty");
        assert!(!gone.healthy);
    }

    #[test]
    fn test_dry_run_prints_json_lines_and_stores_nothing() {
        let pipeline = Pipeline::new(AppConfig::default()).dry_run(true);
        let sources = vec![
            source("webster-hall", Canned::Events(vec![event("Jazz Night", 20), event("Poetry Slam", 21)])),
            source("bowery-ballroom", Canned::Events(vec![event("Jazz Night", 20)])),
        ];

        let mut out = Vec::new();
        let stats = tokio_test::block_on(pipeline.run_sources(sources, Destination::DryRun(&mut out)))
            .unwrap();
        assert_eq!(stats.events_found, 3);
        assert_eq!(stats.duplicates_in_run, 1);
        assert_eq!(stats.saved, SaveOutcome::default());

        let printed: Vec<Event> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(printed.len(), 2);
        assert_eq!(printed[0].title, "Jazz Night");
        assert_eq!(printed[1].title, "Poetry Slam");
    }

    /// Sink that remembers what it was handed.
    #[derive(Default)]
    struct RecordingSink {
        keys: RefCell<Vec<String>>,
    }

    #[async_trait(?Send)]
    impl EventSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn store(&self, events: &[Event], _mode: OnDuplicate) -> Result<SaveOutcome> {
            self.keys.borrow_mut().extend(events.iter().map(Event::natural_key));
            Ok(SaveOutcome { inserted: events.len(), ..Default::default() })
        }
    }

    #[test]
    fn test_events_go_to_sink_and_runs_to_duckdb() {
        let runs = Repository::open_in_memory().unwrap();
        runs.run_migrations().unwrap();
        let sink = RecordingSink::default();
        let pipeline = Pipeline::new(AppConfig::default());

        let sources = vec![source("webster-hall", Canned::Events(vec![event("Jazz Night", 20)]))];
        let dest = Destination::Store { events: &sink, runs: &runs };
        let stats = tokio_test::block_on(pipeline.run_sources(sources, dest)).unwrap();

        assert_eq!(stats.saved.inserted, 1);
        assert_eq!(*sink.keys.borrow(), vec!["jazz night|2025-07-20T20:00".to_string()]);
        assert_eq!(runs.event_count().unwrap(), 0);
        let health = runs.venue_health(3).unwrap();
        assert_eq!(health[0].venue_id, "webster-hall");
        assert_eq!(health[0].last_status, "success");
    }

    #[test]
    fn test_soft_failure_detection_through_context() {
        let soft: anyhow::Error = anyhow::Error::new(FetchError::Status {
            url: "https://example.org".into(),
            status: StatusCode::GONE,
        })
        .context("Failed to fetch listing page for x");
        assert!(is_soft_failure(&soft));
        assert!(!is_soft_failure(&anyhow::anyhow!("parse failure")));
    }
}
