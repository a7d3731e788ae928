pub mod mongo;

use crate::config::OnDuplicate;
use crate::models::{Coordinates, Event, Venue};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use duckdb::{params, Connection, ToSql};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Runs looked at when counting a venue's failure streak.
const HEALTH_HISTORY: usize = 10;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    natural_key     VARCHAR PRIMARY KEY,
    title           VARCHAR NOT NULL,
    start_date      TIMESTAMP,
    end_date        TIMESTAMP,
    venue_name      VARCHAR NOT NULL,
    venue_address   VARCHAR NOT NULL DEFAULT '',
    venue_city      VARCHAR NOT NULL DEFAULT '',
    venue_province  VARCHAR NOT NULL DEFAULT '',
    venue_country   VARCHAR NOT NULL DEFAULT '',
    latitude        DOUBLE,
    longitude       DOUBLE,
    description     VARCHAR NOT NULL DEFAULT '',
    url             VARCHAR NOT NULL,
    image_url       VARCHAR,
    price           VARCHAR,
    -- JSON array of tags, primary category first
    categories      VARCHAR NOT NULL DEFAULT '[]',
    source          VARCHAR NOT NULL,
    city            VARCHAR NOT NULL,
    scraped_at      TIMESTAMP NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS scrape_run_ids START 1;

CREATE TABLE IF NOT EXISTS scrape_runs (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('scrape_run_ids'),
    venue_id            VARCHAR NOT NULL,
    started_at          TIMESTAMP NOT NULL,
    finished_at         TIMESTAMP,
    status              VARCHAR NOT NULL DEFAULT 'running',
    events_found        INTEGER DEFAULT 0,
    events_inserted     INTEGER DEFAULT 0,
    events_updated      INTEGER DEFAULT 0,
    error_msg           VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const EVENT_COLUMNS: &str = "title, start_date, end_date, venue_name, venue_address, venue_city, \
     venue_province, venue_country, latitude, longitude, description, url, image_url, price, \
     categories, source, city, scraped_at";

// ── Result types ──────────────────────────────────────────────────────────────

/// What a batch write did with each event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub inserted: usize,
    pub skipped: usize,
    pub updated: usize,
}

impl SaveOutcome {
    pub fn absorb(&mut self, other: SaveOutcome) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
        self.updated += other.updated;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Empty,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Empty => "empty",
            RunStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VenueHealth {
    pub venue_id: String,
    pub consecutive_failures: usize,
    pub last_status: String,
    pub last_run: Option<NaiveDateTime>,
    pub last_error: Option<String>,
    pub healthy: bool,
}

// ── Sink trait ────────────────────────────────────────────────────────────────

/// Anything a scrape run can write its events into.
#[async_trait(?Send)]
pub trait EventSink {
    fn name(&self) -> &'static str;

    /// Insert new natural keys; existing ones are skipped or replaced per `mode`.
    async fn store(&self, events: &[Event], mode: OnDuplicate) -> Result<SaveOutcome>;
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Local::now().naive_local()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Events ────────────────────────────────────────────────────────────────

    /// Write events keyed by `(title, start date)`. An existing key is left
    /// alone under [`OnDuplicate::Skip`] and replaced under
    /// [`OnDuplicate::Overwrite`].
    pub fn save_events(&self, events: &[Event], mode: OnDuplicate) -> Result<SaveOutcome> {
        let mut outcome = SaveOutcome::default();
        if events.is_empty() {
            return Ok(outcome);
        }

        let tx = self.conn.unchecked_transaction()?;
        for event in events {
            let key = event.natural_key();
            let exists: i64 = tx.query_row(
                "SELECT COUNT(*) FROM events WHERE natural_key = ?",
                params![key],
                |r| r.get(0),
            )?;

            let categories = serde_json::to_string(&event.categories)?;
            let (lat, lng) = event
                .venue
                .coordinates
                .map(|c| (Some(c.latitude), Some(c.longitude)))
                .unwrap_or((None, None));

            match (exists > 0, mode) {
                (true, OnDuplicate::Skip) => {
                    debug!("skip duplicate {}", key);
                    outcome.skipped += 1;
                }
                (true, OnDuplicate::Overwrite) => {
                    tx.execute(
                        r#"UPDATE events SET
                               title = ?, start_date = ?, end_date = ?,
                               venue_name = ?, venue_address = ?, venue_city = ?,
                               venue_province = ?, venue_country = ?, latitude = ?, longitude = ?,
                               description = ?, url = ?, image_url = ?, price = ?,
                               categories = ?, source = ?, city = ?, scraped_at = ?
                           WHERE natural_key = ?"#,
                        params![
                            event.title, event.start_date, event.end_date,
                            event.venue.name, event.venue.address, event.venue.city,
                            event.venue.province, event.venue.country, lat, lng,
                            event.description, event.url, event.image_url, event.price,
                            categories, event.source, event.city, event.scraped_at,
                            key,
                        ],
                    )
                    .with_context(|| format!("update event {}", key))?;
                    outcome.updated += 1;
                }
                (false, _) => {
                    tx.execute(
                        &format!("INSERT INTO events (natural_key, {EVENT_COLUMNS}) \
                                  VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
                        params![
                            key,
                            event.title, event.start_date, event.end_date,
                            event.venue.name, event.venue.address, event.venue.city,
                            event.venue.province, event.venue.country, lat, lng,
                            event.description, event.url, event.image_url, event.price,
                            categories, event.source, event.city, event.scraped_at,
                        ],
                    )
                    .with_context(|| format!("insert event {}", key))?;
                    outcome.inserted += 1;
                }
            }
        }
        tx.commit()?;
        Ok(outcome)
    }

    pub fn find_by_natural_key(&self, key: &str) -> Result<Option<Event>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE natural_key = ?"))?;
        let mut rows = stmt.query_map(params![key], event_from_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn event_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM events")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn count_by_city(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT city, COUNT(*) FROM events GROUP BY city ORDER BY city")?;
        let counts = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(counts)
    }

    pub fn date_range(&self) -> Result<(Option<NaiveDateTime>, Option<NaiveDateTime>)> {
        let mut s = self.conn.prepare("SELECT MIN(start_date), MAX(start_date) FROM events")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    /// Dated events starting at or after `from`, soonest first.
    pub fn upcoming(&self, city: Option<&str>, from: NaiveDateTime, limit: usize) -> Result<Vec<Event>> {
        let limit = limit as i64;
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE start_date >= ?");
        let mut args: Vec<&dyn ToSql> = vec![&from];
        if let Some(city) = &city {
            sql.push_str(" AND city = ?");
            args.push(city);
        }
        sql.push_str(" ORDER BY start_date, title LIMIT ?");
        args.push(&limit);

        let mut stmt = self.conn.prepare(&sql)?;
        let events = stmt
            .query_map(&args[..], event_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Every stored event, undated ones last.
    pub fn all_events(&self, city: Option<&str>) -> Result<Vec<Event>> {
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events");
        let mut args: Vec<&dyn ToSql> = Vec::new();
        if let Some(city) = &city {
            sql.push_str(" WHERE city = ?");
            args.push(city);
        }
        sql.push_str(" ORDER BY start_date NULLS LAST, title");

        let mut stmt = self.conn.prepare(&sql)?;
        let events = stmt
            .query_map(&args[..], event_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(events)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self, venue_id: &str) -> Result<i64> {
        let id = self.conn.query_row(
            "INSERT INTO scrape_runs (venue_id, started_at, status) VALUES (?, ?, 'running') RETURNING id",
            params![venue_id, Local::now().naive_local()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(
        &self,
        run_id: i64,
        status: RunStatus,
        found: usize,
        outcome: SaveOutcome,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               events_found = ?, events_inserted = ?, events_updated = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Local::now().naive_local(),
                status.as_str(),
                found as i64, outcome.inserted as i64, outcome.updated as i64,
                error, run_id,
            ],
        )?;
        Ok(())
    }

    /// Failure streak per venue over its most recent finished runs. A venue
    /// is unhealthy once `threshold` runs in a row errored or found nothing.
    pub fn venue_health(&self, threshold: usize) -> Result<Vec<VenueHealth>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT venue_id, status, started_at, error_msg FROM scrape_runs
               WHERE finished_at IS NOT NULL
               ORDER BY venue_id, started_at DESC, id DESC"#,
        )?;
        let runs = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, NaiveDateTime>(2)?,
                    r.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;

        let mut report: Vec<VenueHealth> = Vec::new();
        let mut streak_open = false;
        let mut seen = 0usize;

        for (venue_id, status, started_at, error) in runs {
            let is_new = report.last().is_none_or(|h| h.venue_id != venue_id);
            if is_new {
                report.push(VenueHealth {
                    venue_id,
                    consecutive_failures: 0,
                    last_status: status.clone(),
                    last_run: Some(started_at),
                    last_error: error,
                    healthy: true,
                });
                streak_open = true;
                seen = 0;
            }

            seen += 1;
            if !streak_open || seen > HEALTH_HISTORY {
                continue;
            }
            if status == RunStatus::Success.as_str() {
                streak_open = false;
            } else if let Some(current) = report.last_mut() {
                current.consecutive_failures += 1;
            }
        }

        for health in &mut report {
            health.healthy = health.consecutive_failures < threshold;
        }
        Ok(report)
    }
}

#[async_trait(?Send)]
impl EventSink for Repository {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    async fn store(&self, events: &[Event], mode: OnDuplicate) -> Result<SaveOutcome> {
        self.save_events(events, mode)
    }
}

fn event_from_row(r: &duckdb::Row<'_>) -> duckdb::Result<Event> {
    let latitude: Option<f64> = r.get(8)?;
    let longitude: Option<f64> = r.get(9)?;
    let categories: String = r.get(14)?;

    Ok(Event {
        title: r.get(0)?,
        start_date: r.get(1)?,
        end_date: r.get(2)?,
        venue: Venue {
            name: r.get(3)?,
            address: r.get(4)?,
            city: r.get(5)?,
            province: r.get(6)?,
            country: r.get(7)?,
            coordinates: latitude
                .zip(longitude)
                .map(|(latitude, longitude)| Coordinates { latitude, longitude }),
        },
        description: r.get(10)?,
        url: r.get(11)?,
        image_url: r.get(12)?,
        price: r.get(13)?,
        categories: serde_json::from_str(&categories).unwrap_or_default(),
        source: r.get(15)?,
        city: r.get(16)?,
        scraped_at: r.get(17)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, day).unwrap().and_hms_opt(hour, 0, 0).unwrap()
    }

    fn event(title: &str, start: Option<NaiveDateTime>, city: &str) -> Event {
        Event {
            title: title.to_string(),
            start_date: start,
            end_date: None,
            venue: Venue {
                name: "Fox Cabaret".into(),
                address: "2321 Main St".into(),
                city: city.into(),
                province: "BC".into(),
                country: "Canada".into(),
                coordinates: Some(Coordinates { latitude: 49.26, longitude: -123.1 }),
            },
            description: "Live set".into(),
            url: "https://www.foxcabaret.com/e/1".into(),
            image_url: None,
            price: Some("$20".into()),
            categories: vec!["music".into(), "concert".into()],
            source: "fox-cabaret".into(),
            city: city.into(),
            scraped_at: at(1, 9),
        }
    }

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    #[test]
    fn test_save_skips_existing_natural_key() {
        let repo = repo();
        let first = event("Jazz Night", Some(at(20, 20)), "Vancouver");
        let outcome = repo.save_events(&[first.clone()], OnDuplicate::Skip).unwrap();
        assert_eq!(outcome, SaveOutcome { inserted: 1, skipped: 0, updated: 0 });

        let mut again = first.clone();
        again.title = "  JAZZ   night ".into();
        again.price = Some("$25".into());
        let outcome = repo.save_events(&[again], OnDuplicate::Skip).unwrap();
        assert_eq!(outcome.skipped, 1);
        assert_eq!(repo.event_count().unwrap(), 1);

        let stored = repo.find_by_natural_key(&first.natural_key()).unwrap().unwrap();
        assert_eq!(stored, first);
    }

    #[test]
    fn test_overwrite_replaces_fields() {
        let repo = repo();
        let first = event("Jazz Night", Some(at(20, 20)), "Vancouver");
        repo.save_events(&[first.clone()], OnDuplicate::Skip).unwrap();

        let mut newer = first.clone();
        newer.price = Some("$25".into());
        let outcome = repo.save_events(&[newer], OnDuplicate::Overwrite).unwrap();
        assert_eq!(outcome.updated, 1);

        let stored = repo.find_by_natural_key(&first.natural_key()).unwrap().unwrap();
        assert_eq!(stored.price.as_deref(), Some("$25"));
    }

    #[test]
    fn test_same_title_different_day_is_new() {
        let repo = repo();
        let events = [
            event("Jazz Night", Some(at(20, 20)), "Vancouver"),
            event("Jazz Night", Some(at(27, 20)), "Vancouver"),
            event("Jazz Night", None, "Vancouver"),
        ];
        let outcome = repo.save_events(&events, OnDuplicate::Skip).unwrap();
        assert_eq!(outcome.inserted, 3);
    }

    #[test]
    fn test_queries() {
        let repo = repo();
        repo.save_events(
            &[
                event("Jazz Night", Some(at(20, 20)), "Vancouver"),
                event("Poetry Slam", Some(at(5, 19)), "Toronto"),
                event("Open Mic Night", Some(at(25, 19)), "Toronto"),
                event("Life Drawing", None, "Toronto"),
            ],
            OnDuplicate::Skip,
        )
        .unwrap();

        assert_eq!(
            repo.count_by_city().unwrap(),
            vec![("Toronto".to_string(), 3), ("Vancouver".to_string(), 1)]
        );
        assert_eq!(repo.date_range().unwrap(), (Some(at(5, 19)), Some(at(25, 19))));

        let upcoming = repo.upcoming(Some("Toronto"), at(10, 0), 10).unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].title, "Open Mic Night");
        assert_eq!(repo.upcoming(None, at(1, 0), 2).unwrap().len(), 2);

        let toronto = repo.all_events(Some("Toronto")).unwrap();
        assert_eq!(toronto.len(), 3);
        assert_eq!(toronto.last().unwrap().start_date, None);
    }

    #[test]
    fn test_venue_health_streaks() {
        let repo = repo();
        let log = |venue: &str, status: RunStatus| {
            let id = repo.begin_scrape_run(venue).unwrap();
            repo.finish_scrape_run(id, status, 0, SaveOutcome::default(), None).unwrap();
        };

        log("ago", RunStatus::Success);
        log("ago", RunStatus::Empty);
        log("ago", RunStatus::Error);
        log("ago", RunStatus::Empty);
        log("fox-cabaret", RunStatus::Error);
        log("fox-cabaret", RunStatus::Success);

        let report = repo.venue_health(3).unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].venue_id, "ago");
        assert_eq!(report[0].consecutive_failures, 3);
        assert!(!report[0].healthy);
        assert_eq!(report[1].consecutive_failures, 0);
        assert!(report[1].healthy);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.duckdb");
        {
            let repo = Repository::open(&path).unwrap();
            repo.run_migrations().unwrap();
            repo.run_migrations().unwrap();
            repo.save_events(&[event("Jazz Night", Some(at(20, 20)), "Vancouver")], OnDuplicate::Skip)
                .unwrap();
        }
        let repo = Repository::open(&path).unwrap();
        assert_eq!(repo.event_count().unwrap(), 1);
    }
}
