use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ── Venue ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lng")]
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Venue {
    pub name: String,
    pub address: String,
    pub city: String,
    #[serde(alias = "state")]
    pub province: String,
    pub country: String,
    pub coordinates: Option<Coordinates>,
}

// ── Event ─────────────────────────────────────────────────────────────────────

/// A normalized event listing as written to the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub title: String,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub venue: Venue,
    pub description: String,
    pub url: String,
    pub image_url: Option<String>,
    pub price: Option<String>,
    pub categories: Vec<String>,
    pub source: String,       // venue id that produced the listing
    pub city: String,
    pub scraped_at: NaiveDateTime,
}

impl Event {
    /// Primary category, the first tag.
    pub fn category(&self) -> Option<&str> {
        self.categories.first().map(String::as_str)
    }

    /// `(title, start date)` identity used for de-duplication.
    pub fn natural_key(&self) -> String {
        natural_key(&self.title, self.start_date)
    }
}

pub fn natural_key(title: &str, start_date: Option<NaiveDateTime>) -> String {
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    match start_date {
        Some(d) => format!("{}|{}", title, d.format("%Y-%m-%dT%H:%M")),
        None => format!("{}|tbd", title),
    }
}

// ── Raw rows ──────────────────────────────────────────────────────────────────

/// Untyped fields lifted out of one listing on a page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEventRow {
    pub title: Option<String>,
    pub date_text: Option<String>,
    pub datetime_attr: Option<String>,  // `<time datetime>` or JSON-LD startDate
    pub end_datetime_attr: Option<String>,
    pub description: Option<String>,
    pub href: Option<String>,
    pub image_src: Option<String>,
    pub price_text: Option<String>,
}
