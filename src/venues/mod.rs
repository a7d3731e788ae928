//! Venue catalogue: where each listing page lives and what the venue is.
//!
//! The built-in entries cover the cities the project tracks. Entries from
//! configuration replace a built-in with the same `id` or add new venues.

use crate::models::{Coordinates, Venue};
use anyhow::{bail, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── City ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum City {
    Toronto,
    Vancouver,
    Calgary,
    Montreal,
    NewYork,
    Oxford,
}

impl City {
    pub const ALL: [City; 6] = [
        City::Toronto,
        City::Vancouver,
        City::Calgary,
        City::Montreal,
        City::NewYork,
        City::Oxford,
    ];

    pub fn name(self) -> &'static str {
        match self {
            City::Toronto => "Toronto",
            City::Vancouver => "Vancouver",
            City::Calgary => "Calgary",
            City::Montreal => "Montreal",
            City::NewYork => "New York",
            City::Oxford => "Oxford",
        }
    }

    /// Zone listing times are written in.
    pub fn timezone(self) -> Tz {
        match self {
            City::Toronto | City::Montreal => chrono_tz::America::Toronto,
            City::Vancouver => chrono_tz::America::Vancouver,
            City::Calgary => chrono_tz::America::Edmonton,
            City::NewYork => chrono_tz::America::New_York,
            City::Oxford => chrono_tz::Europe::London,
        }
    }

    pub fn country(self) -> &'static str {
        match self {
            City::NewYork => "United States",
            City::Oxford => "United Kingdom",
            _ => "Canada",
        }
    }
}

impl fmt::Display for City {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for City {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .to_lowercase()
            .replace('é', "e")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match key.as_str() {
            "toronto" | "to" => Ok(City::Toronto),
            "vancouver" | "van" => Ok(City::Vancouver),
            "calgary" | "yyc" => Ok(City::Calgary),
            "montreal" | "mtl" => Ok(City::Montreal),
            "newyork" | "nyc" | "ny" => Ok(City::NewYork),
            "oxford" => Ok(City::Oxford),
            _ => Err(format!("unknown city: {s}")),
        }
    }
}

impl TryFrom<String> for City {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<City> for String {
    fn from(city: City) -> Self {
        city.name().to_string()
    }
}

// ── Venue kind ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueKind {
    Concert,
    Gallery,
    Museum,
    Theatre,
    Festival,
    #[default]
    Community,
}

impl VenueKind {
    /// Start time assumed when a listing gives only a date.
    pub fn default_start_time(self) -> NaiveTime {
        let (h, m) = match self {
            VenueKind::Concert => (19, 0),
            VenueKind::Gallery => (11, 0),
            VenueKind::Museum => (10, 0),
            VenueKind::Theatre => (19, 30),
            VenueKind::Festival | VenueKind::Community => (0, 0),
        };
        NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
    }

    /// Closing time for venues with opening hours.
    pub fn default_end_time(self) -> Option<NaiveTime> {
        match self {
            VenueKind::Gallery | VenueKind::Museum => NaiveTime::from_hms_opt(17, 0, 0),
            _ => None,
        }
    }

    pub fn base_categories(self) -> &'static [&'static str] {
        match self {
            VenueKind::Concert => &["music", "concert"],
            VenueKind::Gallery => &["art", "exhibition"],
            VenueKind::Museum => &["museum", "culture"],
            VenueKind::Theatre => &["theatre", "performance"],
            VenueKind::Festival => &["festival"],
            VenueKind::Community => &["community"],
        }
    }
}

// ── Profile ───────────────────────────────────────────────────────────────────

/// CSS selectors that replace the generic heuristics for one venue.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SelectorOverrides {
    pub container: Option<String>,
    pub title: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub image: Option<String>,
    pub price: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VenueProfile {
    pub id: String,
    pub name: String,
    pub city: City,
    pub address: String,
    #[serde(alias = "state")]
    pub province: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    pub listing_url: String,
    #[serde(default)]
    pub kind: VenueKind,
    /// Drop listings whose date cannot be parsed instead of storing them undated.
    #[serde(default = "default_true")]
    pub date_required: bool,
    #[serde(default)]
    pub selectors: SelectorOverrides,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl VenueProfile {
    pub fn venue(&self) -> Venue {
        Venue {
            name: self.name.clone(),
            address: self.address.clone(),
            city: self.city.name().to_string(),
            province: self.province.clone(),
            country: self
                .country
                .clone()
                .unwrap_or_else(|| self.city.country().to_string()),
            coordinates: self.coordinates,
        }
    }

    pub fn base_categories(&self) -> Vec<String> {
        if self.categories.is_empty() {
            self.kind.base_categories().iter().map(|c| c.to_string()).collect()
        } else {
            self.categories.clone()
        }
    }
}

// ── Catalogue ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Catalogue {
    venues: Vec<VenueProfile>,
}

impl Catalogue {
    pub fn builtin() -> Self {
        Self { venues: builtin_venues() }
    }

    /// Built-ins merged with configured venues; configured ids win.
    pub fn with_overrides(configured: &[VenueProfile]) -> Self {
        let mut venues = builtin_venues();
        for profile in configured {
            match venues.iter_mut().find(|v| v.id == profile.id) {
                Some(existing) => *existing = profile.clone(),
                None => venues.push(profile.clone()),
            }
        }
        Self { venues }
    }

    pub fn all(&self) -> &[VenueProfile] {
        &self.venues
    }

    pub fn find(&self, id: &str) -> Option<&VenueProfile> {
        self.venues.iter().find(|v| v.id.eq_ignore_ascii_case(id))
    }

    pub fn for_city(&self, city: City) -> Vec<&VenueProfile> {
        self.venues.iter().filter(|v| v.city == city).collect()
    }

    /// Enabled venues matching an optional city and/or venue id.
    pub fn select(&self, city: Option<City>, venue_id: Option<&str>) -> Result<Vec<VenueProfile>> {
        if let Some(id) = venue_id {
            let Some(profile) = self.find(id) else {
                bail!("unknown venue id: {id}");
            };
            if let Some(city) = city {
                if profile.city != city {
                    bail!("venue {} is in {}, not {}", profile.id, profile.city, city);
                }
            }
            return Ok(vec![profile.clone()]);
        }

        Ok(self
            .venues
            .iter()
            .filter(|v| v.enabled)
            .filter(|v| city.is_none_or(|c| v.city == c))
            .cloned()
            .collect())
    }
}

#[allow(clippy::too_many_arguments)]
fn builtin(
    id: &str,
    name: &str,
    city: City,
    kind: VenueKind,
    address: &str,
    province: &str,
    (latitude, longitude): (f64, f64),
    listing_url: &str,
) -> VenueProfile {
    VenueProfile {
        id: id.to_string(),
        name: name.to_string(),
        city,
        address: address.to_string(),
        province: province.to_string(),
        country: None,
        coordinates: Some(Coordinates { latitude, longitude }),
        listing_url: listing_url.to_string(),
        kind,
        date_required: true,
        selectors: SelectorOverrides::default(),
        categories: Vec::new(),
        enabled: true,
    }
}

pub fn builtin_venues() -> Vec<VenueProfile> {
    vec![
        builtin(
            "gardiner-museum", "Gardiner Museum", City::Toronto, VenueKind::Museum,
            "111 Queens Park, Toronto, ON M5S 2C7", "ON", (43.6682, -79.3927),
            "https://www.gardinermuseum.on.ca/whats-on/",
        ),
        builtin(
            "ago", "Art Gallery of Ontario", City::Toronto, VenueKind::Gallery,
            "317 Dundas St W, Toronto, ON M5T 1G4", "ON", (43.6537, -79.3924),
            "https://ago.ca/events",
        ),
        builtin(
            "fox-cabaret", "Fox Cabaret", City::Vancouver, VenueKind::Concert,
            "2321 Main St, Vancouver, BC V5T 3C9", "BC", (49.2635, -123.1006),
            "https://www.foxcabaret.com/",
        ),
        builtin(
            "palace-theatre", "Palace Theatre", City::Calgary, VenueKind::Concert,
            "808 1 St SW, Calgary, AB T2P 1M3", "AB", (51.0447, -114.0719),
            "https://www.thepalacetheatre.ca/events",
        ),
        builtin(
            "studio-bell", "Studio Bell", City::Calgary, VenueKind::Museum,
            "850 4 St SE, Calgary, AB T2G 1R1", "AB", (51.0456, -114.0636),
            "https://studiobell.ca/events",
        ),
        builtin(
            "montreal-science-centre", "Montreal Science Centre", City::Montreal, VenueKind::Museum,
            "2 Rue de la Commune O, Montreal, QC H2Y 4B2", "QC", (45.5016, -73.5650),
            "https://www.montrealsciencecentre.com/special-events",
        ),
        builtin(
            "webster-hall", "Webster Hall", City::NewYork, VenueKind::Concert,
            "125 E 11th St, New York, NY 10003", "NY", (40.7329, -73.9876),
            "https://www.websterhall.com",
        ),
        builtin(
            "bowery-ballroom", "Bowery Ballroom", City::NewYork, VenueKind::Concert,
            "6 Delancey St, New York, NY 10002", "NY", (40.7184, -73.9936),
            "https://www.boweryballroom.com",
        ),
        builtin(
            "jericho-tavern", "The Jericho Tavern", City::Oxford, VenueKind::Concert,
            "56 Walton St, Oxford OX2 6AE", "Oxfordshire", (51.7601, -1.2663),
            "https://www.thejerichooxford.co.uk/events",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_city_aliases() {
        assert_eq!("new-york".parse::<City>(), Ok(City::NewYork));
        assert_eq!("NYC".parse::<City>(), Ok(City::NewYork));
        assert_eq!("Montréal".parse::<City>(), Ok(City::Montreal));
        assert_eq!(" vancouver ".parse::<City>(), Ok(City::Vancouver));
        assert!("Atlantis".parse::<City>().is_err());
    }

    #[test]
    fn test_builtin_ids_are_unique() {
        let venues = builtin_venues();
        let mut ids: Vec<&str> = venues.iter().map(|v| v.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), venues.len());
    }

    #[test]
    fn test_overrides_replace_and_extend() {
        let mut fox = Catalogue::builtin().find("fox-cabaret").unwrap().clone();
        fox.enabled = false;
        let mut oxford = fox.clone();
        oxford.id = "the-bullingdon".into();
        oxford.city = City::Oxford;
        oxford.enabled = true;

        let catalogue = Catalogue::with_overrides(&[fox, oxford]);
        assert!(!catalogue.find("fox-cabaret").unwrap().enabled);
        assert_eq!(catalogue.for_city(City::Oxford).len(), 2);
        assert_eq!(catalogue.all().len(), builtin_venues().len() + 1);
    }

    #[test]
    fn test_every_city_has_a_builtin_venue() {
        let catalogue = Catalogue::builtin();
        for city in City::ALL {
            let venues = catalogue.select(Some(city), None).unwrap();
            assert!(!venues.is_empty(), "no venue for {city}");
        }
        let oxford = catalogue.find("jericho-tavern").unwrap();
        assert_eq!(oxford.venue().country, "United Kingdom");
        assert_eq!(oxford.city.timezone(), chrono_tz::Europe::London);
    }

    #[test]
    fn test_select_filters() {
        let catalogue = Catalogue::builtin();
        let calgary = catalogue.select(Some(City::Calgary), None).unwrap();
        assert!(!calgary.is_empty());
        assert!(calgary.iter().all(|v| v.city == City::Calgary));

        assert_eq!(catalogue.select(None, Some("AGO")).unwrap().len(), 1);
        assert!(catalogue.select(Some(City::Calgary), Some("ago")).is_err());
        assert!(catalogue.select(None, Some("nowhere")).is_err());
    }

    #[test]
    fn test_profile_defaults() {
        let profile: VenueProfile = serde_json::from_value(serde_json::json!({
            "id": "jericho-tavern",
            "name": "The Jericho Tavern",
            "city": "oxford",
            "address": "56 Walton St, Oxford OX2 6AE",
            "state": "Oxfordshire",
            "listing_url": "https://example.org/events",
            "kind": "concert",
        }))
        .unwrap();
        assert_eq!(profile.city, City::Oxford);
        assert!(profile.date_required && profile.enabled);
        assert_eq!(profile.venue().country, "United Kingdom");
        assert_eq!(profile.base_categories(), vec!["music", "concert"]);
    }
}
