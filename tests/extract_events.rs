use chrono::{NaiveDate, NaiveDateTime};
use event_scraper::config::OnDuplicate;
use event_scraper::dates::{DateParser, YearPolicy};
use event_scraper::scraper::cleaner::CleanContext;
use event_scraper::scraper::events_from_html;
use event_scraper::storage::Repository;
use event_scraper::venues::{Catalogue, VenueProfile};

const GARDINER: &str = include_str!("fixtures/gardiner_listing.html");
const WEBSTER: &str = include_str!("fixtures/webster_jsonld.html");

fn ctx() -> CleanContext {
    let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    CleanContext {
        parser: DateParser::new(today, YearPolicy::RollForward),
        base_url: None,
        description_max_chars: 500,
        scraped_at: today.and_hms_opt(8, 0, 0).unwrap(),
    }
}

fn venue(id: &str) -> VenueProfile {
    Catalogue::builtin().find(id).unwrap().clone()
}

fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
}

#[test]
fn test_css_listing_to_events() {
    let events = events_from_html(GARDINER, &venue("gardiner-museum"), ctx()).unwrap();
    let titles: Vec<&str> = events.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(
        titles,
        vec!["Clay Modernism", "Family Sundays: Clay Play", "Wheel Throwing Workshop"]
    );

    let exhibition = &events[0];
    assert_eq!(exhibition.start_date, Some(dt(2025, 6, 13, 10, 0)));
    assert_eq!(exhibition.end_date, Some(dt(2025, 8, 31, 17, 0)));
    assert_eq!(exhibition.url, "https://www.gardinermuseum.on.ca/exhibition/clay-modernism/");
    assert_eq!(
        exhibition.image_url.as_deref(),
        Some("https://www.gardinermuseum.on.ca/media/clay-modernism.jpg")
    );
    assert_eq!(exhibition.price, None);
    assert_eq!(exhibition.category(), Some("museum"));
    assert!(exhibition.categories.contains(&"art".to_string()));
    assert_eq!(exhibition.venue.name, "Gardiner Museum");
    assert_eq!(exhibition.city, "Toronto");

    let family = &events[1];
    assert_eq!(family.start_date, Some(dt(2025, 7, 20, 10, 0)));
    assert_eq!(family.price.as_deref(), Some("Free"));
    assert!(family.categories.contains(&"family".to_string()));

    let workshop = &events[2];
    assert_eq!(workshop.start_date, Some(dt(2025, 7, 24, 18, 30)));
    assert_eq!(workshop.end_date, Some(dt(2025, 7, 24, 21, 0)));
    assert_eq!(workshop.price.as_deref(), Some("$295-$325"));
    assert_eq!(workshop.url, "https://shop.example.org/wheel-throwing");
    assert!(workshop.categories.contains(&"workshop".to_string()));
}

#[test]
fn test_jsonld_listing_to_events() {
    let events = events_from_html(WEBSTER, &venue("webster-hall"), ctx()).unwrap();
    assert_eq!(events.len(), 2);

    let gig = &events[0];
    assert_eq!(gig.title, "The Slow Readers Club");
    assert_eq!(gig.start_date, Some(dt(2025, 11, 14, 19, 0)));
    assert_eq!(gig.url, "https://www.websterhall.com/events/slow-readers-club");
    assert_eq!(gig.price.as_deref(), Some("$28-$45"));
    assert_eq!(gig.city, "New York");

    let disco = &events[1];
    assert_eq!(disco.start_date, Some(dt(2025, 11, 15, 19, 0)));
    assert_eq!(disco.price.as_deref(), Some("Free"));
    assert_eq!(disco.description, "Late Night Disco");
}

#[test]
fn test_rescrape_is_idempotent_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.duckdb");
    let repo = Repository::open(&path).unwrap();
    repo.run_migrations().unwrap();

    let events = events_from_html(GARDINER, &venue("gardiner-museum"), ctx()).unwrap();
    let first = repo.save_events(&events, OnDuplicate::Skip).unwrap();
    assert_eq!(first.inserted, 3);

    let again = events_from_html(GARDINER, &venue("gardiner-museum"), ctx()).unwrap();
    let second = repo.save_events(&again, OnDuplicate::Skip).unwrap();
    assert_eq!((second.inserted, second.skipped), (0, 3));

    let refreshed = repo.save_events(&again, OnDuplicate::Overwrite).unwrap();
    assert_eq!(refreshed.updated, 3);
    assert_eq!(repo.event_count().unwrap(), 3);

    let stored = repo.find_by_natural_key(&events[2].natural_key()).unwrap().unwrap();
    assert_eq!(stored.title, "Wheel Throwing Workshop");
    assert_eq!(stored.end_date, Some(dt(2025, 7, 24, 21, 0)));
}
