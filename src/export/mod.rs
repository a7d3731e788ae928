//! Dump stored events as CSV or JSON lines.

use crate::models::Event;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

/// Flat CSV shape: one column per venue field, tags joined with `;`.
#[derive(Debug, Serialize)]
struct CsvRecord<'a> {
    title: &'a str,
    start_date: Option<String>,
    end_date: Option<String>,
    venue: &'a str,
    address: &'a str,
    city: &'a str,
    province: &'a str,
    country: &'a str,
    price: Option<&'a str>,
    categories: String,
    url: &'a str,
    image_url: Option<&'a str>,
    source: &'a str,
    description: &'a str,
}

impl<'a> From<&'a Event> for CsvRecord<'a> {
    fn from(e: &'a Event) -> Self {
        let stamp = |d: Option<chrono::NaiveDateTime>| d.map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string());
        Self {
            title: &e.title,
            start_date: stamp(e.start_date),
            end_date: stamp(e.end_date),
            venue: &e.venue.name,
            address: &e.venue.address,
            city: &e.city,
            province: &e.venue.province,
            country: &e.venue.country,
            price: e.price.as_deref(),
            categories: e.categories.join(";"),
            url: &e.url,
            image_url: e.image_url.as_deref(),
            source: &e.source,
            description: &e.description,
        }
    }
}

/// Write `events` to `out`, returning how many were written.
pub fn write_events<W: Write>(events: &[Event], format: ExportFormat, out: W) -> Result<usize> {
    match format {
        ExportFormat::Csv => {
            let mut wtr = csv::Writer::from_writer(out);
            for event in events {
                wtr.serialize(CsvRecord::from(event))
                    .with_context(|| format!("CSV row for {:?}", event.title))?;
            }
            wtr.flush().context("Failed to flush CSV output")?;
        }
        ExportFormat::Json => {
            let mut out = out;
            for event in events {
                serde_json::to_writer(&mut out, event)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
    }
    Ok(events.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Venue;
    use chrono::NaiveDate;

    fn sample() -> Event {
        Event {
            title: "Clay, Fire & Form".into(),
            start_date: NaiveDate::from_ymd_opt(2025, 6, 13).unwrap().and_hms_opt(10, 0, 0),
            end_date: None,
            venue: Venue {
                name: "Gardiner Museum".into(),
                address: "111 Queens Park".into(),
                city: "Toronto".into(),
                province: "ON".into(),
                country: "Canada".into(),
                coordinates: None,
            },
            description: "Ceramics survey".into(),
            url: "https://www.gardinermuseum.on.ca/event/clay".into(),
            image_url: None,
            price: Some("Free".into()),
            categories: vec!["museum".into(), "art".into()],
            source: "gardiner-museum".into(),
            city: "Toronto".into(),
            scraped_at: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_csv_export() {
        let mut buf = Vec::new();
        let n = write_events(&[sample()], ExportFormat::Csv, &mut buf).unwrap();
        assert_eq!(n, 1);

        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("title,start_date,end_date,venue"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("\"Clay, Fire & Form\",2025-06-13T10:00:00,,Gardiner Museum"));
        assert!(row.contains("museum;art"));
    }

    #[test]
    fn test_json_lines_export() {
        let mut buf = Vec::new();
        write_events(&[sample(), sample()], ExportFormat::Json, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 2);

        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["startDate"], "2025-06-13T10:00:00");
        assert_eq!(first["venue"]["name"], "Gardiner Museum");
    }
}
