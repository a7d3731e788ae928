//! Listing-page extraction.
//!
//! Structured data wins: if the page carries schema.org `Event` objects in
//! JSON-LD those are used as-is. Otherwise a list of common container
//! selectors is tried and each container is mined for a title, a date and
//! the other fields. Venue configuration can pin any of those selectors.
//!
//! An event's own page is read for the description and address the listing
//! lacked: meta tags first, then JSON-LD, then common content blocks.

use crate::models::RawEventRow;
use crate::venues::SelectorOverrides;
use anyhow::Result;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

pub const MAX_ROWS_PER_PAGE: usize = 200;

const CONTAINER_CANDIDATES: &[&str] = &[
    ".event",
    ".event-item",
    ".event-card",
    ".event-listing",
    "li.event",
    "article.event",
    ".events-list li",
    ".views-row",
    ".show",
    ".listing-item",
    ".card",
    "article",
];

const TITLE_CANDIDATES: &[&str] = &[
    ".event-title", ".title", "h1", "h2", "h3", "h4", "[class*='title']", "a",
];
const DATE_CANDIDATES: &[&str] = &[
    "time", ".event-date", ".date", "[class*='date']", ".when", ".datetime",
];
const DESCRIPTION_CANDIDATES: &[&str] = &[
    ".description", ".summary", ".excerpt", "[class*='desc']", "p",
];
const LINK_CANDIDATES: &[&str] = &["a[href]"];
const IMAGE_CANDIDATES: &[&str] = &["img"];
const PRICE_CANDIDATES: &[&str] = &[".price", "[class*='price']", ".cost", ".tickets"];

const DETAIL_CONTENT_CANDIDATES: &[&str] = &[
    ".event-description", ".description", ".event-content", "article p", ".about p",
];

/// Shorter descriptions are usually a tagline or a site slogan.
const MIN_DETAIL_CHARS: usize = 20;

// ── Entry point ───────────────────────────────────────────────────────────────

pub fn parse_listing_page(html: &str, overrides: &SelectorOverrides) -> Result<Vec<RawEventRow>> {
    let doc = Html::parse_document(html);

    let mut rows = extract_jsonld_events(&doc);
    if !rows.is_empty() {
        debug!("{} events from JSON-LD", rows.len());
        rows.truncate(MAX_ROWS_PER_PAGE);
        return Ok(rows);
    }

    let fields = FieldSelectors::build(overrides)?;
    let containers = match &overrides.container {
        Some(css) => vec![selector(css)?],
        None => parse_all(CONTAINER_CANDIDATES),
    };

    for container in &containers {
        let rows: Vec<RawEventRow> = doc
            .select(container)
            .map(|el| fields.extract(el))
            .filter(|row| row.title.is_some())
            .take(MAX_ROWS_PER_PAGE)
            .collect();

        let dated = rows
            .iter()
            .any(|r| r.date_text.is_some() || r.datetime_attr.is_some());

        // A pinned container is trusted even when nothing on it looks dated.
        if !rows.is_empty() && (dated || overrides.container.is_some()) {
            debug!("{} rows via container selector {:?}", rows.len(), container);
            return Ok(rows);
        }
    }

    Ok(vec![])
}

/// Base URL for resolving relative links: `<base href>` when present,
/// otherwise the page's own URL.
pub fn page_base_url(html: &str, page_url: &str) -> Option<Url> {
    let page = Url::parse(page_url).ok()?;
    let doc = Html::parse_document(html);
    let base_sel = Selector::parse("base[href]").ok()?;

    doc.select(&base_sel)
        .next()
        .and_then(|b| b.value().attr("href"))
        .and_then(|href| page.join(href.trim()).ok())
        .or(Some(page))
}

/// What an event's own page adds to its listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventDetails {
    pub description: Option<String>,
    pub address: Option<String>,
}

pub fn parse_detail_page(html: &str) -> EventDetails {
    let doc = Html::parse_document(html);
    let blocks = jsonld_blocks(&doc);
    let mut objects = Vec::new();
    for block in &blocks {
        jsonld_objects(block, &mut objects);
    }
    // Event objects speak for the page before WebPage/Organization ones.
    objects.sort_by_key(|o| !is_event_type(o.get("@type")));

    let long_enough = |s: &String| s.chars().count() >= MIN_DETAIL_CHARS;
    let description = meta_content(&doc, r#"meta[property="og:description"]"#)
        .filter(long_enough)
        .or_else(|| meta_content(&doc, r#"meta[name="description"]"#).filter(long_enough))
        .or_else(|| {
            objects
                .iter()
                .filter_map(|o| json_str(o.get("description")))
                .find(long_enough)
        })
        .or_else(|| {
            first_text(doc.root_element(), &parse_all(DETAIL_CONTENT_CANDIDATES)).filter(long_enough)
        });

    EventDetails {
        description: description.map(|d| d.split_whitespace().collect::<Vec<_>>().join(" ")),
        address: objects.iter().find_map(|o| location_address(o)),
    }
}

fn meta_content(doc: &Html, css: &str) -> Option<String> {
    let sel = Selector::parse(css).ok()?;
    doc.select(&sel)
        .filter_map(|m| m.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

/// `location.address` as one line, from a plain string or a `PostalAddress`.
fn location_address(object: &Map<String, Value>) -> Option<String> {
    let location = object.get("location").or_else(|| object.get("place"))?;
    let location = match location {
        Value::Array(items) => items.first()?,
        other => other,
    };
    match location.get("address")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        postal @ Value::Object(_) => {
            let street = json_str(postal.get("streetAddress"))?;
            let region = [postal.get("addressRegion"), postal.get("postalCode")]
                .into_iter()
                .filter_map(json_str)
                .collect::<Vec<_>>()
                .join(" ");
            let parts: Vec<String> = [Some(street), json_str(postal.get("addressLocality")), Some(region)]
                .into_iter()
                .flatten()
                .filter(|p| !p.is_empty())
                .collect();
            Some(parts.join(", "))
        }
        _ => None,
    }
}

// ── CSS heuristics ────────────────────────────────────────────────────────────

struct FieldSelectors {
    title: Vec<Selector>,
    date: Vec<Selector>,
    datetime: Selector,
    description: Vec<Selector>,
    link: Vec<Selector>,
    image: Vec<Selector>,
    price: Vec<Selector>,
}

impl FieldSelectors {
    fn build(overrides: &SelectorOverrides) -> Result<Self> {
        let pick = |custom: &Option<String>, defaults: &[&str]| -> Result<Vec<Selector>> {
            match custom {
                Some(css) => Ok(vec![selector(css)?]),
                None => Ok(parse_all(defaults)),
            }
        };

        Ok(Self {
            title: pick(&overrides.title, TITLE_CANDIDATES)?,
            date: pick(&overrides.date, DATE_CANDIDATES)?,
            datetime: selector("[datetime]")?,
            description: pick(&overrides.description, DESCRIPTION_CANDIDATES)?,
            link: pick(&overrides.link, LINK_CANDIDATES)?,
            image: pick(&overrides.image, IMAGE_CANDIDATES)?,
            price: pick(&overrides.price, PRICE_CANDIDATES)?,
        })
    }

    fn extract(&self, el: ElementRef<'_>) -> RawEventRow {
        let mut stamps = std::iter::once(el)
            .chain(el.select(&self.datetime))
            .filter_map(|e| e.value().attr("datetime"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let datetime_attr = stamps.next();
        let end_datetime_attr = stamps.next();

        let title = self
            .title
            .iter()
            .flat_map(|sel| el.select(sel))
            .map(|t| t.text().collect::<String>())
            .find(|t| !t.trim().is_empty());

        RawEventRow {
            title,
            date_text: first_text(el, &self.date),
            datetime_attr,
            end_datetime_attr,
            description: first_text(el, &self.description),
            href: self.link_href(el),
            image_src: self.image_src(el),
            price_text: first_text(el, &self.price).or_else(|| Some(element_text(el))),
        }
    }

    fn link_href(&self, el: ElementRef<'_>) -> Option<String> {
        if el.value().name() == "a" {
            if let Some(href) = el.value().attr("href") {
                return Some(href.trim().to_string());
            }
        }
        self.link
            .iter()
            .flat_map(|sel| el.select(sel))
            .filter_map(|a| a.value().attr("href"))
            .map(|h| h.trim().to_string())
            .find(|h| !h.is_empty())
    }

    /// Lazy-loaded images keep the real URL in `data-src`; `src` is often a
    /// data: placeholder.
    fn image_src(&self, el: ElementRef<'_>) -> Option<String> {
        let img = self.image.iter().flat_map(|sel| el.select(sel)).next()?;
        let attrs = img.value();
        ["data-src", "data-lazy-src", "src"]
            .iter()
            .filter_map(|name| attrs.attr(name))
            .map(str::trim)
            .find(|v| !v.is_empty() && !v.starts_with("data:"))
            .map(str::to_string)
    }
}

fn first_text(el: ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    selectors
        .iter()
        .flat_map(|sel| el.select(sel))
        .map(element_text)
        .find(|t| !t.is_empty())
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("invalid selector {:?}: {:?}", css, e))
}

fn parse_all(candidates: &[&str]) -> Vec<Selector> {
    candidates
        .iter()
        .filter_map(|css| Selector::parse(css).ok())
        .collect()
}

// ── JSON-LD ───────────────────────────────────────────────────────────────────

fn jsonld_blocks(doc: &Html) -> Vec<Value> {
    let Ok(script_sel) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
        return vec![];
    };

    doc.select(&script_sel)
        .filter_map(|script| {
            let raw = script.text().collect::<String>();
            serde_json::from_str::<Value>(raw.trim())
                .map_err(|e| debug!("skipping malformed JSON-LD block: {}", e))
                .ok()
        })
        .collect()
}

fn extract_jsonld_events(doc: &Html) -> Vec<RawEventRow> {
    let mut rows = Vec::new();
    for block in jsonld_blocks(doc) {
        collect_events(&block, &mut rows);
    }
    rows
}

/// Every object in a block, descending into arrays and `@graph`.
fn jsonld_objects<'a>(value: &'a Value, out: &mut Vec<&'a Map<String, Value>>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| jsonld_objects(v, out)),
        Value::Object(map) => {
            out.push(map);
            if let Some(graph) = map.get("@graph") {
                jsonld_objects(graph, out);
            }
        }
        _ => {}
    }
}

fn collect_events(value: &Value, out: &mut Vec<RawEventRow>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_events(v, out)),
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                collect_events(graph, out);
            }
            if let Some(list) = map.get("itemListElement") {
                collect_events(list, out);
            }
            if let Some(item) = map.get("item") {
                collect_events(item, out);
            }
            if is_event_type(map.get("@type")) {
                out.push(jsonld_row(value));
            }
        }
        _ => {}
    }
}

/// `Event` or any subtype (`MusicEvent`, `TheaterEvent`...), given either as
/// a string or as an array of strings.
fn is_event_type(ty: Option<&Value>) -> bool {
    let is_event = |s: &str| s.ends_with("Event");
    match ty {
        Some(Value::String(s)) => is_event(s),
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).any(is_event),
        _ => false,
    }
}

fn jsonld_row(event: &Value) -> RawEventRow {
    RawEventRow {
        title: json_str(event.get("name")),
        date_text: None,
        datetime_attr: json_str(event.get("startDate")),
        end_datetime_attr: json_str(event.get("endDate")),
        description: json_str(event.get("description")),
        href: json_str(event.get("url")),
        image_src: event.get("image").and_then(image_url),
        price_text: event.get("offers").and_then(offer_price),
    }
}

fn json_str(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn image_url(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(image_url),
        Value::Object(_) => json_str(value.get("url")),
        _ => None,
    }
}

/// Offer price rendered the way listing pages write it, so the cleaner
/// normalises both sources through the same path.
fn offer_price(offers: &Value) -> Option<String> {
    let offer = match offers {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let number = |key: &str| -> Option<f64> {
        match offer.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    };

    match (number("lowPrice"), number("highPrice"), number("price")) {
        (Some(lo), Some(hi), _) if hi > lo => Some(format!("${lo}-${hi}")),
        (_, _, Some(p)) | (Some(p), _, None) if p <= 0.0 => Some("Free".to_string()),
        (_, _, Some(p)) | (Some(p), _, None) => Some(format!("${p}")),
        _ => None,
    }
}
