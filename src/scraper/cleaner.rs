use crate::dates::{end_of_day, DateParser, ParsedDate};
use crate::models::{Event, RawEventRow};
use crate::scraper::parsers::EventDetails;
use crate::venues::VenueProfile;
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use url::Url;

const MIN_TITLE_CHARS: usize = 5;
const MAX_TITLE_CHARS: usize = 200;

/// Whole titles that are site chrome, not events.
const NAV_WORDS: &[&str] = &[
    "home", "about", "about us", "contact", "contact us", "menu", "navigation", "search",
    "login", "log in", "register", "sign in", "events", "upcoming events", "past events",
    "calendar", "tickets", "buy tickets", "shop", "donate", "membership", "visit", "filter",
    "load more", "next", "previous", "share", "close", "more", "privacy", "terms",
    "facebook", "twitter", "instagram", "youtube", "linkedin", "directions",
];

/// Phrases that mark a link or button rather than a listing.
const NAV_PHRASES: &[&str] = &[
    "read more", "learn more", "more info", "view all", "see all", "click here",
    "find out more", "sign up", "subscribe", "newsletter", "follow us", "privacy policy",
    "cookie", "terms of use", "terms and conditions", "social media",
];

static SOLD_OUT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\*+\s*sold\s*out\s*\*+|\(\s*sold\s*out\s*\)|^\s*sold\s*out\s*[:\-–|]\s*")
        .expect("valid sold-out regex")
});

static BARE_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)^
        (?:(?:mon|tue|wed|thu|fri|sat|sun)[a-z]*\.?,?\s+)?
        (?:
            (?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+\d{1,2}(?:st|nd|rd|th)?(?:,?\s+\d{4})?
          | \d{1,2}(?:st|nd|rd|th)?\s+(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?(?:\s+\d{4})?
          | \d{1,4}[/.-]\d{1,2}[/.-]\d{1,4}
        )$",
    )
    .expect("valid bare-date regex")
});

static FREE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bfree\b").expect("valid free regex"));

static AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\s?(\d+(?:\.\d{1,2})?)").expect("valid amount regex"));

static CATEGORY_RULES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("music", r"concert|music|band|dj|jazz|orchestra|symphony|choir|gig"),
        ("comedy", r"comedy|stand-?up|improv|comedian"),
        ("theatre", r"theatre|theater|play|musical|drama|opera|ballet"),
        ("art", r"art|exhibition|exhibit|gallery|painting|sculpture|ceramics?|pottery"),
        ("film", r"film|movie|screening|cinema"),
        ("family", r"family|kids|children"),
        ("workshop", r"workshop|class|lecture|talk|seminar|course"),
        ("food", r"food|wine|beer|tasting|dinner|brunch"),
        ("dance", r"dance|dancing"),
        ("festival", r"festival|fest"),
        ("spiritual", r"meditation|prayer|worship|spiritual|yoga"),
    ]
    .into_iter()
    .map(|(tag, words)| {
        let re = Regex::new(&format!(r"(?i)\b(?:{words})\b")).expect("valid category regex");
        (tag, re)
    })
    .collect()
});

// ── Text ──────────────────────────────────────────────────────────────────────

/// Collapse runs of whitespace and drop zero-width characters.
pub fn clean_text(s: &str) -> String {
    s.replace(['\u{200b}', '\u{feff}'], "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// First non-empty line, without sold-out markers or dangling separators.
pub fn clean_title(raw: &str) -> String {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let stripped = SOLD_OUT_RE.replace_all(line, " ");
    clean_text(&stripped)
        .trim_matches(|c: char| matches!(c, '-' | '|' | ':' | '•' | '–'))
        .trim()
        .to_string()
}

pub fn is_valid_title(title: &str) -> bool {
    let len = title.chars().count();
    if !(MIN_TITLE_CHARS..=MAX_TITLE_CHARS).contains(&len) {
        return false;
    }

    let lower = title.to_lowercase();
    if NAV_WORDS.contains(&lower.as_str()) {
        return false;
    }
    if NAV_PHRASES.iter().any(|p| lower.contains(p)) {
        return false;
    }
    !BARE_DATE_RE.is_match(title.trim())
}

/// Cut at a char boundary, ending with "..." when shortened.
pub fn truncate_description(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let cut: String = text.chars().take(keep).collect();
    format!("{}...", cut.trim_end())
}

// ── URLs ──────────────────────────────────────────────────────────────────────

/// Absolute http(s) URL for `href`, resolved against the page base.
pub fn resolve_url(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    let lower = href.to_ascii_lowercase();
    if href.is_empty()
        || href.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
    {
        return None;
    }

    let url = match Url::parse(href) {
        Ok(url) => url,
        Err(_) => base?.join(href).ok()?,
    };
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

// ── Price / categories ────────────────────────────────────────────────────────

/// "Free", "$25" or "$15-$40" from loose ticket text. A dollar amount
/// outranks the word "free" ("Tickets $40. Free parking.").
pub fn extract_price(text: &str) -> Option<String> {
    let amounts: Vec<(f64, &str)> = AMOUNT_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().parse::<f64>().ok().map(|v| (v, m.as_str())))
        .collect();

    let (Some(low), Some(high)) = (
        amounts.iter().min_by(|a, b| a.0.total_cmp(&b.0)),
        amounts.iter().max_by(|a, b| a.0.total_cmp(&b.0)),
    ) else {
        return FREE_RE.is_match(text).then(|| "Free".to_string());
    };

    if low.0 == 0.0 && high.0 == 0.0 {
        Some("Free".to_string())
    } else if low.0 == high.0 {
        Some(format!("${}", low.1))
    } else {
        Some(format!("${}-${}", low.1, high.1))
    }
}

/// Venue base categories followed by keyword matches, without repeats.
pub fn categorize(title: &str, description: &str, base: &[String]) -> Vec<String> {
    let haystack = format!("{title} {description}");
    let mut out: Vec<String> = Vec::new();

    let keyword_tags = CATEGORY_RULES
        .iter()
        .filter(|(_, re)| re.is_match(&haystack))
        .map(|(tag, _)| tag.to_string());

    for tag in base.iter().cloned().chain(keyword_tags) {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

// ── Row → Event ───────────────────────────────────────────────────────────────

/// Per-page inputs shared by every row.
#[derive(Debug, Clone)]
pub struct CleanContext {
    pub parser: DateParser,
    pub base_url: Option<Url>,
    pub description_max_chars: usize,
    pub scraped_at: NaiveDateTime,
}

pub fn row_to_event(row: &RawEventRow, profile: &VenueProfile, ctx: &CleanContext) -> Option<Event> {
    let title = clean_title(row.title.as_deref()?);
    if !is_valid_title(&title) {
        debug!("{}: rejected title {:?}", profile.id, title);
        return None;
    }

    let parser = ctx.parser.in_zone(profile.city.timezone());
    let parsed = parse_row_date(row, &parser);
    if parsed.is_none() && profile.date_required {
        debug!("{}: no usable date for {:?}", profile.id, title);
        return None;
    }

    let start_date = parsed.as_ref().map(|p| p.start_at(profile.kind.default_start_time()));
    let end_date = parsed
        .as_ref()
        .and_then(|p| explicit_end(row, &parser, profile).or_else(|| p.end_at(profile.kind.default_end_time())))
        .filter(|end| start_date.is_some_and(|start| *end >= start));

    let full_description = row
        .description
        .as_deref()
        .map(clean_text)
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| title.clone());
    let categories = categorize(&title, &full_description, &profile.base_categories());
    let description = truncate_description(&full_description, ctx.description_max_chars);

    let url = row
        .href
        .as_deref()
        .and_then(|h| resolve_url(ctx.base_url.as_ref(), h))
        .unwrap_or_else(|| profile.listing_url.clone());

    let image_url = row
        .image_src
        .as_deref()
        .and_then(|src| resolve_url(ctx.base_url.as_ref(), src));

    let price = row.price_text.as_deref().and_then(extract_price);

    Some(Event {
        title,
        start_date,
        end_date,
        venue: profile.venue(),
        description,
        url,
        image_url,
        price,
        categories,
        source: profile.id.clone(),
        city: profile.city.name().to_string(),
        scraped_at: ctx.scraped_at,
    })
}

// ── Detail pages ──────────────────────────────────────────────────────────────

/// Addresses shorter than this are a bare city or venue name.
const MIN_ADDRESS_CHARS: usize = 15;

/// The listing gave no description and the event links to its own page.
pub fn needs_details(event: &Event, profile: &VenueProfile) -> bool {
    event.description == event.title && event.url != profile.listing_url
}

/// Fold a detail page into an event. Returns whether anything changed.
pub fn apply_details(
    event: &mut Event,
    details: EventDetails,
    profile: &VenueProfile,
    description_max_chars: usize,
) -> bool {
    let mut changed = false;

    if let Some(full) = details.description.map(|d| clean_text(&d)).filter(|d| !d.is_empty()) {
        if event.description == event.title {
            event.categories = categorize(&event.title, &full, &profile.base_categories());
            event.description = truncate_description(&full, description_max_chars);
            changed = true;
        }
    }

    if let Some(address) = details.address.map(|a| clean_text(&a)) {
        if event.venue.address.chars().count() < MIN_ADDRESS_CHARS
            && address.chars().count() >= MIN_ADDRESS_CHARS
        {
            event.venue.address = address;
            changed = true;
        }
    }
    changed
}

/// Machine-readable stamp first, visible text second.
fn parse_row_date(row: &RawEventRow, parser: &DateParser) -> Option<ParsedDate> {
    row.datetime_attr
        .as_deref()
        .and_then(|s| parser.parse(s))
        .or_else(|| row.date_text.as_deref().and_then(|s| parser.parse(s)))
}

fn explicit_end(row: &RawEventRow, parser: &DateParser, profile: &VenueProfile) -> Option<NaiveDateTime> {
    let parsed = parser.parse(row.end_datetime_attr.as_deref()?)?;
    let default = profile.kind.default_end_time().unwrap_or_else(end_of_day);
    Some(parsed.start_at(default))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
