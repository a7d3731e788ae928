//! Free-text event date parsing.
//!
//! Listing pages write dates in a handful of loose English forms
//! ("July 20, 2025", "Mon, Aug 25", "June 13 – August 31, 2025",
//! "Tomorrow at 8:00 PM"). The parser walks an ordered table of
//! `(pattern, extractor)` rules and returns the first one that yields a real
//! calendar date. Time of day is read separately from the whole fragment.
//!
//! Machine stamps with a UTC offset (`2025-11-15T00:00:00Z`) are moved into
//! the venue's zone before the wall-clock value is kept.

use chrono::{
    Datelike, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Weekday,
};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

const MONTH_NAMES: [&str; 12] = [
    "January", "February", "March", "April", "May", "June",
    "July", "August", "September", "October", "November", "December",
];

const WEEKDAY_NAMES: [(&str, Weekday); 7] = [
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sunday", Weekday::Sun),
];

// ── Public types ──────────────────────────────────────────────────────────────

/// How a date without an explicit year is placed on the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YearPolicy {
    /// Always the reference year.
    CurrentYear,
    /// Next year when the month is earlier than the reference month.
    #[default]
    RollForward,
}

/// Which rule produced a [`ParsedDate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DatePattern {
    IsoDate,
    MonthRange,
    DayRange,
    Numeric,
    WeekdayMonthDay,
    DayFirstRange,
    DayMonthYear,
    MonthDay,
    Relative,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDate {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub pattern: DatePattern,
}

impl ParsedDate {
    /// Start as a datetime, using `default_time` when the text had no time.
    pub fn start_at(&self, default_time: NaiveTime) -> NaiveDateTime {
        self.start.and_time(self.start_time.unwrap_or(default_time))
    }

    /// End as a datetime. A range end without a time takes `default_time`,
    /// or the end of that day; a single day with an end time ends that same day.
    pub fn end_at(&self, default_time: Option<NaiveTime>) -> Option<NaiveDateTime> {
        match (self.end, self.end_time) {
            (Some(end), time) => Some(end.and_time(time.or(default_time).unwrap_or_else(end_of_day))),
            (None, Some(time)) => Some(self.start.and_time(time)),
            (None, None) => default_time.map(|t| self.start.and_time(t)),
        }
    }
}

/// Last minute of a day, used for range ends that carry no time.
pub fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN)
}

// ── Rule table ────────────────────────────────────────────────────────────────

struct DateMatch {
    start: NaiveDate,
    end: Option<NaiveDate>,
    time: Option<NaiveTime>,
}

type Extractor = fn(&DateParser, &Captures<'_>, &str) -> Option<DateMatch>;

struct Rule {
    pattern: DatePattern,
    regex: Regex,
    extract: Extractor,
}

fn month(name: &str) -> String {
    format!(
        r"\b(?P<{name}>jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\b\.?"
    )
}

const DASH: &str = r"\s*(?:-|–|—|to|until|through)\s*";

const WEEKDAY: &str = r"(?:\b(?:mon|tue|wed|thu|fri|sat|sun)[a-z]*\.?,?\s+)?";

fn rule(pattern: DatePattern, re: &str, extract: Extractor) -> Rule {
    Rule {
        pattern,
        regex: Regex::new(&format!("(?i){re}")).expect("valid date pattern"),
        extract,
    }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    let m = month("m");
    let m1 = month("m1");
    let m2 = month("m2");
    vec![
        rule(
            DatePattern::IsoDate,
            r"\b(?P<y>\d{4})-(?P<m>\d{1,2})-(?P<d>\d{1,2})(?:[T ](?P<h>\d{1,2}):(?P<min>\d{2})(?::(?P<s>\d{2})(?:\.\d+)?)?(?P<tz>Z|[+-]\d{2}:?\d{2})?)?",
            extract_iso,
        ),
        rule(
            DatePattern::MonthRange,
            &format!(
                r"{m1}\s+(?P<d1>\d{{1,2}})(?:,?\s*(?P<y1>\d{{4}}))?{DASH}{WEEKDAY}{m2}\s+(?P<d2>\d{{1,2}})\b(?:,?\s*(?P<y2>\d{{4}}))?"
            ),
            extract_month_range,
        ),
        rule(
            DatePattern::DayRange,
            &format!(r"{m}\s+(?P<d1>\d{{1,2}}){DASH}(?P<d2>\d{{1,2}})\b(?:,?\s*(?P<y>\d{{4}}))?"),
            extract_day_range,
        ),
        rule(
            DatePattern::Numeric,
            r"\b(?P<a>\d{1,2})/(?P<b>\d{1,2})/(?P<y>\d{4}|\d{2})\b",
            extract_numeric,
        ),
        rule(
            DatePattern::WeekdayMonthDay,
            &format!(r"\b(?:mon|tue|wed|thu|fri|sat|sun)[a-z]*\.?,?\s+{m}\s+(?P<d>\d{{1,2}})\b(?:,?\s*(?P<y>\d{{4}}))?"),
            extract_month_day,
        ),
        rule(
            DatePattern::DayFirstRange,
            &format!(r"\b(?P<d1>\d{{1,2}}){DASH}{WEEKDAY}(?P<d2>\d{{1,2}})\s+{m}(?:,?\s+(?P<y>\d{{4}}))?"),
            extract_day_first_range,
        ),
        rule(
            DatePattern::DayMonthYear,
            &format!(r"\b(?P<d>\d{{1,2}})\s+{m}(?:,?\s+(?P<y>\d{{4}}))?"),
            extract_day_month_year,
        ),
        rule(
            DatePattern::MonthDay,
            &format!(r"{m}\s+(?P<d>\d{{1,2}})\b(?:,?\s*(?P<y>\d{{4}}))?"),
            extract_month_day,
        ),
        rule(
            DatePattern::Relative,
            r"\b(?P<rel>today|tonight|tomorrow|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
            extract_relative,
        ),
    ]
});

static ORDINAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b").expect("valid ordinal regex"));

static TIME_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?P<h1>\d{1,2})(?::(?P<m1>\d{2}))?\s*(?P<p1>a\.m\.|p\.m\.|am|pm)?\s*(?:-|–|—|to)\s*(?P<h2>\d{1,2})(?::(?P<m2>\d{2}))?\s*(?P<p2>a\.m\.|p\.m\.|am\b|pm\b)",
    )
    .expect("valid time range regex")
});

static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?P<h>\d{1,2})(?::(?P<m>\d{2}))?\s*(?P<p>a\.m\.|p\.m\.|am\b|pm\b)")
        .expect("valid time regex")
});

static NAMED_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(noon|midnight)\b").expect("valid named time regex"));

// ── Parser ────────────────────────────────────────────────────────────────────

/// Stateless date parser anchored to a reference day.
#[derive(Debug, Clone, Copy)]
pub struct DateParser {
    today: NaiveDate,
    policy: YearPolicy,
    /// Zone offset-bearing stamps are converted into. `None` means the
    /// machine's local zone.
    zone: Option<Tz>,
}

impl DateParser {
    pub fn new(today: NaiveDate, policy: YearPolicy) -> Self {
        Self { today, policy, zone: None }
    }

    pub fn in_zone(mut self, zone: Tz) -> Self {
        self.zone = Some(zone);
        self
    }

    /// Parser anchored to the local calendar date.
    pub fn today(policy: YearPolicy) -> Self {
        Self::new(Local::now().date_naive(), policy)
    }

    pub fn parse(&self, text: &str) -> Option<ParsedDate> {
        let text = normalise(text);
        if text.is_empty() {
            return None;
        }

        for rule in RULES.iter() {
            for caps in rule.regex.captures_iter(&text) {
                let Some(found) = (rule.extract)(self, &caps, &text) else { continue };
                let (start_time, end_time) = match found.time {
                    Some(t) => (Some(t), None),
                    None => parse_time_of_day(&text),
                };
                return Some(ParsedDate {
                    start: found.start,
                    end: found.end,
                    start_time,
                    end_time,
                    pattern: rule.pattern,
                });
            }
        }
        None
    }

    fn infer_year(&self, month: u32) -> i32 {
        match self.policy {
            YearPolicy::RollForward if month < self.today.month() => self.today.year() + 1,
            _ => self.today.year(),
        }
    }

    fn date(&self, year: Option<i32>, month: u32, day: u32) -> Option<NaiveDate> {
        let year = year.unwrap_or_else(|| self.infer_year(month));
        NaiveDate::from_ymd_opt(year, month, day)
    }

    /// Wall-clock time in the parser's zone for an instant given at `offset`.
    fn to_wall_clock(&self, at: NaiveDateTime, offset: FixedOffset) -> Option<NaiveDateTime> {
        let instant = offset.from_local_datetime(&at).single()?;
        Some(match self.zone {
            Some(zone) => instant.with_timezone(&zone).naive_local(),
            None => instant.with_timezone(&Local).naive_local(),
        })
    }
}

/// Parse with the roll-forward policy and midnight as the default time.
pub fn parse_datetime(text: &str, today: NaiveDate) -> Option<NaiveDateTime> {
    DateParser::new(today, YearPolicy::RollForward)
        .parse(text)
        .map(|p| p.start_at(NaiveTime::MIN))
}

/// "July 20, 2025" using the same month table the parser reads.
pub fn format_month_day_year(date: NaiveDate) -> String {
    format!("{} {}, {}", MONTH_NAMES[date.month0() as usize], date.day(), date.year())
}

pub fn month_from_name(name: &str) -> Option<u32> {
    let lower = name.trim_end_matches('.').to_ascii_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTH_NAMES
        .iter()
        .position(|m| m.to_ascii_lowercase().starts_with(&lower[..3]))
        .map(|i| i as u32 + 1)
}

fn normalise(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    ORDINAL_RE.replace_all(&collapsed, "$1").into_owned()
}

// ── Extractors ────────────────────────────────────────────────────────────────

fn num<T: std::str::FromStr>(caps: &Captures<'_>, name: &str) -> Option<T> {
    caps.name(name)?.as_str().parse().ok()
}

fn month_group(caps: &Captures<'_>, name: &str) -> Option<u32> {
    month_from_name(caps.name(name)?.as_str())
}

/// True when the match is immediately followed by `:` (a clock time, not a day).
fn runs_into_time(caps: &Captures<'_>, text: &str) -> bool {
    caps.get(0)
        .map(|m| text[m.end()..].starts_with(':'))
        .unwrap_or(false)
}

fn extract_iso(p: &DateParser, caps: &Captures<'_>, _: &str) -> Option<DateMatch> {
    let start = NaiveDate::from_ymd_opt(num(caps, "y")?, num(caps, "m")?, num(caps, "d")?)?;
    let time = match (num::<u32>(caps, "h"), num::<u32>(caps, "min")) {
        (Some(h), Some(m)) => NaiveTime::from_hms_opt(h, m, num(caps, "s").unwrap_or(0)),
        _ => None,
    };

    let offset = caps.name("tz").and_then(|tz| utc_offset(tz.as_str()));
    if let (Some(time), Some(offset)) = (time, offset) {
        let local = p.to_wall_clock(start.and_time(time), offset)?;
        return Some(DateMatch { start: local.date(), end: None, time: Some(local.time()) });
    }
    Some(DateMatch { start, end: None, time })
}

/// `Z`, `+01:00` or `-0500` as a fixed offset.
fn utc_offset(text: &str) -> Option<FixedOffset> {
    if text.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0);
    }
    let sign = match text.chars().next()? {
        '+' => 1,
        '-' => -1,
        _ => return None,
    };
    let digits: String = text[1..].chars().filter(char::is_ascii_digit).collect();
    if digits.len() != 4 {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn extract_month_range(p: &DateParser, caps: &Captures<'_>, _: &str) -> Option<DateMatch> {
    let (m1, d1) = (month_group(caps, "m1")?, num(caps, "d1")?);
    let (m2, d2) = (month_group(caps, "m2")?, num(caps, "d2")?);
    let y1 = num::<i32>(caps, "y1");
    let y2 = num::<i32>(caps, "y2");

    let (start, end) = match (y1, y2) {
        (Some(a), Some(b)) => (NaiveDate::from_ymd_opt(a, m1, d1)?, NaiveDate::from_ymd_opt(b, m2, d2)?),
        (None, Some(b)) => {
            let end = NaiveDate::from_ymd_opt(b, m2, d2)?;
            let mut start = NaiveDate::from_ymd_opt(b, m1, d1)?;
            if start > end {
                start = NaiveDate::from_ymd_opt(b - 1, m1, d1)?;
            }
            (start, end)
        }
        (start_year, None) => {
            let start = p.date(start_year, m1, d1)?;
            let mut end = NaiveDate::from_ymd_opt(start.year(), m2, d2)?;
            if end < start {
                end = NaiveDate::from_ymd_opt(start.year() + 1, m2, d2)?;
            }
            (start, end)
        }
    };
    Some(DateMatch { start, end: Some(end), time: None })
}

fn extract_day_range(p: &DateParser, caps: &Captures<'_>, text: &str) -> Option<DateMatch> {
    if runs_into_time(caps, text) {
        return None;
    }
    let m = month_group(caps, "m")?;
    let (d1, d2): (u32, u32) = (num(caps, "d1")?, num(caps, "d2")?);
    if d2 < d1 {
        return None;
    }
    let start = p.date(num(caps, "y"), m, d1)?;
    let end = NaiveDate::from_ymd_opt(start.year(), m, d2)?;
    Some(DateMatch { start, end: Some(end), time: None })
}

/// "20-22 July 2025", the day-first form UK listings use.
fn extract_day_first_range(p: &DateParser, caps: &Captures<'_>, _: &str) -> Option<DateMatch> {
    let m = month_group(caps, "m")?;
    let (d1, d2): (u32, u32) = (num(caps, "d1")?, num(caps, "d2")?);
    if d2 < d1 {
        return None;
    }
    let start = p.date(num(caps, "y"), m, d1)?;
    let end = NaiveDate::from_ymd_opt(start.year(), m, d2)?;
    Some(DateMatch { start, end: Some(end), time: None })
}

fn extract_numeric(_: &DateParser, caps: &Captures<'_>, _: &str) -> Option<DateMatch> {
    let (a, b): (u32, u32) = (num(caps, "a")?, num(caps, "b")?);
    let raw_year: i32 = num(caps, "y")?;
    let year = if raw_year < 100 { 2000 + raw_year } else { raw_year };
    // Month first unless the first field cannot be a month.
    let (month, day) = if a > 12 && b <= 12 { (b, a) } else { (a, b) };
    let start = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(DateMatch { start, end: None, time: None })
}

fn extract_month_day(p: &DateParser, caps: &Captures<'_>, text: &str) -> Option<DateMatch> {
    if runs_into_time(caps, text) {
        return None;
    }
    let start = p.date(num(caps, "y"), month_group(caps, "m")?, num(caps, "d")?)?;
    Some(DateMatch { start, end: None, time: None })
}

fn extract_day_month_year(p: &DateParser, caps: &Captures<'_>, text: &str) -> Option<DateMatch> {
    let year = num::<i32>(caps, "y");
    if year.is_none() {
        // "3 July 20" reads better as July 20; leave it to the month-day rule.
        let rest = caps.get(0).map(|m| &text[m.end()..]).unwrap_or("");
        if rest.trim_start().starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
    }
    let start = p.date(year, month_group(caps, "m")?, num(caps, "d")?)?;
    Some(DateMatch { start, end: None, time: None })
}

fn extract_relative(p: &DateParser, caps: &Captures<'_>, _: &str) -> Option<DateMatch> {
    let word = caps.name("rel")?.as_str().to_ascii_lowercase();
    let start = match word.as_str() {
        "today" | "tonight" => p.today,
        "tomorrow" => p.today + Duration::days(1),
        other => {
            let (_, target) = WEEKDAY_NAMES.iter().find(|(name, _)| *name == other)?;
            let ahead = (7 + target.num_days_from_monday() - p.today.weekday().num_days_from_monday()) % 7;
            p.today + Duration::days(i64::from(ahead))
        }
    };
    Some(DateMatch { start, end: None, time: None })
}

// ── Time of day ───────────────────────────────────────────────────────────────

fn to_time(hour: u32, minute: u32, meridiem: Option<&str>) -> Option<NaiveTime> {
    let meridiem = meridiem.map(|m| m.replace('.', "").to_ascii_lowercase());
    let hour = match meridiem.as_deref() {
        Some(_) if !(1..=12).contains(&hour) => return None,
        Some("pm") if hour < 12 => hour + 12,
        Some("am") if hour == 12 => 0,
        _ => hour,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn opposite_meridiem(meridiem: &str) -> &'static str {
    if meridiem.to_ascii_lowercase().starts_with('a') { "pm" } else { "am" }
}

/// Start (and optional end) time of day found anywhere in `text`.
pub fn parse_time_of_day(text: &str) -> (Option<NaiveTime>, Option<NaiveTime>) {
    if let Some(caps) = TIME_RANGE_RE.captures(text) {
        let p2 = caps.name("p2").map(|m| m.as_str());
        let end = num(&caps, "h2").and_then(|h| to_time(h, num(&caps, "m2").unwrap_or(0), p2));
        let start = num::<u32>(&caps, "h1").and_then(|h| {
            let minute = num(&caps, "m1").unwrap_or(0);
            match caps.name("p1") {
                Some(p1) => to_time(h, minute, Some(p1.as_str())),
                // "7 - 9pm" shares the meridiem, "11 - 2pm" crosses noon.
                None => to_time(h, minute, p2)
                    .filter(|start| end.is_none_or(|end| *start <= end))
                    .or_else(|| to_time(h, minute, p2.map(opposite_meridiem))),
            }
        });
        if let (Some(start), Some(end)) = (start, end) {
            return (Some(start), Some(end));
        }
    }

    for caps in TIME_RE.captures_iter(text) {
        let time = num(&caps, "h")
            .and_then(|h| to_time(h, num(&caps, "m").unwrap_or(0), caps.name("p").map(|m| m.as_str())));
        if time.is_some() {
            return (time, None);
        }
    }

    let named = NAMED_TIME_RE.captures(text).and_then(|caps| {
        match caps.get(1)?.as_str().to_ascii_lowercase().as_str() {
            "noon" => NaiveTime::from_hms_opt(12, 0, 0),
            _ => Some(NaiveTime::MIN),
        }
    });
    (named, None)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
