use chrono::NaiveDateTime;
use std::time::Instant;
use tracing::info;

/// Logs how long a command took when dropped.
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(label: &'static str) -> Self {
        info!("⏱  {}…", label);
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("⏱  {} took {:.2?}", self.label, self.start.elapsed());
    }
}

/// Thousands separators for counts in the stats table.
pub fn fmt_count(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `2025-07-20 20:00`, or a dash for undated events.
pub fn fmt_when(at: Option<NaiveDateTime>) -> String {
    at.map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "—".to_string())
}

/// Clip a table cell to `width` chars.
pub fn clip(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_fmt_count() {
        assert_eq!(fmt_count(1_234_567), "1,234,567");
        assert_eq!(fmt_count(0), "0");
        assert_eq!(fmt_count(-42_000), "-42,000");
        assert_eq!(fmt_count(999), "999");
    }

    #[test]
    fn test_fmt_when_and_clip() {
        let at = NaiveDate::from_ymd_opt(2025, 7, 20).unwrap().and_hms_opt(20, 0, 0);
        assert_eq!(fmt_when(at), "2025-07-20 20:00");
        assert_eq!(fmt_when(None), "—");
        assert_eq!(clip("Montreal Science Centre", 10), "Montreal …");
        assert_eq!(clip("AGO", 10), "AGO");
    }
}
