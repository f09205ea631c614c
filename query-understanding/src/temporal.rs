use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// A resolved date window. `label` preserves the phrase it came from for
/// diagnostics and prompt context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub label: String,
}

fn relative_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"(?i)\b(?:last|past|previous)\s+(\d+)\s+(day|week|month|year)s?\b")
            .expect("valid regex")
    })
}

fn since_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"(?i)\bsince\s+(january|february|march|april|may|june|july|august|september|october|november|december)(?:\s+(\d{4}))?\b")
            .expect("valid regex")
    })
}

fn between_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"(?i)\bbetween\s+(\d{4}-\d{2}-\d{2})\s+and\s+(\d{4}-\d{2}-\d{2})\b")
            .expect("valid regex")
    })
}

fn literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("valid regex")
    })
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"(?i)\bin\s+(19\d{2}|20\d{2})\b").expect("valid regex")
    })
}

/// Extracts a date window from relative phrases, "since <month>",
/// "between X and Y", and date literals. Relative phrases resolve against
/// `now`. Returns `None` when the query carries no temporal expression.
pub fn parse_window(query: &str, now: DateTime<Utc>) -> Option<TemporalWindow> {
    if let Some(caps) = relative_re().captures(query) {
        let amount: i64 = caps.get(1)?.as_str().parse().ok()?;
        let unit = caps.get(2)?.as_str().to_ascii_lowercase();
        let from = match unit.as_str() {
            "day" => now - Duration::days(amount),
            "week" => now - Duration::weeks(amount),
            "month" => now
                .checked_sub_months(Months::new(u32::try_from(amount).ok()?))
                .unwrap_or(now),
            "year" => now
                .checked_sub_months(Months::new(u32::try_from(amount.checked_mul(12)?).ok()?))
                .unwrap_or(now),
            _ => return None,
        };
        return Some(TemporalWindow {
            from: Some(from),
            to: Some(now),
            label: caps.get(0)?.as_str().to_owned(),
        });
    }

    if let Some(caps) = since_re().captures(query) {
        let month = month_number(caps.get(1)?.as_str())?;
        let year = caps
            .get(2)
            .and_then(|m| m.as_str().parse::<i32>().ok())
            .unwrap_or_else(|| {
                // A bare month refers to the most recent occurrence.
                if month > now.month() {
                    now.year() - 1
                } else {
                    now.year()
                }
            });
        let from = Utc
            .with_ymd_and_hms(year, month, 1, 0, 0, 0)
            .single()?;
        return Some(TemporalWindow {
            from: Some(from),
            to: Some(now),
            label: caps.get(0)?.as_str().to_owned(),
        });
    }

    if let Some(caps) = between_re().captures(query) {
        let from = parse_date_literal(caps.get(1)?.as_str())?;
        let to_day = parse_date_literal(caps.get(2)?.as_str())?;
        return Some(TemporalWindow {
            from: Some(from),
            to: Some(to_day + Duration::days(1) - Duration::seconds(1)),
            label: caps.get(0)?.as_str().to_owned(),
        });
    }

    if let Some(caps) = year_re().captures(query) {
        let year: i32 = caps.get(1)?.as_str().parse().ok()?;
        let from = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
        let to = Utc.with_ymd_and_hms(year, 12, 31, 23, 59, 59).single()?;
        return Some(TemporalWindow {
            from: Some(from),
            to: Some(to),
            label: caps.get(0)?.as_str().to_owned(),
        });
    }

    if let Some(caps) = literal_re().captures(query) {
        let date = parse_date_literal(caps.get(0)?.as_str())?;
        return Some(TemporalWindow {
            from: Some(date),
            to: Some(date + Duration::days(1) - Duration::seconds(1)),
            label: caps.get(0)?.as_str().to_owned(),
        });
    }

    None
}

fn parse_date_literal(raw: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.to_ascii_lowercase().as_str() {
        "january" => 1,
        "february" => 2,
        "march" => 3,
        "april" => 4,
        "may" => 5,
        "june" => 6,
        "july" => 7,
        "august" => 8,
        "september" => 9,
        "october" => 10,
        "november" => 11,
        "december" => 12,
        _ => return None,
    };
    Some(month)
}
