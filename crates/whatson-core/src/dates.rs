use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use whatson_schema::{present, EventRecord};

use crate::clock::Clock;

/// Outcome of date parsing. `Failed` is an explicit marker, distinguishable
/// from "not attempted" — parsing never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedDate {
    Date(NaiveDate),
    Failed,
}

impl DerivedDate {
    pub fn date(self) -> Option<NaiveDate> {
        match self {
            DerivedDate::Date(d) => Some(d),
            DerivedDate::Failed => None,
        }
    }

    pub fn is_failed(self) -> bool {
        matches!(self, DerivedDate::Failed)
    }
}

/// Month lookup ordered full-name-first so that containment scanning prefers
/// "january" over "jan" and earlier months over later ones, mirroring how
/// the source corpus resolves ambiguous strings.
const MONTHS: [(&str, u32); 23] = [
    ("january", 1),
    ("jan", 1),
    ("february", 2),
    ("feb", 2),
    ("march", 3),
    ("mar", 3),
    ("april", 4),
    ("apr", 4),
    ("may", 5),
    ("june", 6),
    ("jun", 6),
    ("july", 7),
    ("jul", 7),
    ("august", 8),
    ("aug", 8),
    ("september", 9),
    ("sep", 9),
    ("october", 10),
    ("oct", 10),
    ("november", 11),
    ("nov", 11),
    ("december", 12),
    ("dec", 12),
];

const MONTH_ALT: &str = "january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sep|oct|nov|dec";

fn month_number(name: &str) -> Option<u32> {
    let name = name.to_lowercase();
    MONTHS.iter().find(|(m, _)| *m == name).map(|(_, n)| *n)
}

fn first_month_mentioned(text: &str) -> Option<u32> {
    MONTHS
        .iter()
        .find(|(name, _)| text.contains(name))
        .map(|(_, n)| *n)
}

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{1,2}").unwrap());
static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4}").unwrap());
// Day ranges only: both sides must be standalone 1-2 digit numbers, so a
// "25, 2027" year suffix does not read as a range.
static RANGE_SEP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\D)\d{1,2}(?:st|nd|rd|th)?\s*[&,/-]\s*\d{1,2}(?:\D|$)").unwrap()
});

static MONTH_DAY_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)({MONTH_ALT})\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})"
    ))
    .unwrap()
});
static DAY_MONTH_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(\d{{1,2}})(?:st|nd|rd|th)?\s+({MONTH_ALT})\s+(\d{{4}})"
    ))
    .unwrap()
});
static DAY_MONTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)(\d{{1,2}})(?:st|nd|rd|th)?\s+({MONTH_ALT})")).unwrap()
});
static MONTH_DAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)({MONTH_ALT})\s+(\d{{1,2}})(?:st|nd|rd|th)?")).unwrap()
});
static MULTI_DAY_MONTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(\d{{1,2}})(?:st|nd|rd|th)?\s*[&,]\s*(\d{{1,2}})(?:st|nd|rd|th)?\s+({MONTH_ALT})"
    ))
    .unwrap()
});
static MONTH_MULTI_DAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)({MONTH_ALT})\s+(\d{{1,2}})(?:st|nd|rd|th)?\s*[&,]\s*(\d{{1,2}})(?:st|nd|rd|th)?"
    ))
    .unwrap()
});
static DASH_DAYS_MONTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)(\d{{1,2}})[-/]\s*(\d{{1,2}})\s+({MONTH_ALT})")).unwrap()
});
static MONTH_DASH_DAYS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)({MONTH_ALT})\s+(\d{{1,2}})[-/]\s*(\d{{1,2}})")).unwrap()
});
static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})-(\d{1,2})-(\d{1,2})").unwrap());
static SLASH_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})/(\d{1,2})/(\d{4})").unwrap());

/// Ordered recovery patterns for degenerate stored dates (`"th"`, `""`); a
/// record's free text is scanned with each in turn and the first whole match
/// wins. Kept as a list so coverage can be enumerated.
static DATE_RECOVERY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"(?i)(\d{{1,2}})(?:st|nd|rd|th)?\s*[&,]\s*(\d{{1,2}})(?:st|nd|rd|th)?\s+({MONTH_ALT})"),
        format!(r"(?i)({MONTH_ALT})\s+(\d{{1,2}})(?:st|nd|rd|th)?\s*[&,]\s*(\d{{1,2}})(?:st|nd|rd|th)?"),
        format!(r"(?i)(\d{{1,2}})[-/]\s*(\d{{1,2}})\s+({MONTH_ALT})"),
        format!(r"(?i)({MONTH_ALT})\s+(\d{{1,2}})[-/]\s*(\d{{1,2}})"),
        format!(r"(?i)(\d{{1,2}})(?:st|nd|rd|th)?\s+({MONTH_ALT})"),
        format!(r"(?i)({MONTH_ALT})\s+(\d{{1,2}})(?:st|nd|rd|th)?"),
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

pub fn ordinal_suffix(day: u32) -> &'static str {
    if (11..=13).contains(&day) {
        return "th";
    }
    match day % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}

/// Recover a displayable date string when the stored one is degenerate
/// (a bare ordinal suffix, one or two characters, `N/A`). Scans the owning
/// record's full text with the recovery patterns, then constructs a
/// `"7th February"`-style string from OCR numbers and month names. Returns
/// the input unchanged when it looks valid or nothing can be recovered.
pub fn clean_date_string(raw: &str, owning: Option<&EventRecord>) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a") {
        return raw.to_string();
    }

    let degenerate = trimmed.eq_ignore_ascii_case("th") || trimmed.chars().count() <= 2;
    if !degenerate {
        return raw.to_string();
    }

    if let Some(record) = owning {
        if !record.full_text.is_empty() {
            for pattern in DATE_RECOVERY_PATTERNS.iter() {
                if let Some(m) = pattern.find(&record.full_text) {
                    return m.as_str().to_string();
                }
            }
        }

        let ocr = record.ocr_text();
        if !ocr.is_empty() {
            let ocr_lower = ocr.to_lowercase();
            let day = DIGITS_RE
                .find_iter(&ocr)
                .filter_map(|m| m.as_str().parse::<u32>().ok())
                .find(|n| (1..=31).contains(n));
            let month = MONTHS
                .iter()
                .find(|(name, _)| ocr_lower.contains(name))
                .map(|(name, _)| *name);
            if let (Some(day), Some(month)) = (day, month) {
                let mut chars = month.chars();
                let capitalized = match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                };
                return format!("{day}{} {capitalized}", ordinal_suffix(day));
            }
        }
    }

    trimmed.to_string()
}

/// Parse a heterogeneous, possibly OCR-noisy date string into a concrete
/// calendar date. Year-bearing shapes are tried first; everything else goes
/// through a lenient day+month pairing (source dates are frequently
/// malformed), then the positional no-year patterns. A missing year
/// defaults to the clock's current year. Never panics.
pub fn parse(raw: &str, owning: Option<&EventRecord>, clock: &dyn Clock) -> DerivedDate {
    let cleaned = clean_date_string(raw, owning);
    let trimmed = cleaned.trim();
    if present(trimmed).is_none() || trimmed.chars().count() <= 2 {
        return DerivedDate::Failed;
    }

    let normalized = trimmed
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let current_year = clock.today().year();

    // Year-bearing shapes disambiguate before the lenient pass, otherwise a
    // stray "25, 2027" would pair its day with the current year.
    if YEAR_RE.is_match(&normalized) {
        if let Some(caps) = MONTH_DAY_YEAR_RE.captures(&normalized) {
            if let Some(date) = ymd(&caps[3], month_number(&caps[1]), &caps[2]) {
                return DerivedDate::Date(date);
            }
        }
        if let Some(caps) = DAY_MONTH_YEAR_RE.captures(&normalized) {
            if let Some(date) = ymd(&caps[3], month_number(&caps[2]), &caps[1]) {
                return DerivedDate::Date(date);
            }
        }
        if let Some(caps) = ISO_DATE_RE.captures(&normalized) {
            if let Some(date) = ymd(&caps[1], caps[2].parse().ok(), &caps[3]) {
                return DerivedDate::Date(date);
            }
        }
        if let Some(caps) = SLASH_DATE_RE.captures(&normalized) {
            let a: Option<u32> = caps[1].parse().ok();
            let b: Option<u32> = caps[2].parse().ok();
            if let (Some(a), Some(b)) = (a, b) {
                // A leading group over 12 cannot be a month, so read day-first.
                let (month, day) = if a > 12 { (b, a) } else { (a, b) };
                if let Some(date) = ymd(&caps[3], Some(month), &day.to_string()) {
                    return DerivedDate::Date(date);
                }
            }
        }
    }

    // Lenient pass: any 1-2 digit day plus any month name, anywhere.
    let valid_days: Vec<u32> = DIGITS_RE
        .find_iter(&normalized)
        .filter_map(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| (1..=31).contains(n))
        .collect();
    if let (Some(&first_day), Some(month)) =
        (valid_days.first(), first_month_mentioned(&normalized))
    {
        // Multi-date strings resolve to the earliest listed day.
        let day = if RANGE_SEP_RE.is_match(&normalized) {
            valid_days
                .get(1)
                .map_or(first_day, |&second| first_day.min(second))
        } else {
            first_day
        };
        if let Some(date) = NaiveDate::from_ymd_opt(current_year, month, day) {
            return DerivedDate::Date(date);
        }
    }

    for (re, month_idx, day_idx) in [
        (&DAY_MONTH_RE, 2, 1),
        (&MONTH_DAY_RE, 1, 2),
        (&MULTI_DAY_MONTH_RE, 3, 1),
        (&MONTH_MULTI_DAY_RE, 1, 2),
        (&DASH_DAYS_MONTH_RE, 3, 1),
        (&MONTH_DASH_DAYS_RE, 1, 2),
    ] {
        if let Some(caps) = re.captures(&normalized) {
            if let Some(date) = current_year_date(
                current_year,
                month_number(&caps[month_idx]),
                &caps[day_idx],
            ) {
                return DerivedDate::Date(date);
            }
        }
    }

    tracing::debug!(event = "date_parse_failed", raw = trimmed, "no date pattern matched");
    DerivedDate::Failed
}

fn ymd(year: &str, month: Option<u32>, day: &str) -> Option<NaiveDate> {
    let year: i32 = year.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month?, day)
}

fn current_year_date(year: i32, month: Option<u32>, day: &str) -> Option<NaiveDate> {
    let day: u32 = day.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month?, day)
}
