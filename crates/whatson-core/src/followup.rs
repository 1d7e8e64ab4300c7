use std::sync::LazyLock;

use regex::Regex;

use whatson_schema::{present, ConversationTurn, Role};

use crate::recover;

/// Detail-seeking words that mark a very short utterance as a follow-up.
const DETAIL_WORDS: [&str; 22] = [
    "date", "time", "location", "place", "contact", "number", "phone", "email", "website",
    "address", "price", "cost", "when", "where", "who", "what", "which", "how", "their", "they",
    "its", "the",
];

/// Vocabulary that signals the recent conversation was about an event.
const EVENT_KEYWORDS: [&str; 7] = [
    "event", "festival", "concert", "show", "stadium", "venue", "location",
];

static ABOUT_EVENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(tell|give|show|what).*(more|details|info|about)").unwrap());

/// Sentence-start shapes of a follow-up question, checked last. Kept as a
/// list so coverage can be enumerated.
static FOLLOW_UP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^(which|what|when|where|who|whose)\s+(date|time|location|place|contact|number|price|cost|website|email|phone|name)",
        r"^(the\s+)?(date|time|location|place|contact|number|price|cost|website|email|phone|address|name)\b",
        r"^what\s+(is|are)\s+(the\s+)?(event\s+)?(name|date|time|location|place|contact|organizer|website)",
        r"^(their|its|his|her|they)\s+",
        r"^(contact|phone|email|website|address|price|cost|date|time|location|place|name|organizer)",
        r"^(how much|how long|how many|how far)",
        r"(contact|phone)\s*(number|details|info)?$",
        r"^(when|where|who|what time|what date|what name)",
        r"^(tell|give|show).*(more|details|info|about)",
        r"more\s+about",
        r"about\s+(the|this|that|it)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static TIME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(\d{1,2}\s*(?:am|pm)\s*(?:to|-)?\s*\d{1,2}\s*(?:am|pm))",
        r"(?i)(\d{1,2}:\d{2}\s*(?:am|pm)?\s*(?:to|-)?\s*\d{1,2}:\d{2}\s*(?:am|pm)?)",
        r"(?i)(\d{1,2}\s*(?:am|pm)\s*to\s*\d{1,2}\s*(?:am|pm))",
        r"(?i)(from\s*(?:\d{1,2}\s*(?:am|pm)|\d{1,2}:\d{2})\s*to\s*(?:\d{1,2}\s*(?:am|pm)|\d{1,2}:\d{2}))",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static CONTACT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)contact.*?([a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,})",
        r"(?i)email.*?([a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,})",
        r"(?i)phone.*?(\d{10,})",
        r"(?i)call.*?(\d{10,})",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static LOCATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bat\s+([A-Za-z][A-Za-z\s]+)",
        r"(?i)happening\s+(?:at|in)\s+([A-Za-z][A-Za-z\s]+)",
        r"(?i)(?:located|takes place)\s+(?:at|in)\s+([A-Za-z][A-Za-z\s]+)",
        r"(?i)(?:venue|location|place):\s*([A-Za-z][A-Za-z\s]+)",
        r"(?i)(?:at|venue|location|place)\s+([A-Za-z][A-Za-z\s]*(?:cafe|stadium|hall|center|theater|park|venue|arena|auditorium|ground|hotel|restaurant|club|bar|studio|gallery|mall|plaza|square|garden|beach|resort|academy|institute|school|college|university|library|museum|theatre|cinema|field|grounds?))",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static AT_CAPITALIZED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bat\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,2})").unwrap());
static AT_CAPITALIZED_BROAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bat\s+([A-Z][A-Za-z]+(?:\s+[A-Z][A-Za-z]+)*)").unwrap());

static DATE_MENTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(january|february|march|april|may|june|july|august|september|october|november|december)\s+\d{1,2}(?:st|nd|rd|th)?",
        r"(?i)\d{1,2}(?:st|nd|rd|th)?\s+(january|february|march|april|may|june|july|august|september|october|november|december)",
        r"(?i)on\s+\w+\s+\d{1,2}",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static TELL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"tell.*about",
        r"tell.*that",
        r"tell.*it",
        r"tell.*this",
        r"say.*about",
        r"can.*tell",
        r"could.*tell",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Whether the utterance depends on a prior turn for its meaning. Any of:
/// a very short detail-seeking question in a non-empty conversation, an
/// "about"-style request when the recent history mentions an event, or a
/// known follow-up sentence shape.
pub fn is_follow_up(utterance: &str, history: &[ConversationTurn]) -> bool {
    let q = utterance.trim().to_lowercase();

    let word_count = q.split_whitespace().count();
    if word_count <= 3 && !history.is_empty() && DETAIL_WORDS.iter().any(|w| q.contains(w)) {
        tracing::debug!(event = "follow_up_detected", route = "short_detail");
        return true;
    }

    if !history.is_empty() {
        let recent: String = history
            .iter()
            .rev()
            .take(6)
            .map(|t| t.content.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        let has_event_reference = EVENT_KEYWORDS.iter().any(|k| recent.contains(k));
        let asks_about_event = q.contains("tell me more")
            || q.contains("more about")
            || q.contains("about the")
            || q.contains("about this")
            || q.contains("about that")
            || q.contains("about")
            || ABOUT_EVENT_RE.is_match(&q);
        if has_event_reference && asks_about_event {
            tracing::debug!(event = "follow_up_detected", route = "event_reference");
            return true;
        }
    }

    if FOLLOW_UP_PATTERNS.iter().any(|p| p.is_match(&q)) {
        tracing::debug!(event = "follow_up_detected", route = "pattern");
        return true;
    }

    false
}

/// Answer a follow-up directly from the in-memory history. Scans newest
/// first: structured sources win over text extraction. Never touches
/// storage; returns `None` when nothing convincing is found, at which point
/// the orchestrator falls through to fresh retrieval.
pub fn extract_answer(utterance: &str, history: &[ConversationTurn]) -> Option<String> {
    if history.len() < 2 {
        return None;
    }
    let q = utterance.trim().to_lowercase();

    if let Some(answer) = extract_from_sources(&q, history) {
        return Some(answer);
    }
    extract_from_text(&q, history)
}

fn extract_from_sources(q: &str, history: &[ConversationTurn]) -> Option<String> {
    for turn in history.iter().rev() {
        if turn.role != Role::Assistant || turn.sources.is_empty() {
            continue;
        }
        let event = &turn.sources[0];

        if q.contains("name") && (q.contains("event") || q.contains("what")) {
            if let Some(name) = present(&event.name) {
                return Some(format!("The event name is {name}."));
            }
        }
        if q.contains("organizer") || (q.contains("who") && q.contains("organize")) {
            if let Some(organizer) = present(&event.organizer) {
                return Some(format!("The event is organized by {organizer}."));
            }
        }
        if q.contains("date") || (q.contains("when") && !q.contains("time")) {
            if let Some(date) = present(&event.date_raw) {
                return Some(format!("The event is on {date}."));
            }
        }
        if q.contains("time") {
            if let Some(time) = present(&event.time) {
                return Some(format!("The event time is {time}."));
            }
        }
        if q.contains("location") || q.contains("where") || q.contains("venue") || q.contains("place")
        {
            let location = recover::recover_location(&event.location, Some(event));
            if let Some(location) = present(&location) {
                return Some(format!("The event is happening at {location}."));
            }
        }
        if q.contains("website") || q.contains("url") || q.contains("link") {
            if let Some(website) = present(&event.website) {
                return Some(format!("The event website is {website}."));
            }
        }
        if q.contains("entry")
            || q.contains("ticket")
            || q.contains("price")
            || q.contains("cost")
            || q.contains("free")
        {
            if let Some(entry) = present(&event.entry_type) {
                return Some(format!("The event entry is {entry}."));
            }
        }
    }
    None
}

fn extract_from_text(q: &str, history: &[ConversationTurn]) -> Option<String> {
    for turn in history.iter().rev() {
        if turn.role != Role::Assistant || turn.content.is_empty() {
            continue;
        }
        let content = &turn.content;

        // "tell me about that" echoes the whole prior reply back.
        let has_tell_pattern = TELL_PATTERNS.iter().any(|p| p.is_match(q));
        let has_referent =
            q.contains("about") || q.contains("that") || q.contains("it") || q.contains("this");
        if (q.contains("tell") || q.contains("say") || has_tell_pattern)
            && has_referent
            && content.chars().count() > 30
        {
            return Some(content.clone());
        }

        if q.contains("time") || (q.contains("when") && !q.contains("date")) {
            for pattern in TIME_PATTERNS.iter() {
                if let Some(m) = pattern.find(content) {
                    return Some(format!("The event is scheduled {}.", m.as_str()));
                }
            }
        }

        if q.contains("contact") || q.contains("organizer") {
            for pattern in CONTACT_PATTERNS.iter() {
                if let Some(caps) = pattern.captures(content) {
                    return Some(format!("You can contact them at {}.", &caps[1]));
                }
            }
        }

        if q.contains("where") || q.contains("location") || q.contains("venue") || q.contains("place")
        {
            if let Some(answer) = extract_location_from_text(content) {
                return Some(answer);
            }
        }

        if q.contains("date") {
            for pattern in DATE_MENTION_PATTERNS.iter() {
                if let Some(m) = pattern.find(content) {
                    return Some(format!("The event is on {}.", m.as_str()));
                }
            }
        }
    }
    None
}

const LOCATION_SKIP_WORDS: [&str; 17] = [
    "the", "a", "an", "at", "in", "on", "for", "to", "from", "and", "or", "but", "it", "is",
    "was", "are", "were",
];

fn extract_location_from_text(content: &str) -> Option<String> {
    for pattern in LOCATION_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(content) {
            let location = tidy_location(&caps[1]);
            if location.chars().count() > 2
                && !LOCATION_SKIP_WORDS.contains(&location.to_lowercase().as_str())
            {
                return Some(format!("The event is happening at {location}."));
            }
        }
    }
    for pattern in [&*AT_CAPITALIZED_RE, &*AT_CAPITALIZED_BROAD_RE] {
        if let Some(caps) = pattern.captures(content) {
            let location = tidy_location(&caps[1]);
            if location.chars().count() > 3 {
                return Some(format!("The event is happening at {location}."));
            }
        }
    }
    None
}

/// Cut a captured phrase at the first sentence break and trim.
fn tidy_location(raw: &str) -> String {
    raw.split(['.', ',', '!', '?', ';', ':'])
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}
