use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An externally sourced event document. Records come out of the ingestion
/// pipeline (poster OCR), so any field may be empty, `"N/A"`, or noisy.
/// The query pipeline only ever reads and scores them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub organizer: String,
    /// Free-text date as captured from the source, possibly degenerate
    /// (e.g. just `"th"` left over from an ordinal suffix).
    #[serde(default)]
    pub date_raw: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub entry_type: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub highlights: Vec<String>,
    /// Raw OCR lines from the source poster, kept for noise recovery.
    #[serde(default)]
    pub raw_ocr: Vec<String>,
    #[serde(default)]
    pub full_text: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl EventRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Dedup key: lowercase with non-alphanumerics stripped. Empty when the
    /// record has no usable name.
    pub fn normalized_name(&self) -> String {
        self.name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase()
    }

    /// All OCR lines joined into one searchable string.
    pub fn ocr_text(&self) -> String {
        self.raw_ocr.join(" ")
    }
}

/// Treat empty strings and the literal `"N/A"` as absent, matching the
/// source corpus convention.
pub fn present(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a") {
        None
    } else {
        Some(trimmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a conversation. Assistant turns carry the event records they
/// surfaced so follow-up questions can be answered without a new search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<EventRecord>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant_with_sources(
        content: impl Into<String>,
        sources: Vec<EventRecord>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources,
            timestamp: Utc::now(),
        }
    }
}

/// The pipeline's only output: answer text plus the event records it is
/// grounded on (empty for conversational replies).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<EventRecord>,
}

impl ChatReply {
    pub fn text_only(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            sources: Vec::new(),
        }
    }
}

/// Authenticated identity attached to a request, when the session layer has
/// one. Skips the name-capture flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub display_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_filters_na_and_empty() {
        assert_eq!(present("Ashoka mall"), Some("Ashoka mall"));
        assert_eq!(present("  6 PM "), Some("6 PM"));
        assert_eq!(present(""), None);
        assert_eq!(present("   "), None);
        assert_eq!(present("N/A"), None);
        assert_eq!(present("n/a"), None);
    }

    #[test]
    fn normalized_name_strips_punctuation_and_case() {
        let record = EventRecord::new("1", "Holi - Colour Fest!");
        assert_eq!(record.normalized_name(), "holicolourfest");
    }

    #[test]
    fn normalized_name_empty_for_nameless_record() {
        let record = EventRecord::new("1", "");
        assert!(record.normalized_name().is_empty());
    }

    #[test]
    fn event_record_roundtrips_through_json() {
        let mut record = EventRecord::new("abc", "Food Truck Festival");
        record.highlights = vec!["live music".into()];
        record.embedding = Some(vec![0.1, 0.2]);

        let json = serde_json::to_string(&record).unwrap();
        let parsed: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, "abc");
        assert_eq!(parsed.highlights.len(), 1);
        assert_eq!(parsed.embedding.as_deref(), Some(&[0.1_f32, 0.2][..]));
    }

    #[test]
    fn turn_constructors_set_roles() {
        let user = ConversationTurn::user("hi");
        let assistant = ConversationTurn::assistant("hello");
        assert_eq!(user.role, Role::User);
        assert_eq!(assistant.role, Role::Assistant);
        assert!(assistant.sources.is_empty());
    }
}
