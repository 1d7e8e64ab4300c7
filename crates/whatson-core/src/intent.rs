use std::sync::LazyLock;

use chrono::Datelike;
use regex::Regex;

use whatson_schema::{ChatReply, ConversationTurn};
use whatson_store::SortOrder;

use crate::dates;
use crate::retrieval::HybridRetriever;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSort {
    Default,
    Latest,
    Popular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBucket {
    Today,
    Tomorrow,
    Week,
    Future,
}

/// Classified purpose of a single utterance. `NameRequest` and `NameCapture`
/// are produced by the orchestrator's name flow, not by rule matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    NameRequest,
    NameCapture,
    DateQuestion,
    ListEvents(ListSort),
    DateFilteredEvents(DateBucket),
    FreeEvents,
    Help,
    Identity,
    NoMatch,
}

static GREETING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(hi+|hello|hey+|greetings|good (?:morning|afternoon|evening)|sup|what'?s up|wassup|yo|namaste|namaskar)(\s+\w+)?$",
    )
    .unwrap()
});
static HELP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^what\s+(can|do)\s+(you|u)\b").unwrap());

/// Bare calendar-question forms, matched against the punctuation-stripped
/// utterance.
const SIMPLE_DATE_FORMS: [&str; 12] = [
    "date",
    "today",
    "tdy",
    "what date",
    "what day",
    "tdy date",
    "what is date",
    "whats date",
    "what is tdy",
    "whats tdy",
    "what date tdy",
    "what is date tdy",
];

const LISTING_PHRASES: [&str; 6] = [
    "all events",
    "show events",
    "any events",
    "latest events",
    "popular events",
    "all available",
];

struct RuleCtx<'a> {
    /// Lowercased, trimmed utterance.
    q: String,
    /// `q` with punctuation stripped and whitespace collapsed.
    q_clean: String,
    history: &'a [ConversationTurn],
    assistant_name: String,
}

impl RuleCtx<'_> {
    fn mentions_event_vocab(&self) -> bool {
        self.q.contains("event") || self.q.contains("happening") || self.q.contains("going on")
    }
}

/// Rules in strict priority order; the first to produce an intent wins.
/// Kept as data so the priority contract is testable on its own.
const RULES: [(&str, fn(&RuleCtx) -> Option<Intent>); 8] = [
    ("today_events", rule_today_events),
    ("date_question", rule_date_question),
    ("greeting", rule_greeting),
    ("listing", rule_listing),
    ("date_bucket", rule_date_bucket),
    ("free_events", rule_free_events),
    ("help", rule_help),
    ("identity", rule_identity),
];

fn rule_today_events(ctx: &RuleCtx) -> Option<Intent> {
    let q = &ctx.q;
    if !(q.contains("today") || q.contains("tdy")) {
        return None;
    }
    if q.contains("event") {
        return Some(Intent::DateFilteredEvents(DateBucket::Today));
    }
    let asks = q.contains("what") || q.contains("which") || q.contains("show");
    let happening = q.contains("happening") || q.contains("going on");
    (asks && happening).then_some(Intent::DateFilteredEvents(DateBucket::Today))
}

fn rule_date_question(ctx: &RuleCtx) -> Option<Intent> {
    if ctx.mentions_event_vocab() {
        return None;
    }
    if SIMPLE_DATE_FORMS.contains(&ctx.q_clean.as_str()) {
        return Some(Intent::DateQuestion);
    }
    let q = &ctx.q;
    let has_date_word =
        q.contains("date") || q.contains("today") || q.contains("tdy") || q.contains("day");
    let has_question_word = q.contains("what") || q.contains("tell") || q.contains("show");
    (has_date_word && has_question_word).then_some(Intent::DateQuestion)
}

fn rule_greeting(ctx: &RuleCtx) -> Option<Intent> {
    GREETING_RE.is_match(&ctx.q).then_some(Intent::Greeting)
}

fn rule_listing(ctx: &RuleCtx) -> Option<Intent> {
    let listing = LISTING_PHRASES.iter().any(|p| ctx.q.contains(p))
        || ctx.q_clean == "events"
        || (ctx.q_clean == "yes" && !ctx.history.is_empty());
    if !listing {
        return None;
    }
    let sort = if ctx.q.contains("latest") {
        ListSort::Latest
    } else if ctx.q.contains("popular") {
        ListSort::Popular
    } else {
        ListSort::Default
    };
    Some(Intent::ListEvents(sort))
}

fn rule_date_bucket(ctx: &RuleCtx) -> Option<Intent> {
    let q = &ctx.q;
    // "upcoming" first so "upcoming events this week" is not captured by
    // the week rule.
    if q.contains("upcoming") {
        return Some(Intent::DateFilteredEvents(DateBucket::Future));
    }
    if q.contains("week") {
        return Some(Intent::DateFilteredEvents(DateBucket::Week));
    }
    if q.contains("tomorrow") || q.contains("tmrw") {
        return Some(Intent::DateFilteredEvents(DateBucket::Tomorrow));
    }
    None
}

fn rule_free_events(ctx: &RuleCtx) -> Option<Intent> {
    (ctx.q.contains("free") && ctx.q.contains("event")).then_some(Intent::FreeEvents)
}

fn rule_help(ctx: &RuleCtx) -> Option<Intent> {
    (ctx.q.contains("help") || HELP_RE.is_match(&ctx.q)).then_some(Intent::Help)
}

fn rule_identity(ctx: &RuleCtx) -> Option<Intent> {
    let q = &ctx.q;
    let name = &ctx.assistant_name;
    let hit = q.contains("who are you")
        || q.contains("who r u")
        || q.contains(&format!("who is {name}"))
        || q.contains(&format!("tell me about {name}"))
        || (q.contains("what") && q.contains(name.as_str()));
    hit.then_some(Intent::Identity)
}

/// Rule-based intent router. Classification is pure; resolution of the
/// listing-style intents runs a storage query, because the phrasing alone
/// determines the query shape (sort order, date bucket).
pub struct IntentClassifier {
    assistant_name: String,
}

impl IntentClassifier {
    pub fn new(assistant_name: impl Into<String>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
        }
    }

    pub fn assistant_name(&self) -> &str {
        &self.assistant_name
    }

    pub fn classify(&self, utterance: &str, history: &[ConversationTurn]) -> Intent {
        let q = utterance.trim().to_lowercase();
        let q_clean = strip_punctuation(&q);
        let ctx = RuleCtx {
            q,
            q_clean,
            history,
            assistant_name: self.assistant_name.to_lowercase(),
        };
        for (name, rule) in RULES {
            if let Some(intent) = rule(&ctx) {
                tracing::debug!(event = "intent_matched", rule = name, ?intent);
                return intent;
            }
        }
        Intent::NoMatch
    }

    /// Produce a ready-made reply for intents that resolve without the
    /// generation provider. Returns `None` for `NoMatch` and the name-flow
    /// intents, which the orchestrator handles itself. Storage errors
    /// degrade to an empty-result message, never a hard error.
    pub async fn resolve(
        &self,
        intent: Intent,
        retriever: &HybridRetriever,
        user_name: Option<&str>,
    ) -> Option<ChatReply> {
        match intent {
            Intent::Greeting => Some(ChatReply::text_only(match user_name {
                Some(name) => {
                    format!("Hey {name}! 👋 How can I help you find some awesome events today? 😊")
                }
                None => "Hey there! 👋 How can I help you find some awesome events today? 😊"
                    .to_string(),
            })),
            Intent::DateQuestion => {
                let today = retriever.today();
                Some(ChatReply::text_only(format!(
                    "Today is {} {}, {}. 😊",
                    today.format("%B"),
                    today.day(),
                    today.year()
                )))
            }
            Intent::ListEvents(sort) => Some(self.resolve_listing(sort, retriever).await),
            Intent::DateFilteredEvents(bucket) => {
                Some(self.resolve_date_bucket(bucket, retriever).await)
            }
            Intent::FreeEvents => Some(self.resolve_free(retriever).await),
            Intent::Help => Some(ChatReply::text_only(
                "I'm here to help you discover events! 🕵️\n\nYou can ask me things like:\n- 'Show me upcoming events'\n- 'Are there any free events?'\n- 'What's happening this week?'",
            )),
            Intent::Identity => Some(ChatReply::text_only(format!(
                "I'm {name}! 🤖 {name} is an AI assistant designed to help you discover events and what's happening around town. Ask me about upcoming events, free events, or anything else you'd like to know!",
                name = self.assistant_name
            ))),
            Intent::NameRequest | Intent::NameCapture | Intent::NoMatch => None,
        }
    }

    async fn resolve_listing(&self, sort: ListSort, retriever: &HybridRetriever) -> ChatReply {
        let order = match sort {
            ListSort::Default => SortOrder::InsertionOrder,
            ListSort::Latest | ListSort::Popular => SortOrder::NewestFirst,
        };
        let events = match retriever.list_all(order, 100).await {
            Ok(events) => events,
            Err(error) => {
                tracing::warn!(event = "listing_failed", %error, "degrading to empty listing");
                Vec::new()
            }
        };
        if events.is_empty() {
            return ChatReply::text_only("I couldn't find any events in the database right now.");
        }
        let n = events.len();
        let answer = match sort {
            ListSort::Latest => format!("Here are the {n} most recently posted events! 📅"),
            ListSort::Popular => format!("Here are {n} popular events I found for you! 📅"),
            ListSort::Default => format!("Here are {n} events I found for you! 📅"),
        };
        ChatReply {
            answer,
            sources: events,
        }
    }

    async fn resolve_date_bucket(
        &self,
        bucket: DateBucket,
        retriever: &HybridRetriever,
    ) -> ChatReply {
        let events = retriever.date_bucket(bucket, 50).await;
        if events.is_empty() {
            return ChatReply::text_only(match bucket {
                DateBucket::Today => {
                    "I couldn't find any events happening today. Would you like to see upcoming events instead?"
                }
                DateBucket::Tomorrow => {
                    "I couldn't find any events happening tomorrow. Would you like to see today's events instead?"
                }
                DateBucket::Week => {
                    "I couldn't find any events happening this week. Would you like to see all available events?"
                }
                DateBucket::Future => {
                    "I couldn't find any upcoming events. Would you like to see all available events?"
                }
            });
        }

        let n = events.len();
        let lines: Vec<String> = events
            .iter()
            .map(|e| format!("- {} on {}", e.name, dates::clean_date_string(&e.date_raw, Some(e))))
            .collect();
        let lines = lines.join("\n");
        let plural = if n == 1 { "event" } else { "events" };
        let answer = match bucket {
            DateBucket::Today => format!("I found {n} {plural} happening today! 📅\n\n{lines}"),
            DateBucket::Tomorrow => {
                format!("I found {n} {plural} happening tomorrow! 📅\n\n{lines}")
            }
            DateBucket::Week => format!("I found {n} {plural} happening this week! 📅\n\n{lines}"),
            DateBucket::Future => format!("I found {n} upcoming {plural}! 📅\n\n{lines}"),
        };
        ChatReply {
            answer,
            sources: events,
        }
    }

    async fn resolve_free(&self, retriever: &HybridRetriever) -> ChatReply {
        let events = match retriever.free_events(100).await {
            Ok(events) => events,
            Err(error) => {
                tracing::warn!(event = "free_listing_failed", %error, "degrading to empty listing");
                Vec::new()
            }
        };
        if events.is_empty() {
            return ChatReply::text_only(
                "I couldn't find any free events right now. Would you like to see all available events instead?",
            );
        }
        let n = events.len();
        let plural = if n == 1 { "event" } else { "events" };
        let lines: Vec<String> = events
            .iter()
            .map(|e| {
                format!(
                    "- {} on {} ({})",
                    e.name,
                    dates::clean_date_string(&e.date_raw, Some(e)),
                    e.entry_type
                )
            })
            .collect();
        let answer = format!("I found {n} free {plural}! 🎉\n\n{}", lines.join("\n"));
        ChatReply {
            answer,
            sources: events,
        }
    }
}

fn strip_punctuation(q: &str) -> String {
    let cleaned: String = q
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}
