use std::sync::{Arc, LazyLock};

use regex::Regex;

use whatson_provider::{GenerationProvider, GenerationRequest};
use whatson_schema::{present, ChatReply, ConversationTurn, EventRecord, Identity, Role};
use whatson_store::EmbeddingProvider;

use crate::followup;
use crate::intent::{DateBucket, Intent, IntentClassifier};
use crate::prompt;
use crate::recover;
use crate::retrieval::{HybridRetriever, DEFAULT_LIMIT};

/// Fixed name-request prompt. Deliberately informal; the capture step keys
/// on this exact phrasing appearing in a prior assistant turn.
pub const NAME_PROMPT: &str = "what is ur name";

const NAME_REQUEST_PHRASES: [&str; 3] =
    ["what is ur name", "what is your name", "what's your name"];

static NAME_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(my name is|i'?m|i am|it'?s|it is|this is|call me|name'?s)\s+").unwrap()
});
static TRAILING_PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.,!?]+$").unwrap());

static SEARCH_QUERY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(find|search|show|list|tell me|what|which|are there|do you have)").unwrap()
});
static GREETING_OPENER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(hi|hello|hey|hii|greetings|good morning|good evening|good afternoon|sup|what'?s up|wassup|yo|namaste|namaskar|how are you|how do you do)",
    )
    .unwrap()
});

const EVENT_QUERY_KEYWORDS: [&str; 35] = [
    "event",
    "events",
    "festival",
    "festivals",
    "concert",
    "concerts",
    "show",
    "shows",
    "party",
    "parties",
    "meetup",
    "meetups",
    "happening",
    "happenings",
    "activity",
    "activities",
    "find",
    "search",
    "show me",
    "tell me about",
    "what events",
    "upcoming",
    "today",
    "tomorrow",
    "this week",
    "weekend",
    "venue",
    "location",
    "where",
    "when",
    "date",
    "time",
    "music",
    "sports",
    "stadium",
];

/// Whether an utterance is asking about events at all, as opposed to small
/// talk. Greeting-shaped openers are excluded outright so "hey, how are
/// you" never triggers retrieval.
pub fn is_event_query(question: &str) -> bool {
    let q = question.trim().to_lowercase();
    if GREETING_OPENER_RE.is_match(&q) {
        return false;
    }
    let has_keyword = EVENT_QUERY_KEYWORDS.iter().any(|k| q.contains(k));
    let search_shaped = SEARCH_QUERY_RE.is_match(&q) && q.chars().count() > 10;
    has_keyword || search_shaped
}

/// Strip "my name is"-style prefixes and trailing punctuation, keeping at
/// most three words.
pub fn extract_user_name(text: &str) -> String {
    let name = NAME_PREFIX_RE.replace(text.trim(), "");
    let name = TRAILING_PUNCT_RE.replace(&name, "");
    name.split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_name_request(content: &str) -> bool {
    let content = content.to_lowercase();
    NAME_REQUEST_PHRASES.iter().any(|p| content.contains(p))
}

/// A name the user gave earlier in this conversation: the user turn that
/// directly followed a name-request assistant turn.
pub fn user_name_from_history(history: &[ConversationTurn]) -> Option<String> {
    for window in history.windows(2).rev() {
        let [prev, turn] = window else { continue };
        if turn.role == Role::User && prev.role == Role::Assistant && is_name_request(&prev.content)
        {
            let name = extract_user_name(&turn.content);
            if !name.is_empty() {
                return Some(name);
            }
        }
    }
    None
}

fn should_ask_for_name(history: &[ConversationTurn]) -> bool {
    if history.is_empty() || user_name_from_history(history).is_some() {
        return false;
    }
    let user_turns = history.iter().filter(|t| t.role == Role::User).count();
    if user_turns != 1 {
        return false;
    }
    !history
        .iter()
        .any(|t| t.role == Role::Assistant && is_name_request(&t.content))
}

fn is_name_response(history: &[ConversationTurn]) -> bool {
    if history.len() < 2 {
        return false;
    }
    let prev = &history[history.len() - 2];
    prev.role == Role::Assistant && is_name_request(&prev.content)
}

fn latest_sourced_events(history: &[ConversationTurn]) -> Vec<EventRecord> {
    history
        .iter()
        .rev()
        .find(|t| t.role == Role::Assistant && !t.sources.is_empty())
        .map(|t| t.sources.clone())
        .unwrap_or_default()
}

/// Top-level controller: sequences the name flow, rule-based intents,
/// follow-up resolution, retrieval, prompt assembly, and generation, with a
/// deterministic fallback at every failure point. `history` includes the
/// current user turn as its last element.
pub struct ResponseOrchestrator {
    classifier: IntentClassifier,
    retriever: HybridRetriever,
    provider: Arc<dyn GenerationProvider>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    model: String,
}

impl ResponseOrchestrator {
    pub fn new(
        classifier: IntentClassifier,
        retriever: HybridRetriever,
        provider: Arc<dyn GenerationProvider>,
    ) -> Self {
        Self {
            classifier,
            retriever,
            provider,
            embedder: None,
            model: "gpt-4o-mini".to_string(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Answer one turn. Never errors: every internal failure degrades to a
    /// usable reply, with the retrieval candidates reused when they exist
    /// and a plain phrase search as the last resort.
    pub async fn answer(
        &self,
        question: &str,
        history: &[ConversationTurn],
        identity: Option<&Identity>,
    ) -> ChatReply {
        let mut candidates = Vec::new();
        match self
            .answer_inner(question, history, identity, &mut candidates)
            .await
        {
            Ok(reply) => reply,
            Err(error) => {
                tracing::warn!(event = "answer_failed", %error, "falling back");
                if !candidates.is_empty() {
                    let n = candidates.len();
                    let plural = if n == 1 { "event" } else { "events" };
                    return ChatReply {
                        answer: format!(
                            "I found {n} {plural} related to your search! Here they are: 👇"
                        ),
                        sources: candidates,
                    };
                }
                self.standard_search(question).await
            }
        }
    }

    /// Text search without any generation. Public because the session layer
    /// also exposes it as its own endpoint.
    pub async fn standard_search(&self, query: &str) -> ChatReply {
        match self.retriever.phrase_search(query, 50).await {
            Ok(results) if !results.is_empty() => ChatReply {
                answer: format!("Found {} events matching \"{query}\".", results.len()),
                sources: results,
            },
            Ok(_) => ChatReply::text_only(format!("No events found matching \"{query}\".")),
            Err(error) => {
                tracing::warn!(event = "standard_search_failed", %error);
                ChatReply::text_only(
                    "I couldn't find any events matching your search. Try different keywords!",
                )
            }
        }
    }

    async fn answer_inner(
        &self,
        question: &str,
        history: &[ConversationTurn],
        identity: Option<&Identity>,
        candidates: &mut Vec<EventRecord>,
    ) -> anyhow::Result<ChatReply> {
        // Name flow only applies to anonymous sessions.
        if identity.is_none() {
            if should_ask_for_name(history) {
                tracing::debug!(event = "name_requested");
                return Ok(ChatReply::text_only(NAME_PROMPT));
            }
            if is_name_response(history) {
                let name = extract_user_name(question);
                if !name.is_empty() {
                    return Ok(ChatReply::text_only(format!(
                        "Nice to meet you, {name}! 😊 Now, how can I help you with events today?"
                    )));
                }
            }
        }

        let user_name = identity
            .map(|i| i.display_name.clone())
            .or_else(|| user_name_from_history(history));

        let intent = self.classifier.classify(question, history);
        if intent != Intent::NoMatch {
            if let Some(reply) = self
                .classifier
                .resolve(intent, &self.retriever, user_name.as_deref())
                .await
            {
                return Ok(reply);
            }
        }

        let event_query = is_event_query(question);
        let follow_up = followup::is_follow_up(question, history);
        let has_sourced_history = history
            .iter()
            .any(|t| t.role == Role::Assistant && !t.sources.is_empty());
        let should_search = event_query || (follow_up && has_sourced_history);

        if follow_up && !history.is_empty() {
            if let Some(answer) = followup::extract_answer(question, history) {
                return Ok(ChatReply {
                    answer,
                    sources: latest_sourced_events(history),
                });
            }
            // No direct answer; keep the prior sources as grounding.
            *candidates = latest_sourced_events(history);
        } else if should_search {
            *candidates = self.search_candidates(question).await;
        }

        let system = prompt::build_system_prompt(
            self.classifier.assistant_name(),
            candidates,
            history,
            user_name.as_deref(),
        );
        let mut request =
            GenerationRequest::new(system, question).with_model(self.model.clone());
        request.temperature = 0.2;
        request.max_tokens = 1500;

        match self.provider.generate(request).await {
            Ok(answer) => {
                let with_sources = should_search && !candidates.is_empty() && !follow_up;
                Ok(ChatReply {
                    answer,
                    sources: if with_sources {
                        candidates.clone()
                    } else {
                        Vec::new()
                    },
                })
            }
            Err(error) => {
                tracing::warn!(event = "generation_failed", %error, "composing local summary");
                Ok(self.compose_fallback(question, history, follow_up, candidates))
            }
        }
    }

    /// Date-bucket retrieval first; full hybrid retrieval only when the
    /// bucket comes up empty.
    async fn search_candidates(&self, question: &str) -> Vec<EventRecord> {
        let q = question.to_lowercase();
        let bucket = if q.contains("today") {
            Some(DateBucket::Today)
        } else if q.contains("tomorrow") {
            Some(DateBucket::Tomorrow)
        } else if q.contains("week") {
            Some(DateBucket::Week)
        } else {
            None
        };
        if let Some(bucket) = bucket {
            let dated = self.retriever.date_bucket(bucket, 50).await;
            if !dated.is_empty() {
                return dated;
            }
        }

        let embedding = match &self.embedder {
            Some(embedder) => match embedder.embed_query(question).await {
                Ok(vector) => Some(vector),
                Err(error) => {
                    tracing::warn!(event = "query_embedding_failed", %error, "keyword-only retrieval");
                    None
                }
            },
            None => None,
        };

        self.retriever
            .retrieve(question, embedding.as_deref(), DEFAULT_LIMIT)
            .await
            .into_iter()
            .map(|scored| scored.record)
            .collect()
    }

    /// Deterministic reply when the provider fails or returns nothing
    /// usable. Never blank when candidates exist; follow-up turns without an
    /// extractable answer get an apology instead of unrelated event cards.
    fn compose_fallback(
        &self,
        question: &str,
        history: &[ConversationTurn],
        follow_up: bool,
        candidates: &[EventRecord],
    ) -> ChatReply {
        if follow_up {
            if let Some(answer) = followup::extract_answer(question, history) {
                return ChatReply {
                    answer,
                    sources: Vec::new(),
                };
            }
            return ChatReply::text_only(
                "I'm having a little trouble accessing that information right now. Could you try asking about the event details again?",
            );
        }

        if candidates.is_empty() {
            return ChatReply::text_only(
                "I couldn't find any events matching your search. Try different keywords!",
            );
        }

        let n = candidates.len();
        let plural = if n == 1 { "event" } else { "events" };
        let summary: Vec<String> = candidates
            .iter()
            .take(3)
            .enumerate()
            .map(|(i, event)| {
                let mut line = format!("{}. {}", i + 1, present(&event.name).unwrap_or("Event"));
                if let Some(date) = present(&event.date_raw) {
                    line.push_str(&format!(" on {date}"));
                }
                if let Some(time) = present(&event.time) {
                    line.push_str(&format!(" at {time}"));
                }
                let location = recover::recover_location(&event.location, Some(event));
                if let Some(location) = present(&location) {
                    line.push_str(&format!(" at {location}"));
                }
                line
            })
            .collect();
        let mut answer = format!(
            "I found {n} {plural} related to your search! 📅\n\n{}",
            summary.join("\n")
        );
        if n > 3 {
            let more = n - 3;
            let plural = if more == 1 { "event" } else { "events" };
            answer.push_str(&format!("\n\n...and {more} more {plural}!"));
        }
        ChatReply {
            answer,
            sources: candidates.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::NaiveDate;
    use whatson_provider::{FailingProvider, StubProvider};
    use whatson_store::InMemoryEventStore;

    fn complete(id: &str, name: &str) -> EventRecord {
        let mut record = EventRecord::new(id, name);
        record.date_raw = "7th February".into();
        record.time = "6 PM".into();
        record.location = "Hitech City".into();
        record
    }

    fn orchestrator(
        store: InMemoryEventStore,
        provider: Arc<dyn GenerationProvider>,
    ) -> ResponseOrchestrator {
        let clock = FixedClock(NaiveDate::from_ymd_opt(2026, 2, 7).unwrap());
        let retriever = HybridRetriever::new(Arc::new(store), Arc::new(clock));
        ResponseOrchestrator::new(IntentClassifier::new("Whatson"), retriever, provider)
    }

    fn stub_orchestrator(store: InMemoryEventStore) -> ResponseOrchestrator {
        orchestrator(store, Arc::new(StubProvider))
    }

    #[test]
    fn event_query_heuristic() {
        assert!(is_event_query("any concerts this weekend"));
        assert!(is_event_query("find something fun to do"));
        assert!(!is_event_query("hey how are you"));
        assert!(!is_event_query("thanks"));
    }

    #[test]
    fn user_name_extraction() {
        assert_eq!(extract_user_name("my name is Ravi"), "Ravi");
        assert_eq!(extract_user_name("I'm Priya Sharma!"), "Priya Sharma");
        assert_eq!(extract_user_name("Anil"), "Anil");
        assert_eq!(
            extract_user_name("call me Rajesh Kumar Reddy Jr"),
            "Rajesh Kumar Reddy"
        );
    }

    #[tokio::test]
    async fn first_anonymous_turn_asks_for_name() {
        let orchestrator = stub_orchestrator(InMemoryEventStore::new());
        let history = vec![ConversationTurn::user("hello there whatson bot")];
        let reply = orchestrator
            .answer("hello there whatson bot", &history, None)
            .await;
        assert_eq!(reply.answer, NAME_PROMPT);
        assert!(reply.sources.is_empty());
    }

    #[tokio::test]
    async fn name_reply_is_acknowledged() {
        let orchestrator = stub_orchestrator(InMemoryEventStore::new());
        let history = vec![
            ConversationTurn::user("hello"),
            ConversationTurn::assistant(NAME_PROMPT),
            ConversationTurn::user("my name is Ravi"),
        ];
        let reply = orchestrator.answer("my name is Ravi", &history, None).await;
        assert_eq!(
            reply.answer,
            "Nice to meet you, Ravi! 😊 Now, how can I help you with events today?"
        );
    }

    #[tokio::test]
    async fn authenticated_identity_skips_name_flow() {
        let orchestrator = stub_orchestrator(InMemoryEventStore::new());
        let identity = Identity {
            display_name: "Priya".into(),
        };
        let history = vec![ConversationTurn::user("hi")];
        let reply = orchestrator.answer("hi", &history, Some(&identity)).await;
        assert_eq!(
            reply.answer,
            "Hey Priya! 👋 How can I help you find some awesome events today? 😊"
        );
    }

    #[tokio::test]
    async fn greeting_resolves_without_generation_or_search() {
        // FailingProvider proves the provider is never consulted.
        let orchestrator = orchestrator(InMemoryEventStore::new(), Arc::new(FailingProvider));
        let history = vec![
            ConversationTurn::user("hello"),
            ConversationTurn::assistant(NAME_PROMPT),
            ConversationTurn::user("Ravi"),
            ConversationTurn::assistant("Nice to meet you, Ravi! 😊"),
            ConversationTurn::user("hi there"),
        ];
        let reply = orchestrator.answer("hi there", &history, None).await;
        assert_eq!(
            reply.answer,
            "Hey Ravi! 👋 How can I help you find some awesome events today? 😊"
        );
        assert!(reply.sources.is_empty());
    }

    fn chat_history(question: &str) -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::user("hello"),
            ConversationTurn::assistant(NAME_PROMPT),
            ConversationTurn::user("Ravi"),
            ConversationTurn::assistant("Nice to meet you, Ravi! 😊"),
            ConversationTurn::user(question),
        ]
    }

    #[tokio::test]
    async fn event_query_searches_and_returns_sources() {
        let store = InMemoryEventStore::with_records(vec![complete("a", "Sunburn Concert")]);
        let orchestrator = stub_orchestrator(store);
        let question = "any concerts in hitech city";
        let reply = orchestrator.answer(question, &chat_history(question), None).await;
        assert!(reply.answer.starts_with("[stub:"));
        assert_eq!(reply.sources.len(), 1);
        assert_eq!(reply.sources[0].id, "a");
    }

    #[tokio::test]
    async fn general_chat_attaches_no_sources() {
        let store = InMemoryEventStore::with_records(vec![complete("a", "Sunburn Concert")]);
        let orchestrator = stub_orchestrator(store);
        let question = "i had a great day";
        let reply = orchestrator.answer(question, &chat_history(question), None).await;
        assert!(reply.answer.starts_with("[stub:"));
        assert!(reply.sources.is_empty());
    }

    #[tokio::test]
    async fn follow_up_answered_from_history_without_retrieval() {
        let store = InMemoryEventStore::with_records(vec![complete("other", "Unrelated Expo")]);
        let orchestrator = orchestrator(store, Arc::new(FailingProvider));
        let mut sourced = complete("a", "Sunburn Concert");
        sourced.time = "6 PM".into();
        let history = vec![
            ConversationTurn::user("any concerts"),
            ConversationTurn::assistant_with_sources("I found 1 event!", vec![sourced]),
            ConversationTurn::user("what time"),
        ];
        let reply = orchestrator.answer("what time", &history, None).await;
        assert_eq!(reply.answer, "The event time is 6 PM.");
        assert_eq!(reply.sources.len(), 1);
        assert_eq!(reply.sources[0].id, "a");
    }

    #[tokio::test]
    async fn provider_failure_composes_local_summary() {
        let store = InMemoryEventStore::with_records(vec![
            complete("a", "Sunburn Concert"),
            complete("b", "Indie Concert Night"),
        ]);
        let orchestrator = orchestrator(store, Arc::new(FailingProvider));
        let question = "looking for a concert nearby";
        let reply = orchestrator.answer(question, &chat_history(question), None).await;
        assert!(reply
            .answer
            .starts_with("I found 2 events related to your search! 📅"));
        assert!(reply.answer.contains("1. Sunburn Concert on 7th February at 6 PM at Hitech City"));
        assert_eq!(reply.sources.len(), 2);
    }

    #[tokio::test]
    async fn provider_failure_without_candidates_keeps_a_message() {
        let orchestrator = orchestrator(InMemoryEventStore::new(), Arc::new(FailingProvider));
        let question = "looking for a concert nearby";
        let reply = orchestrator.answer(question, &chat_history(question), None).await;
        assert_eq!(
            reply.answer,
            "I couldn't find any events matching your search. Try different keywords!"
        );
        assert!(reply.sources.is_empty());
    }

    #[tokio::test]
    async fn follow_up_without_answer_gets_apology_not_cards() {
        let orchestrator = orchestrator(InMemoryEventStore::new(), Arc::new(FailingProvider));
        let history = vec![
            ConversationTurn::user("any concerts"),
            ConversationTurn::assistant_with_sources(
                "I found 1 event!",
                vec![EventRecord::new("a", "Sunburn Concert")],
            ),
            ConversationTurn::user("their website"),
        ];
        let reply = orchestrator.answer("their website", &history, None).await;
        assert_eq!(
            reply.answer,
            "I'm having a little trouble accessing that information right now. Could you try asking about the event details again?"
        );
        assert!(reply.sources.is_empty());
    }

    #[tokio::test]
    async fn today_query_prefers_date_bucket() {
        let mut today = complete("today", "Morning Yoga");
        today.date_raw = "7th February".into();
        let mut later = complete("later", "March Gala");
        later.date_raw = "7 March".into();
        let store = InMemoryEventStore::with_records(vec![later, today]);
        let orchestrator = stub_orchestrator(store);
        let question = "any yoga sessions today";
        let reply = orchestrator.answer(question, &chat_history(question), None).await;
        assert_eq!(reply.sources.len(), 1);
        assert_eq!(reply.sources[0].id, "today");
    }

    struct BrokenEmbedder;

    #[async_trait::async_trait]
    impl whatson_store::EmbeddingProvider for BrokenEmbedder {
        async fn embed_query(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("embedding service offline")
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    #[tokio::test]
    async fn embedder_failure_degrades_to_keyword_retrieval() {
        let store = InMemoryEventStore::with_records(vec![complete("a", "Sunburn Concert")]);
        let orchestrator =
            stub_orchestrator(store).with_embedder(Arc::new(BrokenEmbedder));
        let question = "looking for a concert nearby";
        let reply = orchestrator.answer(question, &chat_history(question), None).await;
        assert!(reply.answer.starts_with("[stub:"));
        assert_eq!(reply.sources.len(), 1);
        assert_eq!(reply.sources[0].id, "a");
    }

    #[tokio::test]
    async fn stub_embedder_feeds_vector_search() {
        let embedder = whatson_store::StubEmbeddingProvider::new(4);
        let query_vector = embedder.embed_query("rock concert").await.unwrap();

        let mut vector_only = EventRecord::new("vec", "Hidden Rock Night");
        vector_only.date_raw = "7th February".into();
        vector_only.location = "Hitech City".into();
        vector_only.embedding = Some(query_vector);
        let store = InMemoryEventStore::with_records(vec![vector_only]);

        let orchestrator = stub_orchestrator(store).with_embedder(Arc::new(embedder));
        let question = "rock concert";
        let reply = orchestrator.answer(question, &chat_history(question), None).await;
        assert_eq!(reply.sources.len(), 1);
        assert_eq!(reply.sources[0].id, "vec");
    }

    #[tokio::test]
    async fn standard_search_reports_matches() {
        let store = InMemoryEventStore::with_records(vec![complete("a", "Sunburn Concert")]);
        let orchestrator = stub_orchestrator(store);
        let reply = orchestrator.standard_search("sunburn").await;
        assert_eq!(reply.answer, "Found 1 events matching \"sunburn\".");
        assert_eq!(reply.sources.len(), 1);

        let empty = orchestrator.standard_search("karaoke").await;
        assert_eq!(empty.answer, "No events found matching \"karaoke\".");
        assert!(empty.sources.is_empty());
    }
}
