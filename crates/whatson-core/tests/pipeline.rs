use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use whatson_core::*;
use whatson_provider::{FailingProvider, GenerationProvider, StubProvider};
use whatson_schema::{ConversationTurn, EventRecord, Identity};
use whatson_store::{EventStore, InMemoryEventStore, SortOrder, StoreFilter};

const TODAY: (i32, u32, u32) = (2026, 2, 7);

fn clock() -> Arc<dyn Clock> {
    let (y, m, d) = TODAY;
    Arc::new(FixedClock(NaiveDate::from_ymd_opt(y, m, d).unwrap()))
}

fn record(id: &str, name: &str, date_raw: &str) -> EventRecord {
    let mut record = EventRecord::new(id, name);
    record.date_raw = date_raw.into();
    record.time = "6 PM".into();
    record.location = "Hitech City".into();
    record
}

fn pipeline(
    store: impl EventStore + 'static,
    provider: Arc<dyn GenerationProvider>,
) -> ResponseOrchestrator {
    let retriever = HybridRetriever::new(Arc::new(store), clock());
    ResponseOrchestrator::new(IntentClassifier::new("Whatson"), retriever, provider)
}

/// Store that errors on every call and records whether it was touched.
struct TrackingBrokenStore {
    calls: AtomicUsize,
}

impl TrackingBrokenStore {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

/// Local wrapper so the foreign `EventStore` trait can be implemented for a
/// shared handle without violating the orphan rule.
struct SharedBrokenStore(Arc<TrackingBrokenStore>);

#[async_trait]
impl EventStore for SharedBrokenStore {
    async fn find_all(
        &self,
        _filter: StoreFilter,
        _sort: SortOrder,
        _limit: usize,
    ) -> Result<Vec<EventRecord>> {
        self.0.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("storage offline")
    }

    async fn vector_search(
        &self,
        _embedding: &[f32],
        _num_candidates: usize,
        _limit: usize,
    ) -> Result<Vec<EventRecord>> {
        self.0.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("storage offline")
    }

    async fn count(&self) -> Result<u64> {
        self.0.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("storage offline")
    }
}

#[test]
fn multi_day_date_resolves_to_earliest_in_current_year() {
    let clock = clock();
    let parsed = dates::parse("7th & 8th February", None, clock.as_ref());
    assert_eq!(parsed.date(), NaiveDate::from_ymd_opt(2026, 2, 7));

    // Same string, same result.
    let again = dates::parse("7th & 8th February", None, clock.as_ref());
    assert_eq!(parsed, again);
}

#[test]
fn ne_location_with_ashoka_text_recovers_display_name() {
    let mut event = EventRecord::new("1", "Weekend Bazaar");
    event.location = "NE".into();
    event.full_text = "Mega sale happening at Ashoka One Mall this weekend".into();
    assert_eq!(
        recover::recover_location(&event.location, Some(&event)),
        "Ashoka mall"
    );
}

#[tokio::test]
async fn greeting_answers_even_when_storage_is_down() {
    let store = Arc::new(TrackingBrokenStore::new());
    let orchestrator = pipeline(SharedBrokenStore(Arc::clone(&store)), Arc::new(FailingProvider));

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
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn follow_up_time_question_reuses_sources() {
    let sourced = record("a", "Sunburn Arena", "7th February");
    let orchestrator = pipeline(InMemoryEventStore::new(), Arc::new(FailingProvider));
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
async fn event_search_returns_generated_answer_with_sources() {
    let store = InMemoryEventStore::with_records(vec![
        record("a", "Sunburn Concert", "7th February"),
        record("b", "Comedy Night", "9th February"),
    ]);
    let orchestrator = pipeline(store, Arc::new(StubProvider));
    let history = vec![ConversationTurn::user("is there a concert happening soon")];

    let identity = Identity {
        display_name: "Priya".into(),
    };
    let reply = orchestrator
        .answer("is there a concert happening soon", &history, Some(&identity))
        .await;

    assert!(reply.answer.starts_with("[stub:"));
    assert_eq!(reply.sources.len(), 1);
    assert_eq!(reply.sources[0].id, "a");
}

#[tokio::test]
async fn provider_outage_still_produces_event_summary() {
    let store = InMemoryEventStore::with_records(vec![
        record("a", "Sunburn Concert", "7th February"),
        record("b", "Indie Concert Night", "8th February"),
        record("c", "Rooftop Concert Series", "9th February"),
        record("d", "Acoustic Concert Evening", "10th February"),
    ]);
    let orchestrator = pipeline(store, Arc::new(FailingProvider));
    let history = vec![ConversationTurn::user("looking for a concert nearby")];

    let identity = Identity {
        display_name: "Priya".into(),
    };
    let reply = orchestrator
        .answer("looking for a concert nearby", &history, Some(&identity))
        .await;

    assert!(reply
        .answer
        .starts_with("I found 4 events related to your search! 📅"));
    assert!(reply.answer.contains("1. Sunburn Concert on 7th February at 6 PM at Hitech City"));
    assert!(reply.answer.ends_with("...and 1 more event!"));
    assert_eq!(reply.sources.len(), 4);
}

#[tokio::test]
async fn full_outage_never_returns_blank() {
    let store = Arc::new(TrackingBrokenStore::new());
    let orchestrator = pipeline(SharedBrokenStore(Arc::clone(&store)), Arc::new(FailingProvider));
    let history = vec![ConversationTurn::user("looking for a concert nearby")];

    let identity = Identity {
        display_name: "Priya".into(),
    };
    let reply = orchestrator
        .answer("looking for a concert nearby", &history, Some(&identity))
        .await;

    assert!(!reply.answer.trim().is_empty());
    assert!(reply.sources.is_empty());
}

#[tokio::test]
async fn today_bucket_beats_plain_date_answer_for_event_phrasing() {
    let store = InMemoryEventStore::with_records(vec![
        record("today", "Morning Yoga", "7th February"),
        record("later", "March Gala", "7 March"),
    ]);
    let orchestrator = pipeline(store, Arc::new(StubProvider));
    let history = vec![ConversationTurn::user("what events are happening today")];

    let identity = Identity {
        display_name: "Priya".into(),
    };
    let reply = orchestrator
        .answer("what events are happening today", &history, Some(&identity))
        .await;

    // Fused intent resolution, not a calendar answer and not the provider.
    assert!(reply.answer.starts_with("I found 1 event happening today! 📅"));
    assert_eq!(reply.sources.len(), 1);
    assert_eq!(reply.sources[0].id, "today");
}

#[tokio::test]
async fn plain_date_question_answered_from_clock() {
    let orchestrator = pipeline(InMemoryEventStore::new(), Arc::new(FailingProvider));
    let history = vec![ConversationTurn::user("what is the date today")];

    let identity = Identity {
        display_name: "Priya".into(),
    };
    let reply = orchestrator
        .answer("what is the date today", &history, Some(&identity))
        .await;
    assert_eq!(reply.answer, "Today is February 7, 2026. 😊");
}
