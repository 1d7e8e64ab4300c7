pub mod embedding;
pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use whatson_schema::EventRecord;

pub use embedding::{EmbeddingProvider, OpenAiEmbeddingClient, StubEmbeddingProvider};
pub use memory::InMemoryEventStore;
pub use sqlite::SqliteEventStore;

/// Predicate applied by [`EventStore::find_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFilter {
    /// Every record.
    All,
    /// Case-insensitive substring match: a record qualifies when ANY of the
    /// given terms occurs in ANY searchable field (name, organizer, location,
    /// raw date, entry type, highlights, OCR text).
    AnyFieldContains(Vec<String>),
    /// Records whose entry type (or name/free text, for noisy records)
    /// mentions free entry.
    FreeEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    InsertionOrder,
    /// Most recently ingested first. Insertion order is the recency proxy;
    /// records carry no reliable ingest timestamp of their own.
    NewestFirst,
}

/// The document store consumed by the query pipeline. Implementations must
/// be independently consistent; the pipeline treats every returned record as
/// a read-only snapshot.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn find_all(
        &self,
        filter: StoreFilter,
        sort: SortOrder,
        limit: usize,
    ) -> Result<Vec<EventRecord>>;

    /// Nearest-neighbor search over stored embeddings. May fail (e.g. no
    /// vector index); callers are expected to degrade to an empty result.
    async fn vector_search(
        &self,
        embedding: &[f32],
        num_candidates: usize,
        limit: usize,
    ) -> Result<Vec<EventRecord>>;

    async fn count(&self) -> Result<u64>;
}

/// Shared substring-match semantics for [`StoreFilter::AnyFieldContains`],
/// used directly by the in-memory store and mirrored in SQL by the SQLite
/// store.
pub fn record_matches_any(record: &EventRecord, terms: &[String]) -> bool {
    terms.iter().any(|term| {
        let term = term.to_lowercase();
        if term.is_empty() {
            return false;
        }
        searchable_text(record)
            .iter()
            .any(|field| field.to_lowercase().contains(&term))
    })
}

pub fn record_is_free_entry(record: &EventRecord) -> bool {
    let entry = record.entry_type.to_lowercase();
    if entry.contains("free") {
        return true;
    }
    record.name.to_lowercase().contains("free")
        || record.full_text.to_lowercase().contains("free")
        || record.ocr_text().to_lowercase().contains("free")
}

fn searchable_text(record: &EventRecord) -> Vec<String> {
    let mut fields = vec![
        record.name.clone(),
        record.organizer.clone(),
        record.location.clone(),
        record.date_raw.clone(),
        record.entry_type.clone(),
    ];
    fields.extend(record.highlights.iter().cloned());
    fields.push(record.ocr_text());
    fields
}
