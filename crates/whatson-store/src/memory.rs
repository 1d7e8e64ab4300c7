use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use whatson_schema::EventRecord;

use crate::{record_is_free_entry, record_matches_any, EventStore, SortOrder, StoreFilter};

/// In-memory event store. Used by tests and small single-process deployments
/// where a SQLite file is not worth carrying.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    records: Arc<Mutex<Vec<EventRecord>>>,
    fail_vector_search: Arc<AtomicBool>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<EventRecord>) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
            fail_vector_search: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn insert(&self, record: EventRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }

    /// Make subsequent `vector_search` calls fail, simulating a missing or
    /// broken vector index.
    pub fn set_vector_search_failing(&self, failing: bool) {
        self.fail_vector_search.store(failing, Ordering::SeqCst);
    }

    fn snapshot(&self) -> Result<Vec<EventRecord>> {
        self.records
            .lock()
            .map(|records| records.clone())
            .map_err(|_| anyhow!("event store mutex poisoned"))
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn find_all(
        &self,
        filter: StoreFilter,
        sort: SortOrder,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        let mut records = self.snapshot()?;
        if sort == SortOrder::NewestFirst {
            records.reverse();
        }

        let mut out: Vec<EventRecord> = records
            .into_iter()
            .filter(|record| match &filter {
                StoreFilter::All => true,
                StoreFilter::AnyFieldContains(terms) => record_matches_any(record, terms),
                StoreFilter::FreeEntry => record_is_free_entry(record),
            })
            .collect();
        out.truncate(limit);
        Ok(out)
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        num_candidates: usize,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        if self.fail_vector_search.load(Ordering::SeqCst) {
            return Err(anyhow!("vector index unavailable"));
        }

        let records = self.snapshot()?;
        let mut scored: Vec<(f32, EventRecord)> = records
            .into_iter()
            .filter_map(|record| {
                let score = record
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(embedding, e))?;
                Some((score, record))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(num_candidates.min(limit));
        Ok(scored.into_iter().map(|(_, r)| r).collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.snapshot()?.len() as u64)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}
