use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use chrono::{Days, NaiveDate};
use regex::Regex;

use whatson_schema::EventRecord;
use whatson_store::{EventStore, SortOrder, StoreFilter};

use crate::clock::Clock;
use crate::dates::{self, DerivedDate};
use crate::intent::DateBucket;
use crate::quality;

pub const DEFAULT_LIMIT: usize = 20;

/// Unique-pool size at which a query is treated as broad and the lower
/// quality threshold applies.
const LARGE_POOL: usize = 20;
const STRICT_THRESHOLD: i32 = 50;
const BROAD_POOL_THRESHOLD: i32 = 30;
const RELAXED_THRESHOLD: i32 = 20;

/// Query tokens carrying no retrieval signal.
const STOP_WORDS: [&str; 19] = [
    "show", "me", "any", "event", "events", "of", "in", "for", "the", "a", "an", "find", "search",
    "about", "is", "are", "which", "what", "when",
];

static GENERAL_LISTING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(popular|show|all|any|latest|upcoming)\s+events?").unwrap());
static TOKEN_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s,.?!]+").unwrap());

#[derive(Debug, Clone)]
pub struct ScoredEvent {
    pub record: EventRecord,
    pub quality: i32,
}

/// Two-source retrieval: nearest-neighbor search over embeddings merged with
/// keyword substring search, deduplicated and quality-filtered with
/// volume-adaptive thresholds. Every storage failure degrades to an empty
/// contribution; retrieval itself never errors.
pub struct HybridRetriever {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub async fn retrieve(
        &self,
        query: &str,
        embedding: Option<&[f32]>,
        limit: usize,
    ) -> Vec<ScoredEvent> {
        let vector_results = match embedding {
            Some(embedding) => match self.store.vector_search(embedding, 100, limit * 2).await {
                Ok(results) => results,
                Err(error) => {
                    tracing::warn!(event = "vector_search_failed", %error, "ignoring vector results");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let keyword_results = self.keyword_search(query, limit).await;

        // Merge vector-first; relative order is the tie-break downstream.
        let pool = dedup(vector_results.into_iter().chain(keyword_results));
        let pool_len = pool.len();
        let threshold = if pool_len >= LARGE_POOL {
            BROAD_POOL_THRESHOLD
        } else {
            STRICT_THRESHOLD
        };

        let mut filtered: Vec<ScoredEvent> = pool
            .iter()
            .filter(|scored| scored.quality >= threshold)
            .cloned()
            .collect();

        if filtered.is_empty() && pool_len > 0 {
            tracing::debug!(
                event = "retrieval_threshold_relaxed",
                pool = pool_len,
                threshold = RELAXED_THRESHOLD
            );
            filtered = pool
                .iter()
                .filter(|scored| {
                    scored.record.name.trim().chars().count() > 1
                        && scored.quality >= RELAXED_THRESHOLD
                })
                .cloned()
                .collect();
        }

        // Imperfect results beat none: fall back to the dedup pool's best.
        if filtered.is_empty() && pool_len > 0 {
            tracing::debug!(event = "retrieval_threshold_relaxed", pool = pool_len, threshold = 0);
            filtered = pool;
        }

        filtered.sort_by_key(|scored| std::cmp::Reverse(scored.quality));
        filtered.truncate(limit);
        filtered
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Vec<EventRecord> {
        if query.is_empty() {
            return Vec::new();
        }

        let keywords: Vec<String> = TOKEN_SPLIT_RE
            .split(&query.to_lowercase())
            .filter(|t| t.chars().count() > 2 && !STOP_WORDS.contains(t))
            .map(str::to_string)
            .collect();

        if keywords.is_empty() {
            // No signal tokens: a general listing shape gets everything by
            // recency, anything else a whole-phrase match.
            if GENERAL_LISTING_RE.is_match(query) {
                return self
                    .find_degrading(StoreFilter::All, SortOrder::NewestFirst, limit * 2)
                    .await;
            }
            return self
                .find_degrading(
                    StoreFilter::AnyFieldContains(vec![query.to_string()]),
                    SortOrder::InsertionOrder,
                    limit * 2,
                )
                .await;
        }

        let results = self
            .find_degrading(
                StoreFilter::AnyFieldContains(keywords),
                SortOrder::InsertionOrder,
                limit * 2,
            )
            .await;
        if !results.is_empty() {
            return results;
        }

        // Broader retry: the whole query with punctuation stripped.
        let stripped: String = query
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect();
        let stripped = stripped.trim().to_string();
        if stripped.is_empty() {
            return Vec::new();
        }
        self.find_degrading(
            StoreFilter::AnyFieldContains(vec![stripped]),
            SortOrder::InsertionOrder,
            limit * 2,
        )
        .await
    }

    async fn find_degrading(
        &self,
        filter: StoreFilter,
        sort: SortOrder,
        limit: usize,
    ) -> Vec<EventRecord> {
        match self.store.find_all(filter, sort, limit).await {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!(event = "keyword_search_failed", %error, "treating as empty");
                Vec::new()
            }
        }
    }

    /// Listing path for "all events"-style intents.
    pub async fn list_all(&self, sort: SortOrder, limit: usize) -> Result<Vec<EventRecord>> {
        let events = self.store.find_all(StoreFilter::All, sort, limit).await?;
        Ok(events
            .into_iter()
            .filter(|e| e.name.trim().chars().count() > 2)
            .collect())
    }

    /// Free-entry events; the store filter is broad (any field mentioning
    /// "free"), so re-check the entry type here.
    pub async fn free_events(&self, limit: usize) -> Result<Vec<EventRecord>> {
        let events = self
            .store
            .find_all(StoreFilter::FreeEntry, SortOrder::InsertionOrder, limit)
            .await?;
        Ok(events
            .into_iter()
            .filter(|e| e.entry_type.to_lowercase().contains("free"))
            .collect())
    }

    /// Whole-phrase substring search, the no-AI path. Unlike [`retrieve`],
    /// storage errors propagate; the orchestrator's safety net decides what
    /// to do with them.
    ///
    /// [`retrieve`]: HybridRetriever::retrieve
    pub async fn phrase_search(&self, query: &str, limit: usize) -> Result<Vec<EventRecord>> {
        self.store
            .find_all(
                StoreFilter::AnyFieldContains(vec![query.to_string()]),
                SortOrder::InsertionOrder,
                limit,
            )
            .await
    }

    /// Coarse temporal listing: parse every stored date (with the record as
    /// recovery context) and keep the ones inside the bucket, earliest
    /// first. Unparseable dates are skipped, not errors.
    pub async fn date_bucket(&self, bucket: DateBucket, limit: usize) -> Vec<EventRecord> {
        let candidates = self
            .find_degrading(StoreFilter::All, SortOrder::InsertionOrder, 200)
            .await;

        let today = self.clock.today();
        let mut dated: Vec<(NaiveDate, EventRecord)> = Vec::new();
        for record in candidates {
            let parsed = dates::parse(&record.date_raw, Some(&record), self.clock.as_ref());
            let date = match parsed {
                DerivedDate::Date(date) => date,
                DerivedDate::Failed => continue,
            };
            let include = match bucket {
                DateBucket::Today => date == today,
                DateBucket::Tomorrow => Some(date) == today.checked_add_days(Days::new(1)),
                DateBucket::Week => {
                    date >= today
                        && today
                            .checked_add_days(Days::new(7))
                            .is_some_and(|end| date <= end)
                }
                DateBucket::Future => date >= today,
            };
            if include {
                dated.push((date, record));
            }
        }

        dated.sort_by_key(|(date, _)| *date);
        dated.truncate(limit);
        dated.into_iter().map(|(_, record)| record).collect()
    }
}

/// Drop repeated ids, noise-shaped names, and normalized-name collisions,
/// preserving input order. Scores each survivor.
fn dedup(records: impl Iterator<Item = EventRecord>) -> Vec<ScoredEvent> {
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut seen_names: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for record in records {
        if seen_ids.contains(&record.id) {
            continue;
        }
        let name = record.name.trim();
        if is_noise_name(name) {
            continue;
        }
        let normalized = record.normalized_name();
        if !normalized.is_empty() && seen_names.contains(&normalized) {
            continue;
        }

        seen_ids.insert(record.id.clone());
        if !normalized.is_empty() {
            seen_names.insert(normalized);
        }
        let quality = quality::score(&record);
        out.push(ScoredEvent { record, quality });
    }

    out
}

/// Names of three characters or fewer are poster noise unless they look
/// like an acronym ("IPL") or a plain three-letter word ("the" survives to
/// be demoted by its quality penalty instead).
fn is_noise_name(name: &str) -> bool {
    if name.chars().count() > 3 {
        return false;
    }
    if quality::is_acronym(name) {
        return false;
    }
    !(name.chars().count() == 3 && name.chars().all(|c| c.is_ascii_alphabetic()))
}
