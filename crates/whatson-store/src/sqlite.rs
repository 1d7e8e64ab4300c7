use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tokio::task;

use whatson_schema::EventRecord;

use crate::{EventStore, SortOrder, StoreFilter};

/// SQLite-backed event store with a sqlite-vec index for embeddings.
#[derive(Clone)]
pub struct SqliteEventStore {
    db: Arc<Mutex<Connection>>,
}

/// Initialize sqlite-vec extension. Must be called before Connection::open().
fn init_sqlite_vec() {
    use rusqlite::ffi::{sqlite3, sqlite3_api_routines, sqlite3_auto_extension};

    type Sqlite3AutoExtFn =
        unsafe extern "C" fn(*mut sqlite3, *mut *mut i8, *const sqlite3_api_routines) -> i32;

    unsafe {
        sqlite3_auto_extension(Some(std::mem::transmute::<*const (), Sqlite3AutoExtFn>(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            organizer TEXT NOT NULL DEFAULT '',
            date_raw TEXT NOT NULL DEFAULT '',
            time TEXT NOT NULL DEFAULT '',
            location TEXT NOT NULL DEFAULT '',
            entry_type TEXT NOT NULL DEFAULT '',
            website TEXT NOT NULL DEFAULT '',
            highlights TEXT NOT NULL DEFAULT '[]',
            raw_ocr TEXT NOT NULL DEFAULT '[]',
            full_text TEXT NOT NULL DEFAULT '',
            embedding TEXT NOT NULL DEFAULT '',
            seq INTEGER
        );
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

impl SqliteEventStore {
    pub fn open(path: &str) -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create (or recreate, on dimension change) the vec0 virtual table.
    pub fn ensure_vec_table(&self, dimensions: usize) -> Result<()> {
        let db = self
            .db
            .lock()
            .map_err(|_| anyhow!("failed to lock sqlite connection"))?;

        let current_dims: Option<String> = db
            .query_row(
                "SELECT value FROM meta WHERE key = 'vec_dimensions'",
                [],
                |r| r.get(0),
            )
            .optional()?;

        let needs_recreate = match current_dims {
            Some(d) => d.parse::<usize>().unwrap_or(0) != dimensions,
            None => true,
        };

        if needs_recreate {
            db.execute_batch("DROP TABLE IF EXISTS events_vec;")?;
            db.execute_batch(&format!(
                "CREATE VIRTUAL TABLE events_vec USING vec0(event_id TEXT PRIMARY KEY, embedding float[{dimensions}]);"
            ))?;
            db.execute(
                "INSERT INTO meta(key, value) VALUES('vec_dimensions', ?1) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![dimensions.to_string()],
            )?;
            tracing::info!("Created events_vec virtual table with {dimensions} dimensions");
        }

        Ok(())
    }

    /// Insert or replace an event record, indexing its embedding when one is
    /// attached and the vec table exists for its dimensions.
    pub async fn insert_event(&self, record: EventRecord) -> Result<()> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let highlights = serde_json::to_string(&record.highlights)?;
            let raw_ocr = serde_json::to_string(&record.raw_ocr)?;
            let embedding_json = match &record.embedding {
                Some(vec) => serde_json::to_string(vec)?,
                None => String::new(),
            };
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let next_seq: i64 = conn
                .query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM events", [], |r| {
                    r.get(0)
                })?;
            conn.execute(
                r#"
                INSERT OR REPLACE INTO events (
                    id, name, organizer, date_raw, time, location, entry_type,
                    website, highlights, raw_ocr, full_text, embedding, seq
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
                params![
                    record.id,
                    record.name,
                    record.organizer,
                    record.date_raw,
                    record.time,
                    record.location,
                    record.entry_type,
                    record.website,
                    highlights,
                    raw_ocr,
                    record.full_text,
                    embedding_json,
                    next_seq,
                ],
            )?;

            if !embedding_json.is_empty() {
                let has_vec_table: bool = conn
                    .query_row(
                        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='events_vec'",
                        [],
                        |r| r.get(0),
                    )
                    .unwrap_or(false);
                if has_vec_table {
                    conn.execute(
                        "INSERT OR REPLACE INTO events_vec(event_id, embedding) VALUES (?1, ?2)",
                        params![record.id, embedding_json],
                    )?;
                }
            }
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}

const SELECT_COLUMNS: &str = "id, name, organizer, date_raw, time, location, entry_type, website, highlights, raw_ocr, full_text, embedding";

// Columns searched by AnyFieldContains. highlights and raw_ocr are JSON
// text, which substring matching treats as one flat string.
const SEARCH_COLUMNS: [&str; 7] = [
    "name",
    "organizer",
    "location",
    "date_raw",
    "entry_type",
    "highlights",
    "raw_ocr",
];

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn find_all(
        &self,
        filter: StoreFilter,
        sort: SortOrder,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;

            let order = match sort {
                SortOrder::InsertionOrder => "seq ASC",
                SortOrder::NewestFirst => "seq DESC",
            };

            let (where_clause, bind_terms): (String, Vec<String>) = match filter {
                StoreFilter::All => ("1 = 1".to_string(), Vec::new()),
                StoreFilter::AnyFieldContains(terms) => {
                    let terms: Vec<String> = terms
                        .into_iter()
                        .map(|t| t.to_lowercase())
                        .filter(|t| !t.is_empty())
                        .collect();
                    if terms.is_empty() {
                        ("1 = 0".to_string(), Vec::new())
                    } else {
                        let mut clauses = Vec::new();
                        let mut binds = Vec::new();
                        for term in terms {
                            for column in SEARCH_COLUMNS {
                                clauses
                                    .push(format!("instr(lower({column}), ?{}) > 0", binds.len() + 1));
                                binds.push(term.clone());
                            }
                        }
                        (clauses.join(" OR "), binds)
                    }
                }
                StoreFilter::FreeEntry => (
                    "instr(lower(entry_type), 'free') > 0 \
                     OR instr(lower(name), 'free') > 0 \
                     OR instr(lower(full_text), 'free') > 0 \
                     OR instr(lower(raw_ocr), 'free') > 0"
                        .to_string(),
                    Vec::new(),
                ),
            };

            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM events WHERE {where_clause} ORDER BY {order} LIMIT {limit}"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bind_terms.iter()), row_to_event)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok::<Vec<EventRecord>, anyhow::Error>(out)
        })
        .await?
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        num_candidates: usize,
        limit: usize,
    ) -> Result<Vec<EventRecord>> {
        let db = Arc::clone(&self.db);
        let query_embedding = embedding.to_vec();
        let query_json = serde_json::to_string(&query_embedding)?;

        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;

            let has_vec_table: bool = conn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='events_vec'",
                    [],
                    |r| r.get(0),
                )
                .unwrap_or(false);

            if has_vec_table {
                // Qualify the columns: events_vec also has an `embedding`
                // column, so the bare list would be ambiguous in the join.
                let qualified_columns = SELECT_COLUMNS
                    .split(", ")
                    .map(|c| format!("events.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    r#"
                    SELECT {qualified_columns}
                    FROM events_vec v
                    JOIN events ON events.id = v.event_id
                    WHERE v.embedding MATCH ?1 AND k = ?2
                    "#
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows =
                    stmt.query_map(params![query_json, num_candidates as i64], row_to_event)?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                    if out.len() >= limit {
                        break;
                    }
                }
                return Ok::<Vec<EventRecord>, anyhow::Error>(out);
            }

            // No index: brute-force cosine over stored embeddings.
            let sql = format!("SELECT {SELECT_COLUMNS} FROM events WHERE embedding <> ''");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], row_to_event)?;
            let mut scored = Vec::new();
            for row in rows {
                let record = row?;
                let score = record
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(&query_embedding, e))
                    .unwrap_or(0.0);
                scored.push((score, record));
            }
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            scored.truncate(limit);
            Ok(scored.into_iter().map(|(_, r)| r).collect())
        })
        .await?
    }

    async fn count(&self) -> Result<u64> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
            Ok::<u64, anyhow::Error>(count as u64)
        })
        .await?
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    let highlights_raw: String = row.get(8)?;
    let raw_ocr_raw: String = row.get(9)?;
    let embedding_raw: String = row.get(11)?;

    let highlights: Vec<String> = serde_json::from_str(&highlights_raw).unwrap_or_default();
    let raw_ocr: Vec<String> = serde_json::from_str(&raw_ocr_raw).unwrap_or_default();
    let embedding = if embedding_raw.is_empty() {
        None
    } else {
        serde_json::from_str::<Vec<f32>>(&embedding_raw).ok()
    };

    Ok(EventRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        organizer: row.get(2)?,
        date_raw: row.get(3)?,
        time: row.get(4)?,
        location: row.get(5)?,
        entry_type: row.get(6)?,
        website: row.get(7)?,
        highlights,
        raw_ocr,
        full_text: row.get(10)?,
        embedding,
    })
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

    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    score.clamp(0.0, 1.0)
}
