//! `SearchBackend` over the SQLite repository
//!
//! The vector leg is an exact scan: every stored vector of the configured
//! model is compared with the query by cosine similarity. The lexical leg
//! uses the FTS5 index ranked by bm25. All SQLite work runs on the blocking
//! thread pool and stops when the calling future is dropped: the running
//! statement is interrupted and the similarity scan checks a cancel flag.

use crate::backend::{BackendError, SearchBackend};
use crate::retrieval::{tokenize, LexicalHit, VectorHit};
use crate::storage::database::{read_embeddings, read_fts, read_passages};
use crate::storage::Database;
use async_trait::async_trait;
use rusqlite::{Connection, InterruptHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Rows scored between two cancel checks
const CANCEL_CHECK_INTERVAL: usize = 256;

pub struct SqliteBackend {
    db: Arc<Database>,
    model: String,
}

impl SqliteBackend {
    /// Search the vectors stored for `model`
    pub fn new(db: Arc<Database>, model: impl Into<String>) -> Self {
        Self {
            db,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Cosine similarity, 0 for mismatched or zero-length vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Turn free text into an FTS5 query that cannot contain operators
///
/// Each word becomes a quoted term and terms are OR-ed. One-character words
/// are dropped unless nothing else is left. Returns `None` for text without
/// any word.
pub fn fts_match_expression(query: &str) -> Option<String> {
    let terms = tokenize(query);
    let long: Vec<&String> = terms.iter().filter(|t| t.chars().count() > 1).collect();
    let selected: Vec<&String> = if long.is_empty() {
        terms.iter().collect()
    } else {
        long
    };

    if selected.is_empty() {
        return None;
    }

    Some(
        selected
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Cancel state shared by a leg and its blocking work
#[derive(Default)]
struct LegCancel {
    cancelled: AtomicBool,
    /// Interrupt handle of the connection currently in use
    interrupt: Mutex<Option<InterruptHandle>>,
}

impl LegCancel {
    fn slot(&self) -> MutexGuard<'_, Option<InterruptHandle>> {
        self.interrupt.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.is_cancelled() {
            Err(BackendError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Register the connection the work is about to use
    fn watch(&self, conn: &Connection) -> Result<(), BackendError> {
        *self.slot() = Some(conn.get_interrupt_handle());
        self.check()
    }

    /// Forget the connection before it goes back to the pool
    fn release(&self) {
        self.slot().take();
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Interrupt under the lock so `release` cannot hand the connection
        // to another request in between
        if let Some(handle) = self.slot().as_ref() {
            handle.interrupt();
        }
    }
}

/// Cancels the blocking work when the awaiting future goes away
struct CancelOnDrop(Arc<LegCancel>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Run `work` on a pooled connection in the blocking pool
///
/// Dropping the returned future interrupts the connection and sets the cancel
/// flag `work` is given.
async fn blocking<T, F>(db: &Arc<Database>, work: F) -> Result<T, BackendError>
where
    T: Send + 'static,
    F: FnOnce(&Connection, &LegCancel) -> Result<T, BackendError> + Send + 'static,
{
    let cancel = Arc::new(LegCancel::default());
    let _guard = CancelOnDrop(Arc::clone(&cancel));
    let db = Arc::clone(db);

    tokio::task::spawn_blocking(move || {
        let conn = db.get_conn()?;
        let result = cancel.watch(&conn).and_then(|()| work(&*conn, &*cancel));
        cancel.release();

        match result {
            Err(_) if cancel.is_cancelled() => {
                debug!("Backend work abandoned");
                Err(BackendError::Cancelled)
            }
            other => other,
        }
    })
    .await
    .map_err(|e| BackendError::Task(e.to_string()))?
}

#[async_trait]
impl SearchBackend for SqliteBackend {
    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
        similarity_threshold: f32,
        exclude_toc: bool,
    ) -> Result<Vec<VectorHit>, BackendError> {
        let model = self.model.clone();
        let query = embedding.to_vec();

        blocking(&self.db, move |conn, cancel| {
            let rows = read_embeddings(conn, &model, exclude_toc)?;

            let mut skipped = 0usize;
            let mut scored: Vec<(String, usize, f32)> = Vec::new();
            for (scanned, row) in rows.into_iter().enumerate() {
                if scanned % CANCEL_CHECK_INTERVAL == 0 {
                    cancel.check()?;
                }
                if row.vector.len() != query.len() {
                    skipped += 1;
                    continue;
                }
                let similarity = cosine_similarity(&query, &row.vector);
                if similarity >= similarity_threshold {
                    scored.push((row.chunk_id, row.chunk_index, similarity));
                }
            }
            if skipped > 0 {
                warn!(
                    skipped,
                    expected = query.len(),
                    "Stored vectors with a different dimension were ignored"
                );
            }

            scored.sort_by(|a, b| {
                b.2.total_cmp(&a.2)
                    .then_with(|| a.1.cmp(&b.1))
                    .then_with(|| a.0.cmp(&b.0))
            });
            scored.truncate(limit);

            let ids: Vec<String> = scored.iter().map(|(id, _, _)| id.clone()).collect();
            cancel.check()?;
            let mut passages = read_passages(conn, &ids)?;

            let hits: Vec<VectorHit> = scored
                .into_iter()
                .filter_map(|(id, _, similarity)| {
                    passages
                        .remove(&id)
                        .map(|passage| VectorHit { passage, similarity })
                })
                .collect();

            debug!(hits = hits.len(), "Vector leg complete");
            Ok(hits)
        })
        .await
    }

    async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        exclude_toc: bool,
    ) -> Result<Vec<LexicalHit>, BackendError> {
        let Some(expression) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };

        blocking(&self.db, move |conn, cancel| {
            let ids = read_fts(conn, &expression, limit, exclude_toc)?;
            cancel.check()?;
            let mut passages = read_passages(conn, &ids)?;

            let hits: Vec<LexicalHit> = ids
                .iter()
                .filter_map(|id| passages.remove(id))
                .enumerate()
                .map(|(idx, passage)| LexicalHit {
                    passage,
                    rank: idx + 1,
                })
                .collect();

            debug!(hits = hits.len(), "Lexical leg complete");
            Ok(hits)
        })
        .await
    }
}
