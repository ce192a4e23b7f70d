//! SQLite database management with migrations
//!
//! Provides structured storage for documents, chunks, stored embeddings and
//! the FTS5 index used by the lexical leg

use crate::error::{RaglineError, Result};
use crate::retrieval::{Chunk, Document, PageLocator, Passage};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

/// One stored vector joined with the fields the vector leg filters and sorts on
#[derive(Debug, Clone)]
pub struct EmbeddingRow {
    pub chunk_id: String,
    pub chunk_index: usize,
    pub is_toc: bool,
    pub vector: Vec<f32>,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RaglineError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        // Build pool with configuration
        let pool = Pool::builder()
            .max_size(16) // Max 16 connections
            .build(manager)
            .map_err(|e| RaglineError::Config(format!("Failed to create connection pool: {}", e)))?;

        // Configure connection
        {
            let conn = pool.get()?;

            // Enable WAL mode for better concurrency
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                ",
            )?;
        }

        let db = Self { pool };

        // Run migrations
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        // Create migrations table if it doesn't exist
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        // Get current version
        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        // Apply migrations
        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Replace a document together with all of its chunks
    ///
    /// Existing chunks of the document (and their embeddings) are removed
    /// first so the FTS index never keeps stale rows.
    pub fn replace_document(&self, document: &Document, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        upsert_document(&tx, document)?;
        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document.id],
        )?;
        for chunk in chunks {
            insert_chunk(&tx, chunk)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Store (or overwrite) the embedding of a chunk for one model
    pub fn upsert_embedding(&self, chunk_id: &str, model: &str, vector: &[f32]) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO embeddings (chunk_id, model, dimension, vector)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chunk_id, model) DO UPDATE SET
                dimension = excluded.dimension,
                vector = excluded.vector",
            params![chunk_id, model, vector.len() as i64, encode_vector(vector)],
        )?;
        Ok(())
    }

    /// Every stored embedding of `model`, optionally skipping TOC chunks
    pub fn embeddings_for_model(&self, model: &str, exclude_toc: bool) -> Result<Vec<EmbeddingRow>> {
        read_embeddings(&*self.get_conn()?, model, exclude_toc)
    }

    /// Full-text search over chunk content, best bm25 first
    ///
    /// `match_expression` must already be valid FTS5 syntax.
    pub fn search_fts(
        &self,
        match_expression: &str,
        limit: usize,
        exclude_toc: bool,
    ) -> Result<Vec<String>> {
        read_fts(&*self.get_conn()?, match_expression, limit, exclude_toc)
    }

    /// Load passages for the given chunk ids, keyed by chunk id
    ///
    /// Missing ids are simply absent from the map. Chunks of the same
    /// document share one `Arc<Document>`.
    pub fn load_passages(&self, chunk_ids: &[String]) -> Result<HashMap<String, Passage>> {
        if chunk_ids.is_empty() {
            return Ok(HashMap::new());
        }
        read_passages(&*self.get_conn()?, chunk_ids)
    }

    /// Fetch a single document by id
    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.get_conn()?;
        let document = conn
            .query_row(
                "SELECT id, title, source, metadata FROM documents WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Document {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        source: row.get(2)?,
                        metadata: parse_metadata(row.get::<_, Option<String>>(3)?),
                    })
                },
            )
            .optional()?;
        Ok(document)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let document_count = count(&conn, "SELECT COUNT(*) FROM documents")?;
        let chunk_count = count(&conn, "SELECT COUNT(*) FROM chunks")?;
        let toc_chunk_count = count(&conn, "SELECT COUNT(*) FROM chunks WHERE is_toc = 1")?;
        let embedding_count = count(&conn, "SELECT COUNT(*) FROM embeddings")?;

        let mut stmt = conn.prepare(
            "SELECT model, dimension, COUNT(*) FROM embeddings
             GROUP BY model, dimension ORDER BY model",
        )?;
        let models = stmt
            .query_map([], |row| {
                Ok(ModelStats {
                    model: row.get(0)?,
                    dimension: row.get::<_, i64>(1)? as usize,
                    count: row.get::<_, i64>(2)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(DbStats {
            document_count,
            chunk_count,
            toc_chunk_count,
            embedding_count,
            models,
        })
    }
}

/// Ids bound per `IN (...)` lookup, well under SQLite's parameter limit
const LOOKUP_BATCH: usize = 500;

pub(crate) fn read_embeddings(
    conn: &Connection,
    model: &str,
    exclude_toc: bool,
) -> Result<Vec<EmbeddingRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT c.id, c.chunk_index, c.is_toc, e.vector
         FROM embeddings e
         JOIN chunks c ON c.id = e.chunk_id
         WHERE e.model = ?1 AND (?2 = 0 OR c.is_toc = 0)",
    )?;

    let rows = stmt.query_map(params![model, exclude_toc], |row| {
        let blob: Vec<u8> = row.get(3)?;
        Ok(EmbeddingRow {
            chunk_id: row.get(0)?,
            chunk_index: row.get::<_, i64>(1)? as usize,
            is_toc: row.get(2)?,
            vector: decode_vector(&blob),
        })
    })?;

    let embeddings = rows.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(embeddings)
}

pub(crate) fn read_fts(
    conn: &Connection,
    match_expression: &str,
    limit: usize,
    exclude_toc: bool,
) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT c.id
         FROM chunks_fts
         JOIN chunks c ON c.seq = chunks_fts.rowid
         WHERE chunks_fts MATCH ?1 AND (?2 = 0 OR c.is_toc = 0)
         ORDER BY bm25(chunks_fts), c.chunk_index, c.id
         LIMIT ?3",
    )?;

    let ids = stmt
        .query_map(params![match_expression, exclude_toc, limit as i64], |row| {
            row.get(0)
        })?
        .collect::<std::result::Result<Vec<String>, _>>()?;

    Ok(ids)
}

pub(crate) fn read_passages(
    conn: &Connection,
    chunk_ids: &[String],
) -> Result<HashMap<String, Passage>> {
    let mut documents: HashMap<String, Arc<Document>> = HashMap::new();
    let mut passages = HashMap::with_capacity(chunk_ids.len());

    for batch in chunk_ids.chunks(LOOKUP_BATCH) {
        let placeholders = vec!["?"; batch.len()].join(", ");
        let sql = format!(
            "SELECT c.id, c.document_id, c.content, c.content_preview, c.token_count,
                    c.is_toc, c.metadata, c.chunk_index, c.page_start, c.page_end,
                    d.title, d.source, d.metadata
             FROM chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE c.id IN ({})",
            placeholders
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(batch.iter()), |row| {
            Ok((chunk_from_row(row)?, document_from_row(row)?))
        })?;

        for row in rows {
            let (chunk, document) = row?;
            let document = documents
                .entry(document.id.clone())
                .or_insert_with(|| Arc::new(document))
                .clone();
            passages.insert(chunk.id.clone(), Passage::new(Arc::new(chunk), document));
        }
    }

    Ok(passages)
}

fn count(conn: &Connection, sql: &str) -> Result<usize> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as usize)
}

fn upsert_document(tx: &Transaction<'_>, document: &Document) -> Result<()> {
    tx.execute(
        "INSERT INTO documents (id, title, source, metadata)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            source = excluded.source,
            metadata = excluded.metadata",
        params![
            document.id,
            document.title,
            document.source,
            encode_metadata(&document.metadata)?
        ],
    )?;
    Ok(())
}

fn insert_chunk(tx: &Transaction<'_>, chunk: &Chunk) -> Result<()> {
    tx.execute(
        "INSERT INTO chunks (id, document_id, content, content_preview, token_count,
                             is_toc, metadata, chunk_index, page_start, page_end)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            chunk.id,
            chunk.document_id,
            chunk.content,
            chunk.content_preview,
            chunk.token_count as i64,
            chunk.is_toc,
            encode_metadata(&chunk.metadata)?,
            chunk.chunk_index as i64,
            chunk.page.map(|p| p.start),
            chunk.page.and_then(|p| p.end),
        ],
    )?;
    Ok(())
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    let page_start: Option<u32> = row.get(8)?;
    let page_end: Option<u32> = row.get(9)?;

    Ok(Chunk {
        id: row.get(0)?,
        document_id: row.get(1)?,
        content: row.get(2)?,
        content_preview: row.get(3)?,
        token_count: row.get::<_, i64>(4)? as usize,
        is_toc: row.get(5)?,
        metadata: parse_metadata(row.get(6)?),
        chunk_index: row.get::<_, i64>(7)? as usize,
        page: page_start.map(|start| PageLocator {
            start,
            end: page_end,
        }),
    })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(1)?,
        title: row.get(10)?,
        source: row.get(11)?,
        metadata: parse_metadata(row.get(12)?),
    })
}

fn encode_metadata(metadata: &HashMap<String, Value>) -> Result<Option<String>> {
    if metadata.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(metadata)
        .map(Some)
        .map_err(|e| RaglineError::Json {
            source: e,
            context: "Failed to encode metadata".to_string(),
        })
}

fn parse_metadata(raw: Option<String>) -> HashMap<String, Value> {
    raw.and_then(|json| match serde_json::from_str(&json) {
        Ok(map) => Some(map),
        Err(e) => {
            tracing::warn!("Ignoring malformed metadata: {}", e);
            None
        }
    })
    .unwrap_or_default()
}

/// Little-endian f32 blob
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub toc_chunk_count: usize,
    pub embedding_count: usize,
    pub models: Vec<ModelStats>,
}

/// Stored embeddings per model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelStats {
    pub model: String,
    pub dimension: usize,
    pub count: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Documents table (one row per ingested source)
    CREATE TABLE documents (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        source TEXT NOT NULL,
        metadata TEXT  -- JSON metadata
    );

    -- Chunks table (retrievable units)
    CREATE TABLE chunks (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        document_id TEXT NOT NULL,
        content TEXT NOT NULL,
        content_preview TEXT,
        token_count INTEGER NOT NULL DEFAULT 0,
        is_toc BOOLEAN NOT NULL DEFAULT 0,
        metadata TEXT,  -- JSON metadata
        chunk_index INTEGER NOT NULL,
        page_start INTEGER,
        page_end INTEGER,
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_chunks_document ON chunks(document_id);
    CREATE INDEX idx_chunks_toc ON chunks(is_toc);

    -- Embeddings table
    CREATE TABLE embeddings (
        chunk_id TEXT NOT NULL,
        model TEXT NOT NULL,
        dimension INTEGER NOT NULL,
        vector BLOB NOT NULL,
        PRIMARY KEY (chunk_id, model),
        FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_embeddings_model ON embeddings(model);

    -- Full-text index over chunk content
    CREATE VIRTUAL TABLE chunks_fts USING fts5(
        content,
        content = 'chunks',
        content_rowid = 'seq',
        tokenize = 'unicode61 remove_diacritics 2'
    );

    CREATE TRIGGER chunks_ai AFTER INSERT ON chunks BEGIN
        INSERT INTO chunks_fts (rowid, content) VALUES (new.seq, new.content);
    END;

    CREATE TRIGGER chunks_ad AFTER DELETE ON chunks BEGIN
        INSERT INTO chunks_fts (chunks_fts, rowid, content) VALUES ('delete', old.seq, old.content);
    END;

    CREATE TRIGGER chunks_au AFTER UPDATE ON chunks BEGIN
        INSERT INTO chunks_fts (chunks_fts, rowid, content) VALUES ('delete', old.seq, old.content);
        INSERT INTO chunks_fts (rowid, content) VALUES (new.seq, new.content);
    END;
    "#,
];
