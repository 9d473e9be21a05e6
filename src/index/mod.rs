//! Persisted champion index: SQLite + sqlite-vec.
//!
//! One database file is one index generation: champion payloads, their
//! embeddings in a vec0 virtual table joined by rowid, and a meta table
//! carrying the vector dimensionality and build time.

use std::path::Path;
use std::sync::Once;

use chrono::Utc;
use rusqlite::{Connection, params};
use sqlite_vec::sqlite3_vec_init;
use thiserror::Error;
use tracing::debug;

use crate::embedder::EmbedderError;

pub mod build;

/// Errors from building, loading, or querying the index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("index io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("not a champion index: {0}")]
    Malformed(String),

    #[error(transparent)]
    Embedder(#[from] EmbedderError),
}

static INIT_VEC: Once = Once::new();

/// Register the sqlite-vec extension process-wide. Safe to call repeatedly.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

fn schema_sql(dimensions: usize) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS champions (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    engagement REAL NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS vec_champions USING vec0(
    embedding FLOAT[{dimensions}]
);
"#
    )
}

/// Payload stored for one champion listing.
#[derive(Debug, Clone)]
pub struct IndexedItem {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub engagement: f64,
}

/// One search hit: an indexed champion plus its similarity score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub engagement: f64,
    /// `1 − cosine distance`, so identical direction scores 1.0.
    pub score: f64,
}

/// A connection to one index generation.
#[derive(Debug)]
pub struct ChampionIndex {
    conn: Connection,
    dimensions: usize,
}

impl ChampionIndex {
    /// Create an empty index at `path` for vectors of `dimensions`.
    pub fn create<P: AsRef<Path>>(path: P, dimensions: usize) -> Result<Self, IndexError> {
        if dimensions == 0 {
            return Err(IndexError::Malformed(
                "vector dimensionality must be positive".to_string(),
            ));
        }
        init_sqlite_vec();
        let conn = Connection::open(path)?;

        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        debug!("sqlite-vec {vec_version}");

        conn.execute_batch(&schema_sql(dimensions))?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('dimensions', ?)",
            params![dimensions.to_string()],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('built_at', ?)",
            params![Utc::now().to_rfc3339()],
        )?;

        Ok(Self { conn, dimensions })
    }

    /// In-memory index, for tests.
    pub fn create_in_memory(dimensions: usize) -> Result<Self, IndexError> {
        if dimensions == 0 {
            return Err(IndexError::Malformed(
                "vector dimensionality must be positive".to_string(),
            ));
        }
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&schema_sql(dimensions))?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('dimensions', ?)",
            params![dimensions.to_string()],
        )?;
        Ok(Self { conn, dimensions })
    }

    /// Open a previously persisted index.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(IndexError::Malformed(format!(
                "no index file at {}",
                path.display()
            )));
        }

        init_sqlite_vec();
        let conn = Connection::open(path)?;

        let has_meta: i64 = conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
            [],
            |row| row.get(0),
        )?;
        if has_meta == 0 {
            return Err(IndexError::Malformed(format!(
                "{} has no meta table",
                path.display()
            )));
        }

        let raw: String = conn.query_row(
            "SELECT value FROM meta WHERE key = 'dimensions'",
            [],
            |row| row.get(0),
        )?;
        let dimensions: usize = raw
            .parse()
            .map_err(|_| IndexError::Malformed(format!("bad dimensions value: {raw}")))?;

        Ok(Self { conn, dimensions })
    }

    /// Vector dimensionality this index was built with.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of indexed champions.
    pub fn len(&self) -> Result<u64, IndexError> {
        let count: i64 = self
            .conn
            .query_row("SELECT count(*) FROM champions", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len()? == 0)
    }

    /// Insert champions and their vectors in one transaction.
    pub fn insert_items(
        &mut self,
        items: &[IndexedItem],
        vectors: &[Vec<f32>],
    ) -> Result<(), IndexError> {
        assert_eq!(
            items.len(),
            vectors.len(),
            "items and vectors length mismatch"
        );

        let tx = self.conn.transaction()?;
        for (item, vector) in items.iter().zip(vectors) {
            if vector.len() != self.dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: vector.len(),
                });
            }
            tx.execute(
                "INSERT INTO champions (id, title, body, engagement) VALUES (?, ?, ?, ?)",
                params![item.id, item.title, item.body, item.engagement],
            )?;
            tx.execute(
                "INSERT INTO vec_champions (rowid, embedding) VALUES (?, ?)",
                params![item.id, serialize_vector(vector)],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Nearest champions to `query_vector` by cosine distance.
    ///
    /// Results are ordered by descending score, ties by descending
    /// engagement, then ascending id for a total order. An empty index
    /// or a zero limit returns an empty list, never an error. Rows whose
    /// distance is undefined (a zero-magnitude vector on either side)
    /// are dropped rather than surfaced as storage errors.
    pub fn query(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        if query_vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }
        if limit == 0 || self.is_empty()? {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                c.id,
                c.title,
                c.body,
                c.engagement,
                vec_distance_cosine(v.embedding, ?) AS distance
            FROM vec_champions v
            JOIN champions c ON v.rowid = c.id
            ORDER BY distance ASC NULLS LAST, c.engagement DESC, c.id ASC
            LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map(
            params![serialize_vector(query_vector), limit as i64],
            map_result_row,
        )?;

        let mut results = Vec::new();
        for row in rows {
            if let Some(result) = row? {
                results.push(result);
            }
        }
        Ok(results)
    }
}

fn map_result_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<SearchResult>> {
    // vec_distance_cosine yields NULL when either vector has zero
    // magnitude; such rows carry no usable ranking.
    let Some(distance) = row.get::<_, Option<f64>>(4)? else {
        return Ok(None);
    };
    Ok(Some(SearchResult {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        engagement: row.get(3)?,
        score: 1.0 - distance,
    }))
}

/// Serialize an f32 vector into the little-endian blob vec0 expects.
fn serialize_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}
