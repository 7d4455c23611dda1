//! Episode Records.
//!
//! The authoritative copy of every [`Episode`], one row per episode in the
//! `episodes` table.  The vector and time indexes are derived from these
//! rows and can be rebuilt from them.
//!
//! | column          | type    | description                              |
//! |-----------------|---------|------------------------------------------|
//! | id              | TEXT    | episode ID (primary key)                 |
//! | task_id         | TEXT    | owning task                              |
//! | start_time      | INTEGER | epoch milliseconds                       |
//! | end_time        | INTEGER | epoch milliseconds, NULL while ongoing   |
//! | embedding       | BLOB    | little-endian f32 vector                 |
//! | metadata        | TEXT    | opaque JSON                              |
//! | linked_episodes | TEXT    | JSON array of episode IDs                |
//! | created_at      | TEXT    | RFC-3339 (UTC)                           |
//! | updated_at      | TEXT    | RFC-3339 (UTC)                           |

use std::path::Path;

use chrono::{DateTime, Utc};
use mnemos_types::{Episode, Timestamp};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

const COLUMNS: &str =
    "id, task_id, start_time, end_time, embedding, metadata, linked_episodes, created_at, updated_at";

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn text_as<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    text.parse::<DateTime<Utc>>()
        .map_err(|e| rusqlite::Error::InvalidColumnType(idx, e.to_string(), Type::Text))
}

fn episode_from_row(row: &Row<'_>) -> rusqlite::Result<Episode> {
    let blob: Vec<u8> = row.get(4)?;
    Ok(Episode {
        id: row.get(0)?,
        task_id: row.get(1)?,
        start_time: row.get(2)?,
        end_time: row.get(3)?,
        embedding: bytes_to_embedding(&blob),
        metadata: text_as(row, 5)?,
        linked_episodes: text_as(row, 6)?,
        created_at: time_at(row, 7)?,
        updated_at: time_at(row, 8)?,
    })
}

/// SQLite-backed episode table.
pub struct EpisodeRecords {
    conn: Mutex<Connection>,
}

impl EpisodeRecords {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS episodes (
                id              TEXT NOT NULL PRIMARY KEY,
                task_id         TEXT NOT NULL,
                start_time      INTEGER NOT NULL,
                end_time        INTEGER,
                embedding       BLOB NOT NULL,
                metadata        TEXT NOT NULL,
                linked_episodes TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_episodes_start ON episodes(start_time);
            CREATE INDEX IF NOT EXISTS idx_episodes_task ON episodes(task_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace the row for `episode.id`.
    pub fn put(&self, episode: &Episode) -> Result<(), rusqlite::Error> {
        let metadata = serde_json::to_string(&episode.metadata)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let links = serde_json::to_string(&episode.linked_episodes)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO episodes
                 (id, task_id, start_time, end_time, embedding, metadata, linked_episodes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                episode.id,
                episode.task_id,
                episode.start_time,
                episode.end_time,
                embedding_to_bytes(&episode.embedding),
                metadata,
                links,
                episode.created_at.to_rfc3339(),
                episode.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> rusqlite::Result<Option<Episode>> {
        self.conn
            .lock()
            .query_row(
                &format!("SELECT {COLUMNS} FROM episodes WHERE id = ?1"),
                [id],
                episode_from_row,
            )
            .optional()
    }

    pub fn contains(&self, id: &str) -> rusqlite::Result<bool> {
        self.conn
            .lock()
            .query_row("SELECT 1 FROM episodes WHERE id = ?1", [id], |_| Ok(()))
            .optional()
            .map(|r| r.is_some())
    }

    /// Returns `false` when no row existed.
    pub fn delete(&self, id: &str) -> rusqlite::Result<bool> {
        Ok(self.conn.lock().execute("DELETE FROM episodes WHERE id = ?1", [id])? > 0)
    }

    pub fn count(&self) -> rusqlite::Result<usize> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM episodes", [], |r| r.get(0))
    }

    /// Ongoing episodes that started strictly before `before`.
    pub fn ongoing_started_before(&self, before: Timestamp) -> rusqlite::Result<Vec<Episode>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM episodes
             WHERE end_time IS NULL AND start_time < ?1
             ORDER BY start_time, id"
        ))?;
        let rows = stmt.query_map([before], episode_from_row)?;
        rows.collect()
    }

    /// Every episode, oldest start first.
    pub fn all(&self) -> rusqlite::Result<Vec<Episode>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM episodes ORDER BY start_time, id"
        ))?;
        let rows = stmt.query_map([], episode_from_row)?;
        rows.collect()
    }
}
