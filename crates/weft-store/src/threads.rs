use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use weft_core::ids::ThreadId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A stored thread row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadRow {
    pub id: ThreadId,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ThreadRepo {
    db: Database,
}

impl ThreadRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new thread.
    #[instrument(skip(self))]
    pub fn create(&self, title: Option<&str>) -> Result<ThreadRow, StoreError> {
        let id = ThreadId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO threads (id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                rusqlite::params![id.as_str(), title, now],
            )?;

            Ok(ThreadRow {
                id,
                title: title.map(str::to_string),
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    /// Get a thread by ID.
    #[instrument(skip(self), fields(thread_id = %id))]
    pub fn get(&self, id: &ThreadId) -> Result<ThreadRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, created_at, updated_at FROM threads WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_thread(row),
                None => Err(StoreError::NotFound(format!("thread {id}"))),
            }
        })
    }

    /// Get a thread by ID, creating an empty row if it does not exist yet.
    /// Lets callers address a thread by a caller-supplied ID before any
    /// message has been persisted to it.
    #[instrument(skip(self), fields(thread_id = %id))]
    pub fn get_or_create(&self, id: &ThreadId) -> Result<ThreadRow, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO threads (id, title, created_at, updated_at)
                 VALUES (?1, NULL, ?2, ?2)",
                rusqlite::params![id.as_str(), now],
            )?;
            let mut stmt = conn.prepare(
                "SELECT id, title, created_at, updated_at FROM threads WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_thread(row),
                None => Err(StoreError::NotFound(format!("thread {id}"))),
            }
        })
    }

    /// List threads, most recently updated first.
    #[instrument(skip(self))]
    pub fn list(&self, limit: u32, offset: u32) -> Result<Vec<ThreadRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, created_at, updated_at FROM threads
                 ORDER BY updated_at DESC
                 LIMIT ?1 OFFSET ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![limit, offset])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_thread(row)?);
            }
            Ok(results)
        })
    }

    /// Update a thread's title.
    #[instrument(skip(self), fields(thread_id = %id))]
    pub fn update_title(&self, id: &ThreadId, title: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let rows = conn.execute(
                "UPDATE threads SET title = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![title, now, id.as_str()],
            )?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!("thread {id}")));
            }
            Ok(())
        })
    }

    /// Delete a thread. Messages and todos cascade.
    #[instrument(skip(self), fields(thread_id = %id))]
    pub fn delete(&self, id: &ThreadId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM threads WHERE id = ?1", [id.as_str()])?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!("thread {id}")));
            }
            Ok(())
        })
    }
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> Result<ThreadRow, StoreError> {
    Ok(ThreadRow {
        id: ThreadId::from_raw(row_helpers::get::<String>(row, 0, "threads", "id")?),
        title: row_helpers::get_opt(row, 1, "threads", "title")?,
        created_at: row_helpers::get(row, 2, "threads", "created_at")?,
        updated_at: row_helpers::get(row, 3, "threads", "updated_at")?,
    })
}
