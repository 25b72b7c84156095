use chrono::Utc;
use serde::{Deserialize, Serialize};

use weft_core::ids::ThreadId;

use crate::database::Database;
use crate::error::StoreError;

/// A single item on a thread's named todo list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TodoRow {
    pub id: i64,
    pub thread_id: ThreadId,
    pub list_name: String,
    pub content: String,
    pub done: bool,
    pub position: i64,
    pub created_at: String,
}

pub struct TodoRepo {
    db: Database,
}

impl TodoRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Add an item to the end of a list.
    pub fn add(
        &self,
        thread_id: &ThreadId,
        list_name: &str,
        content: &str,
    ) -> Result<TodoRow, StoreError> {
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let position: i64 = conn.query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM todos
                 WHERE thread_id = ?1 AND list_name = ?2",
                rusqlite::params![thread_id.as_str(), list_name],
                |row| row.get(0),
            )?;

            conn.execute(
                "INSERT INTO todos (thread_id, list_name, content, done, position, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)",
                rusqlite::params![thread_id.as_str(), list_name, content, position, now],
            )?;
            let id = conn.last_insert_rowid();

            Ok(TodoRow {
                id,
                thread_id: thread_id.clone(),
                list_name: list_name.to_string(),
                content: content.to_string(),
                done: false,
                position,
                created_at: now,
            })
        })
    }

    /// Mark an item done or not done.
    pub fn set_done(&self, id: i64, done: bool) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE todos SET done = ?1 WHERE id = ?2",
                rusqlite::params![done, id],
            )?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!("todo {id}")));
            }
            Ok(())
        })
    }

    /// Remove an item.
    pub fn remove(&self, id: i64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM todos WHERE id = ?1", [id])?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!("todo {id}")));
            }
            Ok(())
        })
    }

    /// List the items of one named list, in position order.
    pub fn list(&self, thread_id: &ThreadId, list_name: &str) -> Result<Vec<TodoRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, thread_id, list_name, content, done, position, created_at
                 FROM todos WHERE thread_id = ?1 AND list_name = ?2
                 ORDER BY position ASC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![thread_id.as_str(), list_name], row_to_todo)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Distinct list names for a thread.
    pub fn list_names(&self, thread_id: &ThreadId) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT list_name FROM todos WHERE thread_id = ?1
                 ORDER BY list_name ASC",
            )?;
            let rows = stmt
                .query_map([thread_id.as_str()], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn row_to_todo(row: &rusqlite::Row<'_>) -> rusqlite::Result<TodoRow> {
    Ok(TodoRow {
        id: row.get(0)?,
        thread_id: ThreadId::from_raw(row.get::<_, String>(1)?),
        list_name: row.get(2)?,
        content: row.get(3)?,
        done: row.get(4)?,
        position: row.get(5)?,
        created_at: row.get(6)?,
    })
}
