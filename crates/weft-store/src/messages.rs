use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use weft_core::ids::{MessageId, ThreadId};
use weft_core::merge::merge_function_responses;
use weft_core::messages::{FunctionResponse, Message, Part};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A stored message row. `seq` is the thread-local insertion order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRow {
    pub seq: i64,
    pub message: Message,
}

/// Per-thread append lock for seq linearization.
struct ThreadLocks {
    locks: HashMap<String, Arc<Mutex<()>>>,
}

impl ThreadLocks {
    fn new() -> Self {
        Self {
            locks: HashMap::new(),
        }
    }

    fn get(&mut self, thread_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

pub struct MessageRepo {
    db: Database,
    thread_locks: Mutex<ThreadLocks>,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            thread_locks: Mutex::new(ThreadLocks::new()),
        }
    }

    /// Append a message to its thread. Atomically:
    /// 1. Acquires per-thread lock
    /// 2. Reads current max seq
    /// 3. Inserts message with seq = max + 1
    /// 4. Touches the thread's updated_at
    #[instrument(skip(self, message), fields(thread_id = %message.thread_id, message_id = %message.id))]
    pub fn append(&self, message: &Message) -> Result<MessageRow, StoreError> {
        let lock = self.thread_locks.lock().get(message.thread_id.as_str());
        let _guard = lock.lock();

        self.db.with_conn(|conn| {
            let max_seq: i64 = conn
                .query_row(
                    "SELECT COALESCE((SELECT MAX(seq) FROM messages WHERE thread_id = ?1), -1)
                     FROM threads WHERE id = ?1",
                    [message.thread_id.as_str()],
                    |row| row.get(0),
                )
                .map_err(|_| StoreError::NotFound(format!("thread {}", message.thread_id)))?;

            let seq = max_seq + 1;
            let now = Utc::now().to_rfc3339();

            conn.execute(
                "INSERT INTO messages (id, thread_id, seq, role, parts, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    message.id.as_str(),
                    message.thread_id.as_str(),
                    seq,
                    message.role.to_string(),
                    serde_json::to_string(&message.parts)?,
                    message.created_at.to_rfc3339(),
                ],
            )?;

            conn.execute(
                "UPDATE threads SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, message.thread_id.as_str()],
            )?;

            Ok(MessageRow {
                seq,
                message: message.clone(),
            })
        })
    }

    /// Fold a function response into the message that issued the matching
    /// call — the one permitted mutation of a stored row. The response part
    /// is inserted directly after its `functionCall` part and the `parts`
    /// column rewritten. `Conflict` when the target has no matching call or
    /// the call already carries a response.
    #[instrument(skip(self, response), fields(message_id = %message_id, call_id = %response.id))]
    pub fn merge_response(
        &self,
        message_id: &MessageId,
        response: FunctionResponse,
    ) -> Result<MessageRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut row = {
                let mut stmt = conn.prepare(
                    "SELECT id, thread_id, seq, role, parts, created_at
                     FROM messages WHERE id = ?1",
                )?;
                let mut rows = stmt.query([message_id.as_str()])?;
                match rows.next()? {
                    Some(r) => row_to_message(r)?,
                    None => return Err(StoreError::NotFound(format!("message {message_id}"))),
                }
            };

            if row.message.has_response_for(&response.id) {
                return Err(StoreError::Conflict(format!(
                    "call {} already has a response",
                    response.id
                )));
            }

            let call_pos = row.message.parts.iter().position(|p| match p {
                Part::FunctionCall(fc) => fc.id == response.id,
                _ => false,
            });
            let Some(pos) = call_pos else {
                return Err(StoreError::Conflict(format!(
                    "message {message_id} has no call {}",
                    response.id
                )));
            };

            row.message
                .parts
                .insert(pos + 1, Part::FunctionResponse(response));

            conn.execute(
                "UPDATE messages SET parts = ?1 WHERE id = ?2",
                rusqlite::params![
                    serde_json::to_string(&row.message.parts)?,
                    message_id.as_str()
                ],
            )?;

            Ok(row)
        })
    }

    /// Get a single message by ID.
    #[instrument(skip(self), fields(message_id = %message_id))]
    pub fn get(&self, message_id: &MessageId) -> Result<MessageRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, thread_id, seq, role, parts, created_at
                 FROM messages WHERE id = ?1",
            )?;
            let mut rows = stmt.query([message_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_message(row),
                None => Err(StoreError::NotFound(format!("message {message_id}"))),
            }
        })
    }

    /// List all messages for a thread in append order. This is the raw
    /// persisted log; function responses appear where they were appended.
    #[instrument(skip(self), fields(thread_id = %thread_id))]
    pub fn list(&self, thread_id: &ThreadId) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, thread_id, seq, role, parts, created_at
                 FROM messages WHERE thread_id = ?1
                 ORDER BY seq ASC",
            )?;
            let mut rows = stmt.query([thread_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?.message);
            }
            Ok(results)
        })
    }

    /// Load a thread's history with any stray function responses spliced
    /// next to the calls that produced them. For display consumers; a
    /// history whose responses were already folded in passes through
    /// unchanged.
    #[instrument(skip(self), fields(thread_id = %thread_id))]
    pub fn merged_history(&self, thread_id: &ThreadId) -> Result<Vec<Message>, StoreError> {
        let raw = self.list(thread_id)?;
        Ok(merge_function_responses(&raw))
    }

    /// Count messages in a thread.
    #[instrument(skip(self), fields(thread_id = %thread_id))]
    pub fn count(&self, thread_id: &ThreadId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE thread_id = ?1",
                [thread_id.as_str()],
                |row| row.get(0),
            )?)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, StoreError> {
    let role_str: String = row_helpers::get(row, 3, "messages", "role")?;
    let parts_str: String = row_helpers::get(row, 4, "messages", "parts")?;
    let created_str: String = row_helpers::get(row, 5, "messages", "created_at")?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map_err(|e| StoreError::CorruptRow {
            table: "messages",
            column: "created_at",
            detail: e.to_string(),
        })?
        .with_timezone(&Utc);

    Ok(MessageRow {
        seq: row_helpers::get(row, 2, "messages", "seq")?,
        message: Message {
            id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
            thread_id: ThreadId::from_raw(row_helpers::get::<String>(
                row,
                1,
                "messages",
                "thread_id",
            )?),
            role: row_helpers::parse_enum(&role_str, "messages", "role")?,
            parts: row_helpers::parse_json(&parts_str, "messages", "parts")?,
            created_at,
        },
    })
}
