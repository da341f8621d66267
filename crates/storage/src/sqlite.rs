//! SQLite-backed session store.
//!
//! Sessions are keyed by a unique connection identifier and carry an
//! append-only message log ordered by a per-session sequence number. Saves run
//! in a single transaction that re-reads the highest persisted sequence number
//! before appending, so retried or concurrent saves never duplicate messages
//! and the log stays gapless. SQLite's writer lock serializes the transaction
//! against other writers for the same session.

use crate::cache::{CACHE_TTL, ContextCache};
use crate::store::{DURABLE_EXPIRY_DAYS, MAX_HISTORY_MESSAGES, SessionStore};
use crate::{ChatMessage, ConversationContext, Error, ExtractedInfo, Result, Role};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// One row of session metadata, for operational listings.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub connection_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub message_count: usize,
}

/// Durable session store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    cache: Option<ContextCache>,
    expiry: chrono::Duration,
    max_history: usize,
}

impl SqliteStore {
    /// Open or create a session store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Create an in-memory session store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            cache: Some(ContextCache::new(CACHE_TTL)),
            expiry: chrono::Duration::days(DURABLE_EXPIRY_DAYS),
            max_history: MAX_HISTORY_MESSAGES,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Disable the read-through cache; all reads hit SQLite directly.
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    /// Override the sliding expiry window (useful for testing).
    pub fn with_expiry(mut self, expiry: chrono::Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// Override the retention ceiling (useful for testing).
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY,
                connection_id TEXT NOT NULL UNIQUE,
                extracted_info TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY,
                session_id INTEGER NOT NULL
                    REFERENCES sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tool_call_id TEXT,
                tool_calls TEXT,
                sequence_number INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(session_id, sequence_number)
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session
                ON messages(session_id, sequence_number);
            CREATE INDEX IF NOT EXISTS idx_sessions_expiry
                ON sessions(expires_at);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// List all sessions, most recently created first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT s.connection_id, s.created_at, s.expires_at,
                    (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id)
             FROM sessions s ORDER BY s.created_at DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            let connection_id: String = row.get(0)?;
            let created_at: String = row.get(1)?;
            let expires_at: String = row.get(2)?;
            let message_count: i64 = row.get(3)?;
            Ok((connection_id, created_at, expires_at, message_count))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (connection_id, created_at, expires_at, message_count) = row?;
            sessions.push(SessionSummary {
                connection_id,
                created_at: created_at
                    .parse()
                    .map_err(|e| Error::Corrupt(format!("bad created_at: {e}")))?,
                expires_at: expires_at
                    .parse()
                    .map_err(|e| Error::Corrupt(format!("bad expires_at: {e}")))?,
                message_count: message_count as usize,
            });
        }
        Ok(sessions)
    }

    fn load_messages(conn: &Connection, session_id: i64) -> Result<Vec<ChatMessage>> {
        let mut stmt = conn.prepare(
            "SELECT role, content, tool_call_id, tool_calls FROM messages
             WHERE session_id = ?1 ORDER BY sequence_number",
        )?;

        let rows = stmt.query_map([session_id], |row| {
            let role: String = row.get(0)?;
            let content: String = row.get(1)?;
            let tool_call_id: Option<String> = row.get(2)?;
            let tool_calls: Option<String> = row.get(3)?;
            Ok((role, content, tool_call_id, tool_calls))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content, tool_call_id, tool_calls) = row?;
            let role = Role::parse(&role)
                .ok_or_else(|| Error::Corrupt(format!("unknown message role: {role}")))?;
            let tool_calls = match tool_calls {
                Some(json) => serde_json::from_str(&json)?,
                None => Vec::new(),
            };
            messages.push(ChatMessage {
                role,
                content,
                tool_call_id,
                tool_calls,
            });
        }
        Ok(messages)
    }

    fn append_new_messages(
        &self,
        tx: &Transaction<'_>,
        session_id: i64,
        messages: &[ChatMessage],
    ) -> Result<usize> {
        // Re-read the highest persisted sequence number under the write lock.
        // Appending only the tail beyond it makes save idempotent.
        let max_seq: Option<i64> = tx.query_row(
            "SELECT MAX(sequence_number) FROM messages WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        let existing_count = max_seq.map(|m| m + 1).unwrap_or(0) as usize;

        let now = Utc::now().to_rfc3339();
        let mut stmt = tx.prepare(
            "INSERT INTO messages
                (session_id, role, content, tool_call_id, tool_calls,
                 sequence_number, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;

        for (seq, msg) in messages.iter().enumerate().skip(existing_count) {
            let tool_calls = if msg.tool_calls.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&msg.tool_calls)?)
            };
            stmt.execute(params![
                session_id,
                msg.role.as_str(),
                msg.content,
                msg.tool_call_id,
                tool_calls,
                seq as i64,
                now,
            ])?;
        }

        Ok(existing_count.max(messages.len()))
    }

    fn prune_history(&self, tx: &Transaction<'_>, session_id: i64, total: usize) -> Result<()> {
        if total <= self.max_history * 2 {
            return Ok(());
        }
        let delete_count = total - self.max_history;
        tx.execute(
            "DELETE FROM messages WHERE id IN (
                SELECT id FROM messages WHERE session_id = ?1
                ORDER BY sequence_number ASC LIMIT ?2
             )",
            params![session_id, delete_count as i64],
        )?;
        debug!(session_id, delete_count, "history pruned to retention ceiling");
        Ok(())
    }
}

impl SessionStore for SqliteStore {
    fn get_or_create_context(&self, connection_id: &str) -> Result<ConversationContext> {
        if let Some(cache) = &self.cache {
            if let Some(ctx) = cache.get(connection_id) {
                return Ok(ctx);
            }
        }

        let now = Utc::now();
        let conn = self.lock();

        let row: Option<(i64, String, String)> = conn
            .query_row(
                "SELECT id, extracted_info, expires_at FROM sessions
                 WHERE connection_id = ?1",
                [connection_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        if let Some((session_id, info_json, expires_at)) = row {
            let expires_at = expires_at
                .parse::<DateTime<Utc>>()
                .map_err(|e| Error::Corrupt(format!("bad expires_at: {e}")))?;

            if expires_at > now {
                // Sliding-window renewal on read.
                conn.execute(
                    "UPDATE sessions SET expires_at = ?1 WHERE id = ?2",
                    params![(now + self.expiry).to_rfc3339(), session_id],
                )?;

                let extracted_info: ExtractedInfo = serde_json::from_str(&info_json)?;
                let context = ConversationContext {
                    messages: Self::load_messages(&conn, session_id)?,
                    extracted_info,
                    last_updated: now,
                };
                if let Some(cache) = &self.cache {
                    cache.put(connection_id, &context);
                }
                return Ok(context);
            }

            // Delete the stale row rather than ignoring it, so the insert
            // below cannot hit the unique connection_id constraint.
            conn.execute("DELETE FROM sessions WHERE id = ?1", [session_id])?;
            debug!(connection_id, "expired session deleted");
        }

        conn.execute(
            "INSERT INTO sessions (connection_id, extracted_info, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                connection_id,
                "{}",
                (now + self.expiry).to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        let context = ConversationContext::new();
        if let Some(cache) = &self.cache {
            cache.put(connection_id, &context);
        }
        Ok(context)
    }

    fn save_context(&self, connection_id: &str, context: &ConversationContext) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let session_id: i64 = tx
            .query_row(
                "SELECT id FROM sessions WHERE connection_id = ?1",
                [connection_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::SessionNotFound(connection_id.to_string()))?;

        tx.execute(
            "UPDATE sessions SET extracted_info = ?1, expires_at = ?2 WHERE id = ?3",
            params![
                serde_json::to_string(&context.extracted_info)?,
                (Utc::now() + self.expiry).to_rfc3339(),
                session_id,
            ],
        )?;

        let total = self.append_new_messages(&tx, session_id, &context.messages)?;
        self.prune_history(&tx, session_id, total)?;

        tx.commit()?;
        drop(conn);

        // Cache only after the transaction commits; a crash in between must
        // never leave the cache ahead of durable truth.
        if let Some(cache) = &self.cache {
            let mut cached = context.clone();
            cached.last_updated = Utc::now();
            cache.put(connection_id, &cached);
        }
        Ok(())
    }

    fn clear_context(&self, connection_id: &str) -> Result<()> {
        self.lock().execute(
            "DELETE FROM sessions WHERE connection_id = ?1",
            [connection_id],
        )?;
        if let Some(cache) = &self.cache {
            cache.invalidate(connection_id);
        }
        debug!(connection_id, "context cleared");
        Ok(())
    }

    fn cleanup_expired_sessions(&self) -> Result<usize> {
        let deleted = self.lock().execute(
            "DELETE FROM sessions WHERE expires_at < ?1",
            [Utc::now().to_rfc3339()],
        )?;
        if deleted > 0 {
            debug!(deleted, "expired sessions removed");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCallRequest;

    fn store() -> SqliteStore {
        SqliteStore::in_memory().unwrap()
    }

    fn message_count(s: &SqliteStore, connection_id: &str) -> i64 {
        s.lock()
            .query_row(
                "SELECT COUNT(*) FROM messages m
                 JOIN sessions s ON s.id = m.session_id
                 WHERE s.connection_id = ?1",
                [connection_id],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn round_trip_with_tool_calls() {
        // No cache: every read proves what actually hit the database.
        let s = store().without_cache();
        let mut ctx = s.get_or_create_context("conn-1").unwrap();

        ctx.messages.push(ChatMessage::user("find hotels in Lyon"));
        ctx.messages.push(ChatMessage::assistant_with_calls(
            "",
            vec![ToolCallRequest {
                id: "call_1".into(),
                name: "search_hotels".into(),
                arguments: serde_json::json!({"location": "Lyon"}),
            }],
        ));
        ctx.messages.push(ChatMessage::tool("{\"hotels\":[]}", "call_1"));
        ctx.extracted_info.destinations.push("Lyon".into());
        s.save_context("conn-1", &ctx).unwrap();

        let reread = s.get_or_create_context("conn-1").unwrap();
        assert_eq!(reread.messages.len(), 3);
        assert_eq!(reread.messages[1].tool_calls[0].name, "search_hotels");
        assert_eq!(reread.messages[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(reread.extracted_info.destinations, vec!["Lyon"]);
    }

    #[test]
    fn save_is_idempotent() {
        let s = store().without_cache();
        let mut ctx = s.get_or_create_context("conn-1").unwrap();
        ctx.messages.push(ChatMessage::user("one"));
        ctx.messages.push(ChatMessage::assistant("two"));

        s.save_context("conn-1", &ctx).unwrap();
        s.save_context("conn-1", &ctx).unwrap();

        assert_eq!(message_count(&s, "conn-1"), 2);

        // Sequence numbers stay gapless and strictly increasing.
        let seqs: Vec<i64> = {
            let conn = s.lock();
            let mut stmt = conn
                .prepare(
                    "SELECT sequence_number FROM messages m
                     JOIN sessions s ON s.id = m.session_id
                     WHERE s.connection_id = 'conn-1'
                     ORDER BY sequence_number",
                )
                .unwrap();
            let rows = stmt.query_map([], |r| r.get(0)).unwrap();
            rows.map(|r| r.unwrap()).collect()
        };
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn retention_ceiling_keeps_most_recent() {
        let s = store().without_cache().with_max_history(5);
        let mut ctx = s.get_or_create_context("conn-1").unwrap();
        for i in 0..12 {
            ctx.messages.push(ChatMessage::user(format!("msg {i}")));
        }
        s.save_context("conn-1", &ctx).unwrap();

        assert_eq!(message_count(&s, "conn-1"), 5);
        let reread = s.get_or_create_context("conn-1").unwrap();
        assert_eq!(reread.messages.first().unwrap().content, "msg 7");
        assert_eq!(reread.messages.last().unwrap().content, "msg 11");
    }

    #[test]
    fn expired_session_yields_fresh_context_and_removes_stale_row() {
        let s = store()
            .without_cache()
            .with_expiry(chrono::Duration::zero());
        let mut ctx = s.get_or_create_context("conn-1").unwrap();
        ctx.messages.push(ChatMessage::user("old"));
        s.save_context("conn-1", &ctx).unwrap();

        // Zero expiry window: the row is already stale on the next read.
        let fresh = s.get_or_create_context("conn-1").unwrap();
        assert!(fresh.messages.is_empty());

        // The stale record was deleted, not left behind: its messages are
        // gone via cascade, and only the fresh row remains.
        let sessions: i64 = s
            .lock()
            .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(sessions, 1);
        assert_eq!(message_count(&s, "conn-1"), 0);
    }

    #[test]
    fn save_without_session_row_is_an_error() {
        let s = store().without_cache();
        let err = s
            .save_context("never-created", &ConversationContext::new())
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[test]
    fn extracted_info_snapshot_survives_reload() {
        let s = store().without_cache();
        let mut ctx = s.get_or_create_context("conn-1").unwrap();
        ctx.extracted_info.destinations.push("Paris".into());
        ctx.extracted_info.party_size = Some(2);
        s.save_context("conn-1", &ctx).unwrap();

        let reread = s.get_or_create_context("conn-1").unwrap();
        assert_eq!(reread.extracted_info.destinations, vec!["Paris"]);
        assert_eq!(reread.extracted_info.party_size, Some(2));
    }

    #[test]
    fn cleanup_removes_only_expired_sessions() {
        let s = store().without_cache();
        s.get_or_create_context("live").unwrap();

        // Force one session into the past.
        s.lock()
            .execute(
                "INSERT INTO sessions (connection_id, extracted_info, expires_at, created_at)
                 VALUES ('stale', '{}', ?1, ?1)",
                [(Utc::now() - chrono::Duration::hours(1)).to_rfc3339()],
            )
            .unwrap();

        assert_eq!(s.cleanup_expired_sessions().unwrap(), 1);
        assert_eq!(s.cleanup_expired_sessions().unwrap(), 0);
    }

    #[test]
    fn list_sessions_reports_counts() {
        let s = store().without_cache();
        let mut ctx = s.get_or_create_context("conn-1").unwrap();
        ctx.messages.push(ChatMessage::user("hi"));
        ctx.messages.push(ChatMessage::assistant("hello"));
        s.save_context("conn-1", &ctx).unwrap();
        s.get_or_create_context("conn-2").unwrap();

        let sessions = s.list_sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        let conn1 = sessions
            .iter()
            .find(|sess| sess.connection_id == "conn-1")
            .unwrap();
        assert_eq!(conn1.message_count, 2);
        assert!(conn1.expires_at > conn1.created_at);
    }

    #[test]
    fn cached_read_skips_database() {
        let s = store();
        let mut ctx = s.get_or_create_context("conn-1").unwrap();
        ctx.messages.push(ChatMessage::user("hello"));
        s.save_context("conn-1", &ctx).unwrap();

        // Drop the rows behind the cache's back; the cached copy still serves.
        s.lock().execute("DELETE FROM messages", []).unwrap();
        let cached = s.get_or_create_context("conn-1").unwrap();
        assert_eq!(cached.messages.len(), 1);
    }
}
