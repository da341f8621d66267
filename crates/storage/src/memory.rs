//! In-memory session store.
//!
//! Process-local and lost on restart, which is acceptable for this variant's
//! contract. Used for development and as the fallback when the durable store
//! fails to open.

use crate::store::{MAX_HISTORY_MESSAGES, MEMORY_EXPIRY, SessionStore};
use crate::{ConversationContext, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Volatile session store backed by a process-local map.
pub struct MemoryStore {
    contexts: Mutex<HashMap<String, ConversationContext>>,
    expiry: chrono::Duration,
    max_history: usize,
}

impl MemoryStore {
    /// Create a store with the reference expiry window and retention ceiling.
    pub fn new() -> Self {
        Self::with_limits(MEMORY_EXPIRY, MAX_HISTORY_MESSAGES)
    }

    /// Create a store with explicit limits (useful for testing).
    pub fn with_limits(expiry: Duration, max_history: usize) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            expiry: chrono::Duration::from_std(expiry).unwrap_or(chrono::Duration::MAX),
            max_history,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConversationContext>> {
        // Context maps hold no invariants across operations, so a poisoned
        // lock is safe to recover.
        self.contexts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemoryStore {
    fn get_or_create_context(&self, connection_id: &str) -> Result<ConversationContext> {
        let now = Utc::now();
        let mut contexts = self.lock();

        if let Some(existing) = contexts.get_mut(connection_id) {
            if now - existing.last_updated < self.expiry {
                // Sliding-window renewal on read.
                existing.last_updated = now;
                return Ok(existing.clone());
            }
            debug!(connection_id, "expired context replaced");
        }

        let fresh = ConversationContext::new();
        contexts.insert(connection_id.to_string(), fresh.clone());
        Ok(fresh)
    }

    fn save_context(&self, connection_id: &str, context: &ConversationContext) -> Result<()> {
        let mut saved = context.clone();

        // Prune oldest-first once past twice the retention ceiling.
        if saved.messages.len() > self.max_history * 2 {
            let excess = saved.messages.len() - self.max_history;
            saved.messages.drain(..excess);
        }

        saved.last_updated = Utc::now();
        self.lock().insert(connection_id.to_string(), saved);
        Ok(())
    }

    fn clear_context(&self, connection_id: &str) -> Result<()> {
        self.lock().remove(connection_id);
        debug!(connection_id, "context cleared");
        Ok(())
    }

    fn cleanup_expired_sessions(&self) -> Result<usize> {
        let now = Utc::now();
        let mut contexts = self.lock();
        let before = contexts.len();
        contexts.retain(|_, ctx| now - ctx.last_updated < self.expiry);
        let cleaned = before - contexts.len();
        if cleaned > 0 {
            debug!(cleaned, "expired sessions removed");
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;

    #[test]
    fn create_then_read_back() {
        let store = MemoryStore::new();
        let mut ctx = store.get_or_create_context("conn-1").unwrap();
        assert!(ctx.messages.is_empty());

        ctx.messages.push(ChatMessage::user("hello"));
        store.save_context("conn-1", &ctx).unwrap();

        let reread = store.get_or_create_context("conn-1").unwrap();
        assert_eq!(reread.messages.len(), 1);
    }

    #[test]
    fn expired_context_is_replaced_with_fresh_one() {
        let store = MemoryStore::with_limits(Duration::from_secs(0), 20);
        let mut ctx = store.get_or_create_context("conn-1").unwrap();
        ctx.messages.push(ChatMessage::user("hello"));
        store.save_context("conn-1", &ctx).unwrap();

        // Zero expiry: the next read sees a stale context.
        let reread = store.get_or_create_context("conn-1").unwrap();
        assert!(reread.messages.is_empty());
    }

    #[test]
    fn save_prunes_past_double_ceiling() {
        let store = MemoryStore::with_limits(Duration::from_secs(3600), 5);
        let mut ctx = store.get_or_create_context("conn-1").unwrap();
        for i in 0..11 {
            ctx.messages.push(ChatMessage::user(format!("msg {i}")));
        }
        store.save_context("conn-1", &ctx).unwrap();

        let reread = store.get_or_create_context("conn-1").unwrap();
        assert_eq!(reread.messages.len(), 5);
        // Most recent messages are the ones retained.
        assert_eq!(reread.messages[0].content, "msg 6");
        assert_eq!(reread.messages[4].content, "msg 10");
    }

    #[test]
    fn cleanup_counts_removed_sessions() {
        let store = MemoryStore::with_limits(Duration::from_secs(0), 20);
        for id in ["a", "b", "c"] {
            store.get_or_create_context(id).unwrap();
        }
        assert_eq!(store.cleanup_expired_sessions().unwrap(), 3);
        assert_eq!(store.cleanup_expired_sessions().unwrap(), 0);
    }

    #[test]
    fn clear_removes_only_that_connection() {
        let store = MemoryStore::new();
        store.get_or_create_context("a").unwrap();
        let mut ctx = store.get_or_create_context("b").unwrap();
        ctx.messages.push(ChatMessage::user("kept"));
        store.save_context("b", &ctx).unwrap();

        store.clear_context("a").unwrap();
        assert_eq!(store.get_or_create_context("b").unwrap().messages.len(), 1);
    }
}
