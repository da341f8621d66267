//! Read-through context cache for the durable store.
//!
//! Strictly a latency optimization: entries carry a short TTL and are written
//! only after the durable transaction commits, so the cache can never get
//! ahead of durable truth. Entries that fail structural validation on read
//! are discarded and treated as a miss.

use crate::ConversationContext;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::warn;

/// Reference TTL for cached contexts.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

struct CacheEntry {
    // Stored serialized so reads revalidate the structure instead of
    // trusting whatever was written.
    payload: String,
    inserted_at: Instant,
}

pub(crate) struct ContextCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ContextCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn get(&self, connection_id: &str) -> Option<ConversationContext> {
        let mut entries = self.lock();
        let entry = entries.get(connection_id)?;

        if entry.inserted_at.elapsed() > self.ttl {
            entries.remove(connection_id);
            return None;
        }

        match serde_json::from_str(&entry.payload) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                warn!(connection_id, error = %e, "invalid cached context discarded");
                entries.remove(connection_id);
                None
            }
        }
    }

    pub(crate) fn put(&self, connection_id: &str, context: &ConversationContext) {
        match serde_json::to_string(context) {
            Ok(payload) => {
                self.lock().insert(
                    connection_id.to_string(),
                    CacheEntry {
                        payload,
                        inserted_at: Instant::now(),
                    },
                );
            }
            Err(e) => warn!(connection_id, error = %e, "cache write skipped"),
        }
    }

    pub(crate) fn invalidate(&self, connection_id: &str) {
        self.lock().remove(connection_id);
    }
}
