//! The session store contract and its reference limits.

use crate::{ConversationContext, Result};
use std::time::Duration;

/// Messages retained per session; saves prune down to this once the persisted
/// count exceeds twice the ceiling.
pub const MAX_HISTORY_MESSAGES: usize = 20;

/// How long a volatile context survives without being read or written.
pub const MEMORY_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Sweep cadence for the volatile store.
pub const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Sliding expiry window for durable sessions, in days.
pub const DURABLE_EXPIRY_DAYS: i64 = 7;

/// Sweep cadence for the durable store.
pub const DURABLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Durable per-connection conversation state.
///
/// Both implementations share the same semantics: `get_or_create_context`
/// renews the expiry of a live session and replaces an expired one with a
/// fresh, empty context; `save_context` appends only messages not yet
/// persisted, making it idempotent under retried partial writes.
pub trait SessionStore: Send + Sync {
    /// Load the context for a connection, renewing its expiry, or create a
    /// fresh one if none exists or the existing one has expired.
    fn get_or_create_context(&self, connection_id: &str) -> Result<ConversationContext>;

    /// Write a working copy back. Appends the message tail, refreshes the
    /// extracted-info snapshot, extends expiry, and prunes history beyond the
    /// retention ceiling.
    fn save_context(&self, connection_id: &str, context: &ConversationContext) -> Result<()>;

    /// Remove all state for a connection.
    fn clear_context(&self, connection_id: &str) -> Result<()>;

    /// Purge expired sessions, returning how many were removed.
    fn cleanup_expired_sessions(&self) -> Result<usize>;
}
