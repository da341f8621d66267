//! Session persistence for concierge conversations.
//!
//! This crate owns the durable state of every conversation: an ordered
//! message log per connection identifier, plus the facts extracted from it
//! along the way. The orchestration loop works on a [`ConversationContext`]
//! copy and writes it back through a [`SessionStore`]; the store is the single
//! source of truth across process restarts.
//!
//! # Overview
//!
//! Two interchangeable stores satisfy the same contract:
//!
//! - [`MemoryStore`] — process-local, contexts expire after an hour unread.
//!   Used for development and as the fallback when SQLite cannot be opened.
//! - [`SqliteStore`] — append-only message log behind a unique connection-id
//!   key, with transactional saves and an optional short-TTL read cache.
//!
//! A [`CleanupTask`] sweeps expired sessions on a timer; expired rows are also
//! removed lazily on the next read.
//!
//! # Example
//!
//! ```no_run
//! use storage::{ChatMessage, SessionStore, SqliteStore};
//!
//! let store = SqliteStore::open("sessions.db")?;
//!
//! let mut context = store.get_or_create_context("connection-42")?;
//! context.messages.push(ChatMessage::user("I want to fly to Paris"));
//! store.save_context("connection-42", &context)?;
//! # Ok::<(), storage::Error>(())
//! ```

mod cache;
mod cleanup;
mod error;
mod memory;
mod sqlite;
mod store;
mod types;

pub use cleanup::CleanupTask;
pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use sqlite::{SessionSummary, SqliteStore};
pub use store::{
    DURABLE_EXPIRY_DAYS, DURABLE_SWEEP_INTERVAL, MAX_HISTORY_MESSAGES, MEMORY_EXPIRY,
    MEMORY_SWEEP_INTERVAL, SessionStore,
};
pub use types::{
    Budget, ChatMessage, ConversationContext, ExtractedInfo, Language, Role, ToolCallRequest,
    TravelDates,
};
