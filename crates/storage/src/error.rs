use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The session row vanished between create and save. This is a consistency
    /// violation, not a cache miss, and must surface to the caller.
    #[error("session not found for connection {0}: save aborted")]
    SessionNotFound(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, Error>;
