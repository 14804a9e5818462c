//! # Error Types Module
//!
//! Typed errors for the storage layer, the generation backend and the
//! orchestrator. Transport glue wraps these in `anyhow` like the rest of the
//! bot plumbing.

use thiserror::Error;

/// Errors raised by an [`AccountStore`](crate::store::AccountStore) implementation
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database rejected or failed the query
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A persisted row could not be mapped into a typed record
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
    /// The user row an update targeted does not exist
    #[error("User {0} not found")]
    UserNotFound(i64),
}

/// Failures of a single generation call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    /// The backend did not answer within the configured bound
    #[error("Timeout error: no response after {0}s")]
    Timeout(u64),
    /// Transport-level failure talking to the backend
    #[error("Request error: {0}")]
    Request(String),
    /// The backend answered with a non-success status
    #[error("Backend returned {status}: {body}")]
    Api { status: u16, body: String },
    /// The backend answered with no usable text
    #[error("Empty response from backend")]
    EmptyResponse,
    /// The uploaded image could not be recognised
    #[error("Image decode error: {0}")]
    ImageDecode(String),
    /// Too many recent failures, calls are short-circuited
    #[error("Generation backend temporarily disabled after repeated failures")]
    CircuitOpen,
}

/// Which limit stopped the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    DailyQuota,
    SessionTurns,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitKind::DailyQuota => write!(f, "daily quota"),
            LimitKind::SessionTurns => write!(f, "session turn cap"),
        }
    }
}

/// Top-level error taxonomy of the analysis core
#[derive(Debug, Error)]
pub enum BotError {
    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("Generation backend failure: {0}")]
    Generation(#[from] GenerationError),

    #[error("No active analysis session for user {0}")]
    SessionNotFound(i64),

    #[error("Limit reached: {0}")]
    LimitReached(LimitKind),

    #[error("User {0} is not an administrator")]
    Forbidden(i64),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<sqlx::Error> for BotError {
    fn from(err: sqlx::Error) -> Self {
        BotError::Storage(StorageError::Database(err))
    }
}

pub type BotResult<T> = Result<T, BotError>;
