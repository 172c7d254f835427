//! Error types for recast.

use thiserror::Error;

/// Common error type for recast operations.
#[derive(Error, Debug)]
pub enum RecastError {
    /// A document could not be parsed: feed not RSS/Atom, a bad memento
    /// link, or a date string in no accepted format.
    #[error("format error: {0}")]
    Format(String),

    /// URL not present in the store, or an item ordinal out of range.
    #[error("{0} not found")]
    NotFound(String),

    /// An index already exists for the canonical URL.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network-layer failure: timeout, redirect loop, banned host, or a
    /// non-success status code.
    #[error("transport error: {0}")]
    Transport(String),

    /// Item lacks a usable GUID and none can be synthesized.
    #[error("guid error: {0}")]
    Guid(String),

    /// No reliable fetcher could be detected for a feed URL.
    #[error("fetcher detection failed: {0}")]
    DetectFailed(String),

    /// Empty weekday schedule, or a replay that is entirely in the future.
    #[error("schedule error: {0}")]
    Schedule(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for RecastError {
    fn from(e: serde_json::Error) -> Self {
        RecastError::Format(e.to_string())
    }
}

impl From<reqwest::Error> for RecastError {
    fn from(e: reqwest::Error) -> Self {
        RecastError::Transport(e.to_string())
    }
}

/// Result type alias for recast operations.
pub type Result<T> = std::result::Result<T, RecastError>;
