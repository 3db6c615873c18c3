//! Unified error handling for trip ingestion and sheet lookup.
//!
//! Only structural parse failures and resource-limit violations are hard
//! errors, and both occur before any store write. Everything else that can
//! go wrong with an individual entity is reported back to the caller as a
//! warning string, never as an error.

use thiserror::Error;

/// Unified error type for topotrip operations.
#[derive(Debug, Error)]
pub enum TripError {
    /// The GPX document violates structure: unterminated element,
    /// missing or non-numeric lat/lon, broken XML. Names the first
    /// violation encountered. Nothing has been written to the store.
    #[error("malformed document: {message}")]
    MalformedDocument { message: String },

    /// The document exceeds the parser's resource guard.
    #[error("document too large: {count} {unit} exceeds limit of {limit}")]
    DocumentTooLarge {
        count: usize,
        limit: usize,
        unit: &'static str,
    },

    /// The target trip identifier does not exist in the store.
    #[error("unknown trip '{identifier}'")]
    UnknownTrip { identifier: String },

    /// Underlying SQLite failure that is not a natural-key constraint
    /// violation (those are recovered locally as warnings).
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Sheet polygon rings are stored as JSON; a corrupt ring surfaces here.
    #[error("sheet data error: {0}")]
    SheetData(#[from] serde_json::Error),
}

impl TripError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        TripError::MalformedDocument {
            message: message.into(),
        }
    }
}

/// Result type alias for topotrip operations.
pub type Result<T> = std::result::Result<T, TripError>;

/// Whether a rusqlite error is a unique/primary-key constraint violation.
///
/// The ingestion pipeline treats a lost insert race or a duplicate natural
/// key identically: the entity already exists, emit a warning and move on.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
