//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

use super::status::FileStatus;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No pooled connection became available in time.
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// Another writer already stored a file with this fingerprint.
    #[error("A file with fingerprint {fingerprint} already exists")]
    Conflict { fingerprint: String },

    /// A status string outside the known lifecycle values.
    #[error("Invalid file status '{0}'")]
    InvalidStatus(String),

    /// A status change the lifecycle does not allow.
    #[error("Invalid status transition for file {file_id}: {from} -> {to}")]
    InvalidTransition {
        file_id: i64,
        from: FileStatus,
        to: FileStatus,
    },

    #[error("File {0} not found")]
    NotFound(i64),

    /// A batch chunk failed; chunks before it stay committed.
    #[error("Upsert chunk {chunk} failed after {committed} records were committed: {source}")]
    ChunkFailed {
        committed: usize,
        chunk: usize,
        #[source]
        source: Box<DatabaseError>,
    },
}

impl DatabaseError {
    /// True for any SQLite constraint failure (unique, check, not null,
    /// foreign key).
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            DatabaseError::Sqlite(e) => is_constraint_violation(e),
            _ => false,
        }
    }

    /// True for errors signalling broken lifecycle or status assumptions.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            DatabaseError::InvalidStatus(_) | DatabaseError::InvalidTransition { .. }
        )
    }
}

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}
