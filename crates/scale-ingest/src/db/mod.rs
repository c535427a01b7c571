//! Database module for persistent storage.
//!
//! Uses rusqlite (SQLite) behind an r2d2 connection pool. The `Database`
//! handle owns the pool and is passed explicitly to every repository
//! function; each call checks out one connection for its duration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

pub mod error;
pub mod file_repo;
pub mod migrations;
pub mod stats_repo;
pub mod status;
pub mod transaction_repo;

pub use error::DatabaseError;
pub use file_repo::{FileMetadata, IngestedFile};
pub use stats_repo::{FileStatistics, ProcessingMetrics};
pub use status::FileStatus;
pub use transaction_repo::{RejectedRecord, TransactionRow, UpsertOutcome};

pub const DEFAULT_MAX_POOL_SIZE: u32 = 4;
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;";

/// Pool sizing for [`Database::open_with`].
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_size: u32,
    pub connection_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_POOL_SIZE,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }
}

/// Pooled database handle.
///
/// Cloning is cheap (the pool is reference counted). Foreign keys and a
/// busy timeout are enabled on every connection the pool hands out, so
/// concurrent writers from other processes wait instead of failing.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::open_with(path, PoolSettings::default())
    }

    pub fn open_with(path: &Path, settings: PoolSettings) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        // WAL is a property of the file, so it only needs setting once.
        Connection::open(path)?.execute_batch("PRAGMA journal_mode=WAL;")?;

        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
        let pool = Pool::builder()
            .max_size(settings.max_size.max(1))
            .connection_timeout(settings.connection_timeout)
            .build(manager)?;

        let db = Self { pool };
        db.with_conn(migrations::run_all)?;

        log::info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Opens a private in-memory database for testing. Runs all migrations.
    ///
    /// Every pooled connection shares the same named in-memory database,
    /// which lives as long as at least one connection stays open.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let uri = format!(
            "file:scale-ingest-{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        let manager = SqliteConnectionManager::file(uri)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI,
            )
            .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
        let pool = Pool::builder()
            .max_size(2)
            .min_idle(Some(1))
            .max_lifetime(None)
            .idle_timeout(None)
            .connection_timeout(DEFAULT_CONNECTION_TIMEOUT)
            .build(manager)?;

        let db = Self { pool };
        db.with_conn(migrations::run_all)?;
        Ok(db)
    }

    /// Runs `f` with a pooled connection. The connection goes back to the
    /// pool when `f` returns, whatever the outcome.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.pool.get()?;
        f(&conn)
    }

    /// Round-trips a trivial query. Used by the health check.
    pub fn ping(&self) -> Result<(), DatabaseError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
            Ok(())
        })
    }
}

/// Returns the canonical database path: `~/.scale-ingest/data/scale_ingest.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| {
        h.join(".scale-ingest")
            .join("data")
            .join("scale_ingest.db")
    })
}

/// Formats an instant for storage. Fixed precision keeps lexical order
/// equal to chronological order.
pub fn format_timestamp(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(&Utc::now())
}

/// Parses a stored timestamp column.
pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    value.as_deref().map(parse_timestamp).transpose()
}
