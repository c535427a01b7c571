//! File repository: lifecycle operations for the `ingestion_files` table.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::error::is_unique_violation;
use super::status::FileStatus;
use super::{format_timestamp, now_timestamp, parse_optional_timestamp, parse_timestamp};
use super::{Database, DatabaseError};
use crate::hasher::Fingerprint;

/// One attempt to ingest one distinct attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedFile {
    pub id: i64,
    pub source_system: String,
    pub external_message_id: Option<String>,
    pub sender_address: Option<String>,
    pub subject_line: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub file_name: String,
    pub fingerprint: String,
    pub status: FileStatus,
    pub error_detail: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IngestedFile {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            source_system: row.get("source")?,
            external_message_id: row.get("message_id")?,
            sender_address: row.get("from_email")?,
            subject_line: row.get("subject")?,
            received_at: parse_optional_timestamp(row.get("received_at")?)?,
            file_name: row.get("filename")?,
            fingerprint: row.get("file_sha256")?,
            status: row.get("status")?,
            error_detail: row.get("error")?,
            processing_started_at: parse_optional_timestamp(row.get("processing_started_at")?)?,
            processing_completed_at: parse_optional_timestamp(
                row.get("processing_completed_at")?,
            )?,
            correlation_id: row.get("correlation_id")?,
            created_at: parse_timestamp(&row.get::<_, String>("created_at")?)?,
            updated_at: parse_timestamp(&row.get::<_, String>("updated_at")?)?,
        })
    }
}

/// Source-supplied description of an attachment, stored with the file row.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    pub source_system: String,
    pub external_message_id: Option<String>,
    pub sender_address: Option<String>,
    pub subject_line: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub file_name: String,
}

impl FileMetadata {
    /// Metadata with only a file name, as used for ad-hoc ingestion.
    pub fn named(source_system: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            source_system: source_system.into(),
            external_message_id: None,
            sender_address: None,
            subject_line: None,
            received_at: None,
            file_name: file_name.into(),
        }
    }
}

/// Dedupe probe: the file previously stored with this fingerprint, if any.
pub fn find_by_fingerprint(
    db: &Database,
    fingerprint: &Fingerprint,
) -> Result<Option<IngestedFile>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM ingestion_files WHERE file_sha256 = ?1",
                params![fingerprint.as_str()],
                IngestedFile::from_row,
            )
            .optional()?)
    })
}

/// Finds a file by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<IngestedFile>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM ingestion_files WHERE id = ?1",
                params![id],
                IngestedFile::from_row,
            )
            .optional()?)
    })
}

/// Inserts a new file row in state NEW and returns its id.
///
/// A concurrent insert of the same fingerprint surfaces as
/// [`DatabaseError::Conflict`]; callers treat that as a duplicate.
pub fn create(
    db: &Database,
    fingerprint: &Fingerprint,
    metadata: &FileMetadata,
    correlation_id: &str,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        let now = now_timestamp();
        let inserted = conn.execute(
            "INSERT INTO ingestion_files (source, message_id, from_email, subject, received_at,
             filename, file_sha256, status, correlation_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                metadata.source_system,
                metadata.external_message_id,
                metadata.sender_address,
                metadata.subject_line,
                metadata.received_at.as_ref().map(format_timestamp),
                metadata.file_name,
                fingerprint.as_str(),
                FileStatus::New,
                correlation_id,
                now,
            ],
        );

        match inserted {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => Err(DatabaseError::Conflict {
                fingerprint: fingerprint.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    })
}

/// Moves a file to `status`, recording `error_detail`.
///
/// The lifecycle check happens inside the UPDATE, so a concurrent writer
/// cannot slip a second transition in between. Setting the status a file
/// already has changes nothing.
pub fn set_status(
    db: &Database,
    id: i64,
    status: FileStatus,
    error_detail: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let allowed = status.predecessors();
        let changed = if allowed.is_empty() {
            0
        } else {
            let placeholders: Vec<String> =
                (0..allowed.len()).map(|i| format!("?{}", i + 5)).collect();
            let sql = format!(
                "UPDATE ingestion_files SET status = ?1, error = ?2, updated_at = ?3
                 WHERE id = ?4 AND status IN ({})",
                placeholders.join(", ")
            );

            let now = now_timestamp();
            let mut param_values: Vec<&dyn rusqlite::types::ToSql> =
                Vec::with_capacity(4 + allowed.len());
            param_values.push(&status);
            param_values.push(&error_detail);
            param_values.push(&now);
            param_values.push(&id);
            for prev in allowed {
                param_values.push(prev);
            }
            conn.execute(&sql, param_values.as_slice())?
        };

        if changed == 1 {
            log::debug!("File {} -> {}", id, status);
            return Ok(());
        }

        let current: Option<FileStatus> = conn
            .query_row(
                "SELECT status FROM ingestion_files WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;

        match current {
            None => Err(DatabaseError::NotFound(id)),
            Some(current) if current == status => Ok(()),
            Some(current) => Err(DatabaseError::InvalidTransition {
                file_id: id,
                from: current,
                to: status,
            }),
        }
    })
}

/// Like [`set_status`], for callers holding a status name rather than a
/// [`FileStatus`]. Unknown names fail with [`DatabaseError::InvalidStatus`].
pub fn set_status_named(
    db: &Database,
    id: i64,
    status: &str,
    error_detail: Option<&str>,
) -> Result<(), DatabaseError> {
    let status: FileStatus = status.parse()?;
    set_status(db, id, status, error_detail)
}

/// Stamps `processing_started_at`. Independent of status.
pub fn mark_processing_started(db: &Database, id: i64) -> Result<(), DatabaseError> {
    stamp(db, id, "processing_started_at")
}

/// Stamps `processing_completed_at`. Independent of status.
pub fn mark_processing_completed(db: &Database, id: i64) -> Result<(), DatabaseError> {
    stamp(db, id, "processing_completed_at")
}

fn stamp(db: &Database, id: i64, column: &'static str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let now = now_timestamp();
        let sql = format!(
            "UPDATE ingestion_files SET {} = ?1, updated_at = ?1 WHERE id = ?2",
            column
        );
        match conn.execute(&sql, params![now, id])? {
            0 => Err(DatabaseError::NotFound(id)),
            _ => Ok(()),
        }
    })
}

/// Deletes COMPLETED and FAILED files created more than `days` days ago.
/// Their transactions go with them through the foreign key cascade.
///
/// Returns the number of file rows removed.
pub fn purge_older_than(db: &Database, days: u32) -> Result<usize, DatabaseError> {
    let cutoff = format_timestamp(&(Utc::now() - Duration::days(i64::from(days))));
    db.with_conn(|conn| {
        let removed = conn.execute(
            "DELETE FROM ingestion_files
             WHERE status IN (?1, ?2) AND created_at < ?3",
            params![FileStatus::Completed, FileStatus::Failed, cutoff],
        )?;
        if removed > 0 {
            log::info!("Purged {} ingestion files older than {} days", removed, days);
        }
        Ok(removed)
    })
}
