//! Transaction repository: natural-key upserts into `scale_transactions`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::error::is_constraint_violation;
use super::{format_timestamp, now_timestamp, parse_timestamp};
use super::{Database, DatabaseError};
use crate::validator::ScaleTransaction;

/// Rows written per database transaction.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

const UPSERT_SQL: &str = "INSERT INTO scale_transactions (scale_name, transact_no, cyl_size_kg,
     tare_weight_kg, fill_kg, residual_kg, success, started_at, fill_time_seconds,
     ingestion_file_id, correlation_id, created_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
     ON CONFLICT(scale_name, transact_no) DO UPDATE SET
       cyl_size_kg = excluded.cyl_size_kg,
       tare_weight_kg = excluded.tare_weight_kg,
       fill_kg = excluded.fill_kg,
       residual_kg = excluded.residual_kg,
       success = excluded.success,
       started_at = excluded.started_at,
       fill_time_seconds = excluded.fill_time_seconds,
       ingestion_file_id = excluded.ingestion_file_id,
       correlation_id = excluded.correlation_id,
       updated_at = excluded.updated_at";

/// A persisted transaction row.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRow {
    pub id: i64,
    pub scale_name: String,
    pub sequence_number: i64,
    pub cylinder_capacity_kg: Option<f64>,
    pub tare_weight_kg: Option<f64>,
    pub fill_weight_kg: Option<f64>,
    pub residual_weight_kg: Option<f64>,
    pub succeeded: bool,
    pub started_at: DateTime<Utc>,
    pub fill_duration_seconds: i64,
    pub owner_file_id: i64,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            scale_name: row.get("scale_name")?,
            sequence_number: row.get("transact_no")?,
            cylinder_capacity_kg: row.get("cyl_size_kg")?,
            tare_weight_kg: row.get("tare_weight_kg")?,
            fill_weight_kg: row.get("fill_kg")?,
            residual_weight_kg: row.get("residual_kg")?,
            succeeded: row.get("success")?,
            started_at: parse_timestamp(&row.get::<_, String>("started_at")?)?,
            fill_duration_seconds: row.get("fill_time_seconds")?,
            owner_file_id: row.get("ingestion_file_id")?,
            correlation_id: row.get("correlation_id")?,
            created_at: parse_timestamp(&row.get::<_, String>("created_at")?)?,
            updated_at: parse_timestamp(&row.get::<_, String>("updated_at")?)?,
        })
    }
}

/// A record the store refused even when written on its own.
#[derive(Debug, Clone)]
pub struct RejectedRecord {
    pub record: ScaleTransaction,
    pub reason: String,
}

/// Result of a batch upsert.
#[derive(Debug, Clone, Default)]
pub struct UpsertOutcome {
    /// Rows inserted or updated.
    pub upserted: usize,
    pub rejected: Vec<RejectedRecord>,
}

/// Inserts or updates `records` keyed on `(scale_name, transact_no)`.
///
/// Every non-key column is overwritten and ownership moves to `file_id`
/// (last writer wins). Records are written in chunks of `chunk_size`, each
/// committed on its own. A constraint violation inside a chunk rolls that
/// chunk back and retries it row by row; rows that still fail are returned
/// as rejected. Any other failure stops the batch with
/// [`DatabaseError::ChunkFailed`], reporting how many rows earlier chunks
/// committed.
pub fn upsert(
    db: &Database,
    file_id: i64,
    correlation_id: &str,
    records: &[ScaleTransaction],
    chunk_size: usize,
) -> Result<UpsertOutcome, DatabaseError> {
    db.with_conn(|conn| {
        let mut outcome = UpsertOutcome::default();

        for (chunk_no, chunk) in records.chunks(chunk_size.max(1)).enumerate() {
            let result = write_chunk(conn, file_id, correlation_id, chunk).or_else(|e| {
                if e.is_constraint_violation() {
                    log::warn!(
                        "Chunk {} hit a constraint violation ({}), retrying row by row",
                        chunk_no,
                        e
                    );
                    write_rows_individually(conn, file_id, correlation_id, chunk)
                } else {
                    Err(e)
                }
            });

            match result {
                Ok((written, rejected)) => {
                    outcome.upserted += written;
                    outcome.rejected.extend(rejected);
                }
                Err(e) => {
                    return Err(DatabaseError::ChunkFailed {
                        committed: outcome.upserted,
                        chunk: chunk_no,
                        source: Box::new(e),
                    })
                }
            }
        }

        log::debug!(
            "Upserted {} transactions for file {} ({} rejected)",
            outcome.upserted,
            file_id,
            outcome.rejected.len()
        );
        Ok(outcome)
    })
}

type ChunkResult = Result<(usize, Vec<RejectedRecord>), DatabaseError>;

/// Writes a whole chunk atomically.
fn write_chunk(
    conn: &Connection,
    file_id: i64,
    correlation_id: &str,
    chunk: &[ScaleTransaction],
) -> ChunkResult {
    let tx = conn.unchecked_transaction()?;
    let now = now_timestamp();
    let mut written = 0;
    {
        let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
        for record in chunk {
            written += execute_upsert(&mut stmt, record, file_id, correlation_id, &now)?;
        }
    }
    tx.commit()?;
    Ok((written, Vec::new()))
}

/// Writes each row of a chunk on its own; constraint failures reject only
/// the offending row.
fn write_rows_individually(
    conn: &Connection,
    file_id: i64,
    correlation_id: &str,
    chunk: &[ScaleTransaction],
) -> ChunkResult {
    let tx = conn.unchecked_transaction()?;
    let now = now_timestamp();
    let mut written = 0;
    let mut rejected = Vec::new();
    {
        let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
        for record in chunk {
            match execute_upsert(&mut stmt, record, file_id, correlation_id, &now) {
                Ok(n) => written += n,
                Err(DatabaseError::Sqlite(e)) if is_constraint_violation(&e) => {
                    log::warn!(
                        "Rejected transaction {}/{}: {}",
                        record.scale_name,
                        record.sequence_number,
                        e
                    );
                    rejected.push(RejectedRecord {
                        record: record.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
    tx.commit()?;
    Ok((written, rejected))
}

fn execute_upsert(
    stmt: &mut rusqlite::CachedStatement<'_>,
    record: &ScaleTransaction,
    file_id: i64,
    correlation_id: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    Ok(stmt.execute(params![
        record.scale_name,
        record.sequence_number,
        record.cylinder_capacity_kg,
        record.tare_weight_kg,
        record.fill_weight_kg,
        record.residual_weight_kg,
        record.succeeded,
        format_timestamp(&record.started_at),
        record.fill_duration_seconds,
        file_id,
        correlation_id,
        now,
    ])?)
}

/// Finds a transaction by its natural key.
pub fn find_by_key(
    db: &Database,
    scale_name: &str,
    sequence_number: i64,
) -> Result<Option<TransactionRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM scale_transactions WHERE scale_name = ?1 AND transact_no = ?2",
                params![scale_name, sequence_number],
                TransactionRow::from_row,
            )
            .optional()?)
    })
}

/// Lists the transactions currently owned by a file, in start order.
pub fn list_by_file(db: &Database, file_id: i64) -> Result<Vec<TransactionRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM scale_transactions WHERE ingestion_file_id = ?1
             ORDER BY started_at, scale_name, transact_no",
        )?;
        let rows = stmt
            .query_map(params![file_id], TransactionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts all stored transactions.
pub fn count_all(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 =
            conn.query_row("SELECT COUNT(*) FROM scale_transactions", [], |r| r.get(0))?;
        Ok(count)
    })
}
