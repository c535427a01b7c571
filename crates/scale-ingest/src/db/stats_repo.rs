//! Read-only aggregates over ingested files and their transactions.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::status::FileStatus;
use super::{format_timestamp, parse_optional_timestamp, parse_timestamp};
use super::{Database, DatabaseError};

/// Summary of one file and the transactions it currently owns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatistics {
    pub file_id: i64,
    pub file_name: String,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub transaction_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_completed_at: Option<DateTime<Utc>>,
}

/// Aggregates a file with its owned transactions. `None` if the file is unknown.
pub fn file_statistics(
    db: &Database,
    file_id: i64,
) -> Result<Option<FileStatistics>, DatabaseError> {
    db.with_conn(|conn| {
        let stats = conn
            .query_row(
                "SELECT f.id, f.filename, f.status, f.error, f.created_at,
                        f.processing_started_at, f.processing_completed_at,
                        COUNT(t.id),
                        COALESCE(SUM(CASE WHEN t.success = 1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN t.success = 0 THEN 1 ELSE 0 END), 0)
                 FROM ingestion_files f
                 LEFT JOIN scale_transactions t ON t.ingestion_file_id = f.id
                 WHERE f.id = ?1
                 GROUP BY f.id",
                params![file_id],
                |row| {
                    Ok(FileStatistics {
                        file_id: row.get(0)?,
                        file_name: row.get(1)?,
                        status: row.get(2)?,
                        error_detail: row.get(3)?,
                        created_at: parse_timestamp(&row.get::<_, String>(4)?)?,
                        processing_started_at: parse_optional_timestamp(row.get(5)?)?,
                        processing_completed_at: parse_optional_timestamp(row.get(6)?)?,
                        transaction_count: row.get(7)?,
                        success_count: row.get(8)?,
                        failure_count: row.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(stats)
    })
}

/// Number of files in each status. Statuses with no files report zero.
pub fn count_by_status(db: &Database) -> Result<Vec<(FileStatus, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM ingestion_files GROUP BY status")?;
        let found = stmt
            .query_map([], |row| Ok((row.get::<_, FileStatus>(0)?, row.get::<_, u64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FileStatus::ALL
            .into_iter()
            .map(|status| {
                let count = found
                    .iter()
                    .find(|(s, _)| *s == status)
                    .map(|(_, c)| *c)
                    .unwrap_or(0);
                (status, count)
            })
            .collect())
    })
}

/// Files in one status within a metrics window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMetrics {
    pub status: FileStatus,
    pub count: u64,
    /// Mean time between the processing stamps, over files that have both.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_processing_seconds: Option<f64>,
}

/// Transactions written within a metrics window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetrics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_fill_time_seconds: Option<f64>,
}

/// Files created within one UTC hour.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyActivity {
    pub hour: DateTime<Utc>,
    pub files_processed: u64,
    pub successful_files: u64,
    pub failed_files: u64,
}

/// Processing activity for files and transactions created since a cutoff.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetrics {
    pub since: DateTime<Utc>,
    pub files_by_status: Vec<StatusMetrics>,
    pub transactions: TransactionMetrics,
    /// Most recent hour first, at most 24 entries.
    pub hourly_activity: Vec<HourlyActivity>,
    pub total_files: u64,
    pub failed_files: u64,
    /// Share of FAILED files, in percent to two decimals. `None` without files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_rate_percent: Option<f64>,
}

/// Aggregates files and transactions created at or after `since`.
pub fn processing_metrics(
    db: &Database,
    since: DateTime<Utc>,
) -> Result<ProcessingMetrics, DatabaseError> {
    let cutoff = format_timestamp(&since);
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*),
                    AVG((julianday(processing_completed_at) - julianday(processing_started_at))
                        * 86400.0)
             FROM ingestion_files
             WHERE created_at >= ?1
             GROUP BY status
             ORDER BY status",
        )?;
        let files_by_status = stmt
            .query_map(params![cutoff], |row| {
                Ok(StatusMetrics {
                    status: row.get(0)?,
                    count: row.get(1)?,
                    avg_processing_seconds: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let transactions = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0),
                    AVG(fill_time_seconds)
             FROM scale_transactions
             WHERE created_at >= ?1",
            params![cutoff],
            |row| {
                Ok(TransactionMetrics {
                    total: row.get(0)?,
                    successful: row.get(1)?,
                    failed: row.get(2)?,
                    avg_fill_time_seconds: row.get(3)?,
                })
            },
        )?;

        let mut stmt = conn.prepare(
            "SELECT strftime('%Y-%m-%dT%H:00:00Z', created_at) AS hour,
                    COUNT(*),
                    SUM(CASE WHEN status = 'COMPLETED' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'FAILED' THEN 1 ELSE 0 END)
             FROM ingestion_files
             WHERE created_at >= ?1
             GROUP BY hour
             ORDER BY hour DESC
             LIMIT 24",
        )?;
        let hourly_activity = stmt
            .query_map(params![cutoff], |row| {
                Ok(HourlyActivity {
                    hour: parse_timestamp(&row.get::<_, String>(0)?)?,
                    files_processed: row.get(1)?,
                    successful_files: row.get(2)?,
                    failed_files: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let (total_files, failed_files, failure_rate_percent) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'FAILED' THEN 1 ELSE 0 END), 0),
                    ROUND(SUM(CASE WHEN status = 'FAILED' THEN 1 ELSE 0 END) * 100.0
                          / NULLIF(COUNT(*), 0), 2)
             FROM ingestion_files
             WHERE created_at >= ?1",
            params![cutoff],
            |row| {
                Ok((
                    row.get::<_, u64>(0)?,
                    row.get::<_, u64>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                ))
            },
        )?;

        Ok(ProcessingMetrics {
            since,
            files_by_status,
            transactions,
            hourly_activity,
            total_files,
            failed_files,
            failure_rate_percent,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::file_repo::{self, FileMetadata};
    use crate::db::transaction_repo;
    use crate::hasher::fingerprint;
    use crate::validator::ScaleTransaction;
    use chrono::TimeZone;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn record(seq: i64, succeeded: bool) -> ScaleTransaction {
        ScaleTransaction {
            scale_name: "Scale A".to_string(),
            sequence_number: seq,
            cylinder_capacity_kg: None,
            tare_weight_kg: None,
            fill_weight_kg: Some(10.0),
            residual_weight_kg: None,
            succeeded,
            started_at: Utc::now(),
            fill_duration_seconds: 30,
        }
    }

    #[test]
    fn test_statistics_for_unknown_file() {
        let db = test_db();
        assert!(file_statistics(&db, 42).unwrap().is_none());
    }

    #[test]
    fn test_statistics_counts_success_and_failure() {
        let db = test_db();
        let id = file_repo::create(
            &db,
            &fingerprint(b"s"),
            &FileMetadata::named("imap", "s.csv"),
            "c",
        )
        .unwrap();
        let records = vec![record(1, true), record(2, false), record(3, true)];
        transaction_repo::upsert(&db, id, "c", &records, 100).unwrap();

        let stats = file_statistics(&db, id).unwrap().unwrap();
        assert_eq!(stats.status, FileStatus::New);
        assert_eq!(stats.transaction_count, 3);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.file_name, "s.csv");
    }

    #[test]
    fn test_statistics_for_file_without_transactions() {
        let db = test_db();
        let id = file_repo::create(
            &db,
            &fingerprint(b"e"),
            &FileMetadata::named("imap", "e.csv"),
            "c",
        )
        .unwrap();
        let stats = file_statistics(&db, id).unwrap().unwrap();
        assert_eq!(stats.transaction_count, 0);
        assert_eq!(stats.success_count, 0);
    }

    fn stamp(db: &Database, id: i64, created: &str, started: &str, completed: &str) {
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE ingestion_files
                 SET created_at = ?2, processing_started_at = ?3, processing_completed_at = ?4
                 WHERE id = ?1",
                params![id, created, started, completed],
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn new_file(db: &Database, name: &str) -> i64 {
        file_repo::create(
            db,
            &fingerprint(name.as_bytes()),
            &FileMetadata::named("imap", name),
            "c",
        )
        .unwrap()
    }

    fn complete(db: &Database, id: i64) {
        file_repo::set_status(db, id, FileStatus::Processing, None).unwrap();
        file_repo::set_status(db, id, FileStatus::Completed, None).unwrap();
    }

    #[test]
    fn test_processing_metrics_window() {
        let db = test_db();
        let fast = new_file(&db, "fast.csv");
        let slow = new_file(&db, "slow.csv");
        let failed = new_file(&db, "failed.csv");
        let old = new_file(&db, "old.csv");
        complete(&db, fast);
        complete(&db, slow);
        file_repo::set_status(&db, failed, FileStatus::Failed, Some("bad")).unwrap();
        complete(&db, old);

        stamp(
            &db,
            fast,
            "2025-10-14T08:05:00.000000Z",
            "2025-10-14T08:05:00.000000Z",
            "2025-10-14T08:05:10.000000Z",
        );
        stamp(
            &db,
            slow,
            "2025-10-14T08:40:00.000000Z",
            "2025-10-14T08:40:00.000000Z",
            "2025-10-14T08:40:30.000000Z",
        );
        stamp(
            &db,
            failed,
            "2025-10-14T09:15:00.000000Z",
            "2025-10-14T09:15:00.000000Z",
            "2025-10-14T09:15:01.000000Z",
        );
        stamp(
            &db,
            old,
            "2025-10-01T08:00:00.000000Z",
            "2025-10-01T08:00:00.000000Z",
            "2025-10-01T08:05:00.000000Z",
        );
        transaction_repo::upsert(
            &db,
            fast,
            "c",
            &[record(1, true), record(2, false), record(3, true)],
            100,
        )
        .unwrap();

        let since = Utc.with_ymd_and_hms(2025, 10, 14, 0, 0, 0).unwrap();
        let metrics = processing_metrics(&db, since).unwrap();

        assert_eq!(metrics.total_files, 3);
        assert_eq!(metrics.failed_files, 1);
        assert_eq!(metrics.failure_rate_percent, Some(33.33));

        let completed = metrics
            .files_by_status
            .iter()
            .find(|m| m.status == FileStatus::Completed)
            .unwrap();
        assert_eq!(completed.count, 2);
        let avg = completed.avg_processing_seconds.unwrap();
        assert!((avg - 20.0).abs() < 0.01, "{}", avg);
        assert_eq!(metrics.files_by_status.len(), 2);

        assert_eq!(metrics.transactions.total, 3);
        assert_eq!(metrics.transactions.successful, 2);
        assert_eq!(metrics.transactions.failed, 1);
        assert_eq!(metrics.transactions.avg_fill_time_seconds, Some(30.0));

        assert_eq!(
            metrics.hourly_activity,
            vec![
                HourlyActivity {
                    hour: Utc.with_ymd_and_hms(2025, 10, 14, 9, 0, 0).unwrap(),
                    files_processed: 1,
                    successful_files: 0,
                    failed_files: 1,
                },
                HourlyActivity {
                    hour: Utc.with_ymd_and_hms(2025, 10, 14, 8, 0, 0).unwrap(),
                    files_processed: 2,
                    successful_files: 2,
                    failed_files: 0,
                },
            ]
        );
    }

    #[test]
    fn test_processing_metrics_empty_store() {
        let db = test_db();
        let metrics = processing_metrics(&db, Utc::now()).unwrap();

        assert_eq!(metrics.total_files, 0);
        assert_eq!(metrics.failure_rate_percent, None);
        assert!(metrics.files_by_status.is_empty());
        assert!(metrics.hourly_activity.is_empty());
        assert_eq!(metrics.transactions, TransactionMetrics::default());

        let json = serde_json::to_value(&metrics).unwrap();
        assert!(json.get("failureRatePercent").is_none());
        assert_eq!(json["transactions"]["total"], 0);
    }

    #[test]
    fn test_count_by_status() {
        let db = test_db();
        let a = file_repo::create(&db, &fingerprint(b"a"), &FileMetadata::named("imap", "a"), "c")
            .unwrap();
        file_repo::create(&db, &fingerprint(b"b"), &FileMetadata::named("imap", "b"), "c")
            .unwrap();
        file_repo::set_status(&db, a, FileStatus::Failed, Some("bad")).unwrap();

        let counts = count_by_status(&db).unwrap();
        assert_eq!(counts.len(), 5);
        assert!(counts.contains(&(FileStatus::New, 1)));
        assert!(counts.contains(&(FileStatus::Failed, 1)));
        assert!(counts.contains(&(FileStatus::Completed, 0)));
    }
}
