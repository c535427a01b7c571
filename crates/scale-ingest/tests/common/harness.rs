//! Test harness wiring the ingestion stack together.
//!
//! `TestHarness` owns an isolated store (in memory or in a temp directory)
//! and an in-memory mailbox shared with every worker it builds.

#![allow(dead_code)]

use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;

use scale_ingest::db::{file_repo, stats_repo, transaction_repo, FileMetadata};
use scale_ingest::db::{FileStatistics, IngestedFile, TransactionRow};
use scale_ingest::pipeline::OrchestratorSettings;
use scale_ingest::{
    Attachment, AttemptOutcome, BundleHandle, Database, Destination, InMemoryTransport,
    IngestionOrchestrator, IngestionWorker, PipelineError, RecordValidator,
};

pub struct TestHarness {
    /// Keeps an on-disk database alive for the harness lifetime.
    _temp_dir: Option<TempDir>,
    pub db: Database,
    pub mailbox: InMemoryTransport,
    pub chunk_size: usize,
}

impl TestHarness {
    /// A harness backed by a private in-memory store.
    pub fn new() -> Self {
        Self {
            _temp_dir: None,
            db: Database::open_in_memory().expect("Failed to open in-memory database"),
            mailbox: InMemoryTransport::new(),
            chunk_size: 100,
        }
    }

    /// A harness backed by a SQLite file in a temp directory.
    pub fn on_disk() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("data").join("ingest.db"))
            .expect("Failed to open database");
        Self {
            _temp_dir: Some(temp_dir),
            db,
            mailbox: InMemoryTransport::new(),
            chunk_size: 100,
        }
    }

    pub fn orchestrator(&self) -> IngestionOrchestrator {
        IngestionOrchestrator::new(
            self.db.clone(),
            RecordValidator::default(),
            OrchestratorSettings {
                source_system: "imap".to_string(),
                chunk_size: self.chunk_size,
            },
        )
    }

    /// A worker over the shared store and mailbox. Keep the sender alive
    /// to be able to stop `run_continuous`.
    pub fn worker(&self) -> (IngestionWorker<InMemoryTransport>, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let worker = IngestionWorker::new(
            self.orchestrator(),
            self.mailbox.clone(),
            Duration::from_millis(10),
            rx,
        );
        (worker, tx)
    }

    /// Queues a message carrying one attachment.
    pub fn deliver(&self, file_name: &str, content: Vec<u8>) -> BundleHandle {
        self.mailbox.deliver(
            "scales@example.com",
            "Scale export",
            vec![Attachment::new(file_name, content)],
        )
    }

    pub fn deliver_many(&self, attachments: Vec<(&str, Vec<u8>)>) -> BundleHandle {
        self.mailbox.deliver(
            "scales@example.com",
            "Scale exports",
            attachments
                .into_iter()
                .map(|(name, content)| Attachment::new(name, content))
                .collect(),
        )
    }

    /// Runs one attachment straight through the orchestrator.
    pub fn ingest(&self, file_name: &str, content: &[u8]) -> Result<AttemptOutcome, PipelineError> {
        self.orchestrator()
            .process_attachment(&FileMetadata::named("imap", file_name), content)
    }

    pub async fn run_cycle(&self) -> scale_ingest::CycleSummary {
        let (mut worker, _tx) = self.worker();
        worker.run_once().await.expect("Cycle failed")
    }

    pub fn destination_of(&self, handle: BundleHandle) -> Option<Destination> {
        self.mailbox.destination_of(handle)
    }

    pub fn file(&self, id: i64) -> IngestedFile {
        file_repo::find_by_id(&self.db, id)
            .expect("Query failed")
            .expect("File not found")
    }

    pub fn stats(&self, id: i64) -> FileStatistics {
        stats_repo::file_statistics(&self.db, id)
            .expect("Query failed")
            .expect("File not found")
    }

    pub fn file_count(&self) -> u64 {
        stats_repo::count_by_status(&self.db)
            .expect("Query failed")
            .into_iter()
            .map(|(_, count)| count)
            .sum()
    }

    pub fn transaction_count(&self) -> u64 {
        transaction_repo::count_all(&self.db).expect("Query failed")
    }

    pub fn transaction(&self, scale_name: &str, sequence_number: i64) -> Option<TransactionRow> {
        transaction_repo::find_by_key(&self.db, scale_name, sequence_number).expect("Query failed")
    }

    /// Drops the transactions table so the next upsert fails unexpectedly.
    pub fn break_transactions_table(&self) {
        self.db
            .with_conn(|conn| {
                conn.execute_batch("DROP TABLE scale_transactions")?;
                Ok(())
            })
            .expect("Failed to drop table");
    }

    /// Moves every file's creation time far into the past.
    pub fn age_all_files(&self) {
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE ingestion_files SET created_at = '2000-01-01T00:00:00.000000Z'",
                    [],
                )?;
                Ok(())
            })
            .expect("Failed to age files");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
