//! End-to-end ingestion scenarios: mailbox → orchestrator → store → routing.

mod common;

use common::{generated_success_count, CsvBuilder, RowBuilder, TestHarness};

use scale_ingest::db::{file_repo, transaction_repo};
use scale_ingest::pipeline::NO_VALID_RECORDS;
use scale_ingest::validator::Column;
use scale_ingest::{AttemptOutcome, Destination, FileStatus};

#[tokio::test]
async fn fifty_valid_rows_complete_and_route_to_success() {
    let harness = TestHarness::new();
    let handle = harness.deliver("scale-a.csv", CsvBuilder::generated("SCALE-A", 50).build());

    let summary = harness.run_cycle().await;

    assert_eq!(summary.bundles_fetched, 1);
    assert_eq!(summary.routed_success, 1);
    assert_eq!(summary.attachments_completed, 1);
    assert_eq!(harness.destination_of(handle), Some(Destination::Success));

    let file = file_repo::find_by_fingerprint(
        &harness.db,
        &scale_ingest::fingerprint(&CsvBuilder::generated("SCALE-A", 50).build()),
    )
    .unwrap()
    .unwrap();
    assert_eq!(file.file_name, "scale-a.csv");
    assert_eq!(file.source_system, "imap");
    assert_eq!(file.sender_address.as_deref(), Some("scales@example.com"));
    assert!(file.received_at.is_some());

    let stats = harness.stats(file.id);
    assert_eq!(stats.status, FileStatus::Completed);
    assert_eq!(stats.transaction_count, 50);
    assert_eq!(stats.success_count, generated_success_count(50));
    assert_eq!(stats.failure_count, 50 - generated_success_count(50));
    assert!(stats.processing_started_at.is_some());
    assert!(stats.processing_completed_at.is_some());
}

#[tokio::test]
async fn identical_content_is_ingested_once() {
    let harness = TestHarness::new();
    let content = CsvBuilder::generated("SCALE-A", 5).build();

    let first = harness.deliver("monday.csv", content.clone());
    harness.run_cycle().await;
    let before = harness.transaction("SCALE-A", 3).unwrap();

    let second = harness.deliver("monday-resent.csv", content);
    let summary = harness.run_cycle().await;

    assert_eq!(harness.destination_of(first), Some(Destination::Success));
    assert_eq!(harness.destination_of(second), Some(Destination::Duplicate));
    assert_eq!(summary.attachments_duplicate, 1);
    assert_eq!(harness.file_count(), 1);
    assert_eq!(harness.transaction_count(), 5);
    assert_eq!(harness.transaction("SCALE-A", 3).unwrap(), before);
}

#[test]
fn duplicate_leaves_existing_file_untouched() {
    let harness = TestHarness::new();
    let content = CsvBuilder::new().raw_row("0,S1,9,10,9,0,Y,2025-10-14 08:30:00,1").build();

    let first = harness.ingest("bad.csv", &content).unwrap();
    let before = harness.file(first.file_id());
    let second = harness.ingest("bad.csv", &content).unwrap();

    assert_eq!(
        second,
        AttemptOutcome::Duplicate {
            existing_file_id: first.file_id(),
            existing_status: FileStatus::Failed,
        }
    );
    assert_eq!(harness.file(first.file_id()), before);
}

#[test]
fn same_natural_key_in_later_file_overwrites() {
    let harness = TestHarness::new();
    let earlier = CsvBuilder::new()
        .row(RowBuilder::new("S1", 7).fill_kgs("9.0"))
        .row(RowBuilder::new("S1", 8))
        .build();
    let later = CsvBuilder::new()
        .row(RowBuilder::new("S1", 7).fill_kgs("11.5 kg").success("N"))
        .build();

    let first = harness.ingest("earlier.csv", &earlier).unwrap();
    let second = harness.ingest("later.csv", &later).unwrap();
    assert_ne!(first.file_id(), second.file_id());

    let row = harness.transaction("S1", 7).unwrap();
    assert_eq!(row.fill_weight_kg, Some(11.5));
    assert!(!row.succeeded);
    assert_eq!(row.owner_file_id, second.file_id());
    assert_eq!(harness.transaction_count(), 2);

    assert_eq!(harness.stats(first.file_id()).transaction_count, 1);
    assert_eq!(harness.stats(second.file_id()).transaction_count, 1);
}

#[test]
fn partially_valid_file_completes_with_valid_subset() {
    let harness = TestHarness::new();
    let content = CsvBuilder::new()
        .row(RowBuilder::new("S1", 1))
        .row(RowBuilder::new("S1", 2).fill_kgs("abc"))
        .row(RowBuilder::new("S1", 3))
        .row(RowBuilder::new("S1", 4).success("maybe"))
        .row(RowBuilder::new("S1", 5))
        .build();

    let outcome = harness.ingest("mixed.csv", &content).unwrap();

    match outcome {
        AttemptOutcome::Completed {
            file_id,
            upserted,
            row_errors,
            rejected,
        } => {
            assert_eq!(upserted, 3);
            assert_eq!(row_errors, 2);
            assert_eq!(rejected, 0);
            assert_eq!(harness.file(file_id).status, FileStatus::Completed);
            let owned = transaction_repo::list_by_file(&harness.db, file_id).unwrap();
            let numbers: Vec<i64> = owned.iter().map(|t| t.sequence_number).collect();
            assert_eq!(numbers, vec![1, 3, 5]);
        }
        other => panic!("expected completion, got {:?}", other),
    }
}

#[tokio::test]
async fn all_invalid_rows_fail_without_persisting() {
    let harness = TestHarness::new();
    let content = CsvBuilder::new()
        .row(RowBuilder::new("S1", 1).transact_no("-4"))
        .row(RowBuilder::new("S1", 2).started("14/10/2025 08:30"))
        .build();
    let handle = harness.deliver("broken.csv", content);

    let summary = harness.run_cycle().await;

    assert_eq!(summary.attachments_failed, 1);
    assert_eq!(harness.destination_of(handle), Some(Destination::Failure));
    assert_eq!(harness.transaction_count(), 0);

    let file = harness.file(1);
    assert_eq!(file.status, FileStatus::Failed);
    assert_eq!(file.error_detail.as_deref(), Some(NO_VALID_RECORDS));
    assert!(file.processing_completed_at.is_some());
}

#[test]
fn missing_column_is_a_structural_failure() {
    let harness = TestHarness::new();
    let content = CsvBuilder::without_column(Column::FillTime)
        .raw_row("1,S1,9,10,9,0,Y,2025-10-14 08:30:00")
        .build();

    let outcome = harness.ingest("old-format.csv", &content).unwrap();

    let AttemptOutcome::Failed { file_id, reason } = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(reason.contains("Missing required columns: Fill Time"), "{}", reason);
    assert_eq!(harness.file(file_id).error_detail.as_deref(), Some(reason.as_str()));
    assert_eq!(harness.transaction_count(), 0);
}

#[test]
fn header_only_file_fails() {
    let harness = TestHarness::new();
    let outcome = harness.ingest("empty.csv", &CsvBuilder::new().build()).unwrap();

    let AttemptOutcome::Failed { reason, .. } = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(reason.contains("CSV has no data rows"), "{}", reason);
}

#[tokio::test]
async fn one_failed_attachment_fails_the_message_but_not_its_siblings() {
    let harness = TestHarness::new();
    let handle = harness.deliver_many(vec![
        ("good.csv", CsvBuilder::generated("S1", 4).build()),
        (
            "bad.csv",
            CsvBuilder::without_column(Column::Success)
                .raw_row("1,S2,9,10,9,0,2025-10-14 08:30:00,3")
                .build(),
        ),
        ("also-good.csv", CsvBuilder::generated("S3", 2).build()),
    ]);

    let summary = harness.run_cycle().await;

    assert_eq!(harness.destination_of(handle), Some(Destination::Failure));
    assert_eq!(summary.routed_failure, 1);
    assert_eq!(summary.attachments_completed, 2);
    assert_eq!(summary.attachments_failed, 1);
    assert_eq!(harness.transaction_count(), 6);
    assert!(harness.transaction("S3", 2).is_some());
}

#[tokio::test]
async fn completed_and_duplicate_attachments_route_to_success() {
    let harness = TestHarness::new();
    let known = CsvBuilder::generated("S1", 2).build();
    harness.ingest("known.csv", &known).unwrap();

    let handle = harness.deliver_many(vec![
        ("known.csv", known),
        ("new.csv", CsvBuilder::generated("S2", 2).build()),
    ]);
    harness.run_cycle().await;

    assert_eq!(harness.destination_of(handle), Some(Destination::Success));
    assert_eq!(harness.file_count(), 2);
}

#[tokio::test]
async fn unexpected_store_error_fails_file_and_is_reported() {
    let harness = TestHarness::new();
    harness.break_transactions_table();
    let handle = harness.deliver("day.csv", CsvBuilder::generated("S1", 3).build());

    let (mut worker, _tx) = harness.worker();
    let summary = worker.run_once().await.unwrap();

    assert_eq!(summary.attachments_errored, 1);
    assert_eq!(harness.destination_of(handle), Some(Destination::Failure));

    let file = harness.file(1);
    assert_eq!(file.status, FileStatus::Failed);
    let detail = file.error_detail.unwrap();
    assert!(detail.contains("chunk 0"), "{}", detail);
}

#[test]
fn aborted_attempt_surfaces_the_error() {
    let harness = TestHarness::new();
    harness.break_transactions_table();

    let err = harness
        .ingest("day.csv", &CsvBuilder::generated("S1", 1).build())
        .unwrap_err();

    assert_eq!(err.file_id(), Some(1));
    assert!(err.to_string().contains("aborted"), "{}", err);
}

#[test]
fn small_chunks_persist_everything() {
    let mut harness = TestHarness::new();
    harness.chunk_size = 7;

    let outcome = harness
        .ingest("big.csv", &CsvBuilder::generated("S1", 50).build())
        .unwrap();

    assert!(matches!(outcome, AttemptOutcome::Completed { upserted: 50, .. }));
    assert_eq!(harness.transaction_count(), 50);
}

#[test]
fn purge_removes_old_files_and_their_transactions() {
    let harness = TestHarness::on_disk();
    harness
        .ingest("old.csv", &CsvBuilder::generated("S1", 10).build())
        .unwrap();
    harness.age_all_files();
    let recent = harness
        .ingest("recent.csv", &CsvBuilder::generated("S2", 4).build())
        .unwrap();

    let removed = file_repo::purge_older_than(&harness.db, 30).unwrap();

    assert_eq!(removed, 1);
    assert_eq!(harness.file_count(), 1);
    assert_eq!(harness.transaction_count(), 4);
    assert_eq!(harness.file(recent.file_id()).status, FileStatus::Completed);
}
