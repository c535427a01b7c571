//! Drives one ingestion attempt per attachment and decides where each
//! source message is routed.

use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::IngestionConfig;
use crate::db::transaction_repo::{self, DEFAULT_CHUNK_SIZE};
use crate::db::{file_repo, Database, DatabaseError, FileMetadata, FileStatus};
use crate::hasher::{fingerprint, Fingerprint};
use crate::sanitize::{file_name_only, redact_email};
use crate::transport::{Bundle, MessageTransport};
use crate::validator::RecordValidator;

use super::error::PipelineError;
use super::outcome::{decide_destination, AttachmentReport, AttemptOutcome, BundleReport};

/// Error detail recorded when no row of a file survives validation.
pub const NO_VALID_RECORDS: &str = "No valid transactions found in CSV";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Label stored as the file's source system.
    pub source_system: String,
    pub chunk_size: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            source_system: "imap".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl From<&IngestionConfig> for OrchestratorSettings {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            source_system: config.source_system.clone(),
            chunk_size: config.chunk_size,
        }
    }
}

pub struct IngestionOrchestrator {
    db: Database,
    validator: RecordValidator,
    settings: OrchestratorSettings,
}

impl IngestionOrchestrator {
    pub fn new(db: Database, validator: RecordValidator, settings: OrchestratorSettings) -> Self {
        Self {
            db,
            validator,
            settings,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Runs one ingestion attempt for one attachment.
    ///
    /// Anticipated outcomes (duplicate, structural failure, no valid rows,
    /// success) come back as `Ok`. Any other error after the file row was
    /// created moves the file to FAILED on a best-effort basis and is
    /// returned as [`PipelineError::Aborted`].
    pub fn process_attachment(
        &self,
        metadata: &FileMetadata,
        content: &[u8],
    ) -> Result<AttemptOutcome, PipelineError> {
        let correlation_id = Uuid::new_v4().to_string();
        let fp = fingerprint(content);
        let _span = info_span!("ingest_attachment",
            correlation_id = %correlation_id,
            file_name = %metadata.file_name,
            fingerprint = %fp.short(),
        )
        .entered();

        if let Some(existing) = file_repo::find_by_fingerprint(&self.db, &fp)? {
            return Ok(self.duplicate_of(existing.id, existing.status));
        }

        let file_id = match file_repo::create(&self.db, &fp, metadata, &correlation_id) {
            Ok(id) => id,
            Err(DatabaseError::Conflict { .. }) => return self.lost_creation_race(&fp),
            Err(e) => return Err(e.into()),
        };
        debug!(file_id, "Created file record");

        match self.run_attempt(file_id, &correlation_id, metadata, content) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(file_id, error = %e, "Unexpected error during ingestion");
                self.record_failure(file_id, &e.to_string());
                Err(PipelineError::Aborted { file_id, source: e })
            }
        }
    }

    fn duplicate_of(&self, existing_file_id: i64, existing_status: FileStatus) -> AttemptOutcome {
        info!(
            existing_file_id,
            existing_status = %existing_status,
            "Duplicate content, skipping"
        );
        AttemptOutcome::Duplicate {
            existing_file_id,
            existing_status,
        }
    }

    /// A concurrent writer inserted the same fingerprint between our probe
    /// and our insert. Re-probe and report their row as the original.
    fn lost_creation_race(&self, fp: &Fingerprint) -> Result<AttemptOutcome, PipelineError> {
        match file_repo::find_by_fingerprint(&self.db, fp)? {
            Some(existing) => Ok(self.duplicate_of(existing.id, existing.status)),
            None => Err(DatabaseError::Conflict {
                fingerprint: fp.to_string(),
            }
            .into()),
        }
    }

    fn run_attempt(
        &self,
        file_id: i64,
        correlation_id: &str,
        metadata: &FileMetadata,
        content: &[u8],
    ) -> Result<AttemptOutcome, DatabaseError> {
        file_repo::set_status(&self.db, file_id, FileStatus::Processing, None)?;
        file_repo::mark_processing_started(&self.db, file_id)?;

        if let Err(e) = self.validator.validate_file_structure(content) {
            return self.fail(file_id, e.to_string());
        }

        let parsed = match self.validator.parse(content, &metadata.file_name) {
            Ok(parsed) => parsed,
            Err(e) => return self.fail(file_id, e.to_string()),
        };

        if parsed.records.is_empty() {
            return self.fail(file_id, NO_VALID_RECORDS.to_string());
        }
        if parsed.is_partially_valid() {
            warn!(
                file_id,
                valid = parsed.records.len(),
                invalid = parsed.errors.len(),
                "Proceeding with the valid subset of rows"
            );
        }

        let upsert = transaction_repo::upsert(
            &self.db,
            file_id,
            correlation_id,
            &parsed.records,
            self.settings.chunk_size,
        )?;
        for rejected in &upsert.rejected {
            warn!(
                file_id,
                scale_name = %rejected.record.scale_name,
                sequence_number = rejected.record.sequence_number,
                "Store rejected transaction: {}",
                rejected.reason
            );
        }
        if upsert.upserted == 0 {
            return self.fail(
                file_id,
                format!(
                    "All {} valid transactions were rejected by the store",
                    upsert.rejected.len()
                ),
            );
        }

        file_repo::set_status(&self.db, file_id, FileStatus::Completed, None)?;
        file_repo::mark_processing_completed(&self.db, file_id)?;

        info!(
            file_id,
            upserted = upsert.upserted,
            row_errors = parsed.errors.len(),
            "File ingested"
        );
        Ok(AttemptOutcome::Completed {
            file_id,
            upserted: upsert.upserted,
            row_errors: parsed.errors.len(),
            rejected: upsert.rejected.len(),
        })
    }

    fn fail(&self, file_id: i64, reason: String) -> Result<AttemptOutcome, DatabaseError> {
        warn!(file_id, reason = %reason, "File failed");
        file_repo::set_status(&self.db, file_id, FileStatus::Failed, Some(&reason))?;
        file_repo::mark_processing_completed(&self.db, file_id)?;
        Ok(AttemptOutcome::Failed { file_id, reason })
    }

    /// Best-effort FAILED transition after an unexpected error. A failure
    /// here is logged and not retried.
    fn record_failure(&self, file_id: i64, detail: &str) {
        let recorded = file_repo::set_status(&self.db, file_id, FileStatus::Failed, Some(detail))
            .and_then(|_| file_repo::mark_processing_completed(&self.db, file_id));
        if let Err(e) = recorded {
            error!(file_id, error = %e, "Could not record failure for file");
        }
    }

    /// Processes every attachment of `bundle` independently, then routes
    /// the source message once.
    ///
    /// An attachment that ends in an unexpected error is reported in the
    /// returned [`BundleReport`] and does not stop the others. Only a
    /// routing failure is returned as an error.
    pub async fn process_bundle<T>(
        &self,
        transport: &mut T,
        bundle: &Bundle,
    ) -> Result<BundleReport, PipelineError>
    where
        T: MessageTransport + ?Sized,
    {
        let sender = bundle
            .sender_address
            .as_deref()
            .map(redact_email)
            .unwrap_or_default();
        let span = info_span!("bundle", uid = bundle.handle.uid, sender = %sender);

        async {
            if bundle.attachments.is_empty() {
                warn!("Bundle has no attachments");
            }

            let attachments: Vec<AttachmentReport> = bundle
                .attachments
                .iter()
                .map(|attachment| {
                    let file_name = file_name_only(&attachment.file_name);
                    let metadata = FileMetadata {
                        source_system: self.settings.source_system.clone(),
                        external_message_id: bundle.external_message_id.clone(),
                        sender_address: bundle.sender_address.clone(),
                        subject_line: bundle.subject_line.clone(),
                        received_at: bundle.received_at,
                        file_name: file_name.clone(),
                    };
                    let result = self.process_attachment(&metadata, &attachment.content);
                    AttachmentReport { file_name, result }
                })
                .collect();

            let destination = decide_destination(&attachments);
            transport.route(bundle.handle, destination).await?;
            info!(destination = %destination, "Bundle routed");

            Ok::<_, PipelineError>(BundleReport {
                handle: bundle.handle,
                destination,
                attachments,
            })
        }
        .instrument(span)
        .await
    }
}
