use serde::Serialize;

use crate::db::FileStatus;
use crate::transport::{BundleHandle, Destination};

use super::error::PipelineError;

/// Terminal classification of one ingestion attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    /// Valid records were persisted and the file reached COMPLETED.
    #[serde(rename_all = "camelCase")]
    Completed {
        file_id: i64,
        upserted: usize,
        /// Rows the validator rejected; logged, never persisted.
        row_errors: usize,
        /// Rows the store refused even when written alone.
        rejected: usize,
    },

    /// An anticipated failure. The file is FAILED with `reason` as its
    /// error detail.
    #[serde(rename_all = "camelCase")]
    Failed { file_id: i64, reason: String },

    /// The content was already known. No new file row was created and the
    /// existing row is untouched.
    #[serde(rename_all = "camelCase")]
    Duplicate {
        existing_file_id: i64,
        existing_status: FileStatus,
    },
}

impl AttemptOutcome {
    pub fn file_id(&self) -> i64 {
        match self {
            AttemptOutcome::Completed { file_id, .. } | AttemptOutcome::Failed { file_id, .. } => {
                *file_id
            }
            AttemptOutcome::Duplicate {
                existing_file_id, ..
            } => *existing_file_id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AttemptOutcome::Duplicate { .. })
    }

    /// True for outcomes that let the source message count as a success.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::Completed { .. } | AttemptOutcome::Duplicate { .. }
        )
    }
}

/// What happened to one attachment of a bundle.
#[derive(Debug)]
pub struct AttachmentReport {
    pub file_name: String,
    pub result: Result<AttemptOutcome, PipelineError>,
}

impl AttachmentReport {
    pub fn outcome(&self) -> Option<&AttemptOutcome> {
        self.result.as_ref().ok()
    }
}

/// Result of processing one bundle: per-attachment results and where the
/// source message was routed.
#[derive(Debug)]
pub struct BundleReport {
    pub handle: BundleHandle,
    pub destination: Destination,
    pub attachments: Vec<AttachmentReport>,
}

impl BundleReport {
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, AttemptOutcome::Completed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, AttemptOutcome::Failed { .. }))
    }

    pub fn duplicates(&self) -> usize {
        self.count(AttemptOutcome::is_duplicate)
    }

    /// Attachments that ended in an unexpected error.
    pub fn errored(&self) -> usize {
        self.attachments.iter().filter(|a| a.result.is_err()).count()
    }

    fn count(&self, pred: impl Fn(&AttemptOutcome) -> bool) -> usize {
        self.attachments
            .iter()
            .filter_map(AttachmentReport::outcome)
            .filter(|o| pred(*o))
            .count()
    }
}

/// Routing rule for a whole bundle: DUPLICATE when every attachment was a
/// duplicate, SUCCESS when every attachment completed or was a duplicate,
/// FAILURE otherwise. A bundle with no attachments is a failure.
pub fn decide_destination(attachments: &[AttachmentReport]) -> Destination {
    if attachments.is_empty() {
        return Destination::Failure;
    }

    let outcomes: Option<Vec<&AttemptOutcome>> =
        attachments.iter().map(AttachmentReport::outcome).collect();
    match outcomes {
        Some(outcomes) if outcomes.iter().all(|o| o.is_duplicate()) => Destination::Duplicate,
        Some(outcomes) if outcomes.iter().all(|o| o.is_success()) => Destination::Success,
        _ => Destination::Failure,
    }
}
