use thiserror::Error;

use crate::db::DatabaseError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The store failed before a file row existed for the attempt.
    #[error("Store operation failed: {0}")]
    Store(#[from] DatabaseError),

    /// An unexpected error after the file row was created. The file has
    /// been moved to FAILED on a best-effort basis.
    #[error("Ingestion of file {file_id} aborted: {source}")]
    Aborted {
        file_id: i64,
        #[source]
        source: DatabaseError,
    },

    #[error("Routing failed: {0}")]
    Transport(#[from] TransportError),
}

impl PipelineError {
    /// The file row affected by the error, if one was created.
    pub fn file_id(&self) -> Option<i64> {
        match self {
            PipelineError::Aborted { file_id, .. } => Some(*file_id),
            _ => None,
        }
    }
}
