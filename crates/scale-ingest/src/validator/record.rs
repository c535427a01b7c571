//! Typed records produced by row validation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::RowError;

/// One measurement event extracted from a CSV row.
///
/// `(scale_name, sequence_number)` is the natural key. Ownership (file id,
/// correlation id) is attached when the record is persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleTransaction {
    pub scale_name: String,
    pub sequence_number: i64,
    pub cylinder_capacity_kg: Option<f64>,
    pub tare_weight_kg: Option<f64>,
    pub fill_weight_kg: Option<f64>,
    pub residual_weight_kg: Option<f64>,
    pub succeeded: bool,
    pub started_at: DateTime<Utc>,
    pub fill_duration_seconds: i64,
}

/// Result of validating a single data row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Valid(ScaleTransaction),
    Invalid(RowError),
}

impl RowOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, RowOutcome::Valid(_))
    }
}

impl From<Result<ScaleTransaction, RowError>> for RowOutcome {
    fn from(result: Result<ScaleTransaction, RowError>) -> Self {
        match result {
            Ok(record) => RowOutcome::Valid(record),
            Err(e) => RowOutcome::Invalid(e),
        }
    }
}

/// Output of a full parse: the valid subset plus one error per rejected row.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub records: Vec<ScaleTransaction>,
    pub errors: Vec<RowError>,
}

impl ParsedFile {
    /// Total number of data rows seen.
    pub fn rows_read(&self) -> usize {
        self.records.len() + self.errors.len()
    }

    pub fn is_partially_valid(&self) -> bool {
        !self.records.is_empty() && !self.errors.is_empty()
    }

    pub(crate) fn push(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Valid(record) => self.records.push(record),
            RowOutcome::Invalid(e) => self.errors.push(e),
        }
    }
}
