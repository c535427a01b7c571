//! Validation error types.

use std::fmt;

use thiserror::Error;

use super::Column;

/// Whole-file problems. Any of these rejects the file before row parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("CSV file is not valid UTF-8")]
    NotUtf8,

    #[error("CSV has no headers")]
    NoHeaders,

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<&'static str>),

    #[error("CSV has no data rows")]
    NoDataRows,

    #[error("CSV could not be read: {0}")]
    Unreadable(String),
}

/// Aggregate result of the structural precheck.
///
/// Carries every problem found, in detection order, so the failure
/// recorded against the file lists all of them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("File validation failed: {}", join_problems(.problems))]
pub struct FileValidationError {
    pub problems: Vec<StructuralError>,
}

impl FileValidationError {
    /// Names of every required column reported missing.
    pub fn missing_columns(&self) -> Vec<&'static str> {
        self.problems
            .iter()
            .filter_map(|p| match p {
                StructuralError::MissingColumns(cols) => Some(cols.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

fn join_problems(problems: &[StructuralError]) -> String {
    problems
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a single field rejected its row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldProblem {
    /// The value was empty after trimming.
    Required,
    /// The value was present but failed to parse or violated a constraint.
    Invalid(String),
}

/// A rejected data row. Never escapes the validator as an `Err`; rejected
/// rows are collected alongside the valid records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// 1-based data row number (the header row is not counted).
    pub row: usize,
    pub column: Option<Column>,
    /// Original, untrimmed cell value.
    pub value: String,
    pub problem: FieldProblem,
}

impl RowError {
    pub(crate) fn field(row: usize, column: Column, value: &str, problem: FieldProblem) -> Self {
        Self {
            row,
            column: Some(column),
            value: value.to_string(),
            problem,
        }
    }

    pub(crate) fn malformed(row: usize, reason: String) -> Self {
        Self {
            row,
            column: None,
            value: String::new(),
            problem: FieldProblem::Invalid(reason),
        }
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.column, &self.problem) {
            (Some(column), FieldProblem::Required) => {
                write!(f, "Row {}: {} is required", self.row, column)
            }
            (Some(column), FieldProblem::Invalid(reason)) => write!(
                f,
                "Row {}: Invalid {}: '{}' - {}",
                self.row, column, self.value, reason
            ),
            (None, FieldProblem::Invalid(reason)) => {
                write!(f, "Row {}: Malformed record - {}", self.row, reason)
            }
            (None, FieldProblem::Required) => write!(f, "Row {}: Empty record", self.row),
        }
    }
}

impl std::error::Error for RowError {}
