//! Lifecycle states of an ingested file.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::error::DatabaseError;

/// Processing status stored in `ingestion_files.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    New,
    Processing,
    Completed,
    Failed,
    Duplicate,
}

impl FileStatus {
    pub const ALL: [FileStatus; 5] = [
        FileStatus::New,
        FileStatus::Processing,
        FileStatus::Completed,
        FileStatus::Failed,
        FileStatus::Duplicate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::New => "NEW",
            FileStatus::Processing => "PROCESSING",
            FileStatus::Completed => "COMPLETED",
            FileStatus::Failed => "FAILED",
            FileStatus::Duplicate => "DUPLICATE",
        }
    }

    /// States a file never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FileStatus::Completed | FileStatus::Failed | FileStatus::Duplicate
        )
    }

    /// States from which a file may move into `self`.
    pub fn predecessors(self) -> &'static [FileStatus] {
        match self {
            FileStatus::New => &[],
            FileStatus::Processing => &[FileStatus::New],
            FileStatus::Completed => &[FileStatus::Processing],
            FileStatus::Failed => &[FileStatus::New, FileStatus::Processing],
            FileStatus::Duplicate => &[FileStatus::New],
        }
    }

    pub fn can_transition_to(self, target: FileStatus) -> bool {
        target.predecessors().contains(&self)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DatabaseError::InvalidStatus(s.to_string()))
    }
}

impl rusqlite::ToSql for FileStatus {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl rusqlite::types::FromSql for FileStatus {
    fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|e: DatabaseError| rusqlite::types::FromSqlError::Other(Box::new(e)))
    }
}
