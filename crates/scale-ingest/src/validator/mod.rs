//! CSV validation for scale transaction exports.
//!
//! Validation happens in two stages. [`RecordValidator::validate_file_structure`]
//! is a cheap precheck that rejects files which cannot possibly yield records.
//! [`RecordValidator::parse`] then applies a fixed, ordered list of field
//! parsers to each data row independently, so a bad row is reported and
//! skipped without affecting its neighbours.

use std::fmt;

use chrono_tz::Tz;
use csv::StringRecord;
use tracing::{debug, warn};

pub mod error;
pub mod fields;
pub mod record;

pub use error::{FieldProblem, FileValidationError, RowError, StructuralError};
pub use fields::{format_source_timestamp, IntConstraint, TIMESTAMP_FORMAT};
pub use record::{ParsedFile, RowOutcome, ScaleTransaction};

/// Timezone in which the scale controllers record their clocks.
pub const DEFAULT_SOURCE_TIMEZONE: Tz = chrono_tz::Africa::Johannesburg;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Required input columns, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    TransactNo,
    ScaleName,
    CylSize,
    TareWeight,
    FillKgs,
    Residual,
    Success,
    DateTimeStart,
    FillTime,
}

impl Column {
    pub const ALL: [Column; 9] = [
        Column::TransactNo,
        Column::ScaleName,
        Column::CylSize,
        Column::TareWeight,
        Column::FillKgs,
        Column::Residual,
        Column::Success,
        Column::DateTimeStart,
        Column::FillTime,
    ];

    /// Exact header text expected in the CSV.
    pub fn header(self) -> &'static str {
        match self {
            Column::TransactNo => "TransactNo",
            Column::ScaleName => "Scale Name",
            Column::CylSize => "CylSize",
            Column::TareWeight => "TareWeight",
            Column::FillKgs => "Fill kgs",
            Column::Residual => "Residual",
            Column::Success => "Success",
            Column::DateTimeStart => "Date Time Start",
            Column::FillTime => "Fill Time",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

/// Position of every required column within the header record.
struct ColumnIndex([usize; 9]);

impl ColumnIndex {
    /// Resolves required columns against the headers, or lists the missing ones.
    fn resolve(headers: &StringRecord) -> Result<Self, Vec<&'static str>> {
        let mut positions = [0usize; 9];
        let mut missing = Vec::new();
        for (slot, column) in Column::ALL.iter().enumerate() {
            match headers.iter().position(|h| h.trim() == column.header()) {
                Some(pos) => positions[slot] = pos,
                None => missing.push(column.header()),
            }
        }
        if missing.is_empty() {
            Ok(Self(positions))
        } else {
            Err(missing)
        }
    }

    /// Cell text for a column. Short rows yield empty cells.
    fn cell<'r>(&self, record: &'r StringRecord, column: Column) -> &'r str {
        record.get(self.0[column as usize]).unwrap_or("")
    }
}

/// Parses raw CSV bytes into validated [`ScaleTransaction`]s.
#[derive(Debug, Clone, Copy)]
pub struct RecordValidator {
    source_tz: Tz,
}

impl Default for RecordValidator {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_TIMEZONE)
    }
}

impl RecordValidator {
    pub fn new(source_tz: Tz) -> Self {
        Self { source_tz }
    }

    pub fn source_timezone(&self) -> Tz {
        self.source_tz
    }

    /// Lightweight structural precheck.
    ///
    /// Reports every problem it can find: undecodable text short-circuits,
    /// otherwise missing headers, missing required columns, and an empty body
    /// are all collected.
    pub fn validate_file_structure(&self, content: &[u8]) -> Result<(), FileValidationError> {
        let fail = |problems| Err(FileValidationError { problems });

        let text = match decode(content) {
            Ok(text) => text,
            Err(e) => return fail(vec![e]),
        };

        let mut reader = reader_for(text);
        let headers = match read_headers(&mut reader) {
            Ok(headers) => headers,
            Err(e) => return fail(vec![e]),
        };

        let mut problems = Vec::new();
        if let Err(missing) = ColumnIndex::resolve(&headers) {
            problems.push(StructuralError::MissingColumns(missing));
        }

        let mut first = StringRecord::new();
        match reader.read_record(&mut first) {
            Ok(true) => {}
            Ok(false) => problems.push(StructuralError::NoDataRows),
            Err(e) => problems.push(StructuralError::Unreadable(e.to_string())),
        }

        if problems.is_empty() {
            Ok(())
        } else {
            fail(problems)
        }
    }

    /// Full parse. Structural problems fail the whole file; anything else is
    /// isolated to its row.
    pub fn parse(&self, content: &[u8], file_name: &str) -> Result<ParsedFile, StructuralError> {
        let text = decode(content)?;
        let mut reader = reader_for(text);
        let headers = read_headers(&mut reader)?;
        let index = ColumnIndex::resolve(&headers).map_err(StructuralError::MissingColumns)?;

        let mut parsed = ParsedFile::default();
        for (i, result) in reader.records().enumerate() {
            let row = i + 1;
            let outcome = match result {
                Ok(record) => self.validate_row(row, &index, &record),
                Err(e) => RowOutcome::Invalid(RowError::malformed(row, e.to_string())),
            };
            if let RowOutcome::Invalid(ref e) = outcome {
                warn!(file = %file_name, "Validation error: {}", e);
            }
            parsed.push(outcome);
        }

        if !parsed.errors.is_empty() {
            warn!(
                file = %file_name,
                "CSV has {} validation errors",
                parsed.errors.len()
            );
        }
        debug!(
            file = %file_name,
            "Parsed {} valid transactions from {} rows",
            parsed.records.len(),
            parsed.rows_read()
        );
        Ok(parsed)
    }

    /// Applies the field parsers in column order; the first failing field
    /// decides the row's single error.
    fn validate_row(&self, row: usize, index: &ColumnIndex, record: &StringRecord) -> RowOutcome {
        self.build_record(row, index, record).into()
    }

    fn build_record(
        &self,
        row: usize,
        index: &ColumnIndex,
        record: &StringRecord,
    ) -> Result<ScaleTransaction, RowError> {
        let field = |column: Column| index.cell(record, column);
        let reject = |column: Column| {
            move |problem: FieldProblem| RowError::field(row, column, field(column), problem)
        };

        let sequence_number = fields::parse_int(field(Column::TransactNo), IntConstraint::Positive)
            .map_err(reject(Column::TransactNo))?;
        let scale_name =
            fields::parse_name(field(Column::ScaleName)).map_err(reject(Column::ScaleName))?;
        let cylinder_capacity_kg =
            fields::parse_weight(field(Column::CylSize)).map_err(reject(Column::CylSize))?;
        let tare_weight_kg =
            fields::parse_weight(field(Column::TareWeight)).map_err(reject(Column::TareWeight))?;
        let fill_weight_kg =
            fields::parse_weight(field(Column::FillKgs)).map_err(reject(Column::FillKgs))?;
        let residual_weight_kg =
            fields::parse_weight(field(Column::Residual)).map_err(reject(Column::Residual))?;
        let succeeded =
            fields::parse_flag(field(Column::Success)).map_err(reject(Column::Success))?;
        let started_at = fields::parse_timestamp(field(Column::DateTimeStart), self.source_tz)
            .map_err(reject(Column::DateTimeStart))?;
        let fill_duration_seconds =
            fields::parse_int(field(Column::FillTime), IntConstraint::NonNegative)
                .map_err(reject(Column::FillTime))?;

        Ok(ScaleTransaction {
            scale_name,
            sequence_number,
            cylinder_capacity_kg,
            tare_weight_kg,
            fill_weight_kg,
            residual_weight_kg,
            succeeded,
            started_at,
            fill_duration_seconds,
        })
    }
}

fn decode(content: &[u8]) -> Result<&str, StructuralError> {
    let body = content.strip_prefix(UTF8_BOM).unwrap_or(content);
    std::str::from_utf8(body).map_err(|_| StructuralError::NotUtf8)
}

fn reader_for(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes())
}

fn read_headers(reader: &mut csv::Reader<&[u8]>) -> Result<StringRecord, StructuralError> {
    let headers = reader
        .headers()
        .map_err(|e| StructuralError::Unreadable(e.to_string()))?
        .clone();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(StructuralError::NoHeaders);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const HEADER: &str = "TransactNo,Scale Name,CylSize,TareWeight,Fill kgs,Residual,Success,Date Time Start,Fill Time";

    fn csv(rows: &[&str]) -> Vec<u8> {
        let mut out = String::from(HEADER);
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out.push('\n');
        out.into_bytes()
    }

    #[test]
    fn test_parse_valid_row() {
        let content = csv(&["1001,Scale A,48kg,20.5 kg,47.9,0.1,Y,2024-03-15 08:30:00,95"]);
        let parsed = RecordValidator::default().parse(&content, "a.csv").unwrap();

        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.records.len(), 1);
        let record = &parsed.records[0];
        assert_eq!(record.sequence_number, 1001);
        assert_eq!(record.scale_name, "Scale A");
        assert_eq!(record.cylinder_capacity_kg, Some(48.0));
        assert_eq!(record.tare_weight_kg, Some(20.5));
        assert_eq!(record.fill_weight_kg, Some(47.9));
        assert_eq!(record.residual_weight_kg, Some(0.1));
        assert!(record.succeeded);
        assert_eq!(
            record.started_at,
            Utc.with_ymd_and_hms(2024, 3, 15, 6, 30, 0).unwrap()
        );
        assert_eq!(record.fill_duration_seconds, 95);
    }

    #[test]
    fn test_partial_validity_isolates_rows() {
        let content = csv(&[
            "1,Scale A,48,20,47,0,Y,2024-03-15 08:30:00,60",
            "2,Scale A,48,20,47,0,maybe,2024-03-15 08:31:00,60",
            "3,Scale A,48,20,47,0,N,2024-03-15 08:32:00,60",
            "4,,48,20,47,0,N,2024-03-15 08:33:00,60",
        ]);
        let parsed = RecordValidator::default().parse(&content, "p.csv").unwrap();

        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.errors.len(), 2);
        assert!(parsed.is_partially_valid());
        assert_eq!(
            parsed.errors[0].to_string(),
            "Row 2: Invalid Success: 'maybe' - expected Y/N or True/False"
        );
        assert_eq!(parsed.errors[1].to_string(), "Row 4: Scale Name is required");
        let numbers: Vec<i64> = parsed.records.iter().map(|r| r.sequence_number).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[test]
    fn test_one_error_per_row() {
        // Both the sequence number and the flag are bad; only the first is reported.
        let content = csv(&["0,Scale A,48,20,47,0,maybe,2024-03-15 08:30:00,60"]);
        let parsed = RecordValidator::default().parse(&content, "x.csv").unwrap();
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].column, Some(Column::TransactNo));
    }

    #[test]
    fn test_short_row_is_row_error() {
        let content = csv(&["5,Scale A,48"]);
        let parsed = RecordValidator::default().parse(&content, "s.csv").unwrap();
        assert!(parsed.records.is_empty());
        assert_eq!(parsed.errors[0].to_string(), "Row 1: Success is required");
    }

    #[test]
    fn test_missing_columns_fail_whole_parse() {
        let content = b"TransactNo,Scale Name,Success\n1,Scale A,Y\n";
        let err = RecordValidator::default().parse(content, "m.csv").unwrap_err();
        match err {
            StructuralError::MissingColumns(cols) => {
                assert_eq!(
                    cols,
                    vec!["CylSize", "TareWeight", "Fill kgs", "Residual", "Date Time Start", "Fill Time"]
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_bom_and_padded_headers_and_extra_columns() {
        let mut content = UTF8_BOM.to_vec();
        content.extend_from_slice(
            b"Operator, TransactNo ,Scale Name,CylSize,TareWeight,Fill kgs,Residual,Success,Date Time Start,Fill Time\n\
              bob,9,Scale B,,,,,TRUE,2024-01-01 00:00:00,0\n",
        );
        let parsed = RecordValidator::default().parse(&content, "b.csv").unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].sequence_number, 9);
        assert_eq!(parsed.records[0].fill_weight_kg, None);
    }

    #[test]
    fn test_precheck_accepts_well_formed_file() {
        let content = csv(&["1,Scale A,48,20,47,0,Y,2024-03-15 08:30:00,60"]);
        assert!(RecordValidator::default()
            .validate_file_structure(&content)
            .is_ok());
    }

    #[test]
    fn test_precheck_reports_all_problems() {
        let err = RecordValidator::default()
            .validate_file_structure(b"TransactNo,Scale Name\n")
            .unwrap_err();
        assert_eq!(err.problems.len(), 2);
        assert!(err.missing_columns().contains(&"Fill Time"));
        assert_eq!(err.problems[1], StructuralError::NoDataRows);
    }

    #[test]
    fn test_precheck_empty_and_binary_input() {
        let validator = RecordValidator::default();
        let err = validator.validate_file_structure(b"").unwrap_err();
        assert_eq!(err.problems, vec![StructuralError::NoHeaders]);

        let err = validator
            .validate_file_structure(&[0xff, 0xfe, 0x00, 0x41])
            .unwrap_err();
        assert_eq!(err.problems, vec![StructuralError::NotUtf8]);
        assert_eq!(
            err.to_string(),
            "File validation failed: CSV file is not valid UTF-8"
        );
    }

    #[test]
    fn test_configured_timezone_is_used() {
        let content = csv(&["1,Scale A,48,20,47,0,Y,2024-07-01 12:00:00,60"]);
        let validator = RecordValidator::new(chrono_tz::UTC);
        let parsed = validator.parse(&content, "utc.csv").unwrap();
        assert_eq!(
            parsed.records[0].started_at,
            Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
        );
    }
}
