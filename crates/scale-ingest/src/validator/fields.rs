//! Per-field parsers. Each takes the raw cell text and returns either the
//! typed value or the problem that rejects the row.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::error::FieldProblem;

/// Literal format of the start timestamp column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const TRUTHY: &[&str] = &["Y", "YES", "TRUE", "1"];
const FALSY: &[&str] = &["N", "NO", "FALSE", "0"];

/// Sign constraint applied after an integer has been parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntConstraint {
    Positive,
    NonNegative,
}

/// Parses a required integer. Numeric strings with a fractional part are
/// truncated toward zero.
pub fn parse_int(value: &str, constraint: IntConstraint) -> Result<i64, FieldProblem> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FieldProblem::Required);
    }

    let parsed = match trimmed.parse::<i64>() {
        Ok(n) => n,
        Err(_) => {
            let real: f64 = trimmed
                .parse()
                .map_err(|_| FieldProblem::Invalid("expected an integer".to_string()))?;
            if !real.is_finite() {
                return Err(FieldProblem::Invalid("expected a finite number".to_string()));
            }
            let truncated = real.trunc();
            if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
                return Err(FieldProblem::Invalid("value out of range".to_string()));
            }
            truncated as i64
        }
    };

    match constraint {
        IntConstraint::Positive if parsed <= 0 => {
            Err(FieldProblem::Invalid("must be positive".to_string()))
        }
        IntConstraint::NonNegative if parsed < 0 => {
            Err(FieldProblem::Invalid("cannot be negative".to_string()))
        }
        _ => Ok(parsed),
    }
}

/// Parses an optional weight in kilograms. A trailing `kg`/`kgs` unit token
/// is accepted in any case. Empty input (before or after stripping the unit)
/// is absent, not an error.
pub fn parse_weight(value: &str) -> Result<Option<f64>, FieldProblem> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let number = strip_unit(trimmed).trim();
    if number.is_empty() {
        return Ok(None);
    }

    match number.parse::<f64>() {
        Ok(kg) if kg.is_finite() => Ok(Some(kg)),
        _ => Err(FieldProblem::Invalid("expected numeric value".to_string())),
    }
}

fn strip_unit(value: &str) -> &str {
    for unit in ["kgs", "kg"] {
        if value.len() >= unit.len() {
            let split = value.len() - unit.len();
            if value.is_char_boundary(split) && value[split..].eq_ignore_ascii_case(unit) {
                return &value[..split];
            }
        }
    }
    value
}

/// Parses the success flag against the accepted truthy and falsy sets.
pub fn parse_flag(value: &str) -> Result<bool, FieldProblem> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FieldProblem::Required);
    }

    let upper = trimmed.to_ascii_uppercase();
    if TRUTHY.contains(&upper.as_str()) {
        Ok(true)
    } else if FALSY.contains(&upper.as_str()) {
        Ok(false)
    } else {
        Err(FieldProblem::Invalid(
            "expected Y/N or True/False".to_string(),
        ))
    }
}

/// Parses a civil timestamp in the source timezone and converts it to UTC.
///
/// An ambiguous local time (clocks rolled back) resolves to the earlier
/// instant. A local time skipped by a forward transition is rejected.
pub fn parse_timestamp(value: &str, tz: Tz) -> Result<DateTime<Utc>, FieldProblem> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FieldProblem::Required);
    }

    let naive = NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT).map_err(|_| {
        FieldProblem::Invalid("expected format 'YYYY-MM-DD HH:MM:SS'".to_string())
    })?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| FieldProblem::Invalid(format!("local time does not exist in {}", tz)))
}

/// Renders a stored instant back in the source timezone using the column's
/// literal format.
pub fn format_source_timestamp(instant: &DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a required, non-blank name. The result is trimmed.
pub fn parse_name(value: &str) -> Result<String, FieldProblem> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(FieldProblem::Required)
    } else {
        Ok(trimmed.to_string())
    }
}
