//! Typed column values and coercion from raw CSV text.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Date layouts tried, in order, when a `date` column has no `format`.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

/// Timestamp layouts tried, in order, when a `timestamp` column has no `format`.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
];

const TRUE_VALUES: &[&str] = &["true", "t", "1", "yes", "y", "oui", "o"];
const FALSE_VALUES: &[&str] = &["false", "f", "0", "no", "n", "non"];

/// Declared type of a target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    #[serde(alias = "string", alias = "varchar")]
    Text,
    #[serde(alias = "int", alias = "bigint")]
    Integer,
    #[serde(alias = "double", alias = "number")]
    Float,
    #[serde(alias = "bool")]
    Boolean,
    Date,
    #[serde(alias = "datetime")]
    Timestamp,
}

impl ColumnType {
    /// Parse cleaned text into a value of this type.
    ///
    /// `format` is a chrono strftime layout and only applies to `date` and
    /// `timestamp` columns.
    pub fn coerce(self, raw: &str, format: Option<&str>) -> Result<Value, String> {
        match self {
            ColumnType::Text => Ok(Value::Text(raw.to_string())),
            ColumnType::Integer => raw
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|e| format!("not an integer ({})", e)),
            ColumnType::Float => raw
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| format!("not a number ({})", e)),
            ColumnType::Boolean => parse_bool(raw).map(Value::Boolean),
            ColumnType::Date => parse_date(raw, format).map(Value::Date),
            ColumnType::Timestamp => parse_timestamp(raw, format).map(Value::Timestamp),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// A coerced column value, ready to bind.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Serialize back to text. Dates and timestamps use `format` when given.
    ///
    /// Returns `None` for `Null`.
    pub fn render(&self, format: Option<&str>) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.clone()),
            Value::Integer(n) => Some(n.to_string()),
            Value::Float(x) => Some(x.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Date(d) => Some(d.format(format.unwrap_or("%Y-%m-%d")).to_string()),
            Value::Timestamp(ts) => Some(match format {
                Some(f) => ts.format(f).to_string(),
                None => ts.to_string(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render(None) {
            Some(s) => f.write_str(&s),
            None => f.write_str("NULL"),
        }
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    let lower = raw.to_lowercase();
    if TRUE_VALUES.contains(&lower.as_str()) {
        Ok(true)
    } else if FALSE_VALUES.contains(&lower.as_str()) {
        Ok(false)
    } else {
        Err("not a boolean".to_string())
    }
}

fn parse_date(raw: &str, format: Option<&str>) -> Result<NaiveDate, String> {
    if let Some(fmt) = format {
        return NaiveDate::parse_from_str(raw, fmt)
            .map_err(|e| format!("not a date in format '{}' ({})", fmt, e));
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| "not a recognized date".to_string())
}

fn parse_timestamp(raw: &str, format: Option<&str>) -> Result<NaiveDateTime, String> {
    if let Some(fmt) = format {
        return NaiveDateTime::parse_from_str(raw, fmt)
            .map_err(|e| format!("not a timestamp in format '{}' ({})", fmt, e));
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.naive_utc());
    }

    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| "not a recognized timestamp".to_string())
}
