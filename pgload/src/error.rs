//! Error types for the load pipeline.
//!
//! One error type per stage:
//!
//! - [`ConfigError`] - configuration loading (always fatal)
//! - [`ExtractError`] - CSV extraction (fatal or per-row, see [`ExtractError::is_fatal`])
//! - [`TransformError`] - column coercion (always per-row)
//! - [`LoadError`] - database writes (fatal or per-row, see [`LoadError::is_fatal`])
//! - [`PipelineError`] - top-level driver errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across stage boundaries.

use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the file.
    #[error("Cannot read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML or does not match the expected layout.
    #[error("Malformed config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A required key is absent or empty.
    #[error("Missing required config key: {0}")]
    MissingKey(String),

    /// A `${VAR}` reference points at an unset environment variable.
    #[error("Environment variable '{var}' referenced by '{key}' is not set")]
    UnresolvedVariable { key: String, var: String },

    /// A value is present but unusable.
    #[error("Invalid value for '{key}': {message}")]
    Invalid { key: String, message: String },
}

// =============================================================================
// Extraction Errors
// =============================================================================

/// Errors while reading the CSV source.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The source file could not be opened.
    #[error("Cannot open source file '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file has no header line.
    #[error("Source file '{0}' is empty")]
    Empty(PathBuf),

    /// The header line could not be parsed.
    #[error("Invalid CSV header: {0}")]
    Header(String),

    /// Reading failed mid-stream.
    #[error("I/O error while reading row {row}: {message}")]
    Io { row: usize, message: String },

    /// The content could not be decoded with the configured encoding.
    #[error("Cannot decode source as {encoding}")]
    Encoding { encoding: String },

    /// A record has a different number of fields than the header.
    #[error("Row {row}: expected {expected} fields, found {found}")]
    ColumnCount {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// A record could not be parsed.
    #[error("Row {row}: malformed record: {message}")]
    Malformed { row: usize, message: String },
}

impl ExtractError {
    /// Whether the error ends the extraction, as opposed to failing one row.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ColumnCount { .. } | Self::Malformed { .. })
    }

    /// Source row index for per-row errors.
    pub fn row(&self) -> Option<usize> {
        match self {
            Self::ColumnCount { row, .. } | Self::Malformed { row, .. } | Self::Io { row, .. } => {
                Some(*row)
            }
            _ => None,
        }
    }
}

// =============================================================================
// Transformation Errors
// =============================================================================

/// Why a column could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformErrorKind {
    /// A required column resolved to an empty value and has no default.
    MissingValue,
    /// The value does not parse as the declared type.
    Coercion(String),
}

/// A single row failed to transform. Never fatal to the run.
#[derive(Debug, Clone, Error)]
#[error("Row {row}, column '{column}'{}", transform_detail(.value, .kind))]
pub struct TransformError {
    /// 1-based source row index.
    pub row: usize,
    /// Target column name.
    pub column: String,
    /// Value after cleanup operations, if any.
    pub value: Option<String>,
    pub kind: TransformErrorKind,
}

impl TransformError {
    pub fn missing(row: usize, column: impl Into<String>) -> Self {
        Self {
            row,
            column: column.into(),
            value: None,
            kind: TransformErrorKind::MissingValue,
        }
    }

    pub fn coercion(
        row: usize,
        column: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row,
            column: column.into(),
            value: Some(value.into()),
            kind: TransformErrorKind::Coercion(message.into()),
        }
    }
}

fn transform_detail(value: &Option<String>, kind: &TransformErrorKind) -> String {
    match (kind, value) {
        (TransformErrorKind::MissingValue, _) => ": required value is missing".to_string(),
        (TransformErrorKind::Coercion(msg), Some(val)) => format!(" (value '{}'): {}", val, msg),
        (TransformErrorKind::Coercion(msg), None) => format!(": {}", msg),
    }
}

// =============================================================================
// Load Errors
// =============================================================================

/// Errors from the database side of the pipeline.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The OAuth token could not be obtained.
    #[error("Cannot obtain OAuth token: {0}")]
    Token(String),

    /// The server rejected the credentials.
    #[error("Authentication rejected by {target}: {message}")]
    Authentication { target: String, message: String },

    /// The server could not be reached.
    #[error("Cannot reach database {target}: {message}")]
    Unreachable { target: String, message: String },

    /// The connection broke after it was established.
    #[error("Database connection lost: {0}")]
    ConnectionLost(String),

    /// The database refused one row (constraint violation, bad value, ...).
    #[error("Row {row} rejected by database{}: {message}", sqlstate_suffix(.code))]
    Rejected {
        row: usize,
        code: Option<String>,
        message: String,
    },
}

fn sqlstate_suffix(code: &Option<String>) -> String {
    code.as_ref().map(|c| format!(" [{}]", c)).unwrap_or_default()
}

impl LoadError {
    /// Whether the error ends the load phase, as opposed to failing one row.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Fatal errors that end a run in the `Failed` state.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Extraction error.
    #[error("Extract error: {0}")]
    Extract(#[from] ExtractError),

    /// Load error.
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// The CSV header lacks columns the transform rules read from.
    #[error("Source is missing columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// The CSV header cannot be loaded as it is (duplicate or blank names).
    #[error("Invalid source header: {0}")]
    InvalidHeader(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for extraction.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Result type for loading.
pub type LoadResult<T> = Result<T, LoadError>;

/// Result type for pipeline runs.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        let config_err = ConfigError::MissingKey("source.path".into());
        let pipeline_err: PipelineError = config_err.into();
        assert!(pipeline_err.to_string().contains("source.path"));

        let extract_err = ExtractError::Empty(PathBuf::from("data.csv"));
        let pipeline_err: PipelineError = extract_err.into();
        assert!(pipeline_err.to_string().contains("empty"));
    }

    #[test]
    fn test_transform_error_format() {
        let err = TransformError::coercion(5, "amount", "abc", "not a number");
        let msg = err.to_string();
        assert!(msg.contains("Row 5"));
        assert!(msg.contains("column 'amount'"));
        assert!(msg.contains("value 'abc'"));

        let err = TransformError::missing(3, "id");
        assert_eq!(err.to_string(), "Row 3, column 'id': required value is missing");
    }

    #[test]
    fn test_fatality() {
        assert!(!ExtractError::ColumnCount { row: 2, expected: 3, found: 2 }.is_fatal());
        assert!(ExtractError::Empty(PathBuf::from("x.csv")).is_fatal());

        let rejected = LoadError::Rejected {
            row: 4,
            code: Some("23505".into()),
            message: "duplicate key".into(),
        };
        assert!(!rejected.is_fatal());
        assert!(rejected.to_string().contains("[23505]"));
        assert!(LoadError::ConnectionLost("reset".into()).is_fatal());
    }
}
