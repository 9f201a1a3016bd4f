//! Column rule set
//!
//! The rules define how CSV columns become typed target columns. They are read
//! from the `transform` section of the configuration file.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

use super::operations::Operation;
use super::value::ColumnType;

/// The complete rule set: one rule per target column, in target order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformRules {
    /// Cell values treated as missing, in addition to the empty string
    #[serde(default)]
    pub null_values: Vec<String>,

    /// Target columns. When empty, every CSV column is loaded as text.
    #[serde(default)]
    pub columns: Vec<ColumnRule>,
}

/// Transformation rule for a single target column
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnRule {
    /// Target column name
    pub name: String,

    /// Source column from CSV (defaults to `name`)
    #[serde(default)]
    pub source: Option<String>,

    /// Multiple source columns to concatenate (mutually exclusive with source and constant)
    #[serde(default)]
    pub sources: Option<Vec<String>>,

    /// Separator for concatenating multiple sources (default: " ")
    #[serde(default = "default_concat_separator")]
    pub concat_separator: String,

    /// Constant value (mutually exclusive with source/sources)
    #[serde(default, deserialize_with = "scalar_string")]
    pub constant: Option<String>,

    /// Ordered list of cleanup operations
    #[serde(default)]
    pub operations: Vec<Operation>,

    /// Raw value substituted when the cleaned value is missing
    #[serde(default, deserialize_with = "scalar_string")]
    pub default: Option<String>,

    /// Whether a missing value fails the row
    #[serde(default)]
    pub required: bool,

    /// Declared target type
    #[serde(rename = "type", default)]
    pub kind: ColumnType,

    /// strftime layout for date and timestamp columns
    #[serde(default)]
    pub format: Option<String>,
}

fn default_concat_separator() -> String {
    " ".to_string()
}

/// Accept any YAML scalar where a raw string is expected (`default: 0`).
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Str(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|s| match s {
        Scalar::Str(s) => s,
        Scalar::Int(n) => n.to_string(),
        Scalar::Float(x) => x.to_string(),
        Scalar::Bool(b) => b.to_string(),
    }))
}

impl TransformRules {
    /// Rules that copy every header column as text.
    pub fn passthrough(headers: &[String]) -> Self {
        Self {
            null_values: Vec::new(),
            columns: headers.iter().map(|h| ColumnRule::new(h.as_str())).collect(),
        }
    }

    /// The rules to run against a source with these headers.
    pub fn resolve_for(&self, headers: &[String]) -> Self {
        if self.columns.is_empty() {
            Self {
                null_values: self.null_values.clone(),
                ..Self::passthrough(headers)
            }
        } else {
            self.clone()
        }
    }

    /// Check the rule set for mistakes that don't depend on the data.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for rule in &self.columns {
            if rule.name.trim().is_empty() {
                return Err("column name must not be empty".to_string());
            }
            if !seen.insert(rule.name.as_str()) {
                return Err(format!("column '{}' is defined twice", rule.name));
            }
            let origins = [
                rule.source.is_some(),
                rule.sources.is_some(),
                rule.constant.is_some(),
            ];
            if origins.iter().filter(|set| **set).count() > 1 {
                return Err(format!(
                    "column '{}': source, sources and constant are mutually exclusive",
                    rule.name
                ));
            }
            if rule.sources.as_ref().is_some_and(|s| s.is_empty()) {
                return Err(format!("column '{}': sources must not be empty", rule.name));
            }
            for op in &rule.operations {
                op.validate().map_err(|e| format!("column '{}': {}", rule.name, e))?;
            }
            if let Some(default) = &rule.default {
                rule.kind
                    .coerce(default, rule.format.as_deref())
                    .map_err(|e| format!("column '{}': default '{}' is {}", rule.name, default, e))?;
            }
        }
        Ok(())
    }

    /// Get all source columns referenced by the rules
    pub fn source_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self.columns.iter().flat_map(|r| r.get_sources()).collect();
        columns.sort();
        columns.dedup();
        columns
    }

    /// Target column names, in order
    pub fn target_fields(&self) -> Vec<String> {
        self.columns.iter().map(|r| r.name.clone()).collect()
    }

    /// Validate that all referenced source columns exist in the CSV headers
    pub fn validate_headers(&self, headers: &[String]) -> Result<(), Vec<String>> {
        let missing: Vec<String> = self
            .source_columns()
            .into_iter()
            .filter(|col| !headers.iter().any(|h| h == col))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }

    pub fn is_null(&self, value: &str) -> bool {
        value.is_empty() || self.null_values.iter().any(|n| n == value)
    }
}

impl ColumnRule {
    /// A text column read from the CSV column of the same name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: None,
            sources: None,
            concat_separator: default_concat_separator(),
            constant: None,
            operations: Vec::new(),
            default: None,
            required: false,
            kind: ColumnType::Text,
            format: None,
        }
    }

    /// Read from a differently named CSV column
    pub fn from_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    /// Concatenate several CSV columns
    pub fn from_sources(mut self, sources: Vec<String>, separator: &str) -> Self {
        self.sources = Some(sources);
        self.concat_separator = separator.to_string();
        self
    }

    /// Use the same raw value for every row
    pub fn from_constant(mut self, value: &str) -> Self {
        self.constant = Some(value.to_string());
        self
    }

    pub fn typed(mut self, kind: ColumnType) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }

    /// Add an operation to the chain
    pub fn with_operation(mut self, op: Operation) -> Self {
        self.operations.push(op);
        self
    }

    /// Set the default value
    pub fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    /// Mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Get all source columns referenced by this rule
    pub fn get_sources(&self) -> Vec<String> {
        match (&self.source, &self.sources, &self.constant) {
            (Some(s), _, _) => vec![s.clone()],
            (None, Some(ss), _) => ss.clone(),
            (None, None, Some(_)) => Vec::new(),
            (None, None, None) => vec![self.name.clone()],
        }
    }
}
