//! Rule executor
//!
//! Applies a [`TransformRules`] set to extracted rows, one row at a time.

use std::sync::Arc;

use super::rules::{ColumnRule, TransformRules};
use super::value::{ColumnType, Value};
use crate::error::TransformError;
use crate::extract::Row;

/// A target column: name and declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnType,
}

/// Ordered target columns shared by every transformed row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    pub columns: Vec<ColumnSpec>,
}

impl Schema {
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// One source row after cleanup and coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedRow {
    index: usize,
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl TransformedRow {
    pub fn new(index: usize, schema: Arc<Schema>, values: Vec<Value>) -> Self {
        debug_assert_eq!(schema.len(), values.len());
        Self { index, schema, values }
    }

    /// 1-based index of the source row.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.schema.position(column).map(|i| &self.values[i])
    }

    /// Columns paired with their values, in target order.
    pub fn iter(&self) -> impl Iterator<Item = (&ColumnSpec, &Value)> {
        self.schema.columns.iter().zip(self.values.iter())
    }
}

/// Applies a rule set to rows.
pub struct Transformer {
    rules: TransformRules,
    schema: Arc<Schema>,
}

impl Transformer {
    pub fn new(rules: TransformRules) -> Self {
        let schema = Schema {
            columns: rules
                .columns
                .iter()
                .map(|r| ColumnSpec { name: r.name.clone(), kind: r.kind })
                .collect(),
        };
        Self { rules, schema: Arc::new(schema) }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn rules(&self) -> &TransformRules {
        &self.rules
    }

    /// Transform one row. The first failing column fails the whole row.
    pub fn transform(&self, row: &Row) -> Result<TransformedRow, TransformError> {
        let values = self
            .rules
            .columns
            .iter()
            .map(|rule| self.transform_column(row, rule))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TransformedRow::new(row.index(), Arc::clone(&self.schema), values))
    }

    fn transform_column(&self, row: &Row, rule: &ColumnRule) -> Result<Value, TransformError> {
        let cleaned = source_value(row, rule).map(|raw| {
            rule.operations.iter().fold(raw, |v, op| op.apply(&v))
        });

        let text = match cleaned {
            Some(v) if !self.rules.is_null(&v) => v,
            _ => match &rule.default {
                Some(default) => default.clone(),
                None if rule.required => return Err(TransformError::missing(row.index(), &rule.name)),
                None => return Ok(Value::Null),
            },
        };

        rule.kind
            .coerce(&text, rule.format.as_deref())
            .map_err(|msg| TransformError::coercion(row.index(), &rule.name, text, msg))
    }
}

/// Get the raw value for a rule: source column, joined sources, or constant.
fn source_value(row: &Row, rule: &ColumnRule) -> Option<String> {
    if let Some(sources) = &rule.sources {
        let parts: Vec<&str> = sources
            .iter()
            .filter_map(|s| row.get(s))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        return if parts.is_empty() {
            None
        } else {
            Some(parts.join(&rule.concat_separator))
        };
    }

    if let Some(constant) = &rule.constant {
        return Some(constant.clone());
    }

    let column = rule.source.as_deref().unwrap_or(&rule.name);
    row.get(column).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::operations::Operation;
    use chrono::NaiveDate;

    fn row(index: usize, pairs: &[(&str, &str)]) -> Row {
        let headers: Arc<[String]> = pairs.iter().map(|(k, _)| k.to_string()).collect();
        Row::new(index, headers, pairs.iter().map(|(_, v)| v.to_string()).collect())
    }

    fn transaction_rules() -> TransformRules {
        TransformRules {
            null_values: vec!["NA".to_string()],
            columns: vec![
                ColumnRule::new("id").typed(ColumnType::Integer).required(),
                ColumnRule::new("date").typed(ColumnType::Date),
                ColumnRule::new("amount")
                    .from_source("Amount")
                    .typed(ColumnType::Float)
                    .with_operation(Operation::Trim)
                    .with_operation(Operation::replace("[$,]", "")),
                ColumnRule::new("note").with_operation(Operation::Trim),
            ],
        }
    }

    #[test]
    fn test_transform_simple() {
        let transformer = Transformer::new(transaction_rules());
        let out = transformer
            .transform(&row(1, &[("id", "7"), ("date", "2024-01-31"), ("Amount", " $1,250.75 "), ("note", "  rent ")]))
            .unwrap();

        assert_eq!(out.index(), 1);
        assert_eq!(out.get("id"), Some(&Value::Integer(7)));
        assert_eq!(out.get("date"), Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())));
        assert_eq!(out.get("amount"), Some(&Value::Float(1250.75)));
        assert_eq!(out.get("note"), Some(&Value::Text("rent".to_string())));
    }

    #[test]
    fn test_coercion_failure_carries_row() {
        let transformer = Transformer::new(transaction_rules());
        let err = transformer
            .transform(&row(4, &[("id", "7"), ("date", "2024-01-31"), ("Amount", "twelve"), ("note", "")]))
            .unwrap_err();

        assert_eq!(err.row, 4);
        assert_eq!(err.column, "amount");
        assert_eq!(err.value.as_deref(), Some("twelve"));
    }

    #[test]
    fn test_missing_required_field() {
        let transformer = Transformer::new(transaction_rules());
        let err = transformer
            .transform(&row(2, &[("id", "NA"), ("date", ""), ("Amount", "1"), ("note", "")]))
            .unwrap_err();
        assert_eq!(err.column, "id");
        assert_eq!(err.kind, crate::error::TransformErrorKind::MissingValue);
    }

    #[test]
    fn test_optional_empty_is_null() {
        let transformer = Transformer::new(transaction_rules());
        let out = transformer
            .transform(&row(3, &[("id", "1"), ("date", ""), ("Amount", "NA"), ("note", "   ")]))
            .unwrap();
        assert!(out.get("date").unwrap().is_null());
        assert!(out.get("amount").unwrap().is_null());
        assert!(out.get("note").unwrap().is_null());
    }

    #[test]
    fn test_default_value() {
        let rules = TransformRules {
            null_values: Vec::new(),
            columns: vec![ColumnRule::new("active")
                .from_source("Missing Column")
                .typed(ColumnType::Boolean)
                .with_default("false")],
        };
        let out = Transformer::new(rules).transform(&row(1, &[("other", "x")])).unwrap();
        assert_eq!(out.get("active"), Some(&Value::Boolean(false)));
    }

    #[test]
    fn test_constant_value() {
        let rules = TransformRules {
            null_values: Vec::new(),
            columns: vec![ColumnRule::new("currency").from_constant("EUR")],
        };
        let out = Transformer::new(rules).transform(&row(1, &[("any", "value")])).unwrap();
        assert_eq!(out.get("currency"), Some(&Value::Text("EUR".to_string())));
    }

    #[test]
    fn test_multiple_sources_skip_empty() {
        let rules = TransformRules {
            null_values: Vec::new(),
            columns: vec![ColumnRule::new("name")
                .from_sources(vec!["first".to_string(), "middle".to_string(), "last".to_string()], " ")],
        };
        let out = Transformer::new(rules)
            .transform(&row(1, &[("first", "Ada"), ("middle", " "), ("last", "Lovelace")]))
            .unwrap();
        assert_eq!(out.get("name"), Some(&Value::Text("Ada Lovelace".to_string())));
    }

    #[test]
    fn test_text_round_trip() {
        let headers = ["id", "date", "amount", "label"];
        let raw = ["12", "2024-02-29", "19.99", "Groceries, weekly"];
        let rules = TransformRules {
            null_values: Vec::new(),
            columns: vec![
                ColumnRule::new("id").typed(ColumnType::Integer),
                ColumnRule::new("date").typed(ColumnType::Date),
                ColumnRule::new("amount").typed(ColumnType::Float),
                ColumnRule::new("label"),
            ],
        };
        let pairs: Vec<(&str, &str)> = headers.iter().copied().zip(raw.iter().copied()).collect();
        let out = Transformer::new(rules).transform(&row(1, &pairs)).unwrap();

        let rendered: Vec<String> = out.values().iter().filter_map(|v| v.render(None)).collect();
        assert_eq!(rendered, raw);
    }
}
