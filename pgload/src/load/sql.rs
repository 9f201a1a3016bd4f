//! SQL text generation for the PostgreSQL sink.

use crate::config::TargetConfig;
use crate::transform::Schema;

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"`, or `"table"` without a schema.
pub fn qualified_table(target: &TargetConfig) -> String {
    match &target.schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&target.table)),
        None => quote_ident(&target.table),
    }
}

/// Parameterized INSERT for one row of `schema`.
///
/// With conflict columns the statement becomes an upsert that overwrites the
/// non-key columns, or skips the row when every column is part of the key.
pub fn build_insert(schema: &Schema, target: &TargetConfig) -> String {
    let columns: Vec<String> = schema.columns.iter().map(|c| quote_ident(&c.name)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified_table(target),
        columns.join(", "),
        placeholders.join(", ")
    );

    if target.is_upsert() {
        let keys: Vec<String> = target.conflict_columns.iter().map(|k| quote_ident(k)).collect();
        let updates: Vec<String> = schema
            .columns
            .iter()
            .filter(|c| !target.conflict_columns.contains(&c.name))
            .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(&c.name)))
            .collect();

        sql.push_str(&format!(" ON CONFLICT ({})", keys.join(", ")));
        if updates.is_empty() {
            sql.push_str(" DO NOTHING");
        } else {
            sql.push_str(&format!(" DO UPDATE SET {}", updates.join(", ")));
        }
    }

    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{ColumnSpec, ColumnType};

    fn schema(names: &[&str]) -> Schema {
        Schema {
            columns: names
                .iter()
                .map(|n| ColumnSpec { name: n.to_string(), kind: ColumnType::Text })
                .collect(),
        }
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("amount"), "\"amount\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_plain_insert() {
        let sql = build_insert(&schema(&["date", "amount"]), &TargetConfig::new("transactions"));
        assert_eq!(sql, "INSERT INTO \"transactions\" (\"date\", \"amount\") VALUES ($1, $2)");
    }

    #[test]
    fn test_schema_qualified() {
        let mut target = TargetConfig::new("transactions");
        target.schema = Some("finance".to_string());
        let sql = build_insert(&schema(&["id"]), &target);
        assert!(sql.starts_with("INSERT INTO \"finance\".\"transactions\" "));
    }

    #[test]
    fn test_upsert() {
        let mut target = TargetConfig::new("transactions");
        target.conflict_columns = vec!["id".to_string()];
        let sql = build_insert(&schema(&["id", "date", "amount"]), &target);
        assert_eq!(
            sql,
            "INSERT INTO \"transactions\" (\"id\", \"date\", \"amount\") VALUES ($1, $2, $3) \
             ON CONFLICT (\"id\") DO UPDATE SET \"date\" = EXCLUDED.\"date\", \"amount\" = EXCLUDED.\"amount\""
        );
    }

    #[test]
    fn test_upsert_all_keys_does_nothing() {
        let mut target = TargetConfig::new("tags");
        target.conflict_columns = vec!["a".to_string(), "b".to_string()];
        let sql = build_insert(&schema(&["a", "b"]), &target);
        assert!(sql.ends_with("ON CONFLICT (\"a\", \"b\") DO NOTHING"));
    }
}
