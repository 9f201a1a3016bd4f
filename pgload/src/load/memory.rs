//! In-memory sink.

use async_trait::async_trait;

use super::{BatchOutcome, RowSink};
use crate::config::TargetConfig;
use crate::error::{LoadError, LoadResult};
use crate::transform::{Schema, TransformedRow, Value};

const UNIQUE_VIOLATION: &str = "23505";
const NOT_NULL_VIOLATION: &str = "23502";
const UNDEFINED_COLUMN: &str = "42703";

/// A table held in memory with the insert/upsert behavior of [`super::PgSink`].
#[derive(Debug, Default)]
pub struct MemorySink {
    keys: Vec<String>,
    upsert: bool,
    not_null: Vec<String>,
    fail_after: Option<usize>,
    schema: Option<Schema>,
    rows: Vec<Vec<Value>>,
    writes: usize,
    opened: bool,
    closed: bool,
}

impl MemorySink {
    /// Plain inserts, no constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Same statement semantics as the PostgreSQL sink for this target.
    pub fn from_target(target: &TargetConfig) -> Self {
        if target.is_upsert() {
            Self::upsert(target.conflict_columns.clone())
        } else {
            Self::new()
        }
    }

    /// Upsert on `keys`.
    pub fn upsert(keys: Vec<String>) -> Self {
        Self { keys, upsert: true, ..Self::default() }
    }

    /// Plain inserts with a unique constraint on `keys`.
    pub fn with_unique(keys: Vec<String>) -> Self {
        Self { keys, ..Self::default() }
    }

    /// Reject NULLs in these columns.
    pub fn with_not_null(mut self, columns: &[&str]) -> Self {
        self.not_null = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Lose the connection after `n` successful writes.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn opened(&self) -> bool {
        self.opened
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All stored values of one column.
    pub fn column(&self, name: &str) -> Vec<&Value> {
        match self.schema.as_ref().and_then(|s| s.position(name)) {
            Some(i) => self.rows.iter().map(|r| &r[i]).collect(),
            None => Vec::new(),
        }
    }

    fn apply(&mut self, row: &TransformedRow) -> LoadResult<()> {
        if !self.opened || self.closed {
            return Err(LoadError::ConnectionLost("sink is not open".to_string()));
        }
        if self.fail_after.is_some_and(|n| self.writes >= n) {
            return Err(LoadError::ConnectionLost("connection reset by peer".to_string()));
        }

        for column in &self.not_null {
            if row.get(column).is_some_and(Value::is_null) {
                return Err(reject(
                    row,
                    NOT_NULL_VIOLATION,
                    format!("null value in column \"{}\" violates not-null constraint", column),
                ));
            }
        }

        let mut key_positions = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            match row.schema().position(key) {
                Some(i) => key_positions.push(i),
                None => {
                    return Err(reject(row, UNDEFINED_COLUMN, format!("column \"{}\" does not exist", key)))
                }
            }
        }

        let values = row.values().to_vec();
        // NULL never equals NULL in a unique index, so a null key always inserts.
        let existing = if key_positions.is_empty() || key_positions.iter().any(|&i| values[i].is_null()) {
            None
        } else {
            self.rows
                .iter()
                .position(|stored| key_positions.iter().all(|&i| stored[i] == values[i]))
        };

        match existing {
            Some(i) if self.upsert => self.rows[i] = values,
            Some(_) => {
                return Err(reject(
                    row,
                    UNIQUE_VIOLATION,
                    "duplicate key value violates unique constraint".to_string(),
                ))
            }
            None => self.rows.push(values),
        }

        self.writes += 1;
        Ok(())
    }
}

fn reject(row: &TransformedRow, code: &str, message: String) -> LoadError {
    LoadError::Rejected {
        row: row.index(),
        code: Some(code.to_string()),
        message,
    }
}

#[async_trait]
impl RowSink for MemorySink {
    async fn open(&mut self, schema: &Schema) -> LoadResult<()> {
        self.schema = Some(schema.clone());
        self.opened = true;
        self.closed = false;
        Ok(())
    }

    async fn write_row(&mut self, row: &TransformedRow) -> LoadResult<()> {
        self.apply(row)
    }

    /// All-or-nothing per batch, except for rejected rows which are skipped.
    async fn write_batch(&mut self, rows: &[TransformedRow]) -> LoadResult<BatchOutcome> {
        let snapshot = self.rows.clone();
        let writes = self.writes;

        let mut outcome = BatchOutcome::default();
        for row in rows {
            match self.apply(row) {
                Ok(()) => outcome.committed.push(row.index()),
                Err(e) if !e.is_fatal() => outcome.rejected.push(e),
                Err(e) => {
                    self.rows = snapshot;
                    self.writes = writes;
                    return Err(e);
                }
            }
        }
        Ok(outcome)
    }

    async fn close(&mut self) -> LoadResult<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{ColumnSpec, ColumnType};
    use std::sync::Arc;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema {
            columns: vec![
                ColumnSpec { name: "id".to_string(), kind: ColumnType::Integer },
                ColumnSpec { name: "label".to_string(), kind: ColumnType::Text },
            ],
        })
    }

    fn row(index: usize, id: i64, label: Option<&str>) -> TransformedRow {
        let label = label.map_or(Value::Null, |l| Value::Text(l.to_string()));
        TransformedRow::new(index, schema(), vec![Value::Integer(id), label])
    }

    #[tokio::test]
    async fn test_insert_requires_open() {
        let mut sink = MemorySink::new();
        let err = sink.write_row(&row(1, 1, Some("a"))).await.unwrap_err();
        assert!(err.is_fatal());

        sink.open(&schema()).await.unwrap();
        sink.write_row(&row(1, 1, Some("a"))).await.unwrap();
        sink.write_row(&row(2, 1, Some("a"))).await.unwrap();
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn test_unique_violation() {
        let mut sink = MemorySink::with_unique(vec!["id".to_string()]);
        sink.open(&schema()).await.unwrap();
        sink.write_row(&row(1, 7, Some("a"))).await.unwrap();
        match sink.write_row(&row(2, 7, Some("b"))).await {
            Err(LoadError::Rejected { row, code, .. }) => {
                assert_eq!(row, 2);
                assert_eq!(code.as_deref(), Some(UNIQUE_VIOLATION));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let mut sink = MemorySink::upsert(vec!["id".to_string()]);
        sink.open(&schema()).await.unwrap();
        sink.write_row(&row(1, 7, Some("old"))).await.unwrap();
        sink.write_row(&row(2, 7, Some("new"))).await.unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.column("label"), vec![&Value::Text("new".to_string())]);
    }

    #[tokio::test]
    async fn test_not_null() {
        let mut sink = MemorySink::new().with_not_null(&["label"]);
        sink.open(&schema()).await.unwrap();
        let err = sink.write_row(&row(3, 1, None)).await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("[23502]"));
    }

    #[tokio::test]
    async fn test_batch_skips_rejected_rows() {
        let mut sink = MemorySink::with_unique(vec!["id".to_string()]);
        sink.open(&schema()).await.unwrap();
        let batch = vec![row(1, 1, Some("a")), row(2, 1, Some("dup")), row(3, 2, Some("b"))];
        let outcome = sink.write_batch(&batch).await.unwrap();
        assert_eq!(outcome.committed, vec![1, 3]);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.len(), 3);
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn test_null_keys_never_conflict() {
        let keys = vec!["label".to_string()];

        let mut sink = MemorySink::with_unique(keys.clone());
        sink.open(&schema()).await.unwrap();
        sink.write_row(&row(1, 1, None)).await.unwrap();
        sink.write_row(&row(2, 2, None)).await.unwrap();
        assert_eq!(sink.len(), 2);

        let mut sink = MemorySink::upsert(keys);
        sink.open(&schema()).await.unwrap();
        sink.write_row(&row(1, 1, None)).await.unwrap();
        sink.write_row(&row(2, 2, None)).await.unwrap();
        sink.write_row(&row(3, 3, Some("a"))).await.unwrap();
        sink.write_row(&row(4, 4, Some("a"))).await.unwrap();
        assert_eq!(sink.len(), 3);
        assert_eq!(sink.column("id"), vec![&Value::Integer(1), &Value::Integer(2), &Value::Integer(4)]);
    }

    #[tokio::test]
    async fn test_batch_rolls_back_on_connection_loss() {
        let mut sink = MemorySink::new().fail_after(3);
        sink.open(&schema()).await.unwrap();
        sink.write_batch(&[row(1, 1, Some("a")), row(2, 2, Some("b"))]).await.unwrap();

        let err = sink
            .write_batch(&[row(3, 3, Some("c")), row(4, 4, Some("d"))])
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::ConnectionLost(_)));
        assert_eq!(sink.len(), 2);

        sink.close().await.unwrap();
        assert!(sink.is_closed());
    }
}
