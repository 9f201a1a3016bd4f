//! Load stage: writing transformed rows to a target.
//!
//! [`RowSink`] is the seam between the pipeline and a database.
//! [`PgSink`] writes to PostgreSQL; [`MemorySink`] keeps rows in memory and
//! backs `--dry-run` and the tests.

pub mod memory;
pub mod oauth;
pub mod postgres;
pub mod sql;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{LoadError, LoadResult};
use crate::transform::{Schema, TransformedRow};

pub use memory::MemorySink;
pub use postgres::PgSink;

/// Result of writing one batch.
///
/// Every row of the batch appears exactly once, either in `committed` (by
/// source row index) or in `rejected`.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub committed: Vec<usize>,
    pub rejected: Vec<LoadError>,
}

impl BatchOutcome {
    pub fn len(&self) -> usize {
        self.committed.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Destination for transformed rows.
///
/// `Err` from any method is fatal unless it is [`LoadError::Rejected`], which
/// only fails the row it names.
#[async_trait]
pub trait RowSink: Send {
    /// Connect and prepare for rows of `schema`.
    async fn open(&mut self, schema: &Schema) -> LoadResult<()>;

    /// Write and commit a single row.
    async fn write_row(&mut self, row: &TransformedRow) -> LoadResult<()>;

    /// Write a group of rows.
    ///
    /// The default writes them one by one, each committed on its own.
    async fn write_batch(&mut self, rows: &[TransformedRow]) -> LoadResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for row in rows {
            match self.write_row(row).await {
                Ok(()) => outcome.committed.push(row.index()),
                Err(e) if !e.is_fatal() => outcome.rejected.push(e),
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    /// Release the connection. Safe to call more than once.
    async fn close(&mut self) -> LoadResult<()>;
}

/// The sink for a run: PostgreSQL, or an in-memory table for a dry run.
pub fn sink_for(config: &Config, dry_run: bool) -> Box<dyn RowSink> {
    if dry_run {
        Box::new(MemorySink::from_target(&config.target))
    } else {
        Box::new(PgSink::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{ColumnSpec, ColumnType, Value};
    use std::sync::Arc;

    /// Rejects even row indices, one write at a time.
    struct EvenRejecting;

    #[async_trait]
    impl RowSink for EvenRejecting {
        async fn open(&mut self, _schema: &Schema) -> LoadResult<()> {
            Ok(())
        }

        async fn write_row(&mut self, row: &TransformedRow) -> LoadResult<()> {
            if row.index() % 2 == 0 {
                return Err(LoadError::Rejected { row: row.index(), code: None, message: "even".into() });
            }
            Ok(())
        }

        async fn close(&mut self) -> LoadResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_batch_writes_row_by_row() {
        let schema = Arc::new(Schema {
            columns: vec![ColumnSpec { name: "n".to_string(), kind: ColumnType::Integer }],
        });
        let rows: Vec<TransformedRow> = (1..=5)
            .map(|i| TransformedRow::new(i, Arc::clone(&schema), vec![Value::Integer(i as i64)]))
            .collect();

        let outcome = EvenRejecting.write_batch(&rows).await.unwrap();
        assert_eq!(outcome.committed, vec![1, 3, 5]);
        assert_eq!(outcome.rejected.len(), 2);
    }
}
