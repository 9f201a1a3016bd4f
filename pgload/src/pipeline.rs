//! Pipeline driver.
//!
//! Runs Extract, Transform and Load in sequence over one source file:
//!
//! ```rust,ignore
//! use pgload::load::sink_for;
//! use pgload::pipeline::Pipeline;
//!
//! let mut pipeline = Pipeline::new();
//! let config = pipeline.load_config("pgload.yaml")?;
//! let mut sink = sink_for(&config, false);
//! let report = pipeline.execute(&config, sink.as_mut()).await?;
//! println!("{}", report.summary());
//! ```
//!
//! Rows that fail any stage are recorded in the [`RunReport`] and the run
//! continues. Fatal errors end the run in [`PipelineState::Failed`].

use std::fmt;
use std::path::Path;

use crate::config::Config;
use crate::error::{LoadError, PipelineError, PipelineResult};
use crate::extract::{delimiter_label, Extraction, Extractor};
use crate::load::RowSink;
use crate::logs::{log_info, log_info_indent, log_success, log_warning};
use crate::transform::{TransformedRow, Transformer};

/// Row failures logged individually; the rest are only counted.
const MAX_LOGGED_FAILURES: usize = 10;

/// Rows between progress lines at debug level.
const PROGRESS_INTERVAL: usize = 1000;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    LoadingConfig,
    Extracting,
    TransformingLoading,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    /// The state after moving to `next`, if that move is allowed.
    ///
    /// States are visited strictly in order. `Failed` can be entered from any
    /// non-terminal state; terminal states are never left.
    pub fn advance(self, next: PipelineState) -> Option<PipelineState> {
        use PipelineState::*;
        let allowed = matches!(
            (self, next),
            (Idle, LoadingConfig)
                | (LoadingConfig, Extracting)
                | (Extracting, TransformingLoading)
                | (TransformingLoading, Done)
        ) || (next == Failed && !self.is_terminal());
        allowed.then_some(next)
    }
}

/// Stage a row failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Transform,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Load => "load",
        })
    }
}

/// One row that did not reach the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    /// 1-based source row index.
    pub row: usize,
    pub stage: Stage,
    pub message: String,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Sorted by row.
    pub failures: Vec<RowFailure>,
}

impl RunReport {
    fn record_success(&mut self) {
        self.processed += 1;
        self.succeeded += 1;
    }

    fn record_failure(&mut self, row: usize, stage: Stage, message: String) {
        if self.failures.len() < MAX_LOGGED_FAILURES {
            log_warning(format!("Row {} failed to {}: {}", row, stage, message));
        }
        self.processed += 1;
        self.failed += 1;
        self.failures.push(RowFailure { row, stage, message });
    }

    fn finish(&mut self) {
        self.failures.sort_by_key(|f| f.row);
        debug_assert_eq!(self.processed, self.succeeded + self.failed);
    }

    /// True when every row reached the target.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Process exit code for a completed run: 0, or 2 when rows failed.
    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            2
        }
    }

    /// Final status line.
    pub fn summary(&self) -> String {
        format!(
            "processed {} rows: {} succeeded, {} failed",
            self.processed, self.succeeded, self.failed
        )
    }
}

/// Drives one run through its states.
#[derive(Debug)]
pub struct Pipeline {
    state: PipelineState,
    trace: Vec<PipelineState>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Idle,
            trace: Vec::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// States entered so far, in order.
    pub fn trace(&self) -> &[PipelineState] {
        &self.trace
    }

    fn enter(&mut self, next: PipelineState) {
        let advanced = self.state.advance(next);
        debug_assert!(advanced.is_some(), "invalid transition {:?} -> {:?}", self.state, next);
        if let Some(state) = advanced {
            tracing::debug!("Pipeline state: {:?} -> {:?}", self.state, state);
            self.state = state;
            self.trace.push(state);
        }
    }

    fn fail(&mut self, err: impl Into<PipelineError>) -> PipelineError {
        self.enter(PipelineState::Failed);
        err.into()
    }

    /// Read and resolve the configuration file.
    pub fn load_config(&mut self, path: impl AsRef<Path>) -> PipelineResult<Config> {
        self.enter(PipelineState::LoadingConfig);
        Config::load(path).map_err(|e| self.fail(e))
    }

    /// Run extraction, transformation and loading for `config`.
    ///
    /// The sink is opened only once the source is readable and its header
    /// has every column the rules need, and it is closed on every path after
    /// that.
    pub async fn execute(&mut self, config: &Config, sink: &mut dyn RowSink) -> PipelineResult<RunReport> {
        if self.state == PipelineState::Idle {
            self.enter(PipelineState::LoadingConfig);
        }
        self.enter(PipelineState::Extracting);

        log_info(format!("Reading {}", config.source.path.display()));
        let extraction = Extractor::open(&config.source).map_err(|e| self.fail(e))?;
        log_success(format!(
            "Detected encoding {}, delimiter '{}'",
            extraction.encoding(),
            delimiter_label(extraction.delimiter())
        ));

        let headers = extraction.headers().to_vec();
        log_info(format!("Source has {} columns:", headers.len()));
        for (i, column) in headers.iter().enumerate() {
            log_info_indent(format!("[{:2}] {}", i + 1, column), 1);
        }

        let rules = config.transform.resolve_for(&headers);
        if config.transform.columns.is_empty() {
            log_info("No transform columns configured, loading every column as text");
            rules
                .validate()
                .map_err(|e| self.fail(PipelineError::InvalidHeader(e)))?;
        }
        rules
            .validate_headers(&headers)
            .map_err(|missing| self.fail(PipelineError::MissingColumns(missing)))?;
        let transformer = Transformer::new(rules);

        self.enter(PipelineState::TransformingLoading);

        if let Err(e) = sink.open(transformer.schema()).await {
            if let Err(close_err) = sink.close().await {
                tracing::debug!("Close after failed open also failed: {}", close_err);
            }
            return Err(self.fail(e));
        }

        let mut report = RunReport::default();
        let result = process(extraction, &transformer, sink, config.target.batch_size, &mut report).await;
        let closed = sink.close().await;

        if let Err(e) = result {
            if let Err(close_err) = closed {
                tracing::debug!("Close after failure also failed: {}", close_err);
            }
            return Err(self.fail(e));
        }
        if let Err(e) = closed {
            log_warning(format!("Closing the connection failed: {}", e));
        }

        report.finish();
        if report.failures.len() > MAX_LOGGED_FAILURES {
            log_warning(format!(
                "{} more row failures not shown",
                report.failures.len() - MAX_LOGGED_FAILURES
            ));
        }
        if report.is_success() {
            log_success(report.summary());
        } else {
            log_warning(report.summary());
        }

        self.enter(PipelineState::Done);
        Ok(report)
    }
}

/// Feed every extracted row through the transformer into the sink.
async fn process(
    extraction: Extraction,
    transformer: &Transformer,
    sink: &mut dyn RowSink,
    batch_size: usize,
    report: &mut RunReport,
) -> PipelineResult<()> {
    let mut batch: Vec<TransformedRow> = Vec::with_capacity(batch_size);

    for item in extraction {
        let row = match item {
            Ok(row) => row,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                report.record_failure(e.row().unwrap_or(0), Stage::Extract, e.to_string());
                continue;
            }
        };

        let transformed = match transformer.transform(&row) {
            Ok(t) => t,
            Err(e) => {
                report.record_failure(row.index(), Stage::Transform, e.to_string());
                continue;
            }
        };

        if batch_size <= 1 {
            match sink.write_row(&transformed).await {
                Ok(()) => report.record_success(),
                Err(e) if !e.is_fatal() => record_load_failure(report, e),
                Err(e) => return Err(e.into()),
            }
        } else {
            batch.push(transformed);
            if batch.len() >= batch_size {
                flush(sink, &mut batch, report).await?;
            }
        }

        if report.processed > 0 && report.processed % PROGRESS_INTERVAL == 0 {
            tracing::debug!("{} rows processed", report.processed);
        }
    }

    if !batch.is_empty() {
        flush(sink, &mut batch, report).await?;
    }
    Ok(())
}

async fn flush(
    sink: &mut dyn RowSink,
    batch: &mut Vec<TransformedRow>,
    report: &mut RunReport,
) -> PipelineResult<()> {
    let outcome = sink.write_batch(batch.as_slice()).await?;
    debug_assert_eq!(outcome.len(), batch.len());

    for _ in &outcome.committed {
        report.record_success();
    }
    for e in outcome.rejected {
        record_load_failure(report, e);
    }
    batch.clear();
    Ok(())
}

fn record_load_failure(report: &mut RunReport, e: LoadError) {
    let row = match &e {
        LoadError::Rejected { row, .. } => *row,
        _ => 0,
    };
    report.record_failure(row, Stage::Load, e.to_string());
}
