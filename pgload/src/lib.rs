//! # pgload - CSV to PostgreSQL loader
//!
//! pgload reads a CSV file, cleans and types its columns according to a YAML
//! configuration, and writes the rows into an existing PostgreSQL table using
//! an OAuth token for authentication.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   CSV File  │────▶│   Extract   │────▶│  Transform  │────▶│    Load     │
//! │  (ISO/UTF8) │     │  (auto-enc) │     │ (rules+type)│     │ (PostgreSQL)│
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pgload::{sink_for, Pipeline};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut pipeline = Pipeline::new();
//!     let config = pipeline.load_config("pgload.yaml").unwrap();
//!     let mut sink = sink_for(&config, false);
//!     let report = pipeline.execute(&config, sink.as_mut()).await.unwrap();
//!     println!("{}", report.summary());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types, one per stage
//! - [`config`] - YAML configuration with environment substitution
//! - [`extract`] - CSV reading with encoding and delimiter detection
//! - [`transform`] - Column rules, cleanup operations and type coercion
//! - [`load`] - Row sinks (PostgreSQL, in-memory) and OAuth tokens
//! - [`pipeline`] - The run driver and its report
//! - [`logs`] - Logging setup and progress helpers

// Core modules
pub mod config;
pub mod error;
pub mod logs;

// Stages
pub mod extract;
pub mod load;
pub mod transform;

// Driver
pub mod pipeline;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError,
    ExtractError,
    LoadError,
    PipelineError,
    TransformError,
    TransformErrorKind,
};

// =============================================================================
// Re-exports - Configuration
// =============================================================================

pub use config::{
    Config,
    DatabaseConfig,
    OAuthConfig,
    SourceConfig,
    SourceEncoding,
    TargetConfig,
    TokenSource,
    TokenUsage,
};

// =============================================================================
// Re-exports - Extraction
// =============================================================================

pub use extract::{
    detect_delimiter,
    detect_encoding,
    Extraction,
    Extractor,
    Row,
};

// =============================================================================
// Re-exports - Transformation
// =============================================================================

pub use transform::{
    ColumnRule,
    ColumnType,
    Operation,
    Schema,
    TransformRules,
    TransformedRow,
    Transformer,
    Value,
};

// =============================================================================
// Re-exports - Loading
// =============================================================================

pub use load::{sink_for, BatchOutcome, MemorySink, PgSink, RowSink};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use pipeline::{
    Pipeline,
    PipelineState,
    RowFailure,
    RunReport,
    Stage,
};
