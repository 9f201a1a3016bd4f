//! pgload CLI - Load a CSV file into PostgreSQL
//!
//! ```bash
//! pgload --config pgload.yaml                  # Extract, transform and load
//! pgload --config pgload.yaml --dry-run        # Same, into an in-memory table
//! pgload --config pgload.yaml --log-file etl_log.log --verbose
//! ```
//!
//! Exit status: 0 when every row loaded, 1 on a fatal error, 2 when the run
//! finished but some rows failed.

use clap::Parser;
use pgload::logs::{init_logging, log_error, log_error_indent, log_info};
use pgload::{sink_for, Pipeline};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "pgload")]
#[command(about = "Load a CSV file into a PostgreSQL table", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Run every stage against an in-memory table instead of the database
    #[arg(long)]
    dry_run: bool,

    /// Append logs to this file (overrides logging.file)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut pipeline = Pipeline::new();

    let config = match pipeline.load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            match init_logging(cli.log_file.as_deref(), None, cli.verbose) {
                Ok(_guard) => log_error(e.to_string()),
                Err(_) => eprintln!("Error: {}", e),
            }
            return ExitCode::from(1);
        }
    };

    let log_file = cli.log_file.clone().or_else(|| config.logging.file.clone());
    let _guard = match init_logging(log_file.as_deref(), config.logging.level.as_deref(), cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: cannot set up logging: {}", e);
            return ExitCode::from(1);
        }
    };

    log_info(format!("Loaded config from {}", cli.config.display()));
    if cli.dry_run {
        log_info("Dry run: rows are written to an in-memory table");
    }

    let mut sink = sink_for(&config, cli.dry_run);
    match pipeline.execute(&config, sink.as_mut()).await {
        Ok(report) => {
            if !report.is_success() {
                log_info("Failed rows:");
                for failure in &report.failures {
                    log_error_indent(
                        format!("row {} ({}): {}", failure.row, failure.stage, failure.message),
                        1,
                    );
                }
            }
            println!("{}", report.summary());
            ExitCode::from(report.exit_code())
        }
        Err(e) => {
            log_error(e.to_string());
            ExitCode::from(1)
        }
    }
}
