//! The `axon` binary: runs pipeline stages over a chunk store.
//!
//! Run with: `cargo run -p axon-app -- run --root ./volume`

use std::path::PathBuf;
use std::process::ExitCode;

use axon_config::{CliArgs, Command, Config};
use axon_pipeline::{Pipeline, PipelineError, RunReport, StageReport};
use clap::Parser;
use tracing::{error, info};

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = args
        .config
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let mut config = match Config::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_dir.display());
            return ExitCode::FAILURE;
        }
    };
    config.apply_cli_overrides(&args);
    if let Err(e) = config.validate() {
        eprintln!("Invalid config: {e}");
        return ExitCode::FAILURE;
    }

    let json_log = axon_log::init_logging(
        args.log_dir.as_deref(),
        config.logging.json_file,
        Some(&config),
    );
    info!(command = ?args.command, root = %config.storage.root.display(), "axon starting");
    if let Some(path) = json_log {
        info!(path = %path.display(), "Writing JSON log");
    }

    match execute(&args.command, config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Pipeline aborted");
            ExitCode::FAILURE
        }
    }
}

/// Runs one command. Returns whether every task succeeded.
fn execute(command: &Command, config: Config) -> Result<bool, PipelineError> {
    let pipeline = Pipeline::new(config)?;
    let ok = match command {
        Command::Close => summarize(&pipeline.close()?),
        Command::Extract => {
            let report = pipeline.extract()?;
            let object_failures: usize = report.successes().map(|e| e.failed.len()).sum();
            summarize(&report) && object_failures == 0
        }
        Command::Assemble { object } => summarize(&pipeline.assemble(*object)?),
        Command::Lod { object } => summarize(&pipeline.generate_lods(*object)?),
        Command::Run => report_run(&pipeline.run()?),
        Command::Catalog => {
            let catalog = pipeline.build_catalog()?;
            info!(objects = catalog.len(), "Catalog written");
            true
        }
    };
    Ok(ok)
}

fn summarize<T>(report: &StageReport<T>) -> bool {
    for (task, e) in report.failures() {
        error!(stage = report.stage, task, error = %e, "Task failed");
    }
    report.is_success()
}

fn report_run(report: &RunReport) -> bool {
    for stage in &report.stages {
        for failure in &stage.failures {
            error!(stage = stage.stage, "{failure}");
        }
    }
    report.is_success()
}
