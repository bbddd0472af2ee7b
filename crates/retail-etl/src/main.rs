use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use retail_etl_core::config::{parse_batch_size, EtlConfig, LoadMode};
use retail_etl_core::pipeline;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Load the retail sales extract into the warehouse", long_about = None)]
struct Cli {
    /// TOML file with warehouse and load settings
    #[arg(long)]
    config: Option<PathBuf>,
    /// Sales CSV to read (default: retailData.csv)
    #[arg(long)]
    input: Option<PathBuf>,
    /// Destination table (default: sales)
    #[arg(long)]
    table: Option<String>,
    /// Load mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    /// Rows per write batch (default: 10000)
    #[arg(long, value_parser = batch_size_arg)]
    batch_size: Option<usize>,
    /// Append-only run log (default: etl.log)
    #[arg(long, conflicts_with = "no_log_file")]
    log_file: Option<PathBuf>,
    /// Do not write a run log file
    #[arg(long)]
    no_log_file: bool,
    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Replace,
    Incremental,
}

impl From<ModeArg> for LoadMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Replace => LoadMode::Replace,
            ModeArg::Incremental => LoadMode::Incremental,
        }
    }
}

fn batch_size_arg(value: &str) -> std::result::Result<usize, String> {
    parse_batch_size(value).map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    let config = resolve_config(&cli)?;
    init_tracing(config.log_file.as_ref(), cli.json)?;

    let summary = pipeline::run(&config).await?;

    if cli.json {
        println!(
            "{}",
            summary
                .to_json_line()
                .context("failed to serialize run summary")?
        );
    }

    if summary.outcome.is_failure() {
        error!(run_id = %summary.run_id, table = %summary.table, "ETL process finished with a failed load");
    } else {
        info!(run_id = %summary.run_id, table = %summary.table, "ETL process completed");
    }
    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<EtlConfig> {
    let mut config =
        EtlConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    if let Some(input) = &cli.input {
        config.input = input.clone();
    }
    if let Some(table) = &cli.table {
        config.table = table.clone();
    }
    if let Some(mode) = cli.mode {
        config.load.mode = mode.into();
    }
    if let Some(batch_size) = cli.batch_size {
        config.load.batch_size = batch_size;
    }
    if cli.no_log_file {
        config.log_file = None;
    } else if let Some(log_file) = &cli.log_file {
        config.log_file = Some(log_file.clone());
    }
    Ok(config)
}

/// With `--json` stdout carries only the run summary, so console logs move to stderr.
fn init_tracing(log_file: Option<&PathBuf>, json_summary: bool) -> Result<()> {
    let console = if json_summary {
        BoxMakeWriter::new(io::stderr)
    } else {
        BoxMakeWriter::new(io::stdout)
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(console))
        .with(file_layer)
        .init();
    Ok(())
}
