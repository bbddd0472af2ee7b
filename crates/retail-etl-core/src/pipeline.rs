use std::path::PathBuf;

use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::{EtlConfig, LoadMode};
use crate::error::Result;
use crate::extract::read_sales_file;
use crate::load::{load, LoadOutcome};
use crate::transform::transform;

/// What a single extract → transform → load run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub input: PathBuf,
    pub table: String,
    pub mode: LoadMode,
    pub input_rows: usize,
    pub outcome: LoadOutcome,
}

impl RunSummary {
    /// The summary as a single line of JSON.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub async fn run(config: &EtlConfig) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    let span = info_span!("etl_run", %run_id, table = %config.table);
    run_inner(run_id, config).instrument(span).await
}

async fn run_inner(run_id: Uuid, config: &EtlConfig) -> Result<RunSummary> {
    info!(input = %config.input.display(), mode = config.load.mode.as_str(), "starting ETL run");

    let raw = read_sales_file(&config.input)?;
    preview(&raw);
    let input_rows = raw.height();

    let transformed = transform(raw)?;
    let outcome = load(
        &transformed,
        &config.table,
        &config.warehouse,
        &config.load,
    )
    .await?;

    Ok(RunSummary {
        run_id,
        input: config.input.clone(),
        table: config.table.clone(),
        mode: config.load.mode,
        input_rows,
        outcome,
    })
}

fn preview(df: &DataFrame) {
    let columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    info!(rows = df.height(), columns = ?columns, "loaded input");
    debug!("preview:\n{}", df.head(Some(5)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::LoadFailureKind;

    #[test]
    fn summary_renders_as_one_json_line() -> serde_json::Result<()> {
        let summary = RunSummary {
            run_id: Uuid::nil(),
            input: PathBuf::from("retailData.csv"),
            table: "sales".into(),
            mode: LoadMode::Incremental,
            input_rows: 3,
            outcome: LoadOutcome::Failed {
                kind: LoadFailureKind::Connection,
                message: "connection refused".into(),
            },
        };

        let line = summary.to_json_line()?;
        assert!(!line.contains('\n'));

        let parsed: serde_json::Value = serde_json::from_str(&line)?;
        assert_eq!(parsed["mode"], "incremental");
        assert_eq!(parsed["input_rows"], 3);
        assert_eq!(parsed["outcome"]["status"], "failed");
        Ok(())
    }
}
