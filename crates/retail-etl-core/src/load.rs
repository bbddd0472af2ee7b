use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{ConfigError, LoadMode, LoadOptions, WarehouseConfig};
use crate::db::{self, PostgresWarehouse};
use crate::extract::DATE_COLUMN;
use crate::warehouse::{
    physical_from_naive, LoadFailureKind, Warehouse, WarehouseError, WarehouseTable,
};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to load table '{table}': {source}")]
    Warehouse {
        table: String,
        #[source]
        source: WarehouseError,
    },

    #[error("failed to prepare rows for loading: {0}")]
    Prepare(#[from] PolarsError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadOutcome {
    Replaced {
        rows: u64,
    },
    Appended {
        rows: u64,
        skipped: usize,
        watermark: Option<NaiveDateTime>,
    },
    /// An incremental load that failed and left the table untouched.
    Failed {
        kind: LoadFailureKind,
        message: String,
    },
}

impl LoadOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, LoadOutcome::Failed { .. })
    }
}

/// Connects to the configured warehouse and loads `df` into `table`.
///
/// In incremental mode, warehouse failures (including failing to connect) are
/// reported as [`LoadOutcome::Failed`] instead of an error.
pub async fn load(
    df: &DataFrame,
    table: &str,
    config: &WarehouseConfig,
    options: &LoadOptions,
) -> Result<LoadOutcome, LoadError> {
    let connect_options = config.connect_options()?;
    let pool = match db::connect(config, connect_options).await {
        Ok(pool) => pool,
        Err(err) => return settle(options.mode, table, err),
    };
    let warehouse = PostgresWarehouse::new(pool);
    let outcome = load_into(&warehouse, df, table, options).await;
    warehouse.pool().close().await;
    outcome
}

/// Loads `df` into `table` through any [`Warehouse`].
pub async fn load_into<W>(
    warehouse: &W,
    df: &DataFrame,
    table: &str,
    options: &LoadOptions,
) -> Result<LoadOutcome, LoadError>
where
    W: Warehouse + ?Sized,
{
    match options.mode {
        LoadMode::Replace => {
            let data = WarehouseTable::from_dataframe(df)?;
            let rows = warehouse
                .replace(table, &data, options.batch_size)
                .await
                .map_err(|source| LoadError::Warehouse {
                    table: table.to_string(),
                    source,
                })?;
            info!(table, rows, mode = "replace", "data loaded");
            Ok(LoadOutcome::Replaced { rows })
        }
        LoadMode::Incremental => {
            let watermark = match warehouse.max_timestamp(table, DATE_COLUMN).await {
                Ok(watermark) => watermark,
                Err(err) => return settle(options.mode, table, err),
            };

            let fresh = rows_after(df, watermark)?;
            let skipped = df.height() - fresh.height();
            if fresh.height() == 0 {
                info!(table, skipped, watermark = ?watermark, "no new rows to load");
                return Ok(LoadOutcome::Appended {
                    rows: 0,
                    skipped,
                    watermark,
                });
            }

            let data = WarehouseTable::from_dataframe(&fresh)?;
            match warehouse.append(table, &data, options.batch_size).await {
                Ok(rows) => {
                    info!(
                        table,
                        rows,
                        skipped,
                        watermark = ?watermark,
                        mode = "incremental",
                        "data loaded"
                    );
                    Ok(LoadOutcome::Appended {
                        rows,
                        skipped,
                        watermark,
                    })
                }
                Err(err) => settle(options.mode, table, err),
            }
        }
    }
}

/// Rows whose `date` is strictly after `watermark`. With no watermark every
/// row is kept, including rows with a null date.
pub fn rows_after(df: &DataFrame, watermark: Option<NaiveDateTime>) -> PolarsResult<DataFrame> {
    let Some(watermark) = watermark else {
        return Ok(df.clone());
    };

    let column = df.column(DATE_COLUMN)?;
    let unit = match column.dtype() {
        DataType::Datetime(unit, _) => *unit,
        other => {
            return Err(PolarsError::SchemaMismatch(
                format!("column '{DATE_COLUMN}' must be a datetime, found {other}").into(),
            ))
        }
    };
    let Some(threshold) = physical_from_naive(watermark, unit) else {
        warn!(watermark = %watermark, "watermark outside representable range; keeping no rows");
        return Ok(df.clear());
    };

    let physical = column.cast(&DataType::Int64)?;
    let mask: BooleanChunked = physical
        .i64()?
        .into_iter()
        .map(|value| Some(value.is_some_and(|v| v > threshold)))
        .collect();
    df.filter(&mask)
}

/// Maps a warehouse failure to the mode's policy: incremental loads report it
/// as an outcome, replace loads propagate it.
fn settle(mode: LoadMode, table: &str, err: WarehouseError) -> Result<LoadOutcome, LoadError> {
    match mode {
        LoadMode::Incremental => {
            let kind = err.kind();
            error!(
                table,
                kind = kind.as_str(),
                error = %err,
                "incremental load failed; destination left unchanged"
            );
            Ok(LoadOutcome::Failed {
                kind,
                message: err.to_string(),
            })
        }
        LoadMode::Replace => Err(LoadError::Warehouse {
            table: table.to_string(),
            source: err,
        }),
    }
}
