//! Reads the retail sales CSV extract into a [`DataFrame`].
//!
//! Parsing is lenient: short rows are padded with nulls, unparsable numeric
//! values become null, and the usual NA tokens are treated as missing.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use polars::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

pub const DATE_COLUMN: &str = "date";
pub const PRODUCT_ID_COLUMN: &str = "product_id";
pub const PRICE_COLUMN: &str = "price";
pub const QUANTITY_COLUMN: &str = "quantity";
pub const COUNTRY_COLUMN: &str = "country";

const REQUIRED_COLUMNS: [&str; 4] = [
    DATE_COLUMN,
    PRODUCT_ID_COLUMN,
    PRICE_COLUMN,
    QUANTITY_COLUMN,
];
const NUMERIC_COLUMNS: [&str; 2] = [PRICE_COLUMN, QUANTITY_COLUMN];

const NA_TOKENS: [&str; 19] = [
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("input is missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

pub fn read_sales_file(path: &Path) -> Result<DataFrame, ExtractError> {
    let file = File::open(path).map_err(|source| ExtractError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let df = read_sales_csv(file)?;
    debug!(path = %path.display(), rows = df.height(), "read sales extract");
    Ok(df)
}

pub fn read_sales_csv<R: Read>(reader: R) -> Result<DataFrame, ExtractError> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b',')
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = dedupe_headers(csv_reader.headers()?.iter());
    for required in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == required) {
            return Err(ExtractError::MissingColumn(required));
        }
    }

    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
    let mut oversized_rows = 0usize;

    for (line_index, result) in csv_reader.records().enumerate() {
        let record = result?;
        if record.len() > headers.len() {
            oversized_rows += 1;
            debug!(
                line = line_index + 2,
                fields = record.len(),
                "dropping extra trailing fields"
            );
        }
        for (idx, column) in cells.iter_mut().enumerate() {
            column.push(record.get(idx).and_then(non_missing).map(str::to_string));
        }
    }

    if oversized_rows > 0 {
        warn!(rows = oversized_rows, "rows had more fields than the header");
    }

    let columns = headers
        .iter()
        .zip(cells)
        .map(|(name, values)| build_column(name, values))
        .collect::<Vec<_>>();

    Ok(DataFrame::new(columns)?)
}

fn build_column(name: &str, values: Vec<Option<String>>) -> Column {
    if NUMERIC_COLUMNS.contains(&name) {
        let parsed: Vec<Option<f64>> = values
            .iter()
            .map(|value| value.as_deref().and_then(parse_number))
            .collect();
        Series::new(name.into(), parsed).into()
    } else {
        Series::new(name.into(), values).into()
    }
}

fn non_missing(value: &str) -> Option<&str> {
    if NA_TOKENS.contains(&value) {
        None
    } else {
        Some(value)
    }
}

fn parse_number(value: &str) -> Option<f64> {
    value.parse::<f64>().ok()
}

/// Repeated header names get `.1`, `.2`, ... suffixes so every column is addressable.
fn dedupe_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut counters: HashMap<&str, usize> = HashMap::new();
    let mut headers = Vec::new();
    for name in raw {
        let mut candidate = name.to_string();
        if used.contains(&candidate) {
            let counter = counters.entry(name).or_insert(0);
            loop {
                *counter += 1;
                candidate = format!("{name}.{counter}");
                if !used.contains(&candidate) {
                    break;
                }
            }
        }
        used.insert(candidate.clone());
        headers.push(candidate);
    }
    headers
}
