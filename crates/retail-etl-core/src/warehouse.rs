//! The seam between the loader and the destination database.
//!
//! [`WarehouseTable`] is a DataFrame flattened into SQL-typed columns and rows
//! so that any [`Warehouse`] implementation can write it without knowing
//! about polars.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;
use serde::Serialize;
use thiserror::Error;

/// Postgres accepts at most this many bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadFailureKind {
    Connection,
    Query,
    Write,
}

impl LoadFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadFailureKind::Connection => "connection",
            LoadFailureKind::Query => "query",
            LoadFailureKind::Write => "write",
        }
    }
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("failed to connect to warehouse: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("warehouse query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("warehouse write failed: {0}")]
    Write(#[source] sqlx::Error),
}

impl WarehouseError {
    pub fn kind(&self) -> LoadFailureKind {
        match self {
            WarehouseError::Connection(_) => LoadFailureKind::Connection,
            WarehouseError::Query(_) => LoadFailureKind::Query,
            WarehouseError::Write(_) => LoadFailureKind::Write,
        }
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Largest value of `column` in `table`, or `None` when the table is
    /// missing, empty, or the column holds only nulls.
    async fn max_timestamp(
        &self,
        table: &str,
        column: &str,
    ) -> Result<Option<NaiveDateTime>, WarehouseError>;

    /// Drops and recreates `table` from `data`. Returns the number of rows written.
    async fn replace(
        &self,
        table: &str,
        data: &WarehouseTable,
        batch_size: usize,
    ) -> Result<u64, WarehouseError>;

    /// Appends `data` to `table`, creating it if needed. Either every row is
    /// written or none are.
    async fn append(
        &self,
        table: &str,
        data: &WarehouseTable,
        batch_size: usize,
    ) -> Result<u64, WarehouseError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Timestamp,
    Double,
    Integer,
    BigInt,
    Boolean,
    Text,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Timestamp(Option<NaiveDateTime>),
    Double(Option<f64>),
    Integer(Option<i32>),
    BigInt(Option<i64>),
    Boolean(Option<bool>),
    Text(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: SqlType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseTable {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl WarehouseTable {
    pub fn from_dataframe(df: &DataFrame) -> PolarsResult<Self> {
        let height = df.height();
        let mut columns = Vec::with_capacity(df.width());
        let mut rows: Vec<Vec<SqlValue>> = (0..height)
            .map(|_| Vec::with_capacity(df.width()))
            .collect();

        for column in df.get_columns() {
            let (sql_type, values) = column_values(column)?;
            columns.push(ColumnSpec {
                name: column.name().to_string(),
                sql_type,
            });
            for (row, value) in rows.iter_mut().zip(values) {
                row.push(value);
            }
        }

        Ok(Self { columns, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the column called `name`, if any.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Rows per INSERT statement so a statement stays under [`MAX_BIND_PARAMS`].
    pub fn rows_per_statement(&self, batch_size: usize) -> usize {
        let width = self.columns.len().max(1);
        (MAX_BIND_PARAMS / width).clamp(1, batch_size.max(1))
    }
}

fn column_values(column: &Column) -> PolarsResult<(SqlType, Vec<SqlValue>)> {
    let typed: (SqlType, Vec<SqlValue>) = match column.dtype() {
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            let physical = column.cast(&DataType::Int64)?;
            let values = physical
                .i64()?
                .into_iter()
                .map(|v| SqlValue::Timestamp(v.and_then(|v| naive_from_physical(v, unit))))
                .collect();
            (SqlType::Timestamp, values)
        }
        DataType::Float32 | DataType::Float64 => {
            let cast = column.cast(&DataType::Float64)?;
            let values = cast.f64()?.into_iter().map(SqlValue::Double).collect();
            (SqlType::Double, values)
        }
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::UInt8 | DataType::UInt16 => {
            let cast = column.cast(&DataType::Int32)?;
            let values = cast.i32()?.into_iter().map(SqlValue::Integer).collect();
            (SqlType::Integer, values)
        }
        DataType::Int64 | DataType::UInt32 | DataType::UInt64 => {
            // u64 values past i64::MAX fail here instead of becoming NULL.
            let cast = column.strict_cast(&DataType::Int64)?;
            let values = cast.i64()?.into_iter().map(SqlValue::BigInt).collect();
            (SqlType::BigInt, values)
        }
        DataType::Boolean => {
            let values = column.bool()?.into_iter().map(SqlValue::Boolean).collect();
            (SqlType::Boolean, values)
        }
        _ => {
            let cast = column.cast(&DataType::String)?;
            let values = cast
                .str()?
                .into_iter()
                .map(|v| SqlValue::Text(v.map(str::to_string)))
                .collect();
            (SqlType::Text, values)
        }
    };
    Ok(typed)
}

pub fn naive_from_physical(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let dt = match unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(value)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value),
    };
    dt.map(|dt| dt.naive_utc())
}

pub fn physical_from_naive(value: NaiveDateTime, unit: TimeUnit) -> Option<i64> {
    let utc = value.and_utc();
    match unit {
        TimeUnit::Nanoseconds => utc.timestamp_nanos_opt(),
        TimeUnit::Microseconds => Some(utc.timestamp_micros()),
        TimeUnit::Milliseconds => Some(utc.timestamp_millis()),
    }
}

/// Quotes a SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_ident("sales"), "\"sales\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn statement_size_respects_bind_limit() {
        let table = WarehouseTable {
            columns: (0..7)
                .map(|i| ColumnSpec {
                    name: format!("c{i}"),
                    sql_type: SqlType::Text,
                })
                .collect(),
            rows: Vec::new(),
        };
        assert_eq!(table.rows_per_statement(10_000), 9_362);
        assert_eq!(table.rows_per_statement(100), 100);
        assert_eq!(table.rows_per_statement(0), 1);
    }

    #[test]
    fn converts_dataframe_columns_to_sql_types() -> PolarsResult<()> {
        let df = df![
            "product_id" => [Some("P1"), None],
            "price" => [Some(1.5f64), None],
            "sale_year" => [Some(2023i32), None],
            "flag" => [true, false],
        ]?;

        let table = WarehouseTable::from_dataframe(&df)?;
        let types: Vec<SqlType> = table.columns.iter().map(|c| c.sql_type).collect();
        assert_eq!(
            types,
            vec![SqlType::Text, SqlType::Double, SqlType::Integer, SqlType::Boolean]
        );
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.rows[1],
            vec![
                SqlValue::Text(None),
                SqlValue::Double(None),
                SqlValue::Integer(None),
                SqlValue::Boolean(Some(false)),
            ]
        );
        Ok(())
    }

    #[test]
    fn unsigned_columns_that_overflow_bigint_are_rejected() -> PolarsResult<()> {
        let fits = df!["units" => [1u64, 42]]?;
        let table = WarehouseTable::from_dataframe(&fits)?;
        assert_eq!(table.columns[0].sql_type, SqlType::BigInt);
        assert_eq!(table.rows[1], vec![SqlValue::BigInt(Some(42))]);

        let overflow = df!["units" => [1u64, u64::MAX]]?;
        assert!(WarehouseTable::from_dataframe(&overflow).is_err());
        Ok(())
    }
}
