use std::ops::Range;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use crate::config::WarehouseConfig;
use crate::warehouse::{quote_ident, SqlValue, Warehouse, WarehouseError, WarehouseTable};

pub type DbPool = PgPool;

/// Establish a Postgres connection pool for the warehouse.
pub async fn connect(
    config: &WarehouseConfig,
    options: PgConnectOptions,
) -> Result<DbPool, WarehouseError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect_with(options)
        .await
        .map_err(WarehouseError::Connection)?;

    info!(
        host = %config.db_host,
        database = %config.db_name,
        "warehouse connection pool established"
    );
    Ok(pool)
}

#[derive(Clone)]
pub struct PostgresWarehouse {
    pool: PgPool,
}

impl PostgresWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn table_exists(&self, table: &str) -> Result<bool, WarehouseError> {
        sqlx::query_scalar::<_, bool>(
            r#"
                SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = current_schema() AND table_name = $1
                )
            "#,
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await
        .map_err(WarehouseError::Query)
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn max_timestamp(
        &self,
        table: &str,
        column: &str,
    ) -> Result<Option<NaiveDateTime>, WarehouseError> {
        if !self.table_exists(table).await? {
            debug!(table, "destination table does not exist yet");
            return Ok(None);
        }

        let sql = format!(
            "SELECT MAX({}) FROM {}",
            quote_ident(column),
            quote_ident(table)
        );
        sqlx::query_scalar::<_, Option<NaiveDateTime>>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(WarehouseError::Query)
    }

    async fn replace(
        &self,
        table: &str,
        data: &WarehouseTable,
        batch_size: usize,
    ) -> Result<u64, WarehouseError> {
        let mut tx = self.pool.begin().await.map_err(WarehouseError::Connection)?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
            .execute(&mut *tx)
            .await
            .map_err(WarehouseError::Write)?;
        sqlx::query(&create_table_sql(table, data, false))
            .execute(&mut *tx)
            .await
            .map_err(WarehouseError::Write)?;

        let written = insert_rows(&mut tx, table, data, batch_size).await?;
        tx.commit().await.map_err(WarehouseError::Write)?;
        Ok(written)
    }

    async fn append(
        &self,
        table: &str,
        data: &WarehouseTable,
        batch_size: usize,
    ) -> Result<u64, WarehouseError> {
        let mut tx = self.pool.begin().await.map_err(WarehouseError::Connection)?;

        sqlx::query(&create_table_sql(table, data, true))
            .execute(&mut *tx)
            .await
            .map_err(WarehouseError::Write)?;

        let written = insert_rows(&mut tx, table, data, batch_size).await?;
        tx.commit().await.map_err(WarehouseError::Write)?;
        Ok(written)
    }
}

pub fn create_table_sql(table: &str, data: &WarehouseTable, if_not_exists: bool) -> String {
    let columns = data
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.sql_type.as_sql()))
        .collect::<Vec<_>>()
        .join(", ");
    let guard = if if_not_exists { "IF NOT EXISTS " } else { "" };
    format!("CREATE TABLE {guard}{} ({columns})", quote_ident(table))
}

/// Splits `rows` into write batches of at most `batch_size` rows, and each
/// batch into INSERT statements of at most `per_statement` rows. Every inner
/// range indexes the full row list.
pub fn statement_plan(
    rows: usize,
    batch_size: usize,
    per_statement: usize,
) -> Vec<Vec<Range<usize>>> {
    let batch_size = batch_size.max(1);
    let per_statement = per_statement.max(1);
    (0..rows)
        .step_by(batch_size)
        .map(|batch_start| {
            let batch_end = (batch_start + batch_size).min(rows);
            (batch_start..batch_end)
                .step_by(per_statement)
                .map(|start| start..(start + per_statement).min(batch_end))
                .collect()
        })
        .collect()
}

async fn insert_rows(
    conn: &mut PgConnection,
    table: &str,
    data: &WarehouseTable,
    batch_size: usize,
) -> Result<u64, WarehouseError> {
    if data.is_empty() || data.columns.is_empty() {
        return Ok(0);
    }

    let column_list = data
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let prefix = format!("INSERT INTO {} ({column_list}) ", quote_ident(table));
    let per_statement = data.rows_per_statement(batch_size);

    let mut written = 0u64;
    let plan = statement_plan(data.len(), batch_size, per_statement);
    for (batch_index, statements) in plan.iter().enumerate() {
        let mut batch_rows = 0usize;
        for range in statements {
            let rows = &data.rows[range.clone()];
            let mut builder = QueryBuilder::<Postgres>::new(prefix.as_str());
            builder.push_values(rows, |mut b, row| {
                for value in row {
                    match value {
                        SqlValue::Timestamp(v) => b.push_bind(*v),
                        SqlValue::Double(v) => b.push_bind(*v),
                        SqlValue::Integer(v) => b.push_bind(*v),
                        SqlValue::BigInt(v) => b.push_bind(*v),
                        SqlValue::Boolean(v) => b.push_bind(*v),
                        SqlValue::Text(v) => b.push_bind(v.clone()),
                    };
                }
            });
            let result = builder
                .build()
                .execute(&mut *conn)
                .await
                .map_err(WarehouseError::Write)?;
            written += result.rows_affected();
            batch_rows += rows.len();
        }
        debug!(table, batch = batch_index + 1, rows = batch_rows, "wrote batch");
    }
    Ok(written)
}
