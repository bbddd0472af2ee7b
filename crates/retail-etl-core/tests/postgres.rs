use std::env;

use anyhow::Result;
use chrono::NaiveDate;
use retail_etl_core::config::{LoadMode, LoadOptions, WarehouseConfig};
use retail_etl_core::extract::read_sales_csv;
use retail_etl_core::load::{load, LoadOutcome};
use retail_etl_core::transform::transform;

const TABLE: &str = "sales_it";

fn test_config() -> Option<WarehouseConfig> {
    match env::var("RETAIL_ETL_TEST_DATABASE_URL") {
        Ok(url) => Some(WarehouseConfig {
            database_url: Some(url),
            ..WarehouseConfig::default()
        }),
        Err(_) => {
            eprintln!("Skipping postgres test because RETAIL_ETL_TEST_DATABASE_URL is not set");
            None
        }
    }
}

#[tokio::test]
async fn replace_then_incremental_round_trip() -> Result<()> {
    let Some(config) = test_config() else {
        return Ok(());
    };

    let first = transform(read_sales_csv(
        "date,product_id,price,quantity,country\n\
         2023-04-01,P1,20,5,USA\n\
         2023-04-30,P2,,2,UK\n"
            .as_bytes(),
    )?)?;
    let replace = LoadOptions {
        mode: LoadMode::Replace,
        batch_size: 1,
    };
    assert_eq!(
        load(&first, TABLE, &config, &replace).await?,
        LoadOutcome::Replaced { rows: 2 }
    );

    let second = transform(read_sales_csv(
        "date,product_id,price,quantity,country\n\
         2023-04-01,P1,20,5,USA\n\
         2023-05-01,P1,,,Japan\n"
            .as_bytes(),
    )?)?;
    let incremental = LoadOptions {
        mode: LoadMode::Incremental,
        batch_size: 10_000,
    };
    let watermark = NaiveDate::from_ymd_opt(2023, 4, 30)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    assert_eq!(
        load(&second, TABLE, &config, &incremental).await?,
        LoadOutcome::Appended {
            rows: 1,
            skipped: 1,
            watermark: Some(watermark),
        }
    );

    let pool = sqlx::PgPool::connect(config.database_url.as_deref().unwrap()).await?;
    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM \"{TABLE}\""))
        .fetch_one(&pool)
        .await?;
    assert_eq!(count, 3);

    let (code, year): (String, i32) = sqlx::query_as(&format!(
        "SELECT country_code, sale_year FROM \"{TABLE}\" WHERE \"date\" = '2023-05-01'"
    ))
    .fetch_one(&pool)
    .await?;
    assert_eq!(code, "JP");
    assert_eq!(year, 2023);

    sqlx::query(&format!("DROP TABLE \"{TABLE}\""))
        .execute(&pool)
        .await?;
    Ok(())
}
