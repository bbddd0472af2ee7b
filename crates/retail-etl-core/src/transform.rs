use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use tracing::info;

use crate::extract::{
    COUNTRY_COLUMN, DATE_COLUMN, PRICE_COLUMN, PRODUCT_ID_COLUMN, QUANTITY_COLUMN,
};

pub const SALE_YEAR_COLUMN: &str = "sale_year";
pub const COUNTRY_CODE_COLUMN: &str = "country_code";
pub const UNKNOWN_COUNTRY: &str = "Unknown";

const COUNTRY_CODES: [(&str, &str); 3] = [("USA", "US"), ("UK", "GB"), ("Japan", "JP")];

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

pub fn datetime_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Microseconds, None)
}

/// Cleans the sales table: coerces `date`, imputes `price` and `quantity`,
/// and derives `sale_year` and `country_code`.
///
/// Malformed values never fail the transform; they degrade to null.
pub fn transform(mut df: DataFrame) -> PolarsResult<DataFrame> {
    let (dates, unparsable_dates) = parse_date_column(&df)?;
    df.with_column(dates)?;

    let price = df.column(PRICE_COLUMN)?.cast(&DataType::Float64)?;
    df.with_column(price)?;
    let missing_prices = df.column(PRICE_COLUMN)?.null_count();

    let mut df = df
        .lazy()
        .with_columns([
            when(col(PRODUCT_ID_COLUMN).is_null())
                .then(col(PRICE_COLUMN))
                .otherwise(
                    col(PRICE_COLUMN)
                        .fill_null(col(PRICE_COLUMN).median().over([col(PRODUCT_ID_COLUMN)])),
                )
                .alias(PRICE_COLUMN),
            col(QUANTITY_COLUMN)
                .cast(DataType::Float64)
                .fill_null(lit(0.0))
                .alias(QUANTITY_COLUMN),
        ])
        .collect()?;

    let imputed_prices = missing_prices.saturating_sub(df.column(PRICE_COLUMN)?.null_count());

    let years = sale_years(&df)?;
    df.with_column(years)?;

    let (codes, unknown_countries) = country_codes(&df)?;
    df.with_column(codes)?;

    info!(
        rows = df.height(),
        unparsable_dates,
        imputed_prices,
        unknown_countries,
        "data transformation complete"
    );
    Ok(df)
}

/// Parses one raw `date` cell. Returns `None` for anything unrecognised.
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

pub fn country_code(country: Option<&str>) -> &'static str {
    country
        .and_then(|name| {
            COUNTRY_CODES
                .iter()
                .find(|(known, _)| *known == name)
                .map(|(_, code)| *code)
        })
        .unwrap_or(UNKNOWN_COUNTRY)
}

/// Returns the coerced `date` column and how many non-null inputs failed to parse.
fn parse_date_column(df: &DataFrame) -> PolarsResult<(Series, usize)> {
    let column = df.column(DATE_COLUMN)?;
    if matches!(column.dtype(), DataType::Datetime(_, _)) {
        let coerced = column
            .as_materialized_series()
            .cast(&datetime_dtype())?;
        return Ok((coerced, 0));
    }

    let text = column.cast(&DataType::String)?;
    let text = text.str()?;
    let mut unparsable = 0usize;
    let micros: Vec<Option<i64>> = text
        .into_iter()
        .map(|value| {
            let parsed = value.and_then(parse_date);
            if value.is_some() && parsed.is_none() {
                unparsable += 1;
            }
            parsed.map(|dt| dt.and_utc().timestamp_micros())
        })
        .collect();

    let series = Series::new(DATE_COLUMN.into(), micros).cast(&datetime_dtype())?;
    Ok((series, unparsable))
}

fn sale_years(df: &DataFrame) -> PolarsResult<Series> {
    let micros = df.column(DATE_COLUMN)?.cast(&DataType::Int64)?;
    let years: Vec<Option<i32>> = micros
        .i64()?
        .into_iter()
        .map(|value| {
            value
                .and_then(DateTime::from_timestamp_micros)
                .map(|dt| dt.year())
        })
        .collect();
    Ok(Series::new(SALE_YEAR_COLUMN.into(), years))
}

fn country_codes(df: &DataFrame) -> PolarsResult<(Series, usize)> {
    let codes: Vec<&'static str> = match df.column(COUNTRY_COLUMN) {
        Ok(column) => {
            let text = column.cast(&DataType::String)?;
            text.str()?.into_iter().map(country_code).collect()
        }
        Err(_) => vec![UNKNOWN_COUNTRY; df.height()],
    };
    let unknown = codes.iter().filter(|code| **code == UNKNOWN_COUNTRY).count();
    Ok((Series::new(COUNTRY_CODE_COLUMN.into(), codes), unknown))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_date_shapes() {
        let expected = NaiveDate::from_ymd_opt(2023, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(parse_date("2023-05-01"), Some(expected));
        assert_eq!(parse_date("2023/05/01"), Some(expected));
        assert_eq!(parse_date("05/01/2023"), Some(expected));
        assert_eq!(parse_date("2023-05-01 00:00:00"), Some(expected));
        assert_eq!(parse_date("2023-05-01T02:00:00+02:00"), Some(expected));
    }

    #[test]
    fn garbage_dates_are_none() {
        assert_eq!(parse_date("not-a-date"), None);
        assert_eq!(parse_date("2023-13-45"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn country_lookup_is_exact() {
        assert_eq!(country_code(Some("USA")), "US");
        assert_eq!(country_code(Some("UK")), "GB");
        assert_eq!(country_code(Some("Japan")), "JP");
        assert_eq!(country_code(Some("usa")), "Unknown");
        assert_eq!(country_code(Some("France")), "Unknown");
        assert_eq!(country_code(None), "Unknown");
    }
}
