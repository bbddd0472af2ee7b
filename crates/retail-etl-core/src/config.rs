use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use thiserror::Error;

pub const DEFAULT_INPUT: &str = "retailData.csv";
pub const DEFAULT_TABLE: &str = "sales";
pub const DEFAULT_LOG_FILE: &str = "etl.log";
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("DB_PASSWORD must be set (or DATABASE_URL provided)")]
    MissingPassword,

    #[error("invalid DATABASE_URL: {0}")]
    DatabaseUrl(#[source] sqlx::Error),
}

/// How the loader writes into the destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Drop and recreate the table, then write every row.
    Replace,
    /// Append only rows newer than the stored `date` watermark.
    #[default]
    Incremental,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Replace => "replace",
            LoadMode::Incremental => "incremental",
        }
    }
}

impl FromStr for LoadMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "incremental" => Ok(Self::Incremental),
            _ => Err(ConfigError::InvalidValue {
                key: "ETL_LOAD_MODE",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    pub mode: LoadMode,
    pub batch_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            mode: LoadMode::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Connection settings for the warehouse database.
///
/// The password has no built-in fallback; resolving connect options without
/// one (and without `database_url`) is an error.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub db_user: String,
    pub db_password: Option<String>,
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            db_user: "postgres".to_string(),
            db_password: None,
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_name: "retail_warehouse".to_string(),
            database_url: None,
            max_connections: 5,
            acquire_timeout_secs: 10,
        }
    }
}

impl std::fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("db_user", &self.db_user)
            .field("db_password", &self.db_password.as_ref().map(|_| "***"))
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_name", &self.db_name)
            .field("database_url", &self.database_url.as_ref().map(|_| "***"))
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .finish()
    }
}

impl WarehouseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        if let Some(url) = &self.database_url {
            return PgConnectOptions::from_str(url).map_err(ConfigError::DatabaseUrl);
        }

        let password = self
            .db_password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingPassword)?;

        Ok(PgConnectOptions::new()
            .host(&self.db_host)
            .port(self.db_port)
            .username(&self.db_user)
            .password(password)
            .database(&self.db_name))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub input: PathBuf,
    pub table: String,
    pub log_file: Option<PathBuf>,
    pub warehouse: WarehouseConfig,
    pub load: LoadOptions,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT),
            table: DEFAULT_TABLE.to_string(),
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            warehouse: WarehouseConfig::default(),
            load: LoadOptions::default(),
        }
    }
}

impl EtlConfig {
    /// Builds the configuration from defaults, an optional TOML file, and the
    /// process environment, in increasing precedence.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that deserialize cleanly but cannot drive a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.load.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "load.batch_size",
                value: self.load.batch_size.to_string(),
            });
        }
        Ok(())
    }

    /// Overlays values from `lookup`, which is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let warehouse = &mut self.warehouse;
        if let Some(user) = lookup("DB_USER") {
            warehouse.db_user = user;
        }
        if let Some(password) = lookup("DB_PASSWORD") {
            warehouse.db_password = Some(password);
        }
        if let Some(host) = lookup("DB_HOST") {
            warehouse.db_host = host;
        }
        if let Some(port) = lookup("DB_PORT") {
            warehouse.db_port = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "DB_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(name) = lookup("DB_NAME") {
            warehouse.db_name = name;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            warehouse.database_url = Some(url);
        }
        if let Some(mode) = lookup("ETL_LOAD_MODE") {
            self.load.mode = mode.parse()?;
        }
        if let Some(size) = lookup("ETL_BATCH_SIZE") {
            self.load.batch_size = parse_batch_size(&size)?;
        }
        Ok(())
    }
}

pub fn parse_batch_size(value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(ConfigError::InvalidValue {
            key: "ETL_BATCH_SIZE",
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_deployment() {
        let config = EtlConfig::default();
        assert_eq!(config.input, PathBuf::from("retailData.csv"));
        assert_eq!(config.table, "sales");
        assert_eq!(config.warehouse.db_user, "postgres");
        assert_eq!(config.warehouse.db_host, "localhost");
        assert_eq!(config.warehouse.db_port, 5432);
        assert_eq!(config.warehouse.db_name, "retail_warehouse");
        assert!(config.warehouse.db_password.is_none());
        assert_eq!(config.load.batch_size, 10_000);
        assert_eq!(config.load.mode, LoadMode::Incremental);
    }

    #[test]
    fn missing_password_fails_fast() {
        let config = WarehouseConfig::default();
        assert!(matches!(
            config.connect_options(),
            Err(ConfigError::MissingPassword)
        ));
    }

    #[test]
    fn database_url_skips_password_requirement() {
        let config = WarehouseConfig {
            database_url: Some("postgres://etl:secret@db:5433/warehouse".into()),
            ..WarehouseConfig::default()
        };
        assert!(config.connect_options().is_ok());
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config: EtlConfig = toml::from_str(
            r#"
                table = "sales_staging"

                [warehouse]
                db_host = "warehouse.internal"
                db_port = 6543

                [load]
                mode = "replace"
                batch_size = 500
            "#,
        )
        .unwrap();

        config
            .apply_env(env_of(&[
                ("DB_HOST", "override.internal"),
                ("DB_PASSWORD", "s3cret"),
                ("ETL_LOAD_MODE", "incremental"),
            ]))
            .unwrap();

        assert_eq!(config.table, "sales_staging");
        assert_eq!(config.warehouse.db_host, "override.internal");
        assert_eq!(config.warehouse.db_port, 6543);
        assert_eq!(config.warehouse.db_password.as_deref(), Some("s3cret"));
        assert_eq!(config.load.mode, LoadMode::Incremental);
        assert_eq!(config.load.batch_size, 500);
    }

    #[test]
    fn invalid_environment_values_are_rejected() {
        let mut config = EtlConfig::default();
        let err = config
            .apply_env(env_of(&[("DB_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "DB_PORT", .. }));

        let err = config
            .apply_env(env_of(&[("ETL_BATCH_SIZE", "0")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "ETL_BATCH_SIZE",
                ..
            }
        ));
    }

    #[test]
    fn zero_batch_size_in_file_is_rejected() {
        let path = std::env::temp_dir().join(format!(
            "retail-etl-zero-batch-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[load]\nbatch_size = 0\n").unwrap();

        let result = EtlConfig::from_file(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                key: "load.batch_size",
                ..
            })
        ));
    }

    #[test]
    fn load_mode_accepts_only_documented_names() {
        assert_eq!("Replace".parse::<LoadMode>().unwrap(), LoadMode::Replace);
        assert_eq!(
            " incremental ".parse::<LoadMode>().unwrap(),
            LoadMode::Incremental
        );
        assert!("append".parse::<LoadMode>().is_err());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = WarehouseConfig {
            db_password: Some("hunter2".into()),
            ..WarehouseConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
