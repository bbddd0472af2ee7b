// crates/retail-etl-core/src/error.rs

use thiserror::Error;

use crate::config::ConfigError;
use crate::extract::ExtractError;
use crate::load::LoadError;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extract failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("Transform failed: {0}")]
    Transform(#[from] polars::error::PolarsError),

    #[error("Load failed: {0}")]
    Load(#[from] LoadError),
}

pub type Result<T> = std::result::Result<T, EtlError>;
