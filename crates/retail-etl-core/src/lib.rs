pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod load;
pub mod pipeline;
pub mod transform;
pub mod warehouse;

pub use config::{EtlConfig, LoadMode, LoadOptions, WarehouseConfig};
pub use error::{EtlError, Result};
pub use load::{load, load_into, LoadError, LoadOutcome};
pub use pipeline::RunSummary;
pub use transform::transform;
pub use warehouse::{LoadFailureKind, Warehouse, WarehouseError, WarehouseTable};
