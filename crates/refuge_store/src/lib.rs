mod audit_log;
pub mod config;
mod datasets;
pub mod datastore;
mod db;
mod fields;
mod lifecycle;
pub mod migration;
mod options;
mod records;
mod relations;
mod snapshots;
pub mod store;

pub use config::{DatabaseConfig, LimitsConfig, PoolConfig, RefugeConfig, ValidationMode};
pub use datastore::{default_sqlite_path, load_or_init_config, open_store};
pub use refuge_core::*;
pub use store::RefugeStore;
