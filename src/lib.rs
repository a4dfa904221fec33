// Data-access core of the lecture portal: `?`-style statements on SQL Server,
// pooled connections, schema bootstrap and signed media URLs.

pub mod config;
pub mod db;
pub mod logging;
pub mod media;
pub mod security;

pub use config::{AppConfig, ConfigError};
pub use db::{AdapterError, PoolManager, QueryAdapter, QueryOutput, SqlParam};
pub use media::{MediaError, MediaResolver};
