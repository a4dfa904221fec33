// Database Module
// Placeholder translation, SQL Server pooling, error normalization and schema bootstrap

pub mod adapter;
pub mod bootstrap;
pub mod connection;
pub mod drivers;
pub mod errors;
pub mod params;
pub mod traits;
pub mod translate;

#[cfg(test)]
pub mod testing;

pub use adapter::QueryAdapter;
pub use bootstrap::{initialize, initialize_mssql, BootstrapError, BootstrapReport, DatabaseStep};
pub use connection::{AuthMode, ConnectionConfig, ConnectionError, MssqlPool, PoolManager, PoolState};
pub use drivers::MssqlDriver;
pub use errors::{AdapterError, ErrorKind, DUPLICATE_ENTRY_CODE};
pub use params::{ParameterBinding, SqlParam, WireType};
pub use traits::{Backend, BackendError, CellValue, QueryMeta, QueryOutput, Record};
pub use translate::{translate, TranslateError, TranslatedStatement};
