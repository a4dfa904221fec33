// Database drivers implementing the Backend seam

pub mod mssql;

pub use mssql::MssqlDriver;
