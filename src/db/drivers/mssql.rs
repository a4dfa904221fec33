// MS-SQL Driver
// Implements Backend for SQL Server on top of the pooled tiberius connections

use crate::db::connection::{ConnectionError, PoolManager};
use crate::db::params::{ParameterBinding, SqlParam, WireType};
use crate::db::traits::{Backend, BackendError, CellValue, Record};
use crate::db::translate::TranslatedStatement;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::sync::Arc;
use tiberius::numeric::Numeric;
use tiberius::{ColumnType, Query, Row};

impl From<tiberius::error::Error> for BackendError {
    fn from(err: tiberius::error::Error) -> Self {
        match &err {
            tiberius::error::Error::Server(e) => BackendError::Server {
                code: e.code(),
                message: e.message().to_string(),
            },
            tiberius::error::Error::Io { .. } => {
                BackendError::Connection(ConnectionError::ConnectionFailed(err.to_string()))
            }
            _ => BackendError::Driver(err.to_string()),
        }
    }
}

/// MS-SQL backend sharing the process pool
pub struct MssqlDriver {
    pool_manager: Arc<PoolManager>,
}

impl MssqlDriver {
    pub fn new(pool_manager: Arc<PoolManager>) -> Self {
        Self { pool_manager }
    }

    pub fn pool_manager(&self) -> &Arc<PoolManager> {
        &self.pool_manager
    }

    /// Attach each binding to the query in placeholder order
    fn bind_all<'a>(query: &mut Query<'a>, bindings: &'a [ParameterBinding]) {
        for binding in bindings {
            match (&binding.value, binding.wire_type) {
                (SqlParam::Int(v), WireType::Int) => query.bind(*v as i32),
                (SqlParam::Int(v), _) => query.bind(*v),
                (SqlParam::Float(v), _) => query.bind(*v),
                (SqlParam::Bool(v), _) => query.bind(*v),
                (SqlParam::Text(v), _) => query.bind(v.as_str()),
                (SqlParam::Null, _) => query.bind(Option::<&str>::None),
            }
        }
    }

    /// Convert a tiberius row into a Record, keeping column order
    fn record_from_row(row: &Row) -> Record {
        let mut record = Record::new();
        for (idx, column) in row.columns().iter().enumerate() {
            record.push(column.name(), cell_value(row, idx, &column.column_type()));
        }
        record
    }
}

#[async_trait::async_trait]
impl Backend for MssqlDriver {
    fn name(&self) -> &str {
        "mssql"
    }

    fn is_connected(&self) -> bool {
        self.pool_manager.is_connected()
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        self.pool_manager.connect().await
    }

    async fn run(&self, statement: &TranslatedStatement) -> Result<Vec<Record>, BackendError> {
        let pool = self.pool_manager.pool().await?;
        let mut conn = pool.get().await.map_err(ConnectionError::from)?;

        let mut query = Query::new(statement.sql.as_str());
        Self::bind_all(&mut query, &statement.bindings);

        let stream = query.query(&mut *conn).await?;
        let rows = stream.into_first_result().await?;

        Ok(rows.iter().map(Self::record_from_row).collect())
    }
}

/// Convert a tiberius column value to CellValue
fn cell_value(row: &Row, idx: usize, col_type: &ColumnType) -> CellValue {
    match col_type {
        ColumnType::Null => CellValue::Null,

        // Integer types
        ColumnType::Int1 => row.try_get::<u8, _>(idx)
            .ok().flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int2 => row.try_get::<i16, _>(idx)
            .ok().flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int4 => row.try_get::<i32, _>(idx)
            .ok().flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int8 => row.try_get::<i64, _>(idx)
            .ok().flatten()
            .map(CellValue::Int)
            .unwrap_or(CellValue::Null),
        // INTN carries its width per value; try each in turn
        ColumnType::Intn => row.try_get::<i32, _>(idx)
            .ok().flatten()
            .map(|v| CellValue::Int(v as i64))
            .or_else(|| row.try_get::<i64, _>(idx).ok().flatten().map(CellValue::Int))
            .or_else(|| row.try_get::<i16, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)))
            .or_else(|| row.try_get::<u8, _>(idx).ok().flatten().map(|v| CellValue::Int(v as i64)))
            .unwrap_or(CellValue::Null),

        // Float types
        ColumnType::Float4 => row.try_get::<f32, _>(idx)
            .ok().flatten()
            .map(|v| CellValue::Float(v as f64))
            .unwrap_or(CellValue::Null),
        ColumnType::Float8 | ColumnType::Money | ColumnType::Money4 => row.try_get::<f64, _>(idx)
            .ok().flatten()
            .map(CellValue::Float)
            .unwrap_or(CellValue::Null),
        ColumnType::Floatn => row.try_get::<f64, _>(idx)
            .ok().flatten()
            .map(CellValue::Float)
            .or_else(|| row.try_get::<f32, _>(idx).ok().flatten().map(|v| CellValue::Float(v as f64)))
            .unwrap_or(CellValue::Null),

        ColumnType::Decimaln | ColumnType::Numericn => row.try_get::<Numeric, _>(idx)
            .ok().flatten()
            .map(|n| CellValue::Float(f64::from(n)))
            .unwrap_or(CellValue::Null),

        ColumnType::Bit | ColumnType::Bitn => row.try_get::<bool, _>(idx)
            .ok().flatten()
            .map(CellValue::Bool)
            .unwrap_or(CellValue::Null),

        // Date/Time types
        ColumnType::Datetime | ColumnType::Datetime2 | ColumnType::Datetimen | ColumnType::Datetime4 => {
            row.try_get::<NaiveDateTime, _>(idx)
                .ok().flatten()
                .map(|dt| CellValue::DateTime(dt.to_string()))
                .unwrap_or(CellValue::Null)
        }
        ColumnType::DatetimeOffsetn => row.try_get::<DateTime<Utc>, _>(idx)
            .ok().flatten()
            .map(|dt| CellValue::DateTime(dt.to_rfc3339()))
            .unwrap_or(CellValue::Null),
        ColumnType::Daten => row.try_get::<NaiveDate, _>(idx)
            .ok().flatten()
            .map(|d| CellValue::DateTime(d.to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::Timen => row.try_get::<NaiveTime, _>(idx)
            .ok().flatten()
            .map(|t| CellValue::DateTime(t.to_string()))
            .unwrap_or(CellValue::Null),

        // Binary types
        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => row.try_get::<&[u8], _>(idx)
            .ok().flatten()
            .map(|b| CellValue::Binary(b.to_vec()))
            .unwrap_or(CellValue::Null),

        ColumnType::Guid => row.try_get::<tiberius::Uuid, _>(idx)
            .ok().flatten()
            .map(|u| CellValue::String(u.to_string()))
            .unwrap_or(CellValue::Null),

        // Character types and anything else readable as text
        _ => row.try_get::<&str, _>(idx)
            .ok().flatten()
            .map(|s| CellValue::String(s.to_string()))
            .unwrap_or(CellValue::Null),
    }
}
