// Query Adapter
// Translates `?`-placeholder statements, runs them on a Backend and shapes the result

use crate::db::connection::PoolManager;
use crate::db::drivers::MssqlDriver;
use crate::db::errors::AdapterError;
use crate::db::params::SqlParam;
use crate::db::traits::{Backend, QueryMeta, QueryOutput, Record};
use crate::db::translate::{self, TranslatedStatement, IDENTITY_COLUMN};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Executes application statements against a shared backend.
///
/// Each `execute` call is an independent unit of work: there is no
/// cross-statement transaction, so a sequence of calls that fails partway
/// leaves the earlier statements committed.
pub struct QueryAdapter {
    backend: Arc<dyn Backend>,
    request_timeout: Option<Duration>,
}

impl QueryAdapter {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            request_timeout: None,
        }
    }

    /// Adapter over the MS-SQL pool, bounded by the configured request timeout
    pub fn mssql(pool_manager: Arc<PoolManager>) -> Self {
        let timeout = pool_manager.config().request_timeout;
        Self::new(Arc::new(MssqlDriver::new(pool_manager))).with_request_timeout(timeout)
    }

    /// Bound every execution; expiry surfaces as [`AdapterError::Timeout`]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Translate and run `sql`, binding `params` to its `?` placeholders left to right
    pub async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<QueryOutput, AdapterError> {
        let statement = translate::translate(sql, params)?;
        self.execute_translated(&statement).await
    }

    /// Run an already translated statement
    pub async fn execute_translated(
        &self,
        statement: &TranslatedStatement,
    ) -> Result<QueryOutput, AdapterError> {
        let query_id = Uuid::new_v4();

        if !self.backend.is_connected() {
            self.backend.connect().await?;
        }

        tracing::debug!(
            %query_id,
            backend = self.backend.name(),
            sql = %statement.sql,
            bindings = statement.bindings.len(),
            identity = statement.returns_identity,
            "Executing statement"
        );

        let start = Instant::now();
        let run = self.backend.run(statement);
        let result = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(%query_id, timeout_ms = limit.as_millis() as u64, "Statement timed out");
                    return Err(AdapterError::Timeout(limit.as_millis() as u64));
                }
            },
            None => run.await,
        };

        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                let err = AdapterError::from(e);
                if err.is_duplicate_entry() {
                    tracing::debug!(%query_id, error = %err, "Duplicate entry");
                } else {
                    tracing::error!(%query_id, error = %err, "Statement failed");
                }
                return Err(err);
            }
        };

        tracing::debug!(
            %query_id,
            rows = rows.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Statement completed"
        );

        Ok(shape_output(statement, rows))
    }
}

/// Identity-rewritten inserts report the new id from the first row; everything else has empty meta
fn shape_output(statement: &TranslatedStatement, rows: Vec<Record>) -> QueryOutput {
    let insert_id = if statement.returns_identity {
        rows.first()
            .and_then(|row| row.get(IDENTITY_COLUMN))
            .and_then(|value| value.as_i64())
    } else {
        None
    };

    QueryOutput {
        rows,
        meta: QueryMeta { insert_id },
    }
}
