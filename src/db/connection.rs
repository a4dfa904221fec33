// MS-SQL Connection Management
// Owns the process-wide tiberius connection pool and resolves the credential mode

use crate::config::{self, ConfigError, EnvLookup, ProcessEnv};
use bb8::Pool;
use bb8_tiberius::ConnectionManager;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tiberius::{AuthMethod, Config, EncryptionLevel};
use tokio::sync::RwLock;

/// Usernames starting with this prefix are treated as unset (commented-out template values)
const PLACEHOLDER_PREFIX: char = '#';

/// How the pool authenticates against the server
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Ambient identity of the running process
    Integrated,
    /// Windows authentication with explicit domain credentials
    ExplicitDomain {
        domain: String,
        username: String,
        password: String,
    },
    /// SQL Server login
    SqlServer { username: String, password: String },
}

impl AuthMode {
    /// Resolve the credential mode from the environment.
    ///
    /// Integrated auth wins when `DB_USE_WINDOWS_AUTH=true` or when no usable
    /// `DB_USER` is configured; otherwise a SQL Server login is used.
    pub fn resolve(env: &dyn EnvLookup, host: &str) -> Self {
        let username = config::non_empty(env, "DB_USER")
            .filter(|u| !u.starts_with(PLACEHOLDER_PREFIX));
        let use_integrated = config::flag(env, "DB_USE_WINDOWS_AUTH") || username.is_none();

        if !use_integrated {
            return AuthMode::SqlServer {
                username: username.unwrap_or_default(),
                password: env.get("DB_PASSWORD").unwrap_or_default(),
            };
        }

        match (
            config::non_empty(env, "DB_WINDOWS_USER"),
            config::non_empty(env, "DB_WINDOWS_PASSWORD"),
        ) {
            (Some(username), Some(password)) => AuthMode::ExplicitDomain {
                domain: config::string_or(env, "DB_DOMAIN", host),
                username,
                password,
            },
            _ => AuthMode::Integrated,
        }
    }

    /// Short label for logs; never includes secrets
    pub fn label(&self) -> &'static str {
        match self {
            AuthMode::Integrated => "integrated",
            AuthMode::ExplicitDomain { .. } => "windows",
            AuthMode::SqlServer { .. } => "sql",
        }
    }

    fn to_auth_method(&self) -> Result<AuthMethod, ConnectionError> {
        match self {
            AuthMode::SqlServer { username, password } => {
                Ok(AuthMethod::sql_server(username, password))
            }
            #[cfg(windows)]
            AuthMode::ExplicitDomain {
                domain,
                username,
                password,
            } => Ok(AuthMethod::windows(
                format!("{}\\{}", domain, username),
                password,
            )),
            #[cfg(windows)]
            AuthMode::Integrated => Ok(AuthMethod::Integrated),
            #[cfg(not(windows))]
            AuthMode::ExplicitDomain { .. } | AuthMode::Integrated => {
                Err(ConnectionError::ConfigError(format!(
                    "{} authentication is only available on Windows hosts; set DB_USER and DB_PASSWORD",
                    self.label()
                )))
            }
        }
    }
}

impl std::fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMode::Integrated => f.write_str("Integrated"),
            AuthMode::ExplicitDomain {
                domain, username, ..
            } => f
                .debug_struct("ExplicitDomain")
                .field("domain", domain)
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            AuthMode::SqlServer { username, .. } => f
                .debug_struct("SqlServer")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Connection configuration for MS-SQL. Immutable once the pool is built.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub auth: AuthMode,
    pub encrypt: bool,
    pub trust_certificate: bool,
    pub pool_min: u32,
    pub pool_max: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub request_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(host: String, port: u16, database: String, auth: AuthMode) -> Self {
        Self {
            host,
            port,
            database,
            auth,
            encrypt: false,
            trust_certificate: true,
            pool_min: 0,
            pool_max: 10,
            connect_timeout: Duration::from_millis(30_000),
            idle_timeout: Duration::from_millis(30_000),
            request_timeout: Duration::from_millis(30_000),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&ProcessEnv)
    }

    pub fn from_lookup(env: &dyn EnvLookup) -> Result<Self, ConfigError> {
        let host = config::string_or(env, "DB_HOST", "localhost");
        let auth = AuthMode::resolve(env, &host);

        let pool_min = config::parse_or(env, "DB_POOL_MIN", 0u32)?;
        let pool_max = config::parse_or(env, "DB_POOL_MAX", 10u32)?;
        if pool_max == 0 || pool_min > pool_max {
            return Err(ConfigError::Invalid {
                var: "DB_POOL_MAX".to_string(),
                value: format!("min={} max={}", pool_min, pool_max),
            });
        }

        Ok(Self {
            port: config::parse_or(env, "DB_PORT", 1433u16)?,
            database: config::string_or(env, "DB_NAME", "learning_portal"),
            auth,
            encrypt: config::flag(env, "DB_ENCRYPT"),
            trust_certificate: config::flag_or(env, "DB_TRUST_CERT", true),
            pool_min,
            pool_max,
            connect_timeout: Duration::from_millis(config::parse_or(env, "DB_CONNECT_TIMEOUT_MS", 30_000u64)?),
            idle_timeout: Duration::from_millis(config::parse_or(env, "DB_IDLE_TIMEOUT_MS", 30_000u64)?),
            request_timeout: Duration::from_millis(config::parse_or(env, "DB_REQUEST_TIMEOUT_MS", 30_000u64)?),
            host,
        })
    }

    /// Same server and credentials, different database (e.g. `master` for bootstrap)
    pub fn for_database(&self, database: &str) -> Self {
        let mut config = self.clone();
        config.database = database.to_string();
        config
    }

    /// Create a tiberius Config from this ConnectionConfig
    pub fn to_tiberius_config(&self) -> Result<Config, ConnectionError> {
        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.database(&self.database);
        config.authentication(self.auth.to_auth_method()?);

        if self.trust_certificate {
            config.trust_cert();
        }

        config.encryption(if self.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });

        Ok(config)
    }
}

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection pool error: {0}")]
    PoolError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Password expired. Change it on the server before reconnecting.")]
    PasswordExpired,

    #[error("Timed out waiting for a connection")]
    Timeout,

    #[error("Connection pool has been shut down")]
    Closed,
}

impl From<tiberius::error::Error> for ConnectionError {
    fn from(err: tiberius::error::Error) -> Self {
        if let tiberius::error::Error::Server(e) = &err {
            if e.code() == 18488 {
                return ConnectionError::PasswordExpired;
            }
        }
        ConnectionError::ConnectionFailed(err.to_string())
    }
}

impl<E: std::error::Error + 'static> From<bb8::RunError<E>> for ConnectionError {
    fn from(err: bb8::RunError<E>) -> Self {
        match err {
            bb8::RunError::TimedOut => ConnectionError::Timeout,
            bb8::RunError::User(e) => ConnectionError::PoolError(e.to_string()),
        }
    }
}

/// Type alias for our connection pool
pub type MssqlPool = Pool<ConnectionManager>;

/// Lifecycle of the shared pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PoolState {
    Uninitialized,
    Connecting,
    Connected,
    Closed,
}

enum Slot {
    Empty,
    Ready(Arc<MssqlPool>),
    Closed,
}

/// Owns the single connection pool for the process.
///
/// Construct once at startup and share by `Arc`. The pool is built on the
/// first call to [`PoolManager::pool`] (or eagerly via [`PoolManager::connect`])
/// and lives until [`PoolManager::shutdown`].
pub struct PoolManager {
    config: ConnectionConfig,
    slot: RwLock<Slot>,
}

impl PoolManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            slot: RwLock::new(Slot::Empty),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current lifecycle state. Reports `Connecting` while another caller is building the pool.
    pub fn state(&self) -> PoolState {
        match self.slot.try_read() {
            Ok(slot) => match &*slot {
                Slot::Empty => PoolState::Uninitialized,
                Slot::Ready(_) => PoolState::Connected,
                Slot::Closed => PoolState::Closed,
            },
            Err(_) => PoolState::Connecting,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == PoolState::Connected
    }

    /// Build the pool now instead of on first use
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.pool().await.map(|_| ())
    }

    /// Get the shared pool, creating it on the first call
    pub async fn pool(&self) -> Result<Arc<MssqlPool>, ConnectionError> {
        {
            let slot = self.slot.read().await;
            match &*slot {
                Slot::Ready(pool) => return Ok(Arc::clone(pool)),
                Slot::Closed => return Err(ConnectionError::Closed),
                Slot::Empty => {}
            }
        }

        let mut slot = self.slot.write().await;
        // Another caller may have finished while we waited for the write lock
        match &*slot {
            Slot::Ready(pool) => return Ok(Arc::clone(pool)),
            Slot::Closed => return Err(ConnectionError::Closed),
            Slot::Empty => {}
        }

        let pool = Arc::new(self.build_pool().await?);
        *slot = Slot::Ready(Arc::clone(&pool));
        Ok(pool)
    }

    async fn build_pool(&self) -> Result<MssqlPool, ConnectionError> {
        let config = &self.config;
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            auth = config.auth.label(),
            "Connecting to SQL Server"
        );

        let tiberius_config = config.to_tiberius_config()?;
        let manager = ConnectionManager::build(tiberius_config)
            .map_err(|e| ConnectionError::ConfigError(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(config.pool_max)
            .min_idle(if config.pool_min > 0 { Some(config.pool_min) } else { None })
            .connection_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .build(manager)
            .await
            .map_err(|e| ConnectionError::PoolError(e.to_string()))?;

        // Fail here rather than on the first statement if the server is unreachable
        drop(pool.get().await.map_err(ConnectionError::from)?);

        tracing::info!(database = %config.database, max = config.pool_max, "Connection pool ready");
        Ok(pool)
    }

    /// Drop the pool. Connections close once in-flight checkouts are returned.
    pub async fn shutdown(&self) {
        let mut slot = self.slot.write().await;
        if let Slot::Ready(_) = &*slot {
            tracing::info!(database = %self.config.database, "Connection pool shut down");
        }
        *slot = Slot::Closed;
    }

    /// Check a connection out of the pool to confirm the server is reachable
    pub async fn is_healthy(&self) -> bool {
        match self.pool().await {
            Ok(pool) => pool.get().await.is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&'static str, &'static str)]) -> HashMap<&'static str, &'static str> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_sql_auth_when_user_configured() {
        let vars = env(&[("DB_USER", "portal"), ("DB_PASSWORD", "secret")]);
        assert_eq!(
            AuthMode::resolve(&vars, "db.local"),
            AuthMode::SqlServer {
                username: "portal".to_string(),
                password: "secret".to_string()
            }
        );
    }

    #[test]
    fn test_explicit_flag_forces_integrated() {
        let vars = env(&[("DB_USE_WINDOWS_AUTH", "true"), ("DB_USER", "portal")]);
        assert_eq!(AuthMode::resolve(&vars, "db.local"), AuthMode::Integrated);
    }

    #[test]
    fn test_missing_or_placeholder_user_falls_back_to_integrated() {
        assert_eq!(AuthMode::resolve(&env(&[]), "db.local"), AuthMode::Integrated);
        let vars = env(&[("DB_USER", "#your_user"), ("DB_PASSWORD", "x")]);
        assert_eq!(AuthMode::resolve(&vars, "db.local"), AuthMode::Integrated);
    }

    #[test]
    fn test_explicit_domain_credentials_bound_when_present() {
        let vars = env(&[
            ("DB_WINDOWS_USER", "svc_portal"),
            ("DB_WINDOWS_PASSWORD", "pw"),
        ]);
        assert_eq!(
            AuthMode::resolve(&vars, "db.local"),
            AuthMode::ExplicitDomain {
                domain: "db.local".to_string(),
                username: "svc_portal".to_string(),
                password: "pw".to_string()
            }
        );

        let vars = env(&[
            ("DB_WINDOWS_USER", "svc_portal"),
            ("DB_WINDOWS_PASSWORD", "pw"),
            ("DB_DOMAIN", "CORP"),
        ]);
        match AuthMode::resolve(&vars, "db.local") {
            AuthMode::ExplicitDomain { domain, .. } => assert_eq!(domain, "CORP"),
            other => panic!("unexpected auth mode {:?}", other),
        }
    }

    #[test]
    fn test_half_configured_domain_credentials_use_ambient_identity() {
        let vars = env(&[("DB_WINDOWS_USER", "svc_portal")]);
        assert_eq!(AuthMode::resolve(&vars, "db.local"), AuthMode::Integrated);
    }

    #[test]
    fn test_connection_config_defaults() {
        let vars = env(&[("DB_USER", "sa"), ("DB_PASSWORD", "pw")]);
        let config = ConnectionConfig::from_lookup(&vars).unwrap();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1433);
        assert_eq!(config.database, "learning_portal");
        assert!(!config.encrypt);
        assert!(config.trust_certificate);
        assert_eq!(config.pool_min, 0);
        assert_eq!(config.pool_max, 10);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_connection_config_overrides() {
        let vars = env(&[
            ("DB_HOST", "sql.internal"),
            ("DB_PORT", "1533"),
            ("DB_NAME", "portal"),
            ("DB_ENCRYPT", "true"),
            ("DB_POOL_MAX", "4"),
            ("DB_REQUEST_TIMEOUT_MS", "500"),
            ("DB_USER", "sa"),
        ]);
        let config = ConnectionConfig::from_lookup(&vars).unwrap();

        assert_eq!(config.host, "sql.internal");
        assert_eq!(config.port, 1533);
        assert_eq!(config.database, "portal");
        assert!(config.encrypt);
        assert_eq!(config.pool_max, 4);
        assert_eq!(config.request_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_pool_bounds_validated() {
        let vars = env(&[("DB_POOL_MIN", "5"), ("DB_POOL_MAX", "2")]);
        assert!(ConnectionConfig::from_lookup(&vars).is_err());
        let vars = env(&[("DB_POOL_MAX", "0")]);
        assert!(ConnectionConfig::from_lookup(&vars).is_err());
    }

    #[test]
    fn test_for_database_keeps_credentials() {
        let config = ConnectionConfig::new(
            "localhost".to_string(),
            1433,
            "learning_portal".to_string(),
            AuthMode::SqlServer {
                username: "sa".to_string(),
                password: "pw".to_string(),
            },
        );
        let master = config.for_database("master");
        assert_eq!(master.database, "master");
        assert_eq!(master.auth, config.auth);
        assert_eq!(config.database, "learning_portal");
    }

    #[test]
    fn test_tiberius_config_conversion() {
        let mut config = ConnectionConfig::new(
            "localhost".to_string(),
            1433,
            "master".to_string(),
            AuthMode::SqlServer {
                username: "sa".to_string(),
                password: "password123".to_string(),
            },
        );
        config.encrypt = true;
        config.trust_certificate = false;

        assert!(config.to_tiberius_config().is_ok());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_integrated_auth_rejected_off_windows() {
        let config = ConnectionConfig::new(
            "localhost".to_string(),
            1433,
            "master".to_string(),
            AuthMode::Integrated,
        );
        assert!(matches!(
            config.to_tiberius_config(),
            Err(ConnectionError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_pool_manager_lifecycle_without_server() {
        let manager = PoolManager::new(ConnectionConfig::new(
            "localhost".to_string(),
            1433,
            "master".to_string(),
            AuthMode::Integrated,
        ));
        assert_eq!(manager.state(), PoolState::Uninitialized);
        assert!(!manager.is_connected());

        manager.shutdown().await;
        assert_eq!(manager.state(), PoolState::Closed);
        assert!(matches!(manager.pool().await, Err(ConnectionError::Closed)));
    }

    #[test]
    fn test_debug_never_prints_passwords() {
        let auth = AuthMode::SqlServer {
            username: "sa".to_string(),
            password: "hunter2".to_string(),
        };
        let printed = format!("{:?}", auth);
        assert!(printed.contains("sa"));
        assert!(!printed.contains("hunter2"));
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn test_failed_connect_leaves_manager_retryable() {
        let manager = PoolManager::new(ConnectionConfig::new(
            "localhost".to_string(),
            1433,
            "master".to_string(),
            AuthMode::Integrated,
        ));
        assert!(matches!(
            manager.connect().await,
            Err(ConnectionError::ConfigError(_))
        ));
        assert_eq!(manager.state(), PoolState::Uninitialized);
    }
}
