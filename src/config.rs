// Environment-sourced configuration
// Reads process variables (optionally seeded from a .env file) into typed settings

use crate::db::connection::ConnectionConfig;
use crate::media::config::MediaConfig;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(String),

    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: String, value: String },
}

/// Source of configuration values, keyed by environment variable name
pub trait EnvLookup {
    fn get(&self, key: &str) -> Option<String>;
}

/// The real process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl EnvLookup for HashMap<&str, &str> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).map(|v| v.to_string())
    }
}

/// Load a `.env` file from the working directory if one exists.
/// Variables already set in the process take precedence.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "Failed to parse environment file"),
    }
}

/// Non-empty value of `key`, with surrounding whitespace removed
pub fn non_empty(env: &dyn EnvLookup, key: &str) -> Option<String> {
    env.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn string_or(env: &dyn EnvLookup, key: &str, default: &str) -> String {
    non_empty(env, key).unwrap_or_else(|| default.to_string())
}

pub fn required(env: &dyn EnvLookup, key: &str) -> Result<String, ConfigError> {
    non_empty(env, key).ok_or_else(|| ConfigError::Missing(key.to_string()))
}

/// `true` only when the variable is literally "true" (case-insensitive)
pub fn flag(env: &dyn EnvLookup, key: &str) -> bool {
    non_empty(env, key)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Like [`flag`], but an unset variable yields `default`
pub fn flag_or(env: &dyn EnvLookup, key: &str, default: bool) -> bool {
    match non_empty(env, key) {
        Some(v) => v.eq_ignore_ascii_case("true"),
        None => default,
    }
}

pub fn parse_or<T: FromStr>(env: &dyn EnvLookup, key: &str, default: T) -> Result<T, ConfigError> {
    match non_empty(env, key) {
        Some(value) => value.parse::<T>().map_err(|_| ConfigError::Invalid {
            var: key.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

/// Credentials for the administrative principal created during bootstrap
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl AdminSeed {
    pub fn from_lookup(env: &dyn EnvLookup) -> Self {
        Self {
            name: string_or(env, "ADMIN_NAME", "Admin User"),
            email: string_or(env, "ADMIN_EMAIL", "admin@learningportal.com"),
            password: string_or(env, "ADMIN_PASSWORD", "Admin@123"),
        }
    }
}

impl Default for AdminSeed {
    fn default() -> Self {
        Self::from_lookup(&HashMap::<String, String>::new())
    }
}

/// Everything the process needs, built once at startup
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: ConnectionConfig,
    pub media: Option<MediaConfig>,
    pub admin: AdminSeed,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(&ProcessEnv)
    }

    /// Media settings are optional: a process without a bucket can still run the bootstrap
    pub fn from_lookup(env: &dyn EnvLookup) -> Result<Self, ConfigError> {
        let media = match MediaConfig::from_lookup(env) {
            Ok(media) => Some(media),
            Err(ConfigError::Missing(var)) => {
                tracing::debug!(%var, "Media storage not configured");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            database: ConnectionConfig::from_lookup(env)?,
            media,
            admin: AdminSeed::from_lookup(env),
        })
    }
}
