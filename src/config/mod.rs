use std::collections::HashMap;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("user {0} is missing an authorization secret")]
    MissingSecret(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    pub users: HashMap<String, UserConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    #[serde(rename = "type")]
    pub backend: BackendType,
    pub auth: AuthSettings,
    pub options: PgOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    pub secret: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
}

/// Connection and per-table defaults for one configured user. Field names
/// follow the upstream config file convention.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PgOptions {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection before giving up.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Primary key column assumed for every table.
    #[serde(default = "default_pk")]
    pub default_pk: String,
    /// Geometry column assumed for every table. An explicit `null`
    /// disables geometry handling for this user.
    #[serde(default = "default_geom")]
    pub default_geom: Option<String>,
    /// Native SRID of stored geometry; unset means tables already store
    /// 4326.
    #[serde(default)]
    pub default_srid: Option<i32>,
}

fn default_port() -> u16 {
    3000
}

fn default_pg_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_pk() -> String {
    "id".to_string()
}

fn default_geom() -> Option<String> {
    Some("geom".to_string())
}

/// Loads and validates a configuration file.
pub fn load_from(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let config: Config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    for (name, user) in &config.users {
        if user.auth.secret.is_empty() {
            return Err(ConfigError::MissingSecret(name.clone()));
        }
    }

    Ok(config)
}

// Global singleton config - initialized once at startup. The server sets
// FEATURES_CONFIG from its CLI argument before first access.
pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    let path = std::env::var("FEATURES_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    load_from(&path).unwrap_or_else(|e| panic!("failed to load configuration: {}", e))
});

// Convenience function for accessing config
pub fn config() -> &'static Config {
    &CONFIG
}
