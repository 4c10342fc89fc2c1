//! Server configuration, resolved once at startup.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use npsp_core::{JournalMode, StoreOptions};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_DATABASE_PATH: &str = "npsp.db";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 2_000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid {key} value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// SQLite file, or `:memory:`
    pub database_path: PathBuf,
    /// Upper bound on store work per request
    pub request_timeout: Duration,
    pub store: StoreOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            store: StoreOptions {
                busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
                journal_mode: JournalMode::Wal,
            },
        }
    }
}

impl ServerConfig {
    /// Read `NPSP_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let addr = load(&lookup, "NPSP_ADDR", DEFAULT_ADDR)?;
        let database_path = lookup("NPSP_DATABASE_PATH")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string());
        let request_timeout_ms: u64 = load(
            &lookup,
            "NPSP_REQUEST_TIMEOUT_MS",
            &DEFAULT_REQUEST_TIMEOUT_MS.to_string(),
        )?;
        let busy_timeout_ms: u64 = load(
            &lookup,
            "NPSP_BUSY_TIMEOUT_MS",
            &DEFAULT_BUSY_TIMEOUT_MS.to_string(),
        )?;
        let journal_mode: JournalMode = load(&lookup, "NPSP_JOURNAL_MODE", "wal")?;

        if request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "NPSP_REQUEST_TIMEOUT_MS",
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }

        Ok(Self {
            addr,
            database_path: PathBuf::from(database_path),
            request_timeout: Duration::from_millis(request_timeout_ms),
            store: StoreOptions {
                busy_timeout: Duration::from_millis(busy_timeout_ms),
                journal_mode,
            },
        })
    }
}

fn load<T, F>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.clone(),
        reason: e.to_string(),
    })
}
