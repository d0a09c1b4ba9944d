use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

/// Process configuration, read from `TABLEBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub reaper_poll: Duration,
    pub metrics_port: Option<u16>,
    /// Create any missing default tables at boot.
    pub seed_tables: bool,
}

#[derive(Debug)]
pub struct ConfigError(String);

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = lookup("TABLEBOOK_JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError("TABLEBOOK_JWT_SECRET must be set".into()))?;

        Ok(Self {
            bind: or_default(&lookup, "TABLEBOOK_BIND", "0.0.0.0".to_string()),
            port: or_default(&lookup, "TABLEBOOK_PORT", 3000),
            data_dir: PathBuf::from(or_default(&lookup, "TABLEBOOK_DATA_DIR", "./data".to_string())),
            jwt_secret,
            jwt_issuer: lookup("TABLEBOOK_JWT_ISSUER").filter(|s| !s.is_empty()),
            max_connections: or_default(&lookup, "TABLEBOOK_MAX_CONNECTIONS", 256),
            compact_threshold: or_default(&lookup, "TABLEBOOK_COMPACT_THRESHOLD", 1000),
            reaper_poll: Duration::from_secs(or_default(&lookup, "TABLEBOOK_REAPER_POLL_SECS", 60u64).max(1)),
            metrics_port: lookup("TABLEBOOK_METRICS_PORT").and_then(|s| parse_or_warn("TABLEBOOK_METRICS_PORT", &s)),
            seed_tables: or_default(&lookup, "TABLEBOOK_SEED_TABLES", false),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("tablebook.wal")
    }
}

fn parse_or_warn<T: FromStr>(key: &str, raw: &str) -> Option<T>
where
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| warn!("invalid {key} value {raw:?}: {e}"))
        .ok()
}

fn or_default<T: FromStr + Display>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => parse_or_warn(key, &raw).unwrap_or_else(|| {
            warn!("{key} falling back to {default}");
            default
        }),
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}
