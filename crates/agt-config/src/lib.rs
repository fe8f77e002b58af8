//! Environment-driven configuration for the telemetry pipeline.
//!
//! Every knob is a `TELEMETRY_*` variable with a sensible default, so the
//! ingestion service and the client library run out of the box against a
//! local store. Parsing is strict where correctness depends on it:
//! `TELEMETRY_API_WORKERS` other than 1 is a fatal configuration error, not
//! a tuning choice, because the embedded store tolerates exactly one writer
//! process.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

pub const ENV_DB_PATH: &str = "TELEMETRY_DB_PATH";
pub const ENV_BASE_DIR: &str = "TELEMETRY_BASE_DIR";
pub const ENV_NDJSON_DIR: &str = "TELEMETRY_NDJSON_DIR";
pub const ENV_API_HOST: &str = "TELEMETRY_API_HOST";
pub const ENV_API_PORT: &str = "TELEMETRY_API_PORT";
pub const ENV_API_WORKERS: &str = "TELEMETRY_API_WORKERS";
pub const ENV_JOURNAL_MODE: &str = "TELEMETRY_DB_JOURNAL_MODE";
pub const ENV_SYNCHRONOUS: &str = "TELEMETRY_DB_SYNCHRONOUS";
pub const ENV_BUSY_TIMEOUT_MS: &str = "TELEMETRY_DB_BUSY_TIMEOUT_MS";
pub const ENV_AUTH_ENABLED: &str = "TELEMETRY_API_AUTH_ENABLED";
pub const ENV_AUTH_TOKEN: &str = "TELEMETRY_API_AUTH_TOKEN";
pub const ENV_RATE_LIMIT_ENABLED: &str = "TELEMETRY_RATE_LIMIT_ENABLED";
pub const ENV_RATE_LIMIT_RPM: &str = "TELEMETRY_RATE_LIMIT_RPM";
pub const ENV_API_URL: &str = "TELEMETRY_API_URL";
pub const ENV_SHEETS_URL: &str = "GOOGLE_SHEETS_API_URL";
pub const ENV_SHEETS_ENABLED: &str = "GOOGLE_SHEETS_API_ENABLED";
pub const ENV_LOG_LEVEL: &str = "TELEMETRY_LOG_LEVEL";

/// Resolved configuration for both sides of the pipeline.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
    pub ndjson_dir: PathBuf,

    pub api_host: String,
    pub api_port: u16,
    /// Pinned to 1; any other value fails [`TelemetryConfig::from_env`].
    pub api_workers: u32,

    pub journal_mode: String,
    pub synchronous: String,
    pub busy_timeout_ms: u64,

    pub auth_enabled: bool,
    pub auth_token: Option<String>,
    pub rate_limit_enabled: bool,
    pub rate_limit_rpm: u32,

    /// Primary ingestion endpoint used by the client library.
    pub api_url: String,
    pub sheets_api_url: Option<String>,
    pub sheets_api_enabled: bool,

    pub log_level: String,
}

impl TelemetryConfig {
    /// Load from process environment. Fatal on invalid values.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Load via an arbitrary lookup function (tests pass a map).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_dir = match get(ENV_BASE_DIR) {
            Some(p) => PathBuf::from(p),
            None => default_base_dir()?,
        };

        let db_path = get(ENV_DB_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| base_dir.join("db").join("telemetry.sqlite"));
        let ndjson_dir = get(ENV_NDJSON_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| base_dir.join("raw"));

        let api_host = get(ENV_API_HOST).unwrap_or_else(|| "0.0.0.0".to_string());
        let api_port = parse_u16(ENV_API_PORT, get(ENV_API_PORT), 8765)?;

        let api_workers = parse_u32(ENV_API_WORKERS, get(ENV_API_WORKERS), 1)?;
        if api_workers != 1 {
            bail!(
                "{ENV_API_WORKERS}={api_workers} is invalid: the embedded store \
                 requires exactly one writer process (workers must be 1)"
            );
        }

        let journal_mode = get(ENV_JOURNAL_MODE)
            .unwrap_or_else(|| "DELETE".to_string())
            .to_ascii_uppercase();
        let synchronous = get(ENV_SYNCHRONOUS)
            .unwrap_or_else(|| "FULL".to_string())
            .to_ascii_uppercase();
        let busy_timeout_ms = parse_u64(ENV_BUSY_TIMEOUT_MS, get(ENV_BUSY_TIMEOUT_MS), 30_000)?;

        let auth_enabled = parse_bool(get(ENV_AUTH_ENABLED));
        let auth_token = get(ENV_AUTH_TOKEN).filter(|t| !t.is_empty());
        if auth_enabled && auth_token.is_none() {
            bail!("{ENV_AUTH_ENABLED} is set but {ENV_AUTH_TOKEN} is empty");
        }

        let rate_limit_enabled = parse_bool(get(ENV_RATE_LIMIT_ENABLED));
        let rate_limit_rpm = parse_u32(ENV_RATE_LIMIT_RPM, get(ENV_RATE_LIMIT_RPM), 120)?;
        if rate_limit_enabled && rate_limit_rpm == 0 {
            bail!("{ENV_RATE_LIMIT_RPM} must be > 0 when rate limiting is enabled");
        }

        let api_url = get(ENV_API_URL).unwrap_or_else(|| "http://127.0.0.1:8765".to_string());
        let sheets_api_url = get(ENV_SHEETS_URL).filter(|u| !u.is_empty());
        let sheets_api_enabled = parse_bool(get(ENV_SHEETS_ENABLED));

        let log_level = get(ENV_LOG_LEVEL).unwrap_or_else(|| "info".to_string());

        Ok(Self {
            base_dir,
            db_path,
            ndjson_dir,
            api_host,
            api_port,
            api_workers,
            journal_mode,
            synchronous,
            busy_timeout_ms,
            auth_enabled,
            auth_token,
            rate_limit_enabled,
            rate_limit_rpm,
            api_url,
            sheets_api_url,
            sheets_api_enabled,
            log_level,
        })
    }

    /// Socket address the ingestion service binds to.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid bind address {}:{} ({ENV_API_HOST}/{ENV_API_PORT})",
                    self.api_host, self.api_port
                )
            })
    }

    /// Writer lock path, kept beside the store file.
    pub fn lock_path(&self) -> PathBuf {
        let mut p = self.db_path.clone();
        p.set_extension("lock");
        p
    }
}

/// `$XDG_STATE_HOME/agenttrack`, falling back to `~/.local/state/agenttrack`.
fn default_base_dir() -> Result<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join("agenttrack"));
        }
    }
    let home = std::env::var("HOME")
        .map_err(|_| anyhow!("cannot resolve a base dir: set {ENV_BASE_DIR} or HOME"))?;
    Ok(PathBuf::from(home)
        .join(".local")
        .join("state")
        .join("agenttrack"))
}

fn parse_bool(v: Option<String>) -> bool {
    v.map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn parse_u16(name: &str, v: Option<String>, default: u16) -> Result<u16> {
    match v {
        None => Ok(default),
        Some(s) => s
            .parse::<u16>()
            .with_context(|| format!("{name}={s} is not a valid port")),
    }
}

fn parse_u32(name: &str, v: Option<String>, default: u32) -> Result<u32> {
    match v {
        None => Ok(default),
        Some(s) => s
            .parse::<u32>()
            .with_context(|| format!("{name}={s} is not a valid integer")),
    }
}

fn parse_u64(name: &str, v: Option<String>, default: u64) -> Result<u64> {
    match v {
        None => Ok(default),
        Some(s) => s
            .parse::<u64>()
            .with_context(|| format!("{name}={s} is not a valid integer")),
    }
}
