//! Process configuration.
//!
//! Values come from an optional `KEY=VALUE` file named by
//! `IAPOS_CONFIG_PATH`, overlaid with the process environment. Every key is
//! validated up front so a bad deployment fails at startup, not on the first
//! request.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use chrono::Duration;
use thiserror::Error;

use iapos_core::Money;
use iapos_observability::LogFormat;

pub const ERR_INVALID_CONFIG: &str = "ERR_INVALID_CONFIG";
pub const ERR_MISSING_SECRET: &str = "ERR_MISSING_SECRET";
pub const ERR_CONFIG_FILE: &str = "ERR_CONFIG_FILE";

const DEV_JWT_SECRET: &str = "iapos-development-secret-do-not-use-in-production";
const MIN_PRODUCTION_SECRET_LEN: usize = 32;
const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ConfigError {
    pub code: &'static str,
    pub message: String,
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            code: ERR_INVALID_CONFIG,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    pub session_ttl: Duration,
    pub cookie_secure: bool,
    /// Enables `auth.signIn`, the local stand-in for the external identity
    /// provider.
    pub dev_sign_in: bool,
    pub invitation_ttl: Duration,
    pub low_balance_threshold: Money,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("IAPOS_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                merged.extend(parse_env_file(config_path)?);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let environment = match value(kv, "IAPOS_ENV").or_else(|| value(kv, "NODE_ENV")) {
            None => Environment::Development,
            Some("development" | "dev" | "test") => Environment::Development,
            Some("production" | "prod") => Environment::Production,
            Some(other) => {
                return Err(ConfigError::invalid(format!(
                    "IAPOS_ENV must be development or production (got '{other}')"
                )));
            }
        };
        let production = environment.is_production();

        let bind_addr = match value(kv, "IAPOS_BIND_ADDR") {
            Some(v) => v.parse::<SocketAddr>().map_err(|_| {
                ConfigError::invalid("IAPOS_BIND_ADDR must be a valid host:port socket address")
            })?,
            None => {
                let port = parse_u16(value(kv, "PORT"), DEFAULT_PORT, "PORT")?;
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
            }
        };

        let jwt_secret = match value(kv, "JWT_SECRET") {
            Some(secret) => secret.to_string(),
            None if production => {
                return Err(ConfigError {
                    code: ERR_MISSING_SECRET,
                    message: "JWT_SECRET is required in production".to_string(),
                });
            }
            None => DEV_JWT_SECRET.to_string(),
        };
        if production && jwt_secret.len() < MIN_PRODUCTION_SECRET_LEN {
            return Err(ConfigError::invalid(format!(
                "JWT_SECRET must be at least {MIN_PRODUCTION_SECRET_LEN} bytes in production"
            )));
        }

        let session_ttl_days = parse_days(kv, "IAPOS_SESSION_TTL_DAYS", 365)?;
        let invitation_ttl_days = parse_days(kv, "IAPOS_INVITATION_TTL_DAYS", 7)?;

        let cookie_secure = parse_bool(kv, "IAPOS_COOKIE_SECURE", production)?;
        let dev_sign_in = parse_bool(kv, "IAPOS_DEV_SIGN_IN", !production)?;
        if production && dev_sign_in {
            return Err(ConfigError::invalid(
                "IAPOS_DEV_SIGN_IN cannot be enabled in production",
            ));
        }

        let low_balance_threshold = match value(kv, "IAPOS_LOW_BALANCE_THRESHOLD") {
            None => Money::from_reais(50),
            Some(v) => v
                .parse::<Money>()
                .ok()
                .filter(|m| !m.is_negative())
                .ok_or_else(|| {
                    ConfigError::invalid(
                        "IAPOS_LOW_BALANCE_THRESHOLD must be a non-negative amount like 50.00",
                    )
                })?,
        };

        let log_format = match value(kv, "IAPOS_LOG_FORMAT") {
            None => LogFormat::Json,
            Some(v) => v.parse::<LogFormat>().map_err(|e| ConfigError::invalid(e))?,
        };

        Ok(Self {
            environment,
            bind_addr,
            jwt_secret,
            database_url: value(kv, "DATABASE_URL").map(str::to_string),
            session_ttl: Duration::days(session_ttl_days),
            cookie_secure,
            dev_sign_in,
            invitation_ttl: Duration::days(invitation_ttl_days),
            low_balance_threshold,
            log_format,
        })
    }
}

/// Trimmed, non-empty value for `key`.
fn value<'a>(kv: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    kv.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_u16(value: Option<&str>, default: u16, key: &'static str) -> Result<u16, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v
            .parse::<u16>()
            .map_err(|_| ConfigError::invalid(format!("{key} must be a port number"))),
    }
}

fn parse_days(kv: &HashMap<String, String>, key: &'static str, default: i64) -> Result<i64, ConfigError> {
    match value(kv, key) {
        None => Ok(default),
        Some(v) => match v.parse::<i64>() {
            Ok(days) if (1..=3650).contains(&days) => Ok(days),
            _ => Err(ConfigError::invalid(format!(
                "{key} must be a whole number of days between 1 and 3650"
            ))),
        },
    }
}

fn parse_bool(kv: &HashMap<String, String>, key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match value(kv, key) {
        None => Ok(default),
        Some("1" | "true" | "TRUE" | "yes" | "YES") => Ok(true),
        Some("0" | "false" | "FALSE" | "no" | "NO") => Ok(false),
        Some(_) => Err(ConfigError::invalid(format!("{key} must be true or false"))),
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError {
        code: ERR_CONFIG_FILE,
        message: format!("cannot read {path}: {e}"),
    })?;
    parse_env_lines(&contents)
}

/// Dotenv-style lines: `KEY=VALUE`, optional `export ` prefix, `#` comments,
/// values optionally wrapped in matching quotes.
fn parse_env_lines(contents: &str) -> Result<HashMap<String, String>, ConfigError> {
    let bad_line = |n: usize, why: &str| ConfigError {
        code: ERR_CONFIG_FILE,
        message: format!("line {n}: {why}"),
    };

    contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(n, line)| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, raw) = line.split_once('=').ok_or_else(|| bad_line(n, "expected KEY=VALUE"))?;
            let key = key.trim();
            if key.is_empty() || key.contains(char::is_whitespace) {
                return Err(bad_line(n, "invalid key"));
            }
            Ok((key.to_string(), unquote(raw.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|q| value.strip_prefix(q)?.strip_suffix(q))
        .unwrap_or(value)
}
