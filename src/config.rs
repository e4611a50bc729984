//! Application Configuration
//!
//! Reads the server settings from the process environment (optionally
//! seeded from a `.env` file by the binary).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default inference endpoint used when `BACKEND_URL` is unset.
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:3001/backend/api/send";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings for the relay task of a single chat turn.
#[derive(Debug, Clone, Copy)]
pub struct RelayTimeouts {
    /// Upper bound for the upstream to answer the request.
    pub first_byte: Duration,
    /// Upper bound between two upstream reads.
    pub idle: Duration,
}

impl Default for RelayTimeouts {
    fn default() -> Self {
        Self {
            first_byte: Duration::from_secs(30),
            idle: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
    pub session_secret: String,
    pub backend_url: String,
    /// Public base URL, used to build password reset links.
    pub app_url: String,
    pub cookie_secure: bool,
    pub relay: RelayTimeouts,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = match get("BIND_ADDR") {
            Some(raw) => raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                name: "BIND_ADDR",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 3000)),
        };

        let session_secret = get("SESSION_SECRET").ok_or(ConfigError::Missing("SESSION_SECRET"))?;

        let defaults = RelayTimeouts::default();
        let relay = RelayTimeouts {
            first_byte: parse_secs(get("RELAY_FIRST_BYTE_TIMEOUT_SECS"), "RELAY_FIRST_BYTE_TIMEOUT_SECS", defaults.first_byte)?,
            idle: parse_secs(get("RELAY_IDLE_TIMEOUT_SECS"), "RELAY_IDLE_TIMEOUT_SECS", defaults.idle)?,
        };

        let cookie_secure = match get("COOKIE_SECURE") {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "COOKIE_SECURE",
                        value: raw,
                        reason: "expected true or false".to_string(),
                    })
                }
            },
            None => false,
        };

        Ok(Self {
            bind_addr,
            database_path: get("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("support_chat.db")),
            session_secret,
            backend_url: get("BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            app_url: get("APP_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            cookie_secure,
            relay,
            log_dir: get("LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_secs(raw: Option<String>, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(0) | Err(_) => Err(ConfigError::Invalid {
                name,
                value: raw,
                reason: "expected a positive number of seconds".to_string(),
            }),
            Ok(secs) => Ok(Duration::from_secs(secs)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[("SESSION_SECRET", "s3cret")])).unwrap();
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
        assert_eq!(config.relay.first_byte, Duration::from_secs(30));
        assert_eq!(config.relay.idle, Duration::from_secs(60));
        assert!(!config.cookie_secure);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_missing_secret() {
        let err = AppConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SESSION_SECRET")));
    }

    #[test]
    fn test_invalid_timeout() {
        let err = AppConfig::from_lookup(lookup(&[
            ("SESSION_SECRET", "x"),
            ("RELAY_IDLE_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "RELAY_IDLE_TIMEOUT_SECS", .. }));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("SESSION_SECRET", "x"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("APP_URL", "https://chat.example.com/"),
            ("COOKIE_SECURE", "true"),
            ("RELAY_FIRST_BYTE_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.app_url, "https://chat.example.com");
        assert!(config.cookie_secure);
        assert_eq!(config.relay.first_byte, Duration::from_secs(5));
    }
}
