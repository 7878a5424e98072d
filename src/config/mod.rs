//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::game::tuning::{Tuning, TuningError};

/// Hard ceiling for `CROSSLINE_MAX_BODY_BYTES`
pub const MAX_BODY_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Allowed CORS origins
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error), used when RUST_LOG is unset
    pub log_level: String,
    pub log_format: LogFormat,

    pub cors_origins: CorsOrigins,
    pub max_body_bytes: usize,
    /// Root of the static client files
    pub static_dir: PathBuf,

    /// Empty non-persistent rooms idle this long are removed
    pub room_idle: Duration,
    pub prune_interval: Duration,
    /// Outbound frames queued per socket before it is closed
    pub max_backpressure: usize,

    pub tuning: Tuning,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            cors_origins: CorsOrigins::Any,
            max_body_bytes: 64 * 1024,
            static_dir: PathBuf::from("public"),
            room_idle: Duration::from_secs(300),
            prune_interval: Duration::from_secs(60),
            max_backpressure: 256,
            tuning: Tuning::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup (environment, or a map in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match (lookup("PORT"), lookup("SERVER_ADDR")) {
            (Some(port), _) => Some(format!("0.0.0.0:{}", port.trim())),
            (None, Some(addr)) => Some(addr),
            (None, None) => None,
        };
        if let Some(addr) = server_addr {
            config.server_addr = addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress(addr))?;
        }

        if let Some(level) = lookup("LOG_LEVEL").filter(|l| !l.trim().is_empty()) {
            config.log_level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            config.log_format = if format.eq_ignore_ascii_case("json") {
                LogFormat::Json
            } else {
                LogFormat::Text
            };
        }

        if let Some(origins) = lookup("CROSSLINE_CORS_ORIGIN") {
            config.cors_origins = parse_origins(&origins);
        }

        if let Some(bytes) = parse_number::<usize>(&lookup, "CROSSLINE_MAX_BODY_BYTES") {
            if bytes == 0 {
                warn!("CROSSLINE_MAX_BODY_BYTES must be > 0, using default");
            } else if bytes > MAX_BODY_LIMIT {
                warn!(bytes, cap = MAX_BODY_LIMIT, "CROSSLINE_MAX_BODY_BYTES too large, capping");
                config.max_body_bytes = MAX_BODY_LIMIT;
            } else {
                config.max_body_bytes = bytes;
            }
        }

        if let Some(dir) = lookup("CROSSLINE_STATIC_DIR").filter(|d| !d.trim().is_empty()) {
            config.static_dir = PathBuf::from(dir);
        }

        if let Some(secs) = positive::<u64>(&lookup, "CROSSLINE_ROOM_IDLE_SECS") {
            config.room_idle = Duration::from_secs(secs);
        }
        if let Some(secs) = positive::<u64>(&lookup, "CROSSLINE_PRUNE_INTERVAL_SECS") {
            config.prune_interval = Duration::from_secs(secs);
        }
        if let Some(frames) = positive::<usize>(&lookup, "CROSSLINE_MAX_BACKPRESSURE") {
            config.max_backpressure = frames;
        }

        if let Some(path) = lookup("CROSSLINE_TUNING_FILE").filter(|p| !p.trim().is_empty()) {
            config.tuning = load_tuning(&path)?;
        }

        Ok(config)
    }
}

fn parse_origins(raw: &str) -> CorsOrigins {
    let origins: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        CorsOrigins::Any
    } else {
        CorsOrigins::List(origins)
    }
}

/// Parse a numeric variable, warning and ignoring it when malformed
fn parse_number<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let value = parse_number::<T>(lookup, key)?;
    if value > T::default() {
        Some(value)
    } else {
        warn!("{} must be > 0, using default", key);
        None
    }
}

fn load_tuning(path: &str) -> Result<Tuning, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::TuningFile {
        path: path.to_string(),
        source,
    })?;
    let tuning: Tuning = serde_json::from_str(&raw).map_err(|source| ConfigError::TuningParse {
        path: path.to_string(),
        source,
    })?;
    tuning.validate()?;
    Ok(tuning)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address '{0}'")]
    InvalidAddress(String),

    #[error("Cannot read tuning file {path}: {source}")]
    TuningFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse tuning file {path}: {source}")]
    TuningParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid tuning: {0}")]
    InvalidTuning(#[from] TuningError),
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
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.server_addr.port(), 3000);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.cors_origins, CorsOrigins::Any);
        assert_eq!(config.max_body_bytes, 65536);
        assert_eq!(config.room_idle, Duration::from_secs(300));
        assert_eq!(config.max_backpressure, 256);
    }

    #[test]
    fn test_port_wins_over_server_addr() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "4100"),
            ("SERVER_ADDR", "127.0.0.1:9000"),
        ]))
        .unwrap();
        assert_eq!(config.server_addr.port(), 4100);

        let config = Config::from_lookup(lookup(&[("SERVER_ADDR", "127.0.0.1:9000")])).unwrap();
        assert_eq!(config.server_addr.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn test_bad_address_is_an_error() {
        let err = Config::from_lookup(lookup(&[("SERVER_ADDR", "nowhere")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress(_)));
    }

    #[test]
    fn test_bad_numbers_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("CROSSLINE_ROOM_IDLE_SECS", "soon"),
            ("CROSSLINE_MAX_BACKPRESSURE", "0"),
            ("CROSSLINE_MAX_BODY_BYTES", "999999999"),
        ]))
        .unwrap();
        assert_eq!(config.room_idle, Duration::from_secs(300));
        assert_eq!(config.max_backpressure, 256);
        assert_eq!(config.max_body_bytes, MAX_BODY_LIMIT);
    }

    #[test]
    fn test_cors_and_log_format() {
        let config = Config::from_lookup(lookup(&[
            ("CROSSLINE_CORS_ORIGIN", "https://a.example, https://b.example"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();
        assert_eq!(
            config.cors_origins,
            CorsOrigins::List(vec![
                "https://a.example".to_string(),
                "https://b.example".to_string()
            ])
        );
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_tuning_file() {
        let path = std::env::temp_dir().join(format!("crossline-tuning-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "dash_distance": 136, "shield_max_charge": 3334 }"#).unwrap();
        let config = Config::from_lookup(lookup(&[(
            "CROSSLINE_TUNING_FILE",
            path.to_str().unwrap(),
        )]))
        .unwrap();
        assert_eq!(config.tuning.dash_distance, 136.0);
        assert_eq!(config.tuning.shield_max_charge, 3334.0);

        std::fs::write(&path, r#"{ "tick_rate": 0 }"#).unwrap();
        let err = Config::from_lookup(lookup(&[(
            "CROSSLINE_TUNING_FILE",
            path.to_str().unwrap(),
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTuning(_)));
        let _ = std::fs::remove_file(&path);

        let err = Config::from_lookup(lookup(&[("CROSSLINE_TUNING_FILE", "/nonexistent/t.json")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::TuningFile { .. }));
    }
}
