//! Service Configuration Settings
//!
//! Configuration types for the currency service, loaded from environment
//! variables. Every variable is optional; unparseable numbers fall back to
//! their defaults, while values that parse but make no sense are rejected.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;

use crate::application::services::SessionSettings;
use crate::domain::currency::Currency;

/// Upper bound for `CURRENCY_RATE_INTERVAL_SECS` (one day).
pub const MAX_INTERVAL_SECS: u64 = 86_400;

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// gRPC server port.
    pub grpc_port: u16,
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            grpc_port: 9092,
            health_port: 8083,
        }
    }
}

/// Simulated rate source settings.
#[derive(Debug, Clone)]
pub struct RateSettings {
    /// Refresh cadence; one tick per refresh.
    pub interval: Duration,
    /// Maximum relative change per refresh, in `[0, 1)`.
    pub jitter: f64,
    /// Optional JSON file of EUR-based reference rates.
    pub rates_file: Option<PathBuf>,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            jitter: 0.1,
            rates_file: None,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Rate source settings.
    pub rates: RateSettings,
    /// Per-session settings.
    pub sessions: SessionSettings,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range.
    pub fn from_vars<F>(vars: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            grpc_port: parse_var(&vars, "CURRENCY_GRPC_PORT", server_defaults.grpc_port),
            health_port: parse_var(&vars, "CURRENCY_HEALTH_PORT", server_defaults.health_port),
        };

        let rate_defaults = RateSettings::default();
        let interval_secs = parse_var(
            &vars,
            "CURRENCY_RATE_INTERVAL_SECS",
            rate_defaults.interval.as_secs(),
        );
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CURRENCY_RATE_INTERVAL_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if interval_secs > MAX_INTERVAL_SECS {
            return Err(ConfigError::InvalidValue {
                key: "CURRENCY_RATE_INTERVAL_SECS",
                reason: format!("must be at most {MAX_INTERVAL_SECS}"),
            });
        }

        let jitter = parse_var(&vars, "CURRENCY_RATE_JITTER", rate_defaults.jitter);
        if !(0.0..1.0).contains(&jitter) {
            return Err(ConfigError::InvalidValue {
                key: "CURRENCY_RATE_JITTER",
                reason: format!("{jitter} is outside [0, 1)"),
            });
        }

        let rates = RateSettings {
            interval: Duration::from_secs(interval_secs),
            jitter,
            rates_file: vars("CURRENCY_RATES_FILE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        };

        let session_defaults = SessionSettings::default();
        let queue_capacity = parse_var(
            &vars,
            "CURRENCY_SESSION_QUEUE_CAPACITY",
            session_defaults.queue_capacity,
        );
        if queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CURRENCY_SESSION_QUEUE_CAPACITY",
                reason: "must be greater than zero".to_string(),
            });
        }

        let sessions = SessionSettings {
            queue_capacity,
            max_send_failures: parse_var(
                &vars,
                "CURRENCY_MAX_SEND_FAILURES",
                session_defaults.max_send_failures,
            ),
        };

        Ok(Self {
            server,
            rates,
            sessions,
        })
    }
}

/// Load EUR-based reference rates from a JSON object such as
/// `{"USD": "1.0856", "JPY": "161.12"}`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, names an unknown
/// currency, or holds a non-positive rate.
pub fn load_reference_rates(path: &Path) -> Result<HashMap<Currency, Decimal>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::RatesFile {
        path: path.to_path_buf(),
        source,
    })?;

    let raw: HashMap<String, Decimal> =
        serde_json::from_str(&contents).map_err(|source| ConfigError::RatesFormat {
            path: path.to_path_buf(),
            source,
        })?;

    raw.into_iter()
        .map(|(code, rate)| {
            let currency = code
                .parse::<Currency>()
                .map_err(|_| ConfigError::UnknownCurrency(code.clone()))?;
            if rate <= Decimal::ZERO {
                return Err(ConfigError::InvalidValue {
                    key: "CURRENCY_RATES_FILE",
                    reason: format!("rate for {currency} must be positive"),
                });
            }
            Ok((currency, rate))
        })
        .collect()
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable parsed but is out of range.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// The rates file could not be read.
    #[error("unable to read rates file {}: {source}", .path.display())]
    RatesFile {
        /// File path.
        path: PathBuf,
        /// I/O failure.
        source: std::io::Error,
    },
    /// The rates file is not a JSON object of code to rate.
    #[error("invalid rates file {}: {source}", .path.display())]
    RatesFormat {
        /// File path.
        path: PathBuf,
        /// Parse failure.
        source: serde_json::Error,
    },
    /// The rates file names a currency outside the enumerated set.
    #[error("unknown currency in rates file: {0}")]
    UnknownCurrency(String),
}

fn parse_var<F, T>(vars: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    vars(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use test_case::test_case;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.server.grpc_port, 9092);
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.rates.interval, Duration::from_secs(5));
        assert!((config.rates.jitter - 0.1).abs() < f64::EPSILON);
        assert!(config.rates.rates_file.is_none());
        assert_eq!(config.sessions.queue_capacity, 64);
        assert_eq!(config.sessions.max_send_failures, 0);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("CURRENCY_GRPC_PORT", "50051"),
            ("CURRENCY_HEALTH_PORT", "9000"),
            ("CURRENCY_RATE_INTERVAL_SECS", "1"),
            ("CURRENCY_RATE_JITTER", "0.25"),
            ("CURRENCY_SESSION_QUEUE_CAPACITY", "8"),
            ("CURRENCY_MAX_SEND_FAILURES", "3"),
            ("CURRENCY_RATES_FILE", "/etc/rates.json"),
        ])
        .unwrap();

        assert_eq!(config.server.grpc_port, 50051);
        assert_eq!(config.server.health_port, 9000);
        assert_eq!(config.rates.interval, Duration::from_secs(1));
        assert!((config.rates.jitter - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.sessions.queue_capacity, 8);
        assert_eq!(config.sessions.max_send_failures, 3);
        assert_eq!(
            config.rates.rates_file,
            Some(PathBuf::from("/etc/rates.json"))
        );
    }

    #[test]
    fn unparseable_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("CURRENCY_GRPC_PORT", "not-a-port"),
            ("CURRENCY_RATE_INTERVAL_SECS", "-3"),
        ])
        .unwrap();

        assert_eq!(config.server.grpc_port, 9092);
        assert_eq!(config.rates.interval, Duration::from_secs(5));
    }

    #[test_case("CURRENCY_RATE_INTERVAL_SECS", "0")]
    #[test_case("CURRENCY_RATE_INTERVAL_SECS", "86401")]
    #[test_case("CURRENCY_RATE_INTERVAL_SECS", "18446744073709551615")]
    #[test_case("CURRENCY_SESSION_QUEUE_CAPACITY", "0")]
    #[test_case("CURRENCY_RATE_JITTER", "1.0")]
    #[test_case("CURRENCY_RATE_JITTER", "-0.1")]
    fn out_of_range_values_are_rejected(key: &str, value: &str) {
        let err = config_from(&[(key, value)]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: k, .. } if k == key));
    }

    #[test]
    fn reference_rates_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"USD": "1.0856", "jpy": "161.12"}}"#).unwrap();

        let rates = load_reference_rates(file.path()).unwrap();

        assert_eq!(rates.len(), 2);
        assert_eq!(rates[&Currency::Usd], "1.0856".parse::<Decimal>().unwrap());
        assert_eq!(rates[&Currency::Jpy], "161.12".parse::<Decimal>().unwrap());
    }

    #[test]
    fn reference_rates_reject_unknown_currency() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"XYZ": "1.5"}}"#).unwrap();

        let err = load_reference_rates(file.path()).unwrap_err();

        assert!(matches!(err, ConfigError::UnknownCurrency(code) if code == "XYZ"));
    }

    #[test]
    fn reference_rates_reject_non_positive_rate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"USD": "0"}}"#).unwrap();

        let err = load_reference_rates(file.path()).unwrap_err();

        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn missing_rates_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_reference_rates(&dir.path().join("missing.json")).unwrap_err();

        assert!(matches!(err, ConfigError::RatesFile { .. }));
    }

    #[test]
    fn malformed_rates_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[1, 2, 3]").unwrap();

        let err = load_reference_rates(file.path()).unwrap_err();

        assert!(matches!(err, ConfigError::RatesFormat { .. }));
    }
}
