//! Runtime configuration from the environment
//!
//! API credentials and endpoint overrides come from environment variables,
//! optionally loaded from a `.env` file in the working directory.

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::data::{WeatherEndpoints, WeatherKeys, AIRPORT_DB_URL, VATSIM_DATA_URL};
use crate::refresh::DEFAULT_REFRESH_INTERVAL;

pub const ENV_AIRPORT_DB_TOKEN: &str = "AIRPORT_DB_TOKEN";
pub const ENV_CHECKWX_API_KEY: &str = "CHECKWX_API_KEY";
pub const ENV_OPENWEATHER_API_KEY: &str = "OPENWEATHER_API_KEY";
pub const ENV_REFRESH_MS: &str = "FLIGHTWATCH_REFRESH_MS";
pub const ENV_FEED_URL: &str = "FLIGHTWATCH_FEED_URL";
pub const ENV_AIRPORT_URL: &str = "FLIGHTWATCH_AIRPORT_URL";
pub const ENV_METAR_URL: &str = "FLIGHTWATCH_METAR_URL";

/// Refresh intervals below this are rejected
pub const MIN_REFRESH_MS: u64 = 1000;

/// Timeout applied to every upstream request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors in environment configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a whole number of milliseconds, got '{value}'")]
    InvalidNumber { var: String, value: String },

    #[error("{var} must be at least {min} ms, got {value} ms")]
    IntervalTooShort { var: String, value: u64, min: u64 },
}

/// Everything the app needs to reach its upstream sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub airport_db_token: Option<String>,
    pub weather_keys: WeatherKeys,
    pub refresh_interval: Duration,
    pub flight_feed_url: String,
    pub airport_db_url: String,
    pub weather_endpoints: WeatherEndpoints,
    pub request_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            airport_db_token: None,
            weather_keys: WeatherKeys::default(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            flight_feed_url: VATSIM_DATA_URL.to_string(),
            airport_db_url: AIRPORT_DB_URL.to_string(),
            weather_endpoints: WeatherEndpoints::default(),
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

/// Validates a refresh interval given in milliseconds
pub fn parse_refresh_ms(var: &str, raw: &str) -> Result<Duration, ConfigError> {
    let value: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var: var.to_string(),
        value: raw.to_string(),
    })?;
    if value < MIN_REFRESH_MS {
        return Err(ConfigError::IntervalTooShort {
            var: var.to_string(),
            value,
            min: MIN_REFRESH_MS,
        });
    }
    Ok(Duration::from_millis(value))
}

impl AppConfig {
    /// Loads `.env` if present, then reads the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => debug!(error = %e, "ignoring unreadable .env"),
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source; blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        config.airport_db_token = var(ENV_AIRPORT_DB_TOKEN);
        config.weather_keys = WeatherKeys {
            checkwx: var(ENV_CHECKWX_API_KEY),
            openweather: var(ENV_OPENWEATHER_API_KEY),
        };

        if let Some(raw) = var(ENV_REFRESH_MS) {
            config.refresh_interval = parse_refresh_ms(ENV_REFRESH_MS, &raw)?;
        }
        if let Some(url) = var(ENV_FEED_URL) {
            config.flight_feed_url = url;
        }
        if let Some(url) = var(ENV_AIRPORT_URL) {
            config.airport_db_url = url;
        }
        if let Some(url) = var(ENV_METAR_URL) {
            config.weather_endpoints.metar = url;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.refresh_interval, Duration::from_millis(15_000));
    }

    #[test]
    fn test_reads_keys_and_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("AIRPORT_DB_TOKEN", "adb"),
            ("CHECKWX_API_KEY", "cwx"),
            ("OPENWEATHER_API_KEY", "  "),
            ("FLIGHTWATCH_REFRESH_MS", "30000"),
            ("FLIGHTWATCH_FEED_URL", "http://localhost:8080/feed.json"),
        ]))
        .unwrap();

        assert_eq!(config.airport_db_token.as_deref(), Some("adb"));
        assert_eq!(config.weather_keys.checkwx.as_deref(), Some("cwx"));
        assert!(config.weather_keys.openweather.is_none());
        assert_eq!(config.refresh_interval, Duration::from_secs(30));
        assert_eq!(config.flight_feed_url, "http://localhost:8080/feed.json");
        assert_eq!(config.airport_db_url, AIRPORT_DB_URL);
    }

    #[test]
    fn test_rejects_short_interval() {
        let err = AppConfig::from_lookup(lookup(&[("FLIGHTWATCH_REFRESH_MS", "500")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::IntervalTooShort {
                var: ENV_REFRESH_MS.to_string(),
                value: 500,
                min: MIN_REFRESH_MS
            }
        );
    }

    #[test]
    fn test_rejects_non_numeric_interval() {
        let err = parse_refresh_ms(ENV_REFRESH_MS, "fast").unwrap_err();
        assert!(err.to_string().contains("fast"));
    }
}
