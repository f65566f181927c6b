//! Command-line interface parsing for flightwatch
//!
//! This module handles parsing of CLI arguments using clap and turns them into
//! a validated [`StartupConfig`].

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::config::{parse_refresh_ms, ConfigError};

/// Error types for CLI argument parsing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    /// The airport code is not a 3-4 character ICAO identifier
    #[error("Invalid airport code: '{0}'. Expected an ICAO code such as KJFK or EGLL")]
    InvalidAirport(String),

    /// The refresh interval is not acceptable
    #[error("Invalid refresh interval: {0}")]
    InvalidInterval(#[from] ConfigError),

    /// The callsign is blank
    #[error("Callsign must not be empty")]
    EmptyCallsign,
}

/// flightwatch - live VATSIM traffic with cached airport and weather data
#[derive(Parser, Debug)]
#[command(name = "flightwatch")]
#[command(about = "Live VATSIM traffic, airports and weather in the terminal")]
#[command(version)]
pub struct Cli {
    /// Refresh once, print a summary and exit instead of starting the UI
    #[arg(long)]
    pub once: bool,

    /// With --once, print arrivals and departures for this airport
    ///
    /// Examples:
    ///   flightwatch --once                # Summary of the busiest airports
    ///   flightwatch --once --airport KJFK # Traffic at New York JFK
    #[arg(long, value_name = "ICAO", requires = "once")]
    pub airport: Option<String>,

    /// Minimum time between flight feed refreshes, in milliseconds (>= 1000)
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<String>,

    /// Directory for cached airport and weather data
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Only refresh when asked with `r`
    #[arg(long)]
    pub no_auto_refresh: bool,

    /// Track this flight and keep its position trail
    #[arg(long, value_name = "CALLSIGN")]
    pub callsign: Option<String>,
}

/// Configuration derived from CLI arguments for application startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupConfig {
    /// Run a single refresh and print instead of starting the UI
    pub once: bool,
    /// Airport to report on in --once mode
    pub airport: Option<String>,
    /// Overrides the configured refresh interval
    pub refresh_interval: Option<Duration>,
    pub cache_dir: Option<PathBuf>,
    pub auto_refresh: bool,
    /// Overrides the saved callsign
    pub callsign: Option<String>,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            once: false,
            airport: None,
            refresh_interval: None,
            cache_dir: None,
            auto_refresh: true,
            callsign: None,
        }
    }
}

/// Normalizes and validates an airport code argument.
///
/// # Returns
/// * `Ok(String)` - the uppercase code
/// * `Err(CliError::InvalidAirport)` - if it is not 3-4 ASCII letters or digits
pub fn parse_airport_arg(s: &str) -> Result<String, CliError> {
    let code = s.trim().to_uppercase();
    if (3..=4).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(code)
    } else {
        Err(CliError::InvalidAirport(s.to_string()))
    }
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with appropriate settings
    /// * `Err(CliError)` if an argument is invalid
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let airport = cli.airport.as_deref().map(parse_airport_arg).transpose()?;

        let refresh_interval = cli
            .interval_ms
            .as_deref()
            .map(|raw| parse_refresh_ms("--interval-ms", raw))
            .transpose()?;

        let callsign = match cli.callsign.as_deref().map(str::trim) {
            Some("") => return Err(CliError::EmptyCallsign),
            Some(callsign) => Some(callsign.to_uppercase()),
            None => None,
        };

        Ok(StartupConfig {
            once: cli.once,
            airport,
            refresh_interval,
            cache_dir: cli.cache_dir.clone(),
            auto_refresh: !cli.no_auto_refresh,
            callsign,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_airport_arg_uppercases() {
        assert_eq!(parse_airport_arg("kjfk").unwrap(), "KJFK");
        assert_eq!(parse_airport_arg(" EGLL ").unwrap(), "EGLL");
        assert_eq!(parse_airport_arg("Y42").unwrap(), "Y42");
    }

    #[test]
    fn test_parse_airport_arg_invalid() {
        for bad in ["", "KJ", "KJFKX", "K-FK"] {
            let err = parse_airport_arg(bad).unwrap_err();
            assert!(err.to_string().contains("Invalid airport code"));
        }
    }

    #[test]
    fn test_cli_parse_no_args() {
        let cli = Cli::parse_from(["flightwatch"]);
        assert!(!cli.once);
        assert!(cli.airport.is_none());
        assert!(!cli.no_auto_refresh);
    }

    #[test]
    fn test_cli_airport_requires_once() {
        assert!(Cli::try_parse_from(["flightwatch", "--airport", "KJFK"]).is_err());
        assert!(Cli::try_parse_from(["flightwatch", "--once", "--airport", "KJFK"]).is_ok());
    }

    #[test]
    fn test_startup_config_default() {
        let config = StartupConfig::from_cli(&Cli::parse_from(["flightwatch"])).unwrap();
        assert_eq!(config, StartupConfig::default());
        assert!(config.auto_refresh);
    }

    #[test]
    fn test_startup_config_from_full_cli() {
        let cli = Cli::parse_from([
            "flightwatch",
            "--once",
            "--airport",
            "egll",
            "--interval-ms",
            "20000",
            "--cache-dir",
            "/tmp/fw",
            "--no-auto-refresh",
            "--callsign",
            "baw123",
        ]);

        let config = StartupConfig::from_cli(&cli).unwrap();

        assert!(config.once);
        assert_eq!(config.airport.as_deref(), Some("EGLL"));
        assert_eq!(config.refresh_interval, Some(Duration::from_secs(20)));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/fw")));
        assert!(!config.auto_refresh);
        assert_eq!(config.callsign.as_deref(), Some("BAW123"));
    }

    #[test]
    fn test_startup_config_rejects_short_interval() {
        let cli = Cli::parse_from(["flightwatch", "--interval-ms", "999"]);
        let err = StartupConfig::from_cli(&cli).unwrap_err();
        assert!(matches!(err, CliError::InvalidInterval(_)));
        assert!(err.to_string().contains("at least 1000 ms"));
    }

    #[test]
    fn test_startup_config_rejects_blank_callsign() {
        let cli = Cli::parse_from(["flightwatch", "--callsign", "  "]);
        assert_eq!(StartupConfig::from_cli(&cli), Err(CliError::EmptyCallsign));
    }
}
