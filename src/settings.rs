//! Persisted user preferences
//!
//! Settings live in `settings.json` under the platform config directory
//! (`~/.config/flightwatch/` on Linux). They are loaded once at startup, passed
//! by reference to whatever needs them, and saved by the app whenever the user
//! changes one.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const SETTINGS_FILE: &str = "settings.json";

/// Errors that can occur when saving settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to write settings to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Which weather layers to populate when weather is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherLayers {
    pub metars: bool,
    pub radar: bool,
    pub wind: bool,
    pub fronts: bool,
}

impl Default for WeatherLayers {
    fn default() -> Self {
        Self {
            metars: true,
            radar: true,
            wind: true,
            fronts: true,
        }
    }
}

impl WeatherLayers {
    pub fn any(&self) -> bool {
        self.metars || self.radar || self.wind || self.fronts
    }

    pub fn all(&self) -> bool {
        self.metars && self.radar && self.wind && self.fronts
    }
}

/// Layer visibility toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerSettings {
    pub airports: bool,
    pub weather: bool,
    /// Track the user's own flight across refreshes
    pub flight_path: bool,
    pub weather_layers: WeatherLayers,
}

impl Default for LayerSettings {
    fn default() -> Self {
        Self {
            airports: true,
            weather: false,
            flight_path: true,
            weather_layers: WeatherLayers::default(),
        }
    }
}

/// Everything the user can configure from inside the app
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub layers: LayerSettings,
    /// Callsign of the user's own flight, tracked across refreshes
    pub user_callsign: Option<String>,
}

impl UserSettings {
    /// True when weather should be fetched at all
    pub fn shows_weather(&self) -> bool {
        self.layers.weather && self.layers.weather_layers.any()
    }

    pub fn toggle_airports(&mut self) {
        self.layers.airports = !self.layers.airports;
    }

    pub fn toggle_weather(&mut self) {
        self.layers.weather = !self.layers.weather;
    }

    /// Sets the tracked callsign; blank input clears it
    pub fn set_user_callsign(&mut self, callsign: &str) {
        let callsign = callsign.trim();
        self.user_callsign = (!callsign.is_empty()).then(|| callsign.to_uppercase());
    }
}

/// Loads and saves [`UserSettings`] as JSON
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Creates a store in the platform config directory
    ///
    /// Returns `None` if the directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "flightwatch")?;
        Some(Self::with_path(project_dirs.config_dir().join(SETTINGS_FILE)))
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads settings, falling back to defaults when the file is missing or unreadable
    pub fn load(&self) -> UserSettings {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no settings file, using defaults");
                return UserSettings::default();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read settings");
                return UserSettings::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "corrupt settings file, using defaults");
            UserSettings::default()
        })
    }

    /// Writes settings through a temporary file and a rename
    pub fn save(&self, settings: &UserSettings) -> Result<(), SettingsError> {
        let io_error = |source: std::io::Error| SettingsError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }

        let json = serde_json::to_string_pretty(settings)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_error)?;
        fs::rename(&tmp, &self.path).map_err(io_error)?;
        Ok(())
    }
}
