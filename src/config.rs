//! Process-wide application configuration.
//!
//! Loaded once at startup from built-in defaults, an optional YAML file, and
//! `PITCHGRID_*` environment variable overrides (ascending priority, in that order).
//! The resulting [`AppConfig`] is immutable and threaded explicitly through
//! constructors — there is no global singleton.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Immutable, process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Name advertised for the virtual MIDI output port.
    pub virtual_midi_output_name: String,
    /// Directory containing controller descriptor YAML files.
    pub controller_config_dir: PathBuf,
    /// Seconds between controller-port discovery scans.
    pub discovery_interval_seconds: f64,
    /// Host the tuning-feed OSC listener binds to (transport itself is out of scope).
    pub osc_host: String,
    /// Port the tuning-feed OSC listener binds to.
    pub osc_port: u16,
    /// `log`-crate level filter, e.g. "info", "debug".
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            virtual_midi_output_name: "PitchGrid Mapper".to_string(),
            controller_config_dir: default_controller_config_dir(),
            discovery_interval_seconds: 3.0,
            osc_host: "127.0.0.1".to_string(),
            osc_port: 34561,
            log_level: "info".to_string(),
        }
    }
}

/// `~/.config/pitchgrid-mapper/controllers` (or platform equivalent) if resolvable,
/// else a relative `./controllers` fallback so the process still starts.
fn default_controller_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("pitchgrid-mapper").join("controllers"))
        .unwrap_or_else(|| PathBuf::from("controllers"))
}

/// `~/.config/pitchgrid-mapper/config.yaml` (or platform equivalent) if resolvable.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pitchgrid-mapper").join("config.yaml"))
}

impl AppConfig {
    /// Load defaults, overlay an optional YAML file, then overlay `PITCHGRID_*` env vars.
    ///
    /// A missing or unreadable file is not an error: defaults are used and the
    /// condition is logged, matching how the rest of the system treats missing
    /// optional configuration (see the controller-descriptor loader).
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = match path {
            Some(p) => load_from_file(p).unwrap_or_else(|err| {
                log::warn!("could not load config from {}: {err}; using defaults", p.display());
                Self::default()
            }),
            None => Self::default(),
        };
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PITCHGRID_VIRTUAL_MIDI_OUTPUT_NAME") {
            self.virtual_midi_output_name = v;
        }
        if let Ok(v) = std::env::var("PITCHGRID_CONTROLLER_CONFIG_DIR") {
            self.controller_config_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PITCHGRID_DISCOVERY_INTERVAL_SECONDS") {
            if let Ok(parsed) = v.parse() {
                self.discovery_interval_seconds = parsed;
            }
        }
        if let Ok(v) = std::env::var("PITCHGRID_OSC_HOST") {
            self.osc_host = v;
        }
        if let Ok(v) = std::env::var("PITCHGRID_OSC_PORT") {
            if let Ok(parsed) = v.parse() {
                self.osc_port = parsed;
            }
        }
        if let Ok(v) = std::env::var("PITCHGRID_LOG_LEVEL") {
            self.log_level = v;
        }
    }
}

fn load_from_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = AppConfig::default();
        assert_eq!(config.virtual_midi_output_name, "PitchGrid Mapper");
        assert_eq!(config.discovery_interval_seconds, 3.0);
        assert_eq!(config.osc_port, 34561);
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load(Some(Path::new("/nonexistent/pitchgrid-config.yaml")));
        assert_eq!(config.virtual_midi_output_name, "PitchGrid Mapper");
    }
}
