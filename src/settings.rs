use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::{HostPreference, WindowOrder, DEFAULT_CAPACITY};

/// Returns the path to the settings file: `~/.config/dsp-passthru/settings.json`
pub fn settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("dsp-passthru");
    path.push("settings.json");
    path
}

/// Persisted client settings.
///
/// Serialized as JSON to the platform config directory.
/// Fields use `#[serde(default)]` so that adding new settings
/// won't break existing config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    // Session
    pub client_name: String,
    pub host: HostPreference,
    pub period_frames: Option<u32>,
    pub playback_ports: usize,
    pub capture_ports: usize,

    // File playback
    pub buffer_capacity: usize,
    pub window_order: WindowOrder,
    pub file_poll_ms: u64,

    // Capture
    pub capture_poll_ms: u64,
    pub capture_bridge_samples: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            client_name: "simple".to_string(),
            host: HostPreference::default(),
            period_frames: None,
            playback_ports: 2,
            capture_ports: 2,

            buffer_capacity: DEFAULT_CAPACITY,
            window_order: WindowOrder::default(),
            file_poll_ms: 1,

            capture_poll_ms: 250,
            capture_bridge_samples: 1 << 14,
        }
    }
}

impl ClientSettings {
    /// Load settings from `path` (or the default location), falling back to
    /// defaults on any error.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path.map(Path::to_path_buf).unwrap_or_else(settings_path);
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    log::warn!("Failed to parse settings ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::debug!("No settings file found ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Save settings to `path` (or the default location) as pretty JSON.
    pub fn save(&self, path: Option<&Path>) {
        let path = path.map(Path::to_path_buf).unwrap_or_else(settings_path);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("Failed to create config directory: {}", e);
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    log::warn!("Failed to write settings: {}", e);
                } else {
                    log::info!("Saved settings to {}", path.display());
                }
            }
            Err(e) => {
                log::warn!("Failed to serialize settings: {}", e);
            }
        }
    }
}
