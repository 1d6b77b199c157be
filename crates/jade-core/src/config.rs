//! Bridge configuration
//!
//! Client name, server start policy and queue sizing, persisted as YAML.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::queue::MAX_BUFFER_RATIO;

/// Default client name requested from the audio server
pub const DEFAULT_CLIENT_NAME: &str = "jade";

/// Default diagnostics queue capacity (diagnostics, not samples)
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 64;

/// Default diagnostics worker poll interval
pub const DEFAULT_DIAGNOSTICS_POLL_MS: u64 = 20;

/// Configuration for a client and its bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Requested client name (the server may assign another)
    pub client_name: String,

    /// Allow opening the client to start the audio server
    pub start_server: bool,

    /// Extra output queue headroom in frame periods
    ///
    /// Used by `Client::add_audio_out_default`. 1.0 = one period of
    /// headroom on top of the period being played.
    pub output_buffer_ratio: f32,

    /// MIDI queue capacity in events (None = one frame period)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_queue_capacity: Option<usize>,

    /// Capacity of the real-time diagnostics queue
    pub diagnostics_capacity: usize,

    /// How often the diagnostics worker drains its queue (milliseconds)
    pub diagnostics_poll_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            start_server: false,
            output_buffer_ratio: 1.0,
            midi_queue_capacity: None,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
            diagnostics_poll_ms: DEFAULT_DIAGNOSTICS_POLL_MS,
        }
    }
}

impl BridgeConfig {
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Allow the audio server to be started on open
    pub fn with_start_server(mut self, start: bool) -> Self {
        self.start_server = start;
        self
    }

    pub fn with_output_buffer_ratio(mut self, ratio: f32) -> Self {
        self.output_buffer_ratio = ratio;
        self
    }

    pub fn with_midi_queue_capacity(mut self, capacity: usize) -> Self {
        self.midi_queue_capacity = Some(capacity);
        self
    }

    pub fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.diagnostics_capacity = capacity;
        self
    }

    pub fn with_diagnostics_poll_ms(mut self, poll_ms: u64) -> Self {
        self.diagnostics_poll_ms = poll_ms;
        self
    }

    /// MIDI queue capacity for a given frame period
    pub fn midi_capacity(&self, frames: usize) -> usize {
        self.midi_queue_capacity.unwrap_or(frames).max(1)
    }

    /// Reject values the client cannot work with
    pub fn validate(&self) -> ClientResult<()> {
        validate_buffer_ratio(self.output_buffer_ratio)
    }
}

/// An output buffer ratio must lie in `0..=MAX_BUFFER_RATIO`
pub fn validate_buffer_ratio(ratio: f32) -> ClientResult<()> {
    if (0.0..=MAX_BUFFER_RATIO).contains(&ratio) {
        Ok(())
    } else {
        Err(ClientError::InvalidBufferRatio(ratio))
    }
}

/// Default config file location
///
/// Returns: `~/.config/jade/jade.yaml` (platform config dir)
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jade")
        .join("jade.yaml")
}

/// Read a bridge config, falling back to defaults
///
/// Unreadable or malformed files are logged and replaced by defaults.
pub fn load_config(path: &Path) -> BridgeConfig {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("No bridge config at {:?}, using defaults", path);
            return BridgeConfig::default();
        }
        Err(e) => {
            log::warn!("Could not read bridge config {:?}: {}, using defaults", path, e);
            return BridgeConfig::default();
        }
    };

    match serde_yaml::from_str::<BridgeConfig>(&contents) {
        Ok(config) => {
            log::info!("Loaded bridge config from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("Malformed bridge config {:?}: {}, using defaults", path, e);
            BridgeConfig::default()
        }
    }
}

/// Write a bridge config as YAML, creating missing parent directories
pub fn save_config(config: &BridgeConfig, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Cannot create config directory {:?}", dir))?;
    }

    let yaml = serde_yaml::to_string(config).context("Cannot serialize bridge config")?;
    std::fs::write(path, yaml).with_context(|| format!("Cannot write bridge config {:?}", path))?;
    log::info!("Saved bridge config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: BridgeConfig = load_config(Path::new("/nonexistent/path/jade.yaml"));
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jade.yaml");

        let config = BridgeConfig::default()
            .with_client_name("synth")
            .with_start_server(true)
            .with_output_buffer_ratio(0.5)
            .with_midi_queue_capacity(512);
        save_config(&config, &path).unwrap();

        let loaded: BridgeConfig = load_config(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jade.yaml");
        std::fs::write(&path, "client_name: partial\n").unwrap();

        let loaded: BridgeConfig = load_config(&path);
        assert_eq!(loaded.client_name, "partial");
        assert_eq!(loaded.output_buffer_ratio, 1.0);
        assert_eq!(loaded.diagnostics_capacity, DEFAULT_DIAGNOSTICS_CAPACITY);
    }

    #[test]
    fn test_invalid_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jade.yaml");
        std::fs::write(&path, "client_name: [unterminated").unwrap();

        let loaded: BridgeConfig = load_config(&path);
        assert_eq!(loaded, BridgeConfig::default());
    }

    #[test]
    fn test_validate_buffer_ratio() {
        assert!(BridgeConfig::default().validate().is_ok());
        assert!(validate_buffer_ratio(0.0).is_ok());
        assert!(matches!(
            validate_buffer_ratio(-1.0),
            Err(ClientError::InvalidBufferRatio(_))
        ));
        assert!(validate_buffer_ratio(f32::INFINITY).is_err());
        assert!(validate_buffer_ratio(f32::NAN).is_err());
        assert!(validate_buffer_ratio(MAX_BUFFER_RATIO).is_ok());
        assert!(matches!(
            validate_buffer_ratio(1.0e30),
            Err(ClientError::InvalidBufferRatio(_))
        ));
    }

    #[test]
    fn test_midi_capacity_defaults_to_frame_period() {
        let config = BridgeConfig::default();
        assert_eq!(config.midi_capacity(256), 256);
        assert_eq!(config.with_midi_queue_capacity(32).midi_capacity(256), 32);
    }

    #[test]
    fn test_default_path_ends_with_file_name() {
        assert!(default_config_path().ends_with("jade/jade.yaml"));
    }
}
