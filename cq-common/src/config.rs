//! Session configuration loading and validation

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default electrode montage, in recording order.
pub const DEFAULT_LOCATIONS: [&str; 5] = ["O1", "Cz", "Fz", "F3", "F4"];

/// Recording mode: every site at once, or one site at a time with
/// repositioning pauses in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Simultaneous,
    Sequential,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::Simultaneous => write!(f, "simultaneous"),
            SessionMode::Sequential => write!(f, "sequential"),
        }
    }
}

/// How reposition pauses advance: on a countdown timer, or gated on an
/// operator "ready" confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositionMode {
    Timer,
    Manual,
}

impl std::fmt::Display for RepositionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositionMode::Timer => write!(f, "timer"),
            RepositionMode::Manual => write!(f, "manual"),
        }
    }
}

/// How to launch the external acquisition/analysis engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Program to execute (e.g. `python`)
    pub program: String,
    /// Arguments before the `--config`/`--output` pair
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory for the generated engine config and result artifact
    /// (defaults to the OS temp directory)
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "clinicalq".to_string(),
            args: vec!["run".to_string()],
            output_dir: None,
        }
    }
}

/// Immutable per-session configuration, supplied at session start.
///
/// In sequential mode with `reposition_mode = manual`, `reposition_seconds`
/// is advisory only: advance is gated on the operator's ready confirmation,
/// not a timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_mode")]
    pub mode: SessionMode,

    #[serde(default = "default_epoch_seconds")]
    pub epoch_seconds: u32,

    #[serde(default = "default_reposition_seconds")]
    pub reposition_seconds: u32,

    #[serde(default = "default_reposition_mode")]
    pub reposition_mode: RepositionMode,

    /// Seconds before an epoch ends at which the next-task pre-notification
    /// fires. Clamped to 0..=10 by `validate()`.
    #[serde(default = "default_cue_lead_seconds")]
    pub cue_lead_seconds: u32,

    /// Whether audible cues are produced at all (visual cues always are)
    #[serde(default = "default_true")]
    pub cues_enabled: bool,

    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,

    /// Rolling window the engine uses for live bandpower emissions
    #[serde(default = "default_live_window_seconds")]
    pub live_window_seconds: f64,

    /// Ordered electrode locations to record
    #[serde(default = "default_locations")]
    pub locations: Vec<String>,

    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_mode() -> SessionMode {
    SessionMode::Sequential
}

fn default_epoch_seconds() -> u32 {
    15
}

fn default_reposition_seconds() -> u32 {
    20
}

fn default_reposition_mode() -> RepositionMode {
    RepositionMode::Timer
}

fn default_cue_lead_seconds() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_sampling_rate() -> u32 {
    250
}

fn default_live_window_seconds() -> f64 {
    2.0
}

fn default_locations() -> Vec<String> {
    DEFAULT_LOCATIONS.iter().map(|s| s.to_string()).collect()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            epoch_seconds: default_epoch_seconds(),
            reposition_seconds: default_reposition_seconds(),
            reposition_mode: default_reposition_mode(),
            cue_lead_seconds: default_cue_lead_seconds(),
            cues_enabled: true,
            sampling_rate: default_sampling_rate(),
            live_window_seconds: default_live_window_seconds(),
            locations: default_locations(),
            engine: EngineConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Validate and normalize the configuration.
    ///
    /// Clamps `cue_lead_seconds` into 0..=10 rather than rejecting it.
    pub fn validate(mut self) -> Result<Self> {
        if self.locations.is_empty() {
            return Err(Error::Config(
                "at least one electrode location is required".to_string(),
            ));
        }
        if self.epoch_seconds == 0 {
            return Err(Error::Config("epoch_seconds must be >= 1".to_string()));
        }
        self.cue_lead_seconds = self.cue_lead_seconds.min(10);
        Ok(self)
    }

    /// Load configuration following the resolution priority order:
    /// 1. Explicit path (command-line argument, highest priority)
    /// 2. `CQ_CONFIG` environment variable
    /// 3. Platform config file (`~/.config/cq/config.toml`)
    /// 4. Compiled defaults (fallback)
    pub fn resolve(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            return Self::load_file(path);
        }

        if let Ok(path) = std::env::var("CQ_CONFIG") {
            return Self::load_file(Path::new(&path));
        }

        if let Some(path) = default_config_path() {
            if path.exists() {
                return Self::load_file(&path);
            }
        }

        Self::default().validate()
    }

    /// Load configuration from a TOML or JSON file, keyed on extension.
    pub fn load_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: SessionConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text)?,
            _ => toml::from_str(&text)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?,
        };
        config.validate()
    }

    /// Render the configuration document handed to the external engine.
    ///
    /// Field names follow the engine's own config vocabulary, which is
    /// snake_case JSON with a flat channel map.
    pub fn engine_document(&self) -> serde_json::Value {
        let channels: serde_json::Map<String, serde_json::Value> = self
            .locations
            .iter()
            .enumerate()
            .map(|(i, loc)| (loc.clone(), serde_json::json!(i as u32 + 1)))
            .collect();

        serde_json::json!({
            "mode": self.mode.to_string(),
            "epoch_seconds": self.epoch_seconds,
            "reposition_seconds": self.reposition_seconds,
            "reposition_mode": self.reposition_mode.to_string(),
            "sampling_rate": self.sampling_rate,
            "live_bandpower": true,
            "live_window_seconds": self.live_window_seconds,
            "channels": channels,
            "sequential_order": self.locations,
        })
    }
}

/// Platform config file path (`~/.config/cq/config.toml` on Linux)
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cq").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.mode, SessionMode::Sequential);
        assert_eq!(config.epoch_seconds, 15);
        assert_eq!(config.reposition_seconds, 20);
        assert_eq!(config.reposition_mode, RepositionMode::Timer);
        assert_eq!(config.cue_lead_seconds, 3);
        assert_eq!(config.locations, vec!["O1", "Cz", "Fz", "F3", "F4"]);
    }

    #[test]
    fn test_cue_lead_clamped() {
        let config = SessionConfig {
            cue_lead_seconds: 45,
            ..Default::default()
        };
        let config = config.validate().expect("valid config");
        assert_eq!(config.cue_lead_seconds, 10);
    }

    #[test]
    fn test_empty_locations_rejected() {
        let config = SessionConfig {
            locations: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"mode": "simultaneous", "epoch_seconds": 10}"#)
                .expect("parse");
        assert_eq!(config.mode, SessionMode::Simultaneous);
        assert_eq!(config.epoch_seconds, 10);
        assert_eq!(config.reposition_seconds, 20);
        assert_eq!(config.reposition_mode, RepositionMode::Timer);
    }

    #[test]
    fn test_engine_document_channels() {
        let config = SessionConfig::default();
        let doc = config.engine_document();
        assert_eq!(doc["mode"], "sequential");
        assert_eq!(doc["channels"]["O1"], 1);
        assert_eq!(doc["channels"]["F4"], 5);
        assert_eq!(doc["sequential_order"][0], "O1");
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "mode = \"simultaneous\"\ncue_lead_seconds = 5\n")
            .expect("write");

        let config = SessionConfig::load_file(&path).expect("load");
        assert_eq!(config.mode, SessionMode::Simultaneous);
        assert_eq!(config.cue_lead_seconds, 5);
    }
}
