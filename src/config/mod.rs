//! Application Configuration
//!
//! User settings stored in TOML format. Every section falls back to its
//! defaults, so a partial file is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::capture::{CaptureConfig, CaptureTarget};
use crate::overlay::OverlayConfig;
use crate::pipeline::AdmissionPolicy;
use crate::translate::TranslationConfig;
use crate::vision::VisionConfig;

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Capture settings
    pub capture: CaptureSettings,
    /// OCR settings
    pub vision: VisionConfig,
    /// Inference settings
    pub translation: TranslationConfig,
    /// Overlay settings
    pub overlay: OverlayConfig,
    /// Service lifecycle settings
    pub service: ServiceSettings,
}

/// General application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Target language that takes precedence over the stored preference
    pub target_language: Option<String>,
}

/// Capture-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Monitor index (0 = first enumerated monitor)
    pub monitor: usize,
    /// Maximum capture FPS
    pub max_fps: u32,
    /// Which frames are processed
    pub policy: AdmissionPolicy,
    /// Row alignment in bytes applied to replayed frames
    pub replay_row_alignment: u32,
    /// Restart a replay directory once exhausted
    pub replay_loop: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            monitor: 0,
            max_fps: 2,
            policy: AdmissionPolicy::OnDemand,
            replay_row_alignment: 64,
            replay_loop: false,
        }
    }
}

impl CaptureSettings {
    /// Frame source configuration for `target`
    pub fn source_config(&self, target: CaptureTarget) -> CaptureConfig {
        CaptureConfig {
            target,
            max_fps: self.max_fps,
            replay_row_alignment: self.replay_row_alignment,
            replay_loop: self.replay_loop,
        }
    }
}

/// Service lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// How long stop waits for in-flight work before giving up
    pub shutdown_timeout_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 3000,
        }
    }
}

impl ServiceSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load `config.toml` from `dir`, or defaults when there is none
pub fn load_or_default(dir: &Path) -> Result<AppConfig> {
    let path = dir.join(CONFIG_FILE_NAME);
    if !path.exists() {
        debug!("No configuration at {:?}, using defaults", path);
        return Ok(AppConfig::default());
    }
    let config = load_config(&path).with_context(|| format!("Invalid configuration file {:?}", path))?;
    info!("Loaded configuration from {:?}", path);
    Ok(config)
}
