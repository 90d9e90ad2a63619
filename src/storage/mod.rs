//! Storage Layer
//!
//! Locates the per-user directories and persists user preferences.

pub mod preferences;

use anyhow::Result;
use std::path::PathBuf;

pub use preferences::{load_target_language, Preferences, PREFERENCES_FILE_NAME};

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "screentranslator", "ScreenTranslator")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}
