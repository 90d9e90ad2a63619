//! User preferences persisted as JSON

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::translate::DEFAULT_TARGET_LANGUAGE;

/// Name of the preferences file inside the config directory
pub const PREFERENCES_FILE_NAME: &str = "preferences.json";

/// Key/value preferences shared with other front ends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Language translations are produced in; `null` means unset
    pub target_language: Option<String>,
}

impl Preferences {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let prefs = serde_json::from_str(&content)
            .with_context(|| format!("Invalid preferences file {:?}", path))?;
        Ok(prefs)
    }

    /// Stored target language, if set to a non-blank value
    pub fn target_language(&self) -> Option<&str> {
        self.target_language
            .as_deref()
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
    }
}

/// Read the target language preference once, falling back to the default
/// when the file, the key or its value is missing
pub fn load_target_language(path: &Path) -> String {
    if !path.exists() {
        debug!("No preferences at {:?}", path);
        return DEFAULT_TARGET_LANGUAGE.to_string();
    }
    match Preferences::load(path) {
        Ok(prefs) => prefs
            .target_language()
            .unwrap_or(DEFAULT_TARGET_LANGUAGE)
            .to_string(),
        Err(e) => {
            warn!("Ignoring preferences: {:#}", e);
            DEFAULT_TARGET_LANGUAGE.to_string()
        }
    }
}
