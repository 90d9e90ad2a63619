//! Translation Layer
//!
//! Translates recognized text with a locally hosted language model. Results
//! are cached by source text; model readiness is re-checked before every call.

pub mod cache;
pub mod engine;
pub mod ollama;
pub mod readiness;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use cache::{CacheStats, TranslationCache};
pub use engine::{EngineError, InferenceEngine, ModelController, ModelSpec};
pub use ollama::OllamaEngine;
pub use readiness::{ModelRegistry, ModelState};

/// Language used when no preference is stored
pub const DEFAULT_TARGET_LANGUAGE: &str = "English";

/// Per-block translation failures. Only the affected block is marked.
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("model '{model}' is not ready ({state})")]
    ModelNotReady { model: String, state: ModelState },
    #[error("translation timed out after {0:?}")]
    Timeout(Duration),
    #[error("translation cancelled")]
    Cancelled,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Translation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Base URL of the Ollama server
    pub base_url: String,
    /// Upper bound for a single translation call
    pub timeout_ms: u64,
    /// Sampling temperature
    pub temperature: f32,
    /// How long the server keeps the model loaded between calls
    pub keep_alive: String,
    /// Model used when none is passed at start
    pub default_model: Option<String>,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            timeout_ms: 30_000,
            temperature: 0.2,
            keep_alive: "10m".to_string(),
            default_model: None,
        }
    }
}

/// Prompt sent to the model for one block
pub fn build_prompt(target_language: &str, text: &str) -> String {
    format!("Translate to {target_language}: {text}")
}

/// Translates single texts with one model
#[derive(Clone)]
pub struct Translator {
    controller: ModelController,
    cache: TranslationCache,
    model: ModelSpec,
    target_language: String,
    timeout: Duration,
}

impl Translator {
    pub fn new(
        controller: ModelController,
        cache: TranslationCache,
        model: ModelSpec,
        target_language: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            controller,
            cache,
            model,
            target_language: target_language.into(),
            timeout,
        }
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    /// Current readiness of the model
    pub fn model_state(&self) -> ModelState {
        self.controller.registry().state(&self.model.name)
    }

    /// Translate `text`, storing successful results in the cache.
    ///
    /// Readiness is read right before the engine call; a model that is not
    /// initialized at that point fails the call without reaching the engine.
    pub async fn translate(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<String, TranslationError> {
        let state = self.model_state();
        if !state.is_ready() {
            return Err(TranslationError::ModelNotReady {
                model: self.model.name.clone(),
                state,
            });
        }

        let prompt = build_prompt(&self.target_language, text);
        debug!("Using prompt: {}", prompt);

        let call = tokio::time::timeout(
            self.timeout,
            self.controller.engine().generate(&self.model, &prompt),
        );
        let translated = tokio::select! {
            _ = cancel.cancelled() => return Err(TranslationError::Cancelled),
            result = call => match result {
                Ok(result) => result?,
                Err(_) => {
                    warn!("Translation of {:?} timed out", preview(text));
                    return Err(TranslationError::Timeout(self.timeout));
                }
            },
        };

        self.cache.store(text, translated.clone());
        Ok(translated)
    }
}

/// First characters of a text for log lines
pub fn preview(text: &str) -> String {
    const MAX: usize = 50;
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(MAX).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
