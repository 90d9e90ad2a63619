//! Inference engine abstraction and model lifecycle control

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::readiness::{ModelRegistry, ModelState};

/// Errors reported by an inference engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("model '{0}' is not available")]
    ModelNotFound(String),
    #[error("model file {0:?} does not exist")]
    MissingModelFile(PathBuf),
    #[error("inference server unreachable: {0}")]
    Unreachable(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("malformed response: {0}")]
    Protocol(String),
}

/// Model selection parameters passed to the service at start time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Name used by the inference engine
    pub name: String,
    /// Model version label
    pub version: String,
    /// Local storage path of the model weights, if any
    pub path: Option<PathBuf>,
    /// Size of the weights in bytes
    pub size_bytes: u64,
    /// Whether the user imported the weights from a local file
    pub imported: bool,
    /// Whether the model accepts image input
    pub supports_image: bool,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "_".to_string(),
            path: None,
            size_bytes: 0,
            imported: false,
            supports_image: false,
        }
    }

    /// Model used when the caller supplies no selection
    pub fn placeholder() -> Self {
        Self {
            name: "gemma3n:e2b".to_string(),
            version: "internal".to_string(),
            ..Self::new("")
        }
    }
}

/// An external engine that can load a model and generate text with it
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Prepare a session for `model`
    async fn load(&self, model: &ModelSpec) -> Result<(), EngineError>;

    /// Run one generation and return the full response text
    async fn generate(&self, model: &ModelSpec, prompt: &str) -> Result<String, EngineError>;

    /// Release the session of `model`
    async fn unload(&self, model: &ModelSpec) -> Result<(), EngineError>;
}

/// Drives model readiness transitions on top of an engine
#[derive(Clone)]
pub struct ModelController {
    engine: Arc<dyn InferenceEngine>,
    registry: ModelRegistry,
}

impl ModelController {
    pub fn new(engine: Arc<dyn InferenceEngine>, registry: ModelRegistry) -> Self {
        Self { engine, registry }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<dyn InferenceEngine> {
        &self.engine
    }

    /// Initialize `model`, ending in `Initialized` or `Error`.
    ///
    /// A call made while another initialization of the same model is in
    /// flight returns immediately.
    pub async fn initialize(&self, model: &ModelSpec) -> ModelState {
        if !self.registry.begin_initializing(&model.name) {
            debug!("Model '{}' is already initializing", model.name);
            return ModelState::Initializing;
        }
        info!("Initializing model '{}' (version {})", model.name, model.version);
        debug!(
            "Model '{}': imported={}, image input={}, {} bytes",
            model.name, model.imported, model.supports_image, model.size_bytes
        );

        if model.imported {
            if let Some(path) = &model.path {
                if !path.exists() {
                    let message = EngineError::MissingModelFile(path.clone()).to_string();
                    error!("Model '{}' initialization failed: {}", model.name, message);
                    let state = ModelState::Error(message);
                    self.registry.set(&model.name, state.clone());
                    return state;
                }
            }
        }

        let state = match self.engine.load(model).await {
            Ok(()) => {
                info!("Model '{}' is initialized", model.name);
                ModelState::Initialized
            }
            Err(e) => {
                error!("Model '{}' initialization failed: {}", model.name, e);
                ModelState::Error(e.to_string())
            }
        };
        self.registry.set(&model.name, state.clone());
        state
    }

    /// Release the engine session and mark the model `NotInitialized`
    pub async fn cleanup(&self, model: &ModelSpec) {
        if let Err(e) = self.engine.unload(model).await {
            warn!("Failed to unload model '{}': {}", model.name, e);
        }
        self.registry.set(&model.name, ModelState::NotInitialized);
        debug!("Model '{}' cleaned up", model.name);
    }
}
