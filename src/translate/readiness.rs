//! Model readiness tracking
//!
//! One watch channel per model name. The registry is an explicit object owned
//! by the service and torn down when the service stops.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of a model inside the inference engine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ModelState {
    #[default]
    NotInitialized,
    Initializing,
    Initialized,
    Error(String),
}

impl ModelState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModelState::Initialized)
    }
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelState::NotInitialized => f.write_str("not initialized"),
            ModelState::Initializing => f.write_str("initializing"),
            ModelState::Initialized => f.write_str("initialized"),
            ModelState::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Readiness state of every known model
#[derive(Clone, Default)]
pub struct ModelRegistry {
    states: Arc<Mutex<HashMap<String, Arc<watch::Sender<ModelState>>>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, name: &str) -> Arc<watch::Sender<ModelState>> {
        self.states
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(watch::Sender::new(ModelState::NotInitialized)))
            .clone()
    }

    /// Current state; unknown models are `NotInitialized`
    pub fn state(&self, name: &str) -> ModelState {
        self.states
            .lock()
            .get(name)
            .map(|tx| tx.borrow().clone())
            .unwrap_or_default()
    }

    /// Observe state changes of a model
    pub fn subscribe(&self, name: &str) -> watch::Receiver<ModelState> {
        self.sender(name).subscribe()
    }

    pub fn set(&self, name: &str, state: ModelState) {
        self.sender(name).send_replace(state);
    }

    /// Move to `Initializing` unless already there. Returns false if an
    /// initialization is already in flight.
    pub fn begin_initializing(&self, name: &str) -> bool {
        self.sender(name).send_if_modified(|state| {
            if *state == ModelState::Initializing {
                false
            } else {
                *state = ModelState::Initializing;
                true
            }
        })
    }

    /// Drop every model entry. Subscribers see their channel close.
    pub fn clear(&self) {
        self.states.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
