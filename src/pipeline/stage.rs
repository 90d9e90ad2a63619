//! Per-frame pipeline stage tracking

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Where the pipeline is with the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineStage {
    #[default]
    Idle,
    Capturing,
    Recognizing,
    Translating,
    Rendering,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Capturing => "capturing",
            PipelineStage::Recognizing => "recognizing",
            PipelineStage::Translating => "translating",
            PipelineStage::Rendering => "rendering",
        };
        f.write_str(name)
    }
}

/// Shared, observable stage value
#[derive(Debug, Clone, Default)]
pub struct StageTracker {
    current: Arc<Mutex<PipelineStage>>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> PipelineStage {
        *self.current.lock()
    }

    pub fn set(&self, stage: PipelineStage) {
        let mut current = self.current.lock();
        trace!("Pipeline stage {} -> {}", *current, stage);
        *current = stage;
    }

    /// Enter `stage`; the returned guard puts the pipeline back to Idle when
    /// the frame is done, whichever way it ends
    pub fn enter(&self, stage: PipelineStage) -> StageGuard {
        self.set(stage);
        StageGuard {
            tracker: self.clone(),
        }
    }
}

/// Resets the stage to Idle on drop
#[derive(Debug)]
pub struct StageGuard {
    tracker: StageTracker,
}

impl StageGuard {
    pub fn advance(&self, stage: PipelineStage) {
        self.tracker.set(stage);
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        self.tracker.set(PipelineStage::Idle);
    }
}
