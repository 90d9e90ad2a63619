//! Translator Service
//!
//! Owns one capture session at a time: validates the capture grant, brings
//! the model up, feeds frames into the pipeline and tears everything down on
//! stop.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::capture::{open_frame_source, CaptureConfig, CaptureError, CaptureGrant, FrameSource};
use crate::overlay::OverlayHandle;
use crate::pipeline::{
    AdmissionPolicy, BalloonTexts, CaptureRequest, FrameSequence, PipelineStage, PipelineStats,
    TranslationPipeline,
};
use crate::translate::{
    CacheStats, InferenceEngine, ModelController, ModelRegistry, ModelSpec, ModelState, TranslationCache,
    Translator,
};
use crate::vision::TextRecognizer;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("screen capture permission denied: {0}")]
    PermissionDenied(String),
    #[error("the service is already running")]
    AlreadyRunning,
    #[error("the service is not running")]
    NotRunning,
    #[error(transparent)]
    Capture(CaptureError),
}

impl From<CaptureError> for ServiceError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::PermissionDenied(reason) => ServiceError::PermissionDenied(reason),
            other => ServiceError::Capture(other),
        }
    }
}

/// Parameters of one start action
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub grant: CaptureGrant,
    /// Model to use; the placeholder model when absent
    pub model: Option<ModelSpec>,
}

/// Settings fixed for the lifetime of the service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub capture: CaptureConfig,
    pub policy: AdmissionPolicy,
    pub target_language: String,
    pub translation_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub texts: BalloonTexts,
}

/// External capabilities the service drives
pub struct ServiceParts {
    pub recognizer: Arc<dyn TextRecognizer>,
    pub engine: Arc<dyn InferenceEngine>,
    pub overlay: OverlayHandle,
}

struct Session {
    model: ModelSpec,
    pipeline: Arc<TranslationPipeline>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Screen translation service
pub struct TranslatorService {
    config: ServiceConfig,
    recognizer: Arc<dyn TextRecognizer>,
    controller: ModelController,
    overlay: OverlayHandle,
    cache: TranslationCache,
    capture: CaptureRequest,
    /// Outlives sessions so overlay frame numbers keep increasing after a restart
    frames: FrameSequence,
    session: Option<Session>,
}

impl TranslatorService {
    pub fn new(config: ServiceConfig, parts: ServiceParts) -> Self {
        Self {
            config,
            recognizer: parts.recognizer,
            controller: ModelController::new(parts.engine, ModelRegistry::new()),
            overlay: parts.overlay,
            cache: TranslationCache::new(),
            capture: CaptureRequest::new(),
            frames: FrameSequence::new(),
            session: None,
        }
    }

    /// Flag raised by [`capture_now`](Self::capture_now); shareable with a hotkey
    pub fn capture_request(&self) -> CaptureRequest {
        self.capture.clone()
    }

    pub fn registry(&self) -> &ModelRegistry {
        self.controller.registry()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn model_state(&self) -> Option<ModelState> {
        let session = self.session.as_ref()?;
        Some(self.registry().state(&session.model.name))
    }

    pub fn stage(&self) -> PipelineStage {
        self.session
            .as_ref()
            .map(|s| s.pipeline.stage())
            .unwrap_or_default()
    }

    pub fn pipeline_stats(&self) -> Option<PipelineStats> {
        self.session.as_ref().map(|s| s.pipeline.stats())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Start capturing and translating.
    ///
    /// A grant that is not approved aborts the start before any model or
    /// capture resource is touched.
    pub fn start(&mut self, request: StartRequest) -> Result<(), ServiceError> {
        if self.session.is_some() {
            return Err(ServiceError::AlreadyRunning);
        }
        request.grant.validate()?;

        let model = request.model.unwrap_or_else(|| {
            info!("No model selected, using placeholder model");
            ModelSpec::placeholder()
        });

        let source = open_frame_source(&request.grant, &self.config.capture)?;
        info!("Starting translation of {}", source.describe());

        let translator = Translator::new(
            self.controller.clone(),
            self.cache.clone(),
            model.clone(),
            self.config.target_language.clone(),
            self.config.translation_timeout,
        );
        let pipeline = Arc::new(
            TranslationPipeline::new(
                self.recognizer.clone(),
                translator,
                self.overlay.clone(),
                self.config.policy,
                self.config.texts.clone(),
            )
            .with_capture_request(self.capture.clone())
            .with_frame_sequence(self.frames.clone()),
        );

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let controller = self.controller.clone();
        let init_model = model.clone();
        let init_cancel = cancel.child_token();
        tracker.spawn(async move {
            tokio::select! {
                _ = init_cancel.cancelled() => debug!("Model initialization abandoned"),
                state = controller.initialize(&init_model) => debug!("Model initialization ended: {}", state),
            }
        });

        tracker.spawn(run_frames(source, pipeline.clone(), tracker.clone(), cancel.child_token()));

        self.session = Some(Session {
            model,
            pipeline,
            cancel,
            tracker,
        });
        Ok(())
    }

    /// Process the next frame that finds the pipeline idle
    pub fn capture_now(&self) -> Result<(), ServiceError> {
        if self.session.is_none() {
            return Err(ServiceError::NotRunning);
        }
        self.capture.request();
        debug!("Capture requested");
        Ok(())
    }

    /// Stop the session and release everything it holds
    pub async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        info!("Stopping translation service...");

        session.cancel.cancel();
        session.tracker.close();
        if tokio::time::timeout(self.config.shutdown_timeout, session.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "{} task(s) still running after {:?}",
                session.tracker.len(),
                self.config.shutdown_timeout
            );
        }

        session.pipeline.gate().close();
        self.controller.cleanup(&session.model).await;
        self.overlay.remove_all();
        self.controller.registry().clear();

        let stats = self.cache.stats();
        info!(
            "Translation service stopped ({} cached, {} hits, {} misses)",
            stats.entries, stats.hits, stats.misses
        );
    }
}

async fn run_frames(
    mut source: Box<dyn FrameSource>,
    pipeline: Arc<TranslationPipeline>,
    tracker: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = source.next_frame() => event,
        };
        let Some(event) = event else {
            info!("Frame source {} exhausted", source.describe());
            break;
        };

        if let Some(admitted) = pipeline.offer(event) {
            let pipeline = pipeline.clone();
            let cancel = cancel.child_token();
            tracker.spawn(async move {
                pipeline.process(admitted, &cancel).await;
            });
        }
    }

    source.close();
    let stats = pipeline.stats();
    debug!(
        "Frame loop ended: {} admitted, {} dropped busy, {} not requested, {} unavailable",
        stats.admitted, stats.dropped_busy, stats.dropped_not_requested, stats.buffer_failures
    );
}

impl Drop for TranslatorService {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            warn!("Translator service dropped while running, cancelling tasks");
            session.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureTarget;
    use crate::overlay::{OverlayBoard, OverlayCommand};
    use crate::translate::engine::testing::FakeEngine;
    use crate::vision::{BlockBounds, RecognitionError, TextBlock};
    use async_trait::async_trait;
    use crossbeam_channel::Receiver;
    use image::{Rgba, RgbaImage};
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct StaticRecognizer(Vec<TextBlock>);

    #[async_trait]
    impl TextRecognizer for StaticRecognizer {
        async fn recognize(&self, _image: &RgbaImage) -> Result<Vec<TextBlock>, RecognitionError> {
            Ok(self.0.clone())
        }
    }

    fn replay_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        RgbaImage::from_pixel(30, 10, Rgba([0, 0, 0, 255]))
            .save(dir.path().join("frame.png"))
            .unwrap();
        dir
    }

    fn service(dir: &Path, policy: AdmissionPolicy, engine: Arc<FakeEngine>) -> (TranslatorService, Receiver<OverlayCommand>) {
        let (overlay, commands) = OverlayHandle::channel();
        let config = ServiceConfig {
            capture: CaptureConfig {
                target: CaptureTarget::Replay(dir.to_path_buf()),
                max_fps: 200,
                replay_row_alignment: 64,
                replay_loop: true,
            },
            policy,
            target_language: "Spanish".to_string(),
            translation_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(3),
            texts: BalloonTexts::default(),
        };
        let parts = ServiceParts {
            recognizer: Arc::new(StaticRecognizer(vec![TextBlock::new(
                "Hello",
                BlockBounds::from_xywh(0, 0, 30, 10),
            )])),
            engine,
            overlay,
        };
        (TranslatorService::new(config, parts), commands)
    }

    fn wait_for_text(commands: &Receiver<OverlayCommand>, text: &str) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while let Some(left) = deadline.checked_duration_since(std::time::Instant::now()) {
            match commands.recv_timeout(left) {
                Ok(OverlayCommand::Upsert(entry)) if entry.text == text => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
        false
    }

    fn wait_for_balloon(commands: &Receiver<OverlayCommand>, board: &mut OverlayBoard, text: &str) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while let Some(left) = deadline.checked_duration_since(std::time::Instant::now()) {
            match commands.recv_timeout(left) {
                Ok(command) => {
                    board.apply(command);
                    if board.entries().any(|entry| entry.text == text) {
                        return true;
                    }
                }
                Err(_) => return false,
            }
        }
        false
    }

    #[tokio::test]
    async fn test_denied_grant_aborts_start() {
        let dir = replay_dir();
        let (mut service, _commands) = service(dir.path(), AdmissionPolicy::Continuous, Arc::new(FakeEngine::default()));

        let result = service.start(StartRequest {
            grant: CaptureGrant::denied(),
            model: None,
        });

        assert!(matches!(result, Err(ServiceError::PermissionDenied(_))));
        assert!(!service.is_running());
        assert!(service.registry().is_empty());
        assert!(matches!(service.capture_now(), Err(ServiceError::NotRunning)));
    }

    #[tokio::test]
    async fn test_missing_replay_dir_fails_start() {
        let (mut service, _commands) = service(
            Path::new("/nonexistent/frames"),
            AdmissionPolicy::Continuous,
            Arc::new(FakeEngine::default()),
        );

        let result = service.start(StartRequest {
            grant: CaptureGrant::approved("replay"),
            model: None,
        });

        assert!(matches!(result, Err(ServiceError::Capture(_))));
        assert!(!service.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_continuous_session_translates_and_stops_cleanly() {
        let dir = replay_dir();
        let engine = Arc::new(FakeEngine::default().reply("Translate to Spanish: Hello", Ok("Hola")));
        let (mut service, commands) = service(dir.path(), AdmissionPolicy::Continuous, engine.clone());

        service
            .start(StartRequest {
                grant: CaptureGrant::approved("replay"),
                model: None,
            })
            .unwrap();
        assert!(matches!(
            service.start(StartRequest {
                grant: CaptureGrant::approved("replay"),
                model: None,
            }),
            Err(ServiceError::AlreadyRunning)
        ));

        let mut state = service.registry().subscribe("gemma3n:e2b");
        state.wait_for(|s| s.is_ready()).await.unwrap();

        let found = tokio::task::block_in_place(|| wait_for_text(&commands, "Hola"));
        assert!(found);

        service.stop().await;

        assert!(!service.is_running());
        assert_eq!(engine.calls(), 1);
        assert_eq!(engine.unloads.load(Ordering::SeqCst), 1);
        assert!(service.registry().is_empty());
        assert_eq!(commands.try_iter().last(), Some(OverlayCommand::RemoveAll));
        assert_eq!(service.cache_stats().entries, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_on_demand_waits_for_capture_now() {
        let dir = replay_dir();
        let engine = Arc::new(FakeEngine::default());
        let (mut service, commands) = service(dir.path(), AdmissionPolicy::OnDemand, engine.clone());
        let model = ModelSpec::new("local");

        service
            .start(StartRequest {
                grant: CaptureGrant::approved("replay"),
                model: Some(model.clone()),
            })
            .unwrap();
        let mut state = service.registry().subscribe(&model.name);
        state.wait_for(|s| s.is_ready()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.calls(), 0);
        assert!(commands.try_recv().is_err());

        service.capture_now().unwrap();
        let found = tokio::task::block_in_place(|| wait_for_text(&commands, "<Translate to Spanish: Hello>"));
        assert!(found);
        assert_eq!(engine.calls(), 1);

        service.stop().await;
        service.stop().await;
        assert_eq!(engine.unloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restarted_session_renders_on_same_board() {
        let dir = replay_dir();
        let engine = Arc::new(FakeEngine::default().reply("Translate to Spanish: Hello", Ok("Hola")));
        let (mut service, commands) = service(dir.path(), AdmissionPolicy::Continuous, engine.clone());
        let mut board = OverlayBoard::new();

        for session in 1..=2 {
            service
                .start(StartRequest {
                    grant: CaptureGrant::approved("replay"),
                    model: None,
                })
                .unwrap();
            let shown = tokio::task::block_in_place(|| wait_for_balloon(&commands, &mut board, "Hola"));
            assert!(shown, "no balloon in session {session}");
            if session == 1 {
                // Let the first session number plenty of frames.
                tokio::time::sleep(Duration::from_millis(200)).await;
            }

            service.stop().await;
            board.drain(&commands);
            assert!(board.is_empty());
        }

        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_cancels_inflight_translation() {
        let dir = replay_dir();
        let engine = Arc::new(
            FakeEngine::default().slow("Translate to Spanish: Hello", Duration::from_secs(60)),
        );
        let (mut service, commands) = service(dir.path(), AdmissionPolicy::Continuous, engine.clone());

        service
            .start(StartRequest {
                grant: CaptureGrant::approved("replay"),
                model: None,
            })
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.calls() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let started = std::time::Instant::now();
        service.stop().await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!service.is_running());
        assert_eq!(engine.calls(), 1);
        assert_eq!(service.cache_stats().entries, 0);
        assert_eq!(commands.try_iter().last(), Some(OverlayCommand::RemoveAll));
    }

    #[tokio::test]
    async fn test_capture_error_mapping() {
        let denied: ServiceError = CaptureError::PermissionDenied("declined".to_string()).into();
        assert!(matches!(denied, ServiceError::PermissionDenied(_)));

        let other: ServiceError = CaptureError::EmptyFrame.into();
        assert!(matches!(other, ServiceError::Capture(CaptureError::EmptyFrame)));
    }
}
