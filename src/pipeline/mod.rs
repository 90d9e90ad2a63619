//! Frame Processing Pipeline
//!
//! Admits at most one frame at a time, turns it into text blocks and pushes
//! translated balloons to the overlay. Frames arriving while another one is
//! in flight are dropped before any pixel work is done.

pub mod gate;
pub mod ordered;
pub mod stage;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::frame::RawFrame;
use crate::capture::{reconstruct::reconstruct, CaptureError};
use crate::overlay::{BalloonKind, OverlayEntry, OverlayHandle};
use crate::translate::{preview, ModelState, TranslationError, Translator};
use crate::vision::{RecognitionError, TextBlock, TextRecognizer};

pub use gate::{AdmissionGate, AdmissionPolicy, CaptureRequest, FramePermit, FrameSequence};
pub use ordered::OrderedRelease;
pub use stage::{PipelineStage, StageTracker};

/// Placeholder texts shown on balloons
#[derive(Debug, Clone)]
pub struct BalloonTexts {
    pub pending: String,
    pub error: String,
}

impl Default for BalloonTexts {
    fn default() -> Self {
        Self {
            pending: "Translating…".to_string(),
            error: "Error".to_string(),
        }
    }
}

/// How one admitted frame ended
#[derive(Debug)]
pub enum FrameOutcome {
    /// The model was not initialized when the frame arrived
    ModelNotReady(ModelState),
    CaptureFailed(CaptureError),
    RecognitionFailed(RecognitionError),
    Cancelled,
    Rendered(FrameSummary),
}

/// Per-frame block counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSummary {
    pub seq: u64,
    pub blocks: usize,
    pub cached: usize,
    pub translated: usize,
    pub failed: usize,
}

/// Counters of frames that never reached processing
#[derive(Debug, Default)]
struct DropCounters {
    busy: AtomicU64,
    not_requested: AtomicU64,
    unavailable: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub admitted: u64,
    pub dropped_busy: u64,
    pub dropped_not_requested: u64,
    pub buffer_failures: u64,
}

/// A frame that passed admission, together with the permit that holds the gate
#[derive(Debug)]
pub struct AdmittedFrame {
    pub permit: FramePermit,
    pub frame: RawFrame,
}

pub struct TranslationPipeline {
    gate: AdmissionGate,
    request: CaptureRequest,
    policy: AdmissionPolicy,
    stage: StageTracker,
    recognizer: Arc<dyn TextRecognizer>,
    translator: Translator,
    overlay: OverlayHandle,
    texts: BalloonTexts,
    drops: DropCounters,
}

impl TranslationPipeline {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        translator: Translator,
        overlay: OverlayHandle,
        policy: AdmissionPolicy,
        texts: BalloonTexts,
    ) -> Self {
        Self {
            gate: AdmissionGate::new(),
            request: CaptureRequest::new(),
            policy,
            stage: StageTracker::new(),
            recognizer,
            translator,
            overlay,
            texts,
            drops: DropCounters::default(),
        }
    }

    /// Share a capture request flag owned elsewhere (e.g. by a hotkey)
    pub fn with_capture_request(mut self, request: CaptureRequest) -> Self {
        self.request = request;
        self
    }

    /// Number frames from a sequence shared with earlier pipelines, so the
    /// overlay never sees a frame number go backwards
    pub fn with_frame_sequence(mut self, sequence: FrameSequence) -> Self {
        self.gate = AdmissionGate::with_sequence(sequence);
        self
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn capture_request(&self) -> &CaptureRequest {
        &self.request
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage.get()
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            admitted: self.gate.admitted(),
            dropped_busy: self.drops.busy.load(Ordering::Relaxed),
            dropped_not_requested: self.drops.not_requested.load(Ordering::Relaxed),
            buffer_failures: self.drops.unavailable.load(Ordering::Relaxed),
        }
    }

    /// Decide whether a frame-ready event gets processed.
    ///
    /// Returns `None` when the frame is dropped. A dropped frame is released
    /// here, without being reconstructed.
    pub fn offer(&self, event: Result<RawFrame, CaptureError>) -> Option<AdmittedFrame> {
        let frame = match event {
            Ok(frame) => frame,
            Err(e) => {
                // A pending capture request stays pending for the next frame.
                warn!("Frame buffer unavailable: {}", e);
                self.drops.unavailable.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let on_demand = self.policy == AdmissionPolicy::OnDemand;
        if on_demand && !self.request.is_pending() {
            self.drops.not_requested.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let Some(permit) = self.gate.try_claim() else {
            debug!("Pipeline busy, dropping frame");
            self.drops.busy.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if on_demand && !self.request.take() {
            self.drops.not_requested.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let (width, height) = frame.dimensions();
        debug!(
            "Admitted frame {} ({}x{}, {} bytes of row padding)",
            permit.seq(),
            width,
            height,
            frame.row_padding()
        );
        Some(AdmittedFrame { permit, frame })
    }

    /// Offer a frame and process it to completion if admitted
    pub async fn handle(
        &self,
        event: Result<RawFrame, CaptureError>,
        cancel: &CancellationToken,
    ) -> Option<FrameOutcome> {
        let admitted = self.offer(event)?;
        Some(self.process(admitted, cancel).await)
    }

    /// Run one admitted frame through recognition, translation and rendering.
    ///
    /// The permit is held for the whole call and released on return.
    pub async fn process(&self, admitted: AdmittedFrame, cancel: &CancellationToken) -> FrameOutcome {
        let AdmittedFrame { permit, frame } = admitted;
        let seq = permit.seq();
        let stage = self.stage.enter(PipelineStage::Capturing);

        let state = self.translator.model_state();
        if !state.is_ready() {
            info!(
                "Model '{}' is {}, skipping frame {}",
                self.translator.model().name,
                state,
                seq
            );
            return FrameOutcome::ModelNotReady(state);
        }

        let image = match reconstruct(frame) {
            Ok(image) => image,
            Err(e) => {
                error!("Failed to reconstruct frame {}: {}", seq, e);
                return FrameOutcome::CaptureFailed(e);
            }
        };

        stage.advance(PipelineStage::Recognizing);
        let blocks = tokio::select! {
            _ = cancel.cancelled() => return FrameOutcome::Cancelled,
            result = self.recognizer.recognize(&image) => match result {
                Ok(blocks) => blocks,
                Err(e) => {
                    error!("Text recognition failed on frame {}: {}", seq, e);
                    return FrameOutcome::RecognitionFailed(e);
                }
            },
        };
        drop(image);

        stage.advance(PipelineStage::Translating);
        let blocks = dedupe(blocks);
        debug!("Frame {}: {} text block(s)", seq, blocks.len());

        let mut shown: Vec<(String, BalloonKind)> = Vec::with_capacity(blocks.len());
        let mut jobs: Vec<(String, Vec<usize>)> = Vec::new();
        let mut job_of_text: HashMap<&str, usize> = HashMap::new();
        let mut summary = FrameSummary {
            seq,
            blocks: blocks.len(),
            ..Default::default()
        };

        for (index, block) in blocks.iter().enumerate() {
            match self.translator.cache().lookup(&block.text) {
                Some(cached) => {
                    summary.cached += 1;
                    shown.push((cached, BalloonKind::Translated));
                }
                None => {
                    shown.push((self.texts.pending.clone(), BalloonKind::Pending));
                    let job = *job_of_text.entry(block.text.as_str()).or_insert_with(|| {
                        jobs.push((block.text.clone(), Vec::new()));
                        jobs.len() - 1
                    });
                    jobs[job].1.push(index);
                }
            }
        }
        self.overlay.sync_frame(seq, entries(&blocks, &shown, seq));

        let mut release = OrderedRelease::new();
        // Blocks served from the cache are already on screen.
        let mut released: Vec<(usize, Option<(String, BalloonKind)>)> = Vec::new();
        for (index, (_, kind)) in shown.iter().enumerate() {
            if *kind != BalloonKind::Pending {
                released.extend(release.complete(index, None));
            }
        }

        let cancel = cancel.child_token();
        let mut tasks = JoinSet::new();
        for (job, (text, _)) in jobs.iter().enumerate() {
            let translator = self.translator.clone();
            let text = text.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { (job, translator.translate(&text, &cancel).await) });
        }

        let mut finished = vec![false; jobs.len()];
        loop {
            let joined = tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    info!("Frame {} cancelled while translating", seq);
                    return FrameOutcome::Cancelled;
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else { break };

            let (job, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // Attributed below: its blocks keep no result and get the error text.
                    error!("Translation task failed: {}", e);
                    continue;
                }
            };
            finished[job] = true;

            let resolved = match result {
                Ok(translated) => {
                    summary.translated += jobs[job].1.len();
                    (translated, BalloonKind::Translated)
                }
                Err(TranslationError::Cancelled) => return FrameOutcome::Cancelled,
                Err(e) => {
                    warn!("Failed to translate {:?}: {}", preview(&jobs[job].0), e);
                    summary.failed += jobs[job].1.len();
                    (self.texts.error.clone(), BalloonKind::Failed)
                }
            };
            for &index in &jobs[job].1 {
                shown[index] = resolved.clone();
                released.extend(release.complete(index, Some(resolved.clone())));
            }
            self.post_released(&blocks, &mut released, seq);
        }

        for (job, (_, indices)) in jobs.iter().enumerate() {
            if finished[job] {
                continue;
            }
            summary.failed += indices.len();
            let failed = (self.texts.error.clone(), BalloonKind::Failed);
            for &index in indices {
                shown[index] = failed.clone();
                released.extend(release.complete(index, Some(failed.clone())));
            }
        }
        self.post_released(&blocks, &mut released, seq);
        if release.waiting() > 0 {
            warn!("Frame {}: {} result(s) never released in order", seq, release.waiting());
        }

        stage.advance(PipelineStage::Rendering);
        self.overlay.sync_frame(seq, entries(&blocks, &shown, seq));

        info!(
            "Frame {} rendered: {} block(s), {} cached, {} translated, {} failed",
            seq, summary.blocks, summary.cached, summary.translated, summary.failed
        );
        FrameOutcome::Rendered(summary)
    }

    fn post_released(
        &self,
        blocks: &[TextBlock],
        released: &mut Vec<(usize, Option<(String, BalloonKind)>)>,
        seq: u64,
    ) {
        for (index, shown) in released.drain(..) {
            if let Some((text, kind)) = shown {
                let block = &blocks[index];
                self.overlay.upsert(block.id.clone(), block.bounds, text, kind, seq);
            }
        }
    }
}

/// Keep the first block of every id
fn dedupe(blocks: Vec<TextBlock>) -> Vec<TextBlock> {
    let mut seen = HashSet::new();
    blocks
        .into_iter()
        .filter(|block| seen.insert(block.id.clone()))
        .collect()
}

fn entries(blocks: &[TextBlock], shown: &[(String, BalloonKind)], seq: u64) -> Vec<OverlayEntry> {
    blocks
        .iter()
        .zip(shown)
        .map(|(block, (text, kind))| OverlayEntry {
            id: block.id.clone(),
            bounds: block.bounds,
            text: text.clone(),
            kind: *kind,
            frame_seq: seq,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{OverlayBoard, OverlayCommand};
    use crate::translate::engine::testing::FakeEngine;
    use crate::translate::{ModelController, ModelRegistry, ModelSpec, TranslationCache};
    use crate::vision::BlockBounds;
    use async_trait::async_trait;
    use crossbeam_channel::Receiver;
    use image::RgbaImage;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Recognizer returning a fixed set of blocks
    #[derive(Default)]
    struct FakeRecognizer {
        blocks: Vec<TextBlock>,
        fail: bool,
        delay: Option<Duration>,
        /// State written to the registry while recognizing
        flip_to: Mutex<Option<(ModelRegistry, ModelState)>>,
        calls: AtomicUsize,
    }

    impl FakeRecognizer {
        fn with_texts(texts: &[&str]) -> Self {
            let blocks = texts
                .iter()
                .enumerate()
                .map(|(i, text)| TextBlock::new(*text, BlockBounds::from_xywh(10, 40 * i as i32, 120, 24)))
                .collect();
            Self {
                blocks,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl TextRecognizer for FakeRecognizer {
        async fn recognize(&self, _image: &RgbaImage) -> Result<Vec<TextBlock>, RecognitionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some((registry, state)) = self.flip_to.lock().take() {
                registry.set(MODEL, state);
            }
            if self.fail {
                return Err(RecognitionError::Engine("no text layer".to_string()));
            }
            Ok(self.blocks.clone())
        }
    }

    const MODEL: &str = "m";

    struct Fixture {
        pipeline: Arc<TranslationPipeline>,
        engine: Arc<FakeEngine>,
        recognizer: Arc<FakeRecognizer>,
        registry: ModelRegistry,
        commands: Receiver<OverlayCommand>,
    }

    fn fixture(recognizer: FakeRecognizer, engine: FakeEngine, policy: AdmissionPolicy) -> Fixture {
        let engine = Arc::new(engine);
        let recognizer = Arc::new(recognizer);
        let registry = ModelRegistry::new();
        registry.set(MODEL, ModelState::Initialized);
        let translator = Translator::new(
            ModelController::new(engine.clone(), registry.clone()),
            TranslationCache::new(),
            ModelSpec::new(MODEL),
            "Spanish",
            Duration::from_secs(30),
        );
        let (overlay, commands) = OverlayHandle::channel();
        let pipeline = Arc::new(TranslationPipeline::new(
            recognizer.clone(),
            translator,
            overlay,
            policy,
            BalloonTexts::default(),
        ));
        Fixture {
            pipeline,
            engine,
            recognizer,
            registry,
            commands,
        }
    }

    fn frame() -> RawFrame {
        RawFrame::dense(vec![255; 4 * 4 * 4], 4, 4)
    }

    fn upserts(commands: &[OverlayCommand]) -> Vec<String> {
        commands
            .iter()
            .filter_map(|c| match c {
                OverlayCommand::Upsert(entry) => Some(entry.text.clone()),
                _ => None,
            })
            .collect()
    }

    fn last_sync(commands: &[OverlayCommand]) -> Vec<String> {
        commands
            .iter()
            .rev()
            .find_map(|c| match c {
                OverlayCommand::SyncFrame { entries, .. } => {
                    Some(entries.iter().map(|e| e.text.clone()).collect())
                }
                _ => None,
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_hello_is_translated_then_served_from_cache() {
        let f = fixture(
            FakeRecognizer::with_texts(&["Hello"]),
            FakeEngine::default().reply("Translate to Spanish: Hello", Ok("Hola")),
            AdmissionPolicy::Continuous,
        );
        let cancel = CancellationToken::new();

        let outcome = f.pipeline.handle(Ok(frame()), &cancel).await.unwrap();
        assert!(matches!(outcome, FrameOutcome::Rendered(s) if s.translated == 1));

        let commands: Vec<_> = f.commands.try_iter().collect();
        match &commands[0] {
            OverlayCommand::SyncFrame { entries, .. } => assert_eq!(entries[0].text, "Translating…"),
            other => panic!("unexpected first command {other:?}"),
        }
        assert_eq!(upserts(&commands), vec!["Hola"]);
        assert_eq!(last_sync(&commands), vec!["Hola"]);

        let outcome = f.pipeline.handle(Ok(frame()), &cancel).await.unwrap();
        assert!(matches!(outcome, FrameOutcome::Rendered(s) if s.cached == 1 && s.translated == 0));
        let commands: Vec<_> = f.commands.try_iter().collect();
        match &commands[0] {
            OverlayCommand::SyncFrame { entries, .. } => assert_eq!(entries[0].text, "Hola"),
            other => panic!("unexpected first command {other:?}"),
        }
        assert_eq!(f.engine.calls(), 1);
        assert_eq!(f.pipeline.stage(), PipelineStage::Idle);
    }

    #[tokio::test]
    async fn test_frame_dropped_while_busy() {
        let f = fixture(
            FakeRecognizer::with_texts(&["Hello"]),
            FakeEngine::default(),
            AdmissionPolicy::Continuous,
        );
        let first = f.pipeline.offer(Ok(frame())).unwrap();

        // Would fail reconstruction if it were ever processed.
        let broken = RawFrame::new(vec![0; 16], 4, 1, 16, 0);
        assert!(f.pipeline.offer(Ok(broken)).is_none());
        assert_eq!(f.pipeline.stats().dropped_busy, 1);

        let outcome = f.pipeline.process(first, &CancellationToken::new()).await;
        assert!(matches!(outcome, FrameOutcome::Rendered(_)));
        assert_eq!(f.recognizer.calls.load(Ordering::SeqCst), 1);
        assert!(!f.pipeline.gate().is_busy());
    }

    #[tokio::test]
    async fn test_error_state_skips_every_engine_call() {
        let f = fixture(
            FakeRecognizer::with_texts(&["Hello", "World"]),
            FakeEngine::default(),
            AdmissionPolicy::Continuous,
        );
        f.registry.set(MODEL, ModelState::Error("load failed".to_string()));

        let outcome = f.pipeline.handle(Ok(frame()), &CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, FrameOutcome::ModelNotReady(ModelState::Error(_))));
        assert_eq!(f.engine.calls(), 0);
        assert_eq!(f.recognizer.calls.load(Ordering::SeqCst), 0);
        assert!(f.commands.try_recv().is_err());
        assert!(!f.pipeline.gate().is_busy());
    }

    #[tokio::test]
    async fn test_readiness_lost_mid_frame_marks_blocks_failed() {
        let f = fixture(
            FakeRecognizer::with_texts(&["Hello", "World"]),
            FakeEngine::default(),
            AdmissionPolicy::Continuous,
        );
        *f.recognizer.flip_to.lock() = Some((f.registry.clone(), ModelState::Error("crashed".to_string())));

        let outcome = f.pipeline.handle(Ok(frame()), &CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, FrameOutcome::Rendered(s) if s.failed == 2));
        assert_eq!(f.engine.calls(), 0);
        let commands: Vec<_> = f.commands.try_iter().collect();
        assert_eq!(last_sync(&commands), vec!["Error", "Error"]);
        assert!(f.pipeline.translator().cache().is_empty());
    }

    #[tokio::test]
    async fn test_recognition_failure_releases_gate() {
        let recognizer = FakeRecognizer {
            fail: true,
            ..FakeRecognizer::with_texts(&["Hello"])
        };
        let f = fixture(recognizer, FakeEngine::default(), AdmissionPolicy::Continuous);

        let outcome = f.pipeline.handle(Ok(frame()), &CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, FrameOutcome::RecognitionFailed(_)));
        assert!(!f.pipeline.gate().is_busy());
        assert!(f.commands.try_recv().is_err());
        assert_eq!(f.pipeline.stage(), PipelineStage::Idle);
    }

    #[tokio::test]
    async fn test_empty_recognition_clears_overlays() {
        let f = fixture(FakeRecognizer::default(), FakeEngine::default(), AdmissionPolicy::Continuous);

        let outcome = f.pipeline.handle(Ok(frame()), &CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, FrameOutcome::Rendered(s) if s.blocks == 0));
        let commands: Vec<_> = f.commands.try_iter().collect();
        assert!(last_sync(&commands).is_empty());
        assert!(!f.pipeline.gate().is_busy());
    }

    #[tokio::test]
    async fn test_bad_buffer_releases_gate() {
        let f = fixture(
            FakeRecognizer::with_texts(&["Hello"]),
            FakeEngine::default(),
            AdmissionPolicy::Continuous,
        );
        let broken = RawFrame::new(vec![0; 16], 4, 1, 16, 0);

        let outcome = f.pipeline.handle(Ok(broken), &CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, FrameOutcome::CaptureFailed(CaptureError::ZeroPixelStride)));
        assert_eq!(f.recognizer.calls.load(Ordering::SeqCst), 0);
        assert!(!f.pipeline.gate().is_busy());
    }

    #[tokio::test]
    async fn test_unavailable_buffer_keeps_request_pending() {
        let f = fixture(
            FakeRecognizer::with_texts(&["Hello"]),
            FakeEngine::default(),
            AdmissionPolicy::OnDemand,
        );
        f.pipeline.capture_request().request();

        let event = Err(CaptureError::BufferUnavailable("surface lost".to_string()));
        assert!(f.pipeline.handle(event, &CancellationToken::new()).await.is_none());

        assert!(f.pipeline.capture_request().is_pending());
        assert_eq!(f.pipeline.stats().buffer_failures, 1);
        assert!(!f.pipeline.gate().is_busy());
    }

    #[tokio::test]
    async fn test_on_demand_needs_request() {
        let f = fixture(
            FakeRecognizer::with_texts(&["Hello"]),
            FakeEngine::default(),
            AdmissionPolicy::OnDemand,
        );
        assert!(f.pipeline.offer(Ok(frame())).is_none());
        assert_eq!(f.pipeline.stats().dropped_not_requested, 1);

        f.pipeline.capture_request().request();
        let admitted = f.pipeline.offer(Ok(frame()));
        assert!(admitted.is_some());
        assert!(!f.pipeline.capture_request().is_pending());
        drop(admitted);

        assert!(f.pipeline.offer(Ok(frame())).is_none());
    }

    #[tokio::test]
    async fn test_one_failed_block_does_not_abort_siblings() {
        let f = fixture(
            FakeRecognizer::with_texts(&["Hello", "World"]),
            FakeEngine::default()
                .reply("Translate to Spanish: Hello", Err("model crashed"))
                .reply("Translate to Spanish: World", Ok("Mundo")),
            AdmissionPolicy::Continuous,
        );

        let outcome = f.pipeline.handle(Ok(frame()), &CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, FrameOutcome::Rendered(s) if s.failed == 1 && s.translated == 1));
        let commands: Vec<_> = f.commands.try_iter().collect();
        assert_eq!(last_sync(&commands), vec!["Error", "Mundo"]);
        let failed: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                OverlayCommand::Upsert(entry) if entry.kind == BalloonKind::Failed => Some(entry.text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec!["Error"]);
        let cache = f.pipeline.translator().cache();
        assert!(cache.lookup("Hello").is_none());
        assert_eq!(cache.lookup("World").as_deref(), Some("Mundo"));
    }

    #[tokio::test]
    async fn test_cached_placeholder_text_does_not_hold_back_later_blocks() {
        let f = fixture(
            FakeRecognizer::with_texts(&["Translating…", "World"]),
            FakeEngine::default().reply("Translate to Spanish: World", Ok("Mundo")),
            AdmissionPolicy::Continuous,
        );
        f.pipeline.translator().cache().store("Translating…", "Translating…");

        let outcome = f.pipeline.handle(Ok(frame()), &CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, FrameOutcome::Rendered(s) if s.cached == 1 && s.translated == 1));
        let commands: Vec<_> = f.commands.try_iter().collect();
        match &commands[0] {
            OverlayCommand::SyncFrame { entries, .. } => {
                assert_eq!(entries[0].kind, BalloonKind::Translated);
                assert_eq!(entries[1].kind, BalloonKind::Pending);
            }
            other => panic!("unexpected first command {other:?}"),
        }
        assert_eq!(upserts(&commands), vec!["Mundo"]);
        assert_eq!(f.engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_translation_reading_like_error_text_is_not_a_failure() {
        let f = fixture(
            FakeRecognizer::with_texts(&["Fehler"]),
            FakeEngine::default().reply("Translate to Spanish: Fehler", Ok("Error")),
            AdmissionPolicy::Continuous,
        );

        f.pipeline.handle(Ok(frame()), &CancellationToken::new()).await.unwrap();

        let mut board = OverlayBoard::new();
        board.drain(&f.commands);
        let entry = board.entries().next().unwrap();
        assert_eq!(entry.text, "Error");
        assert_eq!(entry.kind, BalloonKind::Translated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_posted_in_block_order() {
        let f = fixture(
            FakeRecognizer::with_texts(&["first", "second", "third"]),
            FakeEngine::default()
                .slow("Translate to Spanish: first", Duration::from_millis(300))
                .slow("Translate to Spanish: second", Duration::from_millis(100)),
            AdmissionPolicy::Continuous,
        );

        f.pipeline.handle(Ok(frame()), &CancellationToken::new()).await.unwrap();

        let commands: Vec<_> = f.commands.try_iter().collect();
        assert_eq!(
            upserts(&commands),
            vec![
                "<Translate to Spanish: first>",
                "<Translate to Spanish: second>",
                "<Translate to Spanish: third>"
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_text_translated_once() {
        let mut recognizer = FakeRecognizer::with_texts(&["Start", "Options"]);
        recognizer
            .blocks
            .push(TextBlock::new("Start", BlockBounds::from_xywh(400, 400, 120, 24)));
        // Same text and position as the first block: same id.
        let repeated = recognizer.blocks[0].clone();
        recognizer.blocks.push(repeated);
        let f = fixture(recognizer, FakeEngine::default(), AdmissionPolicy::Continuous);

        let outcome = f.pipeline.handle(Ok(frame()), &CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, FrameOutcome::Rendered(s) if s.blocks == 3 && s.translated == 3));
        assert_eq!(f.engine.calls(), 2);

        let mut board = OverlayBoard::new();
        board.drain(&f.commands);
        assert_eq!(board.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_translating() {
        let engine = FakeEngine {
            delay: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        let f = fixture(FakeRecognizer::with_texts(&["Hello"]), engine, AdmissionPolicy::Continuous);
        let cancel = CancellationToken::new();

        let pipeline = f.pipeline.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { pipeline.handle(Ok(frame()), &token).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(f.pipeline.gate().is_busy());

        cancel.cancel();
        let outcome = task.await.unwrap().unwrap();

        assert!(matches!(outcome, FrameOutcome::Cancelled));
        assert!(!f.pipeline.gate().is_busy());
        assert!(f.pipeline.translator().cache().is_empty());
        assert_eq!(f.pipeline.stage(), PipelineStage::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_recognizing() {
        let recognizer = FakeRecognizer {
            delay: Some(Duration::from_secs(5)),
            ..FakeRecognizer::with_texts(&["Hello"])
        };
        let f = fixture(recognizer, FakeEngine::default(), AdmissionPolicy::Continuous);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = f.pipeline.handle(Ok(frame()), &cancel).await.unwrap();

        assert!(matches!(outcome, FrameOutcome::Cancelled));
        assert_eq!(f.engine.calls(), 0);
        assert!(!f.pipeline.gate().is_busy());
    }
}
