//! Screen Capture Layer
//!
//! Frame sources deliver raw, possibly row-padded RGBA buffers on every
//! frame-ready tick. Opening a source requires a capture grant from the user.

pub mod frame;
pub mod reconstruct;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use self::frame::{RawFrame, RGBA_PIXEL_STRIDE};

pub use reconstruct::reconstruct;

/// Errors raised while acquiring or decoding frames
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("screen capture permission denied: {0}")]
    PermissionDenied(String),
    #[error("pixel stride is zero")]
    ZeroPixelStride,
    #[error("unsupported pixel stride {0} (expected 4)")]
    UnsupportedPixelStride(u32),
    #[error("frame has no pixels")]
    EmptyFrame,
    #[error("row stride {row_stride} is smaller than a dense row ({min} bytes)")]
    InvalidRowStride { row_stride: u32, min: u32 },
    #[error("frame buffer too small: expected {expected} bytes, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("frame buffer unavailable: {0}")]
    BufferUnavailable(String),
    #[error("capture source error: {0}")]
    Source(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What to capture
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureTarget {
    /// Monitor by index (0 = first enumerated monitor)
    Monitor(usize),
    /// Replay image files from a directory in name order
    Replay(PathBuf),
}

/// Screen capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Capture target
    pub target: CaptureTarget,
    /// Maximum frames per second to deliver
    pub max_fps: u32,
    /// Row alignment in bytes applied to replayed frames (0 = dense rows)
    pub replay_row_alignment: u32,
    /// Restart the replay directory once exhausted
    pub replay_loop: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target: CaptureTarget::Monitor(0),
            max_fps: 2,
            replay_row_alignment: 64,
            replay_loop: false,
        }
    }
}

impl CaptureConfig {
    fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / self.max_fps.max(1) as u64)
    }
}

/// User authorization to capture the screen
///
/// Produced by the consent flow and handed to the service at start time.
#[derive(Debug, Clone, Default)]
pub struct CaptureGrant {
    /// Whether the user approved the capture request
    pub approved: bool,
    /// Opaque authorization token
    pub token: Option<String>,
}

impl CaptureGrant {
    /// Grant produced after the user consented to capturing `target`
    pub fn approved(token: impl Into<String>) -> Self {
        Self {
            approved: true,
            token: Some(token.into()),
        }
    }

    /// Grant produced when the user declined
    pub fn denied() -> Self {
        Self::default()
    }

    /// Check the grant before any capture resource is opened
    pub fn validate(&self) -> Result<&str, CaptureError> {
        if !self.approved {
            return Err(CaptureError::PermissionDenied(
                "capture request was not approved".to_string(),
            ));
        }
        match self.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(CaptureError::PermissionDenied(
                "capture token is missing".to_string(),
            )),
        }
    }
}

/// A producer of raw frames
#[async_trait]
pub trait FrameSource: Send {
    /// Human readable description for logs
    fn describe(&self) -> String;

    /// Wait for the next frame-ready notification.
    ///
    /// Returns `None` once the source is exhausted or closed. An `Err` means a
    /// notification arrived but no buffer could be acquired.
    async fn next_frame(&mut self) -> Option<Result<RawFrame, CaptureError>>;

    /// Release the underlying capture resources
    fn close(&mut self);
}

/// Open the frame source for `config.target` after validating the grant
pub fn open_frame_source(
    grant: &CaptureGrant,
    config: &CaptureConfig,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    let token = grant.validate()?;
    debug!("Capture grant accepted (token length {})", token.len());

    match &config.target {
        CaptureTarget::Monitor(index) => Ok(Box::new(MonitorFrameSource::new(*index, config))),
        CaptureTarget::Replay(dir) => Ok(Box::new(ReplayFrameSource::open(dir, config)?)),
    }
}

/// Information about a capturable monitor
#[derive(Debug, Clone)]
pub struct MonitorInfo {
    pub index: usize,
    pub name: String,
    /// Position of the monitor's top-left corner on the desktop
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub is_primary: bool,
}

/// Enumerate monitors available for capture
pub fn list_monitors() -> Result<Vec<MonitorInfo>, CaptureError> {
    let monitors = xcap::Monitor::all().map_err(|e| CaptureError::Source(e.to_string()))?;

    Ok(monitors
        .iter()
        .enumerate()
        .map(|(index, monitor)| MonitorInfo {
            index,
            name: monitor.name().unwrap_or_else(|_| "Unknown".to_string()),
            x: monitor.x().unwrap_or(0),
            y: monitor.y().unwrap_or(0),
            width: monitor.width().unwrap_or(0),
            height: monitor.height().unwrap_or(0),
            is_primary: monitor.is_primary().unwrap_or(false),
        })
        .collect())
}

/// Monitor capture via xcap, polled at the configured rate
pub struct MonitorFrameSource {
    index: usize,
    ticker: Interval,
    closed: bool,
}

impl MonitorFrameSource {
    pub fn new(index: usize, config: &CaptureConfig) -> Self {
        let mut ticker = interval(config.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Monitor capture on index {} at {} fps", index, config.max_fps);
        Self {
            index,
            ticker,
            closed: false,
        }
    }
}

#[async_trait]
impl FrameSource for MonitorFrameSource {
    fn describe(&self) -> String {
        format!("monitor #{}", self.index)
    }

    async fn next_frame(&mut self) -> Option<Result<RawFrame, CaptureError>> {
        if self.closed {
            return None;
        }
        self.ticker.tick().await;

        let index = self.index;
        let captured = tokio::task::spawn_blocking(move || {
            let monitor = xcap::Monitor::all()
                .map_err(|e| CaptureError::Source(e.to_string()))?
                .into_iter()
                .nth(index)
                .ok_or_else(|| CaptureError::Source(format!("monitor {index} not found")))?;
            let image = monitor
                .capture_image()
                .map_err(|e| CaptureError::BufferUnavailable(e.to_string()))?;
            let (width, height) = (image.width(), image.height());
            Ok(RawFrame::dense(image.into_raw(), width, height))
        })
        .await;

        Some(match captured {
            Ok(result) => result,
            Err(e) => Err(CaptureError::BufferUnavailable(e.to_string())),
        })
    }

    fn close(&mut self) {
        if !self.closed {
            info!("Monitor capture #{} closed", self.index);
        }
        self.closed = true;
    }
}

/// Replays still images as if they came from a hardware frame buffer
///
/// Rows are padded to `replay_row_alignment` bytes so the frames exercise the
/// same reconstruction path as real captures.
pub struct ReplayFrameSource {
    files: Vec<PathBuf>,
    position: usize,
    row_alignment: u32,
    looping: bool,
    ticker: Interval,
    closed: bool,
}

impl ReplayFrameSource {
    pub fn open(dir: &Path, config: &CaptureConfig) -> Result<Self, CaptureError> {
        let files = list_replay_files(dir)?;
        if files.is_empty() {
            return Err(CaptureError::Source(format!(
                "no replayable images in {}",
                dir.display()
            )));
        }
        info!("Replaying {} frames from {:?}", files.len(), dir);

        let mut ticker = interval(config.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Self {
            files,
            position: 0,
            row_alignment: config.replay_row_alignment,
            looping: config.replay_loop,
            ticker,
            closed: false,
        })
    }
}

#[async_trait]
impl FrameSource for ReplayFrameSource {
    fn describe(&self) -> String {
        format!("replay of {} files", self.files.len())
    }

    async fn next_frame(&mut self) -> Option<Result<RawFrame, CaptureError>> {
        if self.closed {
            return None;
        }
        if self.position >= self.files.len() {
            if !self.looping {
                return None;
            }
            self.position = 0;
        }
        self.ticker.tick().await;

        let path = self.files[self.position].clone();
        self.position += 1;
        let alignment = self.row_alignment;

        let loaded = tokio::task::spawn_blocking(move || load_padded_frame(&path, alignment)).await;
        Some(match loaded {
            Ok(result) => result,
            Err(e) => Err(CaptureError::BufferUnavailable(e.to_string())),
        })
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

fn list_replay_files(dir: &Path) -> Result<Vec<PathBuf>, CaptureError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

fn load_padded_frame(path: &Path, row_alignment: u32) -> Result<RawFrame, CaptureError> {
    let image = image::open(path)
        .map_err(|e| {
            warn!("Failed to decode replay frame {:?}: {}", path, e);
            CaptureError::BufferUnavailable(e.to_string())
        })?
        .to_rgba8();
    let (width, height) = image.dimensions();
    Ok(pad_rows(image.into_raw(), width, height, row_alignment))
}

/// Lay out a dense RGBA buffer with rows padded to `alignment` bytes
pub fn pad_rows(dense: Vec<u8>, width: u32, height: u32, alignment: u32) -> RawFrame {
    let dense_row = width * RGBA_PIXEL_STRIDE;
    if alignment == 0 || dense_row % alignment == 0 {
        return RawFrame::dense(dense, width, height);
    }

    let row_stride = dense_row.div_ceil(alignment) * alignment;
    let mut padded = Vec::with_capacity(row_stride as usize * height as usize);
    for row in dense.chunks(dense_row as usize) {
        padded.extend_from_slice(row);
        padded.resize(padded.len() + (row_stride - dense_row) as usize, 0);
    }
    RawFrame::new(padded, width, height, row_stride, RGBA_PIXEL_STRIDE)
}
