//! Overlay Presentation Layer
//!
//! Floating balloons showing translated text over the original text regions.
//! The pipeline never touches the render surface directly: it sends
//! [`OverlayCommand`]s through an [`OverlayHandle`] and the render thread
//! applies them to its [`OverlayBoard`].

pub mod board;
pub mod widgets;

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use egui::{Color32, FontId, RichText, Rounding};
use egui_overlay::{egui_render_three_d::ThreeDBackend, egui_window_glfw_passthrough::GlfwBackend, EguiOverlay};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

use crate::hotkey::HotkeyManager;
use crate::vision::BlockBounds;
use crate::overlay::widgets::{BalloonStyle, BalloonStyles};

pub use board::{OverlayBoard, OverlayCommand, OverlayEntry, OverlayHandle};
pub use widgets::BalloonKind;

/// Overlay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Overlay opacity (0.0 - 1.0)
    pub opacity: f32,
    /// Font size in points
    pub font_size: f32,
    /// Maximum balloon width in points
    pub max_width: f32,
    /// Text shown while a block is being translated
    pub pending_text: String,
    /// Text shown when a block could not be translated
    pub error_text: String,
    /// Hotkey that triggers "capture and translate now"
    pub capture_hotkey: Option<String>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            opacity: 0.9,
            font_size: 14.0,
            max_width: 420.0,
            pending_text: "Translating…".to_string(),
            error_text: "Error".to_string(),
            capture_hotkey: Some("Ctrl+Shift+T".to_string()),
        }
    }
}

/// Click-through overlay window drawing one balloon per entry
pub struct TranslationOverlay {
    board: OverlayBoard,
    commands: Receiver<OverlayCommand>,
    config: OverlayConfig,
    styles: BalloonStyles,
    hotkeys: Option<HotkeyManager>,
    shutdown: Arc<AtomicBool>,
    /// Desktop position of the captured monitor
    origin: (i32, i32),
}

impl TranslationOverlay {
    pub fn new(
        commands: Receiver<OverlayCommand>,
        config: OverlayConfig,
        hotkeys: Option<HotkeyManager>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            board: OverlayBoard::new(),
            commands,
            config,
            styles: BalloonStyles::default(),
            hotkeys,
            shutdown,
            origin: (0, 0),
        }
    }

    /// Offset balloons by the captured monitor's desktop position
    pub fn with_origin(mut self, x: i32, y: i32) -> Self {
        self.origin = (x, y);
        self
    }

    /// Top-left corner of a balloon in points: below the translated text
    fn balloon_pos(&self, bounds: &BlockBounds, pixels_per_point: f32) -> egui::Pos2 {
        egui::pos2(
            (self.origin.0 + bounds.left) as f32 / pixels_per_point,
            (self.origin.1 + bounds.bottom) as f32 / pixels_per_point,
        )
    }

    /// Run the overlay event loop (blocking)
    /// This should be called from the main thread
    pub fn run(self) -> Result<()> {
        info!("Starting translation overlay...");
        egui_overlay::start(self);
        Ok(())
    }
}

impl EguiOverlay for TranslationOverlay {
    fn gui_run(
        &mut self,
        egui_ctx: &egui::Context,
        _default_gfx_backend: &mut ThreeDBackend,
        glfw_backend: &mut GlfwBackend,
    ) {
        if self.shutdown.load(Ordering::Relaxed) {
            info!("Overlay shutdown requested");
            // Ends the event loop and returns from `run`.
            glfw_backend.window.set_should_close(true);
            return;
        }

        if let Some(hotkeys) = &self.hotkeys {
            hotkeys.poll_events();
        }

        self.board.drain(&self.commands);

        if self.board.is_empty() {
            egui_ctx.request_repaint_after(Duration::from_millis(100));
            return;
        }

        let scale = egui_ctx.pixels_per_point();
        for entry in self.board.entries() {
            let style = self.styles.for_kind(entry.kind);
            let pos = self.balloon_pos(&entry.bounds, scale);

            egui::Area::new(egui::Id::new(entry.id.as_str()))
                .fixed_pos(pos)
                .order(egui::Order::Foreground)
                .interactable(false)
                .show(egui_ctx, |ui| {
                    ui.set_max_width(self.config.max_width);
                    draw_balloon(ui, &entry.text, style, &self.config);
                });
        }

        egui_ctx.request_repaint_after(Duration::from_millis(50));
    }
}

fn to_color(rgba: [f32; 4], opacity: f32) -> Color32 {
    Color32::from_rgba_unmultiplied(
        (rgba[0] * 255.0) as u8,
        (rgba[1] * 255.0) as u8,
        (rgba[2] * 255.0) as u8,
        (rgba[3] * opacity * 255.0) as u8,
    )
}

/// Draw a single balloon
fn draw_balloon(ui: &mut egui::Ui, text: &str, style: &BalloonStyle, config: &OverlayConfig) {
    egui::Frame::none()
        .fill(to_color(style.background, config.opacity))
        .rounding(Rounding::same(style.corner_radius))
        .inner_margin(style.padding)
        .show(ui, |ui| {
            ui.label(
                RichText::new(text)
                    .color(to_color(style.text_color, config.opacity))
                    .font(FontId::proportional(config.font_size)),
            );
        });
}

/// Headless render context: applies commands on its own thread and logs the board
pub struct LogSurface {
    handle: Option<JoinHandle<OverlayBoard>>,
}

impl LogSurface {
    pub fn spawn(commands: Receiver<OverlayCommand>) -> Self {
        let handle = std::thread::Builder::new()
            .name("overlay-log".to_string())
            .spawn(move || {
                let mut board = OverlayBoard::new();
                loop {
                    match commands.recv_timeout(Duration::from_millis(250)) {
                        Ok(command) => {
                            board.apply(command);
                            board.drain(&commands);
                            log_board(&board);
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Overlay log surface stopped");
                board
            })
            .ok();
        Self { handle }
    }

    /// Wait until every handle is dropped and return the final board
    pub fn join(mut self) -> Option<OverlayBoard> {
        self.handle.take().and_then(|h| h.join().ok())
    }
}

fn log_board(board: &OverlayBoard) {
    info!("Overlay: {} balloon(s)", board.len());
    for entry in board.entries() {
        info!(
            "  [{},{}] {}",
            entry.bounds.left,
            entry.bounds.bottom,
            entry.text.replace('\n', " / ")
        );
    }
}
