//! Screen Translator - live on-screen text translation overlay
//!
//! Captures the screen, recognizes text regions and draws translations made
//! by a locally hosted language model over the original text.

mod capture;
mod config;
mod hotkey;
mod overlay;
mod pipeline;
mod service;
mod storage;
mod translate;
mod vision;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::capture::{list_monitors, CaptureGrant, CaptureTarget};
use crate::config::AppConfig;
use crate::hotkey::HotkeyManager;
use crate::overlay::{LogSurface, OverlayCommand, OverlayHandle, TranslationOverlay};
use crate::pipeline::{AdmissionPolicy, BalloonTexts};
use crate::service::{ServiceConfig, ServiceParts, StartRequest, TranslatorService};
use crate::translate::{ModelSpec, OllamaEngine};
use crate::vision::TesseractRecognizer;

/// Screen Translator - on-screen text translation overlay
#[derive(Parser, Debug)]
#[command(name = "screen-translator")]
#[command(about = "Translates on-screen text with a local language model")]
struct Args {
    /// Monitor index to capture (0 = first monitor)
    #[arg(short, long)]
    monitor: Option<usize>,

    /// List available monitors and exit
    #[arg(long)]
    list_monitors: bool,

    /// Replay image files from a directory instead of capturing a monitor
    #[arg(long, value_name = "DIR")]
    replay: Option<PathBuf>,

    /// Log overlay contents instead of opening an overlay window
    #[arg(long)]
    headless: bool,

    /// Translate every frame that finds the pipeline idle
    #[arg(long)]
    continuous: bool,

    /// Model name known to the inference server
    #[arg(long)]
    model: Option<String>,

    /// Model version label
    #[arg(long, requires = "model")]
    model_version: Option<String>,

    /// Local path of imported model weights
    #[arg(long, requires = "model")]
    model_path: Option<PathBuf>,

    /// Target language, overriding the stored preference
    #[arg(long)]
    target_language: Option<String>,

    /// Consent to capturing the selected screen
    #[arg(long)]
    consent: bool,

    /// Write the effective configuration to the config directory and exit
    #[arg(long)]
    save_config: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    if args.list_monitors {
        println!("Available monitors:");
        let monitors = list_monitors().context("Failed to enumerate monitors")?;
        if monitors.is_empty() {
            println!("  No monitors detected");
        }
        for monitor in &monitors {
            println!(
                "  [{}] {} - {}x{}{}",
                monitor.index,
                monitor.name,
                monitor.width,
                monitor.height,
                if monitor.is_primary { " (primary)" } else { "" }
            );
        }
        return Ok(());
    }

    info!("Screen Translator starting...");

    let config_dir = storage::get_config_dir().ok();
    let config = match &config_dir {
        Some(dir) => config::load_or_default(dir)?,
        None => {
            warn!("No configuration directory, using defaults");
            AppConfig::default()
        }
    };

    if args.save_config {
        let dir = config_dir.context("No configuration directory")?;
        let path = dir.join(config::CONFIG_FILE_NAME);
        config::save_config(&config, &path)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    let target_language = args
        .target_language
        .clone()
        .or_else(|| config.general.target_language.clone())
        .unwrap_or_else(|| match &config_dir {
            Some(dir) => storage::load_target_language(&dir.join(storage::PREFERENCES_FILE_NAME)),
            None => translate::DEFAULT_TARGET_LANGUAGE.to_string(),
        });
    info!("Translating to {}", target_language);

    let target = match &args.replay {
        Some(dir) => CaptureTarget::Replay(dir.clone()),
        None => CaptureTarget::Monitor(args.monitor.unwrap_or(config.capture.monitor)),
    };
    let origin = match &target {
        CaptureTarget::Monitor(index) if !args.headless => monitor_origin(*index),
        _ => (0, 0),
    };
    let grant = if args.consent {
        CaptureGrant::approved(format!("cli:{:?}", target))
    } else {
        CaptureGrant::denied()
    };
    let model = selected_model(&args, &config);
    let policy = if args.continuous {
        AdmissionPolicy::Continuous
    } else {
        config.capture.policy
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("translator")
        .build()?;
    let _guard = runtime.enter();

    let recognizer = TesseractRecognizer::new(&config.vision);
    match runtime.block_on(recognizer.probe()) {
        Ok(version) => info!("Using {}", version),
        Err(e) => warn!("Text recognition will fail: {}", e),
    }
    let engine = OllamaEngine::new(&config.translation)?;
    let (overlay, commands) = OverlayHandle::channel();

    let mut service = TranslatorService::new(
        ServiceConfig {
            capture: config.capture.source_config(target),
            policy,
            target_language,
            translation_timeout: Duration::from_millis(config.translation.timeout_ms),
            shutdown_timeout: config.service.shutdown_timeout(),
            texts: BalloonTexts {
                pending: config.overlay.pending_text.clone(),
                error: config.overlay.error_text.clone(),
            },
        },
        ServiceParts {
            recognizer: Arc::new(recognizer),
            engine: Arc::new(engine),
            overlay,
        },
    );
    service
        .start(StartRequest { grant, model })
        .context("Failed to start translation")?;

    if args.headless {
        run_headless(&runtime, service, commands, policy);
    } else {
        run_overlay(&runtime, service, commands, config, origin)?;
    }

    info!("Screen Translator shutdown complete");
    Ok(())
}

/// Desktop position of a monitor, the primary origin when unknown
fn monitor_origin(index: usize) -> (i32, i32) {
    match list_monitors() {
        Ok(monitors) => monitors
            .iter()
            .find(|m| m.index == index)
            .map(|m| (m.x, m.y))
            .unwrap_or((0, 0)),
        Err(e) => {
            warn!("Failed to locate monitor {}: {}", index, e);
            (0, 0)
        }
    }
}

/// Model from the command line, then from the configuration
fn selected_model(args: &Args, config: &AppConfig) -> Option<ModelSpec> {
    if let Some(name) = &args.model {
        let mut model = ModelSpec::new(name.clone());
        if let Some(version) = &args.model_version {
            model.version = version.clone();
        }
        if let Some(path) = &args.model_path {
            model.size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            model.path = Some(path.clone());
            model.imported = true;
        }
        return Some(model);
    }
    config.translation.default_model.clone().map(ModelSpec::new)
}

/// Log overlay contents; each line on stdin requests a capture
fn run_headless(
    runtime: &tokio::runtime::Runtime,
    mut service: TranslatorService,
    commands: Receiver<OverlayCommand>,
    policy: AdmissionPolicy,
) {
    info!("Running headless");
    let surface = LogSurface::spawn(commands);
    if policy == AdmissionPolicy::OnDemand {
        info!("Press Enter to capture and translate, Ctrl+C to quit");
    }

    runtime.block_on(async {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(_)) => {
                        if let Err(e) = service.capture_now() {
                            warn!("Capture request ignored: {}", e);
                        } else if let Some(state) = service.model_state() {
                            info!("Capture requested (pipeline {}, model {})", service.stage(), state);
                        }
                    }
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                },
            }
        }
        if let Some(stats) = service.pipeline_stats() {
            info!(
                "{} frame(s) admitted, {} dropped while busy, {} buffer failure(s)",
                stats.admitted, stats.dropped_busy, stats.buffer_failures
            );
        }
        service.stop().await;
    });

    // Dropping the service closes the overlay channel.
    drop(service);
    if let Some(board) = surface.join() {
        info!("{} balloon(s) on screen at exit", board.len());
    }
}

/// Run the overlay window on the main thread until Ctrl+C
fn run_overlay(
    runtime: &tokio::runtime::Runtime,
    mut service: TranslatorService,
    commands: Receiver<OverlayCommand>,
    config: AppConfig,
    origin: (i32, i32),
) -> Result<()> {
    let hotkeys = match config.overlay.capture_hotkey.as_deref() {
        Some(hotkey) => match HotkeyManager::new(service.capture_request()) {
            Ok(mut manager) => match manager.register_capture_hotkey(hotkey) {
                Ok(()) => Some(manager),
                Err(e) => {
                    error!("Capture hotkey unavailable: {}", e);
                    None
                }
            },
            Err(e) => {
                error!("Failed to initialize hotkeys: {}", e);
                None
            }
        },
        None => None,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let stopped = shutdown.clone();
    runtime.spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        service.stop().await;
        stopped.store(true, Ordering::Relaxed);
    });

    TranslationOverlay::new(commands, config.overlay, hotkeys, shutdown)
        .with_origin(origin.0, origin.1)
        .run()
}
