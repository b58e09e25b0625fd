// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for headless use
//!
//! - Listing cameras and the filter catalog
//! - Recording with a live (offscreen) preview
//! - Probing finished recordings

use camera_recorder::backends::camera::{CameraBackend, Facing, GstCameraBackend};
use camera_recorder::config::Config;
use camera_recorder::constants::recording;
use camera_recorder::errors::ErrorKind;
use camera_recorder::filters::{self, FilterSelector};
use camera_recorder::gpu::WgpuDevice;
use camera_recorder::media::{GstDecoderFactory, GstMediaInspector, MediaInspector};
use camera_recorder::pipelines::video::GstEncoderBackend;
use camera_recorder::renderer::WgpuRenderBackend;
use camera_recorder::session::{RecordOutcome, SessionBackends, SessionController, SessionListener};
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Offscreen display size used when recording from the CLI
const CLI_DISPLAY: (u32, u32) = (1280, 720);

/// Time allowed for the first preview frame to reach the renderer
const WARMUP_TIMEOUT: Duration = Duration::from_secs(5);

/// List all available cameras
pub fn list_cameras() -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;

    let backend = GstCameraBackend::new();
    let cameras = backend.enumerate();
    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for (index, camera) in cameras.iter().enumerate() {
        println!("  [{}] {} ({}, {})", index, camera.name, camera.facing, camera.path);

        match backend.open(camera) {
            Ok(session) => {
                let caps = session.capabilities();
                let mut sizes = caps.sizes.clone();
                sizes.sort_by_key(|size| std::cmp::Reverse(size.area()));
                let shown: Vec<String> = sizes.iter().take(4).map(|s| s.to_string()).collect();
                println!("      Sizes: {}", shown.join(", "));
                println!("      Frame rates: {:?}", caps.frame_rates);
                println!("      Torch: {}", if caps.torch { "yes" } else { "no" });
            }
            Err(e) => println!("      Unavailable: {}", e),
        }
        println!();
    }

    Ok(())
}

/// Print the filter catalog
pub fn list_filters() -> Result<(), Box<dyn std::error::Error>> {
    println!("Filters:");
    for selector in FilterSelector::ALL {
        let descriptor = filters::resolve(selector);
        println!(
            "  [{}] {:<12} {:?}",
            selector.index(),
            selector.display_name(),
            descriptor.program
        );
    }
    Ok(())
}

/// Options for [`record_video`]
pub struct RecordOptions {
    pub facing: Option<Facing>,
    pub filter: Option<FilterSelector>,
    pub duration_ms: Option<u64>,
    pub key: Option<String>,
    pub output: Option<PathBuf>,
}

struct ConsoleListener;

impl SessionListener for ConsoleListener {
    fn on_preview_ready(&self, width: u32, height: u32) {
        println!("Preview ready: {}x{}", width, height);
    }

    fn on_error(&self, kind: ErrorKind, detail: &str) {
        eprintln!("Error ({}): {}", kind, detail);
    }
}

/// Record with the session controller, stopping at the duration, the
/// configured maximum or Ctrl+C
pub fn record_video(options: RecordOptions) -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;

    let mut config = Config::load();
    if let Some(output) = options.output {
        config.output_root = Some(output);
    }
    let facing = options.facing.unwrap_or(config.last_facing);
    let filter = options.filter.unwrap_or(config.last_filter);
    let duration = Duration::from_millis(
        options
            .duration_ms
            .unwrap_or(config.max_duration_ms)
            .min(config.max_duration_ms),
    );
    let key = options
        .key
        .unwrap_or_else(|| Local::now().format(recording::KEY_TIME_FORMAT).to_string());

    let backends = SessionBackends::<WgpuDevice> {
        camera: Arc::new(GstCameraBackend::new()),
        encoder: Arc::new(GstEncoderBackend),
        inspector: Arc::new(GstMediaInspector),
        decoders: Arc::new(GstDecoderFactory),
    };
    let mut session = SessionController::new(
        WgpuRenderBackend::new(),
        backends,
        config,
        Arc::new(ConsoleListener),
    )?;

    session.select_filter(filter);
    session.start_preview(facing)?;
    session.attach_display(CLI_DISPLAY.0, CLI_DISPLAY.1)?;

    let warmup = Instant::now();
    while session.render().frames_drawn() == 0 {
        if warmup.elapsed() > WARMUP_TIMEOUT {
            return Err("No frames received from camera".into());
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    println!("Camera: {} ({})", facing, filter);
    println!("Output: {}", session.config().recordings_root().join(&key).display());
    println!();
    println!("Recording... (press Ctrl+C to stop early)");

    let stop_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop_flag);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })?;

    session.start_record(&key)?;
    while let Some(elapsed) = session.recording_elapsed() {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }
        if elapsed >= duration || session.should_auto_stop() {
            break;
        }

        let secs = elapsed.as_secs();
        print!("\rRecording: {:02}:{:02}", secs / 60, secs % 60);
        std::io::Write::flush(&mut std::io::stdout())?;
        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    match session.stop_record()? {
        RecordOutcome::TooShort { elapsed_ms } => {
            println!(
                "Recording discarded: {} ms is below the {} ms minimum",
                elapsed_ms,
                session.config().min_duration_ms
            );
        }
        RecordOutcome::Saved { summary, .. } => {
            let video = session.commit_record()?;
            println!("Video saved: {}", video.video_path.display());
            println!("Thumbnail: {}", video.thumbnail_path.display());
            println!(
                "Size: {}x{}, duration: {} ms, frames: {}",
                video.width, video.height, video.duration_ms, summary.frames
            );
        }
    }

    if let Err(e) = session.config().save() {
        eprintln!("Warning: failed to save settings: {}", e);
    }
    Ok(())
}

/// Print width, height and duration of a recorded file
pub fn probe_file(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let info = GstMediaInspector.probe(path)?;
    println!("{}", path.display());
    println!("  Size: {}x{}", info.width, info.height);
    println!("  Duration: {} ms", info.duration_ms);
    Ok(())
}
