//! behavior-cam binary: record, preview or test a camera from a YAML config.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use behavior_cam::frame_source::FrameReader;
use behavior_cam::preview::{draw_fps_overlay, LogPreview, PreviewSurface};
use behavior_cam::validation::FrameStats;
use behavior_cam::{
    load_settings, Backend, FfmpegSinkFactory, FourCC, Frame, FrameSource, Recorder, Settings,
    Timing,
};
use clap::{Parser, Subcommand};
use image::{GrayImage, Rgb, RgbImage};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Preview frames between FPS log lines.
const PREVIEW_LOG_EVERY: u64 = 30;
/// Pause between frames of the `test` command.
const TEST_FRAME_INTERVAL: Duration = Duration::from_millis(500);

/// Camera acquisition and recording for behavioral experiments
#[derive(Parser, Debug)]
#[command(name = "behavior-cam")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record video and per-frame timestamps until Ctrl-C or the duration elapses
    Record {
        /// Path to the YAML configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Log a live preview while recording
        #[arg(long)]
        preview: bool,
    },

    /// Show live frames with an FPS overlay until Ctrl-C
    Preview {
        /// Path to the YAML configuration
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Capture a few frames and save them as PNG snapshots
    Test {
        /// Path to the YAML configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Number of frames to capture
        #[arg(short, long, default_value_t = 5)]
        frames: u32,

        /// Directory for the snapshots
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(err) = run(args.command) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Record {
            config,
            duration,
            preview,
        } => record(&config, duration.map(Duration::from_secs), preview),
        Command::Preview { config } => live_preview(&config),
        Command::Test {
            config,
            frames,
            output,
        } => test_capture(&config, frames, &output),
    }
}

/// Load settings, select a backend and configure it.
///
/// The returned source owns the backend; dropping it releases the camera.
fn open_camera(config: &Path) -> Result<(Settings, FrameSource)> {
    let settings = load_settings(config)
        .with_context(|| format!("failed to load config {}", config.display()))?;
    let timing = Timing::default();

    let mut backend = Backend::select(Backend::system_candidates(
        settings.camera.device_id,
        timing,
    ))
    .context("failed to initialize camera")?;
    let result = backend
        .configure(&settings.camera)
        .context("failed to configure camera")?;
    if !result.accepted() {
        warn!("no auto exposure mode produced a usable frame, continuing anyway");
    }

    Ok((settings, FrameSource::new(backend, timing.retry_delay)))
}

/// Flag cleared by Ctrl-C.
fn install_stop_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;
    Ok(running)
}

/// Sleep out whatever is left of `interval` since `tick`.
fn pace(tick: Instant, interval: Duration) {
    if let Some(rest) = interval.checked_sub(tick.elapsed()) {
        thread::sleep(rest);
    }
}

fn record(config: &Path, duration: Option<Duration>, preview: bool) -> Result<()> {
    let running = install_stop_flag()?;
    let (settings, mut source) = open_camera(config)?;

    let mut recorder = Recorder::new(
        &settings.camera,
        &settings.recording,
        Box::new(FfmpegSinkFactory),
    );
    if preview {
        recorder = recorder.with_preview(Box::new(LogPreview::new(PREVIEW_LOG_EVERY)));
    }
    let video = recorder
        .start_recording()
        .context("failed to start recording")?
        .to_path_buf();
    info!(video = %video.display(), "recording, press Ctrl-C to stop");

    let interval = settings.camera.frame_interval();
    let started = Instant::now();
    let mut dropped = 0u64;
    while running.load(Ordering::SeqCst) {
        if duration.is_some_and(|limit| started.elapsed() >= limit) {
            info!("recording duration reached");
            break;
        }
        let tick = Instant::now();
        let sample = source.get_frame();
        match sample.frame {
            Some(frame) if sample.is_valid => recorder
                .record_frame(&frame, sample.timestamp)
                .context("failed to record frame")?,
            _ => dropped += 1,
        }
        pace(tick, interval);
    }

    if let Some(summary) = recorder.stop_recording()? {
        info!(
            frames = summary.frames_written,
            dropped,
            video = %summary.video_path.display(),
            timestamps = %summary.timestamps_path.display(),
            "recording saved"
        );
    }
    source.reader_mut().release();
    Ok(())
}

fn live_preview(config: &Path) -> Result<()> {
    let running = install_stop_flag()?;
    let (settings, mut source) = open_camera(config)?;
    let mut surface = LogPreview::new(PREVIEW_LOG_EVERY);
    let interval = settings.camera.frame_interval();

    info!("previewing, press Ctrl-C to stop");
    while running.load(Ordering::SeqCst) {
        let tick = Instant::now();
        let sample = source.get_frame();
        if let (true, Some(mut frame)) = (sample.is_valid, sample.frame) {
            let fps = source.fps();
            draw_fps_overlay(&mut frame, fps);
            surface.show(&frame, fps);
        }
        pace(tick, interval);
    }

    surface.close();
    source.reader_mut().release();
    Ok(())
}

fn test_capture(config: &Path, frames: u32, output: &Path) -> Result<()> {
    let running = install_stop_flag()?;
    let (_settings, mut source) = open_camera(config)?;
    std::fs::create_dir_all(output)
        .with_context(|| format!("failed to create {}", output.display()))?;

    let saved = save_snapshots(&mut source, frames, output, &running, TEST_FRAME_INTERVAL)?;
    source.reader_mut().release();
    if saved == 0 && running.load(Ordering::SeqCst) {
        bail!("no valid frames captured");
    }
    Ok(())
}

/// Save up to `frames` valid frames as PNGs, stopping early once `running`
/// is cleared. Returns how many were saved.
fn save_snapshots<R: FrameReader>(
    source: &mut FrameSource<R>,
    frames: u32,
    output: &Path,
    running: &AtomicBool,
    interval: Duration,
) -> Result<u32> {
    let mut saved = 0;
    for index in 0..frames {
        if index > 0 {
            thread::sleep(interval);
        }
        if !running.load(Ordering::SeqCst) {
            info!(saved, "test capture interrupted");
            break;
        }
        let sample = source.get_frame();
        let Some(frame) = sample.frame.filter(|_| sample.is_valid) else {
            warn!(index, "failed to capture test frame");
            continue;
        };

        let stats = FrameStats::of(&frame);
        info!(
            index,
            resolution = %frame.resolution(),
            fourcc = %frame.fourcc,
            min = stats.min,
            max = stats.max,
            mean = format_args!("{:.2}", stats.mean),
            "test frame"
        );
        let path = output.join(format!("test_frame_{index}.png"));
        save_png(&frame, &path)?;
        info!(path = %path.display(), "saved test frame");
        saved += 1;
    }
    Ok(saved)
}

fn save_png(frame: &Frame, path: &Path) -> Result<()> {
    match frame.fourcc {
        FourCC::GREY => {
            let image = GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
                .context("frame buffer is smaller than its resolution")?;
            image.save(path)?;
        }
        fourcc if fourcc.bytes_per_pixel().is_some() => {
            let image = RgbImage::from_fn(frame.width, frame.height, |x, y| {
                let (r, g, b) = frame.pixel_at(x, y).unwrap_or_default();
                Rgb([r, g, b])
            });
            image.save(path)?;
        }
        fourcc => bail!("cannot save {fourcc} frames as PNG"),
    }
    Ok(())
}
