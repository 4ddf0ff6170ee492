// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the capture pipeline
//!
//! This module provides command-line functionality for:
//! - Running the dual pipeline headless with periodic stats
//! - Saving one snapshot per side
//! - Printing or saving the effective configuration

use camera_pipeline::backends::camera::{CaptureBackendType, Side};
use camera_pipeline::config::PipelineConfig;
use camera_pipeline::constants::timing;
use camera_pipeline::gpu::GpuPreference;
use camera_pipeline::pipeline::{CameraPipeline, SourceStatus};
use camera_pipeline::render::{LoggingSurface, SnapshotSurface};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Default folder name for snapshots
const DEFAULT_SAVE_FOLDER: &str = "Camera";

/// Command-line overrides applied on top of the loaded config
#[derive(Debug, Default)]
pub struct Overrides {
    pub backend: Option<CaptureBackendType>,
    pub gpu: Option<GpuPreference>,
    pub single: bool,
    pub resolution: Option<(u32, u32)>,
}

/// Load the config file (explicit path or default location) and apply overrides
pub fn load_config(
    path: Option<&Path>,
    overrides: &Overrides,
) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::load_default()?,
    };

    if let Some(backend) = overrides.backend {
        config.capture_backend = backend;
    }
    if let Some(gpu) = overrides.gpu {
        config.gpu = gpu;
    }
    if overrides.single {
        config.dual = false;
    }
    if let Some((width, height)) = overrides.resolution {
        for side in Side::ALL {
            let capture = config.capture_mut(side);
            *capture = capture.with_resolution(width, height);
        }
    }
    config.validate()?;
    Ok(config)
}

/// Parse `WIDTHxHEIGHT`
pub fn parse_resolution(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("Expected WIDTHxHEIGHT, got '{}'", value))?;
    let width = w.trim().parse().map_err(|_| format!("Invalid width '{}'", w))?;
    let height = h.trim().parse().map_err(|_| format!("Invalid height '{}'", h))?;
    Ok((width, height))
}

fn install_stop_flag() -> Result<Arc<AtomicBool>, Box<dyn std::error::Error>> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;
    Ok(stop_flag)
}

fn report_start(pipeline: &CameraPipeline) {
    for (side, result) in pipeline.start().iter() {
        if let Err(e) = result {
            println!("  {} camera: {}", side, e);
        }
    }
}

fn print_statuses(statuses: &[SourceStatus]) {
    for status in statuses {
        match status {
            SourceStatus::Failed { side, error } => {
                println!("\n{} camera failed: {} (preview frozen)", side, error)
            }
            SourceStatus::Reconfigured { side, config } => {
                println!("\n{} camera reconfigured: {}", side, config)
            }
            _ => {}
        }
    }
}

/// Run the pipeline for `duration` seconds, or until Ctrl+C when `None`
pub fn run(
    config: PipelineConfig,
    duration: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Capture backend: {}", config.capture_backend);
    println!("GPU backend: {}", config.gpu);
    for side in config.active_sides() {
        println!("  {}: {}", side, config.capture(side));
    }

    let pipeline = CameraPipeline::new(config)?;
    pipeline.attach_surface(Box::new(LoggingSurface::default()));

    let stop_flag = install_stop_flag()?;
    println!();
    println!("Running... (press Ctrl+C to stop)");
    report_start(&pipeline);

    let start = Instant::now();
    let limit = duration.map(Duration::from_secs);
    let mut last_stats = Instant::now();

    loop {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping...");
            break;
        }
        if limit.is_some_and(|limit| start.elapsed() >= limit) {
            break;
        }

        print_statuses(&pipeline.poll_status());

        if last_stats.elapsed() >= timing::STATS_INTERVAL {
            last_stats = Instant::now();
            let elapsed = start.elapsed().as_secs();
            print!("\r{:02}:{:02}", elapsed / 60, elapsed % 60);
            for side in pipeline.config().active_sides() {
                let render = pipeline.render_stats(side);
                let dropped = pipeline.queue_stats(side).map(|s| s.dropped).unwrap_or(0);
                print!(
                    "  {}: {} converted, {} failed, {} dropped",
                    side, render.converted, render.failed, dropped
                );
            }
            std::io::Write::flush(&mut std::io::stdout())?;
        }

        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    for (side, result) in pipeline.stop().iter() {
        if let Err(e) = result {
            println!("  {} camera stop: {}", side, e);
        }
    }
    Ok(())
}

/// Run until every active side presented one frame and save each as PNG
pub fn snapshot(
    config: PipelineConfig,
    output: Option<PathBuf>,
    timeout_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let output_dir = output.unwrap_or_else(get_default_snapshot_dir);
    std::fs::create_dir_all(&output_dir)?;
    println!("Output directory: {}", output_dir.display());

    let sides = config.active_sides();
    let pipeline = CameraPipeline::new(config)?;
    let surface = SnapshotSurface::new(Arc::clone(pipeline.context()), output_dir);
    let saved = surface.saved();
    pipeline.attach_surface(Box::new(surface));

    let stop_flag = install_stop_flag()?;
    report_start(&pipeline);

    let start = Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    while start.elapsed() < timeout && !stop_flag.load(Ordering::SeqCst) {
        print_statuses(&pipeline.poll_status());
        let done = {
            let saved = saved.lock();
            sides.iter().all(|side| saved[*side].is_some())
        };
        if done {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    let _ = pipeline.stop();

    let saved = saved.lock();
    let mut missing = Vec::new();
    for side in &sides {
        match &saved[*side] {
            Some(path) => println!("{} snapshot saved: {}", side, path.display()),
            None => missing.push(side.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(format!("No frame captured for: {}", missing.join(", ")).into());
    }
    Ok(())
}

/// Print the effective config as JSON; with `save`, write it to `path` or the default location
pub fn print_config(
    config: &PipelineConfig,
    save: bool,
    path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if !save {
        return Ok(());
    }
    let path = path
        .or_else(PipelineConfig::default_path)
        .ok_or("No config directory available")?;
    config.save(&path)?;
    println!("Saved to {}", path.display());
    Ok(())
}

/// Get default snapshot directory
fn get_default_snapshot_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}
