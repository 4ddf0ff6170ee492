// SPDX-License-Identifier: GPL-3.0-only

use camera_pipeline::backends::camera::CaptureBackendType;
use camera_pipeline::gpu::GpuPreference;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-pipeline")]
#[command(about = "Dual-camera capture and GPU preview pipeline")]
#[command(version = camera_pipeline::constants::app_info::version())]
struct Cli {
    /// Config file (default: ~/.config/camera-pipeline/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Capture backend
    #[arg(short, long, global = true, value_enum)]
    backend: Option<BackendArg>,

    /// GPU backend
    #[arg(short, long, global = true, value_enum)]
    gpu: Option<GpuArg>,

    /// Only run the front slot
    #[arg(long, global = true)]
    single: bool,

    /// Capture resolution for both slots, e.g. 1280x720
    #[arg(short, long, global = true, value_parser = cli::parse_resolution)]
    resolution: Option<(u32, u32)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Synthetic,
    Gstreamer,
}

#[derive(Clone, Copy, ValueEnum)]
enum GpuArg {
    Auto,
    Wgpu,
    Software,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline and print stats
    Run {
        /// Stop after this many seconds (default: until Ctrl+C)
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Save one PNG per active camera
    Snapshot {
        /// Output directory (default: ~/Pictures/Camera)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Print the effective configuration as JSON
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=camera_pipeline=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let args = Cli::parse();

    let overrides = cli::Overrides {
        backend: args.backend.map(|b| match b {
            BackendArg::Synthetic => CaptureBackendType::Synthetic,
            BackendArg::Gstreamer => CaptureBackendType::GStreamer,
        }),
        gpu: args.gpu.map(|g| match g {
            GpuArg::Auto => GpuPreference::Auto,
            GpuArg::Wgpu => GpuPreference::Wgpu,
            GpuArg::Software => GpuPreference::Software,
        }),
        single: args.single,
        resolution: args.resolution,
    };
    let config = cli::load_config(args.config.as_deref(), &overrides)?;

    match args.command {
        Commands::Run { duration } => cli::run(config, duration),
        Commands::Snapshot { output, timeout } => cli::snapshot(config, output, timeout),
        Commands::Config { save } => cli::print_config(&config, save, args.config),
    }
}
