// SPDX-License-Identifier: GPL-3.0-only

use camera_control::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-control")]
#[command(about = "Drive a camera session from the command line")]
#[command(version)]
struct Cli {
    /// Configuration file (default: ~/.config/camera-control/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Stream preview frames
    Preview {
        /// Camera to use: back, front or an index (from 'camera-control list')
        #[arg(short, long, default_value = "back")]
        camera: String,

        /// Requested preview width
        #[arg(long, default_value = "640")]
        width: u32,

        /// Requested preview height
        #[arg(long, default_value = "480")]
        height: u32,

        /// Number of frames to receive
        #[arg(short, long, default_value = "90")]
        frames: u64,

        /// Delay after each frame, to watch frames being dropped
        #[arg(long, default_value = "0")]
        slow_consumer_ms: u64,
    },

    /// Take a photo
    Photo {
        /// Camera to use: back, front or an index (from 'camera-control list')
        #[arg(short, long, default_value = "back")]
        camera: String,

        /// Output file path (default: ~/Pictures/camera/photo_TIMESTAMP.jpg)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Picture width (default from config)
        #[arg(long)]
        width: Option<u32>,

        /// Picture height (default from config)
        #[arg(long)]
        height: Option<u32>,

        /// Rotation in degrees, rounded to a quarter turn
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        rotation: i32,
    },

    /// Print the camera parameters
    Params {
        /// Camera to use: back, front or an index (from 'camera-control list')
        #[arg(short, long, default_value = "back")]
        camera: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_default(),
    };

    // Initialize logging
    // RUST_LOG takes precedence over the configured filter
    // Examples: RUST_LOG=debug, RUST_LOG=camera_control=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    match cli.command {
        Commands::List => cli::list_cameras(&config),
        Commands::Preview {
            camera,
            width,
            height,
            frames,
            slow_consumer_ms,
        } => cli::stream_preview(&config, &camera, width, height, frames, slow_consumer_ms),
        Commands::Photo {
            camera,
            output,
            width,
            height,
            rotation,
        } => cli::take_photo(&config, &camera, output, width, height, rotation),
        Commands::Params { camera } => cli::dump_parameters(&config, &camera),
    }
}
