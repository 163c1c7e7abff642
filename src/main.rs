// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "uvc-session")]
#[command(about = "Drive UVC cameras and watch the USB bus for them")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Config file (default: ~/.config/uvc-session/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached cameras
    List,

    /// Print camera attach and detach events until Ctrl+C
    Monitor,

    /// Show the stream modes and sizes a camera offers
    Formats {
        /// Camera index to use (from 'uvc-session list')
        #[arg(short, long, default_value = "0")]
        camera: usize,
    },

    /// Show camera controls, optionally writing some first
    Controls {
        /// Camera index to use (from 'uvc-session list')
        #[arg(short, long, default_value = "0")]
        camera: usize,

        /// Control to write, as name=value (e.g. brightness=40); repeatable
        #[arg(short, long)]
        set: Vec<String>,
    },

    /// Take a photo
    Photo {
        /// Camera index to use (from 'uvc-session list')
        #[arg(short, long, default_value = "0")]
        camera: usize,

        /// Output file path (default: ~/Pictures/uvc-session/TIMESTAMP.png)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Record a video
    Video {
        /// Camera index to use (from 'uvc-session list')
        #[arg(short, long, default_value = "0")]
        camera: usize,

        /// Recording duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Output directory (default: ~/Videos/uvc-session)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Record without audio
        #[arg(long)]
        no_audio: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=uvc_session=trace
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .init();

    let config = match &cli.config {
        Some(path) => uvc_session::Config::load_from(path)?,
        None => uvc_session::Config::load(),
    };

    match cli.command {
        Commands::List => cli::list_cameras(&config),
        Commands::Monitor => cli::monitor(&config),
        Commands::Formats { camera } => cli::show_formats(&config, camera),
        Commands::Controls { camera, set } => cli::show_controls(&config, camera, &set),
        Commands::Photo { camera, output } => cli::take_photo(config, camera, output),
        Commands::Video {
            camera,
            duration,
            output,
            no_audio,
        } => cli::record_video(config, camera, duration, output, !no_audio),
    }
}
