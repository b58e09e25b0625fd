// SPDX-License-Identifier: GPL-3.0-only

use camera_recorder::backends::camera::Facing;
use camera_recorder::filters::FilterSelector;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-recorder")]
#[command(about = "Filtered camera preview, recording and review")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// List available filters
    Filters,

    /// Record a video through the filter pipeline
    Record {
        /// Camera to use: back or front (default: last used)
        #[arg(short, long)]
        facing: Option<Facing>,

        /// Filter name or index (from 'camera-recorder filters')
        #[arg(long)]
        filter: Option<FilterSelector>,

        /// Recording duration in milliseconds, capped at the configured maximum
        #[arg(short, long)]
        duration_ms: Option<u64>,

        /// Recording key (default: capture timestamp)
        #[arg(short, long)]
        key: Option<String>,

        /// Root directory for recordings (default: ~/Videos/Camera)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print width, height and duration of a recording
    Probe {
        file: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level, e.g. RUST_LOG=camera_recorder=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => cli::list_cameras(),
        Commands::Filters => cli::list_filters(),
        Commands::Record {
            facing,
            filter,
            duration_ms,
            key,
            output,
        } => cli::record_video(cli::RecordOptions {
            facing,
            filter,
            duration_ms,
            key,
            output,
        }),
        Commands::Probe { file } => cli::probe_file(&file),
    }
}
