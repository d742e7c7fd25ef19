//! Liveproof CLI: liveness detection, comparison, and capability checks.
//!
//! Usage:
//!   liveproof detect [OPTIONS]              Run a liveness detection attempt
//!   liveproof compare <REFERENCE> <VIDEO>   Submit a recording for comparison
//!   liveproof check                         Check system capabilities

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "liveproof",
    about = "Face liveness detection against a remote verification backend",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a liveness detection attempt with the local camera
    Detect {
        /// Backend base URL (defaults to the configured one)
        #[arg(long)]
        backend: Option<String>,

        /// Interval between frame submissions, in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Frame budget per session
        #[arg(long)]
        max_frames: Option<u32>,

        /// Directory for the finalized recording
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Disable microphone capture
        #[arg(long)]
        no_audio: bool,
    },

    /// Submit a recording plus a reference image for a comparison score
    Compare {
        /// Reference image path
        reference: PathBuf,

        /// Recording file to compare
        recording: PathBuf,

        /// Backend base URL (defaults to the configured one)
        #[arg(long)]
        backend: Option<String>,
    },

    /// Check camera and capture capabilities
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    liveproof_common::logging::init_logging(&liveproof_common::config::LoggingConfig {
        level: log_level.to_string(),
        json: false,
        file: None,
    });

    match cli.command {
        Commands::Detect {
            backend,
            interval_ms,
            max_frames,
            output,
            no_audio,
        } => commands::detect::run(backend, interval_ms, max_frames, output, no_audio).await,
        Commands::Compare {
            reference,
            recording,
            backend,
        } => commands::compare::run(reference, recording, backend).await,
        Commands::Check => commands::check::run(),
    }
}
