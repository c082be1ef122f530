//! Cardcast CLI: export greeting-card animations to WebM.
//!
//! Usage:
//!   cardcast export [OPTIONS]   Capture a card animation as WebM or GIF
//!   cardcast inspect <FILE>     Show the structure of a WebM file
//!   cardcast check              Report which codecs the encoder accepts
//!   cardcast config             Print the effective configuration

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use cardcast_common::config::{AppConfig, RgbColor};
use cardcast_export_engine::ExportFormat;

mod commands;

#[derive(Parser)]
#[command(
    name = "cardcast",
    about = "Export animated greeting cards to WebM video or animated GIF",
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
    /// Capture a card animation and write it as WebM or GIF
    Export(ExportArgs),

    /// Show the structure of a WebM file
    Inspect {
        /// Path to the file
        path: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report which codecs the compiled encoder backend accepts
    Check,

    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct ExportArgs {
    /// Directory of PNG frames to export
    #[arg(long, conflicts_with = "synthetic", required_unless_present = "synthetic")]
    pub frames: Option<PathBuf>,

    /// Export the built-in animated test card
    #[arg(long)]
    pub synthetic: bool,

    /// Frame rate the PNG sequence was rendered at
    #[arg(long, default_value = "30")]
    pub sequence_fps: f64,

    /// Test card width
    #[arg(long, default_value = "300")]
    pub width: u32,

    /// Test card height
    #[arg(long, default_value = "500")]
    pub height: u32,

    /// Output format: webm or gif
    #[arg(long, default_value = "webm")]
    pub format: ExportFormat,

    /// Output frame rate (defaults to the configured value)
    #[arg(long)]
    pub fps: Option<u32>,

    /// Clip length in milliseconds (defaults to the configured value)
    #[arg(long)]
    pub duration_ms: Option<u64>,

    /// Target bitrate in bits per second (defaults to the configured value)
    #[arg(long)]
    pub bitrate: Option<u32>,

    /// Background behind transparent regions, as #rrggbb
    #[arg(long)]
    pub background: Option<RgbColor>,

    /// Burn a frame progress bar into the top-left corner
    #[arg(long)]
    pub debug_frame_counter: bool,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let app_config = AppConfig::load();
    let mut logging = app_config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    cardcast_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Export(args) => commands::export::run(args, &app_config).await,
        Commands::Inspect { path, json } => commands::inspect::run(path, json),
        Commands::Check => commands::check::run().await,
        Commands::Config => commands::config::run(&app_config),
    }
}
