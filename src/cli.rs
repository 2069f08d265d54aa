// Command-line arguments for offline-watch

use clap::{Parser, ValueEnum};
use offline_watcher::{PayloadMatch, DEFAULT_MARKER_FILE, DEFAULT_PAYLOAD_EXTENSION};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "offline-watch")]
#[command(version, about = "Watch an application directory for app_offline.htm and payload changes")]
pub struct Args {
    /// Application directory to watch
    pub directory: PathBuf,

    /// Offline marker file name
    #[arg(long, default_value = DEFAULT_MARKER_FILE)]
    pub file: String,

    /// Also shut down when payload files change
    #[arg(long)]
    pub track_payload: bool,

    /// Exact payload file name (overrides --payload-ext)
    #[arg(long, value_name = "NAME", conflicts_with = "payload_ext")]
    pub payload: Option<String>,

    /// Payload file extension
    #[arg(long, value_name = "EXT", default_value = DEFAULT_PAYLOAD_EXTENSION)]
    pub payload_ext: String,

    /// Readiness polls before giving up at startup
    #[arg(long, default_value_t = 20)]
    pub wait_retries: u32,

    /// Output format for the shutdown notice
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Color output
    #[arg(long, value_enum, default_value_t = ColorMode::Auto)]
    pub color: ColorMode,

    /// Print nothing; only the exit code reports the outcome
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    pub fn payload_match(&self) -> PayloadMatch {
        match &self.payload {
            Some(name) => PayloadMatch::FileName(name.clone()),
            None => PayloadMatch::Extension(self.payload_ext.trim_start_matches('.').to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

pub fn parse_args() -> Args {
    Args::parse()
}
