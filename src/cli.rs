use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "mediaq")]
#[command(about = "Queue media downloads and run the download worker", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to $MEDIAQ_CONFIG, then config.yml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Enqueue a download job
    Send(SendArgs),
    /// Consume jobs and run the downloader, one at a time
    Worker,
    /// Check that the external tools are installed
    CheckDeps,
}

#[derive(clap::Args, Debug)]
pub struct SendArgs {
    /// Audio or video address (prompted for when omitted)
    #[arg(short, long)]
    pub url: Option<String>,

    /// Filename for the downloaded file
    #[arg(short, long = "name", value_name = "FILENAME")]
    pub name: Option<String>,

    /// The link is music or audio only
    #[arg(short, long)]
    pub audio: bool,

    /// Keep original audio and video files
    #[arg(short, long)]
    pub keep: bool,
}

/// Exit status for a failed parse: help and version output are successes,
/// anything else (unknown flag, missing value) exits 1.
pub fn parse_exit_code(error: &clap::Error) -> ExitCode {
    if error.use_stderr() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
