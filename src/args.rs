//! Argument parsing for running from the command line

use std::{net::SocketAddr, path::PathBuf};

use chrono::Local;
use clap::{Parser, Subcommand};

use crate::{
    config::{
        AcquisitionConfig, QualityPolicy, DEFAULT_FLUSH_FRAMES, DEFAULT_FRAMES_PER_FILE,
        DEFAULT_PORT,
    },
    error::ConfigError,
    packet::Geometry,
    writer::FileNameTemplate,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture spectrum files from the digitizer, recapturing any with dropped frames
    Capture(CaptureArgs),
    /// Print the gap report for already-captured files
    Inspect(InspectArgs),
    /// Send synthetic frames to a capture endpoint
    Emit(EmitArgs),
}

#[derive(clap::Args, Debug)]
pub struct CaptureArgs {
    /// Local address to receive frames on
    #[clap(short, long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
    pub bind: SocketAddr,
    /// FFT channels the digitizer is configured for (4096 or 32768)
    #[clap(short, long, default_value_t = 4096)]
    pub channels: usize,
    /// Frames per file
    #[clap(short, long, default_value_t = DEFAULT_FRAMES_PER_FILE)]
    pub frames: usize,
    /// Number of clean files to collect
    #[clap(short = 'n', long, default_value_t = 1)]
    pub files: usize,
    /// Storage volume directory, one writer per volume (repeat for more)
    #[clap(short = 'o', long = "volume", required = true)]
    pub volumes: Vec<PathBuf>,
    /// File name prefix, defaults to Freq_data_<start time>_
    #[clap(long)]
    pub prefix: Option<String>,
    #[clap(long, default_value = ".spec")]
    pub extension: String,
    /// Recapture rounds allowed after the first
    #[clap(short = 'r', long, default_value_t = 10)]
    pub max_retries: usize,
    /// Stale frames to drain from the socket before each round
    #[clap(long, default_value_t = DEFAULT_FLUSH_FRAMES)]
    pub flush: usize,
    /// Don't check files for dropped frames
    #[clap(long)]
    pub no_verify: bool,
    /// Keep files with dropped frames instead of recapturing them
    #[clap(long)]
    pub keep_dirty: bool,
}

impl CaptureArgs {
    pub fn into_config(self) -> Result<AcquisitionConfig, ConfigError> {
        let geometry = Geometry::from_channels(self.channels)?;
        let template = match self.prefix {
            Some(prefix) => FileNameTemplate::new(prefix, self.extension),
            None => FileNameTemplate {
                extension: self.extension,
                ..FileNameTemplate::timestamped(&Local::now())
            },
        };
        let config = AcquisitionConfig {
            geometry,
            frames_per_file: self.frames,
            target_files: self.files,
            volumes: self.volumes,
            template,
            bind: self.bind,
            max_retries: self.max_retries,
            flush_frames: self.flush,
            policy: QualityPolicy {
                verify: !self.no_verify,
                delete_imperfect: !self.keep_dirty,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(clap::Args, Debug)]
pub struct InspectArgs {
    /// FFT channels the files were captured with
    #[clap(short, long, default_value_t = 4096)]
    pub channels: usize,
    #[clap(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct EmitArgs {
    /// Where to send frames
    #[clap(short, long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    pub target: SocketAddr,
    #[clap(short, long, default_value_t = 4096)]
    pub channels: usize,
    /// Frames to send
    #[clap(short, long, default_value_t = 10_000)]
    pub frames: usize,
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}
