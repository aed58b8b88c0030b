//! Error types for every stage of the capture-verify-retry pipeline

use std::{io, net::SocketAddr, path::PathBuf};

use thiserror::Error;

/// Raised when a byte buffer doesn't match the configured frame geometry
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("short buffer: expected {expected} bytes, got {actual}")]
    ShortBuffer { expected: usize, actual: usize },
}

/// Failures while pulling frames off the network or writing them to a volume
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("unable to open data socket at {addr}: {source}")]
    BindFailed { addr: SocketAddr, source: io::Error },
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),
    #[error("failed to write {path}: {source}")]
    WriteFailed { path: PathBuf, source: io::Error },
}

/// Failures while reading back a written file for loss detection
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("unable to read {path}: {source}")]
    FileUnreadable { path: PathBuf, source: io::Error },
    #[error("{path} is {len} bytes, not a whole number of {frame_size} byte frames")]
    TruncatedFrame {
        path: PathBuf,
        len: u64,
        frame_size: usize,
    },
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Semantic problems with an acquisition configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} channels is unsupported, must be 4096 or 32768")]
    UnsupportedChannels(usize),
    #[error("at least one storage volume is required")]
    NoVolumes,
    #[error("frames per file must be nonzero")]
    ZeroFrames,
    #[error("target file count must be nonzero")]
    ZeroFiles,
    #[error("volume {0} is not a directory")]
    MissingVolume(PathBuf),
}

/// Errors that end an acquisition run
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("acquisition incomplete: collected {collected} of {target} clean files")]
    Incomplete { collected: usize, target: usize },
    #[error("acquisition interrupted after {collected} of {target} clean files")]
    Interrupted { collected: usize, target: usize },
    #[error("unable to delete {path}: {source}")]
    Delete { path: PathBuf, source: io::Error },
    #[error("metadata sink failed: {0}")]
    Metadata(#[source] io::Error),
}
