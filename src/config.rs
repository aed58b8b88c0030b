//! The settings one acquisition run is fixed to

use std::{net::SocketAddr, path::PathBuf};

use crate::{
    error::ConfigError,
    packet::{Geometry, PacketCodec},
    writer::{FileNameTemplate, VolumeWriter},
};

/// The digitizer sends to this port
pub const DEFAULT_PORT: u16 = 4003;
/// Roughly how many frames the NIC holds on to from before a run starts
pub const DEFAULT_FLUSH_FRAMES: usize = 300;
pub const DEFAULT_FRAMES_PER_FILE: usize = 5000;

/// What happens to files after capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPolicy {
    /// Run the gap detector on every file
    pub verify: bool,
    /// Delete and recapture files with dropped frames
    pub delete_imperfect: bool,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            verify: true,
            delete_imperfect: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionConfig {
    pub geometry: Geometry,
    pub frames_per_file: usize,
    pub target_files: usize,
    /// One writer is started per volume, in this order
    pub volumes: Vec<PathBuf>,
    pub template: FileNameTemplate,
    pub bind: SocketAddr,
    /// Rounds allowed after the first before giving up
    pub max_retries: usize,
    /// Stale frames to drop before each round
    pub flush_frames: usize,
    pub policy: QualityPolicy,
}

impl AcquisitionConfig {
    /// Check the parts of the config that can be wrong after parsing
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.volumes.is_empty() {
            return Err(ConfigError::NoVolumes);
        }
        if self.frames_per_file == 0 {
            return Err(ConfigError::ZeroFrames);
        }
        if self.target_files == 0 {
            return Err(ConfigError::ZeroFiles);
        }
        if let Some(missing) = self.volumes.iter().find(|v| !v.is_dir()) {
            return Err(ConfigError::MissingVolume(missing.clone()));
        }
        Ok(())
    }

    pub fn codec(&self) -> PacketCodec {
        PacketCodec::new(self.geometry)
    }

    pub fn writers(&self) -> Vec<VolumeWriter> {
        self.volumes
            .iter()
            .enumerate()
            .map(|(i, dir)| VolumeWriter::new(i, dir))
            .collect()
    }
}
