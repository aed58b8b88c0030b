//! In this module, we implement the loss monitoring for captured files.
//! Every frame carries a wrapping sequence counter, so reading the counters
//! back out of a finished file tells us how many frames never made it to disk
//! and whether any arrived out of order.

use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
};

use crate::{
    error::VerifyError,
    packet::{PacketCodec, WORD_SIZE},
};

/// Loss statistics for one file
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GapReport {
    pub frames: usize,
    pub dropped: u64,
    pub fraction_dropped: f64,
    pub num_gaps: usize,
    pub neg_gaps: usize,
    pub mean_gap: f64,
    pub std_gap: f64,
    pub max_gap: u64,
}

impl GapReport {
    /// Build the report from counters in file order
    pub fn from_counters(counters: &[u32], modulus: u32) -> Self {
        let mut report = Self {
            frames: counters.len(),
            ..Default::default()
        };
        let mut gaps = Vec::new();
        for pair in counters.windows(2) {
            let diff = wrapped_difference(pair[0], pair[1], modulus) - 1;
            if diff < 0 {
                report.neg_gaps += 1;
            } else if diff > 0 {
                gaps.push(diff as u64);
            }
        }
        report.num_gaps = gaps.len();
        report.dropped = gaps.iter().sum();
        report.max_gap = gaps.iter().copied().max().unwrap_or(0);
        if report.frames > 0 {
            report.fraction_dropped = report.dropped as f64 / report.frames as f64;
        }
        if !gaps.is_empty() {
            let n = gaps.len() as f64;
            let mean = report.dropped as f64 / n;
            let var = gaps.iter().map(|&g| (g as f64 - mean).powi(2)).sum::<f64>() / n;
            report.mean_gap = mean;
            report.std_gap = var.sqrt();
        }
        report
    }

    pub fn is_clean(&self) -> bool {
        self.dropped == 0
    }
}

/// `next - prev` folded into `(-modulus/2, modulus/2]`, so stepping over the
/// wrap counts as a small forward step rather than a huge backward one
pub fn wrapped_difference(prev: u32, next: u32, modulus: u32) -> i64 {
    let modulus = modulus as i64;
    let raw = (next as i64 - prev as i64).rem_euclid(modulus);
    if raw > modulus / 2 {
        raw - modulus
    } else {
        raw
    }
}

/// Pull the sequence counter out of every frame in a file
pub fn read_counters(path: &Path, codec: &PacketCodec) -> Result<Vec<u32>, VerifyError> {
    let unreadable = |source: io::Error| VerifyError::FileUnreadable {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(unreadable)?;
    let len = file.metadata().map_err(unreadable)?.len();
    let frame_size = codec.frame_size();
    if len % frame_size as u64 != 0 {
        return Err(VerifyError::TruncatedFrame {
            path: path.to_path_buf(),
            len,
            frame_size,
        });
    }
    let count = (len / frame_size as u64) as usize;
    let mut reader = BufReader::with_capacity(frame_size * 64, file);
    // Only word 0 carries the counter, the rest of each frame is skipped
    let skip = (frame_size - WORD_SIZE) as i64;
    let mut word = [0u8; WORD_SIZE];
    let mut counters = Vec::with_capacity(count);
    for _ in 0..count {
        reader.read_exact(&mut word).map_err(unreadable)?;
        reader.seek_relative(skip).map_err(unreadable)?;
        counters.push(codec.sequence_of_word(word));
    }
    Ok(counters)
}

pub fn gap_report(path: &Path, codec: &PacketCodec) -> Result<GapReport, VerifyError> {
    let counters = read_counters(path, codec)?;
    Ok(GapReport::from_counters(&counters, codec.layout.modulus()))
}

/// Result of checking one file, in place of a report when none could be made
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    Verified(GapReport),
    /// Verification wasn't requested
    Skipped,
    /// The file couldn't be opened
    NotFound,
    /// The file exists but isn't a whole number of frames
    Corrupt,
}

impl VerifyOutcome {
    /// Whether the file can be kept
    pub fn is_clean(&self) -> bool {
        match self {
            Self::Verified(report) => report.is_clean(),
            Self::Skipped => true,
            Self::NotFound | Self::Corrupt => false,
        }
    }

    pub fn report(&self) -> Option<&GapReport> {
        match self {
            Self::Verified(report) => Some(report),
            _ => None,
        }
    }
}

/// Check one file, turning read failures into an outcome instead of an error
pub fn verify(path: &Path, codec: &PacketCodec, enabled: bool) -> VerifyOutcome {
    if !enabled {
        return VerifyOutcome::Skipped;
    }
    match gap_report(path, codec) {
        Ok(report) => VerifyOutcome::Verified(report),
        Err(VerifyError::FileUnreadable { .. }) => VerifyOutcome::NotFound,
        Err(VerifyError::TruncatedFrame { .. } | VerifyError::Decode(_)) => VerifyOutcome::Corrupt,
    }
}
