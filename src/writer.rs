//! Writing captured blocks to `.spec` files, one writer per storage volume

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    time::Instant,
};

use chrono::{DateTime, Local};
use tracing::info;

use crate::{capture::FrameBlock, error::CaptureError};

/// How output files are named: `<prefix><index:06><extension>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameTemplate {
    pub prefix: String,
    pub extension: String,
}

impl FileNameTemplate {
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    /// The usual `Freq_data_<start time>_` prefix with a `.spec` extension
    pub fn timestamped(start: &DateTime<Local>) -> Self {
        Self::new(
            format!("Freq_data_{}_", start.format("%Y-%m-%d-%H-%M-%S")),
            ".spec",
        )
    }

    pub fn file_name(&self, index: usize) -> String {
        format!("{}{:06}{}", self.prefix, index, self.extension)
    }
}

/// Where a writer thread puts each block it pulls
pub trait BlockWriter: Sync {
    fn volume(&self) -> usize;

    /// Persist `block` as the file for slot `index`
    fn write(
        &self,
        template: &FileNameTemplate,
        index: usize,
        block: &FrameBlock,
    ) -> Result<SpecFile, CaptureError>;
}

/// A file a volume writer produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecFile {
    /// Slot in the acquisition this file fills
    pub index: usize,
    pub volume: usize,
    pub path: PathBuf,
    pub frames: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct VolumeWriter {
    pub volume: usize,
    pub dir: PathBuf,
}

impl VolumeWriter {
    pub fn new(volume: usize, dir: impl Into<PathBuf>) -> Self {
        Self {
            volume,
            dir: dir.into(),
        }
    }

    pub fn path_for(&self, template: &FileNameTemplate, index: usize) -> PathBuf {
        self.dir.join(template.file_name(index))
    }
}

impl BlockWriter for VolumeWriter {
    fn volume(&self) -> usize {
        self.volume
    }

    /// Write `block` verbatim to a new file for slot `index`.
    ///
    /// A failed write leaves whatever made it to disk in place.
    fn write(
        &self,
        template: &FileNameTemplate,
        index: usize,
        block: &FrameBlock,
    ) -> Result<SpecFile, CaptureError> {
        let path = self.path_for(template, index);
        let start = Instant::now();
        write_block(&path, block).map_err(|source| CaptureError::WriteFailed {
            path: path.clone(),
            source,
        })?;
        info!(
            path = %path.display(),
            frames = block.len(),
            ms = start.elapsed().as_millis() as u64,
            "File written"
        );
        Ok(SpecFile {
            index,
            volume: self.volume,
            path,
            frames: block.len(),
            bytes: block.as_bytes().len() as u64,
        })
    }
}

fn write_block(path: &Path, block: &FrameBlock) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(block.as_bytes())?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_names() {
        let start = Local.with_ymd_and_hms(2022, 3, 16, 15, 35, 2).unwrap();
        let template = FileNameTemplate::timestamped(&start);
        assert_eq!(
            template.file_name(42),
            "Freq_data_2022-03-16-15-35-02_000042.spec"
        );
        let writer = VolumeWriter::new(1, "/mnt/sdc/data");
        assert_eq!(
            writer.path_for(&template, 7),
            Path::new("/mnt/sdc/data/Freq_data_2022-03-16-15-35-02_000007.spec")
        );
    }

    #[test]
    fn test_write_is_byte_exact() {
        let dir = tempfile::tempdir().unwrap();
        let writer = VolumeWriter::new(0, dir.path());
        let template = FileNameTemplate::new("run_", ".spec");
        let mut block = FrameBlock::with_capacity(3, 2);
        block.push(&[1, 2, 3]);
        block.push(&[4, 5, 6]);
        let file = writer.write(&template, 3, &block).unwrap();
        assert_eq!(file.frames, 2);
        assert_eq!(file.bytes, 6);
        assert_eq!(file.volume, 0);
        assert_eq!(std::fs::read(&file.path).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_write_failure_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let writer = VolumeWriter::new(0, dir.path().join("missing"));
        let template = FileNameTemplate::new("run_", ".spec");
        let block = FrameBlock::with_capacity(3, 0);
        match writer.write(&template, 0, &block) {
            Err(CaptureError::WriteFailed { path, .. }) => {
                assert_eq!(path, writer.path_for(&template, 0))
            }
            other => panic!("expected WriteFailed, got {:?}", other),
        }
    }
}
