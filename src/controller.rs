//! Capture → verify → keep or recapture, until enough clean files exist

use std::{
    fs, io,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tracing::{debug, error, info, warn};

use crate::{
    capture::FrameSource,
    config::{AcquisitionConfig, QualityPolicy},
    error::AcquisitionError,
    metadata::{MetadataSink, SpecFileRecord},
    monitoring::{verify, VerifyOutcome},
    packet::PacketCodec,
    pipeline::WriterPipeline,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Requesting { chunk: usize },
    Verifying,
    Committing,
    Retrying { dirty: usize },
    Done,
}

#[derive(Debug, Default)]
pub struct AcquisitionSummary {
    /// Records for every file that was kept, by index
    pub kept: Vec<SpecFileRecord>,
    /// Files captured and then thrown away
    pub discarded: usize,
    pub rounds: usize,
}

pub struct AcquisitionController<S, M> {
    pipeline: WriterPipeline<S>,
    codec: PacketCodec,
    sink: M,
    target: usize,
    max_retries: usize,
    flush_frames: usize,
    policy: QualityPolicy,
    stop: Arc<AtomicBool>,
    phase: Phase,
}

impl<S: FrameSource, M: MetadataSink> AcquisitionController<S, M> {
    pub fn new(config: &AcquisitionConfig, source: S, sink: M) -> Self {
        Self {
            pipeline: WriterPipeline::new(
                source,
                config.writers(),
                config.template.clone(),
                config.frames_per_file,
            ),
            codec: config.codec(),
            sink,
            target: config.target_files,
            max_retries: config.max_retries,
            flush_frames: config.flush_frames,
            policy: config.policy,
            stop: Arc::new(AtomicBool::new(false)),
            phase: Phase::Idle,
        }
    }

    /// Check `stop` between rounds and bail out once it's set
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sink(&self) -> &M {
        &self.sink
    }

    pub fn into_parts(self) -> (S, M) {
        (self.pipeline.into_source(), self.sink)
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = ?self.phase, to = ?phase, "Controller transition");
        self.phase = phase;
    }

    pub fn run(&mut self) -> Result<AcquisitionSummary, AcquisitionError> {
        self.enter(Phase::Idle);
        let target = self.target;
        let mut collected = 0;
        let mut retries = 0;
        let mut summary = AcquisitionSummary::default();
        let mut pending: Vec<usize> = (collected..target).collect();

        loop {
            if self.stop.load(Ordering::SeqCst) {
                warn!(collected, target, "Acquisition interrupted");
                return Err(AcquisitionError::Interrupted { collected, target });
            }
            summary.rounds += 1;
            let chunk = pending.len();
            self.enter(Phase::Requesting { chunk });
            // Counters can't be trusted until the stale frames are gone
            let flushed = self
                .pipeline
                .source_mut()
                .discard_buffered(self.flush_frames)?;
            debug!(flushed, "Flushed receive buffer");
            let report = self.pipeline.run(&pending);

            self.enter(Phase::Verifying);
            let mut dirty = Vec::new();
            let mut records = Vec::with_capacity(report.produced.len());
            for slot in &report.unfulfilled {
                if let Some(path) = slot.partial_file() {
                    remove_if_present(path)?;
                }
                dirty.push(slot.index);
            }
            for file in &report.produced {
                let outcome = verify(&file.path, &self.codec, self.policy.verify);
                let keep = outcome.is_clean()
                    || (!self.policy.delete_imperfect && outcome != VerifyOutcome::NotFound);
                if !keep {
                    if let Some(gaps) = outcome.report() {
                        warn!(
                            path = %file.path.display(),
                            dropped = gaps.dropped,
                            num_gaps = gaps.num_gaps,
                            "Discarding imperfect file"
                        );
                    } else {
                        warn!(path = %file.path.display(), ?outcome, "Discarding unverifiable file");
                    }
                    remove_if_present(&file.path)?;
                    dirty.push(file.index);
                    summary.discarded += 1;
                }
                records.push(SpecFileRecord::new(file, outcome, !keep));
            }

            self.enter(Phase::Committing);
            collected += chunk - dirty.len();
            for record in records {
                self.sink
                    .record(&record)
                    .map_err(AcquisitionError::Metadata)?;
                if !record.deleted {
                    summary.kept.push(record);
                }
            }
            info!(
                round = summary.rounds,
                collected,
                target,
                recapture = dirty.len(),
                "Round complete"
            );

            if dirty.is_empty() {
                self.enter(Phase::Done);
                summary.kept.sort_by_key(|r| r.index);
                return Ok(summary);
            }
            self.enter(Phase::Retrying { dirty: dirty.len() });
            retries += 1;
            if retries > self.max_retries {
                error!(collected, target, retries, "Retry budget exhausted");
                return Err(AcquisitionError::Incomplete { collected, target });
            }
            dirty.sort_unstable();
            pending = dirty;
        }
    }
}

/// Raise `stop`, returning whether it had already been raised
pub fn request_stop(stop: &AtomicBool) -> bool {
    stop.swap(true, Ordering::SeqCst)
}

/// Delete a file, treating one that's already gone as done
fn remove_if_present(path: &Path) -> Result<bool, AcquisitionError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(AcquisitionError::Delete {
            path: path.to_path_buf(),
            source,
        }),
    }
}
