//! Fan a chunk of file indices out to one writer thread per storage volume.
//!
//! All writers share a single ingest endpoint. Pulling frames from it is
//! serialized by passing a baton: the endpoint itself travels through a
//! single-slot channel, so whoever holds the baton is the only one who can
//! touch the socket. A writer hands the baton on as soon as its frames are in
//! memory and then writes its file without it, so the network is read
//! back-to-back while disk writes on different volumes overlap.

use std::{path::Path, thread};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::{
    capture::FrameSource,
    error::CaptureError,
    writer::{BlockWriter, FileNameTemplate, SpecFile, VolumeWriter},
};

/// Single-slot mutual exclusion over a shared resource
pub trait TokenPool: Sync {
    type Token;

    /// Block until the token is free
    fn acquire(&self) -> Option<Self::Token>;

    /// Take the token only if nobody holds it
    fn try_acquire(&self) -> Option<Self::Token>;

    fn release(&self, token: Self::Token);
}

/// Shared queue of file indices still waiting to be captured
pub trait IndexQueue: Sync {
    fn pop(&self) -> Option<usize>;
    fn is_empty(&self) -> bool;
}

/// A [`TokenPool`] backed by a bounded(1) channel
pub struct Baton<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Baton<T> {
    pub fn new(token: T) -> Self {
        let (tx, rx) = bounded(1);
        // Can't fail, the channel is empty and we hold the receiver
        let _ = tx.send(token);
        Self { tx, rx }
    }
}

impl<T: Send> TokenPool for Baton<T> {
    type Token = T;

    fn acquire(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    fn try_acquire(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    fn release(&self, token: T) {
        // Only one token exists, so the slot is always free here
        let _ = self.tx.send(token);
    }
}

/// A fixed set of indices, popped in order
pub struct WorkQueue {
    rx: Receiver<usize>,
}

impl WorkQueue {
    pub fn new(indices: impl IntoIterator<Item = usize>) -> Self {
        let (tx, rx) = unbounded();
        for index in indices {
            let _ = tx.send(index);
        }
        Self { rx }
    }
}

impl IndexQueue for WorkQueue {
    fn pop(&self) -> Option<usize> {
        self.rx.try_recv().ok()
    }

    fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// A slot that didn't get a file
#[derive(Debug)]
pub struct Unfulfilled {
    pub index: usize,
    pub volume: usize,
    pub error: CaptureError,
}

impl Unfulfilled {
    /// The half-written file a failed write left behind, if any
    pub fn partial_file(&self) -> Option<&Path> {
        match &self.error {
            CaptureError::WriteFailed { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Everything that came out of one [`WriterPipeline::run`], ordered by index
#[derive(Debug, Default)]
pub struct ChunkReport {
    pub produced: Vec<SpecFile>,
    pub unfulfilled: Vec<Unfulfilled>,
}

impl ChunkReport {
    fn absorb(&mut self, outcomes: Vec<Result<SpecFile, Unfulfilled>>) {
        for outcome in outcomes {
            match outcome {
                Ok(file) => self.produced.push(file),
                Err(slot) => self.unfulfilled.push(slot),
            }
        }
    }
}

pub struct WriterPipeline<S, W = VolumeWriter> {
    source: S,
    writers: Vec<W>,
    template: FileNameTemplate,
    frames_per_file: usize,
}

impl<S: FrameSource, W: BlockWriter> WriterPipeline<S, W> {
    pub fn new(
        source: S,
        writers: Vec<W>,
        template: FileNameTemplate,
        frames_per_file: usize,
    ) -> Self {
        Self {
            source,
            writers,
            template,
            frames_per_file,
        }
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    pub fn frames_per_file(&self) -> usize {
        self.frames_per_file
    }

    /// Capture one file for every index in `indices`, returning once all writers are done
    pub fn run(&mut self, indices: &[usize]) -> ChunkReport {
        let queue = WorkQueue::new(indices.iter().copied());
        let baton = Baton::new(&mut self.source);
        let template = &self.template;
        let frames = self.frames_per_file;
        let mut report = ChunkReport::default();
        info!(
            files = indices.len(),
            volumes = self.writers.len(),
            "Starting writers"
        );
        thread::scope(|s| {
            let handles: Vec<_> = self
                .writers
                .iter()
                .map(|writer| {
                    let (baton, queue) = (&baton, &queue);
                    s.spawn(move || pipeline_to_disk(writer, template, frames, baton, queue))
                })
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(outcomes) => report.absorb(outcomes),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
        });
        report.produced.sort_by_key(|f| f.index);
        report.unfulfilled.sort_by_key(|u| u.index);
        report
    }
}

/// One volume's writer loop
fn pipeline_to_disk<'a, S, W, P, Q>(
    writer: &W,
    template: &FileNameTemplate,
    frames: usize,
    baton: &P,
    queue: &Q,
) -> Vec<Result<SpecFile, Unfulfilled>>
where
    S: FrameSource + 'a,
    W: BlockWriter,
    P: TokenPool<Token = &'a mut S>,
    Q: IndexQueue,
{
    let mut outcomes = Vec::new();
    while !queue.is_empty() {
        let source = match baton.acquire() {
            Some(source) => source,
            None => break,
        };
        // The queue may have been emptied while we waited on the baton
        let index = match queue.pop() {
            Some(index) => index,
            None => {
                baton.release(source);
                break;
            }
        };
        debug!(volume = writer.volume(), index, "Pulling frames");
        let pulled = source.receive_batch(frames);
        // Pass the baton before touching the disk
        baton.release(source);
        let outcome = pulled
            .and_then(|block| writer.write(template, index, &block))
            .map_err(|error| Unfulfilled {
                index,
                volume: writer.volume(),
                error,
            });
        if let Err(slot) = &outcome {
            warn!(volume = slot.volume, index, error = %slot.error, "File not captured");
        }
        outcomes.push(outcome);
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        packet::{Geometry, PacketCodec},
        sim::{Fault, SyntheticSource},
    };
    use crate::capture::FrameBlock;
    use crossbeam_channel::RecvTimeoutError;
    use std::{collections::BTreeSet, time::Duration};
    use tempfile::TempDir;

    const FRAMES: usize = 8;

    fn volumes(n: usize) -> (Vec<TempDir>, Vec<VolumeWriter>) {
        let dirs: Vec<_> = (0..n).map(|_| tempfile::tempdir().unwrap()).collect();
        let writers = dirs
            .iter()
            .enumerate()
            .map(|(i, d)| VolumeWriter::new(i, d.path()))
            .collect();
        (dirs, writers)
    }

    fn pipeline(
        source: SyntheticSource,
        writers: Vec<VolumeWriter>,
    ) -> WriterPipeline<SyntheticSource> {
        WriterPipeline::new(
            source,
            writers,
            FileNameTemplate::new("test_", ".spec"),
            FRAMES,
        )
    }

    fn counters(codec: &PacketCodec, path: &Path) -> Vec<u32> {
        std::fs::read(path)
            .unwrap()
            .chunks_exact(codec.frame_size())
            .map(|f| codec.sequence_of(f).unwrap())
            .collect()
    }

    #[test]
    fn test_baton_is_exclusive() {
        let baton = Baton::new(5);
        let token = baton.try_acquire().unwrap();
        assert_eq!(token, 5);
        assert!(baton.try_acquire().is_none());
        baton.release(token);
        assert_eq!(baton.acquire(), Some(5));
    }

    #[test]
    fn test_work_queue_pops_in_order() {
        let queue = WorkQueue::new([3, 1, 2]);
        assert!(!queue.is_empty());
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_work_conservation() {
        let codec = PacketCodec::new(Geometry::Narrow);
        let (dirs, writers) = volumes(3);
        let mut pipeline = pipeline(SyntheticSource::new(codec), writers);
        let indices: Vec<usize> = (0..10).collect();
        let report = pipeline.run(&indices);

        assert!(report.unfulfilled.is_empty());
        assert_eq!(report.produced.len(), 10);
        let produced: Vec<usize> = report.produced.iter().map(|f| f.index).collect();
        assert_eq!(produced, indices);

        // Exactly one file per index across all volumes
        let on_disk: usize = dirs
            .iter()
            .map(|d| std::fs::read_dir(d.path()).unwrap().count())
            .sum();
        assert_eq!(on_disk, 10);

        // Each file is a contiguous run and no frame was handed out twice
        let mut seen = BTreeSet::new();
        for file in &report.produced {
            assert_eq!(file.frames, FRAMES);
            assert!(file.path.starts_with(dirs[file.volume].path()));
            let c = counters(&codec, &file.path);
            assert!(c.windows(2).all(|w| w[1] == w[0] + 1));
            seen.extend(c);
        }
        assert_eq!(seen.len(), 10 * FRAMES);
        assert_eq!(seen.into_iter().collect::<Vec<_>>(), (0..80).collect::<Vec<u32>>());
    }

    /// Tells the test about every pull
    struct ReportingSource {
        inner: SyntheticSource,
        pulls: Sender<usize>,
    }

    impl FrameSource for ReportingSource {
        fn frame_size(&self) -> usize {
            self.inner.frame_size()
        }

        fn discard_buffered(&mut self, n: usize) -> Result<usize, CaptureError> {
            self.inner.discard_buffered(n)
        }

        fn receive_batch(&mut self, n: usize) -> Result<FrameBlock, CaptureError> {
            let _ = self.pulls.send(n);
            self.inner.receive_batch(n)
        }
    }

    /// Holds every write until the test opens the gate
    struct GatedWriter {
        volume: usize,
        gate: Receiver<()>,
    }

    impl BlockWriter for GatedWriter {
        fn volume(&self) -> usize {
            self.volume
        }

        fn write(
            &self,
            template: &FileNameTemplate,
            index: usize,
            block: &FrameBlock,
        ) -> Result<SpecFile, CaptureError> {
            let _ = self.gate.recv();
            Ok(SpecFile {
                index,
                volume: self.volume,
                path: template.file_name(index).into(),
                frames: block.len(),
                bytes: block.as_bytes().len() as u64,
            })
        }
    }

    #[test]
    fn test_pull_overlaps_write() {
        let (pulls_tx, pulls) = unbounded();
        let (gate, gate_rx) = unbounded();
        let source = ReportingSource {
            inner: SyntheticSource::new(PacketCodec::new(Geometry::Narrow)),
            pulls: pulls_tx,
        };
        let writers = (0..2)
            .map(|volume| GatedWriter {
                volume,
                gate: gate_rx.clone(),
            })
            .collect();
        let mut pipeline = WriterPipeline::new(
            source,
            writers,
            FileNameTemplate::new("test_", ".spec"),
            FRAMES,
        );

        thread::scope(|s| {
            let running = s.spawn(|| pipeline.run(&[0, 1]));
            // Both pulls must happen while the first write is still held at the gate
            let first = pulls.recv_timeout(Duration::from_secs(5));
            let second = pulls.recv_timeout(Duration::from_secs(5));
            for _ in 0..2 {
                gate.send(()).unwrap();
            }
            let report = running.join().unwrap();
            assert_eq!(first, Ok(FRAMES));
            assert_ne!(second, Err(RecvTimeoutError::Timeout));
            assert_eq!(report.produced.len(), 2);
        });
    }

    #[test]
    fn test_more_writers_than_files() {
        let codec = PacketCodec::new(Geometry::Split);
        let (_dirs, writers) = volumes(4);
        let mut pipeline = pipeline(SyntheticSource::new(codec), writers);
        let report = pipeline.run(&[7]);
        assert_eq!(report.produced.len(), 1);
        assert_eq!(report.produced[0].index, 7);
        assert!(pipeline.run(&[]).produced.is_empty());
    }

    #[test]
    fn test_transport_failure_is_unfulfilled() {
        let codec = PacketCodec::new(Geometry::Narrow);
        let (_dirs, writers) = volumes(2);
        let source = SyntheticSource::new(codec).with_faults([Fault::Clean, Fault::Transport]);
        let mut pipeline = pipeline(source, writers);
        let report = pipeline.run(&[0, 1, 2, 3]);
        assert_eq!(report.produced.len(), 3);
        assert_eq!(report.unfulfilled.len(), 1);
        let slot = &report.unfulfilled[0];
        assert!(matches!(slot.error, CaptureError::Transport(_)));
        assert!(slot.partial_file().is_none());
    }

    #[test]
    fn test_write_failure_is_unfulfilled() {
        let codec = PacketCodec::new(Geometry::Narrow);
        let (dirs, mut writers) = volumes(2);
        writers[1] = VolumeWriter::new(1, dirs[1].path().join("gone"));
        let mut pipeline = pipeline(SyntheticSource::new(codec), writers);
        let report = pipeline.run(&[0, 1, 2, 3, 4, 5]);
        assert_eq!(report.produced.len() + report.unfulfilled.len(), 6);
        for slot in &report.unfulfilled {
            assert_eq!(slot.volume, 1);
            assert!(matches!(slot.error, CaptureError::WriteFailed { .. }));
            assert!(slot.partial_file().is_some());
        }
        assert!(report.produced.iter().all(|f| f.volume == 0));
    }
}
