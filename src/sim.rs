//! A synthetic digitizer: counter-stamped frames with scripted faults.
//!
//! Used as an in-memory [`FrameSource`] when testing the pipeline and by the
//! `emit` command to stand in for the real digitizer on the wire.

use std::{
    collections::VecDeque,
    io,
    net::{SocketAddr, UdpSocket},
};

use tracing::info;

use crate::{
    capture::{FrameBlock, FrameSource},
    error::CaptureError,
    packet::{Header, PacketCodec},
};

/// What goes wrong with one `receive_batch` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Clean,
    /// Lose this many frames in the middle of the batch
    Drop(u32),
    /// Swap two adjacent frames in the middle of the batch
    Swap,
    /// Send the last few frames again in the middle of the batch, out of order but
    /// with nothing missing
    Rewind(u32),
    /// Fail the batch with a transport error
    Transport,
}

pub struct SyntheticSource {
    codec: PacketCodec,
    sequence: u32,
    quarter: u8,
    payload: Vec<u8>,
    stale: usize,
    faults: VecDeque<Fault>,
    frame: Vec<u8>,
}

impl SyntheticSource {
    pub fn new(codec: PacketCodec) -> Self {
        // Ramp payload so each channel is distinguishable
        let payload = (0..codec.geometry.payload_size())
            .map(|i| (i % 256) as u8)
            .collect();
        Self {
            codec,
            sequence: 0,
            quarter: 0,
            payload,
            stale: 0,
            faults: VecDeque::new(),
            frame: Vec::with_capacity(codec.frame_size()),
        }
    }

    /// Start the counter somewhere other than zero (e.g. just before a wrap)
    pub fn starting_at(mut self, sequence: u32) -> Self {
        self.sequence = sequence % self.codec.layout.modulus();
        self
    }

    /// Pretend `frames` frames are already sitting in the receive buffer
    pub fn with_stale(mut self, frames: usize) -> Self {
        self.stale = frames;
        self
    }

    /// Script the faults for successive batches; once exhausted, batches are clean
    pub fn with_faults(mut self, faults: impl IntoIterator<Item = Fault>) -> Self {
        self.faults.extend(faults);
        self
    }

    /// Counter value of the next frame to be produced
    pub fn next_sequence(&self) -> u32 {
        self.sequence
    }

    fn skip(&mut self, frames: u32) {
        for _ in 0..frames {
            self.advance();
        }
    }

    fn rewind(&mut self, frames: u32) {
        let modulus = self.codec.layout.modulus();
        let per_slice = self.codec.geometry.frames_per_slice() as u32;
        self.sequence = (self.sequence + modulus - frames % modulus) % modulus;
        self.quarter = ((self.quarter as u32 + per_slice - frames % per_slice) % per_slice) as u8;
    }

    fn advance(&mut self) {
        self.sequence = (self.sequence + 1) % self.codec.layout.modulus();
        self.quarter = (self.quarter + 1) % self.codec.geometry.frames_per_slice() as u8;
    }

    /// Produce the next frame on the wire
    pub fn next_frame(&mut self) -> &[u8] {
        let mut header = Header::default();
        header.set_sequence(&self.codec.layout, self.sequence);
        header.set_quarter(&self.codec.layout, self.quarter);
        self.frame.clear();
        self.frame.extend_from_slice(&header.to_bytes());
        self.frame.extend_from_slice(&self.payload);
        self.advance();
        &self.frame
    }
}

impl FrameSource for SyntheticSource {
    fn frame_size(&self) -> usize {
        self.codec.frame_size()
    }

    fn discard_buffered(&mut self, n: usize) -> Result<usize, CaptureError> {
        let dropped = n.min(self.stale);
        self.stale -= dropped;
        self.skip(dropped as u32);
        Ok(dropped)
    }

    fn receive_batch(&mut self, n: usize) -> Result<FrameBlock, CaptureError> {
        let fault = self.faults.pop_front().unwrap_or(Fault::Clean);
        if fault == Fault::Transport {
            return Err(CaptureError::Transport(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "injected transport failure",
            )));
        }
        let mut block = FrameBlock::with_capacity(self.frame_size(), n);
        let mut i = 0;
        while i < n {
            if i == n / 2 {
                match fault {
                    Fault::Drop(frames) => self.skip(frames),
                    Fault::Rewind(frames) => self.rewind(frames),
                    Fault::Swap if i + 1 < n => {
                        let first = self.next_frame().to_vec();
                        block.push(self.next_frame());
                        block.push(&first);
                        i += 2;
                        continue;
                    }
                    _ => (),
                }
            }
            block.push(self.next_frame());
            i += 1;
        }
        Ok(block)
    }
}

/// Send `frames` synthetic frames to `target`, as the digitizer would
pub fn emit(
    source: &mut SyntheticSource,
    socket: &UdpSocket,
    target: SocketAddr,
    frames: usize,
) -> io::Result<()> {
    for _ in 0..frames {
        let frame = source.next_frame();
        socket.send_to(frame, target)?;
    }
    info!(frames, %target, "Emitted synthetic frames");
    Ok(())
}
