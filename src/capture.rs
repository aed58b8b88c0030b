//! This module contains all the capture logic

// Capture does one thing: pull whole frames off the data socket as fast as
// possible into one contiguous block per file. No decoding happens here, the
// block goes straight to a volume writer and is only interpreted later when
// the file is checked for gaps.

use std::{
    io,
    net::{SocketAddr, UdpSocket},
    slice::ChunksExact,
};

use tracing::{debug, info, trace, warn};

use crate::error::CaptureError;

/// A run of frames in arrival order, stored back to back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBlock {
    frame_size: usize,
    bytes: Vec<u8>,
}

impl FrameBlock {
    pub fn with_capacity(frame_size: usize, frames: usize) -> Self {
        Self {
            frame_size,
            bytes: Vec::with_capacity(frame_size * frames),
        }
    }

    /// Append one frame, which must be exactly `frame_size` bytes
    pub fn push(&mut self, frame: &[u8]) {
        debug_assert_eq!(frame.len(), self.frame_size);
        self.bytes.extend_from_slice(frame);
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.frame_size
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn frames(&self) -> ChunksExact<'_, u8> {
        self.bytes.chunks_exact(self.frame_size)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Anything that can hand out frames in arrival order
pub trait FrameSource: Send {
    fn frame_size(&self) -> usize;

    /// Read and drop up to `n` frames that are already queued, returning how many were dropped
    fn discard_buffered(&mut self, n: usize) -> Result<usize, CaptureError>;

    /// Block until exactly `n` frames have been received
    fn receive_batch(&mut self, n: usize) -> Result<FrameBlock, CaptureError>;
}

/// The digitizer's UDP data stream
#[derive(Debug)]
pub struct UdpIngest {
    socket: UdpSocket,
    frame_size: usize,
    // One spare byte so oversized datagrams show up as the wrong length instead of truncating
    scratch: Vec<u8>,
    bad_datagrams: u64,
}

impl UdpIngest {
    pub fn bind(addr: SocketAddr, frame_size: usize) -> Result<Self, CaptureError> {
        let socket =
            UdpSocket::bind(addr).map_err(|source| CaptureError::BindFailed { addr, source })?;
        info!(%addr, frame_size, "Opened high-rate data socket");
        Ok(Self {
            socket,
            frame_size,
            scratch: vec![0u8; frame_size + 1],
            bad_datagrams: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// How many datagrams were skipped for having the wrong size
    pub fn bad_datagrams(&self) -> u64 {
        self.bad_datagrams
    }

    fn drain(&mut self, n: usize) -> io::Result<usize> {
        let mut dropped = 0;
        while dropped < n {
            match self.socket.recv(&mut self.scratch) {
                Ok(_) => dropped += 1,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(dropped)
    }
}

impl FrameSource for UdpIngest {
    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn discard_buffered(&mut self, n: usize) -> Result<usize, CaptureError> {
        self.socket
            .set_nonblocking(true)
            .map_err(CaptureError::Transport)?;
        let drained = self.drain(n);
        // Restore blocking mode even if the drain failed
        self.socket
            .set_nonblocking(false)
            .map_err(CaptureError::Transport)?;
        let dropped = drained.map_err(CaptureError::Transport)?;
        debug!(dropped, "Discarded stale frames");
        Ok(dropped)
    }

    fn receive_batch(&mut self, n: usize) -> Result<FrameBlock, CaptureError> {
        let mut block = FrameBlock::with_capacity(self.frame_size, n);
        let mut skipped = 0;
        while block.len() < n {
            match self.socket.recv(&mut self.scratch) {
                Ok(len) if len == self.frame_size => block.push(&self.scratch[..len]),
                Ok(len) => {
                    skipped += 1;
                    trace!(len, expected = self.frame_size, "Skipping malformed datagram");
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CaptureError::Transport(e)),
            }
        }
        if skipped > 0 {
            self.bad_datagrams += skipped;
            warn!(
                skipped,
                total = self.bad_datagrams,
                "Skipped malformed datagrams"
            );
        }
        Ok(block)
    }
}
