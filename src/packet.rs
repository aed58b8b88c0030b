//! Frame geometry and the header/payload codec for the digitizer's UDP packets

use crate::error::{ConfigError, DecodeError};

/// Bytes per header word
pub const WORD_SIZE: usize = 8;
/// Words in every header
pub const HEADER_WORDS: usize = 4;
pub const HEADER_SIZE: usize = HEADER_WORDS * WORD_SIZE;

/// The two spectrometer configurations the digitizer can stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    /// 4096 channels, one frame per spectrum slice
    Narrow,
    /// 32768 channels split across four 8192 byte frames
    Split,
}

impl Geometry {
    pub fn from_channels(channels: usize) -> Result<Self, ConfigError> {
        match channels {
            4096 => Ok(Self::Narrow),
            32768 => Ok(Self::Split),
            n => Err(ConfigError::UnsupportedChannels(n)),
        }
    }

    pub const fn channels(self) -> usize {
        match self {
            Self::Narrow => 4096,
            Self::Split => 32768,
        }
    }

    pub const fn frames_per_slice(self) -> usize {
        match self {
            Self::Narrow => 1,
            Self::Split => 4,
        }
    }

    pub const fn payload_size(self) -> usize {
        self.channels() / self.frames_per_slice()
    }

    /// Size of a whole frame on the wire (and in a file)
    pub const fn frame_size(self) -> usize {
        HEADER_SIZE + self.payload_size()
    }
}

/// Where the sequence counter and quarter index live inside header word 0.
///
/// These were recovered from capture files rather than a format document, so
/// they're kept together here to be checked against a real capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    pub sequence_shift: u32,
    pub sequence_bits: u32,
    pub quarter_shift: u32,
    pub quarter_bits: u32,
}

impl HeaderLayout {
    pub const DEFAULT: Self = Self {
        sequence_shift: 32,
        sequence_bits: 20,
        quarter_shift: 61,
        quarter_bits: 2,
    };

    const fn sequence_mask(&self) -> u64 {
        (1 << self.sequence_bits) - 1
    }

    const fn quarter_mask(&self) -> u64 {
        (1 << self.quarter_bits) - 1
    }

    /// Number of distinct counter values before the counter wraps
    pub const fn modulus(&self) -> u32 {
        1 << self.sequence_bits
    }
}

impl Default for HeaderLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The 32 byte frame header as four big-endian words
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub words: [u64; HEADER_WORDS],
}

impl Header {
    /// Interpret the first [`HEADER_SIZE`] bytes of `bytes`
    fn from_bytes(bytes: &[u8]) -> Self {
        let mut words = [0u64; HEADER_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(WORD_SIZE)) {
            let mut be = [0u8; WORD_SIZE];
            be.copy_from_slice(chunk);
            *word = u64::from_be_bytes(be);
        }
        Self { words }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        for (chunk, word) in bytes.chunks_exact_mut(WORD_SIZE).zip(self.words) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        bytes
    }

    pub fn sequence(&self, layout: &HeaderLayout) -> u32 {
        ((self.words[0] >> layout.sequence_shift) & layout.sequence_mask()) as u32
    }

    pub fn quarter(&self, layout: &HeaderLayout) -> u8 {
        ((self.words[0] >> layout.quarter_shift) & layout.quarter_mask()) as u8
    }

    /// Stamp a counter value, wrapping it into the counter's width
    pub fn set_sequence(&mut self, layout: &HeaderLayout, sequence: u32) {
        let mask = layout.sequence_mask() << layout.sequence_shift;
        self.words[0] = (self.words[0] & !mask)
            | ((sequence as u64 & layout.sequence_mask()) << layout.sequence_shift);
    }

    pub fn set_quarter(&mut self, layout: &HeaderLayout, quarter: u8) {
        let mask = layout.quarter_mask() << layout.quarter_shift;
        self.words[0] = (self.words[0] & !mask)
            | ((quarter as u64 & layout.quarter_mask()) << layout.quarter_shift);
    }
}

/// One frame, borrowing its payload from the buffer it was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: Header,
    payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Build a frame, checking the payload fits the geometry
    pub fn new(header: Header, payload: &'a [u8], geometry: Geometry) -> Result<Self, DecodeError> {
        if payload.len() != geometry.payload_size() {
            return Err(DecodeError::ShortBuffer {
                expected: geometry.payload_size(),
                actual: payload.len(),
            });
        }
        Ok(Self { header, payload })
    }

    /// Quantized magnitudes, one per channel in this frame
    pub fn payload_as_samples(&self) -> &'a [u8] {
        self.payload
    }
}

/// Encoder/decoder for one run's frame geometry and header layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCodec {
    pub geometry: Geometry,
    pub layout: HeaderLayout,
}

impl PacketCodec {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            layout: HeaderLayout::DEFAULT,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.geometry.frame_size()
    }

    fn check_len(&self, bytes: &[u8]) -> Result<(), DecodeError> {
        if bytes.len() != self.frame_size() {
            return Err(DecodeError::ShortBuffer {
                expected: self.frame_size(),
                actual: bytes.len(),
            });
        }
        Ok(())
    }

    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Result<Frame<'a>, DecodeError> {
        self.check_len(bytes)?;
        Ok(Frame {
            header: Header::from_bytes(&bytes[..HEADER_SIZE]),
            payload: &bytes[HEADER_SIZE..],
        })
    }

    /// Header-only decode, skipping the payload entirely
    pub fn sequence_of(&self, bytes: &[u8]) -> Result<u32, DecodeError> {
        self.check_len(bytes)?;
        let mut word = [0u8; WORD_SIZE];
        word.copy_from_slice(&bytes[..WORD_SIZE]);
        Ok(self.sequence_of_word(word))
    }

    /// Counter from the first header word alone
    pub fn sequence_of_word(&self, word: [u8; WORD_SIZE]) -> u32 {
        Header::from_bytes(&word).sequence(&self.layout)
    }

    pub fn encode(&self, frame: &Frame) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.frame_size());
        self.encode_into(frame, &mut bytes);
        bytes
    }

    /// Append the wire form of `frame` to `out`
    pub fn encode_into(&self, frame: &Frame, out: &mut Vec<u8>) {
        out.extend_from_slice(&frame.header.to_bytes());
        out.extend_from_slice(frame.payload);
    }

    pub fn sequence(&self, frame: &Frame) -> u32 {
        frame.header.sequence(&self.layout)
    }

    pub fn quarter(&self, frame: &Frame) -> u8 {
        frame.header.quarter(&self.layout)
    }
}
