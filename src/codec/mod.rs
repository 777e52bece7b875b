//! Format detection and decoding
//!
//! Streams arrive without a reliable container hint, so the sniffer tries
//! each supported codec in priority order against a rewindable prefix of
//! the stream and keeps the first one that decodes.

pub mod decoder;
pub mod probe;
pub mod sniffer;

pub use decoder::DecodedStream;
pub use probe::{ByteSource, ProbeBuffer};
pub use sniffer::{detect, Codec, Sniffer};

/// PCM layout of a decoded stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl SampleFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}
