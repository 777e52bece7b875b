//! Symphonia decode pipeline for one detected stream
//!
//! A `DecodedStream` is a lazy, finite, non-restartable sequence of
//! interleaved f32 blocks at a fixed `SampleFormat`.

use std::io;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use tracing::warn;

use crate::codec::probe::ProbeCursor;
use crate::codec::sniffer::Codec;
use crate::codec::SampleFormat;
use crate::error::CodecError;

/// Corrupt packets tolerated in a row before the stream is declared broken
const MAX_CONSECUTIVE_DECODE_ERRORS: usize = 8;

/// Decoder state for one stream
pub struct DecodedStream {
    codec: Codec,
    // dropped before the reader, which owns the network source
    decoder: Box<dyn Decoder>,
    reader: Box<dyn FormatReader>,
    track_id: u32,
    format: SampleFormat,
    /// Block decoded while probing, handed out first
    pending: Option<Vec<f32>>,
    finished: bool,
    consecutive_errors: usize,
    packets_decoded: u64,
    packets_skipped: u64,
}

impl DecodedStream {
    /// Open `codec` over `cursor` and decode the first packet.
    ///
    /// Fails unless the container parses, a decoder exists for its track,
    /// and at least one packet decodes.
    pub(crate) fn try_open(codec: Codec, cursor: ProbeCursor) -> Result<Self, CodecError> {
        let mss = MediaSourceStream::new(Box::new(ReadOnlySource::new(cursor)), Default::default());
        let reader = codec
            .open_reader(mss, &FormatOptions::default())
            .map_err(map_symphonia_error)?;

        let track = reader
            .default_track()
            .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .or_else(|| {
                reader
                    .tracks()
                    .iter()
                    .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            })
            .ok_or_else(|| CodecError::DecodingFailed("no audio track".to_string()))?;

        let track_id = track.id;
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(map_symphonia_error)?;

        let format = SampleFormat::new(
            track.codec_params.sample_rate.unwrap_or(0),
            track
                .codec_params
                .channels
                .map(|c| c.count() as u16)
                .unwrap_or(0),
        );

        let mut stream = Self {
            codec,
            decoder,
            reader,
            track_id,
            format,
            pending: None,
            finished: false,
            consecutive_errors: 0,
            packets_decoded: 0,
            packets_skipped: 0,
        };

        let first = stream.decode_next()?.ok_or_else(|| {
            CodecError::DecodingFailed("stream ended before the first packet".to_string())
        })?;
        if stream.format.sample_rate == 0 || stream.format.channels == 0 {
            return Err(CodecError::DecodingFailed(
                "stream has no usable sample format".to_string(),
            ));
        }
        stream.pending = Some(first);
        Ok(stream)
    }

    /// Codec that accepted the stream
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Sample format of every block this stream yields
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn packets_decoded(&self) -> u64 {
        self.packets_decoded
    }

    pub fn packets_skipped(&self) -> u64 {
        self.packets_skipped
    }

    /// Decode the next packet of our track. `Ok(None)` at end of stream.
    fn decode_next(&mut self) -> Result<Option<Vec<f32>>, CodecError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.finished = true;
                    return Ok(None);
                }
                Err(e) => return Err(map_symphonia_error(e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    self.consecutive_errors = 0;
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let spec = *decoded.spec();
                    self.format = SampleFormat::new(spec.rate, spec.channels.count() as u16);

                    let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);
                    self.packets_decoded += 1;
                    return Ok(Some(buf.samples().to_vec()));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    self.packets_skipped += 1;
                    self.consecutive_errors += 1;
                    if self.consecutive_errors > MAX_CONSECUTIVE_DECODE_ERRORS {
                        return Err(CodecError::DecodingFailed(e.to_string()));
                    }
                    warn!("Skipping corrupt {} packet: {}", self.codec, e);
                }
                Err(e) => return Err(map_symphonia_error(e)),
            }
        }
    }
}

impl Iterator for DecodedStream {
    type Item = Result<Vec<f32>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(block) = self.pending.take() {
            return Some(Ok(block));
        }
        if self.finished {
            return None;
        }
        match self.decode_next() {
            Ok(Some(block)) => Some(Ok(block)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn map_symphonia_error(err: SymphoniaError) -> CodecError {
    match err {
        SymphoniaError::IoError(e) => CodecError::SourceFailed(e.to_string()),
        other => CodecError::DecodingFailed(other.to_string()),
    }
}
