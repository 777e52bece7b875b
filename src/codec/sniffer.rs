//! Format sniffer
//!
//! Tries MP3, FLAC, WAV and Ogg/Vorbis in that order. Every attempt reads
//! from offset 0 of a shared `ProbeBuffer`, so a rejected attempt never eats
//! bytes the next one needs.

use std::fmt;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::default::formats::{FlacReader, MpaReader, OggReader, WavReader};
use tracing::{debug, info};

use crate::codec::decoder::DecodedStream;
use crate::codec::probe::{ByteSource, ProbeBuffer};
use crate::codec::SampleFormat;
use crate::constants::DEFAULT_PROBE_LIMIT_BYTES;
use crate::error::{CodecError, Error, NetworkError};

/// Longest container signature we look at
const SIGNATURE_LEN: usize = 4;

/// Codecs the sniffer knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Mp3,
    Flac,
    Wav,
    Vorbis,
}

impl Codec {
    /// Detection order
    pub const PRIORITY: [Codec; 4] = [Codec::Mp3, Codec::Flac, Codec::Wav, Codec::Vorbis];

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Mp3 => "MP3",
            Codec::Flac => "FLAC",
            Codec::Wav => "WAV",
            Codec::Vorbis => "Ogg/Vorbis",
        }
    }

    /// Magic bytes at the start of the container, where there are any
    fn signature(&self) -> Option<&'static [u8]> {
        match self {
            Codec::Mp3 => None,
            Codec::Flac => Some(b"fLaC"),
            Codec::Wav => Some(b"RIFF"),
            Codec::Vorbis => Some(b"OggS"),
        }
    }

    /// Cheap rejection before running the real reader.
    ///
    /// The MPEG reader resynchronises on any frame-sync pattern, so it would
    /// happily lock onto PCM data inside a WAV file. It is skipped when the
    /// stream opens with another container's signature.
    fn rules_out(&self, prefix: &[u8]) -> bool {
        match self {
            Codec::Mp3 => Codec::PRIORITY
                .iter()
                .filter_map(|c| c.signature())
                .any(|sig| prefix.starts_with(sig)),
            _ => false,
        }
    }

    pub(crate) fn open_reader(
        &self,
        mss: MediaSourceStream,
        options: &FormatOptions,
    ) -> symphonia::core::errors::Result<Box<dyn FormatReader>> {
        Ok(match self {
            Codec::Mp3 => Box::new(MpaReader::try_new(mss, options)?),
            Codec::Flac => Box::new(FlacReader::try_new(mss, options)?),
            Codec::Wav => Box::new(WavReader::try_new(mss, options)?),
            Codec::Vorbis => Box::new(OggReader::try_new(mss, options)?),
        })
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configurable format detector
#[derive(Debug, Clone)]
pub struct Sniffer {
    probe_limit: usize,
    order: Vec<Codec>,
}

impl Default for Sniffer {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_LIMIT_BYTES)
    }
}

impl Sniffer {
    /// Sniffer buffering at most `probe_limit` bytes per detection
    pub fn new(probe_limit: usize) -> Self {
        Self {
            probe_limit,
            order: Codec::PRIORITY.to_vec(),
        }
    }

    /// Restrict or reorder the candidate codecs
    pub fn with_order(mut self, order: &[Codec]) -> Self {
        self.order = order.to_vec();
        self
    }

    /// Detect the stream's codec.
    ///
    /// Returns the decoded stream positioned at its first block, or
    /// `CodecError::UnsupportedFormat` when no candidate accepts it. A read
    /// failure of the source itself is reported as a network error.
    pub fn detect(&self, source: ByteSource) -> Result<(DecodedStream, SampleFormat), Error> {
        let probe = ProbeBuffer::new(source, self.probe_limit);

        let prefix = probe.peek(SIGNATURE_LEN).map_err(|e| {
            NetworkError::ReadFailed(probe.source_failure().unwrap_or_else(|| e.to_string()))
        })?;

        for codec in &self.order {
            if codec.rules_out(&prefix) {
                debug!("{} ruled out by container signature", codec);
                continue;
            }

            match DecodedStream::try_open(*codec, probe.cursor()) {
                Ok(stream) => {
                    probe.commit();
                    let format = stream.format();
                    info!(
                        "Detected {}: {} Hz, {} channels ({} bytes probed)",
                        codec,
                        format.sample_rate,
                        format.channels,
                        probe.recorded_len()
                    );
                    return Ok((stream, format));
                }
                Err(e) => {
                    if let Some(failure) = probe.source_failure() {
                        return Err(NetworkError::ReadFailed(failure).into());
                    }
                    debug!("{} rejected the stream: {}", codec, e);
                }
            }
        }

        Err(CodecError::UnsupportedFormat.into())
    }
}

/// Detect with default settings
pub fn detect(source: ByteSource) -> Result<(DecodedStream, SampleFormat), Error> {
    Sniffer::default().detect(source)
}


#[cfg(test)]
mod tests {
    use super::fixtures::{flac_ramp, mp3_silence, ogg_vorbis_silence, wav_tone, FLAC_BLOCK};
    use super::*;
    use std::io::{self, Cursor, Read};

    fn source(bytes: Vec<u8>) -> ByteSource {
        Box::new(Cursor::new(bytes))
    }

    #[test]
    fn test_detects_wav_format() {
        let (stream, format) = detect(source(wav_tone(22050, 2, 4096))).unwrap();
        assert_eq!(stream.codec(), Codec::Wav);
        assert_eq!(format, SampleFormat::new(22050, 2));

        let total: usize = stream.map(|block| block.unwrap().len()).sum();
        assert_eq!(total, 4096 * 2);
    }

    #[test]
    fn test_detects_mono_wav() {
        let (stream, format) = detect(source(wav_tone(8000, 1, 800))).unwrap();
        assert_eq!(stream.codec(), Codec::Wav);
        assert_eq!(format.channels, 1);
        assert_eq!(format.sample_rate, 8000);
    }

    #[test]
    fn test_html_page_is_unsupported() {
        let page = b"<!DOCTYPE html><html><head><title>502 Bad Gateway</title></head>\
            <body><h1>Bad Gateway</h1><p>The upstream server is unavailable.</p></body></html>"
            .to_vec();
        let err = detect(source(page)).err().unwrap();
        assert!(matches!(err, Error::Codec(CodecError::UnsupportedFormat)));
    }

    #[test]
    fn test_empty_stream_is_unsupported() {
        let err = detect(source(Vec::new())).err().unwrap();
        assert!(matches!(err, Error::Codec(CodecError::UnsupportedFormat)));
    }

    #[test]
    fn test_failed_attempt_does_not_consume_bytes() {
        // FLAC is tried first here and reads past the signature before
        // giving up; WAV must still see the stream from offset 0.
        let sniffer = Sniffer::default().with_order(&[Codec::Flac, Codec::Vorbis, Codec::Wav]);
        let (stream, format) = sniffer.detect(source(wav_tone(44100, 2, 2048))).unwrap();
        assert_eq!(stream.codec(), Codec::Wav);
        assert_eq!(format, SampleFormat::new(44100, 2));
    }

    #[test]
    fn test_wav_signature_rules_out_mp3() {
        assert!(Codec::Mp3.rules_out(b"RIFF"));
        assert!(Codec::Mp3.rules_out(b"OggS"));
        assert!(!Codec::Mp3.rules_out(b"ID3\x04"));
        assert!(!Codec::Wav.rules_out(b"RIFF"));
    }

    #[test]
    fn test_detects_mp3() {
        let (stream, format) = detect(source(mp3_silence(40))).unwrap();
        assert_eq!(stream.codec(), Codec::Mp3);
        assert_eq!(format, SampleFormat::new(44100, 2));

        let samples: Vec<f32> = stream.flat_map(|block| block.unwrap()).collect();
        assert!(!samples.is_empty());
        assert_eq!(samples.len() % 2, 0);
        assert!(samples.iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn test_detects_flac_past_mp3() {
        const FRAMES: usize = 20;
        let (stream, format) = detect(source(flac_ramp(FRAMES))).unwrap();
        assert_eq!(stream.codec(), Codec::Flac);
        assert_eq!(format, SampleFormat::new(44100, 2));

        let samples: Vec<f32> = stream.flat_map(|block| block.unwrap()).collect();
        assert_eq!(samples.len(), FRAMES * FLAC_BLOCK * 2);
        // frame 0, sample 1: left 4, right 8
        assert_eq!((samples[2] * 32768.0).round() as i32, 4);
        assert_eq!((samples[3] * 32768.0).round() as i32, 8);
    }

    #[test]
    fn test_detects_ogg_vorbis_past_mp3() {
        let (stream, format) = detect(source(ogg_vorbis_silence(22050, 1, 100))).unwrap();
        assert_eq!(stream.codec(), Codec::Vorbis);
        assert_eq!(format, SampleFormat::new(22050, 1));

        let total: usize = stream.map(|block| block.unwrap().len()).sum();
        assert!(total > 0);
    }

    #[test]
    fn test_mp3_alone_refuses_other_containers() {
        let mp3_only = Sniffer::default().with_order(&[Codec::Mp3]);
        for bytes in [flac_ramp(4), ogg_vorbis_silence(44100, 2, 8)] {
            let err = mp3_only.detect(source(bytes)).err().unwrap();
            assert!(matches!(err, Error::Codec(CodecError::UnsupportedFormat)));
        }
        assert!(Codec::Mp3.rules_out(b"fLaC"));
    }

    struct ResetAfter {
        inner: Cursor<Vec<u8>>,
        remaining: usize,
    }

    impl Read for ResetAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
            }
            let n = buf.len().min(self.remaining);
            let n = self.inner.read(&mut buf[..n])?;
            self.remaining -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_network_failure_while_detecting() {
        let reader = ResetAfter {
            inner: Cursor::new(vec![b'x'; 4096]),
            remaining: 100,
        };
        let err = detect(Box::new(reader)).err().unwrap();
        assert!(matches!(err, Error::Network(NetworkError::ReadFailed(_))));
    }
}
