//! Output format conversion
//!
//! Maps decoded blocks onto the format the output device runs at: channel
//! layout first, then sample rate through an FFT resampler.

use rubato::{FftFixedIn, Resampler};

use crate::codec::SampleFormat;
use crate::error::AudioError;

/// FFT sub-chunks per resampler chunk
const RESAMPLER_SUB_CHUNKS: usize = 4;

/// Converts interleaved f32 blocks from one `SampleFormat` to another
pub struct FormatConverter {
    source: SampleFormat,
    target: SampleFormat,
    resampler: Option<FftFixedIn<f32>>,
    /// Planar input waiting for a full resampler chunk
    pending: Vec<Vec<f32>>,
}

impl FormatConverter {
    /// Converter from `source` to `target`, resampling in chunks of
    /// `chunk_frames` input frames
    pub fn new(
        source: SampleFormat,
        target: SampleFormat,
        chunk_frames: usize,
    ) -> Result<Self, AudioError> {
        let channels = target.channels.max(1) as usize;
        let resampler = if source.sample_rate != target.sample_rate {
            let resampler = FftFixedIn::<f32>::new(
                source.sample_rate as usize,
                target.sample_rate as usize,
                chunk_frames.max(1),
                RESAMPLER_SUB_CHUNKS,
                channels,
            )
            .map_err(|e| AudioError::StreamError(format!("resampler setup failed: {}", e)))?;
            tracing::debug!(
                "Resampling {} Hz -> {} Hz",
                source.sample_rate,
                target.sample_rate
            );
            Some(resampler)
        } else {
            None
        };

        Ok(Self {
            source,
            target,
            resampler,
            pending: vec![Vec::new(); channels],
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.source == self.target
    }

    pub fn target(&self) -> SampleFormat {
        self.target
    }

    /// Convert one block. While the resampler fills up this may return
    /// fewer frames than it was given, or none.
    pub fn process(&mut self, block: Vec<f32>) -> Result<Vec<f32>, AudioError> {
        if self.is_passthrough() {
            return Ok(block);
        }
        let mapped = remap_channels(&block, self.source.channels, self.target.channels);
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(mapped);
        };

        let channels = self.pending.len();
        for frame in mapped.chunks_exact(channels) {
            for (lane, sample) in self.pending.iter_mut().zip(frame) {
                lane.push(*sample);
            }
        }

        let mut out = Vec::new();
        while self.pending[0].len() >= resampler.input_frames_next() {
            let needed = resampler.input_frames_next();
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|lane| lane.drain(..needed).collect())
                .collect();
            let resampled = resampler
                .process(chunk.as_slice(), None)
                .map_err(|e| AudioError::StreamError(format!("resampling failed: {}", e)))?;
            interleave(&resampled, &mut out);
        }
        Ok(out)
    }

    /// Push out whatever input is still held back, padded to a full chunk
    pub fn flush(&mut self) -> Result<Vec<f32>, AudioError> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(Vec::new());
        };
        if self.pending[0].is_empty() {
            return Ok(Vec::new());
        }
        let tail: Vec<Vec<f32>> = self.pending.iter_mut().map(std::mem::take).collect();
        let resampled = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(|e| AudioError::StreamError(format!("resampling failed: {}", e)))?;
        let mut out = Vec::new();
        interleave(&resampled, &mut out);
        Ok(out)
    }
}

/// Mono spreads to every output channel, any layout folds to mono by
/// averaging, otherwise channels are taken in order and repeated as needed.
fn remap_channels(block: &[f32], from: u16, to: u16) -> Vec<f32> {
    let (from, to) = (from.max(1) as usize, to.max(1) as usize);
    if from == to {
        return block.to_vec();
    }
    let mut out = Vec::with_capacity(block.len() / from * to);
    for frame in block.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            out.extend((0..to).map(|ch| frame[ch % from]));
        }
    }
    out
}

fn interleave(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    let frames = planar.first().map(|lane| lane.len()).unwrap_or(0);
    out.reserve(frames * planar.len());
    for i in 0..frames {
        out.extend(planar.iter().map(|lane| lane[i]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_format_passes_through() {
        let format = SampleFormat::new(44100, 2);
        let mut converter = FormatConverter::new(format, format, 256).unwrap();
        assert!(converter.is_passthrough());
        assert_eq!(converter.process(vec![0.1, 0.2]).unwrap(), vec![0.1, 0.2]);
        assert!(converter.flush().unwrap().is_empty());
    }

    #[test]
    fn test_mono_spreads_to_stereo() {
        let mut converter =
            FormatConverter::new(SampleFormat::new(8000, 1), SampleFormat::new(8000, 2), 256)
                .unwrap();
        assert_eq!(
            converter.process(vec![0.1, -0.3]).unwrap(),
            vec![0.1, 0.1, -0.3, -0.3]
        );
    }

    #[test]
    fn test_stereo_folds_to_mono() {
        let mut converter =
            FormatConverter::new(SampleFormat::new(8000, 2), SampleFormat::new(8000, 1), 256)
                .unwrap();
        assert_eq!(converter.process(vec![0.5, 0.25, -1.0, 1.0]).unwrap(), vec![0.375, 0.0]);
    }

    #[test]
    fn test_surround_keeps_front_pair() {
        let out = remap_channels(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 6, 2);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn test_resampling_scales_frame_count() {
        const FRAMES: usize = 3000;
        const CHUNK: usize = 256;
        let mut converter = FormatConverter::new(
            SampleFormat::new(22050, 1),
            SampleFormat::new(44100, 2),
            CHUNK,
        )
        .unwrap();

        let input: Vec<f32> = (0..FRAMES).map(|i| ((i as f32) * 0.05).sin() * 0.5).collect();
        let mut out = Vec::new();
        for block in input.chunks(700) {
            out.extend(converter.process(block.to_vec()).unwrap());
        }
        out.extend(converter.flush().unwrap());
        assert!(converter.flush().unwrap().is_empty());

        assert_eq!(out.len() % 2, 0);
        let frames = out.len() / 2;
        assert!(frames >= 2 * FRAMES, "only {} frames", frames);
        assert!(frames <= 2 * (FRAMES + CHUNK), "{} frames", frames);
        assert!(out.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
    }
}
