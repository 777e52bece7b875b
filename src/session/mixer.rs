//! Render callback body
//!
//! Runs on the audio subsystem's real-time thread. Never blocks, never
//! allocates, never logs. Spent frames go back through the ring for reuse
//! rather than being freed here.

use std::sync::Arc;

use crate::audio::buffer::{BlockCursor, SharedRingBuffer};
use crate::session::SessionShared;

pub(crate) struct Mixer {
    shared: Arc<SessionShared>,
    ring: SharedRingBuffer,
    cursor: BlockCursor,
    /// Last parameters read; reused when the state lock is contended
    gain: f32,
    muted: bool,
}

impl Mixer {
    pub fn new(shared: Arc<SessionShared>, ring: SharedRingBuffer) -> Self {
        let (gain, muted) = {
            let state = shared.lock();
            (state.gain, state.muted)
        };
        Self {
            shared,
            ring,
            cursor: BlockCursor::new(),
            gain,
            muted,
        }
    }

    /// Fill one interleaved output block
    pub fn render(&mut self, out: &mut [f32]) {
        if let Some(state) = self.shared.try_lock() {
            self.gain = state.gain;
            self.muted = state.muted;
        }

        // Paused: keep the ring untouched so playback resumes where it left off
        if self.muted {
            out.fill(0.0);
            self.shared.store_level(0.0);
            return;
        }

        let written = self.cursor.fill(&self.ring, out);
        if written < out.len() {
            out[written..].fill(0.0);
            self.shared.record_underrun();
        }

        let mut peak = 0.0f32;
        for sample in &mut out[..written] {
            *sample = (*sample * self.gain).clamp(-1.0, 1.0);
            peak = peak.max(sample.abs());
        }
        self.shared.store_level(peak);
        self.shared.set_block_pending(self.cursor.has_pending());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{create_shared_buffer, AudioFrame};
    use crate::control::Command;
    use crate::session::PlaybackState;

    fn setup() -> (Arc<SessionShared>, SharedRingBuffer, Mixer) {
        let shared = Arc::new(SessionShared::new(PlaybackState::default()));
        let ring = create_shared_buffer(8);
        let mixer = Mixer::new(shared.clone(), ring.clone());
        (shared, ring, mixer)
    }

    #[test]
    fn test_applies_gain_and_clamps() {
        let (shared, ring, mut mixer) = setup();
        shared.lock().apply(Command::VolumeUp);
        shared.lock().apply(Command::VolumeUp);
        shared.lock().apply(Command::VolumeUp);
        shared.lock().apply(Command::VolumeUp);

        ring.push(AudioFrame::new(vec![0.25, -0.25, 0.9, -0.9], 2, 0)).unwrap();
        let mut out = [0.0f32; 4];
        mixer.render(&mut out);

        assert_eq!(out, [0.5, -0.5, 1.0, -1.0]);
        assert_eq!(shared.snapshot().level, 1.0);
    }

    #[test]
    fn test_underrun_pads_with_silence() {
        let (shared, ring, mut mixer) = setup();
        ring.push(AudioFrame::new(vec![0.5, 0.5], 2, 0)).unwrap();

        let mut out = [1.0f32; 6];
        mixer.render(&mut out);

        assert_eq!(out, [0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(shared.snapshot().underruns, 1);
    }

    #[test]
    fn test_muted_does_not_drain() {
        let (shared, ring, mut mixer) = setup();
        ring.push(AudioFrame::new(vec![0.5; 4], 2, 0)).unwrap();
        shared.lock().muted = true;

        let mut out = [1.0f32; 4];
        mixer.render(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(ring.len(), 1);
        assert_eq!(shared.snapshot().underruns, 0);

        shared.lock().muted = false;
        mixer.render(&mut out);
        assert_eq!(out, [0.5; 4]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_contended_lock_keeps_last_parameters() {
        let (shared, ring, mut mixer) = setup();
        ring.push(AudioFrame::new(vec![0.25; 2], 1, 0)).unwrap();

        let mut guard = shared.lock();
        guard.muted = true;
        let mut out = [0.0f32; 2];
        mixer.render(&mut out);
        drop(guard);

        assert_eq!(out, [0.25; 2]);
    }

    #[test]
    fn test_played_frames_return_to_the_pump() {
        let (_shared, ring, mut mixer) = setup();
        ring.push(AudioFrame::new(vec![0.1; 4], 2, 0)).unwrap();

        let mut out = [0.0f32; 4];
        mixer.render(&mut out);

        let reused = ring.take_spent().expect("buffer handed back");
        assert!(reused.is_empty());
        assert!(reused.capacity() >= 4);
    }
}
