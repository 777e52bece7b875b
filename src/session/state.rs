//! Playback state machine and parameters

use serde::Serialize;

use crate::constants::{DEFAULT_VOLUME_STEP, MIN_VOLUME_STEP, VOLUME_MAX, VOLUME_MIN};
use crate::control::Command;

/// Lifecycle of one playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PlayerState {
    Idle,
    Connecting,
    Playing,
    Paused,
    Stopped,
    Error,
}

impl PlayerState {
    /// No further transitions happen from here
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlayerState::Stopped | PlayerState::Error)
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlayerState::Idle => "idle",
            PlayerState::Connecting => "connecting",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Stopped => "stopped",
            PlayerState::Error => "error",
        }
    }
}

/// What applying a command did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// Nothing to do in the current state
    Unchanged,
    /// Moved between states
    State { from: PlayerState, to: PlayerState },
    /// Volume moved; the new control value and linear gain
    Volume { volume: f32, gain: f32 },
    /// Session must tear down
    Stop,
}

/// Mutable playback parameters of one session.
///
/// Gain is `2^volume`, with volume held as a whole number of steps so that
/// up/down are exact inverses. A press swallowed at either bound is
/// remembered, and the next opposite press only cancels it, so Up then Down
/// lands where it started even at the top step.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub state: PlayerState,
    pub volume_steps: i32,
    pub volume_step: f32,
    /// Direction of the last press clamped at a bound, 0 when none
    volume_overshoot: i32,
    pub gain: f32,
    pub muted: bool,
    pub sample_rate: u32,
    pub channels: u16,
    pub station_name: Option<String>,
    pub last_error: Option<String>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME_STEP, 0)
    }
}

impl PlaybackState {
    pub fn new(volume_step: f32, initial_steps: i32) -> Self {
        let volume_step = if volume_step.is_finite() && volume_step > 0.0 {
            volume_step.max(MIN_VOLUME_STEP)
        } else {
            DEFAULT_VOLUME_STEP
        };
        let mut state = Self {
            state: PlayerState::Idle,
            volume_steps: 0,
            volume_step,
            volume_overshoot: 0,
            gain: 1.0,
            muted: false,
            sample_rate: 0,
            channels: 0,
            station_name: None,
            last_error: None,
        };
        state.volume_steps = initial_steps.clamp(state.min_steps(), state.max_steps());
        state.update_gain();
        state
    }

    /// Control value on the log2 scale
    pub fn volume(&self) -> f32 {
        self.volume_steps as f32 * self.volume_step
    }

    fn min_steps(&self) -> i32 {
        (VOLUME_MIN / self.volume_step).ceil() as i32
    }

    fn max_steps(&self) -> i32 {
        (VOLUME_MAX / self.volume_step).floor() as i32
    }

    fn update_gain(&mut self) {
        self.gain = 2f32.powf(self.volume());
    }

    fn step_volume(&mut self, delta: i32) -> Transition {
        if self.volume_overshoot != 0 && self.volume_overshoot.signum() != delta.signum() {
            self.volume_overshoot = 0;
            return Transition::Unchanged;
        }
        let next = self
            .volume_steps
            .saturating_add(delta)
            .clamp(self.min_steps(), self.max_steps());
        if next == self.volume_steps {
            self.volume_overshoot = delta.signum();
            return Transition::Unchanged;
        }
        self.volume_overshoot = 0;
        self.volume_steps = next;
        self.update_gain();
        Transition::Volume {
            volume: self.volume(),
            gain: self.gain,
        }
    }

    /// Move to `to`, reporting the transition
    pub fn set_state(&mut self, to: PlayerState) -> Transition {
        let from = self.state;
        if from == to {
            return Transition::Unchanged;
        }
        self.state = to;
        Transition::State { from, to }
    }

    /// Apply a user command.
    ///
    /// Pause only mutes; the render loop keeps running so resume is instant.
    /// Stop is reported, the caller sets `Stopped` after releasing resources.
    pub fn apply(&mut self, command: Command) -> Transition {
        match command {
            Command::Pause => match self.state {
                PlayerState::Playing => {
                    self.muted = true;
                    self.set_state(PlayerState::Paused)
                }
                _ => Transition::Unchanged,
            },
            Command::Resume => match self.state {
                PlayerState::Paused => {
                    self.muted = false;
                    self.set_state(PlayerState::Playing)
                }
                _ => Transition::Unchanged,
            },
            Command::Stop => {
                if self.state.is_terminal() {
                    Transition::Unchanged
                } else {
                    Transition::Stop
                }
            }
            Command::VolumeUp => self.step_volume(1),
            Command::VolumeDown => self.step_volume(-1),
        }
    }
}

/// Read-only view for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSnapshot {
    pub state: PlayerState,
    pub gain: f32,
    pub volume: f32,
    pub muted: bool,
    pub station_name: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Peak of the last rendered block, 0..=1
    pub level: f32,
    pub underruns: u64,
    pub last_error: Option<String>,
}

impl PlaybackSnapshot {
    pub fn idle() -> Self {
        Self::from_state(&PlaybackState::default(), 0.0, 0)
    }

    pub(crate) fn from_state(state: &PlaybackState, level: f32, underruns: u64) -> Self {
        Self {
            state: state.state,
            gain: state.gain,
            volume: state.volume(),
            muted: state.muted,
            station_name: state.station_name.clone(),
            sample_rate: state.sample_rate,
            channels: state.channels,
            level,
            underruns,
            last_error: state.last_error.clone(),
        }
    }

    /// Textual level meter, `width` characters wide
    pub fn meter(&self, width: usize) -> String {
        let filled = ((self.level.clamp(0.0, 1.0) * width as f32).round() as usize).min(width);
        format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn playing() -> PlaybackState {
        let mut state = PlaybackState::default();
        state.set_state(PlayerState::Connecting);
        state.set_state(PlayerState::Playing);
        state
    }

    #[test]
    fn test_pause_resume_toggle_mute_only() {
        let mut state = playing();
        let gain = state.gain;

        assert_eq!(
            state.apply(Command::Pause),
            Transition::State {
                from: PlayerState::Playing,
                to: PlayerState::Paused
            }
        );
        assert!(state.muted);
        assert_eq!(state.gain, gain);

        assert_eq!(state.apply(Command::Pause), Transition::Unchanged);

        state.apply(Command::Resume);
        assert_eq!(state.state, PlayerState::Playing);
        assert!(!state.muted);
        assert_eq!(state.apply(Command::Resume), Transition::Unchanged);
    }

    #[test]
    fn test_stop_is_requested_once_terminal_ignores() {
        let mut state = playing();
        assert_eq!(state.apply(Command::Stop), Transition::Stop);

        state.set_state(PlayerState::Stopped);
        assert_eq!(state.apply(Command::Stop), Transition::Unchanged);
        assert_eq!(state.apply(Command::Pause), Transition::Unchanged);
        assert_eq!(state.state, PlayerState::Stopped);
    }

    #[test]
    fn test_volume_clamps_at_bounds() {
        let mut state = PlaybackState::new(0.25, 0);
        for _ in 0..20 {
            state.apply(Command::VolumeUp);
        }
        assert_eq!(state.volume(), VOLUME_MAX);
        assert_eq!(state.gain, 4.0);
        assert_eq!(state.apply(Command::VolumeUp), Transition::Unchanged);

        for _ in 0..40 {
            state.apply(Command::VolumeDown);
        }
        assert_eq!(state.volume(), VOLUME_MIN);
        assert_eq!(state.gain, 0.25);
        assert!(state.gain > 0.0);
    }

    #[test]
    fn test_up_down_at_top_step_restores_gain() {
        let mut state = PlaybackState::new(0.25, 8);
        assert_eq!(state.gain, 4.0);

        assert_eq!(state.apply(Command::VolumeUp), Transition::Unchanged);
        assert_eq!(state.apply(Command::VolumeDown), Transition::Unchanged);
        assert_eq!(state.gain, 4.0);

        // the swallowed press is spent; the next Down moves
        assert!(matches!(state.apply(Command::VolumeDown), Transition::Volume { .. }));
        assert!(state.gain < 4.0);
    }

    #[test]
    fn test_down_up_at_bottom_step_restores_gain() {
        let mut state = PlaybackState::new(0.25, -8);
        state.apply(Command::VolumeDown);
        state.apply(Command::VolumeDown);
        state.apply(Command::VolumeUp);
        assert_eq!(state.gain, 0.25);
        assert!(matches!(state.apply(Command::VolumeUp), Transition::Volume { .. }));
    }

    #[test]
    fn test_tiny_volume_step_is_bounded() {
        let mut state = PlaybackState::new(1e-30, 0);
        assert_eq!(state.volume_step, MIN_VOLUME_STEP);
        for _ in 0..1000 {
            state.apply(Command::VolumeDown);
        }
        assert!((state.volume() - VOLUME_MIN).abs() < 1e-3);
        assert!(state.gain >= 0.25 - 1e-4);

        for step in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            assert_eq!(PlaybackState::new(step, 0).volume_step, DEFAULT_VOLUME_STEP);
        }
    }

    #[test]
    fn test_volume_does_not_change_state() {
        let mut state = playing();
        state.apply(Command::Pause);
        state.apply(Command::VolumeUp);
        assert_eq!(state.state, PlayerState::Paused);
        assert!(state.muted);
    }

    #[test]
    fn test_meter_rendering() {
        let mut snapshot = PlaybackSnapshot::idle();
        snapshot.level = 0.5;
        assert_eq!(snapshot.meter(10), "[#####-----]");
        snapshot.level = 3.0;
        assert_eq!(snapshot.meter(4), "[####]");
    }

    fn command() -> impl Strategy<Value = Command> {
        prop_oneof![
            Just(Command::Pause),
            Just(Command::Resume),
            Just(Command::VolumeUp),
            Just(Command::VolumeDown),
        ]
    }

    proptest! {
        #[test]
        fn prop_up_then_down_restores_gain(start in -8i32..=8, ops in proptest::collection::vec(command(), 0..32)) {
            let mut state = playing();
            for op in ops {
                state.apply(op);
            }
            state.volume_steps = start;
            state.volume_overshoot = 0;
            state.update_gain();
            let before = state.gain;

            state.apply(Command::VolumeUp);
            state.apply(Command::VolumeDown);
            prop_assert!((state.gain - before).abs() < 1e-6);

            state.apply(Command::VolumeDown);
            let before = state.gain;
            state.apply(Command::VolumeDown);
            state.apply(Command::VolumeUp);
            prop_assert!((state.gain - before).abs() < 1e-6);
        }

        #[test]
        fn prop_gain_stays_bounded(ops in proptest::collection::vec(command(), 0..64)) {
            let mut state = playing();
            for op in ops {
                state.apply(op);
                prop_assert!(state.gain >= 0.25 && state.gain <= 4.0);
                prop_assert!(matches!(state.state, PlayerState::Playing | PlayerState::Paused));
                prop_assert_eq!(state.muted, state.state == PlayerState::Paused);
            }
        }
    }
}
