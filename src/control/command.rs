//! Commands, events and outcomes exchanged with a playback session

use crate::catalog::Station;
use crate::codec::{Codec, SampleFormat};
use crate::error::Error;
use crate::session::PlayerState;

/// User requests delivered to the active session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Pause,
    Resume,
    Stop,
    VolumeUp,
    VolumeDown,
}

impl Command {
    /// Parse the words the text UI accepts
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "pause" | "p" => Some(Command::Pause),
            "resume" | "r" => Some(Command::Resume),
            "stop" | "s" => Some(Command::Stop),
            "up" | "+" => Some(Command::VolumeUp),
            "down" | "-" => Some(Command::VolumeDown),
            _ => None,
        }
    }
}

/// Notifications published while sessions run
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged {
        station: Station,
        from: PlayerState,
        to: PlayerState,
    },
    FormatDetected {
        station: Station,
        codec: Codec,
        format: SampleFormat,
    },
    VolumeChanged {
        volume: f32,
        gain: f32,
    },
    Error {
        station: Station,
        message: String,
    },
}

/// How a session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// Stopped on request
    Stopped,
    /// The stream ended and its audio was played out
    Finished,
    /// Connection, detection, device or decode failure
    Failed(Error),
}

impl SessionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SessionOutcome::Failed(_))
    }
}
