//! # Radio Tuner
//!
//! Internet radio streaming with glitch-free playback control.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  UI thread (bin/radio)                                                     │
//! │     │ start_playback / send_command / snapshot                            │
//! │     ▼                                                                     │
//! │  ┌──────────────────────────┐      ┌──────────────────────────┐          │
//! │  │ Player (control)         │─────▶│ session-monitor thread   │          │
//! │  │ bounded Command channel  │      │ join + completion signal │          │
//! │  └────────────┬─────────────┘      └──────────────────────────┘          │
//! │               ▼                                                           │
//! │  ┌──────────────────────────┐                                            │
//! │  │ Playback Session         │  Arc<Mutex<PlaybackState>>                 │
//! │  │ command loop thread      │◀──────────────────────┐                    │
//! │  └────────────┬─────────────┘                       │ try_lock          │
//! │               │ spawns                              │                    │
//! │               ▼                                     │                    │
//! │  ┌──────────────────────────┐   RingBuffer   ┌──────┴─────────────────┐  │
//! │  │ decode-pump thread       │──────────────▶│ Render Engine callback │  │
//! │  │ HTTP ─▶ Sniffer ─▶ PCM   │  AudioFrames   │ (cpal real-time thread)│  │
//! │  └──────────────────────────┘                └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod network;
pub mod session;

pub use catalog::Station;
pub use control::{Command, CompletionSignal, Player, SessionOutcome};
pub use error::{Error, Result};
pub use session::{PlaybackSnapshot, PlayerState};

/// Application-wide constants
pub mod constants {
    /// Default radio-browser API mirror
    pub const DEFAULT_DIRECTORY_URL: &str = "https://de1.api.radio-browser.info";

    /// Number of top-clicked stations requested from the directory
    pub const DEFAULT_STATION_LIMIT: usize = 50;

    /// Catalog refresh period in seconds
    pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 600;

    /// Bytes of stream prefix kept for format probing
    pub const DEFAULT_PROBE_LIMIT_BYTES: usize = 256 * 1024;

    /// Ring buffer capacity between decode pump and render callback (in frames)
    pub const RING_BUFFER_CAPACITY: usize = 256;

    /// Samples per channel in one block handed to the ring buffer
    pub const DEFAULT_BLOCK_FRAMES: usize = 1024;

    /// Size of one volume step in the logarithmic control range
    pub const DEFAULT_VOLUME_STEP: f32 = 0.25;
    pub const MIN_VOLUME_STEP: f32 = 0.01;

    /// Lower/upper bound of the logarithmic volume control
    pub const VOLUME_MIN: f32 = -2.0;
    pub const VOLUME_MAX: f32 = 2.0;

    /// Capacity of the UI to session command channel
    pub const COMMAND_CHANNEL_CAPACITY: usize = 8;

    /// HTTP timeouts in seconds
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
    pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 15;

    /// User agent sent with every request
    pub const USER_AGENT: &str = concat!("radio-tuner/", env!("CARGO_PKG_VERSION"));
}
