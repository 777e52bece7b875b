//! Control plane
//!
//! The UI talks to at most one playback session at a time through a
//! `Player`. Commands travel over a bounded channel and are never sent with
//! a blocking call from the UI side.

pub mod command;
mod monitor;
pub mod player;

pub use command::{Command, PlayerEvent, SessionOutcome};
pub use player::{CompletionSignal, Player};
