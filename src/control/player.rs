//! UI-facing player
//!
//! Owns the active session slot. Starting a station stops and joins the
//! previous session first, so the output device is never bound twice.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::render::{CpalBackend, OutputBackend};
use crate::catalog::Station;
use crate::config::{AppConfig, PlaybackConfig};
use crate::constants::COMMAND_CHANNEL_CAPACITY;
use crate::control::monitor::Monitor;
use crate::control::{Command, PlayerEvent, SessionOutcome};
use crate::error::{ControlError, Result};
use crate::network::{HttpOpener, StreamOpener};
use crate::session::{
    PlaybackSession, PlaybackSnapshot, PlaybackState, SessionContext, SessionShared,
};

/// Events kept for a slow consumer before new ones are dropped
const EVENT_QUEUE_CAPACITY: usize = 256;

/// The running session as seen from the player
pub(crate) struct ActiveSession {
    pub id: u64,
    commands: Sender<Command>,
    /// Disconnects once the session thread has been joined
    released: Receiver<()>,
}

impl ActiveSession {
    /// Request stop and block until the session released everything.
    ///
    /// Dropping the sender ends the session even if the Stop does not fit;
    /// commands already queued are applied first.
    fn shutdown(self) {
        let ActiveSession {
            id,
            commands,
            released,
        } = self;
        if let Err(TrySendError::Full(_)) = commands.try_send(Command::Stop) {
            tracing::debug!("Session {} command queue full, closing it instead", id);
        }
        drop(commands);
        let _ = released.recv();
    }
}

/// Resolves once with the outcome of one session
pub struct CompletionSignal {
    session_id: u64,
    outcome: Receiver<SessionOutcome>,
}

impl CompletionSignal {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Block until the session ends
    pub fn wait(self) -> Option<SessionOutcome> {
        self.outcome.recv().ok()
    }

    /// Block for at most `timeout`. The outcome is handed out once.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<SessionOutcome> {
        self.outcome.recv_timeout(timeout).ok()
    }
}

/// Plays one station at a time
pub struct Player {
    opener: Arc<dyn StreamOpener>,
    backend: Arc<dyn OutputBackend>,
    config: PlaybackConfig,
    /// Serializes start and stop
    lifecycle: Mutex<()>,
    active: Arc<Mutex<Option<ActiveSession>>>,
    /// State of the most recent session, kept after it ends
    current: Mutex<Option<Arc<SessionShared>>>,
    next_id: AtomicU64,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
}

impl Player {
    pub fn new(
        opener: Arc<dyn StreamOpener>,
        backend: Arc<dyn OutputBackend>,
        config: PlaybackConfig,
    ) -> Self {
        let (events_tx, events_rx) = bounded(EVENT_QUEUE_CAPACITY);
        Self {
            opener,
            backend,
            config,
            lifecycle: Mutex::new(()),
            active: Arc::new(Mutex::new(None)),
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
            events_tx,
            events_rx,
        }
    }

    /// HTTP streams played on the default output device
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(HttpOpener::new(&config.network)),
            Arc::new(CpalBackend::new()),
            config.playback.clone(),
        )
    }

    /// Stop whatever is playing, then start `station`.
    ///
    /// Returns once the new session is running; connecting happens on the
    /// session thread.
    pub fn start_playback(&self, station: Station) -> Result<CompletionSignal> {
        let _lifecycle = self.lifecycle.lock();

        let previous = self.active.lock().take();
        if let Some(previous) = previous {
            tracing::info!("Stopping session {} before switching", previous.id);
            previous.shutdown();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(SessionShared::new(PlaybackState::new(
            self.config.volume_step,
            self.config.initial_volume_steps,
        )));
        *self.current.lock() = Some(shared.clone());

        let (command_tx, command_rx) = bounded(COMMAND_CHANNEL_CAPACITY);
        let (released_tx, released_rx) = bounded::<()>(0);
        let (completion_tx, completion_rx) = bounded(1);

        let session = PlaybackSession::new(
            id,
            station,
            SessionContext {
                opener: self.opener.clone(),
                backend: self.backend.clone(),
                config: self.config.clone(),
            },
            shared.clone(),
            command_rx,
            self.events_tx.clone(),
        );
        let handle = thread::Builder::new()
            .name(format!("session-{}", id))
            .spawn(move || session.run())?;

        *self.active.lock() = Some(ActiveSession {
            id,
            commands: command_tx,
            released: released_rx,
        });

        let monitor = Monitor {
            id,
            session: handle,
            shared,
            slot: self.active.clone(),
            released: released_tx,
            completion: completion_tx,
        };
        if let Err(e) = monitor.spawn() {
            // closing the command channel ends the unmonitored session
            self.active.lock().take();
            return Err(e.into());
        }

        Ok(CompletionSignal {
            session_id: id,
            outcome: completion_rx,
        })
    }

    /// Deliver `command` to the active session without blocking.
    ///
    /// `Stop` with nothing playing succeeds and does nothing.
    pub fn send_command(&self, command: Command) -> std::result::Result<(), ControlError> {
        if self.lifecycle.is_locked() {
            return Err(ControlError::SessionBusy);
        }

        let active = self.active.lock();
        let Some(session) = active.as_ref() else {
            return match command {
                Command::Stop => Ok(()),
                _ => Err(ControlError::NoActiveSession),
            };
        };

        match session.commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ControlError::SessionBusy),
            // session is on its way out
            Err(TrySendError::Disconnected(_)) => match command {
                Command::Stop => Ok(()),
                _ => Err(ControlError::NoActiveSession),
            },
        }
    }

    /// Stop the active session and wait until its resources are released
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();
        let active = self.active.lock().take();
        if let Some(active) = active {
            let id = active.id;
            active.shutdown();
            tracing::info!("Session {} stopped by player", id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// State of the current or most recent session
    pub fn snapshot(&self) -> PlaybackSnapshot {
        match self.current.lock().as_ref() {
            Some(shared) => shared.snapshot(),
            None => PlaybackSnapshot::idle(),
        }
    }

    /// Session notifications, shared by every receiver clone
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events_rx.clone()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}
