//! Session lifecycle monitor
//!
//! Joins a finished session thread, frees the player's active slot and
//! publishes the outcome.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::control::player::ActiveSession;
use crate::control::SessionOutcome;
use crate::error::Error;
use crate::session::{PlayerState, SessionShared};

pub(crate) struct Monitor {
    pub id: u64,
    pub session: JoinHandle<SessionOutcome>,
    pub shared: Arc<SessionShared>,
    pub slot: Arc<Mutex<Option<ActiveSession>>>,
    /// Dropped once the session thread is joined
    pub released: Sender<()>,
    pub completion: Sender<SessionOutcome>,
}

impl Monitor {
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("session-monitor-{}", self.id))
            .spawn(move || self.run())
    }

    fn run(self) {
        let Monitor {
            id,
            session,
            shared,
            slot,
            released,
            completion,
        } = self;

        let outcome = session.join().unwrap_or_else(|_| {
            tracing::error!("Session {} panicked", id);
            let mut state = shared.lock();
            state.last_error = Some("session thread panicked".to_string());
            state.set_state(PlayerState::Error);
            SessionOutcome::Failed(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "session thread panicked",
            )))
        });

        // everything the session held is released by now
        drop(released);

        {
            let mut active = slot.lock();
            if active.as_ref().map(|a| a.id) == Some(id) {
                active.take();
            }
        }

        match &outcome {
            SessionOutcome::Stopped => tracing::debug!("Session {} ended: stopped", id),
            SessionOutcome::Finished => tracing::info!("Session {} ended: stream finished", id),
            SessionOutcome::Failed(e) => tracing::warn!("Session {} ended with error: {}", id, e),
        }
        let _ = completion.send(outcome);
    }
}
