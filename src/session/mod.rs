//! Playback session
//!
//! One session plays one station: it connects, detects the format, binds
//! the render engine, and then applies user commands until it is stopped,
//! the stream ends, or something fails. Everything it acquired is released
//! before `run` returns.

mod mixer;
mod pump;
pub mod state;

pub use state::{PlaybackSnapshot, PlaybackState, PlayerState, Transition};

use crossbeam_channel::{never, select, Receiver, Sender};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::audio::buffer::{create_shared_buffer, SharedRingBuffer};
use crate::audio::convert::FormatConverter;
use crate::audio::render::{OutputBackend, RenderEngine, RenderHandle};
use crate::catalog::Station;
use crate::codec::Sniffer;
use crate::config::PlaybackConfig;
use crate::control::{Command, PlayerEvent, SessionOutcome};
use crate::error::{AudioError, Error};
use crate::network::StreamOpener;

use mixer::Mixer;
use pump::{DecodePump, PumpEvent};

/// How often the command loop re-checks drain progress
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// State shared between the command loop, the render callback and readers
pub struct SessionShared {
    state: Mutex<PlaybackState>,
    /// f32 bits of the last block's peak
    level: AtomicU32,
    underruns: AtomicU64,
    block_pending: AtomicBool,
}

impl SessionShared {
    pub fn new(state: PlaybackState) -> Self {
        Self {
            state: Mutex::new(state),
            level: AtomicU32::new(0f32.to_bits()),
            underruns: AtomicU64::new(0),
            block_pending: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let state = self.state.lock();
        PlaybackSnapshot::from_state(
            &state,
            f32::from_bits(self.level.load(Ordering::Relaxed)),
            self.underruns.load(Ordering::Relaxed),
        )
    }

    pub fn player_state(&self) -> PlayerState {
        self.state.lock().state
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock()
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, PlaybackState>> {
        self.state.try_lock()
    }

    fn store_level(&self, level: f32) {
        self.level.store(level.to_bits(), Ordering::Relaxed);
    }

    fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    fn set_block_pending(&self, pending: bool) {
        self.block_pending.store(pending, Ordering::Relaxed);
    }

    fn block_pending(&self) -> bool {
        self.block_pending.load(Ordering::Relaxed)
    }
}

/// What a session needs from the outside world
#[derive(Clone)]
pub struct SessionContext {
    pub opener: Arc<dyn StreamOpener>,
    pub backend: Arc<dyn OutputBackend>,
    pub config: PlaybackConfig,
}

/// Resources held while the device is bound
struct Bound {
    render: RenderHandle,
    pump: DecodePump,
    ring: SharedRingBuffer,
}

pub struct PlaybackSession {
    id: u64,
    station: Station,
    context: SessionContext,
    shared: Arc<SessionShared>,
    commands: Receiver<Command>,
    events: Sender<PlayerEvent>,
}

impl PlaybackSession {
    pub fn new(
        id: u64,
        station: Station,
        context: SessionContext,
        shared: Arc<SessionShared>,
        commands: Receiver<Command>,
        events: Sender<PlayerEvent>,
    ) -> Self {
        Self {
            id,
            station,
            context,
            shared,
            commands,
            events,
        }
    }

    /// Play until stopped, finished or failed
    pub fn run(self) -> SessionOutcome {
        self.shared.lock().station_name = Some(self.station.name.clone());
        self.transition(PlayerState::Connecting);
        info!("Session {} connecting to {} ({})", self.id, self.station.name, self.station.url);

        let bound = match self.connect() {
            Ok(bound) => bound,
            Err(e) => {
                self.record_failure(&e);
                return SessionOutcome::Failed(e);
            }
        };

        self.transition(PlayerState::Playing);
        let outcome = self.command_loop(&bound);
        self.teardown(bound, outcome)
    }

    fn connect(&self) -> Result<Bound, Error> {
        let config = &self.context.config;
        let source = self.context.opener.open(&self.station.url)?;
        let (stream, format) = Sniffer::new(config.probe_limit_bytes).detect(source)?;

        {
            let mut state = self.shared.lock();
            state.sample_rate = format.sample_rate;
            state.channels = format.channels;
        }
        self.emit(PlayerEvent::FormatDetected {
            station: self.station.clone(),
            codec: stream.codec(),
            format,
        });

        let ring = create_shared_buffer(config.ring_capacity);
        let mut mixer = Mixer::new(self.shared.clone(), ring.clone());
        let mut render = RenderEngine::open(
            self.context.backend.as_ref(),
            format,
            Box::new(move |out: &mut [f32]| mixer.render(out)),
        )?;

        let converter = FormatConverter::new(format, render.format(), config.block_frames)?;
        let pump = DecodePump::spawn(
            format!("decode-pump-{}", self.id),
            stream,
            converter,
            ring.clone(),
            config.block_frames,
        )?;

        // on failure the pump joins, then the handle closes the device
        render.start()?;

        Ok(Bound { render, pump, ring })
    }

    /// Apply commands in arrival order until the session has to end
    fn command_loop(&self, bound: &Bound) -> SessionOutcome {
        let pump_rx = bound.pump.events();
        let device_errors = bound.render.errors();
        let drained_rx = never();
        let mut stream_ended = false;

        loop {
            let pump_events = if stream_ended { &drained_rx } else { &pump_rx };
            select! {
                recv(self.commands) -> msg => match msg {
                    Ok(command) => {
                        if self.handle(command) {
                            return SessionOutcome::Stopped;
                        }
                    }
                    Err(_) => {
                        debug!("Session {} command channel closed", self.id);
                        return SessionOutcome::Stopped;
                    }
                },
                recv(pump_events) -> msg => match msg {
                    Ok(PumpEvent::Finished) | Err(_) => {
                        debug!("Session {} stream ended, draining", self.id);
                        stream_ended = true;
                    }
                    Ok(event) => {
                        if let Some(e) = event.into_error() {
                            return SessionOutcome::Failed(e);
                        }
                    }
                },
                recv(device_errors) -> msg => match msg {
                    Ok(AudioError::StreamError(e)) => {
                        warn!("Session {}: output stream reported: {}", self.id, e);
                    }
                    Ok(e) => return SessionOutcome::Failed(e.into()),
                    Err(_) => {
                        return SessionOutcome::Failed(
                            AudioError::DeviceFailure("output stream is gone".to_string()).into(),
                        )
                    }
                },
                default(DRAIN_POLL_INTERVAL) => {}
            }

            if stream_ended && bound.ring.is_empty() && !self.shared.block_pending() {
                info!("Session {} finished: {}", self.id, self.station.name);
                return SessionOutcome::Finished;
            }
        }
    }

    /// Returns true when the command ends the session
    fn handle(&self, command: Command) -> bool {
        let transition = self.shared.lock().apply(command);
        match transition {
            Transition::Unchanged => {
                debug!("Session {}: {:?} has no effect", self.id, command);
                false
            }
            Transition::State { from, to } => {
                info!("Session {}: {} -> {}", self.id, from.label(), to.label());
                self.emit(PlayerEvent::StateChanged {
                    station: self.station.clone(),
                    from,
                    to,
                });
                false
            }
            Transition::Volume { volume, gain } => {
                debug!("Session {}: volume {:+.2} (gain {:.3})", self.id, volume, gain);
                self.emit(PlayerEvent::VolumeChanged { volume, gain });
                false
            }
            Transition::Stop => true,
        }
    }

    /// Release in order: delivery, pump (decoder, then network), device
    fn teardown(&self, bound: Bound, outcome: SessionOutcome) -> SessionOutcome {
        let Bound {
            mut render, pump, ..
        } = bound;

        pump.signal_stop();
        if let Err(e) = render.stop() {
            warn!("Session {}: stopping output failed: {}", self.id, e);
        }
        pump.join();
        render.close();

        match &outcome {
            SessionOutcome::Failed(e) => self.record_failure(e),
            SessionOutcome::Stopped | SessionOutcome::Finished => {
                self.transition(PlayerState::Stopped);
                info!("Session {} stopped", self.id);
            }
        }
        outcome
    }

    fn record_failure(&self, e: &Error) {
        error!("Session {} failed on {}: {}", self.id, self.station.name, e);
        self.shared.lock().last_error = Some(e.to_string());
        self.transition(PlayerState::Error);
        self.emit(PlayerEvent::Error {
            station: self.station.clone(),
            message: e.to_string(),
        });
    }

    fn transition(&self, to: PlayerState) {
        let transition = self.shared.lock().set_state(to);
        if let Transition::State { from, to } = transition {
            debug!("Session {}: {} -> {}", self.id, from.label(), to.label());
            self.emit(PlayerEvent::StateChanged {
                station: self.station.clone(),
                from,
                to,
            });
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // full or unobserved event queues never hold up playback
        let _ = self.events.try_send(event);
    }
}
