//! Decode pump
//!
//! Moves decoded blocks from a `DecodedStream` into the ring buffer on its
//! own thread, converted to the device format on the way. When the ring is
//! full the pump waits, so a paused render callback holds the stream
//! position instead of dropping audio.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{AudioFrame, SharedRingBuffer};
use crate::audio::convert::FormatConverter;
use crate::codec::{DecodedStream, SampleFormat};
use crate::error::{AudioError, CodecError, Error, NetworkError};

/// Back-off while the ring buffer is full
const PUSH_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// How the pump ended, when it ended on its own
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PumpEvent {
    /// Every decoded block is in the ring
    Finished,
    /// Hard decode failure
    Failed(CodecError),
    /// The network source broke off mid-stream
    SourceLost(NetworkError),
    /// Conversion to the device format failed
    OutputFailed(AudioError),
}

impl PumpEvent {
    /// The session failure this event stands for, if any
    pub fn into_error(self) -> Option<Error> {
        match self {
            PumpEvent::Finished => None,
            PumpEvent::Failed(e) => Some(e.into()),
            PumpEvent::SourceLost(e) => Some(e.into()),
            PumpEvent::OutputFailed(e) => Some(e.into()),
        }
    }
}

impl From<CodecError> for PumpEvent {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::SourceFailed(msg) => PumpEvent::SourceLost(NetworkError::ReadFailed(msg)),
            other => PumpEvent::Failed(other),
        }
    }
}

/// Handle on a running decode pump. Stopped and joined on drop.
pub(crate) struct DecodePump {
    stop: Arc<AtomicBool>,
    events: Receiver<PumpEvent>,
    thread_handle: Option<JoinHandle<()>>,
}

impl DecodePump {
    pub fn spawn(
        name: String,
        stream: DecodedStream,
        converter: FormatConverter,
        ring: SharedRingBuffer,
        block_frames: usize,
    ) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = unbounded();

        let stop_flag = stop.clone();
        let handle = thread::Builder::new().name(name).spawn(move || {
            let pump = Pump {
                ring,
                stop: stop_flag,
                block_samples: block_frames.max(1) * converter.target().channels.max(1) as usize,
                channels: converter.target().channels,
                sequence: 0,
            };
            if let Some(event) = pump.run(stream, converter) {
                let _ = event_tx.send(event);
            }
        })?;

        Ok(Self {
            stop,
            events: event_rx,
            thread_handle: Some(handle),
        })
    }

    pub fn events(&self) -> Receiver<PumpEvent> {
        self.events.clone()
    }

    /// Ask the pump to exit at its next check
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop and wait. The stream, and with it the network source, is
    /// released by the time this returns.
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Decode pump panicked");
            }
        }
    }
}

impl Drop for DecodePump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Pump {
    ring: SharedRingBuffer,
    stop: Arc<AtomicBool>,
    block_samples: usize,
    channels: u16,
    sequence: u32,
}

/// Stop was requested while pushing
struct Stopped;

impl Pump {
    /// Returns the event to report, None when stopped from outside
    fn run(mut self, mut stream: DecodedStream, mut converter: FormatConverter) -> Option<PumpEvent> {
        let format: SampleFormat = stream.format();

        while let Some(block) = stream.next() {
            if self.stopped() {
                return None;
            }

            let samples = match block {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::error!("Decode pump failed: {}", e);
                    return Some(e.into());
                }
            };

            if stream.format() != format {
                return Some(PumpEvent::Failed(CodecError::DecodingFailed(format!(
                    "sample format changed mid-stream to {} Hz, {} channels",
                    stream.format().sample_rate,
                    stream.format().channels
                ))));
            }

            let converted = match converter.process(samples) {
                Ok(converted) => converted,
                Err(e) => return Some(PumpEvent::OutputFailed(e)),
            };
            if self.push_all(&converted).is_err() {
                return None;
            }
        }

        match converter.flush() {
            Ok(tail) => {
                if self.push_all(&tail).is_err() {
                    return None;
                }
            }
            Err(e) => return Some(PumpEvent::OutputFailed(e)),
        }

        tracing::debug!(
            "Decode pump reached end of stream ({} packets, {} skipped)",
            stream.packets_decoded(),
            stream.packets_skipped()
        );
        if self.stopped() {
            None
        } else {
            Some(PumpEvent::Finished)
        }
    }

    fn push_all(&mut self, samples: &[f32]) -> Result<(), Stopped> {
        for chunk in samples.chunks(self.block_samples) {
            let mut samples = self.ring.take_spent().unwrap_or_default();
            samples.extend_from_slice(chunk);
            let mut frame = AudioFrame::new(samples, self.channels, self.sequence);
            self.sequence = self.sequence.wrapping_add(1);

            loop {
                match self.ring.push(frame) {
                    Ok(()) => break,
                    Err(rejected) => {
                        if self.stopped() {
                            return Err(Stopped);
                        }
                        frame = rejected;
                        thread::sleep(PUSH_RETRY_INTERVAL);
                    }
                }
            }
        }
        Ok(())
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}
