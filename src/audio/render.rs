//! Render engine
//!
//! Owns the output device for the lifetime of one playback session. Sample
//! blocks are pulled from a callback on the audio subsystem's real-time
//! thread; the callback must never block.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{StreamConfig, SupportedStreamConfig, SupportedStreamConfigRange};
use crossbeam_channel::{bounded, never, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::device::{default_output_device, DeviceLease, DeviceSlot};
use crate::codec::SampleFormat;
use crate::error::AudioError;

/// Callback filling one interleaved f32 block for the device
pub type PullCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Faults queued by the audio subsystem before anyone reads them
const DEVICE_ERROR_CAPACITY: usize = 16;

/// A platform output stream, already built and paused
pub trait DeviceStream: Send {
    /// Enable callback delivery
    fn play(&mut self) -> Result<(), AudioError>;

    /// Disable callback delivery
    fn pause(&mut self) -> Result<(), AudioError>;

    /// Faults the audio subsystem reported after the stream was built.
    ///
    /// The channel disconnects when the stream is gone.
    fn errors(&self) -> Receiver<AudioError>;

    /// Tear down the stream. Returns after any in-flight callback finished.
    fn close(self: Box<Self>);
}

/// Something that can build output streams
pub trait OutputBackend: Send + Sync {
    /// The ownership slot of the device this backend drives
    fn slot(&self) -> &DeviceSlot;

    /// Format the device runs at when asked to play `source`
    fn negotiate(&self, source: SampleFormat) -> Result<SampleFormat, AudioError>;

    /// Build a paused stream delivering `format` through `pull`
    fn build(
        &self,
        format: SampleFormat,
        pull: PullCallback,
    ) -> Result<Box<dyn DeviceStream>, AudioError>;
}

/// Entry point for opening render handles
pub struct RenderEngine;

impl RenderEngine {
    /// Claim the backend's device and build a stream for a source decoded
    /// as `source`.
    ///
    /// The device may run at another rate or channel count; `format` on the
    /// returned handle says which. The handle is stopped; call `start` to
    /// begin callback delivery.
    pub fn open(
        backend: &dyn OutputBackend,
        source: SampleFormat,
        pull: PullCallback,
    ) -> Result<RenderHandle, AudioError> {
        let lease = backend.slot().acquire()?;
        let format = backend.negotiate(source)?;
        let stream = backend.build(format, pull)?;

        if format == source {
            tracing::info!(
                "Output opened: {} Hz, {} channels",
                format.sample_rate,
                format.channels
            );
        } else {
            tracing::info!(
                "Output opened: {} Hz, {} channels (stream is {} Hz, {} channels)",
                format.sample_rate,
                format.channels,
                source.sample_rate,
                source.channels
            );
        }

        Ok(RenderHandle {
            stream: Some(stream),
            lease: Some(lease),
            format,
            running: false,
        })
    }
}

/// Exclusive handle on an open output stream. Closed on drop.
pub struct RenderHandle {
    stream: Option<Box<dyn DeviceStream>>,
    lease: Option<DeviceLease>,
    format: SampleFormat,
    running: bool,
}

impl RenderHandle {
    /// Start hardware callback delivery
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running {
            return Ok(());
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| AudioError::StreamError("render handle is closed".to_string()))?;
        stream.play()?;
        self.running = true;
        Ok(())
    }

    /// Stop hardware callback delivery. Idempotent.
    pub fn stop(&mut self) -> Result<(), AudioError> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        match self.stream.as_mut() {
            Some(stream) => stream.pause(),
            None => Ok(()),
        }
    }

    /// Release the stream and then the device
    pub fn close(mut self) {
        self.release();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Format the device was opened at
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Faults reported by the device while the handle is open
    pub fn errors(&self) -> Receiver<AudioError> {
        match &self.stream {
            Some(stream) => stream.errors(),
            None => never(),
        }
    }

    fn release(&mut self) {
        self.running = false;
        if let Some(stream) = self.stream.take() {
            stream.close();
            tracing::info!("Output closed");
        }
        self.lease.take();
    }
}

impl Drop for RenderHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Output backend driving the system default device through cpal
pub struct CpalBackend {
    slot: DeviceSlot,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            slot: DeviceSlot::system(),
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

enum DeviceCommand {
    Play(Sender<Result<(), AudioError>>),
    Pause(Sender<Result<(), AudioError>>),
    Close,
}

/// Rank a sample encoding; None for encodings we do not write
fn sample_format_penalty(format: cpal::SampleFormat) -> Option<u64> {
    match format {
        cpal::SampleFormat::F32 => Some(0),
        cpal::SampleFormat::I16 => Some(20),
        cpal::SampleFormat::U16 => Some(30),
        _ => None,
    }
}

/// Closest supported config to `wanted`: channel count first, then rate,
/// then sample encoding.
pub(crate) fn choose_stream_config(
    ranges: &[SupportedStreamConfigRange],
    wanted: SampleFormat,
) -> Option<SupportedStreamConfig> {
    let mut best: Option<(u64, SupportedStreamConfig)> = None;
    for range in ranges {
        let Some(format_penalty) = sample_format_penalty(range.sample_format()) else {
            continue;
        };
        let (min, max) = (range.min_sample_rate().0, range.max_sample_rate().0);
        if min > max {
            continue;
        }
        let rate = wanted.sample_rate.clamp(min, max);
        let candidate = range.clone().with_sample_rate(cpal::SampleRate(rate));
        let score = u64::from(candidate.channels().abs_diff(wanted.channels)) * 1_000_000
            + u64::from(rate.abs_diff(wanted.sample_rate)) * 10
            + format_penalty;
        match &best {
            Some((best_score, _)) if *best_score <= score => {}
            _ => best = Some((score, candidate)),
        }
    }
    best.map(|(_, candidate)| candidate)
}

/// Stream config and sample encoding the device will run for `wanted`
fn device_config(
    device: &cpal::Device,
    wanted: SampleFormat,
) -> Result<(StreamConfig, cpal::SampleFormat), AudioError> {
    let ranges: Vec<SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map(|configs| configs.collect())
        .unwrap_or_else(|e| {
            tracing::warn!("Could not list output configs: {}", e);
            Vec::new()
        });

    let chosen = match choose_stream_config(&ranges, wanted) {
        Some(config) => config,
        None => device
            .default_output_config()
            .map_err(|e| AudioError::DeviceFailure(e.to_string()))?,
    };
    if sample_format_penalty(chosen.sample_format()).is_none() {
        return Err(AudioError::DeviceFailure(format!(
            "unsupported output sample format {:?}",
            chosen.sample_format()
        )));
    }

    let sample_format = chosen.sample_format();
    let config = StreamConfig {
        channels: chosen.channels(),
        sample_rate: chosen.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    Ok((config, sample_format))
}

fn quantize_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

fn quantize_u16(sample: f32) -> u16 {
    ((sample.clamp(-1.0, 1.0) * 0.5 + 0.5) * u16::MAX as f32).round() as u16
}

fn build_stream(
    device: &cpal::Device,
    format: SampleFormat,
    mut pull: PullCallback,
    errors: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError> {
    let (config, sample_format) = device_config(device, format)?;
    let on_error = move |err: cpal::StreamError| {
        let error = match err {
            cpal::StreamError::DeviceNotAvailable => {
                AudioError::DeviceFailure("output device is no longer available".to_string())
            }
            other => AudioError::StreamError(other.to_string()),
        };
        let _ = errors.try_send(error);
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| pull(data),
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    pull(&mut scratch);
                    for (out, sample) in data.iter_mut().zip(&scratch) {
                        *out = quantize_i16(*sample);
                    }
                },
                on_error,
                None,
            )
        }
        cpal::SampleFormat::U16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    pull(&mut scratch);
                    for (out, sample) in data.iter_mut().zip(&scratch) {
                        *out = quantize_u16(*sample);
                    }
                },
                on_error,
                None,
            )
        }
        other => {
            return Err(AudioError::DeviceFailure(format!(
                "unsupported output sample format {:?}",
                other
            )))
        }
    };
    stream.map_err(|e| AudioError::DeviceFailure(e.to_string()))
}

impl OutputBackend for CpalBackend {
    fn slot(&self) -> &DeviceSlot {
        &self.slot
    }

    fn negotiate(&self, source: SampleFormat) -> Result<SampleFormat, AudioError> {
        let device = default_output_device()?;
        let (config, sample_format) = device_config(&device, source)?;
        tracing::debug!(
            "Device format for {} Hz x{}: {} Hz x{} {:?}",
            source.sample_rate,
            source.channels,
            config.sample_rate.0,
            config.channels,
            sample_format
        );
        Ok(SampleFormat::new(config.sample_rate.0, config.channels))
    }

    fn build(
        &self,
        format: SampleFormat,
        pull: PullCallback,
    ) -> Result<Box<dyn DeviceStream>, AudioError> {
        let (init_tx, init_rx) = bounded::<Result<(), AudioError>>(1);
        let (cmd_tx, cmd_rx) = bounded::<DeviceCommand>(4);
        let (error_tx, error_rx) = bounded::<AudioError>(DEVICE_ERROR_CAPACITY);

        // cpal streams are not Send on every platform, so the stream lives
        // and dies on this thread.
        let handle = thread::Builder::new()
            .name("render-device".to_string())
            .spawn(move || {
                let stream = default_output_device()
                    .and_then(|device| build_stream(&device, format, pull, error_tx));

                let stream = match stream {
                    Ok(stream) => {
                        // Some hosts start streams on build.
                        let _ = stream.pause();
                        let _ = init_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };

                for cmd in cmd_rx.iter() {
                    match cmd {
                        DeviceCommand::Play(reply) => {
                            let _ = reply.send(
                                stream
                                    .play()
                                    .map_err(|e| AudioError::StreamError(e.to_string())),
                            );
                        }
                        DeviceCommand::Pause(reply) => {
                            let _ = reply.send(
                                stream
                                    .pause()
                                    .map_err(|e| AudioError::StreamError(e.to_string())),
                            );
                        }
                        DeviceCommand::Close => break,
                    }
                }
                // Stream is dropped here, waiting out any running callback
            })
            .map_err(|e| AudioError::DeviceFailure(e.to_string()))?;

        let init = init_rx.recv().unwrap_or_else(|_| {
            Err(AudioError::DeviceFailure(
                "render thread exited during init".to_string(),
            ))
        });
        if let Err(e) = init {
            let _ = handle.join();
            return Err(e);
        }

        Ok(Box::new(CpalStream {
            cmd_tx,
            error_rx,
            thread_handle: Some(handle),
        }))
    }
}

struct CpalStream {
    cmd_tx: Sender<DeviceCommand>,
    error_rx: Receiver<AudioError>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn request(
        &self,
        make: fn(Sender<Result<(), AudioError>>) -> DeviceCommand,
    ) -> Result<(), AudioError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.cmd_tx
            .send(make(reply_tx))
            .map_err(|_| AudioError::StreamError("render thread is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| AudioError::StreamError("render thread is gone".to_string()))?
    }
}

impl DeviceStream for CpalStream {
    fn play(&mut self) -> Result<(), AudioError> {
        self.request(DeviceCommand::Play)
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        self.request(DeviceCommand::Pause)
    }

    fn errors(&self) -> Receiver<AudioError> {
        self.error_rx.clone()
    }

    fn close(mut self: Box<Self>) {
        let _ = self.cmd_tx.send(DeviceCommand::Close);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Backend whose callback is driven by hand instead of by hardware.
///
/// Used for headless runs and tests: `tick` plays the part of the audio
/// subsystem and pulls one block through whatever stream is currently open.
#[derive(Default)]
pub struct ManualBackend {
    slot: DeviceSlot,
    /// Fixed device format; None runs at whatever the stream asks for
    device_format: Option<SampleFormat>,
    shared: Arc<ManualShared>,
}

#[derive(Default)]
struct ManualShared {
    stream: Mutex<Option<ManualSlotState>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    pauses: AtomicUsize,
    ticks: AtomicU64,
    next_id: AtomicU64,
}

struct ManualSlotState {
    id: u64,
    format: SampleFormat,
    pull: PullCallback,
    playing: bool,
    errors: Sender<AudioError>,
}

impl ManualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose device only runs at `format`
    pub fn with_device_format(format: SampleFormat) -> Self {
        Self {
            device_format: Some(format),
            ..Self::default()
        }
    }

    /// Pull one block of `frames` samples per channel from the open stream.
    ///
    /// Returns None when no stream is open or delivery is stopped.
    pub fn tick(&self, frames: usize) -> Option<Vec<f32>> {
        let mut guard = self.shared.stream.lock();
        let state = guard.as_mut().filter(|s| s.playing)?;
        let mut block = vec![0.0f32; frames * state.format.channels as usize];
        (state.pull)(&mut block);
        self.shared.ticks.fetch_add(1, Ordering::Relaxed);
        Some(block)
    }

    /// Report `error` on the open stream, as a failing device would.
    ///
    /// Returns false when no stream is open.
    pub fn fail(&self, error: AudioError) -> bool {
        match self.shared.stream.lock().as_ref() {
            Some(state) => state.errors.try_send(error).is_ok(),
            None => false,
        }
    }

    /// Format of the currently open stream
    pub fn format(&self) -> Option<SampleFormat> {
        self.shared.stream.lock().as_ref().map(|s| s.format)
    }

    pub fn is_playing(&self) -> bool {
        self.shared
            .stream
            .lock()
            .as_ref()
            .map(|s| s.playing)
            .unwrap_or(false)
    }

    /// Number of streams ever built
    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Number of streams closed
    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open streams seen
    pub fn max_active(&self) -> usize {
        self.shared.max_active.load(Ordering::SeqCst)
    }

    /// Number of pause requests delivered to streams
    pub fn pauses(&self) -> usize {
        self.shared.pauses.load(Ordering::SeqCst)
    }
}

impl OutputBackend for ManualBackend {
    fn slot(&self) -> &DeviceSlot {
        &self.slot
    }

    fn negotiate(&self, source: SampleFormat) -> Result<SampleFormat, AudioError> {
        Ok(self.device_format.unwrap_or(source))
    }

    fn build(
        &self,
        format: SampleFormat,
        pull: PullCallback,
    ) -> Result<Box<dyn DeviceStream>, AudioError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (error_tx, error_rx) = bounded(DEVICE_ERROR_CAPACITY);
        *self.shared.stream.lock() = Some(ManualSlotState {
            id,
            format,
            pull,
            playing: false,
            errors: error_tx,
        });

        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        let active = self.shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_active.fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(ManualStream {
            id,
            shared: self.shared.clone(),
            errors: error_rx,
        }))
    }
}

struct ManualStream {
    id: u64,
    shared: Arc<ManualShared>,
    errors: Receiver<AudioError>,
}

impl ManualStream {
    fn set_playing(&self, playing: bool) -> Result<(), AudioError> {
        match self.shared.stream.lock().as_mut() {
            Some(state) if state.id == self.id => {
                state.playing = playing;
                Ok(())
            }
            _ => Err(AudioError::StreamError("stream is closed".to_string())),
        }
    }
}

impl DeviceStream for ManualStream {
    fn play(&mut self) -> Result<(), AudioError> {
        self.set_playing(true)
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        self.shared.pauses.fetch_add(1, Ordering::SeqCst);
        self.set_playing(false)
    }

    fn errors(&self) -> Receiver<AudioError> {
        self.errors.clone()
    }

    fn close(self: Box<Self>) {
        let mut guard = self.shared.stream.lock();
        if guard.as_ref().map(|s| s.id) == Some(self.id) {
            guard.take();
        }
        drop(guard);
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::SupportedBufferSize;

    fn format() -> SampleFormat {
        SampleFormat {
            sample_rate: 44100,
            channels: 2,
        }
    }

    fn range(
        channels: u16,
        min: u32,
        max: u32,
        sample_format: cpal::SampleFormat,
    ) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            cpal::SampleRate(min),
            cpal::SampleRate(max),
            SupportedBufferSize::Unknown,
            sample_format,
        )
    }

    #[test]
    fn test_handle_start_stop_close() {
        let backend = ManualBackend::new();
        let mut handle =
            RenderEngine::open(&backend, format(), Box::new(|out| out.fill(0.5))).unwrap();

        assert!(backend.tick(4).is_none());
        handle.start().unwrap();
        assert_eq!(backend.tick(4).unwrap(), vec![0.5; 8]);

        handle.stop().unwrap();
        handle.stop().unwrap();
        assert!(backend.tick(4).is_none());
        assert_eq!(backend.pauses(), 1);

        handle.close();
        assert_eq!(backend.closed(), 1);
        assert!(!backend.slot().is_held());
    }

    #[test]
    fn test_second_open_is_refused() {
        let backend = ManualBackend::new();
        let first = RenderEngine::open(&backend, format(), Box::new(|_| {})).unwrap();

        let second = RenderEngine::open(&backend, format(), Box::new(|_| {}));
        assert!(matches!(second, Err(AudioError::DeviceFailure(_))));
        assert_eq!(backend.opened(), 1);

        drop(first);
        assert_eq!(backend.closed(), 1);
        assert!(RenderEngine::open(&backend, format(), Box::new(|_| {})).is_ok());
        assert_eq!(backend.max_active(), 1);
    }

    #[test]
    fn test_handle_reports_device_format() {
        let device = SampleFormat::new(48000, 2);
        let backend = ManualBackend::with_device_format(device);
        let handle =
            RenderEngine::open(&backend, SampleFormat::new(22050, 1), Box::new(|_| {})).unwrap();

        assert_eq!(handle.format(), device);
        assert_eq!(backend.format(), Some(device));
    }

    #[test]
    fn test_device_errors_reach_the_handle() {
        let backend = ManualBackend::new();
        assert!(!backend.fail(AudioError::DeviceFailure("unplugged".into())));

        let handle = RenderEngine::open(&backend, format(), Box::new(|_| {})).unwrap();
        let errors = handle.errors();
        assert!(errors.try_recv().is_err());

        assert!(backend.fail(AudioError::DeviceFailure("unplugged".into())));
        assert_eq!(
            errors.try_recv(),
            Ok(AudioError::DeviceFailure("unplugged".into()))
        );

        handle.close();
        assert!(errors.recv().is_err());
    }

    #[test]
    fn test_choose_config_prefers_exact_match() {
        let ranges = [
            range(2, 44100, 48000, cpal::SampleFormat::I16),
            range(2, 8000, 192000, cpal::SampleFormat::F32),
            range(1, 8000, 192000, cpal::SampleFormat::F32),
        ];
        let chosen = choose_stream_config(&ranges, SampleFormat::new(44100, 2)).unwrap();
        assert_eq!(chosen.channels(), 2);
        assert_eq!(chosen.sample_rate().0, 44100);
        assert_eq!(chosen.sample_format(), cpal::SampleFormat::F32);
    }

    #[test]
    fn test_choose_config_falls_back_to_nearest_rate() {
        // shared-mode device fixed at 48 kHz
        let ranges = [range(2, 48000, 48000, cpal::SampleFormat::F32)];
        let chosen = choose_stream_config(&ranges, SampleFormat::new(44100, 1)).unwrap();
        assert_eq!(chosen.sample_rate().0, 48000);
        assert_eq!(chosen.channels(), 2);
    }

    #[test]
    fn test_choose_config_takes_integer_devices() {
        let ranges = [
            range(2, 8000, 48000, cpal::SampleFormat::U16),
            range(2, 8000, 48000, cpal::SampleFormat::I16),
            range(2, 8000, 48000, cpal::SampleFormat::F64),
        ];
        let chosen = choose_stream_config(&ranges, format()).unwrap();
        assert_eq!(chosen.sample_format(), cpal::SampleFormat::I16);

        let only_f64 = [range(2, 8000, 48000, cpal::SampleFormat::F64)];
        assert!(choose_stream_config(&only_f64, format()).is_none());
    }

    #[test]
    fn test_quantize_covers_full_range() {
        assert_eq!(quantize_i16(1.0), i16::MAX);
        assert_eq!(quantize_i16(-2.0), -i16::MAX);
        assert_eq!(quantize_i16(0.0), 0);
        assert_eq!(quantize_u16(-1.0), 0);
        assert_eq!(quantize_u16(1.0), u16::MAX);
        assert_eq!(quantize_u16(0.0), u16::MAX / 2 + 1);
    }
}
