//! Lock-free ring buffer for decoded audio
//!
//! Single-producer single-consumer hand-off between the decode pump and the
//! render callback. The pump pushes variable-sized decoded frames, the
//! callback drains them into fixed-size device blocks through a `BlockCursor`.
//! Sample buffers of consumed frames travel back to the pump for reuse, so
//! the callback side never frees memory.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Decoded audio frame containing interleaved samples
#[derive(Clone, Debug)]
pub struct AudioFrame {
    /// Interleaved audio samples (f32)
    pub samples: Vec<f32>,
    /// Number of channels
    pub channels: u16,
    /// Frame sequence number
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, sequence: u32) -> Self {
        Self {
            samples,
            channels,
            sequence,
        }
    }
}

/// Lock-free ring buffer for audio frames
pub struct RingBuffer {
    queue: ArrayQueue<AudioFrame>,
    /// Cleared sample buffers waiting to be refilled
    spent: ArrayQueue<Vec<f32>>,
    overflow_count: AtomicUsize,
}

impl RingBuffer {
    /// Create a new ring buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        // one more frame each for the cursor and the producer's hand
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            spent: ArrayQueue::new(capacity.max(1) + 2),
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame into the buffer.
    /// Hands the frame back if the buffer is full so the producer can retry.
    pub fn push(&self, frame: AudioFrame) -> Result<(), AudioFrame> {
        self.queue.push(frame).map_err(|frame| {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            frame
        })
    }

    /// Pop a frame from the buffer.
    /// Returns None if the buffer is empty; the caller counts underruns.
    pub fn pop(&self) -> Option<AudioFrame> {
        self.queue.pop()
    }

    /// Hand a consumed sample buffer back to the producer
    pub fn recycle(&self, mut samples: Vec<f32>) {
        samples.clear();
        let _ = self.spent.push(samples);
    }

    /// An empty buffer left over from a consumed frame, if one is waiting
    pub fn take_spent(&self) -> Option<Vec<f32>> {
        self.spent.pop()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Check if buffer is full
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Get current buffer length
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Get overflow count (pushes rejected because the buffer was full)
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}

/// Reads fixed-size blocks out of a stream of variable-sized frames.
///
/// Owned by the render callback; keeps the partially consumed frame between
/// callback ticks.
#[derive(Default)]
pub struct BlockCursor {
    current: Option<AudioFrame>,
    offset: usize,
}

impl BlockCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy up to `out.len()` samples from the ring into `out`.
    ///
    /// Returns the number of samples written. Anything short of `out.len()`
    /// is an underrun; the caller decides what to put in the remainder.
    pub fn fill(&mut self, ring: &RingBuffer, out: &mut [f32]) -> usize {
        let mut written = 0;
        while written < out.len() {
            if self.current.is_none() {
                match ring.pop() {
                    Some(frame) => {
                        self.current = Some(frame);
                        self.offset = 0;
                    }
                    None => break,
                }
            }
            let Some(frame) = self.current.as_ref() else {
                break;
            };

            let available = &frame.samples[self.offset..];
            let n = available.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&available[..n]);
            written += n;
            self.offset += n;

            if self.offset >= frame.samples.len() {
                if let Some(done) = self.current.take() {
                    ring.recycle(done.samples);
                }
                self.offset = 0;
            }
        }
        written
    }

    /// True when a partially consumed frame is still held
    pub fn has_pending(&self) -> bool {
        self.current.is_some()
    }
}
