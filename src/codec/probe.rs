//! Rewindable prefix over a forward-only byte source
//!
//! Network streams cannot seek backwards, but every decoder attempt has to
//! start reading at offset 0. `ProbeBuffer` records the prefix as it is
//! read; each `ProbeCursor` replays the recording before pulling new bytes.
//! After `commit`, the winning cursor reads straight through to the source.

use parking_lot::Mutex;
use std::io::{self, Read};
use std::sync::Arc;

/// Forward-only byte source (an HTTP body, a file, a test cursor)
pub type ByteSource = Box<dyn Read + Send + Sync>;

const FILL_CHUNK: usize = 16 * 1024;

struct ProbeState {
    source: ByteSource,
    recorded: Vec<u8>,
    limit: usize,
    committed: bool,
    eof: bool,
    failure: Option<String>,
}

impl ProbeState {
    /// Read more of the source into the recording. Returns bytes added.
    fn fill(&mut self) -> io::Result<usize> {
        if let Some(failure) = &self.failure {
            return Err(io::Error::new(io::ErrorKind::Other, failure.clone()));
        }
        if self.eof {
            return Ok(0);
        }
        if self.recorded.len() >= self.limit {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "probe window exhausted",
            ));
        }

        let want = (self.limit - self.recorded.len()).min(FILL_CHUNK);
        let mut chunk = vec![0u8; want];
        loop {
            match self.source.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(0);
                }
                Ok(n) => {
                    self.recorded.extend_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.failure = Some(e.to_string());
                    return Err(e);
                }
            }
        }
    }
}

/// Shared recording of the stream prefix
#[derive(Clone)]
pub struct ProbeBuffer {
    state: Arc<Mutex<ProbeState>>,
}

impl ProbeBuffer {
    /// Wrap `source`, recording at most `limit` bytes while probing
    pub fn new(source: ByteSource, limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProbeState {
                source,
                recorded: Vec::new(),
                limit: limit.max(1),
                committed: false,
                eof: false,
                failure: None,
            })),
        }
    }

    /// A reader positioned at offset 0 of the stream
    pub fn cursor(&self) -> ProbeCursor {
        ProbeCursor {
            state: self.state.clone(),
            pos: 0,
        }
    }

    /// First `len` bytes of the stream (fewer if it is shorter)
    pub fn peek(&self, len: usize) -> io::Result<Vec<u8>> {
        let mut prefix = Vec::with_capacity(len);
        self.cursor().take(len as u64).read_to_end(&mut prefix)?;
        Ok(prefix)
    }

    /// Stop recording; reads past the prefix go straight to the source
    pub fn commit(&self) {
        self.state.lock().committed = true;
    }

    /// Bytes recorded so far
    pub fn recorded_len(&self) -> usize {
        self.state.lock().recorded.len()
    }

    /// The source's own read error, if one happened. Distinct from
    /// attempts running out of probe window.
    pub fn source_failure(&self) -> Option<String> {
        self.state.lock().failure.clone()
    }
}

/// Independent read position over a `ProbeBuffer`
pub struct ProbeCursor {
    state: Arc<Mutex<ProbeState>>,
    pos: usize,
}

impl Read for ProbeCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();

        if self.pos >= state.recorded.len() && state.committed {
            let n = state.source.read(buf)?;
            self.pos += n;
            return Ok(n);
        }

        while self.pos >= state.recorded.len() {
            if state.fill()? == 0 {
                return Ok(0);
            }
        }

        let available = &state.recorded[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}
