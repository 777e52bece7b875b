//! HTTP stream opener

use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::codec::ByteSource;
use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::network::playlist::PlaylistKind;
use crate::network::StreamOpener;

/// How many playlist hops we follow before giving up
const MAX_PLAYLIST_DEPTH: usize = 3;

/// Largest playlist body we read
const MAX_PLAYLIST_BYTES: u64 = 64 * 1024;

/// Opens station streams with a plain HTTP GET
pub struct HttpOpener {
    agent: ureq::Agent,
}

impl HttpOpener {
    pub fn new(config: &NetworkConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout())
            .timeout_read(config.read_timeout())
            .user_agent(&config.user_agent)
            .build();
        Self { agent }
    }

    fn open_depth(&self, url: &str, depth: usize) -> Result<ByteSource, NetworkError> {
        tracing::debug!("GET {}", url);
        let response = self.agent.get(url).call().map_err(classify_ureq_failure)?;

        if let Some(kind) = PlaylistKind::detect(url, response.content_type()) {
            if depth >= MAX_PLAYLIST_DEPTH {
                return Err(NetworkError::InvalidPlaylist(format!(
                    "{}: nested too deeply",
                    url
                )));
            }
            let mut body = String::new();
            response
                .into_reader()
                .take(MAX_PLAYLIST_BYTES)
                .read_to_string(&mut body)
                .map_err(|e| NetworkError::ReadFailed(e.to_string()))?;

            let next = kind
                .first_stream_url(&body)
                .ok_or_else(|| NetworkError::InvalidPlaylist(format!("{}: no stream entries", url)))?;
            tracing::info!("Playlist {} resolved to {}", url, next);
            return self.open_depth(&next, depth + 1);
        }

        Ok(response.into_reader())
    }
}

impl Default for HttpOpener {
    fn default() -> Self {
        Self::new(&NetworkConfig::default())
    }
}

impl StreamOpener for HttpOpener {
    fn open(&self, url: &str) -> Result<ByteSource, NetworkError> {
        self.open_depth(url, 0)
    }
}

/// Map a ureq failure onto our network taxonomy
pub fn classify_ureq_failure(error: ureq::Error) -> NetworkError {
    match error {
        ureq::Error::Status(code, _) => NetworkError::Status(code),
        ureq::Error::Transport(transport) => NetworkError::ConnectionFailed(transport.to_string()),
    }
}

/// Serves registered byte buffers by URL. Unknown URLs answer 404.
///
/// Used for offline playback of local captures and for tests.
#[derive(Clone, Default)]
pub struct MemoryOpener {
    streams: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `bytes` under `url`, replacing any previous entry
    pub fn insert(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.streams.write().insert(url.into(), Arc::new(bytes));
    }

    pub fn with(self, url: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(url, bytes);
        self
    }
}

impl StreamOpener for MemoryOpener {
    fn open(&self, url: &str) -> Result<ByteSource, NetworkError> {
        let bytes = self
            .streams
            .read()
            .get(url)
            .cloned()
            .ok_or(NetworkError::Status(404))?;
        Ok(Box::new(Cursor::new(SharedBytes(bytes))))
    }
}

struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_opener_serves_registered_bytes() {
        let opener = MemoryOpener::new().with("http://a", b"abc".to_vec());

        let mut out = Vec::new();
        opener.open("http://a").unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");

        // every open starts from the beginning
        let mut again = Vec::new();
        opener.open("http://a").unwrap().read_to_end(&mut again).unwrap();
        assert_eq!(again, b"abc");
    }

    #[test]
    fn test_memory_opener_unknown_url() {
        let opener = MemoryOpener::new();
        assert_eq!(opener.open("http://nope").err(), Some(NetworkError::Status(404)));
    }
}
