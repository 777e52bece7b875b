//! Stream transport
//!
//! Opening a station URL yields a forward-only byte source. Playlist URLs
//! (`.m3u`, `.pls`) are followed to the first stream they list.

pub mod http;
pub mod playlist;

pub use http::{HttpOpener, MemoryOpener};
pub use playlist::PlaylistKind;

use crate::codec::ByteSource;
use crate::error::NetworkError;

/// Opens the byte stream behind a station URL
pub trait StreamOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<ByteSource, NetworkError>;
}
