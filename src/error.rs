//! Error types for the radio player

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Favorites error: {0}")]
    Favorites(#[from] FavoritesError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio output errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Device failure: {0}")]
    DeviceFailure(String),

    #[error("Failed to run stream: {0}")]
    StreamError(String),
}

/// Format detection and decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unsupported format: no decoder accepted the stream")]
    UnsupportedFormat,

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Source read failed: {0}")]
    SourceFailed(String),
}

/// Stream transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Invalid playlist: {0}")]
    InvalidPlaylist(String),
}

/// Command delivery errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    #[error("No active session")]
    NoActiveSession,

    #[error("Session is not ready for commands")]
    SessionBusy,
}

/// Station directory errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Bad response: {0}")]
    BadResponse(String),
}

/// Favorites persistence errors
#[derive(Error, Debug)]
pub enum FavoritesError {
    #[error("Favorites file not found")]
    NotFound,

    #[error("Failed to parse favorites: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Favorites IO failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl Error {
    /// True when the failure came from the network side rather than the stream contents
    pub fn is_network_failure(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Catalog(CatalogError::NetworkFailure(_)))
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
