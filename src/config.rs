//! Application configuration
//!
//! Loaded from `config.toml` in the platform config directory. Every field
//! has a default so a partial (or missing) file is fine.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub catalog: CatalogConfig,
    pub playback: PlaybackConfig,
    pub network: NetworkConfig,
    pub favorites: FavoritesConfig,
}

/// Station directory settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Base URL of the radio-browser mirror
    pub base_url: String,
    /// Number of stations to request
    pub limit: usize,
    /// Seconds between background refreshes
    pub refresh_interval_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DIRECTORY_URL.to_string(),
            limit: DEFAULT_STATION_LIMIT,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
        }
    }
}

impl CatalogConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

/// Playback pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Size of one VolumeUp/VolumeDown step on the log2 scale
    pub volume_step: f32,
    /// Initial volume, in steps from unity gain
    pub initial_volume_steps: i32,
    /// Ring buffer capacity in blocks
    pub ring_capacity: usize,
    /// Maximum stream prefix buffered while probing decoders
    pub probe_limit_bytes: usize,
    /// Samples per channel in one decoded block
    pub block_frames: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            volume_step: DEFAULT_VOLUME_STEP,
            initial_volume_steps: 0,
            ring_capacity: RING_BUFFER_CAPACITY,
            probe_limit_bytes: DEFAULT_PROBE_LIMIT_BYTES,
            block_frames: DEFAULT_BLOCK_FRAMES,
        }
    }
}

/// HTTP client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Favorites file location
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FavoritesConfig {
    /// Explicit path; defaults to `favorites.json` in the data directory
    pub path: Option<PathBuf>,
}

impl FavoritesConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.data_dir().join("favorites.json")))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "radio-tuner", "radio-tuner")
}

impl AppConfig {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Write to an explicit path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [playback]
            volume_step = 0.5

            [catalog]
            limit = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.playback.volume_step, 0.5);
        assert_eq!(config.playback.ring_capacity, RING_BUFFER_CAPACITY);
        assert_eq!(config.catalog.limit, 10);
        assert_eq!(config.catalog.base_url, DEFAULT_DIRECTORY_URL);
        assert_eq!(config.network, NetworkConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("radio-tuner-config-{}", std::process::id()))
            .join("config.toml");

        let mut config = AppConfig::default();
        config.catalog.refresh_interval_secs = 42;
        config.favorites.path = Some(PathBuf::from("/tmp/favs.json"));
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_refresh_interval_never_zero() {
        let config = CatalogConfig {
            refresh_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.refresh_interval(), Duration::from_secs(1));
    }
}
