//! Station catalog
//!
//! The in-memory list of stations offered to the user, refreshed from a
//! station directory and swapped atomically. Favorites are kept alongside.

pub mod directory;
pub mod favorites;

pub use directory::{RadioBrowser, StationDirectory};
pub use favorites::FavoritesStore;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::CatalogError;

/// A named remote audio stream endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    pub url: String,
}

impl Station {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Ordered station list, replaced wholesale on refresh
#[derive(Default)]
pub struct Catalog {
    stations: RwLock<Arc<Vec<Station>>>,
}

impl Catalog {
    pub fn new(stations: Vec<Station>) -> Self {
        Self {
            stations: RwLock::new(Arc::new(stations)),
        }
    }

    /// Current list. Cheap; the returned snapshot never changes.
    pub fn stations(&self) -> Arc<Vec<Station>> {
        self.stations.read().clone()
    }

    pub fn len(&self) -> usize {
        self.stations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.read().is_empty()
    }

    /// Station by its 1-based number, as listed to the user
    pub fn select(&self, number: usize) -> Option<Station> {
        number
            .checked_sub(1)
            .and_then(|index| self.stations.read().get(index).cloned())
    }

    /// Replace the list
    pub fn replace(&self, stations: Vec<Station>) {
        *self.stations.write() = Arc::new(stations);
    }

    /// Fetch from `directory` and swap the list in on success.
    ///
    /// On failure the previous list stays in place.
    pub fn refresh(&self, directory: &dyn StationDirectory) -> Result<usize, CatalogError> {
        match directory.fetch_stations() {
            Ok(stations) => {
                let count = stations.len();
                self.replace(stations);
                tracing::info!("Catalog refreshed: {} stations", count);
                Ok(count)
            }
            Err(e) => {
                tracing::warn!("Catalog refresh failed, keeping {} stations: {}", self.len(), e);
                Err(e)
            }
        }
    }

    /// Refresh every `interval` on the tokio runtime.
    ///
    /// The first refresh happens after one interval; callers load the
    /// initial list themselves. The blocking fetch runs on the blocking pool.
    pub fn spawn_refresh(
        self: Arc<Self>,
        directory: Arc<dyn StationDirectory>,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval fires immediately; skip that one
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let catalog = self.clone();
                let directory = directory.clone();
                let result =
                    tokio::task::spawn_blocking(move || catalog.refresh(directory.as_ref())).await;
                if let Err(e) = result {
                    tracing::error!("Catalog refresh task failed: {}", e);
                }
            }
        })
    }
}
