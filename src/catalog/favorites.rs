//! Favorites persisted as a JSON array of `{name, url}`

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::catalog::Station;
use crate::error::FavoritesError;

/// File-backed ordered favorites list
#[derive(Debug, Clone)]
pub struct FavoritesStore {
    path: PathBuf,
}

impl FavoritesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<Station>, FavoritesError> {
        let contents = fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => FavoritesError::NotFound,
            _ => FavoritesError::Io(e),
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Load, or an empty list if the file is missing or unreadable
    pub fn load_or_default(&self) -> Vec<Station> {
        match self.load() {
            Ok(stations) => stations,
            Err(FavoritesError::NotFound) => Vec::new(),
            Err(e) => {
                tracing::warn!("Ignoring favorites at {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    pub fn save(&self, stations: &[Station]) -> Result<(), FavoritesError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(stations)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    /// Append `station` unless it is already present. Returns whether it was added.
    pub fn add(&self, station: Station) -> Result<bool, FavoritesError> {
        let mut stations = self.load_or_default();
        if stations.contains(&station) {
            return Ok(false);
        }
        stations.push(station);
        self.save(&stations)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> FavoritesStore {
        let dir = std::env::temp_dir().join(format!(
            "radio-tuner-favorites-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        FavoritesStore::new(dir.join("favorites.json"))
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let store = temp_store("missing");
        assert!(matches!(store.load(), Err(FavoritesError::NotFound)));
        assert!(store.load_or_default().is_empty());
    }

    #[test]
    fn test_save_then_load_preserves_order() {
        let store = temp_store("order");
        let stations = vec![
            Station::new("Rock", "http://b"),
            Station::new("Jazz", "http://a"),
            Station::new("Rock", "http://b"),
        ];
        store.save(&stations).unwrap();
        assert_eq!(store.load().unwrap(), stations);

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.trim_start().starts_with('['));
        assert!(raw.contains("\"name\": \"Rock\""));
    }

    #[test]
    fn test_corrupt_file_falls_back_to_empty() {
        let store = temp_store("corrupt");
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{not json").unwrap();

        assert!(matches!(store.load(), Err(FavoritesError::Parse(_))));
        assert!(store.load_or_default().is_empty());
    }

    #[test]
    fn test_add_skips_duplicates() {
        let store = temp_store("add");
        assert!(store.add(Station::new("Jazz", "http://a")).unwrap());
        assert!(!store.add(Station::new("Jazz", "http://a")).unwrap());
        assert_eq!(store.load().unwrap().len(), 1);
    }
}
