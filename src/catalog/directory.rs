//! Station directory client (radio-browser.info)

use serde::Deserialize;

use crate::catalog::Station;
use crate::config::{CatalogConfig, NetworkConfig};
use crate::error::CatalogError;

/// Source of the station catalog
pub trait StationDirectory: Send + Sync {
    fn fetch_stations(&self) -> Result<Vec<Station>, CatalogError>;
}

/// Entry as served by radio-browser; everything else in the record is ignored
#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
}

/// radio-browser.info "top clicked" list
pub struct RadioBrowser {
    agent: ureq::Agent,
    endpoint: String,
}

impl RadioBrowser {
    pub fn new(catalog: &CatalogConfig, network: &NetworkConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(network.connect_timeout())
            .timeout_read(network.read_timeout())
            .user_agent(&network.user_agent)
            .build();
        Self {
            agent,
            endpoint: format!(
                "{}/json/stations/topclick/{}",
                catalog.base_url.trim_end_matches('/'),
                catalog.limit
            ),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl StationDirectory for RadioBrowser {
    fn fetch_stations(&self) -> Result<Vec<Station>, CatalogError> {
        let response = self.agent.get(&self.endpoint).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => CatalogError::BadResponse(format!("HTTP status {}", code)),
            ureq::Error::Transport(t) => CatalogError::NetworkFailure(t.to_string()),
        })?;

        let body = response
            .into_string()
            .map_err(|e| CatalogError::NetworkFailure(e.to_string()))?;
        parse_stations(&body)
    }
}

/// Decode a directory JSON array, keeping order and dropping entries
/// without a name or URL
pub fn parse_stations(body: &str) -> Result<Vec<Station>, CatalogError> {
    let entries: Vec<DirectoryEntry> =
        serde_json::from_str(body).map_err(|e| CatalogError::BadResponse(e.to_string()))?;

    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let name = entry.name.trim();
            let url = entry.url.trim();
            if name.is_empty() || url.is_empty() {
                None
            } else {
                Some(Station::new(name, url))
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_order_and_ignores_extra_fields() {
        let body = r#"[
            {"name": "Jazz", "url": "http://a", "codec": "MP3", "bitrate": 128},
            {"name": " Rock ", "url": "http://b", "votes": 12}
        ]"#;
        let stations = parse_stations(body).unwrap();
        assert_eq!(
            stations,
            vec![Station::new("Jazz", "http://a"), Station::new("Rock", "http://b")]
        );
    }

    #[test]
    fn test_parse_drops_incomplete_entries() {
        let body = r#"[{"name": "", "url": "http://a"}, {"name": "NoUrl"}, {"name": "Ok", "url": "http://c"}]"#;
        let stations = parse_stations(body).unwrap();
        assert_eq!(stations, vec![Station::new("Ok", "http://c")]);
    }

    #[test]
    fn test_parse_rejects_non_array() {
        assert!(matches!(
            parse_stations("<html>oops</html>"),
            Err(CatalogError::BadResponse(_))
        ));
    }

    #[test]
    fn test_endpoint_from_config() {
        let catalog = CatalogConfig {
            base_url: "https://example.org/".to_string(),
            limit: 5,
            ..Default::default()
        };
        let directory = RadioBrowser::new(&catalog, &NetworkConfig::default());
        assert_eq!(directory.endpoint(), "https://example.org/json/stations/topclick/5");
    }
}
