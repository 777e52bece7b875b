//! M3U and PLS playlist parsing

/// Playlist flavours served by radio directories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    M3u,
    Pls,
}

impl PlaylistKind {
    /// Identify a playlist from its URL or response content type
    pub fn detect(url: &str, content_type: &str) -> Option<Self> {
        let content_type = content_type.to_ascii_lowercase();
        match content_type.split(';').next().unwrap_or("").trim() {
            "audio/x-mpegurl" | "audio/mpegurl" | "application/x-mpegurl" => {
                return Some(PlaylistKind::M3u)
            }
            "audio/x-scpls" | "application/pls+xml" => return Some(PlaylistKind::Pls),
            _ => {}
        }

        let path = url
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or(url)
            .to_ascii_lowercase();
        if path.ends_with(".m3u") || path.ends_with(".m3u8") {
            Some(PlaylistKind::M3u)
        } else if path.ends_with(".pls") {
            Some(PlaylistKind::Pls)
        } else {
            None
        }
    }

    /// First http(s) stream URL listed in `body`
    pub fn first_stream_url(&self, body: &str) -> Option<String> {
        let is_stream = |s: &str| s.starts_with("http://") || s.starts_with("https://");
        match self {
            PlaylistKind::M3u => body
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .find(|line| is_stream(line))
                .map(str::to_string),
            PlaylistKind::Pls => body
                .lines()
                .filter_map(|line| line.split_once('='))
                .filter(|(key, _)| key.trim().to_ascii_lowercase().starts_with("file"))
                .map(|(_, value)| value.trim())
                .find(|value| is_stream(value))
                .map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_extension_and_type() {
        assert_eq!(
            PlaylistKind::detect("http://x/listen.pls?sid=1", ""),
            Some(PlaylistKind::Pls)
        );
        assert_eq!(
            PlaylistKind::detect("http://x/live.M3U", "text/plain"),
            Some(PlaylistKind::M3u)
        );
        assert_eq!(
            PlaylistKind::detect("http://x/stream", "audio/x-mpegurl; charset=utf-8"),
            Some(PlaylistKind::M3u)
        );
        assert_eq!(PlaylistKind::detect("http://x/stream.mp3", "audio/mpeg"), None);
    }

    #[test]
    fn test_m3u_first_entry() {
        let body = "#EXTM3U\n#EXTINF:-1,Jazz\n\nhttp://a.example/jazz\nhttp://b.example/jazz\n";
        assert_eq!(
            PlaylistKind::M3u.first_stream_url(body).as_deref(),
            Some("http://a.example/jazz")
        );
    }

    #[test]
    fn test_pls_first_entry() {
        let body = "[playlist]\nNumberOfEntries=2\nFile1=https://a.example/rock\nTitle1=Rock\nFile2=http://b.example/rock\n";
        assert_eq!(
            PlaylistKind::Pls.first_stream_url(body).as_deref(),
            Some("https://a.example/rock")
        );
    }

    #[test]
    fn test_playlist_without_streams() {
        assert!(PlaylistKind::M3u.first_stream_url("#EXTM3U\nrelative.mp3\n").is_none());
        assert!(PlaylistKind::Pls.first_stream_url("[playlist]\n").is_none());
    }
}
