use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_BACKEND: &str = "https://localhost:8443";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub path: String,
    pub size: u64,
    pub name: Option<String>,
}

impl Track {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Last `/` segment of the path, or the whole path when it has none.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Listing returned by one successful connection. Indices stay valid until the
/// next catalog replaces this one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub root: String,
    pub tracks: Vec<Track>,
}

impl Catalog {
    pub fn new(root: impl Into<String>, tracks: Vec<Track>) -> Self {
        Self {
            root: root.into(),
            tracks,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedState {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub autoplay: bool,
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_backend() -> String {
    String::from(DEFAULT_BACKEND)
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            autoplay: false,
            download_dir: None,
            accept_invalid_certs: false,
        }
    }
}

pub fn human_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let value = bytes as f64;
    if bytes < 1024 {
        format!("{bytes} B")
    } else if value < KIB * KIB {
        format!("{:.1} KB", value / KIB)
    } else if value < KIB * KIB * KIB {
        format!("{:.1} MB", value / (KIB * KIB))
    } else {
        format!("{:.1} GB", value / (KIB * KIB * KIB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_size_uses_binary_thresholds() {
        assert_eq!(human_size(10), "10 B");
        assert_eq!(human_size(1023), "1023 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.0 MB");
        assert_eq!(human_size(5 * 1024 * 1024 * 1024 + 512 * 1024 * 1024), "5.5 GB");
    }

    #[test]
    fn file_name_is_last_path_segment() {
        assert_eq!(Track::new("albums/live/intro.mp3", 1).file_name(), "intro.mp3");
        assert_eq!(Track::new("single.flac", 1).file_name(), "single.flac");
    }

    #[test]
    fn persisted_state_fills_missing_fields() {
        let state: PersistedState = serde_json::from_str(r#"{"autoplay": true}"#).expect("parse");
        assert!(state.autoplay);
        assert_eq!(state.backend, DEFAULT_BACKEND);
        assert!(!state.accept_invalid_certs);
    }
}
