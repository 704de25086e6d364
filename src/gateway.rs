use crate::model::{Catalog, DEFAULT_BACKEND, Track};
use anyhow::Context;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::error::Error as _;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const API_TIMEOUT: Duration = Duration::from_secs(30);
const FALLBACK_DOWNLOAD_NAME: &str = "download";
const MAX_NAME_ATTEMPTS: u32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Ping,
    Files,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ping => "Ping",
            Self::Files => "Files",
        };
        f.write_str(label)
    }
}

/// Why a connection attempt (health check or listing) did not produce a catalog.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Invalid backend address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("{endpoint} request failed: {reason}")]
    Transport { endpoint: Endpoint, reason: String },

    #[error("{endpoint} failed ({status})")]
    Status { endpoint: Endpoint, status: u16 },

    #[error("Ping not OK")]
    PingNotOk,

    #[error("{endpoint} returned a malformed response: {reason}")]
    Malformed { endpoint: Endpoint, reason: String },
}

/// Request/response access to the backend. Implementations hold no
/// connection state; every call is a single attempt.
pub trait BackendGateway {
    fn check_health(&self, base: &Url) -> Result<(), ConnectionError>;
    fn fetch_catalog(&self, base: &Url) -> Result<Catalog, ConnectionError>;
    /// Saves the stream of `track` under `dest_dir` as `download_name(track)`.
    fn download(&self, base: &Url, track: &Track, dest_dir: &Path) -> anyhow::Result<PathBuf>;
}

#[derive(Debug, Deserialize)]
struct PingResponse {
    #[serde(default)]
    ok: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct FilesResponse {
    root: String,
    files: Vec<WireTrack>,
}

#[derive(Debug, Deserialize)]
struct WireTrack {
    path: String,
    size: u64,
    #[serde(default)]
    name: Option<String>,
}

impl From<WireTrack> for Track {
    fn from(wire: WireTrack) -> Self {
        Self {
            path: wire.path,
            size: wire.size,
            name: wire.name,
        }
    }
}

pub struct HttpGateway {
    api: Client,
    transfer: Client,
}

impl HttpGateway {
    pub fn new(accept_invalid_certs: bool) -> anyhow::Result<Self> {
        let user_agent = format!("beardown/{}", env!("CARGO_PKG_VERSION"));
        let api = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(API_TIMEOUT)
            .user_agent(user_agent.clone())
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .context("failed to build backend HTTP client")?;
        // Streams and downloads may run far longer than any API call.
        let transfer = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None)
            .user_agent(user_agent)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .context("failed to build stream HTTP client")?;
        Ok(Self { api, transfer })
    }

    /// Client used for audio bodies; shares the TLS settings of the API client.
    pub fn transfer_client(&self) -> Client {
        self.transfer.clone()
    }
}

impl BackendGateway for HttpGateway {
    fn check_health(&self, base: &Url) -> Result<(), ConnectionError> {
        let url = endpoint_url(base, "/ping");
        debug!(%url, "checking backend health");

        let response = self
            .api
            .get(url)
            .send()
            .map_err(|err| transport_error(Endpoint::Ping, &err))?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "health check rejected");
            return Err(ConnectionError::Status {
                endpoint: Endpoint::Ping,
                status: status.as_u16(),
            });
        }

        let body: PingResponse = response
            .json()
            .map_err(|err| malformed_error(Endpoint::Ping, &err))?;
        if body.ok != Some(true) {
            return Err(ConnectionError::PingNotOk);
        }
        Ok(())
    }

    fn fetch_catalog(&self, base: &Url) -> Result<Catalog, ConnectionError> {
        let url = endpoint_url(base, "/files");
        debug!(%url, "fetching catalog");

        let response = self
            .api
            .get(url)
            .send()
            .map_err(|err| transport_error(Endpoint::Files, &err))?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "listing rejected");
            return Err(ConnectionError::Status {
                endpoint: Endpoint::Files,
                status: status.as_u16(),
            });
        }

        let body: FilesResponse = response
            .json()
            .map_err(|err| malformed_error(Endpoint::Files, &err))?;
        let catalog = Catalog::new(
            body.root,
            body.files.into_iter().map(Track::from).collect(),
        );
        info!(root = %catalog.root, tracks = catalog.len(), "catalog fetched");
        Ok(catalog)
    }

    fn download(&self, base: &Url, track: &Track, dest_dir: &Path) -> anyhow::Result<PathBuf> {
        let url = stream_url(base, track);
        info!(%url, dest = %dest_dir.display(), "downloading track");
        let mut response = self
            .transfer
            .get(url)
            .send()
            .with_context(|| format!("Download request failed for {}", track.path))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Download failed ({})", status.as_u16());
        }

        fs::create_dir_all(dest_dir)
            .with_context(|| format!("failed to create {}", dest_dir.display()))?;
        let mut partial = NamedTempFile::new_in(dest_dir)
            .with_context(|| format!("failed to create a file in {}", dest_dir.display()))?;
        response
            .copy_to(partial.as_file_mut())
            .with_context(|| format!("Download interrupted for {}", track.path))?;

        let name = download_name(track);
        let mut attempt = 0;
        loop {
            let target = dest_dir.join(numbered_name(&name, attempt));
            match partial.persist_noclobber(&target) {
                Ok(_) => return Ok(target),
                Err(err)
                    if err.error.kind() == ErrorKind::AlreadyExists
                        && attempt < MAX_NAME_ATTEMPTS =>
                {
                    partial = err.file;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err.error)
                        .with_context(|| format!("failed to save {}", target.display()));
                }
            }
        }
    }
}

/// Validates a user-supplied backend address. Blank input selects the default.
pub fn parse_base(raw: &str) -> Result<Url, ConnectionError> {
    let trimmed = raw.trim();
    let candidate = if trimmed.is_empty() {
        DEFAULT_BACKEND
    } else {
        trimmed
    };

    let invalid = |reason: String| ConnectionError::InvalidAddress {
        address: candidate.to_string(),
        reason,
    };

    let url = Url::parse(candidate).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid(String::from("missing host")));
    }
    Ok(url)
}

/// Playable address of `track`. Every byte of the path outside the unreserved
/// set is percent-encoded, separators included.
pub fn stream_url(base: &Url, track: &Track) -> Url {
    let encoded = urlencoding::encode(&track.path);
    endpoint_url(base, &format!("/stream/{encoded}"))
}

/// Suggested file name for saving `track`: its display name, else the last
/// path segment, never containing a separator.
pub fn download_name(track: &Track) -> String {
    let raw = track
        .name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| track.file_name());
    let cleaned = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        String::from(FALLBACK_DOWNLOAD_NAME)
    } else {
        cleaned.to_string()
    }
}

/// `name` for the first attempt, then `stem (n).ext`.
fn numbered_name(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem} ({attempt}).{ext}"),
        _ => format!("{name} ({attempt})"),
    }
}

fn endpoint_url(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    url
}

fn transport_error(endpoint: Endpoint, err: &reqwest::Error) -> ConnectionError {
    warn!(%endpoint, error = %error_chain(err), "backend request failed");
    ConnectionError::Transport {
        endpoint,
        reason: error_chain(err),
    }
}

fn malformed_error(endpoint: Endpoint, err: &reqwest::Error) -> ConnectionError {
    ConnectionError::Malformed {
        endpoint,
        reason: error_chain(err),
    }
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(raw: &str) -> Url {
        parse_base(raw).expect("valid base")
    }

    #[test]
    fn stream_url_encodes_separators_and_reserved_characters() {
        let track = Track::new("live sets/2024#1?/naïve mix%.mp3", 10);
        let url = stream_url(&base("https://music.lan:8443"), &track);
        assert_eq!(
            url.as_str(),
            "https://music.lan:8443/stream/live%20sets%2F2024%231%3F%2Fna%C3%AFve%20mix%25.mp3"
        );
    }

    #[test]
    fn stream_url_resolves_against_origin() {
        let track = Track::new("a.mp3", 1);
        let url = stream_url(&base("http://host:9000/ui/index.html?x=1#top"), &track);
        assert_eq!(url.as_str(), "http://host:9000/stream/a.mp3");
    }

    #[test]
    fn stream_url_is_deterministic() {
        let track = Track::new("dir/song.ogg", 1);
        let b = base("http://host");
        assert_eq!(stream_url(&b, &track), stream_url(&b, &track));
        assert_eq!(b.as_str(), "http://host/");
    }

    #[test]
    fn blank_base_selects_default_backend() {
        assert_eq!(parse_base("   ").expect("default").as_str(), "https://localhost:8443/");
    }

    #[test]
    fn base_requires_http_scheme_and_host() {
        assert!(matches!(
            parse_base("ftp://host"),
            Err(ConnectionError::InvalidAddress { .. })
        ));
        assert!(matches!(
            parse_base("localhost:8443"),
            Err(ConnectionError::InvalidAddress { .. })
        ));
        assert!(matches!(
            parse_base("not a url"),
            Err(ConnectionError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn download_name_prefers_display_name() {
        let track = Track::new("albums/x/01.flac", 1).with_name("Opening.flac");
        assert_eq!(download_name(&track), "Opening.flac");
    }

    #[test]
    fn download_name_falls_back_to_last_segment() {
        assert_eq!(download_name(&Track::new("albums/x/01.flac", 1)), "01.flac");
        assert_eq!(
            download_name(&Track::new("albums/x/01.flac", 1).with_name("  ")),
            "01.flac"
        );
    }

    #[test]
    fn download_name_never_contains_separators() {
        let track = Track::new("a.mp3", 1).with_name("../../etc/passwd");
        assert_eq!(download_name(&track), "passwd");
        assert_eq!(download_name(&Track::new("folder/", 1)), FALLBACK_DOWNLOAD_NAME);
    }

    #[test]
    fn numbered_names_keep_the_extension() {
        assert_eq!(numbered_name("song.mp3", 0), "song.mp3");
        assert_eq!(numbered_name("song.mp3", 2), "song (2).mp3");
        assert_eq!(numbered_name("README", 1), "README (1)");
        assert_eq!(numbered_name(".hidden", 1), ".hidden (1)");
    }

    #[test]
    fn error_messages_match_status_wording() {
        let ping = ConnectionError::Status {
            endpoint: Endpoint::Ping,
            status: 503,
        };
        let files = ConnectionError::Status {
            endpoint: Endpoint::Files,
            status: 404,
        };
        assert_eq!(ping.to_string(), "Ping failed (503)");
        assert_eq!(files.to_string(), "Files failed (404)");
        assert_eq!(ConnectionError::PingNotOk.to_string(), "Ping not OK");
    }
}
