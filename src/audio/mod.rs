mod stream;
mod tracker;

use stream::{CancelFlag, StreamingBody};
use tracker::LoadTracker;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use rodio::Source;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
#[cfg(unix)]
use std::ffi::CString;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

const MAX_VOLUME: f32 = 2.0;

/// Identifies one play command. Signals carry the ticket of the source they
/// belong to so that signals from a superseded source can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayTicket(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Finished { ticket: PlayTicket },
    Failed { ticket: PlayTicket, reason: String },
}

impl SinkEvent {
    pub fn ticket(&self) -> PlayTicket {
        match self {
            Self::Finished { ticket } | Self::Failed { ticket, .. } => *ticket,
        }
    }
}

/// The audio playback primitive. `play` replaces whatever was playing; the
/// outcome arrives later through `poll_event`.
pub trait MediaSink {
    fn play(&mut self, url: &Url, ticket: PlayTicket);
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
    fn is_paused(&self) -> bool;
    fn is_loading(&self) -> bool;
    fn position(&self) -> Option<Duration>;
    fn duration(&self) -> Option<Duration>;
    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
    fn output_name(&self) -> Option<String>;
    fn poll_event(&mut self) -> Option<SinkEvent>;
}

type StreamDecoder = Decoder<StreamingBody>;

pub struct RodioSink {
    stream: OutputStream,
    sink: Sink,
    http: Client,
    tracker: LoadTracker<StreamDecoder>,
    volume: f32,
}

impl RodioSink {
    pub fn new(http: Client) -> Result<Self> {
        let (stream, sink) = open_output_stream()?;
        Ok(Self {
            stream,
            sink,
            http,
            tracker: LoadTracker::new(),
            volume: 1.0,
        })
    }

    fn reset_sink(&mut self) {
        self.sink.stop();
        self.sink = Sink::connect_new(self.stream.mixer());
        self.sink.set_volume(self.volume);
    }
}

impl MediaSink for RodioSink {
    fn play(&mut self, url: &Url, ticket: PlayTicket) {
        self.reset_sink();

        let (tx, rx) = mpsc::channel();
        let cancel = CancelFlag::new();
        let http = self.http.clone();
        let request_url = url.clone();
        let loader_cancel = cancel.clone();
        thread::spawn(move || {
            let decoded = stream::open(&http, &request_url, loader_cancel).and_then(|body| {
                Decoder::new(body).with_context(|| format!("failed to decode {request_url}"))
            });
            if tx.send(decoded).is_err() {
                debug!(url = %request_url, "superseded stream dropped");
            }
        });

        self.tracker.begin(ticket, url.clone(), rx, cancel);
    }

    fn pause(&mut self) {
        self.tracker.set_paused(true);
        self.sink.pause();
    }

    fn resume(&mut self) {
        self.tracker.set_paused(false);
        self.sink.play();
    }

    fn stop(&mut self) {
        self.reset_sink();
        self.tracker.clear();
    }

    fn is_paused(&self) -> bool {
        self.tracker.is_paused()
    }

    fn is_loading(&self) -> bool {
        self.tracker.is_loading()
    }

    fn position(&self) -> Option<Duration> {
        self.tracker.is_active().then(|| self.sink.get_pos())
    }

    fn duration(&self) -> Option<Duration> {
        self.tracker.duration()
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, MAX_VOLUME);
        self.sink.set_volume(self.volume);
    }

    fn output_name(&self) -> Option<String> {
        Some(String::from("System default output (CPAL)"))
    }

    fn poll_event(&mut self) -> Option<SinkEvent> {
        let drained = self.sink.empty();
        let paused = self.tracker.is_paused();
        let sink = &self.sink;
        self.tracker.poll(drained, |source| {
            let duration = source.total_duration().filter(|value| !value.is_zero());
            sink.append(source);
            if paused {
                sink.pause();
            }
            Ok(duration)
        })
    }
}

fn open_output_stream() -> Result<(OutputStream, Sink)> {
    let mut stream = with_silenced_stderr(|| {
        let host = rodio::cpal::default_host();
        match OutputStreamBuilder::from_default_device()
            .context("failed to open default system output stream")
            .and_then(|builder| {
                builder
                    .with_error_callback(|_| {})
                    .open_stream_or_fallback()
                    .context("failed to start default output stream")
            }) {
            Ok(stream) => Ok(stream),
            Err(default_err) => {
                let mut candidates: Vec<String> = host
                    .output_devices()
                    .ok()
                    .into_iter()
                    .flatten()
                    .filter_map(|device| device.name().ok())
                    .collect();
                candidates.sort_by_cached_key(|name| {
                    let lower = name.to_ascii_lowercase();
                    let rank = if lower.contains("pulse") {
                        0_u8
                    } else if lower.contains("pipewire") {
                        1_u8
                    } else if lower.contains("default") {
                        2_u8
                    } else {
                        3_u8
                    };
                    (rank, lower)
                });
                candidates.dedup();

                candidates
                    .iter()
                    .find_map(|candidate| {
                        let device = host.output_devices().ok()?.find(|entry| {
                            entry.name().ok().as_deref() == Some(candidate.as_str())
                        })?;
                        OutputStreamBuilder::from_device(device)
                            .ok()?
                            .with_error_callback(|_| {})
                            .open_stream_or_fallback()
                            .ok()
                    })
                    .with_context(|| {
                        format!(
                            "unable to start any audio output stream after default failed: {default_err:#}"
                        )
                    })
            }
        }
    })?;
    stream.log_on_drop(false);
    let sink = Sink::connect_new(stream.mixer());
    Ok((stream, sink))
}

#[cfg(unix)]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        return operation();
    }

    let devnull = CString::new("/dev/null")
        .ok()
        .map(|path| unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) })
        .unwrap_or(-1);

    if devnull >= 0 {
        unsafe {
            libc::dup2(devnull, libc::STDERR_FILENO);
            libc::close(devnull);
        }
    }

    let result = operation();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }

    result
}

#[cfg(not(unix))]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    operation()
}

/// Stand-in used when no output device is available. Keeps a logical clock
/// and never reports completion because the source length is unknown.
pub struct NullSink {
    paused: bool,
    current: Option<PlayTicket>,
    volume: f32,
    started_at: Option<Instant>,
    position_offset: Duration,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            paused: false,
            current: None,
            volume: 1.0,
            started_at: None,
            position_offset: Duration::ZERO,
        }
    }

    pub fn current_ticket(&self) -> Option<PlayTicket> {
        self.current
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if !self.paused
            && self.current.is_some()
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed());
        }
        position
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaSink for NullSink {
    fn play(&mut self, _url: &Url, ticket: PlayTicket) {
        self.paused = false;
        self.current = Some(ticket);
        self.started_at = Some(Instant::now());
        self.position_offset = Duration::ZERO;
    }

    fn pause(&mut self) {
        self.position_offset = self.current_position();
        self.started_at = None;
        self.paused = true;
    }

    fn resume(&mut self) {
        if self.current.is_some() {
            self.started_at = Some(Instant::now());
        }
        self.paused = false;
    }

    fn stop(&mut self) {
        self.current = None;
        self.paused = false;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn is_loading(&self) -> bool {
        false
    }

    fn position(&self) -> Option<Duration> {
        self.current.as_ref()?;
        Some(self.current_position())
    }

    fn duration(&self) -> Option<Duration> {
        None
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, MAX_VOLUME);
    }

    fn output_name(&self) -> Option<String> {
        Some(String::from("Null audio sink"))
    }

    fn poll_event(&mut self) -> Option<SinkEvent> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{MediaSink, NullSink, PlayTicket, SinkEvent};
    use std::thread;
    use std::time::Duration;
    use url::Url;

    fn url() -> Url {
        Url::parse("http://localhost:8443/stream/a.mp3").expect("url")
    }

    #[test]
    fn null_sink_position_advances_when_playing() {
        let mut sink = NullSink::new();
        sink.play(&url(), PlayTicket(1));
        let before = sink.position().expect("position should be present");
        thread::sleep(Duration::from_millis(20));
        let after = sink.position().expect("position should be present");
        assert!(after > before, "position should advance while playing");
    }

    #[test]
    fn null_sink_pause_freezes_position() {
        let mut sink = NullSink::new();
        sink.play(&url(), PlayTicket(1));
        thread::sleep(Duration::from_millis(20));

        sink.pause();
        let paused = sink.position().expect("position should be present");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.position(), Some(paused), "position should freeze while paused");

        sink.resume();
        thread::sleep(Duration::from_millis(20));
        let resumed = sink.position().expect("position should be present");
        assert!(resumed > paused, "position should continue after resume");
    }

    #[test]
    fn null_sink_stop_clears_source_and_never_signals() {
        let mut sink = NullSink::new();
        sink.play(&url(), PlayTicket(7));
        assert_eq!(sink.current_ticket(), Some(PlayTicket(7)));
        sink.stop();
        assert_eq!(sink.current_ticket(), None);
        assert_eq!(sink.position(), None);
        assert_eq!(sink.poll_event(), None);
    }

    #[test]
    fn volume_is_clamped() {
        let mut sink = NullSink::new();
        sink.set_volume(9.0);
        assert_eq!(sink.volume(), 2.0);
        sink.set_volume(-1.0);
        assert_eq!(sink.volume(), 0.0);
    }

    #[test]
    fn event_exposes_its_ticket() {
        let failed = SinkEvent::Failed {
            ticket: PlayTicket(3),
            reason: String::from("boom"),
        };
        assert_eq!(failed.ticket(), PlayTicket(3));
        assert_eq!(SinkEvent::Finished { ticket: PlayTicket(4) }.ticket(), PlayTicket(4));
    }
}
