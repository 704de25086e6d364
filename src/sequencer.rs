use crate::audio::{MediaSink, PlayTicket, SinkEvent};
use crate::gateway;
use crate::model::{Catalog, Track};
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use url::Url;

/// What the current slot is doing. `Stopped` keeps the last index visible
/// while nothing is being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Idle,
    Playing { index: usize, ticket: PlayTicket },
    Stopped { index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    EndOfList,
    PlaybackFailed {
        path: Option<String>,
        reason: String,
    },
}

impl Notice {
    pub fn message(&self) -> String {
        match self {
            Self::EndOfList => String::from("Reached end of list"),
            Self::PlaybackFailed {
                path: Some(path),
                reason,
            } => format!("Playback error on {path}: {reason}"),
            Self::PlaybackFailed { path: None, reason } => format!("Playback error: {reason}"),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::PlaybackFailed { .. })
    }
}

/// Owns what is current and how playback advances through the catalog.
/// Every play command goes through `select_index`.
#[derive(Debug)]
pub struct Sequencer {
    base: Option<Url>,
    catalog: Catalog,
    slot: Slot,
    autoplay: bool,
    next_ticket: u64,
    notices: VecDeque<Notice>,
    persist_requested: bool,
    dirty: bool,
}

impl Sequencer {
    pub fn new(autoplay: bool) -> Self {
        Self {
            base: None,
            catalog: Catalog::default(),
            slot: Slot::Idle,
            autoplay,
            next_ticket: 0,
            notices: VecDeque::new(),
            persist_requested: false,
            dirty: true,
        }
    }

    pub fn initialize(&mut self, base: Url, catalog: Catalog) {
        info!(%base, tracks = catalog.len(), "catalog installed");
        self.base = Some(base);
        self.catalog = catalog;
        self.slot = Slot::Idle;
        self.dirty = true;
    }

    pub fn select_index(&mut self, index: usize, sink: &mut dyn MediaSink) {
        let Some(base) = &self.base else {
            debug!(index, "selection ignored without a backend");
            return;
        };
        let Some(track) = self.catalog.get(index) else {
            debug!(index, len = self.catalog.len(), "selection out of range ignored");
            return;
        };

        let url = gateway::stream_url(base, track);
        self.next_ticket += 1;
        let ticket = PlayTicket(self.next_ticket);
        info!(index, path = %track.path, %url, "playing track");

        self.slot = Slot::Playing { index, ticket };
        self.dirty = true;
        sink.play(&url, ticket);
    }

    pub fn set_autoplay(&mut self, enabled: bool) {
        self.autoplay = enabled;
        self.persist_requested = true;
        self.dirty = true;
    }

    pub fn toggle_autoplay(&mut self) {
        self.set_autoplay(!self.autoplay);
    }

    pub fn on_track_finished(&mut self, sink: &mut dyn MediaSink) {
        let Some(index) = self.current_index() else {
            return;
        };

        if self.autoplay {
            self.advance_from(index, sink);
        } else {
            self.slot = Slot::Stopped { index };
            self.dirty = true;
        }
    }

    /// Always reports the failure; advances only when autoplay is on.
    pub fn on_track_error(&mut self, reason: &str, sink: &mut dyn MediaSink) {
        let path = self.current_track().map(|track| track.path.clone());
        warn!(index = ?self.current_index(), ?path, reason, "playback failed");
        self.notices.push_back(Notice::PlaybackFailed {
            path,
            reason: reason.to_string(),
        });
        self.dirty = true;

        let Some(index) = self.current_index() else {
            return;
        };

        if self.autoplay {
            self.advance_from(index, sink);
        } else {
            self.slot = Slot::Stopped { index };
            self.dirty = true;
        }
    }

    /// Routes a sink signal to the matching handler. Signals for anything but
    /// the source currently playing are dropped.
    pub fn handle_sink_event(&mut self, event: SinkEvent, sink: &mut dyn MediaSink) {
        let Slot::Playing { ticket, .. } = self.slot else {
            debug!(?event, "sink signal ignored while not playing");
            return;
        };
        if event.ticket() != ticket {
            debug!(?event, current = ?ticket, "stale sink signal ignored");
            return;
        }

        match event {
            SinkEvent::Finished { .. } => self.on_track_finished(sink),
            SinkEvent::Failed { reason, .. } => self.on_track_error(&reason, sink),
        }
    }

    fn advance_from(&mut self, index: usize, sink: &mut dyn MediaSink) {
        let next = index + 1;
        if next < self.catalog.len() {
            self.select_index(next, sink);
        } else {
            info!(index, "end of list reached");
            self.slot = Slot::Stopped { index };
            self.notices.push_back(Notice::EndOfList);
            self.dirty = true;
        }
    }

    pub fn current_index(&self) -> Option<usize> {
        match self.slot {
            Slot::Idle => None,
            Slot::Playing { index, .. } | Slot::Stopped { index } => Some(index),
        }
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.catalog.get(self.current_index()?)
    }

    pub fn current_stream_url(&self) -> Option<Url> {
        let base = self.base.as_ref()?;
        Some(gateway::stream_url(base, self.current_track()?))
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.slot, Slot::Playing { .. })
    }

    pub fn autoplay(&self) -> bool {
        self.autoplay
    }

    pub fn base(&self) -> Option<&Url> {
        self.base.as_ref()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    /// True once after each autoplay change.
    pub fn take_persist_request(&mut self) -> bool {
        std::mem::take(&mut self.persist_requested)
    }

    /// True once after any change that affects what is shown.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
