use super::stream::{CancelFlag, CancelOnDrop};
use super::{PlayTicket, SinkEvent};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

struct PendingLoad<S> {
    ticket: PlayTicket,
    url: Url,
    outcome: Receiver<Result<S>>,
    cancel: CancelOnDrop,
}

struct ActiveSource {
    ticket: PlayTicket,
    duration: Option<Duration>,
    _cancel: CancelOnDrop,
}

/// Follows one source from request to completion and turns what happens to
/// it into `SinkEvent`s. Replacing or clearing a load cancels its transfer.
pub struct LoadTracker<S> {
    pending: Option<PendingLoad<S>>,
    active: Option<ActiveSource>,
    paused: bool,
    events: VecDeque<SinkEvent>,
}

impl<S> LoadTracker<S> {
    pub fn new() -> Self {
        Self {
            pending: None,
            active: None,
            paused: false,
            events: VecDeque::new(),
        }
    }

    /// Starts tracking a new load. Anything loading or playing is abandoned.
    pub fn begin(
        &mut self,
        ticket: PlayTicket,
        url: Url,
        outcome: Receiver<Result<S>>,
        cancel: CancelFlag,
    ) {
        self.clear();
        self.pending = Some(PendingLoad {
            ticket,
            url,
            outcome,
            cancel: CancelOnDrop(cancel),
        });
    }

    pub fn clear(&mut self) {
        self.pending = None;
        self.active = None;
        self.paused = false;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.active.as_ref()?.duration
    }

    /// `drained` tells whether the output has run out of samples. `start`
    /// hands a loaded source to the output and returns its length if known.
    pub fn poll(
        &mut self,
        drained: bool,
        start: impl FnOnce(S) -> Result<Option<Duration>>,
    ) -> Option<SinkEvent> {
        self.poll_finished(drained);
        self.poll_pending(start);
        self.events.pop_front()
    }

    fn poll_finished(&mut self, drained: bool) {
        if self.paused || !drained {
            return;
        }
        if let Some(active) = self.active.take() {
            debug!(ticket = ?active.ticket, "source drained");
            self.events.push_back(SinkEvent::Finished {
                ticket: active.ticket,
            });
        }
    }

    fn poll_pending(&mut self, start: impl FnOnce(S) -> Result<Option<Duration>>) {
        let Some(pending) = self.pending.as_ref() else {
            return;
        };
        let outcome = match pending.outcome.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => Err(anyhow::anyhow!("stream loader stopped")),
        };
        let Some(pending) = self.pending.take() else {
            return;
        };

        match outcome.and_then(start) {
            Ok(duration) => {
                debug!(url = %pending.url, ?duration, "source started");
                self.active = Some(ActiveSource {
                    ticket: pending.ticket,
                    duration,
                    _cancel: pending.cancel,
                });
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(url = %pending.url, %reason, "source failed");
                self.events.push_back(SinkEvent::Failed {
                    ticket: pending.ticket,
                    reason,
                });
            }
        }
    }
}

impl<S> Default for LoadTracker<S> {
    fn default() -> Self {
        Self::new()
    }
}
