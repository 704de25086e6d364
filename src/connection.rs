use crate::gateway::{self, BackendGateway, ConnectionError};
use crate::model::{Catalog, Track};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub base: Url,
    pub catalog: Catalog,
}

/// Health check first, listing second. The first failure ends the attempt.
pub fn establish(
    gateway: &dyn BackendGateway,
    raw_base: &str,
) -> Result<Connection, ConnectionError> {
    let base = gateway::parse_base(raw_base)?;
    info!(%base, "connecting to backend");
    gateway.check_health(&base)?;
    let catalog = gateway.fetch_catalog(&base)?;
    Ok(Connection { base, catalog })
}

#[derive(Debug)]
pub enum TaskEvent {
    Connected {
        attempt: u64,
        result: Result<Connection, ConnectionError>,
    },
    Downloaded {
        track_path: String,
        result: Result<PathBuf, String>,
    },
}

/// Runs gateway calls off the UI thread and hands results back over a channel.
pub struct TaskRunner {
    gateway: Arc<dyn BackendGateway + Send + Sync>,
    event_tx: Sender<TaskEvent>,
    event_rx: Receiver<TaskEvent>,
    latest_attempt: u64,
}

impl TaskRunner {
    pub fn new(gateway: Arc<dyn BackendGateway + Send + Sync>) -> Self {
        let (event_tx, event_rx) = mpsc::channel();
        Self {
            gateway,
            event_tx,
            event_rx,
            latest_attempt: 0,
        }
    }

    /// Starts a connection attempt; any attempt still in flight is superseded.
    pub fn connect(&mut self, raw_base: &str) -> u64 {
        self.latest_attempt += 1;
        let attempt = self.latest_attempt;
        let gateway = Arc::clone(&self.gateway);
        let event_tx = self.event_tx.clone();
        let raw_base = raw_base.to_string();

        thread::spawn(move || {
            let result = establish(gateway.as_ref(), &raw_base);
            let _ = event_tx.send(TaskEvent::Connected { attempt, result });
        });
        attempt
    }

    pub fn download(&self, base: Url, track: Track, dest_dir: PathBuf) {
        let gateway = Arc::clone(&self.gateway);
        let event_tx = self.event_tx.clone();

        thread::spawn(move || {
            let result = gateway
                .download(&base, &track, &dest_dir)
                .map_err(|err| format!("{err:#}"));
            if let Err(err) = &result {
                warn!(path = %track.path, error = %err, "download failed");
            }
            let _ = event_tx.send(TaskEvent::Downloaded {
                track_path: track.path,
                result,
            });
        });
    }

    pub fn try_recv_event(&mut self) -> Option<TaskEvent> {
        loop {
            let event = self.event_rx.try_recv().ok()?;
            if let TaskEvent::Connected { attempt, .. } = &event
                && *attempt != self.latest_attempt
            {
                debug!(attempt, latest = self.latest_attempt, "superseded connection result dropped");
                continue;
            }
            return Some(event);
        }
    }
}
