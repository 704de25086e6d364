use anyhow::{Context, Result};
use reqwest::blocking::Client;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use url::Url;

const CHUNK_SIZE: usize = 64 * 1024;
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Shared flag that stops a transfer. Set when the owning load is dropped.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancels its flag on drop.
#[derive(Debug)]
pub struct CancelOnDrop(pub CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[derive(Debug, Default)]
struct Progress {
    written: u64,
    finished: bool,
    failure: Option<String>,
}

#[derive(Debug)]
struct Shared {
    progress: Mutex<Progress>,
    grew: Condvar,
    cancel: CancelFlag,
    total: Option<u64>,
}

impl Shared {
    /// Blocks until at least `target` bytes are on disk or the body ended.
    /// Returns the byte count available at that point.
    fn wait_for(&self, target: u64) -> io::Result<u64> {
        let mut progress = self
            .progress
            .lock()
            .map_err(|_| io::Error::other("stream progress lock poisoned"))?;
        loop {
            if self.cancel.is_cancelled() {
                return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "stream cancelled"));
            }
            if let Some(failure) = &progress.failure {
                return Err(io::Error::other(failure.clone()));
            }
            if progress.written >= target || progress.finished {
                return Ok(progress.written);
            }
            progress = self
                .grew
                .wait_timeout(progress, CANCEL_POLL)
                .map_err(|_| io::Error::other("stream progress lock poisoned"))?
                .0;
        }
    }

    fn update(&self, apply: impl FnOnce(&mut Progress)) {
        if let Ok(mut progress) = self.progress.lock() {
            apply(&mut progress);
        }
        self.grew.notify_all();
    }
}

/// A response body spooled to a temporary file while it is being read.
/// Reads block until the requested bytes have arrived, so decoding can start
/// before the transfer completes.
pub struct StreamingBody {
    file: File,
    _spool: NamedTempFile,
    shared: Arc<Shared>,
    position: u64,
}

impl StreamingBody {
    /// Starts copying `source` into a spool file on a worker thread.
    pub fn spawn(
        source: impl Read + Send + 'static,
        total: Option<u64>,
        cancel: CancelFlag,
    ) -> Result<Self> {
        let spool = NamedTempFile::new().context("failed to create stream spool file")?;
        let writer = spool
            .as_file()
            .try_clone()
            .context("failed to open stream spool for writing")?;
        let file = spool
            .reopen()
            .context("failed to open stream spool for reading")?;
        let shared = Arc::new(Shared {
            progress: Mutex::new(Progress::default()),
            grew: Condvar::new(),
            cancel,
            total,
        });

        let filler = Arc::clone(&shared);
        thread::spawn(move || fill(source, writer, &filler));

        Ok(Self {
            file,
            _spool: spool,
            shared,
            position: 0,
        })
    }

    fn len(&self) -> io::Result<u64> {
        match self.shared.total {
            Some(total) => Ok(total),
            None => self.shared.wait_for(u64::MAX),
        }
    }
}

impl Drop for StreamingBody {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl Read for StreamingBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let available = self.shared.wait_for(self.position + 1)?;
        if available <= self.position {
            return Ok(0);
        }

        let wanted = (available - self.position).min(buf.len() as u64) as usize;
        self.file.seek(SeekFrom::Start(self.position))?;
        let read = self.file.read(&mut buf[..wanted])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for StreamingBody {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.position) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.len()?) + i128::from(delta),
        };
        let target = u64::try_from(target).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
        })?;
        self.position = target;
        Ok(target)
    }
}

fn fill(mut source: impl Read, mut writer: File, shared: &Shared) {
    let mut chunk = vec![0_u8; CHUNK_SIZE];
    loop {
        if shared.cancel.is_cancelled() {
            debug!("stream transfer abandoned");
            shared.update(|_| {});
            return;
        }

        let read = match source.read(&mut chunk) {
            Ok(0) => {
                shared.update(|progress| progress.finished = true);
                return;
            }
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(error = %err, "stream transfer failed");
                shared.update(|progress| progress.failure = Some(err.to_string()));
                return;
            }
        };

        if let Err(err) = writer.write_all(&chunk[..read]) {
            warn!(error = %err, "stream spool write failed");
            shared.update(|progress| progress.failure = Some(err.to_string()));
            return;
        }
        shared.update(|progress| progress.written += read as u64);
    }
}

/// Requests `url` and returns its body as a progressively filled stream.
pub fn open(http: &Client, url: &Url, cancel: CancelFlag) -> Result<StreamingBody> {
    let response = http
        .get(url.clone())
        .send()
        .with_context(|| format!("failed to request {url}"))?;
    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("Stream failed ({})", status.as_u16());
    }
    let total = response.content_length();
    StreamingBody::spawn(response, total, cancel)
}
