//! Streaming log page replicator.

use crate::error::{ReplicationError, ReplicationResult};
use crate::stream::{ChunkPublisher, ChunkSubscriber, ChunkSubscription};
use parking_lot::{Condvar, Mutex};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Response metadata captured when the download handshake succeeds.
#[derive(Debug, Clone, Copy)]
pub struct ResponseMeta {
    /// Declared length of the object being downloaded.
    pub content_length: u64,
}

impl ResponseMeta {
    /// Creates response metadata.
    #[must_use]
    pub const fn new(content_length: u64) -> Self {
        Self { content_length }
    }
}

/// Outcome of a completed download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    /// Bytes written, read back from the declared content length.
    pub bytes_written: u64,
    /// Bytes of the in-memory last page filled in-band.
    pub last_page_bytes_captured: usize,
}

/// Download lifecycle. One chunk write is in flight at a time; the
/// state mutex serializes chunk writes, the end-of-stream close and
/// [`PageReplicator::complete`], so a completed download is observed
/// only after the file is synced and closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DownloadState {
    Idle,
    Writing,
    Closing,
    Done,
    Failed,
}

struct Inner {
    state: DownloadState,
    file: Option<std::fs::File>,
    error: Option<ReplicationError>,
    failure: Option<String>,
}

struct LastPage {
    start: u64,
    buf: Box<[u8]>,
}

/// Streams one object from a blob store into a local log file.
///
/// The replicator consumes a back-pressured chunk stream with a demand
/// of one: the next chunk is requested only after the previous write
/// settled, so writes land strictly in arrival order. When a last page
/// window is configured, the bytes of the log's trailing page are
/// copied into an in-memory buffer as they stream past, so the caller
/// does not have to re-read the tail after the download.
///
/// The target file is created exclusively (an existing file fails the
/// download), force-synced before close, and removed on any failure.
///
/// # Example
///
/// ```no_run
/// use loam_replication::{PageReplicator, ResponseMeta, StaticChunkPublisher};
/// use std::sync::Arc;
///
/// let replicator = Arc::new(PageReplicator::new("db/log.xd").with_last_page(80, 20));
/// let publisher = StaticChunkPublisher::from_payload(&[0u8; 100], &[60, 25, 15]);
/// replicator.on_response(&ResponseMeta::new(100));
/// Arc::clone(&replicator).on_stream(&publisher).unwrap();
/// let result = replicator.complete().unwrap();
/// assert_eq!(result.bytes_written, 100);
/// ```
pub struct PageReplicator {
    path: PathBuf,
    last_page: Option<Mutex<LastPage>>,
    /// Cumulative bytes successfully written.
    position: AtomicU64,
    /// Bytes of the last page filled so far.
    last_page_written: AtomicUsize,
    content_length: AtomicU64,
    inner: Mutex<Inner>,
    settled: Condvar,
    subscription: Mutex<Option<Arc<dyn ChunkSubscription>>>,
}

impl PageReplicator {
    /// Creates a replicator targeting `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_page: None,
            position: AtomicU64::new(0),
            last_page_written: AtomicUsize::new(0),
            content_length: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                state: DownloadState::Idle,
                file: None,
                error: None,
                failure: None,
            }),
            settled: Condvar::new(),
            subscription: Mutex::new(None),
        }
    }

    /// Configures the last page window: `len` bytes starting at
    /// absolute log offset `start`.
    #[must_use]
    pub fn with_last_page(mut self, start: u64, len: usize) -> Self {
        self.last_page = Some(Mutex::new(LastPage {
            start,
            buf: vec![0u8; len].into_boxed_slice(),
        }));
        self
    }

    /// Returns the target file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the cumulative bytes written so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }

    /// Returns how many bytes of the last page were filled so far.
    #[must_use]
    pub fn last_page_written(&self) -> usize {
        self.last_page_written.load(Ordering::SeqCst)
    }

    /// Returns a copy of the last page buffer, when one is configured.
    ///
    /// Only the first [`last_page_written`](Self::last_page_written)
    /// bytes carry downloaded data.
    #[must_use]
    pub fn last_page(&self) -> Option<Vec<u8>> {
        self.last_page.as_ref().map(|page| page.lock().buf.to_vec())
    }

    /// Captures the response metadata of the download handshake.
    pub fn on_response(&self, meta: &ResponseMeta) {
        self.content_length
            .store(meta.content_length, Ordering::SeqCst);
        debug!(
            path = %self.path.display(),
            content_length = meta.content_length,
            "download handshake"
        );
    }

    /// Opens the target file and subscribes to the chunk stream,
    /// handing the publisher a subscriber handle to this replicator.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be created; the same
    /// failure is later surfaced by [`complete`](Self::complete).
    pub fn on_stream(self: Arc<Self>, publisher: &dyn ChunkPublisher) -> ReplicationResult<()> {
        {
            let mut inner = self.inner.lock();
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(file) => inner.file = Some(file),
                Err(e) => {
                    inner.state = DownloadState::Failed;
                    inner.failure =
                        Some(format!("cannot create {}: {e}", self.path.display()));
                    self.settled.notify_all();
                    return Err(ReplicationError::Io(e));
                }
            }
        }
        publisher.subscribe(self);
        Ok(())
    }

    /// Reports a failure from outside the stream, closing (force-synced
    /// when opened) and deleting the target file.
    ///
    /// Idempotent with respect to file cleanup.
    pub fn exception_occurred(&self, error: ReplicationError) {
        let mut inner = self.inner.lock();
        if inner.state == DownloadState::Failed {
            return;
        }
        warn!(path = %self.path.display(), %error, "download failed");
        self.fail(&mut inner, error);
        drop(inner);
        self.cancel_subscription();
    }

    /// Blocks until the download settles, then returns the result.
    ///
    /// A successful result is observed only after the file is synced
    /// and closed; the final state transition under the state mutex
    /// establishes the happens-before for reading the last page buffer.
    ///
    /// # Errors
    ///
    /// Returns the failure that ended the download, after the partial
    /// file was removed.
    pub fn complete(&self) -> ReplicationResult<WriteResult> {
        let mut inner = self.inner.lock();
        while !matches!(inner.state, DownloadState::Done | DownloadState::Failed) {
            self.settled.wait(&mut inner);
        }
        if inner.state == DownloadState::Done {
            Ok(WriteResult {
                bytes_written: self.content_length.load(Ordering::SeqCst),
                last_page_bytes_captured: self.last_page_written.load(Ordering::SeqCst),
            })
        } else {
            Err(inner.error.take().unwrap_or_else(|| {
                ReplicationError::source(
                    inner
                        .failure
                        .clone()
                        .unwrap_or_else(|| "download failed".to_string()),
                )
            }))
        }
    }

    fn write_chunk(&self, inner: &mut Inner, chunk: &[u8]) -> ReplicationResult<()> {
        let Some(file) = inner.file.as_mut() else {
            return Ok(());
        };
        file.write_all(chunk)?;
        let written = chunk.len() as u64;
        let end = self.position.fetch_add(written, Ordering::SeqCst) + written;
        self.capture_last_page(chunk, end)
    }

    /// Mirrors the bytes of `chunk` that fall into the last page window
    /// into the in-memory buffer. The chunk ends at absolute offset
    /// `end`.
    fn capture_last_page(&self, chunk: &[u8], end: u64) -> ReplicationResult<()> {
        let Some(last_page) = &self.last_page else {
            return Ok(());
        };
        let written = chunk.len() as u64;
        let mut page = last_page.lock();
        if end < page.start {
            return Ok(());
        }
        let chunk_start = end - written;
        // Chunk bytes before the window, and window bytes before the
        // chunk.
        let skip = page.start.saturating_sub(chunk_start) as usize;
        let page_offset = chunk_start.saturating_sub(page.start) as usize;
        if page_offset >= page.buf.len() || skip >= written as usize {
            return Ok(());
        }
        let len = (page.buf.len() - page_offset).min(written as usize - skip);
        if len > chunk.len() - skip {
            return Err(ReplicationError::invariant_breach(format!(
                "last page copy of {len} bytes exceeds the {} remaining in the chunk",
                chunk.len() - skip
            )));
        }
        page.buf[page_offset..page_offset + len].copy_from_slice(&chunk[skip..skip + len]);
        self.last_page_written.fetch_add(len, Ordering::SeqCst);
        Ok(())
    }

    /// Moves the download into the failed state: close (best-effort
    /// sync) and remove the partial file, then wake `complete()`.
    fn fail(&self, inner: &mut Inner, error: ReplicationError) {
        inner.state = DownloadState::Failed;
        inner.failure = Some(error.to_string());
        inner.error = Some(error);
        if let Some(file) = inner.file.take() {
            let _ = file.sync_all();
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), %e, "failed to remove partial file");
            }
        }
        self.settled.notify_all();
    }

    fn cancel_subscription(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.cancel();
        }
    }
}

impl ChunkSubscriber for PageReplicator {
    fn on_subscribe(&self, subscription: Arc<dyn ChunkSubscription>) {
        if self.inner.lock().state == DownloadState::Failed {
            subscription.cancel();
            return;
        }
        *self.subscription.lock() = Some(Arc::clone(&subscription));
        subscription.request(1);
    }

    fn on_next(&self, chunk: &[u8]) {
        let mut inner = self.inner.lock();
        if inner.state != DownloadState::Idle || inner.file.is_none() {
            // Late chunk after a failure or close.
            return;
        }
        inner.state = DownloadState::Writing;
        match self.write_chunk(&mut inner, chunk) {
            Ok(()) => {
                inner.state = DownloadState::Idle;
                drop(inner);
                let subscription = self.subscription.lock().clone();
                if let Some(subscription) = subscription {
                    subscription.request(1);
                }
            }
            Err(error) => {
                warn!(path = %self.path.display(), %error, "chunk write failed");
                self.fail(&mut inner, error);
                drop(inner);
                self.cancel_subscription();
            }
        }
    }

    fn on_complete(&self) {
        let mut inner = self.inner.lock();
        if inner.state != DownloadState::Idle {
            return;
        }
        inner.state = DownloadState::Closing;
        let closed = match inner.file.take() {
            Some(file) => file.sync_all().map_err(ReplicationError::from),
            None => Ok(()),
        };
        match closed {
            Ok(()) => {
                inner.state = DownloadState::Done;
                debug!(
                    path = %self.path.display(),
                    bytes = self.position.load(Ordering::SeqCst),
                    "download complete"
                );
                self.settled.notify_all();
            }
            Err(error) => self.fail(&mut inner, error),
        }
    }

    fn on_error(&self, message: &str) {
        // The source does not guarantee a separate exception callback,
        // so stream errors are routed into the exception path.
        self.exception_occurred(ReplicationError::source(message));
    }
}

impl std::fmt::Debug for PageReplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageReplicator")
            .field("path", &self.path)
            .field("position", &self.position())
            .field("last_page_written", &self.last_page_written())
            .finish_non_exhaustive()
    }
}
