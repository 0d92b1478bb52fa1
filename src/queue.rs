//! Request queue - unbounded FIFO shared by every foreground caller and
//! every worker.
//!
//! The queue belongs to the manager, not to the worker pool, so requests
//! pushed while the pool is stopped wait here until the next start.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Opaque reference to one unit of content (a page image path, a URL...).
///
/// Cheap to clone; the pipeline decides how to interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentRef(Arc<str>);

impl ContentRef {
    pub fn new(reference: impl Into<Arc<str>>) -> Self {
        Self(reference.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// View the reference as a filesystem path
    #[inline]
    pub fn as_path(&self) -> &Path {
        Path::new(&*self.0)
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContentRef {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&Path> for ContentRef {
    fn from(path: &Path) -> Self {
        Self::new(path.to_string_lossy().into_owned())
    }
}

impl From<PathBuf> for ContentRef {
    fn from(path: PathBuf) -> Self {
        Self::from(path.as_path())
    }
}

/// One unit of background work. Immutable once created; ownership moves to
/// whichever worker dequeues it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchRequest {
    pub session: String,
    pub index: usize,
    pub content: ContentRef,
    pub language: String,
    /// Session generation the request was reserved under
    pub generation: u64,
}

impl PrefetchRequest {
    pub fn new(
        session: impl Into<String>,
        index: usize,
        content: ContentRef,
        language: impl Into<String>,
        generation: u64,
    ) -> Self {
        Self {
            session: session.into(),
            index,
            content,
            language: language.into(),
            generation,
        }
    }
}

/// Multi-producer, multi-consumer FIFO of prefetch requests.
pub struct RequestQueue {
    tx: Sender<PrefetchRequest>,
    rx: Receiver<PrefetchRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Append a request. Never blocks.
    pub fn push(&self, request: PrefetchRequest) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(request);
    }

    /// Take the oldest request without waiting.
    pub fn try_pop(&self) -> Option<PrefetchRequest> {
        self.rx.try_recv().ok()
    }

    /// A consumer handle for a worker thread
    pub fn receiver(&self) -> Receiver<PrefetchRequest> {
        self.rx.clone()
    }

    /// Number of requests waiting
    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}
