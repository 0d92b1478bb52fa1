//! Preload manager - the public face of the prefetch cache.
//!
//! The manager overlaps expensive page analysis with the time a reader spends
//! on the current page. Foreground code calls `preload_window` on every
//! navigation and later asks `get`/`is_ready` for the page it lands on.
//!
//! Key design principles:
//! - Never block the caller: preloading only enqueues, reads only read
//! - Never analyze the same item twice while it is queued, running or done
//! - Nearest page first: enqueue order is the only priority
//! - Sessions are torn down with one call and leave nothing behind

use crate::config::PreloadConfig;
use crate::pipeline::AnalysisPipeline;
use crate::planner::WindowPlanner;
use crate::queue::{ContentRef, PrefetchRequest, RequestQueue};
use crate::state::LifecycleState;
use crate::stats::PreloadStats;
use crate::store::{SessionId, SessionStore};
use crate::worker::{CallSlots, WorkerPool};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;

/// Session-scoped background prefetch cache.
///
/// All methods take `&self` and are safe to call from many threads.
pub struct PreloadManager<P: AnalysisPipeline> {
    config: PreloadConfig,
    planner: WindowPlanner,
    store: Arc<SessionStore<P::Output>>,
    queue: RequestQueue,
    pipeline: Arc<P>,
    /// Shared by every pool so calls abandoned by one pool still count
    slots: CallSlots,
    /// `Some` while running
    pool: Mutex<Option<WorkerPool>>,
}

impl<P: AnalysisPipeline> PreloadManager<P> {
    /// Create a stopped manager with its own empty store.
    pub fn new(config: PreloadConfig, pipeline: P) -> Self {
        Self::with_store(config, pipeline, Arc::new(SessionStore::new()))
    }

    /// Create a stopped manager over an existing store.
    pub fn with_store(
        config: PreloadConfig,
        pipeline: P,
        store: Arc<SessionStore<P::Output>>,
    ) -> Self {
        info!(
            "preload manager: {} workers, {} items ahead",
            config.max_workers, config.lookahead_depth
        );
        Self {
            planner: WindowPlanner::new(config.lookahead_depth),
            slots: CallSlots::new(config.max_workers),
            config,
            store,
            queue: RequestQueue::new(),
            pipeline: Arc::new(pipeline),
            pool: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PreloadConfig {
        &self.config
    }

    /// Shared handle to the underlying store
    pub fn store(&self) -> &Arc<SessionStore<P::Output>> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the worker pool. Returns false if it is already running.
    ///
    /// Requests queued while stopped are drained once the workers are up.
    pub fn start(&self) -> bool {
        let mut pool = self.pool.lock();
        if pool.is_some() {
            return false;
        }
        let workers = self.config.max_workers.max(1);
        *pool = Some(WorkerPool::spawn(
            workers,
            self.queue.receiver(),
            self.slots.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.pipeline),
            self.config.item_timeout,
        ));
        info!(
            "preload manager: started {workers} workers ({} requests pending)",
            self.queue.len()
        );
        true
    }

    /// Stop the workers after their current item and wait for them to exit.
    /// Returns false if already stopped.
    ///
    /// Queued requests stay queued for the next `start`. The pool lock is
    /// released before joining, so other callers never wait on an item.
    pub fn stop(&self) -> bool {
        let running = self.pool.lock().take();
        let Some(running) = running else {
            return false;
        };
        running.shutdown();
        info!(
            "preload manager: stopped ({} requests pending)",
            self.queue.len()
        );
        true
    }

    pub fn is_running(&self) -> bool {
        self.pool.lock().is_some()
    }

    // -----------------------------------------------------------------------
    // Prefetching
    // -----------------------------------------------------------------------

    /// Queue one item for background analysis.
    ///
    /// No-op if the item is already queued, processing, completed or failed.
    /// Returns true if a request was queued. Never blocks on the pipeline.
    pub fn preload(
        &self,
        session: &str,
        index: usize,
        content: impl Into<ContentRef>,
        language: &str,
    ) -> bool {
        let Some(generation) = self.store.try_reserve(session, index) else {
            debug!(
                "preload: {session}/{index} already {}",
                self.store.status(session, index)
            );
            return false;
        };
        self.queue.push(PrefetchRequest::new(
            session,
            index,
            content.into(),
            language,
            generation,
        ));
        debug!("preload: queued {session}/{index}");
        true
    }

    /// Queue the lookahead window after `current`, nearest first.
    ///
    /// `items` holds the content reference of every item in the session.
    /// Returns the indices actually queued.
    pub fn preload_window(
        &self,
        session: &str,
        current: usize,
        items: &[ContentRef],
        language: &str,
    ) -> Vec<usize> {
        let queued: Vec<usize> = self
            .plan(session, current, items.len())
            .into_iter()
            .filter(|&index| self.preload(session, index, items[index].clone(), language))
            .collect();
        debug!(
            "preload: window after {session}/{current} queued {queued:?} of {} items",
            items.len()
        );
        queued
    }

    /// Indices the next `preload_window` would consider.
    pub fn plan(&self, session: &str, current: usize, total: usize) -> Vec<usize> {
        self.planner.plan(&self.store, session, current, total)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn is_ready(&self, session: &str, index: usize) -> bool {
        self.store.is_ready(session, index)
    }

    /// The prefetched result, if the item completed.
    pub fn get(&self, session: &str, index: usize) -> Option<Arc<P::Output>> {
        self.store.result(session, index)
    }

    pub fn status(&self, session: &str, index: usize) -> LifecycleState {
        self.store.status(session, index)
    }

    pub fn stats(&self, session: &str) -> PreloadStats {
        self.store.stats(session)
    }

    /// Requests waiting for a worker, across all sessions
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Sessions that currently hold state
    pub fn sessions(&self) -> Vec<SessionId> {
        self.store.sessions()
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Drop all state for a session.
    ///
    /// Requests still queued for it are skipped by the workers. Items already
    /// being analyzed finish and land in a fresh entry for the session, which
    /// a later clear removes.
    pub fn clear_session(&self, session: &str) {
        if self.store.clear_session(session) {
            info!("preload manager: cleared session {session}");
        }
    }
}

impl<P: AnalysisPipeline> Drop for PreloadManager<P> {
    fn drop(&mut self) {
        self.stop();
    }
}
