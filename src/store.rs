//! Session store - per-session status and result maps.
//!
//! The store is the only shared mutable state in the crate. Both maps of a
//! session live in one entry behind one lock, so publishing a result and
//! marking the item `Completed` is a single atomic step: a reader can never
//! see `Completed` without the result.
//!
//! Reads take the read lock and never wait on the pipeline. Writers hold the
//! write lock only for a few map operations.

use crate::state::LifecycleState;
use crate::stats::PreloadStats;
use log::debug;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Key of a reader session.
pub type SessionId = String;

/// Everything known about one session.
struct SessionEntry<T> {
    /// Distinguishes this incarnation of the session from earlier, cleared ones
    generation: u64,
    /// Lifecycle state for every index a worker has picked up
    states: HashMap<usize, LifecycleState>,
    /// Published results (write-once per index)
    results: HashMap<usize, Arc<T>>,
    /// Indices enqueued but not yet claimed by a worker
    queued: HashSet<usize>,
}

impl<T> SessionEntry<T> {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            states: HashMap::new(),
            results: HashMap::new(),
            queued: HashSet::new(),
        }
    }

    #[inline]
    fn state(&self, index: usize) -> LifecycleState {
        self.states.get(&index).copied().unwrap_or_default()
    }

    /// Move `index` to a terminal state.
    ///
    /// Normally the item is `Processing`. It may also read `NotStarted` when
    /// the session was cleared while the item was in flight; the write then
    /// lands in the fresh entry as an orphan. Terminal states are never
    /// overwritten.
    fn finish(&mut self, index: usize, next: LifecycleState) -> bool {
        let current = self.state(index);
        let legal = current.can_transition_to(next)
            || (current == LifecycleState::NotStarted && next.is_terminal());
        if !legal {
            return false;
        }
        // A queued duplicate from after the clear is now redundant.
        self.queued.remove(&index);
        self.states.insert(index, next);
        true
    }
}

/// Thread-safe per-session status tracker and result store.
pub struct SessionStore<T> {
    sessions: RwLock<HashMap<SessionId, SessionEntry<T>>>,
    /// Source of session generations
    generations: AtomicU64,
}

impl<T> SessionStore<T> {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Entry for `session`, created with a fresh generation if absent.
    fn entry_mut<'a>(
        &self,
        sessions: &'a mut HashMap<SessionId, SessionEntry<T>>,
        session: &str,
    ) -> &'a mut SessionEntry<T> {
        sessions.entry(session.to_string()).or_insert_with(|| {
            SessionEntry::new(self.generations.fetch_add(1, Ordering::Relaxed))
        })
    }

    /// Lifecycle state of an item. Unknown sessions and indices are `NotStarted`.
    pub fn status(&self, session: &str, index: usize) -> LifecycleState {
        self.sessions
            .read()
            .get(session)
            .map(|entry| entry.state(index))
            .unwrap_or_default()
    }

    /// Completed result for an item, if any.
    pub fn result(&self, session: &str, index: usize) -> Option<Arc<T>> {
        self.sessions
            .read()
            .get(session)?
            .results
            .get(&index)
            .cloned()
    }

    /// True iff the item is `Completed` (and therefore has a result).
    pub fn is_ready(&self, session: &str, index: usize) -> bool {
        self.status(session, index) == LifecycleState::Completed
    }

    /// Whether the item is waiting in the queue.
    pub fn is_queued(&self, session: &str, index: usize) -> bool {
        self.sessions
            .read()
            .get(session)
            .is_some_and(|entry| entry.queued.contains(&index))
    }

    /// Reserve an item for enqueueing.
    ///
    /// Returns the session generation to stamp on the request if the caller
    /// should push one: the item is `NotStarted` and not already queued.
    /// Creates the session on first use.
    pub fn try_reserve(&self, session: &str, index: usize) -> Option<u64> {
        let mut sessions = self.sessions.write();
        let entry = self.entry_mut(&mut sessions, session);
        if entry.state(index).is_settled_or_running() || !entry.queued.insert(index) {
            return None;
        }
        Some(entry.generation)
    }

    /// Claim a dequeued item for processing (`NotStarted -> Processing`).
    ///
    /// Returns false if the reservation behind the request is gone: the
    /// session was cleared since the request was queued (generation
    /// mismatch), or the item already left the queue. The caller must then
    /// drop the request.
    pub fn claim(&self, session: &str, index: usize, generation: u64) -> bool {
        let mut sessions = self.sessions.write();
        let Some(entry) = sessions.get_mut(session) else {
            return false;
        };
        if entry.generation != generation || !entry.queued.remove(&index) {
            return false;
        }
        let current = entry.state(index);
        if !current.can_transition_to(LifecycleState::Processing) {
            return false;
        }
        entry.states.insert(index, LifecycleState::Processing);
        true
    }

    /// Publish a result and mark the item `Completed` in one step.
    pub fn complete(&self, session: &str, index: usize, result: T) -> bool {
        let mut sessions = self.sessions.write();
        let entry = self.entry_mut(&mut sessions, session);
        if !entry.finish(index, LifecycleState::Completed) {
            return false;
        }
        entry.results.insert(index, Arc::new(result));
        true
    }

    /// Mark the item `Failed`.
    pub fn fail(&self, session: &str, index: usize) -> bool {
        let mut sessions = self.sessions.write();
        let entry = self.entry_mut(&mut sessions, session);
        entry.finish(index, LifecycleState::Failed)
    }

    /// Remove every status, result and reservation for a session.
    /// Returns true if the session had any state.
    pub fn clear_session(&self, session: &str) -> bool {
        let removed = self.sessions.write().remove(session);
        if let Some(entry) = &removed {
            debug!(
                "store: cleared session {session} ({} states, {} results, {} queued)",
                entry.states.len(),
                entry.results.len(),
                entry.queued.len()
            );
        }
        removed.is_some()
    }

    /// Counts over every index seen for the session.
    pub fn stats(&self, session: &str) -> PreloadStats {
        let sessions = self.sessions.read();
        let Some(entry) = sessions.get(session) else {
            return PreloadStats::default();
        };
        let queued_only = entry
            .queued
            .iter()
            .filter(|&index| !entry.states.contains_key(index))
            .map(|_| LifecycleState::NotStarted);
        entry.states.values().copied().chain(queued_only).collect()
    }

    /// Ids of sessions that currently hold state
    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl<T> Default for SessionStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
