//! Per-session preload statistics.

use crate::state::LifecycleState;
use serde::Serialize;
use std::fmt;

/// Aggregate counts over every index ever seen for one session.
///
/// Indices that are queued but not yet picked up by a worker count as
/// `not_started`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadStats {
    pub total: usize,
    pub completed: usize,
    pub processing: usize,
    pub failed: usize,
    pub not_started: usize,
}

impl PreloadStats {
    /// Count one item in the given state
    pub fn record(&mut self, state: LifecycleState) {
        self.total += 1;
        match state {
            LifecycleState::NotStarted => self.not_started += 1,
            LifecycleState::Processing => self.processing += 1,
            LifecycleState::Completed => self.completed += 1,
            LifecycleState::Failed => self.failed += 1,
        }
    }

    /// Nothing is queued or running for the session.
    pub fn is_settled(&self) -> bool {
        self.processing == 0 && self.not_started == 0
    }
}

impl FromIterator<LifecycleState> for PreloadStats {
    fn from_iter<I: IntoIterator<Item = LifecycleState>>(iter: I) -> Self {
        let mut stats = Self::default();
        for state in iter {
            stats.record(state);
        }
        stats
    }
}

impl fmt::Display for PreloadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} completed={} processing={} failed={} not_started={}",
            self.total, self.completed, self.processing, self.failed, self.not_started
        )
    }
}
