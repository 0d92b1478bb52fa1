//! Window planner - which upcoming items to prefetch.
//!
//! Looks `depth` items ahead of the current one and keeps the candidates
//! that are in range and not yet seen. The result is nearest-first, which
//! becomes enqueue order. Insertion order is the only priority the queue
//! has, so nearer pages tend to finish first.

use crate::state::LifecycleState;
use crate::store::SessionStore;

/// Forward lookahead over a session's items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlanner {
    depth: usize,
}

impl WindowPlanner {
    pub fn new(depth: usize) -> Self {
        Self { depth }
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Indices in `current+1 ..= current+depth` that are below `total` and
    /// still `NotStarted`, ascending.
    ///
    /// A `current` outside `0..total` yields an empty plan.
    pub fn plan<T>(
        &self,
        store: &SessionStore<T>,
        session: &str,
        current: usize,
        total: usize,
    ) -> Vec<usize> {
        self.candidates(current, total)
            .filter(|&index| store.status(session, index) == LifecycleState::NotStarted)
            .collect()
    }

    /// In-range candidates before status filtering
    pub fn candidates(&self, current: usize, total: usize) -> impl Iterator<Item = usize> {
        let in_range = current < total;
        (1..=self.depth)
            .map_while(move |offset| current.checked_add(offset))
            .take_while(move |&index| in_range && index < total)
    }
}
