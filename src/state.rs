//! Item lifecycle - the per-item state machine.
//!
//! Every prefetchable item moves through at most three states:
//!
//! ```text
//! NotStarted -> Processing -> Completed
//!                          \-> Failed
//! ```
//!
//! There is no way back. `Completed` and `Failed` are terminal until the
//! whole session is cleared.

use serde::Serialize;
use std::fmt;

/// Lifecycle state of one item within a session.
///
/// Ordered by progress so `a < b` means `b` is further along. `Completed`
/// and `Failed` are both terminal and compare by declaration order only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Never dequeued by a worker (absent, or waiting in the queue)
    #[default]
    NotStarted,
    /// A worker is running the pipeline for this item
    Processing,
    /// Result is stored and readable
    Completed,
    /// Pipeline failed; not retried automatically
    Failed,
}

impl LifecycleState {
    /// Whether `self -> next` is a legal transition.
    pub const fn can_transition_to(self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    /// No further transitions are possible.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a new prefetch request for this item would be redundant.
    #[inline]
    pub const fn is_settled_or_running(self) -> bool {
        !matches!(self, Self::NotStarted)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// All states, in lifecycle order
    pub fn all() -> impl Iterator<Item = Self> {
        [Self::NotStarted, Self::Processing, Self::Completed, Self::Failed].into_iter()
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
