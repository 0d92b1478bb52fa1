//! Pageahead - a session-scoped background prefetch cache.
//!
//! Architecture overview:
//! - `SessionStore` keeps per-session item states and results behind one lock
//! - `WindowPlanner` picks the next few items to analyze, nearest first
//! - `RequestQueue` is a shared FIFO fed by the foreground, drained by
//!   `WorkerPool` threads that call the `AnalysisPipeline`
//! - `PreloadManager` ties it together; the foreground only ever enqueues
//!   or reads, it never waits for background work

pub mod config;
pub mod demo;
pub mod error;
pub mod pipeline;
pub mod planner;
pub mod preload;
pub mod queue;
pub mod state;
pub mod stats;
pub mod store;
pub mod worker;

pub use config::{Config, PreloadConfig};
pub use error::{ConfigError, PipelineError};
pub use pipeline::{AnalysisPipeline, FnPipeline};
pub use planner::WindowPlanner;
pub use preload::PreloadManager;
pub use queue::{ContentRef, PrefetchRequest, RequestQueue};
pub use state::LifecycleState;
pub use stats::PreloadStats;
pub use store::{SessionId, SessionStore};
pub use worker::{CallSlots, WorkerPool};
