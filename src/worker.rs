//! Worker pool - fixed set of background threads draining the request queue.
//!
//! Each worker takes a call slot, then one request, runs it to completion,
//! then takes the next. `CallSlots` holds one token per allowed pipeline
//! call across all sessions; a call abandoned by the timeout keeps its token
//! until it really returns.
//!
//! Key properties:
//! - A failed, panicking or timed-out item marks only that item `Failed`
//! - Stop is cooperative: the current item finishes, no new item is taken
//! - Requests left in the queue survive the pool and wait for the next one

use crate::error::PipelineError;
use crate::pipeline::AnalysisPipeline;
use crate::queue::{ContentRef, PrefetchRequest};
use crate::store::SessionStore;
use crossbeam_channel::{bounded, select_biased, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Budget of concurrent pipeline calls, shared by every pool of a manager.
///
/// The channel is pre-filled with one token per slot. Taking a token means
/// taking a slot; a `CallPermit` puts it back when dropped.
#[derive(Debug, Clone)]
pub struct CallSlots {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl CallSlots {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        let (tx, rx) = bounded(limit);
        for _ in 0..limit {
            let _ = tx.try_send(());
        }
        Self { tx, rx }
    }

    /// Slots free right now
    #[inline]
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    /// Wrap a token already received from `rx`.
    fn permit(&self) -> CallPermit {
        CallPermit {
            release: self.tx.clone(),
        }
    }
}

/// One taken call slot, returned on drop.
struct CallPermit {
    release: Sender<()>,
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        let _ = self.release.try_send(());
    }
}

/// What every worker needs, shared by reference count.
struct WorkerContext<P: AnalysisPipeline> {
    store: Arc<SessionStore<P::Output>>,
    pipeline: Arc<P>,
    slots: CallSlots,
    item_timeout: Option<Duration>,
}

impl<P: AnalysisPipeline> Clone for WorkerContext<P> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            pipeline: Arc::clone(&self.pipeline),
            slots: self.slots.clone(),
            item_timeout: self.item_timeout,
        }
    }
}

/// Running set of worker threads.
pub struct WorkerPool {
    /// Dropping this sender wakes every worker and tells it to exit
    shutdown: Option<Sender<()>>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` threads consuming `requests`, each call gated by `slots`.
    pub fn spawn<P: AnalysisPipeline>(
        workers: usize,
        requests: Receiver<PrefetchRequest>,
        slots: CallSlots,
        store: Arc<SessionStore<P::Output>>,
        pipeline: Arc<P>,
        item_timeout: Option<Duration>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let ctx = WorkerContext {
            store,
            pipeline,
            slots,
            item_timeout,
        };

        let handles: Vec<_> = (0..workers)
            .filter_map(|id| {
                let ctx = ctx.clone();
                let requests = requests.clone();
                let shutdown = shutdown_rx.clone();
                thread::Builder::new()
                    .name(format!("prefetch-worker-{id}"))
                    .spawn(move || worker_loop(id, ctx, requests, shutdown))
                    .map_err(|e| error!("worker pool: failed to spawn worker {id}: {e}"))
                    .ok()
            })
            .collect();

        if handles.len() < workers {
            warn!(
                "worker pool: running with {} of {} workers",
                handles.len(),
                workers
            );
        }

        Self {
            shutdown: Some(shutdown_tx),
            handles,
        }
    }

    /// Number of live worker threads
    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every worker to exit after its current item and wait for them.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        drop(self.shutdown.take());
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("worker pool: worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Main worker loop - runs until shutdown or until the queue is gone.
fn worker_loop<P: AnalysisPipeline>(
    id: usize,
    ctx: WorkerContext<P>,
    requests: Receiver<PrefetchRequest>,
    shutdown: Receiver<()>,
) {
    debug!("prefetch worker {id}: started");

    loop {
        // Shutdown is checked first so a stop wins over a free slot or a
        // waiting request.
        let slot = select_biased! {
            recv(shutdown) -> _ => None,
            recv(ctx.slots.rx) -> token => token.ok().map(|()| ctx.slots.permit()),
        };
        let Some(permit) = slot else {
            break;
        };
        let next = select_biased! {
            recv(shutdown) -> _ => None,
            recv(requests) -> msg => msg.ok(),
        };
        let Some(request) = next else {
            break;
        };
        process_request(id, &ctx, request, permit);
    }

    debug!("prefetch worker {id}: exiting");
}

/// Run one request to completion and record the outcome.
fn process_request<P: AnalysisPipeline>(
    id: usize,
    ctx: &WorkerContext<P>,
    request: PrefetchRequest,
    permit: CallPermit,
) {
    let PrefetchRequest {
        session,
        index,
        content,
        language,
        generation,
    } = request;

    if !ctx.store.claim(&session, index, generation) {
        debug!("prefetch worker {id}: dropping stale request {session}/{index}");
        return;
    }

    debug!("prefetch worker {id}: analyzing {session}/{index} ({content}, {language})");
    let started = Instant::now();

    match run_pipeline(&ctx.pipeline, &content, &language, ctx.item_timeout, permit) {
        Ok(output) => {
            if ctx.store.complete(&session, index, output) {
                info!(
                    "prefetch worker {id}: {session}/{index} ready in {:.1}ms",
                    started.elapsed().as_secs_f64() * 1000.0
                );
            } else {
                debug!("prefetch worker {id}: result for {session}/{index} discarded");
            }
        }
        Err(e) => {
            warn!("prefetch worker {id}: {session}/{index} failed: {e}");
            ctx.store.fail(&session, index);
        }
    }
}

/// Invoke the pipeline, bounded by `timeout` when one is configured.
///
/// On timeout the call keeps running on its own thread and keeps `permit`
/// until it returns; its result is dropped.
fn run_pipeline<P: AnalysisPipeline>(
    pipeline: &Arc<P>,
    content: &ContentRef,
    language: &str,
    timeout: Option<Duration>,
    permit: CallPermit,
) -> Result<P::Output, PipelineError> {
    let Some(limit) = timeout else {
        let result = call_pipeline(pipeline.as_ref(), content, language);
        drop(permit);
        return result;
    };

    let (tx, rx) = bounded(1);
    let pipeline = Arc::clone(pipeline);
    let content = content.clone();
    let language = language.to_string();
    thread::Builder::new()
        .name("prefetch-call".into())
        .spawn(move || {
            let result = call_pipeline(pipeline.as_ref(), &content, &language);
            drop(permit);
            let _ = tx.send(result);
        })
        .map_err(|e| PipelineError::Failed(format!("failed to spawn call thread: {e}")))?;

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(PipelineError::TimedOut(limit)),
        Err(RecvTimeoutError::Disconnected) => Err(PipelineError::Panicked(
            "call thread exited without a result".into(),
        )),
    }
}

fn call_pipeline<P: AnalysisPipeline>(
    pipeline: &P,
    content: &ContentRef,
    language: &str,
) -> Result<P::Output, PipelineError> {
    panic::catch_unwind(AssertUnwindSafe(|| pipeline.analyze(content, language)))
        .unwrap_or_else(|payload| Err(PipelineError::from_panic(payload.as_ref())))
}
