use crossbeam_channel::{unbounded, Receiver, Sender};
use pageahead::config::DemoConfig;
use pageahead::demo::{read_through, scan_pages, PageSource, SimulatedPipeline};
use pageahead::{
    AnalysisPipeline, ContentRef, FnPipeline, LifecycleState, PipelineError, PreloadConfig,
    PreloadManager, PreloadStats,
};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SESSION: &str = "reader-1";

fn pages(n: usize) -> Vec<ContentRef> {
    (0..n).map(|i| ContentRef::from(format!("page{i:03}.png"))).collect()
}

fn config(max_workers: usize, lookahead_depth: usize) -> PreloadConfig {
    PreloadConfig {
        max_workers,
        lookahead_depth,
        ..PreloadConfig::default()
    }
}

/// Poll until `done` holds or five seconds pass.
fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

/// Pipeline that counts calls and echoes the content reference.
fn counting(calls: Arc<AtomicUsize>) -> impl AnalysisPipeline<Output = String> {
    FnPipeline::new(move |content: &ContentRef, language: &str| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, PipelineError>(format!("{content}/{language}"))
    })
}

/// Pipeline that reports each start on `started` and blocks until a token
/// arrives on `release`.
fn gated(
    started: Sender<String>,
    release: Receiver<()>,
) -> impl AnalysisPipeline<Output = String> {
    FnPipeline::new(move |content: &ContentRef, _: &str| {
        let _ = started.send(content.to_string());
        release
            .recv()
            .map_err(|_| PipelineError::Failed("gate closed".into()))?;
        Ok(content.to_string())
    })
}

#[test]
fn test_status_not_started_before_preload() {
    let manager = PreloadManager::new(config(2, 2), counting(Arc::default()));
    manager.start();

    for index in 0..5 {
        assert_eq!(manager.status(SESSION, index), LifecycleState::NotStarted);
        assert!(!manager.is_ready(SESSION, index));
        assert!(manager.get(SESSION, index).is_none());
    }
    assert_eq!(manager.stats(SESSION), PreloadStats::default());
}

#[test]
fn test_duplicate_preload_runs_pipeline_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let manager = PreloadManager::new(config(2, 2), counting(Arc::clone(&calls)));

    // Twice while queued
    assert!(manager.preload(SESSION, 1, "page1.png", "en-US"));
    assert!(!manager.preload(SESSION, 1, "page1.png", "en-US"));

    manager.start();
    assert!(wait_until(|| manager.is_ready(SESSION, 1)));

    // Again once completed
    assert!(!manager.preload(SESSION, 1, "page1.png", "en-US"));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_duplicate_preload_while_processing() {
    let (started_tx, started_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let manager = PreloadManager::new(config(2, 2), gated(started_tx, release_rx));
    manager.start();

    manager.preload(SESSION, 2, "page2.png", "en-US");
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(manager.status(SESSION, 2), LifecycleState::Processing);

    assert!(!manager.preload(SESSION, 2, "page2.png", "en-US"));
    assert_eq!(manager.pending(), 0);

    release_tx.send(()).unwrap();
    assert!(wait_until(|| manager.is_ready(SESSION, 2)));
    // No second invocation was started
    assert!(started_rx.try_recv().is_err());
}

#[test]
fn test_lifecycle_is_monotonic() {
    let (started_tx, started_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let manager = Arc::new(PreloadManager::new(config(1, 2), gated(started_tx, release_rx)));
    manager.start();
    manager.preload(SESSION, 0, "page0.png", "en-US");

    let observer = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            let mut seen = vec![manager.status(SESSION, 0)];
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                let state = manager.status(SESSION, 0);
                if state != *seen.last().unwrap() {
                    seen.push(state);
                }
                if state == LifecycleState::Completed {
                    break;
                }
            }
            seen
        })
    };

    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    thread::sleep(Duration::from_millis(10));
    release_tx.send(()).unwrap();

    let seen = observer.join().unwrap();
    assert!(seen.windows(2).all(|w| w[0].can_transition_to(w[1])), "{seen:?}");
    assert_eq!(seen.last(), Some(&LifecycleState::Completed));
}

#[test]
fn test_is_ready_iff_get_found() {
    let pipeline = FnPipeline::new(|content: &ContentRef, _: &str| {
        if content.as_str().ends_with("3.png") {
            Err(PipelineError::Failed("unreadable".into()))
        } else {
            Ok(content.to_string())
        }
    });
    let manager = PreloadManager::new(config(2, 4), pipeline);
    manager.start();
    manager.preload_window(SESSION, 0, &pages(6), "en-US");

    assert!(wait_until(|| manager.stats(SESSION).is_settled()));
    for index in 0..6 {
        assert_eq!(
            manager.is_ready(SESSION, index),
            manager.get(SESSION, index).is_some(),
            "index {index}"
        );
    }
    assert_eq!(manager.get(SESSION, 1).as_deref(), Some(&"page001.png".to_string()));
}

#[test]
fn test_plan_examples() {
    let manager = PreloadManager::new(config(1, 3), counting(Arc::default()));

    assert_eq!(manager.plan(SESSION, 2, 10), vec![3, 4, 5]);
    assert!(manager.plan(SESSION, 9, 10).is_empty());

    // Complete index 4
    manager.preload(SESSION, 4, "page4.png", "en-US");
    manager.start();
    assert!(wait_until(|| manager.is_ready(SESSION, 4)));
    assert_eq!(manager.plan(SESSION, 2, 10), vec![3, 5]);
}

#[test]
fn test_end_to_end_window_then_clear() {
    let items = pages(5);
    let manager = PreloadManager::new(PreloadConfig::default(), counting(Arc::default()));
    manager.start();

    assert_eq!(manager.preload_window(SESSION, 0, &items, "en-US"), vec![1, 2]);
    assert!(wait_until(|| manager.stats(SESSION).completed == 2));

    let stats = manager.stats(SESSION);
    assert_eq!(stats.total, 2);
    assert_eq!(stats.not_started, 0);
    assert_eq!(manager.status(SESSION, 0), LifecycleState::NotStarted);
    assert_eq!(manager.get(SESSION, 2).as_deref(), Some(&"page002.png/en-US".to_string()));

    manager.clear_session(SESSION);
    assert_eq!(manager.stats(SESSION), PreloadStats::default());
    assert!(manager.sessions().is_empty());
}

#[test]
fn test_failure_is_isolated() {
    let pipeline = FnPipeline::new(|content: &ContentRef, _: &str| {
        if content.as_str() == "page3.png" {
            return Err(PipelineError::Failed("vision model refused".into()));
        }
        Ok(content.to_string())
    });
    let manager = PreloadManager::new(config(1, 2), pipeline);
    manager.start();

    manager.preload(SESSION, 3, "page3.png", "en-US");
    manager.preload(SESSION, 4, "page4.png", "en-US");
    assert!(wait_until(|| manager.stats(SESSION).is_settled()));

    assert_eq!(manager.status(SESSION, 3), LifecycleState::Failed);
    assert_eq!(manager.status(SESSION, 4), LifecycleState::Completed);

    // Failed items are not retried by a later preload
    assert!(!manager.preload(SESSION, 3, "page3.png", "en-US"));

    // The pool keeps accepting work
    manager.preload(SESSION, 5, "page5.png", "en-US");
    assert!(wait_until(|| manager.is_ready(SESSION, 5)));
}

#[test]
fn test_unavailable_pipeline_marks_failed() {
    let pipeline = FnPipeline::new(|_: &ContentRef, _: &str| {
        Err::<String, _>(PipelineError::Unavailable("no vision key configured".into()))
    });
    let manager = PreloadManager::new(config(1, 2), pipeline);
    manager.start();
    manager.preload_window(SESSION, 0, &pages(3), "en-US");

    assert!(wait_until(|| manager.stats(SESSION).failed == 2));
    assert!(!manager.is_ready(SESSION, 1));
}

#[test]
fn test_requests_queued_while_stopped_drain_on_start() {
    let calls = Arc::new(AtomicUsize::new(0));
    let manager = PreloadManager::new(config(2, 3), counting(Arc::clone(&calls)));

    assert_eq!(manager.preload_window(SESSION, 0, &pages(10), "en-US"), vec![1, 2, 3]);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(manager.pending(), 3);
    assert_eq!(manager.stats(SESSION).not_started, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    manager.start();
    assert!(wait_until(|| manager.stats(SESSION).completed == 3));
    assert_eq!(manager.pending(), 0);
}

#[test]
fn test_stop_finishes_current_item() {
    let (started_tx, started_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let manager = Arc::new(PreloadManager::new(config(1, 2), gated(started_tx, release_rx)));
    manager.start();

    manager.preload(SESSION, 0, "page0.png", "en-US");
    manager.preload(SESSION, 1, "page1.png", "en-US");
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let stopper = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.stop())
    };
    thread::sleep(Duration::from_millis(20));
    assert!(!stopper.is_finished());

    release_tx.send(()).unwrap();
    assert!(stopper.join().unwrap());

    // In-flight item finished, the next one was not taken
    assert_eq!(manager.status(SESSION, 0), LifecycleState::Completed);
    assert_eq!(manager.status(SESSION, 1), LifecycleState::NotStarted);
    assert_eq!(manager.pending(), 1);

    // Restarting drains it without resubmission
    release_tx.send(()).unwrap();
    manager.start();
    assert!(wait_until(|| manager.is_ready(SESSION, 1)));
}

#[test]
fn test_max_workers_bounds_concurrency() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let pipeline = {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        FnPipeline::new(move |content: &ContentRef, _: &str| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(15));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(content.to_string())
        })
    };
    let manager = PreloadManager::new(config(3, 12), pipeline);
    manager.start();

    // Two sessions share the same pool
    manager.preload_window("a", 0, &pages(13), "en-US");
    manager.preload_window("b", 0, &pages(13), "en-US");

    assert!(wait_until(|| {
        manager.stats("a").completed == 12 && manager.stats("b").completed == 12
    }));
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak}");
    assert!(peak >= 2, "workers never overlapped");
}

#[test]
fn test_clear_session_skips_queued_requests() {
    let (started_tx, started_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let manager = PreloadManager::new(config(1, 3), gated(started_tx, release_rx));
    manager.start();

    manager.preload_window(SESSION, 0, &pages(4), "en-US");
    assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "page001.png");

    manager.clear_session(SESSION);
    release_tx.send(()).unwrap();

    // Item 1 was in flight: its result lands in a fresh, orphaned entry
    assert!(wait_until(|| manager.is_ready(SESSION, 1)));
    // Items 2 and 3 were still queued and are dropped
    assert!(wait_until(|| manager.pending() == 0));
    thread::sleep(Duration::from_millis(20));
    assert!(started_rx.try_recv().is_err());
    assert_eq!(manager.stats(SESSION).total, 1);

    manager.clear_session(SESSION);
    assert_eq!(manager.stats(SESSION), PreloadStats::default());
}

#[test]
fn test_item_timeout_holds_slot_until_call_returns() {
    let (release_tx, release_rx) = unbounded();
    let (started_tx, started_rx) = unbounded();
    let config = PreloadConfig {
        item_timeout: Some(Duration::from_millis(30)),
        ..config(1, 2)
    };
    let manager = PreloadManager::new(config, gated(started_tx, release_rx));
    manager.start();

    manager.preload_window(SESSION, 0, &pages(3), "en-US");
    assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "page001.png");
    assert!(wait_until(|| manager.stats(SESSION).failed == 1));

    // The hung call still occupies the only slot
    thread::sleep(Duration::from_millis(50));
    assert!(started_rx.try_recv().is_err());
    assert_eq!(manager.status(SESSION, 2), LifecycleState::NotStarted);
    assert_eq!(manager.pending(), 1);

    // Once it returns, the next item gets its turn and times out too
    release_tx.send(()).unwrap();
    assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "page002.png");
    assert!(wait_until(|| manager.stats(SESSION).failed == 2));

    // A worker waiting for a slot still stops promptly
    assert!(manager.stop());
    release_tx.send(()).unwrap();
}

#[test]
fn test_item_timeout_respects_max_workers() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let pipeline = {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        FnPipeline::new(move |content: &ContentRef, _: &str| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(80));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, PipelineError>(content.to_string())
        })
    };
    let config = PreloadConfig {
        item_timeout: Some(Duration::from_millis(10)),
        ..config(2, 8)
    };
    let manager = PreloadManager::new(config, pipeline);
    manager.start();

    assert_eq!(manager.preload_window(SESSION, 0, &pages(9), "en-US").len(), 8);
    assert!(wait_until(|| manager.stats(SESSION).failed == 8));
    assert!(wait_until(|| active.load(Ordering::SeqCst) == 0));

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency {peak}");
}

#[test]
fn test_stop_does_not_block_other_callers() {
    let (started_tx, started_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let manager = Arc::new(PreloadManager::new(config(1, 2), gated(started_tx, release_rx)));
    manager.start();

    manager.preload(SESSION, 0, "page0.png", "en-US");
    manager.preload(SESSION, 1, "page1.png", "en-US");
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let stopper = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.stop())
    };
    assert!(wait_until(|| !manager.is_running()));
    assert!(!stopper.is_finished());

    // A restart while the old pool drains still runs one call at a time
    assert!(manager.start());
    thread::sleep(Duration::from_millis(20));
    assert!(started_rx.try_recv().is_err());

    release_tx.send(()).unwrap();
    assert!(stopper.join().unwrap());
    assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "page1.png");
    release_tx.send(()).unwrap();
    assert!(wait_until(|| manager.is_ready(SESSION, 1)));
    assert_eq!(manager.status(SESSION, 0), LifecycleState::Completed);
}

#[test]
fn test_concurrent_foreground_callers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let manager = Arc::new(PreloadManager::new(config(2, 4), counting(Arc::clone(&calls))));
    manager.start();

    let items = Arc::new(pages(20));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let items = Arc::clone(&items);
            thread::spawn(move || {
                for current in 0..items.len() {
                    manager.preload_window(SESSION, current, &items, "en-US");
                    let _ = manager.get(SESSION, current);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(wait_until(|| manager.stats(SESSION).completed == 19));
    // Every index but 0 analyzed exactly once
    assert_eq!(calls.load(Ordering::SeqCst), 19);
}

#[test]
fn test_demo_read_through_directory() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..4 {
        fs::write(dir.path().join(format!("{i:03}.png")), b"not really a png").unwrap();
    }
    fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

    let found = scan_pages(dir.path());
    assert_eq!(found.len(), 4);
    assert!(found.windows(2).all(|w| w[0] < w[1]));

    let demo = DemoConfig {
        analyze_time: Duration::from_millis(5),
        read_time: Duration::from_millis(40),
        fail_every: 0,
    };
    let manager = PreloadManager::new(config(2, 2), SimulatedPipeline::new(&demo));
    let foreground = SimulatedPipeline::new(&demo);
    manager.start();

    let items: Vec<ContentRef> = found.into_iter().map(ContentRef::from).collect();
    let report = read_through(&manager, &foreground, SESSION, &items, "en-US", demo.read_time);

    assert_eq!(report.pages.len(), 4);
    // First page is never prefetched; later pages had time to finish
    assert_eq!(report.pages[0], PageSource::Synchronous);
    assert_eq!(report.count(PageSource::Prefetched), 3);
    assert_eq!(report.count(PageSource::Failed), 0);

    let analysis = manager.get(SESSION, 1).unwrap();
    assert_eq!(analysis.bytes, 16);
    assert_eq!(analysis.language, "en-US");
}
