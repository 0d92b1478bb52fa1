//! Simulated reader - drives the prefetch cache the way a page-by-page
//! reading front end would.
//!
//! `SimulatedPipeline` stands in for the expensive analysis: it sleeps for
//! the configured time and summarizes the page file. `read_through` steps a
//! reader across every page, prefetching ahead on each step and analyzing
//! synchronously only when the prefetch has not finished.

use crate::config::DemoConfig;
use crate::error::PipelineError;
use crate::pipeline::AnalysisPipeline;
use crate::preload::PreloadManager;
use crate::queue::ContentRef;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Page image extensions (lowercase, no dot)
const PAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Output of the simulated analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageAnalysis {
    pub page: PathBuf,
    pub bytes: u64,
    pub language: String,
    pub summary: String,
}

/// Stand-in for the vision + speech pipeline.
pub struct SimulatedPipeline {
    analyze_time: Duration,
    /// Fail every Nth call (0 = never)
    fail_every: usize,
    calls: AtomicUsize,
}

impl SimulatedPipeline {
    pub fn new(config: &DemoConfig) -> Self {
        Self {
            analyze_time: config.analyze_time,
            fail_every: config.fail_every,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of analyses started so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl AnalysisPipeline for SimulatedPipeline {
    type Output = PageAnalysis;

    fn analyze(&self, content: &ContentRef, language: &str) -> Result<PageAnalysis, PipelineError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        thread::sleep(self.analyze_time);

        if self.fail_every > 0 && call % self.fail_every == 0 {
            return Err(PipelineError::Unavailable(format!(
                "simulated outage on call {call}"
            )));
        }

        let path = content.as_path();
        let bytes = fs::metadata(path)
            .map_err(|e| PipelineError::Failed(format!("{}: {e}", path.display())))?
            .len();
        if bytes == 0 {
            return Err(PipelineError::Malformed(format!("{} is empty", path.display())));
        }

        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(PageAnalysis {
            page: path.to_path_buf(),
            bytes,
            language: language.to_string(),
            summary: format!("{name}: {bytes} bytes narrated in {language}"),
        })
    }
}

/// Whether a path looks like a page image
pub fn is_page(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = ext.to_lowercase();
            PAGE_EXTENSIONS.iter().any(|&e| e == ext_lower)
        })
        .unwrap_or(false)
}

/// Scan a directory for page images, sorted by path
pub fn scan_pages(dir: &Path) -> Vec<PathBuf> {
    let mut pages: Vec<_> = walkdir::WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| is_page(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect();

    pages.sort();
    pages
}

/// How each page reached the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    /// Prefetched result was ready
    Prefetched,
    /// Analyzed on the spot
    Synchronous,
    /// Not available at all
    Failed,
}

/// Outcome of a simulated read-through.
#[derive(Debug, Default)]
pub struct ReadReport {
    pub pages: Vec<PageSource>,
    pub elapsed: Duration,
}

impl ReadReport {
    pub fn count(&self, source: PageSource) -> usize {
        self.pages.iter().filter(|&&s| s == source).count()
    }
}

/// Step through every page of a session like a reader would.
///
/// On each page: prefetch the window ahead, show the prefetched result if
/// ready, else analyze synchronously with `foreground`, then "read" for
/// `read_time`.
pub fn read_through<P, F>(
    manager: &PreloadManager<P>,
    foreground: &F,
    session: &str,
    pages: &[ContentRef],
    language: &str,
    read_time: Duration,
) -> ReadReport
where
    P: AnalysisPipeline,
    F: AnalysisPipeline<Output = P::Output>,
{
    let started = Instant::now();
    let mut report = ReadReport::default();

    for (index, page) in pages.iter().enumerate() {
        manager.preload_window(session, index, pages, language);

        let source = if manager.get(session, index).is_some() {
            debug!("reader: page {index} prefetched");
            PageSource::Prefetched
        } else {
            debug!(
                "reader: page {index} not ready ({}), analyzing now",
                manager.status(session, index)
            );
            match foreground.analyze(page, language) {
                Ok(_) => PageSource::Synchronous,
                Err(e) => {
                    info!("reader: page {index} unavailable: {e}");
                    PageSource::Failed
                }
            }
        };
        report.pages.push(source);
        info!("reader: page {index} {source:?} | {}", manager.stats(session));

        thread::sleep(read_time);
    }

    report.elapsed = started.elapsed();
    report
}
