//! Pageahead demo - read through a directory of page images with background
//! prefetching.

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use pageahead::config::{CliOverrides, ConfigFile};
use pageahead::demo::{read_through, scan_pages, PageSource, SimulatedPipeline};
use pageahead::{ContentRef, PreloadManager};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pageahead")]
#[command(about = "Simulate a reader with background page prefetching", long_about = None)]
struct Args {
    /// Directory of page images
    #[arg(default_value = ".")]
    directory: PathBuf,

    /// Background worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Pages to prefetch ahead of the current one
    #[arg(long)]
    lookahead: Option<usize>,

    /// Language code passed to the pipeline
    #[arg(long)]
    lang: Option<String>,

    /// Per-item timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Simulated analysis time per page in milliseconds
    #[arg(long)]
    analyze_ms: Option<u64>,

    /// Simulated reading time per page in milliseconds
    #[arg(long)]
    read_ms: Option<u64>,

    /// Make every Nth analysis fail
    #[arg(long)]
    fail_every: Option<usize>,

    /// Config file (defaults to $XDG_CONFIG_HOME/pageahead/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output file path (logs go to stderr otherwise)
    #[arg(long)]
    log: Option<PathBuf>,
}

fn init_logging(log: Option<&PathBuf>) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    );
    if let Some(path) = log {
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log.as_ref())?;

    let dir = args
        .directory
        .canonicalize()
        .with_context(|| format!("cannot access directory '{}'", args.directory.display()))?;
    if !dir.is_dir() {
        bail!("'{}' is not a directory", dir.display());
    }

    let mut file = ConfigFile::load_or_default(args.config.as_deref())?;
    file.merge_cli(CliOverrides {
        max_workers: args.workers,
        lookahead_depth: args.lookahead,
        item_timeout_ms: args.timeout_ms,
        language: args.lang,
        analyze_ms: args.analyze_ms,
        read_ms: args.read_ms,
        fail_every: args.fail_every,
    });
    let config = file.resolve();

    let pages: Vec<ContentRef> = scan_pages(&dir).into_iter().map(ContentRef::from).collect();
    if pages.is_empty() {
        bail!("no page images found in '{}'", dir.display());
    }
    info!("found {} pages in {}", pages.len(), dir.display());

    let manager = PreloadManager::new(config.preload.clone(), SimulatedPipeline::new(&config.demo));
    let foreground = SimulatedPipeline::new(&config.demo);
    manager.start();

    let session = format!("demo-{}", std::process::id());
    let language = config.preload.default_language.clone();
    let report = read_through(
        &manager,
        &foreground,
        &session,
        &pages,
        &language,
        config.demo.read_time,
    );

    println!(
        "read {} pages in {:.2}s: {} prefetched, {} analyzed on demand, {} failed",
        report.pages.len(),
        report.elapsed.as_secs_f64(),
        report.count(PageSource::Prefetched),
        report.count(PageSource::Synchronous),
        report.count(PageSource::Failed),
    );
    println!("preload stats: {}", manager.stats(&session));

    manager.clear_session(&session);
    manager.stop();
    Ok(())
}
