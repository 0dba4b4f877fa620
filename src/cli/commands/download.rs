//! Batch download commands and the console progress sink.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};

use crate::cache::LookupCache;
use crate::config::Config;
use crate::db;
use crate::engine::{CoverFetcher, EngineConfig, Ffmpeg, FetchEngine};
use crate::enrichment::{LyricsClient, MusicBrainzClient};
use crate::guard::{CircuitBreaker, RateLimiter};
use crate::input;
use crate::model::TrackDescriptor;
use crate::orchestrator::{BatchReport, ControlSignals, Orchestrator, OrchestratorConfig};
use crate::progress::{BatchPreview, LogLevel, ProgressSink, TaskId, format_bytes};
use crate::provider::{ProxyPool, ProxyProvider, YtDlp, validate_cookies_file};
use crate::resolver::{Resolver, ResolverConfig};
use crate::state::StateStore;

/// Progress sink for terminal runs.
///
/// Events go to `tracing`. Once the batch is confirmed, stdin lines drive
/// the controls: `p` toggles pause, `s` skips the next track, `q` quits.
/// Lines are read on a detached thread, so a pending read never holds up
/// runtime shutdown.
pub struct ConsoleSink {
    signals: ControlSignals,
    next_task: AtomicU64,
    done: AtomicU64,
    total: AtomicU64,
    controls_started: AtomicBool,
}

impl ConsoleSink {
    pub fn new(signals: ControlSignals) -> Self {
        Self {
            signals,
            next_task: AtomicU64::new(1),
            done: AtomicU64::new(0),
            total: AtomicU64::new(0),
            controls_started: AtomicBool::new(false),
        }
    }

    /// Start listening for control commands on stdin. Only the first call
    /// has any effect.
    pub fn start_controls(&self) {
        if self.controls_started.swap(true, Ordering::SeqCst) {
            return;
        }
        println!("Controls: [p] pause/resume  [s] skip next  [q] quit  (then Enter)");

        let signals = self.signals.clone();
        let spawned = std::thread::Builder::new()
            .name("stdin-controls".into())
            .spawn(move || read_controls(std::io::stdin().lock(), &signals));
        if let Err(e) = spawned {
            warn!(target: "batch", error = %e, "could not start keyboard controls");
        }
    }
}

/// Apply control lines from `input` until it ends or `q` arrives.
fn read_controls(input: impl BufRead, signals: &ControlSignals) {
    for line in input.lines() {
        let Ok(line) = line else {
            break;
        };
        match line.trim() {
            "p" => {
                if signals.toggle_pause() {
                    info!(target: "batch", "paused");
                } else {
                    info!(target: "batch", "resumed");
                }
            }
            "s" => {
                signals.request_skip();
                info!(target: "batch", "skipping next track");
            }
            "q" => {
                signals.quit();
                break;
            }
            "" => {}
            other => debug!(target: "batch", command = other, "unknown control"),
        }
    }
}

impl ProgressSink for ConsoleSink {
    fn task_created(&self, label: &str) -> TaskId {
        let id = self.next_task.fetch_add(1, Ordering::Relaxed);
        debug!(target: "batch", task = id, "{label}");
        id
    }

    fn task_status(&self, task: TaskId, status: &str) {
        debug!(target: "batch", task, "{status}");
    }

    fn advance(&self, n: u64) {
        let done = self.done.fetch_add(n, Ordering::Relaxed) + n;
        match self.total.load(Ordering::Relaxed) {
            0 => info!(target: "batch", done, "progress"),
            total => info!(target: "batch", done, total, "progress"),
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!(target: "batch", "{message}"),
            LogLevel::Info => info!(target: "batch", "{message}"),
            LogLevel::Success => info!(target: "batch", success = true, "{message}"),
            LogLevel::Warning => warn!(target: "batch", "{message}"),
            LogLevel::Error => error!(target: "batch", "{message}"),
        }
    }

    fn confirm(&self, preview: &BatchPreview) -> bool {
        self.total.store(preview.pending as u64, Ordering::Relaxed);
        print_preview(preview);
        print!("Start? [Y/n] ");
        if let Err(e) = std::io::stdout().flush() {
            warn!(target: "batch", error = %e, "could not flush prompt");
        }

        let mut answer = String::new();
        let confirmed = match std::io::stdin().lock().read_line(&mut answer) {
            Ok(0) | Err(_) => false,
            Ok(_) => is_yes(&answer),
        };
        if confirmed {
            self.start_controls();
        }
        confirmed
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "" | "y" | "yes")
}

fn print_preview(preview: &BatchPreview) {
    println!();
    println!("Batch");
    println!("=====");
    println!("Tracks:        {}", preview.total);
    println!("Already done:  {}", preview.already_done);
    println!("To download:   {}", preview.pending);
    println!("Mode:          {}", preview.mode);
    if !preview.sample.is_empty() {
        println!();
        for name in &preview.sample {
            println!("  • {}", name);
        }
        if preview.pending > preview.sample.len() {
            println!("  ... and {} more", preview.pending - preview.sample.len());
        }
    }
    println!();
}

/// Download every track in `files`.
pub fn cmd_download(
    rt: &Runtime,
    config: &Config,
    files: &[PathBuf],
    yes: bool,
) -> anyhow::Result<()> {
    let tracks = input::collect_tracks(files)?;
    if tracks.is_empty() {
        println!("No tracks found in the given files.");
        return Ok(());
    }
    println!(
        "Loaded {} unique tracks from {} file(s)",
        tracks.len(),
        files.len()
    );

    let report = rt.block_on(run_batch(config, tracks, yes))?;
    print_report(&report);
    Ok(())
}

/// Re-run the tracks listed in the failed-tracks CSV.
pub fn cmd_retry(rt: &Runtime, config: &Config, yes: bool) -> anyhow::Result<()> {
    let path = &config.paths.failed_csv;
    if !path.is_file() {
        println!("Nothing to retry: {} not found", path.display());
        return Ok(());
    }

    let tracks = input::read_playlist(path)?;
    if tracks.is_empty() {
        println!("Nothing to retry: {} is empty", path.display());
        return Ok(());
    }
    println!("Retrying {} failed track(s) from {}", tracks.len(), path.display());

    let report = rt.block_on(run_batch(config, tracks, yes))?;
    if report.started && report.failed == 0 && !report.interrupted {
        remove_stale(path);
        remove_stale(&config.paths.failed_report);
    }
    print_report(&report);
    Ok(())
}

/// Remove an export that no longer applies. A missing file is fine.
fn remove_stale(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(target: "batch", path = %path.display(), "removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(target: "batch", path = %path.display(), error = %e, "could not remove"),
    }
}

/// Wire the pipeline from `config` and run one batch.
async fn run_batch(
    config: &Config,
    tracks: Vec<TrackDescriptor>,
    yes: bool,
) -> anyhow::Result<BatchReport> {
    let pool = db::init_db(&db::db_url(Some(&config.paths.state_db))).await?;
    let state = StateStore::new(pool.clone());
    let cache = LookupCache::new(pool);

    let net = &config.network;
    let provider = Arc::new(YtDlp::new(Duration::from_secs(net.socket_timeout_secs)));
    let limiter = Arc::new(RateLimiter::new(
        Duration::from_millis(net.rate_limit_min_ms),
        Duration::from_millis(net.rate_limit_max_ms),
    ));
    let breaker = Arc::new(CircuitBreaker::new(
        net.breaker_threshold,
        Duration::from_secs(net.breaker_cooldown_secs),
    ));

    let mut resolver = Resolver::new(
        provider.clone(),
        cache,
        limiter,
        ResolverConfig::from(&config.search),
    );

    let download = &config.download;
    let mut engine = FetchEngine::new(
        provider,
        Arc::new(Ffmpeg::new()),
        EngineConfig::from(config),
    );
    if download.embed_cover {
        engine = engine.with_covers(Arc::new(CoverFetcher::new(
            download.cover_max_px,
            download.cover_jpeg_quality,
        )));
    }
    if download.embed_lyrics {
        engine = engine.with_lyrics(Arc::new(LyricsClient::new()));
    }
    if download.fetch_credits {
        engine = engine.with_credits(Arc::new(MusicBrainzClient::new()));
    }

    if let Some(proxies) = load_proxies(config) {
        resolver = resolver.with_proxies(proxies.clone());
        engine = engine.with_proxies(proxies);
    }
    let cookies = &config.paths.cookies_file;
    if cookies.is_file() {
        if validate_cookies_file(cookies) {
            info!(target: "cli", path = %cookies.display(), "using cookies");
            resolver = resolver.with_cookies(cookies.clone());
            engine = engine.with_cookies(cookies.clone());
        } else {
            warn!(target: "cli", path = %cookies.display(), "cookie file is not in Netscape format, ignoring");
        }
    }

    let signals = ControlSignals::new();
    let sink = Arc::new(ConsoleSink::new(signals.clone()));

    let mut orchestrator_config = OrchestratorConfig::from(config);
    orchestrator_config.assume_yes = yes;
    if yes {
        sink.start_controls();
    }

    let quit_on_interrupt = signals.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(target: "cli", "interrupt received, stopping");
            quit_on_interrupt.quit();
        }
    });

    let orchestrator = Orchestrator::new(
        state,
        Arc::new(resolver),
        Arc::new(engine),
        breaker,
        sink,
        orchestrator_config,
    )
    .with_signals(signals);

    let report = orchestrator.run(tracks).await;
    ctrl_c.abort();
    Ok(report?)
}

fn load_proxies(config: &Config) -> Option<Arc<dyn ProxyProvider>> {
    if !config.network.use_proxies {
        return None;
    }
    let path = &config.paths.proxies_file;
    match ProxyPool::from_file(path) {
        Ok(pool) if !pool.is_empty() => {
            info!(target: "cli", count = pool.len(), "proxies loaded");
            Some(Arc::new(pool))
        }
        Ok(_) => {
            warn!(target: "cli", path = %path.display(), "proxy file is empty");
            None
        }
        Err(e) => {
            warn!(target: "cli", path = %path.display(), error = %e, "could not read proxy file");
            None
        }
    }
}

fn print_report(report: &BatchReport) {
    if !report.started {
        return;
    }
    println!();
    println!("Summary");
    println!("=======");
    println!("  ✓ Downloaded:  {}", report.succeeded);
    println!("  - Skipped:     {}", report.skipped());
    println!("  ✗ Failed:      {}", report.failed);
    println!("  Written:       {}", format_bytes(report.bytes));
    if report.suspect > 0 {
        println!("  ? Suspect HQ:  {}", report.suspect);
    }
    if report.interrupted {
        println!(
            "  Interrupted:   {} not started, {} cancelled",
            report.remaining, report.cancelled
        );
    }
    if !report.failed_tracks.is_empty() {
        println!();
        println!("Failed tracks:");
        for entry in report.failed_tracks.iter().take(10) {
            println!("  {} - {}", entry.track.display_name(), entry.error);
        }
        if report.failed_tracks.len() > 10 {
            println!("  ... and {} more", report.failed_tracks.len() - 10);
        }
        println!("Run `resonance retry` to try them again.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("\n"));
        assert!(is_yes("Y\n"));
        assert!(is_yes(" yes "));
        assert!(!is_yes("n\n"));
        assert!(!is_yes("nope"));
    }

    #[test]
    fn test_console_sink_counts_tasks() {
        let sink = ConsoleSink::new(ControlSignals::new());
        let first = sink.task_created("Artist - Song");
        let second = sink.task_created("Artist - Other");
        assert_eq!(second, first + 1);

        sink.advance(2);
        assert_eq!(sink.done.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_read_controls_drives_signals() {
        let signals = ControlSignals::new();
        read_controls(std::io::Cursor::new("p\nbogus\ns\n"), &signals);
        assert!(signals.is_paused());
        assert!(signals.take_skip());
        assert!(!signals.is_quit());

        read_controls(std::io::Cursor::new("p\nq\np\n"), &signals);
        assert!(!signals.is_paused());
        assert!(signals.is_quit());
    }

    #[test]
    fn test_runtime_shutdown_not_blocked_by_controls() {
        let rt = Runtime::new().unwrap();
        let sink = ConsoleSink::new(ControlSignals::new());
        rt.block_on(async { sink.start_controls() });

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            drop(rt);
            let _ = done_tx.send(());
        });
        assert!(
            done_rx.recv_timeout(Duration::from_secs(5)).is_ok(),
            "runtime drop waited on the stdin reader"
        );
    }

    #[test]
    fn test_remove_stale_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.csv");
        remove_stale(&path);

        std::fs::write(&path, "x").unwrap();
        remove_stale(&path);
        assert!(!path.exists());
    }

    #[test]
    fn test_load_proxies_honours_toggle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        std::fs::write(&path, "# pool\nhttp://10.0.0.1:8080\n\nhttp://10.0.0.2:8080\n").unwrap();

        let mut config = Config::default();
        config.paths.proxies_file = path;
        config.network.use_proxies = false;
        assert!(load_proxies(&config).is_none());

        config.network.use_proxies = true;
        assert!(load_proxies(&config).is_some());
    }

    #[test]
    fn test_load_proxies_missing_or_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.network.use_proxies = true;
        config.paths.proxies_file = dir.path().join("missing.txt");
        assert!(load_proxies(&config).is_none());

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "# nothing yet\n").unwrap();
        config.paths.proxies_file = empty;
        assert!(load_proxies(&config).is_none());
    }
}
