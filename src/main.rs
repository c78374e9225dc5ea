//! Offline Capture Agent CLI
//!
//! Privacy-first, offline capture sessions.

use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use offline_capture_agent::{
    config::Config,
    core::{Orchestrator, RunReport, StopCause, WorkerDescriptor},
    environment::HostProbe,
    manifest::{resolve_run_id, Layout, Manifest},
    privacy::{PrivacyPolicy, Redactor},
    worker::{
        asr::AsrOptions, events::EventsOptions, ocr::OcrOptions, screenshots::ScreenshotOptions,
        video::VideoOptions, AsrWorker, CaptureWorker, EventsWorker, OcrWorker, ScreenshotWorker,
        VideoWorker, WorkerKind,
    },
    PRIVACY_DECLARATION, VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "capture-agent")]
#[command(version = VERSION)]
#[command(about = "Privacy-first offline capture sessions", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a capture session
    Run {
        /// Stop after this many minutes (0 runs until Ctrl+C)
        #[arg(long)]
        duration_minutes: Option<u64>,

        /// Print the resolved configuration and worker plan without capturing
        #[arg(long)]
        plan_only: bool,
    },

    /// Pause a running session
    Pause,

    /// Resume a paused session
    Resume,

    /// Show what each capture worker can do on this host
    Status,

    /// Display privacy declaration
    Privacy,

    /// Show configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config_file;

    match cli.command {
        Commands::Run {
            duration_minutes,
            plan_only,
        } => cmd_run(config_path.as_deref(), duration_minutes, plan_only),
        Commands::Pause => cmd_set_paused(config_path.as_deref(), true),
        Commands::Resume => cmd_set_paused(config_path.as_deref(), false),
        Commands::Status => cmd_status(config_path.as_deref()),
        Commands::Privacy => {
            println!("{PRIVACY_DECLARATION}");
            Ok(())
        }
        Commands::Config => cmd_config(config_path.as_deref()),
    }
}

/// Load the explicit file, or the default location with fallback to defaults.
fn load_config(explicit: Option<&Path>) -> Result<(Config, String)> {
    match explicit {
        Some(path) => {
            let config = Config::load_from(path)
                .with_context(|| format!("load config {}", path.display()))?;
            Ok((config, path.display().to_string()))
        }
        None => {
            let path = Config::config_path();
            let source = if path.exists() {
                path.display().to_string()
            } else {
                "<defaults>".to_string()
            };
            Ok((Config::load().context("load config")?, source))
        }
    }
}

fn save_config(config: &Config, explicit: Option<&Path>) -> Result<()> {
    match explicit {
        Some(path) => config.save_to(path),
        None => config.save(),
    }
    .context("save config")
}

/// Build every reference worker from configuration.
fn build_workers(config: &Config, host: &HostProbe) -> Result<Vec<(Arc<dyn CaptureWorker>, bool)>> {
    let capture = &config.capture;
    let redactor = Redactor::new(capture.events.redact_emails, &capture.events.redact_patterns)
        .context("build redactor")?;
    let privacy = PrivacyPolicy::new(
        &capture.privacy.allow_apps,
        &capture.privacy.allow_urls,
        capture.privacy.drop_unknown,
    );

    let events = EventsWorker::new(
        EventsOptions {
            fine_interval: capture.events.fine_interval,
            coarse_interval: capture.events.coarse_interval,
            redactor: redactor.clone(),
            privacy,
        },
        host.clone(),
    )?;
    let screenshots = ScreenshotWorker::new(
        ScreenshotOptions {
            interval: capture.screenshots.interval,
            max_per_minute: capture.screenshots.max_per_minute,
        },
        host.clone(),
    )?;
    let video = VideoWorker::new(
        VideoOptions {
            chunk: capture.video.chunk,
            format: capture.video.format.clone(),
        },
        host.clone(),
    )?;
    let asr = AsrWorker::new(
        AsrOptions {
            meeting_keywords: capture.asr.meeting_keywords.clone(),
            window_titles: capture.asr.window_titles.clone(),
            whisper_binary: capture.asr.whisper_binary.clone(),
            language: capture.asr.language.clone(),
            redactor: redactor.clone(),
        },
        host.clone(),
    )?;
    let ocr = OcrWorker::new(
        OcrOptions {
            languages: capture.ocr.languages.clone(),
            tesseract_binary: capture.ocr.tesseract_binary.clone(),
            redactor,
        },
        host.clone(),
    )?;

    Ok(vec![
        (Arc::new(events), capture.events.enabled),
        (Arc::new(screenshots), capture.screenshots.enabled),
        (Arc::new(video), capture.video.enabled),
        (Arc::new(asr), capture.asr.enabled),
        (Arc::new(ocr), capture.ocr.enabled),
    ])
}

fn orchestrator(config: &Config, layout: &Layout, duration: Duration) -> Result<Orchestrator> {
    let host = HostProbe::system();
    let mut orchestrator = Orchestrator::new(&layout.capture_log).with_duration(duration);
    for (worker, enabled) in build_workers(config, &host)? {
        let dest = layout.worker_dir(worker.kind());
        orchestrator = orchestrator.worker(worker, enabled, dest);
    }
    Ok(orchestrator)
}

fn cmd_run(config_path: Option<&Path>, duration_minutes: Option<u64>, plan_only: bool) -> Result<()> {
    let (mut config, source) = load_config(config_path)?;
    if let Some(minutes) = duration_minutes {
        config.capture.duration_minutes = minutes;
    }
    if let Err(e) = offline_capture_agent::logging::init(&config.logging.level, &config.logging.format) {
        eprintln!("Warning: logging not initialised: {e}");
    }
    info!(plan_only, runs_dir = %config.paths.runs_dir.display(), config_source = %source, "run command invoked");

    if plan_only {
        print_plan(&config, &source)?;
        return Ok(());
    }

    println!("Offline Capture Agent v{VERSION}");
    println!();

    // Filesystem setup and the final manifest write stay outside the runtime.
    let (layout, mut manifest) = prepare_run(&config, &source)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    let outcome = runtime.block_on(run_session(&config, &layout, config_path.map(Path::to_path_buf)));

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            let message = format!("{e:#}");
            manifest.status.summary = message.clone();
            manifest.status.state = offline_capture_agent::manifest::RunStatus::Failed;
            manifest.save(&layout.manifest).context("persist manifest")?;
            bail!("run capture session: {message}");
        }
    };

    let error = report.error.as_ref().map(|e| e.to_string());
    manifest.record_summary(&report.summary, error.as_deref());
    manifest.save(&layout.manifest).context("finalise manifest")?;

    print_report(&layout, &report);
    if let Some(err) = error {
        bail!("run capture session: {err}");
    }
    Ok(())
}

/// Allocate the run directory and write the initial manifest.
fn prepare_run(config: &Config, source: &str) -> Result<(Layout, Manifest)> {
    let runs_dir = &config.paths.runs_dir;
    std::fs::create_dir_all(runs_dir)
        .with_context(|| format!("ensure runs directory {}", runs_dir.display()))?;
    let run_id = resolve_run_id(runs_dir, Utc::now()).context("resolve run id")?;
    let layout = Layout::new(runs_dir, &run_id);
    layout.ensure().context("prepare run filesystem")?;

    let mut manifest = Manifest::new(&run_id, Utc::now(), config, source, &layout);
    manifest.save(&layout.manifest).context("write manifest")?;
    manifest.mark_running();
    manifest.save(&layout.manifest).context("update manifest status")?;
    Ok((layout, manifest))
}

async fn run_session(config: &Config, layout: &Layout, config_path: Option<PathBuf>) -> Result<RunReport> {
    let orchestrator = orchestrator(config, layout, config.capture.duration())?;
    let controller = orchestrator.controller();

    // Ctrl+C requests a stop; workers finish with their outcome recorded.
    let stopper = controller.clone();
    ctrlc::set_handler(move || {
        stopper.kill(Some(StopCause::Stopped));
    })
    .context("set Ctrl+C handler")?;

    // Support pause/resume from another process by polling the config file.
    let mut paused = config.paused;
    if paused {
        controller.pause();
        println!("Session is currently paused.");
        println!("Run `capture-agent resume` to start capturing.");
        println!();
    }
    let poll_stop = CancellationToken::new();
    let poller = {
        let controller = controller.clone();
        let poll_stop = poll_stop.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = poll_stop.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let path = config_path.clone();
                let cfg = match tokio::task::spawn_blocking(move || load_config(path.as_deref())).await {
                    Ok(Ok((cfg, _))) => cfg,
                    Ok(Err(e)) => {
                        warn!(error = %e, "config reload failed");
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "config reload task failed");
                        continue;
                    }
                };
                if cfg.paused != paused {
                    paused = cfg.paused;
                    if paused {
                        println!("Pausing capture...");
                        controller.pause();
                    } else {
                        println!("Resuming capture...");
                        controller.resume();
                    }
                }
            }
        })
    };

    println!("Run directory: {}", layout.root.display());
    println!("Press Ctrl+C to stop");
    println!();

    let outcome = orchestrator.run(CancellationToken::new()).await;
    poll_stop.cancel();
    let _ = poller.await;
    outcome.context("run orchestrator")
}

fn print_plan(config: &Config, source: &str) -> Result<()> {
    println!("Resolved configuration (source: {source})");
    println!("  runs_dir: {}", config.paths.runs_dir.display());
    println!("  capture.duration_minutes: {}", config.capture.duration_minutes);
    println!("  logging.level: {}", config.logging.level);
    println!("  logging.format: {}", config.logging.format);
    println!();
    println!("Worker plan:");
    let layout = Layout::new(&config.paths.runs_dir, "<run_id>");
    for descriptor in orchestrator(config, &layout, Duration::ZERO)?.plan() {
        print_descriptor(&descriptor);
    }
    Ok(())
}

fn print_descriptor(d: &WorkerDescriptor) {
    print!(
        "  - {}: enabled={} available={} provider={} permission={}",
        d.kind, d.enabled, d.available, d.provider, d.permission
    );
    if !d.message.is_empty() {
        print!(" ({})", d.message);
    }
    println!();
}

fn print_report(layout: &Layout, report: &RunReport) {
    let summary = &report.summary;
    println!("Run directory: {}", layout.root.display());
    println!("Manifest: {}", layout.manifest.display());
    println!("Capture log: {}", layout.capture_log.display());
    println!();

    println!("Worker outcomes:");
    for outcome in &summary.outcomes {
        print!(
            "  - {}: state={} enabled={} available={} provider={} permission={}",
            outcome.kind,
            outcome.state.as_str(),
            outcome.enabled,
            outcome.available,
            outcome.provider,
            outcome.permission
        );
        if !outcome.message.is_empty() {
            print!(" ({})", outcome.message);
        }
        println!();
    }

    for kind in WorkerKind::ALL {
        if let Some(result) = summary.result(kind) {
            println!("{kind}: {}", result.message);
        }
    }
    println!();

    let lifecycle = &summary.lifecycle;
    let ended = lifecycle
        .finished_at
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string());
    let termination = lifecycle.termination_cause.map_or("unknown", |c| c.as_str());
    let elapsed = summary
        .duration_secs()
        .map_or_else(|| "-".to_string(), |secs| format!("{secs}s"));
    println!(
        "Lifecycle: started {}, ended {ended}, elapsed {elapsed} (termination: {termination})",
        lifecycle.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    if !lifecycle.controller_timeline.is_empty() {
        println!("  Controller timeline:");
        for entry in &lifecycle.controller_timeline {
            println!(
                "    - {} -> {} ({})",
                entry.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                entry.state,
                entry.reason
            );
        }
    }
}

fn cmd_set_paused(config_path: Option<&Path>, paused: bool) -> Result<()> {
    let (mut config, _) = load_config(config_path)?;
    config.paused = paused;
    save_config(&config, config_path)?;
    if paused {
        println!("Capture paused. Use 'capture-agent resume' to continue.");
    } else {
        println!("Capture resumed.");
    }
    Ok(())
}

fn cmd_status(config_path: Option<&Path>) -> Result<()> {
    let (config, source) = load_config(config_path)?;

    println!("Offline Capture Agent Status");
    println!("============================");
    println!();
    println!("Configuration: {source}");
    println!("  Paused: {}", config.paused);
    println!();

    println!("Capture workers:");
    let host = HostProbe::system();
    for (worker, enabled) in build_workers(&config, &host)? {
        let env = worker.detect_environment();
        print_descriptor(&WorkerDescriptor::new(worker.kind(), enabled, &env));
    }
    Ok(())
}

fn cmd_config(config_path: Option<&Path>) -> Result<()> {
    let (config, source) = load_config(config_path)?;
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::config_path);

    println!("Configuration file: {}", path.display());
    println!("Source: {source}");
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).context("render config")?
    );
    Ok(())
}
