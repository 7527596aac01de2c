//! transpool - translation job scheduler

mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use owo_colors::{OwoColorize, Stream::Stdout, Stream::Stderr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cli::{Cli, Commands, ProbeArgs, RunArgs, WorkerArgs, WorkerMode};
use transpool::gateway::{GatewayStats, LineGateway};
use transpool::probe::{ResourceProbe, SystemProbe};
use transpool::scheduler::{
    Coordinator, MetricsSnapshot, SchedulerHandle, SharedMetrics, StatsPoller,
};
use transpool::worker::{ProcessSpawner, ThreadSpawner, WorkerSpawner, worker_main};

/// Program entry point: parses CLI arguments, sets up logging, dispatches the
/// selected command and prints the error chain on failure.
fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }

    transpool::logging::init(cli.log_config());

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(&cli, args),
        Commands::Probe(args) => cmd_probe(args),
        Commands::Completions(args) => {
            args.generate();
            Ok(())
        }
        Commands::Worker(args) => cmd_worker(args),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        // Print the error chain if there are causes
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// What ended the supervision loop.
enum Event {
    InputClosed(transpool::error::Result<GatewayStats>),
    Interrupted,
}

/// Serve jobs from stdin until EOF or Ctrl+C.
///
/// Replies go to stdout as `<line>\t<text>`. After EOF, outstanding jobs get
/// up to `--drain-timeout` to finish before the workers are stopped.
fn cmd_run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let config = args.to_config();
    let spec = args.translator.to_spec()?;

    let probe: Arc<dyn ResourceProbe> = Arc::new(SystemProbe::default());
    let spawner: Box<dyn WorkerSpawner> = match args.worker_mode {
        WorkerMode::Process => Box::new(
            ProcessSpawner::current(spec.clone())?
                .with_idle(config.worker_idle)
                .with_log_filter(Some(cli.log_config().effective_filter())),
        ),
        WorkerMode::Thread => Box::new(
            ThreadSpawner::new(Arc::from(spec.build()), config.queue_capacity as usize)
                .with_idle(config.worker_idle),
        ),
    };

    let coordinator = Coordinator::new(config.clone(), Arc::clone(&probe), spawner)
        .context("Invalid scheduler configuration")?;
    tracing::info!(
        cores = coordinator.total_cores(),
        capacity = config.queue_capacity,
        max_cpu = config.max_cpu_percent,
        max_ram = config.max_ram_percent,
        translator = %spec.label(),
        mode = ?args.worker_mode,
        "Scheduler starting"
    );

    let metrics = Arc::new(SharedMetrics::new());
    let mut handle = SchedulerHandle::start(coordinator, Arc::clone(&metrics))?;
    let mut poller = StatsPoller::start(
        Arc::clone(&probe),
        Arc::clone(&metrics),
        config.stats_interval,
    )?;

    let (event_tx, event_rx) = crossbeam_channel::unbounded();

    // Set up Ctrl+C handler
    let interrupt_tx = event_tx.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, shutting down...");
        let _ = interrupt_tx.send(Event::Interrupted);
    })
    .context("Error setting Ctrl+C handler")?;

    let submitter = handle.submitter();
    std::thread::Builder::new()
        .name("gateway".to_string())
        .spawn(move || {
            let mut gateway = LineGateway::new(std::io::stdin().lock(), std::io::stdout());
            let _ = event_tx.send(Event::InputClosed(gateway.run(&submitter)));
        })
        .context("Failed to spawn gateway thread")?;

    let started = Instant::now();
    let event = loop {
        match event_rx.recv_timeout(config.health_check_interval) {
            Ok(event) => break event,
            Err(RecvTimeoutError::Timeout) => {
                check_health(started.elapsed(), config.startup_delay, || handle.is_alive())?;
                tracing::trace!(metrics = ?metrics.snapshot(), "Health check");
            }
            Err(RecvTimeoutError::Disconnected) => break Event::Interrupted,
        }
    };

    match event {
        Event::InputClosed(Ok(stats)) => {
            tracing::info!(
                submitted = stats.submitted,
                rejected = stats.rejected,
                "Input closed, waiting for outstanding jobs"
            );
            drain_outstanding(&handle, args.drain_timeout);
        }
        Event::InputClosed(Err(e)) => {
            tracing::warn!(error = %e, "Gateway stopped, waiting for outstanding jobs");
            drain_outstanding(&handle, args.drain_timeout);
        }
        Event::Interrupted => {}
    }

    handle.shutdown()?;
    poller.shutdown();
    log_final_metrics(&metrics.snapshot());
    Ok(())
}

/// Fail once the scheduler has died, but only after the startup grace period.
fn check_health(
    elapsed: Duration,
    startup_delay: Duration,
    is_alive: impl FnOnce() -> bool,
) -> Result<()> {
    if elapsed >= startup_delay && !is_alive() {
        bail!("scheduler thread stopped unexpectedly");
    }
    Ok(())
}

/// Give jobs already submitted up to `timeout_secs` to be answered.
fn drain_outstanding(handle: &SchedulerHandle, timeout_secs: u64) {
    match handle.drain(Duration::from_secs(timeout_secs)) {
        Ok(true) => {}
        Ok(false) => tracing::warn!(timeout_secs, "Jobs still pending after drain timeout"),
        Err(e) => tracing::warn!(error = %e, "Could not drain outstanding jobs"),
    }
}

fn log_final_metrics(m: &MetricsSnapshot) {
    tracing::info!(
        completed = m.completed,
        rejected_overloaded = m.rejected_overloaded,
        rejected_busy = m.rejected_busy,
        dispatch_failures = m.dispatch_failures,
        orphaned = m.orphaned,
        timed_out = m.timed_out,
        degraded_checks = m.degraded_checks,
        avg_latency_secs = m.avg_latency_secs,
        "Scheduler stopped"
    );
}

/// Print one resource snapshot.
fn cmd_probe(args: &ProbeArgs) -> Result<()> {
    let probe = SystemProbe::new(Duration::from_millis(args.sample_ms));
    let snapshot = probe.snapshot().context("Failed to read system resources")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let header = |text: &'static str| text.if_supports_color(Stdout, |t| t.bold()).to_string();
    println!("{:<8} {:>6.1}%", header("Memory"), snapshot.memory_percent);
    println!("{:<8} {:>6.1}%", header("CPU"), snapshot.cpu_percent);
    println!("{:<8} {}", header("Cores"), snapshot.total_cores);
    for (core, usage) in snapshot.per_core.iter().enumerate() {
        let value = format!("{:>6.1}%", usage);
        let value = if *usage >= transpool::config::DEFAULT_MAX_CPU_PERCENT {
            value.if_supports_color(Stdout, |t| t.red()).to_string()
        } else {
            value.if_supports_color(Stdout, |t| t.green()).to_string()
        };
        println!("  core {:<3} {}", core, value);
    }
    Ok(())
}

/// Entry point of a worker subprocess. Never returns.
fn cmd_worker(args: &WorkerArgs) -> Result<()> {
    let spec = args.translator.to_spec()?;
    worker_main::run_worker_main(args.core, spec, Duration::from_millis(args.idle_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_health_not_checked_during_startup() {
        let asked = Cell::new(false);
        let result = check_health(Duration::from_secs(1), Duration::from_secs(25), || {
            asked.set(true);
            false
        });
        assert!(result.is_ok());
        assert!(!asked.get());
    }

    #[test]
    fn test_live_scheduler_is_healthy() {
        assert!(check_health(Duration::from_secs(30), Duration::from_secs(25), || true).is_ok());
    }

    #[test]
    fn test_dead_scheduler_after_startup_is_an_error() {
        let err = check_health(Duration::from_secs(25), Duration::from_secs(25), || false)
            .unwrap_err();
        assert!(err.to_string().contains("scheduler thread stopped"));
    }
}
