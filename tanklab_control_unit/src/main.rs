//! # TankLab Supervisor
//!
//! Supervisory control core for the quadruple-tank process rig.
//!
//! Loads the TOML configuration, builds the endpoint and the supervisor,
//! connects, enables the level subscriptions, starts the control loop, and
//! then idles on the main thread printing a periodic status line until a
//! shutdown signal arrives.
//!
//! The production protocol stack lives outside this workspace; the binary
//! runs against the simulated rig through the same transport seam the
//! production client uses.

use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use tanklab_control_unit::config::load_config;
use tanklab_control_unit::supervisor::Supervisor;
use tanklab_endpoint::sim::{SimTransport, TankModel, TankModelParams};

/// TankLab Supervisor — quadruple-tank level control and alarms
#[derive(Parser, Debug)]
#[command(name = "tanklab")]
#[command(author = "TankLab")]
#[command(version)]
#[command(about = "Supervisory control core for the quadruple-tank process")]
struct Args {
    /// Path to the supervisor configuration TOML.
    #[arg(default_value = "config/supervisor.toml")]
    config: PathBuf,

    /// Seconds between status lines.
    #[arg(long, default_value_t = 5)]
    status_period: u64,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    info!("TankLab Supervisor v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("TankLab Supervisor shutdown complete");
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args.config)?;
    info!(
        "Config OK: url={}, poll={}ms, subscription={}ms",
        config.endpoint.url, config.scheduler.poll_period_ms, config.endpoint.subscription_period_ms,
    );

    let transport = SimTransport::new(TankModel::new(TankModelParams::default()));
    let mut supervisor = Supervisor::new(transport, &config)?;

    supervisor.connect()?;
    info!("endpoint connected");

    if !supervisor.enable_level_subscription() {
        warn!("level subscriptions unavailable, alarm table runs on the poll path only");
    }
    supervisor.start_control()?;

    // Signal handler for graceful shutdown.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let status_period = Duration::from_secs(args.status_period.max(1));
    let mut last_status = Instant::now();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
        if last_status.elapsed() >= status_period {
            last_status = Instant::now();
            log_status(&supervisor);
        }
    }

    supervisor.shutdown();
    Ok(())
}

/// One status line: levels, active alarms, loop counters.
fn log_status(supervisor: &Supervisor<SimTransport>) {
    let snap = supervisor.get_alarm_snapshot();
    let levels: Vec<String> = snap
        .levels
        .iter()
        .map(|l| match l {
            Some(v) => format!("{v:.1}"),
            None => "-".to_string(),
        })
        .collect();
    let stats = supervisor.control_stats();

    let alarming: Vec<usize> = snap
        .active
        .iter()
        .enumerate()
        .filter(|(_, a)| **a)
        .map(|(i, _)| i + 1)
        .collect();

    if alarming.is_empty() {
        info!(
            "levels=[{}] cm, ticks={}, skipped={}, read_failures={}",
            levels.join(", "),
            stats.ticks,
            stats.skipped,
            stats.read_failures,
        );
    } else {
        warn!(
            "LOW LEVEL on tanks {alarming:?}; levels=[{}] cm, ticks={}",
            levels.join(", "),
            stats.ticks,
        );
    }
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
