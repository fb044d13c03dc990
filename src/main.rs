//! Telemetry Conformance - run the scenario catalogue against a live service
//!
//! Usage:
//!   telemetry-conformance [OPTIONS]
//!
//! Options:
//!   -s, --settings <FILE>       Settings file (default: nearest .env upward)
//!       --scenario <NAME>       Scenario to run, repeatable (default: all)
//!   -p, --parallel              Run scenarios concurrently
//!       --poll-attempts <N>     Convergence poll attempt ceiling
//!       --poll-interval <DUR>   Delay between poll attempts (e.g. 500ms, 5s)
//!   -l, --log-level <LEVEL>     Log level (error, warn, info, debug, trace)
//!   -h, --help                  Print help

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use telemetry_conformance::config::{self, Settings};
use telemetry_conformance::scenario::{run_all, ScenarioKind, ScenarioReport};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Conformance harness for the device-management and telemetry service
#[derive(Parser, Debug)]
#[command(name = "telemetry-conformance")]
#[command(version)]
#[command(about = "End-to-end conformance checks over HTTPS and MQTT")]
struct Args {
    /// Settings file (dotenv format). Overrides upward discovery.
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Scenario to run; may be repeated. Runs every scenario when omitted.
    #[arg(long = "scenario", value_enum)]
    scenarios: Vec<ScenarioKind>,

    /// Run the selected scenarios concurrently
    #[arg(short, long)]
    parallel: bool,

    /// Convergence poll attempt ceiling
    #[arg(long)]
    poll_attempts: Option<u32>,

    /// Delay between convergence poll attempts
    #[arg(long, value_parser = humantime::parse_duration)]
    poll_interval: Option<Duration>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

fn load_settings(args: &Args) -> Result<Settings, config::ConfigError> {
    let mut settings = match &args.settings {
        Some(path) => Settings::from_file(path, &config::process_env())?,
        None => Settings::load()?,
    };

    // CLI overrides file and environment
    if let Some(attempts) = args.poll_attempts {
        settings.poll_max_attempts = attempts;
    }
    if let Some(interval) = args.poll_interval {
        settings.poll_interval = interval;
    }
    settings.validate()?;
    Ok(settings)
}

fn print_summary(reports: &[ScenarioReport]) {
    for report in reports {
        println!("{}", report);
    }
    let passed = reports.iter().filter(|r| r.passed()).count();
    println!(
        "\n{} scenarios: {} passed, {} failed",
        reports.len(),
        passed,
        reports.len() - passed
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging - CLI overrides settings, settings override default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        LogLevel::from_str(&settings.log_level, true).unwrap_or_default()
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let kinds: Vec<ScenarioKind> = if args.scenarios.is_empty() {
        ScenarioKind::all().to_vec()
    } else {
        args.scenarios.clone()
    };

    info!("Starting conformance run");
    let start = std::env::current_dir().unwrap_or_default();
    match config::settings_source(args.settings.as_deref(), &start) {
        Some(path) => info!("  Settings: {}", path.display()),
        None => info!("  Settings: defaults and environment"),
    }
    info!("  API: {}", settings.base_url());
    info!("  Broker: {}:{}", settings.broker, settings.mqtt_port);
    info!(
        "  Polling: {} attempts every {:?}",
        settings.poll_max_attempts, settings.poll_interval
    );
    info!(
        "  Scenarios: {} ({})",
        kinds.len(),
        if args.parallel { "parallel" } else { "sequential" }
    );

    let reports = run_all(&kinds, Arc::new(settings), args.parallel).await;
    print_summary(&reports);

    if reports.iter().all(ScenarioReport::passed) {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
