//! lpmidimon - headless monitor for looping devices
//!
//! Connects to a device over MIDI or UDP, prints per-track status and the
//! device log, and runs one-shot commands, upgrades and settings transfers.

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lpmidimon::clock::ClockState;
use lpmidimon::functions;
use lpmidimon::midi::{list_input_ports, list_output_ports};
use lpmidimon::model::ButtonId;
use lpmidimon::paths::AppPaths;
use lpmidimon::status::StatusSnapshot;
use lpmidimon::{DeviceCommand, Session};

/// Looper monitor - status, log and control over MIDI sysex or UDP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write daily rolling log files (to the data directory by default)
    #[arg(long, env = "LPMIDIMON_LOG_DIR", num_args = 0..=1)]
    log_dir: Option<Option<PathBuf>>,

    /// Device used in both directions (MIDI port name, or "10.0.0.5 Name")
    #[arg(short, long)]
    endpoint: Option<String>,

    /// MIDI input device
    #[arg(short, long)]
    input: Option<String>,

    /// MIDI output device
    #[arg(short, long)]
    output: Option<String>,

    /// Endpoint settings file (default ~/.lp2ctrl.json)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Don't probe the network for devices
    #[arg(long)]
    no_discovery: bool,

    /// Send a user command once: status, midi-status, reboot, directory
    #[arg(short, long)]
    command: Option<DeviceCommand>,

    /// Upgrade firmware from a file (.syx for MIDI, raw image for UDP)
    #[arg(long)]
    upgrade: Option<PathBuf>,

    /// Push a saved device settings file to the device
    #[arg(long, num_args = 0..=1)]
    load_settings: Option<Option<PathBuf>>,

    /// Save the device settings to a file on exit
    #[arg(long, num_args = 0..=1)]
    save_settings: Option<Option<PathBuf>>,

    /// Screen refresh interval in milliseconds
    #[arg(long, default_value = "1000")]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let paths = AppPaths::detect();

    let log_dir = args
        .log_dir
        .clone()
        .map(|dir| dir.unwrap_or_else(|| paths.logs_dir.clone()));
    if args.log_dir.is_some() || args.save_settings.is_some() {
        paths.ensure_dirs()?;
    }
    let _log_guard = init_logging(&args.log_level, log_dir.as_deref())?;

    info!("Starting lpmidimon v{}...", env!("CARGO_PKG_VERSION"));

    if args.list_ports {
        list_ports_formatted();
        return Ok(());
    }

    let settings_path = args.settings.clone().unwrap_or_else(|| paths.settings.clone());
    info!("Settings file: {}", settings_path.display());

    let mut session = Session::with_settings_path(settings_path);
    if let Some(endpoint) = &args.endpoint {
        session.select_endpoint(endpoint).await?;
    } else if args.input.is_some() || args.output.is_some() {
        if let Some(input) = &args.input {
            session.select_input(input).await?;
        }
        if let Some(output) = &args.output {
            session.select_output(output).await?;
        }
    } else if let Err(e) = session.restore().await {
        warn!("Couldn't restore device selection: {:#}", e);
    }

    match session.endpoint() {
        Some(endpoint) => println!("{} {}", "Device:".bold(), endpoint.to_string().bright_white()),
        None => println!(
            "{}",
            "No device selected - pass --endpoint or pick one from the discovered devices".yellow()
        ),
    }

    if !args.no_discovery {
        session.start_discovery();
    }
    if let Some(command) = args.command {
        session.enqueue_command(command);
    }
    if let Some(path) = &args.upgrade {
        session.submit_upgrade(path.clone());
    }
    let default_settings =
        |path: &Option<PathBuf>| path.clone().unwrap_or_else(|| paths.device_settings.clone());
    if let Some(path) = args.load_settings.as_ref().map(default_settings) {
        session.load_settings_file(&path).await?;
        info!("Settings from {} queued for the device", path.display());
    }

    run_monitor(&session, Duration::from_millis(args.interval_ms.max(50)), shutdown_signal()).await;

    if let Some(path) = args.save_settings.as_ref().map(default_settings) {
        match session.save_settings_file(&path).await {
            Ok(()) => info!("Device settings saved to {}", path.display()),
            Err(e) => warn!("Failed to save device settings: {:#}", e),
        }
    }

    session.stop().await;
    info!("lpmidimon shutdown complete");
    Ok(())
}

/// What was last printed, so only changes are shown
#[derive(Default)]
struct Screen {
    status: Option<StatusSnapshot>,
    clock: Option<String>,
    button: Option<ButtonId>,
}

async fn run_monitor(
    session: &Session,
    interval: Duration,
    shutdown: impl std::future::Future<Output = ()>,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut screen = Screen::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => refresh(session, &mut screen),
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping monitor");
                break;
            }
        }
    }
}

fn refresh(session: &Session, screen: &mut Screen) {
    for device in session.new_devices() {
        println!("{} {}", "Found device:".green(), device);
    }

    let log = session.drain_log();
    let stamp = Local::now().format("%H:%M:%S");
    for line in log.lines().filter(|l| !l.trim().is_empty()) {
        println!("{} {}", stamp.to_string().dimmed(), line);
    }

    let status = session.snapshot();
    if screen.status.as_ref() != Some(&status) {
        for line in status.describe() {
            println!("{}", line.cyan());
        }
        screen.status = Some(status);
    }

    let clock = session.clock_state();
    let clock_text = clock.to_string();
    if screen.clock.as_deref() != Some(clock_text.as_str()) {
        match clock {
            ClockState::Bpm(_) => println!("{} {}", "BPM:".bold(), clock_text.bright_green()),
            _ => println!("{} {}", "BPM:".bold(), clock_text.dimmed()),
        }
        screen.clock = Some(clock_text);
    }

    let button = session.last_button_press();
    if button.is_some() && button != screen.button {
        if let Some(id) = button {
            let mapped = session
                .button_mapping(id)
                .map(|slots| {
                    slots
                        .iter()
                        .map(|f| functions::label(*f))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_else(|| "not loaded".to_string());
            println!("{} {} ({})", "Button:".bold(), id.to_string().yellow(), mapped);
        }
        screen.button = button;
    }
}

fn list_ports_formatted() {
    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());

    for (title, ports) in [
        ("Input Ports:", list_input_ports()),
        ("Output Ports:", list_output_ports()),
    ] {
        println!("\n{}", title.bold());
        match ports {
            Ok(names) if names.is_empty() => println!("  {}", "No ports found".dimmed()),
            Ok(names) => names.iter().for_each(|name| println!("  {}", name)),
            Err(e) => println!("  {} {}", "Couldn't list ports:".red(), e),
        }
    }
}

fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "lpmidimon.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
}
