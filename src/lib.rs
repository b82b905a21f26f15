// src/lib.rs
//
// serialtap: passive serial port tap. Opens every configured port read-only,
// splits each byte stream into packets by inter-byte silence, labels each
// packet TX/RX and fans the results out to console and log file.

pub mod capture;
pub mod classifier;
pub mod cli;
pub mod io;
pub mod logging;
pub mod render;
pub mod settings;
pub mod stats;

use clap::Parser;
use std::io::Write;
use tracing::{info, warn};

use capture::{CaptureCoordinator, PacketSink};
use classifier::DetectionMode;
use cli::Cli;
use io::serial::{list_serial_ports, SerialOpener};
use io::TapError;
use render::{ConsoleSink, LogFileSink, SessionSummary};
use settings::TapSettings;

/// Clean exit, including Ctrl+C
pub const EXIT_OK: i32 = 0;
/// A port failed to open or the runtime could not start
pub const EXIT_STARTUP: i32 = 1;
/// Bad arguments or settings
pub const EXIT_CONFIG: i32 = 2;

// ============================================================================
// Entry Point
// ============================================================================

/// Run the tap with process arguments. Returns the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(cli.verbose) {
        eprintln!("warning: {}", e);
    }

    if cli.list {
        return list_ports();
    }

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {}", e);
            if cli.ports.is_empty() {
                eprintln!("hint: pass at least one --port, or use --list to see available ports");
            }
            return EXIT_CONFIG;
        }
    };

    for warning in settings.timing_warnings() {
        warn!("[Settings] {}", warning);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: cannot start runtime: {}", e);
            return EXIT_STARTUP;
        }
    };

    runtime.block_on(capture_session(settings))
}

fn load_settings(cli: &Cli) -> Result<TapSettings, TapError> {
    let mut settings = TapSettings::load(cli.config.as_deref())?;
    cli.apply(&mut settings)?;
    settings.validate()?;
    Ok(settings)
}

fn list_ports() -> i32 {
    match list_serial_ports() {
        Ok(ports) if ports.is_empty() => {
            println!("No serial ports found");
            EXIT_OK
        }
        Ok(ports) => {
            println!("Available serial ports:");
            for port in &ports {
                match &port.usb {
                    Some(usb) => println!(
                        "  {} - {} [{:04X}:{:04X}]",
                        port.port_name,
                        port.description(),
                        usb.vid,
                        usb.pid
                    ),
                    None => println!("  {} - {}", port.port_name, port.description()),
                }
            }
            EXIT_OK
        }
        Err(e) => {
            eprintln!("error: cannot enumerate serial ports: {}", e);
            EXIT_STARTUP
        }
    }
}

// ============================================================================
// Capture Session
// ============================================================================

async fn capture_session(settings: TapSettings) -> i32 {
    let ports = settings.port_configs();
    let opener = SerialOpener::new(settings.poll_interval());

    let coordinator = match CaptureCoordinator::new(opener, ports, settings.capture_options()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            return EXIT_CONFIG;
        }
    };

    let running = match coordinator.start() {
        Ok(running) => running,
        Err(TapError::StartupAborted(failures)) => {
            eprintln!("error: capture aborted, no data was read");
            for failure in &failures {
                eprintln!("  {}", failure);
            }
            return EXIT_STARTUP;
        }
        Err(e) => {
            eprintln!("error: {}", e);
            return EXIT_STARTUP;
        }
    };

    let mut sinks: Vec<Box<dyn PacketSink>> = vec![Box::new(ConsoleSink::stdout(
        settings.display,
        settings.detection != DetectionMode::None,
    ))];

    let log_path = settings.log_file.as_deref().map(|template| {
        render::expand_log_path(template, &chrono::Local::now(), settings.log_format)
    });
    if let Some(path) = &log_path {
        match LogFileSink::create(path, settings.log_format) {
            Ok(sink) => sinks.push(Box::new(sink)),
            Err(e) => {
                // Nothing has been printed yet; stop the ports and bail out
                eprintln!("error: cannot open log file {}: {}", path.display(), e);
                running.stop_handle().stop();
                let mut discard: Vec<io::PacketEvent> = Vec::new();
                running.run(&mut discard, std::future::pending::<()>()).await;
                return EXIT_CONFIG;
            }
        }
    }

    let detection = settings.detection.to_string();
    let summary = SessionSummary {
        ports: running.ports(),
        display: settings.display,
        detection: &detection,
        packet_timeout_ms: settings.packet_timeout_ms,
        log_file: log_path.as_deref().map(|p| (p, settings.log_format)),
    };
    let mut stdout = std::io::stdout();
    if let Err(e) = render::write_banner(&mut stdout, &summary) {
        warn!("[Console] Failed to write banner: {}", e);
    }
    let _ = stdout.flush();

    let report = running
        .run(&mut sinks, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("[Capture] Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    let mut stdout = std::io::stdout();
    if let Err(e) = render::write_report(&mut stdout, &report) {
        warn!("[Console] Failed to write statistics: {}", e);
    }
    let _ = stdout.flush();

    if report.interrupted {
        info!("[Capture] Stopped by user");
    } else if !report.all_clean() {
        warn!("[Capture] Capture ended after losing a device");
    }
    EXIT_OK
}
