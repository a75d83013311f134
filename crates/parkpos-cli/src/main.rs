//! # parkpos
//!
//! Command-line front end for the cash desk printer and barcode scanner.
//!
//! ## Usage
//!
//! ```bash
//! # Report printer and scanner status
//! parkpos --config parkpos.toml status
//!
//! # Print the self-test page
//! parkpos test-page
//!
//! # Print an entry ticket
//! parkpos print entry-ticket -f plate=ABC-123 -f code=T-00099
//!
//! # Write the ESC/POS bytes to stdout instead of printing
//! parkpos print payment-receipt -f code=T-00099 -f amount=4,50 --preview > receipt.bin
//!
//! # Wait up to five seconds for a scan, then ask for the code by hand
//! parkpos scan --timeout-ms 5000 --manual
//! ```
//!
//! Logging follows `RUST_LOG` when set, otherwise `logging.level` from the
//! configuration file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use parkpos_core::config::InputSource;
use parkpos_core::{AppConfig, DeviceEventBus, DeviceStatus, EventPayload, HardwareEvent, ScannerMode};
use parkpos_printer::{DocumentKind, PrinterHealth, PrinterService, ReceiptFields};
use parkpos_scanner::{ManualInput, ScanError, ScanResult, ScannerService};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "parkpos.toml";

/// parkpos - parking lot printer and scanner utility
#[derive(Parser, Debug)]
#[command(name = "parkpos")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./parkpos.toml when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write every hardware event to stdout as a JSON line
    #[arg(long, global = true)]
    json_events: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check both devices and report their status
    Status,

    /// Print the printer self-test page
    TestPage {
        /// Seconds to wait for the printer
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
    },

    /// Print a document
    Print {
        /// ENTRY_TICKET, PAYMENT_RECEIPT, LOST_TICKET_RECEIPT or TEST_PAGE
        kind: String,

        /// Template field, repeatable
        #[arg(short = 'f', long = "field", value_name = "KEY=VALUE", value_parser = parse_field)]
        fields: Vec<(String, String)>,

        /// Write the rendered bytes to stdout instead of printing
        #[arg(long)]
        preview: bool,

        /// Seconds to wait for the printer
        #[arg(long, default_value_t = 30)]
        wait_secs: u64,
    },

    /// Wait for a scanned code
    Scan {
        /// How long to wait for the scanner
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,

        /// Ask for the code on the terminal when the scan times out
        #[arg(long)]
        manual: bool,
    },

    /// Show the effective configuration as TOML
    Config,
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    if key.trim().is_empty() {
        return Err(format!("empty field name in `{s}`"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging.level);

    let bus = DeviceEventBus::new();
    let json = cli.json_events;
    let audit = bus.subscribe_with(move |event| log_event(&event, json));

    let outcome = tokio::select! {
        outcome = dispatch(cli.command, &config, &bus) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            Ok(ExitCode::from(130))
        }
    };

    drop(bus);
    // Flush events published during shutdown
    let _ = tokio::time::timeout(Duration::from_millis(200), audit).await;
    outcome
}

async fn dispatch(command: Commands, config: &AppConfig, bus: &DeviceEventBus) -> Result<ExitCode> {
    match command {
        Commands::Status => status(config, bus).await,
        Commands::TestPage { wait_secs } => {
            print(config, bus, DocumentKind::TestPage, ReceiptFields::new(), wait_secs).await
        }
        Commands::Print {
            kind,
            fields,
            preview,
            wait_secs,
        } => {
            let kind: DocumentKind = kind.parse()?;
            let fields = fields
                .into_iter()
                .fold(ReceiptFields::new(), |acc, (key, value)| acc.with(key, value));
            if preview {
                preview_document(config, bus, kind, &fields).await
            } else {
                print(config, bus, kind, fields, wait_secs).await
            }
        }
        Commands::Scan { timeout_ms, manual } => scan(config, bus, timeout_ms, manual).await,
        Commands::Config => {
            print!("{}", toml::to_string_pretty(config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => AppConfig::load(DEFAULT_CONFIG_FILE)
            .with_context(|| format!("loading configuration from {DEFAULT_CONFIG_FILE}")),
        None => Ok(AppConfig::default()),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Audit trail of everything the services report.
fn log_event(event: &HardwareEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "Event not serializable"),
        }
        return;
    }

    if event.is_error() {
        warn!(device = %event.device_kind, event = ?event.event_type, payload = ?event.payload, "Hardware event");
    } else {
        info!(device = %event.device_kind, event = ?event.event_type, payload = ?event.payload, "Hardware event");
    }
}

async fn status(config: &AppConfig, bus: &DeviceEventBus) -> Result<ExitCode> {
    let printer = PrinterService::from_config(config.printer.clone(), bus.clone());
    let scanner = ScannerService::from_config(config.scanner.clone(), bus.clone());

    let report = printer.test_connection().await;
    match &report {
        Ok(report) => {
            let health = match &report.health {
                PrinterHealth::Ok => "ok".to_string(),
                PrinterHealth::PaperOut => "sin papel".to_string(),
                PrinterHealth::Fault(reason) => format!("fallo: {reason}"),
                PrinterHealth::Unknown => "desconocido".to_string(),
            };
            println!(
                "printer: {} ({}, {health})",
                printer.get_status(),
                report.connected.target
            );
        }
        Err(e) => println!("printer: {} ({e})", printer.get_status()),
    }

    let mut scanner_status = scanner.status_watch();
    let _ = tokio::time::timeout(
        Duration::from_secs(2),
        scanner_status.wait_for(|s| *s != DeviceStatus::Connecting),
    )
    .await;
    let scanner_ready = scanner.get_status().is_operational();
    println!("scanner: {} ({})", scanner.get_status(), describe_input(&config.scanner.source));

    printer.shutdown().await?;
    scanner.shutdown().await?;

    Ok(if report.is_ok() && scanner_ready {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn describe_input(source: &InputSource) -> String {
    match source {
        InputSource::Stdin => "stdin".to_string(),
        InputSource::Device { path } => path.display().to_string(),
    }
}

async fn preview_document(
    config: &AppConfig,
    bus: &DeviceEventBus,
    kind: DocumentKind,
    fields: &ReceiptFields,
) -> Result<ExitCode> {
    let printer = PrinterService::from_config(config.printer.clone(), bus.clone());
    let rendered = printer.preview(kind, fields);
    printer.shutdown().await?;
    let rendered = rendered?;

    if !rendered.truncated_fields.is_empty() {
        warn!(fields = ?rendered.truncated_fields, "Fields truncated to fit the paper");
    }
    let mut stdout = tokio::io::stdout();
    stdout.write_all(&rendered.bytes).await?;
    stdout.flush().await?;
    Ok(ExitCode::SUCCESS)
}

async fn print(
    config: &AppConfig,
    bus: &DeviceEventBus,
    kind: DocumentKind,
    fields: ReceiptFields,
    wait_secs: u64,
) -> Result<ExitCode> {
    let mut events = bus.subscribe();
    let printer = PrinterService::from_config(config.printer.clone(), bus.clone());
    let job = printer.print(kind, &fields)?;
    info!(job_id = %job.id, document = %kind, "Job queued");

    let finished = tokio::time::timeout(Duration::from_secs(wait_secs), async {
        while let Some(event) = events.recv().await {
            match event.payload {
                EventPayload::JobCompleted { job_id, .. } if job_id == job.id => return Ok(()),
                EventPayload::JobAbandoned { job_id, reason, .. } if job_id == job.id => {
                    return Err(reason);
                }
                _ => {}
            }
        }
        Err("event bus closed".to_string())
    })
    .await;

    let pending = printer.pending_jobs().len();
    printer.shutdown().await?;

    match finished {
        Ok(Ok(())) => {
            println!("printed {kind} ({})", job.id);
            Ok(ExitCode::SUCCESS)
        }
        Ok(Err(reason)) => bail!("job {} abandoned: {reason}", job.id),
        Err(_) => bail!(
            "job {} not printed within {wait_secs}s ({pending} job(s) still queued, printer {})",
            job.id,
            printer.get_status()
        ),
    }
}

async fn scan(config: &AppConfig, bus: &DeviceEventBus, timeout_ms: u64, manual: bool) -> Result<ExitCode> {
    if manual && config.scanner.source == InputSource::Stdin {
        bail!("manual entry reads the terminal; set scanner.source to the scanner device");
    }

    let scanner = ScannerService::from_config(config.scanner.clone(), bus.clone());
    let outcome = match scanner.await_code(Duration::from_millis(timeout_ms)).await {
        Err(e) if manual && e.suggests_manual_entry() => {
            eprintln!("{e}. Escriba el código y pulse Enter:");
            manual_entry(&scanner).await
        }
        other => other,
    };
    scanner.shutdown().await?;

    let result = outcome?;
    match result.code() {
        Some(code) => println!("{code}"),
        None => {
            let reason = result.error().map(|e| e.to_string()).unwrap_or_default();
            eprintln!("código no válido `{}`: {reason}", result.raw);
        }
    }
    Ok(if result.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Take one line from the terminal as the code.
async fn manual_entry(scanner: &ScannerService) -> parkpos_scanner::Result<ScanResult> {
    let mut session = tokio::spawn({
        let scanner = scanner.clone();
        async move { scanner.start_manual_entry().await }
    });
    let mut mode = scanner.mode_watch();
    let _ = mode.wait_for(|m| *m == ScannerMode::ManualEntry).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tokio::select! {
        joined = &mut session => {
            return joined.map_err(|e| ScanError::TaskFailed(e.to_string()))?;
        }
        line = lines.next_line() => match line {
            Ok(Some(line)) if !line.trim().is_empty() => {
                for input in ManualInput::typed(line.trim()) {
                    scanner.manual_input(input).await?;
                }
            }
            _ => scanner.cancel().await,
        },
    }

    session
        .await
        .map_err(|e| ScanError::TaskFailed(e.to_string()))?
}
