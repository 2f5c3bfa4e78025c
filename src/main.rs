//! gpuscan binary
//!
//! Command-line entry point: parses arguments, sets up logging, runs one
//! collection pipeline, and prints the consolidated device report as JSON on
//! stdout. The exit status is zero whenever the pipeline completes; partial
//! data from failed or timed-out sources is acceptable output. Only a failure
//! to even start the pipeline exits non-zero.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gpuscan::error::Result;
use gpuscan::inventory::DeviceKey;
use gpuscan::orchestrator::{run, RunConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Display consolidated GPU inventory and diagnostics.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Restrict output to one device (PCI bus address, e.g. 0000:0e:00.0)
    #[arg(short, long, env = "GPUSCAN_DEVICE")]
    device: Option<String>,

    /// Skip the slower vendor diagnostic utilities
    #[arg(short, long)]
    short: bool,

    /// Log file location; without it only errors reach stderr
    #[arg(long, env = "GPUSCAN_LOGFILE", value_name = "filename")]
    logfile: Option<PathBuf>,

    /// Print additional debug messages
    #[arg(long)]
    debug: bool,

    /// Output logs as JSON
    #[arg(long, env = "GPUSCAN_LOG_JSON")]
    log_json: bool,

    /// Worker pool ceiling for concurrent source execution
    #[arg(long, env = "GPUSCAN_WORKERS", default_value = "2")]
    workers: usize,

    /// Timeout in seconds for the standard sources
    #[arg(long, env = "GPUSCAN_SOURCE_TIMEOUT", default_value = "5")]
    source_timeout_secs: u64,

    /// Timeout in seconds for the slower diagnostic sources
    #[arg(long, env = "GPUSCAN_DIAG_TIMEOUT", default_value = "8")]
    diag_timeout_secs: u64,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let started = Instant::now();
    let args = Args::parse();

    init_logging(&args)?;
    info!(?args, "starting collection");

    let selector = match &args.device {
        Some(raw) => Some(DeviceKey::parse(raw).map_err(|err| {
            error!(device = %raw, "invalid device selector");
            err
        })?),
        None => None,
    };

    let config = RunConfig {
        pool_size: args.workers,
        source_timeout: Duration::from_secs(args.source_timeout_secs),
        diag_timeout: Duration::from_secs(args.diag_timeout_secs),
        abridged: args.short,
        selector,
    };

    let report = match run(&config).await {
        Ok(report) => report,
        Err(err) => {
            if err.is_fatal() {
                error!(error = %err, "orchestration fault; no output produced");
            }
            return Err(err);
        }
    };

    // stdout is reserved for the report document.
    println!("{}", report.to_json_pretty()?);

    info!(elapsed = ?started.elapsed(), devices = report.devices.len(), "done");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    match &args.logfile {
        Some(path) => {
            let level = if args.debug { Level::DEBUG } else { Level::INFO };
            let filter = EnvFilter::from_default_env().add_directive(level.into());

            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;

            if args.log_json {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json().with_writer(Arc::new(file)))
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .with_target(true)
                            .with_ansi(false)
                            .with_writer(Arc::new(file)),
                    )
                    .init();
            }
        }
        None => {
            // No logfile: keep quiet apart from errors, on stderr.
            let filter = EnvFilter::from_default_env().add_directive(Level::ERROR.into());
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
