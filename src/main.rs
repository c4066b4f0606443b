//! pmemstor
//!
//! Command-line front end for PMem region and namespace preparation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            pmemstor                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Region    │───▶│   Prepare    │───▶│  Namespace   │       │
//! │  │  Inspector   │    │ Orchestrator │    │   Manager    │       │
//! │  │   (ipmctl)   │    │              │    │   (ndctl)    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pmemstor::adapters::{LoggingEventPublisher, ProcessExecutor};
use pmemstor::hardware::pmem::{PmemConfig, PrepareOrchestrator, PrepareRequest};
use pmemstor::metrics::PmemMetrics;

// =============================================================================
// CLI Arguments
// =============================================================================

/// pmemstor - Prepare persistent memory for use as AppDirect namespaces
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Region tool binary
    #[arg(long, env = "PMEM_IPMCTL", default_value = "ipmctl", global = true)]
    ipmctl: String,

    /// Namespace tool binary
    #[arg(long, env = "PMEM_NDCTL", default_value = "ndctl", global = true)]
    ndctl: String,

    /// Region tool version to refuse (repeatable, replaces the built-in list)
    #[arg(
        long = "bad-ipmctl-version",
        env = "PMEM_BAD_IPMCTL_VERSIONS",
        value_delimiter = ',',
        global = true
    )]
    bad_ipmctl_versions: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    /// Write metrics in text exposition format to this file on exit
    #[arg(long, env = "PMEM_METRICS_TEXTFILE", global = true)]
    metrics_textfile: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report modules, namespaces and PMem state
    Scan,

    /// Create regions or namespaces, whichever comes next
    Prepare {
        /// Restrict to one socket
        #[arg(long)]
        socket: Option<u32>,

        /// Namespaces to create on each socket (1-4)
        #[arg(long, default_value = "1")]
        namespaces_per_socket: u32,
    },

    /// Remove namespaces and recreate regions
    Reset {
        /// Restrict to one socket
        #[arg(long)]
        socket: Option<u32>,
    },
}

impl Args {
    fn pmem_config(&self) -> PmemConfig {
        let mut config = PmemConfig {
            ipmctl_bin: self.ipmctl.clone(),
            ndctl_bin: self.ndctl.clone(),
            ..Default::default()
        };
        if !self.bad_ipmctl_versions.is_empty() {
            config.bad_ipmctl_versions = self.bad_ipmctl_versions.clone();
        }
        config
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let metrics = match PmemMetrics::new() {
        Ok(m) => Arc::new(m),
        Err(e) => {
            error!("Failed to initialise metrics: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = run(&args, metrics.clone()).await;

    if let Some(path) = &args.metrics_textfile {
        if let Err(e) = metrics.write_textfile(path) {
            error!("Failed to write metrics to {}: {}", path.display(), e);
        }
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args, metrics: Arc<PmemMetrics>) -> anyhow::Result<()> {
    let config = args.pmem_config();
    info!(
        ipmctl = %config.ipmctl_bin,
        ndctl = %config.ndctl_bin,
        "Starting pmemstor"
    );

    let orchestrator = PrepareOrchestrator::new(
        config,
        Arc::new(ProcessExecutor::new()),
        Arc::new(LoggingEventPublisher::new()),
        metrics,
    );

    let scan = orchestrator.scan().await.context("PMem scan failed")?;

    match &args.command {
        Command::Scan => print_json(&scan),
        Command::Prepare {
            socket,
            namespaces_per_socket,
        } => {
            let req = PrepareRequest {
                socket_id: *socket,
                namespaces_per_socket: Some(*namespaces_per_socket),
                reset: false,
            };
            let resp = orchestrator
                .prepare(&req, &scan)
                .await
                .context("PMem prepare failed")?;
            if resp.reboot_required {
                info!("Reboot required to apply PMem region changes");
            }
            print_json(&resp)
        }
        Command::Reset { socket } => {
            let req = PrepareRequest {
                socket_id: *socket,
                namespaces_per_socket: None,
                reset: true,
            };
            let resp = orchestrator
                .prepare(&req, &scan)
                .await
                .context("PMem reset failed")?;
            print_json(&resp)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to encode result")?;
    println!("{}", out);
    Ok(())
}

/// Print a fatal error and, for known faults, what to do about it.
fn report(err: &anyhow::Error) {
    eprintln!("Error: {:#}", err);

    let remedy = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<pmemstor::Error>())
        .and_then(|e| e.resolution());
    if let Some(remedy) = remedy {
        eprintln!("Resolution: {}", remedy);
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr, stdout carries the JSON result.
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
