//! CLI entry point for sgxlkl-device-plugin
//!
//! Advertises the SGX-LKL capability to the kubelet and keeps the
//! registration alive across kubelet restarts and SIGHUP resets.
//!
//! # Usage
//!
//! ```bash
//! sgxlkl-device-plugin --config /etc/sgxlkl/device-plugin.toml
//! RUST_LOG=debug sgxlkl-device-plugin --log-format json
//! ```
//!
//! # Signals
//!
//! - `SIGHUP`: stop the plugin and start a fresh one
//! - `SIGINT`, `SIGTERM`, `SIGQUIT`: stop the plugin and exit

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use sgx_core::PluginConfig;
use sgx_server::{controller_supervisor, ControlSignal};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Control signals queued ahead of the reset loop.
const SIGNAL_QUEUE: usize = 5;

#[derive(Parser)]
#[command(name = "sgxlkl-device-plugin")]
#[command(about = "sgxlkl-device-plugin is SGX-LKL device plugin", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Without it, built-in defaults apply;
    /// SGXLKL_* environment variables override either.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Translate OS signals into control signals for the reset loop.
///
/// Handlers are installed before returning so that no signal delivered
/// after startup is lost.
fn forward_signals(tx: mpsc::Sender<ControlSignal>) -> Result<()> {
    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    let mut interrupt = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut quit = signal(SignalKind::quit()).context("installing SIGQUIT handler")?;

    tokio::spawn(async move {
        loop {
            let (name, control) = tokio::select! {
                _ = hangup.recv() => ("SIGHUP", ControlSignal::Reload),
                _ = interrupt.recv() => ("SIGINT", ControlSignal::Terminate),
                _ = terminate.recv() => ("SIGTERM", ControlSignal::Terminate),
                _ = quit.recv() => ("SIGQUIT", ControlSignal::Terminate),
            };
            info!(signal = name, "received signal");
            if tx.send(control).await.is_err() {
                break;
            }
        }
    });

    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = PluginConfig::load(cli.config.as_deref()).context("loading configuration")?;
    info!(
        capability = %config.capability_path.display(),
        endpoint = %config.endpoint_path().display(),
        kubelet = %config.kubelet_socket.display(),
        resource = %config.resource_name,
        devices = config.device_count,
        "Starting SGX-LKL device plugin"
    );

    let (tx, rx) = mpsc::channel(SIGNAL_QUEUE);
    forward_signals(tx)?;

    let reason = controller_supervisor(config).run(rx).await;
    info!(?reason, "SGX-LKL device plugin exiting");
    Ok(ExitCode::from(reason.exit_code()))
}
