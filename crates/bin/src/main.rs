//! CLI entry point for ase-sweep.
//!
//! Loads the run configuration, bootstraps the run directory and logging,
//! wires the simulated bench, and drives one sweep to completion or
//! abort. Ctrl-C requests a graceful cancellation: the current exposure
//! finishes, the hardware is released, and the manifest is closed with
//! whatever prefix was committed.
//!
//! The binary ships with the simulated bench; real instrument backends
//! implement the same capability traits and plug into [`SweepDevices`]
//! without touching the engine.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use ase_core::run::RunStatus;
use ase_core::SweepConfig;
use ase_driver_mock::{MockPulser, MockRotator, MockSpectrometer, SimulatedBench};
use ase_engine::{SweepDevices, SweepEngine};
use ase_storage::RunWriter;

#[derive(Parser)]
#[command(name = "ase-sweep")]
#[command(about = "Angle-resolved emission sweep acquisition", long_about = None)]
struct Cli {
    /// Path to the sweep configuration TOML.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = SweepConfig::load(cli.config.as_deref())?;
    if cli.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    // The run directory exists before logging starts so the run log can
    // live next to the data it describes.
    let mut writer = RunWriter::create(&config.save_dir)?;
    let log_file = File::create(writer.run_dir().join("sweep.log"))
        .context("failed to create run log file")?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .init();

    info!(run_dir = %writer.run_dir().display(), "run directory ready");

    let bench = SimulatedBench::new();
    let devices = SweepDevices {
        stage: Arc::new(MockRotator::new()),
        spectrometer: Arc::new(MockSpectrometer::new(bench.clone())),
        pulser: Arc::new(MockPulser::new(bench)),
    };

    let engine = SweepEngine::new(config, devices)?;

    // Ctrl-C requests cancellation; a second Ctrl-C kills the process.
    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested, finishing the current step");
            cancel.cancel();
        }
    });

    // Best-effort live preview: sample the mailbox and log the newest
    // point. Ends when the engine drops the sender.
    let mut preview = engine.subscribe_preview();
    let preview_task = tokio::spawn(async move {
        while preview.changed().await.is_ok() {
            let update = preview.borrow_and_update().clone();
            if let Some(update) = update {
                info!(
                    seq = update.seq,
                    angle_degrees = update.angle_degrees,
                    integration_time_s = update.integration_time_s,
                    net_max = update.net.max_counts(),
                    "preview"
                );
            }
        }
    });

    let outcome = engine.run(&mut writer).await?;
    let _ = preview_task.await;

    println!(
        "sweep {}: {} point(s) recorded in {}",
        outcome.status,
        outcome.points_attempted,
        writer.run_dir().display()
    );
    if outcome.status == RunStatus::Aborted {
        bail!(
            "sweep aborted: {}",
            outcome.reason.unwrap_or_else(|| "unknown reason".into())
        );
    }
    Ok(())
}
