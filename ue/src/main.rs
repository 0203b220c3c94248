//! Albor Space 5G UE Main Application
//!
//! Runs the UE downlink PHY pipeline against a simulated front-end.

mod config;
mod sim;

use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::UeConfig;
use layers::phy::{PoolStats, UePhy};
use sim::Simulator;

/// Albor Space 5G UE
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to YAML configuration file, built-in single carrier setup when absent
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error), overrides the configuration file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Number of TTIs to run (0 runs until interrupted)
    #[arg(long)]
    nof_ttis: Option<u64>,

    /// Number of subframe workers
    #[arg(long)]
    workers: Option<usize>,
}

fn log_pool_stats(stats: &PoolStats) {
    info!("Pipeline Statistics:");
    info!(
        "  Submitted: {}, Completed: {}, In flight: {}",
        stats.submitted, stats.completed, stats.in_flight
    );
    info!(
        "  Dropped: {}, Late: {}, Not ready: {}, Timing violations: {}",
        stats.dropped, stats.late_reports, stats.not_ready, stats.carrier_timing_violations
    );
    info!(
        "  CRC OK: {}, CRC KO: {}, Unusable grants: {}, Generation: {}",
        stats.crc_ok, stats.crc_failed, stats.unusable_grants, stats.generation
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => UeConfig::from_yaml_file(path)?,
        None => UeConfig::default(),
    };
    if let Some(nof_ttis) = args.nof_ttis {
        config.sim.nof_ttis = nof_ttis;
    }
    if let Some(workers) = args.workers {
        config.pipeline.nof_workers = workers;
    }

    // Initialize logging
    let level = args.log_level.clone().unwrap_or_else(|| config.log.level.clone());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor Space 5G UE");
    match &args.config {
        Some(path) => info!("Configuration file: {}", path),
        None => info!("Using built-in configuration"),
    }

    let pool_config = config.to_pool_config()?;
    info!("Pipeline configuration:");
    info!("  Workers: {}", pool_config.nof_workers);
    info!("  TTI period: {:?}", pool_config.tti_period);
    info!("  Processing deadline: {:?}", pool_config.processing_deadline);
    info!("  Carrier budget: {:?}", pool_config.carrier_budget);

    let phy = Arc::new(UePhy::with_default_receiver(config.to_phy_state()?, pool_config)?);
    let mut simulator = Simulator::new(Arc::clone(&phy), &config)?;
    info!("UE PHY initialized");

    let stop = Arc::new(AtomicBool::new(false));

    // Real-time TTI loop on a blocking thread
    let mut sim_handle = {
        let stop = Arc::clone(&stop);
        let nof_ttis = config.sim.nof_ttis;
        tokio::task::spawn_blocking(move || simulator.run(nof_ttis, &stop))
    };

    // Start statistics reporting
    let stats_handle = {
        let phy = Arc::clone(&phy);
        let stop = Arc::clone(&stop);
        let period = Duration::from_secs(config.sim.stats_interval_s.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            while !stop.load(Ordering::Relaxed) {
                interval.tick().await;
                log_pool_stats(&phy.stats());
            }
        })
    };

    // Wait for the run to end or a shutdown signal
    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            stop.store(true, Ordering::Relaxed);
            None
        }
        result = &mut sim_handle => Some(result),
    };
    let outcome = match finished {
        Some(result) => result,
        None => sim_handle.await,
    };

    // Shutdown
    info!("Shutting down UE");
    stop.store(true, Ordering::Relaxed);
    stats_handle.abort();

    let sim_stats = outcome??;
    info!(
        "Front-end: {} TTIs, {} grants, {} dropped, {} undecodable DCIs, CRC {} OK / {} KO",
        sim_stats.ttis,
        sim_stats.scheduled,
        sim_stats.dropped,
        sim_stats.decode_failures,
        sim_stats.crc_ok,
        sim_stats.crc_failed
    );

    let stats = phy.stats();
    log_pool_stats(&stats);
    if stats.dropped > 0 || stats.late_reports > 0 {
        warn!(
            "{} TTIs dropped and {} reports late; consider more workers or a longer deadline",
            stats.dropped, stats.late_reports
        );
    }

    info!("UE shutdown complete");
    Ok(())
}
