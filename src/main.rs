use std::sync::Arc;

use tracing::info;

use slotted::{
    CoreConfig, Engine, FlatRate, InvalidationHub, MemoryLedger, MemoryStore, SystemClock,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("SLOTTED_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    slotted::observability::init(metrics_port);

    let config = CoreConfig::from_env();
    let per_hour_minor: u64 = std::env::var("SLOTTED_FLAT_RATE_MINOR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(4900);

    let engine = Arc::new(Engine::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryLedger::new()),
        Arc::new(FlatRate { per_hour_minor }),
        Arc::new(InvalidationHub::new()),
        Arc::new(SystemClock),
        config,
    ));

    info!("slotted reservation core starting");
    info!("  retry budget: {}", engine.config().max_attempts);
    info!("  reconcile interval: {:?}", engine.config().reconcile_interval);
    info!("  orphan grace: {:?}", engine.config().orphan_grace);
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    let reconciler = tokio::spawn(slotted::scheduler::run_reconciler(engine.clone()));
    let sweeper = tokio::spawn(slotted::scheduler::run_orphan_sweep(engine.clone()));
    let cleaner = tokio::spawn(slotted::scheduler::run_cleanup(engine.clone()));

    // Graceful shutdown on SIGTERM/ctrl-c
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    shutdown.await;

    info!("shutdown signal received, stopping background jobs");
    reconciler.abort();
    sweeper.abort();
    cleaner.abort();

    // One last sweep so no reclaimable hold outlives the process
    let swept = engine.sweep_orphans_pass().await;
    if swept > 0 {
        info!(swept, "final sweep reclaimed holds");
    }

    info!("slotted stopped");
    Ok(())
}
