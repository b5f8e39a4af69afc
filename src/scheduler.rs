use std::sync::Arc;

use tracing::info;

use crate::engine::Engine;

/// Background task that periodically rewrites aggregate buckets from the
/// slot store's ground truth.
pub async fn run_reconciler(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(engine.config().reconcile_interval);
    loop {
        interval.tick().await;
        let started = std::time::Instant::now();
        let buckets = engine.reconcile_pass().await;
        metrics::histogram!(crate::observability::RECONCILE_PASS_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        if buckets > 0 {
            info!(buckets, "reconciled aggregate buckets");
        }
    }
}

/// Background task that reclaims provisional holds abandoned by crashed
/// or timed-out callers.
pub async fn run_orphan_sweep(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(engine.config().sweep_interval);
    loop {
        interval.tick().await;
        let swept = engine.sweep_orphans_pass().await;
        if swept > 0 {
            info!(swept, "orphan sweep reclaimed holds");
        }
    }
}

/// Background task that purges rows past retention.
pub async fn run_cleanup(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(engine.config().cleanup_interval);
    loop {
        interval.tick().await;
        engine.cleanup_pass().await;
    }
}
