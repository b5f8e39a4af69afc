use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: acquire attempts, including retries. Labels: none.
pub const ACQUIRE_ATTEMPTS_TOTAL: &str = "slotted_acquire_attempts_total";

/// Counter: acquire attempts that lost a CAS race and rolled back.
pub const ACQUIRE_CONFLICTS_TOTAL: &str = "slotted_acquire_conflicts_total";

/// Histogram: end-to-end acquire latency in seconds.
pub const ACQUIRE_DURATION_SECONDS: &str = "slotted_acquire_duration_seconds";

/// Counter: bookings confirmed.
pub const BOOKINGS_CONFIRMED_TOTAL: &str = "slotted_bookings_confirmed_total";

/// Counter: bookings released (cancellations and rollbacks).
pub const BOOKINGS_RELEASED_TOTAL: &str = "slotted_bookings_released_total";

/// Counter: confirm calls that hit a version conflict and rolled back.
pub const CONFIRM_CONFLICTS_TOTAL: &str = "slotted_confirm_conflicts_total";

// ── Aggregate / background health ───────────────────────────────

/// Counter: bucket deltas that exhausted their CAS budget (drift until
/// the next reconcile).
pub const DELTA_EXHAUSTED_TOTAL: &str = "slotted_delta_exhausted_total";

/// Counter: cache invalidation keys published.
pub const INVALIDATIONS_PUBLISHED_TOTAL: &str = "slotted_invalidations_published_total";

/// Counter: abandoned provisional holds reclaimed by the sweep. The only
/// place orphan detection is surfaced.
pub const ORPHANS_REAPED_TOTAL: &str = "slotted_orphans_reaped_total";

/// Histogram: duration of one full reconciliation pass in seconds.
pub const RECONCILE_PASS_DURATION_SECONDS: &str = "slotted_reconcile_pass_duration_seconds";

/// Counter: buckets rewritten from ground truth.
pub const BUCKETS_RECONCILED_TOTAL: &str = "slotted_buckets_reconciled_total";

/// Counter: slot rows purged past retention.
pub const SLOTS_PURGED_TOTAL: &str = "slotted_slots_purged_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
