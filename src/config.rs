use std::time::Duration;

/// Tunables for the reservation core. Defaults match production; every
/// field can be overridden through `SLOTTED_*` environment variables.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Outer acquire attempts before a conflict is surfaced to the caller.
    pub max_attempts: u32,
    /// Base backoff delay; doubles per attempt up to `backoff_cap`.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// CAS retries for a best-effort bucket delta (no sleep between).
    pub delta_retry_budget: u32,
    /// Provisional holds older than this with no live intent are reclaimed.
    pub orphan_grace: Duration,
    pub sweep_interval: Duration,
    /// Cadence of the ground-truth bucket recomputation.
    pub reconcile_interval: Duration,
    /// How far ahead reconciliation looks.
    pub reconcile_window_days: i64,
    pub cleanup_interval: Duration,
    /// Slot and bucket rows are purged this long after their hour ends.
    pub retention: Duration,
    /// Default lifetime of a session courtesy lock.
    pub soft_hold_ttl: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(2),
            delta_retry_budget: 5,
            orphan_grace: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(60),
            reconcile_interval: Duration::from_secs(5 * 60),
            reconcile_window_days: 7,
            cleanup_interval: Duration::from_secs(60 * 60),
            retention: Duration::from_secs(72 * 60 * 60),
            soft_hold_ttl: Duration::from_secs(10 * 60),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl CoreConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_attempts: env_u64("SLOTTED_MAX_ATTEMPTS")
                .map_or(d.max_attempts, |v| v as u32),
            backoff_base: env_u64("SLOTTED_BACKOFF_BASE_MS")
                .map_or(d.backoff_base, Duration::from_millis),
            backoff_cap: env_u64("SLOTTED_BACKOFF_CAP_MS")
                .map_or(d.backoff_cap, Duration::from_millis),
            delta_retry_budget: env_u64("SLOTTED_DELTA_RETRY_BUDGET")
                .map_or(d.delta_retry_budget, |v| v as u32),
            orphan_grace: env_u64("SLOTTED_ORPHAN_GRACE_SECS")
                .map_or(d.orphan_grace, Duration::from_secs),
            sweep_interval: env_u64("SLOTTED_SWEEP_INTERVAL_SECS")
                .map_or(d.sweep_interval, Duration::from_secs),
            reconcile_interval: env_u64("SLOTTED_RECONCILE_INTERVAL_SECS")
                .map_or(d.reconcile_interval, Duration::from_secs),
            reconcile_window_days: env_u64("SLOTTED_RECONCILE_WINDOW_DAYS")
                .map_or(d.reconcile_window_days, |v| v as i64),
            cleanup_interval: env_u64("SLOTTED_CLEANUP_INTERVAL_SECS")
                .map_or(d.cleanup_interval, Duration::from_secs),
            retention: env_u64("SLOTTED_RETENTION_SECS")
                .map_or(d.retention, Duration::from_secs),
            soft_hold_ttl: env_u64("SLOTTED_SOFT_HOLD_TTL_SECS")
                .map_or(d.soft_hold_ttl, Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let c = CoreConfig::default();
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.backoff_base, Duration::from_millis(100));
        assert_eq!(c.orphan_grace, Duration::from_secs(900));
        assert_eq!(c.reconcile_interval, Duration::from_secs(300));
        assert_eq!(c.reconcile_window_days, 7);
    }
}
