//! Hard caps on request shape. Tunables live in `config`; these are the
//! bounds no configuration can exceed.

use crate::model::Ms;

/// Widest range a single acquire may cover (48 hour slots = 2 days).
pub const MAX_SLOTS_PER_ACQUIRE: usize = 48;

/// Widest window an availability query may scan.
pub const MAX_QUERY_WINDOW_MS: Ms = 30 * 86_400_000;

/// Most days a single provisioning call may create rows for.
pub const MAX_PROVISION_DAYS: i64 = 120;

/// Timestamps outside this window are rejected outright.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000; // 2100-01-01
