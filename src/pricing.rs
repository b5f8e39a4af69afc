use ulid::Ulid;

use crate::model::HourRange;

/// Injected pricing function. Pure and side-effect-free from this core's
/// perspective; invoked between acquire and confirm. One implementation
/// is chosen at construction time.
pub trait Quoter: Send + Sync {
    /// Price for booking `resource_id` over `range`, in minor units.
    fn price(&self, resource_id: Ulid, range: HourRange) -> u64;
}

/// Flat hourly rate.
pub struct FlatRate {
    pub per_hour_minor: u64,
}

impl Quoter for FlatRate {
    fn price(&self, _resource_id: Ulid, range: HourRange) -> u64 {
        self.per_hour_minor * range.hour_count() as u64
    }
}
