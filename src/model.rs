use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub const MS_PER_HOUR: Ms = 3_600_000;
pub const MS_PER_DAY: Ms = 86_400_000;

/// Identity of one resource-hour: `(resource_id, day, hour)`.
///
/// `day` counts whole days since the Unix epoch; `hour` is 0–23.
/// The derived `Ord` is lexicographic over the field order, which is the
/// canonical acquisition order for multi-slot operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub resource_id: Ulid,
    pub day: i64,
    pub hour: u8,
}

impl SlotKey {
    pub fn new(resource_id: Ulid, day: i64, hour: u8) -> Self {
        debug_assert!(hour < 24, "hour slot must be 0-23");
        Self { resource_id, day, hour }
    }

    pub fn start_ms(&self) -> Ms {
        self.day * MS_PER_DAY + Ms::from(self.hour) * MS_PER_HOUR
    }

    pub fn end_ms(&self) -> Ms {
        self.start_ms() + MS_PER_HOUR
    }
}

/// Half-open interval `[start, end)` in unix milliseconds, resolved to
/// hour granularity when mapped onto slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    pub start: Ms,
    pub end: Ms,
}

impl HourRange {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "range start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Number of hour slots this range touches.
    pub fn hour_count(&self) -> usize {
        self.slot_hours().count()
    }

    /// Every `(day, hour)` pair whose hour slot overlaps the range,
    /// ascending.
    pub fn slot_hours(&self) -> impl Iterator<Item = (i64, u8)> {
        let first = self.start.div_euclid(MS_PER_HOUR);
        let last = (self.end - 1).div_euclid(MS_PER_HOUR);
        (first..=last).map(|h| (h.div_euclid(24), h.rem_euclid(24) as u8))
    }

    /// Resolve the range to the ordered slot identities it covers for a
    /// single resource. Already sorted: one resource, ascending hours.
    pub fn slot_keys(&self, resource_id: Ulid) -> Vec<SlotKey> {
        self.slot_hours()
            .map(|(day, hour)| SlotKey { resource_id, day, hour })
            .collect()
    }
}

/// Authoritative record of one resource's availability for one hour.
///
/// `location_id` and `resource_type_id` are denormalized onto every row
/// so aggregate bucket keys can be derived without a directory lookup.
/// All mutation goes through the store's compare-and-swap; `version`
/// advances by exactly 1 on every committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub key: SlotKey,
    pub location_id: Ulid,
    pub resource_type_id: Ulid,
    pub available: bool,
    pub booking_id: Option<Ulid>,
    pub version: u64,
    /// Session-scoped courtesy lock; ignored once `reserved_until` passes.
    pub reserved_until: Option<Ms>,
    pub reserved_by: Option<Ulid>,
    /// Stamped when a provisional hold is taken, cleared on confirm or
    /// release. The orphan sweep measures hold age from this.
    pub held_at: Option<Ms>,
}

impl Slot {
    /// A freshly provisioned, open slot at version 1.
    pub fn provisioned(key: SlotKey, location_id: Ulid, resource_type_id: Ulid) -> Self {
        Self {
            key,
            location_id,
            resource_type_id,
            available: true,
            booking_id: None,
            version: 1,
            reserved_until: None,
            reserved_by: None,
            held_at: None,
        }
    }

    pub fn bucket_key(&self) -> BucketKey {
        BucketKey {
            location_id: self.location_id,
            resource_type_id: self.resource_type_id,
            day: self.key.day,
            hour: self.key.hour,
        }
    }

    /// An unexpired courtesy lock exists.
    pub fn is_reserved(&self, now: Ms) -> bool {
        self.reserved_until.is_some_and(|until| until > now)
    }

    pub fn is_reserved_by(&self, session_id: Ulid, now: Ms) -> bool {
        self.is_reserved(now) && self.reserved_by == Some(session_id)
    }

    /// Visibility rule for new reservations: open, and either carrying no
    /// live courtesy lock or one owned by this session. `now` must come
    /// from the store's clock, never a caller's.
    pub fn is_bookable_by(&self, session_id: Ulid, now: Ms) -> bool {
        self.available && (!self.is_reserved(now) || self.reserved_by == Some(session_id))
    }

    /// A provisional hold: taken off the shelf but not yet tied to a booking.
    pub fn is_provisional_hold(&self) -> bool {
        !self.available && self.booking_id.is_none() && self.held_at.is_some()
    }
}

/// The compare-and-swap payload: what a conditional write does to a slot
/// once its version matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotMutation {
    /// Provisional hold: off the shelf, no booking yet.
    Hold { held_at: Ms },
    /// Tie the held slot to a booking.
    Confirm { booking_id: Ulid },
    /// Back on the shelf.
    Release,
    /// Session-scoped courtesy lock.
    Reserve { session_id: Ulid, until: Ms },
    ClearReservation,
}

impl SlotMutation {
    /// Preconditions beyond the version match. A hold additionally
    /// requires the slot to be open, mirroring the conditional update it
    /// descends from.
    pub fn admissible(&self, slot: &Slot) -> bool {
        match self {
            SlotMutation::Hold { .. } => slot.available,
            _ => true,
        }
    }

    /// Apply to a slot whose version already matched. The store bumps the
    /// version afterwards.
    pub fn apply(&self, slot: &mut Slot) {
        match self {
            SlotMutation::Hold { held_at } => {
                slot.available = false;
                slot.booking_id = None;
                slot.held_at = Some(*held_at);
            }
            SlotMutation::Confirm { booking_id } => {
                slot.booking_id = Some(*booking_id);
                slot.held_at = None;
            }
            SlotMutation::Release => {
                slot.available = true;
                slot.booking_id = None;
                slot.held_at = None;
            }
            SlotMutation::Reserve { session_id, until } => {
                slot.reserved_by = Some(*session_id);
                slot.reserved_until = Some(*until);
            }
            SlotMutation::ClearReservation => {
                slot.reserved_by = None;
                slot.reserved_until = None;
            }
        }
    }
}

/// Identity of one denormalized availability bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub location_id: Ulid,
    pub resource_type_id: Ulid,
    pub day: i64,
    pub hour: u8,
}

impl BucketKey {
    pub fn start_ms(&self) -> Ms {
        self.day * MS_PER_DAY + Ms::from(self.hour) * MS_PER_HOUR
    }

    pub fn end_ms(&self) -> Ms {
        self.start_ms() + MS_PER_HOUR
    }
}

/// Denormalized per-(location, type, day, hour) availability, kept in
/// sync best-effort by deltas and exactly by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub key: BucketKey,
    pub available_count: u32,
    pub total_count: u32,
    pub available_resource_ids: BTreeSet<Ulid>,
    pub version: u64,
    pub last_synced: Ms,
}

impl AggregateBucket {
    pub fn has_available(&self) -> bool {
        self.available_count > 0
    }

    pub fn is_fully_booked(&self) -> bool {
        self.available_count == 0
    }

    pub fn first_available(&self) -> Option<Ulid> {
        self.available_resource_ids.iter().next().copied()
    }

    pub fn occupancy_rate(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        f64::from(self.total_count - self.available_count) / f64::from(self.total_count) * 100.0
    }
}

/// Read-path view of a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketView {
    pub key: BucketKey,
    pub available_count: u32,
    pub total_count: u32,
    pub available_resource_ids: Vec<Ulid>,
    pub version: u64,
}

impl From<&AggregateBucket> for BucketView {
    fn from(b: &AggregateBucket) -> Self {
        Self {
            key: b.key,
            available_count: b.available_count,
            total_count: b.total_count,
            available_resource_ids: b.available_resource_ids.iter().copied().collect(),
            version: b.version,
        }
    }
}

/// One slot held by an in-flight acquisition, with the version the
/// confirm step must present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldSlot {
    pub key: SlotKey,
    pub version: u64,
}

/// The full set returned by a successful acquire. All slots belong to one
/// resource, so location and type ride along once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldSlotSet {
    pub session_id: Ulid,
    pub location_id: Ulid,
    pub resource_type_id: Ulid,
    pub slots: Vec<HeldSlot>,
}

impl HeldSlotSet {
    pub fn keys(&self) -> Vec<SlotKey> {
        self.slots.iter().map(|h| h.key).collect()
    }

    pub fn bucket_key(&self, key: &SlotKey) -> BucketKey {
        BucketKey {
            location_id: self.location_id,
            resource_type_id: self.resource_type_id,
            day: key.day,
            hour: key.hour,
        }
    }
}
