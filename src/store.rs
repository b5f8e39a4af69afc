use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// Failure of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The stored version no longer matches, or the mutation's
    /// precondition failed — another writer got there first.
    Conflict,
    NotFound,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Conflict => write!(f, "version conflict"),
            StoreError::NotFound => write!(f, "row not found"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Authoritative storage for slots and aggregate buckets.
///
/// `compare_and_swap` is the only way a slot changes; nothing writes a
/// slot unconditionally. Buckets additionally allow `put_bucket`, used
/// solely by reconciliation because it recomputes from ground truth.
/// The trait is async so a backend with conditional-UPDATE semantics can
/// stand in for the in-memory store.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Snapshot of all slots for a resource overlapping the range,
    /// ordered by key. No locking.
    async fn read(&self, resource_id: Ulid, range: HourRange) -> Vec<Slot>;

    async fn get(&self, key: &SlotKey) -> Option<Slot>;

    /// Apply `mutation` iff the stored version equals `expected_version`
    /// and the mutation's precondition holds; bumps the version by
    /// exactly 1 and returns the new version.
    async fn compare_and_swap(
        &self,
        key: &SlotKey,
        expected_version: u64,
        mutation: SlotMutation,
    ) -> Result<u64, StoreError>;

    /// Insert a provisioned row if absent. Returns false if the key
    /// already exists (provisioning is idempotent).
    async fn insert_new(&self, slot: Slot) -> bool;

    /// All slots currently tied to a booking.
    async fn slots_by_booking(&self, booking_id: Ulid) -> Vec<Slot>;

    /// All provisional holds (unavailable, no booking), sweep input.
    async fn provisional_holds(&self) -> Vec<Slot>;

    /// Slots whose courtesy lock has lapsed, hygiene input.
    async fn expired_reservations(&self, now: Ms) -> Vec<Slot>;

    /// Ground truth for one bucket: every slot matching its
    /// location/type/day/hour.
    async fn slots_in_bucket(&self, key: &BucketKey) -> Vec<Slot>;

    /// Distinct bucket keys with at least one slot in `[start_day, end_day]`.
    async fn bucket_keys_in_days(&self, start_day: i64, end_day: i64) -> Vec<BucketKey>;

    /// Remove slot rows whose hour ended before `cutoff`. Returns count.
    async fn purge_slots_ending_before(&self, cutoff: Ms) -> usize;

    async fn get_bucket(&self, key: &BucketKey) -> Option<AggregateBucket>;

    /// Conditional bucket replacement; same contract as the slot CAS.
    async fn cas_bucket(
        &self,
        key: &BucketKey,
        expected_version: u64,
        bucket: AggregateBucket,
    ) -> Result<u64, StoreError>;

    /// Unconditional overwrite, reconciliation only. The stored version
    /// still advances past the old one.
    async fn put_bucket(&self, bucket: AggregateBucket) -> u64;

    async fn purge_buckets_ending_before(&self, cutoff: Ms) -> usize;
}

/// In-memory reference backend. Per-row atomicity comes from the map's
/// entry guards; a CAS holds one shard lock for the compare, the apply
/// and the version bump together.
pub struct MemoryStore {
    slots: DashMap<SlotKey, Slot>,
    buckets: DashMap<BucketKey, AggregateBucket>,
    /// Reverse index: booking id → slot keys it occupies.
    by_booking: DashMap<Ulid, Vec<SlotKey>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            buckets: DashMap::new(),
            by_booking: DashMap::new(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn index_booking(&self, booking_id: Ulid, key: SlotKey) {
        self.by_booking.entry(booking_id).or_default().push(key);
    }

    fn unindex_booking(&self, booking_id: Ulid, key: &SlotKey) {
        if let Some(mut keys) = self.by_booking.get_mut(&booking_id) {
            keys.retain(|k| k != key);
        }
    }
}

#[async_trait]
impl SlotStore for MemoryStore {
    async fn read(&self, resource_id: Ulid, range: HourRange) -> Vec<Slot> {
        let mut out: Vec<Slot> = self
            .slots
            .iter()
            .filter(|e| {
                let k = e.key();
                k.resource_id == resource_id
                    && k.start_ms() < range.end
                    && k.end_ms() > range.start
            })
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|s| s.key);
        out
    }

    async fn get(&self, key: &SlotKey) -> Option<Slot> {
        self.slots.get(key).map(|e| e.value().clone())
    }

    async fn compare_and_swap(
        &self,
        key: &SlotKey,
        expected_version: u64,
        mutation: SlotMutation,
    ) -> Result<u64, StoreError> {
        let mut entry = self.slots.get_mut(key).ok_or(StoreError::NotFound)?;
        let slot = entry.value_mut();
        if slot.version != expected_version || !mutation.admissible(slot) {
            return Err(StoreError::Conflict);
        }

        match &mutation {
            SlotMutation::Confirm { booking_id } => {
                self.index_booking(*booking_id, *key);
            }
            SlotMutation::Release => {
                if let Some(b) = slot.booking_id {
                    self.unindex_booking(b, key);
                }
            }
            _ => {}
        }

        mutation.apply(slot);
        slot.version += 1;
        Ok(slot.version)
    }

    async fn insert_new(&self, slot: Slot) -> bool {
        match self.slots.entry(slot.key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(slot);
                true
            }
        }
    }

    async fn slots_by_booking(&self, booking_id: Ulid) -> Vec<Slot> {
        let keys = self
            .by_booking
            .get(&booking_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out: Vec<Slot> = keys
            .iter()
            .filter_map(|k| self.slots.get(k).map(|e| e.value().clone()))
            .filter(|s| s.booking_id == Some(booking_id))
            .collect();
        out.sort_by_key(|s| s.key);
        out
    }

    async fn provisional_holds(&self) -> Vec<Slot> {
        self.slots
            .iter()
            .filter(|e| e.value().is_provisional_hold())
            .map(|e| e.value().clone())
            .collect()
    }

    async fn expired_reservations(&self, now: Ms) -> Vec<Slot> {
        self.slots
            .iter()
            .filter(|e| e.value().reserved_until.is_some_and(|until| until <= now))
            .map(|e| e.value().clone())
            .collect()
    }

    async fn slots_in_bucket(&self, key: &BucketKey) -> Vec<Slot> {
        let mut out: Vec<Slot> = self
            .slots
            .iter()
            .filter(|e| {
                let s = e.value();
                s.location_id == key.location_id
                    && s.resource_type_id == key.resource_type_id
                    && s.key.day == key.day
                    && s.key.hour == key.hour
            })
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|s| s.key);
        out
    }

    async fn bucket_keys_in_days(&self, start_day: i64, end_day: i64) -> Vec<BucketKey> {
        let mut keys: Vec<BucketKey> = self
            .slots
            .iter()
            .filter(|e| (start_day..=end_day).contains(&e.key().day))
            .map(|e| e.value().bucket_key())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    async fn purge_slots_ending_before(&self, cutoff: Ms) -> usize {
        let doomed: Vec<SlotKey> = self
            .slots
            .iter()
            .filter(|e| e.key().end_ms() < cutoff)
            .map(|e| *e.key())
            .collect();
        for key in &doomed {
            if let Some((_, slot)) = self.slots.remove(key)
                && let Some(b) = slot.booking_id {
                    self.unindex_booking(b, key);
                }
        }
        doomed.len()
    }

    async fn get_bucket(&self, key: &BucketKey) -> Option<AggregateBucket> {
        self.buckets.get(key).map(|e| e.value().clone())
    }

    async fn cas_bucket(
        &self,
        key: &BucketKey,
        expected_version: u64,
        mut bucket: AggregateBucket,
    ) -> Result<u64, StoreError> {
        let mut entry = self.buckets.get_mut(key).ok_or(StoreError::NotFound)?;
        let stored = entry.value_mut();
        if stored.version != expected_version {
            return Err(StoreError::Conflict);
        }
        bucket.version = stored.version + 1;
        let new_version = bucket.version;
        *stored = bucket;
        Ok(new_version)
    }

    async fn put_bucket(&self, mut bucket: AggregateBucket) -> u64 {
        let mut entry = self.buckets.entry(bucket.key).or_insert_with(|| {
            let mut fresh = bucket.clone();
            fresh.version = 0;
            fresh
        });
        bucket.version = entry.value().version + 1;
        let new_version = bucket.version;
        *entry.value_mut() = bucket;
        new_version
    }

    async fn purge_buckets_ending_before(&self, cutoff: Ms) -> usize {
        let doomed: Vec<BucketKey> = self
            .buckets
            .iter()
            .filter(|e| e.key().end_ms() < cutoff)
            .map(|e| *e.key())
            .collect();
        for key in &doomed {
            self.buckets.remove(key);
        }
        doomed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_slot(resource_id: Ulid, day: i64, hour: u8) -> Slot {
        Slot::provisioned(
            SlotKey::new(resource_id, day, hour),
            Ulid::from_parts(1, 1),
            Ulid::from_parts(2, 2),
        )
    }

    #[tokio::test]
    async fn cas_applies_and_bumps_version() {
        let store = MemoryStore::new();
        let rid = Ulid::new();
        let slot = open_slot(rid, 10, 9);
        let key = slot.key;
        assert!(store.insert_new(slot).await);

        let v = store
            .compare_and_swap(&key, 1, SlotMutation::Hold { held_at: 0 })
            .await
            .unwrap();
        assert_eq!(v, 2);

        let stored = store.get(&key).await.unwrap();
        assert!(!stored.available);
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn cas_rejects_stale_version() {
        let store = MemoryStore::new();
        let slot = open_slot(Ulid::new(), 10, 9);
        let key = slot.key;
        store.insert_new(slot).await;

        store
            .compare_and_swap(&key, 1, SlotMutation::Hold { held_at: 0 })
            .await
            .unwrap();

        // The version moved to 2; a writer still holding 1 must lose.
        let err = store
            .compare_and_swap(&key, 1, SlotMutation::Release)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Conflict);
    }

    #[tokio::test]
    async fn cas_rejects_hold_on_taken_slot_even_with_matching_version() {
        let store = MemoryStore::new();
        let mut slot = open_slot(Ulid::new(), 10, 9);
        slot.available = false;
        let key = slot.key;
        store.insert_new(slot).await;

        let err = store
            .compare_and_swap(&key, 1, SlotMutation::Hold { held_at: 0 })
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Conflict);
    }

    #[tokio::test]
    async fn cas_missing_row() {
        let store = MemoryStore::new();
        let key = SlotKey::new(Ulid::new(), 1, 1);
        let err = store
            .compare_and_swap(&key, 1, SlotMutation::Release)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound);
    }

    #[tokio::test]
    async fn insert_new_is_idempotent() {
        let store = MemoryStore::new();
        let slot = open_slot(Ulid::new(), 10, 9);
        assert!(store.insert_new(slot.clone()).await);
        assert!(!store.insert_new(slot).await);
        assert_eq!(store.slot_count(), 1);
    }

    #[tokio::test]
    async fn read_is_ordered_and_range_scoped() {
        let store = MemoryStore::new();
        let rid = Ulid::new();
        for hour in [9u8, 7, 8, 11] {
            store.insert_new(open_slot(rid, 10, hour)).await;
        }
        // Different resource, same hours — must not leak in
        store.insert_new(open_slot(Ulid::new(), 10, 8)).await;

        let range = HourRange::new(
            10 * MS_PER_DAY + 7 * MS_PER_HOUR,
            10 * MS_PER_DAY + 10 * MS_PER_HOUR,
        );
        let slots = store.read(rid, range).await;
        let hours: Vec<u8> = slots.iter().map(|s| s.key.hour).collect();
        assert_eq!(hours, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn booking_index_tracks_confirm_and_release() {
        let store = MemoryStore::new();
        let slot = open_slot(Ulid::new(), 10, 9);
        let key = slot.key;
        store.insert_new(slot).await;

        let booking = Ulid::new();
        let v = store
            .compare_and_swap(&key, 1, SlotMutation::Hold { held_at: 0 })
            .await
            .unwrap();
        store
            .compare_and_swap(&key, v, SlotMutation::Confirm { booking_id: booking })
            .await
            .unwrap();

        let found = store.slots_by_booking(booking).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, key);

        let v = found[0].version;
        store
            .compare_and_swap(&key, v, SlotMutation::Release)
            .await
            .unwrap();
        assert!(store.slots_by_booking(booking).await.is_empty());
    }

    #[tokio::test]
    async fn bucket_cas_and_put() {
        let store = MemoryStore::new();
        let slot = open_slot(Ulid::new(), 10, 9);
        let bkey = slot.bucket_key();

        let bucket = AggregateBucket {
            key: bkey,
            available_count: 1,
            total_count: 1,
            available_resource_ids: std::collections::BTreeSet::from([slot.key.resource_id]),
            version: 0,
            last_synced: 0,
        };
        let v1 = store.put_bucket(bucket.clone()).await;
        assert_eq!(v1, 1);

        let mut updated = store.get_bucket(&bkey).await.unwrap();
        updated.available_count = 0;
        updated.available_resource_ids.clear();
        let v2 = store.cas_bucket(&bkey, v1, updated).await.unwrap();
        assert_eq!(v2, 2);

        // Stale CAS loses
        let stale = store.get_bucket(&bkey).await.unwrap();
        let err = store.cas_bucket(&bkey, v1, stale).await.unwrap_err();
        assert_eq!(err, StoreError::Conflict);

        // Overwrite still advances the version
        let v3 = store.put_bucket(bucket).await;
        assert_eq!(v3, 3);
    }

    #[tokio::test]
    async fn purge_respects_cutoff() {
        let store = MemoryStore::new();
        let rid = Ulid::new();
        store.insert_new(open_slot(rid, 1, 9)).await;
        store.insert_new(open_slot(rid, 5, 9)).await;

        let cutoff = 3 * MS_PER_DAY;
        let purged = store.purge_slots_ending_before(cutoff).await;
        assert_eq!(purged, 1);
        assert_eq!(store.slot_count(), 1);
        assert!(store.get(&SlotKey::new(rid, 5, 9)).await.is_some());
    }
}
