use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

pub(super) fn validate_range(range: &HourRange) -> Result<(), EngineError> {
    if range.start < MIN_VALID_TIMESTAMP_MS || range.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if range.start >= range.end {
        return Err(EngineError::LimitExceeded("empty range"));
    }
    if range.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("range too wide"));
    }
    Ok(())
}

impl Engine {
    /// Snapshot of a resource's slots over a range, ordered by key.
    pub async fn slots(&self, resource_id: Ulid, range: HourRange) -> Result<Vec<Slot>, EngineError> {
        validate_range(&range)?;
        Ok(self.store.read(resource_id, range).await)
    }

    /// Slot keys a session could book right now: open, and not under
    /// someone else's live courtesy lock. Uses the engine clock only.
    pub async fn bookable_slots(
        &self,
        resource_id: Ulid,
        range: HourRange,
        session_id: Ulid,
    ) -> Result<Vec<SlotKey>, EngineError> {
        validate_range(&range)?;
        let now = self.now_ms();
        Ok(self
            .store
            .read(resource_id, range)
            .await
            .into_iter()
            .filter(|s| s.is_bookable_by(session_id, now))
            .map(|s| s.key)
            .collect())
    }

    /// Place a session courtesy lock on every bookable slot in the range.
    /// Best-effort per slot: a slot that races away is skipped, not an
    /// error. Returns the keys actually reserved.
    pub async fn reserve_temporarily(
        &self,
        resource_id: Ulid,
        range: HourRange,
        session_id: Ulid,
    ) -> Result<Vec<SlotKey>, EngineError> {
        validate_range(&range)?;
        let now = self.now_ms();
        let until = now + self.config().soft_hold_ttl.as_millis() as Ms;

        let mut reserved = Vec::new();
        for slot in self.store.read(resource_id, range).await {
            if !slot.is_bookable_by(session_id, now) {
                continue;
            }
            let mutation = SlotMutation::Reserve { session_id, until };
            match self.store.compare_and_swap(&slot.key, slot.version, mutation).await {
                Ok(_) => reserved.push(slot.key),
                Err(e) => debug!(key = ?slot.key, "soft hold skipped: {e}"),
            }
        }

        if reserved.is_empty() {
            return Err(EngineError::SlotUnavailable);
        }
        Ok(reserved)
    }

    /// Drop this session's courtesy locks in the range. Locks held by
    /// other sessions are untouched.
    pub async fn clear_temporary(
        &self,
        resource_id: Ulid,
        range: HourRange,
        session_id: Ulid,
    ) -> Result<usize, EngineError> {
        validate_range(&range)?;
        let mut cleared = 0;
        for slot in self.store.read(resource_id, range).await {
            if slot.reserved_by != Some(session_id) {
                continue;
            }
            match self
                .store
                .compare_and_swap(&slot.key, slot.version, SlotMutation::ClearReservation)
                .await
            {
                Ok(_) => cleared += 1,
                Err(e) => debug!(key = ?slot.key, "clear skipped: {e}"),
            }
        }
        Ok(cleared)
    }

    /// Is the session's courtesy lock on this slot still live? Returns
    /// `ReservationExpired` once it has lapsed — the caller should show
    /// the slot as up for grabs again.
    pub async fn verify_reservation(
        &self,
        key: &SlotKey,
        session_id: Ulid,
    ) -> Result<(), EngineError> {
        let slot = self
            .store
            .get(key)
            .await
            .ok_or(EngineError::NotFound(key.resource_id))?;
        let now = self.now_ms();
        if slot.is_reserved_by(session_id, now) {
            return Ok(());
        }
        if slot.reserved_by == Some(session_id) {
            return Err(EngineError::ReservationExpired);
        }
        Err(EngineError::SlotUnavailable)
    }

    /// Create open slot rows for a resource, one per hour, for
    /// `day_count` days starting at `start_day`. Idempotent: existing
    /// rows are left alone. Affected buckets are reconciled so totals
    /// are correct immediately. Returns the number of rows created.
    pub async fn provision(
        &self,
        resource_id: Ulid,
        location_id: Ulid,
        resource_type_id: Ulid,
        start_day: i64,
        day_count: i64,
    ) -> Result<usize, EngineError> {
        if day_count <= 0 || day_count > MAX_PROVISION_DAYS {
            return Err(EngineError::LimitExceeded("provision day count"));
        }

        let mut created = 0;
        for day in start_day..start_day + day_count {
            for hour in 0u8..24 {
                let key = SlotKey::new(resource_id, day, hour);
                let slot = Slot::provisioned(key, location_id, resource_type_id);
                if self.store.insert_new(slot).await {
                    created += 1;
                }
            }
        }

        if created > 0 {
            for day in start_day..start_day + day_count {
                for hour in 0u8..24 {
                    let bkey = BucketKey { location_id, resource_type_id, day, hour };
                    self.reconcile(bkey).await;
                }
            }
        }

        debug!(%resource_id, created, "provisioned slot rows");
        Ok(created)
    }
}
