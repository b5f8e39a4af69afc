use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::config::CoreConfig;
use crate::ledger::BookingStatus;
use crate::limits::MAX_SLOTS_PER_ACQUIRE;
use crate::model::*;

use super::queries::validate_range;
use super::{conflict_from, Engine, EngineError};

/// Why a single acquire attempt failed, before retry policy is applied.
enum AttemptError {
    /// Some slot in the set was missing or not bookable at read time.
    Unavailable,
    /// A CAS lost; the attempt's holds were reverted.
    Conflict,
    /// The deadline passed mid-attempt; holds were reverted.
    Deadline,
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub resource_id: Ulid,
    pub range: HourRange,
    pub session_id: Ulid,
    /// Absolute wall-clock deadline (engine clock).
    pub deadline: Ms,
}

#[derive(Debug, Clone)]
pub struct BookingConfirmation {
    pub booking_id: Ulid,
    /// Quoted amount in minor units.
    pub amount: u64,
    pub slots: Vec<SlotKey>,
}

/// Exponential backoff with equal jitter: half the capped delay fixed,
/// half drawn uniformly.
fn backoff_delay(config: &CoreConfig, attempt: u32) -> Duration {
    let exp = config
        .backoff_base
        .saturating_mul(1u32 << (attempt - 1).min(10));
    let capped = exp.min(config.backoff_cap);
    let half = capped / 2;
    let jitter = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
    half + Duration::from_millis(jitter)
}

impl Engine {
    /// Take provisional holds on every hour slot the range covers, in
    /// canonical key order. Retries CAS races with backoff up to the
    /// attempt budget, honoring `deadline`. Every failure path reverts
    /// any holds taken first — the caller never sees a partial set.
    pub async fn acquire(
        &self,
        resource_id: Ulid,
        range: HourRange,
        session_id: Ulid,
        deadline: Ms,
    ) -> Result<HeldSlotSet, EngineError> {
        validate_range(&range)?;
        let keys = range.slot_keys(resource_id);
        if keys.len() > MAX_SLOTS_PER_ACQUIRE {
            return Err(EngineError::LimitExceeded("too many slots in one acquire"));
        }

        let started = std::time::Instant::now();
        let mut attempt = 0u32;
        let result = loop {
            attempt += 1;
            metrics::counter!(crate::observability::ACQUIRE_ATTEMPTS_TOTAL).increment(1);
            if self.now_ms() >= deadline {
                break Err(EngineError::DeadlineExceeded);
            }

            match self
                .try_acquire_once(resource_id, range, &keys, session_id, deadline)
                .await
            {
                Ok(held) => break Ok(held),
                Err(AttemptError::Unavailable) => break Err(EngineError::SlotUnavailable),
                Err(AttemptError::Deadline) => break Err(EngineError::DeadlineExceeded),
                Err(AttemptError::Conflict) => {
                    metrics::counter!(crate::observability::ACQUIRE_CONFLICTS_TOTAL).increment(1);
                    if attempt >= self.config().max_attempts {
                        break Err(EngineError::VersionConflict);
                    }
                    let delay = backoff_delay(self.config(), attempt);
                    if self.now_ms() + delay.as_millis() as Ms >= deadline {
                        break Err(EngineError::DeadlineExceeded);
                    }
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "acquire backoff");
                    tokio::time::sleep(delay).await;
                }
            }
        };
        metrics::histogram!(crate::observability::ACQUIRE_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn try_acquire_once(
        &self,
        resource_id: Ulid,
        range: HourRange,
        keys: &[SlotKey],
        session_id: Ulid,
        deadline: Ms,
    ) -> Result<HeldSlotSet, AttemptError> {
        let now = self.now_ms();
        let slots = self.store.read(resource_id, range).await;

        // The whole set must be present and bookable before any CAS fires.
        let mut eligible = Vec::with_capacity(keys.len());
        for key in keys {
            match slots.iter().find(|s| s.key == *key) {
                Some(s) if s.is_bookable_by(session_id, now) => eligible.push(s.clone()),
                _ => return Err(AttemptError::Unavailable),
            }
        }
        let location_id = eligible[0].location_id;
        let resource_type_id = eligible[0].resource_type_id;

        let mut held: Vec<HeldSlot> = Vec::with_capacity(eligible.len());
        for slot in &eligible {
            let mutation = SlotMutation::Hold { held_at: now };
            match self
                .store
                .compare_and_swap(&slot.key, slot.version, mutation)
                .await
            {
                Ok(version) => held.push(HeldSlot { key: slot.key, version }),
                Err(e) => {
                    debug!(key = ?slot.key, "hold lost: {e}");
                    self.revert_holds(&held).await;
                    return Err(AttemptError::Conflict);
                }
            }
            if self.now_ms() >= deadline {
                self.revert_holds(&held).await;
                return Err(AttemptError::Deadline);
            }
        }

        Ok(HeldSlotSet { session_id, location_id, resource_type_id, slots: held })
    }

    /// Best-effort revert of provisional holds. A revert whose version
    /// has moved is logged and left for the orphan sweep.
    async fn revert_holds(&self, held: &[HeldSlot]) {
        for h in held {
            if let Err(e) = self
                .store
                .compare_and_swap(&h.key, h.version, SlotMutation::Release)
                .await
            {
                warn!(key = ?h.key, "hold revert failed, sweep will reclaim: {e}");
            }
        }
    }

    /// Tie every held slot to `booking_id`, presenting the versions from
    /// hold time. If any slot moved underneath us (say, the sweep
    /// reclaimed it), everything this call touched and every remaining
    /// hold is rolled back; the caller restarts from acquire.
    pub async fn confirm(&self, held: &HeldSlotSet, booking_id: Ulid) -> Result<(), EngineError> {
        let mut confirmed: Vec<HeldSlot> = Vec::with_capacity(held.slots.len());
        for (i, h) in held.slots.iter().enumerate() {
            match self
                .store
                .compare_and_swap(&h.key, h.version, SlotMutation::Confirm { booking_id })
                .await
            {
                Ok(version) => confirmed.push(HeldSlot { key: h.key, version }),
                Err(e) => {
                    warn!(%booking_id, key = ?h.key, "confirm conflict, rolling back: {e}");
                    metrics::counter!(crate::observability::CONFIRM_CONFLICTS_TOTAL).increment(1);
                    self.revert_holds(&confirmed).await;
                    self.revert_holds(&held.slots[i..]).await;
                    return Err(conflict_from(e));
                }
            }
        }

        for h in &confirmed {
            self.apply_delta(held.bucket_key(&h.key), h.key.resource_id, false)
                .await;
        }
        metrics::counter!(crate::observability::BOOKINGS_CONFIRMED_TOTAL).increment(1);
        info!(%booking_id, slots = confirmed.len(), "booking confirmed");
        Ok(())
    }

    /// Return every slot of a booking to the shelf. Idempotent: slots
    /// already released (or claimed by a newer booking) are treated as
    /// done, and a second call is a no-op.
    pub async fn release(&self, booking_id: Ulid) -> Result<(), EngineError> {
        let slots = self.store.slots_by_booking(booking_id).await;
        if slots.is_empty() {
            debug!(%booking_id, "release: no slots bound, nothing to do");
            return Ok(());
        }

        for slot in slots {
            let mut current = slot;
            let mut budget = self.config().delta_retry_budget;
            loop {
                match self
                    .store
                    .compare_and_swap(&current.key, current.version, SlotMutation::Release)
                    .await
                {
                    Ok(_) => {
                        self.apply_delta(current.bucket_key(), current.key.resource_id, true)
                            .await;
                        break;
                    }
                    Err(e) => {
                        budget = budget.saturating_sub(1);
                        match self.store.get(&current.key).await {
                            Some(s) if s.booking_id == Some(booking_id) && budget > 0 => {
                                current = s;
                            }
                            Some(s) if s.booking_id == Some(booking_id) => {
                                warn!(key = ?current.key, "release budget spent: {e}");
                                break;
                            }
                            _ => {
                                // Already released or re-booked — success.
                                debug!(key = ?current.key, "release: slot already moved on");
                                break;
                            }
                        }
                    }
                }
            }
        }

        metrics::counter!(crate::observability::BOOKINGS_RELEASED_TOTAL).increment(1);
        info!(%booking_id, "booking slots released");
        Ok(())
    }

    /// The full booking workflow: acquire, quote, persist the intent,
    /// confirm, mark it Confirmed. A confirm conflict cancels the intent
    /// and surfaces the conflict for the caller to retry from scratch.
    pub async fn create_booking(
        &self,
        req: BookingRequest,
    ) -> Result<BookingConfirmation, EngineError> {
        let held = self
            .acquire(req.resource_id, req.range, req.session_id, req.deadline)
            .await?;

        let amount = self.quoter.price(req.resource_id, req.range);
        let booking_id = self.ledger.create(held.keys(), amount, self.now_ms()).await;

        match self.confirm(&held, booking_id).await {
            Ok(()) => {
                self.ledger.set_status(booking_id, BookingStatus::Confirmed).await;
                Ok(BookingConfirmation { booking_id, amount, slots: held.keys() })
            }
            Err(e) => {
                self.ledger.set_status(booking_id, BookingStatus::Cancelled).await;
                Err(e)
            }
        }
    }

    /// Cancel a booking and free its slots. Safe to call repeatedly.
    pub async fn cancel_booking(&self, booking_id: Ulid) -> Result<(), EngineError> {
        if !self.ledger.set_status(booking_id, BookingStatus::Cancelled).await {
            debug!(%booking_id, "cancel: unknown to ledger, releasing slots anyway");
        }
        self.release(booking_id).await
    }

    // ── Background passes ────────────────────────────────────

    /// Reclaim provisional holds abandoned past the grace period — a
    /// crashed caller that acquired but never confirmed or released.
    /// Holds claimed by a Confirmed intent, or by a Pending intent still
    /// inside the grace window, are skipped. Returns slots reclaimed.
    pub async fn sweep_orphans_pass(&self) -> usize {
        let now = self.now_ms();
        let grace = self.config().orphan_grace.as_millis() as Ms;

        let mut swept = 0;
        for slot in self.store.provisional_holds().await {
            let Some(held_at) = slot.held_at else { continue };
            if now - held_at < grace {
                continue;
            }
            if let Some(intent) = self.ledger.claiming_intent(&slot.key).await {
                match intent.status {
                    BookingStatus::Confirmed => continue,
                    BookingStatus::Pending if now - intent.created_at < grace => continue,
                    _ => {}
                }
            }
            match self
                .store
                .compare_and_swap(&slot.key, slot.version, SlotMutation::Release)
                .await
            {
                Ok(_) => {
                    swept += 1;
                    warn!(key = ?slot.key, "reclaimed orphaned hold");
                    metrics::counter!(crate::observability::ORPHANS_REAPED_TOTAL).increment(1);
                    self.apply_delta(slot.bucket_key(), slot.key.resource_id, true)
                        .await;
                }
                // Moved on since the scan — someone released or confirmed it
                Err(e) => debug!(key = ?slot.key, "orphan skip: {e}"),
            }
        }
        swept
    }

    /// Purge slot and bucket rows past retention; opportunistically clear
    /// lapsed courtesy locks (queries already ignore them — this is
    /// storage hygiene only). Returns (slots purged, buckets purged).
    pub async fn cleanup_pass(&self) -> (usize, usize) {
        let now = self.now_ms();
        let cutoff = now - self.config().retention.as_millis() as Ms;

        let slots = self.store.purge_slots_ending_before(cutoff).await;
        let buckets = self.store.purge_buckets_ending_before(cutoff).await;
        if slots > 0 {
            metrics::counter!(crate::observability::SLOTS_PURGED_TOTAL).increment(slots as u64);
        }

        for slot in self.store.expired_reservations(now).await {
            if let Err(e) = self
                .store
                .compare_and_swap(&slot.key, slot.version, SlotMutation::ClearReservation)
                .await
            {
                debug!(key = ?slot.key, "hygiene clear skipped: {e}");
            }
        }

        if slots > 0 || buckets > 0 {
            info!(slots, buckets, "cleanup purged rows past retention");
        }
        (slots, buckets)
    }
}
