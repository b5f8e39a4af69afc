use std::collections::BTreeSet;

use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::*;
use crate::store::StoreError;

use super::queries::validate_range;
use super::{Engine, EngineError};

impl Engine {
    /// Best-effort bucket update after a confirm or release. CAS with a
    /// small budget — several resources of the same type and hour can be
    /// booked concurrently, so the bucket row races too. Exhaustion is
    /// logged and counted, never surfaced: the next reconcile repairs
    /// the drift.
    pub(crate) async fn apply_delta(
        &self,
        key: BucketKey,
        resource_id: Ulid,
        became_available: bool,
    ) {
        for _ in 0..self.config().delta_retry_budget {
            let Some(bucket) = self.store.get_bucket(&key).await else {
                // No bucket yet — build it from ground truth instead.
                self.reconcile(key).await;
                return;
            };
            let expected = bucket.version;

            let mut next = bucket;
            if became_available {
                next.available_resource_ids.insert(resource_id);
            } else {
                next.available_resource_ids.remove(&resource_id);
            }
            next.available_count = next.available_resource_ids.len() as u32;

            match self.store.cas_bucket(&key, expected, next).await {
                Ok(_) => {
                    self.invalidations.publish(&key);
                    return;
                }
                Err(StoreError::Conflict) => continue,
                Err(StoreError::NotFound) => {
                    self.reconcile(key).await;
                    return;
                }
            }
        }

        warn!(?key, %resource_id, "bucket delta budget exhausted, leaving drift for reconcile");
        metrics::counter!(crate::observability::DELTA_EXHAUSTED_TOTAL).increment(1);
    }

    /// Recompute one bucket from the slot store's ground truth and
    /// overwrite it unconditionally. Idempotent; the sole authority for
    /// resolving drift.
    pub async fn reconcile(&self, key: BucketKey) {
        let slots = self.store.slots_in_bucket(&key).await;
        let available: BTreeSet<Ulid> = slots
            .iter()
            .filter(|s| s.available)
            .map(|s| s.key.resource_id)
            .collect();

        let bucket = AggregateBucket {
            key,
            available_count: available.len() as u32,
            total_count: slots.len() as u32,
            available_resource_ids: available,
            version: 0, // store assigns the next version on overwrite
            last_synced: self.now_ms(),
        };

        self.store.put_bucket(bucket).await;
        metrics::counter!(crate::observability::BUCKETS_RECONCILED_TOTAL).increment(1);
        self.invalidations.publish(&key);
    }

    /// Reconcile every bucket with slots inside the configured future
    /// window. Returns the number of buckets rewritten.
    pub async fn reconcile_pass(&self) -> usize {
        let now = self.now_ms();
        let start_day = now.div_euclid(MS_PER_DAY);
        let end_day = start_day + self.config().reconcile_window_days;

        let keys = self.store.bucket_keys_in_days(start_day, end_day).await;
        let count = keys.len();
        futures::future::join_all(keys.into_iter().map(|key| self.reconcile(key))).await;
        debug!(buckets = count, "reconcile pass complete");
        count
    }

    /// Read-path lookup: the bucket as last synced. `None` until the
    /// first delta or reconcile touches it.
    pub async fn query(&self, key: &BucketKey) -> Option<BucketView> {
        self.store.get_bucket(key).await.map(|b| BucketView::from(&b))
    }

    /// Bucket views for every hour of a range at one location and type,
    /// ascending. Hours with no bucket yet are skipped.
    pub async fn query_range(
        &self,
        location_id: Ulid,
        resource_type_id: Ulid,
        range: HourRange,
    ) -> Result<Vec<BucketView>, EngineError> {
        validate_range(&range)?;
        let mut out = Vec::new();
        for (day, hour) in range.slot_hours() {
            let key = BucketKey { location_id, resource_type_id, day, hour };
            if let Some(view) = self.query(&key).await {
                out.push(view);
            }
        }
        Ok(out)
    }
}
