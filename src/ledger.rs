use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{Ms, SlotKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

/// The booking record as this core sees it: an opaque id claiming an
/// ordered set of slot identities. Everything else about a booking
/// (payment, user, reference numbers) is the ledger's own concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingIntent {
    pub id: Ulid,
    pub slots: Vec<SlotKey>,
    pub status: BookingStatus,
    /// Quoted amount in minor units.
    pub amount: u64,
    pub created_at: Ms,
}

/// External collaborator persisting booking intents. The coordinator
/// only creates intents, flips their status, and asks which intent (if
/// any) still claims a slot — the orphan sweep uses that to avoid
/// reclaiming a hold whose booking workflow is merely slow.
#[async_trait]
pub trait BookingLedger: Send + Sync {
    /// Create a Pending intent; returns its stable id.
    async fn create(&self, slots: Vec<SlotKey>, amount: u64, now: Ms) -> Ulid;

    async fn get(&self, id: Ulid) -> Option<BookingIntent>;

    /// Returns false if the intent does not exist.
    async fn set_status(&self, id: Ulid, status: BookingStatus) -> bool;

    /// Newest non-cancelled intent claiming `key`, if any.
    async fn claiming_intent(&self, key: &SlotKey) -> Option<BookingIntent>;
}

pub struct MemoryLedger {
    intents: DashMap<Ulid, BookingIntent>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self { intents: DashMap::new() }
    }
}

#[async_trait]
impl BookingLedger for MemoryLedger {
    async fn create(&self, slots: Vec<SlotKey>, amount: u64, now: Ms) -> Ulid {
        let id = Ulid::new();
        self.intents.insert(
            id,
            BookingIntent {
                id,
                slots,
                status: BookingStatus::Pending,
                amount,
                created_at: now,
            },
        );
        id
    }

    async fn get(&self, id: Ulid) -> Option<BookingIntent> {
        self.intents.get(&id).map(|e| e.value().clone())
    }

    async fn set_status(&self, id: Ulid, status: BookingStatus) -> bool {
        match self.intents.get_mut(&id) {
            Some(mut entry) => {
                entry.value_mut().status = status;
                true
            }
            None => false,
        }
    }

    async fn claiming_intent(&self, key: &SlotKey) -> Option<BookingIntent> {
        self.intents
            .iter()
            .filter(|e| {
                e.value().status != BookingStatus::Cancelled && e.value().slots.contains(key)
            })
            .map(|e| e.value().clone())
            .max_by_key(|intent| intent.created_at)
    }
}
