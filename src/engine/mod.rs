mod aggregate;
mod booking;
mod error;
mod queries;

pub use booking::{BookingConfirmation, BookingRequest};
pub use error::EngineError;

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::invalidate::InvalidationHub;
use crate::ledger::BookingLedger;
use crate::model::*;
use crate::pricing::Quoter;
use crate::store::{SlotStore, StoreError};

/// The reservation core: coordinator, aggregator and sweep passes over a
/// swappable slot store. All slot writes go through the store's CAS; the
/// engine itself holds no locks.
pub struct Engine {
    pub(crate) store: Arc<dyn SlotStore>,
    pub(crate) ledger: Arc<dyn BookingLedger>,
    pub(crate) quoter: Arc<dyn Quoter>,
    pub invalidations: Arc<InvalidationHub>,
    pub(crate) clock: Arc<dyn Clock>,
    config: CoreConfig,
}

impl Engine {
    pub fn new(
        store: Arc<dyn SlotStore>,
        ledger: Arc<dyn BookingLedger>,
        quoter: Arc<dyn Quoter>,
        invalidations: Arc<InvalidationHub>,
        clock: Arc<dyn Clock>,
        config: CoreConfig,
    ) -> Self {
        Self { store, ledger, quoter, invalidations, clock, config }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub(crate) fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }
}

/// Map a store failure into the caller-facing taxonomy. A missing row
/// during a race reads the same as losing the race.
pub(crate) fn conflict_from(err: StoreError) -> EngineError {
    match err {
        StoreError::Conflict | StoreError::NotFound => EngineError::VersionConflict,
    }
}
