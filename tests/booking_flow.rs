//! End-to-end exercise of the public reservation API: a provisioned
//! fleet, a concurrent booking storm, background passes, and the
//! no-double-booking invariant checked against ground truth.

use std::sync::Arc;
use std::time::Duration;

use ulid::Ulid;

use slotted::{
    BookingRequest, BucketKey, CoreConfig, Engine, EngineError, FlatRate, HourRange,
    InvalidationHub, ManualClock, MemoryLedger, MemoryStore, Ms, SlotKey, SlotStore,
};

const H: Ms = 3_600_000;
const MS_PER_DAY: Ms = 86_400_000;
const DAY0: i64 = 20_000;
const NOW0: Ms = DAY0 * MS_PER_DAY;

struct World {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
}

fn world() -> World {
    let clock = Arc::new(ManualClock::new(NOW0));
    let store = Arc::new(MemoryStore::new());
    let config = CoreConfig {
        backoff_base: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(4),
        ..Default::default()
    };
    let engine = Arc::new(Engine::new(
        store.clone(),
        Arc::new(MemoryLedger::new()),
        Arc::new(FlatRate { per_hour_minor: 250 }),
        Arc::new(InvalidationHub::new()),
        clock.clone(),
        config,
    ));
    World { engine, clock, store }
}

fn range(from: u8, to: u8) -> HourRange {
    HourRange::new(NOW0 + Ms::from(from) * H, NOW0 + Ms::from(to) * H)
}

#[tokio::test]
async fn booking_storm_never_double_books() {
    let w = world();
    let location = Ulid::new();
    let rtype = Ulid::new();

    let fleet: Vec<Ulid> = (0..4).map(|_| Ulid::new()).collect();
    for car in &fleet {
        w.engine.provision(*car, location, rtype, DAY0, 1).await.unwrap();
    }

    // 24 contenders, 6 per car, all gunning for the same three hours.
    let mut handles = Vec::new();
    for i in 0..24usize {
        let engine = w.engine.clone();
        let car = fleet[i % fleet.len()];
        handles.push(tokio::spawn(async move {
            engine
                .create_booking(BookingRequest {
                    resource_id: car,
                    range: range(9, 12),
                    session_id: Ulid::new(),
                    deadline: NOW0 + 60_000,
                })
                .await
        }));
    }

    let mut confirmed = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(c) => confirmed.push(c),
            Err(EngineError::SlotUnavailable | EngineError::VersionConflict) => {}
            Err(e) => panic!("unexpected storm error: {e}"),
        }
    }

    // One winner per car, no more.
    assert_eq!(confirmed.len(), fleet.len());

    // Ground truth: every slot in the window is booked by exactly one
    // confirmed booking, and no slot is left provisionally held.
    for car in &fleet {
        for hour in 9u8..12 {
            let slot = w
                .store
                .get(&SlotKey::new(*car, DAY0, hour))
                .await
                .unwrap();
            assert!(!slot.available);
            let owner = slot.booking_id.expect("no dangling provisional hold");
            assert_eq!(
                confirmed.iter().filter(|c| c.booking_id == owner).count(),
                1
            );
        }
    }
}

#[tokio::test]
async fn lifecycle_with_background_passes() {
    let w = world();
    let location = Ulid::new();
    let rtype = Ulid::new();
    let car = Ulid::new();
    w.engine.provision(car, location, rtype, DAY0, 1).await.unwrap();

    // A successful booking, then an abandoned acquire on other hours.
    let booked = w
        .engine
        .create_booking(BookingRequest {
            resource_id: car,
            range: range(9, 11),
            session_id: Ulid::new(),
            deadline: NOW0 + 60_000,
        })
        .await
        .unwrap();
    w.engine
        .acquire(car, range(14, 16), Ulid::new(), NOW0 + 60_000)
        .await
        .unwrap();

    // The sweep reclaims the abandoned hold once the grace period passes,
    // leaving the confirmed booking alone.
    w.clock.advance(16 * 60_000);
    assert_eq!(w.engine.sweep_orphans_pass().await, 2);

    w.engine.reconcile_pass().await;
    for hour in 0u8..24 {
        let bkey = BucketKey { location_id: location, resource_type_id: rtype, day: DAY0, hour };
        let view = w.engine.query(&bkey).await.unwrap();
        let expect_booked = (9..11).contains(&hour);
        assert_eq!(view.available_count, u32::from(!expect_booked), "hour {hour}");
    }

    // Cancel and verify the window opens back up.
    w.engine.cancel_booking(booked.booking_id).await.unwrap();
    let views = w
        .engine
        .query_range(location, rtype, range(9, 11))
        .await
        .unwrap();
    assert!(views.iter().all(|v| v.available_count == 1));

    // Retention eventually clears the day entirely.
    w.clock.set((DAY0 + 10) * MS_PER_DAY);
    let (slots, buckets) = w.engine.cleanup_pass().await;
    assert_eq!(slots, 24);
    assert_eq!(buckets, 24);
}
