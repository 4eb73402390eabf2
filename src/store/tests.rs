use super::*;
use crate::testkit::*;

fn lock_at(fx: &Fixture, start: chrono::NaiveTime, expires_at: Ms) -> SlotLock {
    SlotLock {
        token: Ulid::new(),
        venue_id: fx.venue.id,
        service_id: fx.service.id,
        party_size: 2,
        date: tuesday(),
        start,
        expires_at,
        released_at: None,
        reason: None,
    }
}

#[tokio::test]
async fn reopen_replays_state() {
    let path = temp_journal("reopen");
    let (fx, reservation) = {
        let store = Store::open(&path).unwrap();
        let fx = seed_venue(&store, &[2, 4]).await;
        let r = reservation_on(&fx, fx.tables[0].id, tuesday(), Span::new(1080, 1170));
        store.insert_reservation(r.clone()).await.unwrap();
        (fx, r)
    };

    let store = Store::open(&path).unwrap();
    assert_eq!(store.venue_id_by_slug("bistro"), Some(fx.venue.id));
    assert_eq!(store.reservation(&reservation.id).await, Some(reservation.clone()));
    assert_eq!(
        store.reservation_by_reference(&reservation.reference).await.map(|r| r.id),
        Some(reservation.id)
    );
    let shared = store.venue(&fx.venue.id).unwrap();
    let guard = shared.read().await;
    assert_eq!(guard.resources.len(), 2);
    assert_eq!(guard.windows.len(), 1);
}

#[tokio::test]
async fn bookings_after_a_torn_tail_survive_the_next_restart() {
    let path = temp_journal("torn_restart");
    let fx = {
        let store = Store::open(&path).unwrap();
        seed_venue(&store, &[4]).await
    };
    // Crash mid-append: a few bytes of a frame that never finished.
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x40, 0, 0, 0, 0xde, 0xad]).unwrap();
    }

    let table = fx.tables[0].id;
    let booked = reservation_on(&fx, table, tuesday(), Span::new(1140, 1230));
    {
        let store = Store::open(&path).unwrap();
        store.insert_reservation(booked.clone()).await.unwrap();
    }

    let store = Store::open(&path).unwrap();
    assert_eq!(store.reservation(&booked.id).await, Some(booked));
    let overlapping = reservation_on(&fx, table, tuesday(), Span::new(1200, 1290));
    assert!(matches!(
        store.insert_reservation(overlapping).await,
        Err(StoreError::ExclusionViolation { .. })
    ));
}

#[tokio::test]
async fn degenerate_duration_rules_rejected() {
    let store = Store::open(&temp_journal("duration_rules")).unwrap();
    let fx = seed_venue(&store, &[4]).await;
    let with_rule = |min_guests, max_guests, duration_minutes| Service {
        duration_rules: vec![
            DurationRule {
                min_guests: 1,
                max_guests: 2,
                duration_minutes: 60,
            },
            DurationRule {
                min_guests,
                max_guests,
                duration_minutes,
            },
        ],
        ..fx.service.clone()
    };

    for bad in [with_rule(3, 6, 0), with_rule(6, 3, 90), with_rule(3, 6, 24 * 60 + 1)] {
        let err = store.upsert_service(bad).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDurationRule { index: 1, .. }), "{err}");
    }
    // Rejected upserts leave the stored service alone.
    let shared = store.venue(&fx.venue.id).unwrap();
    assert_eq!(shared.read().await.services[&fx.service.id], fx.service);

    store.upsert_service(with_rule(3, 6, 120)).await.unwrap();
}

#[tokio::test]
async fn exclusion_constraint_rejects_overlap() {
    let store = Store::open(&temp_journal("exclusion")).unwrap();
    let fx = seed_venue(&store, &[4]).await;
    let table = fx.tables[0].id;

    let first = reservation_on(&fx, table, tuesday(), Span::new(1140, 1230));
    store.insert_reservation(first.clone()).await.unwrap();

    let overlapping = reservation_on(&fx, table, tuesday(), Span::new(1200, 1290));
    let err = store.insert_reservation(overlapping).await.unwrap_err();
    match err {
        StoreError::ExclusionViolation {
            resource_id,
            conflicting,
        } => {
            assert_eq!(resource_id, table);
            assert_eq!(conflicting, first.id);
        }
        other => panic!("expected exclusion violation, got {other}"),
    }

    // Back-to-back is fine.
    let after = reservation_on(&fx, table, tuesday(), Span::new(1230, 1320));
    store.insert_reservation(after).await.unwrap();

    // Other day is fine.
    let next_week = tuesday() + chrono::Days::new(7);
    store
        .insert_reservation(reservation_on(&fx, table, next_week, Span::new(1140, 1230)))
        .await
        .unwrap();
}

#[tokio::test]
async fn cancelled_reservation_frees_the_interval() {
    let store = Store::open(&temp_journal("cancel_frees")).unwrap();
    let fx = seed_venue(&store, &[4]).await;
    let table = fx.tables[0].id;

    let first = reservation_on(&fx, table, tuesday(), Span::new(1140, 1230));
    store.insert_reservation(first.clone()).await.unwrap();
    store
        .set_reservation_status(first.id, ReservationStatus::Cancelled)
        .await
        .unwrap();

    store
        .insert_reservation(reservation_on(&fx, table, tuesday(), Span::new(1140, 1230)))
        .await
        .unwrap();
}

#[tokio::test]
async fn terminal_status_is_final() {
    let store = Store::open(&temp_journal("terminal")).unwrap();
    let fx = seed_venue(&store, &[4]).await;
    let r = reservation_on(&fx, fx.tables[0].id, tuesday(), Span::new(1140, 1230));
    store.insert_reservation(r.clone()).await.unwrap();

    store
        .set_reservation_status(r.id, ReservationStatus::Incomplete)
        .await
        .unwrap();
    let err = store
        .set_reservation_status(r.id, ReservationStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));
}

#[tokio::test]
async fn unknown_resource_rejected() {
    let store = Store::open(&temp_journal("unknown_resource")).unwrap();
    let fx = seed_venue(&store, &[4]).await;
    let r = reservation_on(&fx, Ulid::new(), tuesday(), Span::new(1140, 1230));
    let err = store.insert_reservation(r).await.unwrap_err();
    assert!(matches!(err, StoreError::UnknownResource { .. }));
}

#[tokio::test]
async fn duplicate_reference_rejected() {
    let store = Store::open(&temp_journal("dup_ref")).unwrap();
    let fx = seed_venue(&store, &[2, 4]).await;
    let first = reservation_on(&fx, fx.tables[0].id, tuesday(), Span::new(1080, 1170));
    store.insert_reservation(first.clone()).await.unwrap();

    let mut second = reservation_on(&fx, fx.tables[1].id, tuesday(), Span::new(1080, 1170));
    second.reference = first.reference.clone();
    let err = store.insert_reservation(second).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateReference(_)));
}

#[tokio::test]
async fn slug_belongs_to_one_venue() {
    let store = Store::open(&temp_journal("slug")).unwrap();
    seed_venue(&store, &[2]).await;
    let err = store
        .upsert_venue(Venue {
            id: Ulid::new(),
            slug: "bistro".into(),
            name: "Impostor".into(),
            approved: true,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SlugTaken(_)));
}

#[tokio::test]
async fn one_active_lock_per_slot() {
    let store = Store::open(&temp_journal("lock_unique")).unwrap();
    let fx = seed_venue(&store, &[2, 4]).await;

    let first = lock_at(&fx, t(19, 0), 10_000);
    store.issue_lock(first.clone(), 0).await.unwrap();

    let err = store.issue_lock(lock_at(&fx, t(19, 0), 10_000), 0).await.unwrap_err();
    assert!(err.is_conflict());

    // Different start time is independent.
    store.issue_lock(lock_at(&fx, t(19, 15), 10_000), 0).await.unwrap();

    // Once the first lock lapses the slot can be taken again.
    store
        .issue_lock(lock_at(&fx, t(19, 0), 20_000), 10_000)
        .await
        .unwrap();
}

#[tokio::test]
async fn release_is_compare_and_set() {
    let store = Store::open(&temp_journal("lock_cas")).unwrap();
    let fx = seed_venue(&store, &[2]).await;
    let lock = lock_at(&fx, t(19, 0), 10_000);
    store.issue_lock(lock.clone(), 0).await.unwrap();

    let released = store
        .release_lock(lock.token, LockReason::PaymentSucceeded, 50)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(released.released_at, Some(50));

    // Second release is a no-op and keeps the first outcome.
    assert!(store
        .release_lock(lock.token, LockReason::Expired, 99)
        .await
        .unwrap()
        .is_none());
    let stored = store.lock(&lock.token).await.unwrap();
    assert_eq!(stored.released_at, Some(50));
    assert_eq!(stored.reason, Some(LockReason::PaymentSucceeded));

    // Unknown token is a no-op too.
    assert!(store
        .release_lock(Ulid::new(), LockReason::Error, 99)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn expired_locks_listed_until_released() {
    let store = Store::open(&temp_journal("lock_expired")).unwrap();
    let fx = seed_venue(&store, &[2]).await;
    let stale = lock_at(&fx, t(18, 0), 1_000);
    let fresh = lock_at(&fx, t(19, 0), 50_000);
    store.issue_lock(stale.clone(), 0).await.unwrap();
    store.issue_lock(fresh, 0).await.unwrap();

    assert_eq!(store.expired_locks(2_000).await, vec![(stale.token, fx.venue.id)]);
    store
        .release_lock(stale.token, LockReason::Expired, 2_000)
        .await
        .unwrap();
    assert!(store.expired_locks(2_000).await.is_empty());
}

#[tokio::test]
async fn enqueue_is_idempotent() {
    let store = Store::open(&temp_journal("enqueue")).unwrap();
    let event = PosEvent {
        event_id: "ord-1".into(),
        venue_id: Ulid::new(),
        customer_ref: None,
        metadata: None,
        device_id: None,
        payload: "{}".into(),
        received_at: 5,
    };
    assert!(store.enqueue_event(event.clone(), 5).await.unwrap());
    assert!(!store.enqueue_event(event, 6).await.unwrap());
    let item = store.queue_item("ord-1").await.unwrap();
    assert_eq!(item.attempts, 0);
    assert_eq!(item.next_attempt_at, 5);
}

#[tokio::test]
async fn claim_leases_items() {
    let store = Store::open(&temp_journal("claim")).unwrap();
    for (i, id) in ["a", "b"].iter().enumerate() {
        let event = PosEvent {
            event_id: (*id).into(),
            venue_id: Ulid::new(),
            customer_ref: None,
            metadata: None,
            device_id: None,
            payload: "{}".into(),
            received_at: i as Ms,
        };
        store.enqueue_event(event, i as Ms).await.unwrap();
    }

    let first = store.claim_due(10, 10, 60_000).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].0.event_id, "a");
    // Leased items are invisible to a second drain until the lease runs out.
    assert!(store.claim_due(10, 10, 60_000).await.unwrap().is_empty());
    assert_eq!(store.claim_due(60_010, 10, 60_000).await.unwrap().len(), 2);
}

#[tokio::test]
async fn compaction_keeps_state_and_drops_released_locks() {
    let path = temp_journal("compact");
    let (fx, kept, dropped, reservation) = {
        let store = Store::open(&path).unwrap();
        let fx = seed_venue(&store, &[2, 4]).await;
        let kept = lock_at(&fx, t(18, 0), i64::MAX);
        let dropped = lock_at(&fx, t(19, 0), i64::MAX);
        store.issue_lock(kept.clone(), 0).await.unwrap();
        store.issue_lock(dropped.clone(), 0).await.unwrap();
        store
            .release_lock(dropped.token, LockReason::PaymentFailed, 1)
            .await
            .unwrap();
        let r = reservation_on(&fx, fx.tables[1].id, tuesday(), Span::new(1080, 1170));
        store.insert_reservation(r.clone()).await.unwrap();

        assert!(store.appends_since_compact().await > 0);
        store.compact().await.unwrap();
        assert_eq!(store.appends_since_compact().await, 0);
        assert!(store.lock(&dropped.token).await.is_none());
        (fx, kept, dropped, r)
    };

    let store = Store::open(&path).unwrap();
    assert_eq!(store.venue_id_by_slug("bistro"), Some(fx.venue.id));
    assert!(store.lock(&kept.token).await.is_some());
    assert!(store.lock(&dropped.token).await.is_none());
    assert_eq!(store.reservation(&reservation.id).await, Some(reservation));
}
