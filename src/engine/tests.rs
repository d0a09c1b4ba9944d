use std::path::PathBuf;

use chrono::NaiveDate;

use super::*;
use crate::limits::SEED_OWNER;
use crate::model::*;
use crate::store::WalStore;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("tablebook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn engine(name: &str) -> Engine {
    let store = WalStore::open(test_wal_path(name)).unwrap();
    Engine::new(Arc::new(store))
}

fn table_req(number: u32, seats: u32) -> TableRequest {
    TableRequest {
        table_number: Some(number),
        seats: Some(seats),
    }
}

fn booking(table: u32, people: u32, date: &str, time: &str) -> ReservationRequest {
    ReservationRequest {
        name: Some("Ana Pop".into()),
        date: Some(date.into()),
        time: Some(time.into()),
        table: Some(table),
        people_count: Some(people),
        phone_number: Some("0711111111".into()),
    }
}

const ALICE: &str = "alice";
const BOB: &str = "bob";

// ── Create ───────────────────────────────────────────────

#[tokio::test]
async fn walkthrough_duplicate_then_capacity() {
    let engine = engine("walkthrough.wal");
    engine.create_table(ALICE, &table_req(5, 4)).await.unwrap();

    let first = engine
        .create_reservation(ALICE, &booking(5, 4, "2025-06-01", "19:00"))
        .await
        .unwrap();
    assert_eq!(first.owner, ALICE);
    assert!(first.history.is_empty());
    assert!(first.updated_at.is_none());

    let dup = engine
        .create_reservation(ALICE, &booking(5, 4, "2025-06-01", "19:00"))
        .await;
    assert!(matches!(dup, Err(EngineError::DuplicateBooking { table: 5, .. })));

    let too_many = engine
        .create_reservation(ALICE, &booking(5, 6, "2025-06-01", "21:00"))
        .await;
    assert_eq!(
        too_many,
        Err(EngineError::CapacityExceeded {
            table: 5,
            seats: 4,
            requested: 6
        })
    );
}

#[tokio::test]
async fn unknown_table_is_not_a_capacity_error() {
    let engine = engine("unknown_table.wal");
    let result = engine
        .create_reservation(ALICE, &booking(42, 2, "2025-06-01", "19:00"))
        .await;
    assert_eq!(result, Err(EngineError::TableNotFound(42)));
}

#[tokio::test]
async fn duplicate_check_sees_other_users() {
    let engine = engine("dup_other_user.wal");
    engine.create_table(ALICE, &table_req(1, 2)).await.unwrap();
    engine
        .create_reservation(ALICE, &booking(1, 2, "2025-06-01", "19:00"))
        .await
        .unwrap();
    let result = engine
        .create_reservation(BOB, &booking(1, 2, "2025-06-01", "19:00"))
        .await;
    assert!(matches!(result, Err(EngineError::DuplicateBooking { .. })));
}

#[tokio::test]
async fn canonical_forms_collide() {
    let engine = engine("canonical_collide.wal");
    engine.create_table(ALICE, &table_req(1, 2)).await.unwrap();
    engine
        .create_reservation(ALICE, &booking(1, 2, "2025-06-01", "19:00"))
        .await
        .unwrap();
    let result = engine
        .create_reservation(BOB, &booking(1, 2, "2025-6-1", "19:00:00"))
        .await;
    assert!(matches!(result, Err(EngineError::DuplicateBooking { .. })));
}

#[tokio::test]
async fn validation_runs_before_store_checks() {
    let engine = engine("validation_first.wal");
    let mut req = booking(99, 2, "2025-06-01", "19:00");
    req.name = Some("John3".into());
    // Table 99 does not exist, but the name is reported first.
    assert_eq!(
        engine.create_reservation(ALICE, &req).await,
        Err(EngineError::InvalidName)
    );
}

#[tokio::test]
async fn concurrent_creates_on_one_slot_admit_exactly_one() {
    let engine = Arc::new(engine("concurrent_slot.wal"));
    engine.create_table(ALICE, &table_req(3, 4)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_reservation(&format!("user{i}"), &booking(3, 2, "2025-06-01", "19:00"))
                .await
        }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::DuplicateBooking { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert!(engine.slot_locks.is_empty());
}

// ── List ─────────────────────────────────────────────────

#[tokio::test]
async fn list_is_scoped_to_owner_in_creation_order() {
    let engine = engine("list_scoped.wal");
    engine.create_table(ALICE, &table_req(1, 4)).await.unwrap();
    let a1 = engine
        .create_reservation(ALICE, &booking(1, 2, "2025-06-03", "19:00"))
        .await
        .unwrap();
    engine
        .create_reservation(BOB, &booking(1, 2, "2025-06-02", "19:00"))
        .await
        .unwrap();
    let a2 = engine
        .create_reservation(ALICE, &booking(1, 2, "2025-06-01", "19:00"))
        .await
        .unwrap();

    let mine: Vec<Ulid> = engine
        .list_reservations(ALICE)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(mine, vec![a1.id, a2.id]);
    assert_eq!(engine.list_reservations(BOB).await.unwrap().len(), 1);
    assert!(engine.list_reservations("carol").await.unwrap().is_empty());
}

// ── Update ───────────────────────────────────────────────

#[tokio::test]
async fn updates_build_linear_history() {
    let engine = engine("history_linear.wal");
    engine.create_table(ALICE, &table_req(2, 6)).await.unwrap();
    let created = engine
        .create_reservation(ALICE, &booking(2, 2, "2025-06-01", "18:00"))
        .await
        .unwrap();
    let id = created.id.to_string();

    let mut before = vec![created.snapshot()];
    let mut current = created;
    for (people, time) in [(3, "18:30"), (4, "19:00"), (5, "19:30")] {
        current = engine
            .update_reservation(ALICE, &id, &booking(2, people, "2025-06-01", time))
            .await
            .unwrap();
        before.push(current.snapshot());
    }
    before.pop();

    assert_eq!(current.history.len(), 3);
    assert_eq!(current.people_count, 5);
    assert_eq!(current.time, "19:30");
    for (entry, expected) in current.history.iter().zip(&before) {
        assert_eq!(&entry.previous_state, expected);
    }

    let stored = engine.store().get_reservation(current.id).await.unwrap().unwrap();
    assert_eq!(stored, current);
}

#[tokio::test]
async fn update_to_own_unchanged_slot_is_allowed() {
    let engine = engine("update_same_slot.wal");
    engine.create_table(ALICE, &table_req(5, 4)).await.unwrap();
    let r = engine
        .create_reservation(ALICE, &booking(5, 2, "2025-06-01", "19:00"))
        .await
        .unwrap();

    let mut req = booking(5, 3, "2025-06-01", "19:00");
    req.phone_number = Some("0722222222".into());
    let updated = engine
        .update_reservation(ALICE, &r.id.to_string(), &req)
        .await
        .unwrap();
    assert_eq!(updated.people_count, 3);
    assert_eq!(updated.phone_number, "0722222222");
    assert_eq!(updated.history.len(), 1);
}

#[tokio::test]
async fn update_into_taken_slot_conflicts() {
    let engine = engine("update_taken_slot.wal");
    engine.create_table(ALICE, &table_req(5, 4)).await.unwrap();
    engine
        .create_reservation(BOB, &booking(5, 2, "2025-06-01", "20:00"))
        .await
        .unwrap();
    let mine = engine
        .create_reservation(ALICE, &booking(5, 2, "2025-06-01", "19:00"))
        .await
        .unwrap();

    let result = engine
        .update_reservation(ALICE, &mine.id.to_string(), &booking(5, 2, "2025-06-01", "20:00"))
        .await;
    assert!(matches!(result, Err(EngineError::DuplicateBooking { .. })));

    // Rejected updates leave the record and its history untouched.
    let stored = engine.store().get_reservation(mine.id).await.unwrap().unwrap();
    assert_eq!(stored, mine);
}

#[tokio::test]
async fn update_rechecks_capacity_of_new_table() {
    let engine = engine("update_capacity.wal");
    engine.create_table(ALICE, &table_req(1, 8)).await.unwrap();
    engine.create_table(ALICE, &table_req(2, 2)).await.unwrap();
    let r = engine
        .create_reservation(ALICE, &booking(1, 6, "2025-06-01", "19:00"))
        .await
        .unwrap();

    let result = engine
        .update_reservation(ALICE, &r.id.to_string(), &booking(2, 6, "2025-06-01", "19:00"))
        .await;
    assert!(matches!(result, Err(EngineError::CapacityExceeded { table: 2, .. })));
}

#[tokio::test]
async fn non_owner_cannot_update_or_delete() {
    let engine = engine("non_owner.wal");
    engine.create_table(ALICE, &table_req(5, 4)).await.unwrap();
    let r = engine
        .create_reservation(ALICE, &booking(5, 2, "2025-06-01", "19:00"))
        .await
        .unwrap();
    let id = r.id.to_string();

    let update = engine
        .update_reservation(BOB, &id, &booking(5, 2, "2025-06-02", "19:00"))
        .await;
    assert_eq!(update, Err(EngineError::NotFoundOrForbidden(id.clone())));
    assert_eq!(
        engine.delete_reservation(BOB, &id).await,
        Err(EngineError::NotFoundOrForbidden(id.clone()))
    );
    // Ownership is checked before the body is validated.
    assert_eq!(
        engine
            .update_reservation(BOB, &id, &ReservationRequest::default())
            .await,
        Err(EngineError::NotFoundOrForbidden(id.clone()))
    );

    engine.delete_reservation(ALICE, &id).await.unwrap();
    assert_eq!(
        engine.delete_reservation(ALICE, &id).await,
        Err(EngineError::NotFoundOrForbidden(id))
    );
}

#[tokio::test]
async fn garbage_id_is_not_found() {
    let engine = engine("garbage_id.wal");
    assert_eq!(
        engine.delete_reservation(ALICE, "not-an-id").await,
        Err(EngineError::NotFoundOrForbidden("not-an-id".into()))
    );
    assert_eq!(
        engine.delete_table(ALICE, "").await,
        Err(EngineError::NotFoundOrForbidden(String::new()))
    );
}

#[tokio::test]
async fn shrinking_a_table_leaves_existing_bookings() {
    let engine = engine("shrink_table.wal");
    let t = engine.create_table(ALICE, &table_req(5, 6)).await.unwrap();
    let r = engine
        .create_reservation(ALICE, &booking(5, 6, "2025-06-01", "19:00"))
        .await
        .unwrap();

    engine
        .update_table(ALICE, &t.id.to_string(), &table_req(5, 2))
        .await
        .unwrap();
    assert!(engine.store().get_reservation(r.id).await.unwrap().is_some());

    let result = engine
        .create_reservation(ALICE, &booking(5, 6, "2025-06-02", "19:00"))
        .await;
    assert!(matches!(result, Err(EngineError::CapacityExceeded { seats: 2, .. })));
}

// ── Tables ───────────────────────────────────────────────

#[tokio::test]
async fn table_numbers_stay_unique() {
    let engine = engine("table_unique.wal");
    engine.create_table(ALICE, &table_req(1, 2)).await.unwrap();
    let two = engine.create_table(ALICE, &table_req(2, 4)).await.unwrap();

    assert_eq!(
        engine.create_table(BOB, &table_req(1, 8)).await,
        Err(EngineError::DuplicateTable(1))
    );
    assert_eq!(
        engine
            .update_table(ALICE, &two.id.to_string(), &table_req(1, 4))
            .await,
        Err(EngineError::DuplicateTable(1))
    );
    // Keeping its own number is fine.
    let same = engine
        .update_table(ALICE, &two.id.to_string(), &table_req(2, 6))
        .await
        .unwrap();
    assert_eq!(same.seats, 6);
    assert_eq!(same.owner, ALICE);
    assert!(same.updated_at.is_some());
}

#[tokio::test]
async fn table_delete_is_owner_only() {
    let engine = engine("table_owner.wal");
    let t = engine.create_table(ALICE, &table_req(7, 4)).await.unwrap();
    let id = t.id.to_string();

    assert_eq!(
        engine.delete_table(BOB, &id).await,
        Err(EngineError::NotFoundOrForbidden(id.clone()))
    );
    assert_eq!(
        engine.update_table(BOB, &id, &table_req(7, 2)).await,
        Err(EngineError::NotFoundOrForbidden(id.clone()))
    );
    engine.delete_table(ALICE, &id).await.unwrap();
    assert!(engine.list_tables().await.unwrap().is_empty());

    // The number is free again once the table is gone.
    engine.create_table(BOB, &table_req(7, 4)).await.unwrap();
}

#[tokio::test]
async fn tables_listed_by_number() {
    let engine = engine("tables_listed.wal");
    for n in [3, 1, 2] {
        engine.create_table(ALICE, &table_req(n, 2)).await.unwrap();
    }
    let numbers: Vec<u32> = engine
        .list_tables()
        .await
        .unwrap()
        .iter()
        .map(|t| t.table_number)
        .collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

// ── Expiration ───────────────────────────────────────────

#[tokio::test]
async fn purge_expired_is_idempotent() {
    let engine = engine("purge_idempotent.wal");
    engine.create_table(ALICE, &table_req(1, 4)).await.unwrap();
    for date in ["2025-05-30", "2025-05-31"] {
        engine
            .create_reservation(ALICE, &booking(1, 2, date, "19:00"))
            .await
            .unwrap();
    }
    let today_booking = engine
        .create_reservation(BOB, &booking(1, 2, "2025-06-01", "19:00"))
        .await
        .unwrap();

    let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    assert_eq!(engine.purge_expired(today).await.unwrap(), 2);
    assert_eq!(engine.purge_expired(today).await.unwrap(), 0);

    let left: Vec<Ulid> = engine
        .list_reservations(BOB)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(left, vec![today_booking.id]);
    assert!(engine.list_reservations(ALICE).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rescheduling_during_a_sweep_survives_it() {
    let engine = Arc::new(engine("purge_vs_reschedule.wal"));
    engine.create_table(ALICE, &table_req(1, 4)).await.unwrap();
    let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();

    for round in 0..100 {
        let time = format!("{:02}:{:02}", 8 + round / 60, round % 60);
        let past = engine
            .create_reservation(ALICE, &booking(1, 2, "2025-05-01", &time))
            .await
            .unwrap();

        let updater = tokio::spawn({
            let engine = engine.clone();
            let id = past.id.to_string();
            let req = booking(1, 2, "2025-07-01", &time);
            async move { engine.update_reservation(ALICE, &id, &req).await }
        });
        let sweeper = tokio::spawn({
            let engine = engine.clone();
            async move { engine.purge_expired(today).await }
        });
        let updated = updater.await.unwrap();
        let purged = sweeper.await.unwrap().unwrap();
        let live = engine.store().get_reservation(past.id).await.unwrap();

        match updated {
            Ok(_) => {
                assert_eq!(purged, 0, "round {round}");
                assert_eq!(live.map(|r| r.date), Some("2025-07-01".to_string()));
            }
            Err(EngineError::NotFoundOrForbidden(_)) => {
                assert_eq!(purged, 1, "round {round}");
                assert!(live.is_none());
            }
            Err(e) => panic!("round {round}: unexpected error: {e}"),
        }
    }
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_update_and_delete_leave_it_deleted() {
    let engine = Arc::new(engine("update_vs_delete.wal"));
    engine.create_table(ALICE, &table_req(1, 4)).await.unwrap();
    engine.create_table(ALICE, &table_req(2, 4)).await.unwrap();

    for round in 0..100 {
        let time = format!("{:02}:{:02}", 8 + round / 60, round % 60);
        let r = engine
            .create_reservation(ALICE, &booking(1, 2, "2025-06-01", &time))
            .await
            .unwrap();
        let id = r.id.to_string();

        // The update also moves it to another table.
        let updater = tokio::spawn({
            let engine = engine.clone();
            let id = id.clone();
            let req = booking(2, 3, "2025-06-01", &time);
            async move { engine.update_reservation(ALICE, &id, &req).await }
        });
        let deleter = tokio::spawn({
            let engine = engine.clone();
            async move { engine.delete_reservation(ALICE, &id).await }
        });
        let updated = updater.await.unwrap();
        let deleted = deleter.await.unwrap();

        assert_eq!(deleted, Ok(()), "round {round}");
        assert!(matches!(
            updated,
            Ok(_) | Err(EngineError::NotFoundOrForbidden(_))
        ));
        assert!(
            engine.store().get_reservation(r.id).await.unwrap().is_none(),
            "round {round}: deleted reservation still live"
        );
    }
    assert!(engine.slot_locks.is_empty());
}

#[tokio::test]
async fn failed_requests_leave_no_slot_locks() {
    let engine = engine("slot_lock_eviction.wal");
    for n in 1..=500 {
        assert_eq!(
            engine
                .create_reservation(BOB, &booking(n, 2, "2025-06-01", "19:00"))
                .await,
            Err(EngineError::TableNotFound(n))
        );
    }
    assert!(engine.slot_locks.is_empty());

    engine.create_table(ALICE, &table_req(1, 4)).await.unwrap();
    let r = engine
        .create_reservation(BOB, &booking(1, 2, "2025-06-01", "19:00"))
        .await
        .unwrap();
    engine.delete_reservation(BOB, &r.id.to_string()).await.unwrap();
    assert!(engine.slot_locks.is_empty());
}

// ── Seeding ──────────────────────────────────────────────

#[tokio::test]
async fn seed_fills_only_missing_default_tables() {
    let engine = engine("seed.wal");
    engine.create_table(BOB, &table_req(12, 10)).await.unwrap();

    assert_eq!(engine.seed_tables().await.unwrap(), 29);
    let tables = engine.list_tables().await.unwrap();
    assert_eq!(tables.len(), 30);

    let seats = |number: u32| tables[number as usize - 1].seats;
    assert_eq!(seats(1), 2);
    assert_eq!(seats(10), 2);
    assert_eq!(seats(11), 4);
    assert_eq!(seats(12), 10);
    assert_eq!(seats(20), 4);
    assert_eq!(seats(21), 6);
    assert_eq!(seats(25), 6);
    assert_eq!(seats(26), 8);
    assert_eq!(seats(30), 8);
    assert_eq!(tables[0].owner, SEED_OWNER);
    assert_eq!(tables[11].owner, BOB);

    assert_eq!(engine.seed_tables().await.unwrap(), 0);
    assert_eq!(engine.list_tables().await.unwrap().len(), 30);
}
