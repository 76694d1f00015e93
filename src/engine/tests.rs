use std::path::PathBuf;
use std::sync::Arc;

use ulid::Ulid;

use super::admission::validate_interval;
use super::*;
use crate::limits::*;

const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("reservd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

async fn admin(engine: &Engine) -> Caller {
    let info = engine
        .register_with_role("admin@example.com", "admin-password", Role::Admin)
        .await
        .unwrap();
    Caller {
        id: info.id,
        role: info.role,
    }
}

async fn user(engine: &Engine, email: &str) -> Caller {
    let info = engine.register_user(email, "user-password-1").await.unwrap();
    Caller {
        id: info.id,
        role: info.role,
    }
}

async fn room(engine: &Engine, admin: &Caller) -> Ulid {
    let id = Ulid::new();
    engine
        .create_resource(admin, id, "Room A", None, None)
        .await
        .unwrap();
    id
}

/// Pairwise exclusivity: no two active reservations on the same resource overlap.
fn assert_exclusive(rows: &[ReservationInfo]) {
    for a in rows {
        for b in rows {
            if a.id != b.id
                && a.resource_id == b.resource_id
                && a.status == ReservationStatus::Active
                && b.status == ReservationStatus::Active
            {
                assert!(
                    !(a.start < b.end && a.end > b.start),
                    "active reservations overlap: {a:?} vs {b:?}"
                );
            }
        }
    }
}

// ── Interval validation ──────────────────────────────────

#[test]
fn interval_rejects_empty_and_reversed() {
    assert!(matches!(
        validate_interval(1000, 1000),
        Err(EngineError::InvalidInterval { .. })
    ));
    assert!(matches!(
        validate_interval(2000, 1000),
        Err(EngineError::InvalidInterval { .. })
    ));
    assert!(validate_interval(1000, 2000).is_ok());
}

#[test]
fn interval_rejects_out_of_range() {
    assert!(matches!(
        validate_interval(-5, 1000),
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        validate_interval(0, MAX_VALID_TIMESTAMP_MS + 1),
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        validate_interval(0, MAX_SPAN_DURATION_MS + 1),
        Err(EngineError::LimitExceeded(_))
    ));
}

// ── Admission ────────────────────────────────────────────

#[tokio::test]
async fn book_and_get() {
    let path = test_wal_path("book_and_get.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    let res_id = Ulid::new();
    let info = engine
        .book(&alice, res_id, rid, 10 * H, 11 * H)
        .await
        .unwrap();
    assert_eq!(info.user_id, alice.id);
    assert_eq!(info.status, ReservationStatus::Active);

    let fetched = engine.get_reservation(&alice, res_id).await.unwrap();
    assert_eq!(fetched, info);
}

#[tokio::test]
async fn overlapping_booking_conflicts() {
    let path = test_wal_path("overlap_conflict.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let bob = user(&engine, "bob@example.com").await;
    let rid = room(&engine, &admin).await;

    engine
        .book(&alice, Ulid::new(), rid, 10 * H, 11 * H)
        .await
        .unwrap();

    // [10:30, 11:30) overlaps [10:00, 11:00)
    let err = engine
        .book(&bob, Ulid::new(), rid, 10 * H + 30 * M, 11 * H + 30 * M)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn touching_booking_succeeds() {
    let path = test_wal_path("touching_ok.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    engine
        .book(&alice, Ulid::new(), rid, 10 * H, 11 * H)
        .await
        .unwrap();
    // [11:00, 12:00) touches but does not overlap (half-open)
    engine
        .book(&alice, Ulid::new(), rid, 11 * H, 12 * H)
        .await
        .unwrap();
    // And the slot before
    engine
        .book(&alice, Ulid::new(), rid, 9 * H, 10 * H)
        .await
        .unwrap();

    let rows = engine.list_reservations(&alice).await;
    assert_eq!(rows.len(), 3);
    assert_exclusive(&rows);
}

#[tokio::test]
async fn contained_and_covering_windows_conflict() {
    let path = test_wal_path("containment_conflict.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    engine
        .book(&alice, Ulid::new(), rid, 10 * H, 12 * H)
        .await
        .unwrap();

    // Fully inside
    assert!(matches!(
        engine
            .book(&alice, Ulid::new(), rid, 10 * H + 30 * M, 11 * H)
            .await,
        Err(EngineError::Conflict(_))
    ));
    // Fully covering
    assert!(matches!(
        engine.book(&alice, Ulid::new(), rid, 9 * H, 13 * H).await,
        Err(EngineError::Conflict(_))
    ));
    // Identical
    assert!(matches!(
        engine.book(&alice, Ulid::new(), rid, 10 * H, 12 * H).await,
        Err(EngineError::Conflict(_))
    ));
}

#[tokio::test]
async fn invalid_interval_creates_no_row() {
    let path = test_wal_path("invalid_interval.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    assert!(matches!(
        engine.book(&alice, Ulid::new(), rid, 10 * H, 10 * H).await,
        Err(EngineError::InvalidInterval { .. })
    ));
    assert!(matches!(
        engine.book(&alice, Ulid::new(), rid, 11 * H, 10 * H).await,
        Err(EngineError::InvalidInterval { .. })
    ));

    assert!(engine.list_reservations(&alice).await.is_empty());
}

#[tokio::test]
async fn booking_missing_resource_is_not_found() {
    let path = test_wal_path("missing_resource.wal");
    let engine = Engine::new(path).unwrap();
    let alice = user(&engine, "alice@example.com").await;

    let err = engine
        .book(&alice, Ulid::new(), Ulid::new(), 10 * H, 11 * H)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn inactive_resource_rejects_booking() {
    let path = test_wal_path("inactive_reject.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    // Existing booking, then deactivate
    let existing = Ulid::new();
    engine
        .book(&alice, existing, rid, 9 * H, 10 * H)
        .await
        .unwrap();
    engine
        .update_resource(
            &admin,
            rid,
            ResourcePatch {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let err = engine
        .book(&alice, Ulid::new(), rid, 10 * H, 11 * H)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ResourceInactive(_)));

    // The earlier reservation is untouched
    let fetched = engine.get_reservation(&alice, existing).await.unwrap();
    assert_eq!(fetched.status, ReservationStatus::Active);

    // Reactivate and book again
    engine
        .update_resource(
            &admin,
            rid,
            ResourcePatch {
                is_active: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    engine
        .book(&alice, Ulid::new(), rid, 10 * H, 11 * H)
        .await
        .unwrap();
}

#[tokio::test]
async fn precondition_order_inactive_before_interval() {
    let path = test_wal_path("precondition_order.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;
    engine
        .update_resource(
            &admin,
            rid,
            ResourcePatch {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Both preconditions violated: the inactive check fires first
    assert!(matches!(
        engine.book(&alice, Ulid::new(), rid, 11 * H, 10 * H).await,
        Err(EngineError::ResourceInactive(_))
    ));

    // Missing resource wins over invalid interval
    assert!(matches!(
        engine
            .book(&alice, Ulid::new(), Ulid::new(), 11 * H, 10 * H)
            .await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn duplicate_reservation_id_rejected() {
    let path = test_wal_path("dup_reservation_id.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    let res_id = Ulid::new();
    engine
        .book(&alice, res_id, rid, 10 * H, 11 * H)
        .await
        .unwrap();
    let err = engine
        .book(&alice, res_id, rid, 12 * H, 13 * H)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test]
async fn concurrent_overlapping_bookings_admit_exactly_one() {
    let path = test_wal_path("race_one_winner.wal");
    let engine = Arc::new(Engine::new(path).unwrap());
    let admin = admin(&engine).await;
    let rid = room(&engine, &admin).await;

    let n = 16;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        let email = format!("racer{i}@example.com");
        handles.push(tokio::spawn(async move {
            let info = eng.register_user(&email, "racer-password").await.unwrap();
            let caller = Caller {
                id: info.id,
                role: info.role,
            };
            eng.book(&caller, Ulid::new(), rid, 10 * H, 11 * H).await
        }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1, "exactly one racer must win");
    assert_eq!(conflicts, n - 1);

    let rows = engine.list_reservations(&admin).await;
    let active: Vec<_> = rows
        .iter()
        .filter(|r| r.resource_id == rid && r.status == ReservationStatus::Active)
        .collect();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn concurrent_staggered_bookings_preserve_exclusivity() {
    let path = test_wal_path("race_staggered.wal");
    let engine = Arc::new(Engine::new(path).unwrap());
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    // Each window overlaps its neighbors: [i*30m, i*30m + 60m)
    let mut handles = Vec::new();
    for i in 0..10i64 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.book(&alice, Ulid::new(), rid, i * 30 * M, i * 30 * M + H)
                .await
        }));
    }
    for h in handles {
        let _ = h.await.unwrap(); // success or Conflict, both fine
    }

    let rows = engine.list_reservations(&admin).await;
    assert!(!rows.is_empty());
    assert_exclusive(&rows);
}

#[tokio::test]
async fn bookings_on_different_resources_proceed_in_parallel() {
    let path = test_wal_path("race_parallel_resources.wal");
    let engine = Arc::new(Engine::new(path).unwrap());
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;

    let mut resource_ids = Vec::new();
    for i in 0..8 {
        let rid = Ulid::new();
        engine
            .create_resource(&admin, rid, &format!("Room {i}"), None, None)
            .await
            .unwrap();
        resource_ids.push(rid);
    }

    // Same window on every resource — no cross-resource serialization
    let mut handles = Vec::new();
    for rid in &resource_ids {
        let eng = engine.clone();
        let rid = *rid;
        handles.push(tokio::spawn(async move {
            eng.book(&alice, Ulid::new(), rid, 10 * H, 11 * H).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap(); // every one must succeed
    }

    let rows = engine.list_reservations(&admin).await;
    assert_eq!(rows.len(), resource_ids.len());
}

// ── Cancellation ─────────────────────────────────────────

#[tokio::test]
async fn cancellation_frees_the_slot() {
    let path = test_wal_path("cancel_frees.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    let first = Ulid::new();
    engine.book(&alice, first, rid, 9 * H, 10 * H).await.unwrap();
    engine.cancel_reservation(&alice, first).await.unwrap();

    // Same window books again
    engine
        .book(&alice, Ulid::new(), rid, 9 * H, 10 * H)
        .await
        .unwrap();

    // The cancelled row is still visible, flagged cancelled
    let old = engine.get_reservation(&alice, first).await.unwrap();
    assert_eq!(old.status, ReservationStatus::Cancelled);
}

#[tokio::test]
async fn cancel_requires_ownership() {
    let path = test_wal_path("cancel_ownership.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let bob = user(&engine, "bob@example.com").await;
    let rid = room(&engine, &admin).await;

    let res_id = Ulid::new();
    engine
        .book(&alice, res_id, rid, 9 * H, 10 * H)
        .await
        .unwrap();

    // Bob cannot cancel Alice's reservation
    assert!(matches!(
        engine.cancel_reservation(&bob, res_id).await,
        Err(EngineError::Forbidden(_))
    ));

    // Admin can
    engine.cancel_reservation(&admin, res_id).await.unwrap();
}

#[tokio::test]
async fn cancel_twice_is_an_error() {
    let path = test_wal_path("cancel_twice.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    let res_id = Ulid::new();
    engine
        .book(&alice, res_id, rid, 9 * H, 10 * H)
        .await
        .unwrap();
    engine.cancel_reservation(&alice, res_id).await.unwrap();

    assert!(matches!(
        engine.cancel_reservation(&alice, res_id).await,
        Err(EngineError::AlreadyCancelled(_))
    ));
}

#[tokio::test]
async fn cancel_missing_is_not_found() {
    let path = test_wal_path("cancel_missing.wal");
    let engine = Engine::new(path).unwrap();
    let alice = user(&engine, "alice@example.com").await;

    assert!(matches!(
        engine.cancel_reservation(&alice, Ulid::new()).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Query scoping ────────────────────────────────────────

#[tokio::test]
async fn list_reservations_is_role_scoped() {
    let path = test_wal_path("list_scoped.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let bob = user(&engine, "bob@example.com").await;
    let rid = room(&engine, &admin).await;

    engine
        .book(&alice, Ulid::new(), rid, 9 * H, 10 * H)
        .await
        .unwrap();
    engine
        .book(&bob, Ulid::new(), rid, 10 * H, 11 * H)
        .await
        .unwrap();

    let alice_rows = engine.list_reservations(&alice).await;
    assert_eq!(alice_rows.len(), 1);
    assert_eq!(alice_rows[0].user_id, alice.id);

    let admin_rows = engine.list_reservations(&admin).await;
    assert_eq!(admin_rows.len(), 2);
}

#[tokio::test]
async fn get_reservation_forbidden_for_strangers() {
    let path = test_wal_path("get_forbidden.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let bob = user(&engine, "bob@example.com").await;
    let rid = room(&engine, &admin).await;

    let res_id = Ulid::new();
    engine
        .book(&alice, res_id, rid, 9 * H, 10 * H)
        .await
        .unwrap();

    assert!(matches!(
        engine.get_reservation(&bob, res_id).await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(engine.get_reservation(&admin, res_id).await.is_ok());
    assert!(matches!(
        engine.get_reservation(&alice, Ulid::new()).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn user_listing_requires_admin() {
    let path = test_wal_path("users_admin_only.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;

    assert!(matches!(
        engine.list_users(&alice),
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        engine.get_user(&alice, admin.id),
        Err(EngineError::Forbidden(_))
    ));

    let all = engine.list_users(&admin).unwrap();
    assert_eq!(all.len(), 2);
}

// ── Users ────────────────────────────────────────────────

#[tokio::test]
async fn register_rejects_duplicate_email_case_insensitive() {
    let path = test_wal_path("dup_email.wal");
    let engine = Engine::new(path).unwrap();

    engine
        .register_user("Alice@Example.com", "password-one")
        .await
        .unwrap();
    let err = engine
        .register_user("alice@example.com", "password-two")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::EmailTaken(_)));
}

#[tokio::test]
async fn register_validates_input() {
    let path = test_wal_path("register_validate.wal");
    let engine = Engine::new(path).unwrap();

    assert!(matches!(
        engine.register_user("not-an-email", "password-one").await,
        Err(EngineError::InvalidRequest(_))
    ));
    assert!(matches!(
        engine.register_user("a@b.com", "short").await,
        Err(EngineError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn authenticate_rejects_bad_credentials() {
    let path = test_wal_path("authenticate.wal");
    let engine = Engine::new(path).unwrap();
    engine
        .register_user("alice@example.com", "password-one")
        .await
        .unwrap();

    assert!(engine.authenticate("alice@example.com", "password-one").is_ok());
    assert!(matches!(
        engine.authenticate("alice@example.com", "wrong-password"),
        Err(EngineError::Unauthorized(_))
    ));
    assert!(matches!(
        engine.authenticate("nobody@example.com", "password-one"),
        Err(EngineError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn user_updates_credentials() {
    let path = test_wal_path("user_update.wal");
    let engine = Engine::new(path).unwrap();
    let alice = user(&engine, "alice@example.com").await;

    engine
        .update_user(
            &alice,
            alice.id,
            UserPatch {
                email: Some("alice2@example.com".into()),
                password: Some("new-password-1".into()),
            },
        )
        .await
        .unwrap();

    assert!(engine.authenticate("alice2@example.com", "new-password-1").is_ok());
    assert!(engine.authenticate("alice@example.com", "user-password-1").is_err());
}

#[tokio::test]
async fn user_update_respects_email_uniqueness_and_ownership() {
    let path = test_wal_path("user_update_rules.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let bob = user(&engine, "bob@example.com").await;

    // Taking Bob's email fails
    assert!(matches!(
        engine
            .update_user(
                &alice,
                alice.id,
                UserPatch {
                    email: Some("bob@example.com".into()),
                    password: None,
                },
            )
            .await,
        Err(EngineError::EmailTaken(_))
    ));

    // Alice cannot update Bob
    assert!(matches!(
        engine
            .update_user(
                &alice,
                bob.id,
                UserPatch {
                    email: None,
                    password: Some("hijacked-pass1".into()),
                },
            )
            .await,
        Err(EngineError::Forbidden(_))
    ));

    // Admin can
    engine
        .update_user(
            &admin,
            bob.id,
            UserPatch {
                email: None,
                password: Some("admin-set-pass1".into()),
            },
        )
        .await
        .unwrap();
    assert!(engine.authenticate("bob@example.com", "admin-set-pass1").is_ok());
}

#[tokio::test]
async fn delete_user_blocked_by_active_reservations() {
    let path = test_wal_path("user_delete.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    let res_id = Ulid::new();
    engine
        .book(&alice, res_id, rid, 9 * H, 10 * H)
        .await
        .unwrap();

    assert!(matches!(
        engine.delete_user(&admin, alice.id).await,
        Err(EngineError::HasReservations(_))
    ));

    engine.cancel_reservation(&alice, res_id).await.unwrap();
    engine.delete_user(&admin, alice.id).await.unwrap();

    // The identity no longer resolves
    assert!(engine.resolve_caller(alice.id).is_none());
    // And deletion requires the admin role in the first place
    assert!(matches!(
        engine.delete_user(&alice, admin.id).await,
        Err(EngineError::Forbidden(_))
    ));
}

// ── Categories ───────────────────────────────────────────

#[tokio::test]
async fn category_crud_and_uniqueness() {
    let path = test_wal_path("category_crud.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;

    let cid = Ulid::new();
    engine.create_category(&admin, cid, "Rooms").await.unwrap();

    // Non-admin cannot create
    assert!(matches!(
        engine.create_category(&alice, Ulid::new(), "Gear").await,
        Err(EngineError::Forbidden(_))
    ));
    // Duplicate name refused
    assert!(matches!(
        engine.create_category(&admin, Ulid::new(), "Rooms").await,
        Err(EngineError::NameTaken(_))
    ));

    engine.update_category(&admin, cid, "Meeting Rooms").await.unwrap();
    assert_eq!(engine.get_category(cid).unwrap().name, "Meeting Rooms");

    let other = Ulid::new();
    engine.create_category(&admin, other, "Gear").await.unwrap();
    assert!(matches!(
        engine.update_category(&admin, other, "Meeting Rooms").await,
        Err(EngineError::NameTaken(_))
    ));

    assert_eq!(engine.list_categories().len(), 2);
}

#[tokio::test]
async fn category_deletion_blocked_while_referenced() {
    let path = test_wal_path("category_in_use.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;

    let cid = Ulid::new();
    engine.create_category(&admin, cid, "Rooms").await.unwrap();
    let rid = Ulid::new();
    engine
        .create_resource(&admin, rid, "Room A", None, Some(cid))
        .await
        .unwrap();

    assert!(matches!(
        engine.delete_category(&admin, cid).await,
        Err(EngineError::CategoryInUse(_))
    ));

    // Clear the reference, then deletion goes through
    engine
        .update_resource(
            &admin,
            rid,
            ResourcePatch {
                category_id: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    engine.delete_category(&admin, cid).await.unwrap();
    assert!(matches!(
        engine.get_category(cid),
        Err(EngineError::NotFound(_))
    ));
}

// ── Resources ────────────────────────────────────────────

#[tokio::test]
async fn resource_creation_validates_category() {
    let path = test_wal_path("resource_category.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;

    assert!(matches!(
        engine
            .create_resource(&admin, Ulid::new(), "Room A", None, Some(Ulid::new()))
            .await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn resource_partial_update() {
    let path = test_wal_path("resource_patch.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;

    let rid = Ulid::new();
    engine
        .create_resource(&admin, rid, "Room A", Some("Big room".into()), None)
        .await
        .unwrap();

    // Rename only — description untouched
    engine
        .update_resource(
            &admin,
            rid,
            ResourcePatch {
                name: Some("Room B".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let info = engine.get_resource(rid).await.unwrap();
    assert_eq!(info.name, "Room B");
    assert_eq!(info.description.as_deref(), Some("Big room"));
    assert!(info.is_active);

    // Explicit NULL clears the description
    engine
        .update_resource(
            &admin,
            rid,
            ResourcePatch {
                description: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let info = engine.get_resource(rid).await.unwrap();
    assert_eq!(info.description, None);
}

#[tokio::test]
async fn resource_mutations_require_admin() {
    let path = test_wal_path("resource_admin_only.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    assert!(matches!(
        engine
            .create_resource(&alice, Ulid::new(), "Rogue", None, None)
            .await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        engine
            .update_resource(
                &alice,
                rid,
                ResourcePatch {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        engine.delete_resource(&alice, rid).await,
        Err(EngineError::Forbidden(_))
    ));
}

#[tokio::test]
async fn resource_deletion_blocked_by_active_reservations() {
    let path = test_wal_path("resource_delete.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    let res_id = Ulid::new();
    engine
        .book(&alice, res_id, rid, 9 * H, 10 * H)
        .await
        .unwrap();

    assert!(matches!(
        engine.delete_resource(&admin, rid).await,
        Err(EngineError::HasReservations(_))
    ));

    engine.cancel_reservation(&alice, res_id).await.unwrap();
    engine.delete_resource(&admin, rid).await.unwrap();

    assert!(matches!(
        engine.get_resource(rid).await,
        Err(EngineError::NotFound(_))
    ));
    // The cancelled reservation went with it
    assert!(matches!(
        engine.get_reservation(&alice, res_id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn duplicate_resource_id_rejected() {
    let path = test_wal_path("dup_resource.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let rid = room(&engine, &admin).await;

    assert!(matches!(
        engine.create_resource(&admin, rid, "Clone", None, None).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

// ── Custom fields ────────────────────────────────────────

#[tokio::test]
async fn field_add_list_remove() {
    let path = test_wal_path("fields.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let rid = room(&engine, &admin).await;

    let fid = Ulid::new();
    engine
        .add_field(&admin, fid, rid, "floor", "3")
        .await
        .unwrap();
    engine
        .add_field(&admin, Ulid::new(), rid, "capacity", "12")
        .await
        .unwrap();

    let fields = engine.list_fields(rid).await;
    assert_eq!(fields.len(), 2);
    assert!(fields.iter().any(|f| f.key == "floor" && f.value == "3"));

    engine.remove_field(&admin, fid).await.unwrap();
    assert_eq!(engine.list_fields(rid).await.len(), 1);
}

#[tokio::test]
async fn field_errors() {
    let path = test_wal_path("field_errors.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    // Unknown resource
    assert!(matches!(
        engine
            .add_field(&admin, Ulid::new(), Ulid::new(), "floor", "3")
            .await,
        Err(EngineError::NotFound(_))
    ));
    // Non-admin
    assert!(matches!(
        engine.add_field(&alice, Ulid::new(), rid, "floor", "3").await,
        Err(EngineError::Forbidden(_))
    ));

    // A reservation id is not a field
    let res_id = Ulid::new();
    engine
        .book(&alice, res_id, rid, 9 * H, 10 * H)
        .await
        .unwrap();
    assert!(matches!(
        engine.remove_field(&admin, res_id).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Purge ────────────────────────────────────────────────

#[tokio::test]
async fn purge_respects_retention_window() {
    let path = test_wal_path("purge_retention.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    let res_id = Ulid::new();
    engine
        .book(&alice, res_id, rid, 9 * H, 10 * H)
        .await
        .unwrap();
    engine.cancel_reservation(&alice, res_id).await.unwrap();

    let now = super::admission::now_ms();
    // Inside the retention window: nothing to purge
    assert!(engine.collect_purgeable(now, 24 * H).is_empty());
    // Past the window: the row is due
    let due = engine.collect_purgeable(now + 25 * H, 24 * H);
    assert_eq!(due.len(), 1);
    assert_eq!(due[0], (res_id, rid));

    engine.purge_reservation(res_id).await.unwrap();
    assert!(matches!(
        engine.get_reservation(&alice, res_id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn purge_refuses_active_rows() {
    let path = test_wal_path("purge_active.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    let res_id = Ulid::new();
    engine
        .book(&alice, res_id, rid, 9 * H, 10 * H)
        .await
        .unwrap();

    assert!(matches!(
        engine.purge_reservation(res_id).await,
        Err(EngineError::InvalidRequest(_))
    ));
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn restart_reconstructs_state() {
    let path = test_wal_path("restart.wal");

    let admin_caller;
    let alice_caller;
    let rid = Ulid::new();
    let cid = Ulid::new();
    let booked = Ulid::new();
    let cancelled = Ulid::new();

    {
        let engine = Engine::new(path.clone()).unwrap();
        admin_caller = admin(&engine).await;
        alice_caller = user(&engine, "alice@example.com").await;

        engine.create_category(&admin_caller, cid, "Rooms").await.unwrap();
        engine
            .create_resource(&admin_caller, rid, "Room A", Some("Big".into()), Some(cid))
            .await
            .unwrap();
        engine
            .add_field(&admin_caller, Ulid::new(), rid, "floor", "3")
            .await
            .unwrap();
        engine
            .book(&alice_caller, booked, rid, 10 * H, 11 * H)
            .await
            .unwrap();
        engine
            .book(&alice_caller, cancelled, rid, 12 * H, 13 * H)
            .await
            .unwrap();
        engine
            .cancel_reservation(&alice_caller, cancelled)
            .await
            .unwrap();
    }

    let engine2 = Engine::new(path).unwrap();

    // Users survive with working credentials and roles
    assert!(engine2.authenticate("alice@example.com", "user-password-1").is_ok());
    let admin2 = engine2.resolve_caller(admin_caller.id).unwrap();
    assert_eq!(admin2.role, Role::Admin);

    // Directory state
    assert_eq!(engine2.get_category(cid).unwrap().name, "Rooms");
    let resource = engine2.get_resource(rid).await.unwrap();
    assert_eq!(resource.name, "Room A");
    assert_eq!(resource.category_id, Some(cid));
    assert_eq!(engine2.list_fields(rid).await.len(), 1);

    // Reservations, including the cancelled one
    let active = engine2.get_reservation(&alice_caller, booked).await.unwrap();
    assert_eq!(active.status, ReservationStatus::Active);
    let gone = engine2
        .get_reservation(&alice_caller, cancelled)
        .await
        .unwrap();
    assert_eq!(gone.status, ReservationStatus::Cancelled);

    // Admission still enforced against the replayed row
    assert!(matches!(
        engine2
            .book(&alice_caller, Ulid::new(), rid, 10 * H + 30 * M, 11 * H)
            .await,
        Err(EngineError::Conflict(_))
    ));
    // And the cancelled window is free
    engine2
        .book(&alice_caller, Ulid::new(), rid, 12 * H, 13 * H)
        .await
        .unwrap();
}

#[tokio::test]
async fn group_commit_batches_appends() {
    let path = test_wal_path("group_commit_batch.wal");
    let engine = Arc::new(Engine::new(path.clone()).unwrap());

    let n = 20;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.register_user(&format!("user{i}@example.com"), "batch-password")
                .await
        }));
    }

    for h in handles {
        h.await.unwrap().unwrap();
    }

    // Replay WAL from disk — should reconstruct the same N users
    let engine2 = Engine::new(path).unwrap();
    for i in 0..n {
        assert!(
            engine2
                .authenticate(&format!("user{i}@example.com"), "batch-password")
                .is_ok()
        );
    }
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let engine = Engine::new(path.clone()).unwrap();
    let admin = admin(&engine).await;
    let alice = user(&engine, "alice@example.com").await;
    let rid = room(&engine, &admin).await;

    // Churn: book and cancel repeatedly, then one live booking
    for _ in 0..10 {
        let id = Ulid::new();
        engine.book(&alice, id, rid, 9 * H, 10 * H).await.unwrap();
        engine.cancel_reservation(&alice, id).await.unwrap();
        engine.purge_reservation(id).await.unwrap();
    }
    let keeper = Ulid::new();
    engine.book(&alice, keeper, rid, 9 * H, 10 * H).await.unwrap();

    assert!(engine.wal_appends_since_compact().await > 0);
    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    // Restart from the compacted WAL
    drop(engine);
    let engine2 = Engine::new(path).unwrap();
    assert!(engine2.authenticate("alice@example.com", "user-password-1").is_ok());
    let row = engine2.get_reservation(&alice, keeper).await.unwrap();
    assert_eq!(row.status, ReservationStatus::Active);
    assert!(matches!(
        engine2.book(&alice, Ulid::new(), rid, 9 * H, 10 * H).await,
        Err(EngineError::Conflict(_))
    ));
}

#[tokio::test]
async fn wal_appends_counted_through_channel() {
    let path = test_wal_path("appends_counter.wal");
    let engine = Engine::new(path).unwrap();

    assert_eq!(engine.wal_appends_since_compact().await, 0);

    let admin = admin(&engine).await;
    let rid = room(&engine, &admin).await;
    let res_id = Ulid::new();
    engine.book(&admin, res_id, rid, 9 * H, 10 * H).await.unwrap();
    engine.cancel_reservation(&admin, res_id).await.unwrap();

    // register + create_resource + book + cancel
    assert_eq!(engine.wal_appends_since_compact().await, 4);
}

// ── Limits ───────────────────────────────────────────────

#[tokio::test]
async fn name_length_limits_enforced() {
    let path = test_wal_path("limits_names.wal");
    let engine = Engine::new(path).unwrap();
    let admin = admin(&engine).await;

    let long_name = "x".repeat(MAX_NAME_LEN + 1);
    assert!(matches!(
        engine
            .create_resource(&admin, Ulid::new(), &long_name, None, None)
            .await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        engine.create_category(&admin, Ulid::new(), &long_name).await,
        Err(EngineError::LimitExceeded(_))
    ));

    let long_email = format!("{}@example.com", "x".repeat(MAX_EMAIL_LEN));
    assert!(matches!(
        engine.register_user(&long_email, "password-one").await,
        Err(EngineError::InvalidRequest(_))
    ));
}
