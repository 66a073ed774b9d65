//! SQLite backend integration tests.
//!
//! These tests exercise the `DocumentStore` implementation end to end against
//! in-memory and on-disk databases.

use serde_json::json;

use carenet_persistence::backends::sqlite::SqliteBackend;
use carenet_persistence::core::DocumentStore;
use carenet_persistence::error::{ConcurrencyError, ResourceError, StorageError};
use carenet_persistence::types::{DocumentQuery, Pagination, SortOrder, UniqueKey};

fn create_backend() -> SqliteBackend {
    let backend = SqliteBackend::in_memory().expect("Failed to create SQLite backend");
    backend.init_schema().expect("Failed to initialize schema");
    backend
}

// ============================================================================
// Create / Read
// ============================================================================

#[tokio::test]
async fn test_create_and_read() {
    let backend = create_backend();

    let created = backend
        .create("users", "u-1", json!({"email": "ada@example.org"}), vec![])
        .await
        .unwrap();
    assert_eq!(created.version(), 1);

    let read = backend.read("users", "u-1").await.unwrap().unwrap();
    assert_eq!(read.content()["email"], "ada@example.org");
    assert_eq!(read.version(), 1);
    assert_eq!(read.created_at(), read.last_modified());
}

#[tokio::test]
async fn test_read_missing_returns_none() {
    let backend = create_backend();
    assert!(backend.read("users", "nope").await.unwrap().is_none());

    let err = backend.read_required("users", "nope").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_create_duplicate_id_fails() {
    let backend = create_backend();
    backend
        .create("users", "u-1", json!({}), vec![])
        .await
        .unwrap();

    let err = backend
        .create("users", "u-1", json!({}), vec![])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Resource(ResourceError::AlreadyExists { .. })
    ));
}

#[tokio::test]
async fn test_same_id_in_different_collections() {
    let backend = create_backend();
    backend
        .create("users", "x", json!({"kind": "user"}), vec![])
        .await
        .unwrap();
    backend
        .create("hospitals", "x", json!({"kind": "hospital"}), vec![])
        .await
        .unwrap();

    let hospital = backend.read("hospitals", "x").await.unwrap().unwrap();
    assert_eq!(hospital.content()["kind"], "hospital");
}

// ============================================================================
// Unique keys
// ============================================================================

#[tokio::test]
async fn test_unique_key_rejects_second_document() {
    let backend = create_backend();
    let key = || UniqueKey::compound("departments.code", &["h-1", "CARD"]);

    backend
        .create("departments", "d-1", json!({"code": "CARD"}), vec![key()])
        .await
        .unwrap();

    let err = backend
        .create("departments", "d-2", json!({"code": "CARD"}), vec![key()])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Resource(ResourceError::Duplicate { .. })
    ));

    // The failed insert left nothing behind.
    assert!(backend.read("departments", "d-2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unique_key_scoped_by_compound_value() {
    let backend = create_backend();
    backend
        .create(
            "departments",
            "d-1",
            json!({}),
            vec![UniqueKey::compound("departments.code", &["h-1", "CARD"])],
        )
        .await
        .unwrap();

    // Same code in another hospital is fine.
    backend
        .create(
            "departments",
            "d-2",
            json!({}),
            vec![UniqueKey::compound("departments.code", &["h-2", "CARD"])],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_releases_unique_keys() {
    let backend = create_backend();
    let key = || UniqueKey::new("users.email", "ada@example.org");

    backend
        .create("users", "u-1", json!({}), vec![key()])
        .await
        .unwrap();
    backend.delete("users", "u-1").await.unwrap();

    backend
        .create("users", "u-2", json!({}), vec![key()])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_missing_is_not_found() {
    let backend = create_backend();
    let err = backend.delete("users", "ghost").await.unwrap_err();
    assert!(err.is_not_found());
}

// ============================================================================
// Compare-and-swap updates
// ============================================================================

#[tokio::test]
async fn test_update_increments_version() {
    let backend = create_backend();
    let v1 = backend
        .create("test_orders", "o-1", json!({"status": "ready_for_test"}), vec![])
        .await
        .unwrap();

    let v2 = backend
        .update(&v1, json!({"status": "in_progress"}))
        .await
        .unwrap();
    assert_eq!(v2.version(), 2);
    assert_eq!(v2.created_at(), v1.created_at());

    let stored = backend.read("test_orders", "o-1").await.unwrap().unwrap();
    assert_eq!(stored.version(), 2);
    assert_eq!(stored.content()["status"], "in_progress");
}

#[tokio::test]
async fn test_stale_update_loses() {
    let backend = create_backend();
    let snapshot = backend
        .create("test_orders", "o-1", json!({"status": "ready_for_test"}), vec![])
        .await
        .unwrap();

    // Two writers start from the same snapshot; only the first wins.
    backend
        .update(&snapshot, json!({"status": "in_progress"}))
        .await
        .unwrap();
    let err = backend
        .update(&snapshot, json!({"status": "in_progress"}))
        .await
        .unwrap_err();

    match err {
        StorageError::Concurrency(ConcurrencyError::VersionConflict {
            expected_version,
            actual_version,
            ..
        }) => {
            assert_eq!(expected_version, 1);
            assert_eq!(actual_version, 2);
        }
        other => panic!("expected version conflict, got {other:?}"),
    }

    let stored = backend.read("test_orders", "o-1").await.unwrap().unwrap();
    assert_eq!(stored.version(), 2);
}

#[tokio::test]
async fn test_update_deleted_document_is_not_found() {
    let backend = create_backend();
    let snapshot = backend
        .create("users", "u-1", json!({}), vec![])
        .await
        .unwrap();
    backend.delete("users", "u-1").await.unwrap();

    let err = backend.update(&snapshot, json!({})).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_upsert_creates_then_overwrites() {
    let backend = create_backend();

    let first = backend
        .upsert("user_activity", "u-1", json!({"last_seen_at": "a"}))
        .await
        .unwrap();
    assert_eq!(first.version(), 1);

    let second = backend
        .upsert("user_activity", "u-1", json!({"last_seen_at": "b"}))
        .await
        .unwrap();
    assert_eq!(second.version(), 2);
    assert_eq!(second.created_at(), first.created_at());

    let stored = backend.read("user_activity", "u-1").await.unwrap().unwrap();
    assert_eq!(stored.content()["last_seen_at"], "b");
}

// ============================================================================
// Queries
// ============================================================================

async fn seed_users(backend: &SqliteBackend) {
    let users = [
        ("u-1", json!({"name": "Ada Lovelace", "email": "ada@h1.org", "phone": "555-0101", "role": "patient", "hospital_id": "h-1", "active": true})),
        ("u-2", json!({"name": "Grace Hopper", "email": "grace@h1.org", "phone": "555-0102", "role": "doctor", "hospital_id": "h-1", "active": true})),
        ("u-3", json!({"name": "Alan Turing", "email": "alan@h2.org", "phone": "555-0201", "role": "patient", "hospital_id": "h-2", "active": false})),
        ("u-4", json!({"name": "Edsger 100%", "email": "ed@h1.org", "phone": "555-0103", "role": "nurse", "hospital_id": null, "active": true})),
    ];
    for (id, content) in users {
        backend.create("users", id, content, vec![]).await.unwrap();
    }
}

#[tokio::test]
async fn test_find_by_equality() {
    let backend = create_backend();
    seed_users(&backend).await;

    let patients = backend
        .find(
            &DocumentQuery::new("users")
                .with_eq("role", "patient")
                .with_eq("hospital_id", "h-1"),
        )
        .await
        .unwrap();
    assert_eq!(patients.len(), 1);
    assert_eq!(patients[0].id(), "u-1");
}

#[tokio::test]
async fn test_find_by_boolean_and_null() {
    let backend = create_backend();
    seed_users(&backend).await;

    let inactive = backend
        .find(&DocumentQuery::new("users").with_eq("active", false))
        .await
        .unwrap();
    assert_eq!(inactive.len(), 1);
    assert_eq!(inactive[0].id(), "u-3");

    let unaffiliated = backend
        .find(&DocumentQuery::new("users").with_eq("hospital_id", serde_json::Value::Null))
        .await
        .unwrap();
    assert_eq!(unaffiliated.len(), 1);
    assert_eq!(unaffiliated[0].id(), "u-4");
}

#[tokio::test]
async fn test_find_by_membership() {
    let backend = create_backend();
    seed_users(&backend).await;

    let staff = backend
        .find(&DocumentQuery::new("users").with_in("role", ["doctor", "nurse"]))
        .await
        .unwrap();
    let ids: Vec<&str> = staff.iter().map(|d| d.id()).collect();
    assert_eq!(ids, vec!["u-2", "u-4"]);

    let none = backend
        .find(&DocumentQuery::new("users").with_in("role", Vec::<String>::new()))
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_find_contains_is_case_insensitive() {
    let backend = create_backend();
    seed_users(&backend).await;

    let by_name = backend
        .find(&DocumentQuery::new("users").with_contains(vec!["name", "email", "phone"], "LOVE"))
        .await
        .unwrap();
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].id(), "u-1");

    let by_phone = backend
        .find(&DocumentQuery::new("users").with_contains(vec!["name", "email", "phone"], "0102"))
        .await
        .unwrap();
    assert_eq!(by_phone[0].id(), "u-2");
}

#[tokio::test]
async fn test_find_contains_treats_wildcards_literally() {
    let backend = create_backend();
    seed_users(&backend).await;

    let matches = backend
        .find(&DocumentQuery::new("users").with_contains(vec!["name"], "100%"))
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id(), "u-4");

    let underscore = backend
        .find(&DocumentQuery::new("users").with_contains(vec!["name"], "_"))
        .await
        .unwrap();
    assert!(underscore.is_empty());
}

#[tokio::test]
async fn test_find_nested_field() {
    let backend = create_backend();
    backend
        .create("test_orders", "o-1", json!({"payment": {"status": "paid"}}), vec![])
        .await
        .unwrap();
    backend
        .create("test_orders", "o-2", json!({"payment": {"status": "pending"}}), vec![])
        .await
        .unwrap();

    let paid = backend
        .find(&DocumentQuery::new("test_orders").with_eq("payment.status", "paid"))
        .await
        .unwrap();
    assert_eq!(paid.len(), 1);
    assert_eq!(paid[0].id(), "o-1");
}

#[tokio::test]
async fn test_sort_pagination_and_count() {
    let backend = create_backend();
    seed_users(&backend).await;

    let query = DocumentQuery::new("users").with_sort(SortOrder::CreatedDesc);
    let page = backend
        .find(&query.clone().with_pagination(Pagination::page(2, 2)))
        .await
        .unwrap();
    let ids: Vec<&str> = page.iter().map(|d| d.id()).collect();
    assert_eq!(ids, vec!["u-2", "u-1"]);

    assert_eq!(backend.count(&query).await.unwrap(), 4);
    assert_eq!(
        backend
            .count(&DocumentQuery::new("users").with_eq("role", "patient"))
            .await
            .unwrap(),
        2
    );
}

// ============================================================================
// File databases
// ============================================================================

#[tokio::test]
async fn test_file_database_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("carenet.db");

    {
        let backend = SqliteBackend::open(&path).unwrap();
        backend.init_schema().unwrap();
        backend
            .create(
                "hospitals",
                "h-1",
                json!({"name": "St. Mary"}),
                vec![UniqueKey::new("hospitals.name", "st. mary")],
            )
            .await
            .unwrap();
    }

    let backend = SqliteBackend::open(&path).unwrap();
    backend.init_schema().unwrap();
    let stored = backend.read("hospitals", "h-1").await.unwrap().unwrap();
    assert_eq!(stored.content()["name"], "St. Mary");

    let err = backend
        .create(
            "hospitals",
            "h-2",
            json!({}),
            vec![UniqueKey::new("hospitals.name", "st. mary")],
        )
        .await
        .unwrap_err();
    assert!(err.is_duplicate());
}
