//! PostgreSQL store tests.
//!
//! Run with: cargo test -p hearth-storage --features db-tests
//! Requires HEARTH_DB_* to point at a disposable database.

#![cfg(feature = "db-tests")]

use hearth_core::{AutomationVersion, HearthError, StorageError, SuggestionPhase};
use hearth_storage::{DbConfig, PgStore, SuggestionStore, VersionStore};
use hearth_test_utils::fixtures::living_room_suggestion;

async fn store() -> PgStore {
    let store = PgStore::from_config(&DbConfig::from_env()).expect("pool");
    store.migrate().await.expect("migrations");
    store
}

#[tokio::test]
async fn test_migrations_are_rerunnable() {
    let store = store().await;
    let report = store.migrate().await.expect("second run");
    assert_eq!(report.applied, 0);
    assert!(report.already_present > 0);
}

#[tokio::test]
async fn test_suggestion_round_trip_and_cas() {
    let store = store().await;
    let mut suggestion = living_room_suggestion();
    store.insert(&suggestion).await.unwrap();

    let loaded = store.get(suggestion.suggestion_id).await.unwrap().unwrap();
    assert_eq!(loaded.pattern, suggestion.pattern);
    assert_eq!(loaded.phase, SuggestionPhase::DescriptionPending);

    suggestion.phase = SuggestionPhase::DescriptionReady;
    suggestion.description = "Turns on the Living Room Light at 50%.".to_string();
    store
        .update_if_phase(&suggestion, SuggestionPhase::DescriptionPending)
        .await
        .unwrap();

    let err = store
        .update_if_phase(&suggestion, SuggestionPhase::DescriptionPending)
        .await
        .unwrap_err();
    assert!(matches!(err, HearthError::Storage(StorageError::Conflict { .. })));

    store.delete(suggestion.suggestion_id).await.unwrap();
}

#[tokio::test]
async fn test_version_gap_and_rollback_pointer() {
    let store = store().await;
    let automation_id = format!("pg_test_{}", uuid::Uuid::now_v7().simple());

    let v1 = AutomationVersion::new(&automation_id, 1, "alias: v1\n", 90);
    let v2 = AutomationVersion::new(&automation_id, 2, "alias: v2\n", 80);
    store.append(&v1).await.unwrap();
    store.append(&v2).await.unwrap();

    let gap = AutomationVersion::new(&automation_id, 4, "alias: v4\n", 80);
    assert!(matches!(
        store.append(&gap).await.unwrap_err(),
        HearthError::Storage(StorageError::VersionGap { expected: 3, got: 4, .. })
    ));

    store.set_active(&automation_id, v1.version_id).await.unwrap();
    let active = store.active(&automation_id).await.unwrap().unwrap();
    assert_eq!(active.definition_text, v1.definition_text);
    assert_eq!(store.list(&automation_id).await.unwrap().len(), 2);
}
