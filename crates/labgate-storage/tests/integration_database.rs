//! Integration tests for the SQLite store.
//!
//! Run with: cargo test --package labgate-storage --test integration_database

use chrono::{Duration, Utc};
use labgate_core::{DeviceConfig, DeviceRecord, NormalizedResult, TransportConfig};
use labgate_protocol::ParamPair;
use labgate_storage::{Database, DatabaseConfig, LabStore, SqliteLabStore, StorageError};
use rstest::rstest;
use std::sync::Arc;
use tokio::sync::Barrier;

async fn store() -> SqliteLabStore {
    let db = Database::in_memory().await.unwrap();
    SqliteLabStore::new(db.pool().clone())
}

fn result_at(machine: &str, sample: &str, code: &str, minutes_ago: i64) -> NormalizedResult {
    let mut result = NormalizedResult::new(machine, sample, code, "4.2");
    result.updated_at = Utc::now() - Duration::minutes(minutes_ago);
    result
}

#[tokio::test]
async fn test_file_database_with_wal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("lab.db");
    let db = Database::new(DatabaseConfig::new(path.to_string_lossy()))
        .await
        .unwrap();
    db.health_check().await.unwrap();

    let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
    db.close().await;
}

#[tokio::test]
async fn test_migration_idempotency() {
    let db = Database::in_memory().await.unwrap();
    db.migrate().await.unwrap();
    db.migrate().await.unwrap();
}

#[tokio::test]
async fn test_devices_round_trip_into_config() {
    let store = store().await;
    let mut record = DeviceRecord::new("Cobas", "5100", "0.0.0.0");
    record.machine_id = Some("M7".to_string());
    record.protocol = Some("hl7".to_string());
    store.insert_machine(&record).await.unwrap();
    store
        .insert_machine(&DeviceRecord::new("Alpha", "COM3", "9600,N,8,1"))
        .await
        .unwrap();

    let devices = store.get_devices().await.unwrap();
    let names: Vec<&str> = devices.iter().map(|d| d.machine_name.as_str()).collect();
    assert_eq!(names, vec!["Alpha", "Cobas"]);

    let config = DeviceConfig::from_record(&devices[1]).unwrap();
    assert_eq!(config.machine_id, "M7");
    assert!(matches!(config.transport, TransportConfig::Tcp(_)));
}

#[tokio::test]
async fn test_duplicate_machine_name_rejected() {
    let store = store().await;
    let record = DeviceRecord::new("Cobas", "5100", "");
    store.insert_machine(&record).await.unwrap();
    assert!(matches!(
        store.insert_machine(&record).await,
        Err(StorageError::Database(_))
    ));
}

#[tokio::test]
async fn test_deactivated_machine_hidden() {
    let store = store().await;
    store
        .insert_machine(&DeviceRecord::new("Cobas", "5100", ""))
        .await
        .unwrap();
    store.deactivate_machine("Cobas").await.unwrap();

    assert!(store.get_devices().await.unwrap().is_empty());
    assert!(matches!(
        store.deactivate_machine("Missing").await,
        Err(StorageError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_param_pairs_and_map() {
    let store = store().await;
    for (instrument, lis) in [("WBC", "WBC_LIS"), ("HGB", "HGB_LIS"), ("WBC", "WBC_LIS")] {
        store
            .insert_param_pair("M1", &ParamPair::new(instrument, lis))
            .await
            .unwrap();
    }

    let pairs = store.get_machine_param_pairs("M1").await.unwrap();
    assert_eq!(pairs.len(), 2);
    assert!(store.get_machine_param_pairs("  ").await.unwrap().is_empty());

    let map = store.get_param_map("M1").await.unwrap();
    assert_eq!(map.map("^^^WBC^^conc"), Some("WBC_LIS"));
    assert_eq!(map.map("XYZ"), None);
}

#[tokio::test]
async fn test_param_pairs_by_device_name() {
    let store = store().await;
    store
        .insert_param_pair("Sysmex", &ParamPair::new("WBC", "WBC_LIS"))
        .await
        .unwrap();

    let pairs = store.device_param_pairs("M1", "Sysmex").await.unwrap();
    assert_eq!(pairs, vec![ParamPair::new("WBC", "WBC_LIS")]);
}

#[rstest]
#[case(None)]
#[case(Some(""))]
#[case(Some("   "))]
#[tokio::test]
async fn test_pending_when_result_blank(#[case] result: Option<&str>) {
    let store = store().await;
    store.insert_pending_test("778", "WBC").await.unwrap();
    if let Some(value) = result {
        sqlx::query("UPDATE lab_results SET result = ? WHERE sample_id = '778'")
            .bind(value)
            .execute(store.pool())
            .await
            .unwrap();
    }

    assert_eq!(
        store.get_pending_tests("778").await.unwrap(),
        vec!["WBC".to_string()]
    );
}

#[tokio::test]
async fn test_upsert_fills_pending_order() {
    let store = store().await;
    store.insert_pending_test("778", "GLU").await.unwrap();
    store.insert_pending_test("778", "WBC").await.unwrap();

    let result = NormalizedResult::new("M1", "778", "WBC", "5.6");
    store.update_lab_result(&result).await.unwrap();
    store.update_lab_result(&result).await.unwrap();

    let rows = store.find_results("778").await.unwrap();
    assert_eq!(rows.len(), 2);
    let wbc = rows.iter().find(|r| r.parameter_code == "WBC").unwrap();
    assert_eq!(wbc.result.as_deref(), Some("5.6"));
    assert_eq!(wbc.machine_id.as_deref(), Some("M1"));
    assert_eq!(wbc.status.as_deref(), Some("Y"));
    assert!(wbc.updated_at.is_some());

    assert_eq!(
        store.get_pending_tests("778").await.unwrap(),
        vec!["GLU".to_string()]
    );
}

#[tokio::test]
async fn test_upsert_overwrites_value() {
    let store = store().await;
    store
        .update_lab_result(&NormalizedResult::new("M1", "778", "WBC", "5.6"))
        .await
        .unwrap();
    store
        .update_lab_result(&NormalizedResult::new("M2", "778", "WBC", "5.9"))
        .await
        .unwrap();

    let rows = store.find_results("778").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].result.as_deref(), Some("5.9"));
    assert_eq!(rows[0].machine_id.as_deref(), Some("M2"));
}

#[tokio::test]
async fn test_recent_samples_per_machine() {
    let store = store().await;
    store.update_lab_result(&result_at("M1", "1", "WBC", 30)).await.unwrap();
    store.update_lab_result(&result_at("M1", "1", "HGB", 1)).await.unwrap();
    store.update_lab_result(&result_at("M1", "2", "WBC", 20)).await.unwrap();
    store.update_lab_result(&result_at("M1", "3", "WBC", 10)).await.unwrap();
    store.update_lab_result(&result_at("M2", "9", "WBC", 5)).await.unwrap();
    store.insert_pending_test("10", "WBC").await.unwrap();

    let recent = store.recent_samples(2).await.unwrap();
    assert_eq!(recent.len(), 2);
    let m1: Vec<&str> = recent["M1"].iter().map(|s| s.sample_id.as_str()).collect();
    assert_eq!(m1, vec!["1", "3"]);
    assert_eq!(recent["M2"][0].sample_id, "9");

    assert!(store.recent_samples(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_result_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lab.db");
    let db = Database::new(DatabaseConfig::new(path.to_string_lossy()).max_connections(4))
        .await
        .unwrap();
    let store = Arc::new(SqliteLabStore::new(db.pool().clone()));

    const TASKS: usize = 8;
    let barrier = Arc::new(Barrier::new(TASKS));
    let handles: Vec<_> = (0..TASKS)
        .map(|i| {
            let store = store.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                store
                    .update_lab_result(&NormalizedResult::new("M1", "778", format!("P{i}"), "1"))
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }
    assert_eq!(store.find_results("778").await.unwrap().len(), TASKS);
    db.close().await;
}
