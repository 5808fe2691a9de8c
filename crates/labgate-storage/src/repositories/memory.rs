//! In-process [`LabStore`] used by tests and dry runs.

use super::lab::LabStore;
use crate::error::{StorageError, StorageResult};
use crate::models::{LabResultRow, RecentSample};
use labgate_core::{DeviceRecord, NormalizedResult};
use labgate_protocol::ParamPair;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    devices: Vec<DeviceRecord>,
    params: HashMap<String, Vec<ParamPair>>,
    results: Vec<LabResultRow>,
    failing_codes: HashSet<String>,
    writes: usize,
}

/// A [`LabStore`] kept entirely in memory.
///
/// Rows behave like the SQLite tables: results are unique per
/// `(sample_id, parameter_code)` and keep insertion order.
#[derive(Debug, Default)]
pub struct MemoryLabStore {
    inner: Mutex<Inner>,
}

impl MemoryLabStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_device(self, record: DeviceRecord) -> Self {
        self.lock().devices.push(record);
        self
    }

    pub fn with_params(self, machine_id: &str, pairs: Vec<ParamPair>) -> Self {
        self.lock().params.insert(machine_id.to_string(), pairs);
        self
    }

    /// Order `lis_code` on `sample_id`.
    pub fn with_pending(self, sample_id: &str, lis_code: &str) -> Self {
        self.lock()
            .results
            .push(LabResultRow::pending(sample_id, lis_code));
        self
    }

    /// Make every write of `parameter_code` fail.
    pub fn fail_writes_for(self, parameter_code: &str) -> Self {
        self.lock().failing_codes.insert(parameter_code.to_string());
        self
    }

    /// Replace the device table.
    pub fn set_devices(&self, devices: Vec<DeviceRecord>) {
        self.lock().devices = devices;
    }

    pub fn results(&self) -> Vec<LabResultRow> {
        self.lock().results.clone()
    }

    pub fn result(&self, sample_id: &str, parameter_code: &str) -> Option<LabResultRow> {
        self.lock()
            .results
            .iter()
            .find(|row| row.sample_id == sample_id && row.parameter_code == parameter_code)
            .cloned()
    }

    /// Number of successful result writes.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }
}

impl LabStore for MemoryLabStore {
    async fn get_devices(&self) -> StorageResult<Vec<DeviceRecord>> {
        let mut devices = self.lock().devices.clone();
        devices.sort_by(|a, b| a.machine_name.cmp(&b.machine_name));
        Ok(devices)
    }

    async fn get_machine_param_pairs(&self, machine_id: &str) -> StorageResult<Vec<ParamPair>> {
        Ok(self
            .lock()
            .params
            .get(machine_id.trim())
            .cloned()
            .unwrap_or_default())
    }

    async fn get_pending_tests(&self, sample_id: &str) -> StorageResult<Vec<String>> {
        let sample_id = sample_id.trim();
        Ok(self
            .lock()
            .results
            .iter()
            .filter(|row| row.sample_id == sample_id && row.is_pending())
            .map(|row| row.parameter_code.clone())
            .collect())
    }

    async fn update_lab_result(&self, result: &NormalizedResult) -> StorageResult<()> {
        let mut inner = self.lock();
        if inner.failing_codes.contains(&result.parameter_code) {
            return Err(StorageError::Database(sqlx::Error::PoolClosed));
        }

        let row = LabResultRow::from(result);
        match inner.results.iter_mut().find(|existing| {
            existing.sample_id == row.sample_id && existing.parameter_code == row.parameter_code
        }) {
            Some(existing) => *existing = row,
            None => inner.results.push(row),
        }
        inner.writes += 1;
        Ok(())
    }

    async fn recent_samples(&self, limit: u32) -> StorageResult<BTreeMap<String, Vec<RecentSample>>> {
        let inner = self.lock();

        let mut latest: BTreeMap<(String, String), _> = BTreeMap::new();
        for row in &inner.results {
            let (Some(machine_id), Some(updated_at)) = (&row.machine_id, row.updated_at) else {
                continue;
            };
            let slot = latest
                .entry((machine_id.clone(), row.sample_id.clone()))
                .or_insert(updated_at);
            if updated_at > *slot {
                *slot = updated_at;
            }
        }

        let mut grouped: BTreeMap<String, Vec<RecentSample>> = BTreeMap::new();
        for ((machine_id, sample_id), updated_at) in latest {
            grouped
                .entry(machine_id.clone())
                .or_default()
                .push(RecentSample {
                    machine_id,
                    sample_id,
                    updated_at: Some(updated_at),
                });
        }
        for samples in grouped.values_mut() {
            samples.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            samples.truncate(limit as usize);
        }
        grouped.retain(|_, samples| !samples.is_empty());

        Ok(grouped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn result_at(machine: &str, sample: &str, code: &str, minutes_ago: i64) -> NormalizedResult {
        let mut result = NormalizedResult::new(machine, sample, code, "1.0");
        result.updated_at = Utc::now() - Duration::minutes(minutes_ago);
        result
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row() {
        let store = MemoryLabStore::new().with_pending("778", "WBC");
        let result = NormalizedResult::new("M1", "778", "WBC", "5.6");

        store.update_lab_result(&result).await.unwrap();
        store.update_lab_result(&result).await.unwrap();

        assert_eq!(store.results().len(), 1);
        assert_eq!(
            store.result("778", "WBC").unwrap().result.as_deref(),
            Some("5.6")
        );
        assert!(store.get_pending_tests("778").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_tests_in_order() {
        let store = MemoryLabStore::new()
            .with_pending("778", "GLU")
            .with_pending("778", "WBC")
            .with_pending("900", "HGB");

        assert_eq!(
            store.get_pending_tests(" 778 ").await.unwrap(),
            vec!["GLU".to_string(), "WBC".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failing_code() {
        let store = MemoryLabStore::new().fail_writes_for("HGB");

        assert!(
            store
                .update_lab_result(&NormalizedResult::new("M1", "1", "HGB", "13"))
                .await
                .is_err()
        );
        store
            .update_lab_result(&NormalizedResult::new("M1", "1", "WBC", "5"))
            .await
            .unwrap();
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_param_map_falls_back_to_name() {
        let store = MemoryLabStore::new()
            .with_params("Sysmex", vec![ParamPair::new("WBC", "WBC_LIS")]);

        assert!(store.device_param_pairs("", "Sysmex").await.unwrap().len() == 1);
        assert_eq!(store.device_param_pairs("M9", "Sysmex").await.unwrap().len(), 1);
        assert!(store.device_param_pairs("M9", "Other").await.unwrap().is_empty());

        let map = store.get_param_map("Sysmex").await.unwrap();
        assert_eq!(map.map("WBC"), Some("WBC_LIS"));
    }

    #[tokio::test]
    async fn test_recent_samples_limit() {
        let store = MemoryLabStore::new();
        for (sample, age) in [("1", 30), ("2", 20), ("3", 10)] {
            store
                .update_lab_result(&result_at("M1", sample, "WBC", age))
                .await
                .unwrap();
        }
        store
            .update_lab_result(&result_at("M2", "9", "WBC", 5))
            .await
            .unwrap();

        let recent = store.recent_samples(2).await.unwrap();
        let m1: Vec<&str> = recent["M1"].iter().map(|s| s.sample_id.as_str()).collect();
        assert_eq!(m1, vec!["3", "2"]);
        assert_eq!(recent["M2"].len(), 1);
        assert!(store.recent_samples(0).await.unwrap().is_empty());
    }
}
