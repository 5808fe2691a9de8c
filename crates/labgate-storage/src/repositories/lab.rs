use crate::error::{StorageError, StorageResult};
use crate::models::{LabResultRow, MachineParamRow, MachineRow, RecentSample};
use labgate_core::{DeviceRecord, NormalizedResult};
use labgate_protocol::{ParamMap, ParamPair};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::future::Future;
use tracing::debug;

/// Laboratory database as seen by the gateway.
///
/// Every listener session holds a shared handle to one store. Methods
/// return `Send` futures so sessions can run on any runtime worker.
pub trait LabStore: Send + Sync + 'static {
    /// Active device rows.
    fn get_devices(&self) -> impl Future<Output = StorageResult<Vec<DeviceRecord>>> + Send;

    /// Stored `(instrument_code, lis_code)` pairs for a machine id or name.
    fn get_machine_param_pairs(
        &self,
        machine_id: &str,
    ) -> impl Future<Output = StorageResult<Vec<ParamPair>>> + Send;

    /// Laboratory codes ordered on a sample that have no result yet.
    fn get_pending_tests(
        &self,
        sample_id: &str,
    ) -> impl Future<Output = StorageResult<Vec<String>>> + Send;

    /// Insert or overwrite the result for `(sample_id, parameter_code)`.
    ///
    /// Writing the same result twice leaves the same row.
    fn update_lab_result(
        &self,
        result: &NormalizedResult,
    ) -> impl Future<Output = StorageResult<()>> + Send;

    /// Latest `limit` sample ids per machine, newest first.
    fn recent_samples(
        &self,
        limit: u32,
    ) -> impl Future<Output = StorageResult<BTreeMap<String, Vec<RecentSample>>>> + Send;

    /// Oriented code map for a machine.
    fn get_param_map(
        &self,
        machine_id: &str,
    ) -> impl Future<Output = StorageResult<ParamMap>> + Send {
        async move {
            let pairs = self.get_machine_param_pairs(machine_id).await?;
            Ok(ParamMap::from_pairs(&pairs))
        }
    }

    /// Pairs for a device, looked up by id and then by name.
    fn device_param_pairs(
        &self,
        machine_id: &str,
        machine_name: &str,
    ) -> impl Future<Output = StorageResult<Vec<ParamPair>>> + Send {
        async move {
            let pairs = self.get_machine_param_pairs(machine_id).await?;
            if !pairs.is_empty() || machine_id == machine_name {
                return Ok(pairs);
            }
            debug!(machine_id, machine_name, "No parameters by id, trying name");
            self.get_machine_param_pairs(machine_name).await
        }
    }
}

/// SQLite implementation of [`LabStore`].
#[derive(Debug, Clone)]
pub struct SqliteLabStore {
    pool: SqlitePool,
}

impl SqliteLabStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register a device. Returns the row id.
    pub async fn insert_machine(&self, record: &DeviceRecord) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO machines (
                machine_id, machine_name, comm_port, settings,
                protocol, result_code_field, verify_checksum
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.machine_id)
        .bind(&record.machine_name)
        .bind(&record.comm_port)
        .bind(&record.settings)
        .bind(&record.protocol)
        .bind(record.result_code_field)
        .bind(record.verify_checksum)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Mark a device inactive so it disappears from [`LabStore::get_devices`].
    pub async fn deactivate_machine(&self, machine_name: &str) -> StorageResult<()> {
        let result = sqlx::query("UPDATE machines SET active = 0 WHERE machine_name = ?")
            .bind(machine_name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                entity_type: "machine".to_string(),
                field: "machine_name".to_string(),
                value: machine_name.to_string(),
            });
        }
        Ok(())
    }

    pub async fn insert_param_pair(&self, machine_id: &str, pair: &ParamPair) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO machine_params (machine_id, param_code, lis_code)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(machine_id)
        .bind(&pair.instrument_code)
        .bind(&pair.lis_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Order a test on a sample.
    pub async fn insert_pending_test(&self, sample_id: &str, lis_code: &str) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO lab_results (sample_id, parameter_code)
            VALUES (?, ?)
            "#,
        )
        .bind(sample_id)
        .bind(lis_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All rows of a sample.
    pub async fn find_results(&self, sample_id: &str) -> StorageResult<Vec<LabResultRow>> {
        let rows = sqlx::query_as::<_, LabResultRow>(
            r#"
            SELECT sample_id, parameter_code, result, machine_id, status, updated_at
            FROM lab_results
            WHERE sample_id = ?
            ORDER BY id
            "#,
        )
        .bind(sample_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

impl LabStore for SqliteLabStore {
    async fn get_devices(&self) -> StorageResult<Vec<DeviceRecord>> {
        let rows = sqlx::query_as::<_, MachineRow>(
            r#"
            SELECT machine_id, machine_name, comm_port, settings,
                   protocol, result_code_field, verify_checksum
            FROM machines
            WHERE active = 1
            ORDER BY machine_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DeviceRecord::from).collect())
    }

    async fn get_machine_param_pairs(&self, machine_id: &str) -> StorageResult<Vec<ParamPair>> {
        let machine_id = machine_id.trim();
        if machine_id.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, MachineParamRow>(
            r#"
            SELECT param_code, lis_code
            FROM machine_params
            WHERE machine_id = ?
            ORDER BY id
            "#,
        )
        .bind(machine_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ParamPair::from).collect())
    }

    async fn get_pending_tests(&self, sample_id: &str) -> StorageResult<Vec<String>> {
        let codes = sqlx::query_scalar::<_, String>(
            r#"
            SELECT parameter_code
            FROM lab_results
            WHERE sample_id = ?
              AND (result IS NULL OR TRIM(result) = '')
            ORDER BY id
            "#,
        )
        .bind(sample_id.trim())
        .fetch_all(&self.pool)
        .await?;

        Ok(codes)
    }

    async fn update_lab_result(&self, result: &NormalizedResult) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO lab_results (
                sample_id, parameter_code, result, machine_id, status, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (sample_id, parameter_code) DO UPDATE SET
                result = excluded.result,
                machine_id = excluded.machine_id,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&result.sample_id)
        .bind(&result.parameter_code)
        .bind(&result.result)
        .bind(&result.machine_id)
        .bind(&result.status)
        .bind(result.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_samples(&self, limit: u32) -> StorageResult<BTreeMap<String, Vec<RecentSample>>> {
        if limit == 0 {
            return Ok(BTreeMap::new());
        }

        let rows = sqlx::query_as::<_, RecentSample>(
            r#"
            WITH latest AS (
                SELECT machine_id, sample_id, MAX(updated_at) AS updated_at
                FROM lab_results
                WHERE machine_id IS NOT NULL AND updated_at IS NOT NULL
                GROUP BY machine_id, sample_id
            ),
            ranked AS (
                SELECT machine_id, sample_id, updated_at,
                       ROW_NUMBER() OVER (
                           PARTITION BY machine_id
                           ORDER BY updated_at DESC
                       ) AS rn
                FROM latest
            )
            SELECT machine_id, sample_id, updated_at
            FROM ranked
            WHERE rn <= ?
            ORDER BY machine_id, rn
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: BTreeMap<String, Vec<RecentSample>> = BTreeMap::new();
        for row in rows {
            grouped.entry(row.machine_id.clone()).or_default().push(row);
        }
        Ok(grouped)
    }
}
