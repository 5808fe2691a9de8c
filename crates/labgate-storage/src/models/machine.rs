use labgate_core::DeviceRecord;
use labgate_protocol::ParamPair;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row of the `machines` table.
///
/// Columns are kept raw; [`labgate_core::DeviceConfig::from_record`] does
/// the interpretation once a session is started.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct MachineRow {
    pub machine_id: Option<String>,
    pub machine_name: String,
    pub comm_port: String,
    pub settings: String,
    pub protocol: Option<String>,
    pub result_code_field: Option<i64>,
    pub verify_checksum: Option<bool>,
}

impl From<MachineRow> for DeviceRecord {
    fn from(row: MachineRow) -> Self {
        DeviceRecord {
            machine_name: row.machine_name,
            comm_port: row.comm_port,
            settings: row.settings,
            machine_id: row.machine_id.filter(|id| !id.trim().is_empty()),
            protocol: row.protocol,
            result_code_field: row.result_code_field,
            verify_checksum: row.verify_checksum,
        }
    }
}

/// A row of the `machine_params` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct MachineParamRow {
    pub param_code: String,
    pub lis_code: String,
}

impl From<MachineParamRow> for ParamPair {
    fn from(row: MachineParamRow) -> Self {
        ParamPair::new(row.param_code, row.lis_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_machine_id_becomes_none() {
        let row = MachineRow {
            machine_id: Some("  ".to_string()),
            machine_name: "Analyzer".to_string(),
            comm_port: "COM3".to_string(),
            settings: "9600,N,8,1".to_string(),
            protocol: None,
            result_code_field: None,
            verify_checksum: None,
        };
        let record = DeviceRecord::from(row);
        assert_eq!(record.machine_id, None);
        assert_eq!(record.effective_id(), "Analyzer");
    }
}
