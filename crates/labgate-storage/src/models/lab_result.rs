use chrono::{DateTime, Utc};
use labgate_core::NormalizedResult;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row of the `lab_results` table.
///
/// Rows are created by the order entry side with an empty `result`; the
/// gateway fills them in.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct LabResultRow {
    pub sample_id: String,
    pub parameter_code: String,
    pub result: Option<String>,
    pub machine_id: Option<String>,
    pub status: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LabResultRow {
    /// A pending order: no result yet.
    pub fn pending(sample_id: impl Into<String>, parameter_code: impl Into<String>) -> Self {
        Self {
            sample_id: sample_id.into(),
            parameter_code: parameter_code.into(),
            result: None,
            machine_id: None,
            status: None,
            updated_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.result.as_deref().is_none_or(|r| r.trim().is_empty())
    }
}

impl From<&NormalizedResult> for LabResultRow {
    fn from(result: &NormalizedResult) -> Self {
        Self {
            sample_id: result.sample_id.clone(),
            parameter_code: result.parameter_code.clone(),
            result: Some(result.result.clone()),
            machine_id: Some(result.machine_id.clone()),
            status: Some(result.status.clone()),
            updated_at: Some(result.updated_at),
        }
    }
}

/// One of the latest samples seen from a machine.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct RecentSample {
    pub machine_id: String,
    pub sample_id: String,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_row() {
        let row = LabResultRow::pending("778", "GLU");
        assert!(row.is_pending());

        let done = LabResultRow::from(&NormalizedResult::new("M1", "778", "GLU", "5.1"));
        assert!(!done.is_pending());
        assert_eq!(done.status.as_deref(), Some("Y"));
    }
}
