use crate::constants::DEFAULT_RESULT_STATUS;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One analyte result extracted from an instrument message.
///
/// Created once per reported analyte, handed to the persistence layer and
/// not retained afterwards. The parameter code is always the canonical
/// (laboratory system) code, never the instrument's own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub sample_id: String,
    pub parameter_code: String,
    pub result: String,
    pub machine_id: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

impl NormalizedResult {
    /// Create a verified result stamped with the current time.
    pub fn new(
        machine_id: impl Into<String>,
        sample_id: impl Into<String>,
        parameter_code: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            sample_id: sample_id.into(),
            parameter_code: parameter_code.into(),
            result: result.into(),
            machine_id: machine_id.into(),
            status: DEFAULT_RESULT_STATUS.to_string(),
            updated_at: Utc::now(),
        }
    }
}

impl fmt::Display for NormalizedResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} = {}",
            self.sample_id, self.parameter_code, self.result
        )
    }
}

/// Lifecycle state of a listener session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionStatus {
    #[default]
    Stopped,
    Starting,
    Running,
}

impl SessionStatus {
    /// Returns `true` for `Starting` and `Running`.
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Starting | SessionStatus::Running)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionStatus::Stopped => write!(f, "Stopped"),
            SessionStatus::Starting => write!(f, "Starting"),
            SessionStatus::Running => write!(f, "Running"),
        }
    }
}

/// Messaging protocol of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Segment-framed protocol (H/P/O/R/L records, STX/ETX frames).
    Astm,
    /// Line-delimited protocol (MSH/PID/OBR/OBX segments, block framing).
    Hl7,
    /// Neither structured grammar was recognized.
    Unknown,
}

impl Protocol {
    /// Interpret a configured protocol hint such as `"ASTM"` or `"HL7 (TCP/IP)"`.
    ///
    /// Returns `None` for anything that names neither protocol.
    pub fn from_hint(hint: &str) -> Option<Self> {
        let hint = hint.trim().to_uppercase();
        if hint.starts_with("ASTM") {
            Some(Protocol::Astm)
        } else if hint.starts_with("HL7") {
            Some(Protocol::Hl7)
        } else {
            None
        }
    }

    /// Returns `true` if this is [`Protocol::Unknown`].
    #[inline]
    #[must_use]
    pub fn is_unknown(self) -> bool {
        matches!(self, Protocol::Unknown)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::Astm => write!(f, "ASTM"),
            Protocol::Hl7 => write!(f, "HL7"),
            Protocol::Unknown => write!(f, "UNKNOWN"),
        }
    }
}
