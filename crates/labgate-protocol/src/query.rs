//! Instrument-initiated queries for pending work.
//!
//! Some segment-framed analyzers ask the host for the tests ordered on a
//! sample by sending a `Q` record. The host answers with an order message
//! listing those tests in the instrument's own codes.

use crate::{
    detect::{records, strip_controls, strip_frame_prefix},
    mapper::{Orientation, ParamPair},
};
use labgate_core::constants::{COMPONENT_DELIMITER, FIELD_DELIMITER};
use std::collections::HashMap;

/// Extract the sample id from the first `Q` record of a message.
///
/// The sample field is often composite (`^778^^`); a purely numeric
/// component is preferred, otherwise the whole field is used.
///
/// ```
/// use labgate_protocol::extract_query_sample_id;
///
/// let msg = "\x021H|\\^&\r2Q|1|^778^^|ALL\r3L|1\x03";
/// assert_eq!(extract_query_sample_id(msg).as_deref(), Some("778"));
/// assert_eq!(extract_query_sample_id("R|1|^^^WBC|5.6"), None);
/// ```
pub fn extract_query_sample_id(message: &str) -> Option<String> {
    let cleaned = strip_controls(message);
    records(&cleaned)
        .map(|record| strip_frame_prefix(record.trim()))
        .filter(|record| record.starts_with("Q|"))
        .find_map(|record| {
            let raw = record.split(FIELD_DELIMITER).nth(2)?;
            let numeric = raw
                .split(COMPONENT_DELIMITER)
                .map(str::trim)
                .find(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));

            match numeric {
                Some(part) => Some(part.to_string()),
                None => Some(raw.trim().to_string()).filter(|raw| !raw.is_empty()),
            }
        })
}

/// Translates laboratory test codes back to instrument codes.
///
/// Built from the same stored pairs and orientation as the session's
/// [`ParamMap`](crate::ParamMap), so both directions agree.
#[derive(Debug, Clone, Default)]
pub struct TestCodeTable {
    lis_to_instrument: HashMap<String, String>,
    instrument_codes: HashMap<String, String>,
}

impl TestCodeTable {
    pub fn new(pairs: &[ParamPair], orientation: Orientation) -> Self {
        let mut table = Self::default();
        for pair in pairs {
            let (instrument, lis) = orientation.orient(pair);
            if instrument.is_empty() || lis.is_empty() {
                continue;
            }
            table
                .lis_to_instrument
                .insert(lis.to_lowercase(), instrument.to_string());
            table
                .instrument_codes
                .insert(instrument.to_lowercase(), instrument.to_string());
        }
        table
    }

    /// Map pending laboratory codes to instrument codes, in order.
    ///
    /// Codes already in instrument form pass through; unknown codes are
    /// dropped.
    pub fn to_instrument_codes<S: AsRef<str>>(&self, lis_codes: &[S]) -> Vec<String> {
        lis_codes
            .iter()
            .filter_map(|code| {
                let key = code.as_ref().trim().to_lowercase();
                if key.is_empty() {
                    return None;
                }
                self.lis_to_instrument
                    .get(&key)
                    .or_else(|| self.instrument_codes.get(&key))
                    .cloned()
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lis_to_instrument.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Q|1|778|ALL", Some("778"))]
    #[case("1Q|1|^778^^|ALL", Some("778"))]
    #[case("Q|1|SMP^778", Some("778"))]
    #[case("Q|1|ABC-9", Some("ABC-9"))]
    #[case("Q|1||ALL", None)]
    #[case("Q|1", None)]
    #[case("H|\\^&\rL|1", None)]
    fn test_extract_query_sample_id(#[case] message: &str, #[case] expected: Option<&str>) {
        assert_eq!(extract_query_sample_id(message).as_deref(), expected);
    }

    #[test]
    fn test_first_query_wins() {
        let msg = "Q|1|111\rQ|2|222";
        assert_eq!(extract_query_sample_id(msg).as_deref(), Some("111"));
    }

    #[test]
    fn test_forward_table() {
        let pairs = [ParamPair::new("A1", "GLU"), ParamPair::new("A2", "CHOL")];
        let table = TestCodeTable::new(&pairs, Orientation::Forward);
        assert_eq!(
            table.to_instrument_codes(&["glu", "CHOL", "UNKNOWN", ""]),
            vec!["A1", "A2"]
        );
    }

    #[test]
    fn test_instrument_codes_pass_through() {
        let pairs = [ParamPair::new("A1", "GLU")];
        let table = TestCodeTable::new(&pairs, Orientation::Forward);
        assert_eq!(table.to_instrument_codes(&["a1"]), vec!["A1"]);
    }

    #[test]
    fn test_inverse_table() {
        let pairs = [ParamPair::new("GLUCOSE", "A1")];
        let table = TestCodeTable::new(&pairs, Orientation::Inverse);
        assert_eq!(table.to_instrument_codes(&["glucose"]), vec!["A1"]);
    }
}
