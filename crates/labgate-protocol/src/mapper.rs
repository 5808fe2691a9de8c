//! Instrument code normalization and per-device parameter mapping.
//!
//! Instruments report analytes with their own codes, frequently wrapped in
//! composite fields (`^^^WBC^^conc`, `6690-2^WBC^LN`). The gateway reduces
//! every code to a lowercase key with [`normalize_code`] and looks it up in
//! the device's [`ParamMap`] to obtain the laboratory system's code.
//!
//! # Mapping direction
//!
//! The mapping table stores `(instrument_code, lis_code)` pairs, but some
//! installations filled the two columns the other way round. The map is
//! oriented by a heuristic: instrument codes are short and alphanumeric
//! (`WBC`, `HGB`, `A1`), laboratory codes usually are not (`WBC_LIS`,
//! `1001-2`). Whichever column scores more keys of that shape is used as
//! the key column.
//!
//! ```
//! use labgate_protocol::{Orientation, ParamMap, ParamPair};
//!
//! let map = ParamMap::from_pairs(&[
//!     ParamPair::new("WBC_COUNT", "WBC"),
//!     ParamPair::new("HGB_MASS", "HGB"),
//! ]);
//!
//! assert_eq!(map.orientation(), Orientation::Inverse);
//! assert_eq!(map.map("^^^WBC"), Some("WBC_COUNT"));
//! ```

use labgate_core::constants::{COMPONENT_DELIMITER, INSTRUMENT_CODE_MAX_LEN};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One row of a device's code table, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamPair {
    /// Column meant to hold the instrument's code.
    pub instrument_code: String,
    /// Column meant to hold the laboratory system's code.
    pub lis_code: String,
}

impl ParamPair {
    pub fn new(instrument_code: impl Into<String>, lis_code: impl Into<String>) -> Self {
        Self {
            instrument_code: instrument_code.into(),
            lis_code: lis_code.into(),
        }
    }
}

/// Which column of the stored pairs holds instrument codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    /// Columns are as named.
    #[default]
    Forward,
    /// Columns are swapped.
    Inverse,
}

impl Orientation {
    /// Return `(instrument, lis)` for a stored pair under this orientation.
    pub fn orient<'a>(self, pair: &'a ParamPair) -> (&'a str, &'a str) {
        match self {
            Orientation::Forward => (pair.instrument_code.trim(), pair.lis_code.trim()),
            Orientation::Inverse => (pair.lis_code.trim(), pair.instrument_code.trim()),
        }
    }
}

/// Normalize an instrument code to its lookup key.
///
/// Splits composite codes on `^`, prefers the first component containing a
/// letter, falls back to the last component, trims non-alphanumeric edges
/// and lowercases. Empty input gives an empty key, which never maps.
///
/// ```
/// use labgate_protocol::normalize_code;
///
/// assert_eq!(normalize_code("^^WBC^^conc"), "wbc");
/// assert_eq!(normalize_code("6690^1"), "1");
/// assert_eq!(normalize_code("  -HGB: "), "hgb");
/// ```
pub fn normalize_code(raw_code: &str) -> String {
    let parts: Vec<&str> = raw_code
        .split(COMPONENT_DELIMITER)
        .filter(|part| !part.is_empty())
        .collect();

    let Some(last) = parts.last() else {
        return trim_edges(raw_code).to_lowercase();
    };

    parts
        .iter()
        .map(|part| trim_edges(part))
        .find(|part| part.chars().any(char::is_alphabetic))
        .unwrap_or_else(|| trim_edges(last))
        .to_lowercase()
}

fn trim_edges(value: &str) -> &str {
    value.trim_matches(|c: char| !c.is_ascii_alphanumeric())
}

/// Score how much a key set looks like instrument codes.
fn instrument_score<'a>(keys: impl Iterator<Item = &'a String>) -> usize {
    keys.filter(|key| {
        !key.is_empty()
            && key.chars().count() <= INSTRUMENT_CODE_MAX_LEN
            && key.chars().all(char::is_alphanumeric)
    })
    .count()
}

/// Normalized instrument code → canonical code, immutable for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamMap {
    entries: HashMap<String, String>,
    orientation: Orientation,
}

impl ParamMap {
    /// Build an oriented map from stored pairs.
    ///
    /// Pairs with an empty column are ignored. Keys are lowercased; values
    /// keep their stored spelling.
    pub fn from_pairs(pairs: &[ParamPair]) -> Self {
        let forward = Self::build(pairs, Orientation::Forward);
        let inverse = Self::build(pairs, Orientation::Inverse);

        if !inverse.is_empty()
            && instrument_score(inverse.keys()) > instrument_score(forward.keys())
        {
            Self {
                entries: inverse,
                orientation: Orientation::Inverse,
            }
        } else {
            Self {
                entries: forward,
                orientation: Orientation::Forward,
            }
        }
    }

    fn build(pairs: &[ParamPair], orientation: Orientation) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|pair| orientation.orient(pair))
            .filter(|(instrument, lis)| !instrument.is_empty() && !lis.is_empty())
            .map(|(instrument, lis)| (instrument.to_lowercase(), lis.to_string()))
            .collect()
    }

    /// Normalize a raw instrument code and look it up.
    ///
    /// Returns `None` for unmapped codes; callers skip the analyte.
    pub fn map(&self, raw_code: &str) -> Option<&str> {
        let key = normalize_code(raw_code);
        if key.is_empty() {
            return None;
        }
        self.entries.get(&key).map(String::as_str)
    }

    /// Look up an already normalized key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Orientation chosen by the direction heuristic.
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for ParamMap {
    /// Build a forward map from `(instrument, lis)` tuples without the heuristic.
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(instrument, lis)| (normalize_code(&instrument), lis))
                .filter(|(key, lis)| !key.is_empty() && !lis.is_empty())
                .collect(),
            orientation: Orientation::Forward,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("^^WBC^^conc", "wbc")]
    #[case("WBC^White Cell Count", "wbc")]
    #[case("6690-2^WBC^LN", "wbc")]
    #[case("^^^718-7", "718-7")]
    #[case("12^34", "34")]
    #[case("HGB:", "hgb")]
    #[case("--PLT--", "plt")]
    #[case("^^^", "")]
    #[case("", "")]
    fn test_normalize_code(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_code(raw), expected);
    }

    #[test]
    fn test_forward_map() {
        let map = ParamMap::from_pairs(&[ParamPair::new("WBC", "WBC_LIS")]);
        assert_eq!(map.orientation(), Orientation::Forward);
        assert_eq!(map.map("^^^WBC^^conc"), Some("WBC_LIS"));
        assert_eq!(map.map("wbc"), Some("WBC_LIS"));
        assert_eq!(map.map("XYZ"), None);
        assert_eq!(map.map(""), None);
    }

    #[test]
    fn test_inverse_map_keeps_value_spelling() {
        let map = ParamMap::from_pairs(&[
            ParamPair::new("Leucocytes Total", "WBC"),
            ParamPair::new("Haemoglobin", "HGB"),
        ]);
        assert_eq!(map.orientation(), Orientation::Inverse);
        assert_eq!(map.map("HGB"), Some("Haemoglobin"));
    }

    #[test]
    fn test_tie_keeps_forward() {
        let map = ParamMap::from_pairs(&[ParamPair::new("A1", "B2")]);
        assert_eq!(map.orientation(), Orientation::Forward);
        assert_eq!(map.get("a1"), Some("B2"));
    }

    #[test]
    fn test_empty_columns_are_ignored() {
        let map = ParamMap::from_pairs(&[ParamPair::new("", "X"), ParamPair::new("Y", " ")]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_from_iterator() {
        let map: ParamMap = [("WBC".to_string(), "WBC_LIS".to_string())]
            .into_iter()
            .collect();
        assert_eq!(map.len(), 1);
        assert_eq!(map.map("^WBC"), Some("WBC_LIS"));
    }
}
