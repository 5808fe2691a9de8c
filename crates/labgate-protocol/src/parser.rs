//! Result extraction for the three supported message grammars.
//!
//! A [`MessageParser`] is built once per session from the device's
//! configuration and mapping, and turns each complete message into a
//! [`ParseOutcome`]: the grammar that was applied, the sample id (if any),
//! the mapped results and the codes that had no mapping.
//!
//! # Grammar selection
//!
//! 1. The detected protocol, when it is not [`Protocol::Unknown`].
//! 2. The device's configured protocol hint.
//! 3. Line-delimited, if the text carries `PID|`, `OBR|` or `OBX|` segments
//!    without a header.
//! 4. Plain text.
//!
//! A structured grammar that finds none of its own records falls back to
//! plain text, so a mislabelled dump is still readable.
//!
//! # Examples
//!
//! ```
//! use labgate_core::{Protocol, ResultCodeField};
//! use labgate_protocol::{Grammar, MessageParser, ParamMap};
//!
//! let params: ParamMap = [("WBC".to_string(), "WBC_LIS".to_string())]
//!     .into_iter()
//!     .collect();
//! let parser = MessageParser::new("M1", params).result_code_field(ResultCodeField::Third);
//!
//! let outcome = parser
//!     .parse("H|\\^&\rO|1|778||^^^WBC\rR|1|^^^WBC|5.6\rL|1|N", Protocol::Astm)
//!     .unwrap();
//!
//! assert_eq!(outcome.grammar, Grammar::Astm);
//! assert_eq!(outcome.results[0].parameter_code, "WBC_LIS");
//! assert_eq!(outcome.results[0].result, "5.6");
//! ```

use crate::{
    detect::{records, strip_controls, strip_frame_prefix},
    mapper::ParamMap,
};
use labgate_core::{
    Error, NormalizedResult, Protocol, Result, ResultCodeField,
    constants::{FIELD_DELIMITER, HL7_BODY_SEGMENTS, HL7_HEADER},
};
use std::fmt;

/// Grammar actually applied to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grammar {
    Astm,
    Hl7,
    PlainText,
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Grammar::Astm => write!(f, "ASTM"),
            Grammar::Hl7 => write!(f, "HL7"),
            Grammar::PlainText => write!(f, "PLAIN"),
        }
    }
}

/// An analyte whose instrument code has no mapping for this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCode {
    pub code: String,
    pub sample_id: String,
}

impl From<SkippedCode> for Error {
    fn from(skipped: SkippedCode) -> Self {
        Error::UnmappedCode {
            code: skipped.code,
            sample_id: skipped.sample_id,
        }
    }
}

/// Everything extracted from one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    pub grammar: Grammar,
    pub sample_id: Option<String>,
    pub results: Vec<NormalizedResult>,
    pub skipped: Vec<SkippedCode>,
}

impl ParseOutcome {
    fn new(grammar: Grammar) -> Self {
        Self {
            grammar,
            sample_id: None,
            results: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Returns `true` if nothing was extracted at all.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.skipped.is_empty()
    }
}

/// Per-session result extractor.
#[derive(Debug, Clone)]
pub struct MessageParser {
    machine_id: String,
    params: ParamMap,
    result_code_field: ResultCodeField,
    protocol_hint: Option<Protocol>,
}

impl MessageParser {
    pub fn new(machine_id: impl Into<String>, params: ParamMap) -> Self {
        Self {
            machine_id: machine_id.into(),
            params,
            result_code_field: ResultCodeField::default(),
            protocol_hint: None,
        }
    }

    /// Field of an `R` record that carries the analyte code.
    pub fn result_code_field(mut self, field: ResultCodeField) -> Self {
        self.result_code_field = field;
        self
    }

    /// Grammar to use when detection is inconclusive.
    pub fn protocol_hint(mut self, hint: Option<Protocol>) -> Self {
        self.protocol_hint = hint;
        self
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn params(&self) -> &ParamMap {
        &self.params
    }

    /// Pick the grammar for a message given its detected protocol.
    pub fn select_grammar(&self, text: &str, detected: Protocol) -> Grammar {
        let protocol = match detected {
            Protocol::Unknown => self.protocol_hint.unwrap_or(Protocol::Unknown),
            known => known,
        };

        match protocol {
            Protocol::Astm => Grammar::Astm,
            Protocol::Hl7 => Grammar::Hl7,
            Protocol::Unknown if has_hl7_body(text) => Grammar::Hl7,
            Protocol::Unknown => Grammar::PlainText,
        }
    }

    /// Extract results from one complete message.
    ///
    /// # Errors
    /// Returns `Error::UnknownProtocol` when the message falls through to
    /// plain text and no sample id can be found in it.
    pub fn parse(&self, text: &str, detected: Protocol) -> Result<ParseOutcome> {
        match self.select_grammar(text, detected) {
            Grammar::Astm => self.parse_astm(text),
            Grammar::Hl7 => self.parse_hl7(text),
            Grammar::PlainText => self.parse_plain(text),
        }
    }

    fn parse_astm(&self, text: &str) -> Result<ParseOutcome> {
        let cleaned = strip_controls(text);
        let segments: Vec<&str> = records(&cleaned)
            .map(|record| strip_frame_prefix(record.trim()))
            .filter(|record| record.len() > 1 && record.as_bytes()[1] == FIELD_DELIMITER as u8)
            .collect();

        if segments.is_empty() {
            return self.parse_plain(text);
        }

        let mut outcome = ParseOutcome::new(Grammar::Astm);
        let code_index = self.result_code_field.index();

        for segment in segments {
            let fields: Vec<&str> = segment.split(FIELD_DELIMITER).collect();
            match fields[0] {
                "O" if fields.len() > 2 => {
                    let sample = fields[2].trim();
                    if !sample.is_empty() {
                        outcome.sample_id = Some(sample.to_string());
                    }
                }
                "R" if fields.len() >= 4 => {
                    let Some(sample) = outcome.sample_id.clone() else {
                        continue;
                    };
                    let code = fields[code_index].trim();
                    let value = fields[3].trim();
                    if code.is_empty() || value.is_empty() {
                        continue;
                    }
                    self.emit(&mut outcome, &sample, code, value);
                }
                _ => {}
            }
        }

        Ok(outcome)
    }

    fn parse_hl7(&self, text: &str) -> Result<ParseOutcome> {
        let cleaned = strip_controls(text);
        let segments: Vec<&str> = records(&cleaned)
            .map(|segment| segment.trim_matches(|c: char| c == '\x0b' || c.is_whitespace()))
            .collect();

        let is_hl7 = |segment: &&str| {
            segment.starts_with(HL7_HEADER) || HL7_BODY_SEGMENTS.iter().any(|p| segment.starts_with(p))
        };
        if !segments.iter().any(is_hl7) {
            return self.parse_plain(text);
        }

        let mut outcome = ParseOutcome::new(Grammar::Hl7);
        let mut pairs: Vec<(&str, &str)> = Vec::new();

        for segment in &segments {
            let fields: Vec<&str> = segment.split(FIELD_DELIMITER).collect();
            match fields[0] {
                "PID" if fields.len() > 3 && !fields[3].trim().is_empty() => {
                    outcome.sample_id = Some(fields[3].trim().to_string());
                }
                "OBR" if fields.len() > 2 && outcome.sample_id.is_none() => {
                    let sample = fields[2].trim();
                    if !sample.is_empty() {
                        outcome.sample_id = Some(sample.to_string());
                    }
                }
                "OBX" if fields.len() >= 6 => {
                    pairs.push((fields[3].trim(), fields[5].trim()));
                }
                _ => {}
            }
        }

        if let Some(sample) = outcome.sample_id.clone() {
            for (code, value) in pairs {
                if !code.is_empty() && !value.is_empty() {
                    self.emit(&mut outcome, &sample, code, value);
                }
            }
        }

        Ok(outcome)
    }

    fn parse_plain(&self, text: &str) -> Result<ParseOutcome> {
        let cleaned = strip_controls(text);
        let mut outcome = ParseOutcome::new(Grammar::PlainText);
        let mut pairs: Vec<(String, String)> = Vec::new();

        for line in records(&cleaned).map(str::trim) {
            let upper = line.to_uppercase();
            if upper.starts_with("DATE") || upper.starts_with("NO.") {
                continue;
            }

            if upper.starts_with("SAMPLEID") || upper.starts_with("ID:") {
                let rest = match line.split_once(':') {
                    Some((_, rest)) => rest,
                    None => line.get("SAMPLEID".len()..).unwrap_or_default(),
                };
                if let Some(sample) = rest
                    .split_whitespace()
                    .next()
                    .map(|token| token.trim_matches('-'))
                    .filter(|token| !token.is_empty())
                {
                    outcome.sample_id = Some(sample.to_string());
                }
                continue;
            }

            let mut tokens = line.split_whitespace();
            let (Some(code), Some(first)) = (tokens.next(), tokens.next()) else {
                continue;
            };
            let code = code.trim_end_matches(':');
            let value = std::iter::once(first).chain(tokens).collect::<Vec<_>>().join(" ");
            pairs.push((code.to_string(), value));
        }

        let Some(sample) = outcome.sample_id.clone() else {
            return Err(Error::UnknownProtocol(
                "no structured header and no sample id".to_string(),
            ));
        };

        for (code, value) in &pairs {
            self.emit(&mut outcome, &sample, code, value);
        }

        Ok(outcome)
    }

    fn emit(&self, outcome: &mut ParseOutcome, sample: &str, code: &str, value: &str) {
        match self.params.map(code) {
            Some(mapped) => outcome.results.push(NormalizedResult::new(
                self.machine_id.as_str(),
                sample,
                mapped,
                value,
            )),
            None => outcome.skipped.push(SkippedCode {
                code: code.to_string(),
                sample_id: sample.to_string(),
            }),
        }
    }
}

fn has_hl7_body(text: &str) -> bool {
    records(text).any(|record| {
        let record = record.trim_matches(|c: char| c == '\x0b' || c.is_whitespace());
        HL7_BODY_SEGMENTS.iter().any(|prefix| record.starts_with(prefix))
    })
}
