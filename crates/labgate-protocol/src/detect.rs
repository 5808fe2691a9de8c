//! Protocol detection for complete inbound messages.
//!
//! Classification looks only at leading tokens:
//!
//! 1. Control bytes (STX, ETX, EOT, ENQ, FS) are removed.
//! 2. If the cleaned text starts with `MSH|`, the message is line-delimited (HL7).
//! 3. Otherwise, if any line, after dropping a leading frame sequence number,
//!    starts with a record prefix (`H|`, `P|`, `O|`, `R|`, `L|`, `C|`, `M|`),
//!    the message is segment-framed (ASTM).
//! 4. Anything else is [`Protocol::Unknown`].
//!
//! # Examples
//!
//! ```
//! use labgate_core::Protocol;
//! use labgate_protocol::detect_protocol;
//!
//! assert_eq!(detect_protocol(b"\x0bMSH|^~\\&|LAB\r"), Protocol::Hl7);
//! assert_eq!(detect_protocol(b"\x021H|\\^&|||\r\x03"), Protocol::Astm);
//! assert_eq!(detect_protocol(b"the quick brown fox"), Protocol::Unknown);
//! ```

use labgate_core::{
    Protocol,
    constants::{ASTM_RECORD_PREFIXES, HL7_HEADER, STRIPPED_CONTROLS},
};

/// Classify a raw message buffer.
///
/// Never fails: undecodable bytes are replaced and malformed input
/// classifies as [`Protocol::Unknown`].
pub fn detect_protocol(msg: &[u8]) -> Protocol {
    let text = String::from_utf8_lossy(msg);
    detect_text(&text)
}

/// Classify already decoded text.
pub fn detect_text(text: &str) -> Protocol {
    let cleaned = strip_controls(text);
    let cleaned = cleaned.trim_start_matches('\x0b').trim();

    if cleaned.starts_with(HL7_HEADER) {
        return Protocol::Hl7;
    }

    if records(cleaned).any(is_astm_record) {
        return Protocol::Astm;
    }

    Protocol::Unknown
}

/// Returns `true` if the line (frame number allowed) is a segment-framed record.
pub(crate) fn is_astm_record(line: &str) -> bool {
    let line = strip_frame_prefix(line.trim());
    ASTM_RECORD_PREFIXES
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

/// Remove framing control characters from decoded text.
pub fn strip_controls(text: &str) -> String {
    text.chars()
        .filter(|c| !STRIPPED_CONTROLS.contains(c))
        .collect()
}

/// Drop the leading frame sequence digits of a record (`1H|...` → `H|...`).
pub fn strip_frame_prefix(segment: &str) -> &str {
    segment.trim_start_matches(|c: char| c.is_ascii_digit())
}

/// Split decoded text into non-empty records on CR and LF.
pub(crate) fn records(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\r', '\n']).filter(|r| !r.trim().is_empty())
}
