//! Replies sent back to instruments.
//!
//! | Situation                         | Reply                               |
//! |-----------------------------------|-------------------------------------|
//! | ENQ, accepted frame, serial text  | [`Reply::Ack`] (`0x06`)             |
//! | Rejected frame (strict checksum)  | [`Reply::Nak`] (`0x15`)             |
//! | Line-delimited message            | [`Reply::Hl7Ack`] accept message    |
//! | Query for pending tests           | [`Reply::Transmission`] then EOT    |

use crate::{
    detect::{records, strip_controls},
    frame::{OutboundFrame, split_into_frames},
};
use bytes::BufMut;
use chrono::{DateTime, TimeZone};
use labgate_core::constants::{
    ACK, EOT, FIELD_DELIMITER, FS, HL7_HEADER, NAK, SEGMENT_SEPARATOR, TEST_SEPARATOR,
    UNKNOWN_CONTROL_ID, WIRE_TIMESTAMP_FORMAT,
};
use std::fmt::Display;

/// Zero-based field index of the message control id in a header segment.
const CONTROL_ID_FIELD: usize = 9;

/// Something to write back on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Nak,
    /// Complete accept message, block terminator included.
    Hl7Ack(String),
    /// Frames of an outbound message; EOT is written after the last one.
    Transmission(Vec<OutboundFrame>),
}

impl Reply {
    /// Total number of bytes this reply puts on the wire.
    pub fn encoded_len(&self) -> usize {
        match self {
            Reply::Ack | Reply::Nak => 1,
            Reply::Hl7Ack(text) => text.len(),
            Reply::Transmission(frames) => {
                frames.iter().map(|f| f.as_bytes().len()).sum::<usize>() + 1
            }
        }
    }

    /// Append the wire bytes of this reply to `dst`.
    pub fn write_to<B: BufMut>(&self, dst: &mut B) {
        match self {
            Reply::Ack => dst.put_u8(ACK),
            Reply::Nak => dst.put_u8(NAK),
            Reply::Hl7Ack(text) => dst.put_slice(text.as_bytes()),
            Reply::Transmission(frames) => {
                for frame in frames {
                    dst.put_slice(frame.as_bytes());
                }
                dst.put_u8(EOT);
            }
        }
    }
}

/// Acknowledgments for received messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct AckResponder;

impl AckResponder {
    /// Control id of a line-delimited message, or `UNKNOWN`.
    pub fn control_id(message: &str) -> String {
        let cleaned = strip_controls(message);
        records(&cleaned)
            .map(|segment| segment.trim_start_matches(['\x0b', ' ', '\t']))
            .find(|segment| segment.starts_with(HL7_HEADER))
            .and_then(|header| header.split(FIELD_DELIMITER).nth(CONTROL_ID_FIELD))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(UNKNOWN_CONTROL_ID)
            .to_string()
    }

    /// Accept message echoing the control id of `original`.
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use labgate_protocol::AckResponder;
    ///
    /// let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    /// let ack = AckResponder::hl7_ack("MSH|^~\\&|DEV|LAB|||20240102||ORU^R01|MSG42|P|2.3", now);
    /// assert!(ack.ends_with("MSA|AA|MSG42\x1c\r"));
    /// assert!(ack.contains("|20240102030405||ACK^R01|MSG42|"));
    /// ```
    pub fn hl7_ack<Tz>(original: &str, now: DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let id = Self::control_id(original);
        let ts = now.format(WIRE_TIMESTAMP_FORMAT);
        format!(
            "MSH|^~\\&|LIS|HOSPITAL|DEVICE|HIS|{ts}||ACK^R01|{id}|P|2.3{SEGMENT_SEPARATOR}MSA|AA|{id}{}{SEGMENT_SEPARATOR}",
            FS as char
        )
    }
}

/// Order messages answering instrument queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryResponder;

impl QueryResponder {
    /// Four-record order message for `sample_id` listing `tests`.
    pub fn order_message<Tz, S>(sample_id: &str, tests: &[S], now: DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
        S: AsRef<str>,
    {
        let ts = now.format(WIRE_TIMESTAMP_FORMAT);
        let test_field = tests
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(&TEST_SEPARATOR.to_string());

        let lines = [
            "H|\\^&|||LIS|||||||P|1".to_string(),
            "P|1".to_string(),
            format!("O|1|{sample_id}||{test_field}|R|{ts}|||||||||O"),
            "L|1|N".to_string(),
        ];

        let mut text = lines.join(&SEGMENT_SEPARATOR.to_string());
        text.push(SEGMENT_SEPARATOR);
        text
    }

    /// Framed reply for a query.
    pub fn respond<Tz, S>(sample_id: &str, tests: &[S], now: DateTime<Tz>) -> Reply
    where
        Tz: TimeZone,
        Tz::Offset: Display,
        S: AsRef<str>,
    {
        Reply::Transmission(split_into_frames(&Self::order_message(
            sample_id, tests, now,
        )))
    }
}
