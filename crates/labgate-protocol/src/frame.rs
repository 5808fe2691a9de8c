//! Outbound segment-framed frames.
//!
//! Wire layout of one frame:
//!
//! ```text
//! ┌─────┬─────┬───────────────┬─────┬──────────┬────┬────┐
//! │ STX │ seq │ payload ≤ 240 │ ETX │ checksum │ CR │ LF │
//! └─────┴─────┴───────────────┴─────┴──────────┴────┴────┘
//! ```
//!
//! `seq` is one ASCII digit, `1` for the first frame of a transmission and
//! incrementing modulo 8. The checksum is the sum of the bytes of
//! `seq`, `payload` and `ETX`, modulo 256, as two uppercase hex digits.

use bytes::{BufMut, Bytes, BytesMut};
use labgate_core::constants::{CR, ETX, LF, MAX_FRAME_PAYLOAD, STX};

/// Two-character uppercase hexadecimal checksum of `data`.
///
/// ```
/// use labgate_protocol::checksum;
///
/// assert_eq!(checksum(&[0x41]), *b"41");
/// assert_eq!(checksum(b""), *b"00");
/// ```
pub fn checksum(data: &[u8]) -> [u8; 2] {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    [HEX[(sum >> 4) as usize], HEX[(sum & 0x0F) as usize]]
}

/// One encoded outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    sequence: u8,
    bytes: Bytes,
}

impl OutboundFrame {
    /// Encode `payload` as frame number `sequence` (taken modulo 8).
    pub fn new(sequence: u8, payload: &str) -> Self {
        let sequence = sequence % 8;
        let seq_digit = b'0' + sequence;

        let mut buf = BytesMut::with_capacity(payload.len() + 7);
        buf.put_u8(STX);
        buf.put_u8(seq_digit);
        buf.put_slice(payload.as_bytes());
        buf.put_u8(ETX);
        let sum = checksum(&buf[1..]);
        buf.put_slice(&sum);
        buf.put_u8(CR);
        buf.put_u8(LF);

        Self {
            sequence,
            bytes: buf.freeze(),
        }
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Payload text between the sequence digit and ETX.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[2..self.bytes.len() - 5]
    }

    /// The checksum characters carried by this frame.
    pub fn checksum(&self) -> [u8; 2] {
        let n = self.bytes.len();
        [self.bytes[n - 4], self.bytes[n - 3]]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Split a message into frames of at most [`MAX_FRAME_PAYLOAD`] characters.
///
/// Chunks never split a UTF-8 character. An empty message yields no frames.
pub fn split_into_frames(text: &str) -> Vec<OutboundFrame> {
    let mut frames = Vec::new();
    let mut rest = text;
    let mut seq: usize = 1;

    while !rest.is_empty() {
        let split = rest
            .char_indices()
            .nth(MAX_FRAME_PAYLOAD)
            .map_or(rest.len(), |(idx, _)| idx);
        let (chunk, tail) = rest.split_at(split);
        frames.push(OutboundFrame::new((seq % 8) as u8, chunk));
        rest = tail;
        seq += 1;
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[0xFF, 0x02]), *b"01");
        assert_eq!(checksum(&[0x0A]), *b"0A");
    }

    #[test]
    fn test_frame_layout() {
        let frame = OutboundFrame::new(1, "H|");
        // '1' + 'H' + '|' + ETX = 0x31 + 0x48 + 0x7C + 0x03 = 0xF8
        assert_eq!(frame.as_bytes(), b"\x021H|\x03F8\r\n");
        assert_eq!(frame.payload(), b"H|");
        assert_eq!(frame.checksum(), *b"F8");
        assert_eq!(frame.sequence(), 1);
    }

    #[test]
    fn test_split_short_message() {
        let frames = split_into_frames("P|1\r");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"P|1\r");
    }

    #[test]
    fn test_split_long_message() {
        let text = "x".repeat(MAX_FRAME_PAYLOAD * 2 + 10);
        let frames = split_into_frames(&text);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].payload().len(), MAX_FRAME_PAYLOAD);
        assert_eq!(frames[1].payload().len(), MAX_FRAME_PAYLOAD);
        assert_eq!(frames[2].payload().len(), 10);
        let seqs: Vec<u8> = frames.iter().map(OutboundFrame::sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_sequence_wraps_after_seven() {
        let text = "y".repeat(MAX_FRAME_PAYLOAD * 9);
        let seqs: Vec<u8> = split_into_frames(&text)
            .iter()
            .map(OutboundFrame::sequence)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6, 7, 0, 1]);
    }

    #[test]
    fn test_empty_message_has_no_frames() {
        assert!(split_into_frames("").is_empty());
    }
}
