//! Wire-level constants shared by the gateway crates.
//!
//! Laboratory analyzers talk to the gateway with two framing styles:
//!
//! ```text
//! Segment-framed (ASTM-style), one frame per record:
//!   <ENQ>
//!   <STX> 1H|\^&|||...<CR> <ETX> 3F <CR><LF>
//!   <STX> 2P|1<CR>         <ETX> A1 <CR><LF>
//!   <EOT>
//!
//! Line-delimited (HL7-style), one block per message:
//!   <VT> MSH|^~\&|...<CR> PID|||778<CR> OBX|1|NM|WBC||5.6<CR> <FS><CR>
//! ```
//!
//! Instruments that do not speak either protocol dump plain text, which the
//! gateway accepts as a fallback.
//!
//! # Control bytes
//!
//! | Constant | Value | Meaning |
//! |----------|-------|---------|
//! | [`STX`] | `0x02` | start of frame |
//! | [`ETX`] | `0x03` | end of frame |
//! | [`EOT`] | `0x04` | end of transmission |
//! | [`ENQ`] | `0x05` | enquiry (sender wants the line) |
//! | [`ACK`] | `0x06` | positive acknowledgment |
//! | [`VT`]  | `0x0B` | start of block |
//! | [`NAK`] | `0x15` | negative acknowledgment |
//! | [`ETB`] | `0x17` | end of intermediate frame |
//! | [`FS`]  | `0x1C` | end of block |
//!
//! These values are fixed by the instruments. Changing them breaks
//! interoperability.

// ============================================================================
// Control Bytes
// ============================================================================

/// Start of frame.
pub const STX: u8 = 0x02;

/// End of frame.
pub const ETX: u8 = 0x03;

/// End of transmission. Closes a segment-framed message.
pub const EOT: u8 = 0x04;

/// Enquiry. The instrument asks for the line before sending frames.
pub const ENQ: u8 = 0x05;

/// Positive acknowledgment, sent after every ENQ and every accepted frame.
pub const ACK: u8 = 0x06;

/// Start of block in the line-delimited envelope.
pub const VT: u8 = 0x0B;

/// Carriage return. Record separator for both protocols.
pub const CR: u8 = 0x0D;

/// Line feed.
pub const LF: u8 = 0x0A;

/// Negative acknowledgment, sent for a frame with a bad checksum when
/// strict checksum verification is enabled.
pub const NAK: u8 = 0x15;

/// End of an intermediate frame; the record continues in the next frame.
pub const ETB: u8 = 0x17;

/// End of block. Terminates one line-delimited message envelope.
pub const FS: u8 = 0x1C;

/// Bytes stripped from text before protocol detection.
pub const STRIPPED_CONTROLS: [char; 5] = ['\x02', '\x03', '\x04', '\x05', '\x1c'];

// ============================================================================
// Delimiters
// ============================================================================

/// Field delimiter for both protocols.
pub const FIELD_DELIMITER: char = '|';

/// Component delimiter inside composite fields (`^^^WBC^^conc`).
pub const COMPONENT_DELIMITER: char = '^';

/// Separator between repeated tests in an outbound order record.
pub const TEST_SEPARATOR: char = '\\';

/// Separator used when joining frames or records of one message.
pub const SEGMENT_SEPARATOR: char = '\r';

// ============================================================================
// Protocol Tokens
// ============================================================================

/// Header segment of the line-delimited protocol.
pub const HL7_HEADER: &str = "MSH|";

/// Record type prefixes of the segment-framed protocol.
pub const ASTM_RECORD_PREFIXES: [&str; 7] = ["H|", "P|", "O|", "R|", "L|", "C|", "M|"];

/// Segments whose presence marks a line-delimited message without header.
pub const HL7_BODY_SEGMENTS: [&str; 3] = ["PID|", "OBR|", "OBX|"];

/// Control id placeholder when the inbound header carries none.
pub const UNKNOWN_CONTROL_ID: &str = "UNKNOWN";

/// Timestamp layout used in outbound messages.
pub const WIRE_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

// ============================================================================
// Limits and Timeouts
// ============================================================================

/// Maximum payload characters per outbound frame.
pub const MAX_FRAME_PAYLOAD: usize = 240;

/// Number of checksum characters trailing every inbound frame.
pub const CHECKSUM_LENGTH: u8 = 2;

/// Upper bound for buffered, not yet terminated input (64 KB).
pub const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Socket read timeout in milliseconds.
///
/// Also bounds how long a finished transmission without EOT waits before
/// the collected frames are processed.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 3000;

/// How long `stop()` waits for a session task to unwind, in milliseconds.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 2000;

/// Default bind address for TCP devices without one.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Keys of the instrument code table shorter than this (inclusive) look
/// like instrument codes to the direction heuristic.
pub const INSTRUMENT_CODE_MAX_LEN: usize = 5;

/// Status flag stored with every verified result.
pub const DEFAULT_RESULT_STATUS: &str = "Y";
