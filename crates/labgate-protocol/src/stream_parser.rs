//! Message assembly from instrument byte streams.
//!
//! Instruments deliver messages in several shapes, sometimes on the same
//! port:
//!
//! - **Frames**: `ENQ`, then one or more `STX <seq> text ETX|ETB <cc> CR LF`
//!   frames each acknowledged by the host, then `EOT`.
//! - **Blocks**: `VT text FS CR`, the line-delimited block framing.
//! - **Terminated text**: text outside frames ended by `ETX` or `EOT`
//!   (serial ports only for `ETX`).
//! - **Unframed text**: anything else, delivered when the line goes quiet
//!   or the connection closes.
//!
//! The [`FrameAssembler`] consumes bytes one at a time and queues
//! [`StreamEvent`]s. It never writes to the transport itself; the session
//! turns events into replies.
//!
//! # State machine
//!
//! ```text
//!            STX                 ETX / ETB               2 bytes
//! ┌──────┐ ───────> ┌─────────┐ ─────────> ┌──────────────────────┐ ──┐
//! │ Idle │          │ InFrame │            │ AwaitingChecksum(n)  │   │
//! └──────┘ <─────── └─────────┘            └──────────────────────┘   │
//!    ^  EOT / ENQ / overflow                                          │
//!    └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use labgate_protocol::{FrameAssembler, Framing, StreamEvent, TransportMode};
//!
//! let mut assembler = FrameAssembler::new(TransportMode::Socket);
//!
//! assembler.feed(&[0x05]);
//! assembler.feed(b"\x021H|\\^&\r\x03");
//! assembler.feed(b"00\r\n\x04");
//!
//! let events: Vec<StreamEvent> = assembler.drain_events().collect();
//! assert_eq!(events[0], StreamEvent::Enquiry);
//! assert!(matches!(events[1], StreamEvent::FrameAccepted { .. }));
//! match &events[2] {
//!     StreamEvent::Message(msg) => {
//!         assert_eq!(msg.framing, Framing::Frames);
//!         assert_eq!(msg.text, "1H|\\^&");
//!     }
//!     other => panic!("unexpected event {other:?}"),
//! }
//! ```

use labgate_core::{
    ChecksumPolicy,
    constants::{CHECKSUM_LENGTH, CR, ENQ, EOT, ETB, ETX, FS, LF, MAX_BUFFER_SIZE, STX, VT},
};
use std::collections::VecDeque;

use crate::frame::checksum;

/// Initial capacity for one frame body.
const INITIAL_FRAME_CAPACITY: usize = 256;

/// Initial capacity for unframed text.
const INITIAL_RAW_CAPACITY: usize = 1024;

/// Initial capacity for the event queue.
const INITIAL_EVENT_QUEUE_CAPACITY: usize = 4;

/// Kind of transport the bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Connection-oriented; a closed connection ends any pending text.
    #[default]
    Socket,
    /// Not connection-oriented; ETX outside a frame terminates text.
    Serial,
}

/// Assembler states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// Outside any frame.
    Idle,
    /// Between STX and ETX/ETB.
    InFrame,
    /// Consuming the trailing checksum characters.
    AwaitingChecksum(u8),
}

/// How a message was delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Checksummed frames closed by EOT.
    Frames,
    /// Block closed by FS.
    Block,
    /// Text outside frames closed by ETX or EOT.
    Terminated,
    /// Text delivered on silence or end of stream.
    Unframed,
}

/// A complete inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    pub text: String,
    pub framing: Framing,
}

impl AssembledMessage {
    pub fn new(text: String, framing: Framing) -> Self {
        Self { text, framing }
    }
}

/// Something the session must react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// ENQ received; answer with ACK.
    Enquiry,
    /// Frame stored; answer with ACK.
    FrameAccepted { checksum_ok: bool },
    /// Frame dropped on checksum mismatch; answer with NAK.
    FrameRejected { expected: [u8; 2], received: [u8; 2] },
    /// A complete message.
    Message(AssembledMessage),
    /// Buffered bytes thrown away.
    Discarded { reason: &'static str, bytes: usize },
}

/// Byte-level message assembler for one transport.
#[derive(Debug)]
pub struct FrameAssembler {
    mode: TransportMode,
    policy: ChecksumPolicy,
    max_buffer: usize,
    state: AssemblerState,

    /// Current frame text, CR/LF collapsed to record breaks.
    frame: Vec<u8>,
    /// Running sum of every byte after STX, terminator included.
    frame_sum: u8,
    pending_break: bool,
    received_checksum: [u8; 2],
    /// The current frame ended with ETB.
    continued_next: bool,
    /// The previous frame ended with ETB.
    continued: bool,

    /// Frame texts of the current transmission.
    frames: Vec<String>,
    frames_len: usize,

    /// Bytes outside frames.
    raw: Vec<u8>,

    events: VecDeque<StreamEvent>,
}

impl FrameAssembler {
    /// Create an assembler with the permissive checksum policy.
    pub fn new(mode: TransportMode) -> Self {
        Self {
            mode,
            policy: ChecksumPolicy::Permissive,
            max_buffer: MAX_BUFFER_SIZE,
            state: AssemblerState::Idle,
            frame: Vec::with_capacity(INITIAL_FRAME_CAPACITY),
            frame_sum: 0,
            pending_break: false,
            received_checksum: [0; 2],
            continued_next: false,
            continued: false,
            frames: Vec::new(),
            frames_len: 0,
            raw: Vec::with_capacity(INITIAL_RAW_CAPACITY),
            events: VecDeque::with_capacity(INITIAL_EVENT_QUEUE_CAPACITY),
        }
    }

    pub fn with_policy(mut self, policy: ChecksumPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Limit for any single buffer; exceeding it discards that buffer.
    pub fn with_max_buffer(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer.max(1);
        self
    }

    /// Feed bytes from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.push_byte(byte);
        }
    }

    /// Next queued event, if any.
    pub fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.pop_front()
    }

    /// Drain all queued events.
    pub fn drain_events(&mut self) -> DrainEvents<'_> {
        DrainEvents { assembler: self }
    }

    pub fn events_available(&self) -> usize {
        self.events.len()
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Returns `true` if bytes of an incomplete message are buffered.
    pub fn has_pending(&self) -> bool {
        self.state != AssemblerState::Idle || !self.frames.is_empty() || !self.raw.is_empty()
    }

    /// Deliver whatever is complete when the line goes quiet.
    ///
    /// Stored frames of a transmission that never saw EOT are delivered as
    /// [`Framing::Frames`]; otherwise buffered text as [`Framing::Unframed`].
    /// Nothing is delivered while a frame is still open.
    pub fn take_pending(&mut self) -> Option<AssembledMessage> {
        if self.state != AssemblerState::Idle {
            return None;
        }
        if !self.frames.is_empty() {
            return Some(self.take_frames());
        }
        self.take_raw(Framing::Unframed)
    }

    /// Deliver everything at end of stream, dropping an open frame.
    pub fn finish(&mut self) -> Option<AssembledMessage> {
        if self.state != AssemblerState::Idle {
            let bytes = self.frame.len();
            self.reset_frame();
            self.events.push_back(StreamEvent::Discarded {
                reason: "unterminated frame at end of stream",
                bytes,
            });
        }
        self.take_pending()
    }

    /// Drop all buffered bytes and queued events.
    pub fn clear(&mut self) {
        self.reset_frame();
        self.frames.clear();
        self.frames_len = 0;
        self.continued_next = false;
        self.continued = false;
        self.raw.clear();
        self.events.clear();
    }

    fn push_byte(&mut self, byte: u8) {
        if let AssemblerState::AwaitingChecksum(remaining) = self.state {
            let idx = usize::from(CHECKSUM_LENGTH - remaining);
            self.received_checksum[idx] = byte;
            if remaining > 1 {
                self.state = AssemblerState::AwaitingChecksum(remaining - 1);
            } else {
                self.complete_frame();
            }
            return;
        }

        match byte {
            ENQ => {
                self.abort_frame();
                if !self.frames.is_empty() {
                    let message = self.take_frames();
                    self.events.push_back(StreamEvent::Message(message));
                }
                self.events.push_back(StreamEvent::Enquiry);
            }
            EOT => {
                self.abort_frame();
                let message = if self.frames.is_empty() {
                    self.take_raw(Framing::Terminated)
                } else {
                    Some(self.take_frames())
                };
                if let Some(message) = message {
                    self.events.push_back(StreamEvent::Message(message));
                }
            }
            STX => {
                self.abort_frame();
                if !self.raw.is_empty() {
                    let bytes = self.raw.len();
                    self.raw.clear();
                    self.events.push_back(StreamEvent::Discarded {
                        reason: "unframed bytes before STX",
                        bytes,
                    });
                }
                self.state = AssemblerState::InFrame;
            }
            _ if self.state == AssemblerState::InFrame => self.push_frame_byte(byte),
            FS => {
                if let Some(message) = self.take_raw(Framing::Block) {
                    self.events.push_back(StreamEvent::Message(message));
                }
            }
            ETX if self.mode == TransportMode::Serial => {
                if let Some(message) = self.take_raw(Framing::Terminated) {
                    self.events.push_back(StreamEvent::Message(message));
                }
            }
            ETX | ETB => {}
            CR | LF if self.raw.is_empty() => {}
            _ => {
                if self.raw.len() >= self.max_buffer {
                    let bytes = self.raw.len();
                    self.raw.clear();
                    self.events.push_back(StreamEvent::Discarded {
                        reason: "unframed text exceeds buffer limit",
                        bytes,
                    });
                }
                self.raw.push(byte);
            }
        }
    }

    fn push_frame_byte(&mut self, byte: u8) {
        self.frame_sum = self.frame_sum.wrapping_add(byte);
        match byte {
            ETX | ETB => {
                self.continued_next = byte == ETB;
                self.state = AssemblerState::AwaitingChecksum(CHECKSUM_LENGTH);
            }
            CR | LF => self.pending_break = true,
            _ => {
                if self.pending_break {
                    if !self.frame.is_empty() {
                        self.frame.push(CR);
                    }
                    self.pending_break = false;
                }
                if self.frame.len() >= self.max_buffer {
                    let bytes = self.frame.len();
                    self.reset_frame();
                    self.events.push_back(StreamEvent::Discarded {
                        reason: "frame exceeds buffer limit",
                        bytes,
                    });
                    return;
                }
                self.frame.push(byte);
            }
        }
    }

    fn complete_frame(&mut self) {
        let expected = checksum(&[self.frame_sum]);
        let received = self.received_checksum.map(|b| b.to_ascii_uppercase());
        let checksum_ok = expected == received;

        if !checksum_ok && self.policy == ChecksumPolicy::Strict {
            self.reset_frame();
            self.continued_next = false;
            self.events
                .push_back(StreamEvent::FrameRejected { expected, received });
            return;
        }

        let text = String::from_utf8_lossy(&self.frame).into_owned();
        self.store_frame(text);
        self.continued = self.continued_next;
        self.reset_frame();
        self.events
            .push_back(StreamEvent::FrameAccepted { checksum_ok });
    }

    fn store_frame(&mut self, text: String) {
        if self.frames_len + text.len() > self.max_buffer {
            let bytes = self.frames_len;
            self.frames.clear();
            self.frames_len = 0;
            self.events.push_back(StreamEvent::Discarded {
                reason: "transmission exceeds buffer limit",
                bytes,
            });
        }
        self.frames_len += text.len();

        match self.frames.last_mut() {
            Some(last) if self.continued => {
                // the continuation frame repeats only its own sequence digit
                let body = text
                    .strip_prefix(|c: char| c.is_ascii_digit())
                    .unwrap_or(&text);
                last.push_str(body);
            }
            _ => self.frames.push(text),
        }
    }

    fn take_frames(&mut self) -> AssembledMessage {
        let text = self.frames.join("\r");
        self.frames.clear();
        self.frames_len = 0;
        self.continued = false;
        AssembledMessage::new(text, Framing::Frames)
    }

    fn take_raw(&mut self, framing: Framing) -> Option<AssembledMessage> {
        if self.raw.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.raw)
            .trim_matches(|c: char| c == VT as char || c.is_whitespace())
            .to_string();
        self.raw.clear();
        (!text.is_empty()).then(|| AssembledMessage::new(text, framing))
    }

    /// Drop a frame that was interrupted by a control byte.
    fn abort_frame(&mut self) {
        if self.state == AssemblerState::Idle {
            return;
        }
        let bytes = self.frame.len();
        self.reset_frame();
        self.events.push_back(StreamEvent::Discarded {
            reason: "frame interrupted by control byte",
            bytes,
        });
    }

    fn reset_frame(&mut self) {
        self.frame.clear();
        self.frame_sum = 0;
        self.pending_break = false;
        self.received_checksum = [0; 2];
        self.state = AssemblerState::Idle;
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(TransportMode::default())
    }
}

/// Iterator returned by [`FrameAssembler::drain_events`].
pub struct DrainEvents<'a> {
    assembler: &'a mut FrameAssembler,
}

impl Iterator for DrainEvents<'_> {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.assembler.next_event()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.assembler.events_available();
        (n, Some(n))
    }
}

impl ExactSizeIterator for DrainEvents<'_> {}
