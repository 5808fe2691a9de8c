//! Tokio codec for instrument links.
//!
//! [`LabCodec`] wraps a [`FrameAssembler`] so a TCP stream or serial port can
//! be driven through `tokio_util::codec::Framed`:
//!
//! ```text
//! transport bytes -> Decoder -> StreamEvent
//! Reply           -> Encoder -> transport bytes
//! ```
//!
//! The decoder never fails on content; malformed input surfaces as
//! [`StreamEvent::Discarded`] or as a message the parser later rejects.
//!
//! ```rust,no_run
//! use futures::{SinkExt, StreamExt};
//! use labgate_protocol::{LabCodec, Reply, StreamEvent, TransportMode};
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//!
//! # async fn example() -> labgate_core::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:5100").await?;
//! let mut framed = Framed::new(stream, LabCodec::new(TransportMode::Socket));
//!
//! while let Some(event) = framed.next().await {
//!     if let StreamEvent::Enquiry = event? {
//!         framed.send(Reply::Ack).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use bytes::BytesMut;
use labgate_core::{ChecksumPolicy, Error, Result};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    responder::Reply,
    stream_parser::{AssembledMessage, FrameAssembler, StreamEvent, TransportMode},
};

/// Codec turning transport bytes into [`StreamEvent`]s and [`Reply`]s into bytes.
#[derive(Debug, Default)]
pub struct LabCodec {
    assembler: FrameAssembler,
}

impl LabCodec {
    pub fn new(mode: TransportMode) -> Self {
        Self {
            assembler: FrameAssembler::new(mode),
        }
    }

    /// Build from a configured assembler.
    pub fn from_assembler(assembler: FrameAssembler) -> Self {
        Self { assembler }
    }

    pub fn with_policy(self, policy: ChecksumPolicy) -> Self {
        Self {
            assembler: self.assembler.with_policy(policy),
        }
    }

    /// Deliver buffered text after a quiet period.
    pub fn take_pending(&mut self) -> Option<AssembledMessage> {
        self.assembler.take_pending()
    }

    pub fn assembler(&self) -> &FrameAssembler {
        &self.assembler
    }

    pub fn assembler_mut(&mut self) -> &mut FrameAssembler {
        &mut self.assembler
    }
}

impl Decoder for LabCodec {
    type Item = StreamEvent;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if !src.is_empty() {
            // the assembler keeps its own buffers
            self.assembler.feed(src);
            src.clear();
        }
        Ok(self.assembler.next_event())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        if let Some(message) = self.assembler.finish() {
            return Ok(Some(StreamEvent::Message(message)));
        }
        Ok(self.assembler.next_event())
    }
}

impl Encoder<Reply> for LabCodec {
    type Error = Error;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.encoded_len());
        item.write_to(dst);
        Ok(())
    }
}
