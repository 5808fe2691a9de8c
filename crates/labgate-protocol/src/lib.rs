pub mod codec;
pub mod detect;
pub mod frame;
pub mod mapper;
pub mod parser;
pub mod query;
pub mod responder;
pub mod stream_parser;

pub use codec::LabCodec;
pub use detect::detect_protocol;
pub use frame::{OutboundFrame, checksum, split_into_frames};
pub use mapper::{Orientation, ParamMap, ParamPair, normalize_code};
pub use parser::{Grammar, MessageParser, ParseOutcome, SkippedCode};
pub use query::{TestCodeTable, extract_query_sample_id};
pub use responder::{AckResponder, QueryResponder, Reply};
pub use stream_parser::{
    AssembledMessage, AssemblerState, DrainEvents, FrameAssembler, Framing, StreamEvent,
    TransportMode,
};
