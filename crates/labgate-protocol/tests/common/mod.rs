//! Shared helpers for protocol integration tests.
//!
//! Builders produce wire bytes the way instruments send them; the
//! assertion helpers compare extracted results by content only, since
//! `updated_at` differs on every run.

#![allow(dead_code)]

use labgate_core::{NormalizedResult, Protocol};
use labgate_protocol::{
    FrameAssembler, MessageParser, OutboundFrame, ParamMap, ParamPair, ParseOutcome, StreamEvent,
    TransportMode, detect_protocol,
};

pub const MACHINE_ID: &str = "M1";

/// The mapping used by most scenarios: `wbc` → `WBC_LIS`.
pub fn wbc_map() -> ParamMap {
    ParamMap::from_pairs(&[ParamPair::new("WBC", "WBC_LIS")])
}

pub fn parser() -> MessageParser {
    MessageParser::new(MACHINE_ID, wbc_map())
}

/// ENQ, one frame per record, EOT.
pub fn framed_transmission(records: &[&str]) -> Vec<u8> {
    let mut wire = vec![0x05];
    for (i, record) in records.iter().enumerate() {
        let frame = OutboundFrame::new(((i + 1) % 8) as u8, &format!("{record}\r"));
        wire.extend_from_slice(frame.as_bytes());
    }
    wire.push(0x04);
    wire
}

/// VT, segments joined by CR, FS CR.
pub fn block(segments: &[&str]) -> Vec<u8> {
    let mut wire = vec![0x0b];
    wire.extend_from_slice(segments.join("\r").as_bytes());
    wire.extend_from_slice(b"\r\x1c\r");
    wire
}

/// Assemble `wire`, then detect and parse every complete message.
pub fn run_pipeline(parser: &MessageParser, mode: TransportMode, wire: &[u8]) -> Vec<ParseOutcome> {
    let mut assembler = FrameAssembler::new(mode);
    assembler.feed(wire);

    let mut messages: Vec<String> = assembler
        .drain_events()
        .filter_map(|event| match event {
            StreamEvent::Message(msg) => Some(msg.text),
            _ => None,
        })
        .collect();
    if let Some(rest) = assembler.finish() {
        messages.push(rest.text);
    }

    messages
        .iter()
        .filter_map(|text| {
            let protocol: Protocol = detect_protocol(text.as_bytes());
            parser.parse(text, protocol).ok()
        })
        .collect()
}

/// `(sample, code, value)` triples of a set of results.
pub fn triples(results: &[NormalizedResult]) -> Vec<(String, String, String)> {
    results
        .iter()
        .map(|r| (r.sample_id.clone(), r.parameter_code.clone(), r.result.clone()))
        .collect()
}

pub fn assert_single_wbc(outcome: &ParseOutcome) {
    assert_eq!(
        triples(&outcome.results),
        vec![("778".to_string(), "WBC_LIS".to_string(), "5.6".to_string())]
    );
    assert_eq!(outcome.results[0].machine_id, MACHINE_ID);
    assert_eq!(outcome.results[0].status, "Y");
}
