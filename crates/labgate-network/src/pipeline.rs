//! Per-message processing: detect, answer queries, parse, persist, reply.

use crate::error::SessionResult;
use chrono::Local;
use labgate_core::{DeviceConfig, Protocol};
use labgate_protocol::{
    AckResponder, AssembledMessage, Framing, Grammar, MessageParser, ParamMap, QueryResponder,
    Reply, TestCodeTable, TransportMode, detect_protocol, extract_query_sample_id,
};
use labgate_storage::LabStore;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to one assembled message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageReport {
    /// Grammar used, `None` for answered queries
    pub grammar: Option<Grammar>,
    pub sample_id: Option<String>,
    /// Results written
    pub persisted: usize,
    /// Results whose write failed
    pub failed: usize,
    /// Analytes without a mapping
    pub skipped: usize,
    /// Sample named by an answered query
    pub query_sample: Option<String>,
    /// Bytes to send back, if any
    pub reply: Option<Reply>,
}

/// Turns assembled messages of one device into stored results and replies.
///
/// Code maps are loaded once when the session starts.
#[derive(Debug)]
pub struct MessagePipeline<S> {
    machine_id: String,
    parser: MessageParser,
    test_codes: TestCodeTable,
    store: Arc<S>,
    mode: TransportMode,
}

impl<S: LabStore> MessagePipeline<S> {
    /// Load the code map of `config` and build the pipeline.
    pub async fn load(config: &DeviceConfig, store: Arc<S>, mode: TransportMode) -> SessionResult<Self> {
        let pairs = store
            .device_param_pairs(&config.machine_id, &config.name)
            .await?;
        let params = ParamMap::from_pairs(&pairs);
        if params.is_empty() {
            warn!("No parameter map configured, results will be skipped");
        } else {
            info!(codes = params.len(), orientation = ?params.orientation(), "Parameter map loaded");
        }

        let test_codes = TestCodeTable::new(&pairs, params.orientation());
        let parser = MessageParser::new(config.machine_id.clone(), params)
            .result_code_field(config.result_code_field)
            .protocol_hint(config.protocol_hint);

        Ok(Self {
            machine_id: config.machine_id.clone(),
            parser,
            test_codes,
            store,
            mode,
        })
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Process one message. Never fails; problems are logged and counted.
    pub async fn process(&self, message: &AssembledMessage) -> MessageReport {
        let text = message.text.as_str();
        debug!("RAW MESSAGE START\n{text}\nRAW MESSAGE END");

        let detected = detect_protocol(text.as_bytes());
        let mut report = MessageReport::default();

        if self.mode == TransportMode::Serial
            && detected == Protocol::Astm
            && let Some(sample_id) = extract_query_sample_id(text)
        {
            report.reply = Some(self.answer_query(&sample_id).await);
            report.query_sample = Some(sample_id);
            return report;
        }

        let mut grammar = self.parser.select_grammar(text, detected);
        match self.parser.parse(text, detected) {
            Ok(outcome) => {
                grammar = outcome.grammar;
                report.sample_id = outcome.sample_id.clone();
                report.skipped = outcome.skipped.len();

                for skipped in &outcome.skipped {
                    let err = labgate_core::Error::from(skipped.clone());
                    warn!(error = %err, "Analyte skipped");
                }

                for result in &outcome.results {
                    match self.store.update_lab_result(result).await {
                        Ok(()) => {
                            report.persisted += 1;
                            info!("Updated DB: {result}");
                        }
                        Err(e) => {
                            report.failed += 1;
                            error!(sample = %result.sample_id, code = %result.parameter_code, error = %e, "Failed to store result");
                        }
                    }
                }

                if outcome.is_empty() {
                    debug!(grammar = ?outcome.grammar, "Message carried no results");
                }
            }
            Err(e) => {
                warn!(error = %e, framing = ?message.framing, "Message dropped");
            }
        }

        report.grammar = Some(grammar);
        report.reply = self.reply_for(message, grammar);
        report
    }

    fn reply_for(&self, message: &AssembledMessage, grammar: Grammar) -> Option<Reply> {
        match (message.framing, grammar) {
            // frames were acknowledged one by one
            (Framing::Frames, _) => None,
            (_, Grammar::Hl7) => Some(Reply::Hl7Ack(AckResponder::hl7_ack(
                &message.text,
                Local::now(),
            ))),
            (Framing::Terminated, _) => Some(Reply::Ack),
            _ => None,
        }
    }

    async fn answer_query(&self, sample_id: &str) -> Reply {
        let pending = match self.store.get_pending_tests(sample_id).await {
            Ok(codes) => codes,
            Err(e) => {
                error!(sample = sample_id, error = %e, "Failed to load pending tests");
                Vec::new()
            }
        };
        let tests = self.test_codes.to_instrument_codes(&pending);
        info!(sample = sample_id, tests = tests.len(), "Answering query");

        QueryResponder::respond(sample_id, &tests, Local::now())
    }
}
