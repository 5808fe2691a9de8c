//! Operator alerts.
//!
//! Sessions report fatal transport problems through a [`Notifier`]. Calls
//! never block and never fail; delivery (mail, chat, pager) is up to
//! whoever drains a [`ChannelNotifier`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// One alert raised by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub machine_id: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(machine_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

/// Fire-and-forget alert sink.
pub trait Notifier: Send + Sync + 'static {
    fn notify_error(&self, machine_id: &str, message: &str);
}

/// Drops every alert.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify_error(&self, _machine_id: &str, _message: &str) {}
}

/// Writes alerts to the log at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify_error(&self, machine_id: &str, message: &str) {
        error!(machine = machine_id, alert = message, "Device alert");
    }
}

/// Queues alerts on a bounded channel.
///
/// When the queue is full or the receiver is gone the alert is dropped
/// with a warning.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Alert>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify_error(&self, machine_id: &str, message: &str) {
        if let Err(e) = self.tx.try_send(Alert::new(machine_id, message)) {
            warn!(machine = machine_id, error = %e, "Alert dropped");
        }
    }
}
