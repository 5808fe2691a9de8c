use labgate_core::constants::{DEFAULT_READ_TIMEOUT_MS, DEFAULT_STOP_TIMEOUT_MS, MAX_BUFFER_SIZE};
use std::time::Duration;

/// Timing and buffering shared by every session of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Quiet period after which buffered text is handed to the parser
    pub read_timeout: Duration,

    /// How long `stop` waits for the session task to unwind
    pub stop_timeout: Duration,

    /// Upper bound for one message in the assembler
    pub max_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
            max_buffer: MAX_BUFFER_SIZE,
        }
    }
}

impl SessionSettings {
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn max_buffer(mut self, max: usize) -> Self {
        self.max_buffer = max;
        self
    }
}
