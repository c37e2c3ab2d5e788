//! Notable-event emission alongside the structured log.
//!
//! Components write human-readable progress messages through
//! [`EventLog::write`]; each message lands in the tracing log and, when a
//! sink is attached, is forwarded as an info or error event. Severity is
//! inferred from the message text: anything mentioning "error" or
//! "exception" is escalated.

use std::sync::Arc;

use tracing::{error, info};

/// Receiver for notable events (e.g. a remote monitoring endpoint).
pub trait EventSink: Send + Sync {
    fn info_event(&self, source: &str, message: &str);
    fn error_event(&self, source: &str, message: &str);
}

/// Log writer with optional event forwarding.
#[derive(Clone, Default)]
pub struct EventLog {
    sink: Option<Arc<dyn EventSink>>,
}

impl EventLog {
    /// Log-only writer, no event forwarding.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Writer that forwards every message to `sink`.
    pub fn with_sink(sink: Arc<dyn EventSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// Write a message to the log and forward it to the sink.
    pub fn write(&self, source: &str, message: &str) {
        if message.is_empty() {
            return;
        }

        if is_error_text(message) {
            error!("{message}");
            if let Some(sink) = &self.sink {
                sink.error_event(source, message);
            }
        } else {
            info!("{message}");
            if let Some(sink) = &self.sink {
                sink.info_event(source, message);
            }
        }
    }
}

fn is_error_text(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("error") || lower.contains("exception")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        infos: Mutex<Vec<String>>,
        errors: Mutex<Vec<String>>,
    }

    impl EventSink for RecordingSink {
        fn info_event(&self, _source: &str, message: &str) {
            self.infos.lock().unwrap().push(message.to_string());
        }

        fn error_event(&self, _source: &str, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn test_severity_inference() {
        let sink = Arc::new(RecordingSink::default());
        let log = EventLog::with_sink(sink.clone());

        log.write("worker", "sync complete");
        log.write("worker", "build Error: exit 1");
        log.write("worker", "unhandled EXCEPTION in pass");

        assert_eq!(sink.infos.lock().unwrap().len(), 1);
        assert_eq!(sink.errors.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_empty_message_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let log = EventLog::with_sink(sink.clone());
        log.write("worker", "");
        assert!(sink.infos.lock().unwrap().is_empty());
        assert!(sink.errors.lock().unwrap().is_empty());
    }
}
