//! Collecting problems encountered while processing rows.

use std::fmt;
use std::sync::Mutex;
use log::{error, warn};
use serde::{Deserialize, Serialize};


//------------ Severity ------------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        })
    }
}


//------------ ErrorMessage --------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ErrorMessage {
    pub severity: Severity,
    pub message: String,
}

impl ErrorMessage {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        ErrorMessage { severity, message: message.into() }
    }
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}


//------------ ErrorConsumer -------------------------------------------------

/// A sink for problems that must not stop processing.
///
/// Implementations are shared between the producing threads, the writer
/// and readers of a store.
pub trait ErrorConsumer: Send + Sync {
    fn add(&self, severity: Severity, message: String);

    /// Returns the retained messages in the order they were added.
    fn errors(&self) -> Vec<ErrorMessage>;

    fn has_errors(&self) -> bool {
        !self.errors().is_empty()
    }

    fn warn(&self, message: String) {
        self.add(Severity::Warning, message)
    }

    fn error(&self, message: String) {
        self.add(Severity::Error, message)
    }

    fn fatal(&self, message: String) {
        self.add(Severity::Fatal, message)
    }
}


//------------ CollectingErrorConsumer ---------------------------------------

/// An error consumer keeping up to a fixed number of messages.
///
/// Messages beyond the limit are counted but dropped. Every message is
/// also logged.
#[derive(Debug)]
pub struct CollectingErrorConsumer {
    max_messages: usize,
    inner: Mutex<Collected>,
}

#[derive(Debug, Default)]
struct Collected {
    messages: Vec<ErrorMessage>,
    dropped: usize,
}

impl CollectingErrorConsumer {
    pub fn new(max_messages: usize) -> Self {
        CollectingErrorConsumer {
            max_messages,
            inner: Mutex::default(),
        }
    }

    /// Returns the number of messages that were not retained.
    pub fn dropped(&self) -> usize {
        self.inner.lock().expect("poisoned lock").dropped
    }
}

impl Default for CollectingErrorConsumer {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_MAX_ERROR_MESSAGES)
    }
}

impl ErrorConsumer for CollectingErrorConsumer {
    fn add(&self, severity: Severity, message: String) {
        match severity {
            Severity::Fatal => error!("{message}"),
            Severity::Info => log::info!("{message}"),
            _ => warn!("{message}"),
        }
        let mut inner = self.inner.lock().expect("poisoned lock");
        if inner.messages.len() < self.max_messages {
            inner.messages.push(ErrorMessage::new(severity, message));
        }
        else {
            inner.dropped += 1;
        }
    }

    fn errors(&self) -> Vec<ErrorMessage> {
        self.inner.lock().expect("poisoned lock").messages.clone()
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retains_up_to_limit() {
        let consumer = CollectingErrorConsumer::new(2);
        assert!(!consumer.has_errors());
        consumer.warn("one".into());
        consumer.error("two".into());
        consumer.fatal("three".into());
        assert_eq!(
            consumer.errors(),
            vec![
                ErrorMessage::new(Severity::Warning, "one"),
                ErrorMessage::new(Severity::Error, "two"),
            ]
        );
        assert_eq!(consumer.dropped(), 1);
    }

    #[test]
    fn display() {
        assert_eq!(
            ErrorMessage::new(Severity::Fatal, "disk full").to_string(),
            "FATAL: disk full"
        );
    }
}
