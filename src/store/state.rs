//! The lifecycle state shared by a store, its writer and its readers.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use log::{error, info, warn};
use crate::query::ErrorConsumer;
use super::completion::CompletionState;
use super::error::StoreError;


//------------ StoreState ----------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StoreState {
    /// The store accepts rows and can be read.
    Open,

    /// The store takes no more rows but can still be read.
    Sealed,

    /// The store has released its resources.
    Closed,

    /// Writing has failed fatally.
    Failed(String),
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreState::Open => f.write_str("open"),
            StoreState::Sealed => f.write_str("sealed"),
            StoreState::Closed => f.write_str("closed"),
            StoreState::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}


//------------ Shared --------------------------------------------------------

/// State shared between the parts of a store.
pub(crate) struct Shared {
    name: String,
    state: RwLock<StoreState>,

    /// The writer should commit what it has and stop.
    terminate: AtomicBool,

    /// The producer has signalled the end of the row stream.
    stream_closed: AtomicBool,

    /// A truncation warning has been issued.
    truncated: AtomicBool,

    completion: CompletionState,
    errors: Arc<dyn ErrorConsumer>,
}

impl Shared {
    pub fn new(name: String, errors: Arc<dyn ErrorConsumer>) -> Self {
        Shared {
            name,
            state: RwLock::new(StoreState::Open),
            terminate: AtomicBool::new(false),
            stream_closed: AtomicBool::new(false),
            truncated: AtomicBool::new(false),
            completion: CompletionState::new(),
            errors,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StoreState {
        self.state.read().expect("poisoned lock").clone()
    }

    pub fn completion(&self) -> &CompletionState {
        &self.completion
    }

    pub fn errors(&self) -> &Arc<dyn ErrorConsumer> {
        &self.errors
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    /// Returns an error if the store can no longer be read.
    pub fn check_readable(&self) -> Result<(), StoreError> {
        match &*self.state.read().expect("poisoned lock") {
            StoreState::Open | StoreState::Sealed => Ok(()),
            StoreState::Closed => Err(StoreError::StoreClosed),
            StoreState::Failed(msg) => Err(StoreError::Failed(msg.clone())),
        }
    }

    /// Returns an error if the store takes no more rows.
    pub fn check_writable(&self) -> Result<(), StoreError> {
        match &*self.state.read().expect("poisoned lock") {
            StoreState::Open => { }
            StoreState::Sealed => {
                if !self.stream_closed.load(Ordering::Acquire) {
                    return Err(StoreError::StoreSealed)
                }
            }
            StoreState::Closed => return Err(StoreError::StoreClosed),
            StoreState::Failed(msg) => {
                return Err(StoreError::Failed(msg.clone()))
            }
        }
        if self.stream_closed.load(Ordering::Acquire) {
            Err(StoreError::StreamClosed)
        }
        else {
            Ok(())
        }
    }

    /// Marks the end of the row stream.
    ///
    /// Returns whether this was the first call.
    pub fn close_stream(&self) -> bool {
        !self.stream_closed.swap(true, Ordering::AcqRel)
    }

    /// Moves an open store to sealed.
    ///
    /// If `terminate` is set, the writer stops after committing what it
    /// has already merged. Otherwise it finishes the rows already queued.
    pub fn seal(&self, terminate: bool) -> bool {
        if terminate {
            self.terminate.store(true, Ordering::Release);
        }
        let mut state = self.state.write().expect("poisoned lock");
        if *state == StoreState::Open {
            *state = StoreState::Sealed;
            info!("Sealed result store {}", self.name);
            true
        }
        else {
            false
        }
    }

    /// Moves the store to closed.
    ///
    /// Returns whether the store was closed before.
    pub fn close(&self) -> bool {
        self.terminate.store(true, Ordering::Release);
        let mut state = self.state.write().expect("poisoned lock");
        if *state == StoreState::Closed {
            return true
        }
        *state = StoreState::Closed;
        false
    }

    /// Moves the store to failed and reports the error.
    pub fn fail(&self, err: StoreError) {
        let msg = err.to_string();
        {
            let mut state = self.state.write().expect("poisoned lock");
            if *state == StoreState::Closed {
                return
            }
            *state = StoreState::Failed(msg.clone());
        }
        self.terminate.store(true, Ordering::Release);
        error!("Result store {} failed: {}", self.name, msg);
        self.errors.fatal(msg);
    }

    /// Reports truncation unless it has already been reported.
    pub fn truncate(&self, reason: impl FnOnce() -> String) {
        if self.truncated.swap(true, Ordering::AcqRel) {
            return
        }
        let msg = reason();
        warn!("Result store {}: {}", self.name, msg);
        self.errors.warn(msg);
    }

    /// Reports a row-level problem.
    pub fn row_error(&self, msg: String) {
        self.errors.error(msg);
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Shared")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{CollectingErrorConsumer, Severity};

    fn shared() -> (Shared, Arc<CollectingErrorConsumer>) {
        let errors = Arc::new(CollectingErrorConsumer::default());
        (Shared::new("test".into(), errors.clone()), errors)
    }

    #[test]
    fn lifecycle() {
        let (shared, _) = shared();
        assert!(shared.check_writable().is_ok());
        assert!(shared.seal(false));
        assert!(!shared.seal(true));
        assert!(matches!(
            shared.check_writable(), Err(StoreError::StoreSealed)
        ));
        assert!(shared.check_readable().is_ok());
        assert!(!shared.close());
        assert!(shared.close());
        assert!(matches!(
            shared.check_readable(), Err(StoreError::StoreClosed)
        ));
    }

    #[test]
    fn stream_closed() {
        let (shared, _) = shared();
        assert!(shared.close_stream());
        assert!(!shared.close_stream());
        assert!(matches!(
            shared.check_writable(), Err(StoreError::StreamClosed)
        ));
    }

    #[test]
    fn failure_is_reported() {
        let (shared, errors) = shared();
        shared.fail(StoreError::Failed("disk full".into()));
        assert!(shared.is_terminated());
        assert!(matches!(
            shared.check_readable(), Err(StoreError::Failed(_))
        ));
        assert_eq!(errors.errors()[0].severity, Severity::Fatal);
    }

    #[test]
    fn truncation_reported_once() {
        let (shared, errors) = shared();
        shared.truncate(|| "one".into());
        shared.truncate(|| "two".into());
        assert_eq!(errors.errors().len(), 1);
    }
}
