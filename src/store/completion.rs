//! Signalling that a store has finished writing.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};


//------------ CompletionState -----------------------------------------------

/// A flag that is set once and can be waited for.
#[derive(Debug, Default)]
pub struct CompletionState {
    complete: Mutex<bool>,
    cond: Condvar,
}

impl CompletionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the state as complete and wakes up everyone waiting.
    pub fn signal_complete(&self) {
        let mut complete = self.complete.lock().expect("poisoned lock");
        *complete = true;
        self.cond.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        *self.complete.lock().expect("poisoned lock")
    }

    /// Waits for completion for at most `timeout`.
    ///
    /// Returns whether the state is complete.
    pub fn await_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut complete = self.complete.lock().expect("poisoned lock");
        while !*complete {
            let now = Instant::now();
            if now >= deadline {
                return false
            }
            complete = self.cond.wait_timeout(
                complete, deadline - now
            ).expect("poisoned lock").0;
        }
        true
    }
}


//============ Tests =========================================================
