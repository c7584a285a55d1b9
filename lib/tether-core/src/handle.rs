//!
//! Single-Assignment Result Handles
//!
//! A submission produces a `(Completer, ResultHandle)` pair. The executor
//! holds the completer and is the only writer; consuming it on
//! `complete` makes a second write impossible. The caller holds the
//! handle and may read the outcome any number of times once it is set.
//!
//! A completer dropped without being completed resolves its slot to
//! `DispatchError::Cancelled`, so discarding a queued item can never
//! leave a waiter blocked.
//!
//! Waiting parks the caller on a condition variable; there is no
//! spinning.
//!

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::errors::DispatchError;

type Outcome<T> = Result<T, DispatchError>;

struct Slot<T> {
    value: Mutex<Option<Outcome<T>>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn lock(&self) -> MutexGuard<'_, Option<Outcome<T>>> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fill(&self, outcome: Outcome<T>) {
        let mut value = self.lock();
        if value.is_none() {
            *value = Some(outcome);
            self.ready.notify_all();
        }
    }

    fn wait_filled(&self) -> MutexGuard<'_, Option<Outcome<T>>> {
        let value = self.lock();
        self.ready
            .wait_while(value, |value| value.is_none())
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a linked writer/reader pair.
pub fn pair<T>() -> (Completer<T>, ResultHandle<T>) {
    let slot = Arc::new(Slot {
        value: Mutex::new(None),
        ready: Condvar::new(),
    });
    (
        Completer {
            slot: Some(Arc::clone(&slot)),
        },
        ResultHandle { slot },
    )
}

/// Write side of a result slot.
pub struct Completer<T> {
    slot: Option<Arc<Slot<T>>>,
}

impl<T> Completer<T> {
    pub fn complete(mut self, outcome: Outcome<T>) {
        if let Some(slot) = self.slot.take() {
            slot.fill(outcome);
        }
    }

    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(self, error: DispatchError) {
        self.complete(Err(error));
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.fill(Err(DispatchError::Cancelled));
        }
    }
}

/// Read side of a result slot.
pub struct ResultHandle<T> {
    slot: Arc<Slot<T>>,
}

impl<T> ResultHandle<T> {
    pub fn is_ready(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Block until the outcome is set and take ownership of it.
    pub fn into_result(self) -> Outcome<T> {
        let mut value = self.slot.wait_filled();
        // wait_filled only returns once the slot holds an outcome, and this
        // handle is the only reader.
        value.take().unwrap_or(Err(DispatchError::Cancelled))
    }

    /// Like `into_result`, but give up after `timeout`.
    pub fn into_result_timeout(self, timeout: Duration) -> Outcome<T> {
        let value = self.slot.lock();
        let (mut value, _) = self
            .slot
            .ready
            .wait_timeout_while(value, timeout, |value| value.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        value
            .take()
            .unwrap_or(Err(DispatchError::TimedOut { waited: timeout }))
    }
}

impl<T: Clone> ResultHandle<T> {
    /// Block until the outcome is set.
    pub fn wait(&self) -> Outcome<T> {
        let value = self.slot.wait_filled();
        value.as_ref().cloned().unwrap_or(Err(DispatchError::Cancelled))
    }

    /// Block for at most `timeout`. The work item is not affected when the
    /// caller gives up.
    pub fn wait_timeout(&self, timeout: Duration) -> Outcome<T> {
        let value = self.slot.lock();
        let (value, _) = self
            .slot
            .ready
            .wait_timeout_while(value, timeout, |value| value.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        match value.as_ref() {
            Some(outcome) => outcome.clone(),
            None => Err(DispatchError::TimedOut { waited: timeout }),
        }
    }

    pub fn try_get(&self) -> Option<Outcome<T>> {
        self.slot.lock().as_ref().cloned()
    }
}
