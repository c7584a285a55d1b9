///
/// Dispatch error types.
///
/// Every failure a caller can observe from the dispatcher: argument
/// validation, submissions after stop, items cancelled while queued,
/// failures raised inside a work item, and caller-side timeouts.
///
/// Cancellation is reported separately from failure so callers can tell
/// "never ran" apart from "ran and broke".
///

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::copyable::ArgPosition;

/// Why a type was refused at the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    SharedReference(&'static str),
    Collection(&'static str),
    Closure,
    Handle(&'static str),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::SharedReference(name) => {
                write!(f, "holds a shared reference ({}) to mutable state", name)
            }
            RejectReason::Collection(name) => {
                write!(f, "holds a heap-backed collection ({})", name)
            }
            RejectReason::Closure => write!(f, "holds a closure that may capture outer state"),
            RejectReason::Handle(name) => {
                write!(f, "holds a live resource handle ({}) that must not be copied", name)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{position} of type `{type_name}` is not cross-thread safe: {path} {reason}")]
pub struct ValidationError {
    pub position: ArgPosition,
    pub type_name: &'static str,
    /// Field path to the offending leaf, `self` for the value itself.
    pub path: String,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("dispatcher is stopped")]
    Stopped,

    #[error("work item was cancelled before it ran")]
    Cancelled,

    #[error("work item panicked: {message}")]
    Panicked { message: String },

    #[error("work item failed: {message}")]
    Failed { message: String },

    #[error("gave up after {waited:?} waiting for work item")]
    TimedOut { waited: Duration },

    #[error("blocking dispatch from the owner thread would deadlock")]
    WouldDeadlock,

    #[error("failed to start owner thread: {0}")]
    Spawn(String),
}

impl DispatchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled)
    }

    /// True for errors raised by the work item itself.
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            DispatchError::Panicked { .. } | DispatchError::Failed { .. }
        )
    }
}
