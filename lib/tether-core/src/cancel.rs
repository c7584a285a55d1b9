//!
//! Cancellation Latch
//!
//! A one-way flag shared by every work item of one executor. Once set it
//! never resets. Work items receive a read-only [`CancelToken`] and may
//! poll it to abandon long-running work early; nothing is interrupted
//! forcibly.
//!

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::copyable::{Describe, TypeShape};

#[derive(Debug, Clone, Default)]
pub struct CancellationState {
    cancelled: Arc<AtomicBool>,
}

impl CancellationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the flag. Returns `true` only for the call that flipped it.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

/// Read-only view of a [`CancellationState`].
///
/// Audited for the dispatch boundary: it can only observe the latch,
/// never set it, so copies cannot race each other.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Describe for CancelToken {
    fn shape() -> TypeShape {
        TypeShape::Sanctioned("CancelToken")
    }
}
