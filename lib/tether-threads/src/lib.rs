//!
//! tether-threads - Owner-Thread Dispatch
//!
//! Many caller threads, one executing thread. Work submitted from
//! anywhere is queued in FIFO order and run one item at a time on the
//! owner thread, so side effects of two items never interleave.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tether_threads::{ExecutorConfig, OwnerThread};
//!
//! let owner = OwnerThread::spawn(ExecutorConfig::default())?;
//! let dispatcher = owner.dispatcher();
//!
//! dispatcher.submit((1u32,), |(level,)| set_volume(level))?;
//! let level = dispatcher.submit_and_fetch((), |()| current_volume())?;
//!
//! owner.close();
//! ```
//!
//! Arguments must pass the plain-data check from `tether-core`;
//! anything else is rejected before it reaches the queue.
//!

pub mod dispatcher;
pub mod executor;

pub use dispatcher::Dispatcher;
pub use executor::{
    DEFAULT_THREAD_NAME, ExecutorConfig, ExecutorState, ExecutorStats, FailureReport,
    FailureReporter, OwnerThread,
};
