//!
//! tether-core - Shared Dispatch Types
//!
//! The building blocks used by the owner-thread executor and the timers:
//!
//! - `Describe`, `TypeShape` and `DispatchArgs` for validating cross-thread
//!   arguments as plain, independently copyable data
//! - `Completer` / `ResultHandle` single-assignment result slots
//! - `CancellationState` / `CancelToken` one-way cancellation latch
//! - `DispatchError` and `ValidationError`
//!

pub mod cancel;
pub mod copyable;
pub mod errors;
pub mod handle;

pub use cancel::*;
pub use copyable::*;
pub use errors::*;
pub use handle::{Completer, ResultHandle, pair};
