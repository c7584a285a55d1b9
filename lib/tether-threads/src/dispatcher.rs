//!
//! Dispatch Facade
//!
//! The public surface any thread uses to hand work to the owner thread.
//! Every call takes its arguments as a tuple of up to four values; the
//! tuple is validated as plain data before anything is enqueued, so a
//! rejected call leaves the queue untouched.
//!
//! ## Call Shapes
//!
//! - `submit` - fire-and-forget; failures go to the reporting path
//! - `submit_and_wait` - block until the item has run
//! - `submit_and_fetch` - block and take the item's return value
//! - `fetch_handle` - enqueue and return the `ResultHandle` to wait on later
//! - `submit_async` / `fetch_async` - future-returning work, driven to
//!   completion on the owner thread before the next item starts
//!
//! ```rust,ignore
//! let owner = OwnerThread::spawn(ExecutorConfig::default())?;
//! let dispatcher = owner.dispatcher();
//!
//! dispatcher.submit((frame, 0.5f32), |(frame, alpha)| fade(frame, alpha))?;
//! let total = dispatcher.submit_and_fetch((3u32, 4u32), |(a, b)| a + b)?;
//! ```
//!
//! Tasks spawned onto the owner runtime without being awaited only make
//! progress while a later async item is being driven.
//!

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tether_core::{CancelToken, DispatchArgs, DispatchError, ResultHandle, handle};

use crate::executor::{ExecutorState, ExecutorStats, OwnerContext, Shared, panic_message};

/// Cloneable handle for submitting work to one owner thread.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    fn enqueue<A, R, F>(
        &self,
        args: A,
        detached: bool,
        work: F,
    ) -> Result<ResultHandle<R>, DispatchError>
    where
        A: DispatchArgs,
        R: Send + 'static,
        F: FnOnce(A, &OwnerContext) -> Result<R, DispatchError> + Send + 'static,
    {
        A::validate_all()?;

        let (completer, handle) = handle::pair();
        let job = Box::new(move |cx: &OwnerContext| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(args, cx)))
                .unwrap_or_else(|payload| {
                    Err(DispatchError::Panicked {
                        message: panic_message(payload.as_ref()),
                    })
                });
            let failure = outcome.as_ref().err().cloned();
            completer.complete(outcome);
            failure.map_or(Ok(()), Err)
        });

        self.shared.push(detached, job)?;
        Ok(handle)
    }

    fn ensure_off_owner(&self) -> Result<(), DispatchError> {
        if self.shared.is_owner_thread() {
            return Err(DispatchError::WouldDeadlock);
        }
        Ok(())
    }

    /// Enqueue and return immediately.
    pub fn submit<A, F>(&self, args: A, work: F) -> Result<(), DispatchError>
    where
        A: DispatchArgs,
        F: FnOnce(A) + Send + 'static,
    {
        self.enqueue(args, true, move |args, _| {
            work(args);
            Ok(())
        })
        .map(drop)
    }

    /// Fire-and-forget for fallible work. An `Err` is reported like a panic.
    pub fn try_submit<A, E, F>(&self, args: A, work: F) -> Result<(), DispatchError>
    where
        A: DispatchArgs,
        E: Display,
        F: FnOnce(A) -> Result<(), E> + Send + 'static,
    {
        self.enqueue(args, true, move |args, _| work(args).map_err(failed))
            .map(drop)
    }

    /// Enqueue and hand back the result slot without blocking.
    pub fn fetch_handle<A, R, F>(
        &self,
        args: A,
        work: F,
    ) -> Result<ResultHandle<R>, DispatchError>
    where
        A: DispatchArgs,
        R: Send + 'static,
        F: FnOnce(A) -> R + Send + 'static,
    {
        self.enqueue(args, false, move |args, _| Ok(work(args)))
    }

    /// Block until the owner thread has run `work`.
    pub fn submit_and_wait<A, F>(&self, args: A, work: F) -> Result<(), DispatchError>
    where
        A: DispatchArgs,
        F: FnOnce(A) + Send + 'static,
    {
        self.submit_and_fetch(args, work)
    }

    /// Block until the owner thread has run `work` and return its value.
    pub fn submit_and_fetch<A, R, F>(&self, args: A, work: F) -> Result<R, DispatchError>
    where
        A: DispatchArgs,
        R: Send + 'static,
        F: FnOnce(A) -> R + Send + 'static,
    {
        self.ensure_off_owner()?;
        self.fetch_handle(args, work)?.into_result()
    }

    pub fn try_submit_and_fetch<A, R, E, F>(&self, args: A, work: F) -> Result<R, DispatchError>
    where
        A: DispatchArgs,
        R: Send + 'static,
        E: Display,
        F: FnOnce(A) -> Result<R, E> + Send + 'static,
    {
        self.ensure_off_owner()?;
        self.enqueue(args, false, move |args, _| work(args).map_err(failed))?
            .into_result()
    }

    /// Fire-and-forget for future-returning work.
    pub fn submit_async<A, Fut, F>(&self, args: A, work: F) -> Result<(), DispatchError>
    where
        A: DispatchArgs,
        Fut: Future<Output = ()>,
        F: FnOnce(A) -> Fut + Send + 'static,
    {
        self.enqueue(args, true, move |args, cx| {
            cx.block_on(work(args));
            Ok(())
        })
        .map(drop)
    }

    /// Block until the future produced by `work` has resolved on the owner
    /// thread and return its output.
    pub fn fetch_async<A, R, Fut, F>(&self, args: A, work: F) -> Result<R, DispatchError>
    where
        A: DispatchArgs,
        R: Send + 'static,
        Fut: Future<Output = R>,
        F: FnOnce(A) -> Fut + Send + 'static,
    {
        self.ensure_off_owner()?;
        self.enqueue(args, false, move |args, cx| Ok(cx.block_on(work(args))))?
            .into_result()
    }

    /// Wait until everything submitted before this call has run.
    pub fn flush(&self) -> Result<(), DispatchError> {
        self.submit_and_wait((), |()| {})
    }

    /// Latch cancellation and queue the terminal barrier. Only the first
    /// call returns `true`.
    pub fn request_stop(&self) -> bool {
        self.shared.request_stop()
    }

    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state() == ExecutorState::Stopped
    }

    pub fn state(&self) -> ExecutorState {
        self.shared.state()
    }

    /// Token work items can poll to abandon long work after a stop.
    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel_token()
    }

    pub fn is_owner_thread(&self) -> bool {
        self.shared.is_owner_thread()
    }

    /// Number of items waiting in the queue.
    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    pub fn stats(&self) -> ExecutorStats {
        self.shared.stats()
    }
}

fn failed(error: impl Display) -> DispatchError {
    DispatchError::Failed {
        message: error.to_string(),
    }
}
