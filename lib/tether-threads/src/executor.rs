//!
//! Owner-Thread Executor
//!
//! One named OS thread drains a FIFO queue and runs each work item to
//! completion before taking the next. Callers on any thread push into
//! the queue; only the owner thread pops from it.
//!
//! - Items never overlap: async items are driven to completion on a
//!   current-thread tokio runtime owned by this thread before the next
//!   item starts
//! - A failing or panicking item only affects its own result handle
//! - Stop is cooperative: the queue is closed, a barrier item is pushed,
//!   and anything still queued ahead of the barrier is discarded as
//!   cancelled
//!
//! ## Lifecycle
//!
//! `Created -> Running -> Draining -> Stopped`. `Stopped` is terminal.
//!

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use tether_core::{CancelToken, CancellationState, DispatchError};
use tokio::runtime::Runtime;
use tracing::{debug, error, info, trace, warn};

use crate::dispatcher::Dispatcher;

/// Default name of the owner thread.
pub const DEFAULT_THREAD_NAME: &str = "tether-owner";

/// Callback invoked for every fire-and-forget item that fails.
pub type FailureReporter = Arc<dyn Fn(&FailureReport) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    /// Submission sequence number of the failed item.
    pub sequence: u64,
    pub error: DispatchError,
}

#[derive(Clone)]
pub struct ExecutorConfig {
    pub thread_name: String,
    pub reporter: Option<FailureReporter>,
}

impl ExecutorConfig {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: FailureReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::new(DEFAULT_THREAD_NAME)
    }
}

impl fmt::Debug for ExecutorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorConfig")
            .field("thread_name", &self.thread_name)
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutorState {
    Created,
    Running,
    Draining,
    Stopped,
}

impl ExecutorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ExecutorState::Created,
            1 => ExecutorState::Running,
            2 => ExecutorState::Draining,
            _ => ExecutorState::Stopped,
        }
    }
}

/// Snapshot of executor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// What a work item sees of the owner thread while it runs.
pub(crate) struct OwnerContext {
    runtime: Runtime,
}

impl OwnerContext {
    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

/// Type-erased work: runs the caller's closure, fulfills its handle and
/// hands the failure (if any) back for accounting.
pub(crate) type Job = Box<dyn FnOnce(&OwnerContext) -> Result<(), DispatchError> + Send>;

pub(crate) struct WorkItem {
    sequence: u64,
    detached: bool,
    job: Job,
}

enum QueueEntry {
    Work(WorkItem),
    Barrier,
}

struct QueueState {
    entries: VecDeque<QueueEntry>,
    closed: bool,
    next_sequence: u64,
}

/// The owner thread's inbox
struct TaskQueue {
    state: Mutex<QueueState>,
    condvar: Condvar,
}

impl TaskQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                closed: false,
                next_sequence: 1,
            }),
            condvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sequence numbers are handed out under the queue lock, so they follow
    /// execution order.
    fn push(&self, detached: bool, job: Job) -> Result<u64, DispatchError> {
        let mut state = self.lock();
        if state.closed {
            return Err(DispatchError::Stopped);
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.entries.push_back(QueueEntry::Work(WorkItem {
            sequence,
            detached,
            job,
        }));
        self.condvar.notify_one();
        Ok(sequence)
    }

    fn pop(&self) -> QueueEntry {
        let state = self.lock();
        let mut state = self
            .condvar
            .wait_while(state, |state| state.entries.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        state.entries.pop_front().unwrap_or(QueueEntry::Barrier)
    }

    /// Close the queue and append the terminal barrier. `on_close` runs
    /// under the queue lock so no push can slip in between.
    fn close(&self, on_close: impl FnOnce()) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        on_close();
        state.entries.push_back(QueueEntry::Barrier);
        self.condvar.notify_all();
        true
    }

    fn len(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|entry| matches!(entry, QueueEntry::Work(_)))
            .count()
    }
}

/// State shared between the owner thread and every `Dispatcher` clone.
pub(crate) struct Shared {
    queue: TaskQueue,
    cancel: CancellationState,
    state: AtomicU8,
    owner: OnceLock<ThreadId>,
    counters: Counters,
    reporter: Option<FailureReporter>,
}

impl Shared {
    fn new(reporter: Option<FailureReporter>) -> Self {
        Self {
            queue: TaskQueue::new(),
            cancel: CancellationState::new(),
            state: AtomicU8::new(ExecutorState::Created as u8),
            owner: OnceLock::new(),
            counters: Counters::default(),
            reporter,
        }
    }

    pub(crate) fn push(&self, detached: bool, job: Job) -> Result<u64, DispatchError> {
        let sequence = self.queue.push(detached, job)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(sequence)
    }

    pub(crate) fn request_stop(&self) -> bool {
        let stopped = self.queue.close(|| {
            self.cancel.cancel();
            self.advance_state(ExecutorState::Draining);
        });
        if stopped {
            info!(pending = self.queue.len(), "stop requested, draining owner queue");
        }
        stopped
    }

    pub(crate) fn state(&self) -> ExecutorState {
        ExecutorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move forward in the lifecycle; never backwards.
    fn advance_state(&self, next: ExecutorState) {
        self.state.fetch_max(next as u8, Ordering::SeqCst);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> CancelToken {
        self.cancel.token()
    }

    pub(crate) fn is_owner_thread(&self) -> bool {
        self.owner.get() == Some(&thread::current().id())
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }

    fn execute(&self, item: WorkItem, cx: &OwnerContext) {
        let WorkItem {
            sequence,
            detached,
            job,
        } = item;
        let started = Instant::now();

        // Jobs catch their own panics; this guard only covers a panic in
        // the completion path itself.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(cx))).unwrap_or_else(|payload| {
            Err(DispatchError::Panicked {
                message: panic_message(payload.as_ref()),
            })
        });

        match outcome {
            Ok(()) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                trace!(sequence, elapsed = ?started.elapsed(), "work item completed");
            }
            Err(error) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                if detached {
                    self.report(sequence, error);
                } else {
                    debug!(sequence, %error, "work item failed, returned to caller");
                }
            }
        }
    }

    fn report(&self, sequence: u64, error: DispatchError) {
        error!(sequence, %error, "fire-and-forget work item failed");
        if let Some(reporter) = &self.reporter {
            let report = FailureReport { sequence, error };
            if panic::catch_unwind(AssertUnwindSafe(|| reporter(&report))).is_err() {
                warn!(sequence, "failure reporter panicked");
            }
        }
    }

    fn discard(&self, item: WorkItem) {
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(sequence = item.sequence, "discarding queued work item after stop");
        // Dropping the job drops its completer, which resolves the
        // caller's handle as cancelled.
        drop(item);
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn owner_loop(shared: Arc<Shared>, cx: OwnerContext) {
    let _ = shared.owner.set(thread::current().id());
    shared.advance_state(ExecutorState::Running);
    debug!("owner thread running");

    loop {
        match shared.queue.pop() {
            QueueEntry::Barrier => break,
            QueueEntry::Work(item) if shared.stop_requested() => shared.discard(item),
            QueueEntry::Work(item) => shared.execute(item, &cx),
        }
    }

    shared.advance_state(ExecutorState::Stopped);
    let stats = shared.stats();
    info!(
        completed = stats.completed,
        failed = stats.failed,
        cancelled = stats.cancelled,
        "owner thread stopped"
    );
}

/// Owns the executor thread. Dropping it stops and joins the thread.
pub struct OwnerThread {
    dispatcher: Dispatcher,
    join: Option<JoinHandle<()>>,
}

impl OwnerThread {
    pub fn spawn(config: ExecutorConfig) -> Result<Self, DispatchError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DispatchError::Spawn(e.to_string()))?;

        let shared = Arc::new(Shared::new(config.reporter));
        let thread_shared = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || owner_loop(thread_shared, OwnerContext { runtime }))
            .map_err(|e| DispatchError::Spawn(e.to_string()))?;

        info!(thread = %config.thread_name, "owner thread started");
        Ok(Self {
            dispatcher: Dispatcher::from_shared(shared),
            join: Some(join),
        })
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Stop the executor and wait for the owner thread to exit.
    pub fn close(mut self) -> ExecutorStats {
        self.shutdown();
        self.dispatcher.stats()
    }

    fn shutdown(&mut self) {
        self.dispatcher.request_stop();
        let Some(join) = self.join.take() else {
            return;
        };
        if self.dispatcher.is_owner_thread() {
            warn!("owner thread handle dropped on the owner thread, not joining");
            return;
        }
        if join.join().is_err() {
            error!("owner thread panicked during shutdown");
        }
    }
}

impl Drop for OwnerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
