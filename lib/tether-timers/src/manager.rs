//!
//! Delayed and Repeating Dispatch
//!
//! A `TimerManager` runs one background thread holding a deadline-sorted
//! list of pending timers. The thread sleeps until the earliest deadline
//! (via `Condvar::wait_timeout`), then hands each expired callback to the
//! owner thread through its `Dispatcher`. Callbacks therefore run in the
//! same total order as every other dispatched item.
//!
//! ## Pause Awareness
//!
//! Every scheduled timer carries a `Countdown`. For pause-aware timers a
//! pause pushes the countdown's deadline out; when the thread wakes and
//! the countdown is not finished yet, the timer is re-queued for the
//! remaining time. While the coordinator is paused the thread re-checks
//! at most every `max_poll`.
//!
//! ## Intervals
//!
//! After an interval fires, a fresh countdown for the next period is
//! started and the timer is re-queued unless it was cancelled while the
//! callback was being dispatched.
//!

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use tether_core::DispatchError;
use tether_threads::Dispatcher;

use crate::countdown::{Countdown, PauseCoordinator};

pub const DEFAULT_TIMER_THREAD_NAME: &str = "tether-timers";
pub const DEFAULT_MAX_POLL: Duration = Duration::from_millis(50);

// Stand-in fire time for delays `Instant` cannot represent. The countdown
// itself never finishes, so the entry is only ever re-queued.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

fn fire_time(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("timer manager is shut down")]
    Shutdown,

    #[error("failed to start timer thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone)]
pub struct TimerConfig {
    pub thread_name: String,
    /// Upper bound on how long the timer thread sleeps before re-checking
    /// a pause-extended countdown.
    pub max_poll: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_TIMER_THREAD_NAME.to_string(),
            max_poll: DEFAULT_MAX_POLL,
        }
    }
}

/// Identifies a scheduled timeout or interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

enum Callback {
    Once(Box<dyn FnOnce() + Send>),
    Repeat(Arc<dyn Fn() + Send + Sync>),
}

struct Scheduled {
    handle: TimerHandle,
    fire_at: Instant,
    countdown: Countdown,
    period: Option<Duration>,
    callback: Callback,
}

struct ManagerState {
    timers: Vec<Scheduled>,
    /// Intervals handed to the dispatcher and not yet re-queued.
    firing: HashSet<TimerHandle>,
    /// Subset of `firing` cancelled in the meantime.
    cancelled: HashSet<TimerHandle>,
    shutdown: bool,
}

impl ManagerState {
    fn insert(&mut self, entry: Scheduled) {
        let pos = self
            .timers
            .binary_search_by(|e| e.fire_at.cmp(&entry.fire_at))
            .unwrap_or_else(|pos| pos);
        self.timers.insert(pos, entry);
    }

    fn take_due(&mut self) -> Scheduled {
        let entry = self.timers.remove(0);
        if entry.period.is_some() {
            self.firing.insert(entry.handle);
        }
        entry
    }
}

struct ManagerShared {
    state: Mutex<ManagerState>,
    condvar: Condvar,
    dispatcher: Dispatcher,
    coordinator: PauseCoordinator,
    max_poll: Duration,
}

impl ManagerShared {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Real instant at which to look at `countdown` again.
    fn next_check(&self, countdown: &Countdown, now: Instant) -> Instant {
        let wait = if countdown.is_paused() {
            self.max_poll
        } else {
            countdown.remaining().min(self.max_poll).max(Duration::from_millis(1))
        };
        now + wait
    }
}

pub struct TimerManager {
    shared: Arc<ManagerShared>,
    next_id: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerManager {
    pub fn new(
        dispatcher: Dispatcher,
        coordinator: PauseCoordinator,
        config: TimerConfig,
    ) -> Result<Self, TimerError> {
        let shared = Arc::new(ManagerShared {
            state: Mutex::new(ManagerState {
                timers: Vec::new(),
                firing: HashSet::new(),
                cancelled: HashSet::new(),
                shutdown: false,
            }),
            condvar: Condvar::new(),
            dispatcher,
            coordinator,
            max_poll: config.max_poll.max(Duration::from_millis(1)),
        });

        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(config.thread_name)
            .spawn(move || timer_thread_loop(thread_shared))?;

        Ok(Self {
            shared,
            next_id: AtomicU64::new(1),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Run `callback` on the owner thread once `delay` has elapsed.
    pub fn set_timeout<F>(
        &self,
        delay: Duration,
        pause_aware: bool,
        callback: F,
    ) -> Result<TimerHandle, TimerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(delay, pause_aware, None, Callback::Once(Box::new(callback)))
    }

    /// Run `callback` on the owner thread every `period`.
    pub fn set_interval<F>(
        &self,
        period: Duration,
        pause_aware: bool,
        callback: F,
    ) -> Result<TimerHandle, TimerError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        self.schedule(period, pause_aware, Some(period), Callback::Repeat(Arc::new(callback)))
    }

    fn schedule(
        &self,
        delay: Duration,
        pause_aware: bool,
        period: Option<Duration>,
        callback: Callback,
    ) -> Result<TimerHandle, TimerError> {
        if self.shared.dispatcher.stop_requested() {
            return Err(TimerError::Dispatch(DispatchError::Stopped));
        }

        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let countdown = self.shared.coordinator.start(delay, pause_aware);
        let entry = Scheduled {
            handle,
            fire_at: fire_time(Instant::now(), delay),
            countdown,
            period,
            callback,
        };

        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(TimerError::Shutdown);
        }
        state.insert(entry);
        self.shared.condvar.notify_one();
        debug!(%handle, ?delay, pause_aware, "timer scheduled");
        Ok(handle)
    }

    /// Cancel a pending timeout or interval. An interval whose callback is
    /// being handed to the owner thread right now is cancelled too: that
    /// callback still runs once, but the interval is not re-queued.
    ///
    /// Returns `false` for a timeout that already fired, a handle that was
    /// already cancelled and one that was never scheduled.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        let mut state = self.shared.lock();
        let before = state.timers.len();
        state.timers.retain(|t| t.handle != handle);
        let removed = state.timers.len() != before;
        let cancelled = if removed {
            true
        } else if state.firing.contains(&handle) {
            state.cancelled.insert(handle)
        } else {
            false
        };
        self.shared.condvar.notify_one();
        cancelled
    }

    /// Number of timers waiting to fire.
    pub fn pending(&self) -> usize {
        self.shared.lock().timers.len()
    }

    /// Stop the timer thread. Pending timers are dropped without firing.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            let dropped = state.timers.len();
            state.timers.clear();
            self.shared.condvar.notify_all();
            info!(dropped, "timer manager shutting down");
        }

        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!("timer thread panicked");
            }
        }
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_thread_loop(shared: Arc<ManagerShared>) {
    loop {
        let mut state = shared.lock();

        if state.shutdown {
            break;
        }

        if state.timers.is_empty() {
            drop(shared.condvar.wait(state).unwrap_or_else(PoisonError::into_inner));
            continue;
        }

        let next_fire = state.timers[0].fire_at;
        let now = Instant::now();
        if next_fire > now {
            drop(
                shared
                    .condvar
                    .wait_timeout(state, next_fire - now)
                    .unwrap_or_else(PoisonError::into_inner),
            );
            continue;
        }

        let mut to_fire = Vec::new();
        let mut deferred = Vec::new();
        while state.timers.first().is_some_and(|t| t.fire_at <= now) {
            let mut entry = state.take_due();
            if entry.countdown.is_finished() {
                to_fire.push(entry);
            } else {
                state.firing.remove(&entry.handle);
                entry.fire_at = shared.next_check(&entry.countdown, now);
                deferred.push(entry);
            }
        }
        for entry in deferred {
            state.insert(entry);
        }
        drop(state);

        for entry in to_fire {
            fire(&shared, entry);
        }
    }
    debug!("timer thread exited");
}

fn fire(shared: &ManagerShared, entry: Scheduled) {
    let Scheduled {
        handle,
        period,
        callback,
        countdown,
        ..
    } = entry;

    let (dispatched, repeat) = match callback {
        Callback::Once(callback) => (shared.dispatcher.submit((), move |()| callback()), None),
        Callback::Repeat(callback) => {
            let run = Arc::clone(&callback);
            (shared.dispatcher.submit((), move |()| run()), Some(callback))
        }
    };

    if let Err(error) = &dispatched {
        debug!(%handle, %error, "owner thread refused timer callback");
    }

    let (Some(period), Some(callback)) = (period, repeat) else {
        return;
    };

    let mut state = shared.lock();
    state.firing.remove(&handle);
    let cancelled = state.cancelled.remove(&handle);
    if cancelled || state.shutdown || dispatched.is_err() {
        return;
    }
    let next = shared.coordinator.start(period, countdown.is_pause_aware());
    drop(countdown);
    state.insert(Scheduled {
        handle,
        fire_at: fire_time(Instant::now(), period),
        countdown: next,
        period: Some(period),
        callback: Callback::Repeat(callback),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tether_threads::{ExecutorConfig, OwnerThread};

    fn setup() -> (OwnerThread, PauseCoordinator, TimerManager) {
        let owner = OwnerThread::spawn(ExecutorConfig::default()).unwrap();
        let coordinator = PauseCoordinator::new();
        let timers = TimerManager::new(
            owner.dispatcher(),
            coordinator.clone(),
            TimerConfig::default(),
        )
        .unwrap();
        (owner, coordinator, timers)
    }

    #[test]
    fn test_set_timeout_fires_once_on_owner_thread() {
        let (owner, _coordinator, timers) = setup();
        let dispatcher = owner.dispatcher();
        let fired = Arc::new(AtomicUsize::new(0));
        let on_owner = Arc::new(AtomicUsize::new(0));

        let (f, o, d) = (Arc::clone(&fired), Arc::clone(&on_owner), dispatcher.clone());
        let handle = timers
            .set_timeout(Duration::from_millis(50), false, move || {
                f.fetch_add(1, Ordering::SeqCst);
                if d.is_owner_thread() {
                    o.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();
        assert_eq!(timers.pending(), 1);

        thread::sleep(Duration::from_millis(200));
        dispatcher.flush().unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(on_owner.load(Ordering::SeqCst), 1);
        assert_eq!(timers.pending(), 0);
        assert!(!timers.cancel(handle));
        assert!(timers.shared.lock().cancelled.is_empty());
    }

    #[test]
    fn test_cancel_of_unknown_handle_keeps_no_state() {
        let (_owner, _coordinator, timers) = setup();
        for id in 10_000..20_000 {
            assert!(!timers.cancel(TimerHandle(id)));
        }
        let state = timers.shared.lock();
        assert!(state.cancelled.is_empty());
        assert!(state.firing.is_empty());
    }

    #[test]
    fn test_interval_cancelled_during_dispatch_is_not_requeued() {
        let (owner, _coordinator, timers) = setup();
        let ticks = Arc::new(AtomicUsize::new(0));

        let t = Arc::clone(&ticks);
        let handle = timers
            .set_interval(Duration::from_secs(60), false, move || {
                t.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        // Take the entry the way the timer thread does when it comes due.
        let entry = timers.shared.lock().take_due();
        assert!(timers.cancel(handle));
        assert!(!timers.cancel(handle));

        fire(&timers.shared, entry);
        owner.dispatcher().flush().unwrap();

        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert_eq!(timers.pending(), 0);
        let state = timers.shared.lock();
        assert!(state.firing.is_empty());
        assert!(state.cancelled.is_empty());
    }

    #[test]
    fn test_interval_requeued_after_dispatch() {
        let (owner, _coordinator, timers) = setup();
        let ticks = Arc::new(AtomicUsize::new(0));

        let t = Arc::clone(&ticks);
        let handle = timers
            .set_interval(Duration::from_secs(60), false, move || {
                t.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let entry = timers.shared.lock().take_due();
        fire(&timers.shared, entry);
        owner.dispatcher().flush().unwrap();

        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert_eq!(timers.pending(), 1);
        assert!(timers.shared.lock().firing.is_empty());
        assert!(timers.cancel(handle));
    }

    #[test]
    fn test_pause_aware_interval_holds_while_paused() {
        let (owner, coordinator, timers) = setup();
        let dispatcher = owner.dispatcher();
        let ticks = Arc::new(AtomicUsize::new(0));

        let t = Arc::clone(&ticks);
        let handle = timers
            .set_interval(Duration::from_millis(50), true, move || {
                t.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        thread::sleep(Duration::from_millis(180));
        dispatcher.flush().unwrap();
        assert!(ticks.load(Ordering::SeqCst) >= 2);

        coordinator.pause_all();
        thread::sleep(Duration::from_millis(100));
        dispatcher.flush().unwrap();
        let frozen = ticks.load(Ordering::SeqCst);
        assert_eq!(coordinator.active_timers(), 1);

        thread::sleep(Duration::from_millis(250));
        dispatcher.flush().unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), frozen);

        coordinator.resume_all();
        thread::sleep(Duration::from_millis(250));
        dispatcher.flush().unwrap();
        assert!(ticks.load(Ordering::SeqCst) > frozen);

        timers.cancel(handle);
        thread::sleep(Duration::from_millis(100));
        dispatcher.flush().unwrap();
        assert_eq!(coordinator.active_timers(), 0);
    }

    #[test]
    fn test_timeout_set_while_paused_waits_for_resume() {
        let (owner, coordinator, timers) = setup();
        let dispatcher = owner.dispatcher();
        let aware = Arc::new(AtomicUsize::new(0));
        let plain = Arc::new(AtomicUsize::new(0));

        coordinator.pause_all();
        let a = Arc::clone(&aware);
        timers
            .set_timeout(Duration::from_millis(50), true, move || {
                a.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let p = Arc::clone(&plain);
        timers
            .set_timeout(Duration::from_millis(50), false, move || {
                p.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        thread::sleep(Duration::from_millis(250));
        dispatcher.flush().unwrap();
        assert_eq!(aware.load(Ordering::SeqCst), 0);
        assert_eq!(plain.load(Ordering::SeqCst), 1);

        coordinator.resume_all();
        thread::sleep(Duration::from_millis(250));
        dispatcher.flush().unwrap();
        assert_eq!(aware.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unrepresentable_delay_is_accepted() {
        let (_owner, coordinator, timers) = setup();
        let timeout = timers
            .set_timeout(Duration::MAX, true, || {})
            .unwrap();
        let interval = timers
            .set_interval(Duration::MAX, false, || {})
            .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(timers.pending(), 2);
        assert_eq!(coordinator.active_timers(), 1);
        assert!(timers.cancel(timeout));
        assert!(timers.cancel(interval));
        assert_eq!(coordinator.active_timers(), 0);
    }

    #[test]
    fn test_cancel_timeout() {
        let (owner, _coordinator, timers) = setup();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        let handle = timers
            .set_timeout(Duration::from_millis(100), false, move || {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(timers.cancel(handle));

        thread::sleep(Duration::from_millis(250));
        owner.dispatcher().flush().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_set_interval_fires_multiple() {
        let (owner, _coordinator, timers) = setup();
        let ticks = Arc::new(AtomicUsize::new(0));

        let t = Arc::clone(&ticks);
        let handle = timers
            .set_interval(Duration::from_millis(50), false, move || {
                t.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        thread::sleep(Duration::from_millis(280));
        timers.cancel(handle);
        thread::sleep(Duration::from_millis(100));
        owner.dispatcher().flush().unwrap();

        let count = ticks.load(Ordering::SeqCst);
        assert!(count >= 3, "Expected at least 3 ticks, got {}", count);

        let settled = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(150));
        owner.dispatcher().flush().unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), settled);
    }

    #[test]
    fn test_pause_delays_pause_aware_timeout() {
        let (owner, coordinator, timers) = setup();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        timers
            .set_timeout(Duration::from_millis(100), true, move || {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        coordinator.pause_all();
        thread::sleep(Duration::from_millis(250));
        owner.dispatcher().flush().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        coordinator.resume_all();
        thread::sleep(Duration::from_millis(250));
        owner.dispatcher().flush().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_schedule_after_dispatcher_stop_fails() {
        let (owner, _coordinator, timers) = setup();
        owner.dispatcher().request_stop();

        let err = timers
            .set_timeout(Duration::from_millis(10), false, || {})
            .unwrap_err();
        assert!(matches!(err, TimerError::Dispatch(DispatchError::Stopped)));
    }

    #[test]
    fn test_shutdown_drops_pending() {
        let (_owner, _coordinator, timers) = setup();
        timers
            .set_timeout(Duration::from_secs(30), false, || {})
            .unwrap();
        assert_eq!(timers.pending(), 1);

        timers.shutdown();
        assert_eq!(timers.pending(), 0);
        assert!(matches!(
            timers.set_timeout(Duration::from_millis(1), false, || {}),
            Err(TimerError::Shutdown)
        ));
    }
}
