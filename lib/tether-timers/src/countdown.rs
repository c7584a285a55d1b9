//!
//! Pause-Aware Countdowns
//!
//! A `PauseCoordinator` owns the registry of live pause-aware countdowns
//! together with the global paused flag. `pause_all` / `resume_all`
//! sweep the registry while holding its lock and stamp every timer with
//! the same instant, so a sweep never sees a half-inserted or
//! half-removed timer.
//!
//! A countdown is finished once
//!
//! ```text
//! now >= stop + paused_total + (now - paused_since, while paused)
//! ```
//!
//! Countdowns started without pause awareness are never registered and
//! ignore pause events entirely.
//!
//! ## Lock Order
//!
//! Registry lock first, then a timer's own lock. A countdown never takes
//! the registry lock while holding its own.
//!

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::clock::{Clock, SystemClock};

pub type TimerId = u64;

#[derive(Debug, Clone, Copy)]
struct TimerState {
    start: Instant,
    /// `None` when `start + duration` is past what `Instant` can hold.
    stop: Option<Instant>,
    paused_total: Duration,
    paused_since: Option<Instant>,
}

impl TimerState {
    fn new(start: Instant, duration: Duration) -> Self {
        Self {
            start,
            stop: start.checked_add(duration),
            paused_total: Duration::ZERO,
            paused_since: None,
        }
    }

    /// Returns `false` if already paused.
    fn pause(&mut self, now: Instant) -> bool {
        if self.paused_since.is_some() {
            return false;
        }
        self.paused_since = Some(now);
        true
    }

    fn unpause(&mut self, now: Instant) -> bool {
        match self.paused_since.take() {
            Some(since) => {
                self.paused_total += now.saturating_duration_since(since);
                true
            }
            None => false,
        }
    }

    fn ongoing_pause(&self, now: Instant) -> Duration {
        self.paused_since
            .map_or(Duration::ZERO, |since| now.saturating_duration_since(since))
    }

    /// `None` means the countdown never finishes.
    fn deadline(&self, now: Instant) -> Option<Instant> {
        let paused = self.paused_total.saturating_add(self.ongoing_pause(now));
        self.stop?.checked_add(paused)
    }

    fn is_finished(&self, now: Instant) -> bool {
        self.deadline(now).is_some_and(|deadline| now >= deadline)
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.deadline(now)
            .map_or(Duration::MAX, |deadline| deadline.saturating_duration_since(now))
    }

    fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start)
            .saturating_sub(self.paused_total.saturating_add(self.ongoing_pause(now)))
    }
}

struct TimerEntry {
    state: Mutex<TimerState>,
}

impl TimerEntry {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct RegistryState {
    paused: bool,
    timers: HashMap<TimerId, Arc<TimerEntry>>,
}

struct Inner {
    clock: Arc<dyn Clock>,
    registry: Mutex<RegistryState>,
    next_id: AtomicU64,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, RegistryState> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unregister(&self, id: TimerId) {
        self.registry().timers.remove(&id);
    }
}

/// Process-level pause state and the registry of pause-aware countdowns.
#[derive(Clone)]
pub struct PauseCoordinator {
    inner: Arc<Inner>,
}

impl PauseCoordinator {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                registry: Mutex::new(RegistryState {
                    paused: false,
                    timers: HashMap::new(),
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn now(&self) -> Instant {
        self.inner.clock.now()
    }

    /// Start a countdown of `duration`. Pause-aware countdowns join the
    /// registry; one started while paused begins paused.
    pub fn start(&self, duration: Duration, pause_aware: bool) -> Countdown {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        if !pause_aware {
            let entry = TimerEntry {
                state: Mutex::new(TimerState::new(self.now(), duration)),
            };
            return Countdown {
                id,
                entry: Arc::new(entry),
                coordinator: Arc::clone(&self.inner),
                pause_aware: false,
                registered: AtomicBool::new(false),
            };
        }

        let mut registry = self.inner.registry();
        let now = self.now();
        let mut state = TimerState::new(now, duration);
        if registry.paused {
            state.pause(now);
        }
        let entry = Arc::new(TimerEntry {
            state: Mutex::new(state),
        });
        registry.timers.insert(id, Arc::clone(&entry));
        drop(registry);

        Countdown {
            id,
            entry,
            coordinator: Arc::clone(&self.inner),
            pause_aware: true,
            registered: AtomicBool::new(true),
        }
    }

    /// Pause every registered countdown. Returns how many were newly
    /// paused; a second call while paused does nothing.
    pub fn pause_all(&self) -> usize {
        self.sweep(&mut self.inner.registry(), true)
    }

    pub fn resume_all(&self) -> usize {
        self.sweep(&mut self.inner.registry(), false)
    }

    /// Flip the global pause state and return the new one.
    pub fn toggle_pause(&self) -> bool {
        let mut registry = self.inner.registry();
        let paused = !registry.paused;
        self.sweep(&mut registry, paused);
        paused
    }

    fn sweep(&self, registry: &mut RegistryState, paused: bool) -> usize {
        if registry.paused == paused {
            return 0;
        }
        registry.paused = paused;
        let now = self.now();
        let changed = registry
            .timers
            .values()
            .filter(|entry| {
                let mut state = entry.lock();
                if paused { state.pause(now) } else { state.unpause(now) }
            })
            .count();
        debug!(paused, timers = changed, "pause state swept");
        changed
    }

    pub fn is_paused(&self) -> bool {
        self.inner.registry().paused
    }

    /// Number of registered pause-aware countdowns.
    pub fn active_timers(&self) -> usize {
        self.inner.registry().timers.len()
    }
}

impl Default for PauseCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// One running countdown. Dropping it removes it from the registry.
pub struct Countdown {
    id: TimerId,
    entry: Arc<TimerEntry>,
    coordinator: Arc<Inner>,
    pause_aware: bool,
    registered: AtomicBool,
}

impl Countdown {
    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn is_pause_aware(&self) -> bool {
        self.pause_aware
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Pause this countdown alone. No-op when already paused.
    pub fn pause(&self) -> bool {
        let now = self.coordinator.clock.now();
        self.entry.lock().pause(now)
    }

    pub fn unpause(&self) -> bool {
        let now = self.coordinator.clock.now();
        self.entry.lock().unpause(now)
    }

    pub fn is_paused(&self) -> bool {
        self.entry.lock().paused_since.is_some()
    }

    /// Check the deadline. The first time this reports `true` the
    /// countdown leaves the registry.
    pub fn is_finished(&self) -> bool {
        let now = self.coordinator.clock.now();
        let finished = self.entry.lock().is_finished(now);
        if finished {
            self.unregister();
        }
        finished
    }

    pub fn remaining(&self) -> Duration {
        let now = self.coordinator.clock.now();
        self.entry.lock().remaining(now)
    }

    /// Counted time since start, excluding paused time.
    pub fn elapsed(&self) -> Duration {
        let now = self.coordinator.clock.now();
        self.entry.lock().elapsed(now)
    }

    /// Paused time accumulated so far, including a pause in progress.
    pub fn paused_total(&self) -> Duration {
        let now = self.coordinator.clock.now();
        let state = self.entry.lock();
        state.paused_total.saturating_add(state.ongoing_pause(now))
    }

    fn unregister(&self) {
        if self.registered.swap(false, Ordering::SeqCst) {
            self.coordinator.unregister(self.id);
        }
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manual() -> (ManualClock, PauseCoordinator) {
        let clock = ManualClock::new();
        let coordinator = PauseCoordinator::with_clock(Arc::new(clock.clone()));
        (clock, coordinator)
    }

    #[test]
    fn test_countdown_finishes_at_duration() {
        let (clock, coordinator) = manual();
        let countdown = coordinator.start(Duration::from_millis(1000), false);

        clock.advance(Duration::from_millis(999));
        assert!(!countdown.is_finished());
        assert_eq!(countdown.remaining(), Duration::from_millis(1));

        clock.advance(Duration::from_millis(1));
        assert!(countdown.is_finished());
        assert_eq!(countdown.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_unrepresentable_duration_never_finishes() {
        let (clock, coordinator) = manual();
        let aware = coordinator.start(Duration::MAX, true);
        let plain = coordinator.start(Duration::MAX, false);
        assert_eq!(coordinator.active_timers(), 1);

        clock.advance(Duration::from_secs(3600));
        assert_eq!(coordinator.pause_all(), 1);
        clock.advance(Duration::from_secs(60));
        assert_eq!(coordinator.resume_all(), 1);

        assert!(!aware.is_finished());
        assert!(!plain.is_finished());
        assert_eq!(aware.remaining(), Duration::MAX);
        assert_eq!(aware.paused_total(), Duration::from_secs(60));
        assert_eq!(aware.elapsed(), Duration::from_secs(3600));
    }

    #[test]
    fn test_pause_extends_pause_aware_countdown() {
        let (clock, coordinator) = manual();
        let aware = coordinator.start(Duration::from_millis(1000), true);
        let plain = coordinator.start(Duration::from_millis(1000), false);
        assert_eq!(coordinator.active_timers(), 1);

        clock.advance(Duration::from_millis(300));
        assert_eq!(coordinator.pause_all(), 1);
        clock.advance(Duration::from_millis(500));
        assert_eq!(aware.paused_total(), Duration::from_millis(500));
        assert_eq!(coordinator.resume_all(), 1);

        clock.advance(Duration::from_millis(200));
        assert!(plain.is_finished());
        assert!(!aware.is_finished());
        assert_eq!(aware.elapsed(), Duration::from_millis(500));

        clock.advance(Duration::from_millis(499));
        assert!(!aware.is_finished());
        clock.advance(Duration::from_millis(1));
        assert!(aware.is_finished());
    }

    #[test]
    fn test_double_pause_does_not_double_count() {
        let (clock, coordinator) = manual();
        let countdown = coordinator.start(Duration::from_millis(100), true);

        assert!(countdown.pause());
        clock.advance(Duration::from_millis(40));
        assert!(!countdown.pause());
        clock.advance(Duration::from_millis(60));
        assert!(countdown.unpause());
        assert!(!countdown.unpause());

        assert_eq!(countdown.paused_total(), Duration::from_millis(100));
        assert_eq!(countdown.remaining(), Duration::from_millis(100));
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let (_clock, coordinator) = manual();
        let _a = coordinator.start(Duration::from_secs(1), true);
        let _b = coordinator.start(Duration::from_secs(1), true);

        assert_eq!(coordinator.pause_all(), 2);
        assert_eq!(coordinator.pause_all(), 0);
        assert!(coordinator.is_paused());
        assert_eq!(coordinator.resume_all(), 2);
        assert_eq!(coordinator.resume_all(), 0);
        assert!(!coordinator.is_paused());
    }

    #[test]
    fn test_countdown_started_while_paused_begins_paused() {
        let (clock, coordinator) = manual();
        assert!(coordinator.toggle_pause());

        let countdown = coordinator.start(Duration::from_millis(100), true);
        assert!(countdown.is_paused());
        clock.advance(Duration::from_millis(250));
        assert!(!countdown.is_finished());

        assert!(!coordinator.toggle_pause());
        clock.advance(Duration::from_millis(100));
        assert!(countdown.is_finished());
    }

    #[test]
    fn test_finished_countdown_leaves_registry() {
        let (clock, coordinator) = manual();
        let countdown = coordinator.start(Duration::from_millis(10), true);
        assert!(countdown.is_registered());

        clock.advance(Duration::from_millis(10));
        assert!(countdown.is_finished());
        assert!(!countdown.is_registered());
        assert_eq!(coordinator.active_timers(), 0);

        // Pause events no longer reach it.
        coordinator.pause_all();
        clock.advance(Duration::from_millis(50));
        assert!(countdown.is_finished());
        assert_eq!(countdown.paused_total(), Duration::ZERO);
    }

    #[test]
    fn test_drop_unregisters() {
        let (_clock, coordinator) = manual();
        let countdown = coordinator.start(Duration::from_secs(5), true);
        assert_eq!(coordinator.active_timers(), 1);
        drop(countdown);
        assert_eq!(coordinator.active_timers(), 0);
    }

    #[test]
    fn test_concurrent_registration_during_sweeps() {
        let coordinator = PauseCoordinator::new();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = coordinator.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let countdown = coordinator.start(Duration::from_secs(60), true);
                        assert!(!countdown.is_finished());
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            coordinator.pause_all();
            coordinator.resume_all();
        }
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(coordinator.active_timers(), 0);
    }
}
