//!
//! tether-timers
//!
//! Countdowns that can exclude paused time, a coordinator that pauses and
//! resumes every registered countdown in one sweep, and a timer thread
//! that turns expired countdowns into owner-thread work.
//!
//! ```ignore
//! let coordinator = PauseCoordinator::new();
//! let timers = TimerManager::new(dispatcher, coordinator.clone(), TimerConfig::default())?;
//! timers.set_timeout(Duration::from_secs(1), true, || refresh())?;
//! coordinator.pause_all();
//! ```
//!

pub mod clock;
pub mod countdown;
pub mod manager;

pub use clock::{Clock, ManualClock, SystemClock};
pub use countdown::{Countdown, PauseCoordinator, TimerId};
pub use manager::{
    DEFAULT_MAX_POLL, DEFAULT_TIMER_THREAD_NAME, TimerConfig, TimerError, TimerHandle,
    TimerManager,
};
