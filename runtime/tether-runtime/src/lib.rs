//!
//! tether-runtime
//!
//! Brings up the owner thread, the pause coordinator and the timer thread
//! from one `RuntimeConfig` and tears them down in the right order: timers
//! first so nothing new is dispatched, then the owner thread.
//!
//! ```ignore
//! let config = RuntimeConfig::load(Path::new("tether.toml"))?;
//! logging::init(&config.logging)?;
//! let runtime = Runtime::start(config)?;
//! let total = runtime.dispatcher().submit_and_fetch((2u32, 3u32), |(a, b)| a + b)?;
//! runtime.shutdown();
//! ```
//!

pub mod config;
pub mod errors;
pub mod logging;

use std::time::Duration;

use tracing::info;

use tether_core::{DispatchArgs, DispatchError};
use tether_threads::{Dispatcher, ExecutorStats, FailureReporter, OwnerThread};
use tether_timers::{PauseCoordinator, TimerManager};

pub use config::{ExecutorSection, LoggingConfig, RuntimeConfig, TimersSection};
pub use errors::{ConfigError, RuntimeError};

pub struct Runtime {
    // Field order is drop order: the timer thread must stop before the
    // owner thread it dispatches onto.
    timers: TimerManager,
    pause: PauseCoordinator,
    dispatcher: Dispatcher,
    owner: OwnerThread,
}

impl Runtime {
    pub fn start(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::start_inner(config, None)
    }

    /// Start with a callback that sees every failed fire-and-forget item.
    pub fn start_with_reporter(
        config: RuntimeConfig,
        reporter: FailureReporter,
    ) -> Result<Self, RuntimeError> {
        Self::start_inner(config, Some(reporter))
    }

    fn start_inner(
        config: RuntimeConfig,
        reporter: Option<FailureReporter>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        let mut executor = config.executor_config();
        executor.reporter = reporter;
        let owner = OwnerThread::spawn(executor)?;
        let dispatcher = owner.dispatcher();
        let pause = PauseCoordinator::new();
        let timers = TimerManager::new(dispatcher.clone(), pause.clone(), config.timer_config())?;

        info!(
            owner = %config.executor.thread_name,
            timers = %config.timers.thread_name,
            "runtime started"
        );
        Ok(Self {
            timers,
            pause,
            dispatcher,
            owner,
        })
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub fn pause(&self) -> &PauseCoordinator {
        &self.pause
    }

    pub fn timers(&self) -> &TimerManager {
        &self.timers
    }

    /// Submit `work` and wait at most `timeout` for its result. On timeout
    /// the item stays queued or keeps running; only the caller gives up.
    pub fn fetch_with_timeout<A, R, F>(
        &self,
        timeout: Duration,
        args: A,
        work: F,
    ) -> Result<R, DispatchError>
    where
        A: DispatchArgs,
        R: Send + 'static,
        F: FnOnce(A) -> R + Send + 'static,
    {
        if self.dispatcher.is_owner_thread() {
            return Err(DispatchError::WouldDeadlock);
        }
        self.dispatcher
            .fetch_handle(args, work)?
            .into_result_timeout(timeout)
    }

    /// Stop the timer thread, then stop and join the owner thread. Items
    /// still queued resolve as cancelled.
    pub fn shutdown(self) -> ExecutorStats {
        self.timers.shutdown();
        let stats = self.owner.close();
        info!(
            completed = stats.completed,
            failed = stats.failed,
            cancelled = stats.cancelled,
            "runtime stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tether_threads::FailureReport;

    #[test]
    fn test_start_and_shutdown() {
        let runtime = Runtime::start(RuntimeConfig::default()).unwrap();
        let sum = runtime
            .dispatcher()
            .submit_and_fetch((2u32, 3u32), |(a, b)| a + b)
            .unwrap();
        assert_eq!(sum, 5);

        let dispatcher = runtime.dispatcher();
        let stats = runtime.shutdown();
        assert_eq!(stats.completed, 1);
        assert!(dispatcher.is_stopped());
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let mut config = RuntimeConfig::default();
        config.timers.max_poll_ms = 0;
        assert!(matches!(
            Runtime::start(config),
            Err(RuntimeError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_fetch_with_timeout_gives_up_but_item_finishes() {
        let runtime = Runtime::start(RuntimeConfig::default()).unwrap();
        let finished = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&finished);
        let err = runtime
            .fetch_with_timeout(Duration::from_millis(50), (), move |()| {
                thread::sleep(Duration::from_millis(200));
                f.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap_err();
        assert!(matches!(err, DispatchError::TimedOut { .. }));

        runtime.dispatcher().flush().unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);

        let value = runtime
            .fetch_with_timeout(Duration::from_secs(1), (7u8,), |(x,)| x * 2)
            .unwrap();
        assert_eq!(value, 14);
    }

    #[test]
    fn test_reporter_sees_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter: FailureReporter = Arc::new(move |report: &FailureReport| {
            sink.lock().unwrap().push(report.error.clone());
        });

        let runtime = Runtime::start_with_reporter(RuntimeConfig::default(), reporter).unwrap();
        runtime
            .dispatcher()
            .submit((), |()| panic!("boom"))
            .unwrap();
        runtime.dispatcher().flush().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0], DispatchError::Panicked { .. }));
    }
}
