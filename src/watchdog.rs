//! Periodic background task runner.
//!
//! A [`Watchdog`] owns one tokio task that repeatedly runs a caller-supplied
//! action and then sleeps for the configured interval. The interval can be
//! changed while the loop is running; setting it to zero (or calling
//! [`Watchdog::stop`]) ends the loop before its next action. A stopped
//! watchdog cannot be restarted.
//!
//! Failures of the action never end the loop. Errors are logged at `warn`,
//! panics are caught and logged at `error`, and the next cycle runs on
//! schedule.

use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

type BoxedTask = Box<dyn FnMut() -> BoxFuture<'static, Result<(), String>> + Send>;

/// Static settings evaluated when a [`Watchdog`] is created.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WatchdogConfig {
    /// Delay between actions. Zero disables the watchdog.
    pub interval: Duration,
    /// Start the loop immediately on construction.
    pub autostart: bool,
}

impl WatchdogConfig {
    /// Builds a config from a signed number of seconds.
    ///
    /// Zero, negative and non-finite values produce a disabled interval.
    /// Values too large for a [`Duration`] saturate to [`Duration::MAX`].
    pub fn from_secs_f64(interval_sec: f64, autostart: bool) -> Self {
        Self {
            interval: interval_from_secs(interval_sec),
            autostart,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            autostart: false,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WatchdogError {
    /// `start` was called on a watchdog whose loop already ran or is running.
    #[error("watchdog {0} was already started")]
    AlreadyStarted(String),

    /// No tokio runtime is available on the calling thread.
    #[error("watchdog {0} requires a tokio runtime")]
    NoRuntime(String),
}

/// Owned periodic scheduler.
///
/// Dropping the watchdog stops it with the same latency as [`stop`](Self::stop):
/// an action that is already executing or a sleep already in progress runs
/// to completion first.
pub struct Watchdog {
    name: Arc<str>,
    interval_ms: Arc<AtomicU64>,
    task: Option<BoxedTask>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Creates a watchdog that runs `task` once per interval.
    ///
    /// When `config.autostart` is set the loop is spawned before returning,
    /// which requires a tokio runtime.
    pub fn new<F, Fut, E>(
        name: impl Into<String>,
        config: WatchdogConfig,
        mut task: F,
    ) -> Result<Self, WatchdogError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let boxed: BoxedTask = Box::new(move || {
            let fut = task();
            async move { fut.await.map_err(|err| err.to_string()) }.boxed()
        });

        let mut watchdog = Self {
            name: Arc::from(name.into()),
            interval_ms: Arc::new(AtomicU64::new(duration_to_ms(config.interval))),
            task: Some(boxed),
            handle: None,
        };

        if config.autostart {
            watchdog.start()?;
        }
        Ok(watchdog)
    }

    /// Creates a watchdog whose only action is a heartbeat log line.
    pub fn idle(name: impl Into<String>, config: WatchdogConfig) -> Result<Self, WatchdogError> {
        Self::new(name, config, || async { Ok::<(), String>(()) })
    }

    /// Spawns the background loop.
    pub fn start(&mut self) -> Result<(), WatchdogError> {
        let Some(task) = self.task.take() else {
            return Err(WatchdogError::AlreadyStarted(self.name.to_string()));
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                self.task = Some(task);
                return Err(WatchdogError::NoRuntime(self.name.to_string()));
            }
        };

        let name = Arc::clone(&self.name);
        let interval_ms = Arc::clone(&self.interval_ms);
        self.handle = Some(runtime.spawn(run_loop(name, interval_ms, task)));
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current interval. Zero means the loop exits before its next action.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Acquire))
    }

    /// Changes the interval; takes effect from the next cycle.
    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms
            .store(duration_to_ms(interval), Ordering::Release);
    }

    /// Signed-seconds variant of [`set_interval`](Self::set_interval).
    pub fn set_interval_secs(&self, interval_sec: f64) {
        self.set_interval(interval_from_secs(interval_sec));
    }

    /// Permanently halts the loop before its next action.
    pub fn stop(&self) {
        self.set_interval(Duration::ZERO);
    }

    /// Returns `true` once the loop was spawned and has exited.
    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| handle.is_finished())
    }

    /// Returns `true` while the loop is spawned and has not exited.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                debug!(
                    event = "watchdog_join_failed",
                    name = %self.name,
                    cancelled = err.is_cancelled(),
                    error = %err
                );
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("name", &self.name)
            .field("interval", &self.interval())
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run_loop(name: Arc<str>, interval_ms: Arc<AtomicU64>, mut task: BoxedTask) {
    loop {
        let interval = Duration::from_millis(interval_ms.load(Ordering::Acquire));
        if interval.is_zero() {
            debug!(event = "watchdog_disabled", name = %name);
            break;
        }

        debug!(
            event = "watchdog_tick",
            name = %name,
            interval_ms = interval.as_millis() as u64
        );
        match AssertUnwindSafe(async { task().await }).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(event = "watchdog_task_failed", name = %name, error = %err);
            }
            Err(panic) => {
                error!(
                    event = "watchdog_task_panicked",
                    name = %name,
                    panic = panic_message(panic.as_ref())
                );
            }
        }

        tokio::time::sleep(interval).await;
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

fn interval_from_secs(interval_sec: f64) -> Duration {
    if interval_sec.is_finite() && interval_sec > 0.0 {
        Duration::try_from_secs_f64(interval_sec).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

fn duration_to_ms(interval: Duration) -> u64 {
    let ms = interval.as_millis().min(u64::MAX as u128) as u64;
    // Sub-millisecond intervals would otherwise read back as "disabled".
    if ms == 0 && !interval.is_zero() {
        1
    } else {
        ms
    }
}
