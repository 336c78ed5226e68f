//! Scoped Timer
//!
//! Measures the wall-clock duration of a block of work.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::source::{Clock, MonotonicClock};

/// Default label printed with the elapsed time.
pub const DEFAULT_MESSAGE: &str = "Time elapsed";

/// Measures how long a scope takes.
///
/// The elapsed time is logged with `message` when the scope exits. An
/// empty message suppresses the output. Scopes that end through an error
/// or a panic are logged as ended abruptly.
///
/// # Example
///
/// ```rust
/// use usagemon::timing::ScopedTimer;
///
/// let mut timer = ScopedTimer::new("Summing");
/// let total: Result<u64, String> = timer.measure(|| Ok((0..1000u64).sum()));
///
/// assert_eq!(total, Ok(499500));
/// assert!(timer.elapsed().is_some());
/// ```
pub struct ScopedTimer {
    message: String,
    clock: Arc<dyn Clock>,
    start_time: Option<f64>,
    end_time: Option<f64>,
    elapsed: Option<Duration>,
    abrupt: bool,
}

impl ScopedTimer {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            clock: MonotonicClock::shared(),
            start_time: None,
            end_time: None,
            elapsed: None,
            abrupt: false,
        }
    }

    /// Timer that records but never logs.
    pub fn silent() -> Self {
        Self::new("")
    }

    /// Replaces the clock used for start and end times.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Starts timing; the returned guard stops it when dropped.
    pub fn enter(&mut self) -> TimerGuard<'_> {
        self.start_time = Some(self.clock.now());
        self.end_time = None;
        self.elapsed = None;
        self.abrupt = false;
        TimerGuard {
            timer: self,
            failed: false,
        }
    }

    /// Times `work`. Errors are returned unchanged after timing completes.
    pub fn measure<T, E>(&mut self, work: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let mut guard = self.enter();
        let result = work();
        if result.is_err() {
            guard.fail();
        }
        result
    }

    /// Duration of the last completed scope; `None` until it exits.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<f64> {
        self.end_time
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the last scope ended through an error or a panic.
    pub fn ended_abruptly(&self) -> bool {
        self.abrupt
    }

    /// Line logged on exit (`message: seconds`), or `None` if suppressed
    /// or not yet exited.
    pub fn summary_line(&self) -> Option<String> {
        let elapsed = self.elapsed?;
        if self.message.is_empty() {
            return None;
        }

        let prefix = if self.abrupt { "(ended abruptly) " } else { "" };
        Some(format!(
            "{}{}: {:.6}",
            prefix,
            self.message,
            elapsed.as_secs_f64()
        ))
    }

    fn exit(&mut self, abrupt: bool) {
        let end = self.clock.now();
        let start = self.start_time.unwrap_or(end);

        self.end_time = Some(end);
        self.elapsed = Some(Duration::from_secs_f64((end - start).max(0.0)));
        self.abrupt = abrupt;

        if let Some(line) = self.summary_line() {
            if abrupt {
                warn!("{}", line);
            } else {
                info!("{}", line);
            }
        }
    }
}

impl Default for ScopedTimer {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE)
    }
}

/// Active timing scope created by [`ScopedTimer::enter`].
pub struct TimerGuard<'a> {
    timer: &'a mut ScopedTimer,
    failed: bool,
}

impl TimerGuard<'_> {
    /// Marks the scope as ending through a failure.
    pub fn fail(&mut self) {
        self.failed = true;
    }
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        let abrupt = self.failed || thread::panicking();
        self.timer.exit(abrupt);
    }
}
