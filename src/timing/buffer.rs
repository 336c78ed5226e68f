//! Buffer Spans
//!
//! Fixed idle padding before and after a workload, so its steady-state
//! usage can be separated from start-up and tear-down in the usage log.

use std::thread;
use std::time::Duration;

use log::debug;

use crate::error::{require_non_negative, MonitorError};

/// Sleeps `buffer_time` on entry and again on exit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferSpan {
    buffer_time: Duration,
}

impl BufferSpan {
    /// Creates a span padding `buffer_time` seconds on each side.
    pub fn new(buffer_time: f64) -> Result<Self, MonitorError> {
        let secs = require_non_negative("buffer time", buffer_time)?;
        Ok(Self::from_duration(Duration::from_secs_f64(secs)))
    }

    pub fn from_duration(buffer_time: Duration) -> Self {
        Self { buffer_time }
    }

    pub fn buffer_time(&self) -> Duration {
        self.buffer_time
    }

    /// Blocks for the buffer time; the guard blocks again when dropped.
    pub fn enter(&self) -> BufferGuard {
        self.pad("entry");
        BufferGuard { span: *self }
    }

    /// Runs `work` between the two padding sleeps.
    pub fn run<T>(&self, work: impl FnOnce() -> T) -> T {
        let _guard = self.enter();
        work()
    }

    fn pad(&self, edge: &str) {
        if self.buffer_time.is_zero() {
            return;
        }
        debug!("Buffering {:?} on {}", self.buffer_time, edge);
        thread::sleep(self.buffer_time);
    }
}

/// Active span created by [`BufferSpan::enter`].
pub struct BufferGuard {
    span: BufferSpan,
}

impl Drop for BufferGuard {
    fn drop(&mut self) {
        self.span.pad("exit");
    }
}
