//! Scoped Timing Helpers
//!
//! Enter/exit constructs that run their exit action on every path,
//! including errors and panics.
//!
//! - [`ScopedTimer`]: elapsed wall-clock time of a block
//! - [`BufferSpan`]: idle padding around a block for cleaner averages

pub mod buffer;
pub mod timer;

pub use buffer::{BufferGuard, BufferSpan};
pub use timer::{ScopedTimer, TimerGuard, DEFAULT_MESSAGE};
