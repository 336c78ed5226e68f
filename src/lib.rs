//! Usagemon - Background Resource Usage Sampler
//!
//! Periodically polls CPU (and optionally GPU) utilization on a background
//! thread, accumulates a time series, and summarises it with trimmed
//! averages. Scoped helpers time a block of work or pad it with idle
//! buffers so start-up and tear-down transients can be excluded.
//!
//! # Architecture
//!
//! - [`monitoring`]: the sampler, its usage log and exports
//! - [`source`]: clock and CPU/GPU usage capabilities
//! - [`timing`]: scoped timer and buffer spans
//! - [`config`]: run settings and YAML loading
//!
//! # Example
//!
//! ```rust,no_run
//! use usagemon::monitoring::Sampler;
//! use usagemon::timing::{BufferSpan, ScopedTimer};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut sampler = Sampler::new(0.1, 1.0)?;
//!     let buffer = BufferSpan::new(1.0)?;
//!     let mut timer = ScopedTimer::default();
//!
//!     sampler.run(|| {
//!         buffer.run(|| timer.measure(|| -> Result<(), std::io::Error> { Ok(()) }))
//!     })??;
//!
//!     sampler.join()?;
//!     println!("{}", sampler.summary()?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod monitoring;
pub mod source;
pub mod timing;

// Re-export commonly used types
pub use config::{load_config, MonitorConfig};
pub use error::{MonitorError, SourceError};
pub use monitoring::{Reading, Report, Sampler, UsageLog};
pub use source::{Capabilities, UsageSource};
pub use timing::{BufferSpan, ScopedTimer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "usagemon";
