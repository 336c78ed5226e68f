//! Usage Sources
//!
//! Injected capabilities the sampler polls: a monotonic clock and the
//! CPU/GPU utilization queries.
//!
//! # Components
//!
//! - [`Clock`]: monotonic timestamps in seconds
//! - [`UsageSource`]: one utilization reading per call
//! - [`CpuSource`]: per-core CPU usage via `sysinfo`
//! - [`GpuSource`]: single-device GPU usage, present only if a backend initialises

pub mod cpu;
pub mod gpu;

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::warn;

use crate::error::SourceError;
use crate::monitoring::Reading;

pub use cpu::CpuSource;
pub use gpu::{GpuBackend, GpuCapability, GpuSource, NvidiaSmi};

/// Supplies monotonic timestamps in seconds.
pub trait Clock: Send + Sync {
    /// Seconds elapsed since an arbitrary fixed origin; never decreases.
    fn now(&self) -> f64;
}

/// [`Clock`] backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a clock whose origin is the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Shared handle, the form the sampler and timer consume.
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// How a source's query relates to the sampling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// The query itself blocks for roughly `delay`, measuring usage over it
    SelfPaced,
    /// The query returns a snapshot immediately; the caller sleeps the interval
    Instant,
}

/// A utilization query the sampler drives once per iteration.
pub trait UsageSource: Send {
    /// Short label used in logs and exports.
    fn name(&self) -> &str;

    /// Whether [`UsageSource::sample`] already waits out the interval.
    fn pacing(&self) -> Pacing;

    /// Number of channels every reading carries (cores for CPU, 1 for GPU).
    fn channels(&self) -> usize;

    /// Takes one reading. Self-paced sources block for about `delay`.
    fn sample(&mut self, delay: Duration) -> Result<Reading, SourceError>;
}

impl<S: UsageSource + ?Sized> UsageSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn pacing(&self) -> Pacing {
        (**self).pacing()
    }

    fn channels(&self) -> usize {
        (**self).channels()
    }

    fn sample(&mut self, delay: Duration) -> Result<Reading, SourceError> {
        (**self).sample(delay)
    }
}

/// Sources available on this machine, detected once at startup.
pub struct Capabilities {
    /// CPU usage is always available
    pub cpu: CpuSource,
    /// GPU usage, if a backend could be initialised
    pub gpu: GpuCapability,
}

impl Capabilities {
    /// Probes the host. A missing GPU is reported, never an error.
    pub fn detect(gpu_device: usize) -> Self {
        let gpu = GpuCapability::detect(Box::new(NvidiaSmi::new()), gpu_device);
        if let GpuCapability::Unavailable { reason } = &gpu {
            warn!("GPU monitoring disabled: {}", reason);
        }

        Self {
            cpu: CpuSource::new(),
            gpu,
        }
    }

    /// True when a GPU source can be created.
    pub fn gpu_available(&self) -> bool {
        self.gpu.is_available()
    }
}
