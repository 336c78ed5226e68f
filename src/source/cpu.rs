//! CPU Usage Source
//!
//! Per-logical-core utilization measured over the sampling interval.

use std::thread;
use std::time::Duration;

use log::debug;
use sysinfo::System;

use crate::error::SourceError;
use crate::monitoring::Reading;

use super::{Pacing, UsageSource};

/// Per-core CPU usage backed by `sysinfo`.
///
/// Each call to [`UsageSource::sample`] refreshes the counters, waits for
/// `delay`, and refreshes again, so the reading reflects usage *during*
/// the interval. Intervals shorter than
/// [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`] produce coarse readings.
pub struct CpuSource {
    system: System,
    cores: usize,
}

impl CpuSource {
    /// Creates a source for all logical cores of this machine.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        let cores = system.cpus().len();
        debug!("CPU source initialised with {} logical cores", cores);

        Self { system, cores }
    }
}

impl Default for CpuSource {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageSource for CpuSource {
    fn name(&self) -> &str {
        "cpu"
    }

    fn pacing(&self) -> Pacing {
        Pacing::SelfPaced
    }

    fn channels(&self) -> usize {
        self.cores
    }

    fn sample(&mut self, delay: Duration) -> Result<Reading, SourceError> {
        self.system.refresh_cpu_usage();
        thread::sleep(delay);
        self.system.refresh_cpu_usage();

        let usage: Vec<f64> = self
            .system
            .cpus()
            .iter()
            .map(|cpu| f64::from(cpu.cpu_usage()).clamp(0.0, 100.0))
            .collect();

        if usage.is_empty() {
            return Err(SourceError::backend("sysinfo", "no CPUs reported"));
        }

        if usage.len() != self.cores {
            return Err(SourceError::ChannelMismatch {
                expected: self.cores,
                found: usage.len(),
            });
        }

        Ok(Reading::PerCore(usage))
    }
}
