//! Usage Monitoring Module
//!
//! Background sampling of CPU/GPU utilization into a time series.
//!
//! # Components
//!
//! - [`Sampler`]: background polling loop with start/stop lifecycle
//! - [`UsageLog`]: append-only timestamps and readings, with trimmed averages
//! - [`RunRecord`]: serialisable export of a finished run

pub mod record;
pub mod sampler;
pub mod usage_log;

pub use record::{write_records, RunRecord};
pub use sampler::{Sampler, SamplerScope, SamplerState};
pub use usage_log::{Reading, Report, Sample, UsageLog};
