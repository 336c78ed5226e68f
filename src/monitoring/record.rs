//! Run Records
//!
//! Serialisable snapshot of a finished sampler run, in the shape the
//! plotting tools consume.

use std::error::Error;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use crate::error::MonitorError;

use super::usage_log::{Report, UsageLog};
use super::sampler::Sampler;

/// One sampler's collected data plus its configuration.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    /// Wall-clock time the sampler started
    pub started_at: DateTime<Utc>,
    /// Source label ("cpu", "gpu", ...)
    pub source: String,
    /// Polling interval in seconds
    pub delay: f64,
    /// Trim applied at both ends when summarising
    pub buffer: f64,
    /// Timestamps and readings; truncated when `error` is set
    pub log: UsageLog,
    /// Trimmed averages, absent when the window holds no samples
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
    /// Why sampling ended early, if the source failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    /// Builds a record from a stopped sampler.
    ///
    /// A failed source still yields a record holding the samples taken
    /// before the failure; only a running sampler is rejected.
    pub fn from_sampler(sampler: &Sampler) -> Result<Self, MonitorError> {
        let log = sampler.partial_log()?;
        let error = sampler.failure().map(|e| {
            warn!("{} sampler ended early: {}", sampler.source_name(), e);
            e.to_string()
        });

        let report = match log.summary(sampler.buffer()) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("No summary for {} run: {}", sampler.source_name(), e);
                None
            }
        };

        Ok(Self {
            started_at: sampler.started_at(),
            source: sampler.source_name().to_string(),
            delay: sampler.delay().as_secs_f64(),
            buffer: sampler.buffer(),
            log,
            report,
            error,
        })
    }
}

/// Writes records as pretty-printed JSON.
pub fn write_records(path: impl AsRef<Path>, records: &[RunRecord]) -> Result<(), Box<dyn Error>> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(records)?;
    fs::write(path, json)
        .map_err(|e| format!("Failed to write usage log to '{}': {}", path.display(), e))?;

    info!("Saved {} usage log(s) to {}", records.len(), path.display());
    Ok(())
}
