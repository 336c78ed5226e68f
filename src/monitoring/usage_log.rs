//! Usage Log
//!
//! The append-only time series a sampler produces, and the trimmed
//! averages computed over it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{require_non_negative, MonitorError, SourceError};

/// One utilization reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    /// Single percentage (GPU)
    Scalar(f64),
    /// One percentage per logical core (CPU)
    PerCore(Vec<f64>),
}

impl Reading {
    /// Channel values as a slice.
    pub fn values(&self) -> &[f64] {
        match self {
            Self::Scalar(value) => std::slice::from_ref(value),
            Self::PerCore(values) => values,
        }
    }

    /// Number of channels in this reading.
    pub fn channels(&self) -> usize {
        self.values().len()
    }

    /// Sum across channels (stacked usage).
    pub fn total(&self) -> f64 {
        self.values().iter().sum()
    }

    /// Checks the channel count and that every value is a percentage.
    pub fn validate(&self, expected_channels: usize) -> Result<(), SourceError> {
        if self.channels() != expected_channels {
            return Err(SourceError::ChannelMismatch {
                expected: expected_channels,
                found: self.channels(),
            });
        }

        match self
            .values()
            .iter()
            .find(|v| !(v.is_finite() && (0.0..=100.0).contains(*v)))
        {
            Some(bad) => Err(SourceError::OutOfRange(*bad)),
            None => Ok(()),
        }
    }
}

/// A reading taken `elapsed` seconds after the sampler started.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub elapsed: f64,
    pub reading: Reading,
}

impl Sample {
    pub fn new(elapsed: f64, reading: Reading) -> Self {
        Self { elapsed, reading }
    }
}

/// Insertion-ordered timestamps and readings of equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageLog {
    timestamps: Vec<f64>,
    readings: Vec<Reading>,
}

impl UsageLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample.
    ///
    /// Rejects samples that go back in time or change the channel count.
    pub fn push(&mut self, sample: Sample) -> Result<(), MonitorError> {
        if let Some(last) = self.last_elapsed() {
            if sample.elapsed < last {
                return Err(MonitorError::Range(format!(
                    "sample at {}s precedes last sample at {}s",
                    sample.elapsed, last
                )));
            }
        }

        if let Some(expected) = self.channels() {
            if sample.reading.channels() != expected {
                return Err(SourceError::ChannelMismatch {
                    expected,
                    found: sample.reading.channels(),
                }
                .into());
            }
        }

        self.timestamps.push(sample.elapsed);
        self.readings.push(sample.reading);
        Ok(())
    }

    /// Seconds since sampler start, one per sample.
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    /// Readings, parallel to [`UsageLog::timestamps`].
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Iterates `(elapsed, reading)` pairs in collection order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &Reading)> {
        self.timestamps.iter().copied().zip(self.readings.iter())
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Elapsed time of the most recent sample.
    pub fn last_elapsed(&self) -> Option<f64> {
        self.timestamps.last().copied()
    }

    /// Channel count shared by every reading, once the log is non-empty.
    pub fn channels(&self) -> Option<usize> {
        self.readings.first().map(Reading::channels)
    }

    /// Averages over samples with `trim < elapsed < last - trim`.
    ///
    /// Fails with [`MonitorError::Range`] when the log is empty, when
    /// `2 * trim` covers the whole run, or when no sample falls inside the
    /// window.
    pub fn summary(&self, trim: f64) -> Result<Report, MonitorError> {
        let trim = require_non_negative("trim", trim)?;
        let last = self
            .last_elapsed()
            .ok_or_else(|| MonitorError::Range("usage log is empty".to_string()))?;

        if 2.0 * trim >= last {
            return Err(MonitorError::Range(format!(
                "buffer time of {} too long for elapsed time of {}",
                2.0 * trim,
                last
            )));
        }

        let window_start = trim;
        let window_end = last - trim;
        let channels = self.channels().unwrap_or(0);

        let mut channel_sums = vec![0.0; channels];
        let mut total_sum = 0.0;
        let mut samples = 0usize;

        for (elapsed, reading) in self.iter() {
            if elapsed <= window_start || elapsed >= window_end {
                continue;
            }
            for (sum, value) in channel_sums.iter_mut().zip(reading.values()) {
                *sum += value;
            }
            total_sum += reading.total();
            samples += 1;
        }

        if samples == 0 {
            return Err(MonitorError::Range(format!(
                "no samples between {}s and {}s",
                window_start, window_end
            )));
        }

        let count = samples as f64;
        let channel_means: Vec<f64> = channel_sums.iter().map(|sum| sum / count).collect();
        let overall_mean = channel_means.iter().sum::<f64>() / channel_means.len() as f64;

        Ok(Report {
            samples,
            window_start,
            window_end,
            channel_means,
            overall_mean,
            total_mean: total_sum / count,
        })
    }
}

/// Trimmed averages over a [`UsageLog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Samples inside the window
    pub samples: usize,
    /// Exclusive lower bound of the window (seconds)
    pub window_start: f64,
    /// Exclusive upper bound of the window (seconds)
    pub window_end: f64,
    /// Mean per channel (per core, or the single GPU value)
    pub channel_means: Vec<f64>,
    /// Mean of the channel means
    pub overall_mean: f64,
    /// Mean of the per-sample channel sum
    pub total_mean: f64,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Usage Summary:")?;
        writeln!(
            f,
            "  Window: {:.2}s - {:.2}s ({} samples)",
            self.window_start, self.window_end, self.samples
        )?;
        writeln!(f, "  Average: {:.2}%", self.overall_mean)?;

        if self.channel_means.len() > 1 {
            writeln!(f, "  Total: {:.2}%", self.total_mean)?;
            for (i, mean) in self.channel_means.iter().enumerate() {
                writeln!(f, "  Core {:>3}: {:.2}%", i, mean)?;
            }
        }

        Ok(())
    }
}
