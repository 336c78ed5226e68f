//! Monitor Configuration
//!
//! Settings for a monitoring run, loadable from YAML.
//!
//! # Example YAML Format
//!
//! ```yaml
//! delay: 0.25
//! buffer: 1.0
//! gpu: true
//! gpu_device: 0
//! timer_message: Benchmark
//! output: results/usage.json
//! ```

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{require_non_negative, require_positive, MonitorError};
use crate::timing::DEFAULT_MESSAGE;

/// Default polling interval in seconds.
pub const DEFAULT_DELAY: f64 = 0.5;

/// Settings for one monitoring run. Missing fields take their defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Seconds between samples
    pub delay: f64,

    /// Seconds trimmed from each end of the log when averaging
    pub buffer: f64,

    /// Also sample GPU usage when a backend is available
    pub gpu: bool,

    /// Index of the GPU to sample
    pub gpu_device: usize,

    /// Label for the elapsed-time line; empty disables it
    pub timer_message: String,

    /// Where to write the JSON usage logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            buffer: 0.0,
            gpu: false,
            gpu_device: 0,
            timer_message: DEFAULT_MESSAGE.to_string(),
            output: None,
        }
    }
}

impl MonitorConfig {
    /// Rejects non-positive delays and negative buffers.
    pub fn validate(&self) -> Result<(), MonitorError> {
        require_positive("delay", self.delay)?;
        require_non_negative("buffer", self.buffer)?;
        Ok(())
    }
}

/// Loads and validates a configuration file.
///
/// # Example
///
/// ```rust,no_run
/// use usagemon::config::load_config;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_config("monitor.yaml")?;
///     println!("Sampling every {}s", config.delay);
///     Ok(())
/// }
/// ```
pub fn load_config(path: &str) -> Result<MonitorConfig, Box<dyn Error>> {
    info!("Loading configuration from: {}", path);

    let content = fs::read_to_string(path).map_err(|e| {
        format!(
            "Failed to read config file '{}': {}. Check that the file exists and is readable.",
            path, e
        )
    })?;

    debug!("Config content loaded ({} bytes)", content.len());

    let config: MonitorConfig = serde_yaml::from_str(&content)
        .map_err(|e| format!("Failed to parse config YAML: {}. Check the file format.", e))?;

    config.validate()?;
    Ok(config)
}
