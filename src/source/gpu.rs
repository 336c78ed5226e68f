//! GPU Usage Source
//!
//! Optional capability: a GPU source exists only if a backend initialises
//! successfully and the requested device is present. Absence is a normal,
//! reportable state.
//!
//! # Backend Resolution
//!
//! The `nvidia-smi` binary is resolved in the following order:
//! 1. `USAGEMON_NVIDIA_SMI` environment variable
//! 2. System PATH

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use log::{debug, info};
use once_cell::sync::Lazy;

use crate::error::{MonitorError, SourceError};
use crate::monitoring::Reading;

use super::{Pacing, UsageSource};

/// Lazily-resolved path to `nvidia-smi`, if one can be found.
pub static NVIDIA_SMI_PATH: Lazy<Option<PathBuf>> = Lazy::new(|| {
    if let Ok(path) = std::env::var("USAGEMON_NVIDIA_SMI") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("Using nvidia-smi from USAGEMON_NVIDIA_SMI: {}", path.display());
            return Some(path);
        }
    }

    if let Ok(output) = Command::new("which").arg("nvidia-smi").output() {
        if output.status.success() {
            let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path_str.is_empty() {
                debug!("Using system nvidia-smi: {}", path_str);
                return Some(PathBuf::from(path_str));
            }
        }
    }

    debug!("nvidia-smi not found");
    None
});

/// Driver-level GPU query primitive.
pub trait GpuBackend: Send {
    /// Backend label used in logs.
    fn name(&self) -> &str;

    /// Prepares the backend and returns the number of visible devices.
    fn initialize(&mut self) -> Result<usize, String>;

    /// Instantaneous utilization of `device` in percent.
    fn utilization(&mut self, device: usize) -> Result<f64, SourceError>;
}

/// [`GpuBackend`] that shells out to NVIDIA's `nvidia-smi`.
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    path: Option<PathBuf>,
}

impl NvidiaSmi {
    /// Uses the lazily-resolved system binary.
    pub fn new() -> Self {
        Self {
            path: NVIDIA_SMI_PATH.clone(),
        }
    }

    /// Uses a specific `nvidia-smi` executable.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    fn query(&self, args: &[&str]) -> Result<String, String> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| "nvidia-smi not found".to_string())?;

        let output = Command::new(path)
            .args(args)
            .output()
            .map_err(|e| format!("failed to run {}: {}", path.display(), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                path.display(),
                output.status,
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for NvidiaSmi {
    fn name(&self) -> &str {
        "nvidia-smi"
    }

    fn initialize(&mut self) -> Result<usize, String> {
        let stdout = self.query(&["--query-gpu=index", "--format=csv,noheader"])?;
        Ok(stdout.lines().filter(|line| !line.trim().is_empty()).count())
    }

    fn utilization(&mut self, device: usize) -> Result<f64, SourceError> {
        let id = format!("--id={}", device);
        let stdout = self
            .query(&[
                "--query-gpu=utilization.gpu",
                "--format=csv,noheader,nounits",
                id.as_str(),
            ])
            .map_err(|e| SourceError::backend("nvidia-smi", e))?;

        let line = stdout.lines().next().unwrap_or("").trim();
        line.parse::<f64>().map_err(|_| {
            SourceError::backend("nvidia-smi", format!("unparseable utilization '{}'", line))
        })
    }
}

/// Single-device GPU usage. Readings are instantaneous snapshots.
pub struct GpuSource {
    backend: Box<dyn GpuBackend>,
    device: usize,
}

impl GpuSource {
    /// Index of the monitored device.
    pub fn device(&self) -> usize {
        self.device
    }
}

impl UsageSource for GpuSource {
    fn name(&self) -> &str {
        "gpu"
    }

    fn pacing(&self) -> Pacing {
        Pacing::Instant
    }

    fn channels(&self) -> usize {
        1
    }

    fn sample(&mut self, _delay: Duration) -> Result<Reading, SourceError> {
        let value = self.backend.utilization(self.device)?;
        Ok(Reading::Scalar(value))
    }
}

/// Result of probing for a GPU backend.
pub enum GpuCapability {
    /// Backend initialised and the device exists
    Available(GpuSource),
    /// No usable backend; `reason` says why
    Unavailable { reason: String },
}

impl GpuCapability {
    /// Initialises `backend` and checks that `device` exists. Never fails.
    pub fn detect(mut backend: Box<dyn GpuBackend>, device: usize) -> Self {
        match backend.initialize() {
            Ok(count) if device < count => {
                info!(
                    "GPU monitoring available via {} (device {} of {})",
                    backend.name(),
                    device,
                    count
                );
                Self::Available(GpuSource { backend, device })
            }
            Ok(count) => Self::Unavailable {
                reason: format!(
                    "{} reports {} device(s), device {} requested",
                    backend.name(),
                    count,
                    device
                ),
            },
            Err(reason) => Self::Unavailable { reason },
        }
    }

    /// Whether a GPU source can be obtained.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    /// Converts into the source, or a `CapabilityUnavailable` error.
    pub fn into_source(self) -> Result<GpuSource, MonitorError> {
        match self {
            Self::Available(source) => Ok(source),
            Self::Unavailable { reason } => Err(MonitorError::CapabilityUnavailable(format!(
                "GPU: {}",
                reason
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubBackend {
        devices: Result<usize, String>,
        load: f64,
    }

    impl GpuBackend for StubBackend {
        fn name(&self) -> &str {
            "stub"
        }

        fn initialize(&mut self) -> Result<usize, String> {
            self.devices.clone()
        }

        fn utilization(&mut self, _device: usize) -> Result<f64, SourceError> {
            Ok(self.load)
        }
    }

    fn stub(devices: Result<usize, String>) -> Box<dyn GpuBackend> {
        Box::new(StubBackend { devices, load: 37.5 })
    }

    #[test]
    fn test_unavailable_backend_is_not_an_error() {
        let cap = GpuCapability::detect(stub(Err("no driver".to_string())), 0);
        assert!(!cap.is_available());

        match cap.into_source() {
            Err(MonitorError::CapabilityUnavailable(msg)) => assert!(msg.contains("no driver")),
            _ => panic!("expected CapabilityUnavailable"),
        }
    }

    #[test]
    fn test_missing_device_is_unavailable() {
        let cap = GpuCapability::detect(stub(Ok(1)), 2);
        assert!(!cap.is_available());
    }

    #[test]
    fn test_available_source_reads_scalar() {
        let cap = GpuCapability::detect(stub(Ok(2)), 1);
        assert!(cap.is_available());

        let mut source = cap.into_source().unwrap();
        assert_eq!(source.device(), 1);
        assert_eq!(source.pacing(), Pacing::Instant);
        assert_eq!(source.channels(), 1);
        assert_eq!(
            source.sample(Duration::from_secs(1)).unwrap(),
            Reading::Scalar(37.5)
        );
    }

    #[test]
    fn test_nvidia_smi_missing_binary() {
        let mut backend = NvidiaSmi::with_path("/nonexistent/nvidia-smi");
        assert!(backend.initialize().is_err());

        let cap = GpuCapability::detect(Box::new(backend), 0);
        assert!(!cap.is_available());
    }

    #[cfg(unix)]
    #[test]
    fn test_nvidia_smi_parses_output() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let script = dir.path().join("nvidia-smi");
        fs::write(
            &script,
            "#!/bin/sh\ncase \"$1\" in\n  --query-gpu=index) printf '0\\n1\\n' ;;\n  *) printf '42\\n' ;;\nesac\n",
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut backend = NvidiaSmi::with_path(&script);
        assert_eq!(backend.initialize(), Ok(2));
        assert_eq!(backend.utilization(1), Ok(42.0));
    }
}
