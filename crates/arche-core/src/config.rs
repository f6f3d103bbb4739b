//! Device selection configuration.
//!
//! [`DeviceConfig`] is built either with the `with_*` methods or from the
//! environment:
//!
//! | Variable            | Meaning                                   |
//! |---------------------|-------------------------------------------|
//! | `ARCHE_DEVICE`      | `gpu`, `cpu` or `any`                     |
//! | `ARCHE_BACKENDS`    | comma-separated probe order (`wgpu,cpu`)  |
//! | `ARCHE_ADAPTER`     | substring the adapter name must contain   |
//! | `ARCHE_POWER`       | `high-performance` or `low-power`         |
//! | `ARCHE_CAPTURE_DIR` | directory for trace documents             |

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{Backend, DeviceKind, DeviceType};

/// Preference between GPU adapters when several match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    /// Prefer discrete GPUs.
    HighPerformance,
    /// Prefer integrated GPUs.
    LowPower,
}

impl PowerPreference {
    /// Sort rank of a device type, lower first.
    pub fn rank(self, device_type: DeviceType) -> u8 {
        match (self, device_type) {
            (PowerPreference::HighPerformance, DeviceType::DiscreteGpu) => 0,
            (PowerPreference::HighPerformance, DeviceType::IntegratedGpu) => 1,
            (PowerPreference::LowPower, DeviceType::IntegratedGpu) => 0,
            (PowerPreference::LowPower, DeviceType::DiscreteGpu) => 1,
            (_, DeviceType::VirtualGpu) => 2,
            _ => 3,
        }
    }
}

/// Configuration for opening a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Requested device kind.
    pub kind: DeviceKind,
    /// Backends to probe, in order.
    pub backends: Vec<Backend>,
    /// Only adapters whose name contains this (case-insensitive).
    pub adapter_name: Option<String>,
    /// Ordering among matching GPU adapters; `None` keeps probe order.
    pub power_preference: Option<PowerPreference>,
    /// Label used in logs and traces.
    pub label: Option<String>,
    /// Directory where trace documents are written.
    pub capture_dir: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            kind: DeviceKind::Any,
            backends: Backend::ALL.to_vec(),
            adapter_name: None,
            power_preference: None,
            label: None,
            capture_dir: None,
        }
    }
}

impl DeviceConfig {
    /// Config requesting `kind` with default probe order.
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Restrict and order the backends to probe.
    pub fn with_backends(mut self, backends: &[Backend]) -> Self {
        self.backends = backends.to_vec();
        self
    }

    /// Require the adapter name to contain `name`.
    pub fn with_adapter_name(mut self, name: impl Into<String>) -> Self {
        self.adapter_name = Some(name.into());
        self
    }

    /// Set the GPU power preference.
    pub fn with_power_preference(mut self, preference: PowerPreference) -> Self {
        self.power_preference = Some(preference);
        self
    }

    /// Set the device label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the trace document directory.
    pub fn with_capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.capture_dir = Some(dir.into());
        self
    }

    /// Whether an adapter name passes the name filter.
    pub fn accepts_name(&self, name: &str) -> bool {
        match &self.adapter_name {
            Some(filter) => name.to_lowercase().contains(&filter.to_lowercase()),
            None => true,
        }
    }

    /// Build a config from `ARCHE_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ARCHE_DEVICE") {
            match val.parse() {
                Ok(kind) => config.kind = kind,
                Err(e) => tracing::warn!("Ignoring ARCHE_DEVICE: {}", e),
            }
        }

        if let Ok(val) = std::env::var("ARCHE_BACKENDS") {
            let parsed: Result<Vec<Backend>, _> = val
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(str::parse)
                .collect();
            match parsed {
                Ok(list) if !list.is_empty() => config.backends = list,
                Ok(_) => tracing::warn!("Ignoring empty ARCHE_BACKENDS"),
                Err(e) => tracing::warn!("Ignoring ARCHE_BACKENDS: {}", e),
            }
        }

        if let Ok(val) = std::env::var("ARCHE_ADAPTER") {
            if !val.is_empty() {
                config.adapter_name = Some(val);
            }
        }

        if let Ok(val) = std::env::var("ARCHE_POWER") {
            match val.to_ascii_lowercase().as_str() {
                "high-performance" | "high" => {
                    config.power_preference = Some(PowerPreference::HighPerformance)
                }
                "low-power" | "low" => config.power_preference = Some(PowerPreference::LowPower),
                other => tracing::warn!("Ignoring ARCHE_POWER '{}'", other),
            }
        }

        if let Ok(val) = std::env::var("ARCHE_CAPTURE_DIR") {
            if !val.is_empty() {
                config.capture_dir = Some(PathBuf::from(val));
            }
        }

        config
    }
}
