//! Device identity and dispatch dimension types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ArcheError;

/// Kind of device requested from `create_device`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Any GPU adapter (discrete, integrated or virtual).
    Gpu,
    /// A CPU device.
    Cpu,
    /// Whatever is available, GPUs preferred.
    #[default]
    Any,
}

impl DeviceKind {
    /// Whether a device of `device_type` satisfies this request.
    pub fn matches(self, device_type: DeviceType) -> bool {
        match self {
            DeviceKind::Gpu => device_type.is_gpu(),
            DeviceKind::Cpu => device_type == DeviceType::Cpu,
            DeviceKind::Any => true,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Gpu => write!(f, "gpu"),
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Any => write!(f, "any"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = ArcheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpu" => Ok(DeviceKind::Gpu),
            "cpu" => Ok(DeviceKind::Cpu),
            "any" | "auto" => Ok(DeviceKind::Any),
            other => Err(ArcheError::InvalidConfig(format!(
                "unknown device kind '{}'",
                other
            ))),
        }
    }
}

/// What an opened device actually is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Dedicated GPU.
    DiscreteGpu,
    /// GPU sharing memory with the host.
    IntegratedGpu,
    /// Virtualized GPU.
    VirtualGpu,
    /// CPU or software rasterizer.
    Cpu,
    /// Unknown.
    Other,
}

impl DeviceType {
    /// Whether this is one of the GPU types.
    pub fn is_gpu(self) -> bool {
        matches!(
            self,
            DeviceType::DiscreteGpu | DeviceType::IntegratedGpu | DeviceType::VirtualGpu
        )
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::DiscreteGpu => "discrete GPU",
            DeviceType::IntegratedGpu => "integrated GPU",
            DeviceType::VirtualGpu => "virtual GPU",
            DeviceType::Cpu => "CPU",
            DeviceType::Other => "other",
        };
        f.write_str(name)
    }
}

/// Execution backends known to Arche.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Host interpreter backend.
    Cpu,
    /// WebGPU backend via wgpu (Vulkan, Metal, DX12, GL).
    Wgpu,
}

impl Backend {
    /// Default probe order.
    pub const ALL: [Backend; 2] = [Backend::Wgpu, Backend::Cpu];

    /// Short lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Cpu => "cpu",
            Backend::Wgpu => "wgpu",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ArcheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" | "host" => Ok(Backend::Cpu),
            "wgpu" | "webgpu" => Ok(Backend::Wgpu),
            other => Err(ArcheError::InvalidConfig(format!(
                "unknown backend '{}'",
                other
            ))),
        }
    }
}

/// Resource limits of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLimits {
    /// Largest buffer in bytes.
    pub max_buffer_size: u64,
    /// Largest grid extent in any dimension.
    pub max_workgroups_per_dimension: u32,
    /// Largest group extent per dimension.
    pub max_workgroup_size: [u32; 3],
    /// Largest number of invocations in one group.
    pub max_invocations_per_workgroup: u32,
    /// Required alignment of bound buffer view offsets.
    pub min_storage_buffer_offset_alignment: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_buffer_size: 256 << 20,
            max_workgroups_per_dimension: 65_535,
            max_workgroup_size: [256, 256, 64],
            max_invocations_per_workgroup: 256,
            min_storage_buffer_offset_alignment: 256,
        }
    }
}

/// Identity of one adapter as reported by its backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable adapter name.
    pub name: String,
    /// Device type.
    pub device_type: DeviceType,
    /// Backend that exposes this adapter.
    pub backend: Backend,
    /// PCI vendor id, 0 when unknown.
    pub vendor: u32,
    /// Driver or API description.
    pub driver: String,
    /// Index of the adapter within its backend.
    pub index: usize,
    /// Resource limits.
    pub limits: DeviceLimits,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {}#{})",
            self.name, self.device_type, self.backend, self.index
        )
    }
}

/// Three-dimensional extent used for grids and thread groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dim3 {
    /// X extent.
    pub x: u32,
    /// Y extent.
    pub y: u32,
    /// Z extent.
    pub z: u32,
}

impl Dim3 {
    /// Create a new extent.
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Extent as an array.
    pub const fn to_array(self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }

    /// Product of all dimensions.
    pub fn volume(self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }

    /// Whether any dimension is zero.
    pub fn has_zero(self) -> bool {
        self.x == 0 || self.y == 0 || self.z == 0
    }
}

impl Default for Dim3 {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

impl fmt::Display for Dim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl From<[u32; 3]> for Dim3 {
    fn from(v: [u32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<(u32, u32, u32)> for Dim3 {
    fn from(v: (u32, u32, u32)) -> Self {
        Self::new(v.0, v.1, v.2)
    }
}

impl From<u32> for Dim3 {
    fn from(x: u32) -> Self {
        Self::new(x, 1, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matching() {
        assert!(DeviceKind::Gpu.matches(DeviceType::DiscreteGpu));
        assert!(DeviceKind::Gpu.matches(DeviceType::VirtualGpu));
        assert!(!DeviceKind::Gpu.matches(DeviceType::Cpu));
        assert!(DeviceKind::Cpu.matches(DeviceType::Cpu));
        assert!(!DeviceKind::Cpu.matches(DeviceType::Other));
        assert!(DeviceKind::Any.matches(DeviceType::Other));
    }

    #[test]
    fn test_parse() {
        assert_eq!("GPU".parse::<DeviceKind>().unwrap(), DeviceKind::Gpu);
        assert_eq!("webgpu".parse::<Backend>().unwrap(), Backend::Wgpu);
        assert!("cuda".parse::<Backend>().is_err());
    }

    #[test]
    fn test_dim3() {
        let d: Dim3 = [4, 2, 1].into();
        assert_eq!(d.volume(), 8);
        assert!(!d.has_zero());
        assert!(Dim3::new(1, 0, 1).has_zero());
        assert_eq!(Dim3::from(16), Dim3::new(16, 1, 1));
    }
}
