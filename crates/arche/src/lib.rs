//! # Arche
//!
//! Explicit GPU compute for Rust.
//!
//! Arche lets a program enumerate compute devices, allocate device memory,
//! compile WGSL compute kernels, sequence work on command streams and
//! capture traces of what ran. Nothing happens implicitly: data moves
//! through explicit copy commands and the host only sees results after a
//! stream is synchronized.
//!
//! ## Quick Start
//!
//! ```no_run
//! use arche::prelude::*;
//!
//! # fn main() -> arche::Result<()> {
//! let device = arche::create_device(DeviceKind::Any)?;
//! let stream = device.create_stream()?;
//! let kernel = device.create_kernel(
//!     r#"
//!     @group(0) @binding(0) var<storage, read_write> data: array<f32>;
//!
//!     @compute @workgroup_size(1)
//!     fn main() {
//!         data[0] = 10.0;
//!     }
//!     "#,
//!     "main",
//! )?;
//!
//! let input: Vec<f32> = (1..=10).map(|v| v as f32).collect();
//! let output = HostArray::zeros::<f32>(10);
//! let buffer = device.create_buffer_for::<f32>(10)?;
//!
//! stream.dispatch([
//!     buffer.copy_from(&HostArray::from_slice(&input))?,
//!     kernel.launch_thread_groups([1, 1, 1], [1, 1, 1], &[&buffer])?,
//!     buffer.copy_to(&output)?,
//! ])?;
//! stream.synchronize()?;
//!
//! assert_eq!(output.to_vec::<f32>()?[0], 10.0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! - **CPU** - host interpreter for WGSL (`cpu` feature, on by default)
//! - **WebGPU** - Vulkan, Metal, DX12 and GL through wgpu (`wgpu` feature)
//!
//! ```toml
//! [dependencies]
//! arche = { version = "0.1", features = ["wgpu"] }
//! ```
//!
//! Backends are probed in the order of [`DeviceConfig::backends`], which
//! defaults to wgpu first, then the host interpreter.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(hidden_glob_reexports)]

pub use arche_core::*;

#[cfg(feature = "cpu")]
pub use arche_cpu::CpuProvider;

#[cfg(feature = "wgpu")]
pub use arche_wgpu::WgpuProvider;

use arche_core::backend::DeviceProvider;
use tracing::debug;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{create_device, create_device_with, enumerate_devices};
    pub use arche_core::prelude::*;
}

/// Providers for every backend compiled into this build.
pub fn providers() -> Vec<Box<dyn DeviceProvider>> {
    let mut providers: Vec<Box<dyn DeviceProvider>> = Vec::new();

    #[cfg(feature = "wgpu")]
    providers.push(Box::new(arche_wgpu::WgpuProvider::new()));

    #[cfg(feature = "cpu")]
    providers.push(Box::new(arche_cpu::CpuProvider::new()));

    debug!(
        backends = ?providers.iter().map(|p| p.backend()).collect::<Vec<_>>(),
        "Backend providers"
    );
    providers
}

/// Open the first device of `kind` among the compiled-in backends.
///
/// Fails with [`ArcheError::NoDeviceFound`] when nothing matches.
pub fn create_device(kind: DeviceKind) -> Result<Device> {
    create_device_with(&DeviceConfig::new(kind))
}

/// Open the first device matching `config`.
pub fn create_device_with(config: &DeviceConfig) -> Result<Device> {
    Device::create(&providers(), config)
}

/// Adapters matching `config`, in the order `create_device_with` would try them.
pub fn enumerate_devices(config: &DeviceConfig) -> Vec<DeviceInfo> {
    Device::enumerate(&providers(), config)
}

/// Backend availability checks.
pub mod availability {
    /// Check if the host interpreter backend is compiled in.
    pub fn cpu() -> bool {
        cfg!(feature = "cpu")
    }

    /// Check if a wgpu adapter is reachable.
    pub fn wgpu() -> bool {
        #[cfg(feature = "wgpu")]
        {
            arche_wgpu::is_wgpu_available()
        }
        #[cfg(not(feature = "wgpu"))]
        {
            false
        }
    }
}
