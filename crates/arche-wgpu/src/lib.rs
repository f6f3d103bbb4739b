//! WebGPU backend for Arche.
//!
//! Runs WGSL compute kernels on any adapter wgpu can reach (Vulkan, Metal,
//! DX12, GL).
//!
//! # Backend notes
//!
//! - One wgpu device and queue per opened device; all streams share the
//!   queue and each batch is one command buffer.
//! - Copies must start at and cover whole 4-byte words; other copies are
//!   rejected with `InvalidArgument` when dispatched. The host backend has
//!   no such rule, so portable code copies whole words.
//! - Inline arguments are uploaded into small uniform buffers per launch.
//! - A batch that fails driver validation is not submitted and `dispatch`
//!   returns `InvalidArgument`; the device stays usable.
//! - Counters need `TIMESTAMP_QUERY`;
//!   without them `create_counter` fails with `BackendUnavailable`.
//! - Errors raised outside a validation scope are terminal and surface as
//!   `DeviceLost`.
//!
//! # Example
//!
//! ```ignore
//! use arche_core::{Device, DeviceConfig, DeviceKind};
//! use arche_wgpu::WgpuProvider;
//!
//! let providers: Vec<Box<dyn arche_core::backend::DeviceProvider>> =
//!     vec![Box::new(WgpuProvider::new())];
//! let device = Device::create(&providers, &DeviceConfig::new(DeviceKind::Gpu))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod adapter;
mod counter;
mod memory;
mod shader;
mod stream;

pub use adapter::{is_wgpu_available, WgpuDevice, WgpuProvider, WgpuShared};
pub use counter::{WgpuCounter, TIMESTAMP_FEATURES};
pub use memory::{WgpuBuffer, COPY_ALIGNMENT};
pub use shader::WgpuKernel;
pub use stream::WgpuStream;
