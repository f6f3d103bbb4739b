//! Host interpreter backend for Arche.
//!
//! Runs validated WGSL compute kernels directly on the naga IR, without a
//! GPU driver. It is the fallback device when no adapter is present and
//! the reference backend in tests.
//!
//! # Execution model
//!
//! - Each stream has one worker thread; batches execute in submission order.
//! - A launch runs its invocations one after another, group by group.
//! - Buffer memory uses the module's own layout, so results are
//!   byte-identical to what a GPU would produce for the same bindings.
//! - Out-of-bounds loads read zero and out-of-bounds stores are dropped.
//! - Counter samples read the host clock when they execute.
//!
//! Kernels that need invocations to run together (workgroup barriers,
//! atomics) are rejected with `CompilationError` when they are built.
//!
//! # Example
//!
//! ```ignore
//! use arche_core::{Device, DeviceConfig, DeviceKind};
//! use arche_cpu::CpuProvider;
//!
//! let providers: Vec<Box<dyn arche_core::backend::DeviceProvider>> =
//!     vec![Box::new(CpuProvider::new())];
//! let device = Device::create(&providers, &DeviceConfig::new(DeviceKind::Cpu))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod interp;
mod kernel;
mod memory;
mod runtime;
mod stream;

pub use kernel::CpuKernel;
pub use memory::CpuBuffer;
pub use runtime::{CpuCounter, CpuDevice, CpuProvider, ADAPTER_NAME};
pub use stream::CpuStream;
