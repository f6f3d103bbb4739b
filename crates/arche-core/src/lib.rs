//! # Arche Core
//!
//! Backend-independent execution model for Arche.
//!
//! This crate defines the objects a program works with and every check
//! made on them before work reaches a backend:
//!
//! - [`Device`]: one compute device; factory for everything else
//! - [`Buffer`] / [`BufferView`]: device memory and byte windows into it
//! - [`Kernel`]: a WGSL compute entry point compiled for one device
//! - [`Command`]: a deferred copy, launch or counter sample, consumed by
//!   one dispatch
//! - [`Counter`]: timestamp slots sampled between commands
//! - [`Stream`]: an ordered, asynchronous command queue
//! - [`DebugCapture`] / [`CaptureScope`]: recorded windows of device activity
//!
//! Backends implement the traits in [`backend`]; see `arche-cpu` and
//! `arche-wgpu`.
//!
//! ## Execution model
//!
//! ```text
//!   HostArray ──copy_from──┐                 ┌──copy_to──▶ HostArray
//!                          ▼                 │
//!                     ┌─────────┐  launch  ┌─┴───────┐
//!                     │ Buffer  │─────────▶│ Buffer  │
//!                     └─────────┘  Kernel  └─────────┘
//!                          │                    │
//!                          └────── Command ─────┘
//!                                     │ dispatch
//!                                     ▼
//!                                  Stream ──synchronize──▶ host
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod buffer;
pub mod capture;
pub mod command;
pub mod config;
pub mod counter;
pub mod device;
pub mod dtype;
pub mod error;
pub mod host;
pub mod kernel;
pub mod shader;
pub mod stream;
pub mod trace;
pub mod types;

pub use buffer::{Buffer, BufferView};
pub use capture::{
    CaptureDestination, CaptureOptions, CaptureScope, CaptureSummary, CaptureTrigger,
    DebugCapture,
};
pub use command::{Argument, Command, CommandOp};
pub use config::{DeviceConfig, PowerPreference};
pub use counter::Counter;
pub use device::Device;
pub use dtype::{DType, Element};
pub use error::{ArcheError, Result};
pub use host::HostArray;
pub use kernel::{Kernel, KernelBuilder, KernelDesc};
pub use stream::{Stream, StreamMetrics, StreamState};
pub use trace::CaptureTrace;
pub use types::{Backend, DeviceInfo, DeviceKind, DeviceLimits, DeviceType, Dim3};

pub use naga;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::buffer::{Buffer, BufferView};
    pub use crate::capture::{CaptureOptions, CaptureScope, CaptureTrigger, DebugCapture};
    pub use crate::command::{Argument, Command};
    pub use crate::config::DeviceConfig;
    pub use crate::counter::Counter;
    pub use crate::device::Device;
    pub use crate::dtype::{DType, Element};
    pub use crate::error::{ArcheError, Result};
    pub use crate::host::HostArray;
    pub use crate::kernel::Kernel;
    pub use crate::stream::Stream;
    pub use crate::types::{Backend, DeviceKind, DeviceType, Dim3};
}
