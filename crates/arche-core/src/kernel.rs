//! Kernels: compiled entry points bound to one device.

use std::fmt;
use std::sync::Arc;

use crate::backend::KernelBackend;
use crate::buffer::Buffer;
use crate::command::{Argument, Command, CommandOp, Launch};
use crate::device::{Device, DeviceShared};
use crate::error::{ArcheError, Result};
use crate::shader::{KernelSignature, ShaderModule};
use crate::types::Dim3;

struct KernelInner {
    id: u64,
    device: Arc<DeviceShared>,
    module: Arc<ShaderModule>,
    signature: KernelSignature,
    native: Arc<dyn KernelBackend>,
}

/// Handle to a compiled kernel.
///
/// Immutable after construction; clones share the compiled program.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    pub(crate) fn new(
        id: u64,
        device: Arc<DeviceShared>,
        module: Arc<ShaderModule>,
        signature: KernelSignature,
        native: Arc<dyn KernelBackend>,
    ) -> Self {
        Self {
            inner: Arc::new(KernelInner {
                id,
                device,
                module,
                signature,
                native,
            }),
        }
    }

    /// Process-unique kernel id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Owning device id.
    pub fn device_id(&self) -> u64 {
        self.inner.device.id
    }

    /// Entry point name.
    pub fn entry(&self) -> &str {
        &self.inner.signature.entry
    }

    /// Library name used for diagnostics and module caching.
    pub fn lib_name(&self) -> &str {
        self.inner.module.lib_name()
    }

    /// Source text the kernel was compiled from.
    pub fn source(&self) -> &str {
        self.inner.module.source()
    }

    /// Shared validated module.
    pub fn module(&self) -> &Arc<ShaderModule> {
        &self.inner.module
    }

    /// Reflected signature.
    pub fn signature(&self) -> &KernelSignature {
        &self.inner.signature
    }

    /// Declared argument count.
    pub fn argument_count(&self) -> usize {
        self.inner.signature.arguments.len()
    }

    /// Declared `@workgroup_size`.
    pub fn workgroup_size(&self) -> Dim3 {
        self.inner.signature.workgroup_size
    }

    /// Native executable.
    pub fn native(&self) -> &Arc<dyn KernelBackend> {
        &self.inner.native
    }

    /// Launch command binding whole buffers by position.
    pub fn launch_thread_groups(
        &self,
        grid: impl Into<Dim3>,
        group: impl Into<Dim3>,
        buffers: &[&Buffer],
    ) -> Result<Command> {
        let args = buffers.iter().map(|b| Argument::from(*b)).collect();
        self.launch(grid, group, args)
    }

    /// Launch command with explicit arguments (views or inline bytes).
    ///
    /// Every check is made here, before anything is queued:
    /// - `ArgumentCountMismatch` if `args` does not match the signature;
    /// - `InvalidDispatchSize` for a zero dimension, a group other than the
    ///   declared workgroup size, or a grid over the device limit;
    /// - `CrossDeviceReference` for a buffer of another device;
    /// - `SizeMismatch` for a window smaller than the argument needs;
    /// - `InvalidArgument` for a misaligned window, inline bytes bound to
    ///   a writable argument, or a buffer bound to a writable argument and
    ///   also to a read-only one.
    pub fn launch(
        &self,
        grid: impl Into<Dim3>,
        group: impl Into<Dim3>,
        args: Vec<Argument>,
    ) -> Result<Command> {
        let grid = grid.into();
        let group = group.into();
        let sig = &self.inner.signature;
        let device = &self.inner.device;

        device.ensure_usable()?;

        if args.len() != sig.arguments.len() {
            return Err(ArcheError::ArgumentCountMismatch {
                entry: sig.entry.clone(),
                expected: sig.arguments.len(),
                actual: args.len(),
            });
        }

        if grid.has_zero() || group.has_zero() {
            return Err(ArcheError::dispatch(format!(
                "grid {} and group {} must be at least 1 in every dimension",
                grid, group
            )));
        }
        if group != sig.workgroup_size {
            return Err(ArcheError::dispatch(format!(
                "group {} differs from the declared @workgroup_size {} of '{}'",
                group, sig.workgroup_size, sig.entry
            )));
        }
        let max = device.info.limits.max_workgroups_per_dimension;
        if grid.to_array().iter().any(|d| *d > max) {
            return Err(ArcheError::dispatch(format!(
                "grid {} exceeds the device limit of {} groups per dimension",
                grid, max
            )));
        }

        let align = device.info.limits.min_storage_buffer_offset_alignment.max(1) as u64;
        for (index, (arg, info)) in args.iter().zip(&sig.arguments).enumerate() {
            match arg {
                Argument::Buffer(view) => {
                    if view.buffer().device_id() != device.id {
                        return Err(ArcheError::CrossDeviceReference {
                            resource: view.buffer().describe(),
                            owner: view.buffer().device_id(),
                            target: device.id,
                        });
                    }
                    if view.offset() % align != 0 {
                        return Err(ArcheError::argument(format!(
                            "argument {} of '{}': offset {} is not a multiple of {}",
                            index,
                            sig.entry,
                            view.offset(),
                            align
                        )));
                    }
                }
                Argument::Bytes(_) => {
                    if info.kind.is_writable() {
                        return Err(ArcheError::argument(format!(
                            "argument {} of '{}' is writable and needs a buffer",
                            index, sig.entry
                        )));
                    }
                }
            }
            if arg.len() < info.min_size {
                return Err(ArcheError::size_mismatch(
                    format!("argument {} ({}) of '{}'", index, info, sig.entry),
                    info.min_size,
                    arg.len(),
                ));
            }
        }

        check_exclusive_writes(sig, &args)?;

        Ok(Command::new(
            device.id,
            CommandOp::Launch(Launch {
                kernel: self.clone(),
                grid,
                group,
                args,
            }),
        ))
    }
}

/// A buffer written through one argument may not be read through another
/// read-only storage or uniform argument of the same launch; GPU backends
/// treat read-write storage as an exclusive usage of the whole buffer.
fn check_exclusive_writes(sig: &KernelSignature, args: &[Argument]) -> Result<()> {
    let bound = || {
        args.iter()
            .zip(&sig.arguments)
            .enumerate()
            .filter_map(|(index, (arg, info))| match arg {
                Argument::Buffer(view) => Some((index, view, info.kind.is_writable())),
                Argument::Bytes(_) => None,
            })
    };
    for (written, view, writable) in bound() {
        if !writable {
            continue;
        }
        if let Some((read, _, _)) =
            bound().find(|(_, other, w)| !*w && other.buffer().ptr_eq(view.buffer()))
        {
            return Err(ArcheError::argument(format!(
                "{} is bound to writable argument {} and read-only argument {} of '{}'",
                view.buffer().describe(),
                written,
                read,
                sig.entry
            )));
        }
    }
    Ok(())
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("id", &self.inner.id)
            .field("entry", &self.inner.signature.entry)
            .field("lib_name", &self.inner.module.lib_name())
            .field("arguments", &self.inner.signature.arguments.len())
            .finish()
    }
}

/// Plain description of a kernel to build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelDesc {
    /// Entry point name.
    pub entry: Option<String>,
    /// Library name for diagnostics and caching.
    pub lib_name: Option<String>,
    /// WGSL source text.
    pub source: Option<String>,
}

/// Collects a [`KernelDesc`] and compiles it in one `build` call.
///
/// Nothing is compiled or validated until [`KernelBuilder::build`].
#[must_use = "a kernel builder does nothing until build() is called"]
pub struct KernelBuilder {
    device: Device,
    desc: KernelDesc,
}

impl KernelBuilder {
    pub(crate) fn new(device: Device) -> Self {
        Self {
            device,
            desc: KernelDesc::default(),
        }
    }

    /// Set the entry point name.
    pub fn entry(mut self, entry: impl Into<String>) -> Self {
        self.desc.entry = Some(entry.into());
        self
    }

    /// Set the library name.
    pub fn lib_name(mut self, lib_name: impl Into<String>) -> Self {
        self.desc.lib_name = Some(lib_name.into());
        self
    }

    /// Set the source text.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.desc.source = Some(source.into());
        self
    }

    /// The description collected so far.
    pub fn desc(&self) -> &KernelDesc {
        &self.desc
    }

    /// Compile the kernel.
    ///
    /// Fails with `InvalidConfig` when entry or source is missing, and
    /// otherwise like [`Device::create_kernel`].
    pub fn build(self) -> Result<Kernel> {
        self.device.build_kernel(&self.desc)
    }
}
