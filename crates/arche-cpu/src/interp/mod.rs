//! A host interpreter for validated naga compute modules.
//!
//! A [`Program`] is built once per kernel: it checks that the entry point
//! only uses what the interpreter supports, maps every global variable to
//! a memory region and precomputes private-variable initial values.
//! [`Program::run`] then executes a whole launch, one invocation at a
//! time, against the argument memory in a [`LaunchMemory`].

mod check;
mod exec;
mod layout;
mod ops;
mod value;

use std::collections::HashMap;
use std::sync::Arc;

use arche_core::shader::{KernelSignature, ShaderModule};
use naga::{AddressSpace, GlobalVariable, Handle};
use thiserror::Error;

use exec::Machine;
use layout::Layout;
use value::{Pointee, Region};

pub use check::check_entry;

/// Loops running longer than this are treated as hung.
pub const LOOP_LIMIT: u64 = 1 << 26;

/// Interpreter errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InterpError {
    /// The kernel uses a feature the interpreter does not implement.
    #[error("not supported by the host interpreter: {0}")]
    Unsupported(String),

    /// Execution reached an inconsistent state.
    #[error("interpreter fault: {0}")]
    Fault(String),

    /// A loop did not terminate.
    #[error("loop did not terminate after {0} iterations")]
    Watchdog(u64),
}

impl InterpError {
    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        InterpError::Unsupported(msg.into())
    }

    pub(crate) fn fault(msg: impl Into<String>) -> Self {
        InterpError::Fault(msg.into())
    }
}

/// Result type for interpreter operations.
pub type InterpResult<T> = std::result::Result<T, InterpError>;

/// Memory bound to one kernel argument.
#[derive(Debug, Clone)]
pub enum ArgSlot {
    /// A window into one of the launch's buffer stores.
    Buffer {
        /// Index into [`LaunchMemory`] stores.
        store: usize,
        /// Byte offset of the window.
        offset: usize,
        /// Byte length of the window.
        len: usize,
    },
    /// Inline read-only bytes.
    Bytes(Arc<[u8]>),
}

/// Argument memory of one launch.
///
/// Several arguments may share a store when they bind the same buffer.
pub struct LaunchMemory<'a> {
    stores: Vec<&'a mut Vec<u8>>,
    slots: Vec<ArgSlot>,
}

impl<'a> LaunchMemory<'a> {
    /// Bind `slots` (one per argument, in signature order) over `stores`.
    pub fn new(stores: Vec<&'a mut Vec<u8>>, slots: Vec<ArgSlot>) -> InterpResult<Self> {
        for slot in &slots {
            if let ArgSlot::Buffer { store, offset, len } = slot {
                let size = stores
                    .get(*store)
                    .map(|s| s.len())
                    .ok_or_else(|| InterpError::fault(format!("no buffer store {}", store)))?;
                if offset + len > size {
                    return Err(InterpError::fault(format!(
                        "window {}..{} exceeds buffer of {} bytes",
                        offset,
                        offset + len,
                        size
                    )));
                }
            }
        }
        Ok(Self { stores, slots })
    }

    fn bytes(&self, index: usize) -> InterpResult<&[u8]> {
        match self.slots.get(index) {
            Some(ArgSlot::Buffer { store, offset, len }) => {
                Ok(&self.stores[*store][*offset..*offset + *len])
            }
            Some(ArgSlot::Bytes(bytes)) => Ok(bytes),
            None => Err(InterpError::fault(format!("no argument {}", index))),
        }
    }

    fn bytes_mut(&mut self, index: usize) -> InterpResult<&mut [u8]> {
        match self.slots.get(index) {
            Some(ArgSlot::Buffer { store, offset, len }) => {
                let (offset, len) = (*offset, *len);
                Ok(&mut self.stores[*store][offset..offset + len])
            }
            Some(ArgSlot::Bytes(_)) => Err(InterpError::fault(format!(
                "argument {} is read-only inline data",
                index
            ))),
            None => Err(InterpError::fault(format!("no argument {}", index))),
        }
    }
}

/// An entry point prepared for interpretation.
pub struct Program {
    module: Arc<ShaderModule>,
    entry_index: usize,
    regions: HashMap<Handle<GlobalVariable>, Region>,
    private: Vec<Vec<u8>>,
    workgroup: Vec<usize>,
    loop_limit: u64,
}

impl Program {
    /// Check and prepare the entry point of `signature`.
    pub fn new(module: Arc<ShaderModule>, signature: &KernelSignature) -> InterpResult<Self> {
        let naga_module = module.module();
        check_entry(naga_module, module.info(), signature.entry_index)?;

        let layout = Layout::new(naga_module);
        let mut regions = HashMap::new();
        let mut private = Vec::new();
        let mut workgroup = Vec::new();

        for (handle, var) in naga_module.global_variables.iter() {
            match var.space {
                AddressSpace::Storage { .. } | AddressSpace::Uniform => {
                    let Some(binding) = &var.binding else { continue };
                    if let Some(index) = signature
                        .arguments
                        .iter()
                        .position(|a| a.group == binding.group && a.binding == binding.binding)
                    {
                        regions.insert(handle, Region::Binding(index));
                    }
                }
                AddressSpace::Private => {
                    let ty = Pointee::Type(var.ty);
                    let mut bytes = vec![0u8; layout.size(ty) as usize];
                    if let Some(init) = var.init {
                        let value = exec::const_value(naga_module, layout, init)?;
                        layout.write(&mut bytes, Some(0), ty, &value)?;
                    }
                    regions.insert(handle, Region::Private(private.len()));
                    private.push(bytes);
                }
                AddressSpace::WorkGroup => {
                    regions.insert(handle, Region::Workgroup(workgroup.len()));
                    workgroup.push(layout.size(Pointee::Type(var.ty)) as usize);
                }
                _ => {}
            }
        }

        Ok(Self {
            module,
            entry_index: signature.entry_index,
            regions,
            private,
            workgroup,
            loop_limit: LOOP_LIMIT,
        })
    }

    /// Override the iteration count after which a loop counts as hung.
    pub fn with_loop_limit(mut self, limit: u64) -> Self {
        self.loop_limit = limit.max(1);
        self
    }

    /// Entry point name.
    pub fn entry(&self) -> &str {
        &self.module.module().entry_points[self.entry_index].name
    }

    /// Run every invocation of a `grid`-sized launch.
    pub fn run(&self, grid: [u32; 3], memory: &mut LaunchMemory<'_>) -> InterpResult<()> {
        let entry = &self.module.module().entry_points[self.entry_index];
        let mut machine = Machine::new(
            self.module.module(),
            &self.regions,
            memory,
            self.private.clone(),
            self.workgroup.iter().map(|size| vec![0u8; *size]).collect(),
            self.loop_limit,
        );

        let [gx, gy, gz] = grid;
        let [wx, wy, wz] = entry.workgroup_size;
        for z in 0..gz {
            for y in 0..gy {
                for x in 0..gx {
                    machine.begin_group();
                    for lz in 0..wz {
                        for ly in 0..wy {
                            for lx in 0..wx {
                                machine.begin_invocation(&self.private);
                                machine.invoke(
                                    &entry.function,
                                    exec::Builtins {
                                        workgroup_id: [x, y, z],
                                        local_id: [lx, ly, lz],
                                        workgroup_size: entry.workgroup_size,
                                        num_workgroups: grid,
                                    },
                                )?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
