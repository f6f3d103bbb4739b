//! Interpreted kernels.

use std::any::Any;

use arche_core::backend::{KernelBackend, KernelSource};
use arche_core::error::{ArcheError, Result};
use tracing::debug;

use crate::interp::{InterpError, LaunchMemory, Program};

/// An entry point prepared for the host interpreter.
pub struct CpuKernel {
    program: Program,
    lib_name: String,
}

impl CpuKernel {
    /// Prepare the entry point of `source`.
    ///
    /// Fails with `CompilationError` when the entry point needs something the
    /// interpreter cannot run.
    pub fn compile(source: &KernelSource<'_>, loop_limit: u64) -> Result<Self> {
        let lib_name = source.module.lib_name().to_string();
        let program = Program::new(source.module.clone(), source.signature).map_err(|e| {
            ArcheError::compilation(
                lib_name.as_str(),
                format!("entry point '{}': {}", source.signature.entry, e),
            )
        })?
        .with_loop_limit(loop_limit);

        debug!(
            lib = %lib_name,
            entry = %source.signature.entry,
            arguments = source.signature.arguments.len(),
            "Prepared interpreted kernel"
        );
        Ok(Self { program, lib_name })
    }

    /// Entry point name.
    pub fn entry(&self) -> &str {
        self.program.entry()
    }

    /// Library the kernel was compiled from.
    pub fn lib_name(&self) -> &str {
        &self.lib_name
    }

    /// Execute a whole launch.
    pub fn run(&self, grid: [u32; 3], memory: &mut LaunchMemory<'_>) -> Result<()> {
        self.program.run(grid, memory).map_err(|e| match e {
            InterpError::Unsupported(msg) => ArcheError::compilation(self.lib_name.as_str(), msg),
            other => ArcheError::lost(format!("kernel '{}': {}", self.entry(), other)),
        })
    }
}

impl KernelBackend for CpuKernel {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
