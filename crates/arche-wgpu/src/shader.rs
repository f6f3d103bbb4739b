//! Compute pipeline creation.

use std::any::Any;

use tracing::debug;

use arche_core::backend::{KernelBackend, KernelSource};
use arche_core::error::{ArcheError, Result};
use arche_core::shader::KernelSignature;

use crate::adapter::WgpuShared;

/// A compute pipeline for one entry point.
pub struct WgpuKernel {
    pipeline: wgpu::ComputePipeline,
    /// One layout per bind group index from 0 to the highest one used.
    group_layouts: Vec<wgpu::BindGroupLayout>,
    signature: KernelSignature,
}

impl WgpuKernel {
    /// Create the pipeline for the entry point of `source`.
    ///
    /// The pipeline layout is derived from the entry point, so only the
    /// bindings it actually uses take part. Validation errors raised by the
    /// driver become `CompilationError`.
    pub fn compile(shared: &WgpuShared, source: &KernelSource<'_>) -> Result<Self> {
        let device = &shared.device;
        let lib_name = source.module.lib_name();
        let signature = source.signature.clone();

        let group_count = signature
            .arguments
            .iter()
            .map(|a| a.group + 1)
            .max()
            .unwrap_or(0);

        let ((pipeline, group_layouts), error) = shared.validated(|| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(lib_name),
                source: wgpu::ShaderSource::Wgsl(source.module.source().as_ref().into()),
            });

            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&signature.entry),
                layout: None,
                module: &module,
                entry_point: &signature.entry,
            });

            let group_layouts: Vec<_> = (0..group_count)
                .map(|group| pipeline.get_bind_group_layout(group))
                .collect();
            (pipeline, group_layouts)
        });
        if let Some(error) = error {
            return Err(ArcheError::compilation(lib_name, error.to_string()));
        }

        debug!(
            lib = %lib_name,
            entry = %signature.entry,
            groups = group_count,
            "Created compute pipeline"
        );

        Ok(Self {
            pipeline,
            group_layouts,
            signature,
        })
    }

    /// The pipeline.
    pub fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    /// Bind group layouts, indexed by group.
    pub fn group_layouts(&self) -> &[wgpu::BindGroupLayout] {
        &self.group_layouts
    }

    /// Reflected signature.
    pub fn signature(&self) -> &KernelSignature {
        &self.signature
    }
}

impl KernelBackend for WgpuKernel {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
