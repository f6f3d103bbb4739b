//! Kernel source front end.
//!
//! Kernel source is WGSL. It is parsed and validated once per
//! `(library name, source hash)` pair on each device; the validated naga
//! module is shared by every kernel built from it and handed to the
//! backend, which turns one entry point into something executable.
//!
//! The argument list of a kernel is reflected from the module: every
//! storage or uniform buffer the entry point actually uses, ordered by
//! `(group, binding)`. Launches bind buffers to that list by position.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::{ArcheError, Result};
use crate::types::Dim3;

/// Library name used when the caller gives none.
pub const DEFAULT_LIB_NAME: &str = "default";

/// How a kernel argument is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    /// `var<storage, read>` or `var<storage, read_write>`.
    Storage {
        /// Whether the kernel may only read it.
        read_only: bool,
    },
    /// `var<uniform>`.
    Uniform,
}

impl ArgumentKind {
    /// Whether the kernel may write through this argument.
    pub fn is_writable(self) -> bool {
        matches!(self, ArgumentKind::Storage { read_only: false })
    }
}

/// One reflected kernel argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentInfo {
    /// Variable name in the source, if any.
    pub name: Option<String>,
    /// Bind group index.
    pub group: u32,
    /// Binding index within the group.
    pub binding: u32,
    /// Binding kind.
    pub kind: ArgumentKind,
    /// Smallest byte window that can be bound.
    pub min_size: u64,
}

impl fmt::Display for ArgumentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ArgumentKind::Storage { read_only: true } => "storage, read",
            ArgumentKind::Storage { read_only: false } => "storage, read_write",
            ArgumentKind::Uniform => "uniform",
        };
        write!(
            f,
            "@group({}) @binding({}) {} <{}> (>= {} bytes)",
            self.group,
            self.binding,
            self.name.as_deref().unwrap_or("_"),
            kind,
            self.min_size
        )
    }
}

/// Reflected signature of one compute entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    /// Entry point name.
    pub entry: String,
    /// Index of the entry in the module's entry point list.
    pub entry_index: usize,
    /// Declared `@workgroup_size`.
    pub workgroup_size: Dim3,
    /// Arguments in binding order.
    pub arguments: Vec<ArgumentInfo>,
}

/// A parsed and validated WGSL module.
pub struct ShaderModule {
    lib_name: String,
    source: Arc<str>,
    hash: String,
    module: naga::Module,
    info: ModuleInfo,
}

impl ShaderModule {
    /// Parse and validate `source`.
    pub fn parse(lib_name: &str, source: &str) -> Result<Self> {
        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| ArcheError::compilation(lib_name, e.emit_to_string(source)))?;

        let info = Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|e| ArcheError::compilation(lib_name, e.emit_to_string(source)))?;

        Ok(Self {
            lib_name: lib_name.to_string(),
            source: Arc::from(source),
            hash: hash_source(source),
            module,
            info,
        })
    }

    /// Library name.
    pub fn lib_name(&self) -> &str {
        &self.lib_name
    }

    /// Original source text.
    pub fn source(&self) -> &Arc<str> {
        &self.source
    }

    /// SHA-256 of the source, lowercase hex.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The validated naga module.
    pub fn module(&self) -> &naga::Module {
        &self.module
    }

    /// Validation results.
    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    /// Names of all compute entry points.
    pub fn compute_entries(&self) -> Vec<String> {
        self.module
            .entry_points
            .iter()
            .filter(|ep| ep.stage == naga::ShaderStage::Compute)
            .map(|ep| ep.name.clone())
            .collect()
    }

    /// Reflect the signature of compute entry `entry`.
    pub fn reflect(&self, entry: &str) -> Result<KernelSignature> {
        let entry_index = self
            .module
            .entry_points
            .iter()
            .position(|ep| ep.name == entry && ep.stage == naga::ShaderStage::Compute)
            .ok_or_else(|| ArcheError::EntryNotFound {
                entry: entry.to_string(),
                available: self.compute_entries(),
            })?;

        let ep = &self.module.entry_points[entry_index];
        let usage = self.info.get_entry_point(entry_index);

        let mut arguments = Vec::new();
        for (handle, var) in self.module.global_variables.iter() {
            let Some(binding) = &var.binding else {
                continue;
            };
            if usage[handle].is_empty() {
                continue;
            }
            let kind = match var.space {
                naga::AddressSpace::Storage { access } => ArgumentKind::Storage {
                    read_only: !access.contains(naga::StorageAccess::STORE),
                },
                naga::AddressSpace::Uniform => ArgumentKind::Uniform,
                _ => {
                    return Err(ArcheError::compilation(
                        &self.lib_name,
                        format!(
                            "binding @group({}) @binding({}) used by '{}' is not a buffer; \
                             only storage and uniform buffers can be bound",
                            binding.group, binding.binding, entry
                        ),
                    ))
                }
            };
            arguments.push(ArgumentInfo {
                name: var.name.clone(),
                group: binding.group,
                binding: binding.binding,
                kind,
                min_size: self.min_binding_size(var.ty),
            });
        }
        arguments.sort_by_key(|a| (a.group, a.binding));

        Ok(KernelSignature {
            entry: entry.to_string(),
            entry_index,
            workgroup_size: Dim3::from(ep.workgroup_size),
            arguments,
        })
    }

    fn min_binding_size(&self, ty: naga::Handle<naga::Type>) -> u64 {
        let runtime_stride = |ty: naga::Handle<naga::Type>| match self.module.types[ty].inner {
            naga::TypeInner::Array {
                size: naga::ArraySize::Dynamic,
                stride,
                ..
            } => Some(stride as u64),
            _ => None,
        };

        if let Some(stride) = runtime_stride(ty) {
            return stride;
        }
        if let naga::TypeInner::Struct { ref members, .. } = self.module.types[ty].inner {
            if let Some(last) = members.last() {
                if let Some(stride) = runtime_stride(last.ty) {
                    return last.offset as u64 + stride;
                }
            }
        }
        self.module.types[ty].inner.size(self.module.to_ctx()) as u64
    }
}

impl fmt::Debug for ShaderModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderModule")
            .field("lib_name", &self.lib_name)
            .field("hash", &self.hash)
            .field("entry_points", &self.module.entry_points.len())
            .finish()
    }
}

/// SHA-256 of kernel source as lowercase hex.
pub fn hash_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Per-device cache of validated modules keyed by library name and source hash.
#[derive(Default)]
pub struct ModuleCache {
    modules: Mutex<HashMap<(String, String), Arc<ShaderModule>>>,
    hits: AtomicU64,
}

impl ModuleCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached module for `source`, parsing it on first use.
    pub fn get_or_parse(&self, lib_name: &str, source: &str) -> Result<Arc<ShaderModule>> {
        let key = (lib_name.to_string(), hash_source(source));
        let mut modules = self.modules.lock();
        if let Some(module) = modules.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(module));
        }
        let module = Arc::new(ShaderModule::parse(lib_name, source)?);
        tracing::debug!(lib = %lib_name, hash = %&key.1[..12], "Compiled shader module");
        modules.insert(key, Arc::clone(&module));
        Ok(module)
    }

    /// Number of cached modules.
    pub fn len(&self) -> usize {
        self.modules.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.lock().is_empty()
    }

    /// Number of lookups served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}
