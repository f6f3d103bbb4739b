//! Feature check run once when a kernel is compiled.
//!
//! Invocations run one after another, so anything that relies on them
//! running together (barriers, atomics) is refused up front, together with
//! the types the interpreter has no representation for. Only the entry
//! point and the functions it calls are inspected.

use std::collections::HashSet;

use naga::valid::{FunctionInfo, ModuleInfo};
use naga::{
    AddressSpace, Binding, Block, BuiltIn, Expression, Function, Handle, Module, Statement,
    TypeInner,
};

use super::ops::math_supported;
use super::{InterpError, InterpResult};

/// Fail with `Unsupported` if entry point `index` uses anything the
/// interpreter cannot run.
pub fn check_entry(module: &Module, info: &ModuleInfo, index: usize) -> InterpResult<()> {
    let entry = module
        .entry_points
        .get(index)
        .ok_or_else(|| InterpError::fault(format!("no entry point {}", index)))?;
    let entry_info = info.get_entry_point(index);

    for arg in &entry.function.arguments {
        match &arg.binding {
            Some(Binding::BuiltIn(b)) => check_builtin(*b)?,
            Some(Binding::Location { .. }) => {
                return Err(InterpError::unsupported("location-bound inputs"))
            }
            None => match &module.types[arg.ty].inner {
                TypeInner::Struct { members, .. } => {
                    for m in members {
                        match &m.binding {
                            Some(Binding::BuiltIn(b)) => check_builtin(*b)?,
                            _ => return Err(InterpError::unsupported("location-bound inputs")),
                        }
                    }
                }
                _ => return Err(InterpError::unsupported("unbound entry point argument")),
            },
        }
    }

    for (handle, var) in module.global_variables.iter() {
        if entry_info[handle].is_empty() {
            continue;
        }
        match var.space {
            AddressSpace::Storage { .. }
            | AddressSpace::Uniform
            | AddressSpace::Private
            | AddressSpace::WorkGroup => {}
            AddressSpace::Handle => {
                return Err(InterpError::unsupported("textures and samplers"))
            }
            other => return Err(InterpError::unsupported(format!("{:?} variables", other))),
        }
        check_type(module, &module.types[var.ty].inner)?;
    }

    let mut calls = HashSet::new();
    check_function(module, &entry.function, entry_info, &mut calls)?;

    let mut done = HashSet::new();
    let mut pending: Vec<_> = calls.iter().copied().collect();
    while let Some(handle) = pending.pop() {
        if !done.insert(handle) {
            continue;
        }
        let mut callees = HashSet::new();
        check_function(module, &module.functions[handle], &info[handle], &mut callees)?;
        pending.extend(callees);
    }
    Ok(())
}

fn check_builtin(b: BuiltIn) -> InterpResult<()> {
    match b {
        BuiltIn::GlobalInvocationId
        | BuiltIn::LocalInvocationId
        | BuiltIn::LocalInvocationIndex
        | BuiltIn::WorkGroupId
        | BuiltIn::NumWorkGroups => Ok(()),
        other => Err(InterpError::unsupported(format!("built-in {:?}", other))),
    }
}

fn check_type(module: &Module, inner: &TypeInner) -> InterpResult<()> {
    match inner {
        TypeInner::Scalar(s) | TypeInner::Vector { scalar: s, .. } => {
            if s.kind != naga::ScalarKind::Bool && s.width != 4 {
                return Err(InterpError::unsupported(format!(
                    "{}-byte scalars",
                    s.width
                )));
            }
            Ok(())
        }
        TypeInner::ValuePointer { scalar, .. } => {
            check_type(module, &TypeInner::Scalar(*scalar))
        }
        TypeInner::Pointer { base, .. } => check_type(module, &module.types[*base].inner),
        TypeInner::Array { base, .. } => check_type(module, &module.types[*base].inner),
        TypeInner::Struct { members, .. } => {
            for m in members {
                check_type(module, &module.types[m.ty].inner)?;
            }
            Ok(())
        }
        TypeInner::Matrix { .. } => Err(InterpError::unsupported("matrices")),
        TypeInner::Atomic(_) => Err(InterpError::unsupported("atomics")),
        TypeInner::Image { .. } | TypeInner::Sampler { .. } => {
            Err(InterpError::unsupported("textures and samplers"))
        }
        other => Err(InterpError::unsupported(format!("type {:?}", other))),
    }
}

fn check_function(
    module: &Module,
    function: &Function,
    info: &FunctionInfo,
    calls: &mut HashSet<Handle<Function>>,
) -> InterpResult<()> {
    for (_, var) in function.local_variables.iter() {
        check_type(module, &module.types[var.ty].inner)?;
    }

    for (handle, expr) in function.expressions.iter() {
        match expr {
            Expression::Literal(_)
            | Expression::Constant(_)
            | Expression::ZeroValue(_)
            | Expression::Compose { .. }
            | Expression::Access { .. }
            | Expression::AccessIndex { .. }
            | Expression::Splat { .. }
            | Expression::Swizzle { .. }
            | Expression::FunctionArgument(_)
            | Expression::GlobalVariable(_)
            | Expression::LocalVariable(_)
            | Expression::Load { .. }
            | Expression::Unary { .. }
            | Expression::Binary { .. }
            | Expression::Select { .. }
            | Expression::Relational { .. }
            | Expression::As { .. }
            | Expression::CallResult(_)
            | Expression::ArrayLength(_) => {}
            Expression::Math { fun, .. } if math_supported(*fun) => {}
            Expression::Math { fun, .. } => {
                return Err(InterpError::unsupported(format!("built-in {:?}", fun)))
            }
            Expression::ImageSample { .. }
            | Expression::ImageLoad { .. }
            | Expression::ImageQuery { .. } => {
                return Err(InterpError::unsupported("textures and samplers"))
            }
            Expression::AtomicResult { .. } => return Err(InterpError::unsupported("atomics")),
            _ => {
                return Err(InterpError::unsupported(format!(
                    "expression {:?}",
                    expr
                )))
            }
        }
        check_type(module, info[handle].ty.inner_with(&module.types))?;
    }

    check_block(&function.body, calls)
}

fn check_block(block: &Block, calls: &mut HashSet<Handle<Function>>) -> InterpResult<()> {
    for stmt in block.iter() {
        match stmt {
            Statement::Emit(_)
            | Statement::Break
            | Statement::Continue
            | Statement::Return { .. }
            | Statement::Store { .. } => {}
            Statement::Block(b) => check_block(b, calls)?,
            Statement::If { accept, reject, .. } => {
                check_block(accept, calls)?;
                check_block(reject, calls)?;
            }
            Statement::Switch { cases, .. } => {
                for case in cases {
                    check_block(&case.body, calls)?;
                }
            }
            Statement::Loop {
                body, continuing, ..
            } => {
                check_block(body, calls)?;
                check_block(continuing, calls)?;
            }
            Statement::Call { function, .. } => {
                calls.insert(*function);
            }
            Statement::Barrier(_) | Statement::WorkGroupUniformLoad { .. } => {
                return Err(InterpError::unsupported("workgroup barriers"))
            }
            Statement::Atomic { .. } => return Err(InterpError::unsupported("atomics")),
            Statement::ImageStore { .. } => {
                return Err(InterpError::unsupported("textures and samplers"))
            }
            Statement::Kill => return Err(InterpError::unsupported("discard")),
            other => return Err(InterpError::unsupported(format!("statement {:?}", other))),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use naga::valid::{Capabilities, ValidationFlags, Validator};

    fn check(src: &str) -> InterpResult<()> {
        let module = naga::front::wgsl::parse_str(src).unwrap();
        let info = Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .unwrap();
        check_entry(&module, &info, 0)
    }

    #[test]
    fn test_accepts_plain_kernel() {
        check(
            r#"
            @group(0) @binding(0) var<storage, read_write> data: array<f32>;
            fn twice(x: f32) -> f32 { return x * 2.0; }
            @compute @workgroup_size(64)
            fn main(@builtin(global_invocation_id) id: vec3<u32>) {
                if id.x < arrayLength(&data) { data[id.x] = twice(data[id.x]); }
            }
        "#,
        )
        .unwrap();
    }

    #[test]
    fn test_rejects_barrier() {
        let err = check(
            r#"
            var<workgroup> tile: array<u32, 64>;
            @compute @workgroup_size(64)
            fn main(@builtin(local_invocation_index) i: u32) {
                tile[i] = i;
                workgroupBarrier();
            }
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, InterpError::Unsupported(_)));
    }

    #[test]
    fn test_rejects_atomics() {
        let err = check(
            r#"
            @group(0) @binding(0) var<storage, read_write> counter: atomic<u32>;
            @compute @workgroup_size(1)
            fn main() { atomicAdd(&counter, 1u); }
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, InterpError::Unsupported(_)));
    }

    #[test]
    fn test_rejects_matrix_in_called_function() {
        let err = check(
            r#"
            @group(0) @binding(0) var<storage, read_write> out: array<f32>;
            fn det() -> f32 { let m = mat2x2<f32>(1.0, 2.0, 3.0, 4.0); return m[0][0]; }
            @compute @workgroup_size(1)
            fn main() { out[0] = det(); }
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, InterpError::Unsupported(_)));
    }
}
