//! Expression evaluation and statement execution.

use std::collections::HashMap;

use naga::{
    Binding, Block, BuiltIn, Expression, Function, GlobalVariable, Handle, Literal, Module,
    Statement, SwitchValue, Type, TypeInner,
};

use super::layout::Layout;
use super::ops;
use super::value::{Pointee, Pointer, Region, Value};
use super::{InterpError, InterpResult, LaunchMemory};

/// Built-in inputs of one invocation.
pub(super) struct Builtins {
    pub workgroup_id: [u32; 3],
    pub local_id: [u32; 3],
    pub workgroup_size: [u32; 3],
    pub num_workgroups: [u32; 3],
}

impl Builtins {
    fn value(&self, builtin: BuiltIn) -> InterpResult<Value> {
        let vec3 = |v: [u32; 3]| Value::Composite(v.iter().map(|c| Value::U32(*c)).collect());
        let [sx, sy, _] = self.workgroup_size;
        let [lx, ly, lz] = self.local_id;
        match builtin {
            BuiltIn::GlobalInvocationId => {
                let mut global = [0u32; 3];
                for (i, g) in global.iter_mut().enumerate() {
                    *g = self.workgroup_id[i]
                        .wrapping_mul(self.workgroup_size[i])
                        .wrapping_add(self.local_id[i]);
                }
                Ok(vec3(global))
            }
            BuiltIn::LocalInvocationId => Ok(vec3(self.local_id)),
            BuiltIn::LocalInvocationIndex => Ok(Value::U32(lx + ly * sx + lz * sx * sy)),
            BuiltIn::WorkGroupId => Ok(vec3(self.workgroup_id)),
            BuiltIn::NumWorkGroups => Ok(vec3(self.num_workgroups)),
            other => Err(InterpError::unsupported(format!("built-in {:?}", other))),
        }
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Option<Value>),
}

struct Frame<'p> {
    function: &'p Function,
    args: Vec<Value>,
    values: Vec<Option<Value>>,
    local_base: usize,
}

/// Per-launch interpreter state.
pub(super) struct Machine<'p, 'm, 'a> {
    module: &'p Module,
    layout: Layout<'p>,
    regions: &'p HashMap<Handle<GlobalVariable>, Region>,
    args: &'m mut LaunchMemory<'a>,
    private: Vec<Vec<u8>>,
    workgroup: Vec<Vec<u8>>,
    locals: Vec<Vec<u8>>,
    loop_limit: u64,
}

impl<'p, 'm, 'a> Machine<'p, 'm, 'a> {
    pub fn new(
        module: &'p Module,
        regions: &'p HashMap<Handle<GlobalVariable>, Region>,
        args: &'m mut LaunchMemory<'a>,
        private: Vec<Vec<u8>>,
        workgroup: Vec<Vec<u8>>,
        loop_limit: u64,
    ) -> Self {
        Self {
            module,
            layout: Layout::new(module),
            regions,
            args,
            private,
            workgroup,
            locals: Vec::new(),
            loop_limit,
        }
    }

    /// Zero workgroup memory for the next group.
    pub fn begin_group(&mut self) {
        for bytes in &mut self.workgroup {
            bytes.fill(0);
        }
    }

    /// Reset private variables to their initial values.
    pub fn begin_invocation(&mut self, initial: &[Vec<u8>]) {
        for (bytes, init) in self.private.iter_mut().zip(initial) {
            bytes.copy_from_slice(init);
        }
    }

    /// Run the entry point once.
    pub fn invoke(&mut self, entry: &'p Function, builtins: Builtins) -> InterpResult<()> {
        let module = self.module;
        let args = entry
            .arguments
            .iter()
            .map(|arg| match &arg.binding {
                Some(Binding::BuiltIn(b)) => builtins.value(*b),
                None => match &module.types[arg.ty].inner {
                    TypeInner::Struct { members, .. } => Ok(Value::Composite(
                        members
                            .iter()
                            .map(|m| match &m.binding {
                                Some(Binding::BuiltIn(b)) => builtins.value(*b),
                                _ => Err(InterpError::unsupported("location-bound inputs")),
                            })
                            .collect::<InterpResult<_>>()?,
                    )),
                    _ => Err(InterpError::unsupported("unbound entry point argument")),
                },
                Some(_) => Err(InterpError::unsupported("location-bound inputs")),
            })
            .collect::<InterpResult<Vec<_>>>()?;

        self.run_function(entry, args)?;
        Ok(())
    }

    fn run_function(&mut self, function: &'p Function, args: Vec<Value>) -> InterpResult<Option<Value>> {
        let local_base = self.locals.len();
        for (_, var) in function.local_variables.iter() {
            let size = self.layout.size(Pointee::Type(var.ty)) as usize;
            self.locals.push(vec![0u8; size]);
        }

        let mut frame = Frame {
            function,
            args,
            values: vec![None; function.expressions.len()],
            local_base,
        };
        let result = self
            .init_locals(&frame)
            .and_then(|()| self.exec_block(&mut frame, &function.body));
        self.locals.truncate(local_base);

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(None),
        }
    }

    fn init_locals(&mut self, frame: &Frame<'p>) -> InterpResult<()> {
        for (handle, var) in frame.function.local_variables.iter() {
            if let Some(init) = var.init {
                let value = self.value(frame, init)?;
                let ptr = Pointer::root(Region::Local(frame.local_base + handle.index()), var.ty);
                self.store(ptr, &value)?;
            }
        }
        Ok(())
    }

    fn exec_block(&mut self, frame: &mut Frame<'p>, block: &'p Block) -> InterpResult<Flow> {
        for stmt in block.iter() {
            match stmt {
                Statement::Emit(range) => {
                    for handle in range.clone() {
                        let value = self.eval(frame, handle)?;
                        frame.values[handle.index()] = Some(value);
                    }
                }
                Statement::Block(inner) => match self.exec_block(frame, inner)? {
                    Flow::Normal => {}
                    flow => return Ok(flow),
                },
                Statement::If {
                    condition,
                    accept,
                    reject,
                } => {
                    let branch = if self.value(frame, *condition)?.as_bool()? {
                        accept
                    } else {
                        reject
                    };
                    match self.exec_block(frame, branch)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                Statement::Switch { selector, cases } => {
                    let selector = self.value(frame, *selector)?.as_index()?;
                    let start = cases
                        .iter()
                        .position(|c| match c.value {
                            SwitchValue::I32(v) => v as i64 == selector,
                            SwitchValue::U32(v) => v as i64 == selector,
                            _ => false,
                        })
                        .or_else(|| {
                            cases
                                .iter()
                                .position(|c| matches!(c.value, SwitchValue::Default))
                        });
                    if let Some(start) = start {
                        for case in &cases[start..] {
                            match self.exec_block(frame, &case.body)? {
                                Flow::Normal if case.fall_through => continue,
                                Flow::Normal | Flow::Break => break,
                                flow => return Ok(flow),
                            }
                        }
                    }
                }
                Statement::Loop {
                    body,
                    continuing,
                    break_if,
                } => {
                    let mut iterations = 0u64;
                    loop {
                        iterations += 1;
                        if iterations > self.loop_limit {
                            return Err(InterpError::Watchdog(self.loop_limit));
                        }
                        match self.exec_block(frame, body)? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                        match self.exec_block(frame, continuing)? {
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Break => break,
                            Flow::Normal | Flow::Continue => {}
                        }
                        if let Some(cond) = break_if {
                            if self.value(frame, *cond)?.as_bool()? {
                                break;
                            }
                        }
                    }
                }
                Statement::Break => return Ok(Flow::Break),
                Statement::Continue => return Ok(Flow::Continue),
                Statement::Return { value } => {
                    let value = value.map(|h| self.value(frame, h)).transpose()?;
                    return Ok(Flow::Return(value));
                }
                Statement::Store { pointer, value } => {
                    let ptr = self.value(frame, *pointer)?.as_pointer()?;
                    let value = self.value(frame, *value)?;
                    self.store(ptr, &value)?;
                }
                Statement::Call {
                    function,
                    arguments,
                    result,
                } => {
                    let args = arguments
                        .iter()
                        .map(|a| self.value(frame, *a))
                        .collect::<InterpResult<Vec<_>>>()?;
                    let module = self.module;
                    let returned = self.run_function(&module.functions[*function], args)?;
                    if let Some(result) = result {
                        let value = returned.ok_or_else(|| {
                            InterpError::fault("function returned no value")
                        })?;
                        frame.values[result.index()] = Some(value);
                    }
                }
                other => {
                    return Err(InterpError::unsupported(format!("statement {:?}", other)))
                }
            }
        }
        Ok(Flow::Normal)
    }

    /// Value of an expression: the emitted one, or evaluated now for
    /// expressions that are never emitted.
    fn value(&self, frame: &Frame<'p>, handle: Handle<Expression>) -> InterpResult<Value> {
        match &frame.values[handle.index()] {
            Some(value) => Ok(value.clone()),
            None => self.eval(frame, handle),
        }
    }

    fn eval(&self, frame: &Frame<'p>, handle: Handle<Expression>) -> InterpResult<Value> {
        let module = self.module;
        let function = frame.function;
        match &function.expressions[handle] {
            Expression::Literal(literal) => literal_value(literal),
            Expression::Constant(c) => const_value(module, self.layout, module.constants[*c].init),
            Expression::ZeroValue(ty) => self.layout.zero(Pointee::Type(*ty)),
            Expression::Compose { ty, components } => {
                let parts = components
                    .iter()
                    .map(|c| self.value(frame, *c))
                    .collect::<InterpResult<Vec<_>>>()?;
                Ok(compose(module, *ty, parts))
            }
            Expression::Access { base, index } => {
                let index = self.value(frame, *index)?.as_index()?;
                self.access(self.value(frame, *base)?, index)
            }
            Expression::AccessIndex { base, index } => {
                self.access(self.value(frame, *base)?, *index as i64)
            }
            Expression::Splat { size, value } => {
                let v = self.value(frame, *value)?;
                Ok(Value::Composite(vec![v; *size as usize]))
            }
            Expression::Swizzle {
                size,
                vector,
                pattern,
            } => {
                let v = self.value(frame, *vector)?;
                let comps = v.components()?;
                Ok(Value::Composite(
                    pattern[..*size as usize]
                        .iter()
                        .map(|c| {
                            comps
                                .get(*c as usize)
                                .cloned()
                                .ok_or_else(|| InterpError::fault("swizzle out of range"))
                        })
                        .collect::<InterpResult<_>>()?,
                ))
            }
            Expression::FunctionArgument(i) => frame
                .args
                .get(*i as usize)
                .cloned()
                .ok_or_else(|| InterpError::fault(format!("missing argument {}", i))),
            Expression::GlobalVariable(g) => {
                let region = self.regions.get(g).copied().ok_or_else(|| {
                    InterpError::fault(format!(
                        "global '{}' has no bound memory",
                        module.global_variables[*g].name.as_deref().unwrap_or("_")
                    ))
                })?;
                Ok(Value::Pointer(Pointer::root(
                    region,
                    module.global_variables[*g].ty,
                )))
            }
            Expression::LocalVariable(l) => Ok(Value::Pointer(Pointer::root(
                Region::Local(frame.local_base + l.index()),
                function.local_variables[*l].ty,
            ))),
            Expression::Load { pointer } => {
                let ptr = self.value(frame, *pointer)?.as_pointer()?;
                self.load(ptr)
            }
            Expression::Unary { op, expr } => ops::unary(*op, &self.value(frame, *expr)?),
            Expression::Binary { op, left, right } => ops::binary(
                *op,
                &self.value(frame, *left)?,
                &self.value(frame, *right)?,
            ),
            Expression::Select {
                condition,
                accept,
                reject,
            } => ops::select(
                &self.value(frame, *condition)?,
                &self.value(frame, *accept)?,
                &self.value(frame, *reject)?,
            ),
            Expression::Relational { fun, argument } => {
                ops::relational(*fun, &self.value(frame, *argument)?)
            }
            Expression::Math {
                fun,
                arg,
                arg1,
                arg2,
                arg3,
            } => {
                let mut args = vec![self.value(frame, *arg)?];
                for a in [arg1, arg2, arg3].into_iter().flatten() {
                    args.push(self.value(frame, *a)?);
                }
                ops::math(*fun, &args)
            }
            Expression::As {
                expr,
                kind,
                convert,
            } => ops::convert(&self.value(frame, *expr)?, *kind, *convert),
            Expression::CallResult(_) => Err(InterpError::fault("call result used before the call")),
            Expression::ArrayLength(expr) => {
                let ptr = self.value(frame, *expr)?.as_pointer()?;
                let stride = self.layout.runtime_stride(ptr.pointee)?.max(1);
                let available = self.region(ptr.region)?.len() as u64;
                let len = ptr
                    .offset
                    .map(|o| available.saturating_sub(o) / stride)
                    .unwrap_or(0);
                Ok(Value::U32(len.min(u32::MAX as u64) as u32))
            }
            other => Err(InterpError::unsupported(format!("expression {:?}", other))),
        }
    }

    fn access(&self, base: Value, index: i64) -> InterpResult<Value> {
        match base {
            Value::Pointer(ptr) => {
                let (offset, in_bounds, pointee) = self.layout.element(ptr.pointee, index)?;
                Ok(Value::Pointer(ptr.step(offset, in_bounds, pointee)))
            }
            Value::Composite(mut comps) => {
                if comps.is_empty() {
                    return Err(InterpError::fault("index into an empty composite"));
                }
                let last = comps.len() - 1;
                let i = (index.max(0) as usize).min(last);
                Ok(comps.swap_remove(i))
            }
            other => Err(InterpError::fault(format!("cannot index {:?}", other))),
        }
    }

    fn region(&self, region: Region) -> InterpResult<&[u8]> {
        let missing = || InterpError::fault(format!("no memory for {:?}", region));
        match region {
            Region::Binding(i) => self.args.bytes(i),
            Region::Private(i) => self.private.get(i).map(Vec::as_slice).ok_or_else(missing),
            Region::Workgroup(i) => self.workgroup.get(i).map(Vec::as_slice).ok_or_else(missing),
            Region::Local(i) => self.locals.get(i).map(Vec::as_slice).ok_or_else(missing),
        }
    }

    fn load(&self, ptr: Pointer) -> InterpResult<Value> {
        self.layout.read(self.region(ptr.region)?, ptr.offset, ptr.pointee)
    }

    fn store(&mut self, ptr: Pointer, value: &Value) -> InterpResult<()> {
        let layout = self.layout;
        let missing = || InterpError::fault(format!("no memory for {:?}", ptr.region));
        let bytes: &mut [u8] = match ptr.region {
            Region::Binding(i) => self.args.bytes_mut(i)?,
            Region::Private(i) => self.private.get_mut(i).ok_or_else(missing)?,
            Region::Workgroup(i) => self.workgroup.get_mut(i).ok_or_else(missing)?,
            Region::Local(i) => self.locals.get_mut(i).ok_or_else(missing)?,
        };
        layout.write(bytes, ptr.offset, ptr.pointee, value)
    }
}

fn literal_value(literal: &Literal) -> InterpResult<Value> {
    match *literal {
        Literal::Bool(b) => Ok(Value::Bool(b)),
        Literal::I32(v) => Ok(Value::I32(v)),
        Literal::U32(v) => Ok(Value::U32(v)),
        Literal::F32(v) => Ok(Value::F32(v)),
        other => Err(InterpError::unsupported(format!("literal {:?}", other))),
    }
}

/// Build a composite of type `ty`; vector constructors flatten vector parts.
fn compose(module: &Module, ty: Handle<Type>, parts: Vec<Value>) -> Value {
    match module.types[ty].inner {
        TypeInner::Vector { .. } => {
            let mut flat = Vec::with_capacity(4);
            for part in parts {
                match part {
                    Value::Composite(inner) => flat.extend(inner),
                    scalar => flat.push(scalar),
                }
            }
            Value::Composite(flat)
        }
        _ => Value::Composite(parts),
    }
}

/// Evaluate a module-scope constant expression.
pub(super) fn const_value(
    module: &Module,
    layout: Layout<'_>,
    handle: Handle<Expression>,
) -> InterpResult<Value> {
    match &module.const_expressions[handle] {
        Expression::Literal(literal) => literal_value(literal),
        Expression::Constant(c) => const_value(module, layout, module.constants[*c].init),
        Expression::ZeroValue(ty) => layout.zero(Pointee::Type(*ty)),
        Expression::Compose { ty, components } => {
            let parts = components
                .iter()
                .map(|c| const_value(module, layout, *c))
                .collect::<InterpResult<Vec<_>>>()?;
            Ok(compose(module, *ty, parts))
        }
        Expression::Splat { size, value } => {
            let v = const_value(module, layout, *value)?;
            Ok(Value::Composite(vec![v; *size as usize]))
        }
        other => Err(InterpError::unsupported(format!(
            "constant expression {:?}",
            other
        ))),
    }
}
