use crate::bytecode::{Chunk, OpCode, Program};
use crate::intrinsics::IntrinsicRegistry;
use crate::runtime::{ops, RuntimeError, Scope, Value, VmClosure, MAX_CALL_DEPTH};
use std::rc::Rc;

struct CallFrame {
    chunk: Rc<Chunk>,
    ip: usize,
    scope: Scope,
}

/// Stack-machine executor. Variable access goes through the same shared-frame
/// scope chain as the interpreter, and operators and call resolution go
/// through the same kernels, so the two engines stay observationally
/// equivalent by construction.
pub struct Vm<'a> {
    registry: &'a IntrinsicRegistry,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
}

impl<'a> Vm<'a> {
    pub fn new(registry: &'a IntrinsicRegistry) -> Self {
        Vm {
            registry,
            stack: Vec::new(),
            frames: Vec::new(),
        }
    }

    pub fn run(&mut self, program: &Program, scope: &Scope) -> Result<Value, RuntimeError> {
        self.stack.clear();
        self.frames.clear();
        self.frames.push(CallFrame {
            chunk: program.chunk.clone(),
            ip: 0,
            scope: scope.clone(),
        });

        loop {
            let frame_idx = self.frames.len() - 1;
            let ip = self.frames[frame_idx].ip;

            if ip >= self.frames[frame_idx].chunk.code.len() {
                // Fell off the chunk end: implicit return of the top value.
                if let Some(result) = self.finish_frame() {
                    return Ok(result);
                }
                continue;
            }

            let op = self.frames[frame_idx].chunk.code[ip].clone();
            self.frames[frame_idx].ip = ip + 1;

            match op {
                OpCode::Const(idx) => {
                    let value = self.frames[frame_idx]
                        .chunk
                        .constants
                        .get(idx)
                        .cloned()
                        .ok_or_else(|| {
                            RuntimeError::Failed(format!("constant index {} out of range", idx))
                        })?;
                    self.stack.push(value);
                }
                OpCode::Pop => {
                    self.stack.pop();
                }

                OpCode::Add => self.binary_op(|a, b| ops::add(a, b))?,
                OpCode::Sub => self.binary_op(|a, b| ops::sub(a, b))?,
                OpCode::Mul => self.binary_op(|a, b| ops::mul(a, b))?,
                OpCode::Gt => self.binary_op(|a, b| ops::gt(a, b))?,
                OpCode::Lt => self.binary_op(|a, b| ops::lt(a, b))?,
                OpCode::Eq => self.binary_op(|a, b| ops::eq(a, b).map(Value::Boolean))?,

                OpCode::Load(name) => {
                    let value = self.frames[frame_idx]
                        .scope
                        .get(&name)
                        .ok_or_else(|| RuntimeError::VariableNotFound(name.clone()))?;
                    self.stack.push(value);
                }
                OpCode::Store(name) => {
                    let value = self.pop()?;
                    self.frames[frame_idx].scope.assign(&name, value);
                }
                OpCode::Declare(name) => {
                    let value = self.pop()?;
                    self.frames[frame_idx].scope.declare(name, value);
                }

                OpCode::Jmp(target) => {
                    self.frames[frame_idx].ip = target;
                }
                OpCode::JmpIfFalse(target) => {
                    let value = self.pop()?;
                    let truthy = match value.as_condition() {
                        Some(b) => b,
                        None => {
                            return Err(RuntimeError::TypeMismatch(
                                "Boolean".to_string(),
                                value,
                            ));
                        }
                    };
                    if !truthy {
                        self.frames[frame_idx].ip = target;
                    }
                }

                OpCode::MakeList(size) => {
                    let mut items = Vec::with_capacity(size);
                    for _ in 0..size {
                        items.push(self.pop()?);
                    }
                    items.reverse();
                    self.stack.push(Value::List(items));
                }
                OpCode::MakeClosure(idx) => {
                    let proto = self.frames[frame_idx]
                        .chunk
                        .protos
                        .get(idx)
                        .cloned()
                        .ok_or_else(|| {
                            RuntimeError::Failed(format!("proto index {} out of range", idx))
                        })?;
                    let scope = self.frames[frame_idx].scope.clone();
                    self.stack
                        .push(Value::VmFunction(Rc::new(VmClosure { proto, scope })));
                }

                OpCode::CallNamed(name, argc) => {
                    let mut args = Vec::with_capacity(argc);
                    for _ in 0..argc {
                        args.push(self.pop()?);
                    }
                    args.reverse();

                    // Intrinsic table first, then the scope chain: the same
                    // resolution order the interpreter uses.
                    if self.registry.contains(&name) {
                        let result = self.registry.dispatch(&name, args)?;
                        self.stack.push(result);
                        continue;
                    }

                    match self.frames[frame_idx].scope.get(&name) {
                        Some(Value::VmFunction(closure)) => {
                            if self.frames.len() > MAX_CALL_DEPTH {
                                return Err(RuntimeError::StackOverflow(MAX_CALL_DEPTH));
                            }
                            if args.len() != closure.proto.params.len() {
                                return Err(RuntimeError::Arity(
                                    closure.proto.name.clone(),
                                    closure.proto.params.len(),
                                    args.len(),
                                ));
                            }
                            let frame_scope = closure.scope.call_frame();
                            for (param, value) in closure.proto.params.iter().zip(args) {
                                frame_scope.declare(param.clone(), value);
                            }
                            self.frames.push(CallFrame {
                                chunk: closure.proto.chunk.clone(),
                                ip: 0,
                                scope: frame_scope,
                            });
                        }
                        Some(other) => {
                            return Err(RuntimeError::TypeMismatch(
                                "Function".to_string(),
                                other,
                            ));
                        }
                        None => return Err(RuntimeError::FunctionNotFound(name)),
                    }
                }

                OpCode::Ret => {
                    if let Some(result) = self.finish_frame() {
                        return Ok(result);
                    }
                }
            }
        }
    }

    /// Pop the current frame, handing its result to the caller. Returns the
    /// final value once the outermost frame completes.
    fn finish_frame(&mut self) -> Option<Value> {
        let result = self.stack.pop().unwrap_or(Value::Unit);
        self.frames.pop();
        if self.frames.is_empty() {
            return Some(result);
        }
        self.stack.push(result);
        None
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::Failed("stack underflow".to_string()))
    }

    fn binary_op<F>(&mut self, op_fn: F) -> Result<(), RuntimeError>
    where
        F: Fn(Value, Value) -> Result<Value, RuntimeError>,
    {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = op_fn(a, b)?;
        self.stack.push(result);
        Ok(())
    }
}
