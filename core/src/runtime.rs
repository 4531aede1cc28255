/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the Ark Enclave Runtime.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use crate::ast::FunctionDef;
use crate::bytecode::FnProto;
use crate::integrity::IntegrityError;
use crate::sandbox::{Policy, SandboxViolation};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Call depth shared by both engines so they classify runaway recursion
/// identically.
pub const MAX_CALL_DEPTH: usize = 256;

pub type NativeFn = fn(&Policy, Vec<Value>) -> Result<Value, RuntimeError>;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("TypeError: expected {0}, got {1:?}")]
    TypeMismatch(String, Value),
    #[error("TypeError: {0} expects {1} arguments, got {2}")]
    Arity(String, usize, usize),
    #[error("RuntimeError: variable not found: {0}")]
    VariableNotFound(String),
    #[error("RuntimeError: function not found: {0}")]
    FunctionNotFound(String),
    #[error("RuntimeError: division by zero")]
    DivisionByZero,
    #[error("RuntimeError: call depth exceeded {0}")]
    StackOverflow(usize),
    #[error("RuntimeError: {0}")]
    Failed(String),
    #[error("{0}")]
    Sandbox(#[from] SandboxViolation),
    #[error("{0}")]
    Integrity(#[from] IntegrityError),
}

/// Closure produced by the tree-walking interpreter: the definition plus the
/// scope chain captured where it was defined.
pub struct Closure {
    pub def: FunctionDef,
    pub scope: Scope,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}>", self.def.name)
    }
}

/// Closure produced by the bytecode compiler: the compiled prototype plus the
/// scope captured at the MakeClosure site.
pub struct VmClosure {
    pub proto: Rc<FnProto>,
    pub scope: Scope,
}

impl fmt::Debug for VmClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}>", self.proto.name)
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Unit,
    /// Sentinel for an intentionally unresolved code region.
    Hole,
    List(Vec<Value>),
    Namespace(HashMap<String, Value>),
    Set(Vec<Value>),
    Function(Rc<Closure>),
    VmFunction(Rc<VmClosure>),
}

impl Value {
    /// Truthiness for If/While conditions. Anything but Boolean or Integer is
    /// a type error at the call site.
    pub fn as_condition(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Unit, Value::Unit) => true,
            (Value::Hole, Value::Hole) => true,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Namespace(a), Value::Namespace(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::VmFunction(a), Value::VmFunction(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Unit => write!(f, "()"),
            Value::Hole => write!(f, "<hole>"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Namespace(map) => {
                // Sorted so output is stable across runs and engines.
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, k) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, map[*k])?;
                }
                write!(f, "}}")
            }
            Value::Set(items) => {
                write!(f, "#{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
            Value::Function(c) => write!(f, "<fn {}>", c.def.name),
            Value::VmFunction(c) => write!(f, "<fn {}>", c.proto.name),
        }
    }
}

struct Frame {
    variables: HashMap<String, Value>,
    parent: Option<Scope>,
    call_boundary: bool,
}

/// Chain of lexical frames. Frames are shared (`Rc<RefCell>`) so a closure's
/// captured chain observes later bindings in its defining scope.
#[derive(Clone)]
pub struct Scope {
    frame: Rc<RefCell<Frame>>,
}

// Frame chains can be cyclic through captured closures; keep Debug shallow.
impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<scope>")
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            frame: Rc::new(RefCell::new(Frame {
                variables: HashMap::new(),
                parent: None,
                call_boundary: false,
            })),
        }
    }

    /// Child frame for a function call. Crossing it stops the assignment
    /// walk but not lookup.
    pub fn call_frame(&self) -> Self {
        Scope {
            frame: Rc::new(RefCell::new(Frame {
                variables: HashMap::new(),
                parent: Some(self.clone()),
                call_boundary: true,
            })),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let frame = self.frame.borrow();
        if let Some(v) = frame.variables.get(name) {
            return Some(v.clone());
        }
        match &frame.parent {
            Some(parent) => parent.get(name),
            None => None,
        }
    }

    /// Bind unconditionally in this frame (parameters, function definitions).
    pub fn declare(&self, name: String, value: Value) {
        self.frame.borrow_mut().variables.insert(name, value);
    }

    /// Rebind the nearest existing binding reachable without crossing a call
    /// boundary; otherwise create a binding in the innermost frame.
    pub fn assign(&self, name: &str, value: Value) {
        let mut current = self.clone();
        loop {
            let hit_boundary;
            {
                let mut frame = current.frame.borrow_mut();
                if frame.variables.contains_key(name) {
                    frame.variables.insert(name.to_string(), value);
                    return;
                }
                hit_boundary = frame.call_boundary;
            }
            if hit_boundary {
                break;
            }
            let parent = current.frame.borrow().parent.clone();
            match parent {
                Some(p) => current = p,
                None => break,
            }
        }
        self.declare(name.to_string(), value);
    }
}

pub mod ops {
    //! Binary operators shared by the interpreter and the VM. Keeping one
    //! implementation is what makes the two engines agree bit-for-bit on
    //! promotion and error classification.

    use super::{RuntimeError, Value};
    use crate::ast::BinOp;

    pub fn apply(op: BinOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
        match op {
            BinOp::Add => add(left, right),
            BinOp::Sub => sub(left, right),
            BinOp::Mul => mul(left, right),
            BinOp::Gt => gt(left, right),
            BinOp::Lt => lt(left, right),
            BinOp::Eq => eq(left, right).map(Value::Boolean),
        }
    }

    pub fn add(left: Value, right: Value) -> Result<Value, RuntimeError> {
        match (left, right) {
            (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a + b)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
            (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(a as f64 + b)),
            (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a + b as f64)),
            (Value::String(mut a), Value::String(b)) => {
                a.push_str(&b);
                Ok(Value::String(a))
            }
            (l, r) => Err(mismatch("numeric or String operands", l, r)),
        }
    }

    pub fn sub(left: Value, right: Value) -> Result<Value, RuntimeError> {
        match (left, right) {
            (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a - b)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
            (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(a as f64 - b)),
            (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a - b as f64)),
            (l, r) => Err(mismatch("numeric operands", l, r)),
        }
    }

    pub fn mul(left: Value, right: Value) -> Result<Value, RuntimeError> {
        match (left, right) {
            (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a * b)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)),
            (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(a as f64 * b)),
            (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a * b as f64)),
            (l, r) => Err(mismatch("numeric operands", l, r)),
        }
    }

    pub fn gt(left: Value, right: Value) -> Result<Value, RuntimeError> {
        ordering(left, right).map(|(a, b)| Value::Boolean(a > b))
    }

    pub fn lt(left: Value, right: Value) -> Result<Value, RuntimeError> {
        ordering(left, right).map(|(a, b)| Value::Boolean(a < b))
    }

    /// Structural equality with numeric promotion. Comparing values of
    /// incompatible kinds is a TypeError, not `false`.
    pub fn eq(left: Value, right: Value) -> Result<bool, RuntimeError> {
        match (left, right) {
            (Value::Integer(a), Value::Integer(b)) => Ok(a == b),
            (Value::Float(a), Value::Float(b)) => Ok(a == b),
            (Value::Integer(a), Value::Float(b)) => Ok(a as f64 == b),
            (Value::Float(a), Value::Integer(b)) => Ok(a == b as f64),
            (Value::String(a), Value::String(b)) => Ok(a == b),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a == b),
            (Value::Unit, Value::Unit) => Ok(true),
            (Value::Hole, Value::Hole) => Ok(true),
            (Value::List(a), Value::List(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (x, y) in a.into_iter().zip(b) {
                    if !eq(x, y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (l, r) => Err(mismatch("comparable operands", l, r)),
        }
    }

    fn ordering(left: Value, right: Value) -> Result<(f64, f64), RuntimeError> {
        match (left, right) {
            (Value::Integer(a), Value::Integer(b)) => Ok((a as f64, b as f64)),
            (Value::Float(a), Value::Float(b)) => Ok((a, b)),
            (Value::Integer(a), Value::Float(b)) => Ok((a as f64, b)),
            (Value::Float(a), Value::Integer(b)) => Ok((a, b as f64)),
            (Value::String(a), Value::String(b)) => {
                // Lexicographic order, reported through the same numeric path.
                use std::cmp::Ordering;
                let ord = match a.cmp(&b) {
                    Ordering::Less => (-1.0, 0.0),
                    Ordering::Equal => (0.0, 0.0),
                    Ordering::Greater => (1.0, 0.0),
                };
                Ok(ord)
            }
            (l, r) => Err(mismatch("ordered operands", l, r)),
        }
    }

    fn mismatch(expected: &str, left: Value, right: Value) -> RuntimeError {
        // Report the operand that broke the pattern; mirrors how intrinsics
        // report their first bad argument.
        let offender = if matches!(left, Value::Integer(_) | Value::Float(_)) {
            right
        } else {
            left
        };
        RuntimeError::TypeMismatch(expected.to_string(), offender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_lookup_walks_outward() {
        let root = Scope::new();
        root.declare("x".to_string(), Value::Integer(1));
        let call = root.call_frame();
        assert_eq!(call.get("x"), Some(Value::Integer(1)));
        assert_eq!(call.get("y"), None);
    }

    #[test]
    fn test_assignment_rebinding_stops_at_call_boundary() {
        let root = Scope::new();
        root.declare("x".to_string(), Value::Integer(1));

        // Assignment inside a call frame must not leak into the caller.
        let call = root.call_frame();
        call.assign("x", Value::Integer(2));
        assert_eq!(call.get("x"), Some(Value::Integer(2)));
        assert_eq!(root.get("x"), Some(Value::Integer(1)));
    }

    #[test]
    fn test_assignment_rebinds_within_frame() {
        let scope = Scope::new();
        scope.assign("n", Value::Integer(0));
        scope.assign("n", Value::Integer(5));
        assert_eq!(scope.get("n"), Some(Value::Integer(5)));
    }

    #[test]
    fn test_closure_scope_sees_later_bindings() {
        // A captured chain is shared, not snapshotted: a function defined
        // before a sibling binding still resolves it at call time.
        let root = Scope::new();
        let captured = root.clone();
        root.declare("late".to_string(), Value::Integer(9));
        assert_eq!(captured.get("late"), Some(Value::Integer(9)));
    }

    #[test]
    fn test_ops_numeric_promotion() {
        assert_eq!(
            ops::add(Value::Integer(2), Value::Float(0.5)).unwrap(),
            Value::Float(2.5)
        );
        assert_eq!(
            ops::mul(Value::Float(2.0), Value::Integer(3)).unwrap(),
            Value::Float(6.0)
        );
        assert_eq!(
            ops::sub(Value::Integer(7), Value::Integer(3)).unwrap(),
            Value::Integer(4)
        );
    }

    #[test]
    fn test_ops_string_concat_and_order() {
        assert_eq!(
            ops::add(Value::String("ab".into()), Value::String("cd".into())).unwrap(),
            Value::String("abcd".into())
        );
        assert_eq!(
            ops::lt(Value::String("a".into()), Value::String("b".into())).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_ops_incompatible_kinds_are_type_errors() {
        match ops::eq(Value::String("1".into()), Value::Integer(1)) {
            Err(RuntimeError::TypeMismatch(..)) => {}
            other => panic!("Expected TypeMismatch, got {:?}", other),
        }
        match ops::add(Value::Integer(1), Value::Boolean(true)) {
            Err(RuntimeError::TypeMismatch(..)) => {}
            other => panic!("Expected TypeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_error_display_carries_class_keyword() {
        let e = RuntimeError::TypeMismatch("Integer".to_string(), Value::Unit);
        assert!(e.to_string().contains("TypeError"));
        let e = RuntimeError::Sandbox(SandboxViolation::EmptyCommand);
        assert!(e.to_string().contains("SandboxViolation"));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Integer(55).to_string(), "55");
        assert_eq!(Value::String("Sovereign".into()).to_string(), "Sovereign");
        assert_eq!(
            Value::List(vec![Value::Integer(1), Value::Integer(2)]).to_string(),
            "[1, 2]"
        );
        assert_eq!(Value::Hole.to_string(), "<hole>");
        assert_eq!(Value::Unit.to_string(), "()");
    }

    #[test]
    fn test_condition_coercion() {
        assert_eq!(Value::Boolean(true).as_condition(), Some(true));
        assert_eq!(Value::Integer(0).as_condition(), Some(false));
        assert_eq!(Value::Integer(-3).as_condition(), Some(true));
        assert_eq!(Value::String("x".into()).as_condition(), None);
    }
}
