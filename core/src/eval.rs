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

use crate::ast::{Expression, Literal, Node, SealedNode, Statement};
use crate::integrity;
use crate::intrinsics::IntrinsicRegistry;
use crate::runtime::{ops, Closure, RuntimeError, Scope, Value, MAX_CALL_DEPTH};
use std::rc::Rc;

/// Reference executor: a recursive walk with an explicit scope threaded
/// through every call. The registry and its policy are the only state beyond
/// the scope chain, and both are read-only during execution.
pub struct Interpreter<'a> {
    registry: &'a IntrinsicRegistry,
}

impl<'a> Interpreter<'a> {
    pub fn new(registry: &'a IntrinsicRegistry) -> Self {
        Interpreter { registry }
    }

    /// Verify the sealed program unit, then execute it.
    pub fn run(&self, program: &SealedNode, scope: &Scope) -> Result<Value, RuntimeError> {
        integrity::verify(program)?;
        self.eval(&program.content, scope)
    }

    pub fn eval(&self, node: &Node, scope: &Scope) -> Result<Value, RuntimeError> {
        self.eval_node(node, scope, 0)
    }

    fn eval_node(&self, node: &Node, scope: &Scope, depth: usize) -> Result<Value, RuntimeError> {
        match node {
            Node::Statement(stmt) => self.eval_statement(stmt, scope, depth),
            Node::Expression(expr) => self.eval_expression(expr, scope, depth),
        }
    }

    fn eval_block(
        &self,
        stmts: &[Statement],
        scope: &Scope,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        let mut last = Value::Unit;
        for stmt in stmts {
            last = self.eval_statement(stmt, scope, depth)?;
        }
        Ok(last)
    }

    fn eval_statement(
        &self,
        stmt: &Statement,
        scope: &Scope,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        match stmt {
            Statement::Block(stmts) => self.eval_block(stmts, scope, depth),
            Statement::Expression(expr) => self.eval_expression(expr, scope, depth),
            Statement::Assignment { target, value } => {
                let val = self.eval_expression(value, scope, depth)?;
                scope.assign(target, val);
                Ok(Value::Unit)
            }
            Statement::Function(def) => {
                // A body failing verification is never eligible for execution.
                integrity::verify(&def.body)?;
                let closure = Value::Function(Rc::new(Closure {
                    def: def.clone(),
                    scope: scope.clone(),
                }));
                scope.declare(def.name.clone(), closure);
                Ok(Value::Unit)
            }
            Statement::If {
                condition,
                then_block,
                else_block,
            } => {
                let cond = self.eval_expression(condition, scope, depth)?;
                let truthy = match cond.as_condition() {
                    Some(b) => b,
                    None => {
                        return Err(RuntimeError::TypeMismatch("Boolean".to_string(), cond));
                    }
                };
                if truthy {
                    self.eval_block(then_block, scope, depth)
                } else if let Some(stmts) = else_block {
                    self.eval_block(stmts, scope, depth)
                } else {
                    Ok(Value::Unit)
                }
            }
            Statement::While { condition, body } => {
                loop {
                    let cond = self.eval_expression(condition, scope, depth)?;
                    let truthy = match cond.as_condition() {
                        Some(b) => b,
                        None => {
                            return Err(RuntimeError::TypeMismatch("Boolean".to_string(), cond));
                        }
                    };
                    if !truthy {
                        break;
                    }
                    // Loop body runs in the same scope: rebinding is visible
                    // across iterations.
                    self.eval_block(body, scope, depth)?;
                }
                Ok(Value::Unit)
            }
            Statement::FlowAnnotation { .. } => Ok(Value::Unit),
            Statement::NeuroBlock { .. } => Ok(Value::Unit),
        }
    }

    fn eval_expression(
        &self,
        expr: &Expression,
        scope: &Scope,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        match expr {
            Expression::Literal(lit) => Ok(match lit {
                Literal::Integer(i) => Value::Integer(*i),
                Literal::Float(x) => Value::Float(*x),
                Literal::String(s) => Value::String(s.clone()),
                Literal::Boolean(b) => Value::Boolean(*b),
            }),
            Expression::Variable(name) => scope
                .get(name)
                .ok_or_else(|| RuntimeError::VariableNotFound(name.clone())),
            Expression::Hole => Ok(Value::Hole),
            Expression::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expression(item, scope, depth)?);
                }
                Ok(Value::List(values))
            }
            Expression::BinaryOp { op, left, right } => {
                // Strict: both operands evaluate before the op combines them.
                let l = self.eval_expression(left, scope, depth)?;
                let r = self.eval_expression(right, scope, depth)?;
                ops::apply(*op, l, r)
            }
            Expression::Call { callee, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expression(arg, scope, depth)?);
                }
                if self.registry.contains(callee) {
                    return self.registry.dispatch(callee, values);
                }
                match scope.get(callee) {
                    Some(Value::Function(closure)) => self.call_closure(&closure, values, depth),
                    Some(other) => Err(RuntimeError::TypeMismatch("Function".to_string(), other)),
                    None => Err(RuntimeError::FunctionNotFound(callee.clone())),
                }
            }
        }
    }

    fn call_closure(
        &self,
        closure: &Closure,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, RuntimeError> {
        if depth + 1 > MAX_CALL_DEPTH {
            return Err(RuntimeError::StackOverflow(MAX_CALL_DEPTH));
        }
        let def = &closure.def;
        if args.len() != def.params.len() {
            return Err(RuntimeError::Arity(
                def.name.clone(),
                def.params.len(),
                args.len(),
            ));
        }
        // New frame parented on the scope captured at definition time.
        let frame = closure.scope.call_frame();
        for (param, value) in def.params.iter().zip(args) {
            frame.declare(param.clone(), value);
        }
        self.eval_node(&def.body.content, &frame, depth + 1)
    }
}
