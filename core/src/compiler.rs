use crate::ast::{Expression, Literal, Node, Statement};
use crate::bytecode::{Chunk, FnProto, OpCode, Program};
use crate::integrity::{self, IntegrityError};
use crate::runtime::Value;
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompileError {
    /// Anything the VM cannot run must be rejected here, never miscompiled:
    /// the interpreter and the VM are required to agree on every program that
    /// compiles.
    #[error("CompileError: unsupported construct: {0}")]
    Unsupported(&'static str),
    #[error("{0}")]
    Integrity(#[from] IntegrityError),
}

/// Compile a verified AST into a flat chunk. Deterministic: the same node
/// always produces the same instruction sequence and pools.
pub fn compile(node: &Node) -> Result<Program, CompileError> {
    let mut compiler = Compiler::new();
    compiler.emit_node(node)?;
    compiler.chunk.write(OpCode::Ret);
    Ok(Program {
        chunk: Rc::new(compiler.chunk),
    })
}

struct Compiler {
    chunk: Chunk,
}

impl Compiler {
    fn new() -> Self {
        Compiler {
            chunk: Chunk::new(),
        }
    }

    fn emit_const(&mut self, value: Value) {
        let idx = self.chunk.add_constant(value);
        self.chunk.write(OpCode::Const(idx));
    }

    /// Every emit_* leaves exactly one value on the stack; statement result
    /// values then match the interpreter by construction.
    fn emit_node(&mut self, node: &Node) -> Result<(), CompileError> {
        match node {
            Node::Statement(stmt) => self.emit_statement(stmt),
            Node::Expression(expr) => self.emit_expression(expr),
        }
    }

    fn emit_block(&mut self, stmts: &[Statement]) -> Result<(), CompileError> {
        match stmts.split_last() {
            None => {
                self.emit_const(Value::Unit);
                Ok(())
            }
            Some((last, init)) => {
                for stmt in init {
                    self.emit_statement(stmt)?;
                    self.chunk.write(OpCode::Pop);
                }
                self.emit_statement(last)
            }
        }
    }

    fn emit_statement(&mut self, stmt: &Statement) -> Result<(), CompileError> {
        match stmt {
            Statement::Block(stmts) => self.emit_block(stmts),
            Statement::Expression(expr) => self.emit_expression(expr),
            Statement::Assignment { target, value } => {
                self.emit_expression(value)?;
                self.chunk.write(OpCode::Store(target.clone()));
                self.emit_const(Value::Unit);
                Ok(())
            }
            Statement::Function(def) => {
                integrity::verify(&def.body)?;
                let mut sub = Compiler::new();
                sub.emit_node(&def.body.content)?;
                sub.chunk.write(OpCode::Ret);
                let proto = FnProto {
                    name: def.name.clone(),
                    params: def.params.clone(),
                    return_type: def.return_type.clone(),
                    chunk: Rc::new(sub.chunk),
                };
                let idx = self.chunk.add_proto(proto);
                self.chunk.write(OpCode::MakeClosure(idx));
                self.chunk.write(OpCode::Declare(def.name.clone()));
                self.emit_const(Value::Unit);
                Ok(())
            }
            Statement::If {
                condition,
                then_block,
                else_block,
            } => {
                self.emit_expression(condition)?;
                let jump_false = self.chunk.write(OpCode::JmpIfFalse(0));
                self.emit_block(then_block)?;
                let jump_end = self.chunk.write(OpCode::Jmp(0));

                let else_start = self.chunk.code.len();
                self.chunk.code[jump_false] = OpCode::JmpIfFalse(else_start);
                match else_block {
                    Some(stmts) => self.emit_block(stmts)?,
                    None => self.emit_const(Value::Unit),
                }
                let end = self.chunk.code.len();
                self.chunk.code[jump_end] = OpCode::Jmp(end);
                Ok(())
            }
            Statement::While { condition, body } => {
                let loop_start = self.chunk.code.len();
                self.emit_expression(condition)?;
                let jump_exit = self.chunk.write(OpCode::JmpIfFalse(0));
                for stmt in body {
                    self.emit_statement(stmt)?;
                    self.chunk.write(OpCode::Pop);
                }
                self.chunk.write(OpCode::Jmp(loop_start));
                let end = self.chunk.code.len();
                self.chunk.code[jump_exit] = OpCode::JmpIfFalse(end);
                self.emit_const(Value::Unit);
                Ok(())
            }
            // Declarative statements compile to their Unit result.
            Statement::FlowAnnotation { .. } | Statement::NeuroBlock { .. } => {
                self.emit_const(Value::Unit);
                Ok(())
            }
        }
    }

    fn emit_expression(&mut self, expr: &Expression) -> Result<(), CompileError> {
        match expr {
            Expression::Literal(lit) => {
                let value = match lit {
                    Literal::Integer(i) => Value::Integer(*i),
                    Literal::Float(x) => Value::Float(*x),
                    Literal::String(s) => Value::String(s.clone()),
                    Literal::Boolean(b) => Value::Boolean(*b),
                };
                self.emit_const(value);
                Ok(())
            }
            Expression::Variable(name) => {
                self.chunk.write(OpCode::Load(name.clone()));
                Ok(())
            }
            Expression::Hole => {
                self.emit_const(Value::Hole);
                Ok(())
            }
            Expression::List(items) => {
                for item in items {
                    self.emit_expression(item)?;
                }
                self.chunk.write(OpCode::MakeList(items.len()));
                Ok(())
            }
            Expression::BinaryOp { op, left, right } => {
                self.emit_expression(left)?;
                self.emit_expression(right)?;
                use crate::ast::BinOp;
                let opcode = match op {
                    BinOp::Add => OpCode::Add,
                    BinOp::Sub => OpCode::Sub,
                    BinOp::Mul => OpCode::Mul,
                    BinOp::Gt => OpCode::Gt,
                    BinOp::Lt => OpCode::Lt,
                    BinOp::Eq => OpCode::Eq,
                };
                self.chunk.write(opcode);
                Ok(())
            }
            Expression::Call { callee, args } => {
                for arg in args {
                    self.emit_expression(arg)?;
                }
                self.chunk
                    .write(OpCode::CallNamed(callee.clone(), args.len()));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, FunctionDef, SealedNode};
    use crate::types::TypeAnnotation;

    fn int(i: i64) -> Expression {
        Expression::Literal(Literal::Integer(i))
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let node = Node::Statement(Statement::Block(vec![
            Statement::Assignment {
                target: "x".to_string(),
                value: int(1),
            },
            Statement::Expression(Expression::BinaryOp {
                op: BinOp::Add,
                left: Box::new(Expression::Variable("x".to_string())),
                right: Box::new(int(2)),
            }),
        ]));
        let a = compile(&node).unwrap();
        let b = compile(&node).unwrap();
        assert_eq!(format!("{:?}", a.chunk), format!("{:?}", b.chunk));
    }

    #[test]
    fn test_if_without_else_still_produces_a_value() {
        let node = Node::Statement(Statement::If {
            condition: Expression::Literal(Literal::Boolean(false)),
            then_block: vec![Statement::Expression(int(1))],
            else_block: None,
        });
        let program = compile(&node).unwrap();
        // The false branch must materialize Unit, not fall through empty.
        assert!(program
            .chunk
            .code
            .iter()
            .any(|op| matches!(op, OpCode::JmpIfFalse(_))));
        assert!(program
            .chunk
            .constants
            .iter()
            .any(|c| matches!(c, Value::Unit)));
    }

    #[test]
    fn test_function_definition_compiles_to_proto() {
        let body = SealedNode::seal(Node::Expression(Expression::Variable("n".to_string())))
            .unwrap();
        let node = Node::Statement(Statement::Function(FunctionDef {
            name: "id".to_string(),
            params: vec!["n".to_string()],
            return_type: TypeAnnotation::Any,
            body: Box::new(body),
        }));
        let program = compile(&node).unwrap();
        assert_eq!(program.chunk.protos.len(), 1);
        assert_eq!(program.chunk.protos[0].params, vec!["n".to_string()]);
        assert!(program
            .chunk
            .code
            .iter()
            .any(|op| matches!(op, OpCode::MakeClosure(0))));
    }

    #[test]
    fn test_tampered_function_body_fails_compilation() {
        let mut body =
            SealedNode::seal(Node::Expression(int(1))).unwrap();
        body.content = Node::Expression(int(2));
        let node = Node::Statement(Statement::Function(FunctionDef {
            name: "f".to_string(),
            params: vec![],
            return_type: TypeAnnotation::Any,
            body: Box::new(body),
        }));
        match compile(&node) {
            Err(CompileError::Integrity(_)) => {}
            other => panic!("Expected Integrity error, got {:?}", other),
        }
    }
}
