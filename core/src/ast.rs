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

use crate::integrity::{self, IntegrityError};
use crate::types::TypeAnnotation;
use serde::{Deserialize, Serialize};

/// Source location metadata. Carried for tooling, never consulted by
/// execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

/// Content-addressed AST node.
/// `hash` is the hex SHA-256 digest of the canonical JSON serialization of
/// `content` (see integrity.rs). The invariant `hash == digest(content)` must
/// hold before the node is eligible for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedNode {
    pub hash: String,
    pub content: Node,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl SealedNode {
    /// Seal `content` by computing its canonical digest.
    pub fn seal(content: Node) -> Result<Self, IntegrityError> {
        let hash = integrity::digest(&content)?;
        Ok(SealedNode {
            hash,
            content,
            span: None,
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Statement(Statement),
    Expression(Expression),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    #[serde(default)]
    pub return_type: TypeAnnotation,
    pub body: Box<SealedNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Block(Vec<Statement>),
    Function(FunctionDef),
    Assignment {
        target: String,
        value: Expression,
    },
    If {
        condition: Expression,
        then_block: Vec<Statement>,
        else_block: Option<Vec<Statement>>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    /// Declares a type for a variable. Recorded in the hashed content,
    /// no-op at runtime.
    FlowAnnotation {
        target: String,
        ty: TypeAnnotation,
    },
    /// Opaque model-training block. The core executes it as a no-op; the
    /// directives payload is preserved verbatim so it still participates in
    /// integrity hashing.
    NeuroBlock {
        name: String,
        directives: serde_json::Value,
    },
    Expression(Expression),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Gt,
    Lt,
    Eq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Literal(Literal),
    Variable(String),
    /// `callee` is a flat name; dotted intrinsic names (`sys.fs.write`) are
    /// plain keys, resolved by the engine against the registry first and the
    /// scope chain second.
    Call {
        callee: String,
        args: Vec<Expression>,
    },
    List(Vec<Expression>),
    BinaryOp {
        op: BinOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// Intentionally unresolved placeholder. Evaluates to the Hole sentinel
    /// value, never fails.
    Hole,
}
