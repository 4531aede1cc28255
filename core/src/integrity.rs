/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the Ark Enclave Runtime.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

//! Content-hash verification for the sealed AST.
//!
//! Tamper detection, not authentication: an attacker who can recompute the
//! digest after editing content defeats it. The goal is to catch corrupted or
//! naively edited program files before any part of them executes.

use crate::ast::{Node, SealedNode, Statement};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Canonicalization failed: {0}")]
    Canonical(#[from] serde_json::Error),
    #[error("Integrity Error: HashMismatch. Expected {expected}, computed {computed}.")]
    HashMismatch { expected: String, computed: String },
}

/// Deterministic serialization used as hashing input. Round-tripping through
/// `serde_json::Value` strips whitespace variance, and the default BTree-backed
/// map serializes object keys in sorted order.
pub fn canonical_json(node: &Node) -> Result<String, IntegrityError> {
    let val = serde_json::to_value(node)?;
    Ok(serde_json::to_string(&val)?)
}

/// Hex SHA-256 digest of the canonical serialization.
pub fn digest(node: &Node) -> Result<String, IntegrityError> {
    let canonical = canonical_json(node)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Verify `sealed` and every sealed node nested inside it (function bodies).
/// Pure and idempotent; must succeed before any part of the tree executes.
pub fn verify(sealed: &SealedNode) -> Result<(), IntegrityError> {
    let computed = digest(&sealed.content)?;
    if computed != sealed.hash {
        return Err(IntegrityError::HashMismatch {
            expected: sealed.hash.clone(),
            computed,
        });
    }
    verify_node(&sealed.content)
}

fn verify_node(node: &Node) -> Result<(), IntegrityError> {
    match node {
        Node::Statement(stmt) => verify_statement(stmt),
        // Expressions carry no sealed children.
        Node::Expression(_) => Ok(()),
    }
}

fn verify_statement(stmt: &Statement) -> Result<(), IntegrityError> {
    match stmt {
        Statement::Block(stmts) => {
            for s in stmts {
                verify_statement(s)?;
            }
            Ok(())
        }
        Statement::Function(def) => verify(&def.body),
        Statement::If {
            then_block,
            else_block,
            ..
        } => {
            for s in then_block {
                verify_statement(s)?;
            }
            if let Some(stmts) = else_block {
                for s in stmts {
                    verify_statement(s)?;
                }
            }
            Ok(())
        }
        Statement::While { body, .. } => {
            for s in body {
                verify_statement(s)?;
            }
            Ok(())
        }
        Statement::Assignment { .. }
        | Statement::FlowAnnotation { .. }
        | Statement::NeuroBlock { .. }
        | Statement::Expression(_) => Ok(()),
    }
}
