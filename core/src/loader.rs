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

use crate::ast::SealedNode;
use crate::integrity::{self, IntegrityError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("ParseError: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0}")]
    Integrity(#[from] IntegrityError),
}

/// Parse the JSON wire format and verify the whole unit before anything may
/// trust it. Externally produced ASTs never skip this gate.
pub fn load_program(json: &str) -> Result<SealedNode, LoadError> {
    let sealed: SealedNode = serde_json::from_str(json)?;
    integrity::verify(&sealed)?;
    Ok(sealed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expression, Literal, Node};

    fn sealed_int(i: i64) -> SealedNode {
        SealedNode::seal(Node::Expression(Expression::Literal(Literal::Integer(i)))).unwrap()
    }

    #[test]
    fn test_load_valid_program() {
        let json = serde_json::to_string(&sealed_int(7)).unwrap();
        let loaded = load_program(&json).unwrap();
        assert_eq!(loaded, sealed_int(7));
    }

    #[test]
    fn test_load_rejects_tampered_hash() {
        let mut sealed = sealed_int(7);
        sealed.hash = "0".repeat(64);
        let json = serde_json::to_string(&sealed).unwrap();
        match load_program(&json) {
            Err(LoadError::Integrity(IntegrityError::HashMismatch { .. })) => {}
            other => panic!("Expected HashMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        match load_program("{not json") {
            Err(LoadError::Parse(_)) => {}
            other => panic!("Expected Parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_text_carries_class_keywords() {
        let mut sealed = sealed_int(7);
        sealed.hash = "0".repeat(64);
        let json = serde_json::to_string(&sealed).unwrap();
        let err = load_program(&json).unwrap_err();
        assert!(err.to_string().contains("HashMismatch"));

        let err = load_program("{not json").unwrap_err();
        assert!(err.to_string().contains("ParseError"));
    }
}
