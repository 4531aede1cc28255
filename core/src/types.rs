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

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type annotation carried by the AST. Annotations are part of the hashed
/// program content but are declarative only; execution does not enforce them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeAnnotation {
    Integer,
    Float,
    String,
    Boolean,
    Unit,
    List(Box<TypeAnnotation>),                     // List<T>
    Map(Box<TypeAnnotation>, Box<TypeAnnotation>), // Map<K, V>
    Any,
}

impl Default for TypeAnnotation {
    fn default() -> Self {
        TypeAnnotation::Any
    }
}

impl fmt::Display for TypeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeAnnotation::Integer => write!(f, "Int"),
            TypeAnnotation::Float => write!(f, "Float"),
            TypeAnnotation::String => write!(f, "Str"),
            TypeAnnotation::Boolean => write!(f, "Bool"),
            TypeAnnotation::Unit => write!(f, "Unit"),
            TypeAnnotation::Any => write!(f, "Any"),
            TypeAnnotation::List(inner) => write!(f, "List<{}>", inner),
            TypeAnnotation::Map(k, v) => write!(f, "Map<{}, {}>", k, v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation_display_format() {
        assert_eq!(format!("{}", TypeAnnotation::Integer), "Int");
        assert_eq!(format!("{}", TypeAnnotation::String), "Str");
        assert_eq!(
            format!("{}", TypeAnnotation::List(Box::new(TypeAnnotation::Integer))),
            "List<Int>"
        );
        assert_eq!(
            format!(
                "{}",
                TypeAnnotation::Map(
                    Box::new(TypeAnnotation::String),
                    Box::new(TypeAnnotation::Any)
                )
            ),
            "Map<Str, Any>"
        );
    }

    #[test]
    fn test_annotation_default_is_any() {
        assert_eq!(TypeAnnotation::default(), TypeAnnotation::Any);
    }
}
