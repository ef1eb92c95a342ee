//! Values tracked per register during constant recovery.

use crate::signature;
use std::fmt;

/// Placeholder emitted for values the interpreter cannot see through
pub const ENUM_PLACEHOLDER: &str = "enum.type";

/// Value held by a register in the object table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterValue {
    /// `const-string` payload
    StringLiteral(String),
    /// `const-class` payload, as a binary name (`com/example/Foo`)
    TypeReference(String),
    /// `const/*` payload
    IntegerConstant(i64),
    /// Static field read or call result; not recoverable on this path
    EnumMarker,
}

impl RegisterValue {
    /// Builds a type reference from a descriptor such as `Lcom/example/Foo;`
    pub fn type_reference(descriptor: &str) -> Self {
        Self::TypeReference(signature::binary_name(descriptor).to_string())
    }

    /// Returns the integer if this is an integer constant
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::IntegerConstant(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StringLiteral(s) => f.write_str(s),
            Self::TypeReference(name) => f.write_str(name),
            Self::IntegerConstant(n) => write!(f, "{}", n),
            Self::EnumMarker => f.write_str(ENUM_PLACEHOLDER),
        }
    }
}
