//! Type System for Spezi
//!
//! A closed set of value types. Struct identity is nominal: two struct
//! types are the same type exactly when their names are equal.

use std::fmt;

/// Value type of an expression, binding, parameter, or field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Bool,
    String,
    I32,
    I64,
    F32,
    F64,
    Struct(String),
    /// Not resolved yet
    Unknown,
    /// Resolution failed; enclosing nodes must not report again
    Error,
}

impl Type {
    /// Source-level spelling, also used in mangled names
    pub fn name(&self) -> &str {
        match self {
            Type::Void => "void",
            Type::Bool => "bool",
            Type::String => "string",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::Struct(name) => name,
            Type::Unknown => "unknown",
            Type::Error => "<error>",
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Type::I32 | Type::I64 | Type::F32 | Type::F64)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::I32 | Type::I64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Type::Struct(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    pub fn struct_name(&self) -> Option<&str> {
        match self {
            Type::Struct(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Allowed `as` conversions: numeric to numeric, and bool to/from integer
pub fn is_valid_cast(from: &Type, to: &Type) -> bool {
    (from.is_number() && to.is_number())
        || (*from == Type::Bool && to.is_int())
        || (from.is_int() && *to == Type::Bool)
}
