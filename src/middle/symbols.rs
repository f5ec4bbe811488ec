//! Program-wide symbol tables and call resolution
//!
//! The analyzer and both backends resolve calls through [`SymbolTables`],
//! so a call that type-checks always lowers to the same target.
//!
//! Resolution order: an `extern` whose parameter types equal the argument
//! types, then user functions in declaration order. An extension method is
//! compared as `[receiver] + params`. The first match wins.

use std::collections::HashMap;

use crate::frontend::ast::{ExternFnDef, FnDef, Program, StructDef};
use crate::middle::mangle::{mangle, mangle_fn};
use crate::types::Type;

/// A resolved call target
#[derive(Debug, Clone, Copy)]
pub enum Callee<'p> {
    Extern(&'p ExternFnDef),
    User(&'p FnDef),
}

impl<'p> Callee<'p> {
    pub fn ret(&self) -> &'p Type {
        match self {
            Callee::Extern(e) => &e.ret,
            Callee::User(f) => &f.ret,
        }
    }

    /// Parameter types as seen by the caller, receiver first
    pub fn signature(&self) -> Vec<Type> {
        match self {
            Callee::Extern(e) => e.param_types(),
            Callee::User(f) => f.call_signature(),
        }
    }

    pub fn linkage_name(&self) -> String {
        match self {
            Callee::Extern(e) => mangle("", &e.name, &e.param_types(), None, true),
            Callee::User(f) => mangle_fn(f),
        }
    }

    /// Whether the first argument is an extension receiver
    pub fn has_receiver(&self) -> bool {
        matches!(self, Callee::User(f) if f.extension_of.is_some())
    }
}

/// Why a call could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Nothing with this name is declared
    NotFound,
    /// Candidates exist but none accepts these argument types
    NoMatch,
}

/// Structs, externs and user functions of one program
pub struct SymbolTables<'p> {
    structs: HashMap<&'p str, &'p StructDef>,
    externs: Vec<&'p ExternFnDef>,
    functions: Vec<&'p FnDef>,
}

impl<'p> SymbolTables<'p> {
    pub fn build(program: &'p Program) -> Self {
        let mut structs = HashMap::new();
        for s in program.structs() {
            structs.entry(s.name.as_str()).or_insert(s);
        }
        Self {
            structs,
            externs: program.externs().collect(),
            functions: program.functions().collect(),
        }
    }

    pub fn struct_def(&self, name: &str) -> Option<&'p StructDef> {
        self.structs.get(name).copied()
    }

    /// Type of `member` on the struct type `ty`, with its index
    pub fn field(&self, ty: &Type, member: &str) -> Option<(usize, &'p Type)> {
        let def = self.struct_def(ty.struct_name()?)?;
        def.field(member).map(|(i, f)| (i, &f.ty))
    }

    pub fn resolve(&self, name: &str, args: &[Type]) -> Result<Callee<'p>, ResolveError> {
        let mut seen = false;

        for e in self.externs.iter().filter(|e| e.name == name) {
            seen = true;
            if e.params.len() == args.len() && e.params.iter().zip(args).all(|(p, a)| &p.ty == a) {
                log::trace!("'{}' resolved to extern", name);
                return Ok(Callee::Extern(e));
            }
        }

        for f in self.functions.iter().filter(|f| f.name == name) {
            seen = true;
            if f.call_signature() == args {
                log::trace!("'{}' resolved to {}", name, mangle_fn(f));
                return Ok(Callee::User(f));
            }
        }

        if seen {
            Err(ResolveError::NoMatch)
        } else {
            Err(ResolveError::NotFound)
        }
    }
}
