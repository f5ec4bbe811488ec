//! Linkage names
//!
//! `[module_][Receiver_]name[_argType...]`, with dots in the module path
//! replaced by underscores. `extern` declarations and `main` keep their
//! source name so the platform linker can find them.

use crate::frontend::ast::FnDef;
use crate::types::Type;

pub const ENTRY_POINT: &str = "main";

pub fn mangle(
    module: &str,
    name: &str,
    arg_types: &[Type],
    receiver: Option<&Type>,
    is_extern: bool,
) -> String {
    if is_extern || name == ENTRY_POINT {
        return name.to_string();
    }

    let mut out = String::new();
    if !module.is_empty() {
        out.push_str(&module.replace('.', "_"));
        out.push('_');
    }
    if let Some(receiver) = receiver {
        out.push_str(&receiver.name());
        out.push('_');
    }
    out.push_str(name);
    for ty in arg_types {
        out.push('_');
        out.push_str(&ty.name());
    }
    out
}

/// Linkage name of a user function
pub fn mangle_fn(f: &FnDef) -> String {
    let params: Vec<Type> = f.params.iter().map(|p| p.ty.clone()).collect();
    mangle(&f.module, &f.name, &params, f.extension_of.as_ref(), false)
}
