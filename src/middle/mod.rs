//! Middle-end module - shared lowering services and the SSA backend IR

pub mod ir;
pub mod ir_gen;
pub mod layout;
pub mod mangle;
pub mod symbols;
pub mod verify;

#[cfg(test)]
pub mod interp;
