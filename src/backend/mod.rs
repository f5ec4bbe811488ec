//! Backend module - Code generation and native toolchain

pub mod codegen;
pub mod llvm;
pub mod qbe;
pub mod toolchain;

pub use codegen::Backend;
