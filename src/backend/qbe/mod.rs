//! QBE Backend
//!
//! Lowers straight from the checked tree to QBE's intermediate language.
//! There is no verification step; `qbe` itself rejects malformed input.

pub mod codegen;
mod emit;
pub mod ir;

#[cfg(test)]
pub mod interp;

pub use emit::QbeText;

use crate::backend::codegen::Backend;
use crate::frontend::ast::Program;
use crate::frontend::semantic::Analysis;
use crate::utils::{Error, Result};

use self::ir::QModule;

/// QBE code generator
#[derive(Default)]
pub struct QbeBackend {
    module: Option<QModule>,
}

impl QbeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The generated module, once `generate` has run
    pub fn module(&self) -> Option<&QModule> {
        self.module.as_ref()
    }
}

impl Backend for QbeBackend {
    fn generate(&mut self, program: &Program, analysis: &Analysis) -> Result<()> {
        self.module = Some(codegen::generate(program, analysis)?);
        Ok(())
    }

    fn emit(&self) -> Result<String> {
        let module = self
            .module
            .as_ref()
            .ok_or_else(|| Error::CodeGen("no module generated".to_string()))?;
        Ok(QbeText(module).to_string())
    }

    fn extension(&self) -> &str {
        "ssa"
    }

    fn name(&self) -> &str {
        "qbe"
    }
}
