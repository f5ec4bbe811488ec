//! LLVM Backend
//!
//! Lowers to the SSA IR, verifies it, and prints LLVM assembly. With the
//! `llvm` feature the printed text is parsed and verified again by LLVM.

mod printer;

#[cfg(feature = "llvm")]
mod native;

pub use printer::LlvmText;

use crate::backend::codegen::Backend;
use crate::frontend::ast::Program;
use crate::frontend::semantic::Analysis;
use crate::middle::ir::IrModule;
use crate::middle::ir_gen;
use crate::middle::verify::verify_module;
use crate::utils::{Error, Result};

/// LLVM-based code generator
pub struct LlvmBackend {
    module_name: String,
    module: Option<IrModule>,
}

impl LlvmBackend {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            module: None,
        }
    }

    /// The generated module, once `generate` has run
    pub fn module(&self) -> Option<&IrModule> {
        self.module.as_ref()
    }
}

impl Backend for LlvmBackend {
    fn generate(&mut self, program: &Program, analysis: &Analysis) -> Result<()> {
        let module = ir_gen::generate(&self.module_name, program, analysis)?;
        self.module = Some(module);
        Ok(())
    }

    fn emit(&self) -> Result<String> {
        let module = self
            .module
            .as_ref()
            .ok_or_else(|| Error::CodeGen("no module generated".to_string()))?;
        verify_module(module)?;
        let text = LlvmText(module).to_string();

        #[cfg(feature = "llvm")]
        native::verify_text(&text)?;

        Ok(text)
    }

    fn extension(&self) -> &str {
        "ll"
    }

    fn name(&self) -> &str {
        "llvm"
    }
}
