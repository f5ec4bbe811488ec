//! Code Generation trait - Backend abstraction
//!
//! Both backends consume the same checked program and produce a textual
//! module that an external toolchain turns into an executable.

use std::fs;
use std::path::Path;

use crate::frontend::ast::Program;
use crate::frontend::semantic::Analysis;
use crate::utils::{Error, Result};

/// Code generation backend trait
pub trait Backend {
    /// Lower a program that analyzed without errors
    fn generate(&mut self, program: &Program, analysis: &Analysis) -> Result<()>;

    /// Serialize the generated module
    fn emit(&self) -> Result<String>;

    /// File extension of the serialized module
    fn extension(&self) -> &str;

    /// Get the backend name
    fn name(&self) -> &str;

    fn emit_to_file(&self, path: &Path) -> Result<()> {
        let text = self.emit()?;
        fs::write(path, text).map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
        log::info!("Wrote {} IR to {}", self.name(), path.display());
        Ok(())
    }
}
