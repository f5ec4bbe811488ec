//! Compilation driver
//!
//! Owns the options and per-compilation state, and runs the pipeline:
//! load and parse, analyze, report diagnostics, generate IR with the
//! selected backend, and hand the IR to the native toolchain.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::ValueEnum;

use crate::backend::llvm::LlvmBackend;
use crate::backend::qbe::QbeBackend;
use crate::backend::toolchain::LinkRequest;
use crate::backend::Backend;
use crate::frontend::ast::Program;
use crate::frontend::module::ModuleLoader;
use crate::frontend::semantic::{analyze, Analysis};
use crate::utils::diagnostic::{render_human, render_json};
use crate::utils::{Diagnostics, Error, Level, SourceMap};

/// Which IR the program is lowered to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    #[default]
    Llvm,
    Qbe,
}

/// How diagnostics are printed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum MessageFormat {
    #[default]
    Human,
    Json,
}

/// Compilation options
#[derive(Debug, Clone, Default)]
pub struct CompilationOptions {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub backend: BackendKind,
    /// Write the IR file and stop
    pub emit_ir_only: bool,
    /// Leave the IR file next to the executable
    pub keep_ir: bool,
    pub verbose: bool,
    /// Passed to the native toolchain
    pub opt_level: u8,
    pub libraries: Vec<String>,
    pub include_paths: Vec<PathBuf>,
    pub message_format: MessageFormat,
}

/// State of one compilation
pub struct CompilationContext {
    pub options: CompilationOptions,
    pub sources: SourceMap,
    /// Canonical paths of every file already spliced in
    pub loaded: HashSet<PathBuf>,
    /// Next free syntax node id across all loaded files
    pub next_node_id: u32,
}

/// Front end result
pub enum Checked {
    Accepted { program: Program, analysis: Analysis },
    /// At least one error was reported; nothing may be generated
    Rejected(Diagnostics),
}

/// What a compilation produced
#[derive(Debug, Clone, PartialEq)]
pub enum CompilationOutcome {
    Failed { errors: usize },
    Checked,
    Emitted(PathBuf),
    Built(PathBuf),
}

impl CompilationContext {
    pub fn new(options: CompilationOptions) -> Self {
        Self {
            options,
            sources: SourceMap::new(),
            loaded: HashSet::new(),
            next_node_id: 0,
        }
    }

    /// Parse the input with its imports and analyze it
    pub fn check(&mut self) -> Result<Checked> {
        let input = self.options.input.clone();
        log::info!("Checking {}", input.display());

        let mut diagnostics = Diagnostics::new();
        let program = ModuleLoader::new(self, &mut diagnostics).load_entry(&input)?;
        Ok(self.finish_check(program, diagnostics))
    }

    /// Like [`check`](Self::check) for source text that is already in memory
    #[cfg(test)]
    pub fn check_text(&mut self, path: &Path, text: &str) -> Checked {
        let mut diagnostics = Diagnostics::new();
        let program = ModuleLoader::new(self, &mut diagnostics).load_text(path, text.to_string());
        self.finish_check(program, diagnostics)
    }

    fn finish_check(&mut self, program: Program, mut diagnostics: Diagnostics) -> Checked {
        // syntax errors stop the pipeline before analysis
        if diagnostics.has_errors() {
            self.report(&diagnostics);
            return Checked::Rejected(diagnostics);
        }

        let mut analysis = analyze(&program);
        diagnostics.extend(std::mem::take(&mut analysis.diagnostics));
        self.report(&diagnostics);

        if diagnostics.has_errors() {
            return Checked::Rejected(diagnostics);
        }
        analysis.diagnostics = diagnostics;
        Checked::Accepted { program, analysis }
    }

    /// Print diagnostics to stderr in the configured format; `info` only
    /// when verbose
    fn report(&self, diagnostics: &Diagnostics) {
        let shown = diagnostics
            .iter()
            .filter(|d| self.options.verbose || d.level > Level::Info);
        for diag in shown {
            match self.options.message_format {
                MessageFormat::Human => eprint!("{}", render_human(diag, &self.sources)),
                MessageFormat::Json => eprintln!("{}", render_json(diag, &self.sources)),
            }
        }
    }

    fn backend(&self) -> Box<dyn Backend> {
        match self.options.backend {
            BackendKind::Llvm => Box::new(LlvmBackend::new(&self.module_name())),
            BackendKind::Qbe => Box::new(QbeBackend::new()),
        }
    }

    fn module_name(&self) -> String {
        self.options
            .input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("module")
            .to_string()
    }

    /// Run the whole pipeline
    pub fn compile(&mut self) -> Result<CompilationOutcome> {
        let (program, analysis) = match self.check()? {
            Checked::Accepted { program, analysis } => (program, analysis),
            Checked::Rejected(diagnostics) => {
                return Ok(CompilationOutcome::Failed {
                    errors: diagnostics.error_count(),
                })
            }
        };

        let mut backend = self.backend();
        log::info!("Generating code with the {} backend", backend.name());
        backend
            .generate(&program, &analysis)
            .map_err(|e| backend_error(e, "code generation failed"))?;

        let input = &self.options.input;
        if self.options.emit_ir_only {
            let path = self
                .options
                .output
                .clone()
                .unwrap_or_else(|| input.with_extension(backend.extension()));
            backend
                .emit_to_file(&path)
                .map_err(|e| backend_error(e, "could not write IR"))?;
            return Ok(CompilationOutcome::Emitted(path));
        }

        let executable = self
            .options
            .output
            .clone()
            .unwrap_or_else(|| input.with_extension(""));
        let ir_file = executable.with_extension(backend.extension());
        backend
            .emit_to_file(&ir_file)
            .map_err(|e| backend_error(e, "could not write IR"))?;

        LinkRequest {
            backend: self.options.backend,
            ir_file: &ir_file,
            output: &executable,
            opt_level: self.options.opt_level,
            libraries: &self.options.libraries,
            keep_ir: self.options.keep_ir,
        }
        .run()?;

        log::info!("Built {}", executable.display());
        Ok(CompilationOutcome::Built(executable))
    }
}

/// Backend failures on a checked program are compiler bugs, except I/O
fn backend_error(e: Error, context: &'static str) -> anyhow::Error {
    if e.is_internal() {
        anyhow::Error::new(e).context("internal compiler error")
    } else {
        anyhow::Error::new(e).context(context)
    }
}

/// Compile with the given options
pub fn compile(options: CompilationOptions) -> Result<CompilationOutcome> {
    CompilationContext::new(options).compile()
}

/// Parse and analyze only
pub fn check(options: CompilationOptions) -> Result<CompilationOutcome> {
    Ok(match CompilationContext::new(options).check()? {
        Checked::Accepted { .. } => CompilationOutcome::Checked,
        Checked::Rejected(diagnostics) => CompilationOutcome::Failed {
            errors: diagnostics.error_count(),
        },
    })
}
