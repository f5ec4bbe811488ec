//! External toolchain invocation
//!
//! Turns an emitted IR file into an executable with the platform tools:
//! `clang` for LLVM assembly, `qbe` followed by `cc` for QBE IL.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};

use crate::driver::BackendKind;

/// Libraries linked when the user names none
pub const DEFAULT_LIBRARIES: &[&str] = &["c", "m"];

/// One external command
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
}

impl Invocation {
    fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Command line as typed in a shell, for logs and errors
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    /// Run to completion; a non-zero exit status is an error
    pub fn run(&self) -> Result<()> {
        log::info!("Running: {}", self.display());
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .with_context(|| format!("failed to start `{}`", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "`{}` failed with {}\n{}",
                self.display(),
                output.status,
                stderr.trim_end()
            );
        }
        Ok(())
    }
}

/// What the toolchain needs to produce an executable
#[derive(Debug, Clone)]
pub struct LinkRequest<'a> {
    pub backend: BackendKind,
    pub ir_file: &'a Path,
    pub output: &'a Path,
    pub opt_level: u8,
    pub libraries: &'a [String],
    pub keep_ir: bool,
}

impl LinkRequest<'_> {
    fn library_flags(&self) -> Vec<String> {
        if self.libraries.is_empty() {
            DEFAULT_LIBRARIES.iter().map(|l| format!("-l{}", l)).collect()
        } else {
            self.libraries.iter().map(|l| format!("-l{}", l)).collect()
        }
    }

    /// Assembly file produced by `qbe`
    fn assembly_file(&self) -> PathBuf {
        self.ir_file.with_extension("s")
    }

    /// The commands, in order, that build the executable
    pub fn invocations(&self) -> Vec<Invocation> {
        match self.backend {
            BackendKind::Llvm => vec![Invocation::new("clang")
                .arg(self.ir_file)
                .arg("-o")
                .arg(self.output)
                .arg(format!("-O{}", self.opt_level))
                .args(self.library_flags())],
            BackendKind::Qbe => {
                let asm = self.assembly_file();
                vec![
                    Invocation::new("qbe").arg("-o").arg(&asm).arg(self.ir_file),
                    Invocation::new("cc")
                        .arg(&asm)
                        .arg("-o")
                        .arg(self.output)
                        .args(self.library_flags()),
                ]
            }
        }
    }

    /// Run every command, then remove the intermediate files
    pub fn run(&self) -> Result<()> {
        let result = self.invocations().iter().try_for_each(Invocation::run);

        if self.backend == BackendKind::Qbe {
            remove_quietly(&self.assembly_file());
        }
        if !self.keep_ir {
            remove_quietly(self.ir_file);
        }
        result
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        log::debug!("could not remove {}: {}", path.display(), e);
    }
}
