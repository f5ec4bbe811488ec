//! Module loading for Spezi
//!
//! `import a.b` splices the items of `a/b.spz` into the importing program.
//! Each file is spliced at most once per compilation; the visited set lives
//! on the [`CompilationContext`] so cyclic imports terminate.

use std::fs;
use std::path::{Path, PathBuf};

use crate::driver::CompilationContext;
use crate::frontend::ast::{ImportDecl, Item, Program};
use crate::frontend::parser::parse_source;
use crate::utils::{Diagnostics, Error, Level, Result};

/// Source file extension
pub const SOURCE_EXT: &str = "spz";

/// Resolves and splices imports
pub struct ModuleLoader<'a> {
    ctx: &'a mut CompilationContext,
    diagnostics: &'a mut Diagnostics,
}

impl<'a> ModuleLoader<'a> {
    pub fn new(ctx: &'a mut CompilationContext, diagnostics: &'a mut Diagnostics) -> Self {
        Self { ctx, diagnostics }
    }

    /// Load the entry file and everything it imports
    pub fn load_entry(&mut self, path: &Path) -> Result<Program> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
        Ok(self.load_text(path, text))
    }

    /// Load already-read source text as the main file
    pub fn load_text(&mut self, path: &Path, text: String) -> Program {
        self.ctx.loaded.insert(canonical(path));
        let items = self.load_file(path, text, "");
        Program { items }
    }

    fn load_file(&mut self, path: &Path, text: String, module: &str) -> Vec<Item> {
        log::debug!("Parsing {} (module '{}')", path.display(), module);

        let file_id = self.ctx.sources.add(path.to_path_buf(), text);
        let parsed = match self.ctx.sources.get(file_id) {
            Some(file) => parse_source(&file.text, file_id, self.ctx.next_node_id),
            None => return Vec::new(),
        };

        let program = match parsed {
            Ok((program, next_id)) => {
                self.ctx.next_node_id = next_id;
                program
            }
            Err(errors) => {
                for e in errors {
                    self.diagnostics.report(Level::Error, e.to_string(), e.span());
                }
                return Vec::new();
            }
        };

        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut items = Vec::with_capacity(program.items.len());

        for item in program.items {
            match item {
                Item::Import(import) => items.extend(self.splice_import(&import, &base_dir)),
                Item::Fn(mut f) => {
                    f.module = module.to_string();
                    items.push(Item::Fn(f));
                }
                other => items.push(other),
            }
        }

        items
    }

    fn splice_import(&mut self, import: &ImportDecl, base_dir: &Path) -> Vec<Item> {
        let dotted = import.dotted();
        let Some(path) = self.resolve(import, base_dir) else {
            let e = Error::ModuleNotFound {
                name: dotted,
                span: import.span,
            };
            self.diagnostics.report(Level::Error, e.to_string(), e.span());
            return Vec::new();
        };

        if !self.ctx.loaded.insert(canonical(&path)) {
            log::debug!("Module '{}' already loaded, skipping", dotted);
            return Vec::new();
        }

        match fs::read_to_string(&path) {
            Ok(text) => {
                log::info!("Importing '{}' from {}", dotted, path.display());
                self.load_file(&path, text, &dotted)
            }
            Err(e) => {
                self.diagnostics.error(
                    format!("Could not read module '{}': {}", dotted, e),
                    import.span,
                );
                Vec::new()
            }
        }
    }

    /// Search the importing file's directory, each include path, then the
    /// current directory
    fn resolve(&self, import: &ImportDecl, base_dir: &Path) -> Option<PathBuf> {
        let relative = module_relative_path(&import.path);

        std::iter::once(base_dir.to_path_buf())
            .chain(self.ctx.options.include_paths.iter().cloned())
            .chain(std::iter::once(PathBuf::from(".")))
            .map(|dir| dir.join(&relative))
            .find(|candidate| candidate.is_file())
    }
}

/// `["a", "b"]` becomes `a/b.spz`
pub fn module_relative_path(segments: &[String]) -> PathBuf {
    let mut path: PathBuf = segments.iter().collect();
    path.set_extension(SOURCE_EXT);
    path
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
