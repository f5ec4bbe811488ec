//! Loaded source files, addressed by the `file_id` stored in every span

use std::path::{Path, PathBuf};

use crate::utils::Span;

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
}

/// All files that take part in one compilation
#[derive(Debug, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file and return its id
    pub fn add(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> usize {
        self.files.push(SourceFile {
            path: path.into(),
            text: text.into(),
        });
        self.files.len() - 1
    }

    pub fn get(&self, file_id: usize) -> Option<&SourceFile> {
        self.files.get(file_id)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn path(&self, file_id: usize) -> Option<&Path> {
        self.get(file_id).map(|f| f.path.as_path())
    }

    /// 1-based line and column of the span start, plus the text of that line
    pub fn locate(&self, span: Span) -> Option<(usize, usize, &str)> {
        let file = self.get(span.file_id)?;
        let start = span.start.min(file.text.len());
        let line_start = file.text[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = file.text[start..]
            .find('\n')
            .map(|i| start + i)
            .unwrap_or(file.text.len());
        let line = file.text[..line_start].matches('\n').count() + 1;
        let col = file.text[line_start..start].chars().count() + 1;
        Some((line, col, &file.text[line_start..line_end]))
    }
}
