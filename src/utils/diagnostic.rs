//! Leveled diagnostics and their human / JSON renderings

use std::fmt;

use serde::Serialize;

use crate::utils::{SourceMap, Span};

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Info => "info",
            Level::Warn => "warning",
            Level::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// A single reported problem
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    pub span: Option<Span>,
}

/// Append-only diagnostic list shared by the frontend passes
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, level: Level, message: impl Into<String>, span: Option<Span>) {
        let message = message.into();
        log::debug!("{}: {}", level, message);
        self.items.push(Diagnostic { level, message, span });
    }

    pub fn error(&mut self, message: impl Into<String>, span: Span) {
        self.report(Level::Error, message, Some(span));
    }

    pub fn warn(&mut self, message: impl Into<String>, span: Span) {
        self.report(Level::Warn, message, Some(span));
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.level == Level::Error)
    }

    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.level == Level::Error).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }
}

/// Render a diagnostic with a source excerpt and a caret underline
pub fn render_human(diag: &Diagnostic, sources: &SourceMap) -> String {
    let mut out = format!("{}: {}\n", diag.level, diag.message);

    let Some(span) = diag.span else {
        return out;
    };
    let Some((line, col, text)) = sources.locate(span) else {
        return out;
    };
    let path = sources
        .path(span.file_id)
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    let mut pad = 0;
    for c in text.chars().take(col - 1) {
        pad += if c == '\t' { 4 } else { 1 };
    }
    let gutter = " ".repeat(line.to_string().len());
    let caret = "^".repeat(span.len().max(1));

    out.push_str(&format!("{}--> {}:{}:{}\n", gutter, path, line, col));
    out.push_str(&format!("{} |\n", gutter));
    out.push_str(&format!("{} | {}\n", line, text.replace('\t', "    ")));
    out.push_str(&format!("{} | {}{} {}\n", gutter, " ".repeat(pad), caret, diag.message));
    out
}

#[derive(Serialize)]
struct JsonDiagnostic<'a> {
    level: Level,
    message: &'a str,
    file: Option<String>,
    line: Option<usize>,
    column: Option<usize>,
}

/// Render a diagnostic as a single-line JSON object
pub fn render_json(diag: &Diagnostic, sources: &SourceMap) -> String {
    let located = diag.span.and_then(|s| sources.locate(s).map(|l| (s, l)));
    let report = JsonDiagnostic {
        level: diag.level,
        message: &diag.message,
        file: located
            .and_then(|(s, _)| sources.path(s.file_id))
            .map(|p| p.display().to_string()),
        line: located.map(|(_, (line, _, _))| line),
        column: located.map(|(_, (_, col, _))| col),
    };
    serde_json::to_string(&report).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> (SourceMap, Diagnostic) {
        let mut sources = SourceMap::new();
        let id = sources.add("main.spz", "fn main() -> i32 {\n\treturn nope\n}");
        let start = sources.get(id).unwrap().text.find("nope").unwrap();
        let diag = Diagnostic {
            level: Level::Error,
            message: "Undefined variable 'nope'".into(),
            span: Some(Span::new(start, start + 4, id)),
        };
        (sources, diag)
    }

    #[test]
    fn test_error_counting() {
        let mut diags = Diagnostics::new();
        diags.warn("Cast is redundant", Span::dummy());
        assert!(!diags.has_errors());
        diags.error("Undefined variable 'x'", Span::dummy());
        diags.report(Level::Error, "Missing main function", None);
        assert!(diags.has_errors());
        assert_eq!(diags.error_count(), 2);
        assert_eq!(diags.len(), 3);
    }

    #[test]
    fn test_render_human_points_at_span() {
        let (sources, diag) = sample();
        let rendered = render_human(&diag, &sources);
        let expected = [
            "error: Undefined variable 'nope'",
            " --> main.spz:2:9",
            "  |",
            "2 |     return nope",
            &format!("  | {}^^^^ Undefined variable 'nope'", " ".repeat(11)),
            "",
        ]
        .join("\n");
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_render_without_location() {
        let sources = SourceMap::new();
        let diag = Diagnostic {
            level: Level::Error,
            message: "Missing main function".into(),
            span: None,
        };
        assert_eq!(render_human(&diag, &sources), "error: Missing main function\n");
    }

    #[test]
    fn test_render_json() {
        let (sources, diag) = sample();
        let json: serde_json::Value = serde_json::from_str(&render_json(&diag, &sources)).unwrap();
        assert_eq!(json["level"], "error");
        assert_eq!(json["file"], "main.spz");
        assert_eq!(json["line"], 2);
        assert_eq!(json["column"], 9);
    }
}
