//! Lexical scope stack
//!
//! One frame per function body or branch body. Lookup walks from the
//! innermost frame outward and the first match wins, so inner bindings
//! shadow outer ones. The analyzer stores types here; each backend stores
//! its own storage bindings.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ScopeStack<T> {
    frames: Vec<HashMap<String, T>>,
}

impl<T> ScopeStack<T> {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Bind `name` in the innermost frame, replacing an earlier binding
    /// of the same name in that frame
    pub fn define(&mut self, name: impl Into<String>, value: T) {
        if self.frames.is_empty() {
            self.push();
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), value);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&T> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

impl<T> Default for ScopeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}
