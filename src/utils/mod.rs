//! Utility module

mod span;
mod error;
mod source;
pub mod diagnostic;

pub use span::Span;
pub use error::{Error, Result};
pub use source::SourceMap;
pub use diagnostic::{Diagnostics, Level};
