//! Value types shared by the frontend and both backends

pub mod type_system;

pub use type_system::{is_valid_cast, Type};
