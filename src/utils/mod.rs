//! Utility module

mod span;
mod error;
pub mod diagnostic;

pub use span::Span;
pub use error::{Error, ErrorKind, Result};
