//! Semantic analysis: symbols, overload resolution and typing

pub mod analyzer;
pub mod resolver;
pub mod symbols;

pub use analyzer::analyze;
pub use symbols::{SymbolId, SymbolKind, SymbolTable};
