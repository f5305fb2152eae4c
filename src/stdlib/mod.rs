//! Builtin types, operators and constants

pub mod builtins;

pub use builtins::{Intrinsic, Primitive};
