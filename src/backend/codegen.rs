//! Code Generation trait - Backend abstraction
//!
//! A backend turns a generated module into the bytes written to the
//! output file.

use crate::middle::ir::IrModule;
use crate::utils::Result;

/// Code generation backend trait
pub trait CodeGen {
    /// Produce the object for a module
    fn generate(&mut self, module: &IrModule) -> Result<Vec<u8>>;

    /// Interpreter named in the object's `#!` line
    fn runtime(&self) -> &str;

    /// Get the backend name
    fn name(&self) -> &str;
}
