//! Backend module - Assembly to binary objects

pub mod assembler;
pub mod codegen;
pub mod varint;

pub use assembler::Assembler;
pub use codegen::CodeGen;
