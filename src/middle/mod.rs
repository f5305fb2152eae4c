//! Middle-end module - IR, shadow stack and generation

pub mod ir;
pub mod ir_gen;
pub mod ir_printer;
pub mod stack;

pub use ir::IrModule;
pub use ir_gen::generate;
pub use ir_printer::print_module;
