//! Type algebra

pub mod type_system;

pub use type_system::{accept, interpolate, match_types, Env, Side, Special, Type, PERFECT, TO_VOID};
