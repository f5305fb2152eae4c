//! The builtins module
//!
//! Primitive types, operators, casts, memory intrinsics and constants.
//! Installed once into every [`SymbolTable`] and searched after a module's
//! own scope and imports.

use crate::frontend::ast::Literal;
use crate::sema::symbols::{SymbolId, SymbolKind, SymbolTable};
use crate::types::Type;
use crate::utils::Span;

/// Builtin value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Int,
    Float,
    Bool,
}

impl Primitive {
    /// Source-level name
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Int => "Int",
            Primitive::Float => "Float",
            Primitive::Bool => "Bool",
        }
    }
}

/// How a builtin function is lowered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    /// Binary arithmetic opcode
    Arith(&'static str),
    /// Unary negation opcode
    Neg(&'static str),
    /// `icmp`/`fcmp` with a condition code
    Compare(&'static str, &'static str),
    /// Conversion opcode; None for an identity cast
    Convert(Option<&'static str>),
    Index,
    Alloc,
    Dealloc,
    Realloc,
}

/// Builtin signature: param and return types built from the generic types
type Signature = fn(&[Type], &Prims) -> (Vec<Type>, Type);

/// The primitive types, handy for signatures
pub struct Prims {
    pub int: Type,
    pub float: Type,
    pub boolean: Type,
}

fn define_function(
    table: &mut SymbolTable,
    name: &str,
    generics: &[&str],
    signature: Signature,
    prims: &Prims,
    intrinsic: Intrinsic,
) {
    let builtins = table.builtins();
    let func = match table.add_function(builtins, name, Span::dummy(), SymbolKind::Function {
        generics: Vec::new(),
        params: Vec::new(),
        ret: Type::void(),
        locals: Vec::new(),
        intrinsic: Some(intrinsic),
        def: None,
    }) {
        Ok(f) => f,
        Err(e) => {
            log::error!("builtin {} not installed: {}", name, e);
            return;
        }
    };

    let generic_syms: Vec<SymbolId> = generics
        .iter()
        .map(|g| table.add(g, Some(func), Span::dummy(), SymbolKind::Generic))
        .collect();
    let generic_types = table.generic_types(&generic_syms);
    let (param_types, ret) = signature(&generic_types, prims);

    let params: Vec<SymbolId> = param_types
        .into_iter()
        .enumerate()
        .map(|(index, ty)| {
            let pname = ["a", "b", "c"].get(index).copied().unwrap_or("x");
            table.add(pname, Some(func), Span::dummy(), SymbolKind::Variable { ty, is_arg: true, index })
        })
        .collect();

    if let SymbolKind::Function { generics: g, params: p, ret: r, .. } = &mut table.get_mut(func).kind {
        *g = generic_syms;
        *p = params;
        *r = ret;
    }
}

fn array_ref(elem: &Type) -> Type {
    Type::reference(Type::Array { elem: Box::new(elem.clone()), len: None }, 1)
}

/// Populate the builtins module of `table`
pub fn install(table: &mut SymbolTable) {
    let builtins = table.builtins();

    for prim in [Primitive::Int, Primitive::Float, Primitive::Bool] {
        let kind = SymbolKind::Struct { generics: Vec::new(), fields: Vec::new(), primitive: Some(prim) };
        if let Err(e) = table.define(prim.name(), builtins, Span::dummy(), kind) {
            log::error!("builtin type {} not installed: {}", prim.name(), e);
        }
    }

    let prims = Prims {
        int: table.primitive_type(Primitive::Int),
        float: table.primitive_type(Primitive::Float),
        boolean: table.primitive_type(Primitive::Bool),
    };

    // Arithmetic
    let int_ops = [("+", "add"), ("-", "sub"), ("*", "mul"), ("/", "sdiv"), ("%", "srem")];
    for (name, op) in int_ops {
        define_function(table, name, &[], |_, p| (vec![p.int.clone(), p.int.clone()], p.int.clone()), &prims, Intrinsic::Arith(op));
    }
    let float_ops = [("+", "fadd"), ("-", "fsub"), ("*", "fmul"), ("/", "fdiv"), ("%", "frem")];
    for (name, op) in float_ops {
        define_function(table, name, &[], |_, p| (vec![p.float.clone(), p.float.clone()], p.float.clone()), &prims, Intrinsic::Arith(op));
    }
    define_function(table, "-", &[], |_, p| (vec![p.int.clone()], p.int.clone()), &prims, Intrinsic::Neg("neg"));
    define_function(table, "-", &[], |_, p| (vec![p.float.clone()], p.float.clone()), &prims, Intrinsic::Neg("fneg"));

    // Comparisons
    let int_cmp = [("==", "eq"), ("!=", "ne"), ("<", "slt"), ("<=", "sle"), (">", "sgt"), (">=", "sge")];
    for (name, cond) in int_cmp {
        define_function(table, name, &[], |_, p| (vec![p.int.clone(), p.int.clone()], p.boolean.clone()), &prims, Intrinsic::Compare("icmp", cond));
    }
    let float_cmp = [("==", "oeq"), ("!=", "one"), ("<", "olt"), ("<=", "ole"), (">", "ogt"), (">=", "oge")];
    for (name, cond) in float_cmp {
        define_function(table, name, &[], |_, p| (vec![p.float.clone(), p.float.clone()], p.boolean.clone()), &prims, Intrinsic::Compare("fcmp", cond));
    }
    for (name, cond) in [("==", "eq"), ("!=", "ne")] {
        define_function(table, name, &[], |_, p| (vec![p.boolean.clone(), p.boolean.clone()], p.boolean.clone()), &prims, Intrinsic::Compare("icmp", cond));
    }

    // Casts
    define_function(table, "cast", &[], |_, p| (vec![p.int.clone()], p.float.clone()), &prims, Intrinsic::Convert(Some("sitofp")));
    define_function(table, "cast", &[], |_, p| (vec![p.float.clone()], p.int.clone()), &prims, Intrinsic::Convert(Some("fptosi")));
    define_function(table, "cast", &[], |_, p| (vec![p.boolean.clone()], p.int.clone()), &prims, Intrinsic::Convert(Some("zext")));
    define_function(table, "cast", &[], |_, p| (vec![p.int.clone()], p.int.clone()), &prims, Intrinsic::Convert(None));
    define_function(table, "cast", &[], |_, p| (vec![p.float.clone()], p.float.clone()), &prims, Intrinsic::Convert(None));
    define_function(table, "cast", &[], |_, p| (vec![p.boolean.clone()], p.boolean.clone()), &prims, Intrinsic::Convert(None));

    // Memory
    define_function(table, "[]", &["T"], |g, p| (vec![array_ref(&g[0]), p.int.clone()], Type::reference(g[0].clone(), 1)), &prims, Intrinsic::Index);
    define_function(table, "alloc", &["T"], |g, p| (vec![p.int.clone()], array_ref(&g[0])), &prims, Intrinsic::Alloc);
    define_function(table, "dealloc", &["T"], |g, _| (vec![array_ref(&g[0])], Type::void()), &prims, Intrinsic::Dealloc);
    define_function(table, "realloc", &["T"], |g, p| (vec![array_ref(&g[0]), p.int.clone()], array_ref(&g[0])), &prims, Intrinsic::Realloc);

    // Constants
    let constants = [("MAX_INT", i32::MAX as i64), ("MIN_INT", i32::MIN as i64)];
    for (name, value) in constants {
        let kind = SymbolKind::Constant { ty: prims.int.clone(), value: Literal::Int(value) };
        if let Err(e) = table.define(name, builtins, Span::dummy(), kind) {
            log::error!("builtin constant {} not installed: {}", name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::symbols::Kind;

    #[test]
    fn test_primitives_installed() {
        let table = SymbolTable::new();
        let b = table.builtins();
        for prim in [Primitive::Int, Primitive::Float, Primitive::Bool] {
            let sym = table.lookup(b, prim.name(), &[Kind::Struct], Span::dummy()).unwrap();
            assert!(matches!(table.kind(sym), SymbolKind::Struct { primitive: Some(p), .. } if *p == prim));
        }
        assert_eq!(table.primitive(&table.primitive_type(Primitive::Float)), Some(Primitive::Float));
    }

    #[test]
    fn test_operator_overloads() {
        let table = SymbolTable::new();
        let b = table.builtins();
        // Int and Float binary minus, plus the two unary negations
        assert_eq!(table.operators(b, "-").len(), 4);
        // Int, Float and Bool equality
        assert_eq!(table.operators(b, "==").len(), 3);
        assert_eq!(table.operators(b, "cast").len(), 6);
    }

    #[test]
    fn test_generic_index_signature() {
        let table = SymbolTable::new();
        let index = table.operators(table.builtins(), "[]")[0];
        match table.kind(index) {
            SymbolKind::Function { generics, params, ret, intrinsic, .. } => {
                assert_eq!(generics.len(), 1);
                assert_eq!(params.len(), 2);
                assert_eq!(ret.to_string(), "&T");
                assert_eq!(*intrinsic, Some(Intrinsic::Index));
                match table.kind(params[0]) {
                    SymbolKind::Variable { ty, is_arg, .. } => {
                        assert!(*is_arg);
                        assert_eq!(ty.to_string(), "&[T]");
                    }
                    _ => panic!("expected a parameter"),
                }
            }
            _ => panic!("expected a function"),
        }
    }

    #[test]
    fn test_constants() {
        let table = SymbolTable::new();
        let max = table.lookup(table.builtins(), "MAX_INT", &[Kind::Constant], Span::dummy()).unwrap();
        assert!(matches!(table.kind(max), SymbolKind::Constant { value: Literal::Int(2147483647), .. }));
    }
}
