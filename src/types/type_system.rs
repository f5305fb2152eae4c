//! Type algebra for Fin
//!
//! Types are immutable values. Struct and enum types name their symbol and
//! generic arguments only; field layouts are looked up in the symbol table
//! on demand, which keeps recursive declarations finite.

use crate::sema::symbols::SymbolId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Score of an exact conversion
pub const PERFECT: f64 = 3.0;
/// Score of a conversion that discards the value
pub const TO_VOID: f64 = 1.0;

/// Generic substitution environment
pub type Env = BTreeMap<SymbolId, Type>;

/// Which side of a comparison may bind unresolved generics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Generics in the target (parameter) type bind to the source
    Target,
    /// Generics in the source (return) type bind to the target
    Source,
    /// No binding: generics are rigid
    Neither,
}

/// The three singleton types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Special {
    /// No value
    Void,
    /// Never produces a value; converts to anything
    Diverge,
    /// Not inferred yet
    Unknown,
}

/// A Fin type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Type {
    /// Nominal record (builtin primitives are field-less structs)
    Struct {
        sym: SymbolId,
        name: String,
        args: Vec<Type>,
    },
    /// Tagged union
    Enum {
        sym: SymbolId,
        name: String,
        args: Vec<Type>,
    },
    /// `[T; N]`, or `[T]` when unsized
    Array { elem: Box<Type>, len: Option<u64> },
    /// `level`-deep handle to `inner`; `inner` is never a `Ref`
    Ref { inner: Box<Type>, level: u32 },
    /// Unresolved type variable
    Generic { sym: SymbolId, name: String },
    Special(Special),
}

impl Type {
    pub fn void() -> Self {
        Type::Special(Special::Void)
    }

    pub fn diverge() -> Self {
        Type::Special(Special::Diverge)
    }

    pub fn unknown() -> Self {
        Type::Special(Special::Unknown)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Special(Special::Void))
    }

    pub fn is_diverge(&self) -> bool {
        matches!(self, Type::Special(Special::Diverge))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Special(Special::Unknown))
    }

    /// Wrap `inner` in `levels` references, collapsing nested refs
    pub fn reference(inner: Type, levels: u32) -> Type {
        if levels == 0 {
            return inner;
        }
        match inner {
            Type::Ref { inner, level } => Type::Ref { inner, level: level + levels },
            other => Type::Ref { inner: Box::new(other), level: levels },
        }
    }

    /// Reference depth; 0 for values
    pub fn level(&self) -> u32 {
        match self {
            Type::Ref { level, .. } => *level,
            _ => 0,
        }
    }

    /// The type with every reference level stripped
    pub fn value_type(&self) -> Type {
        match self {
            Type::Ref { inner, .. } => inner.as_ref().clone(),
            other => other.clone(),
        }
    }

    /// Remove one reference level
    pub fn deref_once(&self) -> Type {
        match self {
            Type::Ref { inner, level } => Type::reference(inner.as_ref().clone(), level - 1),
            other => other.clone(),
        }
    }

    /// True for types that cannot be stored by value
    pub fn is_unsized(&self) -> bool {
        match self {
            Type::Array { len: None, .. } => true,
            Type::Array { elem, .. } => elem.is_unsized(),
            _ => false,
        }
    }

    /// True if a `Generic` occurs anywhere in the type
    pub fn has_generics(&self) -> bool {
        match self {
            Type::Generic { .. } => true,
            Type::Struct { args, .. } | Type::Enum { args, .. } => {
                args.iter().any(|a| a.has_generics())
            }
            Type::Array { elem, .. } => elem.has_generics(),
            Type::Ref { inner, .. } => inner.has_generics(),
            Type::Special(_) => false,
        }
    }

    /// Substitute bound generics from `env`, recursing structurally
    pub fn resolve(&self, env: &Env) -> Type {
        match self {
            Type::Generic { sym, .. } => match env.get(sym) {
                Some(bound) => bound.clone(),
                None => self.clone(),
            },
            Type::Struct { sym, name, args } => Type::Struct {
                sym: *sym,
                name: name.clone(),
                args: args.iter().map(|a| a.resolve(env)).collect(),
            },
            Type::Enum { sym, name, args } => Type::Enum {
                sym: *sym,
                name: name.clone(),
                args: args.iter().map(|a| a.resolve(env)).collect(),
            },
            Type::Array { elem, len } => Type::Array { elem: Box::new(elem.resolve(env)), len: *len },
            Type::Ref { inner, level } => Type::reference(inner.resolve(env), *level),
            Type::Special(_) => self.clone(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Struct { name, args, .. } | Type::Enum { name, args, .. } => {
                write!(f, "{}", name)?;
                if !args.is_empty() {
                    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                    write!(f, "{{{}}}", args.join(","))?;
                }
                Ok(())
            }
            Type::Array { elem, len: Some(n) } => write!(f, "[{}; {}]", elem, n),
            Type::Array { elem, len: None } => write!(f, "[{}]", elem),
            Type::Ref { inner, level } => write!(f, "{}{}", "&".repeat(*level as usize), inner),
            Type::Generic { name, .. } => write!(f, "{}", name),
            Type::Special(Special::Void) => write!(f, "Void"),
            Type::Special(Special::Diverge) => write!(f, "Diverge"),
            Type::Special(Special::Unknown) => write!(f, "Unknown"),
        }
    }
}

// ==================== Matching ====================

/// Bind an unbound generic or compare against its binding
fn bind(sym: SymbolId, other: &Type, env: &mut Env) -> bool {
    if let Some(bound) = env.get(&sym).cloned() {
        return match_types(&bound, other, env, Side::Neither, false);
    }
    if matches!(other, Type::Special(_)) {
        return false;
    }
    env.insert(sym, other.clone());
    true
}

/// Structural equivalence modulo generics on `side`. New bindings are
/// recorded in `env`. With `allow_unsized`, an unsized target array accepts a
/// sized source array of the same element type.
pub fn match_types(target: &Type, source: &Type, env: &mut Env, side: Side, allow_unsized: bool) -> bool {
    match (target, source) {
        (Type::Generic { sym, .. }, _) if side == Side::Target => bind(*sym, source, env),
        (_, Type::Generic { sym, .. }) if side == Side::Source => bind(*sym, target, env),
        (Type::Generic { sym: a, .. }, Type::Generic { sym: b, .. }) => a == b,
        (Type::Struct { sym: a, args: xs, .. }, Type::Struct { sym: b, args: ys, .. })
        | (Type::Enum { sym: a, args: xs, .. }, Type::Enum { sym: b, args: ys, .. }) => {
            a == b
                && xs.len() == ys.len()
                && xs.iter().zip(ys).all(|(x, y)| match_types(x, y, env, side, false))
        }
        (Type::Array { elem: a, len: la }, Type::Array { elem: b, len: lb }) => {
            (la == lb || (allow_unsized && la.is_none())) && match_types(a, b, env, side, false)
        }
        (Type::Ref { inner: a, level: la }, Type::Ref { inner: b, level: lb }) => {
            la == lb && match_types(a, b, env, side, true)
        }
        (Type::Special(a), Type::Special(b)) => a == b,
        _ => false,
    }
}

/// Conversion score from `source` to `target`, or None if incompatible.
/// NaN means "cannot tell yet".
pub fn accept(target: &Type, source: &Type, env: &mut Env, side: Side) -> Option<f64> {
    let target = if side == Side::Target { target.resolve(env) } else { target.clone() };
    let source = if side == Side::Source { source.resolve(env) } else { source.clone() };

    match (&target, &source) {
        (_, Type::Special(Special::Diverge)) => Some(PERFECT),
        (Type::Special(Special::Unknown), _) | (_, Type::Special(Special::Unknown)) => Some(f64::NAN),
        (Type::Special(Special::Void), Type::Special(Special::Void)) => Some(PERFECT),
        (Type::Special(Special::Void), _) => Some(TO_VOID),
        (_, Type::Special(Special::Void)) => None,
        (Type::Ref { inner: ti, level: tl }, Type::Ref { inner: si, level: sl }) => {
            if tl <= sl && match_types(ti, si, env, side, true) {
                Some(PERFECT - 1.0 + *tl as f64 / *sl as f64)
            } else {
                None
            }
        }
        (Type::Ref { .. }, _) => None,
        (_, Type::Ref { inner, .. }) => {
            if match_types(&target, inner, env, side, false) {
                Some(PERFECT - 1.0)
            } else {
                None
            }
        }
        _ => {
            if match_types(&target, &source, env, side, false) {
                Some(PERFECT)
            } else {
                None
            }
        }
    }
}

/// Meet of the result types of several branches
pub fn interpolate(types: &[Type]) -> Type {
    if types.iter().any(|t| t.is_unknown()) {
        return Type::unknown();
    }
    let live: Vec<&Type> = types.iter().filter(|t| !t.is_diverge()).collect();
    let Some(first) = live.first() else {
        return Type::diverge();
    };
    if live.iter().any(|t| t.is_void()) {
        return Type::void();
    }

    let base = first.value_type();
    let mut level = first.level();
    for t in &live[1..] {
        if t.value_type() != base {
            return Type::void();
        }
        level = level.min(t.level());
    }
    Type::reference(base, level)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int() -> Type {
        Type::Struct { sym: SymbolId(1), name: "Int".to_string(), args: vec![] }
    }

    fn float() -> Type {
        Type::Struct { sym: SymbolId(2), name: "Float".to_string(), args: vec![] }
    }

    fn generic(n: u32, name: &str) -> Type {
        Type::Generic { sym: SymbolId(n), name: name.to_string() }
    }

    #[test]
    fn test_reference_collapses() {
        let r = Type::reference(Type::reference(int(), 1), 2);
        assert_eq!(r, Type::Ref { inner: Box::new(int()), level: 3 });
        assert_eq!(r.to_string(), "&&&Int");
        assert_eq!(r.deref_once().level(), 2);
        assert_eq!(Type::reference(int(), 1).deref_once(), int());
    }

    #[test]
    fn test_resolve() {
        let t = Type::Array { elem: Box::new(Type::reference(generic(9, "T"), 1)), len: None };
        assert_eq!(t.resolve(&Env::new()), t);

        let mut env = Env::new();
        env.insert(SymbolId(9), Type::reference(int(), 1));
        let resolved = Type::reference(generic(9, "T"), 1).resolve(&env);
        assert_eq!(resolved, Type::reference(int(), 2));
        assert_eq!(t.resolve(&env).to_string(), "[&&Int]");
    }

    #[test]
    fn test_accept_specials() {
        let mut env = Env::new();
        assert_eq!(accept(&int(), &Type::diverge(), &mut env, Side::Neither), Some(PERFECT));
        assert!(accept(&int(), &Type::unknown(), &mut env, Side::Neither).unwrap().is_nan());
        assert_eq!(accept(&Type::void(), &Type::void(), &mut env, Side::Neither), Some(PERFECT));
        assert_eq!(accept(&Type::void(), &int(), &mut env, Side::Neither), Some(TO_VOID));
        assert_eq!(accept(&int(), &Type::void(), &mut env, Side::Neither), None);
        assert_eq!(accept(&int(), &float(), &mut env, Side::Neither), None);
        assert_eq!(accept(&int(), &int(), &mut env, Side::Neither), Some(PERFECT));
    }

    #[test]
    fn test_accept_references() {
        let mut env = Env::new();
        let r1 = Type::reference(int(), 1);
        let r2 = Type::reference(int(), 2);
        assert_eq!(accept(&r1, &r1, &mut env, Side::Neither), Some(PERFECT));
        assert_eq!(accept(&r1, &r2, &mut env, Side::Neither), Some(2.5));
        // A higher level cannot be made from a lower one
        assert_eq!(accept(&r2, &r1, &mut env, Side::Neither), None);
        assert_eq!(accept(&int(), &r2, &mut env, Side::Neither), Some(PERFECT - 1.0));
        assert_eq!(accept(&r1, &int(), &mut env, Side::Neither), None);
    }

    #[test]
    fn test_unsized_arrays_match_under_reference() {
        let mut env = Env::new();
        let sized = Type::Array { elem: Box::new(int()), len: Some(4) };
        let open = Type::Array { elem: Box::new(int()), len: None };
        assert_eq!(
            accept(&Type::reference(open.clone(), 1), &Type::reference(sized.clone(), 1), &mut env, Side::Neither),
            Some(PERFECT)
        );
        assert_eq!(accept(&open, &sized, &mut env, Side::Neither), None);
        assert!(open.is_unsized());
        assert!(!sized.is_unsized());
    }

    #[test]
    fn test_generic_binding() {
        let t = generic(7, "T");
        let mut env = Env::new();
        // Deref of the argument binds T to the value type
        assert_eq!(accept(&t, &Type::reference(int(), 1), &mut env, Side::Target), Some(2.0));
        assert_eq!(env.get(&SymbolId(7)), Some(&int()));
        // Once bound, T only accepts Int
        assert_eq!(accept(&t, &float(), &mut env, Side::Target), None);
        assert_eq!(accept(&t, &int(), &mut env, Side::Target), Some(PERFECT));

        // Return-side binding
        let mut env = Env::new();
        assert_eq!(accept(&float(), &t, &mut env, Side::Source), Some(PERFECT));
        assert_eq!(env.get(&SymbolId(7)), Some(&float()));

        // Inside its own body a generic binds to itself
        let mut env = Env::new();
        assert_eq!(accept(&t, &t, &mut env, Side::Target), Some(PERFECT));
        assert_eq!(env.get(&SymbolId(7)), Some(&t));

        // Rigid generics only match themselves
        let mut env = Env::new();
        assert_eq!(accept(&t, &int(), &mut env, Side::Neither), None);
        assert_eq!(accept(&t, &t, &mut env, Side::Neither), Some(PERFECT));
    }

    #[test]
    fn test_interpolate() {
        let r1 = Type::reference(int(), 1);
        let r2 = Type::reference(int(), 2);
        assert_eq!(interpolate(&[int(), int()]), int());
        assert_eq!(interpolate(&[Type::diverge(), int()]), int());
        assert_eq!(interpolate(&[Type::diverge()]), Type::diverge());
        assert_eq!(interpolate(&[int(), Type::void()]), Type::void());
        assert_eq!(interpolate(&[r2.clone(), r1.clone()]), r1);
        assert_eq!(interpolate(&[r1, int()]), int());
        assert_eq!(interpolate(&[int(), float()]), Type::void());
        assert!(interpolate(&[int(), Type::unknown()]).is_unknown());
    }
}
