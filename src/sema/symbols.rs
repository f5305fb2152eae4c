//! Symbol model
//!
//! Symbols live in one arena owned by [`SymbolTable`] and refer to each other
//! by [`SymbolId`]. Every symbol is also a scope: a map from names to the
//! symbols introduced directly inside it. Lookup walks the parent chain; at a
//! module it also consults the module's imports and finally the builtins.

use crate::frontend::ast::{Literal, NodeId};
use crate::stdlib::builtins::{self, Intrinsic, Primitive};
use crate::types::{Env, Type};
use crate::utils::{Error, Result, Span};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Handle to a symbol in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SymbolId(pub u32);

/// A struct field
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub index: usize,
}

/// What a symbol denotes
#[derive(Debug, Clone)]
pub enum SymbolKind {
    Module {
        path: String,
        /// (alias, module) pairs in import order
        imports: Vec<(String, SymbolId)>,
    },
    Struct {
        generics: Vec<SymbolId>,
        fields: Vec<Field>,
        primitive: Option<Primitive>,
    },
    Enum {
        generics: Vec<SymbolId>,
        variants: Vec<SymbolId>,
    },
    /// Parent is the owning enum
    Variant { tag: u32, fields: Vec<Type> },
    Function {
        generics: Vec<SymbolId>,
        params: Vec<SymbolId>,
        ret: Type,
        locals: Vec<SymbolId>,
        intrinsic: Option<Intrinsic>,
        /// The definition this function was declared from, if any
        def: Option<NodeId>,
    },
    FunctionGroup { members: Vec<SymbolId> },
    Constant { ty: Type, value: Literal },
    Variable { ty: Type, is_arg: bool, index: usize },
    /// Nested scope inside a function
    Block { function: SymbolId, locals: Vec<SymbolId> },
    Generic,
}

/// Kind discriminant used when a lookup expects particular kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Module,
    Struct,
    Enum,
    Variant,
    Function,
    FunctionGroup,
    Constant,
    Variable,
    Block,
    Generic,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Module => "module",
            Kind::Struct => "struct",
            Kind::Enum => "enum",
            Kind::Variant => "variant",
            Kind::Function => "function",
            Kind::FunctionGroup => "function",
            Kind::Constant => "constant",
            Kind::Variable => "variable",
            Kind::Block => "block",
            Kind::Generic => "generic parameter",
        };
        f.write_str(s)
    }
}

impl SymbolKind {
    pub fn kind(&self) -> Kind {
        match self {
            SymbolKind::Module { .. } => Kind::Module,
            SymbolKind::Struct { .. } => Kind::Struct,
            SymbolKind::Enum { .. } => Kind::Enum,
            SymbolKind::Variant { .. } => Kind::Variant,
            SymbolKind::Function { .. } => Kind::Function,
            SymbolKind::FunctionGroup { .. } => Kind::FunctionGroup,
            SymbolKind::Constant { .. } => Kind::Constant,
            SymbolKind::Variable { .. } => Kind::Variable,
            SymbolKind::Block { .. } => Kind::Block,
            SymbolKind::Generic => Kind::Generic,
        }
    }
}

/// A named entity plus the scope it opens
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub parent: Option<SymbolId>,
    pub span: Span,
    pub kind: SymbolKind,
    names: HashMap<String, SymbolId>,
}

impl Symbol {
    /// Names introduced directly in this symbol's scope
    pub fn member(&self, name: &str) -> Option<SymbolId> {
        self.names.get(name).copied()
    }
}

/// Arena of every symbol of a compilation, plus the package of modules
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    modules: HashMap<String, SymbolId>,
    builtins: SymbolId,
}

impl SymbolTable {
    /// A table holding only the builtins module
    pub fn new() -> Self {
        let mut table = Self {
            symbols: Vec::new(),
            modules: HashMap::new(),
            builtins: SymbolId(0),
        };
        table.builtins = table.add(
            "builtins",
            None,
            Span::dummy(),
            SymbolKind::Module { path: "builtins".to_string(), imports: Vec::new() },
        );
        table.modules.insert("builtins".to_string(), table.builtins);
        builtins::install(&mut table);
        table
    }

    pub fn builtins(&self) -> SymbolId {
        self.builtins
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn kind(&self, id: SymbolId) -> &SymbolKind {
        &self.get(id).kind
    }

    pub fn name(&self, id: SymbolId) -> &str {
        &self.get(id).name
    }

    // ==================== Creation ====================

    /// Allocate a symbol without introducing it in any scope
    pub fn add(&mut self, name: &str, parent: Option<SymbolId>, span: Span, kind: SymbolKind) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            name: name.to_string(),
            parent,
            span,
            kind,
            names: HashMap::new(),
        });
        id
    }

    /// Introduce `sym` under `name` in `scope`; duplicates fail
    pub fn declare(&mut self, scope: SymbolId, name: &str, sym: SymbolId, span: Span) -> Result<()> {
        let names = &mut self.get_mut(scope).names;
        if names.contains_key(name) {
            return Err(Error::DuplicateDefinition { name: name.to_string(), span });
        }
        names.insert(name.to_string(), sym);
        Ok(())
    }

    /// Allocate a symbol and introduce it in its parent scope
    pub fn define(&mut self, name: &str, parent: SymbolId, span: Span, kind: SymbolKind) -> Result<SymbolId> {
        if self.get(parent).names.contains_key(name) {
            return Err(Error::DuplicateDefinition { name: name.to_string(), span });
        }
        let id = self.add(name, Some(parent), span, kind);
        self.declare(parent, name, id, span)?;
        Ok(id)
    }

    /// Create a module in the package
    pub fn new_module(&mut self, path: &str, span: Span) -> Result<SymbolId> {
        if self.modules.contains_key(path) {
            return Err(Error::DuplicateDefinition { name: path.to_string(), span });
        }
        let name = path.rsplit('.').next().unwrap_or(path);
        let id = self.add(
            name,
            None,
            span,
            SymbolKind::Module { path: path.to_string(), imports: Vec::new() },
        );
        self.modules.insert(path.to_string(), id);
        Ok(id)
    }

    /// Find a module of the package by dotted path
    pub fn module(&self, path: &str) -> Option<SymbolId> {
        self.modules.get(path).copied()
    }

    /// Record `import path` in `module`
    pub fn add_import(&mut self, module: SymbolId, path: &str, span: Span) -> Result<()> {
        let target = self
            .module(path)
            .filter(|&m| m != module && m != self.builtins)
            .ok_or_else(|| Error::UnknownModule { path: path.to_string(), span })?;
        let alias = self.name(target).to_string();
        if let SymbolKind::Module { imports, .. } = &mut self.get_mut(module).kind {
            if imports.iter().any(|(a, m)| *m == target || *a == alias) {
                return Err(Error::DuplicateImport { name: path.to_string(), span });
            }
            imports.push((alias, target));
        }
        Ok(())
    }

    /// Add a function to the overload group `name` of `module`
    pub fn add_function(&mut self, module: SymbolId, name: &str, span: Span, kind: SymbolKind) -> Result<SymbolId> {
        let group = match self.get(module).member(name) {
            Some(existing) => match self.kind(existing) {
                SymbolKind::FunctionGroup { .. } => existing,
                other => {
                    return Err(Error::KindMismatch {
                        name: name.to_string(),
                        expected: Kind::Function.to_string(),
                        got: other.kind().to_string(),
                        span,
                    })
                }
            },
            None => self.define(name, module, span, SymbolKind::FunctionGroup { members: Vec::new() })?,
        };
        let func = self.add(name, Some(module), span, kind);
        if let SymbolKind::FunctionGroup { members } = &mut self.get_mut(group).kind {
            members.push(func);
        }
        Ok(func)
    }

    /// Open a block scope below `parent` (a function or another block)
    pub fn new_block(&mut self, parent: SymbolId, span: Span) -> SymbolId {
        let function = self.function_of(parent).unwrap_or(parent);
        self.add("", Some(parent), span, SymbolKind::Block { function, locals: Vec::new() })
    }

    /// Declare a local variable in `scope`, registering it with the owning function
    pub fn new_local(&mut self, scope: SymbolId, name: &str, ty: Type, span: Span) -> Result<SymbolId> {
        let function = self
            .function_of(scope)
            .ok_or_else(|| Error::LocalOutsideFunction { name: name.to_string(), span })?;
        let index = match self.kind(function) {
            SymbolKind::Function { locals, .. } => locals.len(),
            _ => 0,
        };
        let var = self.define(name, scope, span, SymbolKind::Variable { ty, is_arg: false, index })?;
        if let SymbolKind::Function { locals, .. } = &mut self.get_mut(function).kind {
            locals.push(var);
        }
        if let SymbolKind::Block { locals, .. } = &mut self.get_mut(scope).kind {
            locals.push(var);
        }
        Ok(var)
    }

    // ==================== Lookup ====================

    /// Resolve `name` as seen from `scope`
    pub fn resolve(&self, scope: SymbolId, name: &str) -> Option<SymbolId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let sym = self.get(id);
            if let Some(found) = sym.member(name) {
                return Some(found);
            }
            if let SymbolKind::Module { imports, .. } = &sym.kind {
                if let Some((_, m)) = imports.iter().find(|(alias, _)| alias == name) {
                    return Some(*m);
                }
                for (_, m) in imports {
                    if let Some(found) = self.get(*m).member(name) {
                        return Some(found);
                    }
                }
                if id != self.builtins {
                    if let Some(found) = self.get(self.builtins).member(name) {
                        return Some(found);
                    }
                }
            }
            current = sym.parent;
        }
        None
    }

    /// Resolve `name` and check its kind
    pub fn lookup(&self, scope: SymbolId, name: &str, expected: &[Kind], span: Span) -> Result<SymbolId> {
        let id = self
            .resolve(scope, name)
            .ok_or_else(|| Error::UndefinedName { name: name.to_string(), span })?;
        let kind = self.kind(id).kind();
        if expected.is_empty() || expected.contains(&kind) {
            Ok(id)
        } else {
            Err(Error::KindMismatch {
                name: name.to_string(),
                expected: expected.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(" or "),
                got: kind.to_string(),
                span,
            })
        }
    }

    /// Every function named `name` visible from `module`: its own, its
    /// imports' and the builtins'
    pub fn operators(&self, module: SymbolId, name: &str) -> Vec<SymbolId> {
        let mut scopes = vec![module];
        if let SymbolKind::Module { imports, .. } = self.kind(module) {
            scopes.extend(imports.iter().map(|(_, m)| *m));
        }
        if module != self.builtins {
            scopes.push(self.builtins);
        }

        let mut out = Vec::new();
        for scope in scopes {
            if let Some(group) = self.get(scope).member(name) {
                if let SymbolKind::FunctionGroup { members } = self.kind(group) {
                    out.extend(members.iter().copied());
                }
            }
        }
        out
    }

    // ==================== Ancestry ====================

    /// Nearest enclosing symbol satisfying `pred`, starting at `id`
    fn ancestor(&self, id: SymbolId, pred: impl Fn(&SymbolKind) -> bool) -> Option<SymbolId> {
        let mut current = Some(id);
        while let Some(c) = current {
            if pred(self.kind(c)) {
                return Some(c);
            }
            current = self.get(c).parent;
        }
        None
    }

    pub fn module_of(&self, id: SymbolId) -> Option<SymbolId> {
        self.ancestor(id, |k| matches!(k, SymbolKind::Module { .. }))
    }

    pub fn function_of(&self, id: SymbolId) -> Option<SymbolId> {
        self.ancestor(id, |k| matches!(k, SymbolKind::Function { .. }))
    }

    /// Dotted path of the module owning `id`
    pub fn module_path(&self, id: SymbolId) -> String {
        match self.module_of(id).map(|m| self.kind(m)) {
            Some(SymbolKind::Module { path, .. }) => path.clone(),
            _ => String::new(),
        }
    }

    // ==================== Types ====================

    /// Primitive marker of a builtin struct type
    pub fn primitive(&self, ty: &Type) -> Option<Primitive> {
        match ty {
            Type::Struct { sym, .. } => match self.kind(*sym) {
                SymbolKind::Struct { primitive, .. } => *primitive,
                _ => None,
            },
            _ => None,
        }
    }

    /// The type of a builtin primitive
    pub fn primitive_type(&self, prim: Primitive) -> Type {
        let name = prim.name();
        let sym = self.get(self.builtins).member(name).unwrap_or(SymbolId(0));
        Type::Struct { sym, name: name.to_string(), args: Vec::new() }
    }

    /// Generic parameter symbols as types
    pub fn generic_types(&self, generics: &[SymbolId]) -> Vec<Type> {
        generics
            .iter()
            .map(|&g| Type::Generic { sym: g, name: self.name(g).to_string() })
            .collect()
    }

    /// Environment mapping `generics` to `args`
    pub fn env_for(&self, generics: &[SymbolId], args: &[Type]) -> Env {
        generics.iter().copied().zip(args.iter().cloned()).collect()
    }

    /// The declared type of a struct or enum with its own generics as arguments
    pub fn declared_type(&self, sym: SymbolId) -> Type {
        let name = self.name(sym).to_string();
        match self.kind(sym) {
            SymbolKind::Struct { generics, .. } => Type::Struct { sym, name, args: self.generic_types(generics) },
            SymbolKind::Enum { generics, .. } => Type::Enum { sym, name, args: self.generic_types(generics) },
            _ => Type::unknown(),
        }
    }

    /// Fields of a struct type with its generic arguments substituted
    pub fn struct_fields(&self, ty: &Type) -> Option<Vec<Field>> {
        let Type::Struct { sym, args, .. } = ty else {
            return None;
        };
        let SymbolKind::Struct { generics, fields, .. } = self.kind(*sym) else {
            return None;
        };
        let env = self.env_for(generics, args);
        Some(
            fields
                .iter()
                .map(|f| Field { name: f.name.clone(), ty: f.ty.resolve(&env), index: f.index })
                .collect(),
        )
    }

    /// Variants of an enum type as (symbol, tag, field types) with generics substituted
    pub fn enum_variants(&self, ty: &Type) -> Option<Vec<(SymbolId, u32, Vec<Type>)>> {
        let Type::Enum { sym, args, .. } = ty else {
            return None;
        };
        let SymbolKind::Enum { generics, variants } = self.kind(*sym) else {
            return None;
        };
        let env = self.env_for(generics, args);
        Some(
            variants
                .iter()
                .filter_map(|&v| match self.kind(v) {
                    SymbolKind::Variant { tag, fields } => {
                        Some((v, *tag, fields.iter().map(|t| t.resolve(&env)).collect()))
                    }
                    _ => None,
                })
                .collect(),
        )
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function_kind() -> SymbolKind {
        SymbolKind::Function {
            generics: Vec::new(),
            params: Vec::new(),
            ret: Type::void(),
            locals: Vec::new(),
            intrinsic: None,
            def: None,
        }
    }

    #[test]
    fn test_builtins_visible_from_module() {
        let mut table = SymbolTable::new();
        let m = table.new_module("main", Span::dummy()).unwrap();
        let int = table.lookup(m, "Int", &[Kind::Struct], Span::dummy()).unwrap();
        assert_eq!(table.name(int), "Int");
        assert!(!table.operators(m, "+").is_empty());
    }

    #[test]
    fn test_duplicate_definition() {
        let mut table = SymbolTable::new();
        let m = table.new_module("main", Span::dummy()).unwrap();
        table.define("x", m, Span::dummy(), SymbolKind::Generic).unwrap();
        let err = table.define("x", m, Span::new(3, 4), SymbolKind::Generic).unwrap_err();
        assert_eq!(err, Error::DuplicateDefinition { name: "x".to_string(), span: Span::new(3, 4) });
    }

    #[test]
    fn test_local_needs_a_function() {
        let mut table = SymbolTable::new();
        let m = table.new_module("main", Span::dummy()).unwrap();
        let err = table.new_local(m, "x", Type::void(), Span::new(5, 6)).unwrap_err();
        assert_eq!(err, Error::LocalOutsideFunction { name: "x".to_string(), span: Span::new(5, 6) });
        assert_eq!(err.kind(), crate::utils::ErrorKind::Analyze);
    }

    #[test]
    fn test_overload_groups() {
        let mut table = SymbolTable::new();
        let m = table.new_module("main", Span::dummy()).unwrap();
        let f1 = table.add_function(m, "f", Span::dummy(), function_kind()).unwrap();
        let f2 = table.add_function(m, "f", Span::dummy(), function_kind()).unwrap();
        let group = table.lookup(m, "f", &[Kind::FunctionGroup], Span::dummy()).unwrap();
        match table.kind(group) {
            SymbolKind::FunctionGroup { members } => assert_eq!(members, &vec![f1, f2]),
            _ => panic!("expected a group"),
        }

        table.define("g", m, Span::dummy(), SymbolKind::Generic).unwrap();
        let err = table.add_function(m, "g", Span::dummy(), function_kind()).unwrap_err();
        assert!(matches!(err, Error::KindMismatch { .. }));
    }

    #[test]
    fn test_kind_mismatch() {
        let mut table = SymbolTable::new();
        let m = table.new_module("main", Span::dummy()).unwrap();
        let err = table.lookup(m, "Int", &[Kind::Variable], Span::dummy()).unwrap_err();
        assert!(matches!(err, Error::KindMismatch { ref got, .. } if got == "struct"));
        let err = table.lookup(m, "nope", &[], Span::dummy()).unwrap_err();
        assert!(matches!(err, Error::UndefinedName { .. }));
    }

    #[test]
    fn test_locals_are_indexed_per_function() {
        let mut table = SymbolTable::new();
        let m = table.new_module("main", Span::dummy()).unwrap();
        let f = table.add_function(m, "f", Span::dummy(), function_kind()).unwrap();
        let outer = table.new_block(f, Span::dummy());
        let inner = table.new_block(outer, Span::dummy());
        let int = table.primitive_type(Primitive::Int);
        let a = table.new_local(outer, "a", int.clone(), Span::dummy()).unwrap();
        let b = table.new_local(inner, "a", int, Span::dummy()).unwrap();

        assert!(matches!(table.kind(a), SymbolKind::Variable { index: 0, .. }));
        assert!(matches!(table.kind(b), SymbolKind::Variable { index: 1, .. }));
        // Shadowing resolves to the innermost
        assert_eq!(table.resolve(inner, "a"), Some(b));
        assert_eq!(table.resolve(outer, "a"), Some(a));
        match table.kind(f) {
            SymbolKind::Function { locals, .. } => assert_eq!(locals, &vec![a, b]),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_imports() {
        let mut table = SymbolTable::new();
        let lib = table.new_module("lib.math", Span::dummy()).unwrap();
        table.add_function(lib, "sq", Span::dummy(), function_kind()).unwrap();
        let m = table.new_module("main", Span::dummy()).unwrap();

        assert!(table.resolve(m, "sq").is_none());
        table.add_import(m, "lib.math", Span::dummy()).unwrap();
        assert!(table.resolve(m, "sq").is_some());
        assert_eq!(table.resolve(m, "math"), Some(lib));
        assert_eq!(table.operators(m, "sq").len(), 1);

        let err = table.add_import(m, "lib.math", Span::dummy()).unwrap_err();
        assert!(matches!(err, Error::DuplicateImport { .. }));
        let err = table.add_import(m, "nowhere", Span::dummy()).unwrap_err();
        assert!(matches!(err, Error::UnknownModule { .. }));
    }
}
