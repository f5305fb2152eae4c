//! Semantic analysis
//!
//! Runs over one parsed file in five passes:
//!
//! 1. imports: attach the module's imports
//! 2. declare: create symbols for every top-level item, then fill in
//!    signatures, field types and generic parameters
//! 3. jumps: bind `break`/`continue`/`redo`/`return` to their targets
//! 4. acquire: bottom-up typing, early overload resolution
//! 5. expect: top-down coercion against the type each position requires
//!
//! After analysis every expression has a type other than `Unknown`, every
//! call has a resolved overload and implicit dereferences and discards are
//! explicit `Deref`/`Discard` nodes.

mod acquire;
mod declare;
mod expect;
mod jumps;

use crate::frontend::ast::{Expr, ExprKind, File, Item, NodeId, TypeExpr, TypeExprKind};
use crate::sema::symbols::{Kind, SymbolId, SymbolKind, SymbolTable};
use crate::stdlib::builtins::Primitive;
use crate::types::Type;
use crate::utils::{Error, Result, Span};
use std::collections::HashMap;

/// Per-module analysis state
pub struct Analyzer<'a> {
    table: &'a mut SymbolTable,
    module: SymbolId,
    /// Innermost scope of the expression being visited
    scope: SymbolId,
    /// Return type of the current function
    ret: Type,
    /// Fresh ids for nodes inserted during coercion
    next_id: u32,
    /// Types of the values each loop is broken with (acquire)
    breaks: HashMap<NodeId, Vec<Type>>,
    /// Result type each loop must produce (expect)
    loop_targets: HashMap<NodeId, Type>,
    /// Break value types after coercion (expect)
    loop_results: HashMap<NodeId, Vec<Type>>,
}

/// Analyze `file` as the module `path`, registering it in `table`
pub fn analyze(table: &mut SymbolTable, path: &str, file: &mut File) -> Result<SymbolId> {
    let module = table.new_module(path, file.span)?;
    let next_id = file
        .items
        .iter()
        .filter_map(|item| match item {
            Item::Def(def) => Some(def.id.max(def.body.max_id()).0 + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0);

    let mut analyzer = Analyzer {
        table,
        module,
        scope: module,
        ret: Type::void(),
        next_id,
        breaks: HashMap::new(),
        loop_targets: HashMap::new(),
        loop_results: HashMap::new(),
    };

    analyzer.imports(file)?;
    analyzer.declare(file)?;
    analyzer.jumps(file)?;
    analyzer.expressions(file)?;
    log::debug!("analyzed module {}", path);
    Ok(module)
}

impl<'a> Analyzer<'a> {
    fn imports(&mut self, file: &File) -> Result<()> {
        for item in &file.items {
            if let Item::Import(import) = item {
                self.table.add_import(self.module, &import.path_string(), import.span)?;
            }
        }
        Ok(())
    }

    /// Type every function body
    fn expressions(&mut self, file: &mut File) -> Result<()> {
        for item in &mut file.items {
            let Item::Def(def) = item else { continue };
            let Some(func) = def.symbol else { continue };
            let ret = match self.table.kind(func) {
                SymbolKind::Function { ret, .. } => ret.clone(),
                _ => Type::void(),
            };

            self.scope = func;
            self.ret = ret.clone();
            self.breaks.clear();
            self.loop_targets.clear();
            self.loop_results.clear();

            self.acquire(&mut def.body)?;
            self.scope = func;
            self.expect(&mut def.body, &ret)?;
            log::trace!("{}: body is {}", def.name.name, def.body.ty);
        }
        Ok(())
    }

    // ==================== Helpers ====================

    fn fresh_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn prim(&self, prim: Primitive) -> Type {
        self.table.primitive_type(prim)
    }

    /// Declared type of a variable or constant symbol
    fn var_type(&self, sym: SymbolId) -> Type {
        match self.table.kind(sym) {
            SymbolKind::Variable { ty, .. } | SymbolKind::Constant { ty, .. } => ty.clone(),
            _ => Type::unknown(),
        }
    }

    /// Resolve a written type in `scope`
    fn resolve_type(&self, scope: SymbolId, texpr: &TypeExpr) -> Result<Type> {
        match &texpr.kind {
            TypeExprKind::Named { name, args } => {
                let sym = self.table.lookup(scope, name, &[Kind::Struct, Kind::Enum, Kind::Generic], texpr.span)?;
                let args = args
                    .iter()
                    .map(|a| self.resolve_type(scope, a))
                    .collect::<Result<Vec<_>>>()?;
                let expected = match self.table.kind(sym) {
                    SymbolKind::Struct { generics, .. } | SymbolKind::Enum { generics, .. } => generics.len(),
                    _ => 0,
                };
                if args.len() != expected {
                    return Err(Error::GenericArity {
                        name: name.clone(),
                        expected,
                        got: args.len(),
                        span: texpr.span,
                    });
                }
                for arg in &args {
                    self.require_sized(arg, texpr.span)?;
                }
                Ok(match self.table.kind(sym) {
                    SymbolKind::Struct { .. } => Type::Struct { sym, name: name.clone(), args },
                    SymbolKind::Enum { .. } => Type::Enum { sym, name: name.clone(), args },
                    _ => Type::Generic { sym, name: name.clone() },
                })
            }
            TypeExprKind::Ref(inner) => Ok(Type::reference(self.resolve_type(scope, inner)?, 1)),
            TypeExprKind::Array { elem, len } => {
                let elem = self.resolve_type(scope, elem)?;
                self.require_sized(&elem, texpr.span)?;
                Ok(Type::Array { elem: Box::new(elem), len: *len })
            }
        }
    }

    fn resolve_types(&self, types: &[TypeExpr]) -> Result<Vec<Type>> {
        types.iter().map(|t| self.resolve_type(self.scope, t)).collect()
    }

    /// Unsized types may only be stored behind a reference
    fn require_sized(&self, ty: &Type, span: Span) -> Result<()> {
        if ty.is_unsized() {
            return Err(Error::UnsizedValue { ty: ty.to_string(), span });
        }
        Ok(())
    }

    /// Replace `expr` by `wrap(expr)`, typed `ty`
    fn wrap(&mut self, expr: &mut Expr, wrap: fn(Box<Expr>) -> ExprKind, ty: Type) {
        let id = self.fresh_id();
        let span = expr.span;
        let placeholder = Expr::new(id, ExprKind::Noop, span);
        let inner = std::mem::replace(expr, placeholder);
        expr.kind = wrap(Box::new(inner));
        expr.ty = ty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::{Def, PatternKind};
    use crate::frontend::parse_source;
    use crate::sema::resolver::Callee;
    use pretty_assertions::assert_eq;

    fn check(source: &str) -> Result<(SymbolTable, File)> {
        let mut table = SymbolTable::new();
        let mut file = parse_source(source)?;
        analyze(&mut table, "main", &mut file)?;
        Ok((table, file))
    }

    fn def<'f>(file: &'f File, name: &str) -> &'f Def {
        file.items
            .iter()
            .find_map(|item| match item {
                Item::Def(d) if d.name.name == name => Some(d),
                _ => None,
            })
            .expect("no such function")
    }

    /// The last item of a function body
    fn tail(def: &Def) -> &Expr {
        match &def.body.kind {
            ExprKind::Block { items, .. } => items.last().expect("empty body"),
            _ => &def.body,
        }
    }

    fn no_unknowns(expr: &Expr) {
        assert!(!expr.ty.is_unknown(), "{} left untyped", expr.kind_name());
        for child in expr.children() {
            no_unknowns(child);
        }
    }

    #[test]
    fn test_builtin_addition() {
        let (_, file) = check("def main() Int { 1 + 2 }").unwrap();
        let main = def(&file, "main");
        assert_eq!(main.body.ty.to_string(), "Int");
        match &tail(main).kind {
            ExprKind::Op { op, resolved: Some(m), .. } => {
                assert_eq!(op, "+");
                assert_eq!(m.ret.to_string(), "Int");
            }
            other => panic!("expected an operator, got {:?}", other),
        }
    }

    #[test]
    fn test_explicit_generic_call() {
        let (table, file) = check("def id{T}(x T) T { x }\ndef main() Int { id{Int}(7) }").unwrap();
        let main = def(&file, "main");
        match &tail(main).kind {
            ExprKind::Call { resolved: Some(m), .. } => {
                assert_eq!(m.generic_args.len(), 1);
                assert_eq!(m.generic_args[0].to_string(), "Int");
                assert!(matches!(m.callee, Callee::Function(f) if table.name(f) == "id"));
            }
            other => panic!("expected a call, got {:?}", other),
        }
        // The generic body reads its parameter through a dereference
        let id = def(&file, "id");
        assert!(matches!(tail(id).kind, ExprKind::Deref(_)));
        assert_eq!(tail(id).ty.to_string(), "T");
    }

    #[test]
    fn test_inferred_generic_call() {
        let (_, file) = check("def id{T}(x T) T { x }\ndef main() Float { id(2.5) }").unwrap();
        match &tail(def(&file, "main")).kind {
            ExprKind::Call { resolved: Some(m), .. } => assert_eq!(m.ret.to_string(), "Float"),
            other => panic!("expected a call, got {:?}", other),
        }
    }

    #[test]
    fn test_recursive_generic_binds_its_own_parameter() {
        let source = "def count{T}(a &[T], n Int) Int { if n == 0 then 0 else 1 + count(a, n - 1) }";
        let (_, file) = check(source).unwrap();
        let count = def(&file, "count");
        no_unknowns(&count.body);

        fn inner_call(expr: &Expr) -> Option<&Expr> {
            if matches!(expr.kind, ExprKind::Call { .. }) {
                return Some(expr);
            }
            expr.children().into_iter().find_map(inner_call)
        }
        match inner_call(&count.body).map(|e| &e.kind) {
            Some(ExprKind::Call { resolved: Some(m), .. }) => {
                assert_eq!(m.generic_args.len(), 1);
                assert_eq!(m.generic_args[0].to_string(), "T");
            }
            other => panic!("expected a resolved call, got {:?}", other),
        }
    }

    #[test]
    fn test_if_else_result() {
        let (_, file) = check("def f(c Bool) Int { if c then 1 else 2 }").unwrap();
        let f = def(&file, "f");
        assert_eq!(tail(f).ty.to_string(), "Int");
        match &tail(f).kind {
            ExprKind::If { cond, .. } => {
                // `c` is a reference to the parameter, read by value
                assert!(matches!(cond.kind, ExprKind::Deref(_)));
                assert_eq!(cond.ty.to_string(), "Bool");
            }
            other => panic!("expected an if, got {:?}", other),
        }
        no_unknowns(&f.body);
    }

    #[test]
    fn test_reference_levels_are_dereferenced() {
        let (_, file) = check("def f() Int { let x = 3; let p &Int = &x; p }").unwrap();
        let f = def(&file, "f");
        let tail = tail(f);
        assert_eq!(tail.ty.to_string(), "Int");
        let ExprKind::Deref(once) = &tail.kind else {
            panic!("expected a dereference");
        };
        assert_eq!(once.ty.to_string(), "&Int");
        let ExprKind::Deref(var) = &once.kind else {
            panic!("expected two dereferences");
        };
        assert_eq!(var.ty.to_string(), "&&Int");
    }

    #[test]
    fn test_while_break_value() {
        let (_, file) = check("def f() Int { while true do { break 5 } }").unwrap();
        let f = def(&file, "f");
        assert_eq!(tail(f).ty.to_string(), "Int");
        no_unknowns(&f.body);
    }

    #[test]
    fn test_while_without_break_is_void() {
        let (_, file) = check("def f(n Int) { let i = 0; while i < n do i += 1 }").unwrap();
        assert!(tail(def(&file, "f")).ty.is_void());
    }

    #[test]
    fn test_statement_values_are_discarded() {
        let (_, file) = check("def f() { 1 + 2; 3 }").unwrap();
        let f = def(&file, "f");
        let ExprKind::Block { items, .. } = &f.body.kind else {
            panic!("expected a block");
        };
        assert!(items.iter().all(|i| matches!(i.kind, ExprKind::Discard(_))));
    }

    #[test]
    fn test_return_diverges() {
        let (_, file) = check("def f(c Bool) Int { if c then return 1; 2 }").unwrap();
        no_unknowns(&def(&file, "f").body);
        let (_, file) = check("def g() Int { return 1; }").unwrap();
        assert!(def(&file, "g").body.ty.is_diverge());
    }

    #[test]
    fn test_struct_member_assignment() {
        let source = "struct P { x Int, y Int }\ndef f() Int { let p = P(1, 2); p.x = 5; p.y }";
        let (_, file) = check(source).unwrap();
        let f = def(&file, "f");
        let ExprKind::Deref(member) = &tail(f).kind else {
            panic!("expected a dereferenced member");
        };
        match &member.kind {
            ExprKind::Member { index, .. } => assert_eq!(*index, Some(1)),
            other => panic!("expected a member, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_struct_constructor() {
        let source = "struct Box{T} { v T }\ndef f() Int { let b = Box(3); b.v }";
        let (_, file) = check(source).unwrap();
        no_unknowns(&def(&file, "f").body);
    }

    #[test]
    fn test_match_on_enum() {
        let source = "enum Opt { None, Some(Int) }\n\
                      def f(o Opt) Int { match o { Some(v) => v, None => 0 } }";
        let (table, file) = check(source).unwrap();
        let f = def(&file, "f");
        assert_eq!(tail(f).ty.to_string(), "Int");
        let ExprKind::Match { arms, .. } = &tail(f).kind else {
            panic!("expected a match");
        };
        // `None` in a pattern names the variant, not a fresh binding
        match &arms[1].pattern.kind {
            PatternKind::Call { callee: Some(v), args, .. } => {
                assert_eq!(table.name(*v), "None");
                assert!(args.is_empty());
            }
            other => panic!("expected a variant pattern, got {:?}", other),
        }
    }

    #[test]
    fn test_variant_constructor_as_value() {
        let source = "enum Opt { None, Some(Int) }\ndef f() Opt { None }";
        let (_, file) = check(source).unwrap();
        assert!(matches!(tail(def(&file, "f")).kind, ExprKind::Call { resolved: Some(_), .. }));
    }

    #[test]
    fn test_constant() {
        let (_, file) = check("def f() Int { MAX_INT }").unwrap();
        assert!(matches!(tail(def(&file, "f")).kind, ExprKind::Var { .. }));
    }

    #[test]
    fn test_cast() {
        let (_, file) = check("def f(x Int) Float { x as Float }").unwrap();
        assert_eq!(tail(def(&file, "f")).ty.to_string(), "Float");
    }

    #[test]
    fn test_deferred_call_resolved_by_expected_type() {
        let source = "def pick() Int { 1 }\ndef pick() Float { 1.0 }\ndef f() Float { pick() }";
        let (_, file) = check(source).unwrap();
        match &tail(def(&file, "f")).kind {
            ExprKind::Call { resolved: Some(m), .. } => assert_eq!(m.ret.to_string(), "Float"),
            other => panic!("expected a call, got {:?}", other),
        }
    }

    #[test]
    fn test_ambiguous_call() {
        let source = "def pick() Int { 1 }\ndef pick() Float { 1.0 }\ndef f() { pick() }";
        assert!(matches!(check(source), Err(Error::AmbiguousOverload { .. })));
    }

    #[test]
    fn test_locals_registered_with_function() {
        let (table, file) = check("def f(a Int) { let x = a; let y = 2.0 }").unwrap();
        let func = def(&file, "f").symbol.unwrap();
        match table.kind(func) {
            SymbolKind::Function { params, locals, .. } => {
                assert_eq!(params.len(), 1);
                assert_eq!(locals.len(), 2);
                assert!(matches!(table.kind(locals[1]), SymbolKind::Variable { index: 1, is_arg: false, .. }));
            }
            _ => panic!("expected a function"),
        }
    }

    #[test]
    fn test_sub_reference_init_rejected() {
        let source = "def f() { let x = 1; let p &&Int = &x }";
        match check(source) {
            Err(Error::InitTypeMismatch { expected, got, .. }) => {
                assert_eq!(expected, "&&Int");
                assert_eq!(got, "&Int");
            }
            other => panic!("expected an initialization mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unsized_local_rejected() {
        assert!(matches!(check("def f(a &[Int]) { let b [Int] = a }"), Err(Error::UnsizedValue { .. })));
        assert!(matches!(check("def f(a [Int]) { }"), Err(Error::UnsizedValue { .. })));
        // Behind a reference it is fine
        assert!(check("def f(a &[Int]) { let b &[Int] = a }").is_ok());
    }

    #[test]
    fn test_jump_outside_loop() {
        assert!(matches!(check("def f() { break }"), Err(Error::JumpOutsideLoop { .. })));
        assert!(matches!(check("def f() { while true do { } else continue }"), Err(Error::JumpOutsideLoop { .. })));
    }

    #[test]
    fn test_cannot_infer() {
        assert!(matches!(check("def f() { let x = f() }"), Err(Error::CannotInfer { .. })));
        assert!(matches!(check("def f() { let x }"), Err(Error::CannotInfer { .. })));
    }

    #[test]
    fn test_type_mismatch() {
        match check("def f() Int { 1.5 }") {
            Err(Error::TypeMismatch { expected, got, .. }) => {
                assert_eq!(expected, "Int");
                assert_eq!(got, "Float");
            }
            other => panic!("expected a type mismatch, got {:?}", other.map(|_| ())),
        }
        assert!(matches!(check("def f() Int { }"), Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_assign_to_value_rejected() {
        assert!(matches!(check("def f() { 1 = 2 }"), Err(Error::NotAssignable { .. })));
        assert!(matches!(check("def f() { let p = &3 }"), Err(Error::NotAReference { .. })));
    }

    #[test]
    fn test_undefined_and_duplicate_names() {
        assert!(matches!(check("def f() Int { y }"), Err(Error::UndefinedName { .. })));
        assert!(matches!(check("struct A { }\nstruct A { }"), Err(Error::DuplicateDefinition { .. })));
        assert!(matches!(check("struct A { x Int, x Int }"), Err(Error::DuplicateDefinition { .. })));
        assert!(matches!(check("import nowhere"), Err(Error::UnknownModule { .. })));
    }

    #[test]
    fn test_pattern_type_checked() {
        let source = "def f(x Int) Int { match x { 1.5 => 0, _ => 1 } }";
        assert!(matches!(check(source), Err(Error::PatternMismatch { .. })));
        let source = "def f(x Int) Int { match x { 1 => 0, n => n } }";
        assert!(check(source).is_ok());
    }

    #[test]
    fn test_imported_function() {
        let mut table = SymbolTable::new();
        let mut lib = parse_source("def twice(x Int) Int { x * 2 }").unwrap();
        analyze(&mut table, "lib", &mut lib).unwrap();
        let mut main = parse_source("import lib\ndef main() Int { twice(4) }").unwrap();
        analyze(&mut table, "main", &mut main).unwrap();
        match &tail(def(&main, "main")).kind {
            ExprKind::Call { resolved: Some(m), .. } => {
                assert!(matches!(m.callee, Callee::Function(f) if table.module_path(f) == "lib"));
            }
            other => panic!("expected a call, got {:?}", other),
        }
    }

    #[test]
    fn test_literal_true_loop_without_else_diverges() {
        let (_, file) = check("def f() Int { while true do { } }").unwrap();
        assert!(tail(def(&file, "f")).ty.is_diverge());
        let (_, file) = check("def g(c Bool) { while c do { } }").unwrap();
        assert!(tail(def(&file, "g")).ty.is_void());
    }
}
