//! Bottom-up typing
//!
//! Each node's type is computed from its children's. Calls are resolved as
//! soon as the argument types decide them; a call that needs its expected
//! result type to pick an overload stays `Unknown` until the expect pass.

use super::Analyzer;
use crate::frontend::ast::{Expr, ExprKind, Ident, Literal, NodeId, Pattern, PatternKind, TypeExpr};
use crate::sema::resolver::{self, Candidate, Match, Request, Resolution};
use crate::sema::symbols::{Kind, SymbolId, SymbolKind};
use crate::stdlib::builtins::Primitive;
use crate::types::{accept, interpolate, Env, Side, Type};
use crate::utils::{Error, Result, Span};

pub(super) fn is_literal_true(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Const(Literal::Bool(true)))
}

impl<'a> Analyzer<'a> {
    pub(super) fn acquire(&mut self, expr: &mut Expr) -> Result<()> {
        let ty = self.acquire_kind(&mut expr.kind, expr.id, expr.span)?;
        log::trace!("acquired {} : {}", expr.kind_name(), ty);
        expr.ty = ty;
        Ok(())
    }

    fn acquire_kind(&mut self, kind: &mut ExprKind, id: NodeId, span: Span) -> Result<Type> {
        match kind {
            ExprKind::Block { items, scope } => {
                let outer = self.scope;
                let block = self.table.new_block(outer, span);
                *scope = Some(block);
                self.scope = block;
                let mut diverges = false;
                for item in items.iter_mut() {
                    self.acquire(item)?;
                    diverges |= item.ty.is_diverge();
                }
                self.scope = outer;
                Ok(if diverges {
                    Type::diverge()
                } else {
                    items.last().map(|i| i.ty.clone()).unwrap_or_else(Type::void)
                })
            }

            ExprKind::Let { name, ty, value, var } => {
                if let Some(v) = value {
                    self.acquire(v)?;
                }
                let declared = match ty {
                    Some(texpr) => {
                        let declared = self.resolve_type(self.scope, texpr)?;
                        self.require_sized(&declared, texpr.span)?;
                        if let Some(v) = value {
                            let mut env = Env::new();
                            if accept(&declared, &v.ty, &mut env, Side::Neither).is_none() {
                                return Err(Error::InitTypeMismatch {
                                    expected: declared.to_string(),
                                    got: v.ty.to_string(),
                                    span: v.span,
                                });
                            }
                        }
                        declared
                    }
                    None => {
                        let Some(v) = value else {
                            return Err(Error::CannotInfer {
                                name: name.name.clone(),
                                got: "nothing".to_string(),
                                span: name.span,
                            });
                        };
                        if v.ty.is_unknown() || v.ty.is_void() || v.ty.is_diverge() {
                            return Err(Error::CannotInfer {
                                name: name.name.clone(),
                                got: v.ty.to_string(),
                                span: v.span,
                            });
                        }
                        // `let p = &x` keeps the reference; anything else is copied
                        let inferred = if matches!(v.kind, ExprKind::AddrOf(_)) {
                            v.ty.clone()
                        } else {
                            v.ty.value_type()
                        };
                        self.require_sized(&inferred, v.span)?;
                        inferred
                    }
                };
                *var = Some(self.table.new_local(self.scope, &name.name, declared, name.span)?);
                Ok(Type::void())
            }

            ExprKind::If { cond, then_branch, else_branch } => {
                self.acquire(cond)?;
                self.acquire(then_branch)?;
                let other = match else_branch {
                    Some(e) => {
                        self.acquire(e)?;
                        e.ty.clone()
                    }
                    None => Type::void(),
                };
                Ok(interpolate(&[then_branch.ty.clone(), other]))
            }

            ExprKind::While { cond, body, else_branch } => {
                self.acquire(cond)?;
                self.breaks.insert(id, Vec::new());
                self.acquire(body)?;
                let mut results = self.breaks.remove(&id).unwrap_or_default();
                results.push(match else_branch {
                    Some(e) => {
                        self.acquire(e)?;
                        e.ty.clone()
                    }
                    None if is_literal_true(cond) => Type::diverge(),
                    None => Type::void(),
                });
                Ok(interpolate(&results))
            }

            ExprKind::Match { value, arms } => {
                self.acquire(value)?;
                let scrutinee = value.ty.value_type();
                let outer = self.scope;
                let mut results = Vec::with_capacity(arms.len());
                for arm in arms.iter_mut() {
                    let scope = self.table.new_block(outer, arm.span);
                    arm.scope = Some(scope);
                    self.scope = scope;
                    self.check_pattern(&mut arm.pattern, &scrutinee)?;
                    self.acquire(&mut arm.body)?;
                    results.push(arm.body.ty.clone());
                    self.scope = outer;
                }
                Ok(interpolate(&results))
            }

            ExprKind::BinTest { lhs, rhs, .. } => {
                self.acquire(lhs)?;
                self.acquire(rhs)?;
                Ok(self.prim(Primitive::Bool))
            }
            ExprKind::NotTest(inner) => {
                self.acquire(inner)?;
                Ok(self.prim(Primitive::Bool))
            }

            ExprKind::Call { name, generics, args, resolved } => {
                for a in args.iter_mut() {
                    self.acquire(a)?;
                }
                let sym = self.table.lookup(
                    self.scope,
                    &name.name,
                    &[Kind::FunctionGroup, Kind::Struct, Kind::Variant],
                    name.span,
                )?;
                let candidates = self.callables(sym, &name.name);
                let arg_types = args.iter().map(|a| a.ty.clone()).collect();
                self.resolve_early(&name.name, &candidates, generics, arg_types, resolved, span)
            }

            ExprKind::Method { receiver, name, generics, args, resolved } => {
                self.acquire(receiver)?;
                for a in args.iter_mut() {
                    self.acquire(a)?;
                }
                let candidates = self.functions(&name.name);
                let mut arg_types = vec![receiver.ty.clone()];
                arg_types.extend(args.iter().map(|a| a.ty.clone()));
                self.resolve_early(&name.name, &candidates, generics, arg_types, resolved, span)
            }

            ExprKind::Op { op, args, resolved } => {
                for a in args.iter_mut() {
                    self.acquire(a)?;
                }
                let candidates = self.functions(op);
                let arg_types = args.iter().map(|a| a.ty.clone()).collect();
                self.resolve_early(op, &candidates, &[], arg_types, resolved, span)
            }

            ExprKind::Cast { value, target, resolved } => {
                self.acquire(value)?;
                let to = self.resolve_type(self.scope, target)?;
                let candidates = self.functions("cast");
                let args = [value.ty.clone()];
                let req = Request {
                    name: "cast",
                    args: &args,
                    expected: Some(&to),
                    explicit: &[],
                    required: true,
                    span,
                };
                if let Resolution::Resolved(m) = resolver::resolve(self.table, &candidates, &req)? {
                    *resolved = Some(m);
                }
                Ok(to)
            }

            ExprKind::Member { value, field, index } => {
                self.acquire(value)?;
                let owner = value.ty.value_type();
                let unknown = || Error::UnknownField {
                    ty: owner.to_string(),
                    field: field.name.clone(),
                    span: field.span,
                };
                let fields = self.table.struct_fields(&owner).ok_or_else(unknown)?;
                let found = fields.iter().find(|f| f.name == field.name).ok_or_else(unknown)?;
                *index = Some(found.index);
                Ok(Type::reference(found.ty.clone(), 1))
            }

            ExprKind::Var { name, symbol } => {
                let sym = self.table.lookup(
                    self.scope,
                    name,
                    &[Kind::Variable, Kind::Constant, Kind::Variant, Kind::Struct],
                    span,
                )?;
                let ty = match self.table.kind(sym) {
                    SymbolKind::Variable { ty, .. } => Some(Type::reference(ty.clone(), 1)),
                    SymbolKind::Constant { ty, .. } => Some(ty.clone()),
                    _ => None,
                };
                match ty {
                    Some(ty) => {
                        *symbol = Some(sym);
                        Ok(ty)
                    }
                    None => {
                        // A bare constructor name is a call without arguments
                        let name = Ident::new(name.clone(), span);
                        *kind = ExprKind::Call { name, generics: Vec::new(), args: Vec::new(), resolved: None };
                        self.acquire_kind(kind, id, span)
                    }
                }
            }

            ExprKind::Const(lit) => Ok(self.literal_type(lit)),

            ExprKind::Assn { target, value } => {
                self.acquire(target)?;
                self.acquire(value)?;
                self.require_assignable(target)?;
                Ok(Type::void())
            }

            ExprKind::IncAssn { op, target, value, resolved } => {
                self.acquire(target)?;
                self.acquire(value)?;
                self.require_assignable(target)?;
                let lhs = target.ty.deref_once();
                let candidates = self.functions(op);
                let args = [lhs.clone(), value.ty.clone()];
                let req = Request {
                    name: op.as_str(),
                    args: &args,
                    expected: Some(&lhs),
                    explicit: &[],
                    required: true,
                    span,
                };
                if let Resolution::Resolved(m) = resolver::resolve(self.table, &candidates, &req)? {
                    *resolved = Some(m);
                }
                Ok(Type::void())
            }

            ExprKind::Return { value, .. } => {
                if let Some(v) = value {
                    self.acquire(v)?;
                }
                Ok(Type::diverge())
            }

            ExprKind::Break { value, target } => {
                let ty = match value {
                    Some(v) => {
                        self.acquire(v)?;
                        v.ty.clone()
                    }
                    None => Type::void(),
                };
                if let Some(t) = target {
                    self.breaks.entry(*t).or_default().push(ty);
                }
                Ok(Type::diverge())
            }

            ExprKind::Continue { .. } | ExprKind::Redo { .. } => Ok(Type::diverge()),
            ExprKind::Noop => Ok(Type::void()),

            ExprKind::AddrOf(inner) => {
                self.acquire(inner)?;
                if inner.ty.level() == 0 {
                    return Err(Error::NotAReference { ty: inner.ty.to_string(), span });
                }
                Ok(inner.ty.clone())
            }
            ExprKind::Deref(inner) => {
                self.acquire(inner)?;
                Ok(inner.ty.deref_once())
            }
            ExprKind::Discard(inner) => {
                self.acquire(inner)?;
                Ok(Type::void())
            }
        }
    }

    // ==================== Calls ====================

    /// Candidates for a call of `name`, which resolved to `sym`
    pub(super) fn callables(&self, sym: SymbolId, name: &str) -> Vec<Candidate> {
        match self.table.kind(sym) {
            SymbolKind::FunctionGroup { .. } => self.functions(name),
            _ => Candidate::from_symbol(self.table, sym).into_iter().collect(),
        }
    }

    /// Every function named `name` visible from the current module
    pub(super) fn functions(&self, name: &str) -> Vec<Candidate> {
        resolver::candidates(self.table, &self.table.operators(self.module, name))
    }

    fn resolve_early(
        &mut self,
        name: &str,
        candidates: &[Candidate],
        generics: &[TypeExpr],
        args: Vec<Type>,
        resolved: &mut Option<Match>,
        span: Span,
    ) -> Result<Type> {
        let explicit = self.resolve_types(generics)?;
        let req = Request {
            name,
            args: &args,
            expected: None,
            explicit: &explicit,
            required: false,
            span,
        };
        match resolver::resolve(self.table, candidates, &req)? {
            Resolution::Resolved(m) => {
                let ret = m.ret.clone();
                *resolved = Some(m);
                Ok(ret)
            }
            Resolution::Deferred => Ok(Type::unknown()),
        }
    }

    fn require_assignable(&self, target: &Expr) -> Result<()> {
        if target.ty.level() == 0 {
            return Err(Error::NotAssignable { ty: target.ty.to_string(), span: target.span });
        }
        Ok(())
    }

    pub(super) fn literal_type(&self, lit: &Literal) -> Type {
        self.prim(match lit {
            Literal::Int(_) => Primitive::Int,
            Literal::Float(_) => Primitive::Float,
            Literal::Bool(_) => Primitive::Bool,
        })
    }

    // ==================== Patterns ====================

    /// Type `pattern` against the value type `ty`, binding its variables
    /// in the current scope
    fn check_pattern(&mut self, pattern: &mut Pattern, ty: &Type) -> Result<()> {
        pattern.ty = ty.clone();
        let span = pattern.span;
        if ty.is_unknown() {
            return Err(Error::CannotInfer {
                name: "match value".to_string(),
                got: ty.to_string(),
                span,
            });
        }

        match &mut pattern.kind {
            PatternKind::Any => Ok(()),

            PatternKind::Const(lit) => {
                self.require_by_value(ty, span)?;
                let lit_ty = self.literal_type(lit);
                if lit_ty != *ty {
                    return Err(Error::PatternMismatch {
                        message: format!("pattern of type {} cannot match a value of type {}", lit_ty, ty),
                        span,
                    });
                }
                Ok(())
            }

            PatternKind::Var { name, var } => {
                let variant = self.table.resolve(self.scope, &name.name).filter(|&s| {
                    matches!(self.table.kind(s), SymbolKind::Variant { fields, .. } if fields.is_empty())
                });
                if variant.is_some() {
                    let name = name.clone();
                    pattern.kind = PatternKind::Call { name, args: Vec::new(), callee: None };
                    return self.check_pattern(pattern, ty);
                }
                self.require_by_value(ty, span)?;
                *var = Some(self.table.new_local(self.scope, &name.name, ty.clone(), name.span)?);
                Ok(())
            }

            PatternKind::Call { name, args, callee } => {
                let sym = self.table.lookup(self.scope, &name.name, &[Kind::Struct, Kind::Variant], name.span)?;
                let fields: Option<Vec<Type>> = match (self.table.kind(sym), ty) {
                    (SymbolKind::Struct { .. }, Type::Struct { sym: s, .. }) if *s == sym => self
                        .table
                        .struct_fields(ty)
                        .map(|fs| fs.into_iter().map(|f| f.ty).collect()),
                    (SymbolKind::Variant { .. }, Type::Enum { .. }) => self
                        .table
                        .enum_variants(ty)
                        .and_then(|vs| vs.into_iter().find(|(v, _, _)| *v == sym))
                        .map(|(_, _, fields)| fields),
                    _ => None,
                };
                let fields = fields.ok_or_else(|| Error::PatternMismatch {
                    message: format!("{} cannot match a value of type {}", name.name, ty),
                    span,
                })?;
                if fields.len() != args.len() {
                    return Err(Error::PatternMismatch {
                        message: format!("{} has {} fields, the pattern lists {}", name.name, fields.len(), args.len()),
                        span,
                    });
                }
                *callee = Some(sym);
                for (arg, field_ty) in args.iter_mut().zip(&fields) {
                    self.check_pattern(arg, field_ty)?;
                }
                Ok(())
            }
        }
    }

    /// Literal and binding patterns only apply to plain values
    fn require_by_value(&self, ty: &Type, span: Span) -> Result<()> {
        if ty.level() > 0 {
            return Err(Error::PatternMismatch {
                message: format!("cannot match a reference of type {} by value", ty),
                span,
            });
        }
        Ok(())
    }
}
