//! Top-down coercion
//!
//! Every node is told the type its position requires. Deferred calls are
//! resolved against it, children are pushed the types their parents need,
//! and the gap between what a node produces and what is required becomes
//! explicit `Deref` or `Discard` nodes.

use super::acquire::is_literal_true;
use super::Analyzer;
use crate::frontend::ast::{Expr, ExprKind, NodeId, TypeExpr};
use crate::sema::resolver::{self, Candidate, Match, Request, Resolution};
use crate::sema::symbols::Kind;
use crate::stdlib::builtins::Primitive;
use crate::types::{accept, interpolate, Env, Side, Type};
use crate::utils::{Error, Result, Span};

impl<'a> Analyzer<'a> {
    pub(super) fn expect(&mut self, expr: &mut Expr, target: &Type) -> Result<()> {
        let current = expr.ty.clone();
        let ty = self.expect_kind(&mut expr.kind, expr.id, expr.span, current, target)?;
        expr.ty = ty;
        self.coerce(expr, target)
    }

    fn expect_kind(&mut self, kind: &mut ExprKind, id: NodeId, span: Span, current: Type, target: &Type) -> Result<Type> {
        let void = Type::void();
        let boolean = self.prim(Primitive::Bool);

        match kind {
            ExprKind::Block { items, scope } => {
                let outer = self.scope;
                if let Some(s) = scope {
                    self.scope = *s;
                }
                let last = items.len().saturating_sub(1);
                let mut diverged = false;
                for (i, item) in items.iter_mut().enumerate() {
                    // Only a reachable final item yields the block's value
                    let want = if i == last && !diverged { target } else { &void };
                    self.expect(item, want)?;
                    diverged |= item.ty.is_diverge();
                }
                self.scope = outer;
                Ok(if diverged {
                    Type::diverge()
                } else {
                    items.last().map(|i| i.ty.clone()).unwrap_or(void)
                })
            }

            ExprKind::Let { value, var, .. } => {
                if let (Some(v), Some(sym)) = (value.as_mut(), *var) {
                    let declared = self.var_type(sym);
                    self.expect(v, &declared)?;
                }
                Ok(void)
            }

            ExprKind::If { cond, then_branch, else_branch } => {
                self.expect(cond, &boolean)?;
                match else_branch {
                    Some(e) => {
                        self.expect(then_branch, target)?;
                        self.expect(e, target)?;
                        Ok(interpolate(&[then_branch.ty.clone(), e.ty.clone()]))
                    }
                    None => {
                        self.expect(then_branch, &void)?;
                        Ok(interpolate(&[then_branch.ty.clone(), void]))
                    }
                }
            }

            ExprKind::While { cond, body, else_branch } => {
                self.expect(cond, &boolean)?;
                self.loop_targets.insert(id, target.clone());
                self.loop_results.insert(id, Vec::new());
                self.expect(body, &void)?;
                let mut results = self.loop_results.remove(&id).unwrap_or_default();
                results.push(match else_branch {
                    Some(e) => {
                        self.expect(e, target)?;
                        e.ty.clone()
                    }
                    None if is_literal_true(cond) => Type::diverge(),
                    None => void,
                });
                Ok(interpolate(&results))
            }

            ExprKind::Break { value, target: loop_id } => {
                let want = loop_id
                    .and_then(|l| self.loop_targets.get(&l).cloned())
                    .unwrap_or_else(Type::void);
                let ty = match value {
                    Some(v) => {
                        self.expect(v, &want)?;
                        v.ty.clone()
                    }
                    None => void,
                };
                if let Some(l) = loop_id {
                    self.loop_results.entry(*l).or_default().push(ty);
                }
                Ok(current)
            }

            ExprKind::Match { value, arms } => {
                let scrutinee = value.ty.value_type();
                self.expect(value, &scrutinee)?;
                let outer = self.scope;
                let mut results = Vec::with_capacity(arms.len());
                for arm in arms.iter_mut() {
                    if let Some(s) = arm.scope {
                        self.scope = s;
                    }
                    self.expect(&mut arm.body, target)?;
                    results.push(arm.body.ty.clone());
                    self.scope = outer;
                }
                Ok(interpolate(&results))
            }

            ExprKind::BinTest { lhs, rhs, .. } => {
                self.expect(lhs, &boolean)?;
                self.expect(rhs, &boolean)?;
                Ok(boolean)
            }
            ExprKind::NotTest(inner) => {
                self.expect(inner, &boolean)?;
                Ok(boolean)
            }

            ExprKind::Call { name, generics, args, resolved } => {
                let sym = self.table.lookup(
                    self.scope,
                    &name.name,
                    &[Kind::FunctionGroup, Kind::Struct, Kind::Variant],
                    name.span,
                )?;
                let candidates = self.callables(sym, &name.name);
                let arg_types: Vec<Type> = args.iter().map(|a| a.ty.clone()).collect();
                let m = self.resolve_late(&name.name, &candidates, generics, &arg_types, resolved, target, span)?;
                for (arg, param) in args.iter_mut().zip(&m.params) {
                    self.expect(arg, param)?;
                }
                Ok(m.ret)
            }

            ExprKind::Method { receiver, name, generics, args, resolved } => {
                let candidates = self.functions(&name.name);
                let mut arg_types = vec![receiver.ty.clone()];
                arg_types.extend(args.iter().map(|a| a.ty.clone()));
                let m = self.resolve_late(&name.name, &candidates, generics, &arg_types, resolved, target, span)?;
                if let Some(first) = m.params.first() {
                    self.expect(receiver, first)?;
                }
                for (arg, param) in args.iter_mut().zip(m.params.iter().skip(1)) {
                    self.expect(arg, param)?;
                }
                Ok(m.ret)
            }

            ExprKind::Op { op, args, resolved } => {
                let candidates = self.functions(op);
                let arg_types: Vec<Type> = args.iter().map(|a| a.ty.clone()).collect();
                let m = self.resolve_late(op, &candidates, &[], &arg_types, resolved, target, span)?;
                for (arg, param) in args.iter_mut().zip(&m.params) {
                    self.expect(arg, param)?;
                }
                Ok(m.ret)
            }

            ExprKind::Cast { value, resolved, .. } => {
                if let Some(param) = resolved.as_ref().and_then(|m| m.params.first()).cloned() {
                    self.expect(value, &param)?;
                }
                Ok(current)
            }

            ExprKind::Member { value, .. } => {
                let want = if value.ty.level() > 0 {
                    Type::reference(value.ty.value_type(), 1)
                } else {
                    value.ty.clone()
                };
                self.expect(value, &want)?;
                Ok(current)
            }

            ExprKind::Assn { target: lhs, value } => {
                let lhs_ty = lhs.ty.clone();
                self.expect(lhs, &lhs_ty)?;
                self.expect(value, &lhs_ty.deref_once())?;
                Ok(void)
            }

            ExprKind::IncAssn { target: lhs, value, resolved, .. } => {
                let lhs_ty = lhs.ty.clone();
                self.expect(lhs, &lhs_ty)?;
                if let Some(param) = resolved.as_ref().and_then(|m| m.params.get(1)).cloned() {
                    self.expect(value, &param)?;
                }
                Ok(void)
            }

            ExprKind::Return { value, .. } => {
                let ret = self.ret.clone();
                match value {
                    Some(v) => self.expect(v, &ret)?,
                    None if !ret.is_void() => {
                        return Err(Error::TypeMismatch {
                            expected: ret.to_string(),
                            got: void.to_string(),
                            span,
                        })
                    }
                    None => {}
                }
                Ok(current)
            }

            ExprKind::AddrOf(inner) => {
                let inner_ty = inner.ty.clone();
                self.expect(inner, &inner_ty)?;
                Ok(current)
            }

            ExprKind::Var { .. }
            | ExprKind::Const(_)
            | ExprKind::Continue { .. }
            | ExprKind::Redo { .. }
            | ExprKind::Noop
            | ExprKind::Deref(_)
            | ExprKind::Discard(_) => Ok(current),
        }
    }

    /// The call's overload, resolving it now if acquire had to defer
    #[allow(clippy::too_many_arguments)]
    fn resolve_late(
        &mut self,
        name: &str,
        candidates: &[Candidate],
        generics: &[TypeExpr],
        args: &[Type],
        resolved: &mut Option<Match>,
        target: &Type,
        span: Span,
    ) -> Result<Match> {
        if let Some(m) = resolved {
            return Ok(m.clone());
        }
        let explicit = self.resolve_types(generics)?;
        let req = Request {
            name,
            args,
            expected: Some(target),
            explicit: &explicit,
            required: true,
            span,
        };
        match resolver::resolve(self.table, candidates, &req)? {
            Resolution::Resolved(m) => {
                *resolved = Some(m.clone());
                Ok(m)
            }
            Resolution::Deferred => Err(Error::AmbiguousOverload {
                name: name.to_string(),
                candidates: String::new(),
                span,
            }),
        }
    }

    /// Make `expr` produce exactly `target`
    fn coerce(&mut self, expr: &mut Expr, target: &Type) -> Result<()> {
        let ty = expr.ty.clone();
        if ty.is_diverge() {
            return Ok(());
        }
        if ty.is_unknown() {
            return Err(Error::CannotInfer {
                name: expr.kind_name().to_lowercase(),
                got: ty.to_string(),
                span: expr.span,
            });
        }
        if target.is_void() {
            if !ty.is_void() {
                self.wrap(expr, ExprKind::Discard, Type::void());
            }
            return Ok(());
        }

        let mut env = Env::new();
        match accept(target, &ty, &mut env, Side::Neither) {
            Some(score) if !score.is_nan() => {
                for _ in target.level()..ty.level() {
                    let inner = expr.ty.deref_once();
                    self.wrap(expr, ExprKind::Deref, inner);
                }
                Ok(())
            }
            _ => Err(Error::TypeMismatch {
                expected: target.to_string(),
                got: ty.to_string(),
                span: expr.span,
            }),
        }
    }
}
