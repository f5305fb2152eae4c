//! Overload resolution
//!
//! Every callable (function, struct constructor, enum variant constructor)
//! becomes a [`Candidate`]. Each candidate is scored against the argument
//! types, the score vectors are reduced to their Pareto front, and a single
//! survivor with all generics bound becomes the [`Match`].

use crate::sema::symbols::{SymbolId, SymbolKind, SymbolTable};
use crate::types::{accept, Env, Side, Type};
use crate::utils::{Error, Result, Span};
use serde::Serialize;

/// What a resolved call invokes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Callee {
    Function(SymbolId),
    /// Struct construction
    Struct(SymbolId),
    /// Enum variant construction
    Variant(SymbolId),
}

/// An unresolved overload: a callable's signature with its generics free
#[derive(Debug, Clone)]
pub struct Candidate {
    pub callee: Callee,
    pub generics: Vec<SymbolId>,
    pub params: Vec<Type>,
    pub ret: Type,
}

/// A candidate paired with the substitution that makes it fit a call
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub callee: Callee,
    pub env: Env,
    /// Bindings of the callee's generic parameters, in declaration order
    pub generic_args: Vec<Type>,
    pub params: Vec<Type>,
    pub ret: Type,
    pub scores: Vec<f64>,
}

/// Outcome of a resolution attempt
#[derive(Debug, Clone)]
pub enum Resolution {
    Resolved(Match),
    /// More than one candidate fits; retry once the expected type is known
    Deferred,
}

/// The call being resolved
pub struct Request<'a> {
    pub name: &'a str,
    pub args: &'a [Type],
    /// Expected return type, if known
    pub expected: Option<&'a Type>,
    /// Explicit generic arguments (`f{Int}(..)`)
    pub explicit: &'a [Type],
    /// Report ambiguity instead of deferring
    pub required: bool,
    pub span: Span,
}

impl Candidate {
    /// The candidate for a callable symbol; None for anything else
    pub fn from_symbol(table: &SymbolTable, sym: SymbolId) -> Option<Candidate> {
        match table.kind(sym) {
            SymbolKind::Function { generics, params, ret, .. } => Some(Candidate {
                callee: Callee::Function(sym),
                generics: generics.clone(),
                params: params
                    .iter()
                    .map(|&p| match table.kind(p) {
                        SymbolKind::Variable { ty, .. } => ty.clone(),
                        _ => Type::unknown(),
                    })
                    .collect(),
                ret: ret.clone(),
            }),
            SymbolKind::Struct { generics, fields, primitive: None } => Some(Candidate {
                callee: Callee::Struct(sym),
                generics: generics.clone(),
                params: fields.iter().map(|f| f.ty.clone()).collect(),
                ret: table.declared_type(sym),
            }),
            SymbolKind::Variant { fields, .. } => {
                let owner = table.get(sym).parent?;
                let generics = match table.kind(owner) {
                    SymbolKind::Enum { generics, .. } => generics.clone(),
                    _ => return None,
                };
                Some(Candidate {
                    callee: Callee::Variant(sym),
                    generics,
                    params: fields.clone(),
                    ret: table.declared_type(owner),
                })
            }
            _ => None,
        }
    }

    /// Human-readable signature, for ambiguity reports
    pub fn signature(&self, table: &SymbolTable) -> String {
        let sym = match self.callee {
            Callee::Function(s) | Callee::Struct(s) | Callee::Variant(s) => s,
        };
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        let mut out = table.name(sym).to_string();
        if !self.generics.is_empty() {
            let generics: Vec<&str> = self.generics.iter().map(|&g| table.name(g)).collect();
            out.push_str(&format!("{{{}}}", generics.join(",")));
        }
        out.push_str(&format!("({}) {}", params.join(", "), self.ret));
        out
    }
}

/// Candidates for every callable among `syms`
pub fn candidates(table: &SymbolTable, syms: &[SymbolId]) -> Vec<Candidate> {
    syms.iter().filter_map(|&s| Candidate::from_symbol(table, s)).collect()
}

/// `a < b` in the score partial order; NaN components never decide
pub fn dominated(a: &[f64], b: &[f64]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut strictly = false;
    for (x, y) in a.iter().zip(b) {
        if x.is_nan() || y.is_nan() {
            continue;
        }
        if x > y {
            return false;
        }
        if x < y {
            strictly = true;
        }
    }
    strictly
}

fn same_scores(a: &[f64], b: &[f64]) -> bool {
    !dominated(a, b) && !dominated(b, a)
}

/// Score one candidate; None if it cannot fit the call
fn score(candidate: &Candidate, req: &Request) -> Option<(Env, Vec<f64>)> {
    let mut env = Env::new();
    if !req.explicit.is_empty() {
        if req.explicit.len() != candidate.generics.len() {
            return None;
        }
        env.extend(candidate.generics.iter().copied().zip(req.explicit.iter().cloned()));
    }
    if candidate.params.len() != req.args.len() {
        return None;
    }

    let mut scores = Vec::with_capacity(req.args.len() + 1);
    for (param, arg) in candidate.params.iter().zip(req.args) {
        scores.push(accept(param, arg, &mut env, Side::Target)?);
    }
    let ret_score = match req.expected {
        Some(expected) => accept(expected, &candidate.ret, &mut env, Side::Source)?,
        None => f64::NAN,
    };
    scores.push(ret_score);
    Some((env, scores))
}

/// Pick the best candidate for `req`
pub fn resolve(table: &SymbolTable, candidates: &[Candidate], req: &Request) -> Result<Resolution> {
    if !req.explicit.is_empty() && candidates.len() == 1 && candidates[0].generics.len() != req.explicit.len() {
        return Err(Error::GenericArity {
            name: req.name.to_string(),
            expected: candidates[0].generics.len(),
            got: req.explicit.len(),
            span: req.span,
        });
    }

    let viable: Vec<(&Candidate, Env, Vec<f64>)> = candidates
        .iter()
        .filter_map(|c| score(c, req).map(|(env, scores)| (c, env, scores)))
        .collect();

    if viable.is_empty() {
        let args: Vec<String> = req.args.iter().map(|a| a.to_string()).collect();
        return Err(Error::NoViableOverload {
            name: req.name.to_string(),
            args: args.join(", "),
            span: req.span,
        });
    }

    // Pareto front: drop everything strictly beaten by another candidate
    let mut front: Vec<&(&Candidate, Env, Vec<f64>)> = viable
        .iter()
        .filter(|(_, _, s)| !viable.iter().any(|(_, _, other)| dominated(s, other)))
        .collect();

    // Non-generic candidates beat generic ones of equal cost
    if front.len() > 1 {
        let concrete: Vec<Vec<f64>> = front
            .iter()
            .filter(|(c, _, _)| c.generics.is_empty())
            .map(|(_, _, s)| s.clone())
            .collect();
        front.retain(|(c, _, s)| {
            c.generics.is_empty() || !concrete.iter().any(|other| same_scores(s, other))
        });
    }

    log::trace!("{}: {} viable, {} on the front", req.name, viable.len(), front.len());

    if front.len() > 1 {
        if req.required {
            let listing: Vec<String> = front
                .iter()
                .map(|(c, _, _)| format!("    {}", c.signature(table)))
                .collect();
            return Err(Error::AmbiguousOverload {
                name: req.name.to_string(),
                candidates: listing.join("\n"),
                span: req.span,
            });
        }
        return Ok(Resolution::Deferred);
    }

    let (candidate, env, scores) = front[0];
    if let Some(&unbound) = candidate.generics.iter().find(|&&g| !env.contains_key(&g)) {
        if req.required {
            return Err(Error::UnresolvedGeneric {
                name: req.name.to_string(),
                param: table.name(unbound).to_string(),
                span: req.span,
            });
        }
        return Ok(Resolution::Deferred);
    }

    let m = Match {
        callee: candidate.callee,
        env: env.clone(),
        generic_args: candidate.generics.iter().map(|g| env[g].clone()).collect(),
        params: candidate.params.iter().map(|p| p.resolve(env)).collect(),
        ret: candidate.ret.resolve(env),
        scores: scores.clone(),
    };
    log::debug!("{} resolved to {}", req.name, candidate.signature(table));
    Ok(Resolution::Resolved(m))
}
