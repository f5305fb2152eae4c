//! Jump binding: every break, continue, redo and return learns the node it
//! transfers control to; every match arm learns its match.

use super::Analyzer;
use crate::frontend::ast::{Expr, ExprKind, File, Item, NodeId};
use crate::utils::{Error, Result};

struct Targets {
    function: NodeId,
    innermost_loop: Option<NodeId>,
}

impl<'a> Analyzer<'a> {
    pub(super) fn jumps(&mut self, file: &mut File) -> Result<()> {
        for item in &mut file.items {
            if let Item::Def(def) = item {
                let targets = Targets { function: def.id, innermost_loop: None };
                bind(&mut def.body, &targets)?;
            }
        }
        Ok(())
    }
}

fn bind(expr: &mut Expr, targets: &Targets) -> Result<()> {
    let span = expr.span;
    let id = expr.id;
    let outside = |keyword: &str| Error::JumpOutsideLoop { keyword: keyword.to_string(), span };

    match &mut expr.kind {
        ExprKind::While { cond, body, else_branch } => {
            bind(cond, targets)?;
            let inner = Targets { function: targets.function, innermost_loop: Some(id) };
            bind(body, &inner)?;
            if let Some(e) = else_branch {
                bind(e, targets)?;
            }
            return Ok(());
        }
        ExprKind::Match { arms, .. } => {
            for arm in arms.iter_mut() {
                arm.target = Some(id);
            }
        }
        ExprKind::Break { target, .. } => {
            *target = Some(targets.innermost_loop.ok_or_else(|| outside("break"))?);
        }
        ExprKind::Continue { target } => {
            *target = Some(targets.innermost_loop.ok_or_else(|| outside("continue"))?);
        }
        ExprKind::Redo { target } => {
            *target = Some(targets.innermost_loop.ok_or_else(|| outside("redo"))?);
        }
        ExprKind::Return { function, .. } => *function = Some(targets.function),
        _ => {}
    }

    for child in expr.children_mut() {
        bind(child, targets)?;
    }
    Ok(())
}
