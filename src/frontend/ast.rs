//! Abstract Syntax Tree definitions for Fin
//!
//! The parser builds an untyped tree; the analyzer mutates it in place,
//! filling in `ty`, resolved overloads, symbols and jump targets.

use crate::sema::resolver::Match;
use crate::sema::symbols::SymbolId;
use crate::types::Type;
use crate::utils::Span;
use serde::Serialize;
use std::fmt;

/// Unique identity of an expression node within one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

/// A complete source file (compilation unit)
#[derive(Debug, Clone, Serialize)]
pub struct File {
    pub items: Vec<Item>,
    pub span: Span,
}

/// Top-level items
#[derive(Debug, Clone, Serialize)]
pub enum Item {
    Import(Import),
    Def(Def),
    Struct(StructDef),
    Enum(EnumDef),
}

/// A name together with where it was written
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self { name: name.into(), span }
    }
}

/// import a.b.c
#[derive(Debug, Clone, Serialize)]
pub struct Import {
    pub path: Vec<Ident>,
    pub span: Span,
}

impl Import {
    /// Dotted module path
    pub fn path_string(&self) -> String {
        self.path
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Function definition
#[derive(Debug, Clone, Serialize)]
pub struct Def {
    pub id: NodeId,
    pub name: Ident,
    pub generics: Vec<Ident>,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub body: Expr,
    pub span: Span,
    pub symbol: Option<SymbolId>,
}

/// Function parameter
#[derive(Debug, Clone, Serialize)]
pub struct Param {
    pub name: Ident,
    pub ty: TypeExpr,
    pub span: Span,
}

/// Struct definition
#[derive(Debug, Clone, Serialize)]
pub struct StructDef {
    pub name: Ident,
    pub generics: Vec<Ident>,
    pub fields: Vec<FieldDef>,
    pub span: Span,
    pub symbol: Option<SymbolId>,
}

/// Struct field
#[derive(Debug, Clone, Serialize)]
pub struct FieldDef {
    pub name: Ident,
    pub ty: TypeExpr,
    pub span: Span,
}

/// Enum definition
#[derive(Debug, Clone, Serialize)]
pub struct EnumDef {
    pub name: Ident,
    pub generics: Vec<Ident>,
    pub variants: Vec<VariantDef>,
    pub span: Span,
    pub symbol: Option<SymbolId>,
}

/// Enum variant
#[derive(Debug, Clone, Serialize)]
pub struct VariantDef {
    pub name: Ident,
    pub fields: Vec<TypeExpr>,
    pub span: Span,
}

// ==================== Types ====================

/// A type as written in source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TypeExprKind {
    /// Name{Args}
    Named { name: String, args: Vec<TypeExpr> },
    /// &T
    Ref(Box<TypeExpr>),
    /// [T] or [T; N]
    Array { elem: Box<TypeExpr>, len: Option<u64> },
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeExprKind::Named { name, args } => {
                write!(f, "{}", name)?;
                if !args.is_empty() {
                    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                    write!(f, "{{{}}}", args.join(","))?;
                }
                Ok(())
            }
            TypeExprKind::Ref(inner) => write!(f, "&{}", inner),
            TypeExprKind::Array { elem, len: Some(n) } => write!(f, "[{}; {}]", elem, n),
            TypeExprKind::Array { elem, len: None } => write!(f, "[{}]", elem),
        }
    }
}

// ==================== Patterns ====================

/// A match-arm pattern
#[derive(Debug, Clone, Serialize)]
pub struct Pattern {
    pub kind: PatternKind,
    pub span: Span,
    /// Value type of the position the pattern tests
    pub ty: Type,
}

#[derive(Debug, Clone, Serialize)]
pub enum PatternKind {
    /// _
    Any,
    /// A literal compared for equality
    Const(Literal),
    /// A fresh binding, or a field-less variant once resolved
    Var { name: Ident, var: Option<SymbolId> },
    /// Struct or variant destructuring
    Call {
        name: Ident,
        args: Vec<Pattern>,
        callee: Option<SymbolId>,
    },
}

impl Pattern {
    /// True if matching this pattern tests or binds anything
    pub fn is_refutable_or_binding(&self) -> bool {
        !matches!(self.kind, PatternKind::Any)
    }
}

/// match arm
#[derive(Debug, Clone, Serialize)]
pub struct Arm {
    pub pattern: Pattern,
    pub body: Expr,
    pub span: Span,
    /// The enclosing match
    pub target: Option<NodeId>,
    /// Scope holding the pattern's bindings
    pub scope: Option<SymbolId>,
}

// ==================== Expressions ====================

/// Literal constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Float(n) => write!(f, "{:?}", n),
            Literal::Bool(b) => write!(f, "{}", *b as u8),
        }
    }
}

/// Short-circuit boolean operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TestOp {
    And,
    Or,
}

/// Expression node
#[derive(Debug, Clone, Serialize)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    pub span: Span,
    /// Unknown until the analyzer has run
    pub ty: Type,
}

#[derive(Debug, Clone, Serialize)]
pub enum ExprKind {
    /// { a; b; c }
    Block {
        items: Vec<Expr>,
        scope: Option<SymbolId>,
    },
    /// let name [type] [= value]
    Let {
        name: Ident,
        ty: Option<TypeExpr>,
        value: Option<Box<Expr>>,
        var: Option<SymbolId>,
    },
    /// if cond then a [else b]
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    /// while cond do body [else e]
    While {
        cond: Box<Expr>,
        body: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    /// match value { arms }
    Match {
        value: Box<Expr>,
        arms: Vec<Arm>,
    },
    /// a and b / a or b
    BinTest {
        op: TestOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// not a
    NotTest(Box<Expr>),
    /// name{G}(args); also struct and variant construction
    Call {
        name: Ident,
        generics: Vec<TypeExpr>,
        args: Vec<Expr>,
        resolved: Option<Match>,
    },
    /// receiver.name{G}(args)
    Method {
        receiver: Box<Expr>,
        name: Ident,
        generics: Vec<TypeExpr>,
        args: Vec<Expr>,
        resolved: Option<Match>,
    },
    /// Operator application: + - * / % == != < <= > >= [] and unary -
    Op {
        op: String,
        args: Vec<Expr>,
        resolved: Option<Match>,
    },
    /// value as T
    Cast {
        value: Box<Expr>,
        target: TypeExpr,
        resolved: Option<Match>,
    },
    /// value.field
    Member {
        value: Box<Expr>,
        field: Ident,
        index: Option<usize>,
    },
    /// A name: local, parameter or constant
    Var {
        name: String,
        symbol: Option<SymbolId>,
    },
    Const(Literal),
    /// target = value
    Assn {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// target op= value
    IncAssn {
        op: String,
        target: Box<Expr>,
        value: Box<Expr>,
        resolved: Option<Match>,
    },
    Return {
        value: Option<Box<Expr>>,
        function: Option<NodeId>,
    },
    Break {
        value: Option<Box<Expr>>,
        target: Option<NodeId>,
    },
    Continue {
        target: Option<NodeId>,
    },
    Redo {
        target: Option<NodeId>,
    },
    Noop,
    /// &value: keeps the operand a reference
    AddrOf(Box<Expr>),
    /// Inserted by the analyzer: one level of implicit dereference
    Deref(Box<Expr>),
    /// Inserted by the analyzer: the value is dropped
    Discard(Box<Expr>),
}

impl Expr {
    pub fn new(id: NodeId, kind: ExprKind, span: Span) -> Self {
        Self { id, kind, span, ty: Type::unknown() }
    }

    /// Short name of the node kind, used in diagnostics and dumps
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ExprKind::Block { .. } => "Block",
            ExprKind::Let { .. } => "Let",
            ExprKind::If { .. } => "If",
            ExprKind::While { .. } => "While",
            ExprKind::Match { .. } => "Match",
            ExprKind::BinTest { .. } => "BinTest",
            ExprKind::NotTest(_) => "NotTest",
            ExprKind::Call { .. } => "Call",
            ExprKind::Method { .. } => "Method",
            ExprKind::Op { .. } => "Op",
            ExprKind::Cast { .. } => "Cast",
            ExprKind::Member { .. } => "Member",
            ExprKind::Var { .. } => "Var",
            ExprKind::Const(_) => "Const",
            ExprKind::Assn { .. } => "Assn",
            ExprKind::IncAssn { .. } => "IncAssn",
            ExprKind::Return { .. } => "Return",
            ExprKind::Break { .. } => "Break",
            ExprKind::Continue { .. } => "Continue",
            ExprKind::Redo { .. } => "Redo",
            ExprKind::Noop => "Noop",
            ExprKind::AddrOf(_) => "AddrOf",
            ExprKind::Deref(_) => "Deref",
            ExprKind::Discard(_) => "Discard",
        }
    }

    /// Visit every direct child expression
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Block { items, .. } => items.iter().collect(),
            ExprKind::Let { value, .. } => value.iter().map(|v| v.as_ref()).collect(),
            ExprKind::If { cond, then_branch, else_branch } => {
                let mut out = vec![cond.as_ref(), then_branch.as_ref()];
                out.extend(else_branch.iter().map(|e| e.as_ref()));
                out
            }
            ExprKind::While { cond, body, else_branch } => {
                let mut out = vec![cond.as_ref(), body.as_ref()];
                out.extend(else_branch.iter().map(|e| e.as_ref()));
                out
            }
            ExprKind::Match { value, arms } => {
                let mut out = vec![value.as_ref()];
                out.extend(arms.iter().map(|a| &a.body));
                out
            }
            ExprKind::BinTest { lhs, rhs, .. } => vec![lhs.as_ref(), rhs.as_ref()],
            ExprKind::Call { args, .. } | ExprKind::Op { args, .. } => args.iter().collect(),
            ExprKind::Method { receiver, args, .. } => {
                let mut out = vec![receiver.as_ref()];
                out.extend(args.iter());
                out
            }
            ExprKind::Assn { target, value } | ExprKind::IncAssn { target, value, .. } => {
                vec![target.as_ref(), value.as_ref()]
            }
            ExprKind::Return { value, .. } | ExprKind::Break { value, .. } => {
                value.iter().map(|v| v.as_ref()).collect()
            }
            ExprKind::NotTest(e)
            | ExprKind::AddrOf(e)
            | ExprKind::Deref(e)
            | ExprKind::Discard(e)
            | ExprKind::Cast { value: e, .. }
            | ExprKind::Member { value: e, .. } => vec![e.as_ref()],
            ExprKind::Var { .. }
            | ExprKind::Const(_)
            | ExprKind::Continue { .. }
            | ExprKind::Redo { .. }
            | ExprKind::Noop => Vec::new(),
        }
    }

    /// Mutable access to every direct child expression
    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            ExprKind::Block { items, .. } => items.iter_mut().collect(),
            ExprKind::Let { value, .. } => value.iter_mut().map(|v| v.as_mut()).collect(),
            ExprKind::If { cond, then_branch, else_branch } => {
                let mut out = vec![cond.as_mut(), then_branch.as_mut()];
                out.extend(else_branch.iter_mut().map(|e| e.as_mut()));
                out
            }
            ExprKind::While { cond, body, else_branch } => {
                let mut out = vec![cond.as_mut(), body.as_mut()];
                out.extend(else_branch.iter_mut().map(|e| e.as_mut()));
                out
            }
            ExprKind::Match { value, arms } => {
                let mut out = vec![value.as_mut()];
                out.extend(arms.iter_mut().map(|a| &mut a.body));
                out
            }
            ExprKind::BinTest { lhs, rhs, .. } => vec![lhs.as_mut(), rhs.as_mut()],
            ExprKind::Call { args, .. } | ExprKind::Op { args, .. } => args.iter_mut().collect(),
            ExprKind::Method { receiver, args, .. } => {
                let mut out = vec![receiver.as_mut()];
                out.extend(args.iter_mut());
                out
            }
            ExprKind::Assn { target, value } | ExprKind::IncAssn { target, value, .. } => {
                vec![target.as_mut(), value.as_mut()]
            }
            ExprKind::Return { value, .. } | ExprKind::Break { value, .. } => {
                value.iter_mut().map(|v| v.as_mut()).collect()
            }
            ExprKind::NotTest(e)
            | ExprKind::AddrOf(e)
            | ExprKind::Deref(e)
            | ExprKind::Discard(e)
            | ExprKind::Cast { value: e, .. }
            | ExprKind::Member { value: e, .. } => vec![e.as_mut()],
            ExprKind::Var { .. }
            | ExprKind::Const(_)
            | ExprKind::Continue { .. }
            | ExprKind::Redo { .. }
            | ExprKind::Noop => Vec::new(),
        }
    }

    /// Largest node id in this subtree
    pub fn max_id(&self) -> NodeId {
        self.children()
            .into_iter()
            .map(|c| c.max_id())
            .fold(self.id, |a, b| a.max(b))
    }
}
