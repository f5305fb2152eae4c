//! Parser for Fin
//!
//! Recursive descent parser with Pratt parsing for expressions.

use crate::frontend::ast::*;
use crate::frontend::token::{Token, TokenKind};
use crate::utils::{Error, Result, Span};

/// Binding power used for the operand of `not`: looser than comparisons
const NOT_BP: u8 = 4;
/// Binding power used for the operands of unary `-` and `&`
const UNARY_BP: u8 = 9;

/// The parser
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    next_id: u32,
}

impl Parser {
    /// Create a parser from tokenized input; the last token must be `Eof`
    pub fn new(tokens: Vec<Token>) -> Self {
        let mut tokens = tokens;
        if tokens.last().map_or(true, |t| t.kind != TokenKind::Eof) {
            let end = tokens.last().map_or(0, |t| t.span.end);
            tokens.push(Token::eof(Span::new(end, end)));
        }
        Self { tokens, pos: 0, next_id: 0 }
    }

    // ==================== Helper Methods ====================

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn current_kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    /// Span of the most recently consumed token
    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.current_kind()) == std::mem::discriminant(kind)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current_kind(), TokenKind::Eof)
    }

    fn unexpected(&self, expected: impl Into<String>) -> Error {
        Error::UnexpectedToken {
            expected: expected.into(),
            got: self.current_kind().to_string(),
            span: self.current().span,
        }
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token> {
        if self.check(&expected) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected.to_string()))
        }
    }

    fn consume(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn node(&mut self, kind: ExprKind, span: Span) -> Expr {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        Expr::new(id, kind, span)
    }

    /// With the current token at `{`, the kind of the token after its matching `}`
    fn after_braces(&self) -> &TokenKind {
        self.after_braces_from(self.pos)
    }

    /// `after_braces` starting at an arbitrary token position
    fn after_braces_from(&self, pos: usize) -> &TokenKind {
        let mut depth = 0usize;
        let mut i = pos;
        while i < self.tokens.len() {
            match self.tokens[i].kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        break;
                    }
                }
                TokenKind::Eof => break,
                _ => {}
            }
            i += 1;
        }
        &self.tokens[(i + 1).min(self.tokens.len() - 1)].kind
    }

    /// Whether a token can begin an expression
    fn starts_expr(kind: &TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Ident(_)
                | TokenKind::IntLit(_)
                | TokenKind::FloatLit(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::LParen
                | TokenKind::LBrace
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Match
                | TokenKind::Let
                | TokenKind::Return
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Redo
                | TokenKind::Not
                | TokenKind::Minus
                | TokenKind::Amp
        )
    }

    // ==================== Items ====================

    /// Parse a complete file
    pub fn parse_file(&mut self) -> Result<File> {
        let start = self.current().span;
        let mut items = Vec::new();

        while !self.is_at_end() {
            if self.consume(&TokenKind::Semicolon) {
                continue;
            }
            items.push(self.parse_item()?);
        }

        Ok(File { items, span: start.merge(&self.current().span) })
    }

    /// Parse a top-level item
    fn parse_item(&mut self) -> Result<Item> {
        match self.current_kind() {
            TokenKind::Import => Ok(Item::Import(self.parse_import()?)),
            TokenKind::Def => Ok(Item::Def(self.parse_def()?)),
            TokenKind::Struct => Ok(Item::Struct(self.parse_struct()?)),
            TokenKind::Enum => Ok(Item::Enum(self.parse_enum()?)),
            _ => Err(self.unexpected("item (import, def, struct, enum)")),
        }
    }

    fn parse_ident(&mut self) -> Result<Ident> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Ident::new(name, token.span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn parse_import(&mut self) -> Result<Import> {
        let start = self.expect(TokenKind::Import)?.span;
        let mut path = vec![self.parse_ident()?];
        while self.consume(&TokenKind::Dot) {
            path.push(self.parse_ident()?);
        }
        let span = start.merge(&self.prev_span());
        self.consume(&TokenKind::Semicolon);
        Ok(Import { path, span })
    }

    /// `{T, U}` after a declaration name
    fn parse_generic_params(&mut self) -> Result<Vec<Ident>> {
        let mut generics = Vec::new();
        if self.consume(&TokenKind::LBrace) {
            loop {
                generics.push(self.parse_ident()?);
                if !self.consume(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RBrace)?;
        }
        Ok(generics)
    }

    /// Parse a function definition
    fn parse_def(&mut self) -> Result<Def> {
        let start = self.expect(TokenKind::Def)?.span;
        let name = self.parse_ident()?;
        let generics = self.parse_generic_params()?;

        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) && !self.is_at_end() {
            let pname = self.parse_ident()?;
            let ty = self.parse_type()?;
            params.push(Param { span: pname.span.merge(&ty.span), name: pname, ty });
            if !self.consume(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;

        // A return type's own `{..}` is generic arguments only if the body follows it
        let ret = if self.check(&TokenKind::LBrace) {
            None
        } else {
            let mut i = self.pos;
            while matches!(self.tokens[i].kind, TokenKind::Amp) {
                i += 1;
            }
            let allow_args = matches!(self.tokens[i].kind, TokenKind::Ident(_))
                && matches!(self.tokens[(i + 1).min(self.tokens.len() - 1)].kind, TokenKind::LBrace)
                && matches!(self.after_braces_from(i + 1), TokenKind::LBrace);
            Some(self.parse_type_with(allow_args)?)
        };

        let body = self.parse_block()?;
        let id = NodeId(self.next_id);
        self.next_id += 1;

        Ok(Def {
            id,
            name,
            generics,
            params,
            ret,
            span: start.merge(&body.span),
            body,
            symbol: None,
        })
    }

    /// Parse a struct definition
    fn parse_struct(&mut self) -> Result<StructDef> {
        let start = self.expect(TokenKind::Struct)?.span;
        let name = self.parse_ident()?;
        let generics = self.parse_generic_params()?;

        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            let fname = self.parse_ident()?;
            let ty = self.parse_type()?;
            fields.push(FieldDef { span: fname.span.merge(&ty.span), name: fname, ty });
            self.consume(&TokenKind::Comma);
        }
        self.expect(TokenKind::RBrace)?;

        Ok(StructDef {
            name,
            generics,
            fields,
            span: start.merge(&self.prev_span()),
            symbol: None,
        })
    }

    /// Parse an enum definition
    fn parse_enum(&mut self) -> Result<EnumDef> {
        let start = self.expect(TokenKind::Enum)?.span;
        let name = self.parse_ident()?;
        let generics = self.parse_generic_params()?;

        self.expect(TokenKind::LBrace)?;
        let mut variants = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            let vname = self.parse_ident()?;
            let mut fields = Vec::new();
            if self.consume(&TokenKind::LParen) {
                loop {
                    fields.push(self.parse_type()?);
                    if !self.consume(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RParen)?;
            }
            variants.push(VariantDef { span: vname.span.merge(&self.prev_span()), name: vname, fields });
            self.consume(&TokenKind::Comma);
        }
        self.expect(TokenKind::RBrace)?;

        Ok(EnumDef {
            name,
            generics,
            variants,
            span: start.merge(&self.prev_span()),
            symbol: None,
        })
    }

    // ==================== Types ====================

    fn parse_type(&mut self) -> Result<TypeExpr> {
        self.parse_type_with(true)
    }

    /// Parse a type; `allow_args` controls whether `Name{..}` takes generic arguments
    fn parse_type_with(&mut self, allow_args: bool) -> Result<TypeExpr> {
        let token = self.current().clone();
        match &token.kind {
            TokenKind::Amp => {
                self.advance();
                let inner = self.parse_type_with(allow_args)?;
                Ok(TypeExpr {
                    span: token.span.merge(&inner.span),
                    kind: TypeExprKind::Ref(Box::new(inner)),
                })
            }
            TokenKind::LBracket => {
                self.advance();
                let elem = self.parse_type()?;
                let len = if self.consume(&TokenKind::Semicolon) {
                    let t = self.current().clone();
                    match t.kind {
                        TokenKind::IntLit(n) if n >= 0 => {
                            self.advance();
                            Some(n as u64)
                        }
                        _ => return Err(self.unexpected("array length")),
                    }
                } else {
                    None
                };
                self.expect(TokenKind::RBracket)?;
                Ok(TypeExpr {
                    kind: TypeExprKind::Array { elem: Box::new(elem), len },
                    span: token.span.merge(&self.prev_span()),
                })
            }
            TokenKind::Ident(name) => {
                self.advance();
                let mut args = Vec::new();
                if allow_args && self.consume(&TokenKind::LBrace) {
                    loop {
                        args.push(self.parse_type()?);
                        if !self.consume(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::RBrace)?;
                }
                Ok(TypeExpr {
                    kind: TypeExprKind::Named { name: name.clone(), args },
                    span: token.span.merge(&self.prev_span()),
                })
            }
            other => Err(Error::ExpectedType { got: other.to_string(), span: token.span }),
        }
    }

    /// Generic arguments of a call, only when `{..}` is followed by `(`
    fn parse_call_generics(&mut self) -> Result<Vec<TypeExpr>> {
        let mut generics = Vec::new();
        if self.check(&TokenKind::LBrace) && matches!(self.after_braces(), TokenKind::LParen) {
            self.advance();
            loop {
                generics.push(self.parse_type()?);
                if !self.consume(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RBrace)?;
        }
        Ok(generics)
    }

    // ==================== Blocks ====================

    /// Parse a `{ ... }` block expression
    fn parse_block(&mut self) -> Result<Expr> {
        let start = self.expect(TokenKind::LBrace)?.span;
        let mut items = Vec::new();

        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            let item = self.parse_expr()?;
            items.push(item);

            if self.consume(&TokenKind::Semicolon) {
                if self.check(&TokenKind::RBrace) {
                    let span = self.prev_span();
                    let noop = self.node(ExprKind::Noop, span);
                    items.push(noop);
                }
                continue;
            }
            if self.check(&TokenKind::RBrace) {
                break;
            }
            // An item ending in `}` needs no separator
            if !matches!(self.tokens[self.pos.saturating_sub(1)].kind, TokenKind::RBrace) {
                return Err(self.unexpected("';' or '}'"));
            }
        }

        self.expect(TokenKind::RBrace)?;
        let span = start.merge(&self.prev_span());
        Ok(self.node(ExprKind::Block { items, scope: None }, span))
    }

    // ==================== Expression Parsing (Pratt) ====================

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_expr_bp(0)
    }

    /// Parse expression with binding power (Pratt parsing)
    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr> {
        let mut left = self.parse_prefix()?;

        loop {
            let op_token = self.current().clone();
            let Some(bp) = op_token.kind.binary_precedence() else {
                break;
            };
            if bp < min_bp {
                break;
            }
            self.advance();

            if op_token.kind == TokenKind::As {
                let target = self.parse_type_with(false)?;
                let span = left.span.merge(&target.span);
                left = self.node(
                    ExprKind::Cast { value: Box::new(left), target, resolved: None },
                    span,
                );
                continue;
            }

            // Right-associative for assignment
            let is_assign = bp == 1;
            let next_bp = if is_assign { bp } else { bp + 1 };
            let right = self.parse_expr_bp(next_bp)?;
            let span = left.span.merge(&right.span);

            let kind = match &op_token.kind {
                TokenKind::Eq => ExprKind::Assn { target: Box::new(left), value: Box::new(right) },
                TokenKind::And | TokenKind::Or => ExprKind::BinTest {
                    op: if op_token.kind == TokenKind::And { TestOp::And } else { TestOp::Or },
                    lhs: Box::new(left),
                    rhs: Box::new(right),
                },
                kind => {
                    let op = kind
                        .operator_name()
                        .ok_or_else(|| self.unexpected("binary operator"))?
                        .to_string();
                    if is_assign {
                        ExprKind::IncAssn {
                            op,
                            target: Box::new(left),
                            value: Box::new(right),
                            resolved: None,
                        }
                    } else {
                        ExprKind::Op { op, args: vec![left, right], resolved: None }
                    }
                }
            };
            left = self.node(kind, span);
        }

        Ok(left)
    }

    /// Optional trailing value of `return` / `break`
    fn parse_jump_value(&mut self) -> Result<Option<Box<Expr>>> {
        if Self::starts_expr(self.current_kind()) {
            Ok(Some(Box::new(self.parse_expr()?)))
        } else {
            Ok(None)
        }
    }

    /// Prefix forms: keywords that begin an expression and unary operators
    fn parse_prefix(&mut self) -> Result<Expr> {
        let token = self.current().clone();
        match &token.kind {
            TokenKind::Let => {
                self.advance();
                let name = self.parse_ident()?;
                let ty = if matches!(
                    self.current_kind(),
                    TokenKind::Amp | TokenKind::LBracket | TokenKind::Ident(_)
                ) {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                let value = if self.consume(&TokenKind::Eq) {
                    Some(Box::new(self.parse_expr()?))
                } else {
                    None
                };
                let span = token.span.merge(&self.prev_span());
                Ok(self.node(ExprKind::Let { name, ty, value, var: None }, span))
            }
            TokenKind::Return => {
                self.advance();
                let value = self.parse_jump_value()?;
                let span = token.span.merge(&self.prev_span());
                Ok(self.node(ExprKind::Return { value, function: None }, span))
            }
            TokenKind::Break => {
                self.advance();
                let value = self.parse_jump_value()?;
                let span = token.span.merge(&self.prev_span());
                Ok(self.node(ExprKind::Break { value, target: None }, span))
            }
            TokenKind::Continue => {
                self.advance();
                Ok(self.node(ExprKind::Continue { target: None }, token.span))
            }
            TokenKind::Redo => {
                self.advance();
                Ok(self.node(ExprKind::Redo { target: None }, token.span))
            }
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_expr_bp(NOT_BP)?;
                let span = token.span.merge(&operand.span);
                Ok(self.node(ExprKind::NotTest(Box::new(operand)), span))
            }
            TokenKind::Minus => {
                self.advance();
                // Negative literals fold into the constant
                match self.current_kind().clone() {
                    TokenKind::IntLit(n) if !matches!(self.peek_kind(), TokenKind::Dot | TokenKind::LBracket) => {
                        self.advance();
                        let span = token.span.merge(&self.prev_span());
                        return Ok(self.node(ExprKind::Const(Literal::Int(-n)), span));
                    }
                    TokenKind::FloatLit(n) if !matches!(self.peek_kind(), TokenKind::Dot | TokenKind::LBracket) => {
                        self.advance();
                        let span = token.span.merge(&self.prev_span());
                        return Ok(self.node(ExprKind::Const(Literal::Float(-n)), span));
                    }
                    _ => {}
                }
                let operand = self.parse_expr_bp(UNARY_BP)?;
                let span = token.span.merge(&operand.span);
                Ok(self.node(
                    ExprKind::Op { op: "-".to_string(), args: vec![operand], resolved: None },
                    span,
                ))
            }
            TokenKind::Amp => {
                self.advance();
                let operand = self.parse_expr_bp(UNARY_BP)?;
                let span = token.span.merge(&operand.span);
                Ok(self.node(ExprKind::AddrOf(Box::new(operand)), span))
            }
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.check(&TokenKind::RParen) && !self.is_at_end() {
            args.push(self.parse_expr()?);
            if !self.consume(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.current().clone();

        match &token.kind {
            // Literals
            TokenKind::IntLit(n) => {
                self.advance();
                Ok(self.node(ExprKind::Const(Literal::Int(*n)), token.span))
            }
            TokenKind::FloatLit(n) => {
                self.advance();
                Ok(self.node(ExprKind::Const(Literal::Float(*n)), token.span))
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                let value = token.kind == TokenKind::True;
                Ok(self.node(ExprKind::Const(Literal::Bool(value)), token.span))
            }

            TokenKind::Ident(name) => {
                self.advance();
                let name = Ident::new(name.clone(), token.span);
                let generics = self.parse_call_generics()?;
                if self.check(&TokenKind::LParen) {
                    let args = self.parse_args()?;
                    let span = token.span.merge(&self.prev_span());
                    Ok(self.node(ExprKind::Call { name, generics, args, resolved: None }, span))
                } else {
                    Ok(self.node(ExprKind::Var { name: name.name, symbol: None }, token.span))
                }
            }

            TokenKind::LParen => {
                self.advance();
                let mut inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                inner.span = token.span.merge(&self.prev_span());
                Ok(inner)
            }

            TokenKind::LBrace => self.parse_block(),

            TokenKind::If => {
                self.advance();
                let cond = self.parse_expr()?;
                self.expect(TokenKind::Then)?;
                let then_branch = self.parse_expr()?;
                let else_branch = if self.consume(&TokenKind::Else) {
                    Some(Box::new(self.parse_expr()?))
                } else {
                    None
                };
                let span = token.span.merge(&self.prev_span());
                Ok(self.node(
                    ExprKind::If {
                        cond: Box::new(cond),
                        then_branch: Box::new(then_branch),
                        else_branch,
                    },
                    span,
                ))
            }

            TokenKind::While => {
                self.advance();
                let cond = self.parse_expr()?;
                self.expect(TokenKind::Do)?;
                let body = self.parse_expr()?;
                let else_branch = if self.consume(&TokenKind::Else) {
                    Some(Box::new(self.parse_expr()?))
                } else {
                    None
                };
                let span = token.span.merge(&self.prev_span());
                Ok(self.node(
                    ExprKind::While { cond: Box::new(cond), body: Box::new(body), else_branch },
                    span,
                ))
            }

            TokenKind::Match => self.parse_match(),

            other => Err(Error::ExpectedExpr { got: other.to_string(), span: token.span }),
        }
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr> {
        loop {
            if self.consume(&TokenKind::Dot) {
                let name = self.parse_ident()?;
                let generics = self.parse_call_generics()?;
                if self.check(&TokenKind::LParen) {
                    let args = self.parse_args()?;
                    let span = expr.span.merge(&self.prev_span());
                    expr = self.node(
                        ExprKind::Method {
                            receiver: Box::new(expr),
                            name,
                            generics,
                            args,
                            resolved: None,
                        },
                        span,
                    );
                } else {
                    let span = expr.span.merge(&name.span);
                    expr = self.node(
                        ExprKind::Member { value: Box::new(expr), field: name, index: None },
                        span,
                    );
                }
            } else if self.consume(&TokenKind::LBracket) {
                let index = self.parse_expr()?;
                self.expect(TokenKind::RBracket)?;
                let span = expr.span.merge(&self.prev_span());
                expr = self.node(
                    ExprKind::Op { op: "[]".to_string(), args: vec![expr, index], resolved: None },
                    span,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    // ==================== Match ====================

    fn parse_match(&mut self) -> Result<Expr> {
        let start = self.expect(TokenKind::Match)?.span;
        let value = self.parse_expr()?;

        self.expect(TokenKind::LBrace)?;
        let mut arms = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            let pattern = self.parse_pattern()?;
            self.expect(TokenKind::FatArrow)?;
            let body = self.parse_expr()?;
            arms.push(Arm {
                span: pattern.span.merge(&body.span),
                pattern,
                body,
                target: None,
                scope: None,
            });
            if !self.consume(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;

        let span = start.merge(&self.prev_span());
        Ok(self.node(ExprKind::Match { value: Box::new(value), arms }, span))
    }

    fn pattern(kind: PatternKind, span: Span) -> Pattern {
        Pattern { kind, span, ty: crate::types::Type::unknown() }
    }

    fn parse_pattern(&mut self) -> Result<Pattern> {
        let token = self.current().clone();
        match &token.kind {
            TokenKind::Ident(name) if name == "_" => {
                self.advance();
                Ok(Self::pattern(PatternKind::Any, token.span))
            }
            TokenKind::Ident(name) => {
                self.advance();
                let name = Ident::new(name.clone(), token.span);
                if self.consume(&TokenKind::LParen) {
                    let mut args = Vec::new();
                    while !self.check(&TokenKind::RParen) && !self.is_at_end() {
                        args.push(self.parse_pattern()?);
                        if !self.consume(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                    let span = token.span.merge(&self.prev_span());
                    Ok(Self::pattern(PatternKind::Call { name, args, callee: None }, span))
                } else {
                    Ok(Self::pattern(PatternKind::Var { name, var: None }, token.span))
                }
            }
            TokenKind::IntLit(n) => {
                self.advance();
                Ok(Self::pattern(PatternKind::Const(Literal::Int(*n)), token.span))
            }
            TokenKind::FloatLit(n) => {
                self.advance();
                Ok(Self::pattern(PatternKind::Const(Literal::Float(*n)), token.span))
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                let value = token.kind == TokenKind::True;
                Ok(Self::pattern(PatternKind::Const(Literal::Bool(value)), token.span))
            }
            TokenKind::Minus => {
                self.advance();
                let lit = match self.current_kind() {
                    TokenKind::IntLit(n) => Literal::Int(-*n),
                    TokenKind::FloatLit(n) => Literal::Float(-*n),
                    other => {
                        return Err(Error::ExpectedPattern {
                            got: other.to_string(),
                            span: self.current().span,
                        })
                    }
                };
                self.advance();
                let span = token.span.merge(&self.prev_span());
                Ok(Self::pattern(PatternKind::Const(lit), span))
            }
            other => Err(Error::ExpectedPattern { got: other.to_string(), span: token.span }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Result<File> {
        let tokens = Lexer::new(source).tokenize()?;
        Parser::new(tokens).parse_file()
    }

    fn first_def(file: &File) -> &Def {
        file.items
            .iter()
            .find_map(|item| match item {
                Item::Def(d) => Some(d),
                _ => None,
            })
            .unwrap()
    }

    fn body_items(def: &Def) -> &Vec<Expr> {
        match &def.body.kind {
            ExprKind::Block { items, .. } => items,
            _ => panic!("body is not a block"),
        }
    }

    #[test]
    fn test_empty_function() {
        let file = parse("def main() {}").unwrap();
        let def = first_def(&file);
        assert_eq!(def.name.name, "main");
        assert!(def.ret.is_none());
        assert!(body_items(def).is_empty());
    }

    #[test]
    fn test_return_type_is_not_generic_args() {
        let file = parse("def main() Int { 1 + 2 }").unwrap();
        let def = first_def(&file);
        assert_eq!(def.ret.as_ref().unwrap().to_string(), "Int");
        let items = body_items(def);
        assert_eq!(items.len(), 1);
        match &items[0].kind {
            ExprKind::Op { op, args, .. } => {
                assert_eq!(op, "+");
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_generic_return_type() {
        let file = parse("def f{T}() Box{T} { make() }").unwrap();
        let def = first_def(&file);
        assert_eq!(def.generics[0].name, "T");
        assert_eq!(def.ret.as_ref().unwrap().to_string(), "Box{T}");
    }

    #[test]
    fn test_generic_call() {
        let file = parse("def id{T}(x T) T { x }\ndef main() Int { id{Int}(7) }").unwrap();
        let main = match &file.items[1] {
            Item::Def(d) => d,
            _ => unreachable!(),
        };
        match &body_items(main)[0].kind {
            ExprKind::Call { name, generics, args, .. } => {
                assert_eq!(name.name, "id");
                assert_eq!(generics[0].to_string(), "Int");
                assert_eq!(args.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_let_forms() {
        let file = parse("def main() { let x = 3; let p &Int = &x; let q [Int; 4] }").unwrap();
        let items = body_items(first_def(&file));
        assert_eq!(items.len(), 3);
        match &items[1].kind {
            ExprKind::Let { name, ty, value, .. } => {
                assert_eq!(name.name, "p");
                assert_eq!(ty.as_ref().unwrap().to_string(), "&Int");
                assert!(matches!(value.as_ref().unwrap().kind, ExprKind::AddrOf(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
        match &items[2].kind {
            ExprKind::Let { ty, value, .. } => {
                assert_eq!(ty.as_ref().unwrap().to_string(), "[Int; 4]");
                assert!(value.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_trailing_semicolon_adds_noop() {
        let file = parse("def main() { 1; }").unwrap();
        let items = body_items(first_def(&file));
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1].kind, ExprKind::Noop));
    }

    #[test]
    fn test_precedence() {
        let file = parse("def main() Bool { not 1 + 2 * 3 < 4 and true }").unwrap();
        let items = body_items(first_def(&file));
        // (not ((1 + (2 * 3)) < 4)) and true
        match &items[0].kind {
            ExprKind::BinTest { op: TestOp::And, lhs, .. } => match &lhs.kind {
                ExprKind::NotTest(inner) => match &inner.kind {
                    ExprKind::Op { op, args, .. } => {
                        assert_eq!(op, "<");
                        assert!(matches!(&args[0].kind, ExprKind::Op { op, .. } if op == "+"));
                    }
                    other => panic!("unexpected {:?}", other),
                },
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_if_while_match() {
        let src = "def main() Int {\n  while true do { break 5 };\n  match x { Some(a) => a, None => 0, _ => 1 }\n}";
        let file = parse(src).unwrap();
        let items = body_items(first_def(&file));
        assert!(matches!(items[0].kind, ExprKind::While { .. }));
        match &items[1].kind {
            ExprKind::Match { value, arms } => {
                assert!(matches!(value.kind, ExprKind::Var { .. }));
                assert_eq!(arms.len(), 3);
                assert!(matches!(arms[0].pattern.kind, PatternKind::Call { .. }));
                assert!(matches!(arms[1].pattern.kind, PatternKind::Var { .. }));
                assert!(matches!(arms[2].pattern.kind, PatternKind::Any));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_postfix_and_assignments() {
        let file = parse("def main() { a.b[1] += 2; p.x = q.len(); y = z as Float }").unwrap();
        let items = body_items(first_def(&file));
        match &items[0].kind {
            ExprKind::IncAssn { op, target, .. } => {
                assert_eq!(op, "+");
                assert!(matches!(&target.kind, ExprKind::Op { op, .. } if op == "[]"));
            }
            other => panic!("unexpected {:?}", other),
        }
        match &items[1].kind {
            ExprKind::Assn { target, value } => {
                assert!(matches!(target.kind, ExprKind::Member { .. }));
                assert!(matches!(value.kind, ExprKind::Method { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        match &items[2].kind {
            ExprKind::Assn { value, .. } => assert!(matches!(value.kind, ExprKind::Cast { .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_struct_and_enum() {
        let file = parse(
            "import lib.math\nstruct Pair{A, B} { first A, second B }\nenum Option{T} { Some(T), None }",
        )
        .unwrap();
        assert!(matches!(&file.items[0], Item::Import(i) if i.path_string() == "lib.math"));
        match &file.items[1] {
            Item::Struct(s) => {
                assert_eq!(s.generics.len(), 2);
                assert_eq!(s.fields[1].name.name, "second");
            }
            _ => panic!("expected struct"),
        }
        match &file.items[2] {
            Item::Enum(e) => {
                assert_eq!(e.variants.len(), 2);
                assert_eq!(e.variants[0].fields[0].to_string(), "T");
                assert!(e.variants[1].fields.is_empty());
            }
            _ => panic!("expected enum"),
        }
    }

    #[test]
    fn test_node_ids_are_unique() {
        let file = parse("def main() Int { let a = 1; a + a * 2 }").unwrap();
        let mut ids = Vec::new();
        fn walk(e: &Expr, ids: &mut Vec<NodeId>) {
            ids.push(e.id);
            for c in e.children() {
                walk(c, ids);
            }
        }
        walk(&first_def(&file).body, &mut ids);
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }

    #[test]
    fn test_missing_separator() {
        let err = parse("def main() { 1 2 }").unwrap_err();
        assert!(matches!(err, Error::UnexpectedToken { ref expected, .. } if expected == "';' or '}'"));
    }

    #[test]
    fn test_expected_expression() {
        let err = parse("def main() { ) }").unwrap_err();
        assert!(matches!(err, Error::ExpectedExpr { .. }));
    }
}
