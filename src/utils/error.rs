//! Error handling for finc

use crate::utils::Span;
use std::fmt;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// The stage an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lex,
    Parse,
    Analyze,
    Assemble,
    Internal,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Lex => "LexError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Analyze => "AnalyzeError",
            ErrorKind::Assemble => "AssembleError",
            ErrorKind::Internal => "InternalError",
            ErrorKind::Io => "IOError",
        };
        f.write_str(s)
    }
}

/// Compiler error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ==================== Lexer Errors ====================

    #[error("invalid character {ch:?}")]
    InvalidCharacter { ch: char, span: Span },

    #[error("bad indentation: tabs are not allowed in leading whitespace")]
    BadIndentation { span: Span },

    #[error("unterminated string literal")]
    UnterminatedString { span: Span },

    #[error("invalid number literal {text}")]
    InvalidNumber { text: String, span: Span },

    // ==================== Parser Errors ====================

    #[error("expected {expected}, got {got}")]
    UnexpectedToken {
        expected: String,
        got: String,
        span: Span,
    },

    #[error("expected expression, got {got}")]
    ExpectedExpr { got: String, span: Span },

    #[error("expected type, got {got}")]
    ExpectedType { got: String, span: Span },

    #[error("expected pattern, got {got}")]
    ExpectedPattern { got: String, span: Span },

    // ==================== Semantic Errors ====================

    #[error("undefined name: {name}")]
    UndefinedName { name: String, span: Span },

    #[error("duplicate definition: {name}")]
    DuplicateDefinition { name: String, span: Span },

    #[error("duplicate import: {name}")]
    DuplicateImport { name: String, span: Span },

    #[error("unknown module: {path}")]
    UnknownModule { path: String, span: Span },

    #[error("{name} is a {got}, expected {expected}")]
    KindMismatch {
        name: String,
        expected: String,
        got: String,
        span: Span,
    },

    #[error("cannot convert {got} to {expected}")]
    TypeMismatch {
        expected: String,
        got: String,
        span: Span,
    },

    #[error("initialization type mismatch: cannot initialize {expected} from {got}")]
    InitTypeMismatch {
        expected: String,
        got: String,
        span: Span,
    },

    #[error("cannot infer a type for {name} (initializer is {got})")]
    CannotInfer { name: String, got: String, span: Span },

    #[error("no viable overload for {name}({args})")]
    NoViableOverload {
        name: String,
        args: String,
        span: Span,
    },

    #[error("ambiguous call to {name}; candidates:\n{candidates}")]
    AmbiguousOverload {
        name: String,
        candidates: String,
        span: Span,
    },

    #[error("unresolved generic parameter {param} in call to {name}")]
    UnresolvedGeneric {
        name: String,
        param: String,
        span: Span,
    },

    #[error("{name} expects {expected} generic arguments, got {got}")]
    GenericArity {
        name: String,
        expected: usize,
        got: usize,
        span: Span,
    },

    #[error("unsized type {ty} can only appear behind a reference")]
    UnsizedValue { ty: String, span: Span },

    #[error("type {ty} has no field {field}")]
    UnknownField {
        ty: String,
        field: String,
        span: Span,
    },

    #[error("cannot assign to a non-reference of type {ty}")]
    NotAssignable { ty: String, span: Span },

    #[error("cannot take a reference to a value of type {ty}")]
    NotAReference { ty: String, span: Span },

    #[error("local {name} declared outside of a function")]
    LocalOutsideFunction { name: String, span: Span },

    #[error("{keyword} outside of a loop")]
    JumpOutsideLoop { keyword: String, span: Span },

    #[error("{message}")]
    PatternMismatch { message: String, span: Span },

    // ==================== Assembler Errors ====================

    #[error("unknown instruction: {name}")]
    UnknownInstruction { name: String, span: Span },

    #[error("bad argument: {message}")]
    BadArgument { message: String, span: Span },

    #[error("malformed label: {label}")]
    MalformedLabel { label: String, span: Span },

    // ==================== Internal Errors ====================

    #[error("code generation error: {0}")]
    CodeGen(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    /// Get the span associated with this error
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::InvalidCharacter { span, .. }
            | Self::BadIndentation { span }
            | Self::UnterminatedString { span }
            | Self::InvalidNumber { span, .. }
            | Self::UnexpectedToken { span, .. }
            | Self::ExpectedExpr { span, .. }
            | Self::ExpectedType { span, .. }
            | Self::ExpectedPattern { span, .. }
            | Self::UndefinedName { span, .. }
            | Self::DuplicateDefinition { span, .. }
            | Self::DuplicateImport { span, .. }
            | Self::UnknownModule { span, .. }
            | Self::KindMismatch { span, .. }
            | Self::TypeMismatch { span, .. }
            | Self::InitTypeMismatch { span, .. }
            | Self::CannotInfer { span, .. }
            | Self::NoViableOverload { span, .. }
            | Self::AmbiguousOverload { span, .. }
            | Self::UnresolvedGeneric { span, .. }
            | Self::GenericArity { span, .. }
            | Self::UnsizedValue { span, .. }
            | Self::UnknownField { span, .. }
            | Self::NotAssignable { span, .. }
            | Self::NotAReference { span, .. }
            | Self::LocalOutsideFunction { span, .. }
            | Self::JumpOutsideLoop { span, .. }
            | Self::PatternMismatch { span, .. }
            | Self::UnknownInstruction { span, .. }
            | Self::BadArgument { span, .. }
            | Self::MalformedLabel { span, .. } => Some(*span),
            Self::CodeGen(_) | Self::Io(_) => None,
        }
    }

    /// The compiler stage that raised this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCharacter { .. }
            | Self::BadIndentation { .. }
            | Self::UnterminatedString { .. }
            | Self::InvalidNumber { .. } => ErrorKind::Lex,
            Self::UnexpectedToken { .. }
            | Self::ExpectedExpr { .. }
            | Self::ExpectedType { .. }
            | Self::ExpectedPattern { .. } => ErrorKind::Parse,
            Self::UnknownInstruction { .. }
            | Self::BadArgument { .. }
            | Self::MalformedLabel { .. } => ErrorKind::Assemble,
            Self::CodeGen(_) => ErrorKind::Internal,
            Self::Io(_) => ErrorKind::Io,
            _ => ErrorKind::Analyze,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
