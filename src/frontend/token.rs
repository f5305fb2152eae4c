//! Token definitions for Fin

use crate::utils::Span;
use serde::Serialize;
use std::fmt;

/// A token produced by the lexer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn eof(span: Span) -> Self {
        Self { kind: TokenKind::Eof, span }
    }
}

/// Token kinds
///
/// Keywords and punctuation carry no payload; their spelling is given by
/// the `Display` impl.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TokenKind {
    // declarations
    Def, Struct, Enum, Import, Let,
    // control flow
    If, Then, Else, While, Do, Match, Return, Break, Continue, Redo,
    // word operators and constants
    And, Or, Not, True, False, As,

    Ident(String),
    IntLit(i64),
    FloatLit(f64),
    StringLit(String),

    Plus, Minus, Star, Slash, Percent,
    Eq, EqEq, Ne, Lt, Le, Gt, Ge,
    PlusEq, MinusEq, StarEq, SlashEq, PercentEq,
    /// `&`, the reference type constructor
    Amp,
    /// `=>` between a match pattern and its arm
    FatArrow,
    Dot,

    LParen, RParen, LBrace, RBrace, LBracket, RBracket,
    Comma, Colon, Semicolon,

    Eof,
}

impl TokenKind {
    /// Try to convert an identifier to a keyword
    pub fn keyword_from_str(s: &str) -> Option<TokenKind> {
        match s {
            "def" => Some(TokenKind::Def),
            "struct" => Some(TokenKind::Struct),
            "enum" => Some(TokenKind::Enum),
            "import" => Some(TokenKind::Import),
            "let" => Some(TokenKind::Let),
            "if" => Some(TokenKind::If),
            "then" => Some(TokenKind::Then),
            "else" => Some(TokenKind::Else),
            "while" => Some(TokenKind::While),
            "do" => Some(TokenKind::Do),
            "match" => Some(TokenKind::Match),
            "return" => Some(TokenKind::Return),
            "break" => Some(TokenKind::Break),
            "continue" => Some(TokenKind::Continue),
            "redo" => Some(TokenKind::Redo),
            "and" => Some(TokenKind::And),
            "or" => Some(TokenKind::Or),
            "not" => Some(TokenKind::Not),
            "true" => Some(TokenKind::True),
            "false" => Some(TokenKind::False),
            "as" => Some(TokenKind::As),
            _ => None,
        }
    }

    /// Binding power of a binary operator (for Pratt parsing).
    /// Returns None if not a binary operator
    pub fn binary_precedence(&self) -> Option<u8> {
        match self {
            // Assignment (lowest, right associative)
            TokenKind::Eq
            | TokenKind::PlusEq
            | TokenKind::MinusEq
            | TokenKind::StarEq
            | TokenKind::SlashEq
            | TokenKind::PercentEq => Some(1),

            TokenKind::Or => Some(2),
            TokenKind::And => Some(3),

            // Comparison
            TokenKind::EqEq
            | TokenKind::Ne
            | TokenKind::Lt
            | TokenKind::Le
            | TokenKind::Gt
            | TokenKind::Ge => Some(5),

            // Additive
            TokenKind::Plus | TokenKind::Minus => Some(6),

            // Multiplicative
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Some(7),

            // Cast binds tighter than any arithmetic
            TokenKind::As => Some(8),

            _ => None,
        }
    }

    /// The operator name a binary token resolves to in the builtins module
    pub fn operator_name(&self) -> Option<&'static str> {
        match self {
            TokenKind::Plus | TokenKind::PlusEq => Some("+"),
            TokenKind::Minus | TokenKind::MinusEq => Some("-"),
            TokenKind::Star | TokenKind::StarEq => Some("*"),
            TokenKind::Slash | TokenKind::SlashEq => Some("/"),
            TokenKind::Percent | TokenKind::PercentEq => Some("%"),
            TokenKind::EqEq => Some("=="),
            TokenKind::Ne => Some("!="),
            TokenKind::Lt => Some("<"),
            TokenKind::Le => Some("<="),
            TokenKind::Gt => Some(">"),
            TokenKind::Ge => Some(">="),
            _ => None,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Def => "'def'",
            TokenKind::Struct => "'struct'",
            TokenKind::Enum => "'enum'",
            TokenKind::Import => "'import'",
            TokenKind::Let => "'let'",
            TokenKind::If => "'if'",
            TokenKind::Then => "'then'",
            TokenKind::Else => "'else'",
            TokenKind::While => "'while'",
            TokenKind::Do => "'do'",
            TokenKind::Match => "'match'",
            TokenKind::Return => "'return'",
            TokenKind::Break => "'break'",
            TokenKind::Continue => "'continue'",
            TokenKind::Redo => "'redo'",
            TokenKind::And => "'and'",
            TokenKind::Or => "'or'",
            TokenKind::Not => "'not'",
            TokenKind::True => "'true'",
            TokenKind::False => "'false'",
            TokenKind::As => "'as'",
            TokenKind::Ident(name) => return write!(f, "identifier '{}'", name),
            TokenKind::IntLit(n) => return write!(f, "integer {}", n),
            TokenKind::FloatLit(n) => return write!(f, "float {}", n),
            TokenKind::StringLit(s) => return write!(f, "string {:?}", s),
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::Percent => "'%'",
            TokenKind::Eq => "'='",
            TokenKind::EqEq => "'=='",
            TokenKind::Ne => "'!='",
            TokenKind::Lt => "'<'",
            TokenKind::Le => "'<='",
            TokenKind::Gt => "'>'",
            TokenKind::Ge => "'>='",
            TokenKind::Amp => "'&'",
            TokenKind::PlusEq => "'+='",
            TokenKind::MinusEq => "'-='",
            TokenKind::StarEq => "'*='",
            TokenKind::SlashEq => "'/='",
            TokenKind::PercentEq => "'%='",
            TokenKind::FatArrow => "'=>'",
            TokenKind::Dot => "'.'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Comma => "','",
            TokenKind::Colon => "':'",
            TokenKind::Semicolon => "';'",
            TokenKind::Eof => "end of file",
        };
        f.write_str(s)
    }
}
