//! Lexer for Fin
//!
//! Converts source code into a stream of tokens.

use crate::frontend::token::{Token, TokenKind};
use crate::utils::{Error, Result, Span};

/// The lexer state
pub struct Lexer {
    /// Source code as characters
    source: Vec<char>,
    /// Byte offset of every character, plus one trailing entry for the end
    offsets: Vec<usize>,
    /// Current position in source (character index)
    pos: usize,
    /// Start position of current token
    start: usize,
    /// True while only whitespace has been seen on the current line
    line_start: bool,
}

impl Lexer {
    /// Create a new lexer for the given source code
    pub fn new(source: &str) -> Self {
        let mut offsets: Vec<usize> = source.char_indices().map(|(i, _)| i).collect();
        offsets.push(source.len());
        Self {
            source: source.chars().collect(),
            offsets,
            pos: 0,
            start: 0,
            line_start: true,
        }
    }

    /// Get the current character without advancing
    fn peek(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    /// Get the next character without advancing
    fn peek_next(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    /// Advance to the next character
    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    /// Advance if the next character is `expected`
    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Check if we've reached the end of input
    fn is_at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    /// Create a span from start to current position (in bytes)
    fn make_span(&self) -> Span {
        Span::new(self.offsets[self.start], self.offsets[self.pos])
    }

    /// Create a token with the current span
    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.make_span())
    }

    /// Skip whitespace and comments
    fn skip_whitespace(&mut self) -> Result<()> {
        while let Some(c) = self.peek() {
            match c {
                '\n' => {
                    self.advance();
                    self.line_start = true;
                }
                '\t' if self.line_start => {
                    let at = self.offsets[self.pos];
                    return Err(Error::BadIndentation { span: Span::new(at, at + 1) });
                }
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                // Line comment
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Read an identifier or keyword
    fn read_identifier(&mut self) -> Token {
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.source[self.start..self.pos].iter().collect();
        let kind = TokenKind::keyword_from_str(&text).unwrap_or(TokenKind::Ident(text));
        self.make_token(kind)
    }

    fn skip_digits(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Read a number literal (integer or float)
    fn read_number(&mut self) -> Result<Token> {
        let mut is_float = false;
        self.skip_digits();

        // Decimal point only when a digit follows, so `a.0` style access stays possible
        if self.peek() == Some('.') && self.peek_next().map_or(false, |c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            self.skip_digits();
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            let save = self.pos;
            self.advance();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.advance();
            }
            if self.peek().map_or(false, |c| c.is_ascii_digit()) {
                is_float = true;
                self.skip_digits();
            } else {
                self.pos = save;
            }
        }

        let text: String = self.source[self.start..self.pos]
            .iter()
            .filter(|&&c| c != '_')
            .collect();

        let kind = if is_float {
            text.parse().map(TokenKind::FloatLit).ok()
        } else {
            text.parse().map(TokenKind::IntLit).ok()
        };
        match kind {
            Some(kind) => Ok(self.make_token(kind)),
            None => Err(Error::InvalidNumber { text, span: self.make_span() }),
        }
    }

    /// Read a string literal delimited by `quote`
    fn read_string(&mut self, quote: char) -> Result<Token> {
        let mut value = String::new();

        loop {
            match self.advance() {
                Some(c) if c == quote => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('r') => value.push('\r'),
                    Some('t') => value.push('\t'),
                    Some('0') => value.push('\0'),
                    Some(c) => value.push(c),
                    None => return Err(Error::UnterminatedString { span: self.make_span() }),
                },
                Some('\n') | None => {
                    return Err(Error::UnterminatedString { span: self.make_span() })
                }
                Some(c) => value.push(c),
            }
        }

        Ok(self.make_token(TokenKind::StringLit(value)))
    }

    /// Get the next token
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace()?;
        self.start = self.pos;
        self.line_start = false;

        let Some(c) = self.advance() else {
            return Ok(Token::eof(self.make_span()));
        };

        // Identifiers and keywords
        if c.is_alphabetic() || c == '_' {
            return Ok(self.read_identifier());
        }

        // Numbers
        if c.is_ascii_digit() {
            return self.read_number();
        }

        if c == '"' || c == '\'' {
            return self.read_string(c);
        }

        // Operators and punctuation
        let kind = match c {
            '+' if self.eat('=') => TokenKind::PlusEq,
            '+' => TokenKind::Plus,
            '-' if self.eat('=') => TokenKind::MinusEq,
            '-' => TokenKind::Minus,
            '*' if self.eat('=') => TokenKind::StarEq,
            '*' => TokenKind::Star,
            '/' if self.eat('=') => TokenKind::SlashEq,
            '/' => TokenKind::Slash,
            '%' if self.eat('=') => TokenKind::PercentEq,
            '%' => TokenKind::Percent,
            '=' if self.eat('=') => TokenKind::EqEq,
            '=' if self.eat('>') => TokenKind::FatArrow,
            '=' => TokenKind::Eq,
            '!' if self.eat('=') => TokenKind::Ne,
            '<' if self.eat('=') => TokenKind::Le,
            '<' => TokenKind::Lt,
            '>' if self.eat('=') => TokenKind::Ge,
            '>' => TokenKind::Gt,
            '&' => TokenKind::Amp,
            '.' => TokenKind::Dot,
            ':' => TokenKind::Colon,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            _ => {
                return Err(Error::InvalidCharacter { ch: c, span: self.make_span() });
            }
        };

        Ok(self.make_token(kind))
    }

    /// Tokenize the entire source; the last token is always `Eof`
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        log::trace!("lexed {} tokens", tokens.len());
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_tokens() {
        let tokens = kinds("def main() Int { 1 + 2 }");

        assert!(matches!(tokens[0], TokenKind::Def));
        assert!(matches!(tokens[1], TokenKind::Ident(ref s) if s == "main"));
        assert!(matches!(tokens[2], TokenKind::LParen));
        assert!(matches!(tokens[3], TokenKind::RParen));
        assert!(matches!(tokens[4], TokenKind::Ident(ref s) if s == "Int"));
        assert!(matches!(tokens[5], TokenKind::LBrace));
        assert!(matches!(tokens[6], TokenKind::IntLit(1)));
        assert!(matches!(tokens[7], TokenKind::Plus));
        assert!(matches!(tokens[8], TokenKind::IntLit(2)));
        assert!(matches!(tokens[9], TokenKind::RBrace));
        assert!(matches!(tokens[10], TokenKind::Eof));
    }

    #[test]
    fn test_numbers() {
        let tokens = kinds("42 3.14 1_000 2e3");

        assert!(matches!(tokens[0], TokenKind::IntLit(42)));
        assert!(matches!(tokens[1], TokenKind::FloatLit(f) if (f - 3.14).abs() < 0.001));
        assert!(matches!(tokens[2], TokenKind::IntLit(1000)));
        assert!(matches!(tokens[3], TokenKind::FloatLit(f) if (f - 2000.0).abs() < 0.001));
    }

    #[test]
    fn test_operators() {
        let tokens = kinds("+= == => != <= & %");
        assert_eq!(
            tokens,
            vec![
                TokenKind::PlusEq,
                TokenKind::EqEq,
                TokenKind::FatArrow,
                TokenKind::Ne,
                TokenKind::Le,
                TokenKind::Amp,
                TokenKind::Percent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_and_strings() {
        let tokens = kinds("# a comment\n'it\\'s' \"x\"");
        assert_eq!(
            tokens,
            vec![
                TokenKind::StringLit("it's".to_string()),
                TokenKind::StringLit("x".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_spans_are_byte_offsets() {
        let tokens = Lexer::new("é x").tokenize().unwrap();
        assert_eq!(tokens[0].span, Span::new(0, 2));
        assert_eq!(tokens[1].span, Span::new(3, 4));
    }

    #[test]
    fn test_tab_in_indentation() {
        let err = Lexer::new("def f() {\n\t1\n}").tokenize().unwrap_err();
        assert_eq!(err, Error::BadIndentation { span: Span::new(10, 11) });

        // A tab after code on the same line is ordinary whitespace
        assert!(Lexer::new("let x =\t1").tokenize().is_ok());
    }

    #[test]
    fn test_invalid_character() {
        let err = Lexer::new("1 $ 2").tokenize().unwrap_err();
        assert_eq!(err, Error::InvalidCharacter { ch: '$', span: Span::new(2, 3) });
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("'abc").tokenize().unwrap_err();
        assert!(matches!(err, Error::UnterminatedString { .. }));
    }
}
