//! Frontend module - Lexer and Parser

pub mod token;
pub mod lexer;
pub mod ast;
pub mod parser;

use crate::utils::Result;

/// Lex and parse a whole source file
pub fn parse_source(source: &str) -> Result<ast::File> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    parser::Parser::new(tokens).parse_file()
}
