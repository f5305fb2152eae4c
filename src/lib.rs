//! Fin Compiler
//!
//! Compiler core for the Fin expression language: source text is lexed,
//! parsed, analyzed in place, lowered to stack-machine IR and assembled
//! into a binary object for the Fin runtime.
//!
//! ```text
//! source -> tokens -> AST -> typed AST -> IR text -> object
//! ```

pub mod backend;
pub mod frontend;
pub mod middle;
pub mod sema;
pub mod stdlib;
pub mod types;
pub mod utils;

pub use utils::{Error, ErrorKind, Result};

use backend::{Assembler, CodeGen};
use frontend::ast::File;
use frontend::lexer::Lexer;
use frontend::parser::Parser;
use frontend::token::{Token, TokenKind};
use middle::ir_gen::IrGenerator;
use middle::IrModule;
use sema::{SymbolId, SymbolTable};

/// Settings the driver passes to the library
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Dotted path the compiled file is registered under
    pub module_name: String,
    /// Interpreter named in the object's `#!` line
    pub runtime: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { module_name: "main".to_string(), runtime: "finvm".to_string() }
    }
}

/// Where compilation stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Token listing
    Lex,
    /// Untyped AST as JSON
    Parse,
    /// Typed AST as JSON
    Ast,
    /// IR text
    Asm,
    /// Binary object
    Exec,
}

/// The product of a stage
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Text(String),
    Binary(Vec<u8>),
}

/// Compilation pipeline
///
/// Modules compiled through the same `Compiler` share one symbol table, so
/// a module may import any module compiled before it. Analyzed files are
/// kept so generic functions of one module can be instantiated in another.
pub struct Compiler {
    options: CompileOptions,
    table: SymbolTable,
    library: Vec<File>,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options, table: SymbolTable::new(), library: Vec::new() }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn table(&self) -> &SymbolTable {
        &self.table
    }

    /// Lex `source`, without the end-of-file token
    pub fn tokens(&self, source: &str) -> Result<Vec<Token>> {
        let mut tokens = Lexer::new(source).tokenize()?;
        tokens.retain(|t| t.kind != TokenKind::Eof);
        Ok(tokens)
    }

    /// Parse `source` into an untyped AST
    pub fn parse(&self, source: &str) -> Result<File> {
        let tokens = Lexer::new(source).tokenize()?;
        Parser::new(tokens).parse_file()
    }

    /// Parse and analyze `source` as the module `name`
    pub fn analyze_module(&mut self, name: &str, source: &str) -> Result<(SymbolId, File)> {
        let mut file = self.parse(source)?;
        let module = sema::analyze(&mut self.table, name, &mut file)?;
        self.library.push(file.clone());
        Ok((module, file))
    }

    /// Parse and analyze `source` as the configured module
    pub fn analyze(&mut self, source: &str) -> Result<(SymbolId, File)> {
        let name = self.options.module_name.clone();
        self.analyze_module(&name, source)
    }

    /// Compile `source` to IR
    pub fn lower(&mut self, source: &str) -> Result<IrModule> {
        let (module, file) = self.analyze(source)?;
        IrGenerator::new(&self.table, module, &file).with_library(&self.library).generate()
    }

    /// Compile `source` to IR text
    pub fn assembly(&mut self, source: &str) -> Result<String> {
        Ok(middle::print_module(&self.lower(source)?))
    }

    /// Compile `source` to a binary object
    pub fn object(&mut self, source: &str) -> Result<Vec<u8>> {
        let module = self.lower(source)?;
        let mut backend = Assembler::new(&self.options.runtime);
        log::debug!("assembling {} with {}", module.name, backend.name());
        backend.generate(&module)
    }

    /// Run the pipeline on `source` up to `stage`
    pub fn run(&mut self, source: &str, stage: Stage) -> Result<Output> {
        match stage {
            Stage::Lex => {
                let lines: Vec<String> = self
                    .tokens(source)?
                    .iter()
                    .map(|t| {
                        let (line, col) = t.span.line_col(source);
                        format!("{}:{} {}", line, col, t.kind)
                    })
                    .collect();
                Ok(Output::Text(lines.join("\n")))
            }
            Stage::Parse => to_json(&self.parse(source)?).map(Output::Text),
            Stage::Ast => to_json(&self.analyze(source)?.1).map(Output::Text),
            Stage::Asm => self.assembly(source).map(Output::Text),
            Stage::Exec => self.object(source).map(Output::Binary),
        }
    }
}

fn to_json(file: &File) -> Result<String> {
    serde_json::to_string_pretty(file).map_err(|e| Error::CodeGen(format!("AST serialization failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compiler() -> Compiler {
        Compiler::new(CompileOptions::default())
    }

    fn text(output: Output) -> String {
        match output {
            Output::Text(s) => s,
            Output::Binary(_) => panic!("expected text output"),
        }
    }

    #[test]
    fn test_lex_stage() {
        let out = text(compiler().run("def f()\n  1", Stage::Lex).unwrap());
        assert_eq!(
            out,
            "1:1 'def'\n1:5 identifier 'f'\n1:6 '('\n1:7 ')'\n2:3 integer 1"
        );
    }

    #[test]
    fn test_parse_and_ast_stages() {
        let source = "def main() Int { 1 + 2 }";
        let untyped = text(compiler().run(source, Stage::Parse).unwrap());
        assert!(untyped.contains("\"Unknown\""));

        let typed = text(compiler().run(source, Stage::Ast).unwrap());
        assert!(!typed.contains("\"Unknown\""));
        assert!(typed.contains("\"resolved\""));
    }

    #[test]
    fn test_asm_stage() {
        let out = text(compiler().run("def main() Int { 1 + 2 }", Stage::Asm).unwrap());
        assert_eq!(out, "!module 'main'\n\ndef 'main' i32\n    entry:\n        add i32 1, 2\n        ret i32\n");
    }

    #[test]
    fn test_exec_stage() {
        let options = CompileOptions { module_name: "main".to_string(), runtime: "fin".to_string() };
        match Compiler::new(options).run("def main() Int { 7 }", Stage::Exec).unwrap() {
            Output::Binary(bytes) => assert!(bytes.starts_with(b"#!/usr/bin/env fin\n")),
            Output::Text(_) => panic!("expected an object"),
        }
    }

    #[test]
    fn test_modules_share_a_table() {
        let mut compiler = compiler();
        compiler.analyze_module("lib", "def twice(x Int) Int { x * 2 }").unwrap();
        let ir = compiler.assembly("import lib\ndef main() Int { twice(4) }").unwrap();
        assert!(ir.contains("!fn f0 'lib' 'twice'"));
        assert!(ir.contains("call f0"));
    }

    #[test]
    fn test_imported_generic_is_instantiated_by_the_caller() {
        let mut compiler = compiler();
        compiler.analyze_module("lib", "def id{T}(x T) T { x }").unwrap();
        let ir = compiler.assembly("import lib\ndef main() Int { id(3) }").unwrap();
        assert!(ir.contains("!fn f0 'main' 'id`Int'"));
        assert!(ir.contains("def 'id`Int' i32"));
        assert!(ir.contains("call f0"));
    }

    #[test]
    fn test_recursive_generic() {
        let source = "\
def count{T}(a &[T], n Int) Int { if n == 0 then 0 else 1 + count(a, n - 1) }
def total(buf &[Int]) Int { count(buf, 4) }";
        let ir = compiler().assembly(source).unwrap();
        assert!(ir.contains("def 'count`Int' i32"));
        assert_eq!(ir.matches("def 'count").count(), 1);
    }

    #[test]
    fn test_errors_carry_their_stage() {
        let kind = |source: &str| compiler().run(source, Stage::Exec).unwrap_err().kind();
        assert_eq!(kind("def main() { $ }"), ErrorKind::Lex);
        assert_eq!(kind("def main( { }"), ErrorKind::Parse);
        assert_eq!(kind("def main() Int { true }"), ErrorKind::Analyze);
    }
}
