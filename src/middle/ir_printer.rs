//! IR Printer - Fin IR as assembler text
//!
//! Indentation is in 4-space units: `type` and `def` headers at level 0,
//! directives, slots, labels and type members at level 1, instructions at
//! level 2. The module name opens the text as a `!module` directive.

use crate::middle::ir::*;
use std::fmt;

const INDENT: &str = "    ";

/// Render a whole module
pub fn print_module(module: &IrModule) -> String {
    module.to_string()
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Tag(tag) => write!(f, "{}", tag),
            TypeRef::Named(spelling) => write!(f, "'{}'", spelling),
        }
    }
}

impl fmt::Display for TypeDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeDeclKind::Struct { fields } => {
                writeln!(f, "type '{}' struct", self.spelling)?;
                for field in fields {
                    writeln!(f, "{}field {}", INDENT, field)?;
                }
            }
            TypeDeclKind::Enum { variants } => {
                writeln!(f, "type '{}' enum", self.spelling)?;
                for (tag, fields) in variants.iter().enumerate() {
                    write!(f, "{}variant {}", INDENT, tag)?;
                    for field in fields {
                        write!(f, " {}", field)?;
                    }
                    writeln!(f)?;
                }
            }
            TypeDeclKind::Array { elem, len } => {
                writeln!(f, "type '{}' array", self.spelling)?;
                writeln!(f, "{}elem {} {}", INDENT, elem, len)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Size { name, spelling } => write!(f, "!sz {} '{}'", name, spelling),
            Directive::Offset { name, spelling, variant: Some(v), field } => {
                write!(f, "!off {} '{}' {} {}", name, spelling, v, field)
            }
            Directive::Offset { name, spelling, variant: None, field } => {
                write!(f, "!off {} '{}' {}", name, spelling, field)
            }
            Directive::Function { name, module, contract } => {
                write!(f, "!fn {} '{}' '{}'", name, module, contract)
            }
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind.keyword(), self.name, self.tag)
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ret {
            Some(tag) => writeln!(f, "def '{}' {}", self.contract, tag)?,
            None => writeln!(f, "def '{}' void", self.contract)?,
        }
        for directive in &self.directives {
            writeln!(f, "{}{}", INDENT, directive)?;
        }
        for slot in &self.slots {
            writeln!(f, "{}{}", INDENT, slot)?;
        }
        for line in &self.body {
            match line {
                Line::Label(label) => writeln!(f, "{}{}:", INDENT, label)?,
                Line::Instr(instr) => writeln!(f, "{}{}{}", INDENT, INDENT, instr)?,
                Line::Comment(text) => writeln!(f, "{}# {}", INDENT, text)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "!module '{}'", self.name)?;
        for decl in &self.types {
            writeln!(f)?;
            write!(f, "{}", decl)?;
        }
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}
