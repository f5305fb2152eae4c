//! Fin IR definitions
//!
//! A stack-machine IR: every instruction pops its operands from and pushes
//! its result onto an operand stack. Functions address memory through
//! named slots (parameters, locals, temporaries) and through interned
//! size, offset and callee names declared by `!` directives.

use std::fmt;

/// Operand type tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    I32,
    Float,
    I1,
    /// Any reference
    Ref,
    /// An aggregate, by its interned `!sz` name
    Sized(String),
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::I32 => write!(f, "i32"),
            Tag::Float => write!(f, "float"),
            Tag::I1 => write!(f, "i1"),
            Tag::Ref => write!(f, "&"),
            Tag::Sized(name) => write!(f, "{}", name),
        }
    }
}

impl Tag {
    /// Parse a tag as written in IR text
    pub fn parse(s: &str) -> Option<Tag> {
        match s {
            "i32" => Some(Tag::I32),
            "float" => Some(Tag::Float),
            "i1" => Some(Tag::I1),
            "&" => Some(Tag::Ref),
            _ if s.starts_with('z') && s.len() > 1 && s[1..].bytes().all(|b| b.is_ascii_digit()) => {
                Some(Tag::Sized(s.to_string()))
            }
            _ => None,
        }
    }
}

// ==================== Instructions ====================

/// Instruction opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Push,
    Pop,
    Dup,
    Reduce,
    Addr,
    Load,
    Store,
    Set,
    Off,
    Disc,
    TagOp,
    Add,
    Sub,
    Mul,
    Sdiv,
    Srem,
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Frem,
    Neg,
    Fneg,
    Not,
    Icmp,
    Fcmp,
    Sitofp,
    Fptosi,
    Zext,
    Index,
    Alloc,
    Dealloc,
    Realloc,
    Call,
    Br,
    Bf,
    Phi,
    Ret,
    Error,
}

/// Opcodes in encoding order; the byte code of an opcode is its index
pub const OPCODES: &[Opcode] = &[
    Opcode::Push,
    Opcode::Pop,
    Opcode::Dup,
    Opcode::Reduce,
    Opcode::Addr,
    Opcode::Load,
    Opcode::Store,
    Opcode::Set,
    Opcode::Off,
    Opcode::Disc,
    Opcode::TagOp,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Sdiv,
    Opcode::Srem,
    Opcode::Fadd,
    Opcode::Fsub,
    Opcode::Fmul,
    Opcode::Fdiv,
    Opcode::Frem,
    Opcode::Neg,
    Opcode::Fneg,
    Opcode::Not,
    Opcode::Icmp,
    Opcode::Fcmp,
    Opcode::Sitofp,
    Opcode::Fptosi,
    Opcode::Zext,
    Opcode::Index,
    Opcode::Alloc,
    Opcode::Dealloc,
    Opcode::Realloc,
    Opcode::Call,
    Opcode::Br,
    Opcode::Bf,
    Opcode::Phi,
    Opcode::Ret,
    Opcode::Error,
];

impl Opcode {
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Push => "push",
            Opcode::Pop => "pop",
            Opcode::Dup => "dup",
            Opcode::Reduce => "reduce",
            Opcode::Addr => "addr",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Set => "set",
            Opcode::Off => "off",
            Opcode::Disc => "disc",
            Opcode::TagOp => "tag",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Sdiv => "sdiv",
            Opcode::Srem => "srem",
            Opcode::Fadd => "fadd",
            Opcode::Fsub => "fsub",
            Opcode::Fmul => "fmul",
            Opcode::Fdiv => "fdiv",
            Opcode::Frem => "frem",
            Opcode::Neg => "neg",
            Opcode::Fneg => "fneg",
            Opcode::Not => "not",
            Opcode::Icmp => "icmp",
            Opcode::Fcmp => "fcmp",
            Opcode::Sitofp => "sitofp",
            Opcode::Fptosi => "fptosi",
            Opcode::Zext => "zext",
            Opcode::Index => "index",
            Opcode::Alloc => "alloc",
            Opcode::Dealloc => "dealloc",
            Opcode::Realloc => "realloc",
            Opcode::Call => "call",
            Opcode::Br => "br",
            Opcode::Bf => "bf",
            Opcode::Phi => "phi",
            Opcode::Ret => "ret",
            Opcode::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Option<Opcode> {
        OPCODES.iter().copied().find(|op| op.name() == name)
    }

    /// Byte code used by the assembler
    pub fn code(&self) -> u8 {
        OPCODES.iter().position(|op| op == self).unwrap_or(0) as u8
    }

    /// Opcodes with a two-immediate form (`add i32 1, 2`)
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Sdiv
                | Opcode::Srem
                | Opcode::Fadd
                | Opcode::Fsub
                | Opcode::Fmul
                | Opcode::Fdiv
                | Opcode::Frem
        )
    }

    /// Map a builtin opcode name (`add`, `sitofp`, ...) to its opcode
    pub fn from_intrinsic(name: &str) -> Option<Opcode> {
        Self::from_name(name).filter(|op| {
            op.is_arithmetic() || matches!(op, Opcode::Neg | Opcode::Fneg | Opcode::Sitofp | Opcode::Fptosi | Opcode::Zext)
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Instruction operand
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Tag(Tag),
    Int(i64),
    Float(f64),
    /// A slot, or an interned `z`/`o`/`f` name
    Name(String),
    /// Comparison condition code
    Cond(String),
    Label(String),
}

impl Operand {
    /// Literals and labels form comma-separated lists
    fn is_listed(&self) -> bool {
        matches!(self, Operand::Int(_) | Operand::Float(_) | Operand::Label(_))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Tag(t) => write!(f, "{}", t),
            Operand::Int(n) => write!(f, "{}", n),
            Operand::Float(n) => write!(f, "{:?}", n),
            Operand::Name(s) | Operand::Cond(s) | Operand::Label(s) => write!(f, "{}", s),
        }
    }
}

/// One instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub op: Opcode,
    pub args: Vec<Operand>,
}

impl Instr {
    pub fn new(op: Opcode, args: Vec<Operand>) -> Self {
        Self { op, args }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        let mut prev: Option<&Operand> = None;
        for arg in &self.args {
            let sep = match prev {
                Some(p) if p.is_listed() && arg.is_listed() => ", ",
                _ => " ",
            };
            write!(f, "{}{}", sep, arg)?;
            prev = Some(arg);
        }
        Ok(())
    }
}

/// A line of a function body
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Label(String),
    Instr(Instr),
    Comment(String),
}

// ==================== Functions ====================

/// Interned name declared in a function header
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// `!sz zN 'spelling'`
    Size { name: String, spelling: String },
    /// `!off oN 'spelling' [variant] field`
    Offset {
        name: String,
        spelling: String,
        variant: Option<u32>,
        field: usize,
    },
    /// `!fn fN 'module' 'contract'`
    Function { name: String, module: String, contract: String },
}

impl Directive {
    pub fn name(&self) -> &str {
        match self {
            Directive::Size { name, .. } | Directive::Offset { name, .. } | Directive::Function { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Param,
    Local,
    Temp,
}

impl SlotKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            SlotKind::Param => "param",
            SlotKind::Local => "local",
            SlotKind::Temp => "temp",
        }
    }
}

/// Storage declared in a function header
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub kind: SlotKind,
    pub name: String,
    pub tag: Tag,
}

/// One emitted (monomorphic) function
#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    pub contract: String,
    /// None for functions returning nothing
    pub ret: Option<Tag>,
    pub directives: Vec<Directive>,
    pub slots: Vec<Slot>,
    pub body: Vec<Line>,
}

impl IrFunction {
    /// Instructions of the body, labels and comments skipped
    pub fn instructions(&self) -> impl Iterator<Item = &Instr> {
        self.body.iter().filter_map(|line| match line {
            Line::Instr(i) => Some(i),
            _ => None,
        })
    }
}

// ==================== Types ====================

/// How an aggregate refers to a member type: a tag for scalars and
/// references, the quoted spelling for nested aggregates
#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    Tag(Tag),
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDeclKind {
    Struct { fields: Vec<TypeRef> },
    Enum { variants: Vec<Vec<TypeRef>> },
    Array { elem: TypeRef, len: u64 },
}

/// A top-level `type` block
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub spelling: String,
    pub kind: TypeDeclKind,
}

/// A whole compiled module
#[derive(Debug, Clone, PartialEq)]
pub struct IrModule {
    pub name: String,
    pub types: Vec<TypeDecl>,
    pub functions: Vec<IrFunction>,
}

impl IrModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            types: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn function(&self, contract: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.contract == contract)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_instruction_text() {
        let add = Instr::new(Opcode::Add, vec![Operand::Tag(Tag::I32), Operand::Int(1), Operand::Int(2)]);
        assert_eq!(add.to_string(), "add i32 1, 2");

        let br = Instr::new(Opcode::Br, vec![Operand::Label("then0".into()), Operand::Label("else1".into())]);
        assert_eq!(br.to_string(), "br then0, else1");

        let cmp = Instr::new(Opcode::Icmp, vec![Operand::Cond("slt".into()), Operand::Tag(Tag::I32)]);
        assert_eq!(cmp.to_string(), "icmp slt i32");

        let tag = Instr::new(Opcode::TagOp, vec![Operand::Name("z0".into()), Operand::Int(1)]);
        assert_eq!(tag.to_string(), "tag z0 1");

        let push = Instr::new(Opcode::Push, vec![Operand::Tag(Tag::Float), Operand::Float(1.0)]);
        assert_eq!(push.to_string(), "push float 1.0");
    }

    #[test]
    fn test_opcode_names() {
        for op in OPCODES {
            assert_eq!(Opcode::from_name(op.name()), Some(*op));
        }
        assert_eq!(Opcode::from_intrinsic("sdiv"), Some(Opcode::Sdiv));
        assert_eq!(Opcode::from_intrinsic("call"), None);
        assert_eq!(Opcode::Error.code() as usize, OPCODES.len() - 1);
    }

    #[test]
    fn test_tag_parse() {
        assert_eq!(Tag::parse("&"), Some(Tag::Ref));
        assert_eq!(Tag::parse("z12"), Some(Tag::Sized("z12".into())));
        assert_eq!(Tag::parse("z"), None);
        assert_eq!(Tag::parse("i64"), None);
    }
}
