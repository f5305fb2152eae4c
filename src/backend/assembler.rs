//! Assembler - Fin IR text to binary object
//!
//! Parsing validates the text (instruction names, operand counts and kinds,
//! declared names, labels) and rebuilds an [`IrModule`]. Encoding then runs
//! two passes: the first interns every string into the reference table and
//! lays out each function's code to find label offsets, the second writes
//! the object:
//!
//! ```text
//! #!/usr/bin/env <runtime>\n
//! strings    count, then <len><utf-8> each
//! module     string index
//! types      count, then per type: spelling, kind byte, members
//! functions  count, then per function: contract, return tag,
//!            directives, slots, code length, code
//! ```
//!
//! Integers are varints. Code is an opcode byte followed by its operands:
//! tags as a code byte (`z` names add their directive index), integers as
//! varints, floats as 8 big-endian bytes, names as indexes into the
//! function's directives followed by its slots, condition codes as one
//! byte and labels as 4-byte big-endian displacements from the byte after
//! the operand.

use crate::backend::codegen::CodeGen;
use crate::backend::varint;
use crate::middle::ir::*;
use crate::middle::print_module;
use crate::utils::{Error, Result, Span};
use std::collections::{HashMap, HashSet};

/// Condition codes of `icmp` and `fcmp`, by byte code
const CONDS: [&str; 12] = ["eq", "ne", "slt", "sle", "sgt", "sge", "oeq", "one", "olt", "ole", "ogt", "oge"];

const INDENT: usize = 4;

/// Tag byte for a function returning nothing
const VOID: u8 = 5;

// ==================== Text ====================

/// A whitespace- or comma-separated word of an IR line
#[derive(Debug, Clone)]
struct Word {
    text: String,
    quoted: bool,
    span: Span,
}

fn split_words(content: &str, base: usize) -> Result<Vec<Word>> {
    let mut words = Vec::new();
    let mut chars = content.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() || c == ',' {
            chars.next();
            continue;
        }
        if c == '\'' {
            chars.next();
            let mut text = String::new();
            let mut closed = None;
            for (i, c) in chars.by_ref() {
                if c == '\'' {
                    closed = Some(i);
                    break;
                }
                text.push(c);
            }
            let end = closed.ok_or_else(|| Error::BadArgument {
                message: "unterminated quoted name".to_string(),
                span: Span::new(base + start, base + content.len()),
            })?;
            words.push(Word { text, quoted: true, span: Span::new(base + start, base + end + 1) });
            continue;
        }
        let mut end = start;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() || c == ',' || c == '\'' {
                break;
            }
            end = i + c.len_utf8();
            chars.next();
        }
        words.push(Word {
            text: content[start..end].to_string(),
            quoted: false,
            span: Span::new(base + start, base + end),
        });
    }
    Ok(words)
}

fn is_label(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn bad(message: impl Into<String>, span: Span) -> Error {
    Error::BadArgument { message: message.into(), span }
}

/// What an operand position accepts
#[derive(Debug, Clone, Copy, PartialEq)]
enum Arg {
    Tag,
    Int,
    Number,
    Slot,
    Size,
    Offset,
    Callee,
    Cond,
    Label,
    /// One or more labels up to the end of the line
    Labels,
}

fn signatures(op: Opcode) -> &'static [&'static [Arg]] {
    use Arg::*;
    match op {
        Opcode::Push => &[&[Tag, Number]],
        Opcode::Pop
        | Opcode::Dup
        | Opcode::Load
        | Opcode::Store
        | Opcode::Neg
        | Opcode::Fneg
        | Opcode::Not
        | Opcode::Index
        | Opcode::Alloc
        | Opcode::Dealloc
        | Opcode::Realloc => &[&[Tag]],
        Opcode::Reduce => &[&[Tag, Tag]],
        Opcode::Addr => &[&[Slot]],
        Opcode::Set => &[&[Tag, Slot]],
        Opcode::Off => &[&[Offset]],
        Opcode::Disc => &[&[Size]],
        Opcode::TagOp => &[&[Size, Int]],
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Sdiv
        | Opcode::Srem
        | Opcode::Fadd
        | Opcode::Fsub
        | Opcode::Fmul
        | Opcode::Fdiv
        | Opcode::Frem => &[&[Tag], &[Tag, Number, Number]],
        Opcode::Icmp | Opcode::Fcmp => &[&[Cond, Tag]],
        Opcode::Sitofp | Opcode::Fptosi | Opcode::Zext | Opcode::Error => &[&[]],
        Opcode::Call => &[&[Callee]],
        Opcode::Br => &[&[Label], &[Label, Label]],
        Opcode::Bf => &[&[Label]],
        Opcode::Phi => &[&[Tag, Labels]],
        Opcode::Ret => &[&[], &[Tag]],
    }
}

/// Names a function header declares, by kind
#[derive(Debug, Clone, Copy, PartialEq)]
enum NameKind {
    Slot,
    Size,
    Offset,
    Callee,
}

impl NameKind {
    fn noun(self) -> &'static str {
        match self {
            NameKind::Slot => "slot",
            NameKind::Size => "size",
            NameKind::Offset => "offset",
            NameKind::Callee => "callee",
        }
    }
}

/// A function being parsed
struct FunctionText {
    func: IrFunction,
    names: HashMap<String, NameKind>,
    labels: HashSet<String>,
    label_refs: Vec<(String, Span)>,
}

enum Section {
    None,
    Type(TypeDecl),
    Function(FunctionText),
}

/// Rebuilds an [`IrModule`] from IR text
struct TextParser {
    module: IrModule,
    section: Section,
}

impl TextParser {
    fn new() -> Self {
        Self { module: IrModule::new(""), section: Section::None }
    }

    fn parse(mut self, text: &str) -> Result<IrModule> {
        let mut offset = 0;
        for raw in text.split('\n') {
            let base = offset;
            offset += raw.len() + 1;
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            let span = Span::new(base, base + line.len());

            let content = line.trim_start_matches(' ');
            if content.is_empty() || content.starts_with('#') {
                continue;
            }
            let indent = line.len() - content.len();
            if content.starts_with('\t') {
                return Err(bad("tab in indentation", span));
            }
            if indent % INDENT != 0 {
                return Err(bad(format!("indentation of {} spaces", indent), span));
            }

            let words = split_words(content, base + indent)?;
            if words.is_empty() {
                continue;
            }
            match indent / INDENT {
                0 => self.header(&words, span)?,
                1 => self.member(&words, span)?,
                2 => self.instruction(&words, span)?,
                _ => return Err(bad("indented too deep", span)),
            }
        }
        self.close()?;
        Ok(self.module)
    }

    /// Finish the open `type` or `def` block
    fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.section, Section::None) {
            Section::None => {}
            Section::Type(decl) => self.module.types.push(decl),
            Section::Function(text) => {
                for (label, span) in text.label_refs {
                    if !text.labels.contains(&label) {
                        return Err(Error::MalformedLabel { label, span });
                    }
                }
                self.module.functions.push(text.func);
            }
        }
        Ok(())
    }

    fn quoted(words: &[Word], i: usize, span: Span) -> Result<String> {
        match words.get(i) {
            Some(w) if w.quoted => Ok(w.text.clone()),
            Some(w) => Err(bad(format!("expected a quoted name, got {}", w.text), w.span)),
            None => Err(bad("missing quoted name", span)),
        }
    }

    fn number<T: std::str::FromStr>(words: &[Word], i: usize, span: Span) -> Result<T> {
        let word = words.get(i).ok_or_else(|| bad("missing integer", span))?;
        word.text
            .parse()
            .map_err(|_| bad(format!("expected an integer, got {}", word.text), word.span))
    }

    fn header(&mut self, words: &[Word], span: Span) -> Result<()> {
        self.close()?;
        let keyword = words[0].text.as_str();
        match keyword {
            "!module" => {
                self.module.name = Self::quoted(words, 1, span)?;
            }
            "type" => {
                let spelling = Self::quoted(words, 1, span)?;
                let kind = match words.get(2).map(|w| w.text.as_str()) {
                    Some("struct") => TypeDeclKind::Struct { fields: Vec::new() },
                    Some("enum") => TypeDeclKind::Enum { variants: Vec::new() },
                    Some("array") => TypeDeclKind::Array { elem: TypeRef::Tag(Tag::I32), len: 0 },
                    _ => return Err(bad("expected struct, enum or array", span)),
                };
                self.section = Section::Type(TypeDecl { spelling, kind });
            }
            "def" => {
                let contract = Self::quoted(words, 1, span)?;
                let ret = match words.get(2) {
                    Some(w) if w.text == "void" => None,
                    Some(w) => Some(Tag::parse(&w.text).ok_or_else(|| bad(format!("bad return tag {}", w.text), w.span))?),
                    None => return Err(bad("missing return tag", span)),
                };
                self.section = Section::Function(FunctionText {
                    func: IrFunction { contract, ret, directives: Vec::new(), slots: Vec::new(), body: Vec::new() },
                    names: HashMap::new(),
                    labels: HashSet::new(),
                    label_refs: Vec::new(),
                });
            }
            other => return Err(Error::UnknownInstruction { name: other.to_string(), span }),
        }
        Ok(())
    }

    fn member(&mut self, words: &[Word], span: Span) -> Result<()> {
        match &mut self.section {
            Section::Type(decl) => Self::type_member(decl, words, span),
            Section::Function(text) => Self::function_member(text, words, span),
            Section::None => Err(bad("declaration outside of a type or def", span)),
        }
    }

    fn type_ref(word: Option<&Word>, span: Span) -> Result<TypeRef> {
        match word {
            Some(w) if w.quoted => Ok(TypeRef::Named(w.text.clone())),
            Some(w) => match Tag::parse(&w.text) {
                Some(Tag::Sized(_)) | None => Err(bad(format!("bad member type {}", w.text), w.span)),
                Some(tag) => Ok(TypeRef::Tag(tag)),
            },
            None => Err(bad("missing member type", span)),
        }
    }

    fn type_member(decl: &mut TypeDecl, words: &[Word], span: Span) -> Result<()> {
        match (&mut decl.kind, words[0].text.as_str()) {
            (TypeDeclKind::Struct { fields }, "field") => {
                fields.push(Self::type_ref(words.get(1), span)?);
            }
            (TypeDeclKind::Enum { variants }, "variant") => {
                let tag: usize = Self::number(words, 1, span)?;
                if tag != variants.len() {
                    return Err(bad(format!("variant {} out of order", tag), span));
                }
                let fields = words[2..]
                    .iter()
                    .map(|w| Self::type_ref(Some(w), span))
                    .collect::<Result<Vec<_>>>()?;
                variants.push(fields);
            }
            (TypeDeclKind::Array { elem, len }, "elem") => {
                *elem = Self::type_ref(words.get(1), span)?;
                *len = Self::number(words, 2, span)?;
            }
            (_, other) => return Err(Error::UnknownInstruction { name: other.to_string(), span }),
        }
        Ok(())
    }

    fn declare(text: &mut FunctionText, word: Option<&Word>, kind: NameKind, span: Span) -> Result<String> {
        let word = word.ok_or_else(|| bad("missing name", span))?;
        if word.quoted || !is_label(&word.text) {
            return Err(bad(format!("bad name {}", word.text), word.span));
        }
        if text.names.insert(word.text.clone(), kind).is_some() {
            return Err(bad(format!("{} declared twice", word.text), word.span));
        }
        Ok(word.text.clone())
    }

    fn function_member(text: &mut FunctionText, words: &[Word], span: Span) -> Result<()> {
        let first = &words[0];

        if let Some(label) = first.text.strip_suffix(':') {
            if words.len() > 1 || first.quoted || !is_label(label) {
                return Err(Error::MalformedLabel { label: first.text.clone(), span });
            }
            if !text.labels.insert(label.to_string()) {
                return Err(Error::MalformedLabel { label: label.to_string(), span });
            }
            text.func.body.push(Line::Label(label.to_string()));
            return Ok(());
        }

        let directive = match first.text.as_str() {
            "!sz" => {
                let name = Self::declare(text, words.get(1), NameKind::Size, span)?;
                Directive::Size { name, spelling: Self::quoted(words, 2, span)? }
            }
            "!off" => {
                let name = Self::declare(text, words.get(1), NameKind::Offset, span)?;
                let spelling = Self::quoted(words, 2, span)?;
                let (variant, field) = match words.len() {
                    4 => (None, Self::number(words, 3, span)?),
                    5 => (Some(Self::number(words, 3, span)?), Self::number(words, 4, span)?),
                    _ => return Err(bad("!off takes a field, optionally after a variant", span)),
                };
                Directive::Offset { name, spelling, variant, field }
            }
            "!fn" => {
                let name = Self::declare(text, words.get(1), NameKind::Callee, span)?;
                Directive::Function {
                    name,
                    module: Self::quoted(words, 2, span)?,
                    contract: Self::quoted(words, 3, span)?,
                }
            }
            keyword @ ("param" | "local" | "temp") => {
                let kind = match keyword {
                    "param" => SlotKind::Param,
                    "local" => SlotKind::Local,
                    _ => SlotKind::Temp,
                };
                let name = Self::declare(text, words.get(1), NameKind::Slot, span)?;
                let tag = Self::tag(text, words.get(2), span)?;
                text.func.slots.push(Slot { kind, name, tag });
                return Ok(());
            }
            other => return Err(Error::UnknownInstruction { name: other.to_string(), span }),
        };
        text.func.directives.push(directive);
        Ok(())
    }

    fn tag(text: &FunctionText, word: Option<&Word>, span: Span) -> Result<Tag> {
        let word = word.ok_or_else(|| bad("missing type tag", span))?;
        let tag = Tag::parse(&word.text)
            .filter(|_| !word.quoted)
            .ok_or_else(|| bad(format!("expected a type tag, got {}", word.text), word.span))?;
        if let Tag::Sized(name) = &tag {
            if text.names.get(name) != Some(&NameKind::Size) {
                return Err(bad(format!("undeclared size {}", name), word.span));
            }
        }
        Ok(tag)
    }

    fn instruction(&mut self, words: &[Word], span: Span) -> Result<()> {
        let Section::Function(text) = &mut self.section else {
            return Err(bad("instruction outside of a def", span));
        };
        if !matches!(text.func.body.first(), Some(Line::Label(_))) {
            return Err(bad("instruction before the first label", span));
        }

        let name = &words[0];
        let op = Opcode::from_name(&name.text)
            .filter(|_| !name.quoted)
            .ok_or_else(|| Error::UnknownInstruction { name: name.text.clone(), span })?;
        let operands = &words[1..];

        let signature = signatures(op)
            .iter()
            .find(|sig| match sig.last() {
                Some(Arg::Labels) => operands.len() >= sig.len(),
                _ => operands.len() == sig.len(),
            })
            .ok_or_else(|| {
                let counts: Vec<String> = signatures(op).iter().map(|s| s.len().to_string()).collect();
                bad(
                    format!("{} takes {} operands, got {}", op, counts.join(" or "), operands.len()),
                    span,
                )
            })?;

        let mut args = Vec::with_capacity(operands.len());
        for (i, word) in operands.iter().enumerate() {
            let kind = signature.get(i).copied().unwrap_or(Arg::Labels);
            args.push(Self::operand(text, kind, word)?);
        }
        text.func.body.push(Line::Instr(Instr::new(op, args)));
        Ok(())
    }

    fn operand(text: &mut FunctionText, kind: Arg, word: &Word) -> Result<Operand> {
        if word.quoted {
            return Err(bad(format!("unexpected quoted name '{}'", word.text), word.span));
        }
        let named = |text: &FunctionText, expected: NameKind| -> Result<Operand> {
            match text.names.get(&word.text) {
                Some(k) if *k == expected => Ok(Operand::Name(word.text.clone())),
                _ => Err(bad(format!("{} is not a declared {} name", word.text, expected.noun()), word.span)),
            }
        };
        match kind {
            Arg::Tag => Self::tag(text, Some(word), word.span).map(Operand::Tag),
            Arg::Int => word
                .text
                .parse()
                .map(Operand::Int)
                .map_err(|_| bad(format!("expected an integer, got {}", word.text), word.span)),
            Arg::Number => match word.text.parse::<i64>() {
                Ok(n) => Ok(Operand::Int(n)),
                Err(_) => word
                    .text
                    .parse::<f64>()
                    .map(Operand::Float)
                    .map_err(|_| bad(format!("expected a number, got {}", word.text), word.span)),
            },
            Arg::Slot => named(text, NameKind::Slot),
            Arg::Size => named(text, NameKind::Size),
            Arg::Offset => named(text, NameKind::Offset),
            Arg::Callee => named(text, NameKind::Callee),
            Arg::Cond => {
                if CONDS.contains(&word.text.as_str()) {
                    Ok(Operand::Cond(word.text.clone()))
                } else {
                    Err(bad(format!("unknown condition {}", word.text), word.span))
                }
            }
            Arg::Label | Arg::Labels => {
                if !is_label(&word.text) {
                    return Err(Error::MalformedLabel { label: word.text.clone(), span: word.span });
                }
                text.label_refs.push((word.text.clone(), word.span));
                Ok(Operand::Label(word.text.clone()))
            }
        }
    }
}

// ==================== Encoding ====================

/// The reference table
#[derive(Default)]
struct Strings {
    list: Vec<String>,
    index: HashMap<String, i64>,
}

impl Strings {
    fn intern(&mut self, s: &str) -> i64 {
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.list.len() as i64;
        self.list.push(s.to_string());
        self.index.insert(s.to_string(), i);
        i
    }

    fn get(&self, s: &str) -> Result<i64> {
        self.index
            .get(s)
            .copied()
            .ok_or_else(|| Error::CodeGen(format!("string {} missing from the reference table", s)))
    }
}

/// Name indexes and label offsets of one function
struct Layout {
    names: HashMap<String, i64>,
    labels: HashMap<String, usize>,
    size: usize,
}

impl Layout {
    fn new(func: &IrFunction) -> Result<Self> {
        let names = func
            .directives
            .iter()
            .map(|d| d.name().to_string())
            .chain(func.slots.iter().map(|s| s.name.clone()))
            .enumerate()
            .map(|(i, n)| (n, i as i64))
            .collect();
        let mut layout = Self { names, labels: HashMap::new(), size: 0 };
        for line in &func.body {
            match line {
                Line::Label(label) => {
                    layout.labels.insert(label.clone(), layout.size);
                }
                Line::Instr(instr) => layout.size += layout.instr_len(instr)?,
                Line::Comment(_) => {}
            }
        }
        Ok(layout)
    }

    fn name(&self, name: &str) -> Result<i64> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| Error::CodeGen(format!("undeclared name {}", name)))
    }

    fn tag_len(&self, tag: &Tag) -> Result<usize> {
        Ok(match tag {
            Tag::Sized(name) => 1 + varint::encoded_len(self.name(name)?),
            _ => 1,
        })
    }

    fn instr_len(&self, instr: &Instr) -> Result<usize> {
        let mut len = 1;
        for arg in &instr.args {
            len += match arg {
                Operand::Tag(tag) => self.tag_len(tag)?,
                Operand::Int(n) => varint::encoded_len(*n),
                Operand::Float(_) => 8,
                Operand::Name(name) => varint::encoded_len(self.name(name)?),
                Operand::Cond(_) => 1,
                Operand::Label(_) => 4,
            };
        }
        Ok(len)
    }

    fn encode_tag(&self, tag: &Tag, out: &mut Vec<u8>) -> Result<()> {
        match tag {
            Tag::Sized(name) => {
                out.push(4);
                varint::encode(self.name(name)?, out);
            }
            other => out.push(tag_code(other)),
        }
        Ok(())
    }

    fn encode_instr(&self, instr: &Instr, code: &mut Vec<u8>) -> Result<()> {
        code.push(instr.op.code());
        for arg in &instr.args {
            match arg {
                Operand::Tag(tag) => self.encode_tag(tag, code)?,
                Operand::Int(n) => varint::encode(*n, code),
                Operand::Float(x) => code.extend_from_slice(&x.to_bits().to_be_bytes()),
                Operand::Name(name) => varint::encode(self.name(name)?, code),
                Operand::Cond(cond) => {
                    let index = CONDS
                        .iter()
                        .position(|c| c == cond)
                        .ok_or_else(|| Error::CodeGen(format!("unknown condition {}", cond)))?;
                    code.push(index as u8);
                }
                Operand::Label(label) => {
                    let target = *self
                        .labels
                        .get(label)
                        .ok_or_else(|| Error::CodeGen(format!("undefined label {}", label)))?;
                    let next = code.len() + 4;
                    let displacement = i32::try_from(target as i64 - next as i64)
                        .map_err(|_| Error::CodeGen(format!("branch to {} out of range", label)))?;
                    code.extend_from_slice(&displacement.to_be_bytes());
                }
            }
        }
        Ok(())
    }
}

fn tag_code(tag: &Tag) -> u8 {
    match tag {
        Tag::I32 => 0,
        Tag::Float => 1,
        Tag::I1 => 2,
        Tag::Ref => 3,
        Tag::Sized(_) => 4,
    }
}

fn slot_code(kind: SlotKind) -> u8 {
    match kind {
        SlotKind::Param => 0,
        SlotKind::Local => 1,
        SlotKind::Temp => 2,
    }
}

fn count(n: usize, out: &mut Vec<u8>) {
    varint::encode(n as i64, out);
}

/// Text-to-binary assembler
pub struct Assembler {
    runtime: String,
}

impl Assembler {
    /// `runtime` names the interpreter in the object's `#!` line
    pub fn new(runtime: &str) -> Self {
        Self { runtime: runtime.to_string() }
    }

    /// Parse and validate IR text
    pub fn parse(&self, text: &str) -> Result<IrModule> {
        TextParser::new().parse(text)
    }

    /// Assemble IR text into an object
    pub fn assemble(&self, text: &str) -> Result<Vec<u8>> {
        let module = self.parse(text)?;
        self.encode(&module)
    }

    /// Encode a validated module
    pub fn encode(&self, module: &IrModule) -> Result<Vec<u8>> {
        // Pass 1: reference table and label offsets
        let mut strings = Strings::default();
        strings.intern(&module.name);
        for decl in &module.types {
            strings.intern(&decl.spelling);
            for member in type_members(decl) {
                if let TypeRef::Named(name) = member {
                    strings.intern(name);
                }
            }
        }
        let mut layouts = Vec::with_capacity(module.functions.len());
        for func in &module.functions {
            strings.intern(&func.contract);
            for directive in &func.directives {
                match directive {
                    Directive::Size { spelling, .. } | Directive::Offset { spelling, .. } => {
                        strings.intern(spelling);
                    }
                    Directive::Function { module, contract, .. } => {
                        strings.intern(module);
                        strings.intern(contract);
                    }
                }
            }
            for slot in &func.slots {
                strings.intern(&slot.name);
            }
            layouts.push(Layout::new(func)?);
        }

        // Pass 2: the object
        let mut out = format!("#!/usr/bin/env {}\n", self.runtime).into_bytes();
        count(strings.list.len(), &mut out);
        for s in &strings.list {
            varint::encode_str(s, &mut out);
        }
        varint::encode(strings.get(&module.name)?, &mut out);

        count(module.types.len(), &mut out);
        for decl in &module.types {
            varint::encode(strings.get(&decl.spelling)?, &mut out);
            match &decl.kind {
                TypeDeclKind::Struct { fields } => {
                    out.push(0);
                    count(fields.len(), &mut out);
                    for field in fields {
                        encode_type_ref(field, &strings, &mut out)?;
                    }
                }
                TypeDeclKind::Enum { variants } => {
                    out.push(1);
                    count(variants.len(), &mut out);
                    for fields in variants {
                        count(fields.len(), &mut out);
                        for field in fields {
                            encode_type_ref(field, &strings, &mut out)?;
                        }
                    }
                }
                TypeDeclKind::Array { elem, len } => {
                    out.push(2);
                    encode_type_ref(elem, &strings, &mut out)?;
                    count(*len as usize, &mut out);
                }
            }
        }

        count(module.functions.len(), &mut out);
        for (func, layout) in module.functions.iter().zip(&layouts) {
            varint::encode(strings.get(&func.contract)?, &mut out);
            match &func.ret {
                Some(tag) => layout.encode_tag(tag, &mut out)?,
                None => out.push(VOID),
            }

            count(func.directives.len(), &mut out);
            for directive in &func.directives {
                match directive {
                    Directive::Size { spelling, .. } => {
                        out.push(0);
                        varint::encode(strings.get(spelling)?, &mut out);
                    }
                    Directive::Offset { spelling, variant, field, .. } => {
                        out.push(1);
                        varint::encode(strings.get(spelling)?, &mut out);
                        varint::encode(variant.map_or(-1, i64::from), &mut out);
                        count(*field, &mut out);
                    }
                    Directive::Function { module, contract, .. } => {
                        out.push(2);
                        varint::encode(strings.get(module)?, &mut out);
                        varint::encode(strings.get(contract)?, &mut out);
                    }
                }
            }

            count(func.slots.len(), &mut out);
            for slot in &func.slots {
                out.push(slot_code(slot.kind));
                varint::encode(strings.get(&slot.name)?, &mut out);
                layout.encode_tag(&slot.tag, &mut out)?;
            }

            let mut code = Vec::with_capacity(layout.size);
            for instr in func.instructions() {
                layout.encode_instr(instr, &mut code)?;
            }
            if code.len() != layout.size {
                return Err(Error::CodeGen(format!("layout of {} changed between passes", func.contract)));
            }
            count(code.len(), &mut out);
            out.extend_from_slice(&code);
        }

        log::debug!("assembled {} into {} bytes", module.name, out.len());
        Ok(out)
    }
}

fn type_members(decl: &TypeDecl) -> Vec<&TypeRef> {
    match &decl.kind {
        TypeDeclKind::Struct { fields } => fields.iter().collect(),
        TypeDeclKind::Enum { variants } => variants.iter().flatten().collect(),
        TypeDeclKind::Array { elem, .. } => vec![elem],
    }
}

fn encode_type_ref(member: &TypeRef, strings: &Strings, out: &mut Vec<u8>) -> Result<()> {
    match member {
        TypeRef::Tag(tag) => out.push(tag_code(tag)),
        TypeRef::Named(name) => {
            out.push(4);
            varint::encode(strings.get(name)?, out);
        }
    }
    Ok(())
}

impl CodeGen for Assembler {
    fn generate(&mut self, module: &IrModule) -> Result<Vec<u8>> {
        self.assemble(&print_module(module))
    }

    fn runtime(&self) -> &str {
        &self.runtime
    }

    fn name(&self) -> &str {
        "fin-asm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_source;
    use crate::sema::{analyze, SymbolTable};
    use pretty_assertions::assert_eq;

    const HEADER: &[u8] = b"#!/usr/bin/env finvm\n";

    fn assemble(text: &str) -> Result<Vec<u8>> {
        Assembler::new("finvm").assemble(text)
    }

    /// Code bytes of the last function, which end the object
    fn code_tail(object: &[u8], len: usize) -> Vec<u8> {
        object[object.len() - len..].to_vec()
    }

    #[test]
    fn test_header_and_strings() {
        let object = assemble("!module 'main'\ndef 'main' void\n    entry:\n        ret\n").unwrap();
        assert!(object.starts_with(HEADER));
        let rest = &object[HEADER.len()..];
        // Two strings: the module and the contract
        assert_eq!(rest[0], 2);
        assert_eq!(varint::decode_str(&rest[1..]), Some(("main".to_string(), 5)));
    }

    #[test]
    fn test_immediate_arithmetic() {
        let text = "def 'main' i32\n    entry:\n        add i32 1, 2\n        ret i32\n";
        let object = assemble(text).unwrap();
        let add = Opcode::Add.code();
        let ret = Opcode::Ret.code();
        assert_eq!(code_tail(&object, 7), vec![6, add, 0, 1, 2, ret, 0]);
    }

    #[test]
    fn test_branch_displacements() {
        let text = "\
def 'spin' void
    entry:
        br head0
    head0:
        br head0
";
        let object = assemble(text).unwrap();
        let br = Opcode::Br.code();
        assert_eq!(
            code_tail(&object, 11),
            vec![10, br, 0, 0, 0, 0, br, 0xff, 0xff, 0xff, 0xfb]
        );
    }

    #[test]
    fn test_names_index_directives_then_slots() {
        let text = "\
def 'main' i32
    !fn f0 'lib' 'twice'
    local x_l0 i32
    entry:
        addr x_l0
        load i32
        call f0
        ret i32
";
        let object = assemble(text).unwrap();
        let code = vec![
            8,
            Opcode::Addr.code(),
            1,
            Opcode::Load.code(),
            0,
            Opcode::Call.code(),
            0,
            Opcode::Ret.code(),
            0,
        ];
        assert_eq!(code_tail(&object, 9), code);
    }

    #[test]
    fn test_errors() {
        let wrap = |body: &str| format!("def 'main' void\n    local x_l0 i32\n    entry:\n{}\n", body);

        assert!(matches!(assemble(&wrap("        frob i32")), Err(Error::UnknownInstruction { .. })));
        assert!(matches!(assemble(&wrap("        add i32 1")), Err(Error::BadArgument { .. })));
        assert!(matches!(assemble(&wrap("        push i64 1")), Err(Error::BadArgument { .. })));
        assert!(matches!(assemble(&wrap("        addr y_l0")), Err(Error::BadArgument { .. })));
        assert!(matches!(assemble(&wrap("        icmp lt i32")), Err(Error::BadArgument { .. })));
        assert!(matches!(assemble(&wrap("        br nowhere")), Err(Error::MalformedLabel { .. })));
        assert!(matches!(assemble(&wrap("    9lives:")), Err(Error::MalformedLabel { .. })));
        assert!(matches!(assemble(&wrap("    entry:")), Err(Error::MalformedLabel { .. })));
        assert!(matches!(assemble(&wrap("\t\tret")), Err(Error::BadArgument { .. })));
        assert!(matches!(assemble(&wrap("      ret")), Err(Error::BadArgument { .. })));
    }

    #[test]
    fn test_error_span_points_at_operand() {
        let text = "def 'main' void\n    entry:\n        br 1x\n";
        match assemble(text) {
            Err(Error::MalformedLabel { label, span }) => {
                assert_eq!(label, "1x");
                assert_eq!(&text[span.start..span.end], "1x");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_generated_text_parses_back() {
        let source = "\
struct P { x Int, y Float }
enum Opt { None, Some(P) }
def get(o Opt) Float { match o { Some(p) => p.y, None => 0.5 } }
def main() Int { let f = get(Some(P(1, 2.5))); if f > 1.0 then 1 else 0 }";
        let mut table = SymbolTable::new();
        let mut file = parse_source(source).unwrap();
        let module_sym = analyze(&mut table, "main", &mut file).unwrap();
        let module = crate::middle::generate(&table, module_sym, &file).unwrap();

        let assembler = Assembler::new("finvm");
        let parsed = assembler.parse(&print_module(&module)).unwrap();
        assert_eq!(parsed, module);
        assert!(assembler.encode(&parsed).unwrap().starts_with(HEADER));
    }
}
