//! IR Generator - typed AST to Fin IR
//!
//! Lowers each function of an analyzed module to stack-machine code while
//! tracking the operand stack in a [`ShadowStack`]. Generic functions are
//! monomorphized on demand: every instantiation reached from emitted code
//! is queued and emitted once under its contract name. Instantiations of
//! generics imported from other modules are emitted into the calling module,
//! whose `!fn` directives then name the calling module.

use crate::frontend::ast::{Def, Expr, ExprKind, File, Item, Literal, NodeId, Pattern, PatternKind, TestOp};
use crate::middle::ir::{
    Directive, Instr, IrFunction, IrModule, Line, Opcode, Operand, Slot, SlotKind, Tag, TypeDecl, TypeDeclKind,
    TypeRef,
};
use crate::middle::stack::ShadowStack;
use crate::sema::resolver::{Callee, Match};
use crate::sema::symbols::{SymbolId, SymbolKind, SymbolTable};
use crate::stdlib::builtins::{Intrinsic, Primitive};
use crate::types::{Env, Type};
use crate::utils::{Error, Result};
use std::collections::{HashMap, HashSet, VecDeque};

/// Labels and stack frame of an enclosing loop
#[derive(Debug, Clone)]
struct LoopFrame {
    head: String,
    body: String,
    end: String,
    stack: ShadowStack,
}

/// Per-function generation state
#[derive(Debug, Default)]
struct FnState {
    env: Env,
    ret: Option<Tag>,
    directives: Vec<Directive>,
    /// Interning key -> directive name
    interned: HashMap<String, String>,
    sizes: usize,
    offsets: usize,
    callees: usize,
    slots: Vec<Slot>,
    vars: HashMap<SymbolId, String>,
    temps: usize,
    body: Vec<Line>,
    labels: usize,
    stack: ShadowStack,
    reachable: bool,
    /// Label of the block being emitted
    block: String,
    /// Stack on entry and predecessor blocks of every jumped-to label
    jumps: HashMap<String, (ShadowStack, Vec<String>)>,
    loops: HashMap<NodeId, LoopFrame>,
}

/// IR Generator
pub struct IrGenerator<'a> {
    table: &'a SymbolTable,
    module_sym: SymbolId,
    module: IrModule,
    /// Function definitions of this module and its libraries by symbol
    defs: HashMap<SymbolId, &'a Def>,
    /// Instantiations waiting to be emitted
    pending: VecDeque<(SymbolId, Vec<Type>)>,
    /// Contracts already emitted or queued
    queued: HashSet<String>,
    /// Aggregates that already have a `type` block
    declared_types: HashSet<String>,
    state: FnState,
}

/// Lower an analyzed file registered as `module` in `table`
pub fn generate(table: &SymbolTable, module: SymbolId, file: &File) -> Result<IrModule> {
    IrGenerator::new(table, module, file).generate()
}

fn file_defs<'f>(file: &'f File) -> impl Iterator<Item = (SymbolId, &'f Def)> + 'f {
    file.items.iter().filter_map(|item| match item {
        Item::Def(def) => def.symbol.map(|s| (s, def)),
        _ => None,
    })
}

impl<'a> IrGenerator<'a> {
    pub fn new(table: &'a SymbolTable, module: SymbolId, file: &'a File) -> Self {
        Self {
            table,
            module_sym: module,
            module: IrModule::new(&table.module_path(module)),
            defs: file_defs(file).collect(),
            pending: VecDeque::new(),
            queued: HashSet::new(),
            declared_types: HashSet::new(),
            state: FnState::default(),
        }
    }

    /// Make the generic functions of already analyzed modules available
    /// for instantiation
    pub fn with_library(mut self, files: impl IntoIterator<Item = &'a File>) -> Self {
        for file in files {
            for (sym, def) in file_defs(file) {
                self.defs.entry(sym).or_insert(def);
            }
        }
        self
    }

    /// Emit every non-generic function and the instantiations they reach
    pub fn generate(mut self) -> Result<IrModule> {
        let mut roots: Vec<(NodeId, SymbolId)> = self
            .defs
            .iter()
            .filter(|(sym, _)| self.table.module_of(**sym) == Some(self.module_sym))
            .filter_map(|(&sym, def)| match self.table.kind(sym) {
                SymbolKind::Function { generics, .. } if generics.is_empty() => Some((def.id, sym)),
                _ => None,
            })
            .collect();
        // Source order
        roots.sort();
        for (_, sym) in roots {
            self.enqueue(sym, Vec::new());
        }

        while let Some((func, args)) = self.pending.pop_front() {
            self.generate_function(func, &args)?;
        }
        log::debug!(
            "generated {} functions and {} types for {}",
            self.module.functions.len(),
            self.module.types.len(),
            self.module.name
        );
        Ok(self.module)
    }

    fn enqueue(&mut self, func: SymbolId, args: Vec<Type>) {
        let contract = self.contract(func, &args);
        if self.queued.insert(contract) {
            self.pending.push_back((func, args));
        }
    }

    /// Monomorphized name: base name, generic arguments after a backquote,
    /// parameter types when the name is overloaded
    fn contract(&self, func: SymbolId, args: &[Type]) -> String {
        let table = self.table;
        let name = table.name(func);
        let mut out = name.to_string();
        if !args.is_empty() {
            let spelled: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            out.push('`');
            out.push_str(&spelled.join(","));
        }

        let overloaded = table
            .get(func)
            .parent
            .and_then(|m| table.get(m).member(name))
            .map_or(false, |g| matches!(table.kind(g), SymbolKind::FunctionGroup { members } if members.len() > 1));
        if overloaded {
            if let SymbolKind::Function { generics, params, .. } = table.kind(func) {
                let env = table.env_for(generics, args);
                let spelled: Vec<String> = params
                    .iter()
                    .map(|&p| match table.kind(p) {
                        SymbolKind::Variable { ty, .. } => ty.resolve(&env).to_string(),
                        _ => String::new(),
                    })
                    .collect();
                out.push_str(&format!("({})", spelled.join(",")));
            }
        }
        out
    }

    // ==================== Functions ====================

    fn generate_function(&mut self, func: SymbolId, args: &[Type]) -> Result<()> {
        let table = self.table;
        let def = self
            .defs
            .get(&func)
            .copied()
            .ok_or_else(|| Error::CodeGen(format!("no body for {}", table.name(func))))?;
        let SymbolKind::Function { generics, params, ret, locals, .. } = table.kind(func) else {
            return Err(Error::CodeGen(format!("{} is not a function", table.name(func))));
        };
        let contract = self.contract(func, args);
        log::trace!("generating {}", contract);

        self.state = FnState { env: table.env_for(generics, args), ..FnState::default() };
        self.state.ret = self.tag(ret)?;

        for (i, &p) in params.iter().enumerate() {
            let slot = format!("{}_p{}", table.name(p), i);
            self.declare_slot(SlotKind::Param, p, slot)?;
        }
        for &l in locals {
            let index = match table.kind(l) {
                SymbolKind::Variable { index, .. } => *index,
                _ => 0,
            };
            let slot = format!("{}_l{}", table.name(l), index);
            self.declare_slot(SlotKind::Local, l, slot)?;
        }

        self.state.body.push(Line::Label("entry".to_string()));
        self.state.block = "entry".to_string();
        self.state.reachable = true;

        self.gen(&def.body)?;
        match self.state.ret.clone() {
            Some(tag) => self.emit(Opcode::Ret, vec![Operand::Tag(tag)], 1, None)?,
            None => self.emit(Opcode::Ret, Vec::new(), 0, None)?,
        }

        let state = std::mem::take(&mut self.state);
        self.module.functions.push(IrFunction {
            contract,
            ret: state.ret,
            directives: state.directives,
            slots: state.slots,
            body: state.body,
        });
        Ok(())
    }

    fn declare_slot(&mut self, kind: SlotKind, var: SymbolId, name: String) -> Result<()> {
        let ty = self.var_type(var);
        let tag = self.value_tag(&ty)?;
        self.state.slots.push(Slot { kind, name: name.clone(), tag });
        self.state.vars.insert(var, name);
        Ok(())
    }

    fn var_type(&self, var: SymbolId) -> Type {
        match self.table.kind(var) {
            SymbolKind::Variable { ty, .. } | SymbolKind::Constant { ty, .. } => ty.clone(),
            _ => Type::unknown(),
        }
    }

    fn slot(&self, var: SymbolId) -> Result<String> {
        self.state
            .vars
            .get(&var)
            .cloned()
            .ok_or_else(|| Error::CodeGen(format!("no slot for {}", self.table.name(var))))
    }

    fn temp(&mut self, tag: Tag) -> String {
        let name = format!("t{}", self.state.temps);
        self.state.temps += 1;
        self.state.slots.push(Slot { kind: SlotKind::Temp, name: name.clone(), tag });
        name
    }

    // ==================== Types ====================

    /// Tag of a value of type `ty`; None for Void and Diverge
    fn tag(&mut self, ty: &Type) -> Result<Option<Tag>> {
        let ty = ty.resolve(&self.state.env);
        match &ty {
            Type::Special(_) if ty.is_unknown() => Err(Error::CodeGen("expression left untyped".to_string())),
            Type::Special(_) => Ok(None),
            Type::Ref { .. } => Ok(Some(Tag::Ref)),
            Type::Generic { name, .. } => Err(Error::CodeGen(format!("unbound generic parameter {}", name))),
            _ => match self.table.primitive(&ty) {
                Some(prim) => Ok(Some(prim_tag(prim))),
                None => Ok(Some(Tag::Sized(self.size_name(&ty)?))),
            },
        }
    }

    fn value_tag(&mut self, ty: &Type) -> Result<Tag> {
        self.tag(ty)?
            .ok_or_else(|| Error::CodeGen(format!("{} has no runtime representation", ty)))
    }

    fn intern(&mut self, key: String, make: impl FnOnce(&mut FnState) -> Directive) -> String {
        if let Some(name) = self.state.interned.get(&key) {
            return name.clone();
        }
        let directive = make(&mut self.state);
        let name = directive.name().to_string();
        self.state.directives.push(directive);
        self.state.interned.insert(key, name.clone());
        name
    }

    /// `!sz` name of an aggregate type
    fn size_name(&mut self, ty: &Type) -> Result<String> {
        let ty = ty.resolve(&self.state.env);
        self.declare_type(&ty)?;
        let spelling = ty.to_string();
        Ok(self.intern(format!("z:{}", spelling), |st| {
            st.sizes += 1;
            Directive::Size { name: format!("z{}", st.sizes - 1), spelling }
        }))
    }

    /// `!off` name of field `field` (of `variant`) of an aggregate type
    fn offset_name(&mut self, ty: &Type, variant: Option<u32>, field: usize) -> Result<String> {
        let ty = ty.resolve(&self.state.env);
        self.declare_type(&ty)?;
        let spelling = ty.to_string();
        Ok(self.intern(format!("o:{}:{:?}:{}", spelling, variant, field), |st| {
            st.offsets += 1;
            Directive::Offset { name: format!("o{}", st.offsets - 1), spelling, variant, field }
        }))
    }

    /// `!fn` name of a callee
    fn callee_name(&mut self, func: SymbolId, m: &Match) -> Result<String> {
        let table = self.table;
        let args: Vec<Type> = m.generic_args.iter().map(|a| a.resolve(&self.state.env)).collect();
        if args.iter().any(|a| a.has_generics()) {
            return Err(Error::CodeGen(format!("call to {} with unbound generics", table.name(func))));
        }
        let contract = self.contract(func, &args);
        let mut module = table.module_path(func);
        if !args.is_empty() && self.defs.contains_key(&func) {
            module = self.module.name.clone();
            self.enqueue(func, args);
        }
        Ok(self.intern(format!("f:{}:{}", module, contract), |st| {
            st.callees += 1;
            Directive::Function { name: format!("f{}", st.callees - 1), module, contract }
        }))
    }

    /// Add a module-level `type` block for an aggregate
    fn declare_type(&mut self, ty: &Type) -> Result<()> {
        let spelling = ty.to_string();
        if self.declared_types.contains(&spelling) {
            return Ok(());
        }
        let table = self.table;
        let kind = match ty {
            Type::Struct { .. } => {
                let Some(fields) = table.struct_fields(ty) else { return Ok(()) };
                self.declared_types.insert(spelling.clone());
                let fields = fields.iter().map(|f| self.type_ref(&f.ty)).collect::<Result<Vec<_>>>()?;
                TypeDeclKind::Struct { fields }
            }
            Type::Enum { .. } => {
                let Some(variants) = table.enum_variants(ty) else { return Ok(()) };
                self.declared_types.insert(spelling.clone());
                let variants = variants
                    .iter()
                    .map(|(_, _, fields)| fields.iter().map(|f| self.type_ref(f)).collect::<Result<Vec<_>>>())
                    .collect::<Result<Vec<_>>>()?;
                TypeDeclKind::Enum { variants }
            }
            Type::Array { elem, len: Some(len) } => {
                self.declared_types.insert(spelling.clone());
                TypeDeclKind::Array { elem: self.type_ref(elem)?, len: *len }
            }
            _ => return Ok(()),
        };
        self.module.types.push(TypeDecl { spelling, kind });
        Ok(())
    }

    fn type_ref(&mut self, ty: &Type) -> Result<TypeRef> {
        match ty {
            Type::Ref { .. } => Ok(TypeRef::Tag(Tag::Ref)),
            Type::Struct { .. } | Type::Enum { .. } | Type::Array { len: Some(_), .. } => {
                if let Some(prim) = self.table.primitive(ty) {
                    return Ok(TypeRef::Tag(prim_tag(prim)));
                }
                self.declare_type(ty)?;
                Ok(TypeRef::Named(ty.to_string()))
            }
            _ => Err(Error::CodeGen(format!("{} cannot be stored in an aggregate", ty))),
        }
    }

    // ==================== Emission ====================

    /// Append an instruction that pops `pops` entries and pushes `push`.
    /// Nothing is emitted in unreachable code.
    fn emit(&mut self, op: Opcode, args: Vec<Operand>, pops: usize, push: Option<Tag>) -> Result<()> {
        let st = &mut self.state;
        if !st.reachable {
            return Ok(());
        }
        if st.stack.depth() < pops {
            return Err(Error::CodeGen(format!(
                "{} needs {} operands but the stack holds {}",
                op,
                pops,
                st.stack.depth()
            )));
        }
        for _ in 0..pops {
            st.stack = st.stack.pop().unwrap_or_default();
        }
        if let Some(tag) = push {
            st.stack = st.stack.push(tag);
        }
        st.body.push(Line::Instr(Instr::new(op, args)));
        Ok(())
    }

    fn dup(&mut self, tag: Tag) -> Result<()> {
        self.emit(Opcode::Dup, vec![Operand::Tag(tag.clone())], 1, Some(tag.clone()))?;
        if self.state.reachable {
            self.state.stack = self.state.stack.push(tag);
        }
        Ok(())
    }

    fn push_literal(&mut self, lit: &Literal, tag: Tag) -> Result<()> {
        self.emit(Opcode::Push, vec![Operand::Tag(tag.clone()), literal_operand(lit)], 0, Some(tag))
    }

    fn unreachable(&mut self) {
        self.state.reachable = false;
    }

    // ==================== Labels ====================

    fn new_label(&mut self, base: &str) -> String {
        let label = format!("{}{}", base, self.state.labels);
        self.state.labels += 1;
        label
    }

    fn record_jump(&mut self, label: &str, stack: ShadowStack) -> Result<()> {
        let from = self.state.block.clone();
        match self.state.jumps.get_mut(label) {
            Some((existing, preds)) => {
                if !existing.same_shape(&stack) {
                    return Err(Error::CodeGen(format!("inconsistent stack at {}", label)));
                }
                preds.push(from);
            }
            None => {
                self.state.jumps.insert(label.to_string(), (stack, vec![from]));
            }
        }
        Ok(())
    }

    /// `br label`
    fn jump(&mut self, label: &str) -> Result<()> {
        if !self.state.reachable {
            return Ok(());
        }
        self.record_jump(label, self.state.stack.clone())?;
        self.emit(Opcode::Br, vec![Operand::Label(label.to_string())], 0, None)?;
        self.unreachable();
        Ok(())
    }

    /// `br if_true, if_false` on the i1 on top of the stack
    fn branch(&mut self, if_true: &str, if_false: &str) -> Result<()> {
        if !self.state.reachable {
            return Ok(());
        }
        let labels = vec![Operand::Label(if_true.to_string()), Operand::Label(if_false.to_string())];
        self.emit(Opcode::Br, labels, 1, None)?;
        let stack = self.state.stack.clone();
        self.record_jump(if_true, stack.clone())?;
        self.record_jump(if_false, stack)?;
        self.unreachable();
        Ok(())
    }

    /// `bf label`: leave when the i1 on top of the stack is false
    fn branch_false(&mut self, label: &str) -> Result<()> {
        if !self.state.reachable {
            return Ok(());
        }
        self.emit(Opcode::Bf, vec![Operand::Label(label.to_string())], 1, None)?;
        self.record_jump(label, self.state.stack.clone())
    }

    /// Start the block `label`; falling into it becomes an explicit jump
    fn place(&mut self, label: &str) -> Result<()> {
        if self.state.reachable {
            self.jump(label)?;
        }
        self.state.body.push(Line::Label(label.to_string()));
        self.state.block = label.to_string();
        match self.state.jumps.get(label) {
            Some((stack, _)) => {
                self.state.stack = stack.clone();
                self.state.reachable = true;
            }
            None => self.state.reachable = false,
        }
        Ok(())
    }

    /// Start a merge block, joining the incoming values of type `ty`
    fn merge(&mut self, label: &str, ty: &Type) -> Result<()> {
        self.place(label)?;
        let preds = self.state.jumps.get(label).map(|(_, p)| p.clone()).unwrap_or_default();
        if preds.len() < 2 || !self.state.reachable {
            return Ok(());
        }
        if let Some(tag) = self.tag(ty)? {
            let mut args = vec![Operand::Tag(tag)];
            args.extend(preds.into_iter().map(Operand::Label));
            self.emit(Opcode::Phi, args, 0, None)?;
        }
        Ok(())
    }

    /// Drop stack entries above `depth`, keeping `carrying` on top
    fn unwind(&mut self, depth: usize, carrying: Option<Tag>) -> Result<()> {
        if !self.state.reachable {
            return Ok(());
        }
        let kept = usize::from(carrying.is_some());
        while self.state.stack.depth() > depth + kept {
            match &carrying {
                Some(top) => {
                    let below = self
                        .state
                        .stack
                        .pop()
                        .and_then(|s| s.top().cloned())
                        .ok_or_else(|| Error::CodeGen("unwinding an empty stack".to_string()))?;
                    self.emit(Opcode::Reduce, vec![Operand::Tag(top.clone()), Operand::Tag(below)], 2, Some(top.clone()))?;
                }
                None => {
                    let top = self
                        .state
                        .stack
                        .top()
                        .cloned()
                        .ok_or_else(|| Error::CodeGen("unwinding an empty stack".to_string()))?;
                    self.emit(Opcode::Pop, vec![Operand::Tag(top)], 1, None)?;
                }
            }
        }
        Ok(())
    }

    fn loop_frame(&self, target: Option<NodeId>) -> Result<LoopFrame> {
        target
            .and_then(|t| self.state.loops.get(&t).cloned())
            .ok_or_else(|| Error::CodeGen("jump without an enclosing loop".to_string()))
    }

    // ==================== Expressions ====================

    /// Emit `expr`, leaving its value (if any) on the stack
    fn gen(&mut self, expr: &Expr) -> Result<()> {
        if !self.state.reachable {
            return Ok(());
        }

        match &expr.kind {
            ExprKind::Block { items, .. } => {
                for item in items {
                    self.gen(item)?;
                }
                Ok(())
            }

            ExprKind::Let { value: Some(value), var: Some(var), .. } => {
                self.gen(value)?;
                let tag = self.value_tag(&self.var_type(*var))?;
                let slot = self.slot(*var)?;
                self.emit(Opcode::Set, vec![Operand::Tag(tag), Operand::Name(slot)], 1, None)
            }
            ExprKind::Let { .. } => Ok(()),

            ExprKind::If { cond, then_branch, else_branch } => {
                let then_label = self.new_label("then");
                let else_label = else_branch.as_ref().map(|_| self.new_label("else"));
                let end = self.new_label("end_if");

                self.gen(cond)?;
                self.branch(&then_label, else_label.as_deref().unwrap_or(&end))?;
                self.place(&then_label)?;
                self.gen(then_branch)?;
                self.jump(&end)?;
                if let (Some(label), Some(e)) = (&else_label, else_branch) {
                    self.place(label)?;
                    self.gen(e)?;
                    self.jump(&end)?;
                }
                self.merge(&end, &expr.ty)
            }

            ExprKind::While { cond, body, else_branch } => {
                let head = self.new_label("while");
                let body_label = self.new_label("do");
                let literal_true = matches!(cond.kind, ExprKind::Const(Literal::Bool(true)));
                let else_label = if else_branch.is_some() || literal_true {
                    Some(self.new_label("else"))
                } else {
                    None
                };
                let end = self.new_label("end_while");

                let frame = LoopFrame {
                    head: head.clone(),
                    body: body_label.clone(),
                    end: end.clone(),
                    stack: self.state.stack.clone(),
                };
                self.state.loops.insert(expr.id, frame);

                self.place(&head)?;
                self.gen(cond)?;
                self.branch(&body_label, else_label.as_deref().unwrap_or(&end))?;
                self.place(&body_label)?;
                self.gen(body)?;
                self.jump(&head)?;
                if let Some(label) = &else_label {
                    self.place(label)?;
                    match else_branch {
                        Some(e) => self.gen(e)?,
                        None => {
                            self.emit(Opcode::Error, Vec::new(), 0, None)?;
                            self.unreachable();
                        }
                    }
                    self.jump(&end)?;
                }
                self.merge(&end, &expr.ty)
            }

            ExprKind::Match { value, arms } => {
                self.gen(value)?;
                let tag = self.value_tag(&value.ty)?;
                let temp = self.temp(tag.clone());
                self.emit(Opcode::Set, vec![Operand::Tag(tag), Operand::Name(temp.clone())], 1, None)?;

                let labels: Vec<String> = (0..=arms.len()).map(|_| self.new_label("arm")).collect();
                let end = self.new_label("end_match");
                let root = vec![Instr::new(Opcode::Addr, vec![Operand::Name(temp)])];
                for (i, arm) in arms.iter().enumerate() {
                    self.place(&labels[i])?;
                    self.test_pattern(&arm.pattern, &root, &labels[i + 1])?;
                    self.gen(&arm.body)?;
                    self.jump(&end)?;
                }
                // No arm matched
                self.place(&labels[arms.len()])?;
                self.emit(Opcode::Error, Vec::new(), 0, None)?;
                self.unreachable();
                self.merge(&end, &expr.ty)
            }

            ExprKind::BinTest { op, lhs, rhs } => {
                let rhs_label = self.new_label("rhs");
                let short = self.new_label("short");
                let end = self.new_label("end_test");

                self.gen(lhs)?;
                match op {
                    TestOp::And => self.branch(&rhs_label, &short)?,
                    TestOp::Or => self.branch(&short, &rhs_label)?,
                }
                self.place(&rhs_label)?;
                self.gen(rhs)?;
                self.jump(&end)?;
                self.place(&short)?;
                self.push_literal(&Literal::Bool(*op == TestOp::Or), Tag::I1)?;
                self.jump(&end)?;
                self.merge(&end, &expr.ty)
            }

            ExprKind::NotTest(inner) => {
                self.gen(inner)?;
                self.emit(Opcode::Not, vec![Operand::Tag(Tag::I1)], 1, Some(Tag::I1))
            }

            ExprKind::Call { args, resolved, .. } | ExprKind::Op { args, resolved, .. } => {
                let args: Vec<&Expr> = args.iter().collect();
                self.gen_call(expr, resolved.as_ref(), &args)
            }
            ExprKind::Method { receiver, args, resolved, .. } => {
                let mut all: Vec<&Expr> = vec![receiver.as_ref()];
                all.extend(args.iter());
                self.gen_call(expr, resolved.as_ref(), &all)
            }
            ExprKind::Cast { value, resolved, .. } => self.gen_call(expr, resolved.as_ref(), &[value.as_ref()]),

            ExprKind::Member { value, index, .. } => {
                let owner = value.ty.value_type();
                self.gen(value)?;
                if value.ty.level() == 0 {
                    // Spill an rvalue aggregate so it can be addressed
                    let tag = self.value_tag(&owner)?;
                    let temp = self.temp(tag.clone());
                    self.emit(Opcode::Set, vec![Operand::Tag(tag), Operand::Name(temp.clone())], 1, None)?;
                    self.emit(Opcode::Addr, vec![Operand::Name(temp)], 0, Some(Tag::Ref))?;
                }
                let field = index.ok_or_else(|| Error::CodeGen("unresolved member".to_string()))?;
                let offset = self.offset_name(&owner, None, field)?;
                self.emit(Opcode::Off, vec![Operand::Name(offset)], 1, Some(Tag::Ref))
            }

            ExprKind::Var { symbol, name } => {
                let sym = (*symbol).ok_or_else(|| Error::CodeGen(format!("unresolved name {}", name)))?;
                match self.table.kind(sym) {
                    SymbolKind::Constant { ty, value } => {
                        let tag = self.value_tag(ty)?;
                        self.push_literal(value, tag)
                    }
                    _ => {
                        let slot = self.slot(sym)?;
                        self.emit(Opcode::Addr, vec![Operand::Name(slot)], 0, Some(Tag::Ref))
                    }
                }
            }

            ExprKind::Const(lit) => {
                let tag = self.value_tag(&expr.ty)?;
                self.push_literal(lit, tag)
            }

            ExprKind::Assn { target, value } => {
                self.gen(target)?;
                self.gen(value)?;
                if !self.state.reachable {
                    return Ok(());
                }
                let tag = self.value_tag(&value.ty)?;
                self.emit(Opcode::Store, vec![Operand::Tag(tag)], 2, None)
            }

            ExprKind::IncAssn { target, value, resolved, .. } => {
                let m = resolved.as_ref().ok_or_else(|| Error::CodeGen("unresolved operator".to_string()))?;
                let tag = self.value_tag(&target.ty.deref_once())?;
                self.gen(target)?;
                self.dup(Tag::Ref)?;
                self.emit(Opcode::Load, vec![Operand::Tag(tag.clone())], 1, Some(tag.clone()))?;
                self.gen(value)?;
                if !self.state.reachable {
                    return Ok(());
                }
                self.apply(m, 2)?;
                self.emit(Opcode::Store, vec![Operand::Tag(tag)], 2, None)
            }

            ExprKind::Return { value, .. } => {
                if let Some(v) = value {
                    self.gen(v)?;
                }
                let ret = self.state.ret.clone();
                self.unwind(0, ret.clone())?;
                let args = ret.map(|t| vec![Operand::Tag(t)]).unwrap_or_default();
                let pops = args.len();
                self.emit(Opcode::Ret, args, pops, None)?;
                self.unreachable();
                Ok(())
            }

            ExprKind::Break { value, target } => {
                let frame = self.loop_frame(*target)?;
                let carrying = match value {
                    Some(v) => {
                        self.gen(v)?;
                        self.tag(&v.ty)?
                    }
                    None => None,
                };
                self.unwind(frame.stack.depth(), carrying)?;
                self.jump(&frame.end)
            }
            ExprKind::Continue { target } => {
                let frame = self.loop_frame(*target)?;
                self.unwind(frame.stack.depth(), None)?;
                self.jump(&frame.head)
            }
            ExprKind::Redo { target } => {
                let frame = self.loop_frame(*target)?;
                self.unwind(frame.stack.depth(), None)?;
                self.jump(&frame.body)
            }

            ExprKind::Noop => Ok(()),
            ExprKind::AddrOf(inner) => self.gen(inner),
            ExprKind::Deref(inner) => {
                self.gen(inner)?;
                let tag = self.value_tag(&expr.ty)?;
                self.emit(Opcode::Load, vec![Operand::Tag(tag.clone())], 1, Some(tag))
            }
            ExprKind::Discard(inner) => {
                self.gen(inner)?;
                if !self.state.reachable {
                    return Ok(());
                }
                match self.tag(&inner.ty)? {
                    Some(tag) => self.emit(Opcode::Pop, vec![Operand::Tag(tag)], 1, None),
                    None => Ok(()),
                }
            }
        }
    }

    // ==================== Calls ====================

    fn gen_call(&mut self, expr: &Expr, m: Option<&Match>, args: &[&Expr]) -> Result<()> {
        let m = m.ok_or_else(|| Error::CodeGen(format!("unresolved {}", expr.kind_name())))?;
        match m.callee {
            Callee::Function(f) => {
                let intrinsic = match self.table.kind(f) {
                    SymbolKind::Function { intrinsic, .. } => *intrinsic,
                    _ => None,
                };
                // Two constant operands use the immediate form
                if let (Some(Intrinsic::Arith(op)), [a, b]) = (intrinsic, args) {
                    if let (ExprKind::Const(x), ExprKind::Const(y)) = (&a.kind, &b.kind) {
                        let opcode = intrinsic_opcode(op)?;
                        let tag = self.value_tag(&m.ret)?;
                        let operands = vec![Operand::Tag(tag.clone()), literal_operand(x), literal_operand(y)];
                        return self.emit(opcode, operands, 0, Some(tag));
                    }
                }
                for arg in args {
                    self.gen(arg)?;
                }
                if !self.state.reachable {
                    return Ok(());
                }
                self.apply(m, args.len())
            }
            Callee::Struct(_) => self.construct(&m.ret, None, args),
            Callee::Variant(v) => {
                let tag = match self.table.kind(v) {
                    SymbolKind::Variant { tag, .. } => *tag,
                    _ => 0,
                };
                self.construct(&m.ret, Some(tag), args)
            }
        }
    }

    /// Emit the operation of a resolved function whose `argc` operands are
    /// already on the stack
    fn apply(&mut self, m: &Match, argc: usize) -> Result<()> {
        let Callee::Function(f) = m.callee else {
            return Err(Error::CodeGen("constructor used as an operator".to_string()));
        };
        let intrinsic = match self.table.kind(f) {
            SymbolKind::Function { intrinsic, .. } => *intrinsic,
            _ => None,
        };
        let ret = self.tag(&m.ret)?;

        let Some(intrinsic) = intrinsic else {
            let callee = self.callee_name(f, m)?;
            return self.emit(Opcode::Call, vec![Operand::Name(callee)], argc, ret);
        };

        let elem = |gen: &mut Self| -> Result<Tag> {
            let ty = m
                .generic_args
                .first()
                .ok_or_else(|| Error::CodeGen("memory intrinsic without element type".to_string()))?;
            gen.value_tag(ty)
        };
        match intrinsic {
            Intrinsic::Arith(op) | Intrinsic::Neg(op) => {
                let tag = self.value_tag(&m.ret)?;
                self.emit(intrinsic_opcode(op)?, vec![Operand::Tag(tag.clone())], argc, Some(tag))
            }
            Intrinsic::Compare(kind, cond) => {
                let operand = m.params.first().cloned().unwrap_or_else(Type::unknown);
                let tag = self.value_tag(&operand)?;
                let opcode = if kind == "fcmp" { Opcode::Fcmp } else { Opcode::Icmp };
                self.emit(opcode, vec![Operand::Cond(cond.to_string()), Operand::Tag(tag)], 2, Some(Tag::I1))
            }
            Intrinsic::Convert(Some(op)) => self.emit(intrinsic_opcode(op)?, Vec::new(), 1, ret),
            Intrinsic::Convert(None) => Ok(()),
            Intrinsic::Index => {
                let tag = elem(self)?;
                self.emit(Opcode::Index, vec![Operand::Tag(tag)], 2, Some(Tag::Ref))
            }
            Intrinsic::Alloc => {
                let tag = elem(self)?;
                self.emit(Opcode::Alloc, vec![Operand::Tag(tag)], 1, Some(Tag::Ref))
            }
            Intrinsic::Dealloc => {
                let tag = elem(self)?;
                self.emit(Opcode::Dealloc, vec![Operand::Tag(tag)], 1, None)
            }
            Intrinsic::Realloc => {
                let tag = elem(self)?;
                self.emit(Opcode::Realloc, vec![Operand::Tag(tag)], 2, Some(Tag::Ref))
            }
        }
    }

    /// Build a struct or variant in a temporary and load it
    fn construct(&mut self, ty: &Type, variant: Option<u32>, args: &[&Expr]) -> Result<()> {
        let ty = ty.resolve(&self.state.env);
        let tag = self.value_tag(&ty)?;
        let size = self.size_name(&ty)?;
        let temp = self.temp(tag.clone());

        if let Some(n) = variant {
            self.emit(Opcode::Addr, vec![Operand::Name(temp.clone())], 0, Some(Tag::Ref))?;
            self.emit(Opcode::TagOp, vec![Operand::Name(size), Operand::Int(i64::from(n))], 1, None)?;
        }
        for (i, arg) in args.iter().enumerate() {
            let offset = self.offset_name(&ty, variant, i)?;
            self.emit(Opcode::Addr, vec![Operand::Name(temp.clone())], 0, Some(Tag::Ref))?;
            self.emit(Opcode::Off, vec![Operand::Name(offset)], 1, Some(Tag::Ref))?;
            self.gen(arg)?;
            if !self.state.reachable {
                return Ok(());
            }
            let field = self.value_tag(&arg.ty)?;
            self.emit(Opcode::Store, vec![Operand::Tag(field)], 2, None)?;
        }
        self.emit(Opcode::Addr, vec![Operand::Name(temp)], 0, Some(Tag::Ref))?;
        self.emit(Opcode::Load, vec![Operand::Tag(tag.clone())], 1, Some(tag))
    }

    // ==================== Patterns ====================

    /// Emit the address computation `path`
    fn emit_path(&mut self, path: &[Instr]) -> Result<()> {
        for instr in path {
            let pops = usize::from(instr.op == Opcode::Off);
            self.emit(instr.op, instr.args.clone(), pops, Some(Tag::Ref))?;
        }
        Ok(())
    }

    /// Test the value at `path` against `pattern`, branching to `fail` on a
    /// mismatch and binding variables on the way
    fn test_pattern(&mut self, pattern: &Pattern, path: &[Instr], fail: &str) -> Result<()> {
        match &pattern.kind {
            PatternKind::Any => Ok(()),

            PatternKind::Const(lit) => {
                let tag = self.value_tag(&pattern.ty)?;
                self.emit_path(path)?;
                self.emit(Opcode::Load, vec![Operand::Tag(tag.clone())], 1, Some(tag.clone()))?;
                self.push_literal(lit, tag.clone())?;
                let (opcode, cond) = if tag == Tag::Float { (Opcode::Fcmp, "oeq") } else { (Opcode::Icmp, "eq") };
                self.emit(opcode, vec![Operand::Cond(cond.to_string()), Operand::Tag(tag)], 2, Some(Tag::I1))?;
                self.branch_false(fail)
            }

            PatternKind::Var { var: Some(var), .. } => {
                let tag = self.value_tag(&pattern.ty)?;
                let slot = self.slot(*var)?;
                self.emit_path(path)?;
                self.emit(Opcode::Load, vec![Operand::Tag(tag.clone())], 1, Some(tag.clone()))?;
                self.emit(Opcode::Set, vec![Operand::Tag(tag), Operand::Name(slot)], 1, None)
            }
            PatternKind::Var { name, .. } => Err(Error::CodeGen(format!("unbound pattern variable {}", name.name))),

            PatternKind::Call { callee: Some(callee), args, .. } => {
                let variant = match self.table.kind(*callee) {
                    SymbolKind::Variant { tag, .. } => Some(*tag),
                    _ => None,
                };
                if let Some(n) = variant {
                    let size = self.size_name(&pattern.ty)?;
                    self.emit_path(path)?;
                    self.emit(Opcode::Disc, vec![Operand::Name(size)], 1, Some(Tag::I32))?;
                    self.push_literal(&Literal::Int(i64::from(n)), Tag::I32)?;
                    self.emit(Opcode::Icmp, vec![Operand::Cond("eq".to_string()), Operand::Tag(Tag::I32)], 2, Some(Tag::I1))?;
                    self.branch_false(fail)?;
                }
                for (i, arg) in args.iter().enumerate() {
                    if !arg.is_refutable_or_binding() {
                        continue;
                    }
                    let offset = self.offset_name(&pattern.ty, variant, i)?;
                    let mut sub = path.to_vec();
                    sub.push(Instr::new(Opcode::Off, vec![Operand::Name(offset)]));
                    self.test_pattern(arg, &sub, fail)?;
                }
                Ok(())
            }
            PatternKind::Call { name, .. } => Err(Error::CodeGen(format!("unresolved pattern {}", name.name))),
        }
    }
}

fn prim_tag(prim: Primitive) -> Tag {
    match prim {
        Primitive::Int => Tag::I32,
        Primitive::Float => Tag::Float,
        Primitive::Bool => Tag::I1,
    }
}

fn literal_operand(lit: &Literal) -> Operand {
    match lit {
        Literal::Int(n) => Operand::Int(*n),
        Literal::Float(x) => Operand::Float(*x),
        Literal::Bool(b) => Operand::Int(i64::from(*b)),
    }
}

fn intrinsic_opcode(name: &str) -> Result<Opcode> {
    Opcode::from_intrinsic(name).ok_or_else(|| Error::CodeGen(format!("unknown intrinsic {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_source;
    use crate::sema::analyze;
    use pretty_assertions::assert_eq;

    fn lower(source: &str) -> IrModule {
        let mut table = SymbolTable::new();
        let mut file = parse_source(source).unwrap();
        let module = analyze(&mut table, "main", &mut file).unwrap();
        generate(&table, module, &file).unwrap()
    }

    fn code(module: &IrModule, contract: &str) -> Vec<String> {
        module
            .function(contract)
            .unwrap_or_else(|| panic!("no function {}", contract))
            .instructions()
            .map(|i| i.to_string())
            .collect()
    }

    fn labels(module: &IrModule, contract: &str) -> Vec<String> {
        module
            .function(contract)
            .unwrap()
            .body
            .iter()
            .filter_map(|l| match l {
                Line::Label(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_constant_addition() {
        let module = lower("def main() Int { 1 + 2 }");
        assert_eq!(code(&module, "main"), vec!["add i32 1, 2", "ret i32"]);
        assert_eq!(module.function("main").unwrap().ret, Some(Tag::I32));
    }

    #[test]
    fn test_generic_instantiation() {
        let module = lower("def id{T}(x T) T { x }\ndef main() Int { id{Int}(7) }");
        assert_eq!(code(&module, "main"), vec!["push i32 7", "call f0", "ret i32"]);
        assert_eq!(
            module.function("main").unwrap().directives,
            vec![Directive::Function {
                name: "f0".into(),
                module: "main".into(),
                contract: "id`Int".into()
            }]
        );

        let id = module.function("id`Int").unwrap();
        assert_eq!(code(&module, "id`Int"), vec!["addr x_p0", "load i32", "ret i32"]);
        assert_eq!(id.slots, vec![Slot { kind: SlotKind::Param, name: "x_p0".into(), tag: Tag::I32 }]);
        // The generic definition itself is never emitted
        assert_eq!(module.functions.len(), 2);
    }

    #[test]
    fn test_if_merges_with_phi() {
        let module = lower("def main() Int { if true then 1 else 2 }");
        assert_eq!(
            code(&module, "main"),
            vec![
                "push i1 1",
                "br then0, else1",
                "push i32 1",
                "br end_if2",
                "push i32 2",
                "br end_if2",
                "phi i32 then0, else1",
                "ret i32",
            ]
        );
        assert_eq!(labels(&module, "main"), vec!["entry", "then0", "else1", "end_if2"]);
    }

    #[test]
    fn test_reference_loaded_before_return() {
        let module = lower("def main() Int { let x = 3; let p &Int = &x; p }");
        assert_eq!(
            code(&module, "main"),
            vec![
                "push i32 3",
                "set i32 x_l0",
                "addr x_l0",
                "set & p_l1",
                "addr p_l1",
                "load &",
                "load i32",
                "ret i32",
            ]
        );
    }

    #[test]
    fn test_break_with_value() {
        let module = lower("def main() Int { while true do { break 5 } }");
        assert_eq!(
            code(&module, "main"),
            vec![
                "br while0",
                "push i1 1",
                "br do1, else2",
                "push i32 5",
                "br end_while3",
                "error",
                "ret i32",
            ]
        );
    }

    #[test]
    fn test_break_unwinds_operands() {
        let module = lower("def main() Int { let i = 1; while true do { i + (break 5) } }");
        let code = code(&module, "main");
        let reduce = code.iter().position(|l| l == "reduce i32 i32").expect("no reduce");
        assert_eq!(code[reduce + 1], "br end_while3");
    }

    #[test]
    fn test_continue_pops_and_returns_to_the_condition() {
        let module = lower("def main() { let i = 0; while i < 10 do { i += 1; i + (continue) } }");
        assert_eq!(
            code(&module, "main"),
            vec![
                "push i32 0",
                "set i32 i_l0",
                "br while0",
                "addr i_l0",
                "load i32",
                "push i32 10",
                "icmp slt i32",
                "br do1, end_while2",
                "addr i_l0",
                "dup &",
                "load i32",
                "push i32 1",
                "add i32",
                "store i32",
                "addr i_l0",
                "load i32",
                "pop i32",
                "br while0",
                "ret",
            ]
        );
    }

    #[test]
    fn test_redo_skips_the_condition() {
        let module = lower("def main() { let i = 0; while i < 10 do { i += 1; i + (redo) } }");
        let code = code(&module, "main");
        assert_eq!(code[code.len() - 4..].to_vec(), vec!["load i32", "pop i32", "br do1", "ret"]);
        assert_eq!(labels(&module, "main"), vec!["entry", "while0", "do1", "end_while2"]);
    }

    #[test]
    fn test_return_from_argument_position() {
        let module = lower("def f(a Int, b Int) Int { a }\ndef main() Int { f(1, return 2) }");
        assert_eq!(code(&module, "main"), vec!["push i32 1", "push i32 2", "reduce i32 i32", "ret i32"]);
        // The call itself is never reached
        assert!(module.function("main").unwrap().directives.is_empty());
    }

    #[test]
    fn test_recursive_generic_emitted_once() {
        let module = lower(
            "def count{T}(a &[T], n Int) Int { if n == 0 then 0 else 1 + count(a, n - 1) }\n\
             def total(buf &[Int]) Int { count(buf, 4) }",
        );
        let count = module.function("count`Int").unwrap();
        assert_eq!(
            count.directives,
            vec![Directive::Function { name: "f0".into(), module: "main".into(), contract: "count`Int".into() }]
        );
        assert!(code(&module, "count`Int").contains(&"call f0".to_string()));
        assert_eq!(module.functions.len(), 2);
    }

    #[test]
    fn test_loop_with_condition() {
        let module = lower("def main() { let i = 0; while i < 10 do i += 1 }");
        assert_eq!(
            code(&module, "main"),
            vec![
                "push i32 0",
                "set i32 i_l0",
                "br while0",
                "addr i_l0",
                "load i32",
                "push i32 10",
                "icmp slt i32",
                "br do1, end_while2",
                "addr i_l0",
                "dup &",
                "load i32",
                "push i32 1",
                "add i32",
                "store i32",
                "br while0",
                "ret",
            ]
        );
    }

    #[test]
    fn test_struct_construction_and_member() {
        let module = lower("struct P { x Int, y Int }\ndef main() Int { let p = P(1, 2); p.y }");
        assert_eq!(
            code(&module, "main"),
            vec![
                "addr t0",
                "off o0",
                "push i32 1",
                "store i32",
                "addr t0",
                "off o1",
                "push i32 2",
                "store i32",
                "addr t0",
                "load z0",
                "set z0 p_l0",
                "addr p_l0",
                "off o1",
                "load i32",
                "ret i32",
            ]
        );
        assert_eq!(
            module.types,
            vec![TypeDecl {
                spelling: "P".into(),
                kind: TypeDeclKind::Struct { fields: vec![TypeRef::Tag(Tag::I32), TypeRef::Tag(Tag::I32)] },
            }]
        );
    }

    #[test]
    fn test_match_on_variant() {
        let source = "enum Opt { None, Some(Int) }\n\
                      def main() Int { match Some(4) { Some(v) => v, None => 0 } }";
        let module = lower(source);
        let code = code(&module, "main");
        for expected in ["tag z0 1", "set z0 t1", "disc z0", "icmp eq i32", "bf arm1", "set i32 v_l0", "error"] {
            assert!(code.iter().any(|l| l == expected), "missing {}", expected);
        }
        assert_eq!(
            module.types[0].kind,
            TypeDeclKind::Enum { variants: vec![vec![], vec![TypeRef::Tag(Tag::I32)]] }
        );
    }

    #[test]
    fn test_short_circuit() {
        let module = lower("def main() Bool { true and false }");
        assert_eq!(
            code(&module, "main"),
            vec![
                "push i1 1",
                "br rhs0, short1",
                "push i1 0",
                "br end_test2",
                "push i1 0",
                "br end_test2",
                "phi i1 rhs0, short1",
                "ret i1",
            ]
        );
    }

    #[test]
    fn test_overloaded_contracts() {
        let module = lower("def f(x Int) Int { x }\ndef f(x Float) Float { x }\ndef main() Int { f(1) }");
        assert!(module.function("f(Int)").is_some());
        assert!(module.function("f(Float)").is_some());
        assert_eq!(
            module.function("main").unwrap().directives,
            vec![Directive::Function {
                name: "f0".into(),
                module: "main".into(),
                contract: "f(Int)".into()
            }]
        );
    }

    #[test]
    fn test_discarded_statement_and_void_return() {
        let module = lower("def main() { 1 + 2; return }");
        assert_eq!(code(&module, "main"), vec!["add i32 1, 2", "pop i32", "ret"]);
    }
}
