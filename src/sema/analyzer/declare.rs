//! Declaration pass: symbols for structs, enums, variants and functions

use super::Analyzer;
use crate::frontend::ast::{File, Ident, Item};
use crate::sema::symbols::{Field, SymbolId, SymbolKind};
use crate::types::Type;
use crate::utils::{Error, Result};

impl<'a> Analyzer<'a> {
    /// Create every top-level symbol first so declarations may refer to
    /// each other in any order, then resolve their signatures.
    pub(super) fn declare(&mut self, file: &mut File) -> Result<()> {
        for item in &mut file.items {
            match item {
                Item::Struct(s) => {
                    let kind = SymbolKind::Struct { generics: Vec::new(), fields: Vec::new(), primitive: None };
                    let sym = self.table.define(&s.name.name, self.module, s.name.span, kind)?;
                    self.declare_generics(sym, &s.generics)?;
                    s.symbol = Some(sym);
                }
                Item::Enum(e) => {
                    let kind = SymbolKind::Enum { generics: Vec::new(), variants: Vec::new() };
                    let sym = self.table.define(&e.name.name, self.module, e.name.span, kind)?;
                    self.declare_generics(sym, &e.generics)?;

                    let mut variants = Vec::with_capacity(e.variants.len());
                    for (tag, v) in e.variants.iter().enumerate() {
                        let variant = self.table.add(
                            &v.name.name,
                            Some(sym),
                            v.name.span,
                            SymbolKind::Variant { tag: tag as u32, fields: Vec::new() },
                        );
                        self.table.declare(sym, &v.name.name, variant, v.name.span)?;
                        // Variants are also visible unqualified
                        self.table.declare(self.module, &v.name.name, variant, v.name.span)?;
                        variants.push(variant);
                    }
                    if let SymbolKind::Enum { variants: vs, .. } = &mut self.table.get_mut(sym).kind {
                        *vs = variants;
                    }
                    e.symbol = Some(sym);
                }
                Item::Def(def) => {
                    let kind = SymbolKind::Function {
                        generics: Vec::new(),
                        params: Vec::new(),
                        ret: Type::void(),
                        locals: Vec::new(),
                        intrinsic: None,
                        def: Some(def.id),
                    };
                    let sym = self.table.add_function(self.module, &def.name.name, def.name.span, kind)?;
                    self.declare_generics(sym, &def.generics)?;
                    def.symbol = Some(sym);
                }
                Item::Import(_) => {}
            }
        }

        for item in &file.items {
            match item {
                Item::Struct(s) => {
                    let Some(sym) = s.symbol else { continue };
                    let mut fields: Vec<Field> = Vec::with_capacity(s.fields.len());
                    for (index, f) in s.fields.iter().enumerate() {
                        if fields.iter().any(|other| other.name == f.name.name) {
                            return Err(Error::DuplicateDefinition { name: f.name.name.clone(), span: f.name.span });
                        }
                        let ty = self.resolve_type(sym, &f.ty)?;
                        self.require_sized(&ty, f.ty.span)?;
                        fields.push(Field { name: f.name.name.clone(), ty, index });
                    }
                    if let SymbolKind::Struct { fields: fs, .. } = &mut self.table.get_mut(sym).kind {
                        *fs = fields;
                    }
                }
                Item::Enum(e) => {
                    let Some(sym) = e.symbol else { continue };
                    for v in &e.variants {
                        let types = v
                            .fields
                            .iter()
                            .map(|t| {
                                let ty = self.resolve_type(sym, t)?;
                                self.require_sized(&ty, t.span)?;
                                Ok(ty)
                            })
                            .collect::<Result<Vec<_>>>()?;
                        let Some(variant) = self.table.get(sym).member(&v.name.name) else { continue };
                        if let SymbolKind::Variant { fields, .. } = &mut self.table.get_mut(variant).kind {
                            *fields = types;
                        }
                    }
                }
                Item::Def(def) => {
                    let Some(func) = def.symbol else { continue };
                    let mut params = Vec::with_capacity(def.params.len());
                    for (index, p) in def.params.iter().enumerate() {
                        let ty = self.resolve_type(func, &p.ty)?;
                        self.require_sized(&ty, p.ty.span)?;
                        let kind = SymbolKind::Variable { ty, is_arg: true, index };
                        params.push(self.table.define(&p.name.name, func, p.name.span, kind)?);
                    }
                    let ret = match &def.ret {
                        Some(t) => {
                            let ty = self.resolve_type(func, t)?;
                            self.require_sized(&ty, t.span)?;
                            ty
                        }
                        None => Type::void(),
                    };
                    if let SymbolKind::Function { params: ps, ret: r, .. } = &mut self.table.get_mut(func).kind {
                        *ps = params;
                        *r = ret;
                    }
                }
                Item::Import(_) => {}
            }
        }
        Ok(())
    }

    fn declare_generics(&mut self, owner: SymbolId, generics: &[Ident]) -> Result<()> {
        let mut syms = Vec::with_capacity(generics.len());
        for g in generics {
            syms.push(self.table.define(&g.name, owner, g.span, SymbolKind::Generic)?);
        }
        match &mut self.table.get_mut(owner).kind {
            SymbolKind::Struct { generics, .. }
            | SymbolKind::Enum { generics, .. }
            | SymbolKind::Function { generics, .. } => *generics = syms,
            _ => {}
        }
        Ok(())
    }
}
