#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use quill_ast::{
    AssertStmt, AssignStmt, BinOp, Block, CellDef, ExpansionStmt, ExpansionVar, Expr, ExprKind,
    Ident, IfStmt, Program, RecordFieldDef, ReturnStmt, Span, Spanned, Stmt, TypeArg, TypeRef,
    TypeRefKind, UnaryOp, ValDecl, WhileStmt,
};
use tracing::{debug, trace};

use crate::actions::{
    Annotation, CellParam, CellSig, DeclConsumer, DeclContext, DeclEvent, DeclKind, RecordField,
    RecordInfo, SemaActions, Substituted, TemplateKind,
};
use crate::config::CheckerConfig;
use crate::const_eval::{self, ConstEnv, ConstValue};
use crate::error::{ErrorKind, SemanticError};
use crate::expansion::ExpansionHeading;
use crate::program::CheckedProgram;
use crate::template::{
    InstantiationFrame, InstantiationKind, InstantiationStack, LocalInstantiationScope,
    MultiLevelTemplateArgs, ScopeMark, Substituter, TemplateArg, TemplateParamDecl,
    TemplateParamKind, TemplateParamList, mangle,
};
use crate::types::{ArrayLen, Type};

const BUILTIN_CELLS: &[&str] = &["print", "len"];

#[derive(Clone, Debug)]
enum AliasEntry {
    Mono(Type),
    Generic {
        params: TemplateParamList,
        target: TypeRef,
    },
}

#[derive(Clone, Debug)]
struct GenericCell {
    /// The definition as written until its template has been checked, then the
    /// elaborated template (expansion depths frozen).
    def: CellDef,
    params: TemplateParamList,
    elaborated: bool,
}

#[derive(Clone, Debug)]
struct ValInfo {
    ty: Type,
    mutable: bool,
}

/// Scope state swapped out while a cell is checked on its own.
struct SavedContext {
    scopes: Vec<HashMap<String, ValInfo>>,
    type_scopes: Vec<HashMap<String, String>>,
    template_scopes: Vec<TemplateParamList>,
    loop_depth: u32,
    ret_types: Vec<Type>,
    current_cell: Option<String>,
    local_scopes: Vec<LocalInstantiationScope>,
}

pub struct Checker {
    pub(crate) config: CheckerConfig,
    traits: HashSet<String>,
    aliases: HashMap<String, AliasEntry>,
    /// Keyed by canonical name.
    records: HashMap<String, RecordInfo>,
    /// Written record name -> canonical name, innermost scope last.
    type_scopes: Vec<HashMap<String, String>>,
    /// Concrete cells, including generic instantiations under their mangled names.
    cells: HashMap<String, CellSig>,
    generics: HashMap<String, GenericCell>,
    elaborating: HashSet<String>,
    scopes: Vec<HashMap<String, ValInfo>>,
    pub(crate) template_scopes: Vec<TemplateParamList>,
    pub(crate) loop_depth: u32,
    ret_types: Vec<Type>,
    current_cell: Option<String>,
    inst_stack: InstantiationStack,
    local_scopes: Vec<LocalInstantiationScope>,
    instantiations: Vec<CellDef>,
    local_record_seq: u32,
    consumers: Vec<Box<dyn DeclConsumer>>,
    diagnostics: Vec<SemanticError>,
}

impl Default for Checker {
    fn default() -> Self {
        Self::new()
    }
}

impl Checker {
    pub fn new() -> Self {
        Self::with_config(CheckerConfig::default())
    }

    pub fn with_config(config: CheckerConfig) -> Self {
        let inst_stack = InstantiationStack::new(config.max_instantiation_depth);
        Self {
            config,
            traits: HashSet::new(),
            aliases: HashMap::new(),
            records: HashMap::new(),
            type_scopes: vec![HashMap::new()],
            cells: HashMap::new(),
            generics: HashMap::new(),
            elaborating: HashSet::new(),
            scopes: vec![HashMap::new()],
            template_scopes: Vec::new(),
            loop_depth: 0,
            ret_types: Vec::new(),
            current_cell: None,
            inst_stack,
            local_scopes: Vec::new(),
            instantiations: Vec::new(),
            local_record_seq: 0,
            consumers: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Register a consumer for every declaration the checker introduces.
    pub fn add_consumer(&mut self, consumer: Box<dyn DeclConsumer>) {
        self.consumers.push(consumer);
    }

    /// Every error collected by the last [`Checker::check_program`], in source order.
    pub fn diagnostics(&self) -> &[SemanticError] {
        &self.diagnostics
    }

    fn report(&mut self, err: SemanticError) {
        debug!(kind = err.kind.as_str(), message = %err.message, "semantic error");
        self.diagnostics.push(err);
    }

    pub fn check_program(&mut self, program: &Program) -> Result<CheckedProgram, SemanticError> {
        self.diagnostics.clear();

        // First pass: names of traits and records, so declarations may refer
        // to records declared later.
        for stmt in &program.stmts {
            let res = match stmt {
                Stmt::TraitDef(t) => self.declare_trait(&t.name),
                Stmt::RecordDef(r) => self.declare_global_record(&r.name),
                Stmt::TypeAlias(_) | Stmt::CellDef(_) => Ok(()),
                other => Err(SemanticError::type_error(
                    "only declarations are allowed at top level",
                    other.span(),
                )),
            };
            if let Err(e) = res {
                self.report(e);
            }
        }

        // Second pass: record fields, aliases, and cell signatures.
        for stmt in &program.stmts {
            let res = match stmt {
                Stmt::RecordDef(r) => self
                    .resolve_record_fields(&r.name, &r.fields)
                    .map(|fields| self.insert_record(r.name.node.clone(), fields)),
                Stmt::TypeAlias(a) => self.declare_alias(a),
                Stmt::CellDef(c) => self.declare_cell(c),
                _ => Ok(()),
            };
            if let Err(e) = res {
                self.report(e);
            }
        }

        // Generic templates before concrete cells: instantiation substitutes
        // the elaborated template.
        for stmt in &program.stmts {
            if let Stmt::CellDef(c) = stmt {
                if c.is_generic() {
                    if let Err(e) = self.ensure_template_elaborated(&c.name.node) {
                        self.report(e);
                    }
                }
            }
        }

        let mut stmts = Vec::with_capacity(program.stmts.len());
        for stmt in &program.stmts {
            match stmt {
                Stmt::CellDef(c) if c.is_generic() => {
                    let def = self
                        .generics
                        .get(&c.name.node)
                        .map(|g| g.def.clone())
                        .unwrap_or_else(|| c.clone());
                    stmts.push(Stmt::CellDef(def));
                }
                Stmt::CellDef(c) => match self.check_concrete_cell(c) {
                    Ok(def) => stmts.push(Stmt::CellDef(def)),
                    Err(e) => {
                        self.report(e);
                        stmts.push(stmt.clone());
                    }
                },
                _ => stmts.push(stmt.clone()),
            }
        }

        if let Some(first) = self.diagnostics.first() {
            return Err(first.clone());
        }
        Ok(CheckedProgram {
            program: Program { stmts },
            instantiations: std::mem::take(&mut self.instantiations),
        })
    }

    fn declare_trait(&mut self, name: &Ident) -> Result<(), SemanticError> {
        if !self.traits.insert(name.node.clone()) {
            return Err(SemanticError::name_error(
                format!("trait '{}' already defined", name.node),
                name.span,
            ));
        }
        Ok(())
    }

    fn declare_global_record(&mut self, name: &Ident) -> Result<(), SemanticError> {
        if self.records.contains_key(&name.node) || self.aliases.contains_key(&name.node) {
            return Err(SemanticError::name_error(
                format!("type '{}' already defined", name.node),
                name.span,
            ));
        }
        self.insert_record(name.node.clone(), Vec::new());
        if let Some(globals) = self.type_scopes.first_mut() {
            globals.insert(name.node.clone(), name.node.clone());
        }
        Ok(())
    }

    fn insert_record(&mut self, canonical: String, fields: Vec<RecordField>) {
        self.records.insert(
            canonical.clone(),
            RecordInfo {
                name: canonical,
                fields,
            },
        );
    }

    fn declare_alias(&mut self, alias: &quill_ast::TypeAlias) -> Result<(), SemanticError> {
        if self.aliases.contains_key(&alias.name.node) || self.records.contains_key(&alias.name.node)
        {
            return Err(SemanticError::name_error(
                format!("type '{}' already defined", alias.name.node),
                alias.name.span,
            ));
        }
        let entry = if alias.params.is_empty() {
            AliasEntry::Mono(self.resolve_type_ref(&alias.target)?)
        } else {
            AliasEntry::Generic {
                params: self.lower_template_params(0, &alias.params)?,
                target: alias.target.clone(),
            }
        };
        self.aliases.insert(alias.name.node.clone(), entry);
        Ok(())
    }

    fn declare_cell(&mut self, cell: &CellDef) -> Result<(), SemanticError> {
        let name = &cell.name.node;
        if BUILTIN_CELLS.contains(&name.as_str()) {
            return Err(SemanticError::name_error(
                format!("cell name '{name}' is reserved for a builtin"),
                cell.name.span,
            ));
        }
        if self.cells.contains_key(name) || self.generics.contains_key(name) {
            return Err(SemanticError::name_error(
                format!("cell '{name}' already defined"),
                cell.name.span,
            ));
        }
        if cell.is_generic() {
            let params = self.lower_template_params(0, &cell.params)?;
            self.generics.insert(
                name.clone(),
                GenericCell {
                    def: cell.clone(),
                    params,
                    elaborated: false,
                },
            );
        } else {
            let sig = self.signature_from_cell(cell)?;
            self.cells.insert(name.clone(), sig);
        }
        Ok(())
    }

    fn lower_template_params(
        &self,
        depth: u32,
        params: &[quill_ast::TemplateParam],
    ) -> Result<TemplateParamList, SemanticError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(params.len());
        for p in params {
            if !seen.insert(p.name.node.clone()) {
                return Err(SemanticError::name_error(
                    format!("duplicate template parameter '{}'", p.name.node),
                    p.name.span,
                ));
            }
            let kind = match &p.kind {
                quill_ast::TemplateParamKind::Type { bound } => {
                    if let Some(b) = bound {
                        if !self.traits.contains(&b.node) {
                            return Err(SemanticError::name_error(
                                format!("unknown trait '{}' in template parameter constraint", b.node),
                                b.span,
                            ));
                        }
                    }
                    TemplateParamKind::Type {
                        bound: bound.as_ref().map(|b| b.node.clone()),
                    }
                }
                quill_ast::TemplateParamKind::Const { ty } => {
                    let is_int = matches!(
                        &ty.kind,
                        TypeRefKind::Named { name, args } if name.node == "int" && args.is_empty()
                    );
                    if !is_int {
                        return Err(SemanticError::type_error(
                            "const template parameters must have type int",
                            ty.span,
                        ));
                    }
                    TemplateParamKind::Const
                }
            };
            out.push(TemplateParamDecl {
                name: p.name.node.clone(),
                kind,
            });
        }
        Ok(TemplateParamList { depth, params: out })
    }

    fn signature_from_cell(&mut self, cell: &CellDef) -> Result<CellSig, SemanticError> {
        let mut params = Vec::with_capacity(cell.args.len());
        for p in &cell.args {
            params.push(CellParam {
                name: p.name.node.clone(),
                ty: self.resolve_type_ref(&p.ty)?,
                mutable: p.mutable,
            });
        }
        let ret = match &cell.ret {
            Some(t) => self.resolve_type_ref(t)?,
            None => Type::Unit,
        };
        Ok(CellSig { params, ret })
    }

    // ----- contexts and scopes -----

    fn enter_fresh_context(&mut self) -> SavedContext {
        let globals = self.type_scopes.first().cloned().unwrap_or_default();
        SavedContext {
            scopes: std::mem::replace(&mut self.scopes, vec![HashMap::new()]),
            type_scopes: std::mem::replace(&mut self.type_scopes, vec![globals]),
            template_scopes: std::mem::take(&mut self.template_scopes),
            loop_depth: std::mem::replace(&mut self.loop_depth, 0),
            ret_types: std::mem::take(&mut self.ret_types),
            current_cell: self.current_cell.take(),
            local_scopes: std::mem::take(&mut self.local_scopes),
        }
    }

    fn leave_fresh_context(&mut self, saved: SavedContext) {
        self.scopes = saved.scopes;
        self.type_scopes = saved.type_scopes;
        self.template_scopes = saved.template_scopes;
        self.loop_depth = saved.loop_depth;
        self.ret_types = saved.ret_types;
        self.current_cell = saved.current_cell;
        self.local_scopes = saved.local_scopes;
    }

    /// Run `f` as if at top level: no enclosing locals, loops, or templates.
    fn with_fresh_context<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, SemanticError>,
    ) -> Result<T, SemanticError> {
        let saved = self.enter_fresh_context();
        let result = f(self);
        self.leave_fresh_context(saved);
        result
    }

    pub(crate) fn mark(&self) -> ScopeMark {
        ScopeMark {
            values: self.scopes.len(),
            types: self.type_scopes.len(),
            templates: self.template_scopes.len(),
            loop_depth: self.loop_depth,
        }
    }

    pub(crate) fn restore(&mut self, mark: ScopeMark) {
        self.scopes.truncate(mark.values);
        self.type_scopes.truncate(mark.types);
        self.template_scopes.truncate(mark.templates);
        self.loop_depth = mark.loop_depth;
    }

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
        self.type_scopes.push(HashMap::new());
    }

    fn enter_local_instantiation_scope(&mut self) {
        let mark = self.mark();
        self.push_scope();
        self.local_scopes.push(LocalInstantiationScope::new(mark));
    }

    fn exit_local_instantiation_scope(&mut self) -> Option<LocalInstantiationScope> {
        let scope = self.local_scopes.pop()?;
        self.restore(scope.mark);
        Some(scope)
    }

    fn template_param(&self, name: &str) -> Option<&TemplateParamDecl> {
        self.template_scopes.iter().rev().find_map(|l| l.find(name))
    }

    pub(crate) fn define_val(
        &mut self,
        name: &Ident,
        ty: Type,
        mutable: bool,
    ) -> Result<(), SemanticError> {
        if self.template_param(&name.node).is_some() {
            return Err(SemanticError::name_error(
                format!("declaration of '{}' shadows a template parameter", name.node),
                name.span,
            ));
        }
        let Some(scope) = self.scopes.last_mut() else {
            return Err(SemanticError::name_error("no scope to declare in", name.span));
        };
        if scope.contains_key(&name.node) {
            return Err(SemanticError::name_error(
                format!("val '{}' already defined in this scope", name.node),
                name.span,
            ));
        }
        scope.insert(name.node.clone(), ValInfo { ty, mutable });
        if let Some(local) = self.local_scopes.last_mut() {
            local.record(&name.node);
        }
        Ok(())
    }

    fn lookup_val(&self, name: &str) -> Option<&ValInfo> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn lookup_record_name(&self, name: &str) -> Option<String> {
        if let Some(canonical) = self.type_scopes.iter().rev().find_map(|s| s.get(name)) {
            return Some(canonical.clone());
        }
        // Substituted local record types are spelled canonically.
        (name.contains('\'') && self.records.contains_key(name)).then(|| name.to_string())
    }

    // ----- types -----

    pub(crate) fn resolve_type_ref(&mut self, ty: &TypeRef) -> Result<Type, SemanticError> {
        match &ty.kind {
            TypeRefKind::Array { elem, len } => {
                let elem = self.resolve_type_ref(elem)?;
                let len = match const_eval::eval(len, self)? {
                    ConstValue::Int(n) => ArrayLen::Known(u64::try_from(n).map_err(|_| {
                        SemanticError::type_error("array length must not be negative", len.span)
                    })?),
                    ConstValue::Dependent => ArrayLen::Dependent,
                    ConstValue::Bool(_) => {
                        return Err(SemanticError::type_error(
                            "array length must be an integer",
                            len.span,
                        ));
                    }
                };
                Ok(Type::Array {
                    elem: Box::new(elem),
                    len,
                })
            }
            TypeRefKind::Named { name, args } => self.resolve_named_type(name, args),
        }
    }

    fn resolve_named_type(&mut self, name: &Ident, args: &[TypeArg]) -> Result<Type, SemanticError> {
        let builtin = match name.node.as_str() {
            "int" => Some(Type::Int),
            "bool" => Some(Type::Bool),
            "char" => Some(Type::Char),
            "String" => Some(Type::String),
            "Unit" => Some(Type::Unit),
            _ => None,
        };
        let no_args = |what: &str| -> Result<(), SemanticError> {
            if args.is_empty() {
                Ok(())
            } else {
                Err(SemanticError::type_error(
                    format!("{what} '{}' takes no template arguments", name.node),
                    name.span,
                ))
            }
        };
        if let Some(t) = builtin {
            no_args("type")?;
            return Ok(t);
        }
        if let Some(p) = self.template_param(&name.node) {
            return match p.kind {
                TemplateParamKind::Type { .. } => {
                    no_args("type parameter")?;
                    Ok(Type::Param(name.node.clone()))
                }
                TemplateParamKind::Const => Err(SemanticError::type_error(
                    format!("'{}' is a value parameter, not a type", name.node),
                    name.span,
                )),
            };
        }
        if let Some(canonical) = self.lookup_record_name(&name.node) {
            no_args("record")?;
            return Ok(Type::Record(canonical));
        }
        match self.aliases.get(&name.node).cloned() {
            Some(AliasEntry::Mono(t)) => {
                no_args("type alias")?;
                Ok(t)
            }
            Some(AliasEntry::Generic { params, .. }) => {
                if args.len() != params.params.len() {
                    return Err(SemanticError::type_error(
                        format!(
                            "type alias '{}' expects {} template arguments, found {}",
                            name.node,
                            params.params.len(),
                            args.len()
                        ),
                        name.span,
                    ));
                }
                match self.resolve_template_args(&name.node, &params, args)? {
                    Some(resolved) => {
                        match self.substitute_template_args(TemplateKind::Alias, name, &resolved)? {
                            Substituted::Type(t) => Ok(t),
                            Substituted::Cell { .. } => Err(SemanticError::type_error(
                                format!("'{}' is not a type", name.node),
                                name.span,
                            )),
                        }
                    }
                    None => Ok(Type::Dependent),
                }
            }
            None if self.traits.contains(&name.node) => Err(SemanticError::type_error(
                format!("trait '{}' cannot be used as a type", name.node),
                name.span,
            )),
            None => Err(SemanticError::name_error(
                format!("unknown type '{}'", name.node),
                name.span,
            )),
        }
    }

    /// Resolve written template arguments against `params`. Fewer arguments
    /// than parameters is allowed (the rest are deduced). `Ok(None)` when an
    /// argument is still dependent.
    fn resolve_template_args(
        &mut self,
        owner: &str,
        params: &TemplateParamList,
        args: &[TypeArg],
    ) -> Result<Option<Vec<TemplateArg>>, SemanticError> {
        if args.len() > params.params.len() {
            let span = args[params.params.len()].span();
            return Err(SemanticError::type_error(
                format!(
                    "too many template arguments for '{owner}': expected at most {}, found {}",
                    params.params.len(),
                    args.len()
                ),
                span,
            ));
        }
        let mut out = Vec::with_capacity(args.len());
        let mut dependent = false;
        for (p, a) in params.params.iter().zip(args) {
            match (&p.kind, a) {
                (TemplateParamKind::Type { .. }, TypeArg::Type(t)) => {
                    let ty = self.resolve_type_ref(t)?;
                    if ty.is_unknown() {
                        dependent = true;
                    } else {
                        out.push(TemplateArg::Type(ty));
                    }
                }
                (TemplateParamKind::Type { .. }, TypeArg::Value(e)) => {
                    return Err(SemanticError::type_error(
                        format!("expected a type for template parameter '{}', found a value", p.name),
                        e.span,
                    ));
                }
                (TemplateParamKind::Const, a) => {
                    let expr = match a {
                        TypeArg::Value(e) => e.clone(),
                        TypeArg::Type(TypeRef {
                            span,
                            kind: TypeRefKind::Named { name, args },
                        }) if args.is_empty() => Expr::ident(*span, name.node.clone()),
                        TypeArg::Type(t) => {
                            return Err(SemanticError::type_error(
                                format!(
                                    "expected a constant for template parameter '{}', found a type",
                                    p.name
                                ),
                                t.span,
                            ));
                        }
                    };
                    match const_eval::eval(&expr, self)? {
                        ConstValue::Int(v) => out.push(TemplateArg::Value(v)),
                        ConstValue::Dependent => dependent = true,
                        ConstValue::Bool(_) => {
                            return Err(SemanticError::type_error(
                                format!("template parameter '{}' expects an int", p.name),
                                expr.span,
                            ));
                        }
                    }
                }
            }
        }
        Ok((!dependent).then_some(out))
    }

    fn check_assignable(&self, expected: &Type, actual: &Type, span: Span) -> Result<(), SemanticError> {
        if expected.is_unknown() || actual.is_unknown() || expected == actual {
            return Ok(());
        }
        Err(SemanticError::type_error(
            format!(
                "mismatched types: expected {}, found {}",
                expected.display(),
                actual.display()
            ),
            span,
        ))
    }

    fn resolve_record_fields(
        &mut self,
        record: &Ident,
        fields: &[RecordFieldDef],
    ) -> Result<Vec<RecordField>, SemanticError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(fields.len());
        for f in fields {
            if !seen.insert(f.name.node.clone()) {
                return Err(SemanticError::name_error(
                    format!("duplicate field '{}' in record '{}'", f.name.node, record.node),
                    f.name.span,
                ));
            }
            out.push(RecordField {
                name: f.name.node.clone(),
                ty: self.resolve_type_ref(&f.ty)?,
                private: f.private,
            });
        }
        Ok(out)
    }

    // ----- cells -----

    fn check_concrete_cell(&mut self, cell: &CellDef) -> Result<CellDef, SemanticError> {
        let Some(sig) = self.cells.get(&cell.name.node).cloned() else {
            // The signature failed to resolve; already reported.
            return Ok(cell.clone());
        };
        self.with_fresh_context(|this| this.check_cell_with_sig(cell, &sig))
    }

    fn check_cell_with_sig(&mut self, cell: &CellDef, sig: &CellSig) -> Result<CellDef, SemanticError> {
        debug!(cell = %cell.name.node, "checking cell");
        self.push_scope();
        for (p, ast) in sig.params.iter().zip(&cell.args) {
            self.define_val(&ast.name, p.ty.clone(), p.mutable)?;
        }
        self.ret_types.push(sig.ret.clone());
        self.current_cell = Some(cell.name.node.clone());
        let body = self.check_cell_body(&cell.body)?;
        Ok(CellDef {
            body,
            ..cell.clone()
        })
    }

    /// Statements directly in a cell body recover independently: a failing
    /// statement is reported and checking continues with the next one. Inside
    /// an instantiation the first error propagates instead.
    fn check_cell_body(&mut self, body: &Block) -> Result<Block, SemanticError> {
        let mut stmts = Vec::with_capacity(body.stmts.len());
        for stmt in &body.stmts {
            match self.check_stmt(stmt) {
                Ok(s) => stmts.push(s),
                Err(e) if self.inst_stack.is_empty() => {
                    if let Stmt::Val(v) = stmt {
                        let _ = self.define_val(&v.name, Type::Error, true);
                    }
                    self.report(e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Block {
            span: body.span,
            stmts,
        })
    }

    /// Check a generic cell once in dependent mode. Idempotent.
    fn ensure_template_elaborated(&mut self, name: &str) -> Result<(), SemanticError> {
        let Some(generic) = self.generics.get(name) else {
            return Ok(());
        };
        if generic.elaborated || self.elaborating.contains(name) {
            return Ok(());
        }
        let def = generic.def.clone();
        let params = generic.params.clone();
        self.elaborating.insert(name.to_string());
        debug!(cell = name, "checking generic cell template");
        let result = self.with_fresh_context(|this| {
            this.template_scopes.push(params);
            let sig = this.signature_from_cell(&def)?;
            this.check_cell_with_sig(&def, &sig)
        });
        self.elaborating.remove(name);
        if let Some(g) = self.generics.get_mut(name) {
            g.elaborated = true;
            if let Ok(def) = &result {
                g.def = def.clone();
            }
        }
        result.map(|_| ())
    }

    #[tracing::instrument(level = "debug", skip(self, args), fields(cell = %name.node))]
    fn instantiate_cell(
        &mut self,
        name: &Ident,
        args: &[TemplateArg],
    ) -> Result<(String, CellSig), SemanticError> {
        self.check_template_args(TemplateKind::Cell, name, args)?;
        let mangled = mangle(&name.node, args);
        if let Some(sig) = self.cells.get(&mangled) {
            trace!(cell = %mangled, "reusing instantiation");
            return Ok((mangled, sig.clone()));
        }
        self.ensure_template_elaborated(&name.node)?;
        let Some(generic) = self.generics.get(&name.node) else {
            return Err(SemanticError::name_error(
                format!("unknown cell template '{}'", name.node),
                name.span,
            ));
        };
        let def = generic.def.clone();
        let levels = MultiLevelTemplateArgs::new().bind(generic.params.names(), args.to_vec());

        debug!(cell = %mangled, "instantiating generic cell");
        self.inst_stack.push(InstantiationFrame {
            kind: InstantiationKind::Cell {
                name: mangled.clone(),
            },
            span: name.span,
        })?;
        let result = self.instantiate_cell_body(&def, &levels, &mangled);
        self.inst_stack.pop();

        match result {
            Ok((cell, sig)) => {
                self.broadcast_declaration(DeclEvent {
                    kind: DeclKind::Cell,
                    name: mangled.clone(),
                    ty: Some(sig.ret.clone()),
                    span: name.span,
                    index: None,
                });
                self.instantiations.push(cell);
                Ok((mangled, sig))
            }
            Err(e) => {
                self.cells.remove(&mangled);
                let kind = match e.kind {
                    ErrorKind::Limit => ErrorKind::Limit,
                    _ => ErrorKind::Instantiation,
                };
                let mut err = SemanticError::new(
                    kind,
                    format!("cannot instantiate '{mangled}': {}", e.message),
                    name.span,
                )
                .with_note(format!("in instantiation of cell '{mangled}'"), e.span);
                err.notes.extend(e.notes);
                Err(err)
            }
        }
    }

    fn instantiate_cell_body(
        &mut self,
        def: &CellDef,
        levels: &MultiLevelTemplateArgs,
        mangled: &str,
    ) -> Result<(CellDef, CellSig), SemanticError> {
        let concrete = Substituter::new(levels).cell(def, mangled)?;
        self.with_fresh_context(|this| {
            let sig = this.signature_from_cell(&concrete)?;
            // Registered before the body so recursive calls reuse it.
            this.cells.insert(mangled.to_string(), sig.clone());
            let checked = this.check_cell_with_sig(&concrete, &sig)?;
            Ok((checked, sig))
        })
    }

    fn deduce_from(
        &self,
        cell: &str,
        pattern: &TypeRef,
        actual: &Type,
        params: &TemplateParamList,
        bound: &mut [Option<TemplateArg>],
    ) -> Result<(), SemanticError> {
        let mut bind = |name: &str, arg: TemplateArg, span: Span| -> Result<(), SemanticError> {
            let Some(i) = params.params.iter().position(|p| p.name == name) else {
                return Ok(());
            };
            match &bound[i] {
                Some(prev) if *prev != arg => Err(SemanticError::type_error(
                    format!(
                        "conflicting deduction for '{name}' in call to '{cell}': {} and {}",
                        prev.display(),
                        arg.display()
                    ),
                    span,
                )),
                _ => {
                    bound[i] = Some(arg);
                    Ok(())
                }
            }
        };
        match (&pattern.kind, actual) {
            (TypeRefKind::Named { name, args }, _) if args.is_empty() => {
                if matches!(params.find(&name.node), Some(p) if matches!(p.kind, TemplateParamKind::Type { .. }))
                {
                    bind(&name.node, TemplateArg::Type(actual.clone()), pattern.span)?;
                }
                Ok(())
            }
            (
                TypeRefKind::Array { elem, len },
                Type::Array {
                    elem: actual_elem,
                    len: ArrayLen::Known(n),
                },
            ) => {
                if let ExprKind::Ident(len_name) = &len.kind {
                    let value = i64::try_from(*n).map_err(|_| {
                        SemanticError::type_error("array length does not fit in 64 bits", len.span)
                    })?;
                    bind(&len_name.node, TemplateArg::Value(value), len.span)?;
                }
                self.deduce_from(cell, elem, actual_elem, params, bound)
            }
            _ => Ok(()),
        }
    }

    // ----- statements -----

    /// Check statements in the current scope.
    pub(crate) fn check_stmts(&mut self, block: &Block) -> Result<Block, SemanticError> {
        let stmts = block
            .stmts
            .iter()
            .map(|s| self.check_stmt(s))
            .collect::<Result<_, _>>()?;
        Ok(Block {
            span: block.span,
            stmts,
        })
    }

    fn check_block(&mut self, block: &Block) -> Result<Block, SemanticError> {
        let mark = self.mark();
        self.push_scope();
        let result = self.check_stmts(block);
        self.restore(mark);
        result
    }

    fn check_loop_body(&mut self, block: &Block) -> Result<Block, SemanticError> {
        self.loop_depth += 1;
        let result = self.check_block(block);
        self.loop_depth -= 1;
        result
    }

    pub(crate) fn check_stmt(&mut self, stmt: &Stmt) -> Result<Stmt, SemanticError> {
        match stmt {
            Stmt::TypeAlias(a) => Err(SemanticError::type_error(
                "type aliases must be declared at top level",
                a.span,
            )),
            Stmt::TraitDef(t) => Err(SemanticError::type_error(
                "traits must be declared at top level",
                t.span,
            )),
            Stmt::CellDef(c) => Err(SemanticError::type_error(
                "cells must be declared at top level",
                c.span,
            )),
            Stmt::RecordDef(r) => {
                self.define_record_from_members(&r.name, &r.fields)?;
                Ok(stmt.clone())
            }
            Stmt::Val(v) => self.check_val(v).map(Stmt::Val),
            Stmt::Assign(a) => self.check_assign(a).map(Stmt::Assign),
            Stmt::If(s) => {
                let cond = self.check_cond(&s.cond, "if")?;
                let then_block = self.check_block(&s.then_block)?;
                let else_block = s.else_block.as_ref().map(|b| self.check_block(b)).transpose()?;
                Ok(Stmt::If(IfStmt {
                    span: s.span,
                    cond,
                    then_block,
                    else_block,
                }))
            }
            Stmt::While(w) => {
                let cond = self.check_cond(&w.cond, "while")?;
                let body = self.check_loop_body(&w.body)?;
                Ok(Stmt::While(WhileStmt {
                    span: w.span,
                    cond,
                    body,
                }))
            }
            Stmt::Expansion(e) => self.check_expansion(e).map(Stmt::Expansion),
            Stmt::Break(span) | Stmt::Continue(span) => {
                if self.loop_depth == 0 {
                    let kw = if matches!(stmt, Stmt::Break(_)) {
                        "break"
                    } else {
                        "continue"
                    };
                    return Err(SemanticError::type_error(
                        format!("'{kw}' outside of a loop or expansion statement"),
                        *span,
                    ));
                }
                Ok(stmt.clone())
            }
            Stmt::Return(r) => self.check_return(r).map(Stmt::Return),
            Stmt::Assert(a) => self.check_assert(a).map(Stmt::Assert),
            Stmt::ExprStmt(e) => self.check_expr(e).map(|(e, _)| Stmt::ExprStmt(e)),
        }
    }

    fn check_val(&mut self, v: &ValDecl) -> Result<ValDecl, SemanticError> {
        let declared = v.ty.as_ref().map(|t| self.resolve_type_ref(t)).transpose()?;
        let empty_array = matches!(&v.expr.kind, ExprKind::ArrayLit(items) if items.is_empty());
        let (expr, ty) = match &declared {
            // `[]` only has a type through its annotation.
            Some(
                d @ Type::Array {
                    len: ArrayLen::Known(0),
                    ..
                },
            ) if empty_array => (v.expr.clone(), d.clone()),
            _ => self.check_expr(&v.expr)?,
        };
        let ty = match declared {
            Some(d) => {
                self.check_assignable(&d, &ty, v.expr.span)?;
                d
            }
            None => ty,
        };
        self.define_val(&v.name, ty, v.mutable)?;
        Ok(ValDecl {
            expr,
            ..v.clone()
        })
    }

    fn check_assign(&mut self, a: &AssignStmt) -> Result<AssignStmt, SemanticError> {
        let Some(info) = self.lookup_val(&a.target.node).cloned() else {
            return Err(SemanticError::name_error(
                format!("unknown name '{}'", a.target.node),
                a.target.span,
            ));
        };
        if !info.mutable {
            return Err(SemanticError::type_error(
                format!("cannot assign to immutable val '{}'", a.target.node),
                a.target.span,
            ));
        }
        let (expr, ty) = self.check_expr(&a.expr)?;
        self.check_assignable(&info.ty, &ty, a.expr.span)?;
        Ok(AssignStmt {
            span: a.span,
            target: a.target.clone(),
            expr,
        })
    }

    fn check_cond(&mut self, cond: &Expr, what: &str) -> Result<Expr, SemanticError> {
        let (expr, ty) = self.check_expr(cond)?;
        if ty != Type::Bool && !ty.is_unknown() {
            return Err(SemanticError::type_error(
                format!("{what} condition must be bool, found {}", ty.display()),
                cond.span,
            ));
        }
        Ok(expr)
    }

    fn check_return(&mut self, r: &ReturnStmt) -> Result<ReturnStmt, SemanticError> {
        let expected = self.ret_types.last().cloned().unwrap_or(Type::Unit);
        let expr = match &r.expr {
            Some(e) => {
                let (expr, ty) = self.check_expr(e)?;
                self.check_assignable(&expected, &ty, e.span)?;
                Some(expr)
            }
            None if expected == Type::Unit || expected.is_unknown() => None,
            None => {
                return Err(SemanticError::type_error(
                    format!("missing return value of type {}", expected.display()),
                    r.span,
                ));
            }
        };
        Ok(ReturnStmt { span: r.span, expr })
    }

    fn check_assert(&mut self, a: &AssertStmt) -> Result<AssertStmt, SemanticError> {
        let expr = self.check_cond(&a.expr, "assert")?;
        // Constant assertions are decided now.
        if let Ok(annotation) = self.build_annotation(&expr) {
            if annotation.value == ConstValue::Bool(false) {
                return Err(SemanticError::type_error("assertion always fails", a.expr.span));
            }
        }
        Ok(AssertStmt { span: a.span, expr })
    }

    fn check_expansion(&mut self, stmt: &ExpansionStmt) -> Result<ExpansionStmt, SemanticError> {
        let pending = self.begin_expansion(ExpansionHeading::of(stmt))?;
        self.finish_expansion(pending, &stmt.body)
    }

    // ----- expressions -----

    /// Check `expr` and return its elaborated form (calls to generic cells
    /// renamed to their instantiation, selections folded) with its type.
    pub(crate) fn check_expr(&mut self, expr: &Expr) -> Result<(Expr, Type), SemanticError> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Ident(name) => {
                if let Some(info) = self.lookup_val(&name.node) {
                    return Ok((expr.clone(), info.ty.clone()));
                }
                if let Some(p) = self.template_param(&name.node) {
                    return match p.kind {
                        TemplateParamKind::Const => Ok((expr.clone(), Type::Int)),
                        TemplateParamKind::Type { .. } => Err(SemanticError::type_error(
                            format!("'{}' is a type parameter, not a value", name.node),
                            span,
                        )),
                    };
                }
                if self.cells.contains_key(&name.node) || self.generics.contains_key(&name.node) {
                    return Err(SemanticError::type_error(
                        format!("cell '{}' cannot be used as a value", name.node),
                        span,
                    ));
                }
                Err(SemanticError::name_error(
                    format!("unknown name '{}'", name.node),
                    span,
                ))
            }
            ExprKind::IntLit(_) => Ok((expr.clone(), Type::Int)),
            ExprKind::CharLit(_) => Ok((expr.clone(), Type::Char)),
            ExprKind::BoolLit(_) => Ok((expr.clone(), Type::Bool)),
            ExprKind::StringLit(_) => Ok((expr.clone(), Type::String)),
            ExprKind::List(_) => Err(SemanticError::type_error(
                "a brace-enclosed list can only be used as an expansion range",
                span,
            )),
            ExprKind::ArrayLit(items) => self.check_array_lit(items, span),
            ExprKind::RecordLit { name, fields } => self.check_record_lit(name, fields, span),
            ExprKind::Unary { op, expr: inner } => {
                let (inner, ty) = self.check_expr(inner)?;
                let out = match (op, &ty) {
                    (_, t) if t.is_unknown() => t.clone(),
                    (UnaryOp::Neg, Type::Int) => Type::Int,
                    (UnaryOp::Not, Type::Bool) => Type::Bool,
                    (UnaryOp::Neg, t) => {
                        return Err(SemanticError::type_error(
                            format!("cannot negate a value of type {}", t.display()),
                            span,
                        ));
                    }
                    (UnaryOp::Not, t) => {
                        return Err(SemanticError::type_error(
                            format!("'!' expects bool, found {}", t.display()),
                            span,
                        ));
                    }
                };
                Ok((
                    Expr::new(
                        span,
                        ExprKind::Unary {
                            op: *op,
                            expr: Box::new(inner),
                        },
                    ),
                    out,
                ))
            }
            ExprKind::Binary { left, op, right } => {
                let (l, lt) = self.check_expr(left)?;
                let (r, rt) = self.check_expr(right)?;
                let ty = binary_result(*op, &lt, &rt, span)?;
                Ok((
                    Expr::new(
                        span,
                        ExprKind::Binary {
                            left: Box::new(l),
                            op: *op,
                            right: Box::new(r),
                        },
                    ),
                    ty,
                ))
            }
            ExprKind::Member { base, member } => {
                let (base, base_ty) = self.check_expr(base)?;
                self.build_member_access(base, &base_ty, member)
            }
            ExprKind::Index { base, index } => self.check_index(base, index, span),
            ExprKind::Call {
                callee,
                generic_args,
                args,
            } => self.build_call(callee, generic_args, args, span),
            ExprKind::ListSelect { list, index } => {
                let ExprKind::List(items) = &list.kind else {
                    return Err(SemanticError::new(
                        ErrorKind::IndexEvaluation,
                        "list selection requires a brace-enclosed list",
                        list.span,
                    ));
                };
                match const_eval::eval_index(index, self)? {
                    Some(i) => {
                        let item = usize::try_from(i).ok().and_then(|i| items.get(i)).ok_or_else(|| {
                            SemanticError::new(
                                ErrorKind::IndexEvaluation,
                                format!(
                                    "index {i} is out of range for a brace list of {} elements",
                                    items.len()
                                ),
                                index.span,
                            )
                        })?;
                        self.check_expr(item)
                    }
                    None => {
                        let (list, _) = self.build_list_init(items, list.span)?;
                        Ok((
                            Expr::new(
                                span,
                                ExprKind::ListSelect {
                                    list: Box::new(list),
                                    index: index.clone(),
                                },
                            ),
                            Type::Dependent,
                        ))
                    }
                }
            }
            ExprKind::MemberSelect {
                base,
                members,
                index,
            } => {
                let (base, base_ty) = self.check_expr(base)?;
                match const_eval::eval_index(index, self)? {
                    Some(i) => {
                        let member = usize::try_from(i)
                            .ok()
                            .and_then(|i| members.get(i))
                            .ok_or_else(|| {
                                SemanticError::new(
                                    ErrorKind::IndexEvaluation,
                                    format!(
                                        "index {i} is out of range for a record of {} members",
                                        members.len()
                                    ),
                                    index.span,
                                )
                            })?;
                        self.build_member_access(base, &base_ty, member)
                    }
                    None => Ok((
                        Expr::new(
                            span,
                            ExprKind::MemberSelect {
                                base: Box::new(base),
                                members: members.clone(),
                                index: index.clone(),
                            },
                        ),
                        Type::Dependent,
                    )),
                }
            }
        }
    }

    fn check_array_lit(&mut self, items: &[Expr], span: Span) -> Result<(Expr, Type), SemanticError> {
        if items.is_empty() {
            return Err(SemanticError::type_error(
                "cannot infer the element type of an empty array literal; add a type annotation",
                span,
            ));
        }
        let mut elem: Option<Type> = None;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let (e, ty) = self.check_expr(item)?;
            match &elem {
                Some(first) if !first.is_unknown() && !ty.is_unknown() && *first != ty => {
                    return Err(SemanticError::type_error(
                        format!(
                            "array elements must have the same type: expected {}, found {}",
                            first.display(),
                            ty.display()
                        ),
                        item.span,
                    ));
                }
                Some(first) if !first.is_unknown() => {}
                _ => elem = Some(ty),
            }
            out.push(e);
        }
        let elem = elem.unwrap_or(Type::Dependent);
        Ok((
            Expr::new(span, ExprKind::ArrayLit(out)),
            Type::array(elem, items.len() as u64),
        ))
    }

    fn check_record_lit(
        &mut self,
        name: &Ident,
        fields: &[(Ident, Expr)],
        span: Span,
    ) -> Result<(Expr, Type), SemanticError> {
        let ty = self.resolve_named_type(name, &[])?;
        let mut out = Vec::with_capacity(fields.len());
        if ty.is_unknown() {
            for (f, e) in fields {
                out.push((f.clone(), self.check_expr(e)?.0));
            }
            return Ok((
                Expr::new(span, ExprKind::RecordLit { name: name.clone(), fields: out }),
                ty,
            ));
        }
        let Some(info) = self.lookup_record(&ty).cloned() else {
            return Err(SemanticError::type_error(
                format!("'{}' is not a record type", name.node),
                name.span,
            ));
        };
        let mut seen = HashSet::new();
        for (f, e) in fields {
            let Some(field) = info.field(&f.node) else {
                return Err(SemanticError::name_error(
                    format!("record '{}' has no field '{}'", ty.display(), f.node),
                    f.span,
                ));
            };
            if !seen.insert(f.node.clone()) {
                return Err(SemanticError::name_error(
                    format!("field '{}' specified more than once", f.node),
                    f.span,
                ));
            }
            let (e2, et) = self.check_expr(e)?;
            self.check_assignable(&field.ty, &et, e.span)?;
            out.push((f.clone(), e2));
        }
        if let Some(missing) = info.fields.iter().find(|f| !seen.contains(&f.name)) {
            return Err(SemanticError::type_error(
                format!("missing field '{}' in record literal '{}'", missing.name, ty.display()),
                span,
            ));
        }
        Ok((
            Expr::new(span, ExprKind::RecordLit { name: name.clone(), fields: out }),
            ty,
        ))
    }

    fn check_index(&mut self, base: &Expr, index: &Expr, span: Span) -> Result<(Expr, Type), SemanticError> {
        let (b, bt) = self.check_expr(base)?;
        let (i, it) = self.check_expr(index)?;
        if it != Type::Int && !it.is_unknown() {
            return Err(SemanticError::type_error(
                format!("array index must be int, found {}", it.display()),
                index.span,
            ));
        }
        let ty = match &bt {
            Type::Array { elem, len } => {
                if let (ArrayLen::Known(n), Ok(ConstValue::Int(k))) = (len, const_eval::eval(&i, self)) {
                    if k < 0 || k as u64 >= *n {
                        return Err(SemanticError::type_error(
                            format!("index {k} is out of bounds for an array of length {n}"),
                            index.span,
                        ));
                    }
                }
                (**elem).clone()
            }
            t if t.is_unknown() => Type::Dependent,
            t => {
                return Err(SemanticError::type_error(
                    format!("cannot index a value of type {}", t.display()),
                    base.span,
                ));
            }
        };
        Ok((
            Expr::new(
                span,
                ExprKind::Index {
                    base: Box::new(b),
                    index: Box::new(i),
                },
            ),
            ty,
        ))
    }

    fn check_builtin_call(
        &mut self,
        callee: &Ident,
        args: &[Expr],
        span: Span,
    ) -> Result<(Expr, Type), SemanticError> {
        if args.len() != 1 {
            return Err(SemanticError::type_error(
                format!("'{}' expects 1 argument, got {}", callee.node, args.len()),
                span,
            ));
        }
        let (arg, ty) = self.check_expr(&args[0])?;
        let ret = match callee.node.as_str() {
            "len" => match &ty {
                Type::Array { .. } => Type::Int,
                t if t.is_unknown() => Type::Int,
                t => {
                    return Err(SemanticError::type_error(
                        format!("len expects an array, found {}", t.display()),
                        args[0].span,
                    ));
                }
            },
            _ => Type::Unit,
        };
        Ok((
            Expr::new(
                span,
                ExprKind::Call {
                    callee: callee.clone(),
                    generic_args: Vec::new(),
                    args: vec![arg],
                },
            ),
            ret,
        ))
    }

    fn check_call_args(
        &self,
        callee: &str,
        sig: &CellSig,
        args: &[Expr],
        types: &[Type],
        span: Span,
    ) -> Result<(), SemanticError> {
        if args.len() != sig.params.len() {
            return Err(SemanticError::type_error(
                format!(
                    "wrong number of arguments to '{callee}': expected {}, got {}",
                    sig.params.len(),
                    args.len()
                ),
                span,
            ));
        }
        for ((p, arg), ty) in sig.params.iter().zip(args).zip(types) {
            self.check_assignable(&p.ty, ty, arg.span)?;
        }
        Ok(())
    }
}

fn binary_result(op: BinOp, lt: &Type, rt: &Type, span: Span) -> Result<Type, SemanticError> {
    let mismatch = || {
        SemanticError::type_error(
            format!(
                "operator '{}' cannot be applied to {} and {}",
                op.symbol(),
                lt.display(),
                rt.display()
            ),
            span,
        )
    };
    let unknown = lt.is_unknown() || rt.is_unknown();
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => match (lt, rt) {
            _ if unknown => Ok(Type::Dependent),
            (Type::Int, Type::Int) => Ok(Type::Int),
            (Type::String, Type::String) if op == BinOp::Add => Ok(Type::String),
            _ => Err(mismatch()),
        },
        BinOp::Eq | BinOp::Ne => match (lt, rt) {
            _ if unknown => Ok(Type::Bool),
            (a, b) if a == b && matches!(a, Type::Int | Type::Bool | Type::Char | Type::String) => {
                Ok(Type::Bool)
            }
            _ => Err(mismatch()),
        },
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => match (lt, rt) {
            _ if unknown => Ok(Type::Bool),
            (Type::Int, Type::Int) | (Type::Char, Type::Char) => Ok(Type::Bool),
            _ => Err(mismatch()),
        },
        BinOp::And | BinOp::Or => match (lt, rt) {
            _ if unknown => Ok(Type::Bool),
            (Type::Bool, Type::Bool) => Ok(Type::Bool),
            _ => Err(mismatch()),
        },
    }
}

fn type_satisfies_trait(ty: &Type, tr: &str) -> bool {
    match tr {
        "Numeric" => matches!(ty, Type::Int | Type::Char),
        "Scalar" => matches!(ty, Type::Int | Type::Bool | Type::Char | Type::String),
        "Eq" => matches!(ty, Type::Int | Type::Bool | Type::Char | Type::String),
        _ => false,
    }
}

impl ConstEnv for Checker {
    fn lookup_const(&self, name: &str) -> Option<ConstValue> {
        match self.template_param(name)?.kind {
            TemplateParamKind::Const => Some(ConstValue::Dependent),
            TemplateParamKind::Type { .. } => None,
        }
    }
}

impl SemaActions for Checker {
    fn current_context(&self) -> DeclContext {
        DeclContext {
            cell: self.current_cell.clone(),
            template_depth: self.template_scopes.len() as u32,
            in_loop: self.loop_depth > 0,
            in_instantiation: !self.inst_stack.is_empty(),
        }
    }

    fn lookup_record(&self, ty: &Type) -> Option<&RecordInfo> {
        match ty {
            Type::Record(name) => self.records.get(name),
            _ => None,
        }
    }

    fn is_accessible(&self, record: &RecordInfo, member: &str) -> bool {
        record.field(member).is_some_and(|f| !f.private)
    }

    fn is_accessible_path(&self, record: &RecordInfo, path: &[&str]) -> bool {
        let mut current = record;
        for (i, step) in path.iter().enumerate() {
            let Some(field) = current.field(step) else {
                return false;
            };
            if !self.is_accessible(current, step) {
                return false;
            }
            if i + 1 < path.len() {
                match self.lookup_record(&field.ty) {
                    Some(next) => current = next,
                    None => return false,
                }
            }
        }
        true
    }

    fn check_template_args(
        &mut self,
        kind: TemplateKind,
        name: &Ident,
        args: &[TemplateArg],
    ) -> Result<(), SemanticError> {
        let params = match kind {
            TemplateKind::Alias => match self.aliases.get(&name.node) {
                Some(AliasEntry::Generic { params, .. }) => params.clone(),
                _ => {
                    return Err(SemanticError::name_error(
                        format!("unknown type alias template '{}'", name.node),
                        name.span,
                    ));
                }
            },
            TemplateKind::Cell => match self.generics.get(&name.node) {
                Some(g) => g.params.clone(),
                None => {
                    return Err(SemanticError::name_error(
                        format!("unknown cell template '{}'", name.node),
                        name.span,
                    ));
                }
            },
            TemplateKind::Variable | TemplateKind::Predicate => {
                return Err(SemanticError::name_error(
                    format!("no {} template named '{}'", kind.describe(), name.node),
                    name.span,
                ));
            }
        };
        if args.len() != params.params.len() {
            return Err(SemanticError::type_error(
                format!(
                    "'{}' expects {} template arguments, found {}",
                    name.node,
                    params.params.len(),
                    args.len()
                ),
                name.span,
            ));
        }
        for (p, a) in params.params.iter().zip(args) {
            match (&p.kind, a) {
                (TemplateParamKind::Type { bound }, TemplateArg::Type(t)) => {
                    if let Some(b) = bound {
                        if !self.is_satisfied(b, t) {
                            return Err(SemanticError::type_error(
                                format!(
                                    "type argument '{}' does not satisfy trait bound '{b}'",
                                    t.display()
                                ),
                                name.span,
                            ));
                        }
                    }
                }
                (TemplateParamKind::Const, TemplateArg::Value(_)) => {}
                (TemplateParamKind::Type { .. }, TemplateArg::Value(v)) => {
                    return Err(SemanticError::type_error(
                        format!("template parameter '{}' expects a type, found {v}", p.name),
                        name.span,
                    ));
                }
                (TemplateParamKind::Const, TemplateArg::Type(t)) => {
                    return Err(SemanticError::type_error(
                        format!(
                            "template parameter '{}' expects a constant, found type {}",
                            p.name,
                            t.display()
                        ),
                        name.span,
                    ));
                }
            }
        }
        Ok(())
    }

    fn substitute_template_args(
        &mut self,
        kind: TemplateKind,
        name: &Ident,
        args: &[TemplateArg],
    ) -> Result<Substituted, SemanticError> {
        match kind {
            TemplateKind::Alias => {
                self.check_template_args(kind, name, args)?;
                let Some(AliasEntry::Generic { params, target }) = self.aliases.get(&name.node).cloned()
                else {
                    return Err(SemanticError::name_error(
                        format!("unknown type alias template '{}'", name.node),
                        name.span,
                    ));
                };
                let levels = MultiLevelTemplateArgs::new().bind(params.names(), args.to_vec());
                self.inst_stack.push(InstantiationFrame {
                    kind: InstantiationKind::Alias {
                        name: mangle(&name.node, args),
                    },
                    span: name.span,
                })?;
                let result = Substituter::new(&levels)
                    .type_ref(&target)
                    .and_then(|t| self.resolve_type_ref(&t));
                self.inst_stack.pop();
                result.map(Substituted::Type)
            }
            TemplateKind::Cell => self
                .instantiate_cell(name, args)
                .map(|(name, sig)| Substituted::Cell { name, sig }),
            TemplateKind::Variable | TemplateKind::Predicate => {
                self.check_template_args(kind, name, args)?;
                Err(SemanticError::name_error(
                    format!("no {} template named '{}'", kind.describe(), name.node),
                    name.span,
                ))
            }
        }
    }

    fn force_instantiate(
        &mut self,
        name: &Ident,
        args: &[TemplateArg],
    ) -> Result<String, SemanticError> {
        self.instantiate_cell(name, args).map(|(mangled, _)| mangled)
    }

    fn is_satisfied(&self, bound: &str, ty: &Type) -> bool {
        self.traits.contains(bound) && type_satisfies_trait(ty, bound)
    }

    fn deduce_specialization(
        &mut self,
        name: &Ident,
        explicit: &[TemplateArg],
        arg_types: &[Type],
    ) -> Result<Vec<TemplateArg>, SemanticError> {
        let Some(generic) = self.generics.get(&name.node) else {
            return Err(SemanticError::name_error(
                format!("unknown cell template '{}'", name.node),
                name.span,
            ));
        };
        let params = generic.params.clone();
        let patterns: Vec<TypeRef> = generic.def.args.iter().map(|p| p.ty.clone()).collect();
        if patterns.len() != arg_types.len() {
            return Err(SemanticError::type_error(
                format!(
                    "wrong number of arguments to '{}': expected {}, got {}",
                    name.node,
                    patterns.len(),
                    arg_types.len()
                ),
                name.span,
            ));
        }
        let mut bound: Vec<Option<TemplateArg>> = params
            .params
            .iter()
            .enumerate()
            .map(|(i, _)| explicit.get(i).cloned())
            .collect();
        for (pattern, actual) in patterns.iter().zip(arg_types) {
            self.deduce_from(&name.node, pattern, actual, &params, &mut bound)?;
        }
        params
            .params
            .iter()
            .zip(bound)
            .map(|(p, b)| {
                b.ok_or_else(|| {
                    SemanticError::type_error(
                        format!(
                            "cannot deduce template argument '{}' for cell '{}'",
                            p.name, name.node
                        ),
                        name.span,
                    )
                })
            })
            .collect()
    }

    fn build_member_access(
        &mut self,
        base: Expr,
        base_ty: &Type,
        member: &Ident,
    ) -> Result<(Expr, Type), SemanticError> {
        let span = quill_ast::join(base.span, member.span);
        let ty = match base_ty {
            t if t.is_unknown() => t.clone(),
            Type::Record(_) => {
                let Some(record) = self.lookup_record(base_ty) else {
                    return Err(SemanticError::type_error(
                        format!("unknown record type '{}'", base_ty.display()),
                        base.span,
                    ));
                };
                let Some(field) = record.field(&member.node) else {
                    return Err(SemanticError::name_error(
                        format!("record '{}' has no field '{}'", base_ty.display(), member.node),
                        member.span,
                    ));
                };
                if !self.is_accessible(record, &member.node) {
                    return Err(SemanticError::type_error(
                        format!(
                            "field '{}' of record '{}' is private",
                            member.node,
                            base_ty.display()
                        ),
                        member.span,
                    ));
                }
                field.ty.clone()
            }
            t => {
                return Err(SemanticError::type_error(
                    format!("type {} has no field '{}'", t.display(), member.node),
                    member.span,
                ));
            }
        };
        Ok((
            Expr::new(
                span,
                ExprKind::Member {
                    base: Box::new(base),
                    member: member.clone(),
                },
            ),
            ty,
        ))
    }

    fn build_call(
        &mut self,
        callee: &Ident,
        generic_args: &[TypeArg],
        args: &[Expr],
        span: Span,
    ) -> Result<(Expr, Type), SemanticError> {
        if BUILTIN_CELLS.contains(&callee.node.as_str()) {
            return self.check_builtin_call(callee, args, span);
        }
        let mut checked = Vec::with_capacity(args.len());
        let mut types = Vec::with_capacity(args.len());
        for a in args {
            let (e, t) = self.check_expr(a)?;
            checked.push(e);
            types.push(t);
        }
        let call = |callee: Ident, generic_args: Vec<TypeArg>, args: Vec<Expr>| {
            Expr::new(
                span,
                ExprKind::Call {
                    callee,
                    generic_args,
                    args,
                },
            )
        };

        if let Some(sig) = self.cells.get(&callee.node).cloned() {
            if !generic_args.is_empty() {
                return Err(SemanticError::type_error(
                    format!("cell '{}' is not generic", callee.node),
                    callee.span,
                ));
            }
            self.check_call_args(&callee.node, &sig, args, &types, span)?;
            return Ok((call(callee.clone(), Vec::new(), checked), sig.ret));
        }

        let Some(params) = self.generics.get(&callee.node).map(|g| g.params.clone()) else {
            return Err(SemanticError::name_error(
                format!("unknown cell '{}'", callee.node),
                callee.span,
            ));
        };
        let explicit = self.resolve_template_args(&callee.node, &params, generic_args)?;
        let Some(explicit) = explicit.filter(|_| !types.iter().any(Type::is_unknown)) else {
            // Still dependent; instantiated when the enclosing template is.
            return Ok((call(callee.clone(), generic_args.to_vec(), checked), Type::Dependent));
        };
        let full = self.deduce_specialization(callee, &explicit, &types)?;
        let (mangled, sig) = self.instantiate_cell(callee, &full)?;
        self.check_call_args(&mangled, &sig, args, &types, span)?;
        Ok((
            call(Spanned::new(callee.span, mangled), Vec::new(), checked),
            sig.ret,
        ))
    }

    fn broadcast_declaration(&mut self, event: DeclEvent) {
        trace!(name = %event.name, kind = ?event.kind, index = ?event.index, "declaration");
        for consumer in &mut self.consumers {
            consumer.declared(&event);
        }
    }

    fn attach_initializer(&mut self, var: &ExpansionVar, init: Expr) -> ValDecl {
        ValDecl {
            span: var.span,
            name: var.name.clone(),
            mutable: var.mutable,
            ty: var.ty.clone(),
            expr: init,
        }
    }

    fn build_list_init(&mut self, items: &[Expr], span: Span) -> Result<(Expr, Type), SemanticError> {
        let mut out = Vec::with_capacity(items.len());
        let mut types = Vec::with_capacity(items.len());
        for item in items {
            let (e, t) = self.check_expr(item)?;
            out.push(e);
            types.push(t);
        }
        Ok((Expr::new(span, ExprKind::List(out)), Type::List(types)))
    }

    fn define_record_from_members(
        &mut self,
        name: &Ident,
        fields: &[RecordFieldDef],
    ) -> Result<Type, SemanticError> {
        if self.template_param(&name.node).is_some() {
            return Err(SemanticError::name_error(
                format!("declaration of '{}' shadows a template parameter", name.node),
                name.span,
            ));
        }
        if self
            .type_scopes
            .last()
            .is_some_and(|s| s.contains_key(&name.node))
        {
            return Err(SemanticError::name_error(
                format!("type '{}' already defined in this scope", name.node),
                name.span,
            ));
        }
        let resolved = self.resolve_record_fields(name, fields)?;
        self.local_record_seq += 1;
        let canonical = format!("{}'{}", name.node, self.local_record_seq);
        self.insert_record(canonical.clone(), resolved);
        if let Some(scope) = self.type_scopes.last_mut() {
            scope.insert(name.node.clone(), canonical.clone());
        }
        if let Some(local) = self.local_scopes.last_mut() {
            local.record(&name.node);
        }
        let ty = Type::Record(canonical);
        self.broadcast_declaration(DeclEvent {
            kind: DeclKind::Record,
            name: name.node.clone(),
            ty: Some(ty.clone()),
            span: name.span,
            index: None,
        });
        Ok(ty)
    }

    fn build_annotation(&mut self, expr: &Expr) -> Result<Annotation, SemanticError> {
        Ok(Annotation {
            span: expr.span,
            value: const_eval::eval(expr, self)?,
        })
    }

    fn instantiate_statement(
        &mut self,
        unit: &Block,
        args: &MultiLevelTemplateArgs,
        frame: InstantiationFrame,
    ) -> Result<Block, SemanticError> {
        self.inst_stack.push(frame)?;
        self.enter_local_instantiation_scope();
        self.loop_depth += 1;
        let result = Substituter::new(args)
            .block(unit)
            .and_then(|concrete| self.check_stmts(&concrete));
        if let Some(scope) = self.exit_local_instantiation_scope() {
            trace!(introduced = ?scope.introduced(), "closed instantiation scope");
        }
        self.inst_stack.pop();
        result
    }
}
