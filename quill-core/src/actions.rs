//! The semantic actions the expansion engine is allowed to call.
//!
//! The engine in [`crate::expansion`] never touches checker state directly; it
//! asks for lookups, substitutions, and synthesized expressions through
//! [`SemaActions`]. [`crate::Checker`] is the implementation.

use quill_ast::{Block, ExpansionVar, Expr, Ident, RecordFieldDef, Span, TypeArg, ValDecl};

use crate::const_eval::ConstValue;
use crate::error::SemanticError;
use crate::template::{InstantiationFrame, MultiLevelTemplateArgs, TemplateArg};
use crate::types::Type;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateKind {
    Alias,
    Cell,
    Variable,
    Predicate,
}

impl TemplateKind {
    pub fn describe(self) -> &'static str {
        match self {
            TemplateKind::Alias => "type alias",
            TemplateKind::Cell => "cell",
            TemplateKind::Variable => "variable",
            TemplateKind::Predicate => "predicate",
        }
    }
}

/// Where the checker currently is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclContext {
    pub cell: Option<String>,
    /// Generic-parameter scopes enclosing this point: one per generic cell and
    /// one per enclosing expansion statement.
    pub template_depth: u32,
    pub in_loop: bool,
    pub in_instantiation: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordField {
    pub name: String,
    pub ty: Type,
    pub private: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordInfo {
    /// Canonical name; see [`Type::Record`].
    pub name: String,
    pub fields: Vec<RecordField>,
}

impl RecordInfo {
    pub fn field(&self, name: &str) -> Option<&RecordField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CellParam {
    pub name: String,
    pub ty: Type,
    pub mutable: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CellSig {
    pub params: Vec<CellParam>,
    pub ret: Type,
}

/// Result of substituting arguments into a template.
#[derive(Clone, Debug, PartialEq)]
pub enum Substituted {
    Type(Type),
    /// The instantiated cell, registered under its mangled name.
    Cell { name: String, sig: CellSig },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeclKind {
    Val,
    Record,
    Cell,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeclEvent {
    pub kind: DeclKind,
    pub name: String,
    pub ty: Option<Type>,
    pub span: Span,
    /// Expansion index that introduced the declaration, if any.
    pub index: Option<u64>,
}

/// Receives every declaration the checker introduces, including those
/// produced by instantiation.
pub trait DeclConsumer {
    fn declared(&mut self, event: &DeclEvent);
}

/// A constant attached to a declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub span: Span,
    pub value: ConstValue,
}

pub trait SemaActions {
    fn current_context(&self) -> DeclContext;

    /// The record a type names, if any.
    fn lookup_record(&self, ty: &Type) -> Option<&RecordInfo>;

    fn is_accessible(&self, record: &RecordInfo, member: &str) -> bool;

    /// Whether every step of `path` (a member, then a member of that member's
    /// record, ...) is accessible from the current context.
    fn is_accessible_path(&self, record: &RecordInfo, path: &[&str]) -> bool;

    fn check_template_args(
        &mut self,
        kind: TemplateKind,
        name: &Ident,
        args: &[TemplateArg],
    ) -> Result<(), SemanticError>;

    fn substitute_template_args(
        &mut self,
        kind: TemplateKind,
        name: &Ident,
        args: &[TemplateArg],
    ) -> Result<Substituted, SemanticError>;

    /// Instantiate a generic cell now; returns the mangled name.
    fn force_instantiate(
        &mut self,
        name: &Ident,
        args: &[TemplateArg],
    ) -> Result<String, SemanticError>;

    fn is_satisfied(&self, bound: &str, ty: &Type) -> bool;

    /// Complete `explicit` with arguments deduced from the call's argument types.
    fn deduce_specialization(
        &mut self,
        name: &Ident,
        explicit: &[TemplateArg],
        arg_types: &[Type],
    ) -> Result<Vec<TemplateArg>, SemanticError>;

    fn build_member_access(
        &mut self,
        base: Expr,
        base_ty: &Type,
        member: &Ident,
    ) -> Result<(Expr, Type), SemanticError>;

    fn build_call(
        &mut self,
        callee: &Ident,
        generic_args: &[TypeArg],
        args: &[Expr],
        span: Span,
    ) -> Result<(Expr, Type), SemanticError>;

    fn broadcast_declaration(&mut self, event: DeclEvent);

    /// Copy-initialize an iteration variable from `init`.
    fn attach_initializer(&mut self, var: &ExpansionVar, init: Expr) -> ValDecl;

    fn build_list_init(&mut self, items: &[Expr], span: Span) -> Result<(Expr, Type), SemanticError>;

    fn define_record_from_members(
        &mut self,
        name: &Ident,
        fields: &[RecordFieldDef],
    ) -> Result<Type, SemanticError>;

    fn build_annotation(&mut self, expr: &Expr) -> Result<Annotation, SemanticError>;

    /// Substitute `unit` with `args` and check the result in a fresh local
    /// instantiation scope, with `frame` on the instantiation stack.
    fn instantiate_statement(
        &mut self,
        unit: &Block,
        args: &MultiLevelTemplateArgs,
        frame: InstantiationFrame,
    ) -> Result<Block, SemanticError>;
}
