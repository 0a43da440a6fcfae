#![forbid(unsafe_code)]

use miette::SourceSpan;

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

/// Smallest span covering both `a` and `b`.
pub fn join(a: Span, b: Span) -> Span {
    let start = a.offset().min(b.offset());
    let end = (a.offset() + a.len()).max(b.offset() + b.len());
    span_between(start, end)
}

pub type Ident = Spanned<String>;

#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    TypeAlias(TypeAlias),
    TraitDef(TraitDef),
    RecordDef(RecordDef),
    CellDef(CellDef),
    Val(ValDecl),
    Assign(AssignStmt),
    If(IfStmt),
    While(WhileStmt),
    Expansion(ExpansionStmt),
    Break(Span),
    Continue(Span),
    Return(ReturnStmt),
    Assert(AssertStmt),
    ExprStmt(Expr),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::TypeAlias(s) => s.span,
            Stmt::TraitDef(s) => s.span,
            Stmt::RecordDef(s) => s.span,
            Stmt::CellDef(s) => s.span,
            Stmt::Val(s) => s.span,
            Stmt::Assign(s) => s.span,
            Stmt::If(s) => s.span,
            Stmt::While(s) => s.span,
            Stmt::Expansion(s) => s.span,
            Stmt::Break(span) | Stmt::Continue(span) => *span,
            Stmt::Return(s) => s.span,
            Stmt::Assert(s) => s.span,
            Stmt::ExprStmt(e) => e.span,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeAlias {
    pub span: Span,
    pub name: Ident,
    pub params: Vec<TemplateParam>,
    pub target: TypeRef,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TemplateParam {
    pub span: Span,
    pub name: Ident,
    pub kind: TemplateParamKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TemplateParamKind {
    /// `T` or `T: Bound`
    Type { bound: Option<Ident> },
    /// `const N: int`
    Const { ty: TypeRef },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraitDef {
    pub span: Span,
    pub name: Ident,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordDef {
    pub span: Span,
    pub name: Ident,
    pub fields: Vec<RecordFieldDef>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordFieldDef {
    pub span: Span,
    pub name: Ident,
    pub ty: TypeRef,
    /// Declared with `priv`; such fields are only reachable through record literals.
    pub private: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CellDef {
    pub span: Span,
    pub name: Ident,
    pub params: Vec<TemplateParam>,
    pub args: Vec<Param>,
    pub ret: Option<TypeRef>,
    pub body: Block,
}

impl CellDef {
    pub fn is_generic(&self) -> bool {
        !self.params.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub span: Span,
    pub name: Ident,
    pub mutable: bool,
    pub ty: TypeRef,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub span: Span,
    pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ValDecl {
    pub span: Span,
    pub name: Ident,
    pub mutable: bool,
    pub ty: Option<TypeRef>,
    pub expr: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssignStmt {
    pub span: Span,
    pub target: Ident,
    pub expr: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfStmt {
    pub span: Span,
    pub cond: Expr,
    pub then_block: Block,
    pub else_block: Option<Block>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WhileStmt {
    pub span: Span,
    pub cond: Expr,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReturnStmt {
    pub span: Span,
    pub expr: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssertStmt {
    pub span: Span,
    pub expr: Expr,
}

/// `expand [init;] val [mut] x [: T] in range:` followed by an indented body.
///
/// The statement is unrolled at compile time: one instantiation of
/// `{val x = range[i]; body}` per element of the range.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpansionStmt {
    pub span: Span,
    /// Location of the `expand` keyword; expansion diagnostics point here.
    pub kw_span: Span,
    pub init: Option<Box<Stmt>>,
    pub var: ExpansionVar,
    pub range: Expr,
    pub body: Block,
    /// Nesting depth of the synthetic index parameter. `None` until semantic
    /// analysis first constructs the statement; frozen afterwards.
    pub depth: Option<u32>,
    pub expansion: Expansion,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExpansionVar {
    pub span: Span,
    pub name: Ident,
    pub mutable: bool,
    pub ty: Option<TypeRef>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expansion {
    /// Parsed but not yet analyzed.
    Pending,
    /// The element count depends on an enclosing template parameter; expanded
    /// again once the enclosing cell is instantiated.
    Deferred,
    /// The range has no elements; the statement is a no-op.
    Empty,
    Expanded {
        /// Hidden binding that evaluates an array or record range once.
        range_binding: Option<Box<ValDecl>>,
        instantiations: Vec<Instantiation>,
    },
}

impl Expansion {
    pub fn instantiations(&self) -> &[Instantiation] {
        match self {
            Expansion::Expanded { instantiations, .. } => instantiations,
            _ => &[],
        }
    }
}

/// One elaborated copy of the iteration variable declaration plus the body.
#[derive(Clone, Debug, PartialEq)]
pub struct Instantiation {
    pub index: u64,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeRef {
    pub span: Span,
    pub kind: TypeRefKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeRefKind {
    Named { name: Ident, args: Vec<TypeArg> },
    /// `[T; N]`
    Array { elem: Box<TypeRef>, len: Box<Expr> },
}

impl TypeRef {
    pub fn named(span: Span, name: impl Into<String>) -> Self {
        TypeRef {
            span,
            kind: TypeRefKind::Named {
                name: Spanned::new(span, name.into()),
                args: Vec::new(),
            },
        }
    }
}

/// A template argument as written: `f::<int, 3>` or `Pair<char>`.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeArg {
    Type(TypeRef),
    Value(Expr),
}

impl TypeArg {
    pub fn span(&self) -> Span {
        match self {
            TypeArg::Type(t) => t.span,
            TypeArg::Value(e) => e.span,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(span: Span, kind: ExprKind) -> Self {
        Expr { span, kind }
    }

    pub fn int(span: Span, value: i64) -> Self {
        Expr::new(span, ExprKind::IntLit(value))
    }

    pub fn ident(span: Span, name: impl Into<String>) -> Self {
        Expr::new(span, ExprKind::Ident(Spanned::new(span, name.into())))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Ident(Ident),
    IntLit(i64),
    CharLit(char),
    BoolLit(bool),
    StringLit(String),
    /// `{a, b, c}`, a brace-enclosed list of possibly differently typed elements.
    List(Vec<Expr>),
    /// `[a, b, c]`
    ArrayLit(Vec<Expr>),
    /// `TypeName { field: value, ... }`
    RecordLit {
        name: Ident,
        fields: Vec<(Ident, Expr)>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        member: Ident,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Ident,
        generic_args: Vec<TypeArg>,
        args: Vec<Expr>,
    },
    /// Element `index` of a brace list. Produced by expansion; folds to the
    /// element itself once `index` is a literal.
    ListSelect {
        list: Box<Expr>,
        index: Box<Expr>,
    },
    /// Member number `index` of `base`. Produced by expansion; folds to a
    /// member access once `index` is a literal.
    MemberSelect {
        base: Box<Expr>,
        members: Vec<Ident>,
        index: Box<Expr>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}
