//! Expansion statements: `expand val x in range:` unrolled at compile time.
//!
//! Construction is split in two like the parser sees it: [`Checker::begin_expansion`]
//! handles the heading and returns a [`PendingExpansion`], and
//! [`Checker::finish_expansion`] consumes it together with the body. The
//! statement is a template over one synthetic index parameter; each element
//! of the range is one instantiation of `{val x = <select i>; body}`.

pub mod assemble;
pub mod body;
pub mod index_param;
pub mod range;
pub mod select;

use quill_ast::{Block, Expansion, ExpansionStmt, ExpansionVar, Expr, ExprKind, Span, Stmt, ValDecl};
use tracing::debug;

use crate::actions::SemaActions;
use crate::error::{ErrorKind, SemanticError};
use crate::sema::Checker;
use crate::template::{ScopeMark, TemplateParamList};
use crate::types::Type;

pub use index_param::IndexParam;
pub use range::RangeClass;

/// The parsed heading of an expansion statement.
#[derive(Clone, Copy, Debug)]
pub struct ExpansionHeading<'a> {
    pub span: Span,
    pub kw_span: Span,
    pub init: Option<&'a Stmt>,
    pub var: &'a ExpansionVar,
    pub range: &'a Expr,
    /// Frozen depth from an earlier construction of the same statement.
    pub depth: Option<u32>,
}

impl<'a> ExpansionHeading<'a> {
    pub fn of(stmt: &'a ExpansionStmt) -> Self {
        ExpansionHeading {
            span: stmt.span,
            kw_span: stmt.kw_span,
            init: stmt.init.as_deref(),
            var: &stmt.var,
            range: &stmt.range,
            depth: stmt.depth,
        }
    }
}

/// An expansion statement whose heading has been checked but whose body has
/// not been attached yet. The init statement and range binding stay in scope
/// until [`Checker::finish_expansion`].
#[derive(Debug)]
pub struct PendingExpansion {
    pub(crate) span: Span,
    pub(crate) kw_span: Span,
    pub(crate) init: Option<Box<Stmt>>,
    pub(crate) var: ExpansionVar,
    pub(crate) range: Expr,
    pub(crate) range_ty: Type,
    pub(crate) index: IndexParam,
    pub(crate) mark: ScopeMark,
}

impl PendingExpansion {
    pub fn range_type(&self) -> &Type {
        &self.range_ty
    }

    pub fn index_param(&self) -> &IndexParam {
        &self.index
    }
}

impl Checker {
    #[tracing::instrument(level = "debug", skip_all, fields(var = %heading.var.name.node))]
    pub fn begin_expansion(
        &mut self,
        heading: ExpansionHeading<'_>,
    ) -> Result<PendingExpansion, SemanticError> {
        let index = index_param::synthesize(self, heading.depth, heading.kw_span);
        let mark = self.mark();
        self.push_scope();
        let checked = self.check_expansion_heading(&heading);
        match checked {
            Ok((init, range, range_ty)) => {
                debug!(depth = index.depth, range = %range_ty.display(), "expansion heading checked");
                Ok(PendingExpansion {
                    span: heading.span,
                    kw_span: heading.kw_span,
                    init,
                    var: heading.var.clone(),
                    range,
                    range_ty,
                    index,
                    mark,
                })
            }
            Err(e) => {
                self.restore(mark);
                Err(e)
            }
        }
    }

    fn check_expansion_heading(
        &mut self,
        heading: &ExpansionHeading<'_>,
    ) -> Result<(Option<Box<Stmt>>, Expr, Type), SemanticError> {
        let init = heading
            .init
            .map(|s| self.check_stmt(s).map(Box::new))
            .transpose()?;
        let (range, range_ty) = self.check_range_expr(heading.range)?;
        Ok((init, range, range_ty))
    }

    /// Brace lists are only valid here.
    pub(crate) fn check_range_expr(&mut self, range: &Expr) -> Result<(Expr, Type), SemanticError> {
        match &range.kind {
            ExprKind::List(items) => self.build_list_init(items, range.span),
            _ => self.check_expr(range),
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(depth = pending.index.depth))]
    pub fn finish_expansion(
        &mut self,
        pending: PendingExpansion,
        body: &Block,
    ) -> Result<ExpansionStmt, SemanticError> {
        let result = self.expand(&pending, body);
        self.restore(pending.mark);
        let (expansion, body) = result?;
        Ok(assemble::assemble(pending, body, expansion))
    }

    fn expand(
        &mut self,
        pending: &PendingExpansion,
        body: &Block,
    ) -> Result<(Expansion, Block), SemanticError> {
        let class = range::classify(self, &pending.range, &pending.range_ty)?;
        let count = class.count();
        debug!(strategy = class.strategy(), count = ?count, "classified expansion range");
        if let Some(n) = count {
            if n > self.config.max_expansion_size {
                return Err(SemanticError::new(
                    ErrorKind::Limit,
                    format!(
                        "expansion of {n} elements exceeds max_expansion_size ({})",
                        self.config.max_expansion_size
                    ),
                    pending.kw_span,
                ));
            }
        }

        let binding = class.needs_binding().then(|| ValDecl {
            span: pending.range.span,
            name: quill_ast::Spanned::new(
                pending.range.span,
                select::range_binding_name(pending.index.depth),
            ),
            mutable: false,
            ty: None,
            expr: pending.range.clone(),
        });
        let base = match &binding {
            Some(b) => {
                self.define_val(&b.name, pending.range_ty.clone(), false)?;
                Expr::ident(b.name.span, b.name.node.clone())
            }
            None => pending.range.clone(),
        };

        let selector =
            select::build_selector(&class, &pending.range, &base, pending.index.reference());
        let var = self.attach_initializer(&pending.var, selector);
        let unit = Block {
            span: body.span,
            stmts: std::iter::once(Stmt::Val(var))
                .chain(body.stmts.iter().cloned())
                .collect(),
        };
        let template = self.check_expansion_template(&pending.index, &unit)?;
        let elaborated_body = Block {
            span: body.span,
            stmts: template.stmts.iter().skip(1).cloned().collect(),
        };

        let expansion = match count {
            None => Expansion::Deferred,
            Some(0) => Expansion::Empty,
            Some(n) => Expansion::Expanded {
                range_binding: binding.map(Box::new),
                instantiations: body::instantiate_all(
                    self,
                    &template,
                    &pending.index,
                    n,
                    pending.kw_span,
                )?,
            },
        };
        Ok((expansion, elaborated_body))
    }

    /// Check the unit once with the index still symbolic, as a template.
    fn check_expansion_template(
        &mut self,
        index: &IndexParam,
        unit: &Block,
    ) -> Result<Block, SemanticError> {
        let mark = self.mark();
        self.push_scope();
        self.template_scopes.push(index.param_list());
        self.loop_depth += 1;
        let result = self.check_stmts(unit);
        self.restore(mark);
        result
    }

    /// Classify an expression as an expansion range without expanding it.
    pub fn classify_range(&mut self, range: &Expr) -> Result<RangeClass, SemanticError> {
        let (range, ty) = self.check_range_expr(range)?;
        range::classify(self, &range, &ty)
    }

    /// Element `index` of `range`: `range[i]`, the i-th element of a brace
    /// list, or the i-th member of a record. The result is not checked.
    pub fn select_element(&mut self, range: &Expr, index: &Expr) -> Result<Expr, SemanticError> {
        let (range, ty) = self.check_range_expr(range)?;
        select::select_element(self, &range, &ty, index)
    }

    /// Run `f` with `params` in scope as an enclosing template level, as a
    /// caller inside a generic entity would see the checker.
    pub fn with_template_params<R>(
        &mut self,
        params: TemplateParamList,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let mark = self.mark();
        self.template_scopes.push(params);
        let out = f(self);
        self.restore(mark);
        out
    }
}
