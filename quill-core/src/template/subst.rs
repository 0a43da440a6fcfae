//! Syntactic template substitution.
//!
//! Rewrites a tree with the bound levels of a [`MultiLevelTemplateArgs`]
//! replaced by their arguments. Retained levels are left in dependent form.
//! Nested expansion statements are reset to [`Expansion::Pending`] so the
//! checker expands them again against the substituted tree; their depth stays
//! frozen.

use quill_ast::{
    AssertStmt, AssignStmt, Block, CellDef, Expansion, ExpansionStmt, ExpansionVar, Expr,
    ExprKind, IfStmt, Param, RecordDef, RecordFieldDef, ReturnStmt, Stmt, TypeArg, TypeRef,
    TypeRefKind, ValDecl, WhileStmt,
};

use crate::error::{ErrorKind, SemanticError};
use crate::template::args::{MultiLevelTemplateArgs, TemplateArg};

pub struct Substituter<'a> {
    args: &'a MultiLevelTemplateArgs,
}

impl<'a> Substituter<'a> {
    pub fn new(args: &'a MultiLevelTemplateArgs) -> Self {
        Substituter { args }
    }

    /// Substitute a generic cell's signature and body. The result has no
    /// template parameters and is named `name`.
    pub fn cell(&self, def: &CellDef, name: &str) -> Result<CellDef, SemanticError> {
        let args = def
            .args
            .iter()
            .map(|p| {
                Ok(Param {
                    span: p.span,
                    name: p.name.clone(),
                    mutable: p.mutable,
                    ty: self.type_ref(&p.ty)?,
                })
            })
            .collect::<Result<Vec<_>, SemanticError>>()?;
        let ret = def.ret.as_ref().map(|t| self.type_ref(t)).transpose()?;
        Ok(CellDef {
            span: def.span,
            name: quill_ast::Spanned::new(def.name.span, name.to_string()),
            params: Vec::new(),
            args,
            ret,
            body: self.block(&def.body)?,
        })
    }

    pub fn block(&self, block: &Block) -> Result<Block, SemanticError> {
        Ok(Block {
            span: block.span,
            stmts: block
                .stmts
                .iter()
                .map(|s| self.stmt(s))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn stmt(&self, stmt: &Stmt) -> Result<Stmt, SemanticError> {
        Ok(match stmt {
            // Declarations that only live at top level are left for the checker to reject.
            Stmt::TypeAlias(_) | Stmt::TraitDef(_) | Stmt::CellDef(_) => stmt.clone(),
            Stmt::RecordDef(r) => Stmt::RecordDef(RecordDef {
                span: r.span,
                name: r.name.clone(),
                fields: r
                    .fields
                    .iter()
                    .map(|f| {
                        Ok(RecordFieldDef {
                            span: f.span,
                            name: f.name.clone(),
                            ty: self.type_ref(&f.ty)?,
                            private: f.private,
                        })
                    })
                    .collect::<Result<_, SemanticError>>()?,
            }),
            Stmt::Val(v) => Stmt::Val(self.val_decl(v)?),
            Stmt::Assign(a) => Stmt::Assign(AssignStmt {
                span: a.span,
                target: a.target.clone(),
                expr: self.expr(&a.expr)?,
            }),
            Stmt::If(s) => Stmt::If(IfStmt {
                span: s.span,
                cond: self.expr(&s.cond)?,
                then_block: self.block(&s.then_block)?,
                else_block: s.else_block.as_ref().map(|b| self.block(b)).transpose()?,
            }),
            Stmt::While(w) => Stmt::While(WhileStmt {
                span: w.span,
                cond: self.expr(&w.cond)?,
                body: self.block(&w.body)?,
            }),
            Stmt::Expansion(e) => Stmt::Expansion(self.expansion(e)?),
            Stmt::Break(span) => Stmt::Break(*span),
            Stmt::Continue(span) => Stmt::Continue(*span),
            Stmt::Return(r) => Stmt::Return(ReturnStmt {
                span: r.span,
                expr: r.expr.as_ref().map(|e| self.expr(e)).transpose()?,
            }),
            Stmt::Assert(a) => Stmt::Assert(AssertStmt {
                span: a.span,
                expr: self.expr(&a.expr)?,
            }),
            Stmt::ExprStmt(e) => Stmt::ExprStmt(self.expr(e)?),
        })
    }

    pub fn val_decl(&self, v: &ValDecl) -> Result<ValDecl, SemanticError> {
        Ok(ValDecl {
            span: v.span,
            name: v.name.clone(),
            mutable: v.mutable,
            ty: v.ty.as_ref().map(|t| self.type_ref(t)).transpose()?,
            expr: self.expr(&v.expr)?,
        })
    }

    fn expansion(&self, e: &ExpansionStmt) -> Result<ExpansionStmt, SemanticError> {
        Ok(ExpansionStmt {
            span: e.span,
            kw_span: e.kw_span,
            init: e
                .init
                .as_ref()
                .map(|s| self.stmt(s).map(Box::new))
                .transpose()?,
            var: ExpansionVar {
                span: e.var.span,
                name: e.var.name.clone(),
                mutable: e.var.mutable,
                ty: e.var.ty.as_ref().map(|t| self.type_ref(t)).transpose()?,
            },
            range: self.expr(&e.range)?,
            body: self.block(&e.body)?,
            depth: e.depth,
            expansion: Expansion::Pending,
        })
    }

    pub fn type_ref(&self, ty: &TypeRef) -> Result<TypeRef, SemanticError> {
        match &ty.kind {
            TypeRefKind::Named { name, args } if args.is_empty() => {
                match self.args.lookup(&name.node) {
                    Some(TemplateArg::Type(t)) => t.to_type_ref(ty.span).ok_or_else(|| {
                        SemanticError::new(
                            ErrorKind::Instantiation,
                            format!("type '{}' cannot be substituted for '{}'", t.display(), name.node),
                            ty.span,
                        )
                    }),
                    Some(TemplateArg::Value(_)) => Err(SemanticError::type_error(
                        format!("'{}' is a value parameter, not a type", name.node),
                        ty.span,
                    )),
                    None => Ok(ty.clone()),
                }
            }
            TypeRefKind::Named { name, args } => Ok(TypeRef {
                span: ty.span,
                kind: TypeRefKind::Named {
                    name: name.clone(),
                    args: self.type_args(args)?,
                },
            }),
            TypeRefKind::Array { elem, len } => Ok(TypeRef {
                span: ty.span,
                kind: TypeRefKind::Array {
                    elem: Box::new(self.type_ref(elem)?),
                    len: Box::new(self.expr(len)?),
                },
            }),
        }
    }

    fn type_args(&self, args: &[TypeArg]) -> Result<Vec<TypeArg>, SemanticError> {
        args.iter()
            .map(|a| match a {
                TypeArg::Type(t) => {
                    // A bare name parses as a type but may name a value parameter.
                    if let TypeRefKind::Named { name, args } = &t.kind {
                        if args.is_empty() {
                            if let Some(TemplateArg::Value(v)) = self.args.lookup(&name.node) {
                                return Ok(TypeArg::Value(Expr::int(t.span, *v)));
                            }
                        }
                    }
                    self.type_ref(t).map(TypeArg::Type)
                }
                TypeArg::Value(e) => self.expr(e).map(TypeArg::Value),
            })
            .collect()
    }

    pub fn expr(&self, expr: &Expr) -> Result<Expr, SemanticError> {
        let kind = match &expr.kind {
            ExprKind::Ident(name) => match self.args.lookup(&name.node) {
                Some(TemplateArg::Value(v)) => return Ok(Expr::int(expr.span, *v)),
                Some(TemplateArg::Type(_)) => {
                    return Err(SemanticError::type_error(
                        format!("'{}' is a type parameter, not a value", name.node),
                        expr.span,
                    ));
                }
                None => ExprKind::Ident(name.clone()),
            },
            ExprKind::IntLit(_)
            | ExprKind::CharLit(_)
            | ExprKind::BoolLit(_)
            | ExprKind::StringLit(_) => expr.kind.clone(),
            ExprKind::List(items) => ExprKind::List(self.exprs(items)?),
            ExprKind::ArrayLit(items) => ExprKind::ArrayLit(self.exprs(items)?),
            ExprKind::RecordLit { name, fields } => ExprKind::RecordLit {
                name: match self.args.lookup(&name.node) {
                    Some(TemplateArg::Type(crate::types::Type::Record(canonical))) => {
                        quill_ast::Spanned::new(name.span, canonical.clone())
                    }
                    _ => name.clone(),
                },
                fields: fields
                    .iter()
                    .map(|(f, e)| Ok((f.clone(), self.expr(e)?)))
                    .collect::<Result<_, SemanticError>>()?,
            },
            ExprKind::Unary { op, expr: inner } => ExprKind::Unary {
                op: *op,
                expr: Box::new(self.expr(inner)?),
            },
            ExprKind::Binary { left, op, right } => ExprKind::Binary {
                left: Box::new(self.expr(left)?),
                op: *op,
                right: Box::new(self.expr(right)?),
            },
            ExprKind::Member { base, member } => ExprKind::Member {
                base: Box::new(self.expr(base)?),
                member: member.clone(),
            },
            ExprKind::Index { base, index } => ExprKind::Index {
                base: Box::new(self.expr(base)?),
                index: Box::new(self.expr(index)?),
            },
            ExprKind::Call {
                callee,
                generic_args,
                args,
            } => ExprKind::Call {
                callee: callee.clone(),
                generic_args: self.type_args(generic_args)?,
                args: self.exprs(args)?,
            },
            ExprKind::ListSelect { list, index } => {
                let list = self.expr(list)?;
                let index = self.expr(index)?;
                return fold_list_select(expr, list, index);
            }
            ExprKind::MemberSelect {
                base,
                members,
                index,
            } => {
                let base = self.expr(base)?;
                let index = self.expr(index)?;
                return fold_member_select(expr, base, members, index);
            }
        };
        Ok(Expr::new(expr.span, kind))
    }

    fn exprs(&self, items: &[Expr]) -> Result<Vec<Expr>, SemanticError> {
        items.iter().map(|e| self.expr(e)).collect()
    }
}

fn literal_index(index: &Expr) -> Option<i64> {
    match index.kind {
        ExprKind::IntLit(i) => Some(i),
        _ => None,
    }
}

fn out_of_range(span: quill_ast::Span, index: i64, len: usize, what: &str) -> SemanticError {
    SemanticError::new(
        ErrorKind::IndexEvaluation,
        format!("index {index} is out of range for {what} of {len} elements"),
        span,
    )
}

/// `ListSelect` collapses to the selected element once its index is a literal.
fn fold_list_select(orig: &Expr, list: Expr, index: Expr) -> Result<Expr, SemanticError> {
    match (literal_index(&index), &list.kind) {
        (Some(i), ExprKind::List(items)) => usize::try_from(i)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .ok_or_else(|| out_of_range(index.span, i, items.len(), "a brace list")),
        _ => Ok(Expr::new(
            orig.span,
            ExprKind::ListSelect {
                list: Box::new(list),
                index: Box::new(index),
            },
        )),
    }
}

/// `MemberSelect` collapses to a plain member access once its index is a literal.
fn fold_member_select(
    orig: &Expr,
    base: Expr,
    members: &[quill_ast::Ident],
    index: Expr,
) -> Result<Expr, SemanticError> {
    match literal_index(&index) {
        Some(i) => {
            let member = usize::try_from(i)
                .ok()
                .and_then(|i| members.get(i))
                .ok_or_else(|| out_of_range(index.span, i, members.len(), "a record"))?;
            Ok(Expr::new(
                orig.span,
                ExprKind::Member {
                    base: Box::new(base),
                    member: member.clone(),
                },
            ))
        }
        None => Ok(Expr::new(
            orig.span,
            ExprKind::MemberSelect {
                base: Box::new(base),
                members: members.to_vec(),
                index: Box::new(index),
            },
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_ast::span;

    fn index_args(i: i64) -> MultiLevelTemplateArgs {
        MultiLevelTemplateArgs::retained(0).bind(vec!["I".into()], vec![TemplateArg::Value(i)])
    }

    #[test]
    fn list_select_collapses_to_element() {
        let s = span(0, 1);
        let list = Expr::new(
            s,
            ExprKind::List(vec![Expr::int(s, 10), Expr::new(s, ExprKind::CharLit('a'))]),
        );
        let sel = Expr::new(
            s,
            ExprKind::ListSelect {
                list: Box::new(list),
                index: Box::new(Expr::ident(s, "I")),
            },
        );
        let args = index_args(1);
        let out = Substituter::new(&args).expr(&sel).unwrap();
        assert_eq!(out.kind, ExprKind::CharLit('a'));
    }

    #[test]
    fn retained_select_is_left_alone() {
        let s = span(0, 1);
        let sel = Expr::new(
            s,
            ExprKind::MemberSelect {
                base: Box::new(Expr::ident(s, "r")),
                members: vec![quill_ast::Spanned::new(s, "x".to_string())],
                index: Box::new(Expr::ident(s, "J")),
            },
        );
        let args = index_args(0);
        let out = Substituter::new(&args).expr(&sel).unwrap();
        assert_eq!(out, sel);
    }

    #[test]
    fn out_of_range_selection_fails() {
        let s = span(0, 1);
        let sel = Expr::new(
            s,
            ExprKind::ListSelect {
                list: Box::new(Expr::new(s, ExprKind::List(vec![Expr::int(s, 1)]))),
                index: Box::new(Expr::ident(s, "I")),
            },
        );
        let args = index_args(3);
        let err = Substituter::new(&args).expr(&sel).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IndexEvaluation);
    }
}
