#![forbid(unsafe_code)]

use std::mem;

use quill_ast::{
    AssertStmt, AssignStmt, BinOp, Block, CellDef, ExpansionStmt, ExpansionVar, Expansion, Expr,
    ExprKind, Ident, IfStmt, Param, Program, RecordDef, RecordFieldDef, ReturnStmt, Span, Stmt,
    TemplateParam, TemplateParamKind, TraitDef, TypeAlias, TypeArg, TypeRef, TypeRefKind, UnaryOp,
    ValDecl, WhileStmt, join, span_between,
};
use quill_lex::{Token, TokenKind};

use crate::ParseConfig;
use crate::error::ParseError;

const SUPPORTED_EDITIONS: &[&str] = &["2026"];

pub struct Parser<'a> {
    tokens: &'a [Token],
    idx: usize,
    config: ParseConfig,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            idx: 0,
            config: ParseConfig::default(),
        }
    }

    pub fn new_with_config(tokens: &'a [Token], config: &ParseConfig) -> Self {
        Self {
            tokens,
            idx: 0,
            config: config.clone(),
        }
    }

    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        self.check_edition()?;
        let mut stmts = Vec::new();
        while !self.at(TokenKind::Eof) {
            self.skip_newlines();
            if self.at(TokenKind::Eof) {
                break;
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(Program { stmts })
    }

    /// Parse a program while attempting to recover from errors.
    ///
    /// On a statement parse error, tokens are skipped until a statement
    /// boundary (`Newline`, `Dedent`, or `Eof`) and parsing continues.
    pub fn parse_program_with_recovery(&mut self) -> (Program, Vec<ParseError>) {
        let mut stmts = Vec::new();
        let mut errors: Vec<ParseError> = self.check_edition().err().into_iter().collect();

        while !self.at(TokenKind::Eof) {
            self.skip_newlines();
            if self.at(TokenKind::Eof) {
                break;
            }

            match self.parse_stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(err) => {
                    errors.push(err);
                    self.recover_to_stmt_boundary();
                }
            }
        }

        (Program { stmts }, errors)
    }

    fn check_edition(&self) -> Result<(), ParseError> {
        match self.config.edition.as_deref() {
            None => Ok(()),
            Some(e) if SUPPORTED_EDITIONS.contains(&e) => Ok(()),
            Some(e) => Err(ParseError {
                message: format!("unsupported edition '{e}' (supported: {})", SUPPORTED_EDITIONS.join(", ")),
                span: span_between(0, 0),
            }),
        }
    }

    fn recover_to_stmt_boundary(&mut self) {
        if self.at(TokenKind::Eof) {
            return;
        }

        while !self.at(TokenKind::Eof) {
            if self.at(TokenKind::Newline) || self.at(TokenKind::Dedent) {
                break;
            }
            self.next();
        }

        if self.at(TokenKind::Newline) || self.at(TokenKind::Dedent) {
            self.next();
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::KwTrait) => Ok(Stmt::TraitDef(self.parse_trait_def()?)),
            Some(TokenKind::KwType) => self.parse_type_stmt(),
            Some(TokenKind::KwVal) => {
                let decl = self.parse_val_decl()?;
                self.expect_stmt_terminator()?;
                Ok(Stmt::Val(decl))
            }
            Some(TokenKind::KwCell) => Ok(Stmt::CellDef(self.parse_cell_def()?)),
            Some(TokenKind::KwIf) => Ok(Stmt::If(self.parse_if_stmt()?)),
            Some(TokenKind::KwWhile) => Ok(Stmt::While(self.parse_while_stmt()?)),
            Some(TokenKind::KwExpand) => Ok(Stmt::Expansion(self.parse_expansion_stmt()?)),
            Some(TokenKind::KwBreak) => {
                let tok = self.expect(TokenKind::KwBreak)?;
                self.expect_stmt_terminator()?;
                Ok(Stmt::Break(tok.span))
            }
            Some(TokenKind::KwContinue) => {
                let tok = self.expect(TokenKind::KwContinue)?;
                self.expect_stmt_terminator()?;
                Ok(Stmt::Continue(tok.span))
            }
            Some(TokenKind::KwReturn) => Ok(Stmt::Return(self.parse_return_stmt()?)),
            Some(TokenKind::KwAssert) => {
                let start = self.expect(TokenKind::KwAssert)?;
                let expr = self.parse_expr()?;
                self.expect_stmt_terminator()?;
                let span = join(start.span, expr.span);
                Ok(Stmt::Assert(AssertStmt { span, expr }))
            }
            Some(TokenKind::Ident(_))
                if self.peek_kind_n(1).is_some_and(|k| matches!(k, TokenKind::Eq)) =>
            {
                Ok(Stmt::Assign(self.parse_assign_stmt()?))
            }
            Some(_) if self.at_expr_start() => {
                let expr = self.parse_expr()?;
                self.expect_stmt_terminator()?;
                Ok(Stmt::ExprStmt(expr))
            }
            _ => {
                let span = self.peek_span().unwrap_or_else(|| span_between(0, 0));
                Err(ParseError {
                    message: "expected a statement".to_string(),
                    span,
                })
            }
        }
    }

    fn at_expr_start(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(
                TokenKind::Ident(_)
                    | TokenKind::Int(_)
                    | TokenKind::Char(_)
                    | TokenKind::String(_)
                    | TokenKind::KwTrue
                    | TokenKind::KwFalse
                    | TokenKind::LParen
                    | TokenKind::LBrace
                    | TokenKind::LBracket
                    | TokenKind::Minus
                    | TokenKind::Bang
            )
        )
    }

    fn parse_trait_def(&mut self) -> Result<TraitDef, ParseError> {
        let start = self.expect(TokenKind::KwTrait)?;
        let name = self.expect_ident()?;
        self.expect_stmt_terminator()?;
        let span = join(start.span, name.span);
        Ok(TraitDef { span, name })
    }

    fn parse_template_params(&mut self) -> Result<Vec<TemplateParam>, ParseError> {
        let mut params: Vec<TemplateParam> = Vec::new();
        if !self.at(TokenKind::Lt) {
            return Ok(params);
        }
        let lt = self.expect(TokenKind::Lt)?;
        if self.at(TokenKind::Gt) {
            return Err(ParseError {
                message: "template parameter list cannot be empty".to_string(),
                span: lt.span,
            });
        }

        loop {
            if self.at(TokenKind::KwConst) {
                let kw = self.expect(TokenKind::KwConst)?;
                let name = self.expect_ident()?;
                self.expect(TokenKind::Colon)?;
                let ty = self.parse_type_ref()?;
                params.push(TemplateParam {
                    span: join(kw.span, ty.span),
                    name,
                    kind: TemplateParamKind::Const { ty },
                });
            } else {
                let name = self.expect_ident()?;
                let bound = if self.at(TokenKind::Colon) {
                    self.next();
                    Some(self.expect_ident()?)
                } else {
                    None
                };
                let span = bound.as_ref().map_or(name.span, |b| join(name.span, b.span));
                params.push(TemplateParam {
                    span,
                    name,
                    kind: TemplateParamKind::Type { bound },
                });
            }
            if self.at(TokenKind::Comma) {
                self.next();
                continue;
            }
            break;
        }

        self.expect(TokenKind::Gt)?;
        Ok(params)
    }

    fn parse_type_stmt(&mut self) -> Result<Stmt, ParseError> {
        // `type Name = record { ... }` or `type Name<params> = TypeRef`
        let start = self.expect(TokenKind::KwType)?;
        let name = self.expect_ident()?;
        let params = self.parse_template_params()?;
        self.expect(TokenKind::Eq)?;

        if self.at(TokenKind::KwRecord) {
            if let Some(p) = params.first() {
                return Err(ParseError {
                    message: "record types cannot take template parameters".to_string(),
                    span: p.span,
                });
            }
            let def = self.parse_record_def_after_header(start.span, name)?;
            return Ok(Stmt::RecordDef(def));
        }

        let target = self.parse_type_ref()?;
        self.expect_stmt_terminator()?;
        let span = join(start.span, target.span);
        Ok(Stmt::TypeAlias(TypeAlias {
            span,
            name,
            params,
            target,
        }))
    }

    fn parse_record_def_after_header(
        &mut self,
        start_span: Span,
        name: Ident,
    ) -> Result<RecordDef, ParseError> {
        self.expect(TokenKind::KwRecord)?;
        let lb = self.expect(TokenKind::LBrace)?;

        let mut fields: Vec<RecordFieldDef> = Vec::new();
        loop {
            if self.at(TokenKind::RBrace) {
                let rb = self.expect(TokenKind::RBrace)?;
                self.expect_stmt_terminator()?;
                let span = join(start_span, rb.span);
                return Ok(RecordDef { span, name, fields });
            }
            if self.at(TokenKind::Eof) {
                return Err(ParseError {
                    message: "unterminated record type; expected '}'".to_string(),
                    span: join(start_span, lb.span),
                });
            }

            let private = if self.at(TokenKind::KwPriv) {
                self.next();
                true
            } else {
                false
            };
            let field_name = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let field_ty = self.parse_type_ref()?;
            fields.push(RecordFieldDef {
                span: join(field_name.span, field_ty.span),
                name: field_name,
                ty: field_ty,
                private,
            });

            if self.at(TokenKind::Comma) {
                self.next();
                continue;
            }
            if self.at(TokenKind::RBrace) {
                continue;
            }

            return Err(ParseError {
                message: "expected ',' or '}' in record type".to_string(),
                span: self.peek_span().unwrap_or_else(|| join(start_span, lb.span)),
            });
        }
    }

    fn parse_val_decl(&mut self) -> Result<ValDecl, ParseError> {
        let start = self.expect(TokenKind::KwVal)?;
        let mutable = self.eat(TokenKind::KwMut);
        let name = self.expect_ident()?;
        let ty = if self.eat(TokenKind::Colon) {
            Some(self.parse_type_ref()?)
        } else {
            None
        };
        self.expect(TokenKind::Eq)?;
        let expr = self.parse_expr()?;
        let span = join(start.span, expr.span);
        Ok(ValDecl {
            span,
            name,
            mutable,
            ty,
            expr,
        })
    }

    fn parse_cell_def(&mut self) -> Result<CellDef, ParseError> {
        let start = self.expect(TokenKind::KwCell)?;
        let name = self.expect_ident()?;
        let params = self.parse_template_params()?;
        self.expect(TokenKind::LParen)?;
        let args = self.parse_params()?;
        self.expect(TokenKind::RParen)?;

        let ret = if self.eat(TokenKind::Arrow) {
            Some(self.parse_type_ref()?)
        } else {
            None
        };

        self.expect(TokenKind::Colon)?;
        let body = self.parse_logic_block()?;
        let span = join(start.span, body.span);
        Ok(CellDef {
            span,
            name,
            params,
            args,
            ret,
            body,
        })
    }

    fn parse_logic_block(&mut self) -> Result<Block, ParseError> {
        // After ':', require NEWLINE INDENT ... DEDENT
        self.expect(TokenKind::Newline)?;
        let indent_tok = self.expect(TokenKind::Indent)?;

        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            if self.at(TokenKind::Dedent) {
                let dedent = self.expect(TokenKind::Dedent)?;
                let end = stmts.last().map_or(dedent.span, Stmt::span);
                let span = join(indent_tok.span, end);
                return Ok(Block { span, stmts });
            }
            if self.at(TokenKind::Eof) {
                return Err(ParseError {
                    message: "unterminated block; expected dedent".to_string(),
                    span: indent_tok.span,
                });
            }

            stmts.push(self.parse_stmt()?);
        }
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        if self.at(TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            let name = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let mutable = self.eat(TokenKind::KwMut);
            let ty = self.parse_type_ref()?;
            let span = join(name.span, ty.span);
            params.push(Param {
                span,
                name,
                mutable,
                ty,
            });

            if self.at(TokenKind::Comma) {
                self.next();
                if self.at(TokenKind::RParen) {
                    break;
                }
                continue;
            }
            break;
        }
        Ok(params)
    }

    fn parse_assign_stmt(&mut self) -> Result<AssignStmt, ParseError> {
        let target = self.expect_ident()?;
        self.expect(TokenKind::Eq)?;
        let expr = self.parse_expr()?;
        self.expect_stmt_terminator()?;
        let span = join(target.span, expr.span);
        Ok(AssignStmt { span, target, expr })
    }

    fn parse_if_stmt(&mut self) -> Result<IfStmt, ParseError> {
        let start = self.expect(TokenKind::KwIf)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Colon)?;
        let then_block = self.parse_logic_block()?;

        self.skip_newlines();
        let else_block = if self.eat(TokenKind::KwElse) {
            self.expect(TokenKind::Colon)?;
            Some(self.parse_logic_block()?)
        } else {
            None
        };

        let end_span = else_block
            .as_ref()
            .map(|b| b.span)
            .unwrap_or(then_block.span);
        let span = join(start.span, end_span);
        Ok(IfStmt {
            span,
            cond,
            then_block,
            else_block,
        })
    }

    fn parse_while_stmt(&mut self) -> Result<WhileStmt, ParseError> {
        let start = self.expect(TokenKind::KwWhile)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_logic_block()?;
        let span = join(start.span, body.span);
        Ok(WhileStmt { span, cond, body })
    }

    fn parse_return_stmt(&mut self) -> Result<ReturnStmt, ParseError> {
        let start = self.expect(TokenKind::KwReturn)?;
        let expr = if self.at_expr_start() {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect_stmt_terminator()?;
        let span = expr.as_ref().map_or(start.span, |e| join(start.span, e.span));
        Ok(ReturnStmt { span, expr })
    }

    /// `expand [init;] val [mut] x [: T] in range:` + block
    fn parse_expansion_stmt(&mut self) -> Result<ExpansionStmt, ParseError> {
        let kw = self.expect(TokenKind::KwExpand)?;

        let mut init = None;
        let var = loop {
            if !self.at(TokenKind::KwVal) {
                if init.is_some() {
                    return Err(ParseError {
                        message: "expected 'val' to declare the expansion variable".to_string(),
                        span: self.peek_span().unwrap_or(kw.span),
                    });
                }
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semi)?;
                init = Some(Box::new(Stmt::ExprStmt(expr)));
                continue;
            }

            let start = self.expect(TokenKind::KwVal)?;
            let mutable = self.eat(TokenKind::KwMut);
            let name = self.expect_ident()?;
            let ty = if self.eat(TokenKind::Colon) {
                Some(self.parse_type_ref()?)
            } else {
                None
            };

            if self.at(TokenKind::Eq) && init.is_none() {
                self.next();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semi)?;
                init = Some(Box::new(Stmt::Val(ValDecl {
                    span: join(start.span, expr.span),
                    name,
                    mutable,
                    ty,
                    expr,
                })));
                continue;
            }

            let end = ty.as_ref().map_or(name.span, |t| t.span);
            break ExpansionVar {
                span: join(start.span, end),
                name,
                mutable,
                ty,
            };
        };

        self.expect(TokenKind::KwIn)?;
        let range = self.parse_expr()?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_logic_block()?;
        let span = join(kw.span, body.span);
        Ok(ExpansionStmt {
            span,
            kw_span: kw.span,
            init,
            var,
            range,
            body,
            depth: None,
            expansion: Expansion::Pending,
        })
    }

    pub fn parse_type_ref(&mut self) -> Result<TypeRef, ParseError> {
        if self.at(TokenKind::LBracket) {
            let lb = self.expect(TokenKind::LBracket)?;
            let elem = self.parse_type_ref()?;
            self.expect(TokenKind::Semi)?;
            let len = self.parse_expr()?;
            let rb = self.expect(TokenKind::RBracket)?;
            return Ok(TypeRef {
                span: join(lb.span, rb.span),
                kind: TypeRefKind::Array {
                    elem: Box::new(elem),
                    len: Box::new(len),
                },
            });
        }

        let name = self.expect_ident()?;
        let mut end = name.span;
        let mut args = Vec::new();

        if self.at(TokenKind::Lt) {
            self.next();
            args = self.parse_type_args()?;
            let gt = self.expect(TokenKind::Gt)?;
            end = gt.span;
        }

        Ok(TypeRef {
            span: join(name.span, end),
            kind: TypeRefKind::Named { name, args },
        })
    }

    fn parse_type_args(&mut self) -> Result<Vec<TypeArg>, ParseError> {
        let mut args = Vec::new();
        if self.at(TokenKind::Gt) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_type_arg()?);
            if self.at(TokenKind::Comma) {
                self.next();
                continue;
            }
            break;
        }
        Ok(args)
    }

    /// A template argument. Bare names stay type references; the checker
    /// reinterprets them as values when the parameter is a `const`.
    fn parse_type_arg(&mut self) -> Result<TypeArg, ParseError> {
        let is_value = match self.peek_kind() {
            Some(TokenKind::LBracket) => false,
            Some(TokenKind::Ident(_)) => matches!(
                self.peek_kind_n(1),
                Some(
                    TokenKind::Plus
                        | TokenKind::Minus
                        | TokenKind::Star
                        | TokenKind::Slash
                        | TokenKind::Percent
                )
            ),
            _ => true,
        };
        if is_value {
            // Comparisons would swallow the closing `>`.
            Ok(TypeArg::Value(self.parse_add_expr()?))
        } else {
            Ok(TypeArg::Type(self.parse_type_ref()?))
        }
    }

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or_expr()
    }

    pub fn parse_expr_eof(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expr()?;
        self.skip_newlines();
        if !self.at(TokenKind::Eof) {
            return Err(ParseError {
                message: "expected end of input".to_string(),
                span: self.peek_span().unwrap_or(expr.span),
            });
        }
        Ok(expr)
    }

    fn parse_or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and_expr()?;
        while self.eat(TokenKind::OrOr) {
            let right = self.parse_and_expr()?;
            left = binary(left, BinOp::Or, right);
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_cmp_expr()?;
        while self.eat(TokenKind::AndAnd) {
            let right = self.parse_cmp_expr()?;
            left = binary(left, BinOp::And, right);
        }
        Ok(left)
    }

    fn parse_cmp_expr(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_add_expr()?;
        let op = match self.peek_kind() {
            Some(TokenKind::EqEq) => BinOp::Eq,
            Some(TokenKind::Neq) => BinOp::Ne,
            Some(TokenKind::Lt) => BinOp::Lt,
            Some(TokenKind::Gt) => BinOp::Gt,
            Some(TokenKind::Le) => BinOp::Le,
            Some(TokenKind::Ge) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.next();
        let right = self.parse_add_expr()?;
        let expr = binary(left, op, right);

        if matches!(
            self.peek_kind(),
            Some(
                TokenKind::EqEq
                    | TokenKind::Neq
                    | TokenKind::Lt
                    | TokenKind::Gt
                    | TokenKind::Le
                    | TokenKind::Ge
            )
        ) {
            let span = self.peek_span().unwrap_or(expr.span);
            return Err(ParseError {
                message: "chained comparisons are not supported; use parentheses or boolean operators"
                    .to_string(),
                span,
            });
        }

        Ok(expr)
    }

    fn parse_add_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_mul_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next();
            let right = self.parse_mul_expr()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_mul_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                Some(TokenKind::Percent) => BinOp::Rem,
                _ => break,
            };
            self.next();
            let right = self.parse_unary_expr()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            Some(TokenKind::Bang) => UnaryOp::Not,
            Some(TokenKind::Minus) => UnaryOp::Neg,
            _ => return self.parse_postfix_expr(),
        };
        let t = self.expect_any()?;
        let expr = self.parse_unary_expr()?;
        let span = join(t.span, expr.span);
        Ok(Expr {
            span,
            kind: ExprKind::Unary {
                op,
                expr: Box::new(expr),
            },
        })
    }

    fn parse_postfix_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary_expr()?;
        loop {
            // Record literal: `TypeName { field: value, ... }`
            if self.at(TokenKind::LBrace) {
                if let ExprKind::Ident(name) = &expr.kind {
                    expr = self.parse_record_lit(expr.span, name.clone())?;
                    continue;
                }
            }

            if self.eat(TokenKind::Dot) {
                let member = self.expect_ident()?;
                let span = join(expr.span, member.span);
                expr = Expr {
                    span,
                    kind: ExprKind::Member {
                        base: Box::new(expr),
                        member,
                    },
                };
                continue;
            }

            if self.eat(TokenKind::LBracket) {
                let index = self.parse_expr()?;
                let rb = self.expect(TokenKind::RBracket)?;
                let span = join(expr.span, rb.span);
                expr = Expr {
                    span,
                    kind: ExprKind::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    },
                };
                continue;
            }

            let generic_call = self.at(TokenKind::ColonColon)
                && self.peek_kind_n(1).is_some_and(|k| matches!(k, TokenKind::Lt));
            if generic_call || self.at(TokenKind::LParen) {
                let ExprKind::Ident(callee) = &expr.kind else {
                    return Err(ParseError {
                        message: "only named cells can be called".to_string(),
                        span: self.peek_span().unwrap_or(expr.span),
                    });
                };
                let callee = callee.clone();

                let mut generic_args = Vec::new();
                if generic_call {
                    self.expect(TokenKind::ColonColon)?;
                    self.expect(TokenKind::Lt)?;
                    generic_args = self.parse_type_args()?;
                    self.expect(TokenKind::Gt)?;
                }

                self.expect(TokenKind::LParen)?;
                let args = self.parse_comma_exprs(TokenKind::RParen)?;
                let rp = self.expect(TokenKind::RParen)?;
                let span = join(expr.span, rp.span);
                expr = Expr {
                    span,
                    kind: ExprKind::Call {
                        callee,
                        generic_args,
                        args,
                    },
                };
                continue;
            }

            break;
        }
        Ok(expr)
    }

    fn parse_record_lit(&mut self, start_span: Span, name: Ident) -> Result<Expr, ParseError> {
        let lb = self.expect(TokenKind::LBrace)?;

        let mut fields: Vec<(Ident, Expr)> = Vec::new();
        loop {
            if self.at(TokenKind::RBrace) {
                let rb = self.expect(TokenKind::RBrace)?;
                let span = join(start_span, rb.span);
                return Ok(Expr {
                    span,
                    kind: ExprKind::RecordLit { name, fields },
                });
            }
            if self.at(TokenKind::Eof) {
                return Err(ParseError {
                    message: "unterminated record literal; expected '}'".to_string(),
                    span: join(start_span, lb.span),
                });
            }

            let key = self.expect_ident()?;
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expr()?;
            fields.push((key, value));

            if self.at(TokenKind::Comma) {
                self.next();
                continue;
            }
            if self.at(TokenKind::RBrace) {
                continue;
            }

            return Err(ParseError {
                message: "expected ',' or '}' in record literal".to_string(),
                span: self.peek_span().unwrap_or_else(|| join(start_span, lb.span)),
            });
        }
    }

    /// Comma-separated expressions up to (not including) `close`; a trailing comma is allowed.
    fn parse_comma_exprs(&mut self, close: TokenKind) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        while !self.at(close.clone()) {
            items.push(self.parse_expr()?);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_primary_expr(&mut self) -> Result<Expr, ParseError> {
        let tok = self.expect_any()?;

        match tok.kind {
            TokenKind::Ident(name) => Ok(Expr {
                span: tok.span,
                kind: ExprKind::Ident(Ident {
                    span: tok.span,
                    node: name,
                }),
            }),
            TokenKind::Int(n) => {
                let value = i64::try_from(n).map_err(|_| ParseError {
                    message: "integer literal does not fit in 64 bits".to_string(),
                    span: tok.span,
                })?;
                Ok(Expr::int(tok.span, value))
            }
            TokenKind::Char(c) => Ok(Expr::new(tok.span, ExprKind::CharLit(c))),
            TokenKind::String(s) => Ok(Expr::new(tok.span, ExprKind::StringLit(s))),
            TokenKind::KwTrue => Ok(Expr::new(tok.span, ExprKind::BoolLit(true))),
            TokenKind::KwFalse => Ok(Expr::new(tok.span, ExprKind::BoolLit(false))),
            TokenKind::LBrace => {
                let items = self.parse_comma_exprs(TokenKind::RBrace)?;
                let rb = self.expect(TokenKind::RBrace)?;
                Ok(Expr::new(join(tok.span, rb.span), ExprKind::List(items)))
            }
            TokenKind::LBracket => {
                let items = self.parse_comma_exprs(TokenKind::RBracket)?;
                let rb = self.expect(TokenKind::RBracket)?;
                Ok(Expr::new(join(tok.span, rb.span), ExprKind::ArrayLit(items)))
            }
            TokenKind::LParen => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            _ => Err(ParseError {
                message: "expected an expression".to_string(),
                span: tok.span,
            }),
        }
    }

    fn skip_newlines(&mut self) {
        while self.at(TokenKind::Newline) {
            self.next();
        }
    }

    fn expect_stmt_terminator(&mut self) -> Result<(), ParseError> {
        if self.at(TokenKind::Newline) {
            self.next();
            Ok(())
        } else if self.at(TokenKind::Dedent) || self.at(TokenKind::Eof) {
            Ok(())
        } else {
            Err(ParseError {
                message: "expected end of line".to_string(),
                span: self.peek_span().unwrap_or_else(|| span_between(0, 0)),
            })
        }
    }

    fn expect_ident(&mut self) -> Result<Ident, ParseError> {
        let tok = self.expect_any()?;
        match tok.kind {
            TokenKind::Ident(name) => Ok(Ident {
                span: tok.span,
                node: name,
            }),
            _ => Err(ParseError {
                message: "expected identifier".to_string(),
                span: tok.span,
            }),
        }
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token, ParseError> {
        let tok = self.expect_any()?;
        if mem::discriminant(&tok.kind) == mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError {
                message: format!("expected {expected:?}"),
                span: tok.span,
            })
        }
    }

    fn expect_any(&mut self) -> Result<Token, ParseError> {
        let end = self.tokens.last().map_or_else(|| span_between(0, 0), |t| t.span);
        self.next().ok_or_else(|| ParseError {
            message: "unexpected end of input".to_string(),
            span: end,
        })
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.next();
            true
        } else {
            false
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind()
            .is_some_and(|k| mem::discriminant(k) == mem::discriminant(&kind))
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.idx)?.clone();
        self.idx += 1;
        Some(tok)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.idx).map(|t| &t.kind)
    }

    fn peek_kind_n(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.idx + n).map(|t| &t.kind)
    }

    fn peek_span(&self) -> Option<Span> {
        self.tokens.get(self.idx).map(|t| t.span)
    }
}

fn binary(left: Expr, op: BinOp, right: Expr) -> Expr {
    let span = join(left.span, right.span);
    Expr {
        span,
        kind: ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
    }
}
