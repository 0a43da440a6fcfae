use std::collections::HashMap;

use miette::Diagnostic;
use quill_ast::{BinOp, Block, CellDef, ExpansionStmt, Expansion, Expr, ExprKind, Span, Stmt, UnaryOp};
use quill_core::{CheckedProgram, Checker};
use thiserror::Error;
use tracing::{debug, trace};

use crate::value::Value;

#[derive(Clone, Debug, Error, Diagnostic)]
#[error("runtime error: {message}")]
#[diagnostic(code(quill::run))]
pub struct RuntimeError {
    pub message: String,
    #[label]
    pub span: Span,
}

impl RuntimeError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        RuntimeError {
            message: message.into(),
            span,
        }
    }
}

/// How a statement finished. Loops and expansion statements consume
/// `Break` and `Continue`; cells consume `Return`.
#[derive(Clone, Debug, PartialEq)]
pub enum Flow {
    Next,
    Break,
    Continue,
    Return(Value),
}

#[derive(Clone, Debug)]
pub struct VmConfig {
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self { max_call_depth: 256 }
    }
}

#[derive(Clone, Debug)]
pub struct ExecOutcome {
    pub value: Value,
    /// Everything written by `print`, one line per call.
    pub stdout: String,
}

/// Parse, check, and run `entry` of a source file.
pub fn run_source(src: &str, entry: &str) -> miette::Result<ExecOutcome> {
    let program = quill_parse::parse_source(src)?;
    let checked = Checker::new().check_program(&program)?;
    Vm::new(&checked, VmConfig::default())
        .run_entry(entry)
        .map_err(miette::Report::new)
}

/// Tree-walking interpreter over an elaborated program.
pub struct Vm<'p> {
    cfg: VmConfig,
    cells: HashMap<&'p str, &'p CellDef>,
    // One frame per active call, each a stack of block scopes.
    frames: Vec<Vec<HashMap<String, Value>>>,
    stdout: String,
}

impl<'p> Vm<'p> {
    pub fn new(program: &'p CheckedProgram, cfg: VmConfig) -> Self {
        let cells = program
            .cells()
            .map(|c| (c.name.node.as_str(), c))
            .collect();
        Self {
            cfg,
            cells,
            frames: Vec::new(),
            stdout: String::new(),
        }
    }

    pub fn run_entry(&mut self, entry: &str) -> Result<ExecOutcome, RuntimeError> {
        let Some(cell) = self.cells.get(entry).copied() else {
            return Err(RuntimeError::new(
                format!("no cell named '{entry}' to run"),
                quill_ast::span(0, 0),
            ));
        };
        if !cell.args.is_empty() {
            return Err(RuntimeError::new(
                format!("entry cell '{entry}' must not take arguments"),
                cell.name.span,
            ));
        }
        debug!(entry, "running");
        let value = self.call_cell(cell, Vec::new(), cell.name.span)?;
        Ok(ExecOutcome {
            value,
            stdout: std::mem::take(&mut self.stdout),
        })
    }

    fn call_cell(&mut self, cell: &'p CellDef, args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
        if self.frames.len() >= self.cfg.max_call_depth {
            return Err(RuntimeError::new(
                format!("call depth limit of {} exceeded", self.cfg.max_call_depth),
                span,
            ));
        }
        trace!(cell = %cell.name.node, "call");
        let scope = cell
            .args
            .iter()
            .zip(args)
            .map(|(p, v)| (p.name.node.clone(), v))
            .collect();
        self.frames.push(vec![scope]);
        let result = self.exec_stmts(&cell.body.stmts);
        self.frames.pop();
        match result? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::Unit),
        }
    }

    fn scopes(&mut self) -> &mut Vec<HashMap<String, Value>> {
        if self.frames.is_empty() {
            self.frames.push(vec![HashMap::new()]);
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn push_scope(&mut self) {
        self.scopes().push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes().pop();
    }

    fn define(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes().last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn lookup(&self, name: &str, span: Span) -> Result<Value, RuntimeError> {
        self.frames
            .last()
            .and_then(|f| f.iter().rev().find_map(|s| s.get(name)))
            .cloned()
            .ok_or_else(|| RuntimeError::new(format!("unbound name '{name}'"), span))
    }

    fn assign(&mut self, name: &str, value: Value, span: Span) -> Result<(), RuntimeError> {
        let slot = self
            .scopes()
            .iter_mut()
            .rev()
            .find_map(|s| s.get_mut(name));
        match slot {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RuntimeError::new(format!("unbound name '{name}'"), span)),
        }
    }

    fn exec_block(&mut self, block: &Block) -> Result<Flow, RuntimeError> {
        self.push_scope();
        let flow = self.exec_stmts(&block.stmts);
        self.pop_scope();
        flow
    }

    fn exec_stmts(&mut self, stmts: &[Stmt]) -> Result<Flow, RuntimeError> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Next => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Next)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, RuntimeError> {
        match stmt {
            Stmt::TypeAlias(_) | Stmt::TraitDef(_) | Stmt::RecordDef(_) | Stmt::CellDef(_) => {
                Ok(Flow::Next)
            }
            Stmt::Val(v) => {
                let value = self.eval_expr(&v.expr)?;
                self.define(&v.name.node, value);
                Ok(Flow::Next)
            }
            Stmt::Assign(a) => {
                let value = self.eval_expr(&a.expr)?;
                self.assign(&a.target.node, value, a.target.span)?;
                Ok(Flow::Next)
            }
            Stmt::If(s) => {
                if self.eval_bool(&s.cond)? {
                    self.exec_block(&s.then_block)
                } else if let Some(b) = &s.else_block {
                    self.exec_block(b)
                } else {
                    Ok(Flow::Next)
                }
            }
            Stmt::While(w) => {
                while self.eval_bool(&w.cond)? {
                    match self.exec_block(&w.body)? {
                        Flow::Break => break,
                        Flow::Next | Flow::Continue => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Next)
            }
            Stmt::Expansion(e) => {
                self.push_scope();
                let flow = self.exec_expansion(e);
                self.pop_scope();
                flow
            }
            Stmt::Break(_) => Ok(Flow::Break),
            Stmt::Continue(_) => Ok(Flow::Continue),
            Stmt::Return(r) => {
                let value = match &r.expr {
                    Some(e) => self.eval_expr(e)?,
                    None => Value::Unit,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Assert(a) => {
                if self.eval_bool(&a.expr)? {
                    Ok(Flow::Next)
                } else {
                    Err(RuntimeError::new("assertion failed", a.expr.span))
                }
            }
            Stmt::ExprStmt(e) => {
                self.eval_expr(e)?;
                Ok(Flow::Next)
            }
        }
    }

    /// The init statement runs first, then the range binding, then each
    /// instantiation in index order in its own scope.
    fn exec_expansion(&mut self, e: &ExpansionStmt) -> Result<Flow, RuntimeError> {
        if let Some(init) = &e.init {
            self.exec_stmt(init)?;
        }
        let (binding, instantiations) = match &e.expansion {
            Expansion::Empty => {
                // Array and record ranges are still evaluated once.
                if !matches!(e.range.kind, ExprKind::List(_)) {
                    self.eval_expr(&e.range)?;
                }
                return Ok(Flow::Next);
            }
            Expansion::Expanded {
                range_binding,
                instantiations,
            } => (range_binding, instantiations),
            Expansion::Pending | Expansion::Deferred => {
                return Err(RuntimeError::new(
                    "expansion statement was never expanded",
                    e.kw_span,
                ));
            }
        };
        if let Some(b) = binding {
            let value = self.eval_expr(&b.expr)?;
            self.define(&b.name.node, value);
        }
        for inst in instantiations {
            trace!(index = inst.index, "expansion step");
            match self.exec_block(&inst.body)? {
                Flow::Next | Flow::Continue => {}
                Flow::Break => break,
                ret @ Flow::Return(_) => return Ok(ret),
            }
        }
        Ok(Flow::Next)
    }

    fn eval_bool(&mut self, expr: &Expr) -> Result<bool, RuntimeError> {
        match self.eval_expr(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(RuntimeError::new(
                format!("expected bool, found {}", other.kind_name()),
                expr.span,
            )),
        }
    }

    fn eval_index(&mut self, expr: &Expr) -> Result<usize, RuntimeError> {
        match self.eval_expr(expr)? {
            Value::Int(n) => usize::try_from(n)
                .map_err(|_| RuntimeError::new(format!("negative index {n}"), expr.span)),
            other => Err(RuntimeError::new(
                format!("index must be int, found {}", other.kind_name()),
                expr.span,
            )),
        }
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Ident(name) => self.lookup(&name.node, name.span),
            ExprKind::IntLit(n) => Ok(Value::Int(*n)),
            ExprKind::CharLit(c) => Ok(Value::Char(*c)),
            ExprKind::BoolLit(b) => Ok(Value::Bool(*b)),
            ExprKind::StringLit(s) => Ok(Value::Str(s.clone())),
            ExprKind::List(_) => Err(RuntimeError::new(
                "a brace-enclosed list has no runtime value",
                span,
            )),
            ExprKind::ArrayLit(items) => items
                .iter()
                .map(|e| self.eval_expr(e))
                .collect::<Result<_, _>>()
                .map(Value::Array),
            ExprKind::RecordLit { name, fields } => {
                let mut out = Vec::with_capacity(fields.len());
                for (f, e) in fields {
                    out.push((f.node.clone(), self.eval_expr(e)?));
                }
                Ok(Value::Record(name.node.clone(), out))
            }
            ExprKind::Unary { op, expr: inner } => match (op, self.eval_expr(inner)?) {
                (UnaryOp::Neg, Value::Int(n)) => n
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| RuntimeError::new("integer overflow", span)),
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (_, v) => Err(RuntimeError::new(
                    format!("unsupported operand {}", v.kind_name()),
                    span,
                )),
            },
            ExprKind::Binary { left, op, right } => {
                // `&&` and `||` short-circuit.
                match op {
                    BinOp::And => {
                        return Ok(Value::Bool(self.eval_bool(left)? && self.eval_bool(right)?));
                    }
                    BinOp::Or => {
                        return Ok(Value::Bool(self.eval_bool(left)? || self.eval_bool(right)?));
                    }
                    _ => {}
                }
                let l = self.eval_expr(left)?;
                let r = self.eval_expr(right)?;
                eval_binop(*op, l, r, span)
            }
            ExprKind::Member { base, member } => {
                let base = self.eval_expr(base)?;
                base.field(&member.node).cloned().ok_or_else(|| {
                    RuntimeError::new(
                        format!("{} has no field '{}'", base.kind_name(), member.node),
                        member.span,
                    )
                })
            }
            ExprKind::Index { base, index } => {
                let base = self.eval_expr(base)?;
                let i = self.eval_index(index)?;
                match base {
                    Value::Array(items) => {
                        let len = items.len();
                        items.into_iter().nth(i).ok_or_else(|| {
                            RuntimeError::new(
                                format!("index {i} out of bounds for length {len}"),
                                index.span,
                            )
                        })
                    }
                    other => Err(RuntimeError::new(
                        format!("cannot index {}", other.kind_name()),
                        span,
                    )),
                }
            }
            ExprKind::Call { callee, args, .. } => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.eval_expr(a)?);
                }
                self.call(&callee.node, values, span)
            }
            ExprKind::ListSelect { list, index } => {
                let ExprKind::List(items) = &list.kind else {
                    return Err(RuntimeError::new("malformed list selection", span));
                };
                let i = self.eval_index(index)?;
                let item = items
                    .get(i)
                    .ok_or_else(|| RuntimeError::new(format!("list index {i} out of bounds"), span))?;
                self.eval_expr(item)
            }
            ExprKind::MemberSelect {
                base,
                members,
                index,
            } => {
                let i = self.eval_index(index)?;
                let member = members
                    .get(i)
                    .ok_or_else(|| RuntimeError::new(format!("member index {i} out of bounds"), span))?;
                let base = self.eval_expr(base)?;
                base.field(&member.node)
                    .cloned()
                    .ok_or_else(|| RuntimeError::new(format!("no field '{}'", member.node), span))
            }
        }
    }

    fn call(&mut self, name: &str, args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
        match name {
            "print" => {
                for v in &args {
                    self.stdout.push_str(&v.to_string());
                }
                self.stdout.push('\n');
                Ok(Value::Unit)
            }
            "len" => match args.first() {
                Some(Value::Array(items)) => Ok(Value::Int(items.len() as i64)),
                _ => Err(RuntimeError::new("len expects an array", span)),
            },
            _ => {
                let Some(cell) = self.cells.get(name).copied() else {
                    return Err(RuntimeError::new(format!("unknown cell '{name}'"), span));
                };
                self.call_cell(cell, args, span)
            }
        }
    }
}

fn eval_binop(op: BinOp, l: Value, r: Value, span: Span) -> Result<Value, RuntimeError> {
    let overflow = || RuntimeError::new("integer overflow", span);
    match (op, l, r) {
        (BinOp::Add, Value::Int(a), Value::Int(b)) => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Sub, Value::Int(a), Value::Int(b)) => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Mul, Value::Int(a), Value::Int(b)) => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Div | BinOp::Rem, Value::Int(_), Value::Int(0)) => {
            Err(RuntimeError::new("division by zero", span))
        }
        (BinOp::Div, Value::Int(a), Value::Int(b)) => a.checked_div(b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Rem, Value::Int(a), Value::Int(b)) => a.checked_rem(b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
        (BinOp::Eq, a, b) => Ok(Value::Bool(a == b)),
        (BinOp::Ne, a, b) => Ok(Value::Bool(a != b)),
        (BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge, a, b) => {
            let ord = match (&a, &b) {
                (Value::Int(x), Value::Int(y)) => x.cmp(y),
                (Value::Char(x), Value::Char(y)) => x.cmp(y),
                _ => {
                    return Err(RuntimeError::new(
                        format!("cannot compare {} and {}", a.kind_name(), b.kind_name()),
                        span,
                    ));
                }
            };
            Ok(Value::Bool(match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Gt => ord.is_gt(),
                BinOp::Le => ord.is_le(),
                _ => ord.is_ge(),
            }))
        }
        (op, a, b) => Err(RuntimeError::new(
            format!(
                "operator '{}' cannot be applied to {} and {}",
                op.symbol(),
                a.kind_name(),
                b.kind_name()
            ),
            span,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_ast::{ExpansionVar, Spanned, span};

    #[test]
    fn deferred_expansion_is_a_runtime_error() {
        let program = quill_parse::parse_source("cell main():\n    print(1)\n").expect("parse");
        let checked = Checker::new().check_program(&program).expect("sema");
        let mut vm = Vm::new(&checked, VmConfig::default());

        let sp = span(0, 6);
        let stmt = ExpansionStmt {
            span: sp,
            kw_span: sp,
            init: None,
            var: ExpansionVar {
                span: sp,
                name: Spanned::new(sp, "x".to_string()),
                mutable: false,
                ty: None,
            },
            range: Expr::ident(sp, "xs"),
            body: Block {
                span: sp,
                stmts: Vec::new(),
            },
            depth: Some(0),
            expansion: Expansion::Deferred,
        };
        let err = vm.exec_expansion(&stmt).expect_err("deferred");
        assert!(err.message.contains("never expanded"), "{}", err.message);
        assert_eq!(err.span, sp);
    }
}
