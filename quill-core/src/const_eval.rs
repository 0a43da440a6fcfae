//! Compile-time evaluation of integer and boolean expressions: array lengths,
//! value template arguments, and selection indices.

use quill_ast::{BinOp, Expr, ExprKind, UnaryOp};

use crate::error::{ErrorKind, SemanticError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstValue {
    Int(i64),
    Bool(bool),
    /// Mentions a value template parameter that is not bound yet.
    Dependent,
}

/// Names visible to constant evaluation.
pub trait ConstEnv {
    fn lookup_const(&self, name: &str) -> Option<ConstValue>;
}

impl ConstEnv for () {
    fn lookup_const(&self, _name: &str) -> Option<ConstValue> {
        None
    }
}

fn not_constant(expr: &Expr, what: &str) -> SemanticError {
    SemanticError::new(
        ErrorKind::IndexEvaluation,
        format!("{what} is not a constant expression"),
        expr.span,
    )
}

pub fn eval(expr: &Expr, env: &dyn ConstEnv) -> Result<ConstValue, SemanticError> {
    match &expr.kind {
        ExprKind::IntLit(n) => Ok(ConstValue::Int(*n)),
        ExprKind::BoolLit(b) => Ok(ConstValue::Bool(*b)),
        ExprKind::Ident(name) => env
            .lookup_const(&name.node)
            .ok_or_else(|| not_constant(expr, &format!("'{}'", name.node))),
        ExprKind::Unary { op, expr: inner } => match (op, eval(inner, env)?) {
            (_, ConstValue::Dependent) => Ok(ConstValue::Dependent),
            (UnaryOp::Neg, ConstValue::Int(n)) => n
                .checked_neg()
                .map(ConstValue::Int)
                .ok_or_else(|| overflow(expr)),
            (UnaryOp::Not, ConstValue::Bool(b)) => Ok(ConstValue::Bool(!b)),
            _ => Err(not_constant(expr, "operand")),
        },
        ExprKind::Binary { left, op, right } => {
            let l = eval(left, env)?;
            let r = eval(right, env)?;
            eval_binary(expr, *op, l, r)
        }
        _ => Err(not_constant(expr, "expression")),
    }
}

fn overflow(expr: &Expr) -> SemanticError {
    SemanticError::new(
        ErrorKind::IndexEvaluation,
        "overflow in constant expression",
        expr.span,
    )
}

fn eval_binary(
    expr: &Expr,
    op: BinOp,
    l: ConstValue,
    r: ConstValue,
) -> Result<ConstValue, SemanticError> {
    use ConstValue::*;

    if l == Dependent || r == Dependent {
        return Ok(Dependent);
    }
    let v = match (l, r) {
        (Int(a), Int(b)) => match op {
            BinOp::Add => Int(a.checked_add(b).ok_or_else(|| overflow(expr))?),
            BinOp::Sub => Int(a.checked_sub(b).ok_or_else(|| overflow(expr))?),
            BinOp::Mul => Int(a.checked_mul(b).ok_or_else(|| overflow(expr))?),
            BinOp::Div | BinOp::Rem if b == 0 => {
                return Err(SemanticError::new(
                    ErrorKind::IndexEvaluation,
                    "division by zero in constant expression",
                    expr.span,
                ));
            }
            BinOp::Div => Int(a.checked_div(b).ok_or_else(|| overflow(expr))?),
            BinOp::Rem => Int(a.checked_rem(b).ok_or_else(|| overflow(expr))?),
            BinOp::Eq => Bool(a == b),
            BinOp::Ne => Bool(a != b),
            BinOp::Lt => Bool(a < b),
            BinOp::Gt => Bool(a > b),
            BinOp::Le => Bool(a <= b),
            BinOp::Ge => Bool(a >= b),
            BinOp::And | BinOp::Or => return Err(not_constant(expr, "operand")),
        },
        (Bool(a), Bool(b)) => match op {
            BinOp::And => Bool(a && b),
            BinOp::Or => Bool(a || b),
            BinOp::Eq => Bool(a == b),
            BinOp::Ne => Bool(a != b),
            _ => return Err(not_constant(expr, "operand")),
        },
        _ => return Err(not_constant(expr, "operand")),
    };
    Ok(v)
}

/// Evaluate a non-negative index. `Ok(None)` means the index is still dependent.
pub fn eval_index(expr: &Expr, env: &dyn ConstEnv) -> Result<Option<u64>, SemanticError> {
    match eval(expr, env)? {
        ConstValue::Dependent => Ok(None),
        ConstValue::Int(n) => u64::try_from(n).map(Some).map_err(|_| {
            SemanticError::new(
                ErrorKind::IndexEvaluation,
                format!("index {n} is negative"),
                expr.span,
            )
        }),
        ConstValue::Bool(_) => Err(SemanticError::new(
            ErrorKind::IndexEvaluation,
            "index must be an integer",
            expr.span,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_ast::span;

    struct Params;

    impl ConstEnv for Params {
        fn lookup_const(&self, name: &str) -> Option<ConstValue> {
            (name == "N").then_some(ConstValue::Dependent)
        }
    }

    fn bin(l: Expr, op: BinOp, r: Expr) -> Expr {
        Expr::new(
            span(0, 1),
            ExprKind::Binary {
                left: Box::new(l),
                op,
                right: Box::new(r),
            },
        )
    }

    #[test]
    fn folds_arithmetic() {
        let e = bin(Expr::int(span(0, 1), 6), BinOp::Mul, Expr::int(span(0, 1), 7));
        assert_eq!(eval(&e, &()).unwrap(), ConstValue::Int(42));
    }

    #[test]
    fn template_parameters_stay_dependent() {
        let e = bin(Expr::ident(span(0, 1), "N"), BinOp::Add, Expr::int(span(0, 1), 1));
        assert_eq!(eval(&e, &Params).unwrap(), ConstValue::Dependent);
        assert_eq!(eval_index(&e, &Params).unwrap(), None);
    }

    #[test]
    fn rejects_runtime_names_and_negative_indices() {
        let err = eval(&Expr::ident(span(0, 1), "x"), &()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IndexEvaluation);
        let neg = bin(Expr::int(span(0, 1), 1), BinOp::Sub, Expr::int(span(0, 1), 2));
        assert!(eval_index(&neg, &()).unwrap_err().message.contains("negative"));
    }

    #[test]
    fn division_by_zero_is_reported() {
        let e = bin(Expr::int(span(0, 1), 1), BinOp::Rem, Expr::int(span(0, 1), 0));
        assert!(eval(&e, &()).unwrap_err().message.contains("division by zero"));
    }
}
