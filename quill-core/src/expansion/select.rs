use quill_ast::{Expr, ExprKind};

use crate::actions::SemaActions;
use crate::const_eval::{self, ConstEnv};
use crate::error::{ErrorKind, SemanticError};
use crate::expansion::range::{self, RangeClass};
use crate::template::{MultiLevelTemplateArgs, Substituter};
use crate::types::Type;

pub fn range_binding_name(depth: u32) -> String {
    format!("__expansion_range.{depth}")
}

/// The expression for element `index` of `range`.
///
/// `base` is what array and aggregate selections read from: the hidden range
/// binding when there is one, otherwise the range itself. List selections
/// always keep the list so the selected element is evaluated on its own.
pub fn build_selector(class: &RangeClass, range: &Expr, base: &Expr, index: Expr) -> Expr {
    let span = range.span;
    let kind = match class {
        RangeClass::List { .. } => ExprKind::ListSelect {
            list: Box::new(range.clone()),
            index: Box::new(index),
        },
        RangeClass::Aggregate { members, .. } => ExprKind::MemberSelect {
            base: Box::new(base.clone()),
            members: members.clone(),
            index: Box::new(index),
        },
        RangeClass::Array { .. } | RangeClass::Dependent => ExprKind::Index {
            base: Box::new(base.clone()),
            index: Box::new(index),
        },
    };
    Expr::new(span, kind)
}

/// Element selection with an arbitrary index expression. A constant index
/// collapses the selection right away; a dependent one stays symbolic.
pub fn select_element<A: SemaActions + ConstEnv>(
    actions: &A,
    range: &Expr,
    range_ty: &Type,
    index: &Expr,
) -> Result<Expr, SemanticError> {
    let class = range::classify(actions, range, range_ty)?;
    let Some(i) = const_eval::eval_index(index, actions)? else {
        return Ok(build_selector(&class, range, range, index.clone()));
    };
    if let Some(count) = class.count() {
        if i >= count {
            return Err(SemanticError::new(
                ErrorKind::IndexEvaluation,
                format!("index {i} is out of range for a range of {count} elements"),
                index.span,
            ));
        }
    }
    let literal = i64::try_from(i).map_err(|_| {
        SemanticError::new(ErrorKind::IndexEvaluation, "index does not fit in 64 bits", index.span)
    })?;
    let selector = build_selector(&class, range, range, Expr::int(index.span, literal));
    // Substituting nothing still folds literal selections.
    Substituter::new(&MultiLevelTemplateArgs::new()).expr(&selector)
}
