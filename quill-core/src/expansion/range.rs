use quill_ast::{Expr, Ident, Spanned};

use crate::actions::SemaActions;
use crate::error::{ErrorKind, SemanticError};
use crate::types::{ArrayLen, Type};

/// How an expansion range is walked. Transient; only the resulting
/// instantiations are kept on the statement.
#[derive(Clone, Debug, PartialEq)]
pub enum RangeClass {
    /// `[T; N]`, selected with `range[i]`.
    Array { len: u64, elem: Type },
    /// `{e0, e1, ...}`, selected by position.
    List { elems: Vec<Type> },
    /// A record whose members are all accessible, selected member by member.
    Aggregate { record: String, members: Vec<Ident> },
    /// Size depends on an enclosing template parameter.
    Dependent,
}

impl RangeClass {
    /// Number of instantiations, if known.
    pub fn count(&self) -> Option<u64> {
        match self {
            RangeClass::Array { len, .. } => Some(*len),
            RangeClass::List { elems } => Some(elems.len() as u64),
            RangeClass::Aggregate { members, .. } => Some(members.len() as u64),
            RangeClass::Dependent => None,
        }
    }

    pub fn strategy(&self) -> &'static str {
        match self {
            RangeClass::Array { .. } => "array-index",
            RangeClass::List { .. } => "list-position",
            RangeClass::Aggregate { .. } => "aggregate-member",
            RangeClass::Dependent => "dependent",
        }
    }

    /// Array and record ranges are evaluated once into a hidden binding;
    /// list elements are evaluated inside their own instantiation.
    pub fn needs_binding(&self) -> bool {
        matches!(self, RangeClass::Array { .. } | RangeClass::Aggregate { .. })
    }
}

fn shape_error(range: &Expr, message: String) -> SemanticError {
    SemanticError::new(ErrorKind::Shape, message, range.span)
}

/// Pick the strategy for a range of type `ty`. Shape errors are reported here,
/// before anything is instantiated.
pub fn classify<A: SemaActions>(
    actions: &A,
    range: &Expr,
    ty: &Type,
) -> Result<RangeClass, SemanticError> {
    let class = match ty {
        // A list's length is fixed by its syntax even when its elements are dependent.
        Type::List(elems) => RangeClass::List {
            elems: elems.clone(),
        },
        Type::Array {
            elem,
            len: ArrayLen::Known(len),
        } => RangeClass::Array {
            len: *len,
            elem: (**elem).clone(),
        },
        Type::Array {
            len: ArrayLen::Dependent,
            ..
        }
        | Type::Param(_)
        | Type::Dependent => RangeClass::Dependent,
        Type::Record(_) => {
            let Some(record) = actions.lookup_record(ty) else {
                return Err(shape_error(
                    range,
                    format!("unknown record type '{}'", ty.display()),
                ));
            };
            if let Some(hidden) = record
                .fields
                .iter()
                .find(|f| !actions.is_accessible_path(record, &[f.name.as_str()]))
            {
                return Err(shape_error(
                    range,
                    format!(
                        "cannot expand over '{}': member '{}' is not accessible",
                        ty.display(),
                        hidden.name
                    ),
                ));
            }
            RangeClass::Aggregate {
                record: record.name.clone(),
                members: record
                    .fields
                    .iter()
                    .map(|f| Spanned::new(range.span, f.name.clone()))
                    .collect(),
            }
        }
        _ => {
            return Err(shape_error(
                range,
                format!(
                    "cannot expand over a value of type '{}': expected an array, a brace-enclosed list, or a record",
                    ty.display()
                ),
            ));
        }
    };
    Ok(class)
}
