use quill_ast::{Expr, Span, TypeRef, TypeRefKind};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Unit,
    Bool,
    Int,
    Char,
    String,
    Array {
        elem: Box<Type>,
        len: ArrayLen,
    },

    // Canonical record name. Records declared inside a block carry a `'N`
    // suffix so two blocks can each declare their own `Point`.
    Record(String),

    // A brace-enclosed list; one entry per element.
    List(Vec<Type>),

    // Type template parameter of the enclosing generic cell.
    Param(String),

    // Depends on template arguments that are not known yet.
    Dependent,

    // Left behind by a declaration that failed to check.
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArrayLen {
    Known(u64),
    Dependent,
}

impl Type {
    pub fn array(elem: Type, len: u64) -> Self {
        Type::Array {
            elem: Box::new(elem),
            len: ArrayLen::Known(len),
        }
    }

    pub fn display(&self) -> String {
        self.render(false)
    }

    /// Like [`Type::display`] but keeps local record suffixes; used to mangle
    /// instantiation names.
    pub fn canonical(&self) -> String {
        self.render(true)
    }

    fn render(&self, canonical: bool) -> String {
        match self {
            Type::Unit => "Unit".to_string(),
            Type::Bool => "bool".to_string(),
            Type::Int => "int".to_string(),
            Type::Char => "char".to_string(),
            Type::String => "String".to_string(),
            Type::Array { elem, len } => match len {
                ArrayLen::Known(n) => format!("[{}; {n}]", elem.render(canonical)),
                ArrayLen::Dependent => format!("[{}; _]", elem.render(canonical)),
            },
            Type::Record(name) if canonical => name.clone(),
            Type::Record(name) => record_display_name(name).to_string(),
            Type::List(elems) => {
                let elems_s = elems
                    .iter()
                    .map(|t| t.render(canonical))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{elems_s}}}")
            }
            Type::Param(name) => name.clone(),
            Type::Dependent => "<dependent>".to_string(),
            Type::Error => "<error>".to_string(),
        }
    }

    /// True if the type mentions a template parameter that is not bound yet.
    pub fn is_dependent(&self) -> bool {
        match self {
            Type::Param(_) | Type::Dependent => true,
            Type::Array { elem, len } => *len == ArrayLen::Dependent || elem.is_dependent(),
            Type::List(elems) => elems.iter().any(Type::is_dependent),
            _ => false,
        }
    }

    /// Types that skip compatibility checks: dependent ones and error
    /// placeholders.
    pub fn is_unknown(&self) -> bool {
        match self {
            Type::Error => true,
            Type::Array { elem, .. } => elem.is_unknown() || self.is_dependent(),
            Type::List(elems) => elems.iter().any(Type::is_unknown),
            _ => self.is_dependent(),
        }
    }

    /// Spell the type back as syntax so it can be substituted into a tree.
    /// Brace lists and placeholder types have no spelling.
    pub fn to_type_ref(&self, span: Span) -> Option<TypeRef> {
        let named = |name: &str| Some(TypeRef::named(span, name));
        match self {
            Type::Unit => named("Unit"),
            Type::Bool => named("bool"),
            Type::Int => named("int"),
            Type::Char => named("char"),
            Type::String => named("String"),
            Type::Record(name) | Type::Param(name) => named(name),
            Type::Array {
                elem,
                len: ArrayLen::Known(n),
            } => {
                let len = i64::try_from(*n).ok()?;
                Some(TypeRef {
                    span,
                    kind: TypeRefKind::Array {
                        elem: Box::new(elem.to_type_ref(span)?),
                        len: Box::new(Expr::int(span, len)),
                    },
                })
            }
            Type::Array { .. } | Type::List(_) | Type::Dependent | Type::Error => None,
        }
    }
}

/// `Point'3` -> `Point`
pub fn record_display_name(canonical: &str) -> &str {
    canonical.split('\'').next().unwrap_or(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_hides_local_record_suffix() {
        let t = Type::array(Type::Record("Point'2".to_string()), 3);
        assert_eq!(t.display(), "[Point; 3]");
        assert_eq!(t.canonical(), "[Point'2; 3]");
    }

    #[test]
    fn dependence_propagates_through_arrays_and_lists() {
        let arr = Type::Array {
            elem: Box::new(Type::Int),
            len: ArrayLen::Dependent,
        };
        assert!(arr.is_dependent());
        assert!(Type::List(vec![Type::Int, Type::Param("T".into())]).is_dependent());
        assert!(!Type::array(Type::Char, 2).is_dependent());
        assert!(Type::Error.is_unknown());
        assert!(!Type::Error.is_dependent());
    }

    #[test]
    fn list_types_have_no_spelling() {
        let span = quill_ast::span(0, 0);
        assert!(Type::List(vec![Type::Int]).to_type_ref(span).is_none());
        assert!(Type::array(Type::Int, 4).to_type_ref(span).is_some());
    }
}
