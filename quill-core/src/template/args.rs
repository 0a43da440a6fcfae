use crate::types::Type;

/// A resolved template argument.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TemplateArg {
    Type(Type),
    Value(i64),
}

impl TemplateArg {
    pub fn display(&self) -> String {
        match self {
            TemplateArg::Type(t) => t.canonical(),
            TemplateArg::Value(v) => v.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TemplateParamKind {
    Type { bound: Option<String> },
    Const,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TemplateParamDecl {
    pub name: String,
    pub kind: TemplateParamKind,
}

/// The parameters introduced by one template level: a generic cell, or one
/// expansion statement's synthetic index.
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateParamList {
    pub depth: u32,
    pub params: Vec<TemplateParamDecl>,
}

impl TemplateParamList {
    pub fn find(&self, name: &str) -> Option<&TemplateParamDecl> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Level {
    /// Kept in dependent form; substitution leaves references alone.
    Retained,
    Bound {
        names: Vec<String>,
        args: Vec<TemplateArg>,
    },
}

/// Template arguments for every enclosing level, outermost first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MultiLevelTemplateArgs {
    levels: Vec<Level>,
}

impl MultiLevelTemplateArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// `depth` outer levels that substitution must leave untouched.
    pub fn retained(depth: u32) -> Self {
        MultiLevelTemplateArgs {
            levels: vec![Level::Retained; depth as usize],
        }
    }

    pub fn bind(mut self, names: Vec<String>, args: Vec<TemplateArg>) -> Self {
        debug_assert_eq!(names.len(), args.len());
        self.levels.push(Level::Bound { names, args });
        self
    }

    pub fn depth(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn is_retained(&self, depth: u32) -> bool {
        matches!(self.levels.get(depth as usize), Some(Level::Retained) | None)
    }

    /// Innermost binding of `name`, if its level is being substituted.
    pub fn lookup(&self, name: &str) -> Option<&TemplateArg> {
        self.levels.iter().rev().find_map(|level| match level {
            Level::Retained => None,
            Level::Bound { names, args } => names
                .iter()
                .position(|n| n == name)
                .and_then(|i| args.get(i)),
        })
    }
}

/// `sum<[int; 3]>`
pub fn mangle(name: &str, args: &[TemplateArg]) -> String {
    let args_s = args
        .iter()
        .map(TemplateArg::display)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{name}<{args_s}>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retained_levels_are_skipped() {
        let args = MultiLevelTemplateArgs::retained(1)
            .bind(vec!["__expansion_index.1".into()], vec![TemplateArg::Value(2)]);
        assert_eq!(args.depth(), 2);
        assert!(args.is_retained(0));
        assert!(!args.is_retained(1));
        assert_eq!(args.lookup("__expansion_index.1"), Some(&TemplateArg::Value(2)));
        assert_eq!(args.lookup("T"), None);
    }

    #[test]
    fn mangled_names_spell_arguments() {
        let args = [TemplateArg::Type(Type::array(Type::Int, 3)), TemplateArg::Value(4)];
        assert_eq!(mangle("sum", &args), "sum<[int; 3], 4>");
    }
}
