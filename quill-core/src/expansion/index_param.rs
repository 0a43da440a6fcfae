use quill_ast::{Expr, Span};

use crate::actions::SemaActions;
use crate::template::{TemplateParamDecl, TemplateParamKind, TemplateParamList};

/// The synthetic `const` parameter an expansion statement is a template over.
///
/// Its name cannot be written in source, so it never collides with user
/// names, and the depth in the name keeps nested statements apart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexParam {
    pub name: String,
    pub depth: u32,
    pub span: Span,
}

impl IndexParam {
    pub fn param_list(&self) -> TemplateParamList {
        TemplateParamList {
            depth: self.depth,
            params: vec![TemplateParamDecl {
                name: self.name.clone(),
                kind: TemplateParamKind::Const,
            }],
        }
    }

    /// An expression naming the parameter.
    pub fn reference(&self) -> Expr {
        Expr::ident(self.span, self.name.clone())
    }
}

pub fn index_param_name(depth: u32) -> String {
    format!("__expansion_index.{depth}")
}

/// `frozen` is the depth recorded the first time the statement was built;
/// substituted copies keep it.
pub fn synthesize<A: SemaActions>(actions: &A, frozen: Option<u32>, span: Span) -> IndexParam {
    let depth = frozen.unwrap_or_else(|| actions.current_context().template_depth);
    IndexParam {
        name: index_param_name(depth),
        depth,
        span,
    }
}
