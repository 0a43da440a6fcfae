//! Generic instantiation machinery shared by generic cells, generic type
//! aliases, and expansion statements.

mod args;
mod local_scope;
mod stack;
mod subst;

pub use args::{
    MultiLevelTemplateArgs, TemplateArg, TemplateParamDecl, TemplateParamKind, TemplateParamList,
    mangle,
};
pub use local_scope::LocalInstantiationScope;
pub(crate) use local_scope::ScopeMark;
pub use stack::{InstantiationFrame, InstantiationKind, InstantiationStack};
pub use subst::Substituter;
