#![forbid(unsafe_code)]

mod actions;
mod config;
pub mod const_eval;
mod error;
pub mod expansion;
mod program;
mod sema;
pub mod template;
mod types;

pub use actions::{
    Annotation, CellParam, CellSig, DeclConsumer, DeclContext, DeclEvent, DeclKind, RecordField,
    RecordInfo, SemaActions, Substituted, TemplateKind,
};
pub use config::{CheckerConfig, DEFAULT_MAX_EXPANSION_SIZE, DEFAULT_MAX_INSTANTIATION_DEPTH};
pub use const_eval::ConstValue;
pub use error::{ErrorKind, Note, SemanticError};
pub use expansion::{ExpansionHeading, IndexParam, PendingExpansion, RangeClass};
pub use program::{CheckedProgram, ExpansionSite};
pub use sema::Checker;
pub use types::{ArrayLen, Type};
