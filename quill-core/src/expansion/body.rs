use quill_ast::{Block, Instantiation, Span};
use tracing::trace;

use crate::actions::{DeclEvent, DeclKind, SemaActions};
use crate::error::{ErrorKind, Note, SemanticError};
use crate::expansion::index_param::IndexParam;
use crate::template::{InstantiationFrame, InstantiationKind, MultiLevelTemplateArgs, TemplateArg};

/// Instantiate `unit` (the iteration variable declaration followed by the
/// body) once per index in `0..count`, in order. Stops at the first failing
/// index; nothing from a failed statement is kept.
#[tracing::instrument(level = "debug", skip(actions, unit, index), fields(depth = index.depth))]
pub fn instantiate_all<A: SemaActions>(
    actions: &mut A,
    unit: &Block,
    index: &IndexParam,
    count: u64,
    kw_span: Span,
) -> Result<Vec<Instantiation>, SemanticError> {
    let mut out = Vec::with_capacity(count.min(1024) as usize);
    for i in 0..count {
        let value = i64::try_from(i).map_err(|_| {
            SemanticError::new(ErrorKind::Limit, "expansion index does not fit in 64 bits", kw_span)
        })?;
        let args = MultiLevelTemplateArgs::retained(index.depth)
            .bind(vec![index.name.clone()], vec![TemplateArg::Value(value)]);
        let frame = InstantiationFrame {
            kind: InstantiationKind::Expansion {
                depth: index.depth,
                index: i,
            },
            span: kw_span,
        };
        let body = actions
            .instantiate_statement(unit, &args, frame)
            .map_err(|e| instantiation_failed(e, i, kw_span))?;
        trace!(index = i, stmts = body.stmts.len(), "instantiated expansion body");
        if let Some(quill_ast::Stmt::Val(var)) = body.stmts.first() {
            actions.broadcast_declaration(DeclEvent {
                kind: DeclKind::Val,
                name: var.name.node.clone(),
                ty: None,
                span: var.span,
                index: Some(i),
            });
        }
        out.push(Instantiation { index: i, body });
    }
    Ok(out)
}

fn instantiation_failed(err: SemanticError, index: u64, kw_span: Span) -> SemanticError {
    let kind = match err.kind {
        ErrorKind::Limit => ErrorKind::Limit,
        _ => ErrorKind::Instantiation,
    };
    let mut notes = vec![Note {
        message: format!("in instantiation for index {index}"),
        span: err.span,
    }];
    notes.extend(err.notes);
    SemanticError {
        message: format!(
            "expansion statement is ill-formed: instantiation {index} failed: {}",
            err.message
        ),
        span: kw_span,
        kind,
        notes,
    }
}
