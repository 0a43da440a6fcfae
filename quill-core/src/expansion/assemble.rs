use quill_ast::{Block, Expansion, ExpansionStmt};
use tracing::debug;

use crate::expansion::PendingExpansion;

/// Produce the final statement node. The statement is not touched again
/// unless an enclosing template is instantiated, which rebuilds it from its
/// substituted source.
pub fn assemble(pending: PendingExpansion, body: Block, expansion: Expansion) -> ExpansionStmt {
    match &expansion {
        Expansion::Expanded { instantiations, .. } => debug!(
            depth = pending.index.depth,
            count = instantiations.len(),
            "expansion statement expanded"
        ),
        Expansion::Empty => debug!(depth = pending.index.depth, "expansion over empty range"),
        Expansion::Deferred => debug!(depth = pending.index.depth, "expansion deferred"),
        Expansion::Pending => {}
    }
    ExpansionStmt {
        span: pending.span,
        kw_span: pending.kw_span,
        init: pending.init,
        var: pending.var,
        range: pending.range,
        body,
        depth: Some(pending.index.depth),
        expansion,
    }
}
