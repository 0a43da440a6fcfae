#![forbid(unsafe_code)]

use std::path::Path;

use miette::IntoDiagnostic;
use quill_ast::{Expansion, Span};
use quill_core::CheckedProgram;
use serde::Serialize;

pub const SCHEMA: &str = "quill.expansion-report/v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpanRange {
    pub offset: usize,
    pub len: usize,
}

impl From<Span> for SpanRange {
    fn from(s: Span) -> Self {
        Self {
            offset: s.offset(),
            len: s.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpansionReport {
    pub schema: &'static str,
    pub input: String,
    /// Generic cell instantiations, by mangled name.
    pub instantiated_cells: Vec<String>,
    pub expansions: Vec<ExpansionEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpansionEntry {
    pub cell: String,
    pub span: SpanRange,
    pub keyword: SpanRange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    pub state: &'static str,
    pub instantiations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_binding: Option<String>,
}

pub fn expansion_report(input: &str, checked: &CheckedProgram) -> ExpansionReport {
    let expansions = checked
        .expansions()
        .into_iter()
        .map(|site| {
            let stmt = site.stmt;
            let (state, range_binding) = match &stmt.expansion {
                Expansion::Pending => ("pending", None),
                Expansion::Deferred => ("deferred", None),
                Expansion::Empty => ("empty", None),
                Expansion::Expanded { range_binding, .. } => (
                    "expanded",
                    range_binding.as_ref().map(|b| b.name.node.clone()),
                ),
            };
            ExpansionEntry {
                cell: site.cell.to_string(),
                span: stmt.span.into(),
                keyword: stmt.kw_span.into(),
                depth: stmt.depth,
                state,
                instantiations: stmt.expansion.instantiations().len(),
                range_binding,
            }
        })
        .collect();

    ExpansionReport {
        schema: SCHEMA,
        input: input.to_string(),
        instantiated_cells: checked
            .instantiations
            .iter()
            .map(|c| c.name.node.clone())
            .collect(),
        expansions,
    }
}

pub fn write_report(path: &Path, report: &ExpansionReport) -> miette::Result<()> {
    let json = serde_json::to_string_pretty(report).into_diagnostic()?;
    std::fs::write(path, json).into_diagnostic()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::Checker;

    #[test]
    fn report_lists_each_expansion_with_its_state() {
        let src = "cell main():\n    val xs = [1, 2]\n    expand val x in xs:\n        print(x)\n    expand val y in {}:\n        print(y)\n";
        let program = quill_parse::parse_source(src).expect("parse");
        let checked = Checker::new().check_program(&program).expect("sema");
        let report = expansion_report("main.quill", &checked);

        assert_eq!(report.expansions.len(), 2);
        let first = &report.expansions[0];
        assert_eq!(first.cell, "main");
        assert_eq!(first.state, "expanded");
        assert_eq!(first.instantiations, 2);
        assert_eq!(first.range_binding.as_deref(), Some("__expansion_range.0"));
        assert_eq!(report.expansions[1].state, "empty");

        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["schema"], SCHEMA);
        assert_eq!(json["expansions"][0]["depth"], 0);
        assert!(json["expansions"][1].get("range_binding").is_none());
    }
}
