use quill_ast::{Block, CellDef, ExpansionStmt, Program, Stmt};

/// Output of [`crate::Checker::check_program`]: the elaborated program plus
/// every generic cell instantiation it needed.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckedProgram {
    /// Top-level declarations, with concrete cells elaborated (expansions
    /// unrolled, generic calls renamed to their instantiation) and generic
    /// cells kept as checked templates.
    pub program: Program,
    /// Instantiated generic cells, named by their mangled name (`sum<[int; 3]>`),
    /// in the order they were first needed.
    pub instantiations: Vec<CellDef>,
}

/// One expansion statement found in an elaborated program.
#[derive(Clone, Copy, Debug)]
pub struct ExpansionSite<'a> {
    /// Name of the concrete cell (possibly a mangled instantiation) containing it.
    pub cell: &'a str,
    pub stmt: &'a ExpansionStmt,
}

impl CheckedProgram {
    /// Every cell that can run: concrete cells, then instantiations.
    pub fn cells(&self) -> impl Iterator<Item = &CellDef> {
        self.program
            .stmts
            .iter()
            .filter_map(|s| match s {
                Stmt::CellDef(c) if !c.is_generic() => Some(c),
                _ => None,
            })
            .chain(self.instantiations.iter())
    }

    pub fn cell(&self, name: &str) -> Option<&CellDef> {
        self.cells().find(|c| c.name.node == name)
    }

    pub fn templates(&self) -> impl Iterator<Item = &CellDef> {
        self.program.stmts.iter().filter_map(|s| match s {
            Stmt::CellDef(c) if c.is_generic() => Some(c),
            _ => None,
        })
    }

    /// Expansion statements in runnable cells, outer before inner, in source
    /// order. Statements nested in an unrolled body are reported once per
    /// instantiation.
    pub fn expansions(&self) -> Vec<ExpansionSite<'_>> {
        let mut out = Vec::new();
        for cell in self.cells() {
            collect_block(&cell.name.node, &cell.body, &mut out);
        }
        out
    }
}

fn collect_block<'a>(cell: &'a str, block: &'a Block, out: &mut Vec<ExpansionSite<'a>>) {
    for stmt in &block.stmts {
        collect_stmt(cell, stmt, out);
    }
}

fn collect_stmt<'a>(cell: &'a str, stmt: &'a Stmt, out: &mut Vec<ExpansionSite<'a>>) {
    match stmt {
        Stmt::If(s) => {
            collect_block(cell, &s.then_block, out);
            if let Some(b) = &s.else_block {
                collect_block(cell, b, out);
            }
        }
        Stmt::While(w) => collect_block(cell, &w.body, out),
        Stmt::Expansion(e) => {
            out.push(ExpansionSite { cell, stmt: e });
            if let Some(init) = &e.init {
                collect_stmt(cell, init, out);
            }
            for inst in e.expansion.instantiations() {
                collect_block(cell, &inst.body, out);
            }
        }
        _ => {}
    }
}
