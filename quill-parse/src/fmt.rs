#![forbid(unsafe_code)]

use quill_ast::{
    BinOp, Block, CellDef, Expansion, ExpansionStmt, Expr, ExprKind, IfStmt, Param, Program, Stmt,
    TemplateParam, TemplateParamKind, TypeArg, TypeRef, TypeRefKind, UnaryOp, ValDecl, WhileStmt,
};

const INDENT: &str = "    ";

/// Canonical source form. Expansion results are not printed.
pub fn format_program(program: &Program) -> String {
    Printer::new(false).program(program)
}

/// Like [`format_program`], but every analyzed expansion statement is followed
/// by its instantiations (or a note that it is empty or deferred).
pub fn format_elaborated(program: &Program) -> String {
    Printer::new(true).program(program)
}

pub fn format_expr(expr: &Expr) -> String {
    let mut p = Printer::new(false);
    p.expr(expr, Prec::Lowest);
    p.out
}

pub fn format_type_ref(ty: &TypeRef) -> String {
    let mut p = Printer::new(false);
    p.type_ref(ty);
    p.out
}

struct Printer {
    out: String,
    elaborated: bool,
}

impl Printer {
    fn new(elaborated: bool) -> Self {
        Printer {
            out: String::new(),
            elaborated,
        }
    }

    fn program(mut self, program: &Program) -> String {
        let mut first = true;
        for stmt in &program.stmts {
            if !first {
                self.out.push('\n');
            }
            first = false;
            self.stmt(0, stmt);
        }
        self.out
    }

    fn stmt(&mut self, indent: usize, stmt: &Stmt) {
        match stmt {
            Stmt::TypeAlias(s) => {
                self.indent_line(indent);
                self.out.push_str("type ");
                self.out.push_str(&s.name.node);
                self.template_params(&s.params);
                self.out.push_str(" = ");
                self.type_ref(&s.target);
                self.out.push('\n');
            }
            Stmt::TraitDef(s) => {
                self.indent_line(indent);
                self.out.push_str("trait ");
                self.out.push_str(&s.name.node);
                self.out.push('\n');
            }
            Stmt::RecordDef(s) => {
                self.indent_line(indent);
                self.out.push_str("type ");
                self.out.push_str(&s.name.node);
                self.out.push_str(" = record {");
                for (i, f) in s.fields.iter().enumerate() {
                    self.out.push_str(if i > 0 { ", " } else { " " });
                    if f.private {
                        self.out.push_str("priv ");
                    }
                    self.out.push_str(&f.name.node);
                    self.out.push_str(": ");
                    self.type_ref(&f.ty);
                }
                self.out.push_str(if s.fields.is_empty() { "}\n" } else { " }\n" });
            }
            Stmt::CellDef(s) => self.cell_def(indent, s),
            Stmt::Val(s) => {
                self.indent_line(indent);
                self.val_decl(s);
                self.out.push('\n');
            }
            Stmt::Assign(s) => {
                self.indent_line(indent);
                self.out.push_str(&s.target.node);
                self.out.push_str(" = ");
                self.expr(&s.expr, Prec::Lowest);
                self.out.push('\n');
            }
            Stmt::If(s) => self.if_stmt(indent, s),
            Stmt::While(s) => self.while_stmt(indent, s),
            Stmt::Expansion(s) => self.expansion(indent, s),
            Stmt::Break(_) => self.keyword_line(indent, "break"),
            Stmt::Continue(_) => self.keyword_line(indent, "continue"),
            Stmt::Return(s) => {
                self.indent_line(indent);
                self.out.push_str("return");
                if let Some(e) = &s.expr {
                    self.out.push(' ');
                    self.expr(e, Prec::Lowest);
                }
                self.out.push('\n');
            }
            Stmt::Assert(s) => {
                self.indent_line(indent);
                self.out.push_str("assert ");
                self.expr(&s.expr, Prec::Lowest);
                self.out.push('\n');
            }
            Stmt::ExprStmt(e) => {
                self.indent_line(indent);
                self.expr(e, Prec::Lowest);
                self.out.push('\n');
            }
        }
    }

    fn keyword_line(&mut self, indent: usize, kw: &str) {
        self.indent_line(indent);
        self.out.push_str(kw);
        self.out.push('\n');
    }

    fn val_decl(&mut self, s: &ValDecl) {
        self.out.push_str("val ");
        if s.mutable {
            self.out.push_str("mut ");
        }
        self.out.push_str(&s.name.node);
        if let Some(ty) = &s.ty {
            self.out.push_str(": ");
            self.type_ref(ty);
        }
        self.out.push_str(" = ");
        self.expr(&s.expr, Prec::Lowest);
    }

    fn template_params(&mut self, params: &[TemplateParam]) {
        if params.is_empty() {
            return;
        }
        self.out.push('<');
        for (i, p) in params.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            match &p.kind {
                TemplateParamKind::Type { bound } => {
                    self.out.push_str(&p.name.node);
                    if let Some(b) = bound {
                        self.out.push_str(": ");
                        self.out.push_str(&b.node);
                    }
                }
                TemplateParamKind::Const { ty } => {
                    self.out.push_str("const ");
                    self.out.push_str(&p.name.node);
                    self.out.push_str(": ");
                    self.type_ref(ty);
                }
            }
        }
        self.out.push('>');
    }

    fn params(&mut self, params: &[Param]) {
        for (i, p) in params.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.out.push_str(&p.name.node);
            self.out.push_str(": ");
            if p.mutable {
                self.out.push_str("mut ");
            }
            self.type_ref(&p.ty);
        }
    }

    fn cell_def(&mut self, indent: usize, s: &CellDef) {
        self.indent_line(indent);
        self.out.push_str("cell ");
        self.out.push_str(&s.name.node);
        self.template_params(&s.params);
        self.out.push('(');
        self.params(&s.args);
        self.out.push(')');
        if let Some(ret) = &s.ret {
            self.out.push_str(" -> ");
            self.type_ref(ret);
        }
        self.out.push_str(":\n");
        self.block(indent + 1, &s.body);
    }

    fn if_stmt(&mut self, indent: usize, s: &IfStmt) {
        self.indent_line(indent);
        self.out.push_str("if ");
        self.expr(&s.cond, Prec::Lowest);
        self.out.push_str(":\n");
        self.block(indent + 1, &s.then_block);

        if let Some(else_block) = &s.else_block {
            self.indent_line(indent);
            self.out.push_str("else:\n");
            self.block(indent + 1, else_block);
        }
    }

    fn while_stmt(&mut self, indent: usize, s: &WhileStmt) {
        self.indent_line(indent);
        self.out.push_str("while ");
        self.expr(&s.cond, Prec::Lowest);
        self.out.push_str(":\n");
        self.block(indent + 1, &s.body);
    }

    fn expansion(&mut self, indent: usize, s: &ExpansionStmt) {
        self.indent_line(indent);
        self.out.push_str("expand ");
        if let Some(init) = &s.init {
            match init.as_ref() {
                Stmt::Val(v) => self.val_decl(v),
                Stmt::ExprStmt(e) => self.expr(e, Prec::Lowest),
                _ => {}
            }
            self.out.push_str("; ");
        }
        self.out.push_str("val ");
        if s.var.mutable {
            self.out.push_str("mut ");
        }
        self.out.push_str(&s.var.name.node);
        if let Some(ty) = &s.var.ty {
            self.out.push_str(": ");
            self.type_ref(ty);
        }
        self.out.push_str(" in ");
        self.expr(&s.range, Prec::Lowest);
        self.out.push_str(":\n");
        self.block(indent + 1, &s.body);

        if !self.elaborated {
            return;
        }
        match &s.expansion {
            Expansion::Pending => {}
            Expansion::Deferred => self.keyword_line(indent, "# deferred until instantiation"),
            Expansion::Empty => self.keyword_line(indent, "# empty range"),
            Expansion::Expanded {
                range_binding,
                instantiations,
            } => {
                if let Some(binding) = range_binding {
                    self.indent_line(indent);
                    self.out.push_str("# range: ");
                    self.val_decl(binding);
                    self.out.push('\n');
                }
                for inst in instantiations {
                    self.indent_line(indent);
                    self.out.push_str(&format!("# [{}]\n", inst.index));
                    self.block(indent + 1, &inst.body);
                }
            }
        }
    }

    fn block(&mut self, indent: usize, block: &Block) {
        for stmt in &block.stmts {
            self.stmt(indent, stmt);
        }
    }

    fn type_ref(&mut self, t: &TypeRef) {
        match &t.kind {
            TypeRefKind::Named { name, args } => {
                self.out.push_str(&name.node);
                if !args.is_empty() {
                    self.out.push('<');
                    self.type_args(args);
                    self.out.push('>');
                }
            }
            TypeRefKind::Array { elem, len } => {
                self.out.push('[');
                self.type_ref(elem);
                self.out.push_str("; ");
                self.expr(len, Prec::Lowest);
                self.out.push(']');
            }
        }
    }

    fn type_args(&mut self, args: &[TypeArg]) {
        for (i, a) in args.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            match a {
                TypeArg::Type(t) => self.type_ref(t),
                TypeArg::Value(e) => self.expr(e, Prec::Add),
            }
        }
    }

    fn comma_exprs(&mut self, items: &[Expr]) {
        for (i, e) in items.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expr(e, Prec::Lowest);
        }
    }

    fn expr(&mut self, expr: &Expr, parent_prec: Prec) {
        match &expr.kind {
            ExprKind::Ident(id) => self.out.push_str(&id.node),
            ExprKind::IntLit(n) => {
                let parens = *n < 0 && needs_parens(parent_prec, Prec::Unary);
                if parens {
                    self.out.push('(');
                }
                self.out.push_str(&n.to_string());
                if parens {
                    self.out.push(')');
                }
            }
            ExprKind::BoolLit(b) => self.out.push_str(if *b { "true" } else { "false" }),
            ExprKind::CharLit(c) => {
                self.out.push('\'');
                push_escaped(&mut self.out, *c, '\'');
                self.out.push('\'');
            }
            ExprKind::StringLit(s) => {
                self.out.push('"');
                for ch in s.chars() {
                    push_escaped(&mut self.out, ch, '"');
                }
                self.out.push('"');
            }
            ExprKind::List(items) => {
                self.out.push('{');
                self.comma_exprs(items);
                self.out.push('}');
            }
            ExprKind::ArrayLit(items) => {
                self.out.push('[');
                self.comma_exprs(items);
                self.out.push(']');
            }
            ExprKind::RecordLit { name, fields } => {
                self.out.push_str(&name.node);
                self.out.push_str(" {");
                for (i, (k, v)) in fields.iter().enumerate() {
                    self.out.push_str(if i > 0 { ", " } else { " " });
                    self.out.push_str(&k.node);
                    self.out.push_str(": ");
                    self.expr(v, Prec::Lowest);
                }
                self.out.push_str(if fields.is_empty() { "}" } else { " }" });
            }
            ExprKind::Unary { op, expr: inner } => {
                let my = Prec::Unary;
                let parens = needs_parens(parent_prec, my);
                if parens {
                    self.out.push('(');
                }
                self.out.push(match op {
                    UnaryOp::Neg => '-',
                    UnaryOp::Not => '!',
                });
                self.expr(inner, my);
                if parens {
                    self.out.push(')');
                }
            }
            ExprKind::Binary { left, op, right } => {
                let my = bin_prec(*op);
                let parens = needs_parens(parent_prec, my);
                if parens {
                    self.out.push('(');
                }
                self.expr(left, my);
                self.out.push(' ');
                self.out.push_str(op.symbol());
                self.out.push(' ');
                // Left-associative: a right operand of equal precedence needs parentheses.
                self.expr(right, my.tighter());
                if parens {
                    self.out.push(')');
                }
            }
            ExprKind::Member { base, member } => {
                self.expr(base, Prec::Postfix);
                self.out.push('.');
                self.out.push_str(&member.node);
            }
            ExprKind::Index { base, index } => {
                self.expr(base, Prec::Postfix);
                self.out.push('[');
                self.expr(index, Prec::Lowest);
                self.out.push(']');
            }
            ExprKind::Call {
                callee,
                generic_args,
                args,
            } => {
                self.out.push_str(&callee.node);
                if !generic_args.is_empty() {
                    self.out.push_str("::<");
                    self.type_args(generic_args);
                    self.out.push('>');
                }
                self.out.push('(');
                self.comma_exprs(args);
                self.out.push(')');
            }
            ExprKind::ListSelect { list, index } => {
                self.out.push_str("select(");
                self.expr(list, Prec::Lowest);
                self.out.push_str(", ");
                self.expr(index, Prec::Lowest);
                self.out.push(')');
            }
            ExprKind::MemberSelect {
                base,
                members,
                index,
            } => {
                self.out.push_str("select_member(");
                self.expr(base, Prec::Lowest);
                self.out.push_str(", [");
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.out.push_str(&m.node);
                }
                self.out.push_str("], ");
                self.expr(index, Prec::Lowest);
                self.out.push(')');
            }
        }
    }

    fn indent_line(&mut self, indent: usize) {
        for _ in 0..indent {
            self.out.push_str(INDENT);
        }
    }
}

fn push_escaped(out: &mut String, ch: char, quote: char) {
    match ch {
        '\n' => out.push_str("\\n"),
        '\t' => out.push_str("\\t"),
        '\r' => out.push_str("\\r"),
        '\0' => out.push_str("\\0"),
        '\\' => out.push_str("\\\\"),
        c if c == quote => {
            out.push('\\');
            out.push(c);
        }
        other if other.is_control() => {
            out.push_str(&format!("\\u{{{:x}}}", other as u32));
        }
        other => out.push(other),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Lowest,
    Or,
    And,
    Cmp,
    Add,
    Mul,
    Unary,
    Postfix,
}

impl Prec {
    fn tighter(self) -> Prec {
        match self {
            Prec::Lowest => Prec::Or,
            Prec::Or => Prec::And,
            Prec::And => Prec::Cmp,
            Prec::Cmp => Prec::Add,
            Prec::Add => Prec::Mul,
            Prec::Mul => Prec::Unary,
            Prec::Unary | Prec::Postfix => Prec::Postfix,
        }
    }
}

fn bin_prec(op: BinOp) -> Prec {
    match op {
        BinOp::Or => Prec::Or,
        BinOp::And => Prec::And,
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => Prec::Cmp,
        BinOp::Add | BinOp::Sub => Prec::Add,
        BinOp::Mul | BinOp::Div | BinOp::Rem => Prec::Mul,
    }
}

fn needs_parens(parent: Prec, child: Prec) -> bool {
    child < parent
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_idempotent(src: &str) {
        let program = crate::parse_source(src).unwrap();
        let formatted1 = format_program(&program);
        let program2 = crate::parse_source(&formatted1).unwrap();
        let formatted2 = format_program(&program2);
        assert_eq!(formatted1, formatted2);
    }

    #[test]
    fn fmt_roundtrip_basic() {
        is_idempotent("cell main():\n    val x: int = 1 + 2 * 3\n    print(x - (1 - 2))\n");
    }

    #[test]
    fn fmt_roundtrip_generic_cells_and_aliases() {
        is_idempotent(
            "type Pair<T> = [T; 2]\n\ncell first<T, const N: int>(xs: [T; N]) -> T:\n    return xs[0]\n",
        );
    }

    #[test]
    fn fmt_roundtrip_expansion_heading() {
        is_idempotent(
            "cell main():\n    expand val base = [1, 2]; val mut x: int in base:\n        print(x)\n        continue\n",
        );
    }

    #[test]
    fn fmt_keeps_brace_lists_and_chars() {
        let program = crate::parse_source("cell main():\n    expand val v in {1, 'a', \"s\", false}:\n        print(v)\n").unwrap();
        let out = format_program(&program);
        assert!(out.contains("expand val v in {1, 'a', \"s\", false}:"));
    }
}
