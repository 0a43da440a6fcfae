use quill_ast::{Expansion, ExprKind, Stmt, TypeArg};
use quill_parse::{ParseConfig, parse_source, parse_source_with_config, parse_source_with_recovery};

fn main_body(src: &str) -> Vec<Stmt> {
    let program = parse_source(src).expect("parse");
    match program.stmts.into_iter().next() {
        Some(Stmt::CellDef(cell)) => cell.body.stmts,
        other => panic!("expected a cell, got {other:?}"),
    }
}

#[test]
fn chained_comparisons_are_rejected() {
    let src = "val x = 0\nval y = 1\nval z = 2\nval a = x < y < z\n";
    let err = parse_source(src).expect_err("expected parse error");
    let msg = err.to_string();
    assert!(
        msg.contains("chained comparisons"),
        "unexpected error message: {msg}"
    );
}

#[test]
fn expansion_heading_with_init_and_typed_variable() {
    let src = "cell main():\n    expand val n = 3; val mut x: int in {1, 2}:\n        print(x)\n";
    let body = main_body(src);
    let Some(Stmt::Expansion(stmt)) = body.first() else {
        panic!("expected an expansion statement, got {body:?}");
    };
    assert!(matches!(stmt.init.as_deref(), Some(Stmt::Val(v)) if v.name.node == "n"));
    assert_eq!(stmt.var.name.node, "x");
    assert!(stmt.var.mutable);
    assert!(stmt.var.ty.is_some());
    assert!(matches!(&stmt.range.kind, ExprKind::List(items) if items.len() == 2));
    assert_eq!(stmt.body.stmts.len(), 1);
    assert_eq!(stmt.depth, None);
    assert_eq!(stmt.expansion, Expansion::Pending);
}

#[test]
fn expression_init_is_accepted_before_the_variable() {
    let src = "cell main():\n    expand print(0); val x in {}:\n        print(x)\n";
    let body = main_body(src);
    let Some(Stmt::Expansion(stmt)) = body.first() else {
        panic!("expected an expansion statement");
    };
    assert!(matches!(stmt.init.as_deref(), Some(Stmt::ExprStmt(_))));
    assert!(matches!(&stmt.range.kind, ExprKind::List(items) if items.is_empty()));
}

#[test]
fn expansion_without_val_after_init_is_rejected() {
    let src = "cell main():\n    expand val n = 1; x in {1}:\n        print(x)\n";
    let err = parse_source(src).expect_err("missing val");
    assert!(err.to_string().contains("expected 'val'"), "{err}");
}

#[test]
fn generic_call_takes_type_and_value_arguments() {
    let src = "cell main():\n    val r = make::<int, N + 1>(2)\n";
    let body = main_body(src);
    let Some(Stmt::Val(decl)) = body.first() else {
        panic!("expected a val");
    };
    let ExprKind::Call {
        callee,
        generic_args,
        args,
    } = &decl.expr.kind
    else {
        panic!("expected a call, got {:?}", decl.expr.kind);
    };
    assert_eq!(callee.node, "make");
    assert!(matches!(generic_args[0], TypeArg::Type(_)));
    assert!(matches!(generic_args[1], TypeArg::Value(_)));
    assert_eq!(args.len(), 1);
}

#[test]
fn records_with_private_fields_parse() {
    let src = "type Secret = record { a: int, priv b: char }\n";
    let program = parse_source(src).expect("parse");
    let Some(Stmt::RecordDef(def)) = program.stmts.first() else {
        panic!("expected a record definition");
    };
    assert_eq!(def.fields.len(), 2);
    assert!(!def.fields[0].private);
    assert!(def.fields[1].private);
}

#[test]
fn templates_with_bounds_and_const_params_parse() {
    let src = "trait Numeric\n\ncell first_n<T: Numeric, const N: int>(xs: [T; N]) -> T:\n    return xs[0]\n";
    let program = parse_source(src).expect("parse");
    let Some(Stmt::CellDef(cell)) = program.stmts.get(1) else {
        panic!("expected a cell");
    };
    assert!(cell.is_generic());
    assert_eq!(cell.params.len(), 2);
}

#[test]
fn break_and_continue_parse_inside_expansions() {
    let src = "cell main():\n    expand val x in {1, 2}:\n        if x == 1:\n            continue\n        break\n";
    let body = main_body(src);
    let Some(Stmt::Expansion(stmt)) = body.first() else {
        panic!("expected an expansion statement");
    };
    assert!(matches!(stmt.body.stmts.last(), Some(Stmt::Break(_))));
}

#[test]
fn unsupported_edition_is_rejected() {
    let config = ParseConfig {
        edition: Some("1999".to_string()),
    };
    let err = parse_source_with_config("val a = 1\n", &config).expect_err("bad edition");
    assert!(err.to_string().contains("unsupported edition '1999'"), "{err}");

    let ok = ParseConfig {
        edition: Some("2026".to_string()),
    };
    parse_source_with_config("val a = 1\n", &ok).expect("supported edition");
}

#[test]
fn recovery_keeps_parsing_after_an_error() {
    let src = "val a = 1 < 2 < 3\nval b = 2\n";
    let (program, errors) = parse_source_with_recovery(src).expect("lex");
    assert_eq!(errors.len(), 1);
    assert!(
        program
            .stmts
            .iter()
            .any(|s| matches!(s, Stmt::Val(v) if v.name.node == "b"))
    );
}
