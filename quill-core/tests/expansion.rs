use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use quill_ast::{Expansion, ExpansionStmt, ExprKind, Stmt};
use quill_core::template::{TemplateParamDecl, TemplateParamKind, TemplateParamList};
use quill_core::{
    CheckedProgram, Checker, CheckerConfig, DeclConsumer, DeclEvent, DeclKind, ErrorKind,
    RangeClass, SemanticError,
};

fn check(src: &str) -> CheckedProgram {
    let program = quill_parse::parse_source(src).expect("parse");
    Checker::new().check_program(&program).expect("sema")
}

fn check_err(src: &str) -> SemanticError {
    let program = quill_parse::parse_source(src).expect("parse");
    Checker::new()
        .check_program(&program)
        .expect_err("expected a semantic error")
}

fn first_expansion<'a>(checked: &'a CheckedProgram, cell: &str) -> &'a ExpansionStmt {
    checked
        .expansions()
        .into_iter()
        .find(|site| site.cell == cell)
        .map(|site| site.stmt)
        .expect("expansion statement")
}

#[test]
fn expands_one_instantiation_per_list_element() {
    let checked = check(
        "cell main():\n    val mut total = 0\n    expand val x in {10, 20, 30}:\n        total = total + x\n",
    );
    let stmt = first_expansion(&checked, "main");
    assert_eq!(stmt.depth, Some(0));
    let indices: Vec<u64> = stmt.expansion.instantiations().iter().map(|i| i.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[test]
fn empty_array_list_and_record_expand_to_nothing() {
    let src = "type Empty = record { }\n\ncell main():\n    val xs: [int; 0] = []\n    expand val x in xs:\n        print(x)\n    expand val y in {}:\n        print(y)\n    expand val z in Empty { }:\n        print(z)\n";
    let checked = check(src);
    let states: Vec<_> = checked
        .expansions()
        .iter()
        .map(|site| site.stmt.expansion.clone())
        .collect();
    assert_eq!(states, vec![Expansion::Empty, Expansion::Empty, Expansion::Empty]);
}

#[test]
fn heterogeneous_list_binds_each_element_with_its_own_type() {
    let src = "cell main():\n    expand val x in {1, 'a', false}:\n        print(x)\n";
    let checked = check(src);
    let stmt = first_expansion(&checked, "main");
    assert_eq!(stmt.expansion.instantiations().len(), 3);

    // Each instantiation declares the element directly, with no list left over.
    let printed: Vec<String> = stmt
        .expansion
        .instantiations()
        .iter()
        .map(|inst| match &inst.body.stmts[0] {
            Stmt::Val(v) => quill_parse::format_expr(&v.expr),
            other => panic!("expected the iteration variable, got {other:?}"),
        })
        .collect();
    assert_eq!(printed, vec!["1", "'a'", "false"]);
}

#[test]
fn heterogeneous_list_rejects_operations_invalid_for_one_element() {
    let err = check_err("cell main():\n    expand val x in {1, 'a'}:\n        val y = x + 1\n");
    assert_eq!(err.kind, ErrorKind::Instantiation);
    assert!(err.message.contains("instantiation 1 failed"), "{}", err.message);
    assert!(err.notes.iter().any(|n| n.message.contains("index 1")));
}

#[test]
fn each_instantiation_has_its_own_scope() {
    let src = "cell main():\n    expand val x in {1, 2}:\n        type Local = record { v: int }\n        val tmp = Local { v: x }\n        print(tmp.v)\n";
    let checked = check(src);
    assert_eq!(first_expansion(&checked, "main").expansion.instantiations().len(), 2);
}

#[test]
fn iteration_variable_is_not_visible_after_the_statement() {
    let err = check_err("cell main():\n    expand val x in {1}:\n        print(x)\n    print(x)\n");
    assert_eq!(err.kind, ErrorKind::Name);
    assert!(err.message.contains("unknown name 'x'"));
}

#[test]
fn array_range_is_bound_once() {
    let src = "cell main():\n    val xs = [1, 2, 3]\n    expand val x in xs:\n        print(x)\n";
    let checked = check(src);
    match &first_expansion(&checked, "main").expansion {
        Expansion::Expanded {
            range_binding,
            instantiations,
        } => {
            let binding = range_binding.as_ref().expect("range binding");
            assert_eq!(binding.name.node, "__expansion_range.0");
            assert_eq!(instantiations.len(), 3);
        }
        other => panic!("expected an expanded statement, got {other:?}"),
    }
}

#[test]
fn record_range_decomposes_members_in_declaration_order() {
    let src = "type P = record { a: int, b: char, c: bool }\n\ncell main():\n    val p = P { a: 1, b: 'x', c: true }\n    expand val m in p:\n        print(m)\n";
    let checked = check(src);
    let stmt = first_expansion(&checked, "main");
    let inits: Vec<String> = stmt
        .expansion
        .instantiations()
        .iter()
        .map(|inst| match &inst.body.stmts[0] {
            Stmt::Val(v) => quill_parse::format_expr(&v.expr),
            other => panic!("expected the iteration variable, got {other:?}"),
        })
        .collect();
    assert_eq!(
        inits,
        vec![
            "__expansion_range.0.a",
            "__expansion_range.0.b",
            "__expansion_range.0.c"
        ]
    );
}

#[test]
fn private_member_makes_record_range_ill_formed() {
    let src = "type Secret = record { a: int, priv key: int }\n\ncell main():\n    val s = Secret { a: 1, key: 2 }\n    expand val m in s:\n        print(m)\n";
    let err = check_err(src);
    assert_eq!(err.kind, ErrorKind::Shape);
    assert!(err.message.contains("member 'key' is not accessible"));
}

#[test]
fn shape_mismatch_fails_before_any_instantiation() {
    let err = check_err("cell main():\n    expand val x in 42:\n        print(x)\n");
    assert_eq!(err.kind, ErrorKind::Shape);
    assert!(err.message.contains("cannot expand over a value of type 'int'"));
}

#[test]
fn dependent_range_is_deferred_in_the_generic_definition() {
    let src = "cell sum<T>(values: T) -> int:\n    val mut acc = 0\n    expand val v in values:\n        acc = acc + v\n    return acc\n\ncell main():\n    print(sum([1, 2, 3, 4]))\n";
    let checked = check(src);

    let template = checked.templates().next().expect("generic template");
    let deferred = template.body.stmts.iter().find_map(|s| match s {
        Stmt::Expansion(e) => Some(e),
        _ => None,
    });
    let deferred = deferred.expect("expansion in template");
    assert_eq!(deferred.expansion, Expansion::Deferred);
    assert_eq!(deferred.depth, Some(1));

    let inst = checked.cell("sum<[int; 4]>").expect("instantiated cell");
    let stmt = inst
        .body
        .stmts
        .iter()
        .find_map(|s| match s {
            Stmt::Expansion(e) => Some(e),
            _ => None,
        })
        .expect("expansion in instantiation");
    assert_eq!(stmt.expansion.instantiations().len(), 4);
    assert_eq!(stmt.depth, Some(1));
}

#[test]
fn const_length_parameter_controls_the_count() {
    let src = "cell first_n<const N: int>(xs: [int; N]) -> int:\n    val mut acc = 0\n    expand val x in xs:\n        acc = acc + x\n    return acc\n\ncell main():\n    print(first_n([1, 2]))\n    print(first_n([1, 2, 3, 4, 5]))\n";
    let checked = check(src);
    assert!(checked.cell("first_n<2>").is_some());
    assert!(checked.cell("first_n<5>").is_some());
}

#[test]
fn nested_expansions_use_distinct_index_parameters() {
    let src = "cell main():\n    val mut n = 0\n    expand val a in {1, 2, 3, 4}:\n        expand val b in {10, 20, 30}:\n            n = n + 1\n";
    let checked = check(src);
    let sites = checked.expansions();
    let outer = sites[0].stmt;
    assert_eq!(outer.depth, Some(0));
    assert_eq!(outer.expansion.instantiations().len(), 4);
    let inner: Vec<_> = sites[1..].iter().map(|s| s.stmt).collect();
    assert_eq!(inner.len(), 4);
    for stmt in inner {
        assert_eq!(stmt.depth, Some(1));
        assert_eq!(stmt.expansion.instantiations().len(), 3);
    }
}

#[test]
fn inner_range_from_a_heterogeneous_outer_element_is_deferred_then_expanded() {
    let src = "cell main():\n    expand val a in {[1, 2], [3]}:\n        expand val b in a:\n            print(b)\n";
    let checked = check(src);
    let sites = checked.expansions();
    let outer = sites[0].stmt;

    let Some(Stmt::Expansion(template)) = outer.body.stmts.first() else {
        panic!("expected the inner statement in the outer body");
    };
    assert_eq!(template.expansion, Expansion::Deferred);
    assert_eq!(template.depth, Some(1));

    let counts: Vec<usize> = sites[1..]
        .iter()
        .map(|s| s.stmt.expansion.instantiations().len())
        .collect();
    assert_eq!(counts, vec![2, 1]);
}

#[test]
fn inner_body_may_use_the_outer_variable() {
    let src = "cell main():\n    expand val a in {1, 2}:\n        expand val b in {'x', 'y'}:\n            print(a)\n            print(b)\n";
    check(src);
}

#[test]
fn break_and_continue_are_accepted_inside_expansion_bodies() {
    let src = "cell main():\n    expand val x in {1, 2, 3}:\n        if x == 2:\n            continue\n        if x == 3:\n            break\n        print(x)\n";
    check(src);
}

#[test]
fn break_outside_any_loop_is_rejected() {
    let err = check_err("cell main():\n    break\n");
    assert!(err.message.contains("'break' outside of a loop or expansion statement"));
}

#[test]
fn declared_type_is_checked_per_instantiation() {
    let err = check_err("cell main():\n    expand val x: int in {1, 'a', 3}:\n        print(x)\n");
    assert_eq!(err.kind, ErrorKind::Instantiation);
    assert!(err.message.contains("instantiation 1 failed"));
    assert!(err.message.contains("mismatched types: expected int, found char"));
}

#[test]
fn init_statement_is_visible_to_range_and_body() {
    let src = "cell main():\n    expand val base = [4, 5]; val x in base:\n        print(x + base[0])\n";
    let checked = check(src);
    let stmt = first_expansion(&checked, "main");
    assert!(stmt.init.is_some());
    assert_eq!(stmt.expansion.instantiations().len(), 2);
}

#[test]
fn brace_list_outside_an_expansion_is_rejected() {
    let err = check_err("cell main():\n    val xs = {1, 2}\n");
    assert!(err.message.contains("brace-enclosed list can only be used as an expansion range"));
}

#[test]
fn expansion_size_limit_is_enforced() {
    let src = "cell main():\n    expand val x in {1, 2, 3}:\n        print(x)\n";
    let program = quill_parse::parse_source(src).expect("parse");
    let config = CheckerConfig {
        max_expansion_size: 2,
        ..CheckerConfig::default()
    };
    let err = Checker::with_config(config)
        .check_program(&program)
        .expect_err("limit");
    assert_eq!(err.kind, ErrorKind::Limit);
    assert!(err.message.contains("exceeds max_expansion_size"));
}

#[test]
fn independent_statements_keep_being_checked_after_a_failure() {
    let src = "cell main():\n    expand val x in 1:\n        print(x)\n    val y: bool = 3\n";
    let program = quill_parse::parse_source(src).expect("parse");
    let mut checker = Checker::new();
    assert!(checker.check_program(&program).is_err());
    let kinds: Vec<ErrorKind> = checker.diagnostics().iter().map(|d| d.kind).collect();
    assert_eq!(kinds, vec![ErrorKind::Shape, ErrorKind::Type]);
}

#[derive(Default)]
struct Recorder {
    events: Rc<RefCell<Vec<DeclEvent>>>,
}

impl DeclConsumer for Recorder {
    fn declared(&mut self, event: &DeclEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

#[test]
fn consumers_see_every_instantiated_declaration() {
    let src = "cell main():\n    expand val x in {1, 2, 3}:\n        print(x)\n";
    let program = quill_parse::parse_source(src).expect("parse");
    let recorder = Recorder::default();
    let events = Rc::clone(&recorder.events);
    let mut checker = Checker::new();
    checker.add_consumer(Box::new(recorder));
    checker.check_program(&program).expect("sema");

    let seen: Vec<(DeclKind, String, Option<u64>)> = events
        .borrow()
        .iter()
        .map(|e| (e.kind, e.name.clone(), e.index))
        .collect();
    assert_eq!(
        seen,
        vec![
            (DeclKind::Val, "x".to_string(), Some(0)),
            (DeclKind::Val, "x".to_string(), Some(1)),
            (DeclKind::Val, "x".to_string(), Some(2)),
        ]
    );
}

fn expr(src: &str) -> quill_ast::Expr {
    quill_parse::parse_expr(src).expect("parse expr")
}

#[test]
fn classify_range_reports_strategy_and_count() {
    let mut checker = Checker::new();
    let class = checker
        .classify_range(&expr("{1, 'a', false}"))
        .expect("classify");
    assert!(matches!(class, RangeClass::List { .. }));
    assert_eq!(class.count(), Some(3));

    let err = checker.classify_range(&expr("42")).expect_err("int is not a range");
    assert_eq!(err.kind, ErrorKind::Shape);
}

#[test]
fn select_element_folds_constant_indices() {
    let mut checker = Checker::new();
    let list = expr("{1, 'a', false}");
    let picked = checker.select_element(&list, &expr("1")).expect("select");
    assert_eq!(picked.kind, ExprKind::CharLit('a'));

    let err = checker
        .select_element(&list, &expr("7"))
        .expect_err("out of range");
    assert_eq!(err.kind, ErrorKind::IndexEvaluation);
    assert!(err.message.contains("index 7 is out of range"), "{}", err.message);
}

#[test]
fn select_element_keeps_dependent_indices_symbolic() {
    let mut checker = Checker::new();
    let params = TemplateParamList {
        depth: 0,
        params: vec![TemplateParamDecl {
            name: "I".to_string(),
            kind: TemplateParamKind::Const,
        }],
    };
    let picked = checker
        .with_template_params(params, |c| c.select_element(&expr("{1, 'a', false}"), &expr("I")))
        .expect("select");
    assert!(
        matches!(&picked.kind, ExprKind::ListSelect { index, .. } if matches!(&index.kind, ExprKind::Ident(n) if n.node == "I")),
        "{:?}",
        picked.kind
    );
}

proptest! {
    #[test]
    fn list_expansion_count_and_order(len in 0usize..16) {
        let items = (0..len).map(|n| n.to_string()).collect::<Vec<_>>().join(", ");
        let src = format!("cell main():\n    expand val x in {{{items}}}:\n        print(x)\n");
        let checked = check(&src);
        let stmt = first_expansion(&checked, "main");
        let indices: Vec<u64> = stmt.expansion.instantiations().iter().map(|i| i.index).collect();
        prop_assert_eq!(indices, (0..len as u64).collect::<Vec<_>>());
        prop_assert_eq!(len == 0, stmt.expansion == Expansion::Empty);
    }
}
