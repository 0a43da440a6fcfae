use quill_core::{Checker, CheckerConfig, ErrorKind};

#[test]
fn generic_cell_instantiates_once_per_argument_list() {
    let src = "cell id<T>(x: T) -> T:\n    return x\n\ncell main():\n    val a: int = id(1)\n    val b: int = id(2)\n    val c: char = id('c')\n";
    let program = quill_parse::parse_source(src).expect("parse");
    let checked = Checker::new().check_program(&program).expect("sema");
    let names: Vec<&str> = checked
        .instantiations
        .iter()
        .map(|c| c.name.node.as_str())
        .collect();
    assert_eq!(names, vec!["id<int>", "id<char>"]);
}

#[test]
fn explicit_arguments_are_accepted() {
    let src = "cell zero<T, const N: int>() -> int:\n    return N\n\ncell main():\n    val n: int = zero::<bool, 3>()\n";
    let program = quill_parse::parse_source(src).expect("parse");
    let checked = Checker::new().check_program(&program).expect("sema");
    assert!(checked.cell("zero<bool, 3>").is_some());
}

#[test]
fn trait_bound_is_checked_at_instantiation() {
    let src = "trait Numeric\n\ncell double<T: Numeric>(x: T) -> T:\n    return x\n\ncell main():\n    val b = double(true)\n";
    let program = quill_parse::parse_source(src).expect("parse");
    let err = Checker::new().check_program(&program).expect_err("bound");
    assert!(err.message.contains("does not satisfy trait bound 'Numeric'"));
}

#[test]
fn unknown_trait_in_bound_is_rejected() {
    let src = "cell f<T: Missing>(x: T):\n    print(x)\n";
    let program = quill_parse::parse_source(src).expect("parse");
    let err = Checker::new().check_program(&program).expect_err("unknown trait");
    assert!(err.message.contains("unknown trait 'Missing'"));
}

#[test]
fn undeducible_parameter_is_reported() {
    let src = "cell make<T>() -> int:\n    return 0\n\ncell main():\n    val x = make()\n";
    let program = quill_parse::parse_source(src).expect("parse");
    let err = Checker::new().check_program(&program).expect_err("deduction");
    assert!(err.message.contains("cannot deduce template argument 'T' for cell 'make'"));
}

#[test]
fn local_declaration_may_not_shadow_a_template_parameter() {
    let src = "cell f<T>(x: T):\n    val T = 1\n";
    let program = quill_parse::parse_source(src).expect("parse");
    let err = Checker::new().check_program(&program).expect_err("shadow");
    assert!(err.message.contains("shadows a template parameter"));
}

#[test]
fn generic_alias_resolves_to_its_target() {
    let src = "type Pair<T> = [T; 2]\n\ncell main():\n    val p: Pair<char> = ['a', 'b']\n    expand val c in p:\n        print(c)\n";
    let program = quill_parse::parse_source(src).expect("parse");
    Checker::new().check_program(&program).expect("sema");
}

#[test]
fn runaway_recursion_hits_the_depth_limit() {
    let src = "cell grow<const N: int>() -> int:\n    return grow::<N + 1>()\n\ncell main():\n    val x = grow::<0>()\n";
    let program = quill_parse::parse_source(src).expect("parse");
    let config = CheckerConfig {
        max_instantiation_depth: 16,
        ..CheckerConfig::default()
    };
    let err = Checker::with_config(config)
        .check_program(&program)
        .expect_err("limit");
    assert_eq!(err.kind, ErrorKind::Limit);
    assert!(err.message.contains("instantiation depth limit of 16 exceeded"));
}

#[test]
fn recursive_instantiation_with_the_same_arguments_is_reused() {
    let src = "cell count<const N: int>(n: int) -> int:\n    if n == 0:\n        return N\n    return count::<N>(n - 1)\n\ncell main():\n    val x = count::<7>(3)\n";
    let program = quill_parse::parse_source(src).expect("parse");
    let checked = Checker::new().check_program(&program).expect("sema");
    assert_eq!(checked.instantiations.len(), 1);
}

#[test]
fn expansion_inside_generic_cell_uses_substituted_types() {
    let src = "cell show<T>(xs: [T; 2]):\n    expand val x in xs:\n        val y: T = x\n        print(y)\n\ncell main():\n    show(['a', 'b'])\n    show([true, false])\n";
    let program = quill_parse::parse_source(src).expect("parse");
    let checked = Checker::new().check_program(&program).expect("sema");
    assert!(checked.cell("show<char>").is_some());
    assert!(checked.cell("show<bool>").is_some());
}
