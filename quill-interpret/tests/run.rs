use proptest::prelude::*;
use quill_interpret::{Value, run_source};

fn stdout(src: &str) -> String {
    run_source(src, "main").expect("run").stdout
}

fn lines(src: &str) -> Vec<String> {
    stdout(src).lines().map(str::to_string).collect()
}

#[test]
fn list_elements_are_visited_in_order() {
    let src = "cell record_value(v: int):\n    print(v)\n\ncell main():\n    expand val x in {10, 20, 30}:\n        record_value(x)\n";
    assert_eq!(lines(src), vec!["10", "20", "30"]);
}

#[test]
fn summing_odd_numbers_yields_25() {
    let src = "cell main() -> int:\n    val mut total = 0\n    expand val x in {1, 3, 5, 7, 9}:\n        total = total + x\n    return total\n";
    let outcome = run_source(src, "main").expect("run");
    assert_eq!(outcome.value, Value::Int(25));
}

#[test]
fn heterogeneous_list_prints_each_element() {
    let src = "cell main():\n    expand val x in {1, 'a', false, \"s\"}:\n        print(x)\n";
    assert_eq!(lines(src), vec!["1", "a", "false", "s"]);
}

#[test]
fn nested_expansions_run_every_combination() {
    let src = "cell main() -> int:\n    val mut n = 0\n    expand val a in {1, 2, 3, 4}:\n        expand val b in {10, 20, 30}:\n            n = n + 1\n    return n\n";
    assert_eq!(run_source(src, "main").expect("run").value, Value::Int(12));
}

#[test]
fn nested_expansions_see_their_own_elements() {
    let src = "cell main():\n    expand val a in {1, 2}:\n        expand val b in {10, 20}:\n            print(a * b)\n";
    assert_eq!(lines(src), vec!["10", "20", "20", "40"]);
}

#[test]
fn continue_moves_to_the_next_instantiation() {
    let src = "cell main():\n    expand val x in {1, 2, 3}:\n        if x == 2:\n            continue\n        print(x)\n";
    assert_eq!(lines(src), vec!["1", "3"]);
}

#[test]
fn break_skips_the_remaining_instantiations() {
    let src = "cell main():\n    expand val x in {1, 2, 3}:\n        if x == 2:\n            break\n        print(x)\n    print(99)\n";
    assert_eq!(lines(src), vec!["1", "99"]);
}

#[test]
fn break_in_an_inner_while_stays_inside_it() {
    let src = "cell main():\n    expand val x in {1, 2}:\n        val mut i = 0\n        while true:\n            i = i + 1\n            if i == 3:\n                break\n        print(x + i)\n";
    assert_eq!(lines(src), vec!["4", "5"]);
}

#[test]
fn return_inside_an_expansion_leaves_the_cell() {
    let src = "cell find() -> int:\n    expand val x in {4, 8, 15}:\n        if x > 5:\n            return x\n    return 0\n\ncell main():\n    print(find())\n";
    assert_eq!(lines(src), vec!["8"]);
}

#[test]
fn generic_sum_over_an_array() {
    let src = "cell sum<T>(values: T) -> int:\n    val mut acc = 0\n    expand val v in values:\n        acc = acc + v\n    return acc\n\ncell main():\n    print(sum([1, 2, 3]))\n    print(sum([5, 5]))\n";
    assert_eq!(lines(src), vec!["6", "10"]);
}

#[test]
fn record_members_are_expanded_in_order() {
    let src = "type P = record { a: int, b: char }\n\ncell main():\n    val p = P { a: 7, b: 'q' }\n    expand val m in p:\n        print(m)\n";
    assert_eq!(lines(src), vec!["7", "q"]);
}

#[test]
fn init_statement_runs_once_even_for_an_empty_range() {
    let src = "cell tick() -> int:\n    print(1)\n    return 0\n\ncell main():\n    expand val t = tick(); val x in {}:\n        print(x)\n";
    assert_eq!(lines(src), vec!["1"]);
}

#[test]
fn empty_array_range_is_still_evaluated() {
    let src = "cell mk() -> [int; 0]:\n    print(1)\n    val xs: [int; 0] = []\n    return xs\n\ncell main():\n    expand val x in mk():\n        print(x)\n    print(2)\n";
    assert_eq!(lines(src), vec!["1", "2"]);
}

#[test]
fn mutable_iteration_variable_is_a_copy() {
    let src = "cell main():\n    val xs = [1, 2]\n    expand val mut x in xs:\n        x = x * 10\n        print(x)\n    print(xs[0])\n";
    assert_eq!(lines(src), vec!["10", "20", "1"]);
}

#[test]
fn same_local_names_in_every_instantiation() {
    let src = "cell main():\n    expand val x in {1, 2}:\n        type Item = record { v: int }\n        val c = Item { v: x * 3 }\n        print(c.v)\n";
    assert_eq!(lines(src), vec!["3", "6"]);
}

#[test]
fn runtime_errors_are_reported() {
    let src = "cell main():\n    val xs = [1]\n    val i = 2\n    print(xs[i])\n";
    let err = run_source(src, "main").expect_err("out of bounds");
    assert!(err.to_string().contains("out of bounds"));
}

fn list_source(items: &[i64]) -> String {
    let list = items
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("cell main():\n    expand val x in {{{list}}}:\n        print(x)\n")
}

proptest! {
    #[test]
    fn expansion_preserves_order(items in prop::collection::vec(0i64..1000, 0..12)) {
        let expected: Vec<String> = items.iter().map(|n| n.to_string()).collect();
        prop_assert_eq!(lines(&list_source(&items)), expected);
    }

    #[test]
    fn expansion_count_matches_array_length(len in 0usize..10) {
        let elems = vec!["1"; len].join(", ");
        let decl = if len == 0 {
            "    val xs: [int; 0] = []\n".to_string()
        } else {
            format!("    val xs = [{elems}]\n")
        };
        let src = format!(
            "cell main() -> int:\n{decl}    val mut n = 0\n    expand val x in xs:\n        n = n + x\n    return n\n"
        );
        let outcome = run_source(&src, "main").expect("run");
        prop_assert_eq!(outcome.value, Value::Int(len as i64));
    }
}
