// Scope discipline and ref-count discipline.

use crate::test::{run_output, run_then_shutdown};

#[test]
fn test_block_locals_do_not_leak() {
    let src = r#"
        { let y = 2; }
        print(y);
    "#;
    // y is undefined outside the block: NameError diagnostic, void value.
    assert_eq!(run_output(src), "()\n");
}

#[test]
fn test_assignment_mutates_outer_binding() {
    let src = r#"
        let x = 1;
        { x = 2; let x2 = 0; }
        if (true) { x = x + 1; }
        print(x);
    "#;
    assert_eq!(run_output(src), "3\n");
}

#[test]
fn test_loop_body_scope_is_fresh_per_iteration() {
    let src = r#"
        let hits = 0;
        let i = 0;
        while (i < 3) {
            // v must be undefined at the top of every iteration.
            if (v == void) { hits = hits + 1; }
            let v = i;
            i = i + 1;
        }
        print(hits);
    "#;
    assert_eq!(run_output(src), "3\n");
}

#[test]
fn test_foreach_iterator_defined_per_iteration() {
    let src = r#"
        let x = 99;
        foreach (x, [1, 2, 3]) { }
        print(x);
    "#;
    // The iterator is defined in the per-iteration scope; the outer x is
    // untouched.
    assert_eq!(run_output(src), "99\n");
}

#[test]
fn test_function_params_are_frame_local() {
    let src = r#"
        let n = 1;
        func probe(n: int) -> int { return n * 10; }
        print(probe(5), n);
    "#;
    assert_eq!(run_output(src), "50 1\n");
}

#[test]
fn test_closure_sees_definition_scope() {
    // Blocks capture their defining environment; a function body resolves
    // globals through it even when called from elsewhere.
    let src = r#"
        let base = 7;
        func addbase(n: int) -> int { return n + base; }
        func caller() -> int {
            let local = 1000;
            return addbase(1) + local;
        }
        print(caller());
    "#;
    assert_eq!(run_output(src), "1008\n");
}

//----------------------------------------------------------
// Ref-count discipline: heap live bytes return to zero
//----------------------------------------------------------

#[test]
fn test_refcount_zero_after_simple_program() {
    let stats = run_then_shutdown("let x = \"hello\"; print(x);");
    assert_eq!(stats.bytes_live, 0);
    assert_eq!(stats.live_objects, 0);
}

#[test]
fn test_refcount_zero_after_list_churn() {
    let stats = run_then_shutdown(
        r#"
        let xs = [];
        let i = 0;
        while (i < 100) {
            xs = [1, 2, 3, i];
            i = i + 1;
        }
        print(len(xs));
        "#,
    );
    assert_eq!(stats.bytes_live, 0);
    assert_eq!(stats.live_objects, 0);
}

#[test]
fn test_refcount_zero_with_functions_and_dicts() {
    let stats = run_then_shutdown(
        r#"
        func pack(a: int, b: int) -> dict {
            return [lo: a, hi: b];
        }
        let total = 0;
        let i = 0;
        while (i < 20) {
            let d = pack(i, i * 2);
            total = total + d["hi"];
            i = i + 1;
        }
        print(total);
        "#,
    );
    assert_eq!(stats.bytes_live, 0);
    assert_eq!(stats.live_objects, 0);
}

#[test]
fn test_refcount_zero_with_nested_containers() {
    let stats = run_then_shutdown(
        r#"
        let grid = [[1, 2], [3, 4], [d: [5, 6]]];
        let row = grid[2];
        grid[0] = void;
        print(len(row));
        "#,
    );
    assert_eq!(stats.bytes_live, 0);
    assert_eq!(stats.live_objects, 0);
}

#[test]
fn test_alloc_and_free_counts_balance() {
    let stats = run_then_shutdown("let xs = [1, [2, [3]]]; print(len(xs));");
    assert_eq!(stats.alloc_count, stats.free_count);
}
