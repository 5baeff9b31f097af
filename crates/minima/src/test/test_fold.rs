// Constant folding: pure simplification that preserves semantics.

use crate::compiler::ast::{Command, Expr, ExprKind, Script};
use crate::compiler::{fold, parse_program};
use crate::test::run_output;

fn parse_and_fold(source: &str) -> Script {
    let mut script = parse_program(source).expect("parses");
    fold::fold_script(&mut script);
    script
}

fn rhs_of_first_set(script: &Script) -> &Expr {
    let cmd: &Command = &script.commands[0];
    assert!(cmd.head.is_lit_string("set"));
    &cmd.args[1]
}

#[test]
fn test_fold_arithmetic_literal_tree() {
    let script = parse_and_fold("let x = 1 + 2 * 3;");
    match rhs_of_first_set(&script).kind {
        ExprKind::IntLit(7) => {}
        ref other => panic!("expected folded IntLit(7), got {other:?}"),
    }
}

#[test]
fn test_fold_promotes_to_float() {
    let script = parse_and_fold("let x = 1 + 2.5;");
    match rhs_of_first_set(&script).kind {
        ExprKind::FloatLit(v) => assert_eq!(v, 3.5),
        ref other => panic!("expected folded FloatLit, got {other:?}"),
    }
}

#[test]
fn test_fold_division_is_float() {
    let script = parse_and_fold("let x = 1 / 2;");
    match rhs_of_first_set(&script).kind {
        ExprKind::FloatLit(v) => assert_eq!(v, 0.5),
        ref other => panic!("expected folded FloatLit, got {other:?}"),
    }
}

#[test]
fn test_fold_keeps_division_by_zero_for_runtime() {
    // The runtime diagnostic must be preserved, so 1/0 does not fold.
    let script = parse_and_fold("let x = 1 / 0;");
    assert!(matches!(rhs_of_first_set(&script).kind, ExprKind::Binary { .. }));
}

#[test]
fn test_fold_logic_and_comparisons() {
    let script = parse_and_fold("let x = !true || 2 > 1;");
    match rhs_of_first_set(&script).kind {
        ExprKind::BoolLit(true) => {}
        ref other => panic!("expected folded BoolLit(true), got {other:?}"),
    }
}

#[test]
fn test_fold_string_equality() {
    let script = parse_and_fold("let x = \"ab\" == \"ab\";");
    assert!(matches!(rhs_of_first_set(&script).kind, ExprKind::BoolLit(true)));
}

#[test]
fn test_fold_never_touches_variables_or_calls() {
    let script = parse_and_fold("let x = y + f(1 + 2);");
    let ExprKind::Binary { left, right, .. } = &rhs_of_first_set(&script).kind else {
        panic!("top node must stay a binary expression");
    };
    assert!(matches!(left.kind, ExprKind::Var { .. }));
    // The call argument folds, the call itself never evaluates.
    let ExprKind::Command { args, .. } = &right.kind else {
        panic!("call must stay a call");
    };
    assert!(matches!(args[0].kind, ExprKind::IntLit(3)));
}

#[test]
fn test_fold_partial_subtrees() {
    let script = parse_and_fold("let x = y + (1 + 2);");
    let ExprKind::Binary { right, .. } = &rhs_of_first_set(&script).kind else {
        panic!("expected binary");
    };
    assert!(matches!(right.kind, ExprKind::IntLit(3)));
}

#[test]
fn test_fold_inside_blocks_and_containers() {
    let script = parse_and_fold("let x = [1 + 1, { let y = 2 * 2; }];");
    let ExprKind::List { items } = &rhs_of_first_set(&script).kind else {
        panic!("expected list literal");
    };
    assert!(matches!(items[0].kind, ExprKind::IntLit(2)));
    let ExprKind::Block { script: inner } = &items[1].kind else {
        panic!("expected block literal");
    };
    match rhs_of_first_set(inner).kind {
        ExprKind::IntLit(4) => {}
        ref other => panic!("expected folded block body, got {other:?}"),
    }
}

/// Property: eval(fold(expr)) == eval(expr). The folded value (literal
/// operands) must print identically to the unfolded one (operands behind
/// variables, which the folder never touches).
#[test]
fn test_fold_preserves_semantics_over_operator_grid() {
    let cases = [
        ("7", "3"),
        ("7.5", "3"),
        ("7", "3.5"),
        ("2.5", "2.5"),
    ];
    let ops = ["+", "-", "*", "/", "%", "==", "!=", "<", "<=", ">", ">="];

    for (a, b) in cases {
        for op in ops {
            let folded = format!("print({a} {op} {b});");
            let unfolded = format!("let a = {a}; let b = {b}; print(a {op} b);");
            assert_eq!(
                run_output(&folded),
                run_output(&unfolded),
                "mismatch for {a} {op} {b}"
            );
        }
    }

    for (a, b) in [("true", "true"), ("true", "false"), ("false", "false")] {
        for op in ["&&", "||", "==", "!="] {
            let folded = format!("print({a} {op} {b});");
            let unfolded = format!("let a = {a}; let b = {b}; print(a {op} b);");
            assert_eq!(run_output(&folded), run_output(&unfolded));
        }
    }
}
