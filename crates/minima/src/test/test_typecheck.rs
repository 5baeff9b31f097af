// Shallow typechecker: accept/reject cases over function bodies.

use crate::compiler::{CompileErrorKind, parse_program};
use crate::typecheck::typecheck_script;
use crate::vm::Vm;

fn check(source: &str) -> Result<(), crate::compiler::CompileError> {
    let script = parse_program(source).expect("parses");
    let mut vm = Vm::new();
    typecheck_script(&mut vm, &script)
}

#[test]
fn test_accepts_well_typed_function() {
    check(
        r#"
        func add(a: int, b: int) -> int { return a + b; }
        print(add(1, 2));
        "#,
    )
    .expect("well-typed program");
}

#[test]
fn test_rejects_wrong_literal_argument() {
    let err = check(
        r#"
        func add(a: int, b: int) -> int { return a + b; }
        print(add(1, "two"));
        "#,
    )
    .unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::Type);
    assert!(err.message.contains("add"));
}

#[test]
fn test_rejects_wrong_arity() {
    let err = check(
        r#"
        func add(a: int, b: int) -> int { return a + b; }
        print(add(1));
        "#,
    )
    .unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::Type);
    assert!(err.message.contains("expected 2 args"));
}

#[test]
fn test_int_promotes_into_float_parameter() {
    check(
        r#"
        func half(x: float) -> float { return x / 2; }
        print(half(3));
        "#,
    )
    .expect("int literal promotes to float parameter");
}

#[test]
fn test_rejects_arithmetic_on_strings() {
    let err = check("func f(s: string) -> int { return s + 1; } print(f(\"x\"));").unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::Type);
}

#[test]
fn test_rejects_return_type_mismatch() {
    let err = check("func f() -> int { return \"nope\"; }").unwrap_err();
    assert!(err.message.contains("declared int"));
}

#[test]
fn test_rejects_missing_return_on_some_path() {
    let err = check(
        r#"
        func sign(n: int) -> int {
            if (n > 0) { return 1; }
            else if (n < 0) { return -1; }
        }
        "#,
    )
    .unwrap_err();
    assert!(err.message.contains("not all paths return"));
}

#[test]
fn test_accepts_return_on_all_paths() {
    check(
        r#"
        func sign(n: int) -> int {
            if (n > 0) { return 1; }
            else if (n < 0) { return -1; }
            else { return 0; }
        }
        print(sign(4));
        "#,
    )
    .expect("all paths return");
}

#[test]
fn test_void_function_needs_no_return() {
    check("func hello() -> void { print(\"hi\"); } hello();").expect("void function");
}

#[test]
fn test_any_parameter_disables_checks() {
    check(
        r#"
        func show(v: any) -> void { print(v); }
        show(1);
        show("s");
        show([1, 2]);
        "#,
    )
    .expect("any disables parameter checking");
}

#[test]
fn test_variadic_any_tail_is_unchecked() {
    check("print(1, \"mixed\", true, 2.5, [1]);").expect("print tail is any");
}

#[test]
fn test_builtin_signature_checked() {
    // len expects exactly one argument (registered runtime signature).
    let err = check("print(len());").unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::Type);
}

#[test]
fn test_assigned_types_flow_through_variables() {
    let err = check(
        r#"
        func add(a: int, b: int) -> int { return a + b; }
        let s = "text";
        print(add(s, 1));
        "#,
    )
    .unwrap_err();
    assert_eq!(err.kind, CompileErrorKind::Type);
}

#[test]
fn test_unknown_variables_stay_any() {
    // A variable of unknown type never triggers parameter errors.
    check(
        r#"
        func add(a: int, b: int) -> int { return a + b; }
        foreach (x, [1, 2]) { print(add(x, 1)); }
        "#,
    )
    .expect("unknown types are any");
}
