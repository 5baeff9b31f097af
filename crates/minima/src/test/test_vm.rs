// End-to-end VM behavior: functions, the call ABI, numeric rules,
// dispatch forms and runtime diagnostics.

use crate::compiler::ast::{FuncTypeSig, TypeKind};
use crate::test::{run, run_output};
use crate::value::value::Value;
use crate::vm::Vm;

#[test]
fn test_fibonacci() {
    let src = r#"
        func fib(n: int) -> int {
            if (n < 2) { return n; }
            return fib(n - 1) + fib(n - 2);
        }
        print(fib(10));
    "#;
    assert_eq!(run_output(src), "55\n");
}

#[test]
fn test_foreach_sum() {
    let src = r#"
        let xs = [1, 2, 3, 4];
        let sum = 0;
        foreach (x, xs) { sum = sum + x; }
        print(sum);
    "#;
    assert_eq!(run_output(src), "10\n");
}

#[test]
fn test_dict_iteration_kvref() {
    let src = r#"
        let d = [a: 1, b: 2];
        let total = 0;
        foreach (kv, d) { total = total + kv[1]; }
        print(total);
    "#;
    assert_eq!(run_output(src), "3\n");
}

#[test]
fn test_dict_iteration_visits_each_entry_once() {
    let src = r#"
        let d = [a: 1, b: 2, c: 3];
        let n = 0;
        let key_bytes = 0;
        let total = 0;
        foreach (kv, d) {
            n = n + 1;
            key_bytes = key_bytes + len(kv[0]);
            total = total + kv[1];
        }
        print(n, key_bytes, total);
    "#;
    assert_eq!(run_output(src), "3 3 6\n");
}

#[test]
fn test_index_error_reports_and_yields_void() {
    let src = r#"
        let xs = [];
        print(xs[3]);
    "#;
    // The diagnostic goes to stderr; the failing operation produces void.
    assert_eq!(run_output(src), "()\n");
}

#[test]
fn test_numeric_promotion() {
    assert_eq!(run_output("let a = 1; let b = 2.0; print(a + b);"), "3\n");
    assert_eq!(run_output("let a = 1; let b = 2; print(a / b);"), "0.5\n");
    assert_eq!(run_output("let a = 5; let b = 3; print(a % b);"), "2\n");
    assert_eq!(run_output("let a = 1.0; let b = 1; print(a == b);"), "true\n");
}

#[test]
fn test_division_by_zero_yields_void() {
    assert_eq!(run_output("let a = 1; let b = 0; print(a / b);"), "()\n");
    assert_eq!(run_output("let a = 1; let b = 0; print(a % b);"), "()\n");
}

#[test]
fn test_void_comparisons() {
    assert_eq!(run_output("print(void == void);"), "true\n");
    assert_eq!(run_output("let x = 1; print(void == x);"), "false\n");
    assert_eq!(run_output("let x = 1; print(void != x);"), "true\n");
}

#[test]
fn test_string_equality_by_content() {
    let src = r#"
        let a = "he";
        let b = "llo";
        print(a == "he", "hello" == "hello", a == b);
    "#;
    assert_eq!(run_output(src), "true true false\n");
}

#[test]
fn test_truthiness_in_branches() {
    let src = r#"
        func pick(v: any) -> string {
            if (v) { return "t"; }
            return "f";
        }
        print(pick(0), pick(1), pick(""), pick("x"), pick(false), pick(void));
    "#;
    assert_eq!(run_output(src), "f t f t f f\n");
}

#[test]
fn test_user_command_arity_error() {
    let src = r#"
        func one(a: int) -> int { return a; }
        print(one(1, 2));
    "#;
    // ArityError diagnostic, call yields void.
    assert_eq!(run_output(src), "()\n");
}

#[test]
fn test_signature_type_error() {
    let src = r#"
        func twice(n: int) -> int { return n + n; }
        let s = "nope";
        print(twice(s));
    "#;
    assert_eq!(run_output(src), "()\n");
}

#[test]
fn test_variadic_any_tail_unchecked() {
    assert_eq!(run_output("print(1, \"two\", 3.0, true);"), "1 two 3 true\n");
}

#[test]
fn test_arg_introspection() {
    let src = r#"
        func probe(a: int, b: string) -> void {
            print(argc());
            print(arg(0), arg(1));
            print(arg_name(0), arg_name(1));
        }
        probe(7, "x");
    "#;
    assert_eq!(run_output(src), "2\n7 x\na b\n");
}

#[test]
fn test_blocks_do_not_observe_caller_args() {
    let src = r#"
        func outer(a: int) -> int {
            let counted = 0;
            { counted = argc(); }
            return counted;
        }
        print(outer(5));
    "#;
    assert_eq!(run_output(src), "0\n");
}

#[test]
fn test_commands_are_scoped_values() {
    // cmd stores the command as a variable in the defining scope; a
    // function-local definition does not escape the call frame.
    let src = r#"
        func wrapper() -> int {
            func helper() -> int { return 5; }
            return helper();
        }
        print(wrapper());
        print(helper());
    "#;
    assert_eq!(run_output(src), "5\n()\n");
}

#[test]
fn test_dynamic_head_through_cmd_value() {
    // A variable holding a Cmd value shadows command lookup by name.
    let src = r#"
        func real() -> string { return "yes"; }
        let f = real;
        print(f());
    "#;
    assert_eq!(run_output(src), "yes\n");
}

#[test]
fn test_block_value_call() {
    let src = r#"
        let b = { print("ran"); };
        call(b);
        call(b);
    "#;
    assert_eq!(run_output(src), "ran\nran\n");
}

fn wreck(vm: &mut Vm, _name: &str, _args: &[Value]) -> Value {
    // Stomp every scratch register and the argument stack with scalars.
    for r in 8..crate::vm::REG_COUNT {
        vm.regs[r] = Value::Int(-7);
    }
    for i in 0..crate::vm::ARG_STACK_COUNT {
        vm.arg_stack[i] = Value::Int(-9);
    }
    vm.arg_top = 0;
    Value::Int(1)
}

#[test]
fn test_call_abi_preserves_caller_state() {
    let mut vm = Vm::new();
    vm.register_native(
        "wreck",
        Some(FuncTypeSig::exact(TypeKind::Int, vec![])),
        wreck,
        "Clobber scratch registers and the arg stack.",
    );
    let buf = vm.capture_output();
    let src = r#"
        func f(a: int) -> int {
            return a + wreck();
        }
        print(f(10) + f(20), wreck());
    "#;
    let chunk = vm.compile(src, "<test>", "").expect("compiles");
    let out = vm.execute(&chunk);
    vm.rt.heap.release(out);
    let text = String::from_utf8(buf.borrow().clone()).unwrap();
    assert_eq!(text, "32 1\n");
}

#[test]
fn test_chunk_result_is_last_call_value() {
    let src = r#"
        func answer() -> int { return 42; }
        answer();
    "#;
    let (mut vm, out) = run(src);
    assert!(matches!(out, Value::Int(42)));
    vm.rt.heap.release(out);
}

#[test]
fn test_qualified_namespace_call() {
    assert_eq!(run_output("print(int::cast(3.7));"), "3\n");
    assert_eq!(run_output("print(float::cast(2));"), "2\n");
    assert_eq!(run_output("print(int::parse(\" 41 \") + 1);"), "42\n");
}

#[test]
fn test_namespace_value_member() {
    let src = "print(int::MAX > 0);";
    assert_eq!(run_output(src), "true\n");
}

#[test]
fn test_runtime_cmd_creation() {
    // cmd() is a plain command: user code can create commands at runtime.
    let src = r#"
        cmd("greet", "who", { print("hey", who); });
        greet("minima");
    "#;
    assert_eq!(run_output(src), "hey minima\n");
}
