// Surface syntax: literals, operators, control flow, containers.

use crate::test::{run_output, run_then_shutdown};

#[test]
fn test_print_literals() {
    assert_eq!(run_output("print(42);"), "42\n");
    assert_eq!(run_output("print(2.5);"), "2.5\n");
    assert_eq!(run_output("print(true, false);"), "true false\n");
    assert_eq!(run_output("print(\"hello\");"), "hello\n");
    assert_eq!(run_output("print(void);"), "()\n");
}

#[test]
fn test_string_escapes() {
    assert_eq!(run_output("print(\"a\\tb\");"), "a\tb\n");
    assert_eq!(run_output("print(\"line\\n\");"), "line\n\n");
    assert_eq!(run_output("print(\"quote \\\" end\");"), "quote \" end\n");
}

#[test]
fn test_comments() {
    let src = r#"
        // line comment
        let x = 1; /* block
                      comment */ let y = 2;
        print(x + y);
    "#;
    assert_eq!(run_output(src), "3\n");
}

#[test]
fn test_operator_precedence() {
    assert_eq!(run_output("print(2 + 3 * 4);"), "14\n");
    assert_eq!(run_output("print((2 + 3) * 4);"), "20\n");
    assert_eq!(run_output("let a = 2; let b = 3; print(a + b * a);"), "8\n");
    assert_eq!(run_output("print(1 + 2 == 3 && 4 > 3);"), "true\n");
}

#[test]
fn test_unary_operators() {
    assert_eq!(run_output("let x = 5; print(-x);"), "-5\n");
    assert_eq!(run_output("let b = false; print(!b);"), "true\n");
}

#[test]
fn test_assignment_and_let() {
    // let is assignment; a second plain assignment mutates the binding.
    let src = r#"
        let x = 1;
        x = x + 1;
        print(x);
    "#;
    assert_eq!(run_output(src), "2\n");
}

#[test]
fn test_if_else_chain() {
    let src = r#"
        func grade(n: int) -> string {
            if (n > 89) { return "a"; }
            else if (n > 79) { return "b"; }
            else { return "c"; }
        }
        print(grade(95), grade(85), grade(10));
    "#;
    assert_eq!(run_output(src), "a b c\n");
}

#[test]
fn test_if_single_statement_body() {
    let src = r#"
        let x = 0;
        if (true) x = 1;
        print(x);
    "#;
    assert_eq!(run_output(src), "1\n");
}

#[test]
fn test_while_loop() {
    let src = r#"
        let i = 0;
        let total = 0;
        while (i < 5) {
            total = total + i;
            i = i + 1;
        }
        print(total);
    "#;
    assert_eq!(run_output(src), "10\n");
}

#[test]
fn test_break_and_continue() {
    let src = r#"
        let sum = 0;
        foreach (x, [1, 2, 3, 4, 5]) {
            if (x == 2) { continue(); }
            if (x == 4) { break(); }
            sum = sum + x;
        }
        print(sum);
    "#;
    assert_eq!(run_output(src), "4\n");
}

#[test]
fn test_nested_loops_break_inner_only() {
    let src = r#"
        let count = 0;
        foreach (i, [1, 2, 3]) {
            foreach (j, [1, 2, 3]) {
                if (j == 2) { break(); }
                count = count + 1;
            }
        }
        print(count);
    "#;
    assert_eq!(run_output(src), "3\n");
}

#[test]
fn test_list_literal_and_index() {
    assert_eq!(run_output("let xs = [10, 20, 30]; print(xs[1]);"), "20\n");
    assert_eq!(run_output("print([1, 2, 3]);"), "[1 2 3]\n");
    assert_eq!(run_output("let xs = []; print(len(xs));"), "0\n");
}

#[test]
fn test_list_index_store() {
    let src = r#"
        let xs = [1, 2, 3];
        xs[1] = 99;
        print(xs);
    "#;
    assert_eq!(run_output(src), "[1 99 3]\n");
}

#[test]
fn test_dict_literal_and_lookup() {
    let src = r#"
        let d = [a: 1, b: 2];
        print(d["a"], d["b"], len(d));
    "#;
    assert_eq!(run_output(src), "1 2 2\n");
}

#[test]
fn test_empty_dict_literal() {
    assert_eq!(run_output("let d = [:]; print(len(d));"), "0\n");
}

#[test]
fn test_dict_store_index() {
    let src = r#"
        let d = [:];
        d["k"] = 41;
        d["k"] = d["k"] + 1;
        print(d["k"]);
    "#;
    assert_eq!(run_output(src), "42\n");
}

#[test]
fn test_string_length_and_index() {
    assert_eq!(run_output("print(len(\"hello\"));"), "5\n");
    assert_eq!(run_output("let s = \"abc\"; print(s[1]);"), "b\n");
}

#[test]
fn test_standalone_block_statement() {
    let src = r#"
        let x = 1;
        { x = 2; }
        print(x);
    "#;
    assert_eq!(run_output(src), "2\n");
}

#[test]
fn test_typeof_builtin() {
    assert_eq!(run_output("print(typeof(1), typeof(1.5), typeof(\"s\"));"), "int float string\n");
    assert_eq!(run_output("print(typeof([1]), typeof([:]), typeof(void));"), "list dict ()\n");
}

#[test]
fn test_type_values_compare() {
    assert_eq!(run_output("print(type(\"int\") == type(\"int\"));"), "true\n");
    assert_eq!(run_output("print(type(\"int\") == type(\"float\"));"), "false\n");
}

#[test]
fn test_stray_semicolons() {
    assert_eq!(run_output(";;; print(1); ;;"), "1\n");
}

#[test]
fn test_parse_error_reports_location() {
    let mut vm = crate::vm::Vm::new();
    let err = vm.compile("let x = ;", "<test>", "").unwrap_err();
    assert_eq!(err.kind, crate::compiler::CompileErrorKind::Parse);
    assert_eq!(err.line, 1);
    let pretty = err.pretty("", "let x = ;");
    assert!(pretty.contains("ParseError"));
    assert!(pretty.contains('^'));
}

#[test]
fn test_unterminated_string_is_lex_error() {
    let mut vm = crate::vm::Vm::new();
    let err = vm.compile("print(\"oops);", "<test>", "").unwrap_err();
    assert_eq!(err.kind, crate::compiler::CompileErrorKind::Lex);
}

#[test]
fn test_stray_ampersand_is_lex_error() {
    let mut vm = crate::vm::Vm::new();
    let err = vm.compile("let x = 1 & 2;", "<test>", "").unwrap_err();
    assert_eq!(err.kind, crate::compiler::CompileErrorKind::Lex);
    assert!(err.message.contains('&'));
}

#[test]
fn test_syntax_programs_release_heap() {
    let stats = run_then_shutdown(
        r#"
        let d = [a: [1, 2], b: [3, 4]];
        let total = 0;
        foreach (kv, d) { total = total + len(kv[1]); }
        print(total);
        "#,
    );
    assert_eq!(stats.bytes_live, 0);
}
