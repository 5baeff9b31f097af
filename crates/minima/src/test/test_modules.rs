// Module loading: include resolution, cache freshness, include-once
// semantics and qualified calls into module environments.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::modules;
use crate::value::value::Value;
use crate::vm::Vm;

static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

/// A unique scratch directory per test invocation.
fn scratch_dir(tag: &str) -> PathBuf {
    let seq = DIR_SEQ.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "minima-test-{}-{tag}-{seq}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

fn vm_for(dir: &PathBuf) -> Vm {
    let mut vm = Vm::new();
    vm.set_cache_dir(Some(dir.join("cache")));
    vm
}

/// Run `source` as if it were a script at <dir>/main.mi, capturing output.
fn run_in_dir(vm: &mut Vm, dir: &PathBuf, source: &str) -> String {
    let buf = vm.capture_output();
    let main = dir.join("main.mi");
    let chunk = vm
        .compile(source, "<script>", main.to_string_lossy().as_ref())
        .expect("main compiles");
    let out = vm.execute(&chunk);
    vm.rt.heap.release(out);
    let bytes = buf.borrow().clone();
    String::from_utf8(bytes).expect("utf-8")
}

#[test]
fn test_include_and_qualified_call() {
    let dir = scratch_dir("qualified");
    std::fs::write(
        dir.join("m.mi"),
        "func add(a: int, b: int) -> int { return a + b; }\n",
    )
    .expect("write module");

    let mut vm = vm_for(&dir);
    let out = run_in_dir(
        &mut vm,
        &dir,
        r#"
        let m = include("m.mi");
        print(m::add(2, 3));
        "#,
    );
    assert_eq!(out, "5\n");
}

#[test]
fn test_qualified_call_resolves_once_then_caches() {
    let dir = scratch_dir("cache-target");
    std::fs::write(dir.join("m.mi"), "func twice(n: int) -> int { return n + n; }\n")
        .expect("write module");

    let mut vm = vm_for(&dir);
    let out = run_in_dir(
        &mut vm,
        &dir,
        r#"
        let m = include("m.mi");
        let total = 0;
        let i = 0;
        while (i < 5) {
            total = total + m::twice(i);
            i = i + 1;
        }
        print(total);
        "#,
    );
    assert_eq!(out, "20\n");
}

#[test]
fn test_include_is_idempotent() {
    let dir = scratch_dir("idempotent");
    std::fs::write(
        dir.join("counted.mi"),
        r#"
        print("loaded");
        func ping() -> string { return "pong"; }
        "#,
    )
    .expect("write module");

    let mut vm = vm_for(&dir);
    let out = run_in_dir(
        &mut vm,
        &dir,
        r#"
        let a = include("counted.mi");
        let b = include("counted.mi");
        print(a::ping(), b::ping());
        "#,
    );
    // Module-level side effects run once; both handles reach the same env.
    assert_eq!(out, "loaded\npong pong\n");
}

#[test]
fn test_include_shares_backing_environment() {
    let dir = scratch_dir("shared-env");
    std::fs::write(
        dir.join("state.mi"),
        r#"
        let counter = 0;
        func bump() -> int {
            counter = counter + 1;
            return counter;
        }
        "#,
    )
    .expect("write module");

    let mut vm = vm_for(&dir);
    let out = run_in_dir(
        &mut vm,
        &dir,
        r#"
        let a = include("state.mi");
        let b = include("state.mi");
        a::bump();
        b::bump();
        print(a::bump());
        "#,
    );
    assert_eq!(out, "3\n");
}

#[test]
fn test_module_member_read_through_handle() {
    let dir = scratch_dir("member");
    std::fs::write(dir.join("conf.mi"), "let answer = 42;\n").expect("write module");

    let mut vm = vm_for(&dir);
    let out = run_in_dir(
        &mut vm,
        &dir,
        r#"
        let conf = include("conf.mi");
        print(conf::answer);
        "#,
    );
    assert_eq!(out, "42\n");
}

#[test]
fn test_include_missing_module_reports() {
    let dir = scratch_dir("missing");
    let mut vm = vm_for(&dir);
    let out = run_in_dir(
        &mut vm,
        &dir,
        r#"
        let m = include("nope.mi");
        print(m);
        "#,
    );
    assert_eq!(out, "()\n");
}

#[test]
fn test_include_populates_mx_cache() {
    let dir = scratch_dir("cachefile");
    let module = dir.join("cached.mi");
    std::fs::write(&module, "func id(x: any) -> any { return x; }\n").expect("write module");

    let mut vm = vm_for(&dir);
    let _ = run_in_dir(&mut vm, &dir, "let c = include(\"cached.mi\");");

    let cached = modules::cached_mx_for_mi(&vm, &module).expect("cache path");
    assert!(cached.exists(), "compiled module lands in the cache");
    assert!(cached.extension().is_some_and(|e| e == "mx"));

    // The cache directory name is the hash of the absolute source path.
    let abs = module.canonicalize().expect("module exists");
    let hash = modules::fnv1a64(abs.to_string_lossy().as_bytes());
    let parent = cached.parent().expect("hash directory");
    assert_eq!(
        parent.file_name().map(|n| n.to_string_lossy().to_string()),
        Some(format!("{hash:016x}"))
    );
}

#[test]
fn test_modules_dir_fallback_resolution() {
    let dir = scratch_dir("modroot");
    let mods = dir.join("modules");
    std::fs::create_dir_all(&mods).expect("modules dir");
    std::fs::write(mods.join("util.mi"), "func seven() -> int { return 7; }\n")
        .expect("write module");

    let mut vm = vm_for(&dir);
    vm.set_modules_dir(Some(mods));
    let out = run_in_dir(
        &mut vm,
        &dir,
        r#"
        let util = include("util.mi");
        print(util::seven());
        "#,
    );
    assert_eq!(out, "7\n");
}

#[test]
fn test_module_heap_released_on_shutdown() {
    let dir = scratch_dir("shutdown");
    std::fs::write(dir.join("m.mi"), "let xs = [1, 2, 3];\n").expect("write module");

    let mut vm = vm_for(&dir);
    let _ = run_in_dir(&mut vm, &dir, "let m = include(\"m.mi\"); print(m::xs);");
    vm.shutdown();
    assert_eq!(vm.rt.heap.stats().bytes_live, 0);
}

#[test]
fn test_include_owned_value_roundtrip() {
    // include_module hands back an owned block value.
    let dir = scratch_dir("owned");
    std::fs::write(dir.join("m.mi"), "let x = 1;\n").expect("write module");

    let mut vm = vm_for(&dir);
    let main = dir.join("main.mi");
    let chunk = vm
        .compile("print(1);", "<script>", main.to_string_lossy().as_ref())
        .expect("compiles");
    // Establish a debug chunk so include resolves relative to the dir.
    let out = vm.execute(&chunk);
    vm.rt.heap.release(out);

    let module = modules::include_module(&mut vm, "m.mi");
    assert!(matches!(module, Value::Block(_)));
    vm.rt.heap.release(module);

    vm.shutdown();
    assert_eq!(vm.rt.heap.stats().bytes_live, 0);
}
