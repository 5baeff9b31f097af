// Test module organization

pub mod test_fold;
pub mod test_heap;
pub mod test_modules;
pub mod test_mx;
pub mod test_scope;
pub mod test_syntax;
pub mod test_typecheck;
pub mod test_vm;

use crate::value::value::Value;
use crate::vm::Vm;

/// Compile and run source in a fresh VM; panic on compile errors.
pub fn run(source: &str) -> (Vm, Value) {
    let mut vm = Vm::new();
    let chunk = vm
        .compile(source, "<test>", "")
        .unwrap_or_else(|e| panic!("compile failed: {e}"));
    let out = vm.execute(&chunk);
    (vm, out)
}

/// Compile and run source, returning everything the program printed.
pub fn run_output(source: &str) -> String {
    let mut vm = Vm::new();
    let buf = vm.capture_output();
    let chunk = vm
        .compile(source, "<test>", "")
        .unwrap_or_else(|e| panic!("compile failed: {e}"));
    let out = vm.execute(&chunk);
    vm.rt.heap.release(out);
    let bytes = buf.borrow().clone();
    String::from_utf8(bytes).expect("program output is utf-8")
}

/// Run a program and report the heap stats after a full VM shutdown.
pub fn run_then_shutdown(source: &str) -> crate::heap::HeapStats {
    let mut vm = Vm::new();
    let _ = vm.capture_output();
    let chunk = vm
        .compile(source, "<test>", "")
        .unwrap_or_else(|e| panic!("compile failed: {e}"));
    let out = vm.execute(&chunk);
    vm.rt.heap.release(out);
    vm.shutdown();
    vm.rt.heap.stats()
}

/// Shared entry helper sanity: the crate-level execute() wrapper.
#[test]
fn test_execute_entry_point() {
    let out = crate::execute("let x = 4; len([1, 2, 3]);").expect("runs");
    assert!(matches!(out, Value::Int(3)));
}
