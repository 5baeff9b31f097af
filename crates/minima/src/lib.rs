// Minima
// A small embeddable scripting language with C-like surface syntax,
// compiled to register bytecode and executed by a reference-counted VM.

#[cfg(test)]
mod test;

pub mod compiler;
pub mod heap;
pub mod modules;
pub mod runtime;
pub mod stdlib;
pub mod typecheck;
pub mod value;
pub mod vm;

pub use compiler::{CompileError, CompileErrorKind, compile_source, parse_program};
pub use heap::{Block, Cmd, CmdKind, Heap, HeapStats, NativeFn};
pub use runtime::{Runtime, ScopeId, SymId};
pub use value::{Chunk, Const, Program, Value, ValueKind};
pub use vm::{ErrorKind, Vm};

/// Main entry point: compile and run source in a fresh VM. The returned
/// value carries a reference the caller releases through `vm.rt.heap` (or
/// ignores for scalar results).
pub fn execute(source: &str) -> Result<Value, CompileError> {
    let mut vm = Vm::new();
    let chunk = vm.compile(source, "<script>", "")?;
    Ok(vm.execute(&chunk))
}

/// Execute source against an existing VM instance.
pub fn execute_with_vm(vm: &mut Vm, source: &str) -> Result<Value, CompileError> {
    let chunk = vm.compile(source, "<script>", "")?;
    Ok(vm.execute(&chunk))
}
