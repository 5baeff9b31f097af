// Compilation pipeline: source text -> tokens -> command-form AST ->
// (constant folding) -> chunk. Linking against the VM command registry
// happens separately so MX-loaded chunks share the same path.

pub mod ast;
pub mod codegen;
pub mod fold;
pub mod parser;

use std::rc::Rc;

pub use parser::{CompileError, CompileErrorKind, parse_program};

use crate::value::chunk::Chunk;
use crate::vm::Vm;

/// Parse, fold and compile a script. The chunk still needs linking.
pub fn compile_source(
    vm: &mut Vm,
    source: &str,
    dbg_name: &str,
    dbg_file: &str,
) -> Result<Rc<Chunk>, CompileError> {
    let mut script = parse_program(source)?;
    fold::fold_script(&mut script);
    Ok(codegen::compile_script(vm, &script, dbg_name, dbg_file))
}

/// Parse, typecheck, fold, compile and link. The driver path: typecheck
/// failures stop compilation with a pretty diagnostic.
pub fn compile_checked(
    vm: &mut Vm,
    source: &str,
    dbg_name: &str,
    dbg_file: &str,
) -> Result<Rc<Chunk>, CompileError> {
    let mut script = parse_program(source)?;
    crate::typecheck::typecheck_script(vm, &script)?;
    fold::fold_script(&mut script);
    let chunk = codegen::compile_script(vm, &script, dbg_name, dbg_file);
    if let Err(msg) = vm.link_chunk(&chunk) {
        return Err(CompileError::new(CompileErrorKind::Parse, msg, 0, 0));
    }
    Ok(chunk)
}

impl Vm {
    /// Compile source into a linked chunk ready to execute.
    pub fn compile(
        &mut self,
        source: &str,
        dbg_name: &str,
        dbg_file: &str,
    ) -> Result<Rc<Chunk>, CompileError> {
        let chunk = compile_source(self, source, dbg_name, dbg_file)?;
        // Unqualified names always resolve here: the compiler only emits
        // CALL_CMD for commands registered at compile time.
        if let Err(msg) = self.link_chunk(&chunk) {
            return Err(CompileError::new(CompileErrorKind::Parse, msg, 0, 0));
        }
        Ok(chunk)
    }
}
