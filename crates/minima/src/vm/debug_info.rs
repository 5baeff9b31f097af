// Diagnostic call stack.
// Tracks at most CALL_STACK_MAX frames for error reports and the `trace`
// builtin; deeper recursion drops frames instead of failing.

use std::rc::Rc;

use smol_str::SmolStr;

use crate::value::chunk::Chunk;

pub const CALL_STACK_MAX: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallFrameKind {
    Block,
    UserCmd,
}

#[derive(Clone)]
pub struct CallFrame {
    pub kind: CallFrameKind,
    /// Command name for UserCmd frames; empty for blocks.
    pub name: SmolStr,
    pub caller_chunk: Option<Rc<Chunk>>,
    pub caller_ip: usize,
}

impl CallFrame {
    pub fn location(&self) -> Option<(String, u32, u32)> {
        let chunk = self.caller_chunk.as_ref()?;
        let file = chunk.dbg_file();
        if file.is_empty() {
            return None;
        }
        let (line, col) = chunk.line_col_at(self.caller_ip);
        if line == 0 {
            return None;
        }
        Some((file.to_string(), line, col))
    }
}
