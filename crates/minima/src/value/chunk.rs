// Compiled code unit: instructions plus constant/symbol/command/subchunk
// pools and an optional debug map. Chunks are shared behind Rc and form a
// DAG (subchunks can be shared); serialization walks them by index.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use smol_str::SmolStr;

use crate::runtime::{Runtime, SymId};
use crate::value::value::Value;
use crate::vm::opcode::{Ins, Op};

/// Pool constant. String payloads are owned by the chunk and materialize
/// fresh heap strings when loaded, which keeps chunks free of heap ids and
/// directly serializable.
#[derive(Debug, Clone)]
pub enum Const {
    Void,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Box<str>),
}

impl PartialEq for Const {
    fn eq(&self, other: &Const) -> bool {
        match (self, other) {
            (Const::Void, Const::Void) => true,
            (Const::Int(a), Const::Int(b)) => a == b,
            // Bit comparison so 0.0 and -0.0 stay distinct pool entries.
            (Const::Float(a), Const::Float(b)) => a.to_bits() == b.to_bits(),
            (Const::Bool(a), Const::Bool(b)) => a == b,
            (Const::Str(a), Const::Str(b)) => a == b,
            _ => false,
        }
    }
}

/// Per-instruction source mapping plus chunk-level name and file.
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    pub name: SmolStr,
    pub file: SmolStr,
    pub lines: Vec<u32>,
    pub cols: Vec<u32>,
}

impl DebugInfo {
    pub fn line_col(&self, ip: usize) -> (u32, u32) {
        let line = self.lines.get(ip).copied().unwrap_or(0);
        let col = self.cols.get(ip).copied().unwrap_or(0);
        (line, col)
    }
}

/// Cached resolution for one command-table entry. Targets are borrowed
/// references (the registry or a module environment keeps them alive); for
/// qualified names the base namespace value is remembered so rebinding the
/// module variable forces re-resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct CmdSlot {
    pub target: Option<Value>,
    pub qualified_base: Option<Value>,
}

const SYM_UNRESOLVED: u32 = u32::MAX;

#[derive(Debug, Default)]
pub struct Chunk {
    pub code: Vec<Ins>,
    pub consts: Vec<Const>,
    pub symbols: Vec<SmolStr>,
    pub cmd_names: Vec<SmolStr>,
    pub subchunks: Vec<Rc<Chunk>>,
    pub dbg: Option<DebugInfo>,
    /// Resolved command targets, filled by linking and lazy qualified
    /// resolution.
    pub cmd_slots: RefCell<Vec<CmdSlot>>,
    /// Runtime-global symbol ids, interned on first use.
    pub(crate) sym_ids: RefCell<Vec<u32>>,
}

impl Chunk {
    pub fn new() -> Chunk {
        Chunk::default()
    }

    /// Prepare the lazy caches once the pools are final.
    pub fn seal(&mut self) {
        *self.cmd_slots.borrow_mut() = vec![CmdSlot::default(); self.cmd_names.len()];
        *self.sym_ids.borrow_mut() = vec![SYM_UNRESOLVED; self.symbols.len()];
    }

    /// Intern symbol `index` into the runtime, caching the id on the chunk.
    pub fn sym_id(&self, rt: &mut Runtime, index: usize) -> Option<SymId> {
        let name = self.symbols.get(index)?;
        let mut ids = self.sym_ids.borrow_mut();
        if ids.len() != self.symbols.len() {
            ids.resize(self.symbols.len(), SYM_UNRESOLVED);
        }
        if ids[index] == SYM_UNRESOLVED {
            ids[index] = rt.syms.intern(name).0;
        }
        Some(SymId(ids[index]))
    }

    pub fn dbg_file(&self) -> &str {
        self.dbg.as_ref().map_or("", |d| d.file.as_str())
    }

    pub fn dbg_name(&self) -> &str {
        self.dbg.as_ref().map_or("", |d| d.name.as_str())
    }

    pub fn line_col_at(&self, ip: usize) -> (u32, u32) {
        self.dbg.as_ref().map_or((0, 0), |d| d.line_col(ip))
    }
}

//----------------------------------------------------------
// Disassembler
//----------------------------------------------------------

/// Pretty-print a chunk and its subchunks. Diagnostics only.
pub fn disasm(chunk: &Chunk) -> String {
    let mut out = String::new();
    disasm_into(chunk, 0, &mut 0, &mut out);
    out
}

fn disasm_into(chunk: &Chunk, depth: usize, next_label: &mut usize, out: &mut String) {
    if depth > 32 {
        out.push_str("; subchunk nesting too deep\n");
        return;
    }

    let label = *next_label;
    *next_label += 1;

    let name = if chunk.dbg_name().is_empty() { "<chunk>" } else { chunk.dbg_name() };
    let _ = writeln!(
        out,
        "chunk #{label} {name} ({} ins, {} consts, {} syms, {} cmds, {} subchunks)",
        chunk.code.len(),
        chunk.consts.len(),
        chunk.symbols.len(),
        chunk.cmd_names.len(),
        chunk.subchunks.len()
    );

    for (ip, ins) in chunk.code.iter().enumerate() {
        let (line, _col) = chunk.line_col_at(ip);
        let _ = write!(
            out,
            "  {ip:4}  {:<18} a={:<3} b={:<3} c={:<3} imm={:<6}",
            ins.op.name(),
            ins.a,
            ins.b,
            ins.c,
            ins.imm
        );
        match ins.op {
            Op::Ldc | Op::ArgPushConst => {
                if let Some(k) = chunk.consts.get(ins.imm as usize) {
                    let _ = write!(out, " ; {}", const_brief(k));
                }
            }
            Op::LoadVar | Op::StoreVar | Op::DefineVar | Op::ArgPushVarSym | Op::ArgPushSym
            | Op::LoadMember | Op::StoreMember => {
                if let Some(sym) = chunk.symbols.get(ins.imm as usize) {
                    let _ = write!(out, " ; ${sym}");
                }
            }
            Op::CallCmd => {
                if let Some(cmd) = chunk.cmd_names.get(ins.imm as usize) {
                    let _ = write!(out, " ; {cmd}");
                }
            }
            _ => {}
        }
        if line != 0 {
            let _ = write!(out, " ; line {line}");
        }
        out.push('\n');
    }

    for sub in &chunk.subchunks {
        disasm_into(sub, depth + 1, next_label, out);
    }
}

fn const_brief(k: &Const) -> String {
    match k {
        Const::Void => "()".to_string(),
        Const::Int(v) => v.to_string(),
        Const::Float(v) => format!("{v}"),
        Const::Bool(v) => v.to_string(),
        Const::Str(s) => format!("{s:?}"),
    }
}
