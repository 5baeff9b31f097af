// The Minima virtual machine.
// One Vm owns a runtime (heap + scopes + symbols), a 256-slot register
// file, a linear argument stack with a small save-frame stack, the global
// command registry, module caches and native library handles. Execution is
// single-threaded and runs to completion; program recursion uses the host
// stack.

mod call;
pub mod debug_info;
pub mod error;
mod execute;
pub mod opcode;

use std::cell::RefCell;
use std::io::Write as _;
use std::path::PathBuf;
use std::rc::Rc;

use ahash::AHashMap;
use smol_str::SmolStr;

use crate::compiler::ast::FuncTypeSig;
use crate::heap::{Block, Cmd, CmdKind, NativeFn};
use crate::runtime::{Runtime, ScopeId};
use crate::value::chunk::Chunk;
use crate::value::chunk_serializer::Program;
use crate::value::value::{Value, write_value};

pub use debug_info::{CALL_STACK_MAX, CallFrame, CallFrameKind};
pub use error::ErrorKind;

pub const REG_COUNT: usize = 256;
pub const ARG_STACK_COUNT: usize = 256;
pub const ARG_FRAME_MAX: usize = 16;

/// Program output destination. Tests capture output instead of writing to
/// the process stdout.
#[derive(Clone)]
pub enum OutputSink {
    Stdout,
    Capture(Rc<RefCell<Vec<u8>>>),
}

pub struct Vm {
    pub rt: Runtime,

    // Working state (execution).
    pub(crate) regs: Box<[Value; REG_COUNT]>,
    pub(crate) arg_stack: Box<[Value; ARG_STACK_COUNT]>,
    pub(crate) arg_top: usize,
    pub(crate) arg_frames: Vec<Vec<Value>>,

    // Current call context for argc()/arg()/arg_type()/arg_name().
    pub(crate) cur_args: Vec<Value>,
    pub(crate) cur_cmd: Option<Value>,
    pub(crate) cur_cmd_name: SmolStr,

    // Global command registry (values retained for the VM's lifetime).
    commands: Vec<(SmolStr, Value)>,

    // Loaded modules: cache (resolved path -> block value), pinned
    // detached environments, and loaded chunk tables.
    pub(crate) module_cache: AHashMap<String, Value>,
    pub(crate) module_envs: Vec<ScopeId>,
    pub(crate) module_programs: Vec<Program>,
    #[cfg(feature = "loadlib")]
    pub(crate) native_libs: Vec<crate::modules::native::NativeLib>,

    // include: cache root and native-modules directory overrides.
    pub(crate) cache_dir: Option<PathBuf>,
    pub(crate) modules_dir: Option<PathBuf>,

    // Debug cursor + diagnostic call stack.
    pub(crate) dbg_chunk: Option<Rc<Chunk>>,
    pub(crate) dbg_ip: usize,
    pub(crate) call_stack: Vec<CallFrame>,

    pub(crate) out: OutputSink,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    /// Create a VM with all builtin commands and the numeric namespaces
    /// registered.
    pub fn new() -> Vm {
        let mut vm = Vm {
            rt: Runtime::new(),
            regs: Box::new([Value::Void; REG_COUNT]),
            arg_stack: Box::new([Value::Void; ARG_STACK_COUNT]),
            arg_top: 0,
            arg_frames: Vec::new(),
            cur_args: Vec::new(),
            cur_cmd: None,
            cur_cmd_name: SmolStr::default(),
            commands: Vec::new(),
            module_cache: AHashMap::new(),
            module_envs: Vec::new(),
            module_programs: Vec::new(),
            #[cfg(feature = "loadlib")]
            native_libs: Vec::new(),
            cache_dir: None,
            modules_dir: None,
            dbg_chunk: None,
            dbg_ip: 0,
            call_stack: Vec::new(),
            out: OutputSink::Stdout,
        };
        crate::stdlib::register_builtins(&mut vm);
        vm
    }

    //----------------------------------------------------------
    // Output
    //----------------------------------------------------------

    /// Redirect program output into a buffer and return it.
    pub fn capture_output(&mut self) -> Rc<RefCell<Vec<u8>>> {
        let buf = Rc::new(RefCell::new(Vec::new()));
        self.out = OutputSink::Capture(buf.clone());
        buf
    }

    pub(crate) fn out_str(&mut self, s: &str) {
        match &self.out {
            OutputSink::Stdout => {
                let mut stdout = std::io::stdout();
                let _ = stdout.write_all(s.as_bytes());
                let _ = stdout.flush();
            }
            OutputSink::Capture(buf) => buf.borrow_mut().extend_from_slice(s.as_bytes()),
        }
    }

    /// Render a value the way `print` does (no trailing newline).
    pub fn value_to_string(&self, v: Value) -> String {
        let mut s = String::new();
        write_value(&self.rt.heap, &mut s, v);
        s
    }

    //----------------------------------------------------------
    // Diagnostics
    //----------------------------------------------------------

    /// Report a recoverable runtime error: kind-tagged message decorated
    /// with file:line:col, a call-stack snapshot, and the offending source
    /// line. The failing operation produces void; execution continues.
    pub fn report(&self, kind: ErrorKind, msg: &str) {
        let mut file = String::new();
        let mut line = 0;
        let mut col = 0;
        if let Some(chunk) = &self.dbg_chunk {
            file = chunk.dbg_file().to_string();
            let (l, c) = chunk.line_col_at(self.dbg_ip);
            line = l;
            col = c;
        }

        if !file.is_empty() && line > 0 {
            eprintln!("Runtime error: {}: {msg} ({file}:{line}:{col})", kind.label());
        } else {
            eprintln!("Runtime error: {}: {msg}", kind.label());
        }

        if !self.call_stack.is_empty() {
            eprintln!("Call stack:");
            for frame in self.call_stack.iter().rev() {
                let loc = frame
                    .location()
                    .map(|(f, l, c)| format!(" at {f}:{l}:{c}"))
                    .unwrap_or_default();
                match frame.kind {
                    CallFrameKind::UserCmd => eprintln!("  cmd {}{loc}", frame.name),
                    CallFrameKind::Block => eprintln!("  block{loc}"),
                }
            }
        }

        error::print_source_context(&file, line, col);
    }

    /// Fatal class: report and terminate the process.
    pub fn fatal(&self, msg: &str) -> ! {
        self.report(ErrorKind::Fatal, msg);
        std::process::exit(1);
    }

    /// `trace` builtin: print the stack, most recent call first.
    pub fn trace_print(&self) {
        let mut out = String::new();
        out.push_str("Stack trace (most recent call first):\n");
        let frame_line = |out: &mut String, label: &str, chunk: Option<&Rc<Chunk>>, ip: usize| {
            match chunk {
                Some(chunk) => {
                    let name = if chunk.dbg_name().is_empty() { "<chunk>" } else { chunk.dbg_name() };
                    let file = if chunk.dbg_file().is_empty() { "<unknown>" } else { chunk.dbg_file() };
                    let (line, col) = chunk.line_col_at(ip);
                    let ins = chunk.code.get(ip);
                    match ins {
                        Some(ins) => out.push_str(&format!(
                            "  {label} {name} {file}:{line}:{col} ip={ip} {} a={} b={} c={} imm={}\n",
                            ins.op.name(),
                            ins.a,
                            ins.b,
                            ins.c,
                            ins.imm
                        )),
                        None => out.push_str(&format!(
                            "  {label} {name} {file}:{line}:{col} ip={ip} <out-of-range>\n"
                        )),
                    }
                }
                None => out.push_str(&format!("  {label} <no-chunk>\n")),
            }
        };

        frame_line(&mut out, "#0", self.dbg_chunk.as_ref(), self.dbg_ip);
        for (i, frame) in self.call_stack.iter().rev().enumerate() {
            let label = match frame.kind {
                CallFrameKind::UserCmd => format!("#{} user:{}", i + 1, frame.name),
                CallFrameKind::Block => format!("#{} call", i + 1),
            };
            frame_line(&mut out, &label, frame.caller_chunk.as_ref(), frame.caller_ip);
        }
        eprint!("{out}");
    }

    //----------------------------------------------------------
    // Command registry
    //----------------------------------------------------------

    /// Register a native command. The VM retains the created Cmd value for
    /// its entire lifetime; re-registering a name replaces the target.
    pub fn register_native(
        &mut self,
        name: &str,
        sig: Option<FuncTypeSig>,
        func: NativeFn,
        doc: &str,
    ) -> bool {
        let cmd = Cmd {
            name: SmolStr::new(name),
            sig,
            doc: SmolStr::new(doc),
            kind: CmdKind::Native { func },
        };
        let value = self.rt.heap.alloc_cmd(cmd);
        if let Some(entry) = self.commands.iter_mut().find(|(n, _)| n.as_str() == name) {
            let old = std::mem::replace(&mut entry.1, value);
            self.rt.heap.release(old);
            return true;
        }
        self.commands.push((SmolStr::new(name), value));
        true
    }

    /// Find a registered command value by name. The returned value is
    /// borrowed from the registry.
    pub fn find_command(&self, name: &str) -> Option<Value> {
        self.commands.iter().find(|(n, _)| n.as_str() == name).map(|&(_, v)| v)
    }

    /// Look up a callable signature by name: global commands ("print") and
    /// qualified members ("int::cast"). Used by the typechecker.
    pub fn find_sig(&mut self, qualified: &str) -> Option<FuncTypeSig> {
        let cmd_value = if qualified.contains("::") {
            self.resolve_qualified(qualified).map(|(cmd, _)| cmd)?
        } else {
            self.find_command(qualified).or_else(|| {
                self.rt.var_get_name(qualified).filter(|v| matches!(v, Value::Cmd(_)))
            })?
        };
        let Value::Cmd(id) = cmd_value else { return None };
        self.rt.heap.cmd(id).and_then(|c| c.sig.clone())
    }

    //----------------------------------------------------------
    // Namespaces
    //----------------------------------------------------------

    /// Create (or fetch) a namespace block with a detached environment,
    /// bound to `name` in the root scope. Numeric stdlib namespaces
    /// (`int::`, `float::`) use this.
    pub fn namespace_get_or_create(&mut self, name: &str) -> Value {
        let sym = self.rt.syms.intern(name);
        if let Some(existing) = self.rt.var_get_in(self.rt.root, sym) {
            if matches!(existing, Value::Block(_)) {
                return existing;
            }
        }

        let env = self.rt.scope_create_detached();
        self.module_envs.push(env);
        let block = Block { chunk: Rc::new(Chunk::new()), env: Some(env), id: 0 };
        let value = self.rt.heap.alloc_block(block);
        self.rt.var_set_from(self.rt.root, sym, value);
        // The root binding holds the reference; drop the allocation count.
        self.rt.heap.release(value);
        self.rt.var_get_in(self.rt.root, sym).unwrap_or(Value::Void)
    }

    /// Register a native command as a member of a namespace block. The
    /// member lives in the namespace environment, not the global registry.
    pub fn namespace_add_native(
        &mut self,
        ns_block: Value,
        member: &str,
        sig: Option<FuncTypeSig>,
        func: NativeFn,
        doc: &str,
    ) -> bool {
        let Value::Block(id) = ns_block else { return false };
        let Some(env) = self.rt.heap.block(id).and_then(|b| b.env) else {
            return false;
        };
        let cmd = Cmd {
            name: SmolStr::new(member),
            sig,
            doc: SmolStr::new(doc),
            kind: CmdKind::Native { func },
        };
        let value = self.rt.heap.alloc_cmd(cmd);
        let sym = self.rt.syms.intern(member);
        self.rt.var_set_from(env, sym, value);
        self.rt.heap.release(value);
        true
    }

    /// Define a plain value inside a namespace environment.
    pub fn namespace_add_value(&mut self, ns_block: Value, member: &str, value: Value) -> bool {
        let Value::Block(id) = ns_block else { return false };
        let Some(env) = self.rt.heap.block(id).and_then(|b| b.env) else {
            return false;
        };
        let sym = self.rt.syms.intern(member);
        self.rt.var_set_from(env, sym, value);
        true
    }

    //----------------------------------------------------------
    // Linking
    //----------------------------------------------------------

    /// Resolve a chunk's command-table names against the registry.
    /// Unqualified names must resolve now; qualified names stay unresolved
    /// for lazy caching at the first call site.
    pub fn link_chunk(&mut self, chunk: &Rc<Chunk>) -> Result<(), String> {
        for (index, name) in chunk.cmd_names.iter().enumerate() {
            if chunk.cmd_slots.borrow()[index].target.is_some() {
                continue;
            }
            if name.contains("::") {
                if let Some((cmd, base)) = self.resolve_qualified(name) {
                    let mut slots = chunk.cmd_slots.borrow_mut();
                    slots[index].target = Some(cmd);
                    slots[index].qualified_base = Some(base);
                }
                continue;
            }
            match self.find_command(name) {
                Some(cmd) => {
                    chunk.cmd_slots.borrow_mut()[index].target = Some(cmd);
                }
                None => {
                    return Err(format!("unresolved command: {name}"));
                }
            }
        }
        for sub in &chunk.subchunks {
            self.link_chunk(sub)?;
        }
        Ok(())
    }

    /// Link every chunk of a loaded program.
    pub fn link_program(&mut self, program: &Program) -> Result<(), String> {
        for chunk in &program.chunks {
            self.link_chunk(chunk)?;
        }
        Ok(())
    }

    /// Resolve `a::b::c`: the first segment from the scope chain as a block
    /// value, each further segment inside that block's captured
    /// environment. The final segment must be a Cmd. Returns the command
    /// and the first-segment base value.
    pub fn resolve_qualified(&mut self, full: &str) -> Option<(Value, Value)> {
        let mut parts = full.split("::");
        let first = parts.next()?;
        let base = self.rt.var_get_name(first)?;
        let mut cur = base;

        let rest: Vec<&str> = parts.collect();
        if rest.is_empty() {
            return None;
        }
        for (i, seg) in rest.iter().enumerate() {
            let Value::Block(id) = cur else { return None };
            let env = self.rt.heap.block(id).and_then(|b| b.env)?;
            let sym = self.rt.syms.intern(seg);
            let v = self.rt.var_get_from(env, sym)?;
            if i + 1 == rest.len() {
                if matches!(v, Value::Cmd(_)) {
                    return Some((v, base));
                }
                return None;
            }
            cur = v;
        }
        None
    }

    //----------------------------------------------------------
    // Configuration
    //----------------------------------------------------------

    /// Override where include stores compiled .mx cache entries.
    pub fn set_cache_dir(&mut self, path: Option<PathBuf>) {
        self.cache_dir = path;
    }

    /// Override the native/script modules directory.
    pub fn set_modules_dir(&mut self, path: Option<PathBuf>) {
        self.modules_dir = path;
    }

    //----------------------------------------------------------
    // Shutdown
    //----------------------------------------------------------

    /// Release everything the VM retains: registers, argument stacks, the
    /// command registry, module caches and environments, and all scope
    /// frames. After shutdown the heap's `bytes_live` is zero for programs
    /// that did not construct reference cycles.
    pub fn shutdown(&mut self) {
        for i in 0..REG_COUNT {
            let old = std::mem::replace(&mut self.regs[i], Value::Void);
            self.rt.heap.release(old);
        }
        for i in 0..self.arg_top {
            let old = std::mem::replace(&mut self.arg_stack[i], Value::Void);
            self.rt.heap.release(old);
        }
        self.arg_top = 0;
        for frame in std::mem::take(&mut self.arg_frames) {
            for v in frame {
                self.rt.heap.release(v);
            }
        }
        self.cur_args.clear();
        self.cur_cmd = None;

        for (_, v) in std::mem::take(&mut self.commands) {
            self.rt.heap.release(v);
        }
        for (_, v) in std::mem::take(&mut self.module_cache) {
            self.rt.heap.release(v);
        }

        self.rt.shutdown();
        self.module_envs.clear();
        self.module_programs.clear();
        #[cfg(feature = "loadlib")]
        self.native_libs.clear();
        self.dbg_chunk = None;
        self.call_stack.clear();
    }
}
