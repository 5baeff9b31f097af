// Code generator: command-form AST -> chunk.
// Register model: 256 virtual registers per chunk frame. r0 is the return
// slot, r1..r7 are caller-preserved across calls, r8+ are scratch. The
// allocator runs monotonically from a high-water mark that resets at each
// top-level statement; inlined scopes bump the base so nested bodies do not
// stomp outer temporaries.

use std::rc::Rc;

use smol_str::SmolStr;

use crate::compiler::ast::{BinaryOp, Command, Expr, ExprKind, Script, UnaryOp};
use crate::value::chunk::{Chunk, Const, DebugInfo};
use crate::vm::opcode::{Ins, Op};
use crate::vm::Vm;

const REG_LIMIT: u16 = 250;
const LOOP_MAX: usize = 16;
const BREAK_MAX: usize = 64;

struct ChunkBuilder {
    code: Vec<Ins>,
    consts: Vec<Const>,
    symbols: Vec<SmolStr>,
    cmd_names: Vec<SmolStr>,
    subchunks: Vec<Rc<Chunk>>,
    lines: Vec<u32>,
    cols: Vec<u32>,
    name: SmolStr,
    file: SmolStr,
}

impl ChunkBuilder {
    fn new(name: &str, file: &str) -> ChunkBuilder {
        ChunkBuilder {
            code: Vec::new(),
            consts: Vec::new(),
            symbols: Vec::new(),
            cmd_names: Vec::new(),
            subchunks: Vec::new(),
            lines: Vec::new(),
            cols: Vec::new(),
            name: SmolStr::new(name),
            file: SmolStr::new(file),
        }
    }

    fn emit(&mut self, ins: Ins, line: u32, col: u32) -> usize {
        let index = self.code.len();
        self.code.push(ins);
        self.lines.push(line);
        self.cols.push(col);
        index
    }

    fn add_const(&mut self, k: Const) -> i32 {
        if let Some(index) = self.consts.iter().position(|c| *c == k) {
            return index as i32;
        }
        self.consts.push(k);
        (self.consts.len() - 1) as i32
    }

    fn add_symbol(&mut self, name: &str) -> i32 {
        if let Some(index) = self.symbols.iter().position(|s| s.as_str() == name) {
            return index as i32;
        }
        self.symbols.push(SmolStr::new(name));
        (self.symbols.len() - 1) as i32
    }

    fn add_cmd(&mut self, name: &str) -> i32 {
        if let Some(index) = self.cmd_names.iter().position(|s| s.as_str() == name) {
            return index as i32;
        }
        self.cmd_names.push(SmolStr::new(name));
        (self.cmd_names.len() - 1) as i32
    }

    fn add_subchunk(&mut self, sub: Rc<Chunk>) -> i32 {
        self.subchunks.push(sub);
        (self.subchunks.len() - 1) as i32
    }

    /// Patch a previously-emitted jump. A zero distance is a fallthrough;
    /// the jump collapses to NOOP.
    fn patch_imm(&mut self, index: usize, imm: i32) {
        let ins = &mut self.code[index];
        ins.imm = imm;
        if imm == 0 && matches!(ins.op, Op::Jmp | Op::Jt | Op::Jf) {
            *ins = Ins::new(Op::Noop);
        }
    }

    fn here(&self) -> usize {
        self.code.len()
    }

    fn rel_to(&self, target: usize, from_jump: usize) -> i32 {
        (target as i64 - (from_jump as i64 + 1)) as i32
    }

    fn finish(self) -> Chunk {
        let mut chunk = Chunk {
            code: self.code,
            consts: self.consts,
            symbols: self.symbols,
            cmd_names: self.cmd_names,
            subchunks: self.subchunks,
            dbg: Some(DebugInfo {
                name: self.name,
                file: self.file,
                lines: self.lines,
                cols: self.cols,
            }),
            ..Chunk::default()
        };
        chunk.seal();
        chunk
    }
}

struct LoopCtx {
    start_ip: usize,
    break_jumps: Vec<usize>,
    scope_base_depth: i32,
}

pub struct CodeGen<'vm> {
    vm: &'vm mut Vm,
    b: ChunkBuilder,
    next_reg: u16,
    reg_base: u16,
    loops: Vec<LoopCtx>,
    inline_scope_depth: i32,
    // When > 0, we are compiling a command expression that is itself an
    // argument of another call; the arg stack must be preserved around it.
    arg_expr_depth: i32,
    line: u32,
    col: u32,
}

impl<'vm> CodeGen<'vm> {
    fn new(vm: &'vm mut Vm, name: &str, file: &str) -> CodeGen<'vm> {
        CodeGen {
            vm,
            b: ChunkBuilder::new(name, file),
            next_reg: 0,
            reg_base: 0,
            loops: Vec::new(),
            inline_scope_depth: 0,
            arg_expr_depth: 0,
            line: 0,
            col: 0,
        }
    }

    fn alloc_reg(&mut self) -> u8 {
        if self.next_reg >= REG_LIMIT {
            eprintln!("minima: compile: ran out of registers");
            return (REG_LIMIT - 1) as u8;
        }
        let r = self.next_reg;
        self.next_reg += 1;
        r as u8
    }

    fn emit(&mut self, ins: Ins) -> usize {
        self.b.emit(ins, self.line, self.col)
    }

    fn mark(&mut self, expr: &Expr) {
        if expr.token.line != 0 {
            self.line = expr.token.line;
            self.col = expr.token.column;
        }
    }

    fn load_void(&mut self, dst: u8) {
        let k = self.b.add_const(Const::Void);
        self.emit(Ins::a_imm(Op::Ldc, dst, k));
    }

    fn emit_scope_pops(&mut self, count: i32) {
        for _ in 0..count {
            self.emit(Ins::new(Op::ScopePop));
        }
    }

    //----------------------------------------------------------
    // Expressions
    //----------------------------------------------------------

    fn literal_const(&mut self, e: &Expr) -> Option<i32> {
        let k = match &e.kind {
            ExprKind::IntLit(v) => Const::Int(*v),
            ExprKind::FloatLit(v) => Const::Float(*v),
            ExprKind::StringLit(s) => Const::Str(s.as_str().into()),
            ExprKind::BoolLit(v) => Const::Bool(*v),
            ExprKind::VoidLit => Const::Void,
            _ => return None,
        };
        Some(self.b.add_const(k))
    }

    fn compile_expr(&mut self, e: &Expr) -> u8 {
        self.mark(e);
        match &e.kind {
            ExprKind::IntLit(_)
            | ExprKind::FloatLit(_)
            | ExprKind::StringLit(_)
            | ExprKind::BoolLit(_)
            | ExprKind::VoidLit => {
                let r = self.alloc_reg();
                // literal_const always succeeds for literal kinds
                if let Some(k) = self.literal_const(e) {
                    self.emit(Ins::a_imm(Op::Ldc, r, k));
                }
                r
            }

            ExprKind::Var { name } => {
                let r = self.alloc_reg();
                let sym = self.b.add_symbol(name);
                self.emit(Ins::a_imm(Op::LoadVar, r, sym));
                r
            }

            ExprKind::Member { base, name } => {
                let r = self.alloc_reg();
                let base_reg = self.compile_expr(base);
                let sym = self.b.add_symbol(name);
                self.emit(Ins::ab_imm(Op::LoadMember, r, base_reg, sym));
                r
            }

            ExprKind::Unary { op, expr } => {
                let r = self.alloc_reg();
                let x = self.compile_expr(expr);
                let op = match op {
                    UnaryOp::Neg => Op::Neg,
                    UnaryOp::Not => Op::Not,
                };
                self.emit(Ins::ab(op, r, x));
                r
            }

            ExprKind::Binary { op, left, right } => {
                let r = self.alloc_reg();
                let a = self.compile_expr(left);
                let c = self.compile_expr(right);
                self.emit(Ins::abc(map_binary(*op), r, a, c));
                r
            }

            ExprKind::Command { head, args } => self.compile_command_expr(head, args, true),

            ExprKind::Block { script } => {
                let r = self.alloc_reg();
                let file = self.b.file.clone();
                let sub = compile_subchunk(self.vm, script, "<block>", file);
                let id = self.b.add_subchunk(sub);
                self.emit(Ins::a_imm(Op::Ldb, r, id));
                r
            }

            ExprKind::List { items } => {
                let r = self.alloc_reg();
                self.emit(Ins::a(Op::ListNew, r));
                for item in items {
                    let item_reg = self.compile_expr(item);
                    self.emit(Ins::ab(Op::ListPush, r, item_reg));
                }
                r
            }

            ExprKind::Dict { items } => {
                // Lowered to a dict allocation plus STORE_INDEX per entry;
                // no intermediate list construction.
                let r = self.alloc_reg();
                self.emit(Ins::a(Op::DictNew, r));
                for item in items {
                    let ExprKind::Pair { key, value } = &item.kind else {
                        eprintln!("minima: compile: dict literal expects k = v entries");
                        break;
                    };
                    let k_reg = self.compile_expr(key);
                    let v_reg = self.compile_expr(value);
                    self.emit(Ins::abc(Op::StoreIndex, r, k_reg, v_reg));
                }
                r
            }

            ExprKind::Pair { .. } => {
                // The parser only produces pairs inside dict literals.
                eprintln!("minima: compile: pair literal used outside dict literal");
                let r = self.alloc_reg();
                self.load_void(r);
                r
            }

            ExprKind::Index { target, index } => {
                let r = self.alloc_reg();
                let base_reg = self.compile_expr(target);
                let key_reg = self.compile_expr(index);
                self.emit(Ins::abc(Op::Index, r, base_reg, key_reg));
                r
            }
        }
    }

    //----------------------------------------------------------
    // Commands (statements and call expressions)
    //----------------------------------------------------------

    fn compile_command_expr(&mut self, head: &Expr, args: &[Expr], wants_result: bool) -> u8 {
        self.mark(head);
        let dst = self.alloc_reg();

        if head.is_lit_string("set") && args.len() == 2 {
            if let Some(r) = self.compile_set(dst, &args[0], &args[1], wants_result) {
                return r;
            }
            // Computed name: dispatch to the runtime set builtin below.
        }
        if head.is_lit_string("call") && args.len() == 1 {
            let block_reg = self.compile_expr(&args[0]);
            self.emit(Ins::ab(Op::CallBlock, dst, block_reg));
            return dst;
        }
        if head.is_lit_string("break") {
            return self.compile_break(dst, wants_result);
        }
        if head.is_lit_string("continue") {
            return self.compile_continue(dst, wants_result);
        }
        if head.is_lit_string("return") {
            return self.compile_return(dst, args.first());
        }
        if head.is_lit_string("if") {
            return self.compile_if(dst, args, wants_result);
        }
        if head.is_lit_string("while") {
            return self.compile_while(dst, args);
        }
        if head.is_lit_string("foreach") {
            return self.compile_foreach(dst, args, wants_result);
        }

        // Regular command call through the argument stack.
        let preserve_args = self.arg_expr_depth > 0;
        if preserve_args {
            self.emit(Ins::new(Op::ArgSave));
        }
        self.emit(Ins::new(Op::ArgClear));

        let argc = args.len() as u8;
        for arg in args {
            self.emit_arg_value(arg);
        }

        if let ExprKind::StringLit(name) = &head.kind {
            let qualified = name.contains("::");
            if qualified || self.vm.find_command(name).is_some() {
                // Known natives resolve at link time; qualified names keep
                // an unresolved table entry for lazy caching at first call.
                let cmd_id = self.b.add_cmd(name);
                self.emit(Ins::ab_imm(Op::CallCmd, dst, argc, cmd_id));
            } else {
                // Late bound: the command may be user-defined earlier at
                // runtime. Dispatch by name.
                let head_reg = self.alloc_reg();
                let k = self.b.add_const(Const::Str(name.as_str().into()));
                self.emit(Ins::a_imm(Op::Ldc, head_reg, k));
                self.emit(Ins::abc(Op::CallCmdDyn, dst, head_reg, argc));
            }
        } else {
            let head_reg = self.compile_expr(head);
            self.emit(Ins::abc(Op::CallCmdDyn, dst, head_reg, argc));
        }

        if preserve_args {
            self.emit(Ins::new(Op::ArgRestore));
        }
        dst
    }

    /// Push one argument: literals go straight to the arg stack, direct
    /// variables by symbol, anything else through a scratch register.
    fn emit_arg_value(&mut self, arg: &Expr) {
        self.mark(arg);
        if arg.is_literal() {
            if let Some(k) = self.literal_const(arg) {
                self.emit(Ins::a_imm(Op::ArgPushConst, 0, k));
            }
            return;
        }
        if let ExprKind::Var { name } = &arg.kind {
            let sym = self.b.add_symbol(name);
            self.emit(Ins::a_imm(Op::ArgPushVarSym, 0, sym));
            return;
        }

        self.arg_expr_depth += 1;
        let r = self.compile_expr(arg);
        self.arg_expr_depth -= 1;
        self.emit(Ins::a(Op::ArgPush, r));
    }

    /// set lvalue shapes: bare name, variable, index expression and
    /// qualified member. Computed names return None and dispatch through
    /// the runtime set builtin instead.
    fn compile_set(&mut self, dst: u8, lvalue: &Expr, rhs: &Expr, wants_result: bool) -> Option<u8> {
        match &lvalue.kind {
            ExprKind::StringLit(name) | ExprKind::Var { name } => {
                let name = name.clone();
                let rhs_reg = self.compile_expr(rhs);
                let sym = self.b.add_symbol(&name);
                self.emit(Ins::a_imm(Op::StoreVar, rhs_reg, sym));
                if wants_result {
                    self.emit(Ins::ab(Op::Mov, dst, rhs_reg));
                }
                Some(dst)
            }
            ExprKind::Index { target, index } => {
                let base_reg = self.compile_expr(target);
                let key_reg = self.compile_expr(index);
                let rhs_reg = self.compile_expr(rhs);
                self.emit(Ins::abc(Op::StoreIndex, base_reg, key_reg, rhs_reg));
                if wants_result {
                    self.emit(Ins::ab(Op::Mov, dst, rhs_reg));
                }
                Some(dst)
            }
            ExprKind::Member { base, name } => {
                let name = name.clone();
                let rhs_reg = self.compile_expr(rhs);
                let base_reg = self.compile_expr(base);
                let sym = self.b.add_symbol(&name);
                self.emit(Ins::ab_imm(Op::StoreMember, rhs_reg, base_reg, sym));
                if wants_result {
                    self.emit(Ins::ab(Op::Mov, dst, rhs_reg));
                }
                Some(dst)
            }
            _ => None,
        }
    }

    fn compile_break(&mut self, dst: u8, wants_result: bool) -> u8 {
        if self.loops.is_empty() {
            eprintln!("minima: compile: break used outside a loop");
            if wants_result {
                self.load_void(dst);
            }
            return dst;
        }
        if wants_result {
            self.load_void(dst);
        }

        // Pop all inlined scopes down to the loop's base depth, so break
        // from inside a nested if body unwinds correctly.
        let base = self.loops.last().map_or(0, |l| l.scope_base_depth);
        let pops = self.inline_scope_depth - base;
        if pops > 0 {
            self.emit_scope_pops(pops);
        }

        let jump = self.emit(Ins::new(Op::Jmp));
        if let Some(ctx) = self.loops.last_mut() {
            if ctx.break_jumps.len() < BREAK_MAX {
                ctx.break_jumps.push(jump);
            } else {
                eprintln!("minima: compile: too many break sites in one loop");
            }
        }
        dst
    }

    fn compile_continue(&mut self, dst: u8, wants_result: bool) -> u8 {
        if self.loops.is_empty() {
            eprintln!("minima: compile: continue used outside a loop");
            if wants_result {
                self.load_void(dst);
            }
            return dst;
        }
        if wants_result {
            self.load_void(dst);
        }

        let base = self.loops.last().map_or(0, |l| l.scope_base_depth);
        let pops = self.inline_scope_depth - base;
        if pops > 0 {
            self.emit_scope_pops(pops);
        }

        let start = self.loops.last().map_or(0, |l| l.start_ip);
        let jump = self.emit(Ins::new(Op::Jmp));
        let rel = self.b.rel_to(start, jump);
        self.b.patch_imm(jump, rel);
        dst
    }

    /// Early return: clean up any open inline scopes, then RETURN.
    fn compile_return(&mut self, dst: u8, value: Option<&Expr>) -> u8 {
        let r = match value {
            Some(value) => self.compile_expr(value),
            None => {
                self.load_void(dst);
                dst
            }
        };
        if self.inline_scope_depth > 0 {
            self.emit_scope_pops(self.inline_scope_depth);
        }
        self.emit(Ins::a(Op::Return, r));
        dst
    }

    /// if/elseif/else with forward JF past each branch and a forward JMP
    /// chain to a single end label; inline scopes bracket each body.
    fn compile_if(&mut self, dst: u8, args: &[Expr], wants_result: bool) -> u8 {
        let mut it = args.iter();
        let (mut cond, mut body) = match (it.next(), it.next()) {
            (Some(c), Some(b)) => (c, b),
            _ => {
                eprintln!("minima: compile: if expects a condition and a branch body");
                if wants_result {
                    self.load_void(dst);
                }
                return dst;
            }
        };

        let mut end_jumps = Vec::new();

        loop {
            let cond_reg = self.compile_expr(cond);
            let jf = self.emit(Ins::a(Op::Jf, cond_reg));

            self.compile_branch_body(dst, body, wants_result);

            end_jumps.push(self.emit(Ins::new(Op::Jmp)));

            let here = self.b.here();
            let rel = self.b.rel_to(here, jf);
            self.b.patch_imm(jf, rel);

            let Some(marker) = it.next() else { break };

            if marker.is_lit_string("elseif") {
                match (it.next(), it.next()) {
                    (Some(c), Some(b)) => {
                        cond = c;
                        body = b;
                    }
                    _ => {
                        eprintln!("minima: compile: elseif expects a condition and a body");
                        break;
                    }
                }
                continue;
            }

            if marker.is_lit_string("else") {
                match it.next() {
                    Some(else_body) => self.compile_branch_body(dst, else_body, wants_result),
                    None => eprintln!("minima: compile: else expects a body"),
                }
                break;
            }

            eprintln!("minima: compile: unexpected tokens after if branch");
            break;
        }

        let end = self.b.here();
        for jump in end_jumps {
            let rel = self.b.rel_to(end, jump);
            self.b.patch_imm(jump, rel);
        }
        dst
    }

    /// A branch body is normally a literal block and is inlined between
    /// SCOPE_PUSH/SCOPE_POP; a non-literal body falls back to CALL_BLOCK.
    fn compile_branch_body(&mut self, dst: u8, body: &Expr, wants_result: bool) {
        if let ExprKind::Block { script } = &body.kind {
            self.emit(Ins::new(Op::ScopePush));
            self.inline_scope_depth += 1;
            if wants_result {
                self.compile_script_inline_to_reg(script, dst);
            } else {
                self.compile_script_inline(script);
            }
            self.emit(Ins::new(Op::ScopePop));
            self.inline_scope_depth -= 1;
            return;
        }
        let block_reg = self.compile_expr(body);
        self.emit(Ins::ab(Op::CallBlock, dst, block_reg));
    }

    fn compile_while(&mut self, dst: u8, args: &[Expr]) -> u8 {
        let (Some(cond), Some(body)) = (args.first(), args.get(1)) else {
            eprintln!("minima: compile: while expects a condition and a body block");
            self.load_void(dst);
            return dst;
        };
        let ExprKind::Block { script } = &body.kind else {
            eprintln!("minima: compile: while body must be a literal block");
            self.load_void(dst);
            return dst;
        };

        let loop_start = self.b.here();
        let cond_reg = self.compile_expr(cond);
        let jf = self.emit(Ins::a(Op::Jf, cond_reg));

        // Inline the body so break/continue compile to jumps; a fresh scope
        // per iteration keeps body-local variables from leaking.
        let scope_base = self.inline_scope_depth;
        self.emit(Ins::new(Op::ScopePush));
        self.inline_scope_depth += 1;

        let entered = self.push_loop(loop_start, scope_base);

        let saved_base = self.reg_base;
        self.reg_base = self.next_reg;
        self.compile_script_inline(script);
        self.reg_base = saved_base;

        self.emit(Ins::new(Op::ScopePop));
        self.inline_scope_depth -= 1;

        let back = self.emit(Ins::new(Op::Jmp));
        let rel_back = self.b.rel_to(loop_start, back);
        self.b.patch_imm(back, rel_back);

        let loop_end = self.b.here();
        let rel_end = self.b.rel_to(loop_end, jf);
        self.b.patch_imm(jf, rel_end);

        if entered {
            self.pop_loop(loop_end);
        }
        dst
    }

    /// foreach: cursor-based iteration with ITER_NEXT. The iterator
    /// variable is defined in the per-iteration scope, not the enclosing
    /// one.
    fn compile_foreach(&mut self, dst: u8, args: &[Expr], wants_result: bool) -> u8 {
        let (Some(var_name), Some(container), Some(body)) =
            (args.first(), args.get(1), args.get(2))
        else {
            eprintln!("minima: compile: foreach expects a variable, a container and a body");
            if wants_result {
                self.load_void(dst);
            }
            return dst;
        };
        let ExprKind::StringLit(var_name) = &var_name.kind else {
            eprintln!("minima: compile: foreach variable must be a literal identifier");
            if wants_result {
                self.load_void(dst);
            }
            return dst;
        };
        let var_name = var_name.clone();
        let ExprKind::Block { script } = &body.kind else {
            eprintln!("minima: compile: foreach body must be a literal block");
            if wants_result {
                self.load_void(dst);
            }
            return dst;
        };

        // foreach used as an expression yields void.
        if wants_result {
            self.load_void(dst);
        }

        let iter_sym = self.b.add_symbol(&var_name);

        // The container position accepts a bare identifier (looked up as a
        // variable) as well as any expression.
        let container_reg = match &container.kind {
            ExprKind::StringLit(name) => {
                let name = name.clone();
                let sym = self.b.add_symbol(&name);
                let r = self.alloc_reg();
                self.emit(Ins::a_imm(Op::LoadVar, r, sym));
                r
            }
            _ => self.compile_expr(container),
        };

        let cursor_reg = self.alloc_reg();
        let k = self.b.add_const(Const::Int(-1));
        self.emit(Ins::a_imm(Op::Ldc, cursor_reg, k));

        let loop_start = self.b.here();
        let cond_reg = self.alloc_reg();
        let item_reg = self.alloc_reg();
        self.emit(Ins::abc_imm(
            Op::IterNext,
            cond_reg,
            container_reg,
            cursor_reg,
            item_reg as i32,
        ));

        let jf = self.emit(Ins::a(Op::Jf, cond_reg));

        let scope_base = self.inline_scope_depth;
        self.emit(Ins::new(Op::ScopePush));
        self.inline_scope_depth += 1;

        let entered = self.push_loop(loop_start, scope_base);

        self.emit(Ins::a_imm(Op::DefineVar, item_reg, iter_sym));

        let saved_base = self.reg_base;
        self.reg_base = self.next_reg;
        self.compile_script_inline(script);
        self.reg_base = saved_base;

        self.emit(Ins::new(Op::ScopePop));
        self.inline_scope_depth -= 1;

        let back = self.emit(Ins::new(Op::Jmp));
        let rel_back = self.b.rel_to(loop_start, back);
        self.b.patch_imm(back, rel_back);

        let loop_end = self.b.here();
        let rel_end = self.b.rel_to(loop_end, jf);
        self.b.patch_imm(jf, rel_end);

        if entered {
            self.pop_loop(loop_end);
        }
        dst
    }

    fn push_loop(&mut self, start_ip: usize, scope_base_depth: i32) -> bool {
        if self.loops.len() >= LOOP_MAX {
            eprintln!("minima: compile: loop nesting too deep");
            return false;
        }
        self.loops.push(LoopCtx { start_ip, break_jumps: Vec::new(), scope_base_depth });
        true
    }

    fn pop_loop(&mut self, loop_end: usize) {
        if let Some(ctx) = self.loops.pop() {
            for jump in ctx.break_jumps {
                let rel = self.b.rel_to(loop_end, jump);
                self.b.patch_imm(jump, rel);
            }
        }
    }

    //----------------------------------------------------------
    // Scripts
    //----------------------------------------------------------

    fn compile_script_inline(&mut self, script: &Script) {
        for cmd in &script.commands {
            self.next_reg = self.reg_base;
            self.compile_command_stmt(cmd, false);
        }
    }

    /// Inline a script and leave the last command's value in `dst`.
    fn compile_script_inline_to_reg(&mut self, script: &Script, dst: u8) {
        if script.commands.is_empty() {
            self.load_void(dst);
            return;
        }
        let count = script.commands.len();
        let mut last = dst;
        for (i, cmd) in script.commands.iter().enumerate() {
            self.next_reg = self.reg_base;
            last = self.compile_command_stmt(cmd, i + 1 == count);
        }
        if last != dst {
            self.emit(Ins::ab(Op::Mov, dst, last));
        }
    }

    fn compile_command_stmt(&mut self, cmd: &Command, wants_result: bool) -> u8 {
        self.compile_command_expr(&cmd.head, &cmd.args, wants_result)
    }
}

fn map_binary(op: BinaryOp) -> Op {
    match op {
        BinaryOp::Add => Op::Add,
        BinaryOp::Sub => Op::Sub,
        BinaryOp::Mul => Op::Mul,
        BinaryOp::Div => Op::Div,
        BinaryOp::Mod => Op::Mod,
        BinaryOp::Eq => Op::Eq,
        BinaryOp::Neq => Op::Neq,
        BinaryOp::Lt => Op::Lt,
        BinaryOp::LtEq => Op::LtEq,
        BinaryOp::Gt => Op::Gt,
        BinaryOp::GtEq => Op::GtEq,
        BinaryOp::And => Op::And,
        BinaryOp::Or => Op::Or,
    }
}

fn compile_subchunk(vm: &mut Vm, script: &Script, name: &str, file: SmolStr) -> Rc<Chunk> {
    let mut g = CodeGen::new(vm, name, &file);
    for cmd in &script.commands {
        g.next_reg = 0;
        g.compile_command_stmt(cmd, false);
    }
    g.emit(Ins::new(Op::Halt));
    Rc::new(g.b.finish())
}

/// Compile a script into a chunk with debug name/file attached. The caller
/// links the result against the VM's command registry.
pub fn compile_script(vm: &mut Vm, script: &Script, dbg_name: &str, dbg_file: &str) -> Rc<Chunk> {
    compile_subchunk(vm, script, dbg_name, SmolStr::new(dbg_file))
}
