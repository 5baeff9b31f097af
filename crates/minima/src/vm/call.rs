// Call ABI.
// Invariants at every call site:
// - the callee's return slot is register 0;
// - registers 1..=7 are saved by the caller (ref-counted) and restored on
//   return, so callees cannot corrupt outer state;
// - registers 8+ are scratch and clobbered;
// - the argument stack is cleared on return;
// - a user command call pushes a scope whose parent is the body block's
//   captured environment (or the caller scope if none);
// - a block call additionally resets the current argument context so
//   argc() inside the block does not observe caller arguments.

use smol_str::SmolStr;

use crate::compiler::ast::{FuncTypeSig, TypeKind};
use crate::heap::CmdKind;
use crate::value::value::{Value, ValueKind};
use crate::vm::debug_info::{CALL_STACK_MAX, CallFrame, CallFrameKind};
use crate::vm::error::ErrorKind;
use crate::vm::Vm;

pub(crate) fn type_matches(expected: TypeKind, v: Value) -> bool {
    match expected {
        TypeKind::Any => true,
        TypeKind::Void => v.kind() == ValueKind::Void,
        TypeKind::Bool => v.kind() == ValueKind::Bool,
        TypeKind::Int => v.kind() == ValueKind::Int,
        TypeKind::Float => v.kind() == ValueKind::Float,
        TypeKind::String => v.kind() == ValueKind::String,
        TypeKind::List => v.kind() == ValueKind::List,
        TypeKind::Dict => v.kind() == ValueKind::Dict,
        TypeKind::Block => v.kind() == ValueKind::Block,
        TypeKind::Func => v.kind() == ValueKind::Cmd,
    }
}

impl Vm {
    /// Enforce a declared signature: argument count, fixed parameter kinds,
    /// and the homogeneous variadic tail (tail `any` disables tail checks).
    pub(crate) fn check_sig(&self, sig: &FuncTypeSig, cmd_name: &str, args: &[Value]) -> bool {
        let argc = args.len();
        if !sig.is_variadic {
            if argc != sig.param_types.len() {
                self.report(
                    ErrorKind::Arity,
                    &format!("{cmd_name}: expected {} args, got {argc}", sig.param_types.len()),
                );
                return false;
            }
        } else if argc < sig.param_types.len() {
            self.report(
                ErrorKind::Arity,
                &format!(
                    "{cmd_name}: expected at least {} args, got {argc}",
                    sig.param_types.len()
                ),
            );
            return false;
        }

        for (i, expected) in sig.param_types.iter().enumerate() {
            if i >= argc {
                break;
            }
            if !type_matches(*expected, args[i]) {
                self.report(
                    ErrorKind::Type,
                    &format!(
                        "{cmd_name}: arg {i} expected {}, got {}",
                        expected.name(),
                        args[i].kind().name()
                    ),
                );
                return false;
            }
        }

        if sig.is_variadic && sig.variadic_type != TypeKind::Any {
            for (i, arg) in args.iter().enumerate().skip(sig.param_types.len()) {
                if !type_matches(sig.variadic_type, *arg) {
                    self.report(
                        ErrorKind::Type,
                        &format!(
                            "{cmd_name}: arg {i} expected {}, got {}",
                            sig.variadic_type.name(),
                            arg.kind().name()
                        ),
                    );
                    return false;
                }
            }
        }

        true
    }

    fn call_stack_push(&mut self, kind: CallFrameKind, name: SmolStr) {
        // Deeper recursion drops frames instead of failing; the trace just
        // becomes less complete.
        if self.call_stack.len() >= CALL_STACK_MAX {
            return;
        }
        self.call_stack.push(CallFrame {
            kind,
            name,
            caller_chunk: self.dbg_chunk.clone(),
            caller_ip: self.dbg_ip,
        });
    }

    fn call_stack_pop(&mut self) {
        self.call_stack.pop();
    }

    fn save_preserved_regs(&mut self) -> [Value; 7] {
        let mut saved = [Value::Void; 7];
        for i in 0..7 {
            saved[i] = self.regs[1 + i];
            self.rt.heap.retain(saved[i]);
        }
        saved
    }

    fn restore_preserved_regs(&mut self, saved: [Value; 7]) {
        for i in 0..7 {
            self.rt.heap.assign(&mut self.regs[1 + i], saved[i]);
            self.rt.heap.release(saved[i]);
        }
    }

    /// Invoke a command value with already-evaluated arguments. Returns an
    /// owned value (the caller releases it after storing).
    pub(crate) fn exec_cmd_value(&mut self, cmd_name: &str, cmd_value: Value, args: &[Value]) -> Value {
        let Value::Cmd(cmd_id) = cmd_value else {
            return Value::Void;
        };
        let Some(cmd) = self.rt.heap.cmd(cmd_id) else {
            return Value::Void;
        };

        let sig = cmd.sig.clone();
        match &cmd.kind {
            CmdKind::Native { func } => {
                let func = *func;
                if let Some(sig) = &sig {
                    if !self.check_sig(sig, cmd_name, args) {
                        return Value::Void;
                    }
                }
                // The caller-preserved window and the argument stack hold
                // across native calls too.
                let saved_regs = self.save_preserved_regs();
                let ret = func(self, cmd_name, args);
                self.restore_preserved_regs(saved_regs);
                self.arg_clear();
                ret
            }
            CmdKind::User { params, body } => {
                let params = params.clone();
                let body = *body;

                let Value::Block(block_id) = body else {
                    self.report(ErrorKind::Type, "invalid cmd body");
                    return Value::Void;
                };
                let Some(block) = self.rt.heap.block(block_id) else {
                    self.report(ErrorKind::Type, "invalid cmd body");
                    return Value::Void;
                };
                let chunk = block.chunk.clone();
                let env = block.env;

                match &sig {
                    Some(sig) => {
                        if !self.check_sig(sig, cmd_name, args) {
                            return Value::Void;
                        }
                    }
                    None => {
                        if args.len() != params.len() {
                            self.report(
                                ErrorKind::Arity,
                                &format!(
                                    "{cmd_name}: expected {} args, got {}",
                                    params.len(),
                                    args.len()
                                ),
                            );
                            return Value::Void;
                        }
                    }
                }

                let caller_scope = self.rt.current;
                let parent = env.or(Some(caller_scope));

                // Preserve the argument context so argc()/arg() inside the
                // command observe this call, then the caller's view again.
                let saved_args = std::mem::replace(&mut self.cur_args, args.to_vec());
                let saved_cmd = std::mem::replace(&mut self.cur_cmd, Some(cmd_value));
                let saved_name =
                    std::mem::replace(&mut self.cur_cmd_name, SmolStr::new(cmd_name));

                let saved_regs = self.save_preserved_regs();
                let saved_dbg_chunk = self.dbg_chunk.clone();
                let saved_dbg_ip = self.dbg_ip;

                self.rt.scope_push_with_parent(parent);
                for (i, param) in params.iter().enumerate() {
                    let sym = self.rt.syms.intern(param);
                    self.rt.var_define(sym, args[i]);
                }

                self.call_stack_push(CallFrameKind::UserCmd, SmolStr::new(cmd_name));
                let ret = self.execute(&chunk);
                self.call_stack_pop();

                self.rt.scope_pop();
                self.rt.current = caller_scope;

                self.cur_args = saved_args;
                self.cur_cmd = saved_cmd;
                self.cur_cmd_name = saved_name;

                self.restore_preserved_regs(saved_regs);
                self.arg_clear();

                self.dbg_chunk = saved_dbg_chunk;
                self.dbg_ip = saved_dbg_ip;

                ret
            }
        }
    }

    /// Invoke a block value. Returns an owned value.
    pub(crate) fn exec_block_value(&mut self, block_value: Value) -> Value {
        let Value::Block(block_id) = block_value else {
            self.report(ErrorKind::Type, "call: expected block");
            return Value::Void;
        };
        let Some(block) = self.rt.heap.block(block_id) else {
            self.report(ErrorKind::Type, "call: expected block");
            return Value::Void;
        };
        let chunk = block.chunk.clone();
        let env = block.env;

        let caller_scope = self.rt.current;
        let parent = env.or(Some(caller_scope));

        // Blocks have their own (empty) argument context.
        let saved_args = std::mem::take(&mut self.cur_args);
        let saved_cmd = self.cur_cmd.take();
        let saved_name = std::mem::take(&mut self.cur_cmd_name);

        let saved_regs = self.save_preserved_regs();
        let saved_dbg_chunk = self.dbg_chunk.clone();
        let saved_dbg_ip = self.dbg_ip;

        self.call_stack_push(CallFrameKind::Block, SmolStr::default());
        self.rt.scope_push_with_parent(parent);

        let ret = self.execute(&chunk);

        self.rt.scope_pop();
        self.rt.current = caller_scope;

        self.restore_preserved_regs(saved_regs);
        self.arg_clear();

        self.cur_args = saved_args;
        self.cur_cmd = saved_cmd;
        self.cur_cmd_name = saved_name;

        self.dbg_chunk = saved_dbg_chunk;
        self.dbg_ip = saved_dbg_ip;

        self.call_stack_pop();

        ret
    }

    pub(crate) fn arg_clear(&mut self) {
        for i in 0..self.arg_top {
            let old = std::mem::replace(&mut self.arg_stack[i], Value::Void);
            self.rt.heap.release(old);
        }
        self.arg_top = 0;
    }

    /// Convenience wrapper for tooling: call a command by name (global
    /// registry or qualified a::b::c). The returned value is owned by the
    /// caller.
    pub fn call_command(&mut self, cmd_name: &str, args: &[Value]) -> Value {
        if cmd_name.contains("::") {
            match self.resolve_qualified(cmd_name) {
                Some((cmd, _)) => return self.exec_cmd_value(cmd_name, cmd, args),
                None => {
                    self.report(ErrorKind::Name, &format!("unknown command: {cmd_name}"));
                    return Value::Void;
                }
            }
        }
        if let Some(scoped) = self.rt.var_get_name(cmd_name) {
            if matches!(scoped, Value::Cmd(_)) {
                return self.exec_cmd_value(cmd_name, scoped, args);
            }
        }
        match self.find_command(cmd_name) {
            Some(cmd) => self.exec_cmd_value(cmd_name, cmd, args),
            None => {
                self.report(ErrorKind::Name, &format!("unknown command: {cmd_name}"));
                Value::Void
            }
        }
    }
}
