// Opcode dispatch.
// A tight match over the instruction tag. Every instruction updates the
// debug cursor so diagnostics carry file:line:col. Recoverable errors
// report and substitute void; only Fatal terminates.

use std::rc::Rc;

use crate::heap::Block;
use crate::value::chunk::{Chunk, Const};
use crate::value::value::{Value, is_truthy, value_len};
use crate::vm::error::ErrorKind;
use crate::vm::opcode::Op;
use crate::vm::{ARG_FRAME_MAX, ARG_STACK_COUNT, Vm};

impl Vm {
    #[inline]
    fn reg_set(&mut self, r: u8, v: Value) {
        self.rt.heap.assign(&mut self.regs[r as usize], v);
    }

    /// Materialize a pool constant. String constants allocate a fresh heap
    /// string, so the returned value is owned by the caller.
    fn const_value(&mut self, chunk: &Chunk, index: i32) -> Value {
        match chunk.consts.get(index as usize) {
            Some(Const::Void) | None => Value::Void,
            Some(Const::Int(v)) => Value::Int(*v),
            Some(Const::Float(v)) => Value::Float(*v),
            Some(Const::Bool(v)) => Value::Bool(*v),
            Some(Const::Str(s)) => {
                let s = s.clone();
                self.rt.heap.alloc_str(&s)
            }
        }
    }

    fn arg_push(&mut self, v: Value) {
        if self.arg_top >= ARG_STACK_COUNT {
            self.report(ErrorKind::Arity, "arg stack overflow");
            return;
        }
        self.rt.heap.assign(&mut self.arg_stack[self.arg_top], v);
        self.arg_top += 1;
    }

    /// Pop `argc` values off the argument stack, transferring their counts
    /// to the returned vector.
    fn take_args(&mut self, argc: usize) -> Option<Vec<Value>> {
        if argc > self.arg_top {
            self.report(ErrorKind::Arity, "arg stack underflow");
            return None;
        }
        let base = self.arg_top - argc;
        let mut args = Vec::with_capacity(argc);
        for i in 0..argc {
            args.push(std::mem::replace(&mut self.arg_stack[base + i], Value::Void));
        }
        self.arg_top = base;
        Some(args)
    }

    fn release_args(&mut self, args: Vec<Value>) {
        for v in args {
            self.rt.heap.release(v);
        }
    }

    fn binary_numeric(&mut self, op: Op, a: Value, b: Value) -> Value {
        let (Some(da), Some(db)) = (a.as_number(), b.as_number()) else {
            self.report(ErrorKind::Type, "numeric op on non-number");
            return Value::Void;
        };
        let is_float =
            matches!(a, Value::Float(_)) || matches!(b, Value::Float(_));

        match op {
            Op::Div => {
                if db == 0.0 {
                    self.report(ErrorKind::DivideByZero, "division by zero");
                    return Value::Void;
                }
                // Division always yields float.
                Value::Float(da / db)
            }
            Op::Mod => {
                // Modulo is int-only; operands truncate.
                let (ia, ib) = (da as i64, db as i64);
                if ib == 0 {
                    self.report(ErrorKind::DivideByZero, "modulo by zero");
                    return Value::Void;
                }
                Value::Int(ia.wrapping_rem(ib))
            }
            _ if is_float => {
                let r = match op {
                    Op::Add => da + db,
                    Op::Sub => da - db,
                    _ => da * db,
                };
                Value::Float(r)
            }
            _ => {
                let (ia, ib) = match (a, b) {
                    (Value::Int(x), Value::Int(y)) => (x, y),
                    _ => (da as i64, db as i64),
                };
                let r = match op {
                    Op::Add => ia.wrapping_add(ib),
                    Op::Sub => ia.wrapping_sub(ib),
                    _ => ia.wrapping_mul(ib),
                };
                Value::Int(r)
            }
        }
    }

    fn binary_compare(&mut self, op: Op, a: Value, b: Value) -> Value {
        // void == void is true; void against any other kind is false for
        // ==, true for !=, and void for ordering.
        if matches!(a, Value::Void) || matches!(b, Value::Void) {
            let both = matches!(a, Value::Void) && matches!(b, Value::Void);
            return match op {
                Op::Eq => Value::Bool(both),
                Op::Neq => Value::Bool(!both),
                _ => Value::Void,
            };
        }

        if let (Some(da), Some(db)) = (a.as_number(), b.as_number()) {
            return Value::Bool(match op {
                Op::Eq => da == db,
                Op::Neq => da != db,
                Op::Lt => da < db,
                Op::LtEq => da <= db,
                Op::Gt => da > db,
                Op::GtEq => da >= db,
                _ => return Value::Void,
            });
        }

        if let (Value::Bool(x), Value::Bool(y)) = (a, b) {
            return match op {
                Op::Eq => Value::Bool(x == y),
                Op::Neq => Value::Bool(x != y),
                _ => Value::Void,
            };
        }

        if let (Value::Str(x), Value::Str(y)) = (a, b) {
            let eq = self.rt.heap.str_value(x) == self.rt.heap.str_value(y);
            return match op {
                Op::Eq => Value::Bool(eq),
                Op::Neq => Value::Bool(!eq),
                _ => Value::Void,
            };
        }

        if let (Value::Type(x), Value::Type(y)) = (a, b) {
            return match op {
                Op::Eq => Value::Bool(x == y),
                Op::Neq => Value::Bool(x != y),
                _ => Value::Void,
            };
        }

        Value::Void
    }

    /// Evaluate `base[key]`. Always returns an owned value: borrowed
    /// container elements are retained before they escape.
    fn index_value(&mut self, base: Value, key: Value) -> Value {
        match (base, key) {
            (Value::List(id), Value::Int(index)) => {
                let len = self.rt.heap.list(id).map_or(0, |l| l.len());
                if index < 0 || index as usize >= len {
                    self.report(
                        ErrorKind::Index,
                        &format!("list index {index} out of range (len {len})"),
                    );
                    return Value::Void;
                }
                let v = self.rt.heap.list(id).map_or(Value::Void, |l| l[index as usize]);
                self.rt.heap.retain(v);
                v
            }
            (Value::Pair(id), Value::Int(index)) => {
                if index != 0 && index != 1 {
                    self.report(ErrorKind::Index, &format!("pair index {index} out of range"));
                    return Value::Void;
                }
                let v = self.rt.heap.pair(id).map_or(Value::Void, |p| p[index as usize]);
                self.rt.heap.retain(v);
                v
            }
            (Value::KvRef(dict, entry), Value::Int(index)) => {
                match self.rt.heap.kvref_index(dict, entry, index) {
                    Some(v) => {
                        self.rt.heap.retain(v);
                        v
                    }
                    None => {
                        self.report(ErrorKind::Index, &format!("kvref index {index} out of range"));
                        Value::Void
                    }
                }
            }
            (Value::Dict(id), key) => {
                // Missing keys read as void; dicts are maps, not ranges.
                let v = self.rt.heap.dict_get(id, key).unwrap_or(Value::Void);
                self.rt.heap.retain(v);
                v
            }
            (Value::Str(id), Value::Int(index)) => {
                let Some(s) = self.rt.heap.str_value(id) else {
                    return Value::Void;
                };
                let len = s.len();
                if index < 0 || index as usize >= len {
                    self.report(
                        ErrorKind::Index,
                        &format!("string index {index} out of range (len {len})"),
                    );
                    return Value::Void;
                }
                let byte = s.as_bytes()[index as usize];
                let one = (byte as char).to_string();
                // Owned: the caller stores and releases.
                self.rt.heap.alloc_str(&one)
            }
            _ => {
                self.report(ErrorKind::Type, "INDEX unsupported types");
                Value::Void
            }
        }
    }

    /// Execute a chunk to completion. Returns an owned value: the RETURN
    /// operand, or the value of the last command when the chunk falls off
    /// the end or HALTs.
    pub fn execute(&mut self, chunk: &Rc<Chunk>) -> Value {
        self.arg_clear();
        self.dbg_chunk = Some(chunk.clone());

        // "last" tracks the most recent call result, retained.
        let mut last = Value::Void;
        let mut pc: usize = 0;

        while pc < chunk.code.len() {
            let ins = chunk.code[pc];
            self.dbg_ip = pc;
            pc += 1;

            match ins.op {
                Op::Noop => {}

                Op::Ldc => {
                    let v = self.const_value(chunk, ins.imm);
                    self.reg_set(ins.a, v);
                    self.rt.heap.release(v);
                }

                Op::Ldb => {
                    let Some(sub) = chunk.subchunks.get(ins.imm as usize) else {
                        self.report(ErrorKind::Index, "LDB invalid subchunk index");
                        self.reg_set(ins.a, Value::Void);
                        continue;
                    };
                    let block = Block {
                        chunk: sub.clone(),
                        env: Some(self.rt.current),
                        id: ins.imm as u32,
                    };
                    let v = self.rt.heap.alloc_block(block);
                    self.reg_set(ins.a, v);
                    self.rt.heap.release(v);
                }

                Op::Mov => {
                    let v = self.regs[ins.b as usize];
                    self.reg_set(ins.a, v);
                }

                Op::ListNew => {
                    let v = self.rt.heap.alloc_list(Vec::new());
                    self.reg_set(ins.a, v);
                    self.rt.heap.release(v);
                }

                Op::ListPush => {
                    let base = self.regs[ins.a as usize];
                    let item = self.regs[ins.b as usize];
                    match base {
                        Value::List(id) => {
                            self.rt.heap.list_push(id, item);
                        }
                        _ => self.report(ErrorKind::Type, "LIST_PUSH base is not a list"),
                    }
                }

                Op::DictNew => {
                    let v = self.rt.heap.alloc_dict();
                    self.reg_set(ins.a, v);
                    self.rt.heap.release(v);
                }

                Op::IterNext => {
                    let dst_item = (ins.imm & 0xFF) as u8;
                    let container = self.regs[ins.b as usize];
                    let cursor = match self.regs[ins.c as usize] {
                        Value::Int(v) => v,
                        _ => -1,
                    };

                    match container {
                        Value::List(id) => {
                            let next = cursor + 1;
                            let len = self.rt.heap.list(id).map_or(0, |l| l.len());
                            if next >= 0 && (next as usize) < len {
                                let item = self.rt.heap.list(id).map_or(Value::Void, |l| l[next as usize]);
                                self.reg_set(ins.c, Value::Int(next));
                                self.reg_set(dst_item, item);
                                self.reg_set(ins.a, Value::Bool(true));
                            } else {
                                self.reg_set(ins.a, Value::Bool(false));
                            }
                        }
                        Value::Dict(id) => {
                            let start = if cursor < 0 { 0 } else { cursor as usize + 1 };
                            let next = self.rt.heap.dict(id).and_then(|d| d.next_live(start));
                            match next {
                                Some(entry) => {
                                    self.reg_set(ins.c, Value::Int(entry as i64));
                                    self.reg_set(dst_item, Value::KvRef(id, entry as u32));
                                    self.reg_set(ins.a, Value::Bool(true));
                                }
                                None => self.reg_set(ins.a, Value::Bool(false)),
                            }
                        }
                        _ => {
                            self.report(ErrorKind::Type, "ITER_NEXT unsupported container type");
                            self.reg_set(ins.a, Value::Bool(false));
                        }
                    }
                }

                Op::Index => {
                    let base = self.regs[ins.b as usize];
                    let key = self.regs[ins.c as usize];
                    let v = self.index_value(base, key);
                    self.reg_set(ins.a, v);
                    self.rt.heap.release(v);
                }

                Op::StoreIndex => {
                    let base = self.regs[ins.a as usize];
                    let key = self.regs[ins.b as usize];
                    let value = self.regs[ins.c as usize];
                    match (base, key) {
                        (Value::List(id), Value::Int(index)) => {
                            let len = self.rt.heap.list(id).map_or(0, |l| l.len());
                            if index < 0 || index as usize >= len {
                                self.report(
                                    ErrorKind::Index,
                                    &format!("list index {index} out of range (len {len})"),
                                );
                                continue;
                            }
                            self.rt.heap.retain(value);
                            let old = {
                                let Some(items) = self.rt.heap.list_mut(id) else { continue };
                                std::mem::replace(&mut items[index as usize], value)
                            };
                            self.rt.heap.release(old);
                        }
                        (Value::Pair(id), Value::Int(index)) => {
                            if index != 0 && index != 1 {
                                self.report(
                                    ErrorKind::Index,
                                    &format!("pair index {index} out of range"),
                                );
                                continue;
                            }
                            self.rt.heap.retain(value);
                            let old = {
                                let Some(p) = self.rt.heap.pair_mut(id) else { continue };
                                std::mem::replace(&mut p[index as usize], value)
                            };
                            self.rt.heap.release(old);
                        }
                        (Value::Dict(id), key) => {
                            self.rt.heap.dict_set(id, key, value);
                        }
                        _ => self.report(ErrorKind::Type, "STORE_INDEX unsupported types"),
                    }
                }

                Op::Len => {
                    let v = self.regs[ins.b as usize];
                    match value_len(&self.rt.heap, v) {
                        Some(len) => self.reg_set(ins.a, Value::Int(len)),
                        None => {
                            self.report(ErrorKind::Type, "LEN unsupported type");
                            self.reg_set(ins.a, Value::Void);
                        }
                    }
                }

                Op::Neg => {
                    let v = match self.regs[ins.b as usize] {
                        Value::Int(v) => Value::Int(v.wrapping_neg()),
                        Value::Float(v) => Value::Float(-v),
                        _ => Value::Void,
                    };
                    self.reg_set(ins.a, v);
                }

                Op::Not => {
                    let v = match self.regs[ins.b as usize] {
                        Value::Bool(v) => Value::Bool(!v),
                        _ => Value::Void,
                    };
                    self.reg_set(ins.a, v);
                }

                Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => {
                    let a = self.regs[ins.b as usize];
                    let b = self.regs[ins.c as usize];
                    let v = self.binary_numeric(ins.op, a, b);
                    self.reg_set(ins.a, v);
                }

                Op::Eq | Op::Neq | Op::Lt | Op::LtEq | Op::Gt | Op::GtEq => {
                    let a = self.regs[ins.b as usize];
                    let b = self.regs[ins.c as usize];
                    let v = self.binary_compare(ins.op, a, b);
                    self.reg_set(ins.a, v);
                }

                Op::And | Op::Or => {
                    let a = self.regs[ins.b as usize];
                    let b = self.regs[ins.c as usize];
                    let v = match (a, b) {
                        (Value::Bool(x), Value::Bool(y)) => {
                            Value::Bool(if ins.op == Op::And { x && y } else { x || y })
                        }
                        _ => Value::Void,
                    };
                    self.reg_set(ins.a, v);
                }

                Op::LoadVar => {
                    let v = match chunk.sym_id(&mut self.rt, ins.imm as usize) {
                        Some(sym) => match self.rt.var_get(sym) {
                            Some(v) => v,
                            None => {
                                let name = &chunk.symbols[ins.imm as usize];
                                self.report(
                                    ErrorKind::Name,
                                    &format!("undefined variable: {name}"),
                                );
                                Value::Void
                            }
                        },
                        None => Value::Void,
                    };
                    self.reg_set(ins.a, v);
                }

                Op::LoadMember => {
                    let base = self.regs[ins.b as usize];
                    let v = match base {
                        Value::Block(id) => {
                            match self.rt.heap.block(id).and_then(|b| b.env) {
                                Some(env) => match chunk.sym_id(&mut self.rt, ins.imm as usize) {
                                    Some(sym) => match self.rt.var_get_from(env, sym) {
                                        Some(v) => v,
                                        None => {
                                            let name = &chunk.symbols[ins.imm as usize];
                                            self.report(
                                                ErrorKind::Name,
                                                &format!("unknown member: {name}"),
                                            );
                                            Value::Void
                                        }
                                    },
                                    None => Value::Void,
                                },
                                None => {
                                    self.report(
                                        ErrorKind::Type,
                                        "member access: base is not a chunk/module",
                                    );
                                    Value::Void
                                }
                            }
                        }
                        _ => {
                            self.report(ErrorKind::Type, "member access: base is not a chunk/module");
                            Value::Void
                        }
                    };
                    self.reg_set(ins.a, v);
                }

                Op::StoreMember => {
                    let base = self.regs[ins.b as usize];
                    match base {
                        Value::Block(id) => match self.rt.heap.block(id).and_then(|b| b.env) {
                            Some(env) => {
                                if let Some(sym) = chunk.sym_id(&mut self.rt, ins.imm as usize) {
                                    let v = self.regs[ins.a as usize];
                                    self.rt.var_set_from(env, sym, v);
                                }
                            }
                            None => self.report(
                                ErrorKind::Type,
                                "member store: base is not a chunk/module",
                            ),
                        },
                        _ => self.report(ErrorKind::Type, "member store: base is not a chunk/module"),
                    }
                }

                Op::StoreVar => {
                    if let Some(sym) = chunk.sym_id(&mut self.rt, ins.imm as usize) {
                        let v = self.regs[ins.a as usize];
                        self.rt.var_set(sym, v);
                    }
                }

                Op::DefineVar => {
                    if let Some(sym) = chunk.sym_id(&mut self.rt, ins.imm as usize) {
                        let v = self.regs[ins.a as usize];
                        self.rt.var_define(sym, v);
                    }
                }

                Op::LoadIndirectVar => {
                    let name_v = self.regs[ins.b as usize];
                    let v = match name_v {
                        Value::Str(id) => {
                            let name = self.rt.heap.str_value(id).unwrap_or("").to_string();
                            match self.rt.var_get_name(&name) {
                                Some(v) => v,
                                None => {
                                    self.report(
                                        ErrorKind::Name,
                                        &format!("undefined variable: {name}"),
                                    );
                                    Value::Void
                                }
                            }
                        }
                        _ => {
                            self.report(ErrorKind::Type, "indirect variable name must be string");
                            Value::Void
                        }
                    };
                    self.reg_set(ins.a, v);
                }

                Op::ArgClear => self.arg_clear(),

                Op::ArgPush => {
                    let v = self.regs[ins.a as usize];
                    self.arg_push(v);
                }

                Op::ArgPushConst => {
                    let v = self.const_value(chunk, ins.imm);
                    self.arg_push(v);
                    self.rt.heap.release(v);
                }

                Op::ArgPushVarSym => {
                    let v = match chunk.sym_id(&mut self.rt, ins.imm as usize) {
                        Some(sym) => match self.rt.var_get(sym) {
                            Some(v) => v,
                            None => {
                                let name = &chunk.symbols[ins.imm as usize];
                                self.report(
                                    ErrorKind::Name,
                                    &format!("undefined variable: {name}"),
                                );
                                Value::Void
                            }
                        },
                        None => Value::Void,
                    };
                    self.arg_push(v);
                }

                Op::ArgPushSym => {
                    let v = match chunk.symbols.get(ins.imm as usize) {
                        Some(name) => {
                            let name = name.clone();
                            self.rt.heap.alloc_str(&name)
                        }
                        None => Value::Void,
                    };
                    self.arg_push(v);
                    self.rt.heap.release(v);
                }

                Op::ArgSave => {
                    if self.arg_frames.len() >= ARG_FRAME_MAX {
                        self.report(ErrorKind::Arity, "arg frame overflow");
                        continue;
                    }
                    let mut frame = Vec::with_capacity(self.arg_top);
                    for i in 0..self.arg_top {
                        frame.push(std::mem::replace(&mut self.arg_stack[i], Value::Void));
                    }
                    self.arg_top = 0;
                    self.arg_frames.push(frame);
                }

                Op::ArgRestore => {
                    let Some(frame) = self.arg_frames.pop() else {
                        self.report(ErrorKind::Arity, "arg frame underflow");
                        continue;
                    };
                    self.arg_clear();
                    let count = frame.len().min(ARG_STACK_COUNT);
                    for (i, v) in frame.into_iter().enumerate() {
                        if i < count {
                            self.arg_stack[i] = v;
                        } else {
                            self.rt.heap.release(v);
                        }
                    }
                    self.arg_top = count;
                }

                Op::CallCmd => {
                    let argc = ins.b as usize;
                    let Some(args) = self.take_args(argc) else {
                        self.reg_set(ins.a, Value::Void);
                        continue;
                    };

                    let name = chunk.cmd_names.get(ins.imm as usize).cloned().unwrap_or_default();
                    let is_qualified = name.contains("::");

                    // A scoped variable holding a Cmd shadows the registry
                    // (unqualified names only).
                    let mut target = None;
                    if !is_qualified {
                        if let Some(scoped) = self.rt.var_get_name(&name) {
                            if matches!(scoped, Value::Cmd(_)) {
                                target = Some(scoped);
                            }
                        }
                    }

                    if target.is_none() {
                        target = self.cached_cmd_target(chunk, ins.imm as usize, &name, is_qualified);
                    }

                    match target {
                        Some(cmd) => {
                            let ret = self.exec_cmd_value(&name, cmd, &args);
                            self.reg_set(ins.a, ret);
                            self.rt.heap.release(ret);
                            let l = self.regs[ins.a as usize];
                            self.rt.heap.assign(&mut last, l);
                        }
                        None => {
                            self.report(
                                ErrorKind::Name,
                                &format!("CALL_CMD unresolved command: {name}"),
                            );
                            self.reg_set(ins.a, Value::Void);
                        }
                    }
                    self.release_args(args);
                }

                Op::CallCmdDyn => {
                    let argc = ins.c as usize;
                    let head = self.regs[ins.b as usize];
                    let Some(args) = self.take_args(argc) else {
                        self.reg_set(ins.a, Value::Void);
                        continue;
                    };

                    match head {
                        Value::Cmd(_) => {
                            let name = self.cur_cmd_name_of(head);
                            let ret = self.exec_cmd_value(&name, head, &args);
                            self.reg_set(ins.a, ret);
                            self.rt.heap.release(ret);
                            let l = self.regs[ins.a as usize];
                            self.rt.heap.assign(&mut last, l);
                        }
                        Value::Block(_) => {
                            if argc != 0 {
                                self.report(ErrorKind::Arity, "cannot call block with args");
                                self.reg_set(ins.a, Value::Void);
                            } else {
                                let ret = self.exec_block_value(head);
                                self.reg_set(ins.a, ret);
                                self.rt.heap.release(ret);
                                let l = self.regs[ins.a as usize];
                                self.rt.heap.assign(&mut last, l);
                            }
                        }
                        Value::Str(id) => {
                            let name = self.rt.heap.str_value(id).unwrap_or("").to_string();
                            let ret = self.call_command(&name, &args);
                            self.reg_set(ins.a, ret);
                            self.rt.heap.release(ret);
                            let l = self.regs[ins.a as usize];
                            self.rt.heap.assign(&mut last, l);
                        }
                        _ => {
                            self.report(
                                ErrorKind::Type,
                                "dynamic command head must be string/cmd/block",
                            );
                            self.reg_set(ins.a, Value::Void);
                        }
                    }
                    self.release_args(args);
                }

                Op::CallBlock => {
                    let block = self.regs[ins.b as usize];
                    let ret = self.exec_block_value(block);
                    self.reg_set(ins.a, ret);
                    self.rt.heap.release(ret);
                    let l = self.regs[ins.a as usize];
                    self.rt.heap.assign(&mut last, l);
                }

                Op::ScopePush => self.rt.scope_push(),
                Op::ScopePop => self.rt.scope_pop(),

                Op::Jmp => {
                    let npc = pc as i64 + ins.imm as i64;
                    if npc < 0 || npc > chunk.code.len() as i64 {
                        self.report(ErrorKind::Index, "JMP out of range");
                        return last;
                    }
                    pc = npc as usize;
                }

                Op::Jt | Op::Jf => {
                    let cond = is_truthy(&self.rt.heap, self.regs[ins.a as usize]);
                    let take = if ins.op == Op::Jt { cond } else { !cond };
                    if take {
                        let npc = pc as i64 + ins.imm as i64;
                        if npc < 0 || npc > chunk.code.len() as i64 {
                            self.report(ErrorKind::Index, "JT/JF out of range");
                            return last;
                        }
                        pc = npc as usize;
                    }
                }

                Op::Return => {
                    let ret = self.regs[ins.a as usize];
                    self.rt.heap.retain(ret);
                    self.rt.heap.release(last);
                    return ret;
                }

                Op::Halt => {
                    return last;
                }
            }
        }

        last
    }

    /// Resolve a CALL_CMD target through the chunk's command slot cache.
    /// Qualified names resolve lazily and re-resolve when the base module
    /// binding changed since the cache was filled.
    fn cached_cmd_target(
        &mut self,
        chunk: &Rc<Chunk>,
        slot_index: usize,
        name: &str,
        is_qualified: bool,
    ) -> Option<Value> {
        let cached = {
            let slots = chunk.cmd_slots.borrow();
            slots.get(slot_index).copied()
        }?;

        if let Some(target) = cached.target {
            if !is_qualified {
                return Some(target);
            }
            // Re-read the first segment; a rebound module forces
            // re-resolution on this call.
            let first = name.split("::").next().unwrap_or("");
            let base_now = self.rt.var_get_name(first);
            if let (Some(base_now), Some(base_cached)) = (base_now, cached.qualified_base) {
                if crate::value::value::value_eq(&self.rt.heap, base_now, base_cached) {
                    return Some(target);
                }
            }
        }

        if is_qualified {
            if let Some((cmd, base)) = self.resolve_qualified(name) {
                let mut slots = chunk.cmd_slots.borrow_mut();
                if let Some(slot) = slots.get_mut(slot_index) {
                    slot.target = Some(cmd);
                    slot.qualified_base = Some(base);
                }
                return Some(cmd);
            }
            return None;
        }

        cached.target
    }

    fn cur_cmd_name_of(&self, cmd: Value) -> String {
        match cmd {
            Value::Cmd(id) => self
                .rt
                .heap
                .cmd(id)
                .map(|c| c.name.to_string())
                .unwrap_or_default(),
            _ => String::new(),
        }
    }
}
