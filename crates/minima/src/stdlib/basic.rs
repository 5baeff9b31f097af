// Core builtin commands.
// Implements: set, print, list, dict, len, call, cmd, assert, error,
// warning, fatal, type, typeof, t, trace, argc, arg, arg_type, arg_name,
// include, import.
//
// Native functions return owned values; arguments arrive as a borrowed
// slice and must be retained before they escape into a return value.

use smol_str::SmolStr;

use crate::compiler::ast::{FuncTypeSig, TypeKind};
use crate::heap::{Cmd, CmdKind};
use crate::value::value::{Value, ValueKind, is_truthy};
use crate::vm::error::ErrorKind;
use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    use TypeKind::*;

    let exact = FuncTypeSig::exact;
    let variadic = FuncTypeSig::variadic;

    vm.register_native("arg", Some(exact(Any, vec![Int])), cmd_arg, "Argument of the current command call by index.");
    vm.register_native("arg_name", Some(exact(String, vec![Int])), cmd_arg_name, "Declared name of the current command's parameter.");
    vm.register_native("arg_type", Some(exact(Any, vec![Int])), cmd_arg_type, "Type of an argument of the current command call.");
    vm.register_native("argc", Some(exact(Int, vec![])), cmd_argc, "Argument count of the current command call.");
    vm.register_native("assert", Some(variadic(Void, vec![Any], Any)), cmd_assert, "Fail fatally when the condition is falsy.");
    vm.register_native("call", Some(exact(Any, vec![Block])), cmd_call, "Invoke a block value.");
    vm.register_native("cmd", Some(variadic(Void, vec![String], Any)), cmd_cmd, "Define a command from parameter names and a body block.");
    vm.register_native("dict", Some(exact(Dict, vec![Any])), cmd_dict, "Cast to dict.");
    vm.register_native("error", Some(variadic(Void, vec![], Any)), cmd_error, "Print an error diagnostic.");
    vm.register_native("fatal", Some(variadic(Void, vec![], Any)), cmd_fatal, "Print an error diagnostic and terminate.");
    vm.register_native("import", Some(exact(Any, vec![String])), cmd_include, "Alias of include.");
    vm.register_native("include", Some(exact(Any, vec![String])), cmd_include, "Load a module and return its namespace handle.");
    vm.register_native("len", Some(exact(Int, vec![Any])), cmd_len, "Length of a list, dict, pair, kvref or string.");
    vm.register_native("list", Some(exact(List, vec![List])), cmd_list, "Identity cast to list.");
    vm.register_native("print", Some(variadic(Void, vec![], Any)), cmd_print, "Print values separated by spaces.");
    vm.register_native("set", Some(exact(Any, vec![String, Any])), cmd_set, "Assign a variable by name.");
    vm.register_native("t", Some(exact(Any, vec![String])), cmd_type, "");
    vm.register_native("trace", Some(exact(Void, vec![])), cmd_trace, "Print the current call stack.");
    vm.register_native("type", Some(exact(Any, vec![String])), cmd_type, "Type value from a type name.");
    vm.register_native("typeof", Some(exact(String, vec![Any])), cmd_typeof, "Kind name of a value.");
    vm.register_native("warning", Some(variadic(Void, vec![], Any)), cmd_warning, "Print a warning diagnostic.");
}

fn join_args(vm: &Vm, args: &[Value]) -> String {
    let mut out = String::new();
    for (i, v) in args.iter().enumerate() {
        if i != 0 {
            out.push(' ');
        }
        out.push_str(&vm.value_to_string(*v));
    }
    out
}

fn cmd_print(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    let mut out = join_args(vm, args);
    out.push('\n');
    vm.out_str(&out);
    Value::Void
}

fn cmd_set(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    // sig: (string, any); dispatch checked the shape already.
    let Value::Str(id) = args[0] else { return Value::Void };
    let Some(name) = vm.rt.heap.str_value(id).map(str::to_string) else {
        return Value::Void;
    };
    let sym = vm.rt.syms.intern(&name);
    vm.rt.var_set(sym, args[1]);
    vm.rt.heap.retain(args[1]);
    args[1]
}

fn cmd_len(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    match crate::value::value::value_len(&vm.rt.heap, args[0]) {
        Some(len) => Value::Int(len),
        None => {
            vm.report(ErrorKind::Type, "len: unsupported type");
            Value::Void
        }
    }
}

fn cmd_list(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    // Identity cast; the signature already demands a list.
    vm.rt.heap.retain(args[0]);
    args[0]
}

fn cmd_dict(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    match args[0] {
        // Identity cast: dict([k: v, ...]) where the literal already
        // produced a dict.
        Value::Dict(_) => {
            vm.rt.heap.retain(args[0]);
            args[0]
        }
        // Backwards compatibility: a list of [k, v] entry lists.
        Value::List(id) => {
            let entries: Vec<Value> = vm.rt.heap.list(id).cloned().unwrap_or_default();
            let dict = vm.rt.heap.alloc_dict();
            let Value::Dict(dict_id) = dict else { return Value::Void };
            for kv in entries {
                let Value::List(kv_id) = kv else {
                    vm.report(ErrorKind::Type, "dict: each entry must be a 2-element list [k, v]");
                    continue;
                };
                let pair: Vec<Value> = vm.rt.heap.list(kv_id).cloned().unwrap_or_default();
                if pair.len() != 2 {
                    vm.report(ErrorKind::Type, "dict: each entry must be a 2-element list [k, v]");
                    continue;
                }
                vm.rt.heap.dict_set(dict_id, pair[0], pair[1]);
            }
            dict
        }
        _ => {
            vm.report(
                ErrorKind::Type,
                "dict: argument must be a dict literal or a list of [k, v] entries",
            );
            Value::Void
        }
    }
}

fn cmd_call(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    vm.exec_block_value(args[0])
}

/// cmd(name, param..., sig_list?, body_block)
/// Emitted by the `func` frontend; also callable directly so commands can
/// be created at runtime. The command value is stored as a variable in the
/// current scope, which is what lets later calls shadow-resolve it.
fn cmd_cmd(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    if args.len() < 2 {
        vm.report(ErrorKind::Arity, "cmd: expected at least 2 arguments");
        return Value::Void;
    }

    let Value::Str(name_id) = args[0] else {
        vm.report(ErrorKind::Type, "cmd: first argument must be the command name string");
        return Value::Void;
    };
    let Some(cmd_name) = vm.rt.heap.str_value(name_id).map(str::to_string) else {
        return Value::Void;
    };

    let body = args[args.len() - 1];
    if !matches!(body, Value::Block(_)) {
        vm.report(ErrorKind::Type, "cmd: last argument must be a block");
        return Value::Void;
    }

    // Optional typed signature emitted by the func frontend:
    // [ret_type, fixed_count, t0..tN-1, variadic_type_or_-1].
    let mut sig = None;
    let mut param_end = args.len() - 1;
    if args.len() >= 3 {
        if let Value::List(sig_id) = args[args.len() - 2] {
            let items: Vec<Value> = vm.rt.heap.list(sig_id).cloned().unwrap_or_default();
            match decode_sig_list(&items) {
                Some(decoded) => {
                    sig = Some(decoded);
                    param_end = args.len() - 2;
                }
                None => {
                    vm.report(ErrorKind::Type, "cmd: invalid signature list");
                    return Value::Void;
                }
            }
        }
    }

    let mut params = Vec::new();
    for arg in &args[1..param_end] {
        let Value::Str(id) = arg else {
            vm.report(ErrorKind::Type, "cmd: parameter name must be string");
            return Value::Void;
        };
        let Some(p) = vm.rt.heap.str_value(*id) else {
            return Value::Void;
        };
        params.push(SmolStr::new(p));
    }

    if let Some(sig) = &sig {
        if sig.param_types.len() != params.len() {
            vm.report(ErrorKind::Type, "cmd: signature fixed_count must match parameter name count");
            return Value::Void;
        }
    }

    // The Cmd owns one reference to its body block.
    vm.rt.heap.retain(body);
    let cmd = Cmd {
        name: SmolStr::new(&cmd_name),
        sig,
        doc: SmolStr::default(),
        kind: CmdKind::User { params, body },
    };
    let value = vm.rt.heap.alloc_cmd(cmd);

    // Store the command object in the current scope.
    let sym = vm.rt.syms.intern(&cmd_name);
    vm.rt.var_set(sym, value);
    vm.rt.heap.release(value);
    Value::Void
}

fn decode_sig_list(items: &[Value]) -> Option<FuncTypeSig> {
    if items.len() < 3 {
        return None;
    }
    let ret = items[0].as_int()?;
    let fixed = items[1].as_int()?;
    let tail = items[items.len() - 1].as_int()?;
    if fixed < 0 || items.len() != (2 + fixed as usize + 1) {
        return None;
    }

    let ret_type = TypeKind::from_i64(ret)?;
    let mut param_types = Vec::with_capacity(fixed as usize);
    for item in &items[2..2 + fixed as usize] {
        param_types.push(TypeKind::from_i64(item.as_int()?)?);
    }

    if tail >= 0 {
        Some(FuncTypeSig::variadic(ret_type, param_types, TypeKind::from_i64(tail)?))
    } else {
        Some(FuncTypeSig::exact(ret_type, param_types))
    }
}

fn cmd_assert(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    if args.len() > 2 {
        vm.report(ErrorKind::Arity, "assert: expected 1 or 2 arguments");
        return Value::Void;
    }
    if is_truthy(&vm.rt.heap, args[0]) {
        return Value::Void;
    }
    if args.len() == 2 {
        let msg = vm.value_to_string(args[1]);
        vm.fatal(&msg);
    }
    vm.fatal("assert: failed");
}

fn cmd_error(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    let msg = join_args(vm, args);
    eprintln!("error: {msg}");
    Value::Void
}

fn cmd_warning(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    let msg = join_args(vm, args);
    eprintln!("warning: {msg}");
    Value::Void
}

fn cmd_fatal(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    let msg = join_args(vm, args);
    vm.fatal(&msg);
}

fn cmd_type(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    let Value::Str(id) = args[0] else { return Value::Void };
    let Some(name) = vm.rt.heap.str_value(id) else { return Value::Void };
    match ValueKind::from_type_name(name) {
        Some(kind) => Value::Type(kind),
        None => {
            let name = name.to_string();
            vm.report(ErrorKind::Type, &format!("type: unknown type name '{name}'"));
            Value::Void
        }
    }
}

fn cmd_typeof(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    vm.rt.heap.alloc_str(args[0].kind().name())
}

fn cmd_trace(vm: &mut Vm, _name: &str, _args: &[Value]) -> Value {
    vm.trace_print();
    Value::Void
}

fn cmd_argc(vm: &mut Vm, _name: &str, _args: &[Value]) -> Value {
    Value::Int(vm.cur_args.len() as i64)
}

fn cmd_arg(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    let Some(i) = args[0].as_int() else { return Value::Void };
    if i < 0 || i as usize >= vm.cur_args.len() {
        return Value::Void;
    }
    let v = vm.cur_args[i as usize];
    vm.rt.heap.retain(v);
    v
}

fn cmd_arg_type(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    let Some(i) = args[0].as_int() else { return Value::Type(ValueKind::Void) };
    if i < 0 || i as usize >= vm.cur_args.len() {
        return Value::Type(ValueKind::Void);
    }
    Value::Type(vm.cur_args[i as usize].kind())
}

fn cmd_arg_name(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    let Some(i) = args[0].as_int() else {
        return vm.rt.heap.alloc_str("");
    };
    if i < 0 || i as usize >= vm.cur_args.len() {
        return vm.rt.heap.alloc_str("");
    }

    let Some(Value::Cmd(cmd_id)) = vm.cur_cmd else {
        return vm.rt.heap.alloc_str("");
    };
    let param = vm.rt.heap.cmd(cmd_id).and_then(|c| match &c.kind {
        CmdKind::User { params, .. } => params.get(i as usize).cloned(),
        CmdKind::Native { .. } => None,
    });
    match param {
        Some(p) => vm.rt.heap.alloc_str(&p),
        // The variadic tail has no declared name; '...' is the sentinel.
        None => vm.rt.heap.alloc_str("..."),
    }
}

fn cmd_include(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    let Value::Str(id) = args[0] else { return Value::Void };
    let Some(path) = vm.rt.heap.str_value(id).map(str::to_string) else {
        return Value::Void;
    };
    if path.is_empty() {
        vm.report(ErrorKind::Load, "include: empty path");
        return Value::Void;
    }
    crate::modules::include_module(vm, &path)
}
