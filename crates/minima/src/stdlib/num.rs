// Numeric namespaces.
// Registers the int:: and float:: namespace blocks through the same
// protocol native modules use: a detached environment bound in the root
// scope, members added per name.

use crate::compiler::ast::{FuncTypeSig, TypeKind};
use crate::value::value::Value;
use crate::vm::error::ErrorKind;
use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    let ns = vm.namespace_get_or_create("int");
    vm.namespace_add_native(
        ns,
        "cast",
        Some(FuncTypeSig::exact(TypeKind::Int, vec![TypeKind::Any])),
        int_cast,
        "Convert a numeric or bool value to int.",
    );
    vm.namespace_add_native(
        ns,
        "parse",
        Some(FuncTypeSig::exact(TypeKind::Int, vec![TypeKind::String])),
        int_parse,
        "Parse a decimal string into an int.",
    );
    vm.namespace_add_value(ns, "MAX", Value::Int(i64::MAX));
    vm.namespace_add_value(ns, "MIN", Value::Int(i64::MIN));

    let ns = vm.namespace_get_or_create("float");
    vm.namespace_add_native(
        ns,
        "cast",
        Some(FuncTypeSig::exact(TypeKind::Float, vec![TypeKind::Any])),
        float_cast,
        "Convert a numeric or bool value to float.",
    );
    vm.namespace_add_native(
        ns,
        "parse",
        Some(FuncTypeSig::exact(TypeKind::Float, vec![TypeKind::String])),
        float_parse,
        "Parse a decimal string into a float.",
    );
}

fn int_cast(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    match args[0] {
        Value::Int(v) => Value::Int(v),
        Value::Float(v) => Value::Int(v as i64),
        Value::Bool(v) => Value::Int(i64::from(v)),
        _ => {
            vm.report(ErrorKind::Type, "int::cast: expected int, float or bool");
            Value::Void
        }
    }
}

fn int_parse(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    let Value::Str(id) = args[0] else { return Value::Void };
    let Some(s) = vm.rt.heap.str_value(id) else { return Value::Void };
    match s.trim().parse::<i64>() {
        Ok(v) => Value::Int(v),
        Err(_) => {
            let s = s.to_string();
            vm.report(ErrorKind::Type, &format!("int::parse: invalid integer '{s}'"));
            Value::Void
        }
    }
}

fn float_cast(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    match args[0] {
        Value::Int(v) => Value::Float(v as f64),
        Value::Float(v) => Value::Float(v),
        Value::Bool(v) => Value::Float(if v { 1.0 } else { 0.0 }),
        _ => {
            vm.report(ErrorKind::Type, "float::cast: expected int, float or bool");
            Value::Void
        }
    }
}

fn float_parse(vm: &mut Vm, _name: &str, args: &[Value]) -> Value {
    let Value::Str(id) = args[0] else { return Value::Void };
    let Some(s) = vm.rt.heap.str_value(id) else { return Value::Void };
    match s.trim().parse::<f64>() {
        Ok(v) => Value::Float(v),
        Err(_) => {
            let s = s.to_string();
            vm.report(ErrorKind::Type, &format!("float::parse: invalid float '{s}'"));
            Value::Void
        }
    }
}
