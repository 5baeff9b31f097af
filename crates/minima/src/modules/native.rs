// Native module loading (`loadlib` feature).
// A native module is a dynamic library in the modules directory exporting:
//   mi_module_count() -> u32
//   mi_module_name(index) -> Option<&'static str>
//   mi_module_register(&mut Vm, module_name, ns_block, &HostApi) -> bool
// Registration binds exports into the namespace block's environment
// through the versioned HostApi table. Modules must be built against the
// same minima version and toolchain as the host.

use std::path::PathBuf;

use libloading::Library;

use crate::compiler::ast::{FuncTypeSig, TypeKind};
use crate::heap::{Block, NativeFn};
use crate::value::value::Value;
use crate::vm::error::ErrorKind;
use crate::vm::Vm;

pub const HOST_API_VERSION: u32 = 1;

pub type ModuleCountFn = fn() -> u32;
pub type ModuleNameFn = fn(u32) -> Option<&'static str>;
pub type ModuleRegisterFn = fn(&mut Vm, &str, Value, &HostApi) -> bool;

/// Host-API surface handed to native modules: value constructors, command
/// registration, namespace population and signature builders. Everything
/// else is a convenience wrapper a module can build on its side.
pub struct HostApi {
    pub version: u32,
    pub make_int: fn(i64) -> Value,
    pub make_float: fn(f64) -> Value,
    pub make_bool: fn(bool) -> Value,
    pub make_void: fn() -> Value,
    pub sig_exact: fn(TypeKind, &[TypeKind]) -> FuncTypeSig,
    pub sig_variadic: fn(TypeKind, &[TypeKind], TypeKind) -> FuncTypeSig,
    pub register_native: fn(&mut Vm, &str, Option<FuncTypeSig>, NativeFn, &str) -> bool,
    pub namespace_add_native: fn(&mut Vm, Value, &str, Option<FuncTypeSig>, NativeFn, &str) -> bool,
    pub namespace_add_value: fn(&mut Vm, Value, &str, Value) -> bool,
    pub trace_print: fn(&Vm),
}

pub static HOST_API: HostApi = HostApi {
    version: HOST_API_VERSION,
    make_int: Value::Int,
    make_float: Value::Float,
    make_bool: Value::Bool,
    make_void: || Value::Void,
    sig_exact: |ret, params| FuncTypeSig::exact(ret, params.to_vec()),
    sig_variadic: |ret, params, tail| FuncTypeSig::variadic(ret, params.to_vec(), tail),
    register_native: |vm, name, sig, func, doc| vm.register_native(name, sig, func, doc),
    namespace_add_native: |vm, ns, name, sig, func, doc| {
        vm.namespace_add_native(ns, name, sig, func, doc)
    },
    namespace_add_value: |vm, ns, name, value| vm.namespace_add_value(ns, name, value),
    trace_print: |vm| vm.trace_print(),
};

pub struct NativeLib {
    pub path: PathBuf,
    lib: Library,
}

impl NativeLib {
    fn symbols(&self) -> Option<(ModuleCountFn, ModuleNameFn, ModuleRegisterFn)> {
        // SAFETY: symbol names and types are the documented native-module
        // ABI; a library exporting them with other types is undefined
        // behavior on its side of the contract.
        unsafe {
            let count = *self.lib.get::<ModuleCountFn>(b"mi_module_count").ok()?;
            let name = *self.lib.get::<ModuleNameFn>(b"mi_module_name").ok()?;
            let register = *self.lib.get::<ModuleRegisterFn>(b"mi_module_register").ok()?;
            Some((count, name, register))
        }
    }
}

fn platform_ext() -> &'static str {
    if cfg!(windows) {
        ".dll"
    } else if cfg!(target_os = "macos") {
        ".dylib"
    } else {
        ".so"
    }
}

/// Load `<dll>[/<module>]` from the modules directory. Returns the module
/// namespace block, or void when the library does not exist, exports are
/// missing, or registration fails.
pub fn load_native_module(vm: &mut Vm, module_path: &str) -> Value {
    let (dll_name, mod_name) = match module_path.split_once('/') {
        Some((dll, module)) => (dll, module),
        None => (module_path, module_path),
    };
    if dll_name.is_empty() || mod_name.is_empty() {
        return Value::Void;
    }

    let Some(dir) = super::modules_dir(vm) else {
        return Value::Void;
    };
    let dll_path = dir.join(format!("{dll_name}{}", platform_ext()));
    if !dll_path.exists() {
        return Value::Void;
    }
    let dll_path = dll_path.canonicalize().unwrap_or(dll_path);

    let cache_key = format!("native:{}::{mod_name}", dll_path.display());
    if let Some(cached) = vm.module_cache.get(&cache_key).copied() {
        vm.rt.heap.retain(cached);
        return cached;
    }

    let lib_index = match vm.native_libs.iter().position(|l| l.path == dll_path) {
        Some(index) => index,
        None => {
            // SAFETY: loading a library runs its initializers; the modules
            // directory is operator-controlled, the same trust boundary as
            // the interpreter binary itself.
            let lib = match unsafe { Library::new(&dll_path) } {
                Ok(lib) => lib,
                Err(e) => {
                    vm.report(
                        ErrorKind::Load,
                        &format!("include: cannot load {}: {e}", dll_path.display()),
                    );
                    return Value::Void;
                }
            };
            vm.native_libs.push(NativeLib { path: dll_path.clone(), lib });
            vm.native_libs.len() - 1
        }
    };

    let Some((count_fn, name_fn, register_fn)) = vm.native_libs[lib_index].symbols() else {
        vm.report(
            ErrorKind::Load,
            &format!("include: missing native module exports in {}", dll_path.display()),
        );
        vm.native_libs.remove(lib_index);
        return Value::Void;
    };

    // The library must announce the requested module.
    let count = count_fn();
    let known = (0..count).any(|i| name_fn(i) == Some(mod_name));
    if !known {
        vm.report(
            ErrorKind::Load,
            &format!("include: native library does not provide module '{mod_name}'"),
        );
        return Value::Void;
    }

    // Namespace container with a detached environment.
    let env = vm.rt.scope_create_detached();
    vm.module_envs.push(env);
    let block = Block {
        chunk: std::rc::Rc::new(crate::value::chunk::Chunk::new()),
        env: Some(env),
        id: 0,
    };
    let ns = vm.rt.heap.alloc_block(block);

    if !register_fn(vm, mod_name, ns, &HOST_API) {
        vm.report(
            ErrorKind::Load,
            &format!("include: native module register failed: {mod_name} ({})", dll_path.display()),
        );
        vm.rt.heap.release(ns);
        vm.native_libs.remove(lib_index);
        return Value::Void;
    }

    vm.rt.heap.retain(ns);
    vm.module_cache.insert(cache_key, ns);
    ns
}
