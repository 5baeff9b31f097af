// Module loader.
// include("path") resolution order:
//   1. `.mx` paths load directly; otherwise both `.mi` and `.mx`
//      candidates are computed.
//   2. Anchors: the directory of the requesting script, then the
//      configured modules directory (MINIMA_ROOT/MI_ROOT fallback).
//   3. The module cache dedupes by resolved path: include-once per VM.
//   4. A lone `.mi` compiles into the per-source cache directory
//      (<cache-root>/<hex16(fnv1a64(abs path))>/<basename>.mx), skipped
//      while the cached MX is fresh and version-compatible.
//   5. Otherwise a native module <name>.{dll|so|dylib} is tried.
//
// Loading runs the module's top level inside a detached scope frame and
// returns a block value capturing that environment.

#[cfg(feature = "loadlib")]
pub mod native;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::heap::Block;
use crate::value::chunk_serializer;
use crate::value::value::Value;
use crate::vm::error::ErrorKind;
use crate::vm::Vm;

pub fn fnv1a64(data: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in data {
        h ^= b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}

fn hex16(v: u64) -> String {
    format!("{v:016x}")
}

/// Platform cache root when --cache-dir is not configured.
fn default_cache_root() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(app) = std::env::var("LOCALAPPDATA") {
            if !app.is_empty() {
                return PathBuf::from(app).join("minima");
            }
        }
    }
    #[cfg(not(windows))]
    {
        if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
            if !xdg.is_empty() {
                return PathBuf::from(xdg).join("minima");
            }
        }
        if let Ok(home) = std::env::var("HOME") {
            if !home.is_empty() {
                return PathBuf::from(home).join(".cache").join("minima");
            }
        }
    }
    std::env::temp_dir().join("minima")
}

pub fn cache_root(vm: &Vm) -> PathBuf {
    vm.cache_dir.clone().unwrap_or_else(default_cache_root)
}

/// MINIMA_ROOT/modules (or MI_ROOT/modules) unless explicitly configured.
pub fn modules_dir(vm: &Vm) -> Option<PathBuf> {
    if let Some(dir) = &vm.modules_dir {
        return Some(dir.clone());
    }
    for var in ["MINIMA_ROOT", "MI_ROOT"] {
        if let Ok(root) = std::env::var(var) {
            if !root.is_empty() {
                return Some(PathBuf::from(root).join("modules"));
            }
        }
    }
    None
}

/// Cache location for a compiled source module: a per-source-path
/// directory named by the hash of the absolute source path.
pub fn cached_mx_for_mi(vm: &Vm, src_mi: &Path) -> Option<PathBuf> {
    let abs = src_mi
        .canonicalize()
        .unwrap_or_else(|_| src_mi.to_path_buf());
    let hash = fnv1a64(abs.to_string_lossy().as_bytes());

    let dir = cache_root(vm).join(hex16(hash));
    std::fs::create_dir_all(&dir).ok()?;

    let base = src_mi.file_stem()?.to_string_lossy().to_string();
    Some(dir.join(format!("{base}.mx")))
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Compile a .mi source file into an MX file. Parse and compile errors
/// print their pretty diagnostic and fail the load.
pub fn compile_mi_to_mx(vm: &mut Vm, mi_file: &Path, mx_file: &Path) -> bool {
    let source = match std::fs::read_to_string(mi_file) {
        Ok(s) => s,
        Err(e) => {
            vm.report(
                ErrorKind::Load,
                &format!("include: cannot read {}: {e}", mi_file.display()),
            );
            return false;
        }
    };

    let file_name = mi_file.to_string_lossy().to_string();
    let chunk = match crate::compiler::compile_checked(vm, &source, "<module>", &file_name) {
        Ok(chunk) => chunk,
        Err(err) => {
            eprint!("{}", err.pretty(&file_name, &source));
            return false;
        }
    };

    if let Some(parent) = mx_file.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match chunk_serializer::save_file(&chunk, mx_file) {
        Ok(()) => true,
        Err(msg) => {
            vm.report(ErrorKind::Load, &msg);
            false
        }
    }
}

/// The source file of the chunk currently executing, or the nearest caller
/// chunk that carries one.
fn current_script_file(vm: &Vm) -> Option<PathBuf> {
    if let Some(chunk) = &vm.dbg_chunk {
        let file = chunk.dbg_file();
        if !file.is_empty() {
            return Some(PathBuf::from(file));
        }
    }
    for frame in vm.call_stack.iter().rev() {
        if let Some(chunk) = &frame.caller_chunk {
            let file = chunk.dbg_file();
            if !file.is_empty() {
                return Some(PathBuf::from(file));
            }
        }
    }
    None
}

/// Compute `.mi`/`.mx` sibling candidates for a requested path.
fn candidates(req: &Path) -> (PathBuf, PathBuf) {
    let ext = req.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "mx" => (req.with_extension("mi"), req.to_path_buf()),
        "mi" => (req.to_path_buf(), req.with_extension("mx")),
        _ => (req.with_extension("mi"), req.with_extension("mx")),
    }
}

/// Load (or fetch from cache) the module named by `module`. Returns an
/// owned block value capturing the module environment, or void on failure.
pub fn include_module(vm: &mut Vm, module: &str) -> Value {
    let module_path = Path::new(module);

    let req = if module_path.is_absolute() {
        module_path.to_path_buf()
    } else {
        let base_dir = current_script_file(vm)
            .and_then(|f| f.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        base_dir.join(module_path)
    };

    let (mut src_mi, mut src_mx) = candidates(&req);

    // Fallback search: the modules directory.
    if !src_mi.exists() && !src_mx.exists() {
        if let Some(dir) = modules_dir(vm) {
            let (mi, mx) = candidates(&dir.join(module_path));
            src_mi = mi;
            src_mx = mx;
        }
    }

    let mut load_mx;
    if src_mx.exists() {
        load_mx = src_mx.clone();
    } else {
        if !src_mi.exists() {
            #[cfg(feature = "loadlib")]
            {
                let native = native::load_native_module(vm, module);
                if !matches!(native, Value::Void) {
                    return native;
                }
            }
            vm.report(ErrorKind::Name, &format!("include: module not found: {module}"));
            return Value::Void;
        }

        let Some(cached) = cached_mx_for_mi(vm, &src_mi) else {
            vm.report(ErrorKind::Load, "include: failed to resolve cache directory");
            return Value::Void;
        };
        load_mx = cached;

        // Compilation is skipped while the cached MX is at least as new as
        // the source.
        let fresh = match (mtime(&src_mi), mtime(&load_mx)) {
            (Some(mi_time), Some(mx_time)) => mx_time >= mi_time,
            _ => false,
        };
        if !fresh && !compile_mi_to_mx(vm, &src_mi, &load_mx) {
            return Value::Void;
        }
    }

    // Version gate: stale or future MX recompiles from source when we can.
    let compatible = matches!(
        chunk_serializer::peek_file_version(&load_mx),
        Ok(v) if (1..=chunk_serializer::MX_VERSION).contains(&v)
    );
    if !compatible {
        if !src_mi.exists() {
            vm.report(
                ErrorKind::Load,
                &format!("include: incompatible module file: {}", load_mx.display()),
            );
            return Value::Void;
        }
        let Some(cached) = cached_mx_for_mi(vm, &src_mi) else {
            vm.report(ErrorKind::Load, "include: failed to resolve cache directory");
            return Value::Void;
        };
        if !compile_mi_to_mx(vm, &src_mi, &cached) {
            return Value::Void;
        }
        load_mx = cached;
    }

    let cache_key = load_mx
        .canonicalize()
        .unwrap_or_else(|_| load_mx.clone())
        .to_string_lossy()
        .to_string();

    if let Some(cached) = vm.module_cache.get(&cache_key).copied() {
        vm.rt.heap.retain(cached);
        return cached;
    }

    let program = match chunk_serializer::load_file(&load_mx) {
        Ok(p) => p,
        Err(msg) => {
            vm.report(ErrorKind::Load, &format!("include: {msg}"));
            return Value::Void;
        }
    };
    if let Err(msg) = vm.link_program(&program) {
        vm.report(ErrorKind::Link, &format!("include: {msg}"));
        return Value::Void;
    }

    // Run the module top level inside a detached environment, then hand
    // back a block capturing it.
    let env = vm.rt.scope_create_detached();
    vm.module_envs.push(env);

    let saved = vm.rt.current;
    vm.rt.current = env;
    let top = vm.execute(&program.entry);
    vm.rt.heap.release(top);
    vm.rt.current = saved;

    let block = Block { chunk: program.entry.clone(), env: Some(env), id: 0 };
    let value = vm.rt.heap.alloc_block(block);

    vm.module_programs.push(program);
    vm.rt.heap.retain(value);
    vm.module_cache.insert(cache_key, value);

    value
}
