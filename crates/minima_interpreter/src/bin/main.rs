// minima - compile, disassemble and run Minima programs.
//
//   minima -c file.mi [out.mx]   compile only (default out: file.mi.mx)
//   minima -d file.{mi,mx}       disassemble (compiles .mi when stale)
//   minima file.mi               compile and run, caching the MX
//   minima file.mx               load and run
//
// Options:
//   --cache-dir <path>           override the cache root directory

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use minima::compiler::compile_checked;
use minima::modules;
use minima::value::chunk::disasm;
use minima::value::chunk_serializer;
use minima::Vm;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage(program: &str) {
    eprintln!("minima {VERSION}");
    eprintln!("usage: {program} [--cache-dir <path>] <command>");
    eprintln!("Commands:");
    eprintln!("  -c <file.mi> [out.mx]   compile only (default out: <file.mi>.mx)");
    eprintln!("  -d <file.mi|file.mx>    disassemble; .mi sources compile through the cache");
    eprintln!("  <file.mi>               compile and run (result cached as MX)");
    eprintln!("  <file.mx>               load and run");
}

fn make_vm(cache_dir: Option<&str>) -> Vm {
    let mut vm = Vm::new();
    vm.set_cache_dir(cache_dir.map(PathBuf::from));
    vm
}

fn compile_file(vm: &mut Vm, in_file: &str) -> Option<std::rc::Rc<minima::Chunk>> {
    let source = match std::fs::read_to_string(in_file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("minima: cannot read {in_file}: {e}");
            return None;
        }
    };

    match compile_checked(vm, &source, "<script>", in_file) {
        Ok(chunk) => Some(chunk),
        Err(err) => {
            eprint!("{}", err.pretty(in_file, &source));
            None
        }
    }
}

fn cmd_compile_only(in_file: &str, out_file: &Path, cache_dir: Option<&str>) -> ExitCode {
    let mut vm = make_vm(cache_dir);
    let Some(chunk) = compile_file(&mut vm, in_file) else {
        return ExitCode::FAILURE;
    };
    if let Err(msg) = chunk_serializer::save_file(&chunk, out_file) {
        eprintln!("minima: {msg}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// A fresh, version-compatible cached MX for a source file, compiling when
/// needed.
fn ensure_cached_mx(vm: &mut Vm, mi_file: &str) -> Option<PathBuf> {
    let mi_path = Path::new(mi_file);
    let cached = modules::cached_mx_for_mi(vm, mi_path)?;

    let fresh = match (
        std::fs::metadata(mi_path).and_then(|m| m.modified()),
        std::fs::metadata(&cached).and_then(|m| m.modified()),
    ) {
        (Ok(mi_time), Ok(mx_time)) => mx_time >= mi_time,
        _ => false,
    };
    let compatible = matches!(
        chunk_serializer::peek_file_version(&cached),
        Ok(v) if (1..=chunk_serializer::MX_VERSION).contains(&v)
    );

    if !(fresh && compatible) && !modules::compile_mi_to_mx(vm, mi_path, &cached) {
        return None;
    }
    Some(cached)
}

fn cmd_disasm(mx_file: &Path, cache_dir: Option<&str>) -> ExitCode {
    let mut vm = make_vm(cache_dir);
    let program = match chunk_serializer::load_file(mx_file) {
        Ok(p) => p,
        Err(msg) => {
            eprintln!("minima: {msg}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(msg) = vm.link_program(&program) {
        eprintln!("minima: {msg}");
        return ExitCode::FAILURE;
    }
    print!("{}", disasm(&program.entry));
    ExitCode::SUCCESS
}

fn cmd_disasm_mi(mi_file: &str, cache_dir: Option<&str>) -> ExitCode {
    let mut vm = make_vm(cache_dir);
    match ensure_cached_mx(&mut vm, mi_file) {
        Some(cached) => cmd_disasm(&cached, cache_dir),
        None => ExitCode::FAILURE,
    }
}

fn cmd_run_source(mi_file: &str, cache_dir: Option<&str>) -> ExitCode {
    let mut vm = make_vm(cache_dir);

    // Prefer the cached MX; fall back to a direct in-memory compile when
    // the cache directory is unusable.
    if let Some(cached) = ensure_cached_mx(&mut vm, mi_file) {
        let program = match chunk_serializer::load_file(&cached) {
            Ok(p) => p,
            Err(msg) => {
                eprintln!("minima: {msg}");
                return ExitCode::FAILURE;
            }
        };
        if let Err(msg) = vm.link_program(&program) {
            eprintln!("minima: {msg}");
            return ExitCode::FAILURE;
        }
        let out = vm.execute(&program.entry);
        vm.rt.heap.release(out);
        return ExitCode::SUCCESS;
    }

    let Some(chunk) = compile_file(&mut vm, mi_file) else {
        return ExitCode::FAILURE;
    };
    let out = vm.execute(&chunk);
    vm.rt.heap.release(out);
    ExitCode::SUCCESS
}

fn cmd_run_mx(mx_file: &Path, cache_dir: Option<&str>) -> ExitCode {
    let mut vm = make_vm(cache_dir);
    let program = match chunk_serializer::load_file(mx_file) {
        Ok(p) => p,
        Err(msg) => {
            eprintln!("minima: {msg}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(msg) = vm.link_program(&program) {
        eprintln!("minima: {msg}");
        return ExitCode::FAILURE;
    }
    let out = vm.execute(&program.entry);
    vm.rt.heap.release(out);
    ExitCode::SUCCESS
}

fn has_ext(path: &str, ext: &str) -> bool {
    Path::new(path)
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("minima");

    if args.len() < 2 {
        print_usage(program);
        return ExitCode::FAILURE;
    }

    let mut argi = 1;
    let mut cache_dir: Option<&str> = None;
    if args[argi] == "--cache-dir" {
        if argi + 1 >= args.len() {
            print_usage(program);
            return ExitCode::FAILURE;
        }
        cache_dir = Some(&args[argi + 1]);
        argi += 2;
    }

    let rest = &args[argi..];
    if rest.is_empty() {
        print_usage(program);
        return ExitCode::FAILURE;
    }

    match rest[0].as_str() {
        "-c" => {
            if rest.len() != 2 && rest.len() != 3 {
                print_usage(program);
                return ExitCode::FAILURE;
            }
            let in_file = &rest[1];
            let out_file = match rest.get(2) {
                Some(out) => PathBuf::from(out),
                None => PathBuf::from(format!("{in_file}.mx")),
            };
            cmd_compile_only(in_file, &out_file, cache_dir)
        }
        "-d" => {
            if rest.len() != 2 {
                print_usage(program);
                return ExitCode::FAILURE;
            }
            let in_file = &rest[1];
            if has_ext(in_file, "mi") {
                cmd_disasm_mi(in_file, cache_dir)
            } else {
                cmd_disasm(Path::new(in_file), cache_dir)
            }
        }
        path if rest.len() == 1 => {
            if has_ext(path, "mx") {
                cmd_run_mx(Path::new(path), cache_dir)
            } else {
                cmd_run_source(path, cache_dir)
            }
        }
        _ => {
            print_usage(program);
            ExitCode::FAILURE
        }
    }
}
