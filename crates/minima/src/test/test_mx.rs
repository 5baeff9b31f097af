// MX chunk file format: round-trips, header validation, version gating.

use crate::value::chunk::disasm;
use crate::value::chunk_serializer::{
    MX_MAGIC, MX_VERSION, load_from_bytes, save_to_bytes,
};
use crate::vm::Vm;

const PROGRAM: &str = r#"
    func mul(a: int, b: int) -> int {
        let acc = 0;
        let i = 0;
        while (i < b) {
            acc = acc + a;
            i = i + 1;
        }
        return acc;
    }
    let d = [six: mul(2, 3), eight: mul(2, 4)];
    print(d["six"], d["eight"]);
    foreach (kv, d) { print(kv[1]); }
"#;

fn run_capture(vm: &mut Vm, run: impl FnOnce(&mut Vm)) -> String {
    let buf = vm.capture_output();
    run(vm);
    let bytes = buf.borrow().clone();
    String::from_utf8(bytes).expect("utf-8 output")
}

#[test]
fn test_roundtrip_preserves_observable_output() {
    // In-memory compile + execute.
    let mut vm1 = Vm::new();
    let chunk = vm1.compile(PROGRAM, "<script>", "").expect("compiles");
    let direct = run_capture(&mut vm1, |vm| {
        let out = vm.execute(&chunk);
        vm.rt.heap.release(out);
    });

    // Save, load into a fresh VM, re-link, execute.
    let bytes = save_to_bytes(&chunk).expect("serializes");
    let program = load_from_bytes(&bytes).expect("loads");

    let mut vm2 = Vm::new();
    vm2.link_program(&program).expect("links");
    let loaded = run_capture(&mut vm2, |vm| {
        let out = vm.execute(&program.entry);
        vm.rt.heap.release(out);
    });

    assert_eq!(direct, loaded);
    assert!(direct.starts_with("6 8\n"));
}

#[test]
fn test_roundtrip_preserves_structure() {
    let mut vm = Vm::new();
    let chunk = vm
        .compile("func f(x: int) -> int { return x; } print(f(1));", "<script>", "demo.mi")
        .expect("compiles");

    let bytes = save_to_bytes(&chunk).expect("serializes");
    let program = load_from_bytes(&bytes).expect("loads");

    // The disassembly (code, pools, debug map) must match exactly.
    assert_eq!(disasm(&chunk), disasm(&program.entry));
    assert_eq!(program.entry.dbg_file(), "demo.mi");
}

#[test]
fn test_header_magic() {
    let mut vm = Vm::new();
    let chunk = vm.compile("print(1);", "<script>", "").expect("compiles");
    let bytes = save_to_bytes(&chunk).expect("serializes");
    assert_eq!(&bytes[0..4], &MX_MAGIC);
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    assert_eq!(version, MX_VERSION);
}

#[test]
fn test_bad_magic_rejected() {
    let mut vm = Vm::new();
    let chunk = vm.compile("print(1);", "<script>", "").expect("compiles");
    let mut bytes = save_to_bytes(&chunk).expect("serializes");
    bytes[0] = b'!';
    let err = load_from_bytes(&bytes).unwrap_err();
    assert!(err.contains("magic"));
}

#[test]
fn test_future_version_rejected() {
    let mut vm = Vm::new();
    let chunk = vm.compile("print(1);", "<script>", "").expect("compiles");
    let mut bytes = save_to_bytes(&chunk).expect("serializes");
    bytes[4..8].copy_from_slice(&(MX_VERSION + 1).to_le_bytes());
    let err = load_from_bytes(&bytes).unwrap_err();
    assert!(err.contains("version"));
}

#[test]
fn test_version_zero_rejected() {
    let mut vm = Vm::new();
    let chunk = vm.compile("print(1);", "<script>", "").expect("compiles");
    let mut bytes = save_to_bytes(&chunk).expect("serializes");
    bytes[4..8].copy_from_slice(&0u32.to_le_bytes());
    assert!(load_from_bytes(&bytes).is_err());
}

#[test]
fn test_truncated_file_rejected() {
    let mut vm = Vm::new();
    let chunk = vm.compile("print(\"hello world\");", "<script>", "").expect("compiles");
    let bytes = save_to_bytes(&chunk).expect("serializes");
    for cut in [3, 8, 16, bytes.len() - 1] {
        assert!(load_from_bytes(&bytes[..cut]).is_err(), "cut at {cut} must fail");
    }
}

#[test]
fn test_shared_subchunks_serialize_by_index() {
    // Two block literals plus a function body: three subchunks, each
    // serialized once and rebuilt through the chunk table.
    let mut vm = Vm::new();
    let chunk = vm
        .compile(
            r#"
            func f() -> int { return 1; }
            let a = { print("a"); };
            let b = { print("b"); };
            call(a);
            "#,
            "<script>",
            "",
        )
        .expect("compiles");

    let bytes = save_to_bytes(&chunk).expect("serializes");
    let program = load_from_bytes(&bytes).expect("loads");
    assert_eq!(program.chunks.len(), 4);
    assert_eq!(program.entry.subchunks.len(), 3);
}

#[test]
fn test_link_error_for_unknown_command() {
    // A chunk table naming an unregistered unqualified command must fail
    // linking; qualified names stay lazily unresolved.
    let mut vm = Vm::new();

    let mut broken = crate::value::chunk::Chunk::new();
    broken.cmd_names.push(smol_str::SmolStr::new("no_such_command"));
    broken.seal();
    assert!(vm.link_chunk(&std::rc::Rc::new(broken)).is_err());

    let mut lazy = crate::value::chunk::Chunk::new();
    lazy.cmd_names.push(smol_str::SmolStr::new("mod::member"));
    lazy.seal();
    assert!(vm.link_chunk(&std::rc::Rc::new(lazy)).is_ok());
}
