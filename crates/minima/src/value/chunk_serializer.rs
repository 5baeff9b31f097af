// MX chunk file format: deterministic little-endian serialization of a
// chunk DAG rooted at a designated entry chunk.
//
// Layout:
//   header: magic '<MX>' | version u32 | chunk_count u32 | entry_index u32
//   per chunk:
//     code_count u32, raw instructions (8 bytes each)
//     const_count u32, per-constant tag u8 (void=0,int=1,float=2,bool=3,
//       string=4) + payload
//     symbol_count u32 + length-prefixed byte strings
//     cmd_count u32 + length-prefixed names (targets resolve after load)
//     subchunk_count u32 + u32 indices into the chunk table
//     debug presence u8; if 1: name slice, file slice, per-ins line u32s,
//       per-ins column u32s
//
// Version is a compatibility gate only: 1 <= file version <= MX_VERSION.

use std::collections::HashMap;
use std::rc::Rc;

use smol_str::SmolStr;

use crate::value::chunk::{Chunk, Const, DebugInfo};
use crate::vm::opcode::Ins;

pub const MX_MAGIC: [u8; 4] = *b"<MX>";
pub const MX_VERSION: u32 = 1;

/// A loaded chunk table plus its entry point.
#[derive(Debug, Clone)]
pub struct Program {
    pub entry: Rc<Chunk>,
    pub chunks: Vec<Rc<Chunk>>,
}

//----------------------------------------------------------
// Save
//----------------------------------------------------------

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_slice(buf: &mut Vec<u8>, s: &str) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn collect_chunks_dfs(
    root: &Rc<Chunk>,
    map: &mut HashMap<*const Chunk, u32>,
    out: &mut Vec<Rc<Chunk>>,
) {
    let key = Rc::as_ptr(root);
    if map.contains_key(&key) {
        return;
    }
    map.insert(key, out.len() as u32);
    out.push(root.clone());
    for sub in &root.subchunks {
        collect_chunks_dfs(sub, map, out);
    }
}

fn save_chunk(buf: &mut Vec<u8>, chunk: &Chunk, map: &HashMap<*const Chunk, u32>) -> Result<(), String> {
    write_u32(buf, chunk.code.len() as u32);
    for ins in &chunk.code {
        buf.extend_from_slice(&ins.to_bytes());
    }

    write_u32(buf, chunk.consts.len() as u32);
    for k in &chunk.consts {
        match k {
            Const::Void => buf.push(0),
            Const::Int(v) => {
                buf.push(1);
                buf.extend_from_slice(&(*v as u64).to_le_bytes());
            }
            Const::Float(v) => {
                buf.push(2);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Const::Bool(v) => {
                buf.push(3);
                buf.push(u8::from(*v));
            }
            Const::Str(s) => {
                buf.push(4);
                write_slice(buf, s);
            }
        }
    }

    write_u32(buf, chunk.symbols.len() as u32);
    for sym in &chunk.symbols {
        write_slice(buf, sym);
    }

    write_u32(buf, chunk.cmd_names.len() as u32);
    for name in &chunk.cmd_names {
        write_slice(buf, name);
    }

    write_u32(buf, chunk.subchunks.len() as u32);
    for sub in &chunk.subchunks {
        let index = map
            .get(&Rc::as_ptr(sub))
            .ok_or_else(|| "mx: subchunk missing from chunk table".to_string())?;
        write_u32(buf, *index);
    }

    match &chunk.dbg {
        None => buf.push(0),
        Some(dbg) => {
            buf.push(1);
            write_slice(buf, &dbg.name);
            write_slice(buf, &dbg.file);
            for ip in 0..chunk.code.len() {
                write_u32(buf, dbg.lines.get(ip).copied().unwrap_or(0));
            }
            for ip in 0..chunk.code.len() {
                write_u32(buf, dbg.cols.get(ip).copied().unwrap_or(0));
            }
        }
    }

    Ok(())
}

/// Serialize a chunk graph into MX bytes.
pub fn save_to_bytes(entry: &Rc<Chunk>) -> Result<Vec<u8>, String> {
    let mut map = HashMap::new();
    let mut chunks = Vec::new();
    collect_chunks_dfs(entry, &mut map, &mut chunks);

    let mut buf = Vec::new();
    buf.extend_from_slice(&MX_MAGIC);
    write_u32(&mut buf, MX_VERSION);
    write_u32(&mut buf, chunks.len() as u32);
    write_u32(&mut buf, 0); // entry chunk index (DFS root is first)

    for chunk in &chunks {
        save_chunk(&mut buf, chunk, &map)?;
    }
    Ok(buf)
}

pub fn save_file(entry: &Rc<Chunk>, path: &std::path::Path) -> Result<(), String> {
    let bytes = save_to_bytes(entry)?;
    std::fs::write(path, bytes).map_err(|e| format!("mx: cannot write {}: {e}", path.display()))
}

//----------------------------------------------------------
// Load
//----------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Reader<'a> {
        Reader { data, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self.pos.checked_add(n).ok_or("mx: truncated file")?;
        if end > self.data.len() {
            return Err("mx: truncated file".to_string());
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, String> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, String> {
        let b = self.bytes(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn f64(&mut self) -> Result<f64, String> {
        Ok(f64::from_bits(self.u64()?))
    }

    fn slice(&mut self) -> Result<&'a str, String> {
        let n = self.u32()? as usize;
        let bytes = self.bytes(n)?;
        std::str::from_utf8(bytes).map_err(|_| "mx: invalid utf-8 in string".to_string())
    }
}

/// A chunk read off disk before subchunk indices are patched to pointers.
struct RawChunk {
    chunk: Chunk,
    sub_indices: Vec<u32>,
}

fn load_raw_chunk(r: &mut Reader<'_>) -> Result<RawChunk, String> {
    let code_count = r.u32()? as usize;
    let mut code = Vec::with_capacity(code_count);
    for _ in 0..code_count {
        let b = r.bytes(8)?;
        let ins = Ins::from_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            .ok_or("mx: invalid opcode")?;
        code.push(ins);
    }

    let const_count = r.u32()? as usize;
    let mut consts = Vec::with_capacity(const_count);
    for _ in 0..const_count {
        let tag = r.u8()?;
        let k = match tag {
            0 => Const::Void,
            1 => Const::Int(r.u64()? as i64),
            2 => Const::Float(r.f64()?),
            3 => Const::Bool(r.u8()? != 0),
            4 => Const::Str(r.slice()?.into()),
            other => return Err(format!("mx: unknown constant tag {other}")),
        };
        consts.push(k);
    }

    let symbol_count = r.u32()? as usize;
    let mut symbols = Vec::with_capacity(symbol_count);
    for _ in 0..symbol_count {
        symbols.push(SmolStr::new(r.slice()?));
    }

    let cmd_count = r.u32()? as usize;
    let mut cmd_names = Vec::with_capacity(cmd_count);
    for _ in 0..cmd_count {
        cmd_names.push(SmolStr::new(r.slice()?));
    }

    let sub_count = r.u32()? as usize;
    let mut sub_indices = Vec::with_capacity(sub_count);
    for _ in 0..sub_count {
        sub_indices.push(r.u32()?);
    }

    let has_dbg = r.u8()? != 0;
    let dbg = if has_dbg {
        let name = SmolStr::new(r.slice()?);
        let file = SmolStr::new(r.slice()?);
        let mut lines = Vec::with_capacity(code_count);
        for _ in 0..code_count {
            lines.push(r.u32()?);
        }
        let mut cols = Vec::with_capacity(code_count);
        for _ in 0..code_count {
            cols.push(r.u32()?);
        }
        Some(DebugInfo { name, file, lines, cols })
    } else {
        None
    };

    let mut chunk = Chunk {
        code,
        consts,
        symbols,
        cmd_names,
        subchunks: Vec::new(),
        dbg,
        ..Chunk::default()
    };
    chunk.seal();

    Ok(RawChunk { chunk, sub_indices })
}

/// Patch one raw chunk into an Rc, resolving subchunk indices. Chunks form
/// a DAG; an index cycle in a corrupt file is rejected.
fn build_chunk(
    index: usize,
    raws: &mut Vec<Option<RawChunk>>,
    built: &mut Vec<Option<Rc<Chunk>>>,
    in_progress: &mut Vec<bool>,
) -> Result<Rc<Chunk>, String> {
    if let Some(done) = &built[index] {
        return Ok(done.clone());
    }
    if in_progress[index] {
        return Err("mx: cyclic subchunk reference".to_string());
    }
    in_progress[index] = true;

    let raw = raws[index].take().ok_or("mx: chunk referenced twice during build")?;
    let RawChunk { mut chunk, sub_indices } = raw;

    for sub in sub_indices {
        let sub = sub as usize;
        if sub >= built.len() {
            return Err("mx: subchunk index out of range".to_string());
        }
        chunk.subchunks.push(build_chunk(sub, raws, built, in_progress)?);
    }

    let rc = Rc::new(chunk);
    built[index] = Some(rc.clone());
    in_progress[index] = false;
    Ok(rc)
}

/// Parse MX bytes into a chunk table. Command targets stay unresolved; the
/// VM links them against its registry afterwards.
pub fn load_from_bytes(data: &[u8]) -> Result<Program, String> {
    let mut r = Reader::new(data);

    let magic = r.bytes(4)?;
    if magic != MX_MAGIC {
        return Err("mx: bad magic (not an MX file)".to_string());
    }
    let version = r.u32()?;
    if version < 1 || version > MX_VERSION {
        return Err(format!(
            "mx: unsupported version {version} (supported 1..={MX_VERSION})"
        ));
    }
    let chunk_count = r.u32()? as usize;
    let entry_index = r.u32()? as usize;
    if chunk_count == 0 || entry_index >= chunk_count {
        return Err("mx: bad chunk table header".to_string());
    }

    let mut raws: Vec<Option<RawChunk>> = Vec::with_capacity(chunk_count);
    for _ in 0..chunk_count {
        raws.push(Some(load_raw_chunk(&mut r)?));
    }

    let mut built: Vec<Option<Rc<Chunk>>> = vec![None; chunk_count];
    let mut in_progress = vec![false; chunk_count];
    for index in 0..chunk_count {
        if built[index].is_none() && raws[index].is_some() {
            build_chunk(index, &mut raws, &mut built, &mut in_progress)?;
        }
    }

    let chunks: Vec<Rc<Chunk>> = built
        .into_iter()
        .map(|c| c.ok_or_else(|| "mx: unreachable chunk in table".to_string()))
        .collect::<Result<_, _>>()?;

    Ok(Program { entry: chunks[entry_index].clone(), chunks })
}

pub fn load_file(path: &std::path::Path) -> Result<Program, String> {
    let bytes = std::fs::read(path)
        .map_err(|e| format!("mx: cannot read {}: {e}", path.display()))?;
    load_from_bytes(&bytes)
}

/// Read only the header and return the file's version.
pub fn peek_file_version(path: &std::path::Path) -> Result<u32, String> {
    let bytes = std::fs::read(path)
        .map_err(|e| format!("mx: cannot read {}: {e}", path.display()))?;
    let mut r = Reader::new(&bytes);
    let magic = r.bytes(4)?;
    if magic != MX_MAGIC {
        return Err("mx: bad magic (not an MX file)".to_string());
    }
    r.u32()
}
