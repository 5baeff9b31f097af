// Reference-counted heap.
// Objects live in a slot pool addressed by HeapId; freed slots go on a free
// list and are reused. There is no tracing collector: cycles leak, and the
// stats counter `bytes_live` must return to zero on shutdown for any
// program that does not construct cycles.

pub mod dict;

use std::rc::Rc;

use smol_str::SmolStr;

use crate::compiler::ast::FuncTypeSig;
use crate::runtime::ScopeId;
use crate::value::chunk::Chunk;
use crate::value::value::{HeapId, Value, value_eq};

pub use dict::{Dict, Entry, EntryState, Probe};

/// A block value: a compiled chunk bound to its captured lexical
/// environment. Invoking the block pushes a frame whose parent is `env`.
#[derive(Debug, Clone)]
pub struct Block {
    pub chunk: Rc<Chunk>,
    pub env: Option<ScopeId>,
    pub id: u32,
}

pub type NativeFn = fn(&mut crate::vm::Vm, &str, &[Value]) -> Value;

#[derive(Clone)]
pub enum CmdKind {
    Native { func: NativeFn },
    User { params: Vec<SmolStr>, body: Value },
}

/// A callable: either a host-native function or a user-defined command
/// wrapping a body block plus parameter metadata.
#[derive(Clone)]
pub struct Cmd {
    pub name: SmolStr,
    pub sig: Option<FuncTypeSig>,
    pub doc: SmolStr,
    pub kind: CmdKind,
}

impl std::fmt::Debug for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            CmdKind::Native { .. } => "native",
            CmdKind::User { .. } => "user",
        };
        write!(f, "Cmd({} {})", kind, self.name)
    }
}

#[derive(Debug)]
pub enum HeapData {
    /// Slot on the free list.
    Free,
    Str(Box<str>),
    List(Vec<Value>),
    Dict(Dict),
    Pair([Value; 2]),
    Block(Block),
    Cmd(Cmd),
}

struct Slot {
    refcount: u32,
    bytes: usize,
    data: HeapData,
}

/// Live-heap counters, checked by the ref-count discipline tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub bytes_live: usize,
    pub bytes_requested: usize,
    pub alloc_count: u64,
    pub free_count: u64,
    pub live_objects: usize,
}

pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    stats: HeapStats,
}

fn estimate_bytes(data: &HeapData) -> usize {
    let base = std::mem::size_of::<Slot>();
    base + match data {
        HeapData::Free => 0,
        HeapData::Str(s) => s.len(),
        HeapData::List(v) => v.capacity() * std::mem::size_of::<Value>(),
        HeapData::Dict(d) => d.capacity() * std::mem::size_of::<Entry>(),
        HeapData::Pair(_) => 0,
        HeapData::Block(_) => 0,
        HeapData::Cmd(c) => match &c.kind {
            CmdKind::User { params, .. } => params.len() * std::mem::size_of::<SmolStr>(),
            CmdKind::Native { .. } => 0,
        },
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl Heap {
    pub fn new() -> Heap {
        Heap { slots: Vec::new(), free: Vec::new(), stats: HeapStats::default() }
    }

    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    //----------------------------------------------------------
    // Allocation / refcounting
    //----------------------------------------------------------

    /// Allocate a slot with refcount 1. Values already stored inside `data`
    /// transfer their counts into the container.
    pub fn alloc(&mut self, data: HeapData) -> HeapId {
        let bytes = estimate_bytes(&data);
        self.stats.bytes_live += bytes;
        self.stats.bytes_requested += bytes;
        self.stats.alloc_count += 1;
        self.stats.live_objects += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.refcount = 1;
            slot.bytes = bytes;
            slot.data = data;
            return HeapId(index);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot { refcount: 1, bytes, data });
        HeapId(index)
    }

    pub fn alloc_str(&mut self, s: &str) -> Value {
        Value::Str(self.alloc(HeapData::Str(s.into())))
    }

    pub fn alloc_list(&mut self, items: Vec<Value>) -> Value {
        Value::List(self.alloc(HeapData::List(items)))
    }

    pub fn alloc_dict(&mut self) -> Value {
        Value::Dict(self.alloc(HeapData::Dict(Dict::new())))
    }

    pub fn alloc_pair(&mut self, items: [Value; 2]) -> Value {
        Value::Pair(self.alloc(HeapData::Pair(items)))
    }

    pub fn alloc_block(&mut self, block: Block) -> Value {
        Value::Block(self.alloc(HeapData::Block(block)))
    }

    pub fn alloc_cmd(&mut self, cmd: Cmd) -> Value {
        Value::Cmd(self.alloc(HeapData::Cmd(cmd)))
    }

    pub fn retain(&mut self, v: Value) {
        if let Some(id) = v.owned_heap_id() {
            let slot = &mut self.slots[id.0 as usize];
            if !matches!(slot.data, HeapData::Free) {
                slot.refcount += 1;
            }
        }
    }

    /// Drop one reference. When the count reaches zero the payload is freed
    /// and every value it owned is released in turn (iteratively, so deep
    /// structures cannot overflow the host stack).
    pub fn release(&mut self, v: Value) {
        let Some(id) = v.owned_heap_id() else { return };
        let mut work = vec![id];

        while let Some(id) = work.pop() {
            let slot = &mut self.slots[id.0 as usize];
            if matches!(slot.data, HeapData::Free) || slot.refcount == 0 {
                continue;
            }
            slot.refcount -= 1;
            if slot.refcount != 0 {
                continue;
            }

            let data = std::mem::replace(&mut slot.data, HeapData::Free);
            self.stats.bytes_live -= slot.bytes;
            slot.bytes = 0;
            self.stats.free_count += 1;
            self.stats.live_objects -= 1;
            self.free.push(id.0);

            let mut push_child = |work: &mut Vec<HeapId>, v: Value| {
                if let Some(cid) = v.owned_heap_id() {
                    work.push(cid);
                }
            };

            match data {
                HeapData::Free | HeapData::Str(_) => {}
                HeapData::List(items) => {
                    for item in items {
                        push_child(&mut work, item);
                    }
                }
                HeapData::Dict(d) => {
                    for (k, v) in d.live_entries() {
                        push_child(&mut work, k);
                        push_child(&mut work, v);
                    }
                }
                HeapData::Pair(items) => {
                    push_child(&mut work, items[0]);
                    push_child(&mut work, items[1]);
                }
                HeapData::Block(_) => {}
                HeapData::Cmd(c) => {
                    if let CmdKind::User { body, .. } = c.kind {
                        push_child(&mut work, body);
                    }
                }
            }
        }
    }

    /// Ref-counted store: retain the new value, release whatever the slot
    /// held, then overwrite. Every long-lived store goes through here.
    pub fn assign(&mut self, slot: &mut Value, v: Value) {
        self.retain(v);
        let old = std::mem::replace(slot, v);
        self.release(old);
    }

    //----------------------------------------------------------
    // Accessors
    //----------------------------------------------------------

    fn data(&self, id: HeapId) -> Option<&HeapData> {
        let slot = self.slots.get(id.0 as usize)?;
        match slot.data {
            HeapData::Free => None,
            _ => Some(&slot.data),
        }
    }

    fn data_mut(&mut self, id: HeapId) -> Option<&mut HeapData> {
        let slot = self.slots.get_mut(id.0 as usize)?;
        match slot.data {
            HeapData::Free => None,
            _ => Some(&mut slot.data),
        }
    }

    pub fn str_value(&self, id: HeapId) -> Option<&str> {
        match self.data(id)? {
            HeapData::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn list(&self, id: HeapId) -> Option<&Vec<Value>> {
        match self.data(id)? {
            HeapData::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn list_mut(&mut self, id: HeapId) -> Option<&mut Vec<Value>> {
        match self.data_mut(id)? {
            HeapData::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn dict(&self, id: HeapId) -> Option<&Dict> {
        match self.data(id)? {
            HeapData::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn dict_mut(&mut self, id: HeapId) -> Option<&mut Dict> {
        match self.data_mut(id)? {
            HeapData::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn pair(&self, id: HeapId) -> Option<&[Value; 2]> {
        match self.data(id)? {
            HeapData::Pair(p) => Some(p),
            _ => None,
        }
    }

    pub fn pair_mut(&mut self, id: HeapId) -> Option<&mut [Value; 2]> {
        match self.data_mut(id)? {
            HeapData::Pair(p) => Some(p),
            _ => None,
        }
    }

    pub fn block(&self, id: HeapId) -> Option<&Block> {
        match self.data(id)? {
            HeapData::Block(b) => Some(b),
            _ => None,
        }
    }

    pub fn cmd(&self, id: HeapId) -> Option<&Cmd> {
        match self.data(id)? {
            HeapData::Cmd(c) => Some(c),
            _ => None,
        }
    }

    /// Append with a retain; LIST_PUSH and the list literal path use this.
    pub fn list_push(&mut self, list: HeapId, v: Value) -> bool {
        self.retain(v);
        match self.list_mut(list) {
            Some(items) => {
                items.push(v);
                true
            }
            None => {
                self.release(v);
                false
            }
        }
    }

    //----------------------------------------------------------
    // Dict operations
    //----------------------------------------------------------

    pub fn hash_key(&self, key: Value) -> u64 {
        use std::hash::BuildHasher;
        // Fixed seeds keep probing deterministic within a process run.
        let hasher = ahash::RandomState::with_seeds(
            0x00c0_ffee,
            0x2545_f491,
            0x9e37_79b9,
            0x85eb_ca6b,
        );
        match key {
            Value::Void => hasher.hash_one((0u8, 0u64)),
            Value::Int(i) => hasher.hash_one((1u8, i)),
            Value::Float(f) => {
                let f = if f == 0.0 { 0.0 } else { f };
                // Whole floats hash like the equal int so 1 and 1.0 probe
                // to the same bucket (keys compare on promoted doubles).
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    hasher.hash_one((1u8, f as i64))
                } else {
                    hasher.hash_one((2u8, f.to_bits()))
                }
            }
            Value::Bool(b) => hasher.hash_one((3u8, b as u64)),
            Value::Str(id) => match self.str_value(id) {
                Some(s) => hasher.hash_one((4u8, s)),
                None => hasher.hash_one((4u8, "")),
            },
            Value::Type(k) => hasher.hash_one((5u8, k.tag())),
            // Containers and callables key by identity.
            _ => hasher.hash_one((6u8, key.owned_heap_id().map_or(0, |id| id.0))),
        }
    }

    pub fn dict_get(&self, dict: HeapId, key: Value) -> Option<Value> {
        let d = self.dict(dict)?;
        if d.capacity() == 0 {
            return None;
        }
        let hash = self.hash_key(key);
        match d.probe(hash, |e| value_eq(self, e.key, key)) {
            Probe::Existing(slot) => d.entry(slot).map(|e| e.value),
            Probe::Insert(_) => None,
        }
    }

    /// Insert or replace. Keys and values are retained by the table; a
    /// replaced value is released. Rehash invalidates outstanding KvRefs.
    pub fn dict_set(&mut self, dict: HeapId, key: Value, value: Value) -> bool {
        let hash = self.hash_key(key);

        let needs_grow = match self.dict(dict) {
            Some(d) => d.needs_grow(),
            None => return false,
        };
        if needs_grow {
            let new_cap = match self.dict(dict) {
                Some(d) => d.grown_capacity(),
                None => return false,
            };
            let Some(d) = self.dict_mut(dict) else { return false };
            d.rehash(new_cap);
        }

        let probe = {
            let Some(d) = self.dict(dict) else { return false };
            d.probe(hash, |e| value_eq(self, e.key, key))
        };

        match probe {
            Probe::Existing(slot) => {
                self.retain(value);
                let old = {
                    let Some(d) = self.dict_mut(dict) else { return false };
                    let Some(e) = d.entry_mut(slot) else { return false };
                    std::mem::replace(&mut e.value, value)
                };
                self.release(old);
            }
            Probe::Insert(slot) => {
                self.retain(key);
                self.retain(value);
                let Some(d) = self.dict_mut(dict) else { return false };
                d.insert_at(slot, hash, key, value);
            }
        }
        true
    }

    /// Remove a key, releasing the entry's key and value. The entry slot
    /// becomes a tombstone; other entry indices stay valid.
    pub fn dict_remove(&mut self, dict: HeapId, key: Value) -> bool {
        let hash = self.hash_key(key);
        let slot = {
            let Some(d) = self.dict(dict) else { return false };
            if d.capacity() == 0 {
                return false;
            }
            match d.probe(hash, |e| value_eq(self, e.key, key)) {
                Probe::Existing(slot) => slot,
                Probe::Insert(_) => return false,
            }
        };
        let removed = {
            let Some(d) = self.dict_mut(dict) else { return false };
            d.remove_at(slot)
        };
        match removed {
            Some((k, v)) => {
                self.release(k);
                self.release(v);
                true
            }
            None => false,
        }
    }

    /// Read one side of a live dict entry through a KvRef: 0 = key,
    /// 1 = value. Dead or out-of-range entries yield None.
    pub fn kvref_index(&self, dict: HeapId, entry_index: u32, side: i64) -> Option<Value> {
        let d = self.dict(dict)?;
        let e = d.entry(entry_index as usize)?;
        if e.state != EntryState::Live {
            return None;
        }
        match side {
            0 => Some(e.key),
            1 => Some(e.value),
            _ => None,
        }
    }
}
