// Runtime: interned symbols and lexical scope frames.
// Frames form a parent chain; popped frames go on a freelist and are reused
// for allocation locality. A block value may capture a ScopeId (modules use
// detached frames pinned until shutdown).

use ahash::AHashMap;
use smol_str::SmolStr;

use crate::heap::Heap;
use crate::value::value::Value;

/// Interned symbol id, stable for the runtime's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymId(pub u32);

/// Scope frame id into the runtime's frame arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

#[derive(Default)]
pub struct Interner {
    map: AHashMap<SmolStr, u32>,
    names: Vec<SmolStr>,
}

impl Interner {
    pub fn new() -> Interner {
        Interner::default()
    }

    pub fn intern(&mut self, name: &str) -> SymId {
        if let Some(&id) = self.map.get(name) {
            return SymId(id);
        }
        let id = self.names.len() as u32;
        let s = SmolStr::new(name);
        self.names.push(s.clone());
        self.map.insert(s, id);
        SymId(id)
    }

    pub fn lookup(&self, name: &str) -> Option<SymId> {
        self.map.get(name).map(|&id| SymId(id))
    }

    pub fn name(&self, id: SymId) -> &str {
        self.names.get(id.0 as usize).map_or("", |s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

struct Frame {
    vars: Vec<(SymId, Value)>,
    parent: Option<ScopeId>,
}

/// Owns the heap, the symbol table and the scope-frame arena. One root
/// frame exists for the runtime's lifetime; `current` tracks the top of the
/// active chain.
pub struct Runtime {
    pub heap: Heap,
    pub syms: Interner,
    frames: Vec<Frame>,
    free_frames: Vec<u32>,
    pub root: ScopeId,
    pub current: ScopeId,
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

impl Runtime {
    pub fn new() -> Runtime {
        let frames = vec![Frame { vars: Vec::new(), parent: None }];
        Runtime {
            heap: Heap::new(),
            syms: Interner::new(),
            frames,
            free_frames: Vec::new(),
            root: ScopeId(0),
            current: ScopeId(0),
        }
    }

    fn new_frame(&mut self, parent: Option<ScopeId>) -> ScopeId {
        if let Some(index) = self.free_frames.pop() {
            let f = &mut self.frames[index as usize];
            f.vars.clear();
            f.parent = parent;
            return ScopeId(index);
        }
        let index = self.frames.len() as u32;
        self.frames.push(Frame { vars: Vec::new(), parent });
        ScopeId(index)
    }

    /// Push a frame whose parent is the current scope.
    pub fn scope_push(&mut self) {
        let id = self.new_frame(Some(self.current));
        self.current = id;
    }

    /// Push a frame with an explicit lexical parent (call ABI: the parent is
    /// the callee block's captured environment, not the caller).
    pub fn scope_push_with_parent(&mut self, parent: Option<ScopeId>) {
        let id = self.new_frame(parent);
        self.current = id;
    }

    /// Pop the current frame, releasing its bindings. The root frame is
    /// never popped.
    pub fn scope_pop(&mut self) {
        if self.current == self.root {
            return;
        }
        let id = self.current;
        let parent = self.frames[id.0 as usize].parent;
        self.release_frame(id);
        self.current = parent.unwrap_or(self.root);
    }

    /// Create a frame outside the current chain (parent = none). Used for
    /// module environments; the caller keeps the id alive.
    pub fn scope_create_detached(&mut self) -> ScopeId {
        self.new_frame(None)
    }

    /// Release a frame's bindings and recycle it. Only for frames the
    /// caller owns (detached module envs at shutdown).
    pub fn release_frame(&mut self, id: ScopeId) {
        let vars = std::mem::take(&mut self.frames[id.0 as usize].vars);
        for (_, v) in vars {
            self.heap.release(v);
        }
        if id != self.root {
            self.free_frames.push(id.0);
        }
    }

    //----------------------------------------------------------
    // Variables
    //----------------------------------------------------------

    fn frame_get(&self, frame: ScopeId, sym: SymId) -> Option<Value> {
        self.frames[frame.0 as usize]
            .vars
            .iter()
            .find(|(s, _)| *s == sym)
            .map(|&(_, v)| v)
    }

    /// Look a symbol up along the scope chain starting at `current`.
    pub fn var_get(&self, sym: SymId) -> Option<Value> {
        self.var_get_in(self.current, sym)
    }

    pub fn var_get_in(&self, start: ScopeId, sym: SymId) -> Option<Value> {
        let mut frame = Some(start);
        while let Some(id) = frame {
            if let Some(v) = self.frame_get(id, sym) {
                return Some(v);
            }
            frame = self.frames[id.0 as usize].parent;
        }
        None
    }

    pub fn var_get_name(&self, name: &str) -> Option<Value> {
        let sym = self.syms.lookup(name)?;
        self.var_get(sym)
    }

    /// Look a symbol up in one frame only (no parent walk). Qualified
    /// member access uses this against a block's captured environment.
    pub fn var_get_from(&self, frame: ScopeId, sym: SymId) -> Option<Value> {
        self.frame_get(frame, sym)
    }

    /// Assign to the nearest existing binding; create in the current frame
    /// when no binding exists anywhere on the chain.
    pub fn var_set(&mut self, sym: SymId, v: Value) {
        let mut frame = Some(self.current);
        while let Some(id) = frame {
            let index = self.frames[id.0 as usize].vars.iter().position(|(s, _)| *s == sym);
            if let Some(index) = index {
                self.heap.retain(v);
                let old = std::mem::replace(&mut self.frames[id.0 as usize].vars[index].1, v);
                self.heap.release(old);
                return;
            }
            frame = self.frames[id.0 as usize].parent;
        }
        self.define_in(self.current, sym, v);
    }

    /// Create (or overwrite) a binding in the current frame only.
    pub fn var_define(&mut self, sym: SymId, v: Value) {
        self.define_in(self.current, sym, v);
    }

    /// Define-or-assign inside an explicit frame; module registration and
    /// STORE_MEMBER land here.
    pub fn var_set_from(&mut self, frame: ScopeId, sym: SymId, v: Value) {
        self.define_in(frame, sym, v);
    }

    fn define_in(&mut self, frame: ScopeId, sym: SymId, v: Value) {
        let index = self.frames[frame.0 as usize].vars.iter().position(|(s, _)| *s == sym);
        self.heap.retain(v);
        match index {
            Some(index) => {
                let old = std::mem::replace(&mut self.frames[frame.0 as usize].vars[index].1, v);
                self.heap.release(old);
            }
            None => self.frames[frame.0 as usize].vars.push((sym, v)),
        }
    }

    /// Release every frame still holding bindings. Called once from VM
    /// shutdown; afterwards heap stats report leaks only.
    pub fn shutdown(&mut self) {
        for index in 0..self.frames.len() {
            let vars = std::mem::take(&mut self.frames[index].vars);
            for (_, v) in vars {
                self.heap.release(v);
            }
        }
        self.current = self.root;
    }
}
