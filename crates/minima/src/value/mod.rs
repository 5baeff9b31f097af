// Runtime value representation and compiled chunk storage.

pub mod chunk;
pub mod chunk_serializer;
pub mod value;

pub use chunk::{Chunk, CmdSlot, Const, DebugInfo, disasm};
pub use chunk_serializer::{MX_VERSION, Program};
pub use value::{HeapId, Value, ValueKind, is_truthy, value_eq, value_len, write_value};
