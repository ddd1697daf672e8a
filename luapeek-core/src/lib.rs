//! luapeek-core
//!
//! Reads and edits the heap of a Lua 5.0 virtual machine running inside an
//! emulated 32-bit target, one memory access at a time.
//!
//! - [`Snapshot`] decodes tagged values and heap objects for one pass.
//! - [`opcode`] packs and unpacks VM instruction words and renders them.
//! - [`Closure::patch`] and friends rewrite constants and bytecode in place.
//! - [`Session`] guards access behind configurable probes and rebinds when the
//!   VM is recreated.

pub mod dump;
mod error;
pub mod layout;
pub mod object;
pub mod opcode;
mod patch;
pub mod session;
mod snapshot;
pub mod value;

#[cfg(test)]
mod test_util;

pub use dump::{Dumper, Seen, DEFAULT_MAX_DEPTH};
pub use error::{Error, Result};
pub use layout::Layout;
pub use object::{Closure, GcBody, GcObject, GcRef, LuaString, Proto, Table, Thread, Userdata};
pub use opcode::{Instruction, OpCode, Operands};
pub use patch::Edit;
pub use session::{BindState, Check, Globals, Hook, Probe, Session, SessionConfig};
pub use snapshot::Snapshot;
pub use value::{Invalid, Key, TValue, Tag, Value};

pub use luapeek_pine::Memory;
