//! luapeek-pine
//!
//! A small client for the PINE memory-access protocol spoken by emulators such
//! as PCSX2. Every call is one request/response round trip against absolute
//! addresses in the emulated process; nothing is retried here.
//!
//! The [`Memory`] trait is the seam the rest of the workspace is written
//! against. [`Pine`] implements it over a live connection, [`MemoryImage`]
//! over a sparse in-memory byte map.

mod error;
mod image;
mod memory;
mod protocol;
mod shared;

pub use error::{Error, Result};
pub use image::MemoryImage;
pub use memory::Memory;
pub use protocol::{GameInfo, Opcode, Pine, Stream, MAX_REPLY_LEN, STATUS_FAIL};
pub use shared::SharedMemory;
