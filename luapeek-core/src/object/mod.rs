//! Collectible heap objects.
//!
//! Every object starts with the common header (`next` link, `kind` byte). The
//! bodies below are decoded by [`crate::Snapshot`] and hold addresses, counts
//! and slot handles only; anything larger is fetched when asked for.

use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use luapeek_pine::Memory;

use crate::error::{Error, Result};
use crate::layout::{self, Layout};
use crate::value::Tag;

mod closure;
mod table;
mod thread;

pub use closure::{Closure, ClosureKind, Proto};
pub use table::{Node, Table};
pub use thread::Thread;

/// Kind byte of an object header once the collector has reclaimed it.
pub const KIND_COLLECTED: u8 = 0xFF;

/// Shared handle to a decoded object. Two references to one address within a
/// pass are the same allocation.
pub type GcRef = Rc<GcObject>;

#[derive(Debug)]
pub struct GcObject {
    pub address: u32,
    pub next: u32,
    pub body: GcBody,
}

#[derive(Debug)]
pub enum GcBody {
    String(LuaString),
    Table(Table),
    Closure(Closure),
    Userdata(Userdata),
    Thread(Thread),
}

impl GcObject {
    pub fn tag(&self) -> Tag {
        match self.body {
            GcBody::String(_) => Tag::String,
            GcBody::Table(_) => Tag::Table,
            GcBody::Closure(_) => Tag::Function,
            GcBody::Userdata(_) => Tag::Userdata,
            GcBody::Thread(_) => Tag::Thread,
        }
    }

    pub fn as_string(&self) -> Option<&LuaString> {
        match &self.body {
            GcBody::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match &self.body {
            GcBody::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&Closure> {
        match &self.body {
            GcBody::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_userdata(&self) -> Option<&Userdata> {
        match &self.body {
            GcBody::Userdata(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_thread(&self) -> Option<&Thread> {
        match &self.body {
            GcBody::Thread(t) => Some(t),
            _ => None,
        }
    }
}

/// An interned byte string. The bytes are kept raw; text conversion is only
/// done for display.
#[derive(Debug, Clone)]
pub struct LuaString {
    pub address: u32,
    pub hash: u32,
    pub len: u32,
    pub data: u32,
    bytes: Option<Vec<u8>>,
}

impl LuaString {
    /// `address` must leave room for the string's [`Layout::extent`].
    pub(crate) fn read<M: Memory + ?Sized>(mem: &mut M, layout: &Layout, address: u32) -> Result<Self> {
        let l = &layout.string;
        let hash = mem.read_u32(address + l.hash)?;
        let len = mem.read_u32(address + l.len)?;
        let data = address + l.data;
        let bytes = if len > l.max_fetch {
            log::warn!("string ${:08X} claims {} bytes, not fetching", address, len);
            None
        } else if layout::offset(data, len).is_none() {
            log::warn!("string ${:08X} runs past the top of memory, not fetching", address);
            None
        } else {
            Some(mem.read_bytes(data, len as usize)?)
        };
        Ok(Self {
            address,
            hash,
            len,
            data,
            bytes,
        })
    }

    /// `None` when the string was too long to fetch.
    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    pub fn to_string_lossy(&self) -> Option<Cow<'_, str>> {
        self.bytes().map(String::from_utf8_lossy)
    }

    /// Rewrites the string contents in place, zero-filling past `bytes`.
    ///
    /// The stored length and hash are left alone, so the interned copy no
    /// longer matches lookups by its old text.
    pub fn overwrite<M: Memory + ?Sized>(&self, mem: &mut M, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.len as usize {
            return Err(Error::StringTooLong {
                address: self.address,
                len: bytes.len(),
                capacity: self.len,
            });
        }
        let mut padded = bytes.to_vec();
        padded.resize(self.len as usize, 0);
        log::debug!("overwrite string ${:08X} ({} bytes)", self.address, bytes.len());
        Ok(mem.write_bytes(self.data, &padded)?)
    }
}

impl fmt::Display for LuaString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_string_lossy() {
            Some(text) => write!(f, "{:?}", text),
            None => write!(f, "string${:08X}[len={}]", self.address, self.len),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Userdata {
    pub address: u32,
    pub metatable: Option<u32>,
    pub size: u32,
}

impl Userdata {
    /// `address` must leave room for the userdata's [`Layout::extent`].
    pub(crate) fn read<M: Memory + ?Sized>(mem: &mut M, layout: &Layout, address: u32) -> Result<Self> {
        let l = &layout.userdata;
        let metatable = mem.read_u32(address + l.metatable)?;
        Ok(Self {
            address,
            metatable: (metatable != 0).then_some(metatable),
            size: mem.read_u32(address + l.size)?,
        })
    }
}
