use std::fmt;
use std::rc::Rc;

use luapeek_pine::Memory;

use crate::error::{Error, Result};
use crate::layout::{self, TVALUE_PAYLOAD};
use crate::object::{GcBody, GcRef};
use crate::snapshot::Snapshot;

/// Tag word of a value slot once the collector has reclaimed what it held.
pub const TAG_COLLECTED: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    Nil = 0,
    Boolean = 1,
    LightPointer = 2,
    Number = 3,
    String = 4,
    Table = 5,
    Function = 6,
    Userdata = 7,
    Thread = 8,
}

impl Tag {
    pub fn from_raw(raw: u32) -> Option<Tag> {
        Some(match raw {
            0 => Tag::Nil,
            1 => Tag::Boolean,
            2 => Tag::LightPointer,
            3 => Tag::Number,
            4 => Tag::String,
            5 => Tag::Table,
            6 => Tag::Function,
            7 => Tag::Userdata,
            8 => Tag::Thread,
            _ => return None,
        })
    }

    pub fn is_collectible(self) -> bool {
        self as u8 >= Tag::String as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Tag::Nil => "nil",
            Tag::Boolean => "boolean",
            Tag::LightPointer => "lightuserdata",
            Tag::Number => "number",
            Tag::String => "string",
            Tag::Table => "table",
            Tag::Function => "function",
            Tag::Userdata => "userdata",
            Tag::Thread => "thread",
        }
    }

    /// Name for a raw tag word, including the non-tag words found in memory.
    pub fn raw_name(raw: u32) -> &'static str {
        match Tag::from_raw(raw) {
            Some(tag) => tag.name(),
            None if raw == TAG_COLLECTED => "<<collected>>",
            None => "<<unknown>>",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a slot could not be turned into a live value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// The slot or the object it points to carries the collected sentinel.
    Collected,
    /// A collectible tag whose payload pointer is null.
    Null,
    /// The object's kind byte disagrees with the slot's tag.
    TagMismatch { expected: Tag, found: u8 },
    /// The pointer leaves no room for the object below the top of memory.
    OutOfRange { pointer: u32 },
}

/// A slot whose contents are stale or inconsistent. Ordinary while the target
/// runs, so it is a value rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invalid {
    pub address: u32,
    pub reason: InvalidReason,
}

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    LightPointer(u32),
    Number(f32),
    Object(GcRef),
    Invalid(Invalid),
}

impl Value {
    /// `None` for invalid values.
    pub fn tag(&self) -> Option<Tag> {
        match self {
            Value::Nil => Some(Tag::Nil),
            Value::Boolean(_) => Some(Tag::Boolean),
            Value::LightPointer(_) => Some(Tag::LightPointer),
            Value::Number(_) => Some(Tag::Number),
            Value::Object(obj) => Some(obj.tag()),
            Value::Invalid(_) => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Value::Invalid(_))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_number(&self) -> Option<f32> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&GcRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&crate::object::LuaString> {
        self.as_object().and_then(|obj| obj.as_string())
    }

    pub fn as_table(&self) -> Option<&crate::object::Table> {
        self.as_object().and_then(|obj| obj.as_table())
    }

    pub fn as_closure(&self) -> Option<&crate::object::Closure> {
        self.as_object().and_then(|obj| obj.as_closure())
    }

    /// Tag and payload word this value is stored as.
    pub fn encode(&self) -> Option<(Tag, u32)> {
        Some(match self {
            Value::Nil => (Tag::Nil, 0),
            Value::Boolean(b) => (Tag::Boolean, *b as u32),
            Value::LightPointer(p) => (Tag::LightPointer, *p),
            Value::Number(n) => (Tag::Number, n.to_bits()),
            Value::Object(obj) => (obj.tag(), obj.address),
            Value::Invalid(_) => return None,
        })
    }

    fn type_name(&self) -> &'static str {
        match self.tag() {
            Some(tag) => tag.name(),
            None => "<<invalid>>",
        }
    }
}

/// Objects compare by address. Numbers compare as floats.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::LightPointer(a), Value::LightPointer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.address == b.address,
            (Value::Invalid(a), Value::Invalid(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Number(value)
    }
}

impl From<GcRef> for Value {
    fn from(value: GcRef) -> Self {
        Value::Object(value)
    }
}

impl From<&GcRef> for Value {
    fn from(value: &GcRef) -> Self {
        Value::Object(Rc::clone(value))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::LightPointer(p) => write!(f, "lightuserdata${:08X}", p),
            Value::Number(n) => write!(f, "{}", n),
            Value::Object(obj) => match &obj.body {
                GcBody::String(s) => fmt::Display::fmt(s, f),
                GcBody::Table(t) => write!(
                    f,
                    "table${:08X}[a={},h={}]",
                    obj.address, t.array_size, t.node_count
                ),
                GcBody::Closure(c) => match c.native_function() {
                    Some(function) => write!(f, "cfunction${:08X}", function),
                    None => write!(f, "function${:08X}", obj.address),
                },
                GcBody::Userdata(u) => write!(f, "userdata${:08X}[{}]", obj.address, u.size),
                GcBody::Thread(_) => write!(f, "thread${:08X}", obj.address),
            },
            Value::Invalid(invalid) => match invalid.reason {
                InvalidReason::Collected => write!(f, "<<collected ${:08X}>>", invalid.address),
                InvalidReason::Null => write!(f, "<<null ${:08X}>>", invalid.address),
                InvalidReason::TagMismatch { expected, found } => write!(
                    f,
                    "<<corrupt ${:08X}: {} slot, kind {}>>",
                    invalid.address, expected, found
                ),
                InvalidReason::OutOfRange { pointer } => {
                    write!(f, "<<wild ${:08X} -> ${:08X}>>", invalid.address, pointer)
                }
            },
        }
    }
}

/// Lookup key for [`crate::Table::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key<'k> {
    /// 0-based slot of the array part, i.e. Lua key `i + 1`.
    Index(u32),
    Str(&'k [u8]),
}

impl From<u32> for Key<'_> {
    fn from(index: u32) -> Self {
        Key::Index(index)
    }
}

impl<'k> From<&'k str> for Key<'k> {
    fn from(name: &'k str) -> Self {
        Key::Str(name.as_bytes())
    }
}

impl<'k> From<&'k [u8]> for Key<'k> {
    fn from(name: &'k [u8]) -> Self {
        Key::Str(name)
    }
}

/// Handle to an 8-byte value slot in remote memory.
///
/// Holds nothing but the address: every accessor goes to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TValue {
    pub address: u32,
}

impl TValue {
    pub fn new(address: u32) -> Self {
        Self { address }
    }

    /// The raw tag word.
    pub fn tag<M: Memory + ?Sized>(&self, mem: &mut M) -> Result<u32> {
        Ok(mem.read_u32(self.address)?)
    }

    pub fn read<M: Memory + ?Sized>(&self, snap: &mut Snapshot<'_, M>) -> Result<Value> {
        snap.decode_value(self.address)
    }

    /// Stores `value`.
    ///
    /// With `tag = None` the slot keeps its current tag and `value` must be of
    /// that type; only the payload word is written. With `Some(tag)`, `value`
    /// must be of type `tag` and the whole slot is rewritten.
    pub fn set<M: Memory + ?Sized>(&self, mem: &mut M, value: &Value, tag: Option<Tag>) -> Result<()> {
        let (target, word) = self.check(mem, value, tag)?;
        log::debug!(
            "set ${:08X} := {} ({})",
            self.address,
            value,
            if tag.is_some() { "retagged" } else { "payload" }
        );
        self.store(mem, target, word, tag.is_some())
    }

    /// Writes a checked value: the whole slot when `retag`, else the payload.
    pub(crate) fn store<M: Memory + ?Sized>(&self, mem: &mut M, tag: Tag, word: u32, retag: bool) -> Result<()> {
        if retag {
            self.raw_set(mem, tag as u32, word)
        } else {
            let payload = layout::offset(self.address, TVALUE_PAYLOAD).ok_or(Error::AddressOverflow {
                address: self.address,
                offset: TVALUE_PAYLOAD,
            })?;
            Ok(mem.write_u32(payload, word)?)
        }
    }

    /// Validates a [`TValue::set`] without writing, returning the tag and
    /// payload to store.
    pub(crate) fn check<M: Memory + ?Sized>(
        &self,
        mem: &mut M,
        value: &Value,
        tag: Option<Tag>,
    ) -> Result<(Tag, u32)> {
        let target = match tag {
            Some(tag) => tag,
            None => {
                let raw = self.tag(mem)?;
                Tag::from_raw(raw).ok_or(Error::TypeMismatch {
                    address: self.address,
                    slot: Tag::raw_name(raw),
                    value: value.type_name(),
                })?
            }
        };

        match value.encode() {
            Some((actual, word)) if actual == target => Ok((target, word)),
            _ => Err(Error::TypeMismatch {
                address: self.address,
                slot: target.name(),
                value: value.type_name(),
            }),
        }
    }

    /// Copies the tag and payload words of `other` into this slot.
    pub fn copy_from<M: Memory + ?Sized>(&self, mem: &mut M, other: TValue) -> Result<()> {
        let word = mem.read_u64(other.address)?;
        log::debug!("copy ${:08X} <- ${:08X}", self.address, other.address);
        Ok(mem.write_u64(self.address, word)?)
    }

    /// Writes tag and payload as one 64-bit access so the slot never pairs a
    /// new tag with a stale payload.
    pub fn raw_set<M: Memory + ?Sized>(&self, mem: &mut M, tag: u32, word: u32) -> Result<()> {
        Ok(mem.write_u64(self.address, (word as u64) << 32 | tag as u64)?)
    }
}
