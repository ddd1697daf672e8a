use std::collections::HashMap;
use std::rc::Rc;

use luapeek_pine::Memory;

use crate::error::{Error, Result};
use crate::layout::{self, Layout};
use crate::object::{Closure, GcBody, GcObject, GcRef, LuaString, Table, Thread, Userdata, KIND_COLLECTED};
use crate::value::{Invalid, InvalidReason, Tag, Value, TAG_COLLECTED};

/// Outcome of reading an object header.
enum Loaded {
    Object(GcRef),
    Collected,
    /// Kind byte of a non-collectible type.
    Primitive(u8),
    /// The object, or a structure it owns, would run past the top of memory.
    OutOfRange,
}

/// One inspection pass over the target.
///
/// Objects decoded through a snapshot are cached by address, so a structure
/// reached twice is decoded once and both references share one [`GcRef`]. The
/// cache never notices remote changes; open a new snapshot (or [`clear`] this
/// one) once the target may have moved on.
///
/// [`clear`]: Snapshot::clear
pub struct Snapshot<'m, M: Memory + ?Sized> {
    mem: &'m mut M,
    layout: &'m Layout,
    cache: HashMap<u32, GcRef>,
}

impl<'m, M: Memory + ?Sized> Snapshot<'m, M> {
    pub fn new(mem: &'m mut M, layout: &'m Layout) -> Self {
        Self {
            mem,
            layout,
            cache: HashMap::new(),
        }
    }

    pub fn memory(&mut self) -> &mut M {
        &mut *self.mem
    }

    pub fn layout(&self) -> &Layout {
        self.layout
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Decodes the tagged value stored at `address`.
    ///
    /// Stale or inconsistent slots come back as [`Value::Invalid`]; only a tag
    /// word that no build of the VM can produce is an error.
    pub fn decode_value(&mut self, address: u32) -> Result<Value> {
        // tag and payload in one access
        let word = self.mem.read_u64(address)?;
        let raw = word as u32;
        let payload = (word >> 32) as u32;

        let tag = match Tag::from_raw(raw) {
            Some(tag) => tag,
            None if raw == TAG_COLLECTED => return Ok(invalid(address, InvalidReason::Collected)),
            None => return Err(Error::UnknownTag { address, tag: raw }),
        };

        Ok(match tag {
            Tag::Nil => Value::Nil,
            Tag::Boolean => Value::Boolean(payload != 0),
            Tag::LightPointer => Value::LightPointer(payload),
            Tag::Number => Value::Number(f32::from_bits(payload)),
            _ if payload == 0 => invalid(address, InvalidReason::Null),
            _ => match self.load(payload)? {
                Loaded::Object(obj) if obj.tag() == tag => Value::Object(obj),
                Loaded::Object(obj) => invalid(
                    address,
                    InvalidReason::TagMismatch {
                        expected: tag,
                        found: obj.tag() as u8,
                    },
                ),
                Loaded::Collected => invalid(address, InvalidReason::Collected),
                Loaded::Primitive(kind) => invalid(
                    address,
                    InvalidReason::TagMismatch {
                        expected: tag,
                        found: kind,
                    },
                ),
                Loaded::OutOfRange => invalid(address, InvalidReason::OutOfRange { pointer: payload }),
            },
        })
    }

    /// Decodes the object whose header is at `address`, or `None` when it has
    /// been collected or is not a collectible kind.
    pub fn decode_object(&mut self, address: u32) -> Result<Option<GcRef>> {
        Ok(match self.load(address)? {
            Loaded::Object(obj) => Some(obj),
            Loaded::Collected | Loaded::Primitive(_) | Loaded::OutOfRange => None,
        })
    }

    /// Decodes a thread, failing if the object is anything else.
    pub fn thread(&mut self, address: u32) -> Result<GcRef> {
        match self.decode_object(address)? {
            Some(obj) if obj.as_thread().is_some() => Ok(obj),
            _ => Err(Error::NotAThread { address }),
        }
    }

    fn load(&mut self, address: u32) -> Result<Loaded> {
        if let Some(obj) = self.cache.get(&address) {
            return Ok(Loaded::Object(Rc::clone(obj)));
        }

        let header = &self.layout.object;
        let Some(kind_at) = layout::offset(address, header.kind) else {
            return Ok(Loaded::OutOfRange);
        };
        let kind = self.mem.read_u8(kind_at)?;
        let tag = match kind {
            KIND_COLLECTED => return Ok(Loaded::Collected),
            _ => match Tag::from_raw(kind as u32) {
                Some(tag) if tag.is_collectible() => tag,
                Some(_) => return Ok(Loaded::Primitive(kind)),
                None => {
                    return Err(Error::UnknownTag {
                        address,
                        tag: kind as u32,
                    })
                }
            },
        };
        if layout::offset(address, self.layout.extent(tag)).is_none() {
            log::debug!("{} at ${:08X} runs past the top of memory", tag, address);
            return Ok(Loaded::OutOfRange);
        }

        // every field below lies inside the extent checked above
        let next = self.mem.read_u32(address + header.next)?;
        let layout = self.layout;
        let mem = &mut *self.mem;
        let body = match tag {
            Tag::String => GcBody::String(LuaString::read(mem, layout, address)?),
            Tag::Table => GcBody::Table(Table::read(mem, layout, address)?),
            Tag::Function => match Closure::read(mem, layout, address)? {
                Some(closure) => GcBody::Closure(closure),
                None => return Ok(Loaded::OutOfRange),
            },
            Tag::Userdata => GcBody::Userdata(Userdata::read(mem, layout, address)?),
            _ => match Thread::read(mem, layout, address)? {
                Some(thread) => GcBody::Thread(thread),
                None => return Ok(Loaded::OutOfRange),
            },
        };

        log::trace!("decoded {} at ${:08X}", tag, address);
        let obj = Rc::new(GcObject { address, next, body });
        self.cache.insert(address, Rc::clone(&obj));
        Ok(Loaded::Object(obj))
    }
}

fn invalid(address: u32, reason: InvalidReason) -> Value {
    Value::Invalid(Invalid { address, reason })
}
