//! In-place rewriting of script closures.
//!
//! The target keeps running while we write, so nothing here is atomic. What
//! is guaranteed: every precondition is checked before the first write, and a
//! staged [`Edit`] writes constants before the instructions that use them.

use luapeek_pine::Memory;

use crate::error::{Error, Result};
use crate::layout;
use crate::object::{Closure, Proto};
use crate::opcode::Instruction;
use crate::value::{TValue, Tag, Value};

impl Closure {
    /// Stores `value` into constant `index`. See [`TValue::set`] for `tag`.
    pub fn set_constant<M: Memory + ?Sized>(
        &self,
        mem: &mut M,
        index: u32,
        value: impl Into<Value>,
        tag: Option<Tag>,
    ) -> Result<()> {
        let slot = constant_slot(self.script()?, index)?;
        slot.set(mem, &value.into(), tag)
    }

    /// Overwrites instructions `start..start + instructions.len()`.
    pub fn patch<M: Memory + ?Sized>(&self, mem: &mut M, start: u32, instructions: &[Instruction]) -> Result<()> {
        let proto = self.script()?;
        check_range(proto, start, instructions.len())?;
        write_code(mem, proto, start, instructions)
    }

    /// Stages a group of constant and instruction changes through `f`, then
    /// validates and applies them together.
    ///
    /// Nothing is written if `f` fails or any staged change is rejected.
    pub fn edit<M, F>(&self, mem: &mut M, f: F) -> Result<()>
    where
        M: Memory + ?Sized,
        F: FnOnce(&mut Edit<'_>) -> Result<()>,
    {
        let mut edit = Edit {
            proto: self.script()?,
            constants: Vec::new(),
            code: Vec::new(),
        };
        f(&mut edit)?;
        edit.apply(mem)
    }
}

fn constant_slot(proto: &Proto, index: u32) -> Result<TValue> {
    proto.constant(index).ok_or(Error::ConstantOutOfRange {
        index,
        size: proto.constant_count,
    })
}

fn check_range(proto: &Proto, start: u32, len: usize) -> Result<()> {
    let len = len as u32;
    let end = match start.checked_add(len) {
        Some(end) if end <= proto.code_count => end,
        _ => {
            return Err(Error::PatchOutOfRange {
                start,
                len,
                size: proto.code_count,
            })
        }
    };
    if layout::element(proto.code, end, 4).is_none() {
        return Err(Error::AddressOverflow {
            address: proto.code,
            offset: end.saturating_mul(4),
        });
    }
    Ok(())
}

fn write_code<M: Memory + ?Sized>(mem: &mut M, proto: &Proto, start: u32, instructions: &[Instruction]) -> Result<()> {
    for (offset, inst) in instructions.iter().enumerate() {
        let pc = start + offset as u32;
        log::debug!("patch ${:08X}+{:03}: {:?}", proto.address, pc, inst);
        let address = proto.code_address(pc).ok_or(Error::AddressOverflow {
            address: proto.code,
            offset: pc.saturating_mul(4),
        })?;
        mem.write_u32(address, inst.0)?;
    }
    Ok(())
}

/// Changes staged against one prototype by [`Closure::edit`].
pub struct Edit<'p> {
    proto: &'p Proto,
    constants: Vec<(TValue, Value, Option<Tag>)>,
    code: Vec<(u32, Vec<Instruction>)>,
}

impl Edit<'_> {
    pub fn set_constant(&mut self, index: u32, value: impl Into<Value>, tag: Option<Tag>) -> Result<&mut Self> {
        let slot = constant_slot(self.proto, index)?;
        self.constants.push((slot, value.into(), tag));
        Ok(self)
    }

    pub fn patch(&mut self, start: u32, instructions: &[Instruction]) -> Result<&mut Self> {
        check_range(self.proto, start, instructions.len())?;
        self.code.push((start, instructions.to_vec()));
        Ok(self)
    }

    fn apply<M: Memory + ?Sized>(self, mem: &mut M) -> Result<()> {
        let mut checked = Vec::with_capacity(self.constants.len());
        for (slot, value, tag) in &self.constants {
            let (target, word) = slot.check(mem, value, *tag)?;
            checked.push((*slot, target, word, tag.is_some()));
        }

        log::debug!(
            "applying edit to ${:08X}: {} constants, {} code ranges",
            self.proto.address,
            checked.len(),
            self.code.len()
        );
        for (slot, tag, word, retag) in checked {
            slot.store(mem, tag, word, retag)?;
        }
        for (start, instructions) in &self.code {
            write_code(mem, self.proto, *start, instructions)?;
        }
        Ok(())
    }
}
