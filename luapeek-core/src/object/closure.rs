use luapeek_pine::Memory;

use crate::error::{Error, Result};
use crate::layout::{self, Layout, TVALUE_SIZE};
use crate::opcode::{self, Instruction};
use crate::snapshot::Snapshot;
use crate::value::{TValue, Value};

#[derive(Debug, Clone)]
pub struct Closure {
    pub address: u32,
    pub upvalue_count: u8,
    pub kind: ClosureKind,
}

#[derive(Debug, Clone)]
pub enum ClosureKind {
    /// Host function; only its entry point is known.
    Native { function: u32 },
    Script { proto: Proto, env: TValue },
}

/// Compiled function body: constant pool and instruction stream.
#[derive(Debug, Clone)]
pub struct Proto {
    pub address: u32,
    pub constants: u32,
    pub constant_count: u32,
    pub code: u32,
    pub code_count: u32,
    /// Register limit for RK operands.
    pub registers: u32,
}

impl Proto {
    /// `address` must leave room for [`Layout::proto_extent`].
    fn read<M: Memory + ?Sized>(mem: &mut M, layout: &Layout, address: u32) -> Result<Self> {
        let l = &layout.proto;
        Ok(Self {
            address,
            constants: mem.read_u32(address + l.constants)?,
            constant_count: mem.read_u32(address + l.constant_count)?,
            code: mem.read_u32(address + l.code)?,
            code_count: mem.read_u32(address + l.code_count)?,
            registers: layout.rk_registers,
        })
    }

    /// `None` past the pool, or when the slot would lie beyond the top of
    /// memory.
    pub fn constant(&self, index: u32) -> Option<TValue> {
        if index >= self.constant_count {
            return None;
        }
        layout::element(self.constants, index, TVALUE_SIZE).map(TValue::new)
    }

    pub fn constant_slots(&self) -> impl Iterator<Item = TValue> + '_ {
        (0..self.constant_count).map_while(|i| self.constant(i))
    }

    pub fn code_address(&self, pc: u32) -> Option<u32> {
        if pc >= self.code_count {
            return None;
        }
        layout::element(self.code, pc, 4)
    }

    pub fn read_constants<M: Memory + ?Sized>(&self, snap: &mut Snapshot<'_, M>) -> Result<Vec<Value>> {
        self.constant_slots().map(|k| k.read(snap)).collect()
    }

    /// Fetches the whole instruction stream in one chunked read.
    pub fn read_code<M: Memory + ?Sized>(&self, mem: &mut M) -> Result<Vec<Instruction>> {
        if layout::element(self.code, self.code_count, 4).is_none() {
            return Err(Error::AddressOverflow {
                address: self.code,
                offset: self.code_count.saturating_mul(4),
            });
        }
        let bytes = mem.read_bytes(self.code, self.code_count as usize * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|w| Instruction::decode(u32::from_le_bytes([w[0], w[1], w[2], w[3]])))
            .collect())
    }
}

impl Closure {
    /// `address` must leave room for the closure's [`Layout::extent`]. `None`
    /// when the prototype pointer does not leave room for a prototype.
    pub(crate) fn read<M: Memory + ?Sized>(mem: &mut M, layout: &Layout, address: u32) -> Result<Option<Self>> {
        let l = &layout.closure;
        let is_native = mem.read_u8(address + l.is_native)? != 0;
        let upvalue_count = mem.read_u8(address + l.upvalue_count)?;

        let kind = if is_native {
            ClosureKind::Native {
                function: mem.read_u32(address + l.function)?,
            }
        } else {
            let proto = mem.read_u32(address + l.proto)?;
            if layout::offset(proto, layout.proto_extent()).is_none() {
                log::debug!("closure ${:08X} has wild prototype ${:08X}", address, proto);
                return Ok(None);
            }
            ClosureKind::Script {
                proto: Proto::read(mem, layout, proto)?,
                env: TValue::new(address + l.env),
            }
        };

        Ok(Some(Self {
            address,
            upvalue_count,
            kind,
        }))
    }

    pub fn is_native(&self) -> bool {
        matches!(self.kind, ClosureKind::Native { .. })
    }

    pub fn native_function(&self) -> Option<u32> {
        match self.kind {
            ClosureKind::Native { function } => Some(function),
            ClosureKind::Script { .. } => None,
        }
    }

    pub fn proto(&self) -> Option<&Proto> {
        match &self.kind {
            ClosureKind::Script { proto, .. } => Some(proto),
            ClosureKind::Native { .. } => None,
        }
    }

    pub fn env(&self) -> Option<TValue> {
        match self.kind {
            ClosureKind::Script { env, .. } => Some(env),
            ClosureKind::Native { .. } => None,
        }
    }

    /// The prototype, or [`Error::NativeClosure`] for host functions.
    pub fn script(&self) -> Result<&Proto> {
        self.proto().ok_or(Error::NativeClosure {
            address: self.address,
        })
    }

    /// One line per instruction, constants decoded once for the whole body.
    pub fn disassemble<M: Memory + ?Sized>(&self, snap: &mut Snapshot<'_, M>) -> Result<Vec<String>> {
        let proto = self.script()?;
        let constants = proto.read_constants(snap)?;
        let code = proto.read_code(snap.memory())?;
        Ok(code
            .iter()
            .enumerate()
            .map(|(pc, &inst)| opcode::disassemble(inst, &constants, proto.registers, pc as u32))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::layout::Layout;
    use crate::opcode::{Instruction, OpCode};
    use crate::test_util::{HeapBuilder, Slot};
    use crate::value::{Tag, Value};
    use crate::{Error, Snapshot};

    #[test]
    fn loadk_renders_its_constant() {
        let mut heap = HeapBuilder::new();
        let hello = heap.string("hello");
        let loadk = Instruction::abx(OpCode::LoadK, 0, 0).unwrap();
        let ret = Instruction::abc(OpCode::Return, 0, 1, 0).unwrap();
        let f = heap.script_closure(&[Slot::Obj(Tag::String, hello)], &[loadk.0, ret.0], Slot::Nil);

        let layout = Layout::default();
        let mut snap = Snapshot::new(&mut heap.image, &layout);
        let obj = snap.decode_object(f).unwrap().unwrap();
        let lines = obj.as_closure().unwrap().disassemble(&mut snap).unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "    LOADK r0 := k0 (\"hello\")");
        assert!(lines[1].trim_start().starts_with("RETURN"));
    }

    #[test]
    fn native_closure_has_no_body() {
        let mut heap = HeapBuilder::new();
        let f = heap.native_closure(0x0020_1234);

        let layout = Layout::default();
        let mut snap = Snapshot::new(&mut heap.image, &layout);
        let obj = snap.decode_object(f).unwrap().unwrap();
        let closure = obj.as_closure().unwrap();

        assert!(closure.is_native());
        assert_eq!(closure.native_function(), Some(0x0020_1234));
        assert!(closure.env().is_none());
        assert!(matches!(
            closure.disassemble(&mut snap),
            Err(Error::NativeClosure { .. })
        ));
        assert_eq!(Value::Object(obj.clone()).to_string(), "cfunction$00201234");
    }
}
