use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::memory::Memory;
use crate::protocol::{Opcode, STATUS_FAIL};

/// A sparse, in-process address space.
///
/// Only mapped bytes are accessible; touching anything else fails the same way
/// a refused PINE request does. Every accepted access through [`Memory`] is
/// counted so callers can check how much traffic an operation would cost
/// against a live target.
#[derive(Debug, Clone, Default)]
pub struct MemoryImage {
    bytes: BTreeMap<u32, u8>,
    reads: usize,
    writes: usize,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `len` zeroed bytes at `address`. Already mapped bytes keep their
    /// contents.
    pub fn map(&mut self, address: u32, len: usize) -> &mut Self {
        let mut cursor = address;
        for _ in 0..len {
            self.bytes.entry(cursor).or_insert(0);
            cursor = cursor.wrapping_add(1);
        }
        self
    }

    pub fn unmap(&mut self, address: u32, len: usize) -> &mut Self {
        let mut cursor = address;
        for _ in 0..len {
            self.bytes.remove(&cursor);
            cursor = cursor.wrapping_add(1);
        }
        self
    }

    /// Maps and fills `data` at `address` without counting it as a write.
    pub fn load(&mut self, address: u32, data: &[u8]) -> &mut Self {
        let mut cursor = address;
        for &byte in data {
            self.bytes.insert(cursor, byte);
            cursor = cursor.wrapping_add(1);
        }
        self
    }

    pub fn put_u8(&mut self, address: u32, value: u8) -> &mut Self {
        self.load(address, &[value])
    }

    pub fn put_u32(&mut self, address: u32, value: u32) -> &mut Self {
        self.load(address, &value.to_le_bytes())
    }

    pub fn put_f32(&mut self, address: u32, value: f32) -> &mut Self {
        self.put_u32(address, value.to_bits())
    }

    pub fn is_mapped(&self, address: u32) -> bool {
        self.bytes.contains_key(&address)
    }

    /// Reads mapped bytes without going through the access counters.
    pub fn peek(&self, address: u32, len: usize) -> Option<Vec<u8>> {
        let mut cursor = address;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(*self.bytes.get(&cursor)?);
            cursor = cursor.wrapping_add(1);
        }
        Some(out)
    }

    pub fn read_count(&self) -> usize {
        self.reads
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn fetch<const N: usize>(&mut self, opcode: Opcode, address: u32) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        let bytes = self.peek(address, N).ok_or(Error::Status {
            opcode,
            address,
            status: STATUS_FAIL,
        })?;
        out.copy_from_slice(&bytes);
        self.reads += 1;
        Ok(out)
    }

    fn store(&mut self, opcode: Opcode, address: u32, value: &[u8]) -> Result<()> {
        if self.peek(address, value.len()).is_none() {
            return Err(Error::Status {
                opcode,
                address,
                status: STATUS_FAIL,
            });
        }
        self.load(address, value);
        self.writes += 1;
        Ok(())
    }
}

impl Memory for MemoryImage {
    fn read_u8(&mut self, address: u32) -> Result<u8> {
        Ok(u8::from_le_bytes(self.fetch(Opcode::Read8, address)?))
    }

    fn read_u16(&mut self, address: u32) -> Result<u16> {
        Ok(u16::from_le_bytes(self.fetch(Opcode::Read16, address)?))
    }

    fn read_u32(&mut self, address: u32) -> Result<u32> {
        Ok(u32::from_le_bytes(self.fetch(Opcode::Read32, address)?))
    }

    fn read_u64(&mut self, address: u32) -> Result<u64> {
        Ok(u64::from_le_bytes(self.fetch(Opcode::Read64, address)?))
    }

    fn write_u8(&mut self, address: u32, value: u8) -> Result<()> {
        self.store(Opcode::Write8, address, &[value])
    }

    fn write_u16(&mut self, address: u32, value: u16) -> Result<()> {
        self.store(Opcode::Write16, address, &value.to_le_bytes())
    }

    fn write_u32(&mut self, address: u32, value: u32) -> Result<()> {
        self.store(Opcode::Write32, address, &value.to_le_bytes())
    }

    fn write_u64(&mut self, address: u32, value: u64) -> Result<()> {
        self.store(Opcode::Write64, address, &value.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn unmapped_access_fails_like_a_refused_request() {
        let mut image = MemoryImage::new();
        image.map(0x1000, 4);
        assert!(matches!(
            image.read_u64(0x1000),
            Err(Error::Status {
                opcode: Opcode::Read64,
                address: 0x1000,
                ..
            })
        ));
        assert!(image.write_u32(0x1002, 7).is_err());
        assert_eq!(image.write_count(), 0);
        assert_eq!(image.peek(0x1000, 4), Some(vec![0, 0, 0, 0]));
    }

    #[test]
    fn float_round_trips_through_u32() {
        let mut image = MemoryImage::new();
        image.map(0x40, 4);
        image.write_f32(0x40, -2.25).unwrap();
        assert_eq!(image.read_u32(0x40).unwrap(), (-2.25f32).to_bits());
        assert_eq!(image.read_f32(0x40).unwrap(), -2.25);
    }

    #[test]
    fn byte_runs_are_chunked() {
        let mut image = MemoryImage::new();
        image.load(0x200, b"0123456789abc");
        assert_eq!(image.read_bytes(0x200, 13).unwrap(), b"0123456789abc".to_vec());
        // one 8-byte access plus five single-byte accesses
        assert_eq!(image.read_count(), 6);

        image.write_bytes(0x200, b"ABCDEFGHIJ").unwrap();
        assert_eq!(image.write_count(), 3);
        assert_eq!(image.peek(0x200, 13), Some(b"ABCDEFGHIJabc".to_vec()));
    }
}
