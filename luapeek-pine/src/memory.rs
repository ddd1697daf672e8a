use byteorder::{ByteOrder, LittleEndian};

use crate::error::Result;

/// Byte runs longer than this grow as they are read.
const PREALLOCATE_LIMIT: usize = 0x1_0000;

/// Random access to the target's address space.
///
/// All values are little-endian. Implementors provide the eight fixed-width
/// accessors; floats and byte runs are built on top of them.
pub trait Memory {
    fn read_u8(&mut self, address: u32) -> Result<u8>;
    fn read_u16(&mut self, address: u32) -> Result<u16>;
    fn read_u32(&mut self, address: u32) -> Result<u32>;
    fn read_u64(&mut self, address: u32) -> Result<u64>;

    fn write_u8(&mut self, address: u32, value: u8) -> Result<()>;
    fn write_u16(&mut self, address: u32, value: u16) -> Result<()>;
    fn write_u32(&mut self, address: u32, value: u32) -> Result<()>;
    fn write_u64(&mut self, address: u32, value: u64) -> Result<()>;

    fn read_f32(&mut self, address: u32) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32(address)?))
    }

    fn write_f32(&mut self, address: u32, value: f32) -> Result<()> {
        self.write_u32(address, value.to_bits())
    }

    /// Reads `len` bytes as 8-byte accesses followed by single-byte accesses
    /// for the tail.
    fn read_bytes(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len.min(PREALLOCATE_LIMIT));
        let mut cursor = address;
        for _ in 0..len / 8 {
            out.extend_from_slice(&self.read_u64(cursor)?.to_le_bytes());
            cursor = cursor.wrapping_add(8);
        }
        for _ in 0..len % 8 {
            out.push(self.read_u8(cursor)?);
            cursor = cursor.wrapping_add(1);
        }
        Ok(out)
    }

    fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let mut cursor = address;
        let mut chunks = data.chunks_exact(8);
        for chunk in &mut chunks {
            self.write_u64(cursor, LittleEndian::read_u64(chunk))?;
            cursor = cursor.wrapping_add(8);
        }
        for &byte in chunks.remainder() {
            self.write_u8(cursor, byte)?;
            cursor = cursor.wrapping_add(1);
        }
        Ok(())
    }
}

macro_rules! forward_memory {
    ($($ty:ty),*) => {$(
        impl<M: Memory + ?Sized> Memory for $ty {
            fn read_u8(&mut self, address: u32) -> Result<u8> {
                (**self).read_u8(address)
            }
            fn read_u16(&mut self, address: u32) -> Result<u16> {
                (**self).read_u16(address)
            }
            fn read_u32(&mut self, address: u32) -> Result<u32> {
                (**self).read_u32(address)
            }
            fn read_u64(&mut self, address: u32) -> Result<u64> {
                (**self).read_u64(address)
            }
            fn write_u8(&mut self, address: u32, value: u8) -> Result<()> {
                (**self).write_u8(address, value)
            }
            fn write_u16(&mut self, address: u32, value: u16) -> Result<()> {
                (**self).write_u16(address, value)
            }
            fn write_u32(&mut self, address: u32, value: u32) -> Result<()> {
                (**self).write_u32(address, value)
            }
            fn write_u64(&mut self, address: u32, value: u64) -> Result<()> {
                (**self).write_u64(address, value)
            }
            fn read_f32(&mut self, address: u32) -> Result<f32> {
                (**self).read_f32(address)
            }
            fn write_f32(&mut self, address: u32, value: f32) -> Result<()> {
                (**self).write_f32(address, value)
            }
            fn read_bytes(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
                (**self).read_bytes(address, len)
            }
            fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<()> {
                (**self).write_bytes(address, data)
            }
        }
    )*};
}

forward_memory!(&mut M, Box<M>);
