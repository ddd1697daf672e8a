use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;
use crate::memory::Memory;

/// A [`Memory`] that several owners can drive from different threads.
///
/// Each access takes the lock for the duration of one call. Byte runs hold it
/// for the whole run, so a buffer read is never interleaved with another
/// owner's traffic.
pub struct SharedMemory<M> {
    inner: Arc<Mutex<M>>,
}

impl<M> Clone for SharedMemory<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Memory> SharedMemory<M> {
    pub fn new(memory: M) -> Self {
        Self {
            inner: Arc::new(Mutex::new(memory)),
        }
    }

    /// Runs `f` with exclusive access for a multi-step sequence.
    pub fn with<T>(&self, f: impl FnOnce(&mut M) -> T) -> T {
        f(&mut self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, M> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<M: Memory> Memory for SharedMemory<M> {
    fn read_u8(&mut self, address: u32) -> Result<u8> {
        self.lock().read_u8(address)
    }

    fn read_u16(&mut self, address: u32) -> Result<u16> {
        self.lock().read_u16(address)
    }

    fn read_u32(&mut self, address: u32) -> Result<u32> {
        self.lock().read_u32(address)
    }

    fn read_u64(&mut self, address: u32) -> Result<u64> {
        self.lock().read_u64(address)
    }

    fn write_u8(&mut self, address: u32, value: u8) -> Result<()> {
        self.lock().write_u8(address, value)
    }

    fn write_u16(&mut self, address: u32, value: u16) -> Result<()> {
        self.lock().write_u16(address, value)
    }

    fn write_u32(&mut self, address: u32, value: u32) -> Result<()> {
        self.lock().write_u32(address, value)
    }

    fn write_u64(&mut self, address: u32, value: u64) -> Result<()> {
        self.lock().write_u64(address, value)
    }

    fn read_bytes(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.lock().read_bytes(address, len)
    }

    fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.lock().write_bytes(address, data)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::MemoryImage;

    #[test]
    fn clones_share_one_target() {
        let mut image = MemoryImage::new();
        image.map(0x100, 8);
        let shared = SharedMemory::new(image);

        let workers: Vec<_> = (0..4u32)
            .map(|i| {
                let mut mem = shared.clone();
                thread::spawn(move || mem.write_u16(0x100 + i * 2, 0x1111 * (i as u16 + 1)))
            })
            .collect();
        for worker in workers {
            worker.join().unwrap().unwrap();
        }

        let mut mem = shared.clone();
        assert_eq!(mem.read_u64(0x100).unwrap(), 0x4444_3333_2222_1111);
        assert_eq!(shared.with(|image| image.write_count()), 4);
    }
}
