//! Host buffers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ivm_runtime::{VmError, VmResult};
use parking_lot::Mutex;

/// Bytes charged against a `HalModule` budget, returned on drop.
#[derive(Debug)]
pub(crate) struct Allocation {
    size: usize,
    live: Arc<AtomicUsize>,
}

impl Allocation {
    pub(crate) fn new(size: usize, live: Arc<AtomicUsize>) -> Self {
        Self { size, live }
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.live.fetch_sub(self.size, Ordering::AcqRel);
    }
}

/// Heap buffer of fixed length.
#[derive(Debug)]
pub struct Buffer {
    data: Mutex<Vec<u8>>,
    allocation: Option<Allocation>,
}

ivm_runtime::ref_object!(Buffer, "hal.buffer");

impl Buffer {
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; len]),
            allocation: None,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: Mutex::new(bytes.to_vec()),
            allocation: None,
        }
    }

    pub(crate) fn charged(mut self, allocation: Allocation) -> Self {
        self.allocation = Some(allocation);
        self
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Sets `length` bytes at `offset` to `pattern`.
    pub fn fill(&self, offset: usize, length: usize, pattern: u8) -> VmResult<()> {
        let mut data = self.data.lock();
        let range = checked_range(data.len(), offset, length)?;
        data[range].fill(pattern);
        Ok(())
    }

    pub fn read(&self, offset: usize, out: &mut [u8]) -> VmResult<()> {
        let data = self.data.lock();
        let range = checked_range(data.len(), offset, out.len())?;
        out.copy_from_slice(&data[range]);
        Ok(())
    }

    pub fn write(&self, offset: usize, bytes: &[u8]) -> VmResult<()> {
        let mut data = self.data.lock();
        let range = checked_range(data.len(), offset, bytes.len())?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Little-endian i32 at `offset`.
    pub fn load_i32(&self, offset: usize) -> VmResult<i32> {
        let mut raw = [0u8; 4];
        self.read(offset, &mut raw)?;
        Ok(i32::from_le_bytes(raw))
    }

    pub fn store_i32(&self, offset: usize, value: i32) -> VmResult<()> {
        self.write(offset, &value.to_le_bytes())
    }
}

fn checked_range(len: usize, offset: usize, length: usize) -> VmResult<std::ops::Range<usize>> {
    match offset.checked_add(length) {
        Some(end) if end <= len => Ok(offset..end),
        _ => Err(VmError::invalid_argument(format!(
            "range {}+{} exceeds buffer of {} bytes",
            offset, length, len
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_and_load() {
        let buffer = Buffer::zeroed(8);
        buffer.fill(4, 4, 0xFF).unwrap();
        assert_eq!(buffer.load_i32(0), Ok(0));
        assert_eq!(buffer.load_i32(4), Ok(-1));
        assert!(buffer.load_i32(5).is_err());
        assert!(buffer.fill(usize::MAX, 2, 0).is_err());
    }

    #[test]
    fn test_store_little_endian() {
        let buffer = Buffer::zeroed(4);
        buffer.store_i32(0, 0x0403_0201).unwrap();
        assert_eq!(buffer.to_vec(), vec![1, 2, 3, 4]);
    }
}
