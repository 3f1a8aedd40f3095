//! Read-only byte buffers, the ref type behind module rodata.

use std::sync::Arc;

/// Immutable bytes shared with the module that declared them.
#[derive(Debug, Clone)]
pub struct ConstBuffer {
    bytes: Arc<[u8]>,
}

crate::ref_object!(ConstBuffer, "vm.ro_buffer");

impl ConstBuffer {
    pub fn new(bytes: Arc<[u8]>) -> Self {
        Self { bytes }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes `offset..offset + len`, if in bounds.
    pub fn slice(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.bytes.get(offset..offset.checked_add(len)?)
    }
}
