//! Per-instance mutable module state.
//!
//! rwdata layout (16-byte aligned):
//!
//! ```text
//! [ i32 globals: 4 bytes each, little-endian ][ raw rwdata ][ padding ]
//! ```

use ivm_common_core::error::check_index;
use ivm_common_core::{Space, VmError, VmResult};
use ivm_runtime::{ConstBuffer, HostModule, Ref, VmRef};
use tracing::{debug, trace};

use crate::module::Module;

#[repr(C, align(16))]
#[derive(Clone, Copy, Default)]
struct Block([u8; 16]);

const BLOCK_BYTES: usize = std::mem::size_of::<Block>();

/// Resolved import: host module slot and function ordinal within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportBinding {
    pub module: usize,
    pub ordinal: u32,
}

pub struct ModuleState {
    rwdata: Box<[Block]>,
    global_i32_count: usize,
    rwdata_size: usize,
    global_refs: Vec<VmRef>,
    rodata: Vec<VmRef>,
    imports: Vec<Option<ImportBinding>>,
}

impl ModuleState {
    pub fn new(module: &Module) -> Self {
        let global_i32_count = module.global_i32_count();
        let rwdata_size = module.rwdata_size();
        // Both terms are bounded at load time.
        let bytes = global_i32_count * 4 + rwdata_size;
        let blocks = (bytes + BLOCK_BYTES - 1) / BLOCK_BYTES;
        let rodata = module
            .rodata_segments()
            .iter()
            .map(|bytes| Ref::new(ConstBuffer::new(bytes.clone())).into_vm_ref())
            .collect();
        Self {
            rwdata: vec![Block::default(); blocks].into_boxed_slice(),
            global_i32_count,
            rwdata_size,
            global_refs: (0..module.global_ref_count()).map(|_| VmRef::null()).collect(),
            rodata,
            imports: vec![None; module.imports().len()],
        }
    }

    /// Resolves every import against `hosts`. Fails on the first missing one.
    pub fn link(&mut self, module: &Module, hosts: &[Box<dyn HostModule>]) -> VmResult<()> {
        for (i, import) in module.imports().iter().enumerate() {
            let binding = hosts
                .iter()
                .enumerate()
                .find(|(_, host)| host.name() == import.module)
                .and_then(|(slot, host)| {
                    host.lookup(&import.function).map(|ordinal| ImportBinding {
                        module: slot,
                        ordinal,
                    })
                })
                .ok_or_else(|| {
                    VmError::unavailable(format!("import `{}` is not provided", import.full_name()))
                })?;
            trace!(import = %import.full_name(), slot = binding.module, ordinal = binding.ordinal, "import linked");
            self.imports[i] = Some(binding);
        }
        debug!(module = module.name(), imports = self.imports.len(), "module linked");
        Ok(())
    }

    #[inline]
    pub fn import(&self, ordinal: usize) -> VmResult<ImportBinding> {
        check_index(Space::Import, ordinal, self.imports.len())?;
        self.imports[ordinal]
            .ok_or_else(|| VmError::unavailable(format!("import {} is not linked", ordinal)))
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: `Block` is `repr(C)` over `[u8; 16]`, so the boxed slice is
        // one contiguous run of initialized bytes.
        unsafe {
            std::slice::from_raw_parts(self.rwdata.as_ptr() as *const u8, self.rwdata.len() * BLOCK_BYTES)
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `bytes`, with exclusive access through `&mut self`.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.rwdata.as_mut_ptr() as *mut u8,
                self.rwdata.len() * BLOCK_BYTES,
            )
        }
    }

    #[inline]
    pub fn global_i32(&self, ordinal: usize) -> VmResult<i32> {
        check_index(Space::GlobalI32, ordinal, self.global_i32_count)?;
        let at = ordinal * 4;
        let raw = &self.bytes()[at..at + 4];
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    #[inline]
    pub fn set_global_i32(&mut self, ordinal: usize, value: i32) -> VmResult<()> {
        check_index(Space::GlobalI32, ordinal, self.global_i32_count)?;
        let at = ordinal * 4;
        self.bytes_mut()[at..at + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Raw rwdata following the i32 globals.
    pub fn rwdata(&self) -> &[u8] {
        let start = self.global_i32_count * 4;
        &self.bytes()[start..start + self.rwdata_size]
    }

    pub fn rwdata_mut(&mut self) -> &mut [u8] {
        let start = self.global_i32_count * 4;
        let end = start + self.rwdata_size;
        &mut self.bytes_mut()[start..end]
    }

    #[inline]
    pub fn global_ref(&self, ordinal: usize) -> VmResult<&VmRef> {
        let count = self.global_refs.len();
        self.global_refs
            .get(ordinal)
            .ok_or_else(|| VmError::out_of_range(Space::GlobalRef, ordinal, count))
    }

    /// Stores `value`, releasing the previous global.
    #[inline]
    pub fn set_global_ref(&mut self, ordinal: usize, value: VmRef) -> VmResult<()> {
        let count = self.global_refs.len();
        let slot = self
            .global_refs
            .get_mut(ordinal)
            .ok_or_else(|| VmError::out_of_range(Space::GlobalRef, ordinal, count))?;
        *slot = value;
        Ok(())
    }

    /// `vm.ro_buffer` ref over rodata segment `ordinal`.
    #[inline]
    pub fn rodata(&self, ordinal: usize) -> VmResult<&VmRef> {
        let count = self.rodata.len();
        self.rodata
            .get(ordinal)
            .ok_or_else(|| VmError::out_of_range(Space::Rodata, ordinal, count))
    }
}

impl Drop for ModuleState {
    fn drop(&mut self) {
        // Global refs go before the storage they may point into.
        self.global_refs.iter_mut().for_each(VmRef::reset);
        self.rodata.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivm_common_core::{FunctionBuilder, ModuleBuilder};
    use std::sync::Arc;

    fn module(globals: u32, refs: u32, rwdata: u32) -> Arc<Module> {
        let mut m = ModuleBuilder::new("s");
        m.globals(globals, refs).rwdata(rwdata);
        m.rodata(b"hello");
        let mut f = FunctionBuilder::new(0, 0);
        f.ret(&[]);
        m.function(f);
        Module::from_def(m.build().unwrap()).unwrap()
    }

    #[test]
    fn test_globals_and_rwdata_share_storage() {
        let module = module(3, 0, 5);
        let mut state = ModuleState::new(&module);
        state.set_global_i32(2, -7).unwrap();
        assert_eq!(state.global_i32(2), Ok(-7));
        assert_eq!(state.global_i32(0), Ok(0));
        assert!(state.global_i32(3).is_err());
        assert_eq!(state.rwdata().len(), 5);
        state.rwdata_mut()[0] = 0xAB;
        assert_eq!(state.global_i32(2), Ok(-7));
        assert_eq!(state.rwdata()[0], 0xAB);
    }

    #[test]
    fn test_rodata_is_const_buffer() {
        let module = module(0, 0, 0);
        let state = ModuleState::new(&module);
        let r = state.rodata(0).unwrap();
        assert_eq!(r.type_name(), "vm.ro_buffer");
        assert_eq!(r.downcast::<ConstBuffer>().map(|b| b.as_slice()), Some(&b"hello"[..]));
        assert!(state.rodata(1).is_err());
    }

    #[test]
    fn test_drop_releases_global_refs() {
        let module = module(0, 2, 0);
        let mut state = ModuleState::new(&module);
        let held = Ref::new(ConstBuffer::new(Arc::from(&b"x"[..])));
        state.set_global_ref(1, held.retain().into_vm_ref()).unwrap();
        assert_eq!(held.count(), 2);
        drop(state);
        assert_eq!(held.count(), 1);
    }

    #[test]
    fn test_missing_import_unavailable() {
        let mut m = ModuleBuilder::new("s");
        m.import("nowhere.fn");
        let mut f = FunctionBuilder::new(0, 0);
        f.ret(&[]);
        m.function(f);
        let module = Module::from_def(m.build().unwrap()).unwrap();
        let mut state = ModuleState::new(&module);
        assert!(matches!(state.link(&module, &[]), Err(VmError::Unavailable(_))));
        assert!(matches!(state.import(0), Err(VmError::Unavailable(_))));
    }
}
