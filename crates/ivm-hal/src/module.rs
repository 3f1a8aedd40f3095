//! The `hal` native module: exported functions and per-context state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Poll;

use ivm_runtime::{
    ConstBuffer, HostModule, NativeModule, NativeRegistry, NativeRegistryBuilder, Ref, Span, VmError,
    VmResult,
};
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::buffer::{Allocation, Buffer};
use crate::semaphore::Semaphore;

pub const MODULE_NAME: &str = "hal";

/// Live buffer bytes one context may hold before `buffer.allocate` fails.
pub const DEFAULT_MAX_ALLOCATION: usize = 64 << 20;

/// Per-context state of the `hal` module.
#[derive(Debug)]
pub struct HalModule {
    max_allocation: usize,
    /// Bytes held by live buffers; each buffer gives its share back on drop.
    allocated: Arc<AtomicUsize>,
}

impl Default for HalModule {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ALLOCATION)
    }
}

impl HalModule {
    pub fn new(max_allocation: usize) -> Self {
        Self {
            max_allocation,
            allocated: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Host module instance to hand to a context.
    pub fn instance(self) -> VmResult<Box<dyn HostModule>> {
        Ok(Box::new(NativeModule::new(registry()?, self)))
    }

    /// Bytes held by buffers allocated through this instance that are
    /// still alive.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    fn reserve(&mut self, size: usize) -> VmResult<Allocation> {
        let max = self.max_allocation;
        let in_use = self
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_use| {
                in_use.checked_add(size).filter(|total| *total <= max)
            })
            .map_err(|in_use| {
                VmError::native(format!(
                    "allocating {} bytes exceeds the {} byte limit ({} in use)",
                    size, max, in_use
                ))
            })?;
        debug!(size, total = in_use + size, "hal allocation");
        Ok(Allocation::new(size, self.allocated.clone()))
    }

    // =========================================================================
    // Buffers
    // =========================================================================

    fn buffer_allocate(&mut self, size: i32) -> VmResult<Ref<Buffer>> {
        let size = non_negative("size", size)?;
        let allocation = self.reserve(size)?;
        Ok(Ref::new(Buffer::zeroed(size).charged(allocation)))
    }

    fn buffer_from_rodata(&mut self, source: Ref<ConstBuffer>) -> VmResult<Ref<Buffer>> {
        let bytes = source.deref_non_null()?.as_slice();
        let allocation = self.reserve(bytes.len())?;
        Ok(Ref::new(Buffer::from_bytes(bytes).charged(allocation)))
    }

    fn buffer_length(&mut self, buffer: Ref<Buffer>) -> VmResult<i32> {
        Ok(buffer.deref_non_null()?.len() as i32)
    }

    fn buffer_fill(&mut self, buffer: Ref<Buffer>, offset: i32, length: i32, pattern: u8) -> VmResult<()> {
        buffer.deref_non_null()?.fill(
            non_negative("offset", offset)?,
            non_negative("length", length)?,
            pattern,
        )
    }

    fn buffer_load(&mut self, buffer: Ref<Buffer>, offset: i32) -> VmResult<i32> {
        buffer.deref_non_null()?.load_i32(non_negative("offset", offset)?)
    }

    fn buffer_store(&mut self, value: i32, buffer: Ref<Buffer>, offset: i32) -> VmResult<()> {
        buffer.deref_non_null()?.store_i32(non_negative("offset", offset)?, value)
    }

    /// Stores consecutive i32 values starting at `offset`.
    fn buffer_write_values(&mut self, buffer: Ref<Buffer>, offset: i32, values: Span<i32>) -> VmResult<()> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        buffer.deref_non_null()?.write(non_negative("offset", offset)?, &bytes)
    }

    // =========================================================================
    // Semaphores
    // =========================================================================

    fn semaphore_create(&mut self, initial: i32) -> VmResult<Ref<Semaphore>> {
        Ok(Ref::new(Semaphore::new(non_negative("initial value", initial)? as u32)))
    }

    fn semaphore_query(&mut self, semaphore: Ref<Semaphore>) -> VmResult<i32> {
        Ok(semaphore.deref_non_null()?.query() as i32)
    }

    fn semaphore_signal(&mut self, semaphore: Ref<Semaphore>, value: i32) -> VmResult<()> {
        semaphore
            .deref_non_null()?
            .signal(non_negative("value", value)? as u32);
        Ok(())
    }

    /// Pending until the payload reaches `value`; the caller re-queries after
    /// it is resumed.
    fn semaphore_wait(&mut self, semaphore: Ref<Semaphore>, value: i32) -> VmResult<Poll<()>> {
        Ok(semaphore
            .deref_non_null()?
            .poll_wait(non_negative("value", value)? as u32))
    }
}

fn non_negative(what: &str, value: i32) -> VmResult<usize> {
    usize::try_from(value).map_err(|_| VmError::invalid_argument(format!("negative {} {}", what, value)))
}

static REGISTRY: OnceCell<Arc<NativeRegistry<HalModule>>> = OnceCell::new();

/// The shared `hal` function table, built on first use.
pub fn registry() -> VmResult<Arc<NativeRegistry<HalModule>>> {
    REGISTRY
        .get_or_try_init(|| {
            NativeRegistryBuilder::new(MODULE_NAME)
                .export("buffer.allocate", HalModule::buffer_allocate)
                .export("buffer.from_rodata", HalModule::buffer_from_rodata)
                .export("buffer.length", HalModule::buffer_length)
                .export("buffer.fill", HalModule::buffer_fill)
                .export("buffer.load", HalModule::buffer_load)
                .export("buffer.store", HalModule::buffer_store)
                .export("buffer.write_values", HalModule::buffer_write_values)
                .export("semaphore.create", HalModule::semaphore_create)
                .export("semaphore.query", HalModule::semaphore_query)
                .export("semaphore.signal", HalModule::semaphore_signal)
                .export("semaphore.wait", HalModule::semaphore_wait)
                .build()
                .map(Arc::new)
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivm_runtime::Register;

    #[test]
    fn test_registry_exports() {
        let registry = registry().unwrap();
        assert_eq!(registry.module_name(), "hal");
        let fill = registry.resolve("buffer.fill").unwrap();
        assert!(registry.get(fill).unwrap().results().is_empty());
        let create = registry.resolve("semaphore.create").unwrap();
        assert_eq!(registry.get(create).unwrap().results(), &[Register::moved(0)]);
        assert!(Arc::ptr_eq(&registry, &super::registry().unwrap()));
    }

    #[test]
    fn test_allocation_limit() {
        let mut hal = HalModule::new(16);
        let held = hal.buffer_allocate(12).unwrap();
        assert!(matches!(hal.buffer_allocate(8), Err(VmError::NativeFailure(_))));
        assert!(matches!(hal.buffer_allocate(-1), Err(VmError::InvalidArgument(_))));
        assert_eq!(hal.allocated(), 12);
        drop(held);
        assert_eq!(hal.allocated(), 0);
    }

    #[test]
    fn test_released_buffers_return_budget() {
        let mut hal = HalModule::new(16);
        for _ in 0..8 {
            let buffer = hal.buffer_allocate(12).unwrap();
            assert_eq!(buffer.deref_non_null().unwrap().len(), 12);
        }
        let shared = hal.buffer_allocate(16).unwrap();
        let alias = shared.retain();
        drop(shared);
        assert_eq!(hal.allocated(), 16);
        assert!(hal.buffer_allocate(1).is_err());
        drop(alias);
        assert_eq!(hal.allocated(), 0);
    }
}
