//! Heap-backed `hal` host module.
//!
//! Exposes buffers and counting semaphores to bytecode through the native
//! ABI. Imports are named `hal.<function>`, e.g. `hal.buffer.fill`.

mod buffer;
mod module;
mod semaphore;

pub use buffer::Buffer;
pub use module::{registry, HalModule, DEFAULT_MAX_ALLOCATION, MODULE_NAME};
pub use semaphore::Semaphore;
