//! Runtime support shared by the VM and native modules.
//!
//! - `vm_ref` - reference-counted handles to host objects and the type registry
//! - `stack` - register banks, frames and the call stack
//! - `abi` - marshaling between native signatures and the register convention
//! - `ffi` - native function registries and the host module seam
//! - `const_buffer` - read-only byte buffers backing module rodata

pub mod vm_ref;
pub mod stack;
pub mod abi;
pub mod ffi;
pub mod const_buffer;

pub use ivm_common_core::{Register, RegisterList, Space, VmError, VmResult};
pub use vm_ref::{register_type, Ref, RefObject, RefTypeDescriptor, RefTypeId, VmRef};
pub use stack::{Frame, Registers, Stack};
pub use abi::{NativeStatus, Param, ParamList, Results, Span};
pub use ffi::{HostModule, NativeFunction, NativeModule, NativeRegistry, NativeRegistryBuilder};
pub use const_buffer::ConstBuffer;

#[doc(hidden)]
pub use once_cell;
