//! Register-based bytecode VM.
//!
//! - `module` - loading a module binary into an immutable, verified `Module`
//! - `state` - per-instance globals, rodata handles and linked imports
//! - `exec` - instruction implementations
//! - `vm` - contexts, the dispatch loop, yield and resume

mod exec;
mod verify;

pub mod module;
pub mod state;
pub mod vm;

pub use module::{Import, Module};
pub use state::{ImportBinding, ModuleState};
pub use vm::{Context, Continuation, Execution, Value, VmConfig};

pub use ivm_common_core::{VmError, VmResult};
