//! # ivm-common-core
//!
//! Core types shared by the IVM runtime and VM:
//! - `error` - the single status type (`VmError`) used across the core
//! - `limits` - implementation limits checked at module load
//! - `instruction` - bytecode instruction format and opcodes
//! - `register` - register-list entries used by calls and returns
//! - `bytecode` - module binary layout (descriptors, imports, exports, rodata)
//! - `serialize` - binary encoding/decoding of the module layout
//! - `builder` - assembler for module binaries (tests and tooling)

pub mod error;
pub mod limits;
pub mod instruction;
pub mod register;
pub mod bytecode;
pub mod serialize;
pub mod builder;

pub use error::{Space, VmError, VmResult};
pub use instruction::{Instruction, Opcode};
pub use register::{Register, RegisterList};
pub use bytecode::{ExportDef, FunctionDescriptor, ImportDef, ModuleDef};
pub use builder::{FunctionBuilder, Label, ModuleBuilder};
