//! Implementation limits.
//!
//! Function descriptors carry register counts as `i8`, so a frame never has
//! more than 127 registers per bank.

/// Magic bytes for module binaries.
pub const MAGIC: [u8; 4] = *b"IVMB";

/// Module binary format version.
pub const VERSION: u32 = 1;

pub const MAX_I32_REGISTERS: usize = i8::MAX as usize;
pub const MAX_REF_REGISTERS: usize = i8::MAX as usize;

/// Default maximum call depth of a stack.
pub const DEFAULT_MAX_STACK_DEPTH: usize = 64;

/// Entries in one register-list extension word.
pub const REGISTERS_PER_WORD: usize = 4;

/// Globals of one bank a module may declare. Global operands are `u16`.
pub const MAX_GLOBALS: usize = u16::MAX as usize + 1;

/// Raw rwdata bytes a module may declare.
pub const MAX_RWDATA_SIZE: usize = 16 << 20;
