//! Error taxonomy for the VM core.
//!
//! Every failure is an explicit `VmError` value. Nothing unwinds across the
//! dispatcher boundary.

use std::fmt;

use thiserror::Error;

/// Index space an out-of-range ordinal was checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    I32Register,
    RefRegister,
    Varargs,
    GlobalI32,
    GlobalRef,
    Rodata,
    Import,
    Function,
    Bytecode,
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Space::I32Register => "i32 register",
            Space::RefRegister => "ref register",
            Space::Varargs => "vararg segment",
            Space::GlobalI32 => "i32 global",
            Space::GlobalRef => "ref global",
            Space::Rodata => "rodata segment",
            Space::Import => "import",
            Space::Function => "function",
            Space::Bytecode => "bytecode offset",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// Malformed module: bad offsets, counts or encoding.
    #[error("malformed module: {0}")]
    Load(String),
    /// Wrong ref type at a parameter or result boundary.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
    /// Register or ordinal beyond the declared count.
    #[error("{space} {index} out of range (count {count})")]
    OutOfRange { space: Space, index: usize, count: usize },
    /// Native-level contract violation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Missing backing capability (unresolved import, unknown function).
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// Call depth exceeded the configured maximum.
    #[error("stack overflow: call depth {depth} exceeds the configured maximum")]
    StackOverflow { depth: usize },
    /// Status returned by a native function body.
    #[error("native failure: {0}")]
    NativeFailure(String),
}

pub type VmResult<T> = Result<T, VmError>;

impl VmError {
    pub fn load(msg: impl Into<String>) -> Self {
        VmError::Load(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        VmError::InvalidArgument(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        VmError::Unavailable(msg.into())
    }

    pub fn native(msg: impl Into<String>) -> Self {
        VmError::NativeFailure(msg.into())
    }

    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        VmError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn out_of_range(space: Space, index: usize, count: usize) -> Self {
        VmError::OutOfRange { space, index, count }
    }
}

/// Checks `index < count`, reporting `OutOfRange` otherwise.
#[inline]
pub fn check_index(space: Space, index: usize, count: usize) -> VmResult<()> {
    if index < count {
        Ok(())
    } else {
        Err(VmError::out_of_range(space, index, count))
    }
}
