//! Context-facing types: values, execution outcomes, configuration.

use ivm_common_core::limits::DEFAULT_MAX_STACK_DEPTH;
use ivm_runtime::{Stack, VmRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Frames a stack may hold before a call fails with `StackOverflow`.
    pub max_stack_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
        }
    }
}

/// Argument to or result of an exported function.
#[derive(Debug)]
pub enum Value {
    I32(i32),
    Ref(VmRef),
}

impl Value {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            Value::Ref(_) => None,
        }
    }

    pub fn as_vm_ref(&self) -> Option<&VmRef> {
        match self {
            Value::Ref(r) => Some(r),
            Value::I32(_) => None,
        }
    }

    pub fn into_ref(self) -> Option<VmRef> {
        match self {
            Value::Ref(r) => Some(r),
            Value::I32(_) => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<VmRef> for Value {
    fn from(r: VmRef) -> Self {
        Value::Ref(r)
    }
}

#[derive(Debug)]
pub enum Execution {
    Returned(Vec<Value>),
    Yielded(Continuation),
}

impl Execution {
    pub fn is_yielded(&self) -> bool {
        matches!(self, Execution::Yielded(_))
    }

    pub fn into_values(self) -> Option<Vec<Value>> {
        match self {
            Execution::Returned(values) => Some(values),
            Execution::Yielded(_) => None,
        }
    }

    pub fn into_continuation(self) -> Option<Continuation> {
        match self {
            Execution::Yielded(c) => Some(c),
            Execution::Returned(_) => None,
        }
    }
}

/// Suspended stack of a yielded execution. Dropping it releases every ref
/// its frames hold.
#[derive(Debug)]
pub struct Continuation {
    pub(crate) stack: Stack,
}

impl Continuation {
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Function and byte offset execution resumes at.
    pub fn cursor(&self) -> Option<(u32, usize)> {
        let frame = self.stack.current_frame()?;
        Some((frame.function?, frame.pc))
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }
}
