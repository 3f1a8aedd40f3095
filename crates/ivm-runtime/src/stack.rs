//! Register banks, call frames and the per-execution call stack.
//!
//! Each frame owns two fixed banks sized from its function descriptor at call
//! setup. Banks are never resized. Every access is bounds checked.

use ivm_common_core::error::check_index;
use ivm_common_core::{RegisterList, Space, VmError, VmResult};
use tracing::trace;

use crate::vm_ref::VmRef;

// =============================================================================
// Registers
// =============================================================================

#[derive(Debug, Default)]
pub struct Registers {
    i32: Box<[i32]>,
    refs: Box<[VmRef]>,
}

impl Registers {
    pub fn new(i32_count: usize, ref_count: usize) -> Self {
        Self {
            i32: vec![0; i32_count].into_boxed_slice(),
            refs: (0..ref_count).map(|_| VmRef::null()).collect(),
        }
    }

    #[inline]
    pub fn i32_count(&self) -> usize {
        self.i32.len()
    }

    #[inline]
    pub fn ref_count(&self) -> usize {
        self.refs.len()
    }

    #[inline]
    pub fn i32(&self, index: usize) -> VmResult<i32> {
        self.i32
            .get(index)
            .copied()
            .ok_or_else(|| VmError::out_of_range(Space::I32Register, index, self.i32.len()))
    }

    #[inline]
    pub fn set_i32(&mut self, index: usize, value: i32) -> VmResult<()> {
        check_index(Space::I32Register, index, self.i32.len())?;
        self.i32[index] = value;
        Ok(())
    }

    #[inline]
    pub fn ref_at(&self, index: usize) -> VmResult<&VmRef> {
        let count = self.refs.len();
        self.refs
            .get(index)
            .ok_or_else(|| VmError::out_of_range(Space::RefRegister, index, count))
    }

    #[inline]
    pub fn ref_mut(&mut self, index: usize) -> VmResult<&mut VmRef> {
        let count = self.refs.len();
        self.refs
            .get_mut(index)
            .ok_or_else(|| VmError::out_of_range(Space::RefRegister, index, count))
    }

    /// Moves the ref out, zeroing the register.
    #[inline]
    pub fn take_ref(&mut self, index: usize) -> VmResult<VmRef> {
        Ok(self.ref_mut(index)?.take())
    }

    /// Stores `value`, releasing whatever the register held.
    #[inline]
    pub fn set_ref(&mut self, index: usize, value: VmRef) -> VmResult<()> {
        *self.ref_mut(index)? = value;
        Ok(())
    }

    #[inline]
    pub fn retain_ref(&self, index: usize) -> VmResult<VmRef> {
        Ok(self.ref_at(index)?.retain())
    }

    /// Zeroes both banks, releasing every held ref.
    pub fn clear(&mut self) {
        self.i32.fill(0);
        self.refs.iter_mut().for_each(VmRef::reset);
    }

    pub fn live_refs(&self) -> usize {
        self.refs.iter().filter(|r| !r.is_null()).count()
    }
}

// =============================================================================
// Frame
// =============================================================================

#[derive(Debug, Default)]
pub struct Frame {
    /// Function ordinal; `None` for a transient native frame.
    pub function: Option<u32>,
    /// Byte offset into the function body.
    pub pc: usize,
    pub registers: Registers,
    /// Caller registers receiving this frame's results.
    pub return_registers: RegisterList,
    /// Vararg segment list of a variadic native call.
    pub varargs: Vec<u16>,
}

impl Frame {
    pub fn new(function: u32, i32_count: usize, ref_count: usize) -> Self {
        Self {
            function: Some(function),
            registers: Registers::new(i32_count, ref_count),
            ..Default::default()
        }
    }

    /// Frame used to marshal one native call. Never pushed.
    pub fn native(i32_count: usize, ref_count: usize) -> Self {
        Self {
            registers: Registers::new(i32_count, ref_count),
            ..Default::default()
        }
    }

    #[inline]
    pub fn vararg(&self, index: usize) -> VmResult<u16> {
        self.varargs
            .get(index)
            .copied()
            .ok_or_else(|| VmError::out_of_range(Space::Varargs, index, self.varargs.len()))
    }
}

// =============================================================================
// Stack
// =============================================================================

/// LIFO frame stack of one execution. Owned by exactly one context.
#[derive(Debug)]
pub struct Stack {
    frames: Vec<Frame>,
    max_depth: usize,
    owner: u64,
}

impl Stack {
    pub fn new(max_depth: usize, owner: u64) -> Self {
        Self {
            frames: Vec::new(),
            max_depth,
            owner,
        }
    }

    /// Id of the context that created this stack.
    #[inline]
    pub fn owner(&self) -> u64 {
        self.owner
    }

    #[inline]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push_frame(&mut self, frame: Frame) -> VmResult<()> {
        if self.frames.len() >= self.max_depth {
            return Err(VmError::StackOverflow {
                depth: self.frames.len() + 1,
            });
        }
        trace!(depth = self.frames.len() + 1, function = ?frame.function, "push frame");
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        let frame = self.frames.pop()?;
        trace!(depth = self.frames.len(), function = ?frame.function, "pop frame");
        Some(frame)
    }

    #[inline]
    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    #[inline]
    pub fn current_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// Pops every frame, innermost first, releasing the refs each holds.
    pub fn unwind(&mut self) {
        if !self.frames.is_empty() {
            trace!(depth = self.frames.len(), "unwind stack");
        }
        while let Some(frame) = self.frames.pop() {
            drop(frame);
        }
    }

    /// Non-null refs across all frames.
    pub fn live_refs(&self) -> usize {
        self.frames.iter().map(|f| f.registers.live_refs()).sum()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.unwind();
    }
}
