//! Load and move instructions: ConstI32, ConstRefZero, ConstRefRodata, MovI32, MovRef

use ivm_common_core::{Instruction, VmResult};
use ivm_runtime::{Frame, VmRef};

use crate::state::ModuleState;

#[inline]
pub fn exec_const_i32(frame: &mut Frame, inst: &Instruction) -> VmResult<()> {
    frame.registers.set_i32(inst.a as usize, inst.imm32())
}

#[inline]
pub fn exec_const_ref_zero(frame: &mut Frame, inst: &Instruction) -> VmResult<()> {
    frame.registers.set_ref(inst.a as usize, VmRef::null())
}

#[inline]
pub fn exec_const_ref_rodata(frame: &mut Frame, inst: &Instruction, state: &ModuleState) -> VmResult<()> {
    let value = state.rodata(inst.b as usize)?.retain();
    frame.registers.set_ref(inst.a as usize, value)
}

#[inline]
pub fn exec_mov_i32(frame: &mut Frame, inst: &Instruction) -> VmResult<()> {
    let value = frame.registers.i32(inst.b as usize)?;
    frame.registers.set_i32(inst.a as usize, value)
}

/// `flags` bit 0 moves instead of retaining.
#[inline]
pub fn exec_mov_ref(frame: &mut Frame, inst: &Instruction) -> VmResult<()> {
    let value = if inst.flags & 1 != 0 {
        frame.registers.take_ref(inst.b as usize)?
    } else {
        frame.registers.retain_ref(inst.b as usize)?
    };
    frame.registers.set_ref(inst.a as usize, value)
}
