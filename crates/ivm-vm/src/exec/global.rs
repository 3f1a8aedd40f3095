//! Global instructions: GlobalLoadI32, GlobalStoreI32, GlobalLoadRef, GlobalStoreRef

use ivm_common_core::{Instruction, VmResult};
use ivm_runtime::Frame;

use crate::state::ModuleState;

#[inline]
pub fn exec_global_load_i32(frame: &mut Frame, inst: &Instruction, state: &ModuleState) -> VmResult<()> {
    let value = state.global_i32(inst.b as usize)?;
    frame.registers.set_i32(inst.a as usize, value)
}

#[inline]
pub fn exec_global_store_i32(frame: &Frame, inst: &Instruction, state: &mut ModuleState) -> VmResult<()> {
    let value = frame.registers.i32(inst.a as usize)?;
    state.set_global_i32(inst.b as usize, value)
}

#[inline]
pub fn exec_global_load_ref(frame: &mut Frame, inst: &Instruction, state: &ModuleState) -> VmResult<()> {
    let value = state.global_ref(inst.b as usize)?.retain();
    frame.registers.set_ref(inst.a as usize, value)
}

#[inline]
pub fn exec_global_store_ref(frame: &Frame, inst: &Instruction, state: &mut ModuleState) -> VmResult<()> {
    let value = frame.registers.retain_ref(inst.a as usize)?;
    state.set_global_ref(inst.b as usize, value)
}
