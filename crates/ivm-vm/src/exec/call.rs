//! Bytecode call instructions: Call, Return

use ivm_common_core::register::ListView;
use ivm_common_core::{Instruction, Register, VmError, VmResult};
use ivm_runtime::{Frame, Registers, Stack, VmRef};

use crate::module::Module;
use crate::vm::Value;

/// Copies call arguments into `dst`, filling each bank from register 0 in
/// list order. Ref arguments are retained, or moved when flagged.
pub fn map_args(src: &mut Registers, dst: &mut Registers, args: ListView<'_>) -> VmResult<()> {
    let (mut next_i32, mut next_ref) = (0, 0);
    for reg in args.iter() {
        if reg.is_ref() {
            dst.set_ref(next_ref, take_or_retain(src, reg)?)?;
            next_ref += 1;
        } else {
            dst.set_i32(next_i32, src.i32(reg.index())?)?;
            next_i32 += 1;
        }
    }
    Ok(())
}

/// Pushes a frame for function `a`. The caller's pc must already point past
/// the call.
pub fn exec_call(
    stack: &mut Stack,
    module: &Module,
    code: &[u8],
    pc: usize,
    inst: &Instruction,
) -> VmResult<()> {
    let callee = inst.a as u32;
    let desc = module.function(callee)?;
    let arg_count = inst.b as usize;
    let args = ListView::new(code, pc, 0, arg_count);
    let results = ListView::new(code, pc, arg_count, inst.c as usize);

    let mut frame = Frame::new(
        callee,
        desc.i32_register_count as usize,
        desc.ref_register_count as usize,
    );
    let caller = stack
        .current_frame_mut()
        .ok_or_else(|| VmError::invalid_argument("call without a caller frame"))?;
    map_args(&mut caller.registers, &mut frame.registers, args)?;
    frame.return_registers = results.to_list();
    stack.push_frame(frame)
}

/// Pops the current frame and writes its results into the caller.
///
/// Returns `Some(values)` when the outermost frame returns.
pub fn exec_return(
    stack: &mut Stack,
    code: &[u8],
    pc: usize,
    inst: &Instruction,
) -> VmResult<Option<Vec<Value>>> {
    let list = ListView::new(code, pc, 0, inst.b as usize);
    let mut callee = stack
        .pop_frame()
        .ok_or_else(|| VmError::invalid_argument("return with an empty stack"))?;

    let Some(caller) = stack.current_frame_mut() else {
        let mut values = Vec::with_capacity(list.len());
        for reg in list.iter() {
            values.push(if reg.is_ref() {
                Value::Ref(take_or_retain(&mut callee.registers, reg)?)
            } else {
                Value::I32(callee.registers.i32(reg.index())?)
            });
        }
        return Ok(Some(values));
    };

    let targets = &callee.return_registers;
    if targets.len() != list.len() {
        return Err(VmError::invalid_argument(format!(
            "function returns {} values into {} result registers",
            list.len(),
            targets.len()
        )));
    }
    if let Some(i) = list
        .iter()
        .zip(targets.iter())
        .position(|(src, dst)| src.is_ref() != dst.is_ref())
    {
        return Err(VmError::invalid_argument(format!(
            "result {} returns a value of the other register bank",
            i
        )));
    }

    for (src, dst) in list.iter().zip(targets.iter()) {
        if src.is_ref() {
            let value = take_or_retain(&mut callee.registers, src)?;
            caller.registers.set_ref(dst.index(), value)?;
        } else {
            caller.registers.set_i32(dst.index(), callee.registers.i32(src.index())?)?;
        }
    }
    Ok(None)
}

#[inline]
fn take_or_retain(registers: &mut Registers, reg: Register) -> VmResult<VmRef> {
    if reg.is_move() {
        registers.take_ref(reg.index())
    } else {
        registers.retain_ref(reg.index())
    }
}
