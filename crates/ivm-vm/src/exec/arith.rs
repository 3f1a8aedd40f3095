//! i32 arithmetic, bitwise and comparison instructions, plus ref comparisons.
//!
//! Arithmetic wraps. Shift counts are taken modulo 32.

use ivm_common_core::{Instruction, Opcode, VmError, VmResult};
use ivm_runtime::Frame;

pub fn exec_binary(frame: &mut Frame, op: Opcode, inst: &Instruction) -> VmResult<()> {
    let lhs = frame.registers.i32(inst.b as usize)?;
    let rhs = frame.registers.i32(inst.c as usize)?;
    let value = match op {
        Opcode::AddI32 => lhs.wrapping_add(rhs),
        Opcode::SubI32 => lhs.wrapping_sub(rhs),
        Opcode::MulI32 => lhs.wrapping_mul(rhs),
        Opcode::DivI32S => lhs.wrapping_div(divisor(rhs)?),
        Opcode::DivI32U => ((lhs as u32) / (divisor(rhs)? as u32)) as i32,
        Opcode::RemI32S => lhs.wrapping_rem(divisor(rhs)?),
        Opcode::RemI32U => ((lhs as u32) % (divisor(rhs)? as u32)) as i32,
        Opcode::AndI32 => lhs & rhs,
        Opcode::OrI32 => lhs | rhs,
        Opcode::XorI32 => lhs ^ rhs,
        Opcode::ShlI32 => lhs.wrapping_shl(rhs as u32),
        Opcode::ShrI32S => lhs.wrapping_shr(rhs as u32),
        Opcode::ShrI32U => (lhs as u32).wrapping_shr(rhs as u32) as i32,
        Opcode::CmpEqI32 => (lhs == rhs) as i32,
        Opcode::CmpNeI32 => (lhs != rhs) as i32,
        Opcode::CmpLtI32S => (lhs < rhs) as i32,
        Opcode::CmpLtI32U => ((lhs as u32) < (rhs as u32)) as i32,
        _ => return Err(VmError::invalid_argument(format!("{:?} is not a binary i32 op", op))),
    };
    frame.registers.set_i32(inst.a as usize, value)
}

pub fn exec_unary(frame: &mut Frame, op: Opcode, inst: &Instruction) -> VmResult<()> {
    let operand = frame.registers.i32(inst.b as usize)?;
    let value = match op {
        Opcode::NegI32 => operand.wrapping_neg(),
        Opcode::NotI32 => !operand,
        _ => return Err(VmError::invalid_argument(format!("{:?} is not a unary i32 op", op))),
    };
    frame.registers.set_i32(inst.a as usize, value)
}

/// CmpEqRef compares identity; CmpNzRef tests for non-null.
pub fn exec_cmp_ref(frame: &mut Frame, op: Opcode, inst: &Instruction) -> VmResult<()> {
    let value = match op {
        Opcode::CmpEqRef => {
            let lhs = frame.registers.ref_at(inst.b as usize)?;
            let rhs = frame.registers.ref_at(inst.c as usize)?;
            lhs.ptr_eq(rhs)
        }
        Opcode::CmpNzRef => !frame.registers.ref_at(inst.b as usize)?.is_null(),
        _ => return Err(VmError::invalid_argument(format!("{:?} is not a ref comparison", op))),
    };
    frame.registers.set_i32(inst.a as usize, value as i32)
}

#[inline]
fn divisor(rhs: i32) -> VmResult<i32> {
    if rhs == 0 {
        Err(VmError::invalid_argument("division by zero"))
    } else {
        Ok(rhs)
    }
}
