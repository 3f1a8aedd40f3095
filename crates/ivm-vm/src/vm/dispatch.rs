//! The dispatch loop: fetch, decode, execute, advance.

use ivm_common_core::{Instruction, Opcode, Space, VmError, VmResult};
use ivm_runtime::abi::NativeStatus;
use ivm_runtime::{HostModule, Stack};
use tracing::trace;

use crate::exec::*;
use crate::module::Module;
use crate::state::ModuleState;
use crate::vm::Value;

pub(crate) enum Flow {
    Returned(Vec<Value>),
    Yielded,
}

/// Runs `stack` until the outermost frame returns or the stack yields.
///
/// On error the stack is left as it was at the failing instruction; the
/// caller unwinds it.
pub(crate) fn run(
    module: &Module,
    state: &mut ModuleState,
    hosts: &mut [Box<dyn HostModule>],
    stack: &mut Stack,
) -> VmResult<Flow> {
    loop {
        let frame = stack
            .current_frame_mut()
            .ok_or_else(|| VmError::invalid_argument("no frame to execute"))?;
        let function = frame
            .function
            .ok_or_else(|| VmError::invalid_argument("native frame on the call stack"))?;
        let code = module.function_code(function)?;
        let pc = frame.pc;
        let inst = Instruction::decode(code, pc)
            .ok_or_else(|| VmError::out_of_range(Space::Bytecode, pc, code.len()))?;
        let op = inst.opcode().ok_or_else(|| {
            VmError::invalid_argument(format!("unknown opcode {:#04x} at {:#x}", inst.op, pc))
        })?;
        let next = pc + inst.encoded_len();

        match op {
            Opcode::Nop => {}

            // === LOAD / MOVE ===
            Opcode::ConstI32 => exec_const_i32(frame, &inst)?,
            Opcode::ConstRefZero => exec_const_ref_zero(frame, &inst)?,
            Opcode::ConstRefRodata => exec_const_ref_rodata(frame, &inst, state)?,
            Opcode::MovI32 => exec_mov_i32(frame, &inst)?,
            Opcode::MovRef => exec_mov_ref(frame, &inst)?,

            // === ARITH / BIT / CMP ===
            Opcode::AddI32
            | Opcode::SubI32
            | Opcode::MulI32
            | Opcode::DivI32S
            | Opcode::DivI32U
            | Opcode::RemI32S
            | Opcode::RemI32U
            | Opcode::AndI32
            | Opcode::OrI32
            | Opcode::XorI32
            | Opcode::ShlI32
            | Opcode::ShrI32S
            | Opcode::ShrI32U
            | Opcode::CmpEqI32
            | Opcode::CmpNeI32
            | Opcode::CmpLtI32S
            | Opcode::CmpLtI32U => exec_binary(frame, op, &inst)?,
            Opcode::NegI32 | Opcode::NotI32 => exec_unary(frame, op, &inst)?,
            Opcode::CmpEqRef | Opcode::CmpNzRef => exec_cmp_ref(frame, op, &inst)?,

            // === GLOBAL ===
            Opcode::GlobalLoadI32 => exec_global_load_i32(frame, &inst, state)?,
            Opcode::GlobalStoreI32 => exec_global_store_i32(frame, &inst, state)?,
            Opcode::GlobalLoadRef => exec_global_load_ref(frame, &inst, state)?,
            Opcode::GlobalStoreRef => exec_global_store_ref(frame, &inst, state)?,

            // === JUMP ===
            Opcode::Branch => {
                frame.pc = inst.imm32() as usize;
                continue;
            }
            Opcode::CondBranch => {
                if frame.registers.i32(inst.a as usize)? != 0 {
                    frame.pc = inst.imm32() as usize;
                    continue;
                }
            }

            // === CALL ===
            Opcode::Call => {
                frame.pc = next;
                exec_call(stack, module, code, pc, &inst)?;
                continue;
            }
            Opcode::CallImport | Opcode::CallImportVariadic => {
                frame.pc = next;
                let variadic = op == Opcode::CallImportVariadic;
                let status = exec_call_import(stack, state, hosts, code, pc, &inst, variadic)?;
                if status == NativeStatus::Pending {
                    trace!(function, pc = next, "native call pending, yielding");
                    return Ok(Flow::Yielded);
                }
                continue;
            }
            Opcode::Return => {
                if let Some(values) = exec_return(stack, code, pc, &inst)? {
                    return Ok(Flow::Returned(values));
                }
                continue;
            }

            // === CONTROL ===
            Opcode::Yield => {
                frame.pc = next;
                trace!(function, pc = next, "yield");
                return Ok(Flow::Yielded);
            }
        }
        frame.pc = next;
    }
}
