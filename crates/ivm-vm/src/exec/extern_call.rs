//! Native call instructions: CallImport, CallImportVariadic
//!
//! Native calls push no frame. Arguments are marshaled into a transient
//! frame sized for both the arguments and the function's results; results
//! are moved back into the caller only after the call succeeds.

use ivm_common_core::register::{bank_counts, ListView};
use ivm_common_core::{Instruction, VmError, VmResult};
use ivm_runtime::abi::NativeStatus;
use ivm_runtime::{Frame, HostModule, Stack};
use tracing::trace;

use super::call::map_args;
use crate::state::ModuleState;

/// Calls import `a`. The caller's pc must already point past the call.
pub fn exec_call_import(
    stack: &mut Stack,
    state: &ModuleState,
    hosts: &mut [Box<dyn HostModule>],
    code: &[u8],
    pc: usize,
    inst: &Instruction,
    variadic: bool,
) -> VmResult<NativeStatus> {
    let segment_count = if variadic { inst.flags as usize } else { 0 };
    let arg_count = inst.b as usize;
    let segments = ListView::new(code, pc, 0, segment_count);
    let args = ListView::new(code, pc, segment_count, arg_count);
    let results = ListView::new(code, pc, segment_count + arg_count, inst.c as usize);

    let binding = state.import(inst.a as usize)?;
    let host = hosts
        .get_mut(binding.module)
        .ok_or_else(|| VmError::unavailable(format!("host module {} is gone", binding.module)))?;

    let expected = host.result_registers(binding.ordinal).ok_or_else(|| {
        VmError::unavailable(format!("{} has no function {}", host.name(), binding.ordinal))
    })?;
    if expected.len() != results.len()
        || expected.iter().zip(results.iter()).any(|(e, r)| e.is_ref() != r.is_ref())
    {
        return Err(VmError::invalid_argument(format!(
            "call site expects {:?} but {}.{} returns {:?}",
            results.to_list(),
            host.name(),
            host.function_name(binding.ordinal).unwrap_or("?"),
            expected
        )));
    }

    let (result_i32, result_ref) = bank_counts(expected);
    let (arg_i32, arg_ref) = bank_counts(&args.to_list());
    let mut frame = Frame::native(arg_i32.max(result_i32), arg_ref.max(result_ref));
    frame.varargs = (0..segments.len()).filter_map(|i| segments.raw(i)).collect();
    {
        let caller = stack
            .current_frame_mut()
            .ok_or_else(|| VmError::invalid_argument("native call without a caller frame"))?;
        map_args(&mut caller.registers, &mut frame.registers, args)?;
    }

    trace!(
        module = host.name(),
        function = host.function_name(binding.ordinal).unwrap_or("?"),
        "native call"
    );
    let status = host.call(binding.ordinal, stack, &mut frame)?;

    let expected = host.result_registers(binding.ordinal).unwrap_or(&[]);
    let caller = stack
        .current_frame_mut()
        .ok_or_else(|| VmError::invalid_argument("native call lost its caller frame"))?;
    for (src, dst) in expected.iter().zip(results.iter()) {
        if src.is_ref() {
            let value = frame.registers.take_ref(src.index())?;
            caller.registers.set_ref(dst.index(), value)?;
        } else {
            caller.registers.set_i32(dst.index(), frame.registers.i32(src.index())?)?;
        }
    }
    Ok(status)
}
