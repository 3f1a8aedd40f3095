//! Load-time verification of a decoded module.
//!
//! After verification the dispatcher may assume: every function body lies in
//! the bytecode region and ends on an instruction boundary, every opcode is
//! known, every register operand is within the function's banks, and every
//! branch, call, import, global and rodata ordinal is in range.

use ivm_common_core::instruction::INSTRUCTION_BYTES;
use ivm_common_core::limits::{MAX_GLOBALS, MAX_I32_REGISTERS, MAX_REF_REGISTERS, MAX_RWDATA_SIZE};
use ivm_common_core::register::{bank_counts, ListView};
use ivm_common_core::{FunctionDescriptor, Instruction, ModuleDef, Opcode, Register, VmError, VmResult};
use tracing::trace;

pub(crate) fn verify_module(def: &ModuleDef) -> VmResult<()> {
    verify_globals(def)?;
    for import in &def.imports {
        if import.split().is_none() {
            return Err(VmError::load(format!(
                "import `{}` is not of the form module.function",
                import.name
            )));
        }
    }
    for export in &def.exports {
        if export.function as usize >= def.functions.len() {
            return Err(VmError::load(format!(
                "export `{}` names function {} of {}",
                export.name,
                export.function,
                def.functions.len()
            )));
        }
    }
    for (ordinal, desc) in def.functions.iter().enumerate() {
        FunctionVerifier::new(def, ordinal, desc)?.run()?;
    }
    Ok(())
}

/// Bounds the storage a module state allocates for globals and rwdata.
fn verify_globals(def: &ModuleDef) -> VmResult<()> {
    for (bank, count) in [("i32", def.global_i32_count), ("ref", def.global_ref_count)] {
        if count as usize > MAX_GLOBALS {
            return Err(VmError::load(format!(
                "{} {} globals exceed the limit of {}",
                count, bank, MAX_GLOBALS
            )));
        }
    }
    if def.rwdata_size as usize > MAX_RWDATA_SIZE {
        return Err(VmError::load(format!(
            "rwdata of {} bytes exceeds the limit of {}",
            def.rwdata_size, MAX_RWDATA_SIZE
        )));
    }
    (def.global_i32_count as usize)
        .checked_mul(4)
        .and_then(|bytes| bytes.checked_add(def.rwdata_size as usize))
        .ok_or_else(|| VmError::load("global storage size overflows"))?;
    Ok(())
}

struct FunctionVerifier<'a> {
    def: &'a ModuleDef,
    ordinal: usize,
    code: &'a [u8],
    i32_count: usize,
    ref_count: usize,
    pc: usize,
}

impl<'a> FunctionVerifier<'a> {
    fn new(def: &'a ModuleDef, ordinal: usize, desc: &FunctionDescriptor) -> VmResult<Self> {
        let fail = |what: String| VmError::load(format!("function {}: {}", ordinal, what));

        if desc.bytecode_offset < 0 || desc.bytecode_length <= 0 {
            return Err(fail(format!(
                "bad bytecode range {}+{}",
                desc.bytecode_offset, desc.bytecode_length
            )));
        }
        let start = desc.bytecode_offset as usize;
        let len = desc.bytecode_length as usize;
        if len % INSTRUCTION_BYTES != 0 {
            return Err(fail(format!("length {} is not a multiple of {}", len, INSTRUCTION_BYTES)));
        }
        let code = start
            .checked_add(len)
            .and_then(|end| def.bytecode.get(start..end))
            .ok_or_else(|| {
                fail(format!(
                    "range {}+{} exceeds bytecode of {} bytes",
                    start,
                    len,
                    def.bytecode.len()
                ))
            })?;

        let i32_count = desc.i32_register_count;
        let ref_count = desc.ref_register_count;
        if i32_count < 0 || i32_count as usize > MAX_I32_REGISTERS {
            return Err(fail(format!("i32 register count {}", i32_count)));
        }
        if ref_count < 0 || ref_count as usize > MAX_REF_REGISTERS {
            return Err(fail(format!("ref register count {}", ref_count)));
        }

        Ok(Self {
            def,
            ordinal,
            code,
            i32_count: i32_count as usize,
            ref_count: ref_count as usize,
            pc: 0,
        })
    }

    fn fail(&self, what: impl std::fmt::Display) -> VmError {
        VmError::load(format!("function {} at {:#x}: {}", self.ordinal, self.pc, what))
    }

    fn run(mut self) -> VmResult<()> {
        let mut boundaries = vec![false; self.code.len() / INSTRUCTION_BYTES];
        let mut targets = Vec::new();

        while self.pc < self.code.len() {
            let inst = Instruction::decode(self.code, self.pc)
                .ok_or_else(|| self.fail("truncated instruction"))?;
            let op = inst
                .opcode()
                .ok_or_else(|| self.fail(format_args!("unknown opcode {:#04x}", inst.op)))?;
            let next = self.pc + inst.encoded_len();
            if next > self.code.len() {
                return Err(self.fail("register list runs past the end of the function"));
            }
            boundaries[self.pc / INSTRUCTION_BYTES] = true;
            self.operands(op, &inst, &mut targets)?;
            self.pc = next;
        }

        for (pc, target) in targets {
            let ok = target >= 0
                && (target as usize) < self.code.len()
                && boundaries[target as usize / INSTRUCTION_BYTES]
                && target as usize % INSTRUCTION_BYTES == 0;
            if !ok {
                self.pc = pc;
                return Err(self.fail(format_args!("branch target {} is not an instruction", target)));
            }
        }
        trace!(function = self.ordinal, bytes = self.code.len(), "function verified");
        Ok(())
    }

    fn operands(&self, op: Opcode, inst: &Instruction, targets: &mut Vec<(usize, i32)>) -> VmResult<()> {
        use Opcode::*;
        match op {
            Nop | Yield => Ok(()),
            ConstI32 => self.i32_reg(inst.a),
            ConstRefZero => self.ref_reg(inst.a),
            ConstRefRodata => {
                self.ref_reg(inst.a)?;
                self.ordinal_in("rodata segment", inst.b, self.def.rodata.len())
            }
            MovI32 | NegI32 | NotI32 => {
                self.i32_reg(inst.a)?;
                self.i32_reg(inst.b)
            }
            MovRef => {
                self.ref_reg(inst.a)?;
                self.ref_reg(inst.b)
            }
            AddI32 | SubI32 | MulI32 | DivI32S | DivI32U | RemI32S | RemI32U | AndI32 | OrI32
            | XorI32 | ShlI32 | ShrI32S | ShrI32U | CmpEqI32 | CmpNeI32 | CmpLtI32S | CmpLtI32U => {
                self.i32_reg(inst.a)?;
                self.i32_reg(inst.b)?;
                self.i32_reg(inst.c)
            }
            CmpEqRef => {
                self.i32_reg(inst.a)?;
                self.ref_reg(inst.b)?;
                self.ref_reg(inst.c)
            }
            CmpNzRef => {
                self.i32_reg(inst.a)?;
                self.ref_reg(inst.b)
            }
            GlobalLoadI32 | GlobalStoreI32 => {
                self.i32_reg(inst.a)?;
                self.ordinal_in("i32 global", inst.b, self.def.global_i32_count as usize)
            }
            GlobalLoadRef | GlobalStoreRef => {
                self.ref_reg(inst.a)?;
                self.ordinal_in("ref global", inst.b, self.def.global_ref_count as usize)
            }
            Branch => {
                targets.push((self.pc, inst.imm32()));
                Ok(())
            }
            CondBranch => {
                self.i32_reg(inst.a)?;
                targets.push((self.pc, inst.imm32()));
                Ok(())
            }
            Call => {
                self.ordinal_in("function", inst.a, self.def.functions.len())?;
                let args = self.list(0, inst.b as usize)?;
                self.list(inst.b as usize, inst.c as usize)?;
                let callee = &self.def.functions[inst.a as usize];
                let (i32_args, ref_args) = bank_counts(&args);
                if i32_args > callee.i32_register_count.max(0) as usize
                    || ref_args > callee.ref_register_count.max(0) as usize
                {
                    return Err(self.fail(format_args!(
                        "call passes {}+{} arguments to function {} with {}+{} registers",
                        i32_args,
                        ref_args,
                        inst.a,
                        callee.i32_register_count,
                        callee.ref_register_count
                    )));
                }
                Ok(())
            }
            CallImport => {
                self.ordinal_in("import", inst.a, self.def.imports.len())?;
                self.list(0, inst.b as usize + inst.c as usize)?;
                Ok(())
            }
            CallImportVariadic => {
                self.ordinal_in("import", inst.a, self.def.imports.len())?;
                self.list(inst.flags as usize, inst.b as usize + inst.c as usize)?;
                Ok(())
            }
            Return => {
                self.list(0, inst.b as usize)?;
                Ok(())
            }
        }
    }

    fn i32_reg(&self, index: u16) -> VmResult<()> {
        if (index as usize) < self.i32_count {
            Ok(())
        } else {
            Err(self.fail(format_args!("i32 register {} of {}", index, self.i32_count)))
        }
    }

    fn ref_reg(&self, index: u16) -> VmResult<()> {
        if (index as usize) < self.ref_count {
            Ok(())
        } else {
            Err(self.fail(format_args!("ref register {} of {}", index, self.ref_count)))
        }
    }

    fn ordinal_in(&self, what: &str, ordinal: u16, count: usize) -> VmResult<()> {
        if (ordinal as usize) < count {
            Ok(())
        } else {
            Err(self.fail(format_args!("{} {} of {}", what, ordinal, count)))
        }
    }

    /// Checks `len` register-list entries starting at entry `start`.
    fn list(&self, start: usize, len: usize) -> VmResult<Vec<Register>> {
        let view = ListView::new(self.code, self.pc, start, len);
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            let reg = view
                .get(i)
                .ok_or_else(|| self.fail("register list runs past the end of the function"))?;
            if reg.is_ref() {
                self.ref_reg(reg.index() as u16)?;
            } else {
                if reg.is_move() {
                    return Err(self.fail("move flag on an i32 register"));
                }
                self.i32_reg(reg.index() as u16)?;
            }
            out.push(reg);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivm_common_core::{FunctionBuilder, ModuleBuilder};

    fn single(f: FunctionBuilder) -> ModuleDef {
        let mut m = ModuleBuilder::new("t");
        m.function(f);
        m.build().unwrap()
    }

    fn assert_load_error(def: &ModuleDef) {
        assert!(matches!(verify_module(def), Err(VmError::Load(_))), "{:?}", def);
    }

    #[test]
    fn test_accepts_well_formed() {
        let mut f = FunctionBuilder::new(2, 1);
        let top = f.new_label();
        f.bind(top)
            .const_i32(0, 1)
            .cond_branch(0, top)
            .mov_ref(0, 0, true)
            .ret(&[Register::i32(1), Register::moved(0)]);
        assert!(verify_module(&single(f)).is_ok());
    }

    #[test]
    fn test_register_out_of_range() {
        let mut f = FunctionBuilder::new(1, 0);
        f.const_i32(1, 0).ret(&[]);
        assert_load_error(&single(f));

        let mut f = FunctionBuilder::new(1, 0);
        f.ret(&[Register::reference(0)]);
        assert_load_error(&single(f));
    }

    #[test]
    fn test_unknown_opcode() {
        let mut def = single({
            let mut f = FunctionBuilder::new(0, 0);
            f.nop().ret(&[]);
            f
        });
        def.bytecode[0] = 0xEE;
        assert_load_error(&def);
    }

    #[test]
    fn test_branch_into_register_list() {
        let mut def = single({
            let mut f = FunctionBuilder::new(1, 0);
            let end = f.new_label();
            f.call(0, &[Register::i32(0)], &[]).branch(end).bind(end).ret(&[]);
            f
        });
        // Point the branch at the call's extension word.
        def.bytecode[16 + 4..16 + 8].copy_from_slice(&8i32.to_le_bytes());
        assert_load_error(&def);
    }

    #[test]
    fn test_descriptor_bounds() {
        let mut f = FunctionBuilder::new(0, 0);
        f.ret(&[]);
        let mut def = single(f);
        def.functions[0].bytecode_length = 12;
        assert_load_error(&def);
        def.functions[0].bytecode_length = 64;
        assert_load_error(&def);
        def.functions[0].bytecode_length = 8;
        def.functions[0].ref_register_count = -1;
        assert_load_error(&def);
    }

    #[test]
    fn test_global_storage_limits() {
        let mut f = FunctionBuilder::new(0, 0);
        f.ret(&[]);
        let mut def = single(f);
        def.global_i32_count = MAX_GLOBALS as u32;
        def.global_ref_count = MAX_GLOBALS as u32;
        def.rwdata_size = MAX_RWDATA_SIZE as u32;
        assert!(verify_module(&def).is_ok());

        def.global_ref_count = MAX_GLOBALS as u32 + 1;
        assert_load_error(&def);
        def.global_ref_count = 0;
        def.global_i32_count = u32::MAX;
        assert_load_error(&def);
        def.global_i32_count = 0;
        def.rwdata_size = MAX_RWDATA_SIZE as u32 + 1;
        assert_load_error(&def);
    }

    #[test]
    fn test_export_and_import_ranges() {
        let mut f = FunctionBuilder::new(0, 0);
        f.call_import(1, &[], &[]).ret(&[]);
        let mut m = ModuleBuilder::new("t");
        m.import("x.y");
        m.function(f);
        assert_load_error(&m.build().unwrap());

        let mut f = FunctionBuilder::new(0, 0);
        f.ret(&[]);
        let mut def = single(f);
        def.exports.push(ivm_common_core::ExportDef {
            name: "missing".into(),
            function: 3,
        });
        assert_load_error(&def);
    }
}
