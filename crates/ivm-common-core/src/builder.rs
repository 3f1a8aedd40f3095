//! Module assembler.
//!
//! There is no compiler front end in this workspace; tests and tools build
//! module binaries with `ModuleBuilder` and `FunctionBuilder`.
//!
//! ```ignore
//! let mut f = FunctionBuilder::new(2, 0);
//! f.binary(Opcode::AddI32, 0, 0, 1).ret(&[Register::i32(0)]);
//! let mut m = ModuleBuilder::new("math");
//! let add = m.function(f);
//! m.export("add", add);
//! let bytes = m.to_bytes()?;
//! ```

use crate::bytecode::{ExportDef, FunctionDescriptor, ImportDef, ModuleDef};
use crate::error::{VmError, VmResult};
use crate::instruction::{ext_words, Instruction, Opcode, INSTRUCTION_BYTES};
use crate::register::Register;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Label(usize);

pub struct FunctionBuilder {
    i32_count: i8,
    ref_count: i8,
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    /// (pc of branch instruction, target label)
    fixups: Vec<(usize, Label)>,
    /// First encoding failure, reported by `finish`.
    error: Option<VmError>,
}

impl FunctionBuilder {
    pub fn new(i32_count: i8, ref_count: i8) -> Self {
        Self {
            i32_count,
            ref_count,
            code: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            error: None,
        }
    }

    /// Byte offset of the next instruction.
    pub fn pc(&self) -> usize {
        self.code.len()
    }

    pub fn emit(&mut self, inst: Instruction) -> &mut Self {
        self.code.extend_from_slice(&inst.encode());
        self
    }

    fn emit_list(&mut self, inst: Instruction, entries: &[u16]) -> &mut Self {
        self.emit(inst);
        let start = self.code.len();
        for e in entries {
            self.code.extend_from_slice(&e.to_le_bytes());
        }
        self.code.resize(start + ext_words(entries.len()) * INSTRUCTION_BYTES, 0);
        self
    }

    pub fn nop(&mut self) -> &mut Self {
        self.emit(Instruction::new(Opcode::Nop, 0, 0, 0))
    }

    pub fn const_i32(&mut self, dst: u16, value: i32) -> &mut Self {
        self.emit(Instruction::with_imm32(Opcode::ConstI32, dst, value))
    }

    pub fn const_ref_zero(&mut self, dst: u16) -> &mut Self {
        self.emit(Instruction::new(Opcode::ConstRefZero, dst, 0, 0))
    }

    pub fn const_ref_rodata(&mut self, dst: u16, rodata: u16) -> &mut Self {
        self.emit(Instruction::new(Opcode::ConstRefRodata, dst, rodata, 0))
    }

    pub fn mov_i32(&mut self, dst: u16, src: u16) -> &mut Self {
        self.emit(Instruction::new(Opcode::MovI32, dst, src, 0))
    }

    pub fn mov_ref(&mut self, dst: u16, src: u16, moved: bool) -> &mut Self {
        self.emit(Instruction::with_flags(Opcode::MovRef, moved as u8, dst, src, 0))
    }

    /// Three-register op: arithmetic, bitwise, comparisons.
    pub fn binary(&mut self, op: Opcode, dst: u16, lhs: u16, rhs: u16) -> &mut Self {
        self.emit(Instruction::new(op, dst, lhs, rhs))
    }

    /// Two-register op: `NotI32`, `NegI32`, `CmpNzRef`.
    pub fn unary(&mut self, op: Opcode, dst: u16, src: u16) -> &mut Self {
        self.emit(Instruction::new(op, dst, src, 0))
    }

    pub fn global_load_i32(&mut self, dst: u16, global: u16) -> &mut Self {
        self.emit(Instruction::new(Opcode::GlobalLoadI32, dst, global, 0))
    }

    pub fn global_store_i32(&mut self, src: u16, global: u16) -> &mut Self {
        self.emit(Instruction::new(Opcode::GlobalStoreI32, src, global, 0))
    }

    pub fn global_load_ref(&mut self, dst: u16, global: u16) -> &mut Self {
        self.emit(Instruction::new(Opcode::GlobalLoadRef, dst, global, 0))
    }

    pub fn global_store_ref(&mut self, src: u16, global: u16) -> &mut Self {
        self.emit(Instruction::new(Opcode::GlobalStoreRef, src, global, 0))
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current pc.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.code.len());
        self
    }

    pub fn branch(&mut self, target: Label) -> &mut Self {
        self.fixups.push((self.code.len(), target));
        self.emit(Instruction::new(Opcode::Branch, 0, 0, 0))
    }

    pub fn cond_branch(&mut self, cond: u16, target: Label) -> &mut Self {
        self.fixups.push((self.code.len(), target));
        self.emit(Instruction::new(Opcode::CondBranch, cond, 0, 0))
    }

    pub fn call(&mut self, function: u16, args: &[Register], results: &[Register]) -> &mut Self {
        let inst = Instruction::new(Opcode::Call, function, args.len() as u16, results.len() as u16);
        let entries: Vec<u16> = args.iter().chain(results).map(|r| r.raw()).collect();
        self.emit_list(inst, &entries)
    }

    pub fn call_import(&mut self, import: u16, args: &[Register], results: &[Register]) -> &mut Self {
        let inst = Instruction::new(
            Opcode::CallImport,
            import,
            args.len() as u16,
            results.len() as u16,
        );
        let entries: Vec<u16> = args.iter().chain(results).map(|r| r.raw()).collect();
        self.emit_list(inst, &entries)
    }

    /// Import call with a vararg segment list. Every unpacked value consumes
    /// one segment entry (arrays and tuples one for themselves plus their
    /// elements); a span's entry holds its element count.
    pub fn call_import_variadic(
        &mut self,
        import: u16,
        segments: &[u16],
        args: &[Register],
        results: &[Register],
    ) -> &mut Self {
        let Ok(segment_count) = u8::try_from(segments.len()) else {
            self.fail(format!(
                "{} vararg segments exceed the limit of {}",
                segments.len(),
                u8::MAX
            ));
            return self;
        };
        let inst = Instruction::with_flags(
            Opcode::CallImportVariadic,
            segment_count,
            import,
            args.len() as u16,
            results.len() as u16,
        );
        let entries: Vec<u16> = segments
            .iter()
            .copied()
            .chain(args.iter().chain(results).map(|r| r.raw()))
            .collect();
        self.emit_list(inst, &entries)
    }

    pub fn ret(&mut self, results: &[Register]) -> &mut Self {
        let inst = Instruction::new(Opcode::Return, 0, results.len() as u16, 0);
        let entries: Vec<u16> = results.iter().map(|r| r.raw()).collect();
        self.emit_list(inst, &entries)
    }

    pub fn yield_now(&mut self) -> &mut Self {
        self.emit(Instruction::new(Opcode::Yield, 0, 0, 0))
    }

    fn fail(&mut self, msg: String) {
        if self.error.is_none() {
            self.error = Some(VmError::invalid_argument(msg));
        }
    }

    fn finish(mut self) -> VmResult<(Vec<u8>, i8, i8)> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        for (pc, label) in core::mem::take(&mut self.fixups) {
            let target = self.labels[label.0]
                .ok_or_else(|| VmError::invalid_argument(format!("unbound label {}", label.0)))?;
            let raw = (target as u32).to_le_bytes();
            self.code[pc + 4..pc + 8].copy_from_slice(&raw);
        }
        Ok((self.code, self.i32_count, self.ref_count))
    }
}

#[derive(Default)]
pub struct ModuleBuilder {
    def: ModuleDef,
    functions: Vec<Option<FunctionBuilder>>,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            def: ModuleDef::new(name),
            functions: Vec::new(),
        }
    }

    pub fn globals(&mut self, i32_count: u32, ref_count: u32) -> &mut Self {
        self.def.global_i32_count = i32_count;
        self.def.global_ref_count = ref_count;
        self
    }

    pub fn rwdata(&mut self, size: u32) -> &mut Self {
        self.def.rwdata_size = size;
        self
    }

    /// Declares an import and returns its ordinal.
    pub fn import(&mut self, name: &str) -> u16 {
        if let Some(i) = self.def.find_import(name) {
            return i as u16;
        }
        self.def.imports.push(ImportDef::new(name));
        (self.def.imports.len() - 1) as u16
    }

    pub fn rodata(&mut self, bytes: &[u8]) -> u16 {
        self.def.rodata.push(bytes.to_vec());
        (self.def.rodata.len() - 1) as u16
    }

    /// Reserves a function ordinal to be defined later (for forward calls).
    pub fn reserve_function(&mut self) -> u16 {
        self.functions.push(None);
        (self.functions.len() - 1) as u16
    }

    pub fn define_function(&mut self, ordinal: u16, f: FunctionBuilder) -> &mut Self {
        self.functions[ordinal as usize] = Some(f);
        self
    }

    pub fn function(&mut self, f: FunctionBuilder) -> u16 {
        let ordinal = self.reserve_function();
        self.define_function(ordinal, f);
        ordinal
    }

    pub fn export(&mut self, name: &str, function: u16) -> &mut Self {
        self.def.exports.push(ExportDef {
            name: name.to_string(),
            function: function as u32,
        });
        self
    }

    pub fn build(self) -> VmResult<ModuleDef> {
        let mut def = self.def;
        for (ordinal, f) in self.functions.into_iter().enumerate() {
            let f = f.ok_or_else(|| {
                VmError::invalid_argument(format!("function {} reserved but not defined", ordinal))
            })?;
            let (code, i32_count, ref_count) = f.finish()?;
            let offset = def.bytecode.len();
            def.bytecode.extend_from_slice(&code);
            def.functions.push(FunctionDescriptor::new(
                offset as i32,
                code.len() as i32,
                i32_count,
                ref_count,
            ));
        }
        Ok(def)
    }

    pub fn to_bytes(self) -> VmResult<Vec<u8>> {
        Ok(self.build()?.to_bytes())
    }
}
