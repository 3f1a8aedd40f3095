//! Loaded bytecode modules.
//!
//! A `Module` is decoded and verified once, then shared immutably (`Arc`)
//! by every context instantiated from it.

use std::sync::Arc;

use hashbrown::HashMap;
use ivm_common_core::error::check_index;
use ivm_common_core::{ExportDef, FunctionDescriptor, ModuleDef, Space, VmError, VmResult};
use tracing::debug;

use crate::verify;

/// Import split into its native module and function names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub function: String,
}

impl Import {
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.module, self.function)
    }
}

#[derive(Debug)]
pub struct Module {
    name: String,
    global_i32_count: usize,
    global_ref_count: usize,
    rwdata_size: usize,
    imports: Vec<Import>,
    exports: Vec<ExportDef>,
    export_index: HashMap<String, u32>,
    functions: Vec<FunctionDescriptor>,
    rodata: Vec<Arc<[u8]>>,
    bytecode: Box<[u8]>,
}

impl Module {
    /// Decodes and verifies a module binary.
    pub fn load(bytes: &[u8]) -> VmResult<Arc<Module>> {
        Self::from_def(ModuleDef::from_bytes(bytes)?)
    }

    pub fn from_def(def: ModuleDef) -> VmResult<Arc<Module>> {
        verify::verify_module(&def)?;

        let mut imports = Vec::with_capacity(def.imports.len());
        for import in &def.imports {
            let (module, function) = import
                .split()
                .ok_or_else(|| VmError::load(format!("malformed import name `{}`", import.name)))?;
            imports.push(Import {
                module: module.to_string(),
                function: function.to_string(),
            });
        }

        let mut export_index = HashMap::with_capacity(def.exports.len());
        for export in &def.exports {
            if export_index.insert(export.name.clone(), export.function).is_some() {
                return Err(VmError::load(format!("duplicate export `{}`", export.name)));
            }
        }

        debug!(
            module = %def.name,
            functions = def.functions.len(),
            imports = imports.len(),
            exports = def.exports.len(),
            bytecode = def.bytecode.len(),
            "module loaded"
        );

        Ok(Arc::new(Module {
            name: def.name,
            global_i32_count: def.global_i32_count as usize,
            global_ref_count: def.global_ref_count as usize,
            rwdata_size: def.rwdata_size as usize,
            imports,
            exports: def.exports,
            export_index,
            functions: def.functions,
            rodata: def.rodata.into_iter().map(Arc::from).collect(),
            bytecode: def.bytecode.into_boxed_slice(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn global_i32_count(&self) -> usize {
        self.global_i32_count
    }

    pub fn global_ref_count(&self) -> usize {
        self.global_ref_count
    }

    pub fn rwdata_size(&self) -> usize {
        self.rwdata_size
    }

    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    pub fn exports(&self) -> &[ExportDef] {
        &self.exports
    }

    pub fn functions(&self) -> &[FunctionDescriptor] {
        &self.functions
    }

    pub fn rodata_segments(&self) -> &[Arc<[u8]>] {
        &self.rodata
    }

    /// Function ordinal of an export.
    pub fn find_export(&self, name: &str) -> Option<u32> {
        self.export_index.get(name).copied()
    }

    #[inline]
    pub fn function(&self, ordinal: u32) -> VmResult<&FunctionDescriptor> {
        check_index(Space::Function, ordinal as usize, self.functions.len())?;
        Ok(&self.functions[ordinal as usize])
    }

    /// Bytecode body of a function. Offsets are in bounds after verification.
    #[inline]
    pub fn function_code(&self, ordinal: u32) -> VmResult<&[u8]> {
        let desc = self.function(ordinal)?;
        let start = desc.bytecode_offset as usize;
        let end = start + desc.bytecode_length as usize;
        self.bytecode
            .get(start..end)
            .ok_or_else(|| VmError::out_of_range(Space::Bytecode, end, self.bytecode.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivm_common_core::{FunctionBuilder, ModuleBuilder};

    fn two_functions() -> ModuleDef {
        let mut m = ModuleBuilder::new("m");
        let mut f = FunctionBuilder::new(1, 0);
        f.const_i32(0, 1).ret(&[]);
        let a = m.function(f);
        let mut g = FunctionBuilder::new(0, 0);
        g.nop().ret(&[]);
        let b = m.function(g);
        m.export("a", a).export("b", b);
        m.import("hal.buffer.fill");
        m.build().unwrap()
    }

    #[test]
    fn test_load_indexes_exports_and_imports() {
        let module = Module::load(&two_functions().to_bytes()).unwrap();
        assert_eq!(module.find_export("b"), Some(1));
        assert_eq!(module.find_export("c"), None);
        assert_eq!(module.imports()[0].module, "hal");
        assert_eq!(module.imports()[0].function, "buffer.fill");
        assert_eq!(module.function_code(1).unwrap().len(), 16);
        assert!(module.function(2).is_err());
    }

    #[test]
    fn test_duplicate_export_rejected() {
        let mut def = two_functions();
        def.exports[1].name = "a".into();
        assert!(matches!(Module::from_def(def), Err(VmError::Load(_))));
    }
}
