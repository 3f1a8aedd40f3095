//! Module binary layout: function descriptors, imports, exports, rodata.
//!
//! `ModuleDef` is the decoded, not yet validated, form of a module binary.
//! The VM validates it once at load and trusts it afterwards.

/// Matches the function descriptor record of the binary layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FunctionDescriptor {
    pub bytecode_offset: i32,
    pub bytecode_length: i32,
    pub i32_register_count: i8,
    pub ref_register_count: i8,
}

impl FunctionDescriptor {
    pub const ENCODED_LEN: usize = 10;

    pub fn new(bytecode_offset: i32, bytecode_length: i32, i32_count: i8, ref_count: i8) -> Self {
        Self {
            bytecode_offset,
            bytecode_length,
            i32_register_count: i32_count,
            ref_register_count: ref_count,
        }
    }
}

/// Imported native function, named `module.function`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportDef {
    pub name: String,
}

impl ImportDef {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }

    /// Splits `module.function` at the first dot.
    pub fn split(&self) -> Option<(&str, &str)> {
        let (module, function) = self.name.split_once('.')?;
        if module.is_empty() || function.is_empty() {
            return None;
        }
        Some((module, function))
    }
}

/// Exported entry point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportDef {
    pub name: String,
    pub function: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleDef {
    pub name: String,
    pub global_i32_count: u32,
    pub global_ref_count: u32,
    /// Raw rwdata bytes following the global i32 table.
    pub rwdata_size: u32,
    pub imports: Vec<ImportDef>,
    pub exports: Vec<ExportDef>,
    pub functions: Vec<FunctionDescriptor>,
    pub rodata: Vec<Vec<u8>>,
    pub bytecode: Vec<u8>,
}

impl ModuleDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Find export by name.
    pub fn find_export(&self, name: &str) -> Option<&ExportDef> {
        self.exports.iter().find(|e| e.name == name)
    }

    /// Find import ordinal by full name.
    pub fn find_import(&self, name: &str) -> Option<u32> {
        self.imports.iter().position(|i| i.name == name).map(|i| i as u32)
    }
}
