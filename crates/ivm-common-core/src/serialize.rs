//! Binary encoding of `ModuleDef`.
//!
//! Layout (little-endian, `str` = u32 length + UTF-8 bytes):
//!
//! ```text
//! magic "IVMB" | version u32
//! name str
//! global_i32_count u32 | global_ref_count u32 | rwdata_size u32
//! imports   u32 count, each str
//! exports   u32 count, each str + u32 function ordinal
//! functions u32 count, each i32 offset, i32 length, i8 i32_count, i8 ref_count
//! rodata    u32 count, each u32 length + bytes
//! bytecode  u32 length + bytes
//! ```
//!
//! Decoding only checks structure. Semantic validation happens at module load.

use crate::bytecode::{ExportDef, FunctionDescriptor, ImportDef, ModuleDef};
use crate::error::{VmError, VmResult};
use crate::limits::{MAGIC, VERSION};

// =============================================================================
// Writer
// =============================================================================

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    fn bytes(&mut self, b: &[u8]) {
        self.u32(b.len() as u32);
        self.buf.extend_from_slice(b);
    }

    fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }
}

impl ModuleDef {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer { buf: Vec::with_capacity(64 + self.bytecode.len()) };
        w.buf.extend_from_slice(&MAGIC);
        w.u32(VERSION);
        w.str(&self.name);
        w.u32(self.global_i32_count);
        w.u32(self.global_ref_count);
        w.u32(self.rwdata_size);

        w.u32(self.imports.len() as u32);
        for import in &self.imports {
            w.str(&import.name);
        }

        w.u32(self.exports.len() as u32);
        for export in &self.exports {
            w.str(&export.name);
            w.u32(export.function);
        }

        w.u32(self.functions.len() as u32);
        for f in &self.functions {
            w.i32(f.bytecode_offset);
            w.i32(f.bytecode_length);
            w.i8(f.i32_register_count);
            w.i8(f.ref_register_count);
        }

        w.u32(self.rodata.len() as u32);
        for segment in &self.rodata {
            w.bytes(segment);
        }

        w.bytes(&self.bytecode);
        w.buf
    }

    pub fn from_bytes(data: &[u8]) -> VmResult<Self> {
        let mut r = Reader { data, pos: 0 };

        let magic = r.take(4, "magic")?;
        if magic != MAGIC {
            return Err(VmError::load("bad magic"));
        }
        let version = r.u32("version")?;
        if version != VERSION {
            return Err(VmError::load(format!(
                "unsupported version {} (expected {})",
                version, VERSION
            )));
        }

        let mut def = ModuleDef::new(&r.str("module name")?);
        def.global_i32_count = r.u32("global i32 count")?;
        def.global_ref_count = r.u32("global ref count")?;
        def.rwdata_size = r.u32("rwdata size")?;

        let count = r.count("import count", 4)?;
        for _ in 0..count {
            def.imports.push(ImportDef { name: r.str("import name")? });
        }

        let count = r.count("export count", 8)?;
        for _ in 0..count {
            let name = r.str("export name")?;
            let function = r.u32("export ordinal")?;
            def.exports.push(ExportDef { name, function });
        }

        let count = r.count("function count", FunctionDescriptor::ENCODED_LEN)?;
        for _ in 0..count {
            def.functions.push(FunctionDescriptor {
                bytecode_offset: r.i32("bytecode offset")?,
                bytecode_length: r.i32("bytecode length")?,
                i32_register_count: r.i8("i32 register count")?,
                ref_register_count: r.i8("ref register count")?,
            });
        }

        let count = r.count("rodata count", 4)?;
        for _ in 0..count {
            def.rodata.push(r.bytes("rodata segment")?.to_vec());
        }

        def.bytecode = r.bytes("bytecode")?.to_vec();

        if r.pos != data.len() {
            return Err(VmError::load(format!(
                "{} trailing bytes after bytecode",
                data.len() - r.pos
            )));
        }
        Ok(def)
    }
}

// =============================================================================
// Reader
// =============================================================================

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, what: &str) -> VmResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| VmError::load(format!("truncated {} at byte {}", what, self.pos)))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self, what: &str) -> VmResult<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self, what: &str) -> VmResult<i32> {
        Ok(self.u32(what)? as i32)
    }

    fn i8(&mut self, what: &str) -> VmResult<i8> {
        Ok(self.take(1, what)?[0] as i8)
    }

    /// Reads an element count, rejecting counts the remaining input cannot hold.
    fn count(&mut self, what: &str, min_elem_len: usize) -> VmResult<usize> {
        let n = self.u32(what)? as usize;
        let remaining = self.data.len() - self.pos;
        if n.saturating_mul(min_elem_len) > remaining {
            return Err(VmError::load(format!("{} {} exceeds remaining input", what, n)));
        }
        Ok(n)
    }

    fn bytes(&mut self, what: &str) -> VmResult<&'a [u8]> {
        let len = self.u32(what)? as usize;
        self.take(len, what)
    }

    fn str(&mut self, what: &str) -> VmResult<String> {
        let raw = self.bytes(what)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| VmError::load(format!("{} is not valid UTF-8", what)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> ModuleDef {
        let mut def = ModuleDef::new("sample");
        def.global_i32_count = 2;
        def.global_ref_count = 1;
        def.rwdata_size = 16;
        def.imports.push(ImportDef::new("hal.buffer.allocate"));
        def.exports.push(ExportDef { name: "main".into(), function: 0 });
        def.functions.push(FunctionDescriptor::new(0, 8, 2, 0));
        def.rodata.push(vec![1, 2, 3]);
        def.bytecode = vec![0; 8];
        def
    }

    #[test]
    fn test_decode_matches_encoded_module() {
        let def = sample();
        assert_eq!(ModuleDef::from_bytes(&def.to_bytes()), Ok(def));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        assert_eq!(ModuleDef::from_bytes(&bytes), Err(VmError::load("bad magic")));
    }

    #[test]
    fn test_truncated_input() {
        let bytes = sample().to_bytes();
        let err = ModuleDef::from_bytes(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, VmError::Load(_)));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = sample().to_bytes();
        bytes.push(0);
        assert!(matches!(ModuleDef::from_bytes(&bytes), Err(VmError::Load(_))));
    }

    #[test]
    fn test_huge_count_rejected_without_allocating() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // empty name
        bytes.extend_from_slice(&[0u8; 12]);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes()); // import count
        assert!(matches!(ModuleDef::from_bytes(&bytes), Err(VmError::Load(_))));
    }
}
