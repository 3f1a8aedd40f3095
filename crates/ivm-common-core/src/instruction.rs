//! Instruction format and opcodes.
//!
//! Every instruction is an 8-byte record. Calls and returns are followed by
//! extension words, each holding four little-endian `u16` register-list
//! entries (see [`crate::register`]).
//!
//! Operand layout:
//!
//! | opcode | operands |
//! |---|---|
//! | `ConstI32` | a=dst, imm32=b\|c<<16 |
//! | `ConstRefZero` | a=dst |
//! | `ConstRefRodata` | a=dst, b=rodata ordinal |
//! | `MovI32` | a=dst, b=src |
//! | `MovRef` | a=dst, b=src, flags bit 0 = move |
//! | binary i32 ops, `Cmp*` | a=dst, b=lhs, c=rhs |
//! | `NotI32`, `NegI32`, `CmpNzRef` | a=dst, b=src |
//! | `GlobalLoad*` | a=dst, b=global ordinal |
//! | `GlobalStore*` | a=src, b=global ordinal |
//! | `Branch` | imm32=target byte offset |
//! | `CondBranch` | a=condition, imm32=target byte offset |
//! | `Call`, `CallImport` | a=callee, b=arg count, c=result count, then args, results |
//! | `CallImportVariadic` | like `CallImport`, flags=segment count, segments first |
//! | `Return` | b=result count, then results |

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::limits::REGISTERS_PER_WORD;

pub const INSTRUCTION_BYTES: usize = 8;

/// 8-byte fixed instruction format.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: u8,
    pub flags: u8,
    pub a: u16,
    pub b: u16,
    pub c: u16,
}

impl Instruction {
    #[inline]
    pub const fn new(op: Opcode, a: u16, b: u16, c: u16) -> Self {
        Self {
            op: op as u8,
            flags: 0,
            a,
            b,
            c,
        }
    }

    #[inline]
    pub const fn with_flags(op: Opcode, flags: u8, a: u16, b: u16, c: u16) -> Self {
        Self {
            op: op as u8,
            flags,
            a,
            b,
            c,
        }
    }

    /// Builds an instruction carrying a 32-bit immediate in `b`/`c`.
    #[inline]
    pub const fn with_imm32(op: Opcode, a: u16, imm: i32) -> Self {
        let raw = imm as u32;
        Self::new(op, a, raw as u16, (raw >> 16) as u16)
    }

    #[inline]
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::try_from(self.op).ok()
    }

    #[inline]
    pub fn imm32(&self) -> i32 {
        self.imm32_unsigned() as i32
    }

    #[inline]
    pub fn imm32_unsigned(&self) -> u32 {
        (self.b as u32) | ((self.c as u32) << 16)
    }

    /// Number of register-list entries that follow this instruction.
    #[inline]
    pub fn list_entries(&self) -> usize {
        match self.opcode() {
            Some(Opcode::Call) | Some(Opcode::CallImport) => self.b as usize + self.c as usize,
            Some(Opcode::CallImportVariadic) => {
                self.flags as usize + self.b as usize + self.c as usize
            }
            Some(Opcode::Return) => self.b as usize,
            _ => 0,
        }
    }

    /// Total encoded size including extension words.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        INSTRUCTION_BYTES * (1 + ext_words(self.list_entries()))
    }

    pub fn encode(&self) -> [u8; INSTRUCTION_BYTES] {
        let a = self.a.to_le_bytes();
        let b = self.b.to_le_bytes();
        let c = self.c.to_le_bytes();
        [self.op, self.flags, a[0], a[1], b[0], b[1], c[0], c[1]]
    }

    /// Decodes the instruction at `pc`. Returns `None` past the end.
    #[inline]
    pub fn decode(code: &[u8], pc: usize) -> Option<Self> {
        let raw = code.get(pc..pc + INSTRUCTION_BYTES)?;
        Some(Self {
            op: raw[0],
            flags: raw[1],
            a: u16::from_le_bytes([raw[2], raw[3]]),
            b: u16::from_le_bytes([raw[4], raw[5]]),
            c: u16::from_le_bytes([raw[6], raw[7]]),
        })
    }
}

/// Extension words needed for `entries` register-list entries.
#[inline]
pub const fn ext_words(entries: usize) -> usize {
    (entries + REGISTERS_PER_WORD - 1) / REGISTERS_PER_WORD
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Opcode {
    // === LOAD ===
    Nop = 0,
    ConstI32,
    ConstRefZero,
    ConstRefRodata,

    // === MOVE ===
    MovI32,
    MovRef,

    // === ARITH: i32 ===
    AddI32,
    SubI32,
    MulI32,
    DivI32S,
    DivI32U,
    RemI32S,
    RemI32U,
    NegI32,

    // === BIT: i32 ===
    AndI32,
    OrI32,
    XorI32,
    NotI32,
    ShlI32,
    ShrI32S,
    ShrI32U,

    // === CMP ===
    CmpEqI32,
    CmpNeI32,
    CmpLtI32S,
    CmpLtI32U,
    CmpEqRef,
    CmpNzRef,

    // === GLOBAL ===
    GlobalLoadI32,
    GlobalStoreI32,
    GlobalLoadRef,
    GlobalStoreRef,

    // === JUMP ===
    Branch,
    CondBranch,

    // === CALL ===
    Call,
    CallImport,
    CallImportVariadic,
    Return,

    // === CONTROL ===
    Yield,
}

impl Opcode {
    #[inline]
    pub fn from_u8(v: u8) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Whether this opcode is followed by a register list.
    #[inline]
    pub fn has_register_list(self) -> bool {
        matches!(
            self,
            Opcode::Call | Opcode::CallImport | Opcode::CallImportVariadic | Opcode::Return
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_size() {
        assert_eq!(core::mem::size_of::<Instruction>(), INSTRUCTION_BYTES);
    }

    #[test]
    fn test_imm32() {
        let inst = Instruction::new(Opcode::ConstI32, 0, 0x1234, 0x5678);
        assert_eq!(inst.imm32_unsigned(), 0x56781234);
    }

    #[test]
    fn test_imm32_signed() {
        let inst = Instruction::with_imm32(Opcode::ConstI32, 3, -1);
        assert_eq!(inst.b, 0xFFFF);
        assert_eq!(inst.c, 0xFFFF);
        assert_eq!(inst.imm32(), -1);
    }

    #[test]
    fn test_opcode_roundtrip() {
        let last = Opcode::Yield as u8;
        for i in 0..=last {
            let op = Opcode::from_u8(i).expect("opcode should be valid");
            assert_eq!(op as u8, i);
        }
        assert_eq!(Opcode::from_u8(last + 1), None);
    }

    #[test]
    fn test_encode_decode() {
        let inst = Instruction::with_flags(Opcode::MovRef, 1, 2, 3, 0);
        let bytes = inst.encode();
        assert_eq!(Instruction::decode(&bytes, 0), Some(inst));
        assert_eq!(Instruction::decode(&bytes, 1), None);
    }

    #[test]
    fn test_call_encoded_len() {
        // 3 args + 2 results = 5 entries -> 2 extension words
        let call = Instruction::new(Opcode::Call, 0, 3, 2);
        assert_eq!(call.encoded_len(), 24);
        let ret = Instruction::new(Opcode::Return, 0, 0, 0);
        assert_eq!(ret.encoded_len(), 8);
        let variadic = Instruction::with_flags(Opcode::CallImportVariadic, 2, 0, 2, 0);
        assert_eq!(variadic.encoded_len(), 16);
    }
}
