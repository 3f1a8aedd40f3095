//! Register-list entries.
//!
//! A register list names, per logical value, a physical register and its bank.
//! Ref entries may carry a move flag: the value is transferred and the source
//! register zeroed instead of retained.
//!
//! Entry encoding (`u16`): bit 15 = ref bank, bit 14 = move, bits 0..13 = index.

use std::fmt;

use crate::instruction::INSTRUCTION_BYTES;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register(u16);

impl Register {
    pub const REF_BIT: u16 = 0x8000;
    pub const MOVE_BIT: u16 = 0x4000;
    pub const INDEX_MASK: u16 = 0x3FFF;

    #[inline]
    pub const fn i32(index: u16) -> Self {
        Self(index & Self::INDEX_MASK)
    }

    #[inline]
    pub const fn reference(index: u16) -> Self {
        Self(Self::REF_BIT | (index & Self::INDEX_MASK))
    }

    /// Ref register whose value is moved rather than retained.
    #[inline]
    pub const fn moved(index: u16) -> Self {
        Self(Self::REF_BIT | Self::MOVE_BIT | (index & Self::INDEX_MASK))
    }

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn is_ref(self) -> bool {
        self.0 & Self::REF_BIT != 0
    }

    #[inline]
    pub const fn is_move(self) -> bool {
        self.0 & Self::MOVE_BIT != 0
    }

    #[inline]
    pub const fn index(self) -> usize {
        (self.0 & Self::INDEX_MASK) as usize
    }

    /// Same bank and index with the move flag set or cleared.
    #[inline]
    pub const fn with_move(self, moved: bool) -> Self {
        if moved {
            Self(self.0 | Self::MOVE_BIT)
        } else {
            Self(self.0 & !Self::MOVE_BIT)
        }
    }
}

impl fmt::Debug for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_ref(), self.is_move()) {
            (false, _) => write!(f, "i{}", self.index()),
            (true, false) => write!(f, "r{}", self.index()),
            (true, true) => write!(f, "r{}!", self.index()),
        }
    }
}

pub type RegisterList = Vec<Register>;

/// Counts of i32 and ref entries in a list.
pub fn bank_counts(list: &[Register]) -> (usize, usize) {
    list.iter().fold((0, 0), |(i, r), reg| {
        if reg.is_ref() {
            (i, r + 1)
        } else {
            (i + 1, r)
        }
    })
}

/// Reads entry `i` of the register list that follows the instruction at `pc`.
#[inline]
pub fn list_entry(code: &[u8], pc: usize, i: usize) -> Option<u16> {
    let at = pc + INSTRUCTION_BYTES + i * 2;
    let raw = code.get(at..at + 2)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

/// Borrowed view of a register list embedded in bytecode.
#[derive(Clone, Copy, Debug)]
pub struct ListView<'a> {
    code: &'a [u8],
    pc: usize,
    start: usize,
    len: usize,
}

impl<'a> ListView<'a> {
    /// View of entries `start..start + len` following the instruction at `pc`.
    pub fn new(code: &'a [u8], pc: usize, start: usize, len: usize) -> Self {
        Self { code, pc, start, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn raw(&self, i: usize) -> Option<u16> {
        if i >= self.len {
            return None;
        }
        list_entry(self.code, self.pc, self.start + i)
    }

    #[inline]
    pub fn get(&self, i: usize) -> Option<Register> {
        self.raw(i).map(Register::from_raw)
    }

    pub fn iter(&self) -> impl Iterator<Item = Register> + 'a {
        let view = *self;
        (0..view.len).filter_map(move |i| view.get(i))
    }

    pub fn to_list(&self) -> RegisterList {
        self.iter().collect()
    }
}
