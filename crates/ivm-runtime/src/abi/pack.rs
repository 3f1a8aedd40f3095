//! Result packing.

use std::task::Poll;

use ivm_common_core::{Register, RegisterList, VmResult};

use crate::stack::Frame;
use crate::vm_ref::{Ref, RefObject, VmRef};

/// Outcome of a native call that did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NativeStatus {
    Complete,
    /// Results are written; the calling stack should yield.
    Pending,
}

impl NativeStatus {
    #[inline]
    fn join(self, other: NativeStatus) -> NativeStatus {
        match (self, other) {
            (NativeStatus::Complete, NativeStatus::Complete) => NativeStatus::Complete,
            _ => NativeStatus::Pending,
        }
    }
}

#[derive(Debug, Default)]
pub struct PackState {
    pub i32_ordinal: usize,
    pub ref_ordinal: usize,
}

/// A native return value written into frame registers.
pub trait Results: Sized + 'static {
    /// Appends this value's registers, numbering each bank from the ordinals.
    fn describe(list: &mut RegisterList, i32_ordinal: &mut u16, ref_ordinal: &mut u16);

    fn pack(self, state: &mut PackState, frame: &mut Frame) -> VmResult<NativeStatus>;

    /// Result-register list of a signature returning `Self`.
    fn register_list() -> RegisterList {
        let mut list = RegisterList::new();
        let (mut i, mut r) = (0, 0);
        Self::describe(&mut list, &mut i, &mut r);
        list
    }
}

macro_rules! impl_scalar_results {
    ($($t:ty),*) => {
        $(
            impl Results for $t {
                fn describe(list: &mut RegisterList, i32_ordinal: &mut u16, _ref_ordinal: &mut u16) {
                    list.push(Register::i32(*i32_ordinal));
                    *i32_ordinal += 1;
                }

                #[inline]
                fn pack(self, state: &mut PackState, frame: &mut Frame) -> VmResult<NativeStatus> {
                    frame.registers.set_i32(state.i32_ordinal, self as i32)?;
                    state.i32_ordinal += 1;
                    Ok(NativeStatus::Complete)
                }
            }
        )*
    };
}

impl_scalar_results!(i8, u8, i16, u16, i32, u32);

impl Results for VmRef {
    fn describe(list: &mut RegisterList, _i32_ordinal: &mut u16, ref_ordinal: &mut u16) {
        list.push(Register::moved(*ref_ordinal));
        *ref_ordinal += 1;
    }

    fn pack(self, state: &mut PackState, frame: &mut Frame) -> VmResult<NativeStatus> {
        frame.registers.set_ref(state.ref_ordinal, self)?;
        state.ref_ordinal += 1;
        Ok(NativeStatus::Complete)
    }
}

impl<T: RefObject> Results for Ref<T> {
    fn describe(list: &mut RegisterList, i32_ordinal: &mut u16, ref_ordinal: &mut u16) {
        VmRef::describe(list, i32_ordinal, ref_ordinal);
    }

    fn pack(self, state: &mut PackState, frame: &mut Frame) -> VmResult<NativeStatus> {
        self.into_vm_ref().pack(state, frame)
    }
}

impl Results for () {
    fn describe(_list: &mut RegisterList, _i32_ordinal: &mut u16, _ref_ordinal: &mut u16) {}

    fn pack(self, _state: &mut PackState, _frame: &mut Frame) -> VmResult<NativeStatus> {
        Ok(NativeStatus::Complete)
    }
}

impl Results for Poll<()> {
    fn describe(_list: &mut RegisterList, _i32_ordinal: &mut u16, _ref_ordinal: &mut u16) {}

    fn pack(self, _state: &mut PackState, _frame: &mut Frame) -> VmResult<NativeStatus> {
        Ok(match self {
            Poll::Ready(()) => NativeStatus::Complete,
            Poll::Pending => NativeStatus::Pending,
        })
    }
}

macro_rules! impl_tuple_results {
    ($($p:ident),+) => {
        impl<$($p: Results),+> Results for ($($p,)+) {
            fn describe(list: &mut RegisterList, i32_ordinal: &mut u16, ref_ordinal: &mut u16) {
                $($p::describe(list, i32_ordinal, ref_ordinal);)+
            }

            #[allow(non_snake_case)]
            fn pack(self, state: &mut PackState, frame: &mut Frame) -> VmResult<NativeStatus> {
                let ($($p,)+) = self;
                let mut status = NativeStatus::Complete;
                $(status = status.join($p.pack(state, frame)?);)+
                Ok(status)
            }
        }
    };
}

impl_tuple_results!(A);
impl_tuple_results!(A, B);
impl_tuple_results!(A, B, C);
impl_tuple_results!(A, B, C, D);
impl_tuple_results!(A, B, C, D, E);
impl_tuple_results!(A, B, C, D, E, F);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_register_list_numbers_each_bank() {
        assert_eq!(
            <(VmRef, i32, u8, VmRef)>::register_list(),
            vec![
                Register::moved(0),
                Register::i32(0),
                Register::i32(1),
                Register::moved(1),
            ]
        );
        assert!(<()>::register_list().is_empty());
        assert!(<Poll<()>>::register_list().is_empty());
    }

    #[test]
    fn test_pack_scalars_and_pending() {
        let mut frame = Frame::native(2, 0);
        let mut state = PackState::default();
        let status = (7u8, -3i16).pack(&mut state, &mut frame).unwrap();
        assert_eq!(status, NativeStatus::Complete);
        assert_eq!(frame.registers.i32(0), Ok(7));
        assert_eq!(frame.registers.i32(1), Ok(-3));

        let mut state = PackState::default();
        assert_eq!(
            Poll::<()>::Pending.pack(&mut state, &mut frame),
            Ok(NativeStatus::Pending)
        );
    }

    #[test]
    fn test_pack_out_of_range() {
        let mut frame = Frame::native(0, 0);
        let mut state = PackState::default();
        assert!(5i32.pack(&mut state, &mut frame).is_err());
    }
}
