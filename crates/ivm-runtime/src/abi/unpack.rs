//! Parameter unpacking.

use std::ops::Deref;

use ivm_common_core::{VmError, VmResult};

use crate::stack::Frame;
use crate::vm_ref::{Ref, RefObject, VmRef};

/// Ordinals shared by every parameter of one call, plus the first error.
#[derive(Debug, Default)]
pub struct UnpackState {
    pub i32_ordinal: usize,
    pub ref_ordinal: usize,
    pub varargs_ordinal: usize,
    status: Option<VmError>,
}

impl UnpackState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `err` unless an earlier error is already recorded.
    pub fn fail(&mut self, err: VmError) {
        if self.status.is_none() {
            self.status = Some(err);
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_none()
    }

    /// Takes the accumulated status.
    pub fn check(&mut self) -> VmResult<()> {
        match self.status.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    #[inline]
    fn next_i32(&mut self) -> usize {
        let i = self.i32_ordinal;
        self.i32_ordinal += 1;
        i
    }

    #[inline]
    fn next_ref(&mut self) -> usize {
        let i = self.ref_ordinal;
        self.ref_ordinal += 1;
        i
    }
}

/// Where spans occur inside a parameter type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shape {
    pub is_span: bool,
    pub contains_span: bool,
    /// A span occurs inside another span.
    pub nested_span: bool,
}

impl Shape {
    pub const PLAIN: Shape = Shape {
        is_span: false,
        contains_span: false,
        nested_span: false,
    };

    pub const fn span_of(element: Shape) -> Shape {
        Shape {
            is_span: true,
            contains_span: true,
            nested_span: element.contains_span || element.nested_span,
        }
    }

    pub const fn container(parts: &[Shape]) -> Shape {
        let mut out = Shape::PLAIN;
        let mut i = 0;
        while i < parts.len() {
            out.contains_span = out.contains_span || parts[i].contains_span;
            out.nested_span = out.nested_span || parts[i].nested_span;
            i += 1;
        }
        out
    }
}

/// A value read out of a frame's registers.
///
/// `unpack` always produces a value. On failure it records the error in the
/// state and returns a placeholder, so later parameters still advance their
/// ordinals.
pub trait Param: Sized + 'static {
    const SHAPE: Shape = Shape::PLAIN;

    fn unpack(state: &mut UnpackState, frame: &mut Frame) -> Self;
}

macro_rules! impl_scalar_param {
    ($($t:ty),*) => {
        $(
            impl Param for $t {
                #[inline]
                fn unpack(state: &mut UnpackState, frame: &mut Frame) -> Self {
                    state.varargs_ordinal += 1;
                    let index = state.next_i32();
                    match frame.registers.i32(index) {
                        Ok(v) => v as $t,
                        Err(err) => {
                            state.fail(err);
                            0
                        }
                    }
                }
            }
        )*
    };
}

impl_scalar_param!(i8, u8, i16, u16, i32, u32);

impl<T: RefObject> Param for Ref<T> {
    fn unpack(state: &mut UnpackState, frame: &mut Frame) -> Self {
        state.varargs_ordinal += 1;
        let index = state.next_ref();
        let slot = match frame.registers.ref_mut(index) {
            Ok(slot) => slot,
            Err(err) => {
                state.fail(err);
                return Ref::null();
            }
        };
        if !slot.is_null() && !slot.is_type(T::descriptor()) {
            state.fail(VmError::type_mismatch(T::TYPE_NAME, slot.type_name()));
            return Ref::null();
        }
        Ref::from_vm_ref(slot.take()).unwrap_or_else(|err| {
            state.fail(err);
            Ref::null()
        })
    }
}

impl Param for VmRef {
    fn unpack(state: &mut UnpackState, frame: &mut Frame) -> Self {
        state.varargs_ordinal += 1;
        let index = state.next_ref();
        frame.registers.take_ref(index).unwrap_or_else(|err| {
            state.fail(err);
            VmRef::null()
        })
    }
}

impl<T: Param, const S: usize> Param for [T; S] {
    const SHAPE: Shape = Shape::container(&[T::SHAPE]);

    fn unpack(state: &mut UnpackState, frame: &mut Frame) -> Self {
        state.varargs_ordinal += 1;
        std::array::from_fn(|_| T::unpack(state, frame))
    }
}

macro_rules! impl_tuple_param {
    ($($p:ident),+) => {
        impl<$($p: Param),+> Param for ($($p,)+) {
            const SHAPE: Shape = Shape::container(&[$($p::SHAPE),+]);

            fn unpack(state: &mut UnpackState, frame: &mut Frame) -> Self {
                state.varargs_ordinal += 1;
                ($($p::unpack(state, frame),)+)
            }
        }
    };
}

impl_tuple_param!(A);
impl_tuple_param!(A, B);
impl_tuple_param!(A, B, C);
impl_tuple_param!(A, B, C, D);
impl_tuple_param!(A, B, C, D, E);
impl_tuple_param!(A, B, C, D, E, F);

/// Variable-length trailing parameter. The call site supplies the element
/// count in its segment list.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Span<T>(pub Vec<T>);

impl<T> Span<T> {
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> Deref for Span<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T: Param> Param for Span<T> {
    const SHAPE: Shape = Shape::span_of(T::SHAPE);

    fn unpack(state: &mut UnpackState, frame: &mut Frame) -> Self {
        let saved = state.varargs_ordinal;
        let count = match frame.vararg(saved) {
            Ok(count) => count as usize,
            Err(err) => {
                state.fail(err);
                0
            }
        };
        state.varargs_ordinal += 1;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::unpack(state, frame));
        }
        state.varargs_ordinal = saved;
        Span(items)
    }
}

// =============================================================================
// Parameter lists
// =============================================================================

/// The full parameter tuple of a native signature.
pub trait ParamList: Sized + 'static {
    const SHAPES: &'static [Shape];

    fn unpack_all(state: &mut UnpackState, frame: &mut Frame) -> Self;

    /// Rejects span placements the unpacker cannot express.
    fn check_signature() -> VmResult<()> {
        check_shapes(Self::SHAPES)
    }
}

fn check_shapes(shapes: &[Shape]) -> VmResult<()> {
    let last = shapes.len().saturating_sub(1);
    for (i, shape) in shapes.iter().enumerate() {
        if shape.nested_span {
            return Err(VmError::invalid_argument(format!(
                "parameter {} nests a span inside a span",
                i
            )));
        }
        if shape.contains_span && !(shape.is_span && i == last) {
            return Err(VmError::invalid_argument(format!(
                "parameter {}: a span is only allowed as the last parameter",
                i
            )));
        }
    }
    Ok(())
}

impl ParamList for () {
    const SHAPES: &'static [Shape] = &[];

    fn unpack_all(_state: &mut UnpackState, _frame: &mut Frame) -> Self {}
}

macro_rules! impl_param_list {
    ($($p:ident),+) => {
        impl<$($p: Param),+> ParamList for ($($p,)+) {
            const SHAPES: &'static [Shape] = &[$($p::SHAPE),+];

            fn unpack_all(state: &mut UnpackState, frame: &mut Frame) -> Self {
                ($($p::unpack(state, frame),)+)
            }
        }
    };
}

impl_param_list!(A);
impl_param_list!(A, B);
impl_param_list!(A, B, C);
impl_param_list!(A, B, C, D);
impl_param_list!(A, B, C, D, E);
impl_param_list!(A, B, C, D, E, F);
impl_param_list!(A, B, C, D, E, F, G);
impl_param_list!(A, B, C, D, E, F, G, H);
