//! Marshaling between native Rust signatures and the register convention.
//!
//! A native function is an ordinary Rust function or closure
//! `Fn(&mut Owner, A, B, ..) -> VmResult<R>`. Its parameter types implement
//! [`Param`], its result type [`Results`]. [`bind`] turns it into a uniform
//! [`Thunk`] plus the result-register list the dispatcher moves results
//! through. The register read/write sequence is fixed per signature by
//! monomorphization.
//!
//! Parameters are read left to right from a frame with three shared ordinals:
//!
//! | type | consumes |
//! |---|---|
//! | `i8 u8 i16 u16 i32 u32` | one i32 register |
//! | `Ref<T>` | one ref register, moved out, type checked (null accepted) |
//! | `VmRef` | one ref register, moved out, any type |
//! | `[T; S]` | `S` elements |
//! | tuples | each component in order |
//! | `Span<T>` (trailing only) | a count from the segment list, then that many `T` |
//!
//! Every non-span value bumps the vararg ordinal on entry. A span reads its
//! count at the current vararg ordinal and restores the ordinal when done.

mod bind;
mod pack;
mod unpack;

pub use bind::{bind, NativeFn, RawThunk, Thunk};
pub use pack::{NativeStatus, PackState, Results};
pub use unpack::{Param, ParamList, Shape, Span, UnpackState};
