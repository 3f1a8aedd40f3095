//! Binding native signatures to uniform dispatch thunks.

use ivm_common_core::{RegisterList, VmResult};

use super::pack::{NativeStatus, PackState, Results};
use super::unpack::{ParamList, UnpackState};
use crate::stack::{Frame, Stack};

/// Uniform entry point of a bound native function.
pub type Thunk<Owner> =
    Box<dyn Fn(&mut Owner, &mut Stack, &mut Frame) -> VmResult<NativeStatus> + Send + Sync>;

/// Hand-written thunk that reads and writes the frame itself.
pub type RawThunk<Owner> = fn(&mut Owner, &mut Stack, &mut Frame) -> VmResult<NativeStatus>;

/// A native function callable with `Args` unpacked from registers.
pub trait NativeFn<Owner, Args, R>: Send + Sync + 'static {
    fn invoke(&self, owner: &mut Owner, args: Args) -> VmResult<R>;
}

macro_rules! impl_native_fn {
    ($($p:ident),*) => {
        impl<Owner, Func, R, $($p,)*> NativeFn<Owner, ($($p,)*), R> for Func
        where
            Func: Fn(&mut Owner, $($p),*) -> VmResult<R> + Send + Sync + 'static,
        {
            #[inline]
            #[allow(non_snake_case)]
            fn invoke(&self, owner: &mut Owner, args: ($($p,)*)) -> VmResult<R> {
                let ($($p,)*) = args;
                (self)(owner, $($p),*)
            }
        }
    };
}

impl_native_fn!();
impl_native_fn!(A);
impl_native_fn!(A, B);
impl_native_fn!(A, B, C);
impl_native_fn!(A, B, C, D);
impl_native_fn!(A, B, C, D, E);
impl_native_fn!(A, B, C, D, E, F);
impl_native_fn!(A, B, C, D, E, F, G);
impl_native_fn!(A, B, C, D, E, F, G, H);

/// Binds `f` into a thunk and its result-register list.
///
/// The thunk unpacks every parameter, checks the accumulated status once,
/// runs `f` and packs its results into the same frame. Parameters moved out
/// before a failure are released with the argument tuple.
pub fn bind<Owner, Args, R, F>(f: F) -> VmResult<(Thunk<Owner>, RegisterList)>
where
    Owner: 'static,
    Args: ParamList,
    R: Results,
    F: NativeFn<Owner, Args, R>,
{
    Args::check_signature()?;
    let results = R::register_list();
    let thunk: Thunk<Owner> = Box::new(move |owner: &mut Owner, _stack: &mut Stack, frame: &mut Frame| {
        let mut unpack = UnpackState::new();
        let args = Args::unpack_all(&mut unpack, frame);
        unpack.check()?;
        let values = f.invoke(owner, args)?;
        values.pack(&mut PackState::default(), frame)
    });
    Ok((thunk, results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::Span;
    use ivm_common_core::{Register, VmError};

    #[derive(Default)]
    struct Counter {
        calls: u32,
    }

    fn sum(owner: &mut Counter, base: i32, rest: Span<i32>) -> VmResult<i32> {
        owner.calls += 1;
        Ok(base + rest.iter().sum::<i32>())
    }

    fn bad(_owner: &mut Counter, _a: Span<i32>, _b: i32) -> VmResult<()> {
        Ok(())
    }

    #[test]
    fn test_bound_span_call() {
        let (thunk, results) = bind(sum).unwrap();
        assert_eq!(results, vec![Register::i32(0)]);

        let mut frame = Frame::native(4, 0);
        for (i, v) in [10, 1, 2, 3].into_iter().enumerate() {
            frame.registers.set_i32(i, v).unwrap();
        }
        frame.varargs = vec![1, 3];
        let mut owner = Counter::default();
        let mut stack = Stack::new(4, 0);
        let status = thunk(&mut owner, &mut stack, &mut frame).unwrap();
        assert_eq!(status, NativeStatus::Complete);
        assert_eq!(frame.registers.i32(0), Ok(16));
        assert_eq!(owner.calls, 1);
    }

    #[test]
    fn test_misplaced_span_rejected_at_bind() {
        assert!(matches!(bind(bad), Err(VmError::InvalidArgument(_))));
    }

    #[test]
    fn test_native_failure_propagates() {
        let fail = |_owner: &mut Counter, x: i32| -> VmResult<i32> {
            Err(VmError::native(format!("refused {}", x)))
        };
        let (thunk, _) = bind(fail).unwrap();
        let mut frame = Frame::native(1, 0);
        frame.registers.set_i32(0, 9).unwrap();
        let err = thunk(&mut Counter::default(), &mut Stack::new(1, 0), &mut frame).unwrap_err();
        assert_eq!(err, VmError::NativeFailure("refused 9".into()));
    }
}
