//! Nondeterministic value choices, resolved (and trace-recorded) by the
//! scheduling strategy.

use crate::error::{ExecutionCanceled, Interrupt};

/// Types a strategy can choose a value for.
pub trait Nondet: Sized {
    fn nondet() -> Self;
}

/// A strategy-chosen value of type `T`.
pub fn nondet<T: Nondet>() -> T {
    T::nondet()
}

fn ok_or_interrupt<T>(result: Result<T, ExecutionCanceled>) -> T {
    match result {
        Ok(value) => value,
        Err(_) => std::panic::panic_any(Interrupt),
    }
}

impl Nondet for bool {
    fn nondet() -> bool {
        ok_or_interrupt(crate::rt::next_boolean(2))
    }
}

macro_rules! nondet_ints {
    ($($ty:ident),* $(,)?) => {
        $(
            impl Nondet for $ty {
                fn nondet() -> Self {
                    ok_or_interrupt(crate::rt::next_integer($ty::MAX as u64)) as $ty
                }
            }

            paste::paste! {
                #[doc = "Strategy-chosen `" $ty "` in `[0, max)`."]
                pub fn [<nondet_ $ty>](max: $ty) -> $ty {
                    ok_or_interrupt(crate::rt::next_integer(max as u64)) as $ty
                }
            }
        )*
    };
}

nondet_ints!(u8, u16, u32, u64, usize);
