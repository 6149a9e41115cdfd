//! Destination shapes accepted by [`Promise::wait`](crate::Promise::wait).

use std::any::Any;

use crate::call::{TypeDesc, Value};

/// A set of caller-supplied slots that `wait` copies a promise's results
/// into.
///
/// Implemented for:
///
/// - `()`, for a promise with no results;
/// - tuples `(&mut T1,)` through `(&mut T1, .., &mut T8)`, one slot per
///   result, each of exactly the corresponding result type;
/// - `&mut Vec<T>`, in one of two modes. If every result of the promise is
///   a `T` and there is at least one, the vector is replaced with a fresh
///   one holding each result in order (the packing mode, the natural way
///   to drain an `all` of same-typed promises). Otherwise it is treated as
///   the plain single slot of a promise whose one result is itself a
///   `Vec<T>`.
///
/// Validation runs before `wait` blocks and panics on a shape mismatch;
/// see [`Promise::wait`](crate::Promise::wait).
///
/// ```
/// use anypromise::Promise;
///
/// let triple = Promise::new(|| (1, 2, 3), ());
/// let mut all: Vec<i32> = Vec::new();
/// triple.wait(&mut all).unwrap();
/// assert_eq!(all, vec![1, 2, 3]);
/// ```
pub trait WaitDest {
    /// Validates this destination set against a promise's result types,
    /// panicking with the mismatch.
    fn validate(&self, result_types: &[TypeDesc]);

    /// Writes one validated, cloned-out result set into the slots.
    fn fill(self, result_types: &[TypeDesc], values: Vec<Value>);
}

impl WaitDest for () {
    fn validate(&self, result_types: &[TypeDesc]) {
        check_slot_count(result_types.len(), 0);
    }

    fn fill(self, _result_types: &[TypeDesc], _values: Vec<Value>) {}
}

impl<'a, T: Any + Send + Clone> WaitDest for &'a mut Vec<T> {
    fn validate(&self, result_types: &[TypeDesc]) {
        if is_packed::<T>(result_types) {
            return;
        }
        check_slot_count(result_types.len(), 1);
        check_slot_type(result_types, 0, TypeDesc::of::<Vec<T>>());
    }

    fn fill(self, result_types: &[TypeDesc], values: Vec<Value>) {
        if is_packed::<T>(result_types) {
            let mut packed = Vec::with_capacity(values.len());
            for value in values {
                packed.push(
                    *value
                        .into_any()
                        .downcast::<T>()
                        .expect("result types validated before completion"),
                );
            }
            *self = packed;
        } else {
            let mut values = values.into_iter();
            *self = *values
                .next()
                .expect("result count validated before completion")
                .into_any()
                .downcast::<Vec<T>>()
                .expect("result type validated before completion");
        }
    }
}

macro_rules! impl_wait_dest {
    ($(($len:expr => $($slot:ident: $ty:ident @ $idx:expr),+))+) => {$(
        impl<'a, $($ty: Any + Send + Clone),+> WaitDest for ($(&'a mut $ty,)+) {
            fn validate(&self, result_types: &[TypeDesc]) {
                check_slot_count(result_types.len(), $len);
                $(check_slot_type(result_types, $idx, TypeDesc::of::<$ty>());)+
            }

            fn fill(self, _result_types: &[TypeDesc], values: Vec<Value>) {
                let ($($slot,)+) = self;
                let mut values = values.into_iter();
                $(
                    *$slot = *values
                        .next()
                        .expect("result count validated before completion")
                        .into_any()
                        .downcast::<$ty>()
                        .expect("result type validated before completion");
                )+
            }
        }
    )+}
}

impl_wait_dest! {
    (1 => s1: T1 @ 0)
    (2 => s1: T1 @ 0, s2: T2 @ 1)
    (3 => s1: T1 @ 0, s2: T2 @ 1, s3: T3 @ 2)
    (4 => s1: T1 @ 0, s2: T2 @ 1, s3: T3 @ 2, s4: T4 @ 3)
    (5 => s1: T1 @ 0, s2: T2 @ 1, s3: T3 @ 2, s4: T4 @ 3, s5: T5 @ 4)
    (6 => s1: T1 @ 0, s2: T2 @ 1, s3: T3 @ 2, s4: T4 @ 3, s5: T5 @ 4, s6: T6 @ 5)
    (7 => s1: T1 @ 0, s2: T2 @ 1, s3: T3 @ 2, s4: T4 @ 3, s5: T5 @ 4, s6: T6 @ 5, s7: T7 @ 6)
    (8 => s1: T1 @ 0, s2: T2 @ 1, s3: T3 @ 2, s4: T4 @ 3, s5: T5 @ 4, s6: T6 @ 5, s7: T7 @ 6, s8: T8 @ 7)
}

/// Whether `result_types` is a non-empty run of `T`s, i.e. whether a
/// `&mut Vec<T>` destination packs instead of filling a single slot.
fn is_packed<T: Any>(result_types: &[TypeDesc]) -> bool {
    !result_types.is_empty() && result_types.iter().all(|ty| *ty == TypeDesc::of::<T>())
}

fn check_slot_count(results: usize, destinations: usize) {
    if results != destinations {
        panic!("promise returns {results} values, wait was asked to set {destinations} values");
    }
}

fn check_slot_type(result_types: &[TypeDesc], index: usize, destination: TypeDesc) {
    let expected = result_types[index];
    if expected != destination {
        panic!("for return value {index}: expected destination of type {expected} got type {destination}");
    }
}
