//! The type-erased invocation layer.
//!
//! A promise does not know the concrete types it carries. Instead it holds
//! boxed [`Value`]s tagged with [`TypeDesc`]s, and every callable handed to
//! the runtime is erased into a uniform boxed function over those values.
//! The erasure happens at the call site, where the concrete types are still
//! known, so the hot path is a plain dynamic dispatch with no registries.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::error::Failure;

/// A runtime descriptor of a concrete Rust type.
///
/// Equality compares only the [`TypeId`]; the name rides along purely for
/// diagnostics and is the text that appears in shape mismatch panics.
///
/// ```
/// use anypromise::TypeDesc;
///
/// assert_eq!(TypeDesc::of::<i32>(), TypeDesc::of::<i32>());
/// assert_ne!(TypeDesc::of::<i32>(), TypeDesc::of::<u32>());
/// ```
#[derive(Clone, Copy)]
pub struct TypeDesc {
    id: TypeId,
    name: &'static str,
}

impl TypeDesc {
    /// The descriptor of `T`.
    pub fn of<T: Any>() -> TypeDesc {
        TypeDesc {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// The diagnostic name of the described type.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeDesc {
    fn eq(&self, other: &TypeDesc) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeDesc {}

impl fmt::Debug for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A value a promise can carry.
///
/// Implemented for every `Any + Send + Clone` type. The `Clone` bound is
/// what lets a promise hand its results to any number of waiters and
/// dependents without consuming them.
pub trait AnyValue: Any + Send {
    /// Clones the underlying value into a fresh box.
    fn clone_value(&self) -> Value;

    /// Upcasts to [`Any`] for by-value downcasting.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any + Send + Clone> AnyValue for T {
    fn clone_value(&self) -> Value {
        Box::new(self.clone())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A boxed, dynamically typed value.
pub type Value = Box<dyn AnyValue>;

impl Clone for Box<dyn AnyValue> {
    fn clone(&self) -> Box<dyn AnyValue> {
        // Dispatch on the trait object itself; the blanket impl would
        // otherwise match the box and re-box it.
        (**self).clone_value()
    }
}

/// What invoking an erased callable produces: the boxed results in
/// declaration order, or the failure it reported.
pub type CallResult = Result<Vec<Value>, Failure>;

/// A callable erased behind the uniform boxed interface.
pub type ErasedCall = Box<dyn FnOnce(Vec<Value>) -> CallResult + Send>;

/// An ordered list of values with a statically known shape.
///
/// Implemented for `()` and for tuples of up to eight `Any + Send + Clone`
/// elements. A `ValueList` is both the argument list accepted by
/// [`Promise::new`](crate::Promise::new) and the success half of a
/// callable's return shape, so a single value is written as a one element
/// tuple: `(value,)`.
pub trait ValueList: Send + 'static {
    /// Type descriptors of the slots, in order.
    fn types() -> Vec<TypeDesc>;

    /// Boxes the slots, in order.
    fn into_values(self) -> Vec<Value>;
}

impl ValueList for () {
    fn types() -> Vec<TypeDesc> {
        Vec::new()
    }

    fn into_values(self) -> Vec<Value> {
        Vec::new()
    }
}

macro_rules! impl_value_list {
    ($(($($value:ident: $ty:ident),+))+) => {$(
        impl<$($ty: Any + Send + Clone),+> ValueList for ($($ty,)+) {
            fn types() -> Vec<TypeDesc> {
                vec![$(TypeDesc::of::<$ty>()),+]
            }

            fn into_values(self) -> Vec<Value> {
                let ($($value,)+) = self;
                vec![$(Box::new($value) as Value),+]
            }
        }

        impl<$($ty: Any + Send + Clone),+> Outcome for ($($ty,)+) {
            const RETURNS_ERROR: bool = false;

            fn result_types() -> Vec<TypeDesc> {
                <Self as ValueList>::types()
            }

            fn into_result(self) -> CallResult {
                Ok(self.into_values())
            }
        }
    )+}
}

impl_value_list! {
    (v1: T1)
    (v1: T1, v2: T2)
    (v1: T1, v2: T2, v3: T3)
    (v1: T1, v2: T2, v3: T3, v4: T4)
    (v1: T1, v2: T2, v3: T3, v4: T4, v5: T5)
    (v1: T1, v2: T2, v3: T3, v4: T4, v5: T5, v6: T6)
    (v1: T1, v2: T2, v3: T3, v4: T4, v5: T5, v6: T6, v7: T7)
    (v1: T1, v2: T2, v3: T3, v4: T4, v5: T5, v6: T6, v7: T7, v8: T8)
}

/// A return shape a promise callable may declare.
///
/// Two families implement it: every [`ValueList`] shape (an infallible
/// callable), and `Result<L, E>` for any `ValueList` `L` and error type
/// `E` (a fallible callable). The `Result` is the error trailer of the
/// runtime: the declared results of `Result<(i32,), E>` are just `[i32]`,
/// and an `Err` becomes the promise's failure instead of a value.
pub trait Outcome: Send + 'static {
    /// Whether this shape carries the trailing error.
    const RETURNS_ERROR: bool;

    /// Descriptors of the declared results, trailer stripped.
    fn result_types() -> Vec<TypeDesc>;

    /// Folds the value into results or a failure.
    fn into_result(self) -> CallResult;
}

impl Outcome for () {
    const RETURNS_ERROR: bool = false;

    fn result_types() -> Vec<TypeDesc> {
        Vec::new()
    }

    fn into_result(self) -> CallResult {
        Ok(Vec::new())
    }
}

impl<L, E> Outcome for Result<L, E>
where
    L: ValueList,
    E: std::error::Error + Send + Sync + 'static,
{
    const RETURNS_ERROR: bool = true;

    fn result_types() -> Vec<TypeDesc> {
        L::types()
    }

    fn into_result(self) -> CallResult {
        match self {
            Ok(values) => Ok(values.into_values()),
            Err(err) => Err(Arc::new(err)),
        }
    }
}

/// The declared shape of a callable: its parameters, its results with the
/// error trailer stripped, and whether the trailer is present.
///
/// ```
/// use anypromise::{Callable, TypeDesc};
///
/// let sig = <fn(i32, i32) -> (i32, i32) as Callable<(i32, i32)>>::signature();
/// assert_eq!(sig.params(), &[TypeDesc::of::<i32>(), TypeDesc::of::<i32>()]);
/// assert_eq!(sig.results(), &[TypeDesc::of::<i32>(), TypeDesc::of::<i32>()]);
/// assert!(!sig.returns_error());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    params: Vec<TypeDesc>,
    results: Vec<TypeDesc>,
    returns_error: bool,
}

impl Signature {
    /// Parameter descriptors, in order.
    pub fn params(&self) -> &[TypeDesc] {
        &self.params
    }

    /// Result descriptors, error trailer stripped.
    pub fn results(&self) -> &[TypeDesc] {
        &self.results
    }

    /// Whether the callable returns the conventional trailing error.
    pub fn returns_error(&self) -> bool {
        self.returns_error
    }
}

/// A function or closure that can back a promise.
///
/// Implemented for every `Send + 'static` `FnOnce` of up to eight
/// `Any + Send + Clone` parameters whose return type is an [`Outcome`].
/// `Args` is the tuple of declared parameter types; it is inferred from
/// the callable itself.
pub trait Callable<Args>: Send + 'static {
    /// The declared shape of this callable.
    fn signature() -> Signature;

    /// Erases the callable behind the uniform boxed interface.
    ///
    /// The returned closure downcasts each boxed argument to the concrete
    /// parameter type. Promise factories validate shapes before anything
    /// is dispatched, so the downcasts cannot fail.
    fn erase(self) -> ErasedCall;
}

impl<Func, Out> Callable<()> for Func
where
    Func: FnOnce() -> Out + Send + 'static,
    Out: Outcome,
{
    fn signature() -> Signature {
        Signature {
            params: Vec::new(),
            results: Out::result_types(),
            returns_error: Out::RETURNS_ERROR,
        }
    }

    fn erase(self) -> ErasedCall {
        Box::new(move |_args| (self)().into_result())
    }
}

macro_rules! impl_callable {
    ($(($($arg:ident: $ty:ident),+))+) => {$(
        impl<Func, Out, $($ty),+> Callable<($($ty,)+)> for Func
        where
            Func: FnOnce($($ty),+) -> Out + Send + 'static,
            Out: Outcome,
            $($ty: Any + Send + Clone,)+
        {
            fn signature() -> Signature {
                Signature {
                    params: vec![$(TypeDesc::of::<$ty>()),+],
                    results: Out::result_types(),
                    returns_error: Out::RETURNS_ERROR,
                }
            }

            fn erase(self) -> ErasedCall {
                Box::new(move |args: Vec<Value>| {
                    let mut args = args.into_iter();
                    $(
                        // Arity and per-slot types were validated when the
                        // promise was built, so every slot is present and
                        // downcasts.
                        let $arg = args
                            .next()
                            .expect("argument count validated at construction")
                            .into_any()
                            .downcast::<$ty>()
                            .expect("argument type validated at construction");
                    )+
                    (self)($(*$arg),+).into_result()
                })
            }
        }
    )+}
}

impl_callable! {
    (a1: T1)
    (a1: T1, a2: T2)
    (a1: T1, a2: T2, a3: T3)
    (a1: T1, a2: T2, a3: T3, a4: T4)
    (a1: T1, a2: T2, a3: T3, a4: T4, a5: T5)
    (a1: T1, a2: T2, a3: T3, a4: T4, a5: T5, a6: T6)
    (a1: T1, a2: T2, a3: T3, a4: T4, a5: T5, a6: T6, a7: T7)
    (a1: T1, a2: T2, a3: T3, a4: T4, a5: T5, a6: T6, a7: T7, a8: T8)
}
