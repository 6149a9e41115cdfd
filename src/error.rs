//! Failure values and the error types that wrap them.
//!
//! A promise failure is an [`Arc`]'d error object shared by every handle
//! and every dependent promise. The concrete wrappers here add one layer
//! of context each: [`WaitError`] at the blocking call, [`UpstreamError`]
//! when a fan-in combinator observes a failed source, [`AggregateError`]
//! when every source of an `any` fails, and [`PanicError`] when a task
//! panics instead of returning.

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

/// A computation failure, shared by every handle and dependent of the
/// promise that produced it.
pub type Failure = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The error returned by [`Promise::wait`](crate::Promise::wait) when the
/// promise failed.
///
/// The original failure is reachable through [`WaitError::failure`] (or
/// [`std::error::Error::source`]) for inspection and downcasting.
#[derive(Debug, Error)]
#[error("error during promise execution: {source}")]
pub struct WaitError {
    source: Failure,
}

impl WaitError {
    pub(crate) fn new(source: Failure) -> WaitError {
        WaitError { source }
    }

    /// The failure the promise completed with.
    ///
    /// ```
    /// use anypromise::{PanicError, Promise};
    ///
    /// let p = Promise::new(|| -> (i32,) { panic!("boom") }, ());
    /// let err = p.wait((&mut 0,)).unwrap_err();
    /// let panic = err.failure().downcast_ref::<PanicError>().unwrap();
    /// assert_eq!(panic.message(), "boom");
    /// ```
    pub fn failure(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

/// The context a fan-in combinator adds when one of its sources fails.
///
/// [`Promise::all`](crate::Promise::all) and
/// [`Promise::race`](crate::Promise::race) fail with exactly one of these
/// around the source's own failure, however deep the chain behind that
/// source was.
#[derive(Debug, Error)]
#[error("error encountered in promise: {source}")]
pub struct UpstreamError {
    source: Failure,
}

impl UpstreamError {
    pub(crate) fn wrap(source: Failure) -> Failure {
        Arc::new(UpstreamError { source })
    }

    /// The failing source's own failure.
    pub fn failure(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

/// The failure of a [`Promise::any`](crate::Promise::any) whose sources
/// all failed.
///
/// Carries every source's failure in source order, plus the one that was
/// observed last in time.
#[derive(Debug, Error)]
#[error("all {} promises failed. last err={}", .errors.len(), .last)]
pub struct AggregateError {
    errors: Vec<Failure>,
    last: Failure,
}

impl AggregateError {
    pub(crate) fn new(errors: Vec<Failure>, last: Failure) -> AggregateError {
        AggregateError { errors, last }
    }

    /// Every source's failure, in source order.
    pub fn errors(&self) -> &[Failure] {
        &self.errors
    }

    /// The chronologically last failure observed.
    pub fn last(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.last.as_ref()
    }
}

/// A panic raised inside a promise task, converted to an ordinary failure.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PanicError {
    message: String,
}

impl PanicError {
    /// The panic payload, rendered as text.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Renders a caught panic payload into a [`Failure`]. Panics carry
/// `&str` or `String` payloads in practice; anything else gets a
/// placeholder message.
pub(crate) fn panic_failure(payload: Box<dyn Any + Send>) -> Failure {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    Arc::new(PanicError { message })
}
