#![doc(html_root_url = "https://docs.rs/anypromise/0.1.0")]
//!
//! # Dynamically typed promises for Rust
//!
//! This crate provides a thread-backed, dynamically typed Promise runtime: run any callable in the background, chain continuations onto its results, and join groups of promises with `all`, `race`, and `any`.
//!
//! ## Features
//! - Launch any callable of up to eight arguments with [`Promise::new`]
//! - Chaining with [`then`](Promise::then) and [`then_collect`](Promise::then_collect)
//! - Combinators: [`Promise::all`], [`Promise::race`], [`Promise::any`]
//! - Fallible callables return `Result`; the error becomes the promise's failure
//! - Panic-safe: panics in promise tasks are caught and reported as failures
//! - Fully documented with tested examples
//!
//! ## Example
//! ```
//! use anypromise::Promise;
//! let p = Promise::new(|a: i32, b: i32| (a + b,), (2, 3))
//!     .then(|sum: i32| (sum * 10,));
//! let mut out = 0;
//! p.wait((&mut out,)).unwrap();
//! assert_eq!(out, 50);
//! ```
//!
//! ## Shape checking
//! Promises carry boxed values tagged with runtime type descriptors instead of a generic payload type. Argument lists, continuation parameters, and wait destinations are checked against those descriptors when a promise is built or waited on, and a mismatch panics right there at the call site. Only computation failures, an `Err` from a callable or a panic inside a task, are deferred into the promise and returned from [`wait`](Promise::wait).
//!
//! ## Error Handling
//! A fallible callable declares `Result<.., E>` as its return type; the `Ok` values become the promise's results and the `Err` its failure. [`wait`](Promise::wait) surfaces failures as [`WaitError`], with the original error reachable for downcasting.
//!
//! ## See Also
//! - [`Promise`] for the main type
//! - [`Callable`] and [`ValueList`] for what a promise can run and carry
//! - [`WaitDest`] for the destinations `wait` accepts
//! - [`WaitError`], [`AggregateError`], [`PanicError`] for failure reporting
//!
//! ---
//!
//! Released under the MIT or Apache-2.0 license.

#![warn(missing_docs)]

#[cfg(test)]
mod tests;

mod call;
mod dest;
mod error;

pub use call::{
    AnyValue, CallResult, Callable, ErasedCall, Outcome, Signature, TypeDesc, Value, ValueList,
};
pub use dest::WaitDest;
pub use error::{AggregateError, Failure, PanicError, UpstreamError, WaitError};

use std::{
    any::Any,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Condvar, Mutex,
    },
    thread,
};

use tracing::trace;

use crate::error::panic_failure;

/// Which factory built a promise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Simple,
    Then,
    All,
    Race,
    Any,
}

/// The mutable half of a promise, guarded by the state mutex.
struct State {
    completed: bool,
    results: Vec<Value>,
    failure: Option<Failure>,
    /// Per-source failures recorded by `any` tasks, indexed by source.
    source_errors: Vec<Option<Failure>>,
}

struct Shared {
    kind: Kind,
    result_types: Vec<TypeDesc>,
    state: Mutex<State>,
    done: Condvar,
    /// Successes still outstanding before a fan-in can resolve.
    pending: AtomicI64,
    /// Failures still outstanding before an `any` gives up.
    failed: AtomicI64,
}

impl Shared {
    fn new(
        kind: Kind,
        result_types: Vec<TypeDesc>,
        pending: i64,
        failed: i64,
        sources: usize,
    ) -> Arc<Shared> {
        Arc::new(Shared {
            kind,
            result_types,
            state: Mutex::new(State {
                completed: false,
                results: Vec::new(),
                failure: None,
                source_errors: vec![None; sources],
            }),
            done: Condvar::new(),
            pending: AtomicI64::new(pending),
            failed: AtomicI64::new(failed),
        })
    }

    /// Blocks until the promise completes, then reports whether it failed.
    ///
    /// User callables never run under the state mutex, so it cannot be
    /// poisoned.
    fn await_done(&self) -> Result<(), Failure> {
        let mut state = self.state.lock().unwrap();
        while !state.completed {
            state = self.done.wait(state).unwrap();
        }
        match &state.failure {
            Some(failure) => Err(Arc::clone(failure)),
            None => Ok(()),
        }
    }

    /// Blocks until the promise completes, then snapshots its outcome.
    fn await_completion(&self) -> Result<Vec<Value>, Failure> {
        let mut state = self.state.lock().unwrap();
        while !state.completed {
            state = self.done.wait(state).unwrap();
        }
        match &state.failure {
            Some(failure) => Err(Arc::clone(failure)),
            None => Ok(state.results.clone()),
        }
    }

    /// Snapshots the results of a promise already known to have succeeded.
    fn completed_results(&self) -> Vec<Value> {
        self.state.lock().unwrap().results.clone()
    }

    /// Publishes a task's outcome. The first finalization wins; anything
    /// arriving after `completed` is set is discarded.
    fn finalize(&self, outcome: CallResult) {
        let mut state = self.state.lock().unwrap();
        if state.completed {
            trace!(kind = ?self.kind, "late completion discarded");
            return;
        }
        match outcome {
            Ok(results) => state.results = results,
            Err(failure) => state.failure = Some(failure),
        }
        state.completed = true;
        trace!(kind = ?self.kind, failed = state.failure.is_some(), "promise finalized");
        self.done.notify_all();
    }
}

/// What one dispatcher task concluded. Fan-in tasks whose source was not
/// the deciding one report [`Step::NotYet`] and leave the output alone.
enum Step {
    NotYet,
    Success(Vec<Value>),
    Failure(Failure),
}

/// Runs `step` on a fresh thread, converting a panic into a failure, and
/// finalizes the output with whatever it concluded.
fn spawn_task<F>(shared: Arc<Shared>, step: F)
where
    F: FnOnce(&Shared) -> Step + Send + 'static,
{
    trace!(kind = ?shared.kind, "spawning promise task");
    thread::spawn(move || {
        let step = match catch_unwind(AssertUnwindSafe(|| step(&shared))) {
            Ok(step) => step,
            Err(payload) => Step::Failure(panic_failure(payload)),
        };
        match step {
            Step::NotYet => {}
            Step::Success(values) => shared.finalize(Ok(values)),
            Step::Failure(failure) => shared.finalize(Err(failure)),
        }
    });
}

/// A handle to a unit of work executing in the background.
///
/// A promise starts its callable on its own thread the moment it is built
/// and completes exactly once, either with a list of result values or with
/// a failure. Cloning the handle is cheap and every clone observes the
/// same completion; results are handed out as clones, so a promise can be
/// waited on and chained from any number of times.
///
/// # States
/// A promise is pending until its task finishes, then completed. A
/// completed promise holds either its results or its failure forever; late
/// outcomes from racing tasks are discarded, never overwriting the first.
///
/// # Error Handling
/// Callables that can fail declare `Result<.., E>` as their return type.
/// The failure of a promise propagates: a [`then`](Self::then) continuation
/// on a failed promise never runs and its promise fails with the same
/// error, while [`all`](Self::all) and [`race`](Self::race) report a failed
/// source wrapped in [`UpstreamError`]. Failures only surface when someone
/// calls [`wait`](Self::wait).
///
/// # Panics
/// A panic inside a promise task is caught at the task boundary and
/// becomes an ordinary failure carrying [`PanicError`]; it does not take
/// down the process. Shape mismatches are different: handing a factory
/// arguments, a continuation, or a wait destination of the wrong shape is
/// a bug at the call site and panics immediately on the calling thread.
#[derive(Clone)]
pub struct Promise {
    shared: Arc<Shared>,
}

impl Promise {
    /// Launches `f` with `args` on a new thread and returns the promise of
    /// its results.
    ///
    /// `args` is a tuple with one slot per parameter of `f` (`()` for
    /// none); each slot must have exactly the parameter's type. A single
    /// value is written as a one element tuple. Panics on an argument
    /// count or type mismatch, before anything is launched.
    ///
    /// ```
    /// use anypromise::Promise;
    ///
    /// let p = Promise::new(|a: i32, b: i32| (a + b, a * b), (3, 4));
    /// let (mut sum, mut product) = (0, 0);
    /// p.wait((&mut sum, &mut product)).unwrap();
    /// assert_eq!((sum, product), (7, 12));
    /// ```
    ///
    /// With the error trailer:
    ///
    /// ```
    /// use anypromise::Promise;
    /// use std::io;
    ///
    /// let p = Promise::new(
    ///     |text: String| -> Result<(usize,), io::Error> { Ok((text.len(),)) },
    ///     ("hello".to_string(),),
    /// );
    /// let mut len = 0usize;
    /// p.wait((&mut len,)).unwrap();
    /// assert_eq!(len, 5);
    /// ```
    pub fn new<Args, F, L>(f: F, args: L) -> Promise
    where
        F: Callable<Args>,
        L: ValueList,
    {
        let signature = F::signature();
        check_arguments(signature.params(), &L::types());
        let shared = Shared::new(Kind::Simple, signature.results().to_vec(), 0, 0, 0);
        let call = f.erase();
        let values = args.into_values();
        spawn_task(Arc::clone(&shared), move |_| match call(values) {
            Ok(results) => Step::Success(results),
            Err(failure) => Step::Failure(failure),
        });
        Promise { shared }
    }

    /// Returns a promise that feeds this promise's results to `f` once
    /// they exist.
    ///
    /// `f` must take exactly one parameter per result of this promise,
    /// each of the result's type; a mismatch panics immediately. If this
    /// promise fails, `f` never runs and the returned promise fails with
    /// the same error, untouched.
    ///
    /// ```
    /// use anypromise::Promise;
    ///
    /// let p = Promise::new(|| (21,), ())
    ///     .then(|n: i32| (n * 2,));
    /// let mut out = 0;
    /// p.wait((&mut out,)).unwrap();
    /// assert_eq!(out, 42);
    /// ```
    ///
    /// A failure skips the continuation:
    ///
    /// ```
    /// use anypromise::Promise;
    /// use std::io;
    ///
    /// let p = Promise::new(
    ///     || -> Result<(i32,), io::Error> { Err(io::Error::new(io::ErrorKind::Other, "no value")) },
    ///     (),
    /// );
    /// let chained = p.then(|n: i32| (n + 1,));
    /// let mut out = 0;
    /// let err = chained.wait((&mut out,)).unwrap_err();
    /// assert!(err.to_string().contains("no value"));
    /// ```
    pub fn then<Args, F>(&self, f: F) -> Promise
    where
        F: Callable<Args>,
    {
        let signature = F::signature();
        check_continuation(&self.shared.result_types, signature.params());
        let shared = Shared::new(Kind::Then, signature.results().to_vec(), 0, 0, 0);
        let call = f.erase();
        let prior = Arc::clone(&self.shared);
        spawn_task(Arc::clone(&shared), move |_| {
            match prior.await_completion() {
                // A failed prior propagates as-is; the continuation never runs.
                Err(failure) => Step::Failure(failure),
                Ok(results) => match call(results) {
                    Ok(values) => Step::Success(values),
                    Err(failure) => Step::Failure(failure),
                },
            }
        });
        Promise { shared }
    }

    /// Like [`then`](Self::then), but collects all of this promise's
    /// results into one `Vec<T>` for a continuation of a single parameter.
    ///
    /// Useful behind [`all`](Self::all), where the result list is long and
    /// homogeneous. Panics immediately if any result is not a `T`.
    ///
    /// ```
    /// use anypromise::Promise;
    ///
    /// let p = Promise::new(|| (1, 2, 3), ())
    ///     .then_collect(|xs: Vec<i32>| (xs.into_iter().sum::<i32>(),));
    /// let mut sum = 0;
    /// p.wait((&mut sum,)).unwrap();
    /// assert_eq!(sum, 6);
    /// ```
    pub fn then_collect<T, F, O>(&self, f: F) -> Promise
    where
        T: Any + Send + Clone,
        F: FnOnce(Vec<T>) -> O + Send + 'static,
        O: Outcome,
    {
        let element = TypeDesc::of::<T>();
        for (index, found) in self.shared.result_types.iter().enumerate() {
            if *found != element {
                panic!(
                    "result {index} has an unexpected type, expected every result passed to then_collect to be {element}, got {found}"
                );
            }
        }
        let shared = Shared::new(Kind::Then, O::result_types(), 0, 0, 0);
        let prior = Arc::clone(&self.shared);
        spawn_task(Arc::clone(&shared), move |_| match prior.await_completion() {
            Err(failure) => Step::Failure(failure),
            Ok(results) => {
                let mut collected = Vec::with_capacity(results.len());
                for value in results {
                    collected.push(
                        *value
                            .into_any()
                            .downcast::<T>()
                            .expect("result types validated at construction"),
                    );
                }
                match f(collected).into_result() {
                    Ok(values) => Step::Success(values),
                    Err(failure) => Step::Failure(failure),
                }
            }
        });
        Promise { shared }
    }

    /// Returns a promise of every source's results, concatenated in
    /// source order.
    ///
    /// The sources may have different result types. The returned promise
    /// succeeds once all of them have succeeded; the first source failure
    /// fails it immediately with that error wrapped in [`UpstreamError`],
    /// without waiting for the rest. No sources at all gives a promise
    /// that resolves with no results.
    ///
    /// ```
    /// use anypromise::Promise;
    ///
    /// let first = Promise::new(|| (1,), ());
    /// let second = Promise::new(|| ("two".to_string(),), ());
    /// let combined = Promise::all(vec![first, second]);
    /// let (mut a, mut b) = (0, String::new());
    /// combined.wait((&mut a, &mut b)).unwrap();
    /// assert_eq!((a, b.as_str()), (1, "two"));
    /// ```
    pub fn all(promises: Vec<Promise>) -> Promise {
        if promises.is_empty() {
            return Promise::new(|| (), ());
        }
        let mut result_types = Vec::new();
        for promise in &promises {
            result_types.extend_from_slice(&promise.shared.result_types);
        }
        let shared = Shared::new(Kind::All, result_types, promises.len() as i64, 0, 0);
        let sources: Vec<Arc<Shared>> =
            promises.iter().map(|p| Arc::clone(&p.shared)).collect();
        for index in 0..sources.len() {
            let sources = sources.clone();
            spawn_task(Arc::clone(&shared), move |output: &Shared| {
                all_step(output, &sources, index)
            });
        }
        Promise { shared }
    }

    /// Returns a promise of the first source to finish, success or
    /// failure.
    ///
    /// Every source must have the same result types; a mismatch panics
    /// immediately. A winning success resolves the promise with that
    /// source's results; a winning failure fails it with the error wrapped
    /// in [`UpstreamError`]. Whatever finishes later is discarded. A
    /// single source is returned as-is, and no sources at all gives a
    /// promise that resolves with no results.
    ///
    /// ```
    /// use anypromise::Promise;
    /// use std::thread::sleep;
    /// use std::time::Duration;
    ///
    /// let slow = Promise::new(|| { sleep(Duration::from_millis(200)); (1,) }, ());
    /// let fast = Promise::new(|| (2,), ());
    /// let mut out = 0;
    /// Promise::race(vec![slow, fast]).wait((&mut out,)).unwrap();
    /// assert_eq!(out, 2);
    /// ```
    pub fn race(mut promises: Vec<Promise>) -> Promise {
        if promises.is_empty() {
            return Promise::new(|| (), ());
        }
        if promises.len() == 1 {
            return promises.remove(0);
        }
        let result_types = check_same_result_types(&promises, "race");
        let shared = Shared::new(Kind::Race, result_types, 1, 0, 0);
        let sources: Vec<Arc<Shared>> =
            promises.iter().map(|p| Arc::clone(&p.shared)).collect();
        for index in 0..sources.len() {
            let sources = sources.clone();
            spawn_task(Arc::clone(&shared), move |output: &Shared| {
                race_step(output, &sources, index)
            });
        }
        Promise { shared }
    }

    /// Returns a promise of the first source to succeed.
    ///
    /// Every source must have the same result types; a mismatch panics
    /// immediately. Source failures are tolerated until one source
    /// succeeds; only when all of them have failed does the promise fail,
    /// with an [`AggregateError`] carrying every source's error. A single
    /// source is returned as-is, and no sources at all gives a promise
    /// that resolves with no results.
    ///
    /// ```
    /// use anypromise::{AggregateError, Promise};
    /// use std::io;
    ///
    /// fn failing() -> Result<(i32,), io::Error> {
    ///     Err(io::Error::new(io::ErrorKind::Other, "boom"))
    /// }
    ///
    /// let p = Promise::any(vec![Promise::new(failing, ()), Promise::new(failing, ())]);
    /// let err = p.wait((&mut 0,)).unwrap_err();
    /// let aggregate = err.failure().downcast_ref::<AggregateError>().unwrap();
    /// assert_eq!(aggregate.errors().len(), 2);
    /// ```
    pub fn any(mut promises: Vec<Promise>) -> Promise {
        if promises.is_empty() {
            return Promise::new(|| (), ());
        }
        if promises.len() == 1 {
            return promises.remove(0);
        }
        let result_types = check_same_result_types(&promises, "any");
        let count = promises.len();
        let shared = Shared::new(Kind::Any, result_types, 1, count as i64, count);
        let sources: Vec<Arc<Shared>> =
            promises.iter().map(|p| Arc::clone(&p.shared)).collect();
        for index in 0..sources.len() {
            let sources = sources.clone();
            spawn_task(Arc::clone(&shared), move |output: &Shared| {
                any_step(output, &sources, index)
            });
        }
        Promise { shared }
    }

    /// Blocks until the promise completes and copies its results into
    /// `dest`.
    ///
    /// `dest` is one mutable slot per result, as a tuple (`()` for a
    /// promise with no results), or a `&mut Vec<T>`; see [`WaitDest`] for
    /// the accepted shapes. The destination shape is validated up front
    /// and panics on a mismatch, even if the promise has already failed.
    /// If the promise failed, the slots are left untouched and the failure
    /// is returned as a [`WaitError`].
    ///
    /// Results are cloned into the slots, so waiting is idempotent: every
    /// wait on the same promise, from however many threads, observes the
    /// same completed values.
    ///
    /// ```
    /// use anypromise::Promise;
    ///
    /// let p = Promise::new(|| (7, "seven".to_string()), ());
    /// let (mut n, mut s) = (0, String::new());
    /// p.wait((&mut n, &mut s)).unwrap();
    /// p.wait((&mut n, &mut s)).unwrap();
    /// assert_eq!((n, s.as_str()), (7, "seven"));
    /// ```
    pub fn wait<D: WaitDest>(&self, dest: D) -> Result<(), WaitError> {
        dest.validate(&self.shared.result_types);
        match self.shared.await_completion() {
            Err(failure) => Err(WaitError::new(failure)),
            Ok(results) => {
                dest.fill(&self.shared.result_types, results);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Promise");
        debug.field("kind", &self.shared.kind);
        match self.shared.state.try_lock() {
            Ok(state) => debug
                .field("completed", &state.completed)
                .field("failed", &state.failure.is_some())
                .finish(),
            Err(_) => debug.finish_non_exhaustive(),
        }
    }
}

fn check_arguments(params: &[TypeDesc], args: &[TypeDesc]) {
    if params.len() != args.len() {
        panic!("expected {} args, got {} args", params.len(), args.len());
    }
    for (index, (param, arg)) in params.iter().zip(args).enumerate() {
        if param != arg {
            panic!("for argument {index}: expected type {param} got type {arg}");
        }
    }
}

fn check_continuation(result_types: &[TypeDesc], params: &[TypeDesc]) {
    if params.len() != result_types.len() {
        panic!(
            "promise returns {} values, but provided function accepts {} args",
            result_types.len(),
            params.len()
        );
    }
    for (index, (result, param)) in result_types.iter().zip(params).enumerate() {
        if result != param {
            panic!("for argument {index}: expected type {result} got type {param}");
        }
    }
}

/// Checks that every promise has the same result types as the first and
/// returns them. Callers guarantee at least one promise.
fn check_same_result_types(promises: &[Promise], combinator: &str) -> Vec<TypeDesc> {
    let first = promises[0].shared.result_types.clone();
    for (index, promise) in promises.iter().enumerate().skip(1) {
        if promise.shared.result_types != first {
            panic!(
                "promise {index} has an unexpected return type, expected all promises passed to {combinator} to return the same type"
            );
        }
    }
    first
}

/// One `all` task: watch one source, and let the last success in
/// concatenate everyone's results.
fn all_step(output: &Shared, sources: &[Arc<Shared>], index: usize) -> Step {
    match sources[index].await_done() {
        Err(failure) => Step::Failure(UpstreamError::wrap(failure)),
        Ok(()) => {
            if output.pending.fetch_sub(1, Ordering::SeqCst) != 1 {
                return Step::NotYet;
            }
            // Last success in: every source has completed, so their
            // results can be snapshotted in source order.
            let mut combined = Vec::new();
            for source in sources {
                combined.extend(source.completed_results());
            }
            Step::Success(combined)
        }
    }
}

/// One `race` task: the first source to finish, either way, decides the
/// output.
fn race_step(output: &Shared, sources: &[Arc<Shared>], index: usize) -> Step {
    match sources[index].await_done() {
        Err(failure) => Step::Failure(UpstreamError::wrap(failure)),
        Ok(()) => {
            if output.pending.fetch_sub(1, Ordering::SeqCst) != 1 {
                return Step::NotYet;
            }
            Step::Success(sources[index].completed_results())
        }
    }
}

/// One `any` task: the first success decides the output; the last failure,
/// if no one succeeded, aggregates everyone's errors.
fn any_step(output: &Shared, sources: &[Arc<Shared>], index: usize) -> Step {
    match sources[index].await_done() {
        Ok(()) => {
            if output.pending.fetch_sub(1, Ordering::SeqCst) != 1 {
                return Step::NotYet;
            }
            Step::Success(sources[index].completed_results())
        }
        Err(failure) => {
            let mut state = output.state.lock().unwrap();
            state.source_errors[index] = Some(Arc::clone(&failure));
            // Recording and decrementing under the lock ensures the last
            // task to fail observes every sibling's error.
            let remaining = output.failed.fetch_sub(1, Ordering::SeqCst) - 1;
            if remaining != 0 {
                return Step::NotYet;
            }
            let errors: Vec<Failure> = state.source_errors.iter().flatten().cloned().collect();
            drop(state);
            Step::Failure(Arc::new(AggregateError::new(errors, failure)))
        }
    }
}
