#![cfg(test)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{AggregateError, Callable, PanicError, Promise, TypeDesc, UpstreamError};

/// A promise with result types `[i32]` that fails with an `io::Error`.
fn fail_with(message: &'static str) -> Promise {
    Promise::new(
        move || -> Result<(i32,), io::Error> {
            Err(io::Error::new(io::ErrorKind::Other, message))
        },
        (),
    )
}

#[test]
pub fn test_new_returns_function_values() {
    let p = Promise::new(|a: i32, b: i32| (a + b, a * b), (3, 4));
    let (mut sum, mut product) = (0, 0);
    p.wait((&mut sum, &mut product)).unwrap();
    assert_eq!((sum, product), (7, 12));
}

#[test]
pub fn test_new_with_no_results() {
    let ran = Arc::new(AtomicBool::new(false));
    let probe = ran.clone();
    let p = Promise::new(
        move || {
            probe.store(true, Ordering::SeqCst);
        },
        (),
    );
    p.wait(()).unwrap();
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
pub fn test_new_strips_error_trailer() {
    let p = Promise::new(|n: i32| -> Result<(i32,), io::Error> { Ok((n * 2,)) }, (21,));
    let mut out = 0;
    p.wait((&mut out,)).unwrap();
    assert_eq!(out, 42);
}

#[test]
pub fn test_new_error_becomes_failure() {
    let p = fail_with("no luck");
    let err = p.wait((&mut 0,)).unwrap_err();
    assert_eq!(err.to_string(), "error during promise execution: no luck");
    assert!(err.failure().downcast_ref::<io::Error>().is_some());
}

#[test]
#[should_panic(expected = "expected 2 args, got 1 args")]
pub fn test_new_arity_mismatch_panics() {
    Promise::new(|a: i32, b: i32| (a + b,), (1,));
}

#[test]
#[should_panic(expected = "for argument 1: expected type i32 got type &str")]
pub fn test_new_argument_type_mismatch_panics() {
    Promise::new(|a: i32, b: i32| (a + b,), (1, "two"));
}

#[test]
pub fn test_then_chains_values() {
    let p = Promise::new(|| (2,), ())
        .then(|n: i32| (n * 10,))
        .then(|n: i32| (n + 5,));
    let mut out = 0;
    p.wait((&mut out,)).unwrap();
    assert_eq!(out, 25);
}

#[test]
pub fn test_then_takes_multiple_params() {
    let p = Promise::new(|| (3, 4), ()).then(|a: i32, b: i32| (a * a + b * b,));
    let mut out = 0;
    p.wait((&mut out,)).unwrap();
    assert_eq!(out, 25);
}

#[test]
pub fn test_then_can_fail_itself() {
    let p = Promise::new(|| (1,), ()).then(|n: i32| -> Result<(i32,), io::Error> {
        Err(io::Error::new(io::ErrorKind::Other, format!("rejected {n}")))
    });
    let err = p.wait((&mut 0,)).unwrap_err();
    assert_eq!(err.to_string(), "error during promise execution: rejected 1");
}

#[test]
pub fn test_then_propagates_failure_without_running() {
    let ran = Arc::new(AtomicBool::new(false));
    let probe = ran.clone();
    let p = fail_with("root cause")
        .then(move |_n: i32| {
            probe.store(true, Ordering::SeqCst);
            (0,)
        })
        .then(|_n: i32| (1,));
    let err = p.wait((&mut 0,)).unwrap_err();
    // The original failure crosses every hop unwrapped; only wait adds
    // its one layer of context.
    assert_eq!(err.to_string(), "error during promise execution: root cause");
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
#[should_panic(expected = "promise returns 1 values, but provided function accepts 2 args")]
pub fn test_then_shape_mismatch_panics() {
    Promise::new(|| (1,), ()).then(|a: i32, b: i32| (a + b,));
}

#[test]
#[should_panic(expected = "for argument 0: expected type i32 got type")]
pub fn test_then_param_type_mismatch_panics() {
    Promise::new(|| (1,), ()).then(|s: String| (s,));
}

#[test]
pub fn test_then_on_completed_promise() {
    let p = Promise::new(|| (11,), ());
    let mut out = 0;
    p.wait((&mut out,)).unwrap();
    let chained = p.then(|n: i32| (n + 1,));
    out = 0;
    chained.wait((&mut out,)).unwrap();
    assert_eq!(out, 12);
}

#[test]
pub fn test_then_collect_gathers_results() {
    let p = Promise::new(|| (1, 2, 3, 4), ())
        .then_collect(|xs: Vec<i32>| (xs.into_iter().sum::<i32>(),));
    let mut sum = 0;
    p.wait((&mut sum,)).unwrap();
    assert_eq!(sum, 10);
}

#[test]
#[should_panic(expected = "expected every result passed to then_collect")]
pub fn test_then_collect_mixed_types_panics() {
    Promise::new(|| (1, "two"), ()).then_collect(|xs: Vec<i32>| (xs.len(),));
}

#[test]
pub fn test_all_concatenates_in_source_order() {
    let slow = Promise::new(
        || {
            thread::sleep(Duration::from_millis(120));
            (1,)
        },
        (),
    );
    let mid = Promise::new(|| ("middle".to_string(),), ());
    let fast = Promise::new(|| (true,), ());
    let combined = Promise::all(vec![slow, mid, fast]);
    let (mut a, mut b, mut c) = (0, String::new(), false);
    combined.wait((&mut a, &mut b, &mut c)).unwrap();
    assert_eq!((a, b.as_str(), c), (1, "middle", true));
}

#[test]
pub fn test_all_fails_on_first_failure() {
    let finished = Arc::new(AtomicBool::new(false));
    let probe = finished.clone();
    let ok = Promise::new(
        move || {
            thread::sleep(Duration::from_millis(300));
            probe.store(true, Ordering::SeqCst);
            (1,)
        },
        (),
    );
    let combined = Promise::all(vec![ok, fail_with("broken source")]);
    let err = combined.wait((&mut 0, &mut 0)).unwrap_err();
    assert!(!finished.load(Ordering::SeqCst));
    assert_eq!(
        err.to_string(),
        "error during promise execution: error encountered in promise: broken source"
    );
    let upstream = err.failure().downcast_ref::<UpstreamError>().unwrap();
    assert!(upstream.failure().downcast_ref::<io::Error>().is_some());
}

#[test]
pub fn test_all_wraps_chained_failure_once() {
    let deep = fail_with("deep")
        .then(|_n: i32| (0,))
        .then(|_n: i32| (0,));
    let combined = Promise::all(vec![deep]);
    let err = combined.wait((&mut 0,)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "error during promise execution: error encountered in promise: deep"
    );
}

#[test]
pub fn test_all_results_pack_into_slice() {
    let promises: Vec<Promise> = (0..5)
        .map(|i| {
            Promise::new(
                move || {
                    thread::sleep(Duration::from_millis(5 * (5 - i) as u64));
                    (i,)
                },
                (),
            )
        })
        .collect();
    let combined = Promise::all(promises);
    let mut values: Vec<i32> = Vec::new();
    combined.wait(&mut values).unwrap();
    assert_eq!(values, vec![0, 1, 2, 3, 4]);
}

#[test]
pub fn test_all_keeps_failure_after_late_success() {
    let slow = Promise::new(
        || {
            thread::sleep(Duration::from_millis(80));
            (1,)
        },
        (),
    );
    let combined = Promise::all(vec![slow, fail_with("early failure")]);
    let mut a = 0;
    let err = combined.wait((&mut a, &mut 0)).unwrap_err();
    assert!(err.to_string().contains("early failure"));
    // The slow success lands after the failure was published and is
    // discarded.
    thread::sleep(Duration::from_millis(160));
    let err = combined.wait((&mut a, &mut 0)).unwrap_err();
    assert!(err.to_string().contains("early failure"));
    assert_eq!(a, 0);
}

#[test]
pub fn test_combinators_with_no_sources_resolve() {
    Promise::all(Vec::new()).wait(()).unwrap();
    Promise::race(Vec::new()).wait(()).unwrap();
    Promise::any(Vec::new()).wait(()).unwrap();
}

#[test]
pub fn test_race_first_success_wins() {
    let slow = Promise::new(
        || {
            thread::sleep(Duration::from_millis(150));
            (1,)
        },
        (),
    );
    let fast = Promise::new(|| (2,), ());
    let raced = Promise::race(vec![slow, fast]);
    let mut out = 0;
    raced.wait((&mut out,)).unwrap();
    assert_eq!(out, 2);
    // The slow finisher lands after completion and is discarded.
    thread::sleep(Duration::from_millis(250));
    out = 0;
    raced.wait((&mut out,)).unwrap();
    assert_eq!(out, 2);
}

#[test]
pub fn test_race_failure_beats_slow_success() {
    let failing = fail_with("fast failure");
    let slow = Promise::new(
        || {
            thread::sleep(Duration::from_millis(150));
            (1,)
        },
        (),
    );
    let raced = Promise::race(vec![failing, slow]);
    let mut out = 0;
    let err = raced.wait((&mut out,)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "error during promise execution: error encountered in promise: fast failure"
    );
    // A success that finishes after the failure was published does not
    // overwrite it.
    thread::sleep(Duration::from_millis(250));
    let err = raced.wait((&mut out,)).unwrap_err();
    assert!(err.to_string().contains("fast failure"));
    assert_eq!(out, 0);
}

#[test]
pub fn test_race_single_source_passes_through() {
    let raced = Promise::race(vec![Promise::new(|| (9,), ())]);
    let mut out = 0;
    raced.wait((&mut out,)).unwrap();
    assert_eq!(out, 9);
}

#[test]
#[should_panic(expected = "expected all promises passed to race to return the same type")]
pub fn test_race_mismatched_result_types_panics() {
    let a = Promise::new(|| (1,), ());
    let b = Promise::new(|| ("x".to_string(),), ());
    Promise::race(vec![a, b]);
}

#[test]
pub fn test_any_single_source_passes_through() {
    let p = Promise::any(vec![fail_with("alone")]);
    let err = p.wait((&mut 0,)).unwrap_err();
    // One source means no aggregation; its failure comes through as-is.
    assert_eq!(err.to_string(), "error during promise execution: alone");
}

#[test]
pub fn test_any_first_success_wins_over_failures() {
    let failing = fail_with("ignored");
    let succeeding = Promise::new(
        || {
            thread::sleep(Duration::from_millis(60));
            (5,)
        },
        (),
    );
    let p = Promise::any(vec![failing, succeeding]);
    let mut out = 0;
    p.wait((&mut out,)).unwrap();
    assert_eq!(out, 5);
}

#[test]
pub fn test_any_aggregates_when_all_fail() {
    let p = Promise::any(vec![fail_with("first"), fail_with("second")]);
    let err = p.wait((&mut 0,)).unwrap_err();
    assert!(err
        .to_string()
        .starts_with("error during promise execution: all 2 promises failed. last err="));
    let aggregate = err.failure().downcast_ref::<AggregateError>().unwrap();
    assert_eq!(aggregate.errors().len(), 2);
    let rendered: Vec<String> = aggregate.errors().iter().map(|e| e.to_string()).collect();
    assert!(rendered.contains(&"first".to_string()));
    assert!(rendered.contains(&"second".to_string()));
}

#[test]
pub fn test_any_aggregates_across_many_sources() {
    let promises: Vec<Promise> = (0..8)
        .map(|i| {
            Promise::new(
                move || -> Result<(i32,), io::Error> {
                    thread::sleep(Duration::from_millis(5 * (8 - i) as u64));
                    Err(io::Error::new(io::ErrorKind::Other, format!("source {i}")))
                },
                (),
            )
        })
        .collect();
    let err = Promise::any(promises).wait((&mut 0,)).unwrap_err();
    let aggregate = err.failure().downcast_ref::<AggregateError>().unwrap();
    assert_eq!(aggregate.errors().len(), 8);
    // Slots are recorded by source index, so the aggregate lists the
    // errors in source order even though completion ran in reverse.
    for (i, e) in aggregate.errors().iter().enumerate() {
        assert_eq!(e.to_string(), format!("source {i}"));
    }
}

#[test]
pub fn test_wait_packs_homogeneous_results() {
    let p = Promise::new(|x: i32| (x, x + 1, x + 2), (10,));
    let mut values: Vec<i32> = Vec::new();
    p.wait(&mut values).unwrap();
    assert_eq!(values, vec![10, 11, 12]);
}

#[test]
pub fn test_wait_fills_single_vec_result() {
    let p = Promise::new(|| (vec![1, 2],), ());
    let mut values: Vec<i32> = vec![9, 9, 9];
    p.wait(&mut values).unwrap();
    assert_eq!(values, vec![1, 2]);
}

#[test]
#[should_panic(expected = "promise returns 0 values, wait was asked to set 1 values")]
pub fn test_wait_slice_rejects_promise_with_no_results() {
    let p = Promise::new(|| (), ());
    let mut values: Vec<i32> = Vec::new();
    let _ = p.wait(&mut values);
}

#[test]
#[should_panic(expected = "promise returns 2 values, wait was asked to set 1 values")]
pub fn test_wait_count_mismatch_panics() {
    let _ = Promise::new(|| (1, 2), ()).wait((&mut 0,));
}

#[test]
#[should_panic(expected = "for return value 1: expected destination of type")]
pub fn test_wait_type_mismatch_panics() {
    let p = Promise::new(|| (1, "two".to_string()), ());
    let _ = p.wait((&mut 0, &mut 0));
}

#[test]
pub fn test_wait_is_idempotent_and_runs_once() {
    let runs = Arc::new(AtomicUsize::new(0));
    let probe = runs.clone();
    let p = Promise::new(
        move || {
            probe.fetch_add(1, Ordering::SeqCst);
            (7,)
        },
        (),
    );
    let mut out = 0;
    p.wait((&mut out,)).unwrap();
    assert_eq!(out, 7);
    out = 0;
    p.wait((&mut out,)).unwrap();
    assert_eq!(out, 7);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
pub fn test_wait_from_many_threads() {
    let p = Promise::new(
        || {
            thread::sleep(Duration::from_millis(50));
            ("ready".to_string(),)
        },
        (),
    );
    let mut handles = Vec::new();
    for _ in 0..8 {
        let p = p.clone();
        handles.push(thread::spawn(move || {
            let mut out = String::new();
            p.wait((&mut out,)).unwrap();
            out
        }));
    }
    for handle in handles {
        assert_eq!(handle.join().unwrap(), "ready");
    }
}

#[test]
pub fn test_panic_becomes_failure() {
    let p = Promise::new(|| -> (i32,) { panic!("kaboom") }, ());
    let err = p.wait((&mut 0,)).unwrap_err();
    assert_eq!(err.to_string(), "error during promise execution: kaboom");
    let panic_err = err.failure().downcast_ref::<PanicError>().unwrap();
    assert_eq!(panic_err.message(), "kaboom");
}

#[test]
pub fn test_panic_with_formatted_payload() {
    let retries = 3;
    let p = Promise::new(move || -> (i32,) { panic!("failed after {retries} retries") }, ());
    let err = p.wait((&mut 0,)).unwrap_err();
    let panic_err = err.failure().downcast_ref::<PanicError>().unwrap();
    assert_eq!(panic_err.message(), "failed after 3 retries");
}

#[test]
pub fn test_signature_reports_shapes() {
    let sig = <fn(i32) -> Result<(String,), io::Error> as Callable<(i32,)>>::signature();
    assert_eq!(sig.params(), &[TypeDesc::of::<i32>()]);
    assert_eq!(sig.results(), &[TypeDesc::of::<String>()]);
    assert!(sig.returns_error());

    let sig = <fn() as Callable<()>>::signature();
    assert!(sig.params().is_empty());
    assert!(sig.results().is_empty());
    assert!(!sig.returns_error());
}

#[test]
pub fn test_promise_debug_output() {
    let p = Promise::new(|| (1,), ());
    let mut out = 0;
    p.wait((&mut out,)).unwrap();
    let rendered = format!("{:?}", p);
    assert!(rendered.contains("Simple"));
    assert!(rendered.contains("completed: true"));
}
