//! Integration scenarios for the thread-pool runner.

use offthread::{AsyncTester, OffloadError, ResultStream, Runner};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn double(x: i32) -> i32 {
    x * 2
}

#[test]
fn test_offload_resumes_on_main_thread() {
    let tester = AsyncTester::new(4);
    let runner = tester.runner();
    let results = Arc::new(Mutex::new(Vec::new()));
    let main = thread::current().id();

    let r = Arc::clone(&results);
    tester.start_and_wait(async move {
        assert_eq!(thread::current().id(), main);
        let value = runner
            .offload(move || {
                assert_ne!(thread::current().id(), main);
                double(33)
            })
            .await
            .unwrap();
        assert_eq!(thread::current().id(), main);
        r.lock().push(value);
    });

    assert_eq!(*results.lock(), vec![66]);
    assert!(tester.runner().is_idle());
    tester.close();
}

#[test]
fn test_routine_without_offload() {
    // Sanity check that trivial routines work at all.
    let tester = AsyncTester::new(2);
    let results = Arc::new(Mutex::new(Vec::new()));

    let r = Arc::clone(&results);
    tester.start_and_wait(async move {
        r.lock().push(42);
    });

    assert_eq!(*results.lock(), vec![42]);
    tester.close();
}

#[test]
fn test_job_panic_propagates_to_await_point() {
    let tester = AsyncTester::new(2);
    let runner = tester.runner();
    let error = Arc::new(Mutex::new(None));

    let e = Arc::clone(&error);
    tester.start_and_wait(async move {
        let result = runner.offload(|| -> i32 { panic!("oh no") }).await;
        *e.lock() = result.err();
    });

    assert_eq!(
        *error.lock(),
        Some(OffloadError::Panicked("oh no".into()))
    );
    tester.close();
}

#[test]
fn test_many_routines_at_once() {
    let tester = AsyncTester::new(4);
    let results = Arc::new(Mutex::new(Vec::new()));

    let loop_count = 100;
    for i in 0..loop_count {
        let runner = tester.runner();
        let r = Arc::clone(&results);
        tester.runner().start(async move {
            for _ in 0..5 {
                let value = runner.offload(move || double(i)).await.unwrap();
                r.lock().push(value);
            }
        });
    }
    tester.wait_idle();

    let results = results.lock();
    assert_eq!(results.len(), loop_count as usize * 5);
    // Completion order is not guaranteed; compare as a set.
    let observed: HashSet<i32> = results.iter().copied().collect();
    let expected: HashSet<i32> = (0..loop_count).map(double).collect();
    assert_eq!(observed, expected);
    tester.close();
}

#[test]
fn test_offload_many_two_concurrent_calls() {
    let tester = AsyncTester::new(4);
    let results = Arc::new(Mutex::new(Vec::new()));
    let main = thread::current().id();

    let collect = |count: i32| {
        let runner = tester.runner();
        let results = Arc::clone(&results);
        async move {
            let funcs: Vec<_> = (0..count)
                .map(|x| {
                    move || {
                        thread::sleep(Duration::from_millis((x % 7) as u64));
                        double(x)
                    }
                })
                .collect();
            let mut stream = runner.offload_many(funcs);
            while let Some(result) = stream.next().await {
                // Every yielded value is consumed on the main thread.
                assert_eq!(thread::current().id(), main);
                results.lock().push(result.unwrap());
            }
        }
    };

    tester.runner().start(collect(100));
    tester.runner().start(collect(200));
    tester.wait_idle();

    let results = results.lock();
    assert_eq!(results.len(), 300);
    // Every submitted value must come back exactly as often as it was
    // submitted, so compare occurrence counts, not just the value set.
    let mut observed: HashMap<i32, usize> = HashMap::new();
    for &value in results.iter() {
        *observed.entry(value).or_default() += 1;
    }
    let mut expected: HashMap<i32, usize> = HashMap::new();
    for x in (0..100).chain(0..200) {
        *expected.entry(double(x)).or_default() += 1;
    }
    assert_eq!(observed, expected);
    tester.close();
}

#[test]
fn test_offload_many_submits_in_batches() {
    // A big offload_many call must not monopolize the pool: a single
    // offload started right after it has to land well before the big
    // call's tail, because jobs are submitted half-a-pool at a time.
    let tester = AsyncTester::new(4);
    let results = Arc::new(Mutex::new(Vec::new()));

    let count = 100;
    let runner = tester.runner();
    let r = Arc::clone(&results);
    tester.runner().start(async move {
        let funcs: Vec<_> = (0..count)
            .map(|x| {
                move || {
                    thread::sleep(Duration::from_millis(2));
                    double(x)
                }
            })
            .collect();
        let mut stream = runner.offload_many(funcs);
        while let Some(result) = stream.next().await {
            r.lock().push(result.unwrap());
        }
    });

    let runner = tester.runner();
    let r = Arc::clone(&results);
    tester.runner().start(async move {
        let value = runner.offload(|| -1).await.unwrap();
        r.lock().push(value);
    });

    tester.wait_idle();

    let results = results.lock();
    assert_eq!(results.len(), count as usize + 1);
    let position = results
        .iter()
        .position(|&value| value == -1)
        .expect("independent offload result missing");
    assert!(
        position < count as usize / 4,
        "independent offload landed at position {}, after most of the bulk call",
        position
    );
    tester.close();
}

#[test]
fn test_offload_many_stop_midway_cancels_rest() {
    let tester = AsyncTester::new(4);
    let runner = tester.runner();
    let results = Arc::new(Mutex::new(Vec::new()));

    let count = 100;
    let r = Arc::clone(&results);
    tester.start_and_wait(async move {
        let funcs: Vec<_> = (0..count).map(|x| move || double(x)).collect();
        let mut stream = runner.offload_many(funcs);
        while let Some(result) = stream.next().await {
            let mut results = r.lock();
            if results.len() >= count as usize / 2 {
                break;
            }
            results.push(result.unwrap());
        }
    });

    assert_eq!(results.lock().len(), 50);
    // Dropping the stream early means the tail was never even submitted.
    let stats = tester.runner().pool_stats();
    assert!(
        stats.submitted < count as u64,
        "expected fewer than {} submissions, got {}",
        count,
        stats.submitted
    );
    assert!(tester.runner().is_idle());
    tester.close();
}

#[test]
fn test_offload_many_runs_jobs_in_parallel() {
    // Both jobs block on the same barrier, so neither can finish unless
    // they genuinely run at the same time on different workers.
    let tester = AsyncTester::new(4);
    let runner = tester.runner();
    let executed = Arc::new(Mutex::new(HashSet::new()));
    let barrier = Arc::new(Barrier::new(2));

    let e = Arc::clone(&executed);
    tester.start_and_wait(async move {
        let funcs: Vec<_> = ["call1", "call2"]
            .into_iter()
            .map(|call_id| {
                let barrier = Arc::clone(&barrier);
                move || {
                    barrier.wait();
                    call_id
                }
            })
            .collect();
        let mut stream = runner.offload_many(funcs);
        while let Some(result) = stream.next().await {
            e.lock().insert(result.unwrap());
        }
    });

    assert_eq!(
        *executed.lock(),
        HashSet::from(["call1", "call2"])
    );
    tester.close();
}

#[test]
fn test_simultaneous_completions_lose_no_results() {
    // Two operations finishing back-to-back race for the claim; the batch
    // must still deliver both results exactly once.
    let tester = AsyncTester::new(4);
    let runner = tester.runner();
    let results = Arc::new(Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(2));

    let r = Arc::clone(&results);
    tester.start_and_wait(async move {
        let funcs: Vec<_> = (0..2)
            .map(|x| {
                let barrier = Arc::clone(&barrier);
                move || {
                    barrier.wait();
                    double(x)
                }
            })
            .collect();
        let mut stream = runner.offload_many(funcs);
        while let Some(result) = stream.next().await {
            r.lock().push(result.unwrap());
        }
    });

    let mut results = results.lock().clone();
    results.sort_unstable();
    assert_eq!(results, vec![0, 2]);
    assert!(tester.runner().is_idle());
    tester.close();
}

#[test]
fn test_empty_offload_many() {
    let tester = AsyncTester::new(2);
    let runner = tester.runner();
    let yielded = Arc::new(Mutex::new(0));

    let y = Arc::clone(&yielded);
    tester.start_and_wait(async move {
        let mut stream = runner.offload_many(Vec::<fn() -> i32>::new());
        while stream.next().await.is_some() {
            *y.lock() += 1;
        }
    });

    assert_eq!(*yielded.lock(), 0);
    assert!(tester.runner().is_idle());
    tester.close();
}

#[test]
fn test_run_to_completion_returns_result() {
    let tester = AsyncTester::new(2);
    let runner = tester.runner();

    let r = runner.clone();
    let value = runner.run_to_completion(async move { r.offload(|| double(10)).await.unwrap() });
    assert_eq!(value, 20);
    tester.close();
}

#[test]
fn test_run_to_completion_without_suspension() {
    let tester = AsyncTester::new(1);
    let value = tester.runner().run_to_completion(async { 5 });
    assert_eq!(value, 5);
    tester.close();
}

#[test]
#[should_panic(expected = "routine boom")]
fn test_run_to_completion_reraises_panic() {
    let tester = AsyncTester::new(1);
    tester.runner().run_to_completion(async {
        panic!("routine boom");
    });
}

#[test]
fn test_close_with_active_batches() {
    let tester = AsyncTester::new(2);
    let runner = tester.runner();

    let r = runner.clone();
    runner.start(async move {
        let funcs: Vec<_> = (0..10)
            .map(|x| {
                move || {
                    thread::sleep(Duration::from_millis(100));
                    double(x)
                }
            })
            .collect();
        let mut stream = r.offload_many(funcs);
        while let Some(result) = stream.next().await {
            let _ = result;
        }
    });

    // The routine is suspended on its first batch; close() must tear it
    // down and return once the workers have stopped.
    runner.close();
    assert!(runner.is_idle());
}

#[test]
fn test_to_sync_starts_a_routine_per_call() {
    let tester = AsyncTester::new(2);
    let runner = tester.runner();
    let results = Arc::new(Mutex::new(Vec::new()));

    let inner = runner.clone();
    let r = Arc::clone(&results);
    let callback = runner.to_sync(move || {
        let runner = inner.clone();
        let results = Arc::clone(&r);
        async move {
            let value = runner.offload(|| double(7)).await.unwrap();
            results.lock().push(value);
        }
    });

    callback();
    callback();
    tester.wait_idle();

    assert_eq!(*results.lock(), vec![14, 14]);
    tester.close();
}
