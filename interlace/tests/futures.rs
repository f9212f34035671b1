//! Async interception: spawned futures are operations, awaits park and
//! wake through the scheduler.

mod common;

use interlace::{future, verify, Config};
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
#[serial]
fn spawned_future_joins_with_its_value() {
    common::init_logging();
    let report = verify(
        Config::builder().with_iterations(20).with_random_seed(1).build(),
        || {
            future::block_on(async {
                let handle = future::spawn(async { 40 + 2 });
                let value = handle.await.unwrap();
                interlace::assert!(value == 42, "unexpected join value {}", value);
            });
        },
    );
    assert!(!report.found_bug());
}

#[test]
#[serial]
fn yielding_futures_interleave() {
    common::init_logging();
    let report = verify(
        Config::builder().with_iterations(50).with_random_seed(4).build(),
        || {
            future::block_on(async {
                let counter = Arc::new(AtomicUsize::new(0));

                let tasks: Vec<_> = (0..3)
                    .map(|_| {
                        let counter = Arc::clone(&counter);
                        future::spawn(async move {
                            for _ in 0..2 {
                                counter.fetch_add(1, Ordering::SeqCst);
                                future::yield_now().await;
                            }
                        })
                    })
                    .collect();

                for task in tasks {
                    task.await.unwrap();
                }
                interlace::assert!(
                    counter.load(Ordering::SeqCst) == 6,
                    "missing increments: {}",
                    counter.load(Ordering::SeqCst)
                );
            });
        },
    );
    assert!(!report.found_bug());
}

#[test]
#[serial]
fn notified_waiter_observes_prior_store() {
    common::init_logging();
    // A writer task publishes then completes; the awaiting side must
    // observe the published value in every schedule.
    let report = verify(
        Config::builder().with_iterations(100).with_random_seed(6).build(),
        || {
            future::block_on(async {
                let cell = Arc::new(AtomicUsize::new(0));
                let cell2 = Arc::clone(&cell);

                let writer = future::spawn(async move {
                    cell2.store(7, Ordering::SeqCst);
                });

                writer.await.unwrap();
                interlace::assert!(
                    cell.load(Ordering::SeqCst) == 7,
                    "await returned before the task finished"
                );
            });
        },
    );
    assert!(!report.found_bug());
}

#[test]
#[serial]
fn async_race_is_still_found() {
    common::init_logging();
    let report = verify(
        Config::builder().with_iterations(200).with_random_seed(9).build(),
        || {
            future::block_on(async {
                let x = Arc::new(AtomicUsize::new(0));
                let x1 = Arc::clone(&x);
                let x2 = Arc::clone(&x);

                let a = future::spawn(async move {
                    x1.store(3, Ordering::SeqCst);
                });
                let b = future::spawn(async move {
                    x2.store(5, Ordering::SeqCst);
                    future::yield_now().await;
                    let v = x2.load(Ordering::SeqCst);
                    interlace::assert!(v == 5, "Value is {} instead of 5", v);
                });

                let _ = a.await;
                let _ = b.await;
            });
        },
    );
    assert!(report.found_bug());
}
