//! Universal properties: determinism for a fixed seed, trace length bounds,
//! depth-bound handling, and parallel/sequential agreement.

mod common;

use interlace::{verify, BugKind, Config, StrategyKind, TestReport};
use serial_test::serial;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

fn racy() {
    let x = Arc::new(AtomicI32::new(0));
    let a = {
        let x = Arc::clone(&x);
        interlace::spawn(move || x.store(3, Ordering::SeqCst))
    };
    let b = {
        let x = Arc::clone(&x);
        interlace::spawn(move || {
            x.store(5, Ordering::SeqCst);
            interlace::yield_now();
            let v = x.load(Ordering::SeqCst);
            interlace::assert!(v == 5, "Value is {} instead of 5", v);
        })
    };
    interlace::join_all(&[a, b]);
}

fn run_with(strategy: StrategyKind, seed: u64) -> TestReport {
    verify(
        Config::builder()
            .with_strategy(strategy)
            .with_iterations(100)
            .with_random_seed(seed)
            .build(),
        racy,
    )
}

fn assert_identical(a: &TestReport, b: &TestReport) {
    assert_eq!(a.iterations, b.iterations);
    assert_eq!(a.total_steps, b.total_steps);
    assert_eq!(a.bugs.len(), b.bugs.len());
    for (x, y) in a.bugs.iter().zip(&b.bugs) {
        assert_eq!(x.iteration, y.iteration);
        assert_eq!(x.failure.kind, y.failure.kind);
        assert_eq!(x.failure.message, y.failure.message);
        assert_eq!(x.failure.step, y.failure.step);
        assert_eq!(x.schedule.to_text(), y.schedule.to_text());
    }
}

#[test]
#[serial]
fn random_runs_are_deterministic_for_a_seed() {
    common::init_logging();
    let first = run_with(StrategyKind::Random, 12345);
    let second = run_with(StrategyKind::Random, 12345);
    assert_identical(&first, &second);
    assert!(first.found_bug());
}

#[test]
#[serial]
fn pct_runs_are_deterministic_for_a_seed() {
    common::init_logging();
    let first = run_with(StrategyKind::Pct(2), 999);
    let second = run_with(StrategyKind::Pct(2), 999);
    assert_identical(&first, &second);
}

#[test]
#[serial]
fn different_seeds_explore_different_schedules() {
    common::init_logging();
    let first = run_with(StrategyKind::Random, 1);
    let second = run_with(StrategyKind::Random, 2);
    // Identical programs, different exploration: the step totals almost
    // surely differ, and if they don't, at least one trace must.
    let same_totals = first.total_steps == second.total_steps;
    let same_first_bug = match (first.first_bug(), second.first_bug()) {
        (Some(a), Some(b)) => a.schedule.to_text() == b.schedule.to_text(),
        _ => false,
    };
    assert!(!(same_totals && same_first_bug));
}

#[test]
#[serial]
fn parallel_iterations_agree_with_sequential() {
    common::init_logging();
    let sequential = verify(
        Config::builder()
            .with_iterations(40)
            .with_random_seed(77)
            .with_keep_going_after_error(true)
            .build(),
        racy,
    );
    let parallel = verify(
        Config::builder()
            .with_iterations(40)
            .with_random_seed(77)
            .with_keep_going_after_error(true)
            .with_parallel_workers(4)
            .build(),
        racy,
    );
    assert_identical(&sequential, &parallel);
}

#[test]
#[serial]
fn depth_bound_detaches_silently_by_default() {
    common::init_logging();
    let report = verify(
        Config::builder()
            .with_iterations(3)
            .with_random_seed(0)
            .with_max_scheduled_steps(50)
            .with_max_fair_scheduled_steps(50)
            .build(),
        || loop {
            interlace::yield_now();
        },
    );

    assert!(!report.found_bug());
    assert_eq!(report.iterations, 3);
    assert_eq!(report.depth_bound_hits, 3);
    // Trace length bound: each iteration stops at exactly the step budget.
    assert_eq!(report.total_steps, 3 * 50);
}

#[test]
#[serial]
fn depth_bound_is_a_bug_when_configured() {
    common::init_logging();
    let report = verify(
        Config::builder()
            .with_iterations(1)
            .with_random_seed(0)
            .with_max_scheduled_steps(50)
            .with_max_fair_scheduled_steps(50)
            .with_depth_bound_as_bug(true)
            .build(),
        || loop {
            interlace::yield_now();
        },
    );

    let bug = report.first_bug().expect("bound hit must be a bug");
    assert_eq!(bug.failure.kind, BugKind::MaxStepsReached);
    assert_eq!(bug.schedule.len(), 50);
}

#[test]
#[serial]
fn nondeterministic_choices_are_seed_stable() {
    common::init_logging();
    let collect = |seed: u64| {
        let values = Arc::new(std::sync::Mutex::new(Vec::new()));
        let captured = Arc::clone(&values);
        let report = verify(
            Config::builder()
                .with_iterations(5)
                .with_random_seed(seed)
                .build(),
            move || {
                let b: bool = interlace::nondet();
                let v = interlace::nondet_u32(100);
                captured.lock().unwrap().push((b, v));
            },
        );
        assert!(!report.found_bug());
        let values = values.lock().unwrap().clone();
        values
    };
    assert_eq!(collect(5), collect(5));
}
