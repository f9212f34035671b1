//! The iteration driver: runs a program under test against a strategy for a
//! configured number of iterations, collecting bugs and traces.

use crate::config::Config;
use crate::error::Failure;
use crate::report::{BugReport, TestReport};
use crate::runtime::execution::Execution;
use crate::runtime::{failure, Runtime};
use crate::schedule::Schedule;
use crate::strategy::{strategy_from_config, supports_parallel_iterations, Strategy};
use rayon::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Systematically explore schedules of `f` under `config`, returning a
/// structured report. `f` is re-executed once per iteration; it must be
/// self-contained enough that re-running it makes sense.
pub fn verify<F>(config: Config, f: F) -> TestReport
where
    F: Fn() + Send + Sync + 'static,
{
    let start = Instant::now();

    let base_seed = config.random_seed.unwrap_or_else(seed_from_entropy);
    let strategy = match strategy_from_config(&config, base_seed) {
        Ok(strategy) => strategy,
        Err(e) => {
            let mut report = TestReport::new("<unconfigured>".to_string());
            report.setup_error = Some(e.to_string());
            log::error!("verify could not start: {e}");
            return report;
        }
    };

    let mut report = TestReport::new(strategy.description());
    log::info!(
        "exploring up to {} iterations with strategy {} (seed {base_seed})",
        config.iterations,
        report.strategy
    );

    let _hook = failure::init_panic_hook();
    let f = Arc::new(f);

    let workers = if config.parallel_workers == 0 {
        num_cpus::get()
    } else {
        config.parallel_workers
    };
    if workers > 1 && supports_parallel_iterations(&config.strategy) {
        run_parallel(&config, f, base_seed, workers, &mut report);
    } else {
        if workers > 1 {
            log::warn!(
                "strategy {} keeps cross-iteration state; running sequentially",
                report.strategy
            );
        }
        run_sequential(&config, strategy, f, base_seed, &mut report);
    }

    report.elapsed_ms = start.elapsed().as_millis();
    log::info!(
        "explored {} iterations, {} steps, {} bug(s)",
        report.iterations,
        report.total_steps,
        report.bugs.len()
    );
    report
}

struct IterationOutcome {
    schedule: Schedule,
    failure: Option<Failure>,
    steps: u64,
    depth_bound_hit: bool,
}

/// Run one iteration, moving the strategy into the runtime and back out.
fn run_iteration<F>(
    config: &Config,
    strategy: Box<dyn Strategy + Send>,
    f: &Arc<F>,
    seed: u64,
) -> (Box<dyn Strategy + Send>, IterationOutcome)
where
    F: Fn() + Send + Sync + 'static,
{
    let runtime = Rc::new(RefCell::new(Runtime::new(config, strategy, Some(seed))));
    let closure = {
        let f = Arc::clone(f);
        move || f()
    };
    Execution::new(Rc::clone(&runtime)).run(closure);

    let runtime = Rc::try_unwrap(runtime)
        .map_err(|_| ())
        .expect("the execution must not retain runtime references after run");
    let parts = runtime.into_inner().into_parts();
    (
        parts.strategy,
        IterationOutcome {
            schedule: parts.schedule,
            failure: parts.failure,
            steps: parts.scheduled_steps,
            depth_bound_hit: parts.depth_bound_hit,
        },
    )
}

/// Fold one finished iteration into the report. Returns false when the run
/// should stop.
fn absorb(
    config: &Config,
    iteration: u64,
    outcome: IterationOutcome,
    report: &mut TestReport,
) -> bool {
    report.iterations += 1;
    report.total_steps += outcome.steps;
    if outcome.depth_bound_hit {
        report.depth_bound_hits += 1;
    }
    if config.verbose > 1 {
        log::info!("iteration {iteration} finished after {} steps", outcome.steps);
    }

    let Some(failure) = outcome.failure else {
        return true;
    };

    let trace_path = failure::persist_schedule(&outcome.schedule, config, iteration);
    log::warn!("iteration {iteration}: {failure}");
    report.bugs.push(BugReport {
        iteration,
        failure,
        schedule: outcome.schedule,
        trace_path,
    });

    if config.attach_debugger {
        // Re-raise at the failure point so an attached debugger stops on a
        // natural frame instead of a report summary.
        panic!(
            "{}",
            report.bugs.last().map(|b| b.failure.to_string()).unwrap_or_default()
        );
    }

    config.keep_going_after_error
}

fn run_sequential<F>(
    config: &Config,
    mut strategy: Box<dyn Strategy + Send>,
    f: Arc<F>,
    base_seed: u64,
    report: &mut TestReport,
) where
    F: Fn() + Send + Sync + 'static,
{
    for iteration in 0..config.iterations {
        if !strategy.initialize_next_iteration(iteration) {
            log::debug!("strategy has nothing further to explore after {iteration} iterations");
            break;
        }
        let seed = base_seed.wrapping_add(iteration);
        let (returned, outcome) = run_iteration(config, strategy, &f, seed);
        strategy = returned;
        if !absorb(config, iteration, outcome, report) {
            break;
        }
    }
}

/// Fan iterations out over a rayon pool. Only used for strategies whose
/// iteration `i` depends on (seed, i) alone, so the outcomes — taken in
/// iteration order — are identical to a sequential run.
fn run_parallel<F>(
    config: &Config,
    f: Arc<F>,
    base_seed: u64,
    workers: usize,
    report: &mut TestReport,
) where
    F: Fn() + Send + Sync + 'static,
{
    let pool = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool,
        Err(e) => {
            log::warn!("failed to build a {workers}-worker pool ({e}); running sequentially");
            let strategy = strategy_from_config(config, base_seed)
                .expect("strategy construction already succeeded once");
            return run_sequential(config, strategy, f, base_seed, report);
        }
    };

    let outcomes: Vec<(u64, IterationOutcome)> = pool.install(|| {
        (0..config.iterations)
            .into_par_iter()
            .map(|iteration| {
                let mut strategy = strategy_from_config(config, base_seed)
                    .expect("strategy construction already succeeded once");
                strategy.initialize_next_iteration(iteration);
                let seed = base_seed.wrapping_add(iteration);
                let (_, outcome) = run_iteration(config, strategy, &f, seed);
                (iteration, outcome)
            })
            .collect()
    });

    for (iteration, outcome) in outcomes {
        if !absorb(config, iteration, outcome, report) {
            break;
        }
    }
}

/// Fallback seed when none is configured. Logged by the caller so the run
/// stays reproducible after the fact.
fn seed_from_entropy() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed)
}
