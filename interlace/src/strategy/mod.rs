//! Scheduling strategies: the decision engines behind the scheduler.
//!
//! A strategy makes three kinds of decisions: which enabled operation runs
//! next, and which value the next nondeterministic boolean/integer choice
//! takes. Strategies are pure with respect to scheduler state: they may
//! consult only the enabled set passed in and their own internal state.
//! Where several operations are equally preferred, ties break by ascending
//! operation id so a given seed always reproduces the same decisions.

use crate::config::{Config, ReplaySource, StrategyKind};
use crate::error::ScheduleError;
use crate::runtime::operation::OperationId;
use crate::schedule::Schedule;
use std::fmt::Debug;

mod liveness;
mod pct;
mod probabilistic;
mod random;
mod replay;

pub use liveness::LivenessStrategy;
pub use pct::PctStrategy;
pub use probabilistic::ProbabilisticStrategy;
pub use random::RandomStrategy;
pub use replay::ReplayStrategy;

/// Decision procedure for choosing the next operation and nondeterministic
/// values. One strategy instance lives across all iterations of a run;
/// `initialize_next_iteration` resets per-iteration state.
pub trait Strategy: Debug {
    /// Prepare for iteration `iteration` (0-based). Returning false means
    /// the strategy has nothing further to explore and the run should stop.
    fn initialize_next_iteration(&mut self, iteration: u64) -> bool;

    /// Choose the next operation out of `enabled` (non-empty, ascending id
    /// order). `is_yielding` hints that `current` asked to be deprioritized.
    /// Returning None stops exploration of the current iteration.
    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        current: Option<OperationId>,
        is_yielding: bool,
    ) -> Option<OperationId>;

    /// Choose the next boolean: true with probability 1/max for the random
    /// strategies. Returning None stops exploration.
    fn next_boolean(&mut self, current: Option<OperationId>, max: u64) -> Option<bool>;

    /// Choose the next integer in `[0, max)`. Returning None stops
    /// exploration.
    fn next_integer(&mut self, current: Option<OperationId>, max: u64) -> Option<u64>;

    /// Decisions made so far in the current iteration.
    fn step_count(&self) -> u64;

    /// True once the per-iteration step bound is exhausted.
    fn is_max_steps_reached(&self) -> bool;

    /// A fair strategy gives every continually-enabled operation a nonzero
    /// chance of selection at every step.
    fn is_fair(&self) -> bool;

    fn description(&self) -> String;

    /// Forget all cross-iteration state.
    fn reset(&mut self);

    /// A descriptive error explaining why `next_*` returned None, when the
    /// refusal is a bug (replay divergence) rather than a silent stop.
    fn error(&self) -> Option<String> {
        None
    }

    /// Fed by the scheduler before each scheduling decision: whether any
    /// monitor currently sits in a hot state. Only the liveness wrapper
    /// reacts to this.
    fn notify_monitor_status(&mut self, any_hot: bool) {
        let _ = any_hot;
    }

    /// Polled by the scheduler after `notify_monitor_status`; Some(message)
    /// reports a fair-cycle liveness violation.
    fn check_liveness(&mut self) -> Option<String> {
        None
    }
}

impl Strategy for Box<dyn Strategy + Send> {
    fn initialize_next_iteration(&mut self, iteration: u64) -> bool {
        self.as_mut().initialize_next_iteration(iteration)
    }

    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        current: Option<OperationId>,
        is_yielding: bool,
    ) -> Option<OperationId> {
        self.as_mut().next_operation(enabled, current, is_yielding)
    }

    fn next_boolean(&mut self, current: Option<OperationId>, max: u64) -> Option<bool> {
        self.as_mut().next_boolean(current, max)
    }

    fn next_integer(&mut self, current: Option<OperationId>, max: u64) -> Option<u64> {
        self.as_mut().next_integer(current, max)
    }

    fn step_count(&self) -> u64 {
        self.as_ref().step_count()
    }

    fn is_max_steps_reached(&self) -> bool {
        self.as_ref().is_max_steps_reached()
    }

    fn is_fair(&self) -> bool {
        self.as_ref().is_fair()
    }

    fn description(&self) -> String {
        self.as_ref().description()
    }

    fn reset(&mut self) {
        self.as_mut().reset()
    }

    fn error(&self) -> Option<String> {
        self.as_ref().error()
    }

    fn notify_monitor_status(&mut self, any_hot: bool) {
        self.as_mut().notify_monitor_status(any_hot)
    }

    fn check_liveness(&mut self) -> Option<String> {
        self.as_mut().check_liveness()
    }
}

/// Build the strategy a configuration asks for. Fair strategies are bounded
/// by `max_fair_scheduled_steps`, unfair ones by `max_scheduled_steps`.
pub(crate) fn strategy_from_config(
    config: &Config,
    seed: u64,
) -> Result<Box<dyn Strategy + Send>, ScheduleError> {
    build(&config.strategy, config, seed)
}

fn build(
    kind: &StrategyKind,
    config: &Config,
    seed: u64,
) -> Result<Box<dyn Strategy + Send>, ScheduleError> {
    let fair_max = config.max_fair_scheduled_steps as u64;
    let unfair_max = config.max_scheduled_steps as u64;
    Ok(match kind {
        StrategyKind::Random => Box::new(RandomStrategy::new(seed, fair_max)),
        StrategyKind::Probabilistic(p) => {
            Box::new(ProbabilisticStrategy::new(*p, seed, fair_max))
        }
        StrategyKind::Pct(changes) => Box::new(PctStrategy::new(*changes, seed, unfair_max)),
        StrategyKind::Replay(source) => {
            let schedule = match source {
                ReplaySource::File(path) => Schedule::load(path)?,
                ReplaySource::Inline(schedule) => schedule.clone(),
            };
            let replay = ReplayStrategy::new(schedule, unfair_max);
            match &config.replay_suffix {
                Some(suffix) => {
                    // The suffix is built without a suffix of its own, so a
                    // replay-shaped suffix cannot recurse.
                    let mut base = config.clone();
                    base.replay_suffix = None;
                    Box::new(replay.with_suffix(build(suffix, &base, seed)?))
                }
                None => Box::new(replay),
            }
        }
        StrategyKind::Liveness(base) => {
            let base = build(base, config, seed)?;
            Box::new(LivenessStrategy::new(
                base,
                config.liveness_temperature_threshold,
            ))
        }
    })
}

/// True when per-iteration decisions depend only on (seed, iteration), so
/// iterations may run on a rayon pool without changing the outcome.
pub(crate) fn supports_parallel_iterations(kind: &StrategyKind) -> bool {
    matches!(kind, StrategyKind::Random | StrategyKind::Probabilistic(_))
}
