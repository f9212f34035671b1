//! Run configuration.

use crate::error::Failure;
use crate::monitor::{Monitor, MonitorFactory, MonitorSlot};
use crate::schedule::Schedule;
use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

pub(crate) type FailureCallback = Arc<dyn Fn(&Failure) + Send + Sync>;

/// Which strategy drives the exploration.
#[derive(Clone, Debug)]
pub enum StrategyKind {
    /// Uniform random choice among enabled operations.
    Random,
    /// Stay on the current operation with the given probability.
    Probabilistic(f64),
    /// Priority-change testing with the given number of inversion points.
    Pct(usize),
    /// Replay a recorded schedule trace.
    Replay(ReplaySource),
    /// Wrap a base strategy with liveness temperature tracking.
    Liveness(Box<StrategyKind>),
}

impl StrategyKind {
    /// Replay from a trace file on disk.
    pub fn replay_file(path: impl Into<PathBuf>) -> Self {
        StrategyKind::Replay(ReplaySource::File(path.into()))
    }

    /// Replay an in-memory schedule, e.g. one taken from a `BugReport`.
    pub fn replay(schedule: Schedule) -> Self {
        StrategyKind::Replay(ReplaySource::Inline(schedule))
    }

    pub fn liveness(base: StrategyKind) -> Self {
        StrategyKind::Liveness(Box::new(base))
    }
}

#[derive(Clone, Debug)]
pub enum ReplaySource {
    File(PathBuf),
    Inline(Schedule),
}

/// Configuration for a `verify` run. Construct through [`Config::builder`].
#[derive(Clone)]
pub struct Config {
    pub(crate) strategy: StrategyKind,
    pub(crate) max_scheduled_steps: usize,
    pub(crate) max_fair_scheduled_steps: usize,
    pub(crate) iterations: u64,
    pub(crate) random_seed: Option<u64>,
    pub(crate) consider_depth_bound_hit_as_bug: bool,
    pub(crate) attach_debugger: bool,
    pub(crate) liveness_temperature_threshold: u64,
    pub(crate) keep_going_after_error: bool,
    pub(crate) verbose: u32,
    pub(crate) parallel_workers: usize,
    pub(crate) stack_size: usize,
    pub(crate) trace_file: Option<PathBuf>,
    /// Strategy that takes over when a replayed trace is exhausted.
    pub(crate) replay_suffix: Option<StrategyKind>,
    pub(crate) monitors: Vec<MonitorFactory>,
    pub(crate) on_failure: Option<FailureCallback>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn strategy(&self) -> &StrategyKind {
        &self.strategy
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("strategy", &self.strategy)
            .field("max_scheduled_steps", &self.max_scheduled_steps)
            .field("max_fair_scheduled_steps", &self.max_fair_scheduled_steps)
            .field("iterations", &self.iterations)
            .field("random_seed", &self.random_seed)
            .field(
                "consider_depth_bound_hit_as_bug",
                &self.consider_depth_bound_hit_as_bug,
            )
            .field("attach_debugger", &self.attach_debugger)
            .field(
                "liveness_temperature_threshold",
                &self.liveness_temperature_threshold,
            )
            .field("keep_going_after_error", &self.keep_going_after_error)
            .field("verbose", &self.verbose)
            .field("parallel_workers", &self.parallel_workers)
            .field("stack_size", &self.stack_size)
            .field("trace_file", &self.trace_file)
            .field("monitors", &self.monitors.len())
            .finish_non_exhaustive()
    }
}

pub struct ConfigBuilder {
    config: Config,
    liveness_threshold_set: bool,
}

impl ConfigBuilder {
    fn new() -> Self {
        Self {
            config: Config {
                strategy: StrategyKind::Random,
                max_scheduled_steps: 10_000,
                max_fair_scheduled_steps: 100_000,
                iterations: 100,
                random_seed: None,
                consider_depth_bound_hit_as_bug: false,
                attach_debugger: false,
                liveness_temperature_threshold: 0,
                keep_going_after_error: false,
                verbose: 0,
                parallel_workers: 1,
                stack_size: 0x20000,
                trace_file: None,
                replay_suffix: None,
                monitors: Vec::new(),
                on_failure: None,
            },
            liveness_threshold_set: false,
        }
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn with_max_scheduled_steps(mut self, max: usize) -> Self {
        self.config.max_scheduled_steps = max;
        self
    }

    pub fn with_max_fair_scheduled_steps(mut self, max: usize) -> Self {
        self.config.max_fair_scheduled_steps = max;
        self
    }

    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.config.iterations = iterations;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.config.random_seed = Some(seed);
        self
    }

    pub fn with_depth_bound_as_bug(mut self, as_bug: bool) -> Self {
        self.config.consider_depth_bound_hit_as_bug = as_bug;
        self
    }

    pub fn with_attach_debugger(mut self, attach: bool) -> Self {
        self.config.attach_debugger = attach;
        self
    }

    pub fn with_liveness_temperature_threshold(mut self, threshold: u64) -> Self {
        self.config.liveness_temperature_threshold = threshold;
        self.liveness_threshold_set = true;
        self
    }

    pub fn with_keep_going_after_error(mut self, keep_going: bool) -> Self {
        self.config.keep_going_after_error = keep_going;
        self
    }

    pub fn with_verbose(mut self, verbose: u32) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Number of rayon workers for parallel iterations; 0 means one per
    /// CPU. Only strategies whose iterations are independent fan out.
    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.config.parallel_workers = workers;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.config.stack_size = stack_size;
        self
    }

    /// Persist the failing iteration's trace at this path instead of a
    /// temp-dir default.
    pub fn with_trace_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.trace_file = Some(path.into());
        self
    }

    /// When replaying, switch to this strategy once the recorded trace is
    /// exhausted instead of stopping the iteration.
    pub fn with_replay_suffix(mut self, suffix: StrategyKind) -> Self {
        self.config.replay_suffix = Some(suffix);
        self
    }

    /// Register a monitor type; a fresh instance observes every iteration.
    pub fn with_monitor<M: Monitor + Default>(self) -> Self {
        self.with_monitor_fn(M::default)
    }

    /// Register a monitor built by `f`, for monitors that need captured
    /// state (e.g. a shared sentinel the test asserts on afterwards).
    pub fn with_monitor_fn<M, F>(mut self, f: F) -> Self
    where
        M: Monitor,
        F: Fn() -> M + Send + Sync + 'static,
    {
        let factory: MonitorFactory = Arc::new(move || {
            Rc::new(RefCell::new(MonitorSlot::new(f()))) as Rc<RefCell<dyn crate::monitor::MonitorRt>>
        });
        self.config.monitors.push(factory);
        self
    }

    /// Single callback invoked for every recorded failure, in addition to
    /// the structured report fields.
    pub fn with_failure_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&Failure) + Send + Sync + 'static,
    {
        self.config.on_failure = Some(Arc::new(f));
        self
    }

    pub fn build(mut self) -> Config {
        if !self.liveness_threshold_set {
            // Half the fair exploration budget, so a genuine hot cycle trips
            // well before the bound silently ends the iteration.
            self.config.liveness_temperature_threshold =
                (self.config.max_fair_scheduled_steps as u64) / 2;
        }
        self.config
    }
}
