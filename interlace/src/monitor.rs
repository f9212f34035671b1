//! Specification monitors.
//!
//! A monitor is a state machine that observes events without ever being in
//! the inbox path of the system under test: delivery happens synchronously
//! on the sender's stack, and the scheduler never consults the strategy
//! while a monitor handler runs. States may be classified hot or cold;
//! time spent in hot states feeds the liveness temperature (see the
//! liveness strategy wrapper).

use crate::actor::{CtxKind, Event, EventTag, Flow, MachineCtx, MachineDecl, MachineRunner};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// A specification state machine. Declared exactly like a [`crate::actor::Machine`],
/// but with no inbox; mark liveness-relevant states with
/// [`crate::actor::StateDecl::hot`] / [`crate::actor::StateDecl::cold`].
pub trait Monitor: Send + 'static {
    fn declare(decl: &mut MachineDecl<Self>)
    where
        Self: Sized;

    fn name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}

/// Object-safe surface the runtime drives monitors through.
pub(crate) trait MonitorRt {
    fn name(&self) -> &'static str;
    /// Whether this monitor declares any handler for `tag`, in any state.
    fn observes(&self, tag: EventTag) -> bool;
    /// Run entry actions of the initial state.
    fn initialize(&mut self);
    /// Deliver one event synchronously, consuming the raised-event chain.
    fn deliver(&mut self, event: &Event);
    fn is_hot(&self) -> bool;
}

pub(crate) type MonitorFactory = Arc<dyn Fn() -> Rc<RefCell<dyn MonitorRt>> + Send + Sync>;

/// One live monitor instance: a machine runner with no inbox.
pub(crate) struct MonitorSlot<M: Monitor> {
    runner: MachineRunner<M>,
    /// Declaration error, reported at initialization time (registration
    /// happens before an execution exists to report it in).
    decl_error: Option<String>,
}

impl<M: Monitor> MonitorSlot<M> {
    pub(crate) fn new(machine: M) -> Self {
        let mut decl = MachineDecl::new();
        M::declare(&mut decl);
        let decl_error = decl.validate(M::name()).err();
        let ctx = MachineCtx::new(CtxKind::Monitor, None, format!("monitor '{}'", M::name()));
        Self {
            runner: MachineRunner::new(machine, decl, ctx),
            decl_error,
        }
    }

    fn drain_raised(&mut self, mut flow: Flow) {
        while flow == Flow::Continue {
            match self.runner.take_raised() {
                Some(event) => flow = self.runner.handle(&event),
                None => break,
            }
        }
        if flow == Flow::Halted {
            crate::rt::notify_assertion_failure(format!(
                "monitor '{}' cannot be halted",
                M::name()
            ));
        }
    }
}

impl<M: Monitor> MonitorRt for MonitorSlot<M> {
    fn name(&self) -> &'static str {
        M::name()
    }

    fn observes(&self, tag: EventTag) -> bool {
        self.runner
            .decl
            .states
            .values()
            .any(|state| state.handlers.contains_key(tag))
    }

    fn initialize(&mut self) {
        if let Some(message) = self.decl_error.take() {
            crate::rt::notify_assertion_failure(message);
        }
        let flow = self.runner.start();
        self.drain_raised(flow);
    }

    fn deliver(&mut self, event: &Event) {
        let state = self.runner.current_state();
        log::trace!(
            "monitor '{}' observing '{}' in {} state '{state}'",
            M::name(),
            event.tag(),
            self.runner.decl.classification(state),
        );
        let flow = self.runner.handle(event);
        self.drain_raised(flow);
    }

    fn is_hot(&self) -> bool {
        self.runner.decl.is_hot(self.runner.current_state())
    }
}

/// The per-execution monitor registry.
#[derive(Default)]
pub(crate) struct MonitorSet {
    entries: Vec<Rc<RefCell<dyn MonitorRt>>>,
}

impl MonitorSet {
    pub(crate) fn from_factories(factories: &[MonitorFactory]) -> Self {
        Self {
            entries: factories.iter().map(|f| f()).collect(),
        }
    }

    /// Clones of every monitor handle, for initialization outside the
    /// runtime borrow.
    pub(crate) fn all(&self) -> Vec<Rc<RefCell<dyn MonitorRt>>> {
        self.entries.clone()
    }

    /// Monitors declaring a handler for `tag`.
    pub(crate) fn interested(&self, tag: EventTag) -> Vec<Rc<RefCell<dyn MonitorRt>>> {
        self.entries
            .iter()
            .filter(|m| m.borrow().observes(tag))
            .cloned()
            .collect()
    }

    pub(crate) fn find(&self, name: &str) -> Option<Rc<RefCell<dyn MonitorRt>>> {
        self.entries
            .iter()
            .find(|m| m.borrow().name() == name)
            .cloned()
    }

    pub(crate) fn any_hot(&self) -> bool {
        self.entries.iter().any(|m| m.borrow().is_hot())
    }

    pub(crate) fn hot_names(&self) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|m| m.borrow().is_hot())
            .map(|m| m.borrow().name())
            .collect()
    }
}

/// Deliver an event to one monitor, with the in-monitor flag set so that
/// scheduling points and strategy choices are rejected inside the handler.
pub(crate) fn deliver(monitor: &Rc<RefCell<dyn MonitorRt>>, event: &Event) {
    crate::runtime::execution::ExecutionState::enter_monitor();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        monitor.borrow_mut().deliver(event);
    }));
    crate::runtime::execution::ExecutionState::exit_monitor();
    if let Err(payload) = result {
        std::panic::resume_unwind(payload);
    }
}

/// Initialize a freshly created monitor (entry actions of its initial
/// state), outside any runtime borrow.
pub(crate) fn initialize(monitor: &Rc<RefCell<dyn MonitorRt>>) {
    crate::runtime::execution::ExecutionState::enter_monitor();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        monitor.borrow_mut().initialize();
    }));
    crate::runtime::execution::ExecutionState::exit_monitor();
    if let Err(payload) = result {
        std::panic::resume_unwind(payload);
    }
}
