//! The actor / state-machine layer.
//!
//! Each actor owns a FIFO inbox, a hierarchical state stack, and a handler
//! table declared once per machine type (see [`decl`]). The runtime owns an
//! arena of actor records addressed by [`ActorId`]; actor code and other
//! operations reach a counterpart only through its id. An actor's
//! event-processing loop runs as an ordinary operation, so dequeuing and
//! sending are scheduling points like any other.

mod decl;

pub use decl::{MachineDecl, StateDecl};
pub use interlace_macros::Tagged;

use crate::error::Interrupt;
use crate::runtime::execution::ExecutionState;
use crate::runtime::operation::{OperationId, OperationStatus};
use crate::runtime::SchedulePoint;
use dyn_clone::DynClone;
use dyn_eq::DynEq;
use dyn_hash::DynHash;
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};

pub type StateTag = &'static str;
pub type EventTag = &'static str;

/// Tag of the halt event: terminates the receiving actor.
pub const HALT_EVENT: EventTag = "halt";
/// Tag of the fabricated default event.
pub const DEFAULT_EVENT: EventTag = "default";
/// Tag of the synthetic event passed to the initial state's entry action.
pub const INIT_EVENT: EventTag = "init";

/// Payload carried by an event. Blanket-implemented for any clonable,
/// comparable, hashable value.
pub trait Payload: DynClone + DynEq + DynHash + fmt::Debug + Send {
    fn as_any(&self) -> &dyn Any;
}

impl<T> Payload for T
where
    T: Clone + Eq + Hash + fmt::Debug + Send + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

dyn_clone::clone_trait_object!(Payload);
dyn_eq::eq_trait_object!(Payload);
dyn_hash::hash_trait_object!(Payload);

/// Types with a derived event tag; see `#[derive(Tagged)]`.
pub trait Tagged {
    const TAG: EventTag;
}

/// An immutable typed value delivered to an actor or monitor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Event {
    tag: EventTag,
    payload: Option<Box<dyn Payload>>,
}

impl Event {
    /// A bare event with no payload.
    pub fn named(tag: EventTag) -> Self {
        Self { tag, payload: None }
    }

    /// An event carrying a payload value.
    pub fn with(tag: EventTag, payload: impl Payload + 'static) -> Self {
        Self {
            tag,
            payload: Some(Box::new(payload)),
        }
    }

    /// An event whose tag comes from the payload type's `Tagged` impl.
    pub fn tagged<P: Tagged + Payload + 'static>(payload: P) -> Self {
        Self::with(P::TAG, payload)
    }

    /// The halt event.
    pub fn halt() -> Self {
        Self::named(HALT_EVENT)
    }

    pub fn tag(&self) -> EventTag {
        self.tag
    }

    /// Downcast the payload.
    pub fn payload<T: 'static>(&self) -> Option<&T> {
        Payload::as_any(self.payload.as_ref()?).downcast_ref()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Some(p) => write!(f, "{}({p:?})", self.tag),
            None => f.write_str(self.tag),
        }
    }
}

/// Identity of an actor in the runtime's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActorId(pub(crate) usize);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A state machine driven by events from its inbox.
pub trait Machine: Send + 'static {
    /// Declare states and handlers. Called once when the actor is spawned.
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

/// Scheduler-visible state of one actor. The machine value itself and its
/// handler tables live inside the actor's operation; only what senders and
/// the scheduler need to see is in the arena.
pub(crate) struct ActorSlot {
    pub(crate) inbox: VecDeque<Event>,
    pub(crate) op: Option<OperationId>,
    pub(crate) halted: bool,
}

#[derive(Default)]
pub(crate) struct ActorArena {
    slots: Vec<ActorSlot>,
}

impl ActorArena {
    pub(crate) fn allocate(&mut self) -> ActorId {
        let id = ActorId(self.slots.len());
        self.slots.push(ActorSlot {
            inbox: VecDeque::new(),
            op: None,
            halted: false,
        });
        id
    }

    pub(crate) fn get_mut(&mut self, id: ActorId) -> &mut ActorSlot {
        &mut self.slots[id.0]
    }

    pub(crate) fn try_get_mut(&mut self, id: ActorId) -> Option<&mut ActorSlot> {
        self.slots.get_mut(id.0)
    }

    /// Remove and return the first inbox event not deferred by the current
    /// state, preserving the order of the rest.
    pub(crate) fn dequeue(
        &mut self,
        id: ActorId,
        is_deferred: &dyn Fn(EventTag) -> bool,
    ) -> Option<Event> {
        let slot = self.get_mut(id);
        let index = slot.inbox.iter().position(|ev| !is_deferred(ev.tag()))?;
        slot.inbox.remove(index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CtxKind {
    Machine,
    Monitor,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Transition {
    Goto(StateTag),
    Push(StateTag),
    Pop,
    Halt,
}

impl Transition {
    fn verb(&self) -> &'static str {
        match self {
            Transition::Goto(_) => "GotoState",
            Transition::Push(_) => "PushState",
            Transition::Pop => "PopState",
            Transition::Halt => "Halt",
        }
    }
}

/// Handle given to every handler invocation; accumulates at most one
/// transition request plus at most one raised event, applied after the
/// handler returns.
pub struct MachineCtx {
    kind: CtxKind,
    actor: Option<ActorId>,
    display: String,
    pub(crate) raised: Option<Event>,
    pub(crate) transition: Option<Transition>,
    pub(crate) in_exit: bool,
}

impl MachineCtx {
    pub(crate) fn new(kind: CtxKind, actor: Option<ActorId>, display: String) -> Self {
        Self {
            kind,
            actor,
            display,
            raised: None,
            transition: None,
            in_exit: false,
        }
    }

    /// The id of this actor. Monitors have no id.
    pub fn id(&self) -> ActorId {
        self.actor.expect("monitors have no actor id")
    }

    /// Raise an event, to be consumed before the inbox. Disallowed from an
    /// OnExit action.
    pub fn raise(&mut self, event: Event) {
        if self.in_exit {
            crate::rt::notify_assertion_failure(format!(
                "{} performed a 'RaiseEvent' transition from an OnExit action.",
                self.display
            ));
        }
        if self.raised.is_some() || self.transition.is_some() {
            self.double_transition("RaiseEvent");
        }
        self.raised = Some(event);
    }

    /// Transition to `target`: OnExit of the current state runs before
    /// OnEntry of the target.
    pub fn goto(&mut self, target: StateTag) {
        self.request(Transition::Goto(target));
    }

    /// Push `target` without popping the current state.
    pub fn push(&mut self, target: StateTag) {
        self.request(Transition::Push(target));
    }

    /// Pop the current state, returning to the one below it.
    pub fn pop(&mut self) {
        self.request(Transition::Pop);
    }

    /// Terminate this actor.
    pub fn halt(&mut self) {
        if self.kind == CtxKind::Monitor {
            crate::rt::notify_assertion_failure(format!("{} attempted to halt", self.display));
        }
        self.request(Transition::Halt);
    }

    fn request(&mut self, transition: Transition) {
        if self.in_exit {
            crate::rt::notify_assertion_failure(format!(
                "{} performed a '{}' transition from an OnExit action.",
                self.display,
                transition.verb()
            ));
        }
        if self.raised.is_some() || self.transition.is_some() {
            self.double_transition(transition.verb());
        }
        self.transition = Some(transition);
    }

    fn double_transition(&self, verb: &str) {
        crate::rt::notify_assertion_failure(format!(
            "{} performed more than one transition in a single action (latest: '{verb}')",
            self.display
        ));
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum Flow {
    Continue,
    Halted,
}

/// Interprets one machine instance: dispatches events through the handler
/// table and applies the resulting transitions. Shared between actors and
/// monitors; only the event source differs.
pub(crate) struct MachineRunner<M> {
    pub(crate) machine: M,
    pub(crate) decl: MachineDecl<M>,
    stack: Vec<StateTag>,
    pub(crate) ctx: MachineCtx,
}

impl<M: Send + 'static> MachineRunner<M> {
    pub(crate) fn new(machine: M, decl: MachineDecl<M>, ctx: MachineCtx) -> Self {
        Self {
            machine,
            decl,
            stack: Vec::new(),
            ctx,
        }
    }

    pub(crate) fn current_state(&self) -> StateTag {
        self.stack.last().copied().unwrap_or("<none>")
    }

    pub(crate) fn stack(&self) -> &[StateTag] {
        &self.stack
    }

    pub(crate) fn take_raised(&mut self) -> Option<Event> {
        self.ctx.raised.take()
    }

    pub(crate) fn has_default(&self) -> bool {
        self.decl.resolve_default(&self.stack).is_some()
    }

    /// Enter the initial state and apply any transitions its entry action
    /// requests.
    pub(crate) fn start(&mut self) -> Flow {
        let initial = self
            .decl
            .initial_state()
            .expect("declaration was validated");
        let init = Event::named(INIT_EVENT);
        self.enter(initial, &init);
        self.apply_transitions(&init)
    }

    /// Dispatch one event: resolve its handler, run it, then apply the
    /// requested transition chain. Raised events are left pending for the
    /// caller, which decides when they are consumed.
    pub(crate) fn handle(&mut self, event: &Event) -> Flow {
        if event.tag() == HALT_EVENT {
            return Flow::Halted;
        }
        enum Step {
            Ran,
            Goto(StateTag),
            Push(StateTag),
            Halted,
        }
        let state = self.stack.last().copied().unwrap_or("<none>");
        let step = match self.decl.resolve(&self.stack, event.tag()) {
            Some(decl::HandlerSpec::Do(action)) => {
                invoke(state, "handler", action, &mut self.machine, &mut self.ctx, event);
                Step::Ran
            }
            Some(decl::HandlerSpec::Goto(target)) => Step::Goto(*target),
            Some(decl::HandlerSpec::Push(target)) => Step::Push(*target),
            Some(decl::HandlerSpec::Ignore) => return Flow::Continue,
            Some(decl::HandlerSpec::Halt) => Step::Halted,
            Some(decl::HandlerSpec::Defer) => {
                // Deferral is honored by the inbox scan; a raised or default
                // event that resolves to Defer has nowhere to wait.
                crate::rt::notify_assertion_failure(format!(
                    "{} deferred event '{}' outside of its inbox in state '{}'",
                    self.ctx.display,
                    event.tag(),
                    self.current_state()
                ));
                return Flow::Continue;
            }
            None => {
                crate::rt::notify_assertion_failure(format!(
                    "{} received event '{}' that cannot be handled in state '{}'",
                    self.ctx.display,
                    event.tag(),
                    self.current_state()
                ));
                return Flow::Continue;
            }
        };
        match step {
            Step::Ran => (),
            Step::Goto(target) => self.ctx.transition = Some(Transition::Goto(target)),
            Step::Push(target) => self.ctx.transition = Some(Transition::Push(target)),
            Step::Halted => return Flow::Halted,
        }
        self.apply_transitions(event)
    }

    /// Apply pending transitions until the machine settles. Entry actions
    /// may request further transitions, so this loops.
    fn apply_transitions(&mut self, trigger: &Event) -> Flow {
        while let Some(transition) = self.ctx.transition.take() {
            match transition {
                Transition::Goto(target) => {
                    self.exit_top(trigger);
                    self.stack.pop();
                    self.enter(target, trigger);
                }
                Transition::Push(target) => {
                    self.enter(target, trigger);
                }
                Transition::Pop => {
                    self.exit_top(trigger);
                    self.stack.pop();
                    if self.stack.is_empty() {
                        crate::rt::notify_assertion_failure(format!(
                            "{} popped its last state",
                            self.ctx.display
                        ));
                    }
                }
                Transition::Halt => return Flow::Halted,
            }
        }
        Flow::Continue
    }

    fn enter(&mut self, target: StateTag, trigger: &Event) {
        self.stack.push(target);
        if let Some(action) = self.decl.states.get(target).and_then(|s| s.on_entry.as_ref()) {
            invoke(target, "OnEntry", action, &mut self.machine, &mut self.ctx, trigger);
        }
    }

    fn exit_top(&mut self, trigger: &Event) {
        let Some(top) = self.stack.last().copied() else {
            return;
        };
        if let Some(action) = self.decl.states.get(top).and_then(|s| s.on_exit.as_ref()) {
            self.ctx.in_exit = true;
            invoke(top, "OnExit", action, &mut self.machine, &mut self.ctx, trigger);
            self.ctx.in_exit = false;
        }
    }

    /// Run the default handler currently in effect.
    pub(crate) fn handle_default(&mut self) -> Flow {
        let event = Event::named(DEFAULT_EVENT);
        let state = self.stack.last().copied().unwrap_or("<none>");
        if let Some(action) = self.decl.resolve_default(&self.stack) {
            invoke(state, "default handler", action, &mut self.machine, &mut self.ctx, &event);
        }
        self.apply_transitions(&event)
    }
}

/// Run a handler, converting an escaped panic into an UnhandledException
/// bug. The internal `Interrupt` payload passes through untouched.
fn invoke<M>(
    state: StateTag,
    phase: &str,
    action: &decl::Action<M>,
    machine: &mut M,
    ctx: &mut MachineCtx,
    event: &Event,
) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| action(machine, ctx, event)));
    if let Err(payload) = result {
        if payload.downcast_ref::<Interrupt>().is_some() {
            panic::resume_unwind(payload);
        }
        let message = crate::runtime::failure::panic_message(&payload);
        crate::rt::notify_unhandled_exception(format!(
            "unhandled panic in {} {phase} of state '{state}' while handling '{}': {message}",
            ctx.display,
            event.tag()
        ));
    }
}

/// Spawn an actor with an empty inbox.
pub fn spawn<M: Machine>(machine: M) -> ActorId {
    spawn_internal(machine, None)
}

/// Spawn an actor with `init` already enqueued.
pub fn spawn_with<M: Machine>(machine: M, init: Event) -> ActorId {
    spawn_internal(machine, Some(init))
}

fn spawn_internal<M: Machine>(machine: M, init: Option<Event>) -> ActorId {
    let mut decl = MachineDecl::new();
    M::declare(&mut decl);
    if let Err(message) = decl.validate(M::name()) {
        crate::rt::notify_assertion_failure(message);
    }

    let id = ExecutionState::with(|state| {
        let id = state.actors.allocate();
        if let Some(event) = init {
            state.actors.get_mut(id).inbox.push_back(event);
        }
        id
    });

    let name = format!("{}({id})", M::name());
    let op = crate::runtime::register_operation(Some(name), move || machine_loop(machine, decl, id));
    ExecutionState::with(|state| state.actors.get_mut(id).op = Some(op));
    crate::runtime::schedule_point_or_interrupt(SchedulePoint::Create);
    id
}

/// Enqueue `event` for `target`. Unblocks a receive-blocked target, notifies
/// observing monitors on this stack, then hits a Send scheduling point.
/// Events sent to a halted actor are dropped.
pub fn send(target: ActorId, event: Event) {
    let enqueue = ExecutionState::with(|state| {
        let to_wake = match state.actors.try_get_mut(target) {
            None => return Err(format!("sent event '{}' to unknown actor {target}", event.tag())),
            Some(slot) if slot.halted => {
                log::debug!(
                    "dropping event '{}' sent to halted actor {target}",
                    event.tag()
                );
                None
            }
            Some(slot) => {
                slot.inbox.push_back(event.clone());
                slot.op
            }
        };
        if let Some(op) = to_wake {
            let op = state.get_mut(op);
            if op.status == OperationStatus::BlockedOnReceive {
                op.enable();
            }
        }
        Ok(state.runtime.borrow().monitors.interested(event.tag()))
    });

    match enqueue {
        Err(message) => crate::rt::notify_assertion_failure(message),
        Ok(observers) => {
            for monitor in observers {
                crate::monitor::deliver(&monitor, &event);
            }
            crate::runtime::schedule_point_or_interrupt(SchedulePoint::Send);
        }
    }
}

/// The actor's main loop, running as its own operation.
fn machine_loop<M: Machine>(machine: M, decl: MachineDecl<M>, id: ActorId) {
    let display = format!("machine '{}' ({id})", M::name());
    let ctx = MachineCtx::new(CtxKind::Machine, Some(id), display.clone());
    let mut runner = MachineRunner::new(machine, decl, ctx);

    let mut flow = runner.start();
    while flow == Flow::Continue {
        flow = match next_event(&mut runner, id) {
            Dequeued::Raised(event) | Dequeued::Inbox(event) => runner.handle(&event),
            Dequeued::Default => runner.handle_default(),
        };
    }

    log::trace!("{display} halted");
    ExecutionState::with(|state| {
        let slot = state.actors.get_mut(id);
        slot.halted = true;
        if !slot.inbox.is_empty() {
            log::debug!(
                "{display} halted with {} undelivered events",
                slot.inbox.len()
            );
            slot.inbox.clear();
        }
    });
}

enum Dequeued {
    Raised(Event),
    Inbox(Event),
    Default,
}

/// The dequeue algorithm: raised event first, then the first non-deferred
/// inbox event, then a fabricated default event; otherwise block on receive
/// and retry once woken.
fn next_event<M: Send + 'static>(runner: &mut MachineRunner<M>, id: ActorId) -> Dequeued {
    loop {
        if let Some(event) = runner.take_raised() {
            return Dequeued::Raised(event);
        }

        let decl = &runner.decl;
        let stack = runner.stack();
        let dequeued =
            ExecutionState::with(|state| state.actors.dequeue(id, &|tag| decl.is_deferred(stack, tag)));
        if let Some(event) = dequeued {
            crate::rt::on_receive_exit(id);
            return Dequeued::Inbox(event);
        }

        if runner.has_default() {
            return Dequeued::Default;
        }

        crate::rt::on_receive_enter(id);
    }
}
