//! State-machine declaration tables.
//!
//! A machine type declares its behavior once through a typed builder: a
//! lookup from (state tag, event tag) to a handler, entry/exit actions, a
//! per-state deferred set and optional default handler. Dotted state tags
//! (`"group.state"`) form state groups; handler resolution walks the exact
//! state, then its group prefixes, then the same chain for each lower state
//! of the machine's push stack.

use super::{Event, EventTag, MachineCtx, StateTag};
use indexmap::IndexMap;

pub(crate) type Action<M> = Box<dyn Fn(&mut M, &mut MachineCtx, &Event) + Send>;

/// What a state does with an incoming event.
pub(crate) enum HandlerSpec<M> {
    /// Run a handler function.
    Do(Action<M>),
    /// Transition to the target state (OnExit of the current state first).
    Goto(StateTag),
    /// Push the target state without popping the current one.
    Push(StateTag),
    /// Drop the event.
    Ignore,
    /// Leave the event in the inbox until a state that can handle it.
    Defer,
    /// Terminate the machine.
    Halt,
}

impl<M> HandlerSpec<M> {
    fn kind_name(&self) -> &'static str {
        match self {
            HandlerSpec::Do(_) => "do",
            HandlerSpec::Goto(_) => "goto",
            HandlerSpec::Push(_) => "push",
            HandlerSpec::Ignore => "ignore",
            HandlerSpec::Defer => "defer",
            HandlerSpec::Halt => "halt",
        }
    }
}

impl<M> std::fmt::Debug for HandlerSpec<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind_name())
    }
}

/// Declaration of a single state.
pub struct StateDecl<M> {
    pub(crate) on_entry: Option<Action<M>>,
    pub(crate) on_exit: Option<Action<M>>,
    pub(crate) handlers: IndexMap<EventTag, HandlerSpec<M>>,
    pub(crate) default: Option<Action<M>>,
    pub(crate) hot: bool,
    pub(crate) cold: bool,
}

impl<M> Default for StateDecl<M> {
    fn default() -> Self {
        Self {
            on_entry: None,
            on_exit: None,
            handlers: IndexMap::new(),
            default: None,
            hot: false,
            cold: false,
        }
    }
}

impl<M> StateDecl<M> {
    pub fn on_entry<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut M, &mut MachineCtx, &Event) + Send + 'static,
    {
        self.on_entry = Some(Box::new(f));
        self
    }

    pub fn on_exit<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut M, &mut MachineCtx, &Event) + Send + 'static,
    {
        self.on_exit = Some(Box::new(f));
        self
    }

    /// Handle `tag` with a function.
    pub fn on<F>(&mut self, tag: EventTag, f: F) -> &mut Self
    where
        F: Fn(&mut M, &mut MachineCtx, &Event) + Send + 'static,
    {
        self.handlers.insert(tag, HandlerSpec::Do(Box::new(f)));
        self
    }

    /// Transition to `target` when `tag` arrives.
    pub fn goto_on(&mut self, tag: EventTag, target: StateTag) -> &mut Self {
        self.handlers.insert(tag, HandlerSpec::Goto(target));
        self
    }

    /// Push `target` when `tag` arrives.
    pub fn push_on(&mut self, tag: EventTag, target: StateTag) -> &mut Self {
        self.handlers.insert(tag, HandlerSpec::Push(target));
        self
    }

    pub fn ignore(&mut self, tag: EventTag) -> &mut Self {
        self.handlers.insert(tag, HandlerSpec::Ignore);
        self
    }

    pub fn defer(&mut self, tag: EventTag) -> &mut Self {
        self.handlers.insert(tag, HandlerSpec::Defer);
        self
    }

    pub fn halt_on(&mut self, tag: EventTag) -> &mut Self {
        self.handlers.insert(tag, HandlerSpec::Halt);
        self
    }

    /// Handler for the fabricated default event, consumed when the inbox
    /// has nothing deliverable.
    pub fn on_default<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut M, &mut MachineCtx, &Event) + Send + 'static,
    {
        self.default = Some(Box::new(f));
        self
    }

    /// Mark hot: time spent here raises the liveness temperature.
    pub fn hot(&mut self) -> &mut Self {
        self.hot = true;
        self
    }

    /// Mark cold: a resting state for liveness purposes.
    pub fn cold(&mut self) -> &mut Self {
        self.cold = true;
        self
    }
}

/// Full declaration of a machine (or monitor) type.
pub struct MachineDecl<M> {
    pub(crate) initial: Option<StateTag>,
    pub(crate) states: IndexMap<StateTag, StateDecl<M>>,
}

impl<M> Default for MachineDecl<M> {
    fn default() -> Self {
        Self {
            initial: None,
            states: IndexMap::new(),
        }
    }
}

/// Iterator over a state tag and its group prefixes:
/// `"g1.s1"` yields `"g1.s1"`, then `"g1"`.
fn prefix_chain(tag: StateTag) -> impl Iterator<Item = &'static str> {
    let mut next = Some(tag);
    std::iter::from_fn(move || {
        let cur = next?;
        next = cur.rfind('.').map(|i| &cur[..i]);
        Some(cur)
    })
}

impl<M> MachineDecl<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial state.
    pub fn initial(&mut self, tag: StateTag) -> &mut Self {
        self.initial = Some(tag);
        self.state(tag);
        self
    }

    /// Declare (or reopen) a state.
    pub fn state(&mut self, tag: StateTag) -> &mut StateDecl<M> {
        self.states.entry(tag).or_default()
    }

    pub(crate) fn initial_state(&self) -> Option<StateTag> {
        self.initial
    }

    /// Check the declaration is self-consistent; the caller turns an error
    /// into an assertion failure.
    pub(crate) fn validate(&self, machine_name: &str) -> Result<(), String> {
        let initial = self
            .initial
            .ok_or_else(|| format!("machine '{machine_name}' declares no initial state"))?;
        if !self.states.contains_key(initial) {
            return Err(format!(
                "machine '{machine_name}' has an undeclared initial state '{initial}'"
            ));
        }
        for (state, decl) in &self.states {
            for (tag, handler) in &decl.handlers {
                let target = match handler {
                    HandlerSpec::Goto(t) | HandlerSpec::Push(t) => t,
                    _ => continue,
                };
                if !self.states.contains_key(target) {
                    return Err(format!(
                        "machine '{machine_name}' state '{state}' transitions on '{tag}' \
                         to undeclared state '{target}'"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolve the handler for `tag` with `stack` as the push stack (top
    /// last). Walks each stack entry top-down, trying the exact state and
    /// then its group prefixes.
    pub(crate) fn resolve(&self, stack: &[StateTag], tag: EventTag) -> Option<&HandlerSpec<M>> {
        for state in stack.iter().rev().copied() {
            for scope in prefix_chain(state) {
                if let Some(handler) = self.states.get(scope).and_then(|s| s.handlers.get(tag)) {
                    return Some(handler);
                }
            }
        }
        None
    }

    pub(crate) fn is_deferred(&self, stack: &[StateTag], tag: EventTag) -> bool {
        matches!(self.resolve(stack, tag), Some(HandlerSpec::Defer))
    }

    /// The default handler in effect for the current stack, if any.
    pub(crate) fn resolve_default(&self, stack: &[StateTag]) -> Option<&Action<M>> {
        for state in stack.iter().rev().copied() {
            for scope in prefix_chain(state) {
                if let Some(action) = self.states.get(scope).and_then(|s| s.default.as_ref()) {
                    return Some(action);
                }
            }
        }
        None
    }

    pub(crate) fn is_hot(&self, state: StateTag) -> bool {
        prefix_chain(state)
            .find_map(|scope| self.states.get(scope))
            .map(|s| s.hot)
            .unwrap_or(false)
    }

    /// Liveness classification of a state, for diagnostics: hot, cold, or
    /// warm (neither).
    pub(crate) fn classification(&self, state: StateTag) -> &'static str {
        match prefix_chain(state).find_map(|scope| self.states.get(scope)) {
            Some(decl) if decl.hot => "hot",
            Some(decl) if decl.cold => "cold",
            _ => "warm",
        }
    }
}

impl<M> std::fmt::Debug for MachineDecl<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineDecl")
            .field("initial", &self.initial)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    fn decl() -> MachineDecl<Dummy> {
        let mut d = MachineDecl::new();
        d.initial("idle");
        d.state("idle").goto_on("go", "busy").defer("late");
        d.state("busy").ignore("go");
        d.state("grp").on("shared", |_, _, _| {});
        d.state("grp.inner").goto_on("go", "idle");
        d
    }

    #[test]
    fn exact_state_wins() {
        let d = decl();
        assert!(matches!(
            d.resolve(&["idle"], "go"),
            Some(HandlerSpec::Goto("busy"))
        ));
    }

    #[test]
    fn group_prefix_is_consulted() {
        let d = decl();
        assert!(matches!(
            d.resolve(&["grp.inner"], "shared"),
            Some(HandlerSpec::Do(_))
        ));
        // The inner state's own handler shadows nothing here but still wins
        // for its own tag.
        assert!(matches!(
            d.resolve(&["grp.inner"], "go"),
            Some(HandlerSpec::Goto("idle"))
        ));
    }

    #[test]
    fn push_stack_falls_through_to_lower_states() {
        let d = decl();
        // "busy" ignores "go"; the lower "idle" state is shadowed.
        assert!(matches!(
            d.resolve(&["idle", "busy"], "go"),
            Some(HandlerSpec::Ignore)
        ));
        // An event only the lower state knows is still handled.
        assert!(d.is_deferred(&["idle", "busy"], "late"));
    }

    #[test]
    fn unknown_event_resolves_to_none() {
        let d = decl();
        assert!(d.resolve(&["idle"], "nope").is_none());
    }

    #[test]
    fn validate_rejects_dangling_transition() {
        let mut d: MachineDecl<Dummy> = MachineDecl::new();
        d.initial("a");
        d.state("a").goto_on("go", "missing");
        let err = d.validate("m").unwrap_err();
        assert!(err.contains("undeclared state 'missing'"));
    }

    #[test]
    fn validate_requires_initial_state() {
        let d: MachineDecl<Dummy> = MachineDecl::new();
        assert!(d.validate("m").unwrap_err().contains("no initial state"));
    }
}
