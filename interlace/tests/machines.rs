//! State-machine and monitor semantics: goto chains, state groups, raised
//! events, deferral, default handlers, and handler failure modes.

mod common;

use interlace::actor::{self, Event, Machine, MachineCtx, MachineDecl, Tagged};
use interlace::{verify, BugKind, Config, Monitor};
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn one_shot(config: interlace::ConfigBuilder) -> Config {
    config.with_iterations(1).with_random_seed(0).build()
}

// A monitor whose initial state's entry raises a unit event that moves it to
// a second state, whose entry stores a sentinel.
struct GotoChain {
    sentinel: Arc<AtomicUsize>,
}

impl Monitor for GotoChain {
    fn declare(decl: &mut MachineDecl<Self>) {
        decl.initial("s1");
        decl.state("s1")
            .on_entry(|_, cx: &mut MachineCtx, _| cx.raise(Event::named("unit")))
            .goto_on("unit", "s2");
        decl.state("s2")
            .on_entry(|m: &mut Self, _, _| m.sentinel.store(101, Ordering::SeqCst));
    }

    fn name() -> &'static str {
        "goto_chain"
    }
}

#[test]
#[serial]
fn monitor_goto_chain_runs_to_completion() {
    common::init_logging();
    let sentinel = Arc::new(AtomicUsize::new(0));
    let captured = Arc::clone(&sentinel);
    let report = verify(
        one_shot(Config::builder().with_monitor_fn(move || GotoChain {
            sentinel: Arc::clone(&captured),
        })),
        || {},
    );

    assert!(!report.found_bug());
    assert_eq!(sentinel.load(Ordering::SeqCst), 101);
}

// Raising from an OnExit action is a specific assertion failure.
struct ExitRaiser;

impl Machine for ExitRaiser {
    fn declare(decl: &mut MachineDecl<Self>) {
        decl.initial("a");
        decl.state("a")
            .on_exit(|_, cx: &mut MachineCtx, _| cx.raise(Event::named("oops")))
            .goto_on("go", "b");
        decl.state("b");
    }

    fn name() -> &'static str {
        "exit_raiser"
    }
}

#[test]
#[serial]
fn raise_from_on_exit_is_a_bug() {
    common::init_logging();
    let report = verify(one_shot(Config::builder()), || {
        let id = actor::spawn(ExitRaiser);
        actor::send(id, Event::named("go"));
    });

    assert!(report.found_bug());
    let bug = report.first_bug().unwrap();
    assert_eq!(bug.failure.kind, BugKind::AssertionFailure);
    assert!(bug
        .failure
        .message
        .contains("performed a 'RaiseEvent' transition from an OnExit action."));
}

// Nested state groups: the transition handler lives on the group, and the
// destination's entry asserts.
struct Grouped;

impl Machine for Grouped {
    fn declare(decl: &mut MachineDecl<Self>) {
        decl.initial("g1.s1");
        decl.state("g1.s1")
            .on_entry(|_, cx: &mut MachineCtx, _| cx.raise(Event::named("unit")));
        decl.state("g1").goto_on("unit", "g2.s2");
        decl.state("g1.s2");
        decl.state("g2.s1");
        decl.state("g2.s2")
            .on_entry(|_, _, _| interlace::assert!(false, "entered G2.S2"));
        decl.state("g2");
    }

    fn name() -> &'static str {
        "grouped"
    }
}

#[test]
#[serial]
fn group_level_transition_reaches_failing_state_every_iteration() {
    common::init_logging();
    let report = verify(
        Config::builder()
            .with_iterations(3)
            .with_random_seed(5)
            .with_keep_going_after_error(true)
            .build(),
        || {
            actor::spawn(Grouped);
        },
    );

    assert_eq!(report.bugs.len(), 3);
    for bug in &report.bugs {
        assert_eq!(bug.failure.kind, BugKind::AssertionFailure);
        assert!(bug.failure.message.contains("entered G2.S2"));
    }
}

// Deferred events wait in the inbox until a state that can take them.
struct Deferring {
    seen: Arc<Mutex<Vec<&'static str>>>,
}

impl Machine for Deferring {
    fn declare(decl: &mut MachineDecl<Self>) {
        decl.initial("busy");
        decl.state("busy").defer("job").goto_on("flush", "ready");
        decl.state("ready").on("job", |m: &mut Self, _, _| {
            m.seen.lock().unwrap().push("job");
        });
    }

    fn name() -> &'static str {
        "deferring"
    }
}

#[test]
#[serial]
fn deferred_event_is_delivered_after_the_state_change() {
    common::init_logging();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&seen);
    let report = verify(
        Config::builder().with_iterations(10).with_random_seed(3).build(),
        move || {
            let id = actor::spawn(Deferring {
                seen: Arc::clone(&captured),
            });
            actor::send(id, Event::named("job"));
            actor::send(id, Event::named("flush"));
            actor::send(id, Event::halt());
        },
    );

    assert!(!report.found_bug());
    // The deferred job is handled exactly once per iteration, always after
    // the flush that unlocked it.
    assert_eq!(seen.lock().unwrap().len(), 10);
}

// The default handler runs only when nothing is deliverable, and halting
// from it terminates the actor cleanly.
struct Defaulting {
    ticks: Arc<AtomicUsize>,
}

impl Machine for Defaulting {
    fn declare(decl: &mut MachineDecl<Self>) {
        decl.initial("spin");
        decl.state("spin").on_default(|m: &mut Self, cx, _| {
            if m.ticks.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                cx.halt();
            }
        });
    }

    fn name() -> &'static str {
        "defaulting"
    }
}

#[test]
#[serial]
fn default_handler_fabricates_events_until_halt() {
    common::init_logging();
    let ticks = Arc::new(AtomicUsize::new(0));
    let captured = Arc::clone(&ticks);
    let report = verify(
        one_shot(Config::builder()),
        move || {
            actor::spawn(Defaulting {
                ticks: Arc::clone(&captured),
            });
        },
    );

    assert!(!report.found_bug());
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
}

// Raised events are consumed before anything already in the inbox.
struct RaisePriority {
    order: Arc<Mutex<Vec<&'static str>>>,
}

impl RaisePriority {
    fn record(&self, what: &'static str) {
        self.order.lock().unwrap().push(what);
    }
}

impl Machine for RaisePriority {
    fn declare(decl: &mut MachineDecl<Self>) {
        decl.initial("s");
        decl.state("s")
            .on("kick", |m: &mut Self, cx: &mut MachineCtx, _| {
                m.record("kick");
                cx.raise(Event::named("raised"));
            })
            .on("raised", |m: &mut Self, _, _| m.record("raised"))
            .on("queued", |m: &mut Self, _, _| m.record("queued"));
    }

    fn name() -> &'static str {
        "raise_priority"
    }
}

#[test]
#[serial]
fn raised_events_preempt_the_inbox() {
    common::init_logging();
    let order = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&order);
    let report = verify(
        Config::builder().with_iterations(20).with_random_seed(9).build(),
        move || {
            let id = actor::spawn(RaisePriority {
                order: Arc::clone(&captured),
            });
            actor::send(id, Event::named("kick"));
            actor::send(id, Event::named("queued"));
            actor::send(id, Event::halt());
        },
    );

    assert!(!report.found_bug());
    let order = order.lock().unwrap();
    // In every iteration the raised event lands between kick and queued.
    for window in order.chunks(3) {
        assert_eq!(window, ["kick", "raised", "queued"]);
    }
}

// A panic escaping a handler is an UnhandledException bug.
struct Panicker;

impl Machine for Panicker {
    fn declare(decl: &mut MachineDecl<Self>) {
        decl.initial("s");
        decl.state("s").on("boom", |_, _, _| panic!("handler exploded"));
    }

    fn name() -> &'static str {
        "panicker"
    }
}

#[test]
#[serial]
fn handler_panic_is_reported_as_unhandled_exception() {
    common::init_logging();
    let report = verify(one_shot(Config::builder()), || {
        let id = actor::spawn(Panicker);
        actor::send(id, Event::named("boom"));
    });

    assert!(report.found_bug());
    let bug = report.first_bug().unwrap();
    assert_eq!(bug.failure.kind, BugKind::UnhandledException);
    assert!(bug.failure.message.contains("handler exploded"));
    assert!(bug.failure.message.contains("panicker"));
}

// An event no state in the stack can handle is a bug.
struct Mute;

impl Machine for Mute {
    fn declare(decl: &mut MachineDecl<Self>) {
        decl.initial("s");
    }

    fn name() -> &'static str {
        "mute"
    }
}

#[test]
#[serial]
fn unhandled_event_is_a_bug() {
    common::init_logging();
    let report = verify(one_shot(Config::builder()), || {
        let id = actor::spawn(Mute);
        actor::send(id, Event::named("mystery"));
    });

    assert!(report.found_bug());
    let bug = report.first_bug().unwrap();
    assert_eq!(bug.failure.kind, BugKind::AssertionFailure);
    assert!(bug.failure.message.contains("cannot be handled"));
    assert!(bug.failure.message.contains("mystery"));
}

// Monitors auto-observe sent events they declare handlers for, and payloads
// survive the trip.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Tagged)]
struct JobDone {
    worker: usize,
}

struct Counter {
    done: Arc<AtomicUsize>,
}

impl Monitor for Counter {
    fn declare(decl: &mut MachineDecl<Self>) {
        decl.initial("watching");
        decl.state("watching").on(JobDone::TAG, |m: &mut Self, _, event: &Event| {
            let payload: &JobDone = event.payload().expect("payload type");
            interlace::assert!(payload.worker < 2, "unknown worker {}", payload.worker);
            m.done.fetch_add(1, Ordering::SeqCst);
        });
    }

    fn name() -> &'static str {
        "counter"
    }
}

struct Sink;

impl Machine for Sink {
    fn declare(decl: &mut MachineDecl<Self>) {
        decl.initial("s");
        decl.state("s").ignore(JobDone::TAG);
    }

    fn name() -> &'static str {
        "sink"
    }
}

#[test]
#[serial]
fn monitors_observe_sent_events_synchronously() {
    common::init_logging();
    let done = Arc::new(AtomicUsize::new(0));
    let captured = Arc::clone(&done);
    let report = verify(
        one_shot(Config::builder().with_monitor_fn(move || Counter {
            done: Arc::clone(&captured),
        })),
        || {
            let sink = actor::spawn(Sink);
            actor::send(sink, Event::tagged(JobDone { worker: 0 }));
            actor::send(sink, Event::tagged(JobDone { worker: 1 }));
            actor::send(sink, Event::halt());
        },
    );

    assert!(!report.found_bug());
    assert_eq!(done.load(Ordering::SeqCst), 2);
}
