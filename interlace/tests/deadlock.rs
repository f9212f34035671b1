//! Deadlock detection: an empty enabled set with unfinished operations is
//! reported promptly, as its own bug kind.

mod common;

use interlace::actor::{self, Event, Machine, MachineDecl};
use interlace::{verify, BugKind, Config};
use serial_test::serial;

// Each side waits for a message the other never sends.
struct WaitsForPeer;

impl Machine for WaitsForPeer {
    fn declare(decl: &mut MachineDecl<Self>) {
        decl.initial("waiting");
        decl.state("waiting").ignore("nudge");
    }

    fn name() -> &'static str {
        "waits_for_peer"
    }
}

#[test]
#[serial]
fn mutual_receive_wait_is_a_deadlock() {
    common::init_logging();
    let report = verify(
        Config::builder().with_iterations(1).with_random_seed(0).build(),
        || {
            actor::spawn(WaitsForPeer);
            actor::spawn(WaitsForPeer);
        },
    );

    assert!(report.found_bug());
    let bug = report.first_bug().unwrap();
    assert_eq!(bug.failure.kind, BugKind::Deadlock);
    assert!(bug.failure.message.contains("deadlock"));
    assert!(bug.failure.message.contains("waits_for_peer"));
    // Detection within N+2 steps for N operations (main plus two actors).
    assert!(
        bug.failure.step <= 5,
        "deadlock took {} steps to detect",
        bug.failure.step
    );
}

#[test]
#[serial]
fn deadlock_report_names_every_blocked_operation() {
    common::init_logging();
    let report = verify(
        Config::builder().with_iterations(1).with_random_seed(1).build(),
        || {
            let a = actor::spawn(WaitsForPeer);
            actor::spawn(WaitsForPeer);
            // One of them gets an event it ignores, then both block again.
            actor::send(a, Event::named("nudge"));
        },
    );

    let bug = report.first_bug().expect("still a deadlock");
    assert_eq!(bug.failure.kind, BugKind::Deadlock);
    let mentions = bug.failure.message.matches("waits_for_peer").count();
    assert_eq!(mentions, 2, "both blocked actors are named: {}", bug.failure.message);
}

#[test]
#[serial]
fn halted_actors_do_not_deadlock() {
    common::init_logging();
    let report = verify(
        Config::builder().with_iterations(5).with_random_seed(2).build(),
        || {
            let a = actor::spawn(WaitsForPeer);
            actor::send(a, Event::halt());
        },
    );
    assert!(!report.found_bug());
}
