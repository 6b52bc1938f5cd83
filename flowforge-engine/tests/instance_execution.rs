//! End-to-end execution scenarios for a single instance.

mod common;

use common::{build_chain, build_diamond, test_instance, RecordingListener};
use flowforge_core::block::Block;
use flowforge_core::event::ModifiedObject;
use flowforge_core::line::Line;
use flowforge_core::state::{LineState, RunnableState};
use flowforge_core::testing::{CountingBlock, EchoBlock};

#[test]
fn single_source_chain_runs_to_done() {
    let (blocks, lines) = build_chain(3);
    let mut instance = test_instance(1, vec![("b0", "hello")], blocks, lines);
    let recorder = RecordingListener::shared();
    instance.add_listener(recorder.clone());

    // Tick 1: READY -> RUNNING, plan = [b0], no block ran, no event yet.
    instance.run().unwrap();
    assert_eq!(instance.state(), RunnableState::Running);
    assert_eq!(instance.plan(), &[0]);
    assert_eq!(recorder.event_count(), 0);
    assert_eq!(instance.blocks()[0].input_text(), "hello");
    assert_eq!(instance.blocks()[0].state(), RunnableState::Ready);

    // Tick 2: b0 runs with its parameter and completes; b1 is planned.
    instance.run().unwrap();
    assert_eq!(instance.blocks()[0].state(), RunnableState::Done);
    assert_eq!(instance.blocks()[0].result_text(), "hello");
    assert_eq!(instance.plan(), &[1]);
    assert_eq!(recorder.event_count(), 1);

    // Ticks 3 and 4: b1 then b2, after which the plan drains.
    instance.run().unwrap();
    assert_eq!(instance.plan(), &[2]);
    instance.run().unwrap();
    assert_eq!(instance.state(), RunnableState::Done);
    assert!(instance.plan().is_empty());
}

#[test]
fn diamond_join_planned_at_most_once() {
    let (blocks, lines) = build_diamond();
    let mut instance = test_instance(1, vec![("a", "seed")], blocks, lines);

    instance.run().unwrap(); // plan [a]
    assert_eq!(instance.plan(), &[0]);

    instance.run().unwrap(); // a done; b and c planned
    assert_eq!(instance.plan(), &[1, 2]);

    instance.run().unwrap(); // b and c done; both feed d, planned once
    assert_eq!(instance.plan(), &[3]);

    instance.run().unwrap();
    assert_eq!(instance.state(), RunnableState::Done);
}

#[test]
fn stop_during_run_freezes_instance() {
    let blocks: Vec<Box<dyn Block>> = vec![
        Box::new(CountingBlock::with_count_max("a", "", 10)),
        Box::new(CountingBlock::with_count_max("b", "", 10)),
    ];
    let lines = vec![Line::new(0, 1)];
    let mut instance = test_instance(1, Vec::new(), blocks, lines);

    instance.run().unwrap(); // plan
    instance.run().unwrap(); // a starts counting

    instance.stop();
    assert_eq!(instance.state(), RunnableState::Stopped);
    for block in instance.blocks() {
        assert_eq!(block.state(), RunnableState::Stopped);
    }
    for line in instance.lines() {
        assert_eq!(line.state(), LineState::Off);
    }

    // Further runs are no-ops until revived.
    instance.run().unwrap();
    assert_eq!(instance.state(), RunnableState::Stopped);

    // set_ready revives without resetting; reset also works.
    instance.set_ready().unwrap();
    assert_eq!(instance.state(), RunnableState::Ready);
    instance.run().unwrap();
    assert_eq!(instance.state(), RunnableState::Running);
}

#[test]
fn steady_state_events_are_empty_after_flags_cleared() {
    let blocks: Vec<Box<dyn Block>> = vec![Box::new(CountingBlock::with_count_max("a", "", 10))];
    let mut instance = test_instance(1, Vec::new(), blocks, Vec::new());
    let recorder = RecordingListener::shared();
    instance.add_listener(recorder.clone());

    instance.run().unwrap(); // plan
    instance.run().unwrap(); // a transitions READY -> RUNNING: modified

    // The consumer durably records the first event and clears the flags.
    assert!(!recorder.events()[0].modified_objects.is_empty());
    instance.clear_object_modified_flags();

    // Two further ticks with no transitions: both events are empty.
    instance.run().unwrap();
    instance.run().unwrap();
    let events = recorder.events();
    assert_eq!(events.len(), 3);
    assert!(events[1].modified_objects.is_empty());
    assert!(events[2].modified_objects.is_empty());
}

#[test]
fn change_events_carry_line_activation() {
    let (blocks, lines) = build_chain(2);
    let mut instance = test_instance(1, Vec::new(), blocks, lines);
    let recorder = RecordingListener::shared();
    instance.add_listener(recorder.clone());

    instance.run().unwrap();
    instance.run().unwrap(); // b0 completes, line 0 activates during the tick

    let events = recorder.events();
    let line_snapshot = events[0]
        .modified_objects
        .iter()
        .find_map(|o| match o {
            ModifiedObject::Line { index, state } => Some((*index, *state)),
            _ => None,
        })
        .expect("line must appear in the event");
    assert_eq!(line_snapshot, (0, LineState::On));
}

#[test]
fn done_instance_revived_by_set_ready_reruns_with_parameters() {
    let blocks: Vec<Box<dyn Block>> = vec![Box::new(EchoBlock::new("a", ""))];
    let mut instance = test_instance(1, vec![("a", "again")], blocks, Vec::new());

    instance.run().unwrap();
    instance.run().unwrap();
    assert_eq!(instance.state(), RunnableState::Done);

    instance.set_ready().unwrap();
    assert_eq!(instance.state(), RunnableState::Ready);

    // The next planning tick re-applies parameters on the READY entry path.
    instance.run().unwrap();
    assert_eq!(instance.blocks()[0].input_text(), "again");
    // A set_ready block is Ready again and runs to completion.
    instance.run().unwrap();
    assert_eq!(instance.state(), RunnableState::Done);
}
