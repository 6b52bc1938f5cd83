//! Common test utilities for integration tests.

#![allow(dead_code)]

use flowforge_core::block::Block;
use flowforge_core::event::{ChangeEvent, EventListener};
use flowforge_core::line::Line;
use flowforge_core::params::{InstanceParameter, InstanceParameters};
use flowforge_core::testing::EchoBlock;
use flowforge_core::types::{InstanceId, TemplateId, UserId};
use flowforge_engine::instance::Instance;
use parking_lot::Mutex;
use std::sync::Arc;

/// Default owner used by test instances.
pub const TEST_USER: u64 = 200;

/// Build a linear chain of echo blocks: `b0 -> b1 -> ... -> bN-1`.
pub fn build_chain(block_count: usize) -> (Vec<Box<dyn Block>>, Vec<Line>) {
    let blocks: Vec<Box<dyn Block>> = (0..block_count)
        .map(|i| Box::new(EchoBlock::new(format!("b{i}"), "")) as Box<dyn Block>)
        .collect();
    let lines = (1..block_count).map(|i| Line::new(i - 1, i)).collect();
    (blocks, lines)
}

/// Build a diamond: `a -> [b, c] -> d`.
pub fn build_diamond() -> (Vec<Box<dyn Block>>, Vec<Line>) {
    let blocks: Vec<Box<dyn Block>> = ["a", "b", "c", "d"]
        .iter()
        .map(|id| Box::new(EchoBlock::new(*id, "")) as Box<dyn Block>)
        .collect();
    let lines = vec![
        Line::new(0, 1),
        Line::new(0, 2),
        Line::new(1, 3),
        Line::new(2, 3),
    ];
    (blocks, lines)
}

/// Construct a test instance around the given graph.
pub fn test_instance(
    id: u64,
    parameters: Vec<(&str, &str)>,
    blocks: Vec<Box<dyn Block>>,
    lines: Vec<Line>,
) -> Instance {
    let parameters = InstanceParameters::new(
        parameters
            .into_iter()
            .map(|(block, value)| InstanceParameter::new(block, value).unwrap())
            .collect(),
    );

    Instance::new(
        InstanceId::new(id),
        TemplateId::new(1),
        UserId::new(TEST_USER),
        format!("test-instance-{id}"),
        parameters,
        blocks,
        lines,
    )
    .unwrap()
}

/// A listener that records every event it receives.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingListener {
    /// Create a shared recorder.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of the recorded events.
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events.
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &ChangeEvent) {
        self.events.lock().push(event.clone());
    }
}
