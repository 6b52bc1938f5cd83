//! Test-support block implementations.
//!
//! Small deterministic blocks used by the engine's unit and integration
//! tests. They are part of the public API so downstream crates can exercise
//! scheduling behavior without pulling in real plugins.

use crate::block::{Block, BlockCore};
use crate::error::{FlowForgeError, Result};
use crate::state::RunnableState;

/// A block that completes after a fixed number of running ticks.
///
/// Mirrors the classic slow worker: each tick increments a counter, and once
/// the counter exceeds the limit the block writes a result and goes `Done`.
#[derive(Debug)]
pub struct CountingBlock {
    core: BlockCore,
    count_max: u32,
    counter: u32,
}

impl CountingBlock {
    /// Default number of ticks before completion.
    pub const DEFAULT_COUNT_MAX: u32 = 5;

    /// Create a counting block with the default tick limit.
    pub fn new(internal_block_id: impl Into<String>, default_input_text: impl Into<String>) -> Self {
        Self::with_count_max(internal_block_id, default_input_text, Self::DEFAULT_COUNT_MAX)
    }

    /// Create a counting block completing after `count_max` ticks.
    pub fn with_count_max(
        internal_block_id: impl Into<String>,
        default_input_text: impl Into<String>,
        count_max: u32,
    ) -> Self {
        Self {
            core: BlockCore::new("test.counting", internal_block_id, default_input_text),
            count_max,
            counter: 0,
        }
    }

    /// Ticks spent running so far.
    #[must_use]
    pub fn counter(&self) -> u32 {
        self.counter
    }
}

impl Block for CountingBlock {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn run(&mut self) -> Result<()> {
        if self.core.state() == RunnableState::Ready {
            self.counter = 0;
        }
        self.core.begin_run();

        if self.core.state() == RunnableState::Running {
            self.counter += 1;
            if self.counter > self.count_max {
                let result = format!(
                    "Result text of the {}: {}",
                    self.core.internal_block_id(),
                    self.counter
                );
                self.core.set_result_text(result);
                self.core.set_state(RunnableState::Done);
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.counter = 0;
        self.core.reset();
    }
}

/// A block that copies its input to its result and completes in one tick.
#[derive(Debug)]
pub struct EchoBlock {
    core: BlockCore,
}

impl EchoBlock {
    /// Create an echo block.
    pub fn new(internal_block_id: impl Into<String>, default_input_text: impl Into<String>) -> Self {
        Self {
            core: BlockCore::new("test.echo", internal_block_id, default_input_text),
        }
    }
}

impl Block for EchoBlock {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn run(&mut self) -> Result<()> {
        self.core.begin_run();
        if self.core.state() == RunnableState::Running {
            let input = self.core.input_text().to_string();
            self.core.set_result_text(input);
            self.core.set_state(RunnableState::Done);
        }
        Ok(())
    }
}

/// A block whose `run` always fails.
#[derive(Debug)]
pub struct FailingBlock {
    core: BlockCore,
    message: String,
}

impl FailingBlock {
    /// Create a failing block with the given failure message.
    pub fn new(internal_block_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            core: BlockCore::new("test.failing", internal_block_id, ""),
            message: message.into(),
        }
    }
}

impl Block for FailingBlock {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn run(&mut self) -> Result<()> {
        self.core.begin_run();
        Err(FlowForgeError::BlockExecution {
            internal_block_id: self.core.internal_block_id().to_string(),
            cause: self.message.clone(),
        })
    }
}

/// A block that starts running and never finishes on its own.
#[derive(Debug)]
pub struct StallBlock {
    core: BlockCore,
}

impl StallBlock {
    /// Create a stalling block.
    pub fn new(internal_block_id: impl Into<String>) -> Self {
        Self {
            core: BlockCore::new("test.stall", internal_block_id, ""),
        }
    }
}

impl Block for StallBlock {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn run(&mut self) -> Result<()> {
        self.core.begin_run();
        Ok(())
    }
}
