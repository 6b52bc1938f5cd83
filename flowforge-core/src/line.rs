//! Lines: directed edges carrying activation between blocks.

use crate::state::LineState;

/// A directed edge between two blocks of the same instance.
///
/// Endpoints are indices into the owning instance's block vector; the
/// instance validates them at construction and resolves them during
/// planning. Lines never outlive or leave their instance.
#[derive(Debug, Clone)]
pub struct Line {
    block_from: usize,
    block_to: usize,
    state: LineState,
    modified: bool,
}

impl Line {
    /// Create a new inactive line between two block indices.
    #[must_use]
    pub fn new(block_from: usize, block_to: usize) -> Self {
        Self {
            block_from,
            block_to,
            state: LineState::Off,
            modified: false,
        }
    }

    /// Index of the source block.
    #[must_use]
    pub fn block_from(&self) -> usize {
        self.block_from
    }

    /// Index of the destination block.
    #[must_use]
    pub fn block_to(&self) -> usize {
        self.block_to
    }

    /// Current activation state.
    #[must_use]
    pub fn state(&self) -> LineState {
        self.state
    }

    /// Switch the activation state, marking the line modified on change.
    pub fn set_state(&mut self, state: LineState) {
        if self.state != state {
            self.state = state;
            self.modified = true;
        }
    }

    /// Deactivate the line.
    pub fn reset(&mut self) {
        self.set_state(LineState::Off);
    }

    /// Whether the line changed since the flag was last cleared.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Clear the modified flag.
    pub fn reset_modified(&mut self) {
        self.modified = false;
    }
}
