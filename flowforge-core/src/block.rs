//! The block contract and its reusable state bookkeeping.
//!
//! A block is the unit of work inside an instance: text in, text out, with
//! its own lifecycle state machine. Implementations embed a [`BlockCore`]
//! and implement [`Block::run`]; every other trait method has a default
//! delegating to the core, so the capability set stays flat — no base-class
//! chain, just composition.

use crate::error::Result;
use crate::state::RunnableState;
use std::sync::Arc;

/// A connection anchor on a block.
///
/// Junctions own the indices of the lines attached to them; the lines
/// themselves are owned by the instance. Wiring happens once, at instance
/// construction.
#[derive(Debug, Clone, Default)]
pub struct Junction {
    lines: Vec<usize>,
}

impl Junction {
    /// Create an empty junction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any line is attached.
    #[must_use]
    pub fn has_lines(&self) -> bool {
        !self.lines.is_empty()
    }

    /// Indices of the attached lines, in attachment order.
    #[must_use]
    pub fn line_indices(&self) -> &[usize] {
        &self.lines
    }

    /// Attach a line by index.
    pub fn attach(&mut self, line_index: usize) {
        self.lines.push(line_index);
    }

    /// Detach all lines.
    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Event fired when a block changes state.
#[derive(Debug, Clone)]
pub struct StateChangedEvent {
    /// The block that changed state.
    pub internal_block_id: String,
    /// The state before the transition.
    pub old_state: RunnableState,
    /// The state after the transition.
    pub new_state: RunnableState,
}

/// Observer of block state transitions.
///
/// Listeners are invoked synchronously from the mutating call, so they must
/// return quickly and must not call back into the block.
pub trait StateChangeListener: Send + Sync {
    /// Called after an effective state transition.
    fn on_state_changed(&self, event: &StateChangedEvent);
}

/// Reusable state bookkeeping embedded by block implementations.
///
/// Owns everything the engine needs from a block besides its work function:
/// identity, lifecycle state, text I/O, junctions, the modified flag, and
/// state-change listeners.
pub struct BlockCore {
    block_type_id: String,
    internal_block_id: String,
    state: RunnableState,
    input_text: String,
    result_text: String,
    default_input_text: String,
    modified: bool,
    input_junction: Junction,
    output_junction: Junction,
    state_listeners: Vec<Arc<dyn StateChangeListener>>,
}

impl BlockCore {
    /// Create a core in `Ready` state with the given default input text.
    pub fn new(
        block_type_id: impl Into<String>,
        internal_block_id: impl Into<String>,
        default_input_text: impl Into<String>,
    ) -> Self {
        let default_input_text = default_input_text.into();
        Self {
            block_type_id: block_type_id.into(),
            internal_block_id: internal_block_id.into(),
            state: RunnableState::Ready,
            input_text: default_input_text.clone(),
            result_text: String::new(),
            default_input_text,
            modified: false,
            input_junction: Junction::new(),
            output_junction: Junction::new(),
            state_listeners: Vec::new(),
        }
    }

    /// The block type id this block was created from.
    #[must_use]
    pub fn block_type_id(&self) -> &str {
        &self.block_type_id
    }

    /// The block's id, unique within its owning instance.
    #[must_use]
    pub fn internal_block_id(&self) -> &str {
        &self.internal_block_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunnableState {
        self.state
    }

    /// Transition to a new state, marking the block modified and notifying
    /// listeners when the transition is effective.
    pub fn set_state(&mut self, state: RunnableState) {
        if self.state == state {
            return;
        }
        let old_state = self.state;
        self.state = state;
        self.modified = true;

        tracing::debug!(
            internal_block_id = %self.internal_block_id,
            old_state = %old_state,
            new_state = %state,
            "block state changed"
        );

        let event = StateChangedEvent {
            internal_block_id: self.internal_block_id.clone(),
            old_state,
            new_state: state,
        };
        for listener in &self.state_listeners {
            listener.on_state_changed(&event);
        }
    }

    /// The `Ready` → `Running` entry transition; no-op from any other state.
    ///
    /// Implementations call this at the top of `run`.
    pub fn begin_run(&mut self) {
        if self.state == RunnableState::Ready {
            self.set_state(RunnableState::Running);
        }
    }

    /// `Done|Stopped|Aborted` → `Ready` without touching text or counters.
    pub fn set_ready(&mut self) {
        if self.state.is_terminal() {
            self.set_state(RunnableState::Ready);
        }
    }

    /// Restore the core to its freshly-constructed shape.
    pub fn reset(&mut self) {
        self.set_state(RunnableState::Ready);
        self.input_text = self.default_input_text.clone();
        self.result_text.clear();
        self.modified = true;
    }

    /// Current input text.
    #[must_use]
    pub fn input_text(&self) -> &str {
        &self.input_text
    }

    /// Replace the input text, marking the block modified on change.
    pub fn set_input_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if self.input_text != text {
            self.input_text = text;
            self.modified = true;
        }
    }

    /// Current result text.
    #[must_use]
    pub fn result_text(&self) -> &str {
        &self.result_text
    }

    /// Replace the result text, marking the block modified on change.
    ///
    /// Ignored once the block is `Done`: results are frozen until `reset`.
    pub fn set_result_text(&mut self, text: impl Into<String>) {
        if self.state == RunnableState::Done {
            return;
        }
        let text = text.into();
        if self.result_text != text {
            self.result_text = text;
            self.modified = true;
        }
    }

    /// Whether the block changed since the flag was last cleared.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Mark the block as modified.
    pub fn set_modified(&mut self) {
        self.modified = true;
    }

    /// Clear the modified flag.
    pub fn reset_modified(&mut self) {
        self.modified = false;
    }

    /// The input connection anchor.
    #[must_use]
    pub fn input_junction(&self) -> &Junction {
        &self.input_junction
    }

    /// Mutable access to the input anchor, for wiring.
    pub fn input_junction_mut(&mut self) -> &mut Junction {
        &mut self.input_junction
    }

    /// The output connection anchor.
    #[must_use]
    pub fn output_junction(&self) -> &Junction {
        &self.output_junction
    }

    /// Mutable access to the output anchor, for wiring.
    pub fn output_junction_mut(&mut self) -> &mut Junction {
        &mut self.output_junction
    }

    /// Register a state-change listener.
    pub fn add_state_change_listener(&mut self, listener: Arc<dyn StateChangeListener>) {
        self.state_listeners.push(listener);
    }
}

impl std::fmt::Debug for BlockCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCore")
            .field("block_type_id", &self.block_type_id)
            .field("internal_block_id", &self.internal_block_id)
            .field("state", &self.state)
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}

/// The block contract consumed by the engine.
///
/// `run` is the only required method; everything else defaults to the
/// embedded [`BlockCore`]. Mutations happen only under the owning instance's
/// thread of control, so implementations need `Send` but not `Sync`.
pub trait Block: Send + std::fmt::Debug {
    /// The embedded state bookkeeping.
    fn core(&self) -> &BlockCore;

    /// Mutable access to the embedded state bookkeeping.
    fn core_mut(&mut self) -> &mut BlockCore;

    /// Advance the block by one tick.
    ///
    /// Called while the block is in the instance's plan. Implementations
    /// start with `self.core_mut().begin_run()` and then perform (a slice
    /// of) their work, transitioning to `Done` when finished. Errors mark
    /// the owning instance as failed and surface to the scheduler.
    fn run(&mut self) -> Result<()>;

    /// Stop the block.
    fn stop(&mut self) {
        self.core_mut().set_state(RunnableState::Stopped);
    }

    /// Forcibly terminate the block.
    fn abort(&mut self) {
        self.core_mut().set_state(RunnableState::Aborted);
    }

    /// Restore the block to its freshly-constructed shape.
    fn reset(&mut self) {
        self.core_mut().reset();
    }

    /// Return a terminal block to `Ready` without resetting it.
    fn set_ready(&mut self) {
        self.core_mut().set_ready();
    }

    /// Current lifecycle state.
    fn state(&self) -> RunnableState {
        self.core().state()
    }

    /// The block's id, unique within its owning instance.
    fn internal_block_id(&self) -> &str {
        self.core().internal_block_id()
    }

    /// The block type id this block was created from.
    fn block_type_id(&self) -> &str {
        self.core().block_type_id()
    }

    /// The input connection anchor.
    fn input_junction(&self) -> &Junction {
        self.core().input_junction()
    }

    /// The output connection anchor.
    fn output_junction(&self) -> &Junction {
        self.core().output_junction()
    }

    /// Replace the input text.
    fn set_input_text(&mut self, text: &str) {
        self.core_mut().set_input_text(text);
    }

    /// Current input text.
    fn input_text(&self) -> &str {
        self.core().input_text()
    }

    /// Replace the result text; frozen once `Done`.
    fn set_result_text(&mut self, text: &str) {
        self.core_mut().set_result_text(text);
    }

    /// Current result text.
    fn result_text(&self) -> &str {
        self.core().result_text()
    }

    /// Whether the block changed since the flag was last cleared.
    fn is_modified(&self) -> bool {
        self.core().is_modified()
    }

    /// Clear the modified flag.
    fn reset_modified(&mut self) {
        self.core_mut().reset_modified();
    }

    /// Register a state-change listener.
    fn add_state_change_listener(&mut self, listener: Arc<dyn StateChangeListener>) {
        self.core_mut().add_state_change_listener(listener);
    }
}
