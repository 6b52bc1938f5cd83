//! Instance lifecycle and per-tick dataflow planning.
//!
//! An [`Instance`] owns a procedure's blocks and lines and advances them
//! through ticks. Each `run` call performs one step of a two-phase cycle:
//!
//! 1. **Planning** (`Ready` → `Running`): parameters are applied and every
//!    source block — one whose input junction has no lines — is queued in the
//!    plan. No block executes on this tick.
//! 2. **Dispatch** (`Running`): planned blocks run in order, one change event
//!    is published, completed blocks leave the plan, and activated lines pull
//!    their destination blocks in. An empty plan completes the instance.
//!
//! All externally visible operations are `&mut self`; callers that share an
//! instance across tasks wrap it in a mutex (the scheduler does exactly
//! that), which gives every operation the required mutual exclusion.

use flowforge_core::block::Block;
use flowforge_core::error::{FlowForgeError, Result};
use flowforge_core::event::{ChangeEvent, EventListener, ModifiedObject};
use flowforge_core::line::Line;
use flowforge_core::params::InstanceParameters;
use flowforge_core::state::{LineState, RunnableState};
use flowforge_core::types::{InstanceId, TemplateId, UserId};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A live procedure: an owned graph of blocks and lines with its own state.
pub struct Instance {
    instance_id: InstanceId,
    template_id: TemplateId,
    user_id: UserId,
    name: String,
    parameters: InstanceParameters,
    state: RunnableState,
    has_error: bool,
    error_message: String,
    blocks: Vec<Box<dyn Block>>,
    lines: Vec<Line>,
    modified: bool,
    /// Indices of blocks queued to run on the next dispatch tick.
    plan: Vec<usize>,
    listeners: Mutex<Vec<Arc<dyn EventListener>>>,
}

impl Instance {
    /// Construct a fully configured instance.
    ///
    /// The three ids must be positive and the name non-blank
    /// (`NullArgument` otherwise). Lines may only be present alongside
    /// blocks, and every line endpoint must index into `blocks`
    /// (`ConfigurationMismatch` otherwise). On success the instance is
    /// `Ready` and marked modified so the initial snapshot gets published.
    pub fn new(
        instance_id: InstanceId,
        template_id: TemplateId,
        user_id: UserId,
        name: impl Into<String>,
        parameters: InstanceParameters,
        mut blocks: Vec<Box<dyn Block>>,
        lines: Vec<Line>,
    ) -> Result<Self> {
        let name = name.into();
        Self::validate_identity(instance_id, template_id, user_id, &name)?;

        if blocks.is_empty() && !lines.is_empty() {
            return Err(FlowForgeError::configuration_mismatch(
                "lines must not be present if blocks are not present",
            ));
        }

        // Wire junctions: each line attaches to its source block's output
        // anchor and its destination block's input anchor.
        for (line_index, line) in lines.iter().enumerate() {
            let (from, to) = (line.block_from(), line.block_to());
            if from >= blocks.len() || to >= blocks.len() {
                return Err(FlowForgeError::configuration_mismatch(format!(
                    "line {line_index} references a block outside this instance"
                )));
            }
            blocks[from].core_mut().output_junction_mut().attach(line_index);
            blocks[to].core_mut().input_junction_mut().attach(line_index);
        }

        tracing::info!(instance_id = %instance_id, name = %name, "instance constructed");

        Ok(Self {
            instance_id,
            template_id,
            user_id,
            name,
            parameters,
            state: RunnableState::Ready,
            has_error: false,
            error_message: String::new(),
            blocks,
            lines,
            modified: true,
            plan: Vec::new(),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Construct an empty shell awaiting configuration.
    ///
    /// The shell is `NotConfigured`; calling [`run`](Self::run) on it sets
    /// the error flag and fails with `ConfigurationMismatch`.
    pub fn unconfigured(
        instance_id: InstanceId,
        template_id: TemplateId,
        user_id: UserId,
        name: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        Self::validate_identity(instance_id, template_id, user_id, &name)?;

        Ok(Self {
            instance_id,
            template_id,
            user_id,
            name,
            parameters: InstanceParameters::empty(),
            state: RunnableState::NotConfigured,
            has_error: false,
            error_message: String::new(),
            blocks: Vec::new(),
            lines: Vec::new(),
            modified: true,
            plan: Vec::new(),
            listeners: Mutex::new(Vec::new()),
        })
    }

    fn validate_identity(
        instance_id: InstanceId,
        template_id: TemplateId,
        user_id: UserId,
        name: &str,
    ) -> Result<()> {
        if !instance_id.is_valid() || !template_id.is_valid() || !user_id.is_valid() {
            return Err(FlowForgeError::null_argument(
                "instance id, template id and user id must be positive",
            ));
        }
        if name.trim().is_empty() {
            return Err(FlowForgeError::null_argument(
                "instance name must not be blank",
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Identity and observation
    // ------------------------------------------------------------------

    /// The instance id, unique within the process.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// The template this instance was materialised from.
    #[must_use]
    pub fn template_id(&self) -> TemplateId {
        self.template_id
    }

    /// The owning user.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunnableState {
        self.state
    }

    /// Whether a failure was recorded since the last reset.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.has_error
    }

    /// The recorded failure message, empty when none.
    #[must_use]
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// The blocks owned by this instance.
    #[must_use]
    pub fn blocks(&self) -> &[Box<dyn Block>] {
        &self.blocks
    }

    /// The lines owned by this instance.
    #[must_use]
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Indices of the blocks queued for the next dispatch tick.
    #[must_use]
    pub fn plan(&self) -> &[usize] {
        &self.plan
    }

    /// Whether the instance changed since the flag was last cleared.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Mark the instance as modified.
    pub fn set_modified(&mut self) {
        self.modified = true;
    }

    /// Clear the instance-level modified flag.
    pub fn reset_modified(&mut self) {
        self.modified = false;
    }

    /// Snapshot every modified block and line, blocks first.
    ///
    /// Reporting does not clear the per-object flags; consumers call
    /// [`clear_object_modified_flags`](Self::clear_object_modified_flags)
    /// once they have durably recorded a change.
    #[must_use]
    pub fn modified_objects(&self) -> Vec<ModifiedObject> {
        let mut objects = Vec::new();
        for block in &self.blocks {
            if block.is_modified() {
                objects.push(ModifiedObject::Block {
                    internal_block_id: block.internal_block_id().to_string(),
                    state: block.state(),
                    result_text: block.result_text().to_string(),
                });
            }
        }
        for (index, line) in self.lines.iter().enumerate() {
            if line.is_modified() {
                objects.push(ModifiedObject::Line {
                    index,
                    state: line.state(),
                });
            }
        }
        objects
    }

    /// Clear the modified flag of every block and line.
    pub fn clear_object_modified_flags(&mut self) {
        for block in &mut self.blocks {
            block.reset_modified();
        }
        for line in &mut self.lines {
            line.reset_modified();
        }
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register a change-event listener; applies from the next event.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.listeners.lock().push(listener);
    }

    /// Remove a previously registered listener by identity.
    pub fn remove_listener(&self, listener: &Arc<dyn EventListener>) {
        self.listeners
            .lock()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn fire_change_event(&self, modified_objects: Vec<ModifiedObject>) {
        let event = ChangeEvent {
            instance_id: self.instance_id,
            instance_name: self.name.clone(),
            instance_state: self.state,
            modified_objects,
        };

        // Dispatch over a snapshot so listeners can add or remove
        // themselves without corrupting the traversal.
        let snapshot: Vec<Arc<dyn EventListener>> = self.listeners.lock().clone();
        for listener in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
            if outcome.is_err() {
                tracing::warn!(
                    instance_id = %self.instance_id,
                    "change-event listener panicked; continuing with remaining listeners"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    fn set_state(&mut self, state: RunnableState) {
        if self.state != state {
            self.state = state;
            self.modified = true;
            tracing::info!(instance_id = %self.instance_id, state = %state, "state changed");
        }
    }

    fn set_error(&mut self, message: impl Into<String>) {
        if !self.has_error {
            self.modified = true;
        }
        self.has_error = true;
        self.error_message = message.into();
    }

    /// Stop the instance: every block stops, every line deactivates.
    pub fn stop(&mut self) {
        self.set_state(RunnableState::Stopped);
        for block in &mut self.blocks {
            block.stop();
        }
        for line in &mut self.lines {
            line.set_state(LineState::Off);
        }
        self.plan.clear();
        self.modified = true;

        tracing::info!(instance_id = %self.instance_id, "stop completed");
    }

    /// Forcibly terminate the instance.
    pub fn abort(&mut self) {
        self.set_state(RunnableState::Aborted);
        for block in &mut self.blocks {
            block.abort();
        }
        for line in &mut self.lines {
            line.set_state(LineState::Off);
        }
        self.plan.clear();
        self.modified = true;

        tracing::info!(instance_id = %self.instance_id, "abort completed");
    }

    /// Return a finished instance to `Ready` without resetting its blocks.
    ///
    /// Only effective from `Done`, `Stopped` or `Aborted`; a no-op from any
    /// other state. Fails with `ConfigurationMismatch` when the error flag
    /// is set — a failed instance must be reset instead.
    pub fn set_ready(&mut self) -> Result<()> {
        if !self.state.is_terminal() {
            return Ok(());
        }
        if self.has_error {
            return Err(FlowForgeError::configuration_mismatch(
                self.error_message.clone(),
            ));
        }

        self.set_state(RunnableState::Ready);
        for block in &mut self.blocks {
            block.set_ready();
        }
        for line in &mut self.lines {
            line.set_state(LineState::Off);
        }
        Ok(())
    }

    /// Reset the instance: state `Ready`, error cleared, every block and
    /// line restored to its freshly-constructed shape.
    pub fn reset(&mut self) {
        self.set_state(RunnableState::Ready);
        for block in &mut self.blocks {
            block.reset();
        }
        for line in &mut self.lines {
            line.reset();
        }
        self.has_error = false;
        self.error_message.clear();
        self.plan.clear();
        self.modified = true;

        tracing::info!(instance_id = %self.instance_id, "reset completed");
    }

    /// Advance the instance by one tick.
    ///
    /// See the module docs for the two-phase cycle. From `NotConfigured`
    /// this sets the error flag and fails with `ConfigurationMismatch`;
    /// from `Paused` or a terminal state it is a no-op.
    pub fn run(&mut self) -> Result<()> {
        match self.state {
            RunnableState::NotConfigured => {
                self.set_error("instance is not configured");
                Err(FlowForgeError::configuration_mismatch(
                    self.error_message.clone(),
                ))
            }
            RunnableState::Ready => {
                self.plan_tick();
                Ok(())
            }
            RunnableState::Running => self.dispatch_tick(),
            _ => Ok(()),
        }
    }

    /// The planning phase: apply parameters, queue source blocks, go
    /// `Running`. No block executes and no event is published.
    fn plan_tick(&mut self) {
        for block in &mut self.blocks {
            if let Some(parameter) = self.parameters.get(block.internal_block_id()) {
                block.set_input_text(parameter.parameter_value());
            }
        }

        self.plan.clear();
        for (index, block) in self.blocks.iter().enumerate() {
            if !block.input_junction().has_lines() {
                self.plan.push(index);
            }
        }

        tracing::debug!(
            instance_id = %self.instance_id,
            source_blocks = self.plan.len(),
            "plan built"
        );

        self.set_state(RunnableState::Running);
    }

    /// The dispatch phase: run planned blocks, publish the tick's change
    /// event, advance activation, complete when the plan drains.
    fn dispatch_tick(&mut self) -> Result<()> {
        let planned = self.plan.clone();
        for index in planned {
            let before = self.blocks[index].state();
            if let Err(error) = self.blocks[index].run() {
                self.set_error(error.to_string());
                tracing::error!(
                    instance_id = %self.instance_id,
                    internal_block_id = self.blocks[index].internal_block_id(),
                    error = %error,
                    "block execution failed"
                );
                return Err(error);
            }

            // A block observed completing this tick activates every line
            // leaving its output junction.
            if before != RunnableState::Done && self.blocks[index].state() == RunnableState::Done {
                let outgoing = self.blocks[index].output_junction().line_indices().to_vec();
                for line_index in outgoing {
                    self.lines[line_index].set_state(LineState::On);
                }
            }
        }

        self.fire_change_event(self.modified_objects());

        self.plan
            .retain(|&index| self.blocks[index].state() != RunnableState::Done);

        // Activated lines pull their destinations into the plan; the
        // activation is consumed so a line feeds its destination once.
        for index in 0..self.lines.len() {
            if self.lines[index].state() == LineState::On {
                self.lines[index].set_state(LineState::Off);
                let destination = self.lines[index].block_to();
                if !self.plan.contains(&destination) {
                    self.plan.push(destination);
                }
            }
        }

        if self.plan.is_empty() {
            self.set_state(RunnableState::Done);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("instance_id", &self.instance_id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("blocks", &self.blocks.len())
            .field("lines", &self.lines.len())
            .field("plan", &self.plan)
            .field("has_error", &self.has_error)
            .finish()
    }
}
