//! Change-notification protocol.
//!
//! Once per dispatch tick an instance publishes a [`ChangeEvent`] describing
//! every block and line whose modified flag is set. The event is an immutable
//! snapshot: listeners read it, they never mutate engine state through it.

use crate::state::{LineState, RunnableState};
use crate::types::InstanceId;
use serde::{Deserialize, Serialize};

/// Snapshot of one modified object inside an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModifiedObject {
    /// A block whose modified flag was set.
    Block {
        /// The block's id within its instance.
        internal_block_id: String,
        /// The block's state at snapshot time.
        state: RunnableState,
        /// The block's result text at snapshot time.
        result_text: String,
    },
    /// A line whose modified flag was set.
    Line {
        /// The line's index within its instance.
        index: usize,
        /// The line's activation state at snapshot time.
        state: LineState,
    },
}

/// The message broadcast to listeners after a dispatch tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The instance that ticked.
    pub instance_id: InstanceId,
    /// The instance's name.
    pub instance_name: String,
    /// The instance's state after the tick's run step.
    pub instance_state: RunnableState,
    /// Modified blocks first, then modified lines, in iteration order.
    pub modified_objects: Vec<ModifiedObject>,
}

impl ChangeEvent {
    /// Whether the tick modified anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modified_objects.is_empty()
    }
}

/// Observer of instance change events.
///
/// Listeners may be invoked from the scheduler tick and must be
/// re-entrant-safe. A panicking listener is isolated and logged; it never
/// disturbs other listeners or the dispatching instance.
pub trait EventListener: Send + Sync {
    /// Called once per dispatch tick with the tick's snapshot.
    fn on_event(&self, event: &ChangeEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_emptiness() {
        let event = ChangeEvent {
            instance_id: InstanceId::new(1),
            instance_name: "test".to_string(),
            instance_state: RunnableState::Running,
            modified_objects: Vec::new(),
        };
        assert!(event.is_empty());
    }

    #[test]
    fn modified_object_serialization() {
        let object = ModifiedObject::Block {
            internal_block_id: "b1".to_string(),
            state: RunnableState::Done,
            result_text: "out".to_string(),
        };
        let json = serde_json::to_value(&object).unwrap();
        assert_eq!(json["kind"], "block");
        assert_eq!(json["state"], "DONE");

        let object = ModifiedObject::Line {
            index: 2,
            state: LineState::On,
        };
        let json = serde_json::to_value(&object).unwrap();
        assert_eq!(json["kind"], "line");
        assert_eq!(json["state"], "ON");
    }
}
