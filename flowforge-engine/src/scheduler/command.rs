//! Commands that steer instances through the processing unit.

use flowforge_core::types::InstanceId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An operation applied to a named instance at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Return a finished instance to `Ready` without resetting it.
    SetReady,
    /// Reserved; currently a no-op.
    Pause,
    /// Reserved; currently a no-op.
    Resume,
    /// Stop the instance.
    Stop,
    /// Forcibly terminate the instance.
    Abort,
    /// Reset the instance to its freshly-constructed shape.
    Reset,
    /// Remove the instance from the processing unit.
    Remove,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SetReady => "SET_READY",
            Self::Pause => "PAUSE",
            Self::Resume => "RESUME",
            Self::Stop => "STOP",
            Self::Abort => "ABORT",
            Self::Reset => "RESET",
            Self::Remove => "REMOVE",
        };
        f.write_str(name)
    }
}

/// A command queued for a specific instance.
///
/// Entries are enqueued by producers, consumed exactly once by the tick
/// worker, and then discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandEntry {
    /// The operation to apply.
    pub command: Command,
    /// The target instance.
    pub instance_id: InstanceId,
}

impl CommandEntry {
    /// Create a command entry.
    #[must_use]
    pub fn new(command: Command, instance_id: InstanceId) -> Self {
        Self {
            command,
            instance_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_display() {
        assert_eq!(format!("{}", Command::SetReady), "SET_READY");
        assert_eq!(format!("{}", Command::Remove), "REMOVE");
    }

    #[test]
    fn command_serialization() {
        let json = serde_json::to_string(&Command::SetReady).unwrap();
        assert_eq!(json, "\"SET_READY\"");
    }
}
