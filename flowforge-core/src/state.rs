//! Lifecycle state machines shared by instances and blocks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a runnable object (instance or block).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnableState {
    /// The object has not been fully configured and cannot run.
    NotConfigured,
    /// Configured and waiting for its first tick.
    Ready,
    /// Actively advancing through ticks.
    Running,
    /// Suspended; reserved semantics.
    Paused,
    /// Completed normally; results are frozen until reset.
    Done,
    /// Stopped by an external command.
    Stopped,
    /// Forcibly terminated.
    Aborted,
}

impl RunnableState {
    /// A state is ready-to-run iff it is `Ready` or `Running`.
    #[must_use]
    pub const fn is_ready_to_run(&self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }

    /// Terminal states: `Done`, `Stopped`, `Aborted`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Stopped | Self::Aborted)
    }
}

impl fmt::Display for RunnableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotConfigured => "NOT_CONFIGURED",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Done => "DONE",
            Self::Stopped => "STOPPED",
            Self::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Activation state of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineState {
    /// The line carries an activation for its destination block.
    On,
    /// Inactive.
    Off,
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::On => "ON",
            Self::Off => "OFF",
        })
    }
}
