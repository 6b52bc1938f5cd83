//! Error types for the FlowForge engine.
//!
//! This module provides strongly-typed errors with actionable context.
//! Every variant carries a stable error code so operators can grep logs
//! and dashboards without depending on message wording.

use crate::types::InstanceId;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for FlowForge operations.
#[derive(Error, Debug)]
pub enum FlowForgeError {
    // =========================================================================
    // Argument Errors (E001-E099)
    // =========================================================================
    /// A required argument was missing, blank, or non-positive.
    #[error("E001: Invalid argument: {cause}")]
    NullArgument {
        /// Description of the offending argument.
        cause: String,
    },

    /// A structural precondition of construction or loading was violated.
    #[error("E002: Configuration mismatch: {cause}")]
    ConfigurationMismatch {
        /// Description of the violated precondition.
        cause: String,
    },

    // =========================================================================
    // Scheduler Errors (E101-E199)
    // =========================================================================
    /// An instance with the same id is already registered.
    #[error("E101: Instance {instance_id} already exists")]
    ObjectAlreadyExists {
        /// The duplicate instance id.
        instance_id: InstanceId,
    },

    /// Storing an instance failed unexpectedly.
    #[error("E102: Failed to add instance {instance_id}: {cause}")]
    InstanceAddFailed {
        /// The instance that could not be stored.
        instance_id: InstanceId,
        /// Reason for the storage failure.
        cause: String,
    },

    /// A command could not be enqueued.
    #[error("E103: Failed to enqueue {command} for instance {instance_id}: {cause}")]
    CommandFailed {
        /// The command that was lost.
        command: String,
        /// The target instance.
        instance_id: InstanceId,
        /// Reason for the enqueue failure.
        cause: String,
    },

    // =========================================================================
    // Registry Errors (E201-E299)
    // =========================================================================
    /// No builder service is registered for the requested block type.
    #[error("E201: No builder service registered for block type '{block_type_id}'")]
    BlockTypeNotFound {
        /// The unknown block type id.
        block_type_id: String,
    },

    /// A builder service failed to construct a block.
    #[error("E202: Failed to build block of type '{block_type_id}': {cause}")]
    Instantiation {
        /// The block type being built.
        block_type_id: String,
        /// Reason for the builder failure.
        cause: String,
    },

    /// A plugin archive failed to compile or instantiate.
    #[error("E203: Failed to load plugin archive {path}: {cause}")]
    PluginLoad {
        /// The archive path.
        path: PathBuf,
        /// Reason for the load failure.
        cause: String,
    },

    // =========================================================================
    // Execution Errors (E301-E399)
    // =========================================================================
    /// A block's `run` failed.
    #[error("E301: Block '{internal_block_id}' execution failed: {cause}")]
    BlockExecution {
        /// The block that failed.
        internal_block_id: String,
        /// Reason for the execution failure.
        cause: String,
    },

    // =========================================================================
    // Reserved (E401-E499)
    // =========================================================================
    /// The operation is reserved for a future revision.
    #[error("E401: Not implemented: {cause}")]
    NotImplemented {
        /// The reserved operation.
        cause: String,
    },
}

impl FlowForgeError {
    /// Get the stable error code (e.g. "E001").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NullArgument { .. } => "E001",
            Self::ConfigurationMismatch { .. } => "E002",
            Self::ObjectAlreadyExists { .. } => "E101",
            Self::InstanceAddFailed { .. } => "E102",
            Self::CommandFailed { .. } => "E103",
            Self::BlockTypeNotFound { .. } => "E201",
            Self::Instantiation { .. } => "E202",
            Self::PluginLoad { .. } => "E203",
            Self::BlockExecution { .. } => "E301",
            Self::NotImplemented { .. } => "E401",
        }
    }

    /// Check if this error is a configuration/validation error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::NullArgument { .. }
                | Self::ConfigurationMismatch { .. }
                | Self::PluginLoad { .. }
        )
    }

    /// Shorthand constructor for [`FlowForgeError::NullArgument`].
    pub fn null_argument(cause: impl Into<String>) -> Self {
        Self::NullArgument {
            cause: cause.into(),
        }
    }

    /// Shorthand constructor for [`FlowForgeError::ConfigurationMismatch`].
    pub fn configuration_mismatch(cause: impl Into<String>) -> Self {
        Self::ConfigurationMismatch {
            cause: cause.into(),
        }
    }
}

/// Result type alias using `FlowForgeError`.
pub type Result<T> = std::result::Result<T, FlowForgeError>;
