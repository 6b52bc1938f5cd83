//! FlowForge Execution Engine
//!
//! This crate drives FlowForge procedures: it owns the instance lifecycle
//! state machine, the per-tick dataflow planner, the processing unit that
//! advances all instances on a shared cadence, the command queue through
//! which outside agents steer instances, and the block registry that loads
//! pluggable block implementations.
//!
//! # Overview
//!
//! ```ignore
//! use flowforge_core::prelude::*;
//! use flowforge_engine::instance::Instance;
//! use flowforge_engine::scheduler::{Command, ProcessingUnit, ProcessingUnitConfig};
//!
//! let unit = ProcessingUnit::new(ProcessingUnitConfig::from_env());
//! unit.add_instance(instance)?;
//! unit.start_processing();
//! unit.put_command(Command::Stop, instance_id)?;
//! ```
//!
//! Block implementations are external: the engine consumes the `Block`
//! contract from `flowforge-core` and loads production implementations
//! through the [`registry`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod instance;
pub mod registry;
pub mod scheduler;

// Re-export key types at crate root for convenience
pub use instance::Instance;
pub use registry::{BlockRegistry, RegistryConfig};
pub use scheduler::{Command, InstanceListItem, ProcessingUnit, ProcessingUnitConfig};
