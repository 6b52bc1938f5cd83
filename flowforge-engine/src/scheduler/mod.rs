//! Scheduling: the processing unit and its command queue.

mod command;
mod unit;

pub use command::{Command, CommandEntry};
pub use unit::{
    InstanceListItem, ProcessingUnit, ProcessingUnitConfig, DEFAULT_PROCESSING_DELAY,
};
