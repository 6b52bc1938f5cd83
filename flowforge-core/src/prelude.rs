//! Prelude for convenient imports.
//!
//! ```ignore
//! use flowforge_core::prelude::*;
//! ```

pub use crate::args::{CtorArg, ParamKind};
pub use crate::block::{Block, BlockCore, Junction, StateChangeListener, StateChangedEvent};
pub use crate::builder::BlockBuilderService;
pub use crate::error::{FlowForgeError, Result};
pub use crate::event::{ChangeEvent, EventListener, ModifiedObject};
pub use crate::line::Line;
pub use crate::params::{InstanceParameter, InstanceParameters};
pub use crate::state::{LineState, RunnableState};
pub use crate::types::{InstanceId, TemplateId, UserId};
