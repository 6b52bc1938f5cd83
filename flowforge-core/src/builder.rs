//! The builder-service contract consumed from plugins.

use crate::args::{CtorArg, ParamKind};
use crate::block::Block;
use crate::error::Result;

/// A service, provided by a plugin, that builds blocks for one or more
/// block type ids.
///
/// Services are discovered by the registry at load time, version-checked
/// against the host's acceptable engine versions, and then consulted on
/// every `create_block` call.
pub trait BlockBuilderService: Send + Sync {
    /// The engine version the service was built against.
    fn expected_engine_version(&self) -> &str;

    /// The block type ids the service can build.
    fn supported_block_type_ids(&self) -> Vec<String>;

    /// The constructor signatures the service accepts, in preference order.
    ///
    /// The registry selects a signature by arity and element-wise
    /// assignability before delegating to [`build_block`].
    ///
    /// [`build_block`]: BlockBuilderService::build_block
    fn constructor_signatures(&self) -> Vec<Vec<ParamKind>>;

    /// Build a block of the given type from the supplied arguments.
    fn build_block(&self, block_type_id: &str, args: &[CtorArg]) -> Result<Box<dyn Block>>;
}
