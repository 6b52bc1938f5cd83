//! The block registry: discovers, isolates, and instantiates pluggable
//! block types.
//!
//! Plugins live under a top-level modules directory, one subdirectory per
//! plugin, each holding one or more WebAssembly archives:
//!
//! ```text
//! modules/
//!   block-type-a/
//!     block-type-a-impl.wasm
//!     block-type-a-dep.wasm
//!   block-type-b/
//!     block-type-b-impl.wasm
//! ```
//!
//! Implementation archives declare the builder services they provide (see
//! [`block`] for the manifest ABI); dependency archives are linked into the
//! same subdirectory loader. The registry's `(services, loaders)` pair is
//! replaced as one unit on reload: concurrent `create_block` calls see
//! either the old pair or the new pair, never a mixed view.

mod block;
mod ctor;
mod loader;
mod runtime;

pub use block::{PluginManifest, WasmBlock, WasmBuilderService};
pub use ctor::select_signature;
pub use loader::{PluginLoader, ARCHIVE_EXTENSION};
pub use runtime::{CompiledModule, PluginRuntime, PluginRuntimeConfig};

use flowforge_core::args::CtorArg;
use flowforge_core::block::Block;
use flowforge_core::builder::BlockBuilderService;
use flowforge_core::error::{FlowForgeError, Result};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Configuration for a block registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Engine versions plugins may target. Must be non-empty.
    pub acceptable_engine_versions: HashSet<String>,
    /// Archive filenames the host application bundles itself; plugin copies
    /// of these are duplicates.
    pub host_archives: HashSet<String>,
    /// Runtime settings shared by every plugin loader.
    pub runtime: PluginRuntimeConfig,
}

impl RegistryConfig {
    /// Create a configuration accepting the given engine versions.
    pub fn new<I, S>(acceptable_engine_versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            acceptable_engine_versions: acceptable_engine_versions
                .into_iter()
                .map(Into::into)
                .collect(),
            host_archives: HashSet::new(),
            runtime: PluginRuntimeConfig::default(),
        }
    }

    /// Name the archives the host bundles itself.
    pub fn with_host_archives<I, S>(mut self, host_archives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_archives = host_archives.into_iter().map(Into::into).collect();
        self
    }

    /// Set the plugin runtime configuration.
    pub fn with_runtime(mut self, runtime: PluginRuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }
}

/// Immutable holder for registry state, replaced as one unit.
struct RegistryState {
    services: HashMap<String, Arc<dyn BlockBuilderService>>,
    loaders: Vec<PluginLoader>,
}

impl RegistryState {
    fn empty() -> Self {
        Self {
            services: HashMap::new(),
            loaders: Vec::new(),
        }
    }
}

/// Resolves block type ids to plugin-provided builder services.
pub struct BlockRegistry {
    acceptable_engine_versions: HashSet<String>,
    host_archives: HashSet<String>,
    runtime: Arc<PluginRuntime>,
    state: RwLock<Arc<RegistryState>>,
}

impl std::fmt::Debug for BlockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockRegistry")
            .field("acceptable_engine_versions", &self.acceptable_engine_versions)
            .field("host_archives", &self.host_archives)
            .finish_non_exhaustive()
    }
}

impl BlockRegistry {
    /// Create a registry.
    ///
    /// Fails with `ConfigurationMismatch` when no acceptable engine version
    /// is supplied.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        if config.acceptable_engine_versions.is_empty() {
            return Err(FlowForgeError::configuration_mismatch(
                "acceptable engine versions must be non-empty",
            ));
        }

        let runtime = Arc::new(PluginRuntime::new(config.runtime)?);

        Ok(Self {
            acceptable_engine_versions: config.acceptable_engine_versions,
            host_archives: config.host_archives,
            runtime,
            state: RwLock::new(Arc::new(RegistryState::empty())),
        })
    }

    /// Load builder services from every subdirectory of the top-level
    /// modules directory, then swap them in atomically.
    ///
    /// On any failure the previous state is left intact. On success the
    /// outgoing loaders are released after the swap.
    pub fn load(
        &self,
        top_level_modules_directory: &Path,
        remove_duplicate_dependencies: bool,
    ) -> Result<()> {
        loader::validate_directory(top_level_modules_directory)?;

        let mut plugin_directories: Vec<_> = std::fs::read_dir(top_level_modules_directory)
            .map_err(|e| {
                FlowForgeError::configuration_mismatch(format!(
                    "failed to list modules directory {}: {e}",
                    top_level_modules_directory.display()
                ))
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        plugin_directories.sort();

        let mut new_services: HashMap<String, Arc<dyn BlockBuilderService>> = HashMap::new();
        let mut new_loaders = Vec::with_capacity(plugin_directories.len());

        for directory in &plugin_directories {
            let plugin_loader = PluginLoader::load(
                directory,
                &self.runtime,
                &self.acceptable_engine_versions,
                &self.host_archives,
                remove_duplicate_dependencies,
            )?;

            for service in plugin_loader.services() {
                for block_type_id in service.supported_block_type_ids() {
                    let service: Arc<dyn BlockBuilderService> =
                        Arc::clone(service) as Arc<dyn BlockBuilderService>;
                    new_services.insert(block_type_id, service);
                }
            }
            new_loaders.push(plugin_loader);
        }

        let service_count = new_services.len();
        let new_state = Arc::new(RegistryState {
            services: new_services,
            loaders: new_loaders,
        });

        // Atomic state replacement; the old state drops (and releases its
        // loaders) after the swap.
        let _old_state = {
            let mut guard = self.state.write();
            std::mem::replace(&mut *guard, new_state)
        };

        tracing::info!(services = service_count, "block builder services loaded");
        Ok(())
    }

    /// Build a block by type id.
    ///
    /// Blank id → `NullArgument`; unregistered id → `BlockTypeNotFound`;
    /// builder failure → `Instantiation`.
    pub fn create_block(&self, block_type_id: &str, args: &[CtorArg]) -> Result<Box<dyn Block>> {
        if block_type_id.trim().is_empty() {
            return Err(FlowForgeError::null_argument(
                "block type id must not be blank",
            ));
        }

        // Single load of the state pair; no mixed view is observable.
        let state = Arc::clone(&self.state.read());
        let service = state
            .services
            .get(block_type_id)
            .ok_or_else(|| FlowForgeError::BlockTypeNotFound {
                block_type_id: block_type_id.to_string(),
            })?;

        service.build_block(block_type_id, args)
    }

    /// Block type ids currently registered, in no particular order.
    #[must_use]
    pub fn block_type_ids(&self) -> Vec<String> {
        self.state.read().services.keys().cloned().collect()
    }

    /// Number of registered block types.
    #[must_use]
    pub fn service_count(&self) -> usize {
        self.state.read().services.len()
    }

    /// Release everything: swap in the empty state and drop the outgoing
    /// loaders.
    pub fn close(&self) {
        let _old_state = {
            let mut guard = self.state.write();
            std::mem::replace(&mut *guard, Arc::new(RegistryState::empty()))
        };
        tracing::info!("block registry closed, all resources released");
    }
}

impl Drop for BlockRegistry {
    fn drop(&mut self) {
        self.close();
    }
}
