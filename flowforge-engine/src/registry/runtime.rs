//! Plugin runtime management using Wasmtime.
//!
//! Provides engine configuration, module compilation, and caching. One
//! runtime is shared by every plugin loader the registry creates; it plays
//! the role of the parent loader, so all plugins see the same host import
//! namespace.

use dashmap::DashMap;
use flowforge_core::error::{FlowForgeError, Result};
use std::path::Path;
use std::sync::Arc;
use wasmtime::{Config, Engine, Module};

/// Default fuel amount for execution limiting.
const DEFAULT_FUEL: u64 = 10_000_000;

/// Configuration for the plugin runtime.
#[derive(Debug, Clone)]
pub struct PluginRuntimeConfig {
    /// Whether to enable fuel-based execution limiting.
    pub fuel_enabled: bool,
    /// Initial fuel amount when fuel is enabled.
    pub fuel_amount: u64,
    /// Whether to cache compiled modules by content hash.
    pub cache_modules: bool,
    /// Enable debug info in compiled modules.
    pub debug_info: bool,
}

impl Default for PluginRuntimeConfig {
    fn default() -> Self {
        Self {
            fuel_enabled: false,
            fuel_amount: DEFAULT_FUEL,
            cache_modules: true,
            debug_info: false,
        }
    }
}

impl PluginRuntimeConfig {
    /// Create a configuration for testing with stricter limits.
    pub fn testing() -> Self {
        Self {
            fuel_enabled: true,
            fuel_amount: 1_000_000,
            cache_modules: false,
            debug_info: true,
        }
    }

    /// Enable or disable fuel-based limiting.
    pub fn with_fuel(mut self, enabled: bool, amount: u64) -> Self {
        self.fuel_enabled = enabled;
        self.fuel_amount = amount;
        self
    }

    /// Enable or disable module caching.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_modules = enabled;
        self
    }

    fn to_wasmtime_config(&self) -> Config {
        let mut config = Config::new();
        config.consume_fuel(self.fuel_enabled);
        config.debug_info(self.debug_info);
        config.strategy(wasmtime::Strategy::Cranelift);
        config
    }
}

/// A compiled plugin module ready for instantiation.
pub struct CompiledModule {
    module: Module,
    hash: u64,
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

impl CompiledModule {
    /// Get the underlying Wasmtime module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Content hash of the archive this module was compiled from.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Whether the module declares the given export.
    pub fn has_export(&self, name: &str) -> bool {
        self.module.exports().any(|export| export.name() == name)
    }
}

/// Shared Wasmtime engine plus a cache of compiled plugin modules.
pub struct PluginRuntime {
    engine: Engine,
    config: PluginRuntimeConfig,
    module_cache: DashMap<u64, Arc<CompiledModule>>,
}

impl PluginRuntime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: PluginRuntimeConfig) -> Result<Self> {
        let engine = Engine::new(&config.to_wasmtime_config()).map_err(|e| {
            FlowForgeError::configuration_mismatch(format!(
                "failed to create plugin engine: {e}"
            ))
        })?;

        Ok(Self {
            engine,
            config,
            module_cache: DashMap::new(),
        })
    }

    /// Create a runtime with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(PluginRuntimeConfig::default())
    }

    /// Get the Wasmtime engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Compile archive bytes into a module, consulting the cache first.
    pub fn compile(&self, path: &Path, bytes: &[u8]) -> Result<Arc<CompiledModule>> {
        let hash = hash_bytes(bytes);

        if self.config.cache_modules {
            if let Some(cached) = self.module_cache.get(&hash) {
                return Ok(Arc::clone(&cached));
            }
        }

        let module = Module::new(&self.engine, bytes).map_err(|e| FlowForgeError::PluginLoad {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;

        let compiled = Arc::new(CompiledModule { module, hash });
        if self.config.cache_modules {
            self.module_cache.insert(hash, Arc::clone(&compiled));
        }
        Ok(compiled)
    }

    /// Compile an archive file.
    pub fn compile_file(&self, path: &Path) -> Result<Arc<CompiledModule>> {
        let bytes = std::fs::read(path).map_err(|e| FlowForgeError::PluginLoad {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        self.compile(path, &bytes)
    }

    /// Clear the module cache.
    pub fn clear_cache(&self) {
        self.module_cache.clear();
    }

    /// Number of cached modules.
    pub fn cache_size(&self) -> usize {
        self.module_cache.len()
    }

    /// Initial fuel for new stores, when fuel limiting is enabled.
    pub fn initial_fuel(&self) -> Option<u64> {
        self.config.fuel_enabled.then_some(self.config.fuel_amount)
    }
}

/// Content hash used as the cache key.
fn hash_bytes(bytes: &[u8]) -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}
