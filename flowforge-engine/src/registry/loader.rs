//! Per-plugin loaders: one isolated loader per subdirectory of the modules
//! directory.

use super::block::{PluginManifest, WasmBuilderService, WasmSession};
use super::runtime::{CompiledModule, PluginRuntime};
use flowforge_core::error::{FlowForgeError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The archive extension plugins are discovered by.
pub const ARCHIVE_EXTENSION: &str = "wasm";

/// An isolated loader scoped to one plugin subdirectory.
///
/// Owns the subdirectory's compiled modules and the builder services its
/// implementation archives declare. Dropping the loader releases the
/// compiled modules.
pub struct PluginLoader {
    plugin_name: String,
    directory: PathBuf,
    services: Vec<Arc<WasmBuilderService>>,
}

impl PluginLoader {
    /// Load one plugin subdirectory.
    ///
    /// Handles duplicate dependencies against the host archive set, compiles
    /// every archive, classifies implementation archives by their manifest
    /// export, reads and version-checks each manifest, and materialises the
    /// declared builder services.
    pub fn load(
        directory: &Path,
        runtime: &Arc<PluginRuntime>,
        acceptable_engine_versions: &HashSet<String>,
        host_archives: &HashSet<String>,
        remove_duplicate_dependencies: bool,
    ) -> Result<Self> {
        validate_directory(directory)?;

        let plugin_name = directory
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("plugin")
            .to_string();

        // Deal with duplicate dependencies before collecting archives.
        handle_duplicate_dependencies(directory, host_archives, remove_duplicate_dependencies)?;

        let archives = list_archives(directory)?;
        if archives.is_empty() {
            return Err(FlowForgeError::configuration_mismatch(format!(
                "no plugin archives found in the module directory: {}",
                directory.display()
            )));
        }

        tracing::info!(
            plugin = %plugin_name,
            archives = archives.len(),
            "found plugin archive(s)"
        );

        let mut compiled = Vec::with_capacity(archives.len());
        for path in &archives {
            let module = runtime.compile_file(path)?;
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("module")
                .to_string();
            compiled.push((stem, path.clone(), module));
        }

        // Implementation archives declare a manifest; the rest are
        // dependencies made importable under their file stems.
        let deps: Arc<Vec<(String, Arc<CompiledModule>)>> = Arc::new(
            compiled
                .iter()
                .filter(|(_, _, module)| !module.has_export("ffb_manifest"))
                .map(|(stem, _, module)| (stem.clone(), Arc::clone(module)))
                .collect(),
        );

        let mut services = Vec::new();
        for (_, path, module) in compiled
            .iter()
            .filter(|(_, _, module)| module.has_export("ffb_manifest"))
        {
            let manifest = read_manifest(runtime, module, &deps, path, &plugin_name)?;

            if !is_compatible_engine_version(&manifest.engine_version, acceptable_engine_versions)
            {
                return Err(FlowForgeError::configuration_mismatch(format!(
                    "plugin archive {} targets engine version '{}', acceptable: {:?}",
                    path.display(),
                    manifest.engine_version,
                    acceptable_engine_versions
                )));
            }

            for block_type_id in &manifest.block_types {
                tracing::info!(
                    plugin = %plugin_name,
                    block_type_id = %block_type_id,
                    "loaded block builder service"
                );
            }

            services.push(Arc::new(WasmBuilderService::new(
                plugin_name.clone(),
                path.clone(),
                manifest,
                Arc::clone(module),
                Arc::clone(&deps),
                Arc::clone(runtime),
            )));
        }

        if services.is_empty() {
            tracing::warn!(
                plugin = %plugin_name,
                "plugin directory contains archives but declares no builder services"
            );
        }

        Ok(Self {
            plugin_name,
            directory: directory.to_path_buf(),
            services,
        })
    }

    /// The plugin subdirectory name.
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// The plugin subdirectory path.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The builder services this loader provides.
    pub fn services(&self) -> &[Arc<WasmBuilderService>] {
        &self.services
    }
}

impl Drop for PluginLoader {
    fn drop(&mut self) {
        tracing::debug!(plugin = %self.plugin_name, "plugin loader released");
    }
}

/// Check that the path exists and is a directory.
pub(crate) fn validate_directory(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(FlowForgeError::configuration_mismatch(format!(
            "{} must exist and be a directory",
            path.display()
        )));
    }
    Ok(())
}

/// List the plugin archives in a directory, sorted by name.
fn list_archives(directory: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(directory).map_err(|e| {
        FlowForgeError::configuration_mismatch(format!(
            "failed to list module directory {}: {e}",
            directory.display()
        ))
    })?;

    let mut archives: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == ARCHIVE_EXTENSION)
        })
        .collect();
    archives.sort();
    Ok(archives)
}

/// Warn about, and optionally delete, archives the host already bundles.
fn handle_duplicate_dependencies(
    directory: &Path,
    host_archives: &HashSet<String>,
    remove_duplicate_dependencies: bool,
) -> Result<()> {
    if host_archives.is_empty() {
        return Ok(());
    }

    let duplicates: Vec<PathBuf> = list_archives(directory)?
        .into_iter()
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| host_archives.contains(name))
        })
        .collect();

    if duplicates.is_empty() {
        return Ok(());
    }

    tracing::warn!(
        directory = %directory.display(),
        duplicates = ?duplicates,
        "duplicate dependencies detected between plugin directory and host"
    );

    if remove_duplicate_dependencies {
        tracing::info!(
            directory = %directory.display(),
            "removing duplicate archives from plugin directory"
        );
        for duplicate in duplicates {
            if let Err(e) = std::fs::remove_file(&duplicate) {
                tracing::warn!(path = %duplicate.display(), error = %e, "failed to remove duplicate archive");
                return Err(FlowForgeError::configuration_mismatch(format!(
                    "failed to remove duplicate archive {}: {e}",
                    duplicate.display()
                )));
            }
        }
    }

    Ok(())
}

/// Instantiate an implementation archive once and read its manifest.
fn read_manifest(
    runtime: &Arc<PluginRuntime>,
    module: &Arc<CompiledModule>,
    deps: &Arc<Vec<(String, Arc<CompiledModule>)>>,
    path: &Path,
    plugin_name: &str,
) -> Result<PluginManifest> {
    let mut session =
        WasmSession::instantiate(runtime, module, deps, path, plugin_name, "manifest")?;
    let json = session.call_manifest()?;

    let manifest: PluginManifest =
        serde_json::from_str(&json).map_err(|e| FlowForgeError::PluginLoad {
            path: path.to_path_buf(),
            cause: format!("invalid manifest JSON: {e}"),
        })?;

    if manifest.block_types.is_empty() {
        return Err(FlowForgeError::PluginLoad {
            path: path.to_path_buf(),
            cause: "manifest declares no block types".to_string(),
        });
    }

    Ok(manifest)
}

/// Check an engine version against the acceptable set.
fn is_compatible_engine_version(version: &str, acceptable: &HashSet<String>) -> bool {
    !version.trim().is_empty() && !acceptable.is_empty() && acceptable.contains(version)
}
