//! WASM-backed blocks and the host<->guest bridge.
//!
//! A plugin archive is a WebAssembly module with a small text ABI:
//!
//! - exports `memory`, `ffb_alloc(size: u32) -> u32`,
//!   `ffb_manifest() -> u64` (implementation archives only) and
//!   `ffb_process(ptr: u32, len: u32) -> u64`;
//! - `u64` returns pack a guest pointer and length as `ptr << 32 | len`;
//!   `ffb_process` returns `0` while the block still has work left;
//! - imports the `flowforge` host namespace: `ffb_log(level, ptr, len)` and
//!   `ffb_fail(ptr, len)`.
//!
//! The host instantiates one session per block; the session lives until the
//! block is reset, stopped, or aborted.

use super::ctor::select_signature;
use super::runtime::{CompiledModule, PluginRuntime};
use flowforge_core::args::{CtorArg, ParamKind};
use flowforge_core::block::{Block, BlockCore};
use flowforge_core::builder::BlockBuilderService;
use flowforge_core::error::{FlowForgeError, Result};
use flowforge_core::state::RunnableState;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wasmtime::{Caller, Engine, Extern, Linker, Memory, Store, TypedFunc};

/// Manifest declared by an implementation archive.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    /// The engine version the archive was built against.
    pub engine_version: String,
    /// The block type ids the archive provides builders for.
    pub block_types: Vec<String>,
}

/// State available to host functions during guest calls.
pub struct HostState {
    plugin_name: String,
    context: String,
    error_message: Option<String>,
}

impl HostState {
    fn new(plugin_name: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            context: context.into(),
            error_message: None,
        }
    }
}

/// Split a packed `ptr << 32 | len` guest return value.
const fn unpack_ptr_len(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, packed as u32)
}

fn read_guest_string(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> Option<String> {
    let memory = match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => memory,
        _ => return None,
    };
    let data = memory.data(&caller);
    let bytes = data.get(ptr as usize..ptr.checked_add(len)? as usize)?;
    String::from_utf8(bytes.to_vec()).ok()
}

/// Build a linker carrying the `flowforge` host namespace.
///
/// This is the parent-loader surface every plugin sees: structured logging
/// routed through the host, and a failure channel that surfaces as a block
/// execution error.
fn create_linker(engine: &Engine) -> Result<Linker<HostState>> {
    let mut linker = Linker::new(engine);

    linker
        .func_wrap(
            "flowforge",
            "ffb_log",
            |mut caller: Caller<'_, HostState>, level: u32, ptr: u32, len: u32| {
                let message = read_guest_string(&mut caller, ptr, len).unwrap_or_default();
                let state = caller.data();
                match level {
                    0 | 1 => tracing::debug!(
                        plugin = %state.plugin_name,
                        context = %state.context,
                        "{message}"
                    ),
                    2 => tracing::info!(
                        plugin = %state.plugin_name,
                        context = %state.context,
                        "{message}"
                    ),
                    3 => tracing::warn!(
                        plugin = %state.plugin_name,
                        context = %state.context,
                        "{message}"
                    ),
                    _ => tracing::error!(
                        plugin = %state.plugin_name,
                        context = %state.context,
                        "{message}"
                    ),
                }
            },
        )
        .map_err(|e| {
            FlowForgeError::configuration_mismatch(format!("failed to register ffb_log: {e}"))
        })?;

    linker
        .func_wrap(
            "flowforge",
            "ffb_fail",
            |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| {
                let message = read_guest_string(&mut caller, ptr, len)
                    .unwrap_or_else(|| "unknown plugin failure".to_string());
                caller.data_mut().error_message = Some(message);
            },
        )
        .map_err(|e| {
            FlowForgeError::configuration_mismatch(format!("failed to register ffb_fail: {e}"))
        })?;

    Ok(linker)
}

/// A live guest instance bound to one block (or one manifest probe).
pub(crate) struct WasmSession {
    store: Store<HostState>,
    instance: wasmtime::Instance,
    memory: Memory,
    alloc_fn: TypedFunc<u32, u32>,
    origin: PathBuf,
}

impl WasmSession {
    /// Instantiate a module with the host namespace and the plugin's
    /// dependency archives registered under their file stems.
    pub(crate) fn instantiate(
        runtime: &PluginRuntime,
        module: &CompiledModule,
        deps: &[(String, Arc<CompiledModule>)],
        origin: &Path,
        plugin_name: &str,
        context: &str,
    ) -> Result<Self> {
        let plugin_load = |cause: String| FlowForgeError::PluginLoad {
            path: origin.to_path_buf(),
            cause,
        };

        let mut store = Store::new(runtime.engine(), HostState::new(plugin_name, context));
        if let Some(fuel) = runtime.initial_fuel() {
            store
                .set_fuel(fuel)
                .map_err(|e| plugin_load(format!("failed to set fuel: {e}")))?;
        }

        let mut linker = create_linker(runtime.engine())?;
        for (name, dep) in deps {
            linker
                .module(&mut store, name, dep.module())
                .map_err(|e| plugin_load(format!("failed to link dependency '{name}': {e}")))?;
        }

        let instance = linker
            .instantiate(&mut store, module.module())
            .map_err(|e| plugin_load(format!("failed to instantiate module: {e}")))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| plugin_load("module does not export 'memory'".to_string()))?;

        let alloc_fn = instance
            .get_typed_func::<u32, u32>(&mut store, "ffb_alloc")
            .map_err(|e| plugin_load(format!("module does not export 'ffb_alloc': {e}")))?;

        Ok(Self {
            store,
            instance,
            memory,
            alloc_fn,
            origin: origin.to_path_buf(),
        })
    }

    fn plugin_load(&self, cause: String) -> FlowForgeError {
        FlowForgeError::PluginLoad {
            path: self.origin.clone(),
            cause,
        }
    }

    /// Copy bytes into guest memory via `ffb_alloc`.
    fn copy_to_guest(&mut self, data: &[u8]) -> Result<(u32, u32)> {
        if data.is_empty() {
            return Ok((0, 0));
        }

        let size = data.len() as u32;
        let offset = self
            .alloc_fn
            .call(&mut self.store, size)
            .map_err(|e| self.plugin_load(format!("guest allocation failed: {e}")))?;

        let origin = self.origin.clone();
        let memory_data = self.memory.data_mut(&mut self.store);
        let dest = memory_data
            .get_mut(offset as usize..(offset + size) as usize)
            .ok_or_else(|| FlowForgeError::PluginLoad {
                path: origin,
                cause: format!(
                    "guest allocation out of bounds: offset={offset}, size={size}"
                ),
            })?;
        dest.copy_from_slice(data);
        Ok((offset, size))
    }

    /// Read a packed string return value out of guest memory.
    fn read_packed(&self, packed: u64) -> Result<String> {
        let (ptr, len) = unpack_ptr_len(packed);
        let data = self.memory.data(&self.store);
        let bytes = data
            .get(ptr as usize..(ptr as usize + len as usize))
            .ok_or_else(|| {
                self.plugin_load(format!(
                    "invalid guest memory range: ptr={ptr}, len={len}"
                ))
            })?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| self.plugin_load(format!("guest returned invalid UTF-8: {e}")))
    }

    /// Call `ffb_manifest` and return the raw manifest JSON.
    pub(crate) fn call_manifest(&mut self) -> Result<String> {
        let manifest_fn = self
            .instance
            .get_typed_func::<(), u64>(&mut self.store, "ffb_manifest")
            .map_err(|e| self.plugin_load(format!("module does not export 'ffb_manifest': {e}")))?;

        let packed = manifest_fn
            .call(&mut self.store, ())
            .map_err(|e| self.plugin_load(format!("manifest call failed: {e}")))?;
        if packed == 0 {
            return Err(self.plugin_load("manifest call returned nothing".to_string()));
        }
        self.read_packed(packed)
    }

    /// Call `ffb_process` with the block's input text.
    ///
    /// Returns `Ok(None)` while the guest still has work left, `Ok(Some)`
    /// with the result text once it completes.
    pub(crate) fn call_process(&mut self, input: &str) -> Result<Option<String>> {
        let process_fn = self
            .instance
            .get_typed_func::<(u32, u32), u64>(&mut self.store, "ffb_process")
            .map_err(|e| self.plugin_load(format!("module does not export 'ffb_process': {e}")))?;

        let (ptr, len) = self.copy_to_guest(input.as_bytes())?;
        let packed = process_fn
            .call(&mut self.store, (ptr, len))
            .map_err(|e| self.plugin_load(format!("process call failed: {e}")))?;

        if packed == 0 {
            Ok(None)
        } else {
            self.read_packed(packed).map(Some)
        }
    }

    /// Take the failure message recorded by `ffb_fail`, if any.
    pub(crate) fn take_error(&mut self) -> Option<String> {
        self.store.data_mut().error_message.take()
    }
}

/// A block whose work function lives in a plugin module.
///
/// The host side owns the full lifecycle state machine; the guest only sees
/// text in and text out through `ffb_process`.
pub struct WasmBlock {
    core: BlockCore,
    runtime: Arc<PluginRuntime>,
    module: Arc<CompiledModule>,
    deps: Arc<Vec<(String, Arc<CompiledModule>)>>,
    origin: PathBuf,
    plugin_name: String,
    session: Option<WasmSession>,
}

impl std::fmt::Debug for WasmBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmBlock")
            .field("core", &self.core)
            .field("origin", &self.origin)
            .field("plugin_name", &self.plugin_name)
            .finish_non_exhaustive()
    }
}

impl WasmBlock {
    fn execution_error(&self, cause: String) -> FlowForgeError {
        FlowForgeError::BlockExecution {
            internal_block_id: self.core.internal_block_id().to_string(),
            cause,
        }
    }
}

impl Block for WasmBlock {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn run(&mut self) -> Result<()> {
        self.core.begin_run();
        if self.core.state() != RunnableState::Running {
            return Ok(());
        }

        if self.session.is_none() {
            let session = WasmSession::instantiate(
                &self.runtime,
                &self.module,
                &self.deps,
                &self.origin,
                &self.plugin_name,
                self.core.internal_block_id(),
            );
            match session {
                Ok(session) => self.session = Some(session),
                Err(error) => return Err(self.execution_error(error.to_string())),
            }
        }

        let input = self.core.input_text().to_string();
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let outcome = session.call_process(&input);
        let guest_failure = session.take_error();

        match outcome {
            Err(error) => {
                // The session trapped; a fresh one is built on the next run.
                self.session = None;
                Err(self.execution_error(error.to_string()))
            }
            Ok(_) if guest_failure.is_some() => {
                self.session = None;
                Err(self.execution_error(guest_failure.unwrap_or_default()))
            }
            Ok(None) => Ok(()),
            Ok(Some(result)) => {
                self.core.set_result_text(result);
                self.core.set_state(RunnableState::Done);
                Ok(())
            }
        }
    }

    fn stop(&mut self) {
        self.session = None;
        self.core.set_state(RunnableState::Stopped);
    }

    fn abort(&mut self) {
        self.session = None;
        self.core.set_state(RunnableState::Aborted);
    }

    fn reset(&mut self) {
        self.session = None;
        self.core.reset();
    }
}

/// Builder service backed by one implementation archive.
pub struct WasmBuilderService {
    plugin_name: String,
    origin: PathBuf,
    manifest: PluginManifest,
    module: Arc<CompiledModule>,
    deps: Arc<Vec<(String, Arc<CompiledModule>)>>,
    runtime: Arc<PluginRuntime>,
}

impl WasmBuilderService {
    pub(crate) fn new(
        plugin_name: impl Into<String>,
        origin: PathBuf,
        manifest: PluginManifest,
        module: Arc<CompiledModule>,
        deps: Arc<Vec<(String, Arc<CompiledModule>)>>,
        runtime: Arc<PluginRuntime>,
    ) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            origin,
            manifest,
            module,
            deps,
            runtime,
        }
    }

    /// The plugin subdirectory this service came from.
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }
}

impl BlockBuilderService for WasmBuilderService {
    fn expected_engine_version(&self) -> &str {
        &self.manifest.engine_version
    }

    fn supported_block_type_ids(&self) -> Vec<String> {
        self.manifest.block_types.clone()
    }

    fn constructor_signatures(&self) -> Vec<Vec<ParamKind>> {
        vec![
            vec![ParamKind::Str],
            vec![ParamKind::Str, ParamKind::Str],
        ]
    }

    fn build_block(&self, block_type_id: &str, args: &[CtorArg]) -> Result<Box<dyn Block>> {
        let instantiation = |cause: String| FlowForgeError::Instantiation {
            block_type_id: block_type_id.to_string(),
            cause,
        };

        let signature = select_signature(&self.constructor_signatures(), args)
            .ok_or_else(|| instantiation("no constructor matches the argument list".to_string()))?;

        let internal_block_id = args[0]
            .as_str()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| instantiation("internal block id must be a non-blank string".to_string()))?;

        let default_input_text = if signature == 1 {
            args[1].as_str().unwrap_or_default()
        } else {
            ""
        };

        Ok(Box::new(WasmBlock {
            core: BlockCore::new(block_type_id, internal_block_id, default_input_text),
            runtime: Arc::clone(&self.runtime),
            module: Arc::clone(&self.module),
            deps: Arc::clone(&self.deps),
            origin: self.origin.clone(),
            plugin_name: self.plugin_name.clone(),
            session: None,
        }))
    }
}
