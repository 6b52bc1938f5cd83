//! The processing unit: drives all instances on a shared cadence.
//!
//! A single cooperative worker fires [`process_tick`] with a fixed delay
//! between the end of one tick and the start of the next. Each tick drains
//! the command queue completely, then advances every ready-to-run instance.
//! At most one tick executes at any time for a given unit.
//!
//! [`process_tick`]: ProcessingUnit::process_tick

use super::command::{Command, CommandEntry};
use crate::instance::Instance;
use dashmap::DashMap;
use flowforge_core::error::{FlowForgeError, Result};
use flowforge_core::state::RunnableState;
use flowforge_core::types::{InstanceId, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Default delay between ticks.
pub const DEFAULT_PROCESSING_DELAY: Duration = Duration::from_secs(1);

/// Configuration for a processing unit.
#[derive(Debug, Clone)]
pub struct ProcessingUnitConfig {
    /// Delay between the end of one tick and the start of the next.
    pub processing_delay: Duration,
}

impl Default for ProcessingUnitConfig {
    fn default() -> Self {
        Self {
            processing_delay: DEFAULT_PROCESSING_DELAY,
        }
    }
}

impl ProcessingUnitConfig {
    /// Create configuration from environment variables.
    ///
    /// Reads `FLOWFORGE_PROCESSING_DELAY_MS`; falls back to the default of
    /// one second when unset or unparsable.
    pub fn from_env() -> Self {
        let processing_delay = std::env::var("FLOWFORGE_PROCESSING_DELAY_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PROCESSING_DELAY);

        Self { processing_delay }
    }

    /// Set the processing delay.
    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }
}

/// A row of the instance listing: enough to render an overview without
/// touching the instance again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceListItem {
    /// The instance id.
    pub instance_id: InstanceId,
    /// The owning user.
    pub owner_id: UserId,
    /// The instance name.
    pub name: String,
    /// The instance state at snapshot time.
    pub state: RunnableState,
}

struct InstanceEntry {
    instance: Arc<Mutex<Instance>>,
}

/// Shared state between the unit handle and its tick worker.
struct UnitInner {
    instances: DashMap<InstanceId, InstanceEntry>,
    command_tx: crossbeam_channel::Sender<CommandEntry>,
    command_rx: crossbeam_channel::Receiver<CommandEntry>,
}

impl UnitInner {
    /// One pass: drain commands, then advance every ready-to-run instance.
    fn process_tick(&self) {
        if self.instances.is_empty() {
            // Nothing to steer; pending commands are best-effort and dropped.
            while self.command_rx.try_recv().is_ok() {}
            return;
        }

        while let Ok(entry) = self.command_rx.try_recv() {
            self.apply_command(entry);
        }

        // Snapshot the ready instances first so no shard lock is held while
        // blocks execute.
        let runnable: Vec<Arc<Mutex<Instance>>> = self
            .instances
            .iter()
            .filter(|entry| entry.value().instance.lock().state().is_ready_to_run())
            .map(|entry| Arc::clone(&entry.value().instance))
            .collect();

        for instance in runnable {
            if let Err(error) = Self::run_instance(&instance) {
                tracing::error!(error = %error, "instance run failed; continuing tick");
            }
        }
    }

    fn apply_command(&self, entry: CommandEntry) {
        if entry.command == Command::Remove {
            if self.instances.remove(&entry.instance_id).is_some() {
                tracing::info!(instance_id = %entry.instance_id, "instance removed");
            }
            return;
        }

        let Some(target) = self
            .instances
            .get(&entry.instance_id)
            .map(|e| Arc::clone(&e.value().instance))
        else {
            // Commands for unknown instances are silently skipped.
            return;
        };

        let mut instance = target.lock();
        match entry.command {
            Command::SetReady => {
                if let Err(error) = instance.set_ready() {
                    tracing::warn!(
                        instance_id = %entry.instance_id,
                        error = %error,
                        "SET_READY rejected"
                    );
                }
            }
            Command::Pause | Command::Resume => {
                // Reserved semantics; deliberately a no-op.
            }
            Command::Stop => instance.stop(),
            Command::Abort => instance.abort(),
            Command::Reset => instance.reset(),
            Command::Remove => unreachable!("handled above"),
        }
    }

    /// Advance a single instance, failing fast when it was never configured.
    fn run_instance(instance: &Arc<Mutex<Instance>>) -> Result<()> {
        let mut guard = instance.lock();

        if guard.state() == RunnableState::NotConfigured {
            return Err(FlowForgeError::configuration_mismatch(
                "instance is not configured",
            ));
        }
        if !guard.state().is_ready_to_run() {
            return Ok(());
        }

        guard.run()
    }
}

/// Drives all registered instances at a fixed cadence and routes commands
/// to them.
pub struct ProcessingUnit {
    config: ProcessingUnitConfig,
    inner: Arc<UnitInner>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessingUnit {
    /// Create a processing unit with the given configuration.
    #[must_use]
    pub fn new(config: ProcessingUnitConfig) -> Self {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            inner: Arc::new(UnitInner {
                instances: DashMap::new(),
                command_tx,
                command_rx,
            }),
            running: AtomicBool::new(false),
            shutdown_tx,
            worker: Mutex::new(None),
        }
    }

    /// Create a processing unit with the default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ProcessingUnitConfig::default())
    }

    /// Whether the tick worker is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the tick worker. Idempotent: a second call while running
    /// returns without effect.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_processing(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("instance processing scheduler is already running");
            return;
        }

        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let delay = self.config.processing_delay;

        let handle = tokio::spawn(async move {
            loop {
                inner.process_tick();
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        });

        *self.worker.lock() = Some(handle);
        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            "instance processing scheduler started"
        );
    }

    /// Stop the tick worker.
    ///
    /// Signals shutdown, waits for natural termination up to `timeout`,
    /// then forces termination. An in-flight tick completes before the
    /// worker observes the signal.
    pub async fn stop_processing(&self, timeout: Duration) {
        if !self.running.load(Ordering::SeqCst) {
            tracing::warn!("instance processing scheduler is not running");
            return;
        }

        let _ = self.shutdown_tx.send(());

        let handle = self.worker.lock().take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("tick worker did not stop in time; aborting");
                    handle.abort();
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("instance processing scheduler stopped");
    }

    /// Add an instance to the unit.
    ///
    /// Fails with `ObjectAlreadyExists` when the id is already present; the
    /// instance map is left untouched in that case.
    pub fn add_instance(&self, instance: Instance) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        let instance_id = instance.instance_id();
        match self.inner.instances.entry(instance_id) {
            Entry::Occupied(_) => Err(FlowForgeError::ObjectAlreadyExists { instance_id }),
            Entry::Vacant(vacant) => {
                vacant.insert(InstanceEntry {
                    instance: Arc::new(Mutex::new(instance)),
                });
                tracing::info!(instance_id = %instance_id, "instance added");
                Ok(())
            }
        }
    }

    /// Number of registered instances.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.inner.instances.len()
    }

    /// Shared handle to a registered instance, for observers that register
    /// listeners or clear modified flags.
    #[must_use]
    pub fn instance(&self, instance_id: InstanceId) -> Option<Arc<Mutex<Instance>>> {
        self.inner
            .instances
            .get(&instance_id)
            .map(|entry| Arc::clone(&entry.value().instance))
    }

    /// Snapshot list of the given user's instances. Order is unspecified.
    #[must_use]
    pub fn instance_list_items(&self, user_id: UserId) -> Vec<InstanceListItem> {
        self.inner
            .instances
            .iter()
            .filter_map(|entry| {
                let instance = entry.value().instance.lock();
                (instance.user_id() == user_id).then(|| InstanceListItem {
                    instance_id: instance.instance_id(),
                    owner_id: instance.user_id(),
                    name: instance.name().to_string(),
                    state: instance.state(),
                })
            })
            .collect()
    }

    /// Enqueue a command for an instance.
    ///
    /// The id must be positive (`NullArgument` otherwise). Commands are
    /// applied at the start of the next tick, in submission order per
    /// producer; commands for instances unknown at apply time are skipped.
    pub fn put_command(&self, command: Command, instance_id: InstanceId) -> Result<()> {
        if !instance_id.is_valid() {
            return Err(FlowForgeError::null_argument(
                "instance id must be positive",
            ));
        }

        self.inner
            .command_tx
            .send(CommandEntry::new(command, instance_id))
            .map_err(|e| FlowForgeError::CommandFailed {
                command: command.to_string(),
                instance_id,
                cause: e.to_string(),
            })?;

        tracing::debug!(instance_id = %instance_id, command = %command, "command queued");
        Ok(())
    }

    /// Run one tick synchronously.
    ///
    /// The scheduled worker calls this on its cadence; tests and embedders
    /// that drive ticks themselves call it directly. Must not race with a
    /// running worker.
    pub fn process_tick(&self) {
        self.inner.process_tick();
    }
}

impl Default for ProcessingUnit {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_core::block::Block;
    use flowforge_core::params::InstanceParameters;
    use flowforge_core::testing::EchoBlock;
    use flowforge_core::types::TemplateId;

    fn test_instance(id: u64) -> Instance {
        let blocks: Vec<Box<dyn Block>> = vec![Box::new(EchoBlock::new("a", "hi"))];
        Instance::new(
            InstanceId::new(id),
            TemplateId::new(1),
            UserId::new(200),
            format!("instance-{id}"),
            InstanceParameters::empty(),
            blocks,
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let unit = ProcessingUnit::with_defaults();
        unit.add_instance(test_instance(1)).unwrap();

        let err = unit.add_instance(test_instance(1)).unwrap_err();
        assert_eq!(err.code(), "E101");
        assert_eq!(unit.instance_count(), 1);

        // The original instance is still runnable.
        unit.process_tick();
        let handle = unit.instance(InstanceId::new(1)).unwrap();
        assert_eq!(handle.lock().state(), RunnableState::Running);
    }

    #[test]
    fn put_command_validates_id() {
        let unit = ProcessingUnit::with_defaults();
        let err = unit
            .put_command(Command::Stop, InstanceId::new(0))
            .unwrap_err();
        assert_eq!(err.code(), "E001");
    }

    #[test]
    fn commands_drop_when_no_instances() {
        let unit = ProcessingUnit::with_defaults();
        unit.put_command(Command::Stop, InstanceId::new(5)).unwrap();
        unit.process_tick();

        // The queued command is gone: adding the instance afterwards and
        // ticking again must not stop it.
        unit.add_instance(test_instance(5)).unwrap();
        unit.process_tick();
        let handle = unit.instance(InstanceId::new(5)).unwrap();
        assert_eq!(handle.lock().state(), RunnableState::Running);
    }

    #[test]
    fn commands_apply_before_run_in_fifo_order() {
        let unit = ProcessingUnit::with_defaults();
        unit.add_instance(test_instance(1)).unwrap();

        // RESET then STOP before the tick: last write wins on state.
        unit.put_command(Command::Reset, InstanceId::new(1)).unwrap();
        unit.put_command(Command::Stop, InstanceId::new(1)).unwrap();
        unit.process_tick();

        let handle = unit.instance(InstanceId::new(1)).unwrap();
        assert_eq!(handle.lock().state(), RunnableState::Stopped);
    }

    #[test]
    fn remove_leaves_unit_as_if_never_added() {
        let unit = ProcessingUnit::with_defaults();
        unit.add_instance(test_instance(1)).unwrap();
        unit.put_command(Command::Remove, InstanceId::new(1)).unwrap();
        unit.process_tick();

        assert_eq!(unit.instance_count(), 0);
        assert!(unit.instance(InstanceId::new(1)).is_none());
    }

    #[test]
    fn commands_for_missing_instances_are_skipped() {
        let unit = ProcessingUnit::with_defaults();
        unit.add_instance(test_instance(1)).unwrap();
        unit.put_command(Command::Stop, InstanceId::new(99)).unwrap();
        unit.process_tick();

        let handle = unit.instance(InstanceId::new(1)).unwrap();
        assert_eq!(handle.lock().state(), RunnableState::Running);
    }

    #[test]
    fn pause_and_resume_are_noops() {
        let unit = ProcessingUnit::with_defaults();
        unit.add_instance(test_instance(1)).unwrap();
        unit.process_tick();

        unit.put_command(Command::Pause, InstanceId::new(1)).unwrap();
        unit.put_command(Command::Resume, InstanceId::new(1)).unwrap();
        unit.process_tick();

        let handle = unit.instance(InstanceId::new(1)).unwrap();
        // Still advancing normally: the echo chain completes.
        assert_eq!(handle.lock().state(), RunnableState::Done);
    }

    #[test]
    fn list_items_filter_by_owner() {
        let unit = ProcessingUnit::with_defaults();
        unit.add_instance(test_instance(1)).unwrap();
        unit.add_instance(test_instance(2)).unwrap();

        let items = unit.instance_list_items(UserId::new(200));
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.owner_id == UserId::new(200)));

        assert!(unit.instance_list_items(UserId::new(9)).is_empty());
    }

    #[test]
    fn unconfigured_instance_is_logged_not_fatal() {
        let unit = ProcessingUnit::with_defaults();
        let shell = Instance::unconfigured(
            InstanceId::new(1),
            TemplateId::new(1),
            UserId::new(200),
            "shell",
        )
        .unwrap();
        unit.add_instance(shell).unwrap();
        unit.add_instance(test_instance(2)).unwrap();

        // The unconfigured instance fails fast; the healthy one advances.
        unit.process_tick();
        let healthy = unit.instance(InstanceId::new(2)).unwrap();
        assert_eq!(healthy.lock().state(), RunnableState::Running);
    }

    #[test]
    fn config_from_env_defaults() {
        let config = ProcessingUnitConfig::default();
        assert_eq!(config.processing_delay, Duration::from_secs(1));

        let config = ProcessingUnitConfig::default()
            .with_processing_delay(Duration::from_millis(10));
        assert_eq!(config.processing_delay, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_completes() {
        let config = ProcessingUnitConfig::default()
            .with_processing_delay(Duration::from_millis(5));
        let unit = ProcessingUnit::new(config);
        unit.add_instance(test_instance(1)).unwrap();

        unit.start_processing();
        assert!(unit.is_running());
        unit.start_processing(); // no effect

        // Give the worker a few ticks to complete the echo instance.
        tokio::time::sleep(Duration::from_millis(50)).await;

        unit.stop_processing(Duration::from_millis(500)).await;
        assert!(!unit.is_running());

        let handle = unit.instance(InstanceId::new(1)).unwrap();
        assert_eq!(handle.lock().state(), RunnableState::Done);
    }

    #[tokio::test]
    async fn commands_before_start_apply_on_first_tick() {
        let config = ProcessingUnitConfig::default()
            .with_processing_delay(Duration::from_millis(5));
        let unit = ProcessingUnit::new(config);
        unit.add_instance(test_instance(1)).unwrap();
        unit.put_command(Command::Stop, InstanceId::new(1)).unwrap();

        unit.start_processing();
        tokio::time::sleep(Duration::from_millis(30)).await;
        unit.stop_processing(Duration::from_millis(500)).await;

        let handle = unit.instance(InstanceId::new(1)).unwrap();
        assert_eq!(handle.lock().state(), RunnableState::Stopped);
    }

    #[tokio::test]
    async fn stop_when_not_running_is_harmless() {
        let unit = ProcessingUnit::with_defaults();
        unit.stop_processing(Duration::from_millis(10)).await;
        assert!(!unit.is_running());
    }
}
