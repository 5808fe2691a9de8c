//! Supervisor of all listener sessions.
//!
//! The device registry, the active sessions and the status table live behind
//! one lock. The lock is never held across an `await`: sessions are started
//! and stopped outside of it and the table is updated afterwards.
//!
//! Each launched session gets a generation number. Its status callback only
//! touches the table while that generation is still the registered one, so a
//! superseded session cannot overwrite the state of its successor.

use crate::alert::Notifier;
use crate::session::{ListenerSession, StatusCallback};
use crate::settings::SessionSettings;
use labgate_core::{DeviceConfig, DeviceRecord, DisplayRecord, SessionStatus};
use labgate_storage::{LabStore, StorageResult};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{info, warn};

/// Result of a start or stop request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
    pub state: SessionStatus,
}

impl CommandOutcome {
    fn ok(message: impl Into<String>, state: SessionStatus) -> Self {
        Self {
            success: true,
            message: message.into(),
            state,
        }
    }

    fn failed(message: impl Into<String>, state: SessionStatus) -> Self {
        Self {
            success: false,
            message: message.into(),
            state,
        }
    }
}

struct ActiveSession<S> {
    generation: u64,
    session: Arc<ListenerSession<S>>,
}

struct Registry<S> {
    devices: BTreeMap<String, DeviceRecord>,
    display: Vec<DisplayRecord>,
    sessions: HashMap<String, ActiveSession<S>>,
    statuses: BTreeMap<String, SessionStatus>,
    next_generation: u64,
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self {
            devices: BTreeMap::new(),
            display: Vec::new(),
            sessions: HashMap::new(),
            statuses: BTreeMap::new(),
            next_generation: 0,
        }
    }
}

impl<S> Registry<S> {
    fn status(&self, name: &str) -> SessionStatus {
        self.statuses.get(name).copied().unwrap_or_default()
    }

    fn is_active(&self, name: &str) -> bool {
        self.sessions.contains_key(name) && self.status(name).is_active()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns every listener session of the gateway.
pub struct Supervisor<S> {
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    settings: SessionSettings,
    registry: Arc<Mutex<Registry<S>>>,
}

impl<S: LabStore> Supervisor<S> {
    pub fn new(store: Arc<S>, notifier: Arc<dyn Notifier>, settings: SessionSettings) -> Self {
        Self {
            store,
            notifier,
            settings,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry<S>> {
        lock(&self.registry)
    }

    /// Re-read the device rows. Sessions of devices that disappeared are
    /// stopped and discarded.
    ///
    /// # Errors
    /// Returns the storage error when the device rows cannot be read; the
    /// registry is left as it was.
    pub async fn reload(&self) -> StorageResult<usize> {
        let records = self.store.get_devices().await?;

        let removed: Vec<Arc<ListenerSession<S>>> = {
            let mut registry = self.registry();

            registry.devices = records
                .into_iter()
                .filter(|record| !record.machine_name.trim().is_empty())
                .map(|record| (record.machine_name.trim().to_string(), record))
                .collect();
            registry.display = registry
                .devices
                .values()
                .map(DisplayRecord::from_record)
                .collect();

            let gone: Vec<String> = registry
                .sessions
                .keys()
                .filter(|name| !registry.devices.contains_key(*name))
                .cloned()
                .collect();
            let removed = gone
                .iter()
                .filter_map(|name| registry.sessions.remove(name))
                .map(|active| active.session)
                .collect();

            let Registry {
                devices, statuses, ..
            } = &mut *registry;
            statuses.retain(|name, _| devices.contains_key(name));
            for name in devices.keys() {
                statuses.entry(name.clone()).or_default();
            }
            removed
        };

        for session in removed {
            info!(machine = %session.machine_id(), "Device removed, stopping listener");
            if let Err(e) = session.stop().await {
                warn!(machine = %session.machine_id(), error = %e, "Stop of removed device failed");
            }
        }

        let count = self.registry().devices.len();
        info!(devices = count, "Device registry reloaded");
        Ok(count)
    }

    /// Reload only when no device is known yet.
    pub async fn ensure_loaded(&self) -> StorageResult<()> {
        if self.registry().devices.is_empty() {
            self.reload().await?;
        }
        Ok(())
    }

    /// Start the listener of device `name`.
    pub async fn start(&self, name: &str) -> CommandOutcome {
        let session = {
            let mut registry = self.registry();

            let Some(record) = registry.devices.get(name).cloned() else {
                return CommandOutcome::failed(
                    format!("Unknown device: {name}"),
                    SessionStatus::Stopped,
                );
            };
            if registry.is_active(name) {
                return CommandOutcome::ok(
                    format!("{name} is already active"),
                    registry.status(name),
                );
            }

            let config = match DeviceConfig::from_record(&record) {
                Ok(config) => config,
                Err(e) => {
                    let message = format!("Invalid configuration for {name}: {e}");
                    self.notifier
                        .notify_error(&record.effective_id(), &message);
                    registry.statuses.insert(name.to_string(), SessionStatus::Stopped);
                    return CommandOutcome::failed(message, SessionStatus::Stopped);
                }
            };

            let generation = registry.next_generation;
            registry.next_generation += 1;

            let callback = self.status_callback(name, generation);
            let session = Arc::new(ListenerSession::with_callback(
                config,
                Arc::clone(&self.store),
                Arc::clone(&self.notifier),
                self.settings,
                Some(callback),
            ));
            registry.sessions.insert(
                name.to_string(),
                ActiveSession {
                    generation,
                    session: Arc::clone(&session),
                },
            );
            registry.statuses.insert(name.to_string(), SessionStatus::Starting);
            session
        };

        match session.start().await {
            Ok(()) => {
                let state = self.registry().status(name);
                CommandOutcome::ok(format!("{name} started"), state)
            }
            Err(e) => CommandOutcome::failed(
                format!("Failed to start {name}: {e}"),
                self.registry().status(name),
            ),
        }
    }

    /// Stop the listener of device `name`.
    ///
    /// Fails without touching anything when the device has no active
    /// session. Otherwise the device is marked `Stopped` even if the
    /// session could not be stopped cleanly.
    pub async fn stop(&self, name: &str) -> CommandOutcome {
        let session = {
            let mut registry = self.registry();
            if !registry.is_active(name) {
                return CommandOutcome::failed(
                    format!("{name} is not active"),
                    registry.status(name),
                );
            }
            match registry.sessions.remove(name) {
                Some(active) => active.session,
                None => {
                    return CommandOutcome::failed(
                        format!("{name} is not active"),
                        registry.status(name),
                    );
                }
            }
        };

        let result = session.stop().await;
        self.registry()
            .statuses
            .insert(name.to_string(), SessionStatus::Stopped);

        match result {
            Ok(()) => CommandOutcome::ok(format!("{name} stopped"), SessionStatus::Stopped),
            Err(e) => {
                warn!(machine = %session.machine_id(), error = %e, "Stop raised an error");
                CommandOutcome::ok(
                    format!("{name} stopped with error: {e}"),
                    SessionStatus::Stopped,
                )
            }
        }
    }

    /// Stop every active session.
    pub async fn stop_all(&self) -> Vec<CommandOutcome> {
        let names: Vec<String> = self.registry().sessions.keys().cloned().collect();
        let mut outcomes = Vec::with_capacity(names.len());
        for name in names {
            outcomes.push(self.stop(&name).await);
        }
        outcomes
    }

    /// Display records of all known devices, ordered by name.
    pub fn configs(&self) -> Vec<DisplayRecord> {
        self.registry().display.clone()
    }

    /// Status of every known device.
    pub fn statuses(&self) -> BTreeMap<String, SessionStatus> {
        self.registry().statuses.clone()
    }

    pub fn status(&self, name: &str) -> SessionStatus {
        self.registry().status(name)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.registry().status(name) == SessionStatus::Running
    }

    /// Number of sessions currently registered as active.
    pub fn active_count(&self) -> usize {
        self.registry().sessions.len()
    }

    /// Machine id to device name.
    pub fn machine_name_map(&self) -> HashMap<String, String> {
        self.registry()
            .devices
            .iter()
            .map(|(name, record)| (record.effective_id(), name.clone()))
            .collect()
    }

    /// Bound address of a running TCP session.
    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.registry()
            .sessions
            .get(name)
            .and_then(|active| active.session.local_addr())
    }

    fn status_callback(&self, name: &str, generation: u64) -> StatusCallback {
        let registry: Weak<Mutex<Registry<S>>> = Arc::downgrade(&self.registry);
        let name = name.to_string();

        Arc::new(move |machine_id: &str, status: SessionStatus| {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let mut registry = lock(&registry);

            let current = registry
                .sessions
                .get(&name)
                .is_some_and(|active| active.generation == generation);
            if !current {
                return;
            }

            info!(machine = machine_id, device = %name, %status, "Listener status changed");
            registry.statuses.insert(name.clone(), status);
            if status == SessionStatus::Stopped {
                registry.sessions.remove(&name);
            }
        })
    }
}

impl<S> std::fmt::Debug for Supervisor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{ChannelNotifier, NoopNotifier};
    use labgate_storage::MemoryLabStore;
    use std::time::Duration;

    fn tcp_device(name: &str) -> DeviceRecord {
        let mut record = DeviceRecord::new(name, "0", "127.0.0.1");
        record.machine_id = Some(format!("ID-{name}"));
        record
    }

    fn supervisor(store: MemoryLabStore) -> Supervisor<MemoryLabStore> {
        Supervisor::new(
            Arc::new(store),
            Arc::new(NoopNotifier),
            SessionSettings::default()
                .read_timeout(Duration::from_millis(100))
                .stop_timeout(Duration::from_secs(1)),
        )
    }

    #[tokio::test]
    async fn test_start_twice_keeps_one_session() {
        let sup = supervisor(MemoryLabStore::new().with_device(tcp_device("Cobas")));
        sup.reload().await.unwrap();

        let first = sup.start("Cobas").await;
        let second = sup.start("Cobas").await;

        assert!(first.success, "{}", first.message);
        assert!(second.success);
        assert_eq!(second.state, SessionStatus::Running);
        assert_eq!(sup.active_count(), 1);
        assert!(sup.is_running("Cobas"));

        sup.stop_all().await;
    }

    #[tokio::test]
    async fn test_stop_inactive_fails_without_mutation() {
        let sup = supervisor(
            MemoryLabStore::new()
                .with_device(tcp_device("Cobas"))
                .with_device(tcp_device("Sysmex")),
        );
        sup.reload().await.unwrap();
        assert!(sup.start("Sysmex").await.success);

        let before = sup.statuses();
        let outcome = sup.stop("Cobas").await;

        assert!(!outcome.success);
        assert_eq!(sup.statuses(), before);
        assert_eq!(sup.active_count(), 1);

        sup.stop_all().await;
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let sup = supervisor(MemoryLabStore::new());
        sup.reload().await.unwrap();

        let outcome = sup.start("Ghost").await;
        assert!(!outcome.success);
        assert_eq!(outcome.state, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_config_alerts() {
        let (notifier, mut alerts) = ChannelNotifier::new(4);
        let store = MemoryLabStore::new().with_device(DeviceRecord::new("Broken", "COM3", "fast"));
        let sup = Supervisor::new(Arc::new(store), Arc::new(notifier), SessionSettings::default());
        sup.reload().await.unwrap();

        let outcome = sup.start("Broken").await;
        assert!(!outcome.success);
        assert_eq!(sup.status("Broken"), SessionStatus::Stopped);
        assert_eq!(sup.active_count(), 0);
        assert_eq!(alerts.try_recv().unwrap().machine_id, "Broken");
    }

    #[tokio::test]
    async fn test_stop_marks_stopped() {
        let sup = supervisor(MemoryLabStore::new().with_device(tcp_device("Cobas")));
        sup.reload().await.unwrap();
        sup.start("Cobas").await;

        let outcome = sup.stop("Cobas").await;
        assert!(outcome.success);
        assert_eq!(sup.status("Cobas"), SessionStatus::Stopped);
        assert_eq!(sup.active_count(), 0);
        assert!(sup.local_addr("Cobas").is_none());
    }

    #[tokio::test]
    async fn test_reload_drops_removed_device() {
        let store = Arc::new(MemoryLabStore::new().with_device(tcp_device("Cobas")));
        let sup = Supervisor::new(
            Arc::clone(&store),
            Arc::new(NoopNotifier),
            SessionSettings::default().stop_timeout(Duration::from_secs(1)),
        );
        sup.reload().await.unwrap();
        assert!(sup.start("Cobas").await.success);

        store.set_devices(vec![tcp_device("Sysmex")]);
        assert_eq!(sup.reload().await.unwrap(), 1);

        assert_eq!(sup.active_count(), 0);
        let statuses = sup.statuses();
        assert!(!statuses.contains_key("Cobas"));
        assert_eq!(statuses["Sysmex"], SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_registry_queries() {
        let store = MemoryLabStore::new()
            .with_device(tcp_device("Cobas"))
            .with_device(DeviceRecord::new("Sysmex", "com3", "9600,N,8,1"));
        let sup = supervisor(store);
        sup.ensure_loaded().await.unwrap();

        let configs = sup.configs();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[1].protocol, "AUTO-Serial");
        assert_eq!(configs[1].port_display, "COM: COM3 - 9600,N,8,1");

        let names = sup.machine_name_map();
        assert_eq!(names["ID-Cobas"], "Cobas");
        assert_eq!(names["Sysmex"], "Sysmex");
    }
}
