use crate::domain::config::{
    ChangeOrigin, ConfigChanged, ConfigError, ConfigPatch, ConfigurationRecord,
};
use crate::ports::config::ConfigStore;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// Result of a programmatic update. `persisted` is false when the store
/// rejected the write; the in-memory record is updated regardless.
#[derive(Clone, Debug, PartialEq)]
pub struct SetConfigOutcome {
    pub record: ConfigurationRecord,
    pub persisted: bool,
}

/// Owns the in-memory configuration record and fans out change events.
pub struct ConfigManager {
    store: Arc<dyn ConfigStore>,
    current: RwLock<ConfigurationRecord>,
    initialized: AtomicBool,
    // Serializes writers so persist order matches emission order.
    write_lock: Mutex<()>,
    changes: broadcast::Sender<ConfigChanged>,
}

impl ConfigManager {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            store,
            current: RwLock::new(ConfigurationRecord::default()),
            initialized: AtomicBool::new(false),
            write_lock: Mutex::new(()),
            changes,
        }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Ensures the file exists and loads it. Later calls are no-ops.
    pub async fn initialize(&self) {
        let _guard = self.write_lock.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            return;
        }
        if !self.store.ensure_exists().await {
            warn!(path = %self.store.path().display(), "config file unavailable, using defaults");
        }
        let record = self.store.load_record(ConfigurationRecord::default()).await;
        info!(
            path = %self.store.path().display(),
            port = record.port,
            configured = record.is_configured(),
            "configuration loaded"
        );
        *self.current.write().await = record;
        self.initialized.store(true, Ordering::Release);
    }

    pub async fn get_config(&self) -> ConfigurationRecord {
        self.current.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChanged> {
        self.changes.subscribe()
    }

    /// Merges `patch` into the current record, persists it, then notifies
    /// subscribers.
    pub async fn set_config(&self, patch: ConfigPatch) -> Result<SetConfigOutcome, ConfigError> {
        let _guard = self.write_lock.lock().await;
        let record = self.current.read().await.merge(&patch)?;
        let persisted = self.store.save_record(&record).await;
        if !persisted {
            warn!(
                path = %self.store.path().display(),
                "config update kept in memory only, persisting failed"
            );
        }
        *self.current.write().await = record.clone();
        self.emit(ConfigChanged::new(
            record.clone(),
            ChangeOrigin::Programmatic,
        ));
        Ok(SetConfigOutcome { record, persisted })
    }

    /// Re-reads the store and emits an external change when the record on
    /// disk differs from memory.
    pub async fn reload_from_store(&self) -> bool {
        let _guard = self.write_lock.lock().await;
        let current = self.current.read().await.clone();
        let loaded = self.store.load_record(current.clone()).await;
        if loaded == current {
            debug!("config file reloaded without changes");
            return false;
        }
        info!(port = loaded.port, "configuration changed on disk");
        *self.current.write().await = loaded.clone();
        self.emit(ConfigChanged::new(loaded, ChangeOrigin::External));
        true
    }

    fn emit(&self, change: ConfigChanged) {
        let origin = change.origin.as_str();
        match self.changes.send(change) {
            Ok(receivers) => debug!(origin, receivers, "config change broadcast"),
            Err(_) => debug!(origin, "config change dropped, no subscribers"),
        }
    }
}
