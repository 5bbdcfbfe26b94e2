mod backup;
mod restore;
mod sweep;
mod verify;

pub use restore::RestoreResult;

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use log::{info, warn};
use tokio::{
    sync::{Mutex, RwLock, Semaphore},
    task::JoinHandle,
};

use crate::{
    compression::{compress, decompress},
    config::BackupConfig,
    error::{Error, Result},
    metadata::{BackupId, BackupMetadata, BackupStatus, BackupType},
    notify::{AuditAction, AuditOutcome, AuditRecord, AuditSink, NotificationSink},
    pipeline::{Apply, Collector},
    registry::MetadataStore,
    serde::{deserialize, serialize},
    stats::BackupStatistics,
    storage::{LocalStore, INDEX_FILE},
    task::{BackupTask, OperationHandle, TaskStatus},
};

// Soft caller-side wait bounds; a timed-out wait never cancels the operation.
pub const BACKUP_WAIT_LIMIT: Duration = Duration::from_secs(10 * 60);
pub const RESTORE_WAIT_LIMIT: Duration = Duration::from_secs(15 * 60);

const INDEX_COMPRESSION_LEVEL: u8 = 3;

pub type BackupHandle = OperationHandle<BackupMetadata>;
pub type RestoreHandle = OperationHandle<RestoreResult>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupFilter {
    All,
    ByStatus(BackupStatus),
    ByType(BackupType),
    Expired,
}

pub(crate) struct EngineState {
    pub(crate) config: BackupConfig,
    pub(crate) store: LocalStore,
    pub(crate) registry: RwLock<MetadataStore>,
    pub(crate) stats: RwLock<BackupStatistics>,
    pub(crate) tasks: RwLock<HashMap<BackupId, Arc<BackupTask>>>,
    pub(crate) workers: Semaphore,
    pub(crate) index_lock: Mutex<()>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) audit: Option<Arc<dyn AuditSink>>,
}

// The orchestrator. Owned by the application's composition root and handed
// to callers by reference; there is no global instance.
#[derive(Clone)]
pub struct BackupEngine {
    state: Arc<EngineState>,
}

impl BackupEngine {
    pub async fn open(
        config: BackupConfig,
        notifier: Arc<dyn NotificationSink>,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Result<Self> {
        let store = LocalStore::open(&config.storage_dir).await?;
        let mut registry = load_index(&store).await;
        fail_interrupted(&mut registry);
        info!(
            "opened backup engine at {} with {} known backups",
            config.storage_dir.display(),
            registry.len()
        );

        let workers = Semaphore::new(config.max_concurrent);
        let state = Arc::new(EngineState {
            store,
            registry: RwLock::new(registry),
            stats: RwLock::new(BackupStatistics::new()),
            tasks: RwLock::new(HashMap::new()),
            workers,
            index_lock: Mutex::new(()),
            notifier,
            audit,
            config,
        });
        Ok(BackupEngine { state })
    }

    pub async fn create_backup(
        &self,
        backup_type: BackupType,
        requested_by: &str,
        description: &str,
        collector: Collector,
    ) -> Result<BackupHandle> {
        backup::create(
            self.state.clone(),
            backup_type,
            requested_by,
            description,
            collector,
        )
        .await
    }

    // Preconditions and pipeline failures resolve to a failed RestoreResult;
    // the handle itself never errors for those. Passing a safety collector
    // takes an emergency backup first and fails closed if that backup fails.
    pub fn restore(
        &self,
        id: BackupId,
        restored_by: &str,
        safety_collector: Option<Collector>,
        apply: Apply,
    ) -> RestoreHandle {
        restore::start(
            self.state.clone(),
            id,
            restored_by.to_owned(),
            safety_collector,
            apply,
        )
    }

    pub async fn list_backups(&self, filter: BackupFilter) -> Vec<BackupMetadata> {
        let registry = self.state.registry.read().await;
        match filter {
            BackupFilter::All => registry.all(),
            BackupFilter::ByStatus(status) => registry.by_status(status),
            BackupFilter::ByType(backup_type) => registry.by_type(backup_type),
            BackupFilter::Expired => registry.expired_at(Utc::now()),
        }
    }

    pub async fn get(&self, id: BackupId) -> Option<BackupMetadata> {
        self.state.registry.read().await.get(&id).cloned()
    }

    pub async fn verify(&self, id: BackupId) -> Result<bool> {
        verify::verify(&self.state, id).await
    }

    pub async fn delete(&self, id: BackupId) -> Result<bool> {
        let state = &self.state;
        if state.tasks.read().await.contains_key(&id) {
            return Err(Error::BackupInFlight(id));
        }

        let Some(metadata) = state.registry.read().await.get(&id).cloned() else {
            return Ok(false);
        };

        state.store.delete(&metadata.file_name).await?;
        let _ = state.registry.write().await.remove(&id);
        save_index(state).await;
        record_audit(
            state,
            "system",
            AuditAction::Delete,
            id,
            AuditOutcome::Success,
        )
        .await;
        info!("deleted backup {id}");
        Ok(true)
    }

    pub async fn clean_expired(&self) -> Result<usize> {
        sweep::clean_expired(&self.state).await
    }

    pub fn spawn_expiry_sweep(&self, every: Duration) -> JoinHandle<()> {
        sweep::spawn(self.state.clone(), every)
    }

    pub async fn active_tasks(&self) -> Vec<TaskStatus> {
        let tasks = self.state.tasks.read().await;
        let mut statuses = tasks.values().map(|task| task.status()).collect::<Vec<_>>();
        statuses.sort_by_key(|status| status.id);
        statuses
    }

    pub async fn cancel(&self, id: BackupId) -> bool {
        if let Some(task) = self.state.tasks.read().await.get(&id) {
            task.cancel();
            info!("requested cancellation of backup {id}");
            true
        } else {
            false
        }
    }

    pub async fn statistics(&self) -> BackupStatistics {
        self.state.stats.read().await.clone()
    }
}

// A non-terminal record in the loaded index means the process died mid-run;
// no worker owns it anymore.
fn fail_interrupted(registry: &mut MetadataStore) {
    for metadata in registry.all() {
        if !metadata.status.is_terminal() {
            warn!("backup {} was interrupted by a restart", metadata.id);
            if let Some(record) = registry.get_mut(&metadata.id) {
                record.fail("interrupted by process restart".to_owned());
            }
        }
    }
}

async fn load_index(store: &LocalStore) -> MetadataStore {
    match store.try_read(INDEX_FILE).await {
        Ok(Some(bytes)) => match decompress(&bytes).and_then(|bytes| deserialize(&bytes)) {
            Ok(registry) => registry,
            Err(err) => {
                warn!("backup index is unreadable, starting empty: {err}");
                MetadataStore::new()
            }
        },
        Ok(None) => MetadataStore::new(),
        Err(err) => {
            warn!("backup index could not be read, starting empty: {err}");
            MetadataStore::new()
        }
    }
}

// Best-effort registry persistence; a failed save costs durability across a
// restart, not correctness of the running engine.
pub(crate) async fn save_index(state: &EngineState) {
    let _guard = state.index_lock.lock().await;
    let bytes = {
        let registry = state.registry.read().await;
        serialize(&*registry).and_then(|bytes| compress(&bytes, INDEX_COMPRESSION_LEVEL))
    };

    match bytes {
        Ok(bytes) => {
            if let Err(err) = state.store.write_atomic(INDEX_FILE, &bytes).await {
                warn!("failed to persist backup index: {err}");
            }
        }
        Err(err) => warn!("failed to encode backup index: {err}"),
    }
}

pub(crate) async fn record_audit(
    state: &EngineState,
    actor: &str,
    action: AuditAction,
    id: BackupId,
    outcome: AuditOutcome,
) {
    if let Some(sink) = &state.audit {
        sink.record(AuditRecord::new(actor, action, id.to_string(), outcome))
            .await;
    }
}
