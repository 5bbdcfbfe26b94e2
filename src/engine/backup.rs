use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::oneshot;

use crate::{
    error::{Error, Result},
    metadata::{BackupId, BackupMetadata, BackupType},
    notify::{AuditAction, AuditOutcome, Category, Notification, Priority},
    pipeline::{self, Collector},
    stats::format_size,
    task::{BackupTask, OperationHandle},
};

use super::{record_audit, save_index, verify, BackupHandle, EngineState};

pub(super) async fn create(
    state: Arc<EngineState>,
    requested_type: BackupType,
    requested_by: &str,
    description: &str,
    collector: Collector,
) -> Result<BackupHandle> {
    // Admission happens before any metadata exists; a rejected request
    // leaves no trace.
    let (metadata, task) = {
        let mut tasks = state.tasks.write().await;
        if tasks.len() >= state.config.max_concurrent {
            return Err(Error::TooManyActiveBackups(state.config.max_concurrent));
        }

        let (backup_type, parent_id) = resolve_type(&state, requested_type).await;
        let metadata =
            BackupMetadata::new(backup_type, requested_by, description, parent_id, &state.config);
        let task = Arc::new(BackupTask::new(metadata.id));
        tasks.insert(metadata.id, task.clone());
        (metadata, task)
    };

    let id = metadata.id;
    state.registry.write().await.insert(metadata.clone());

    info!(
        "starting {} backup {id} for {requested_by}",
        metadata.backup_type
    );
    record_audit(
        &state,
        requested_by,
        AuditAction::Create,
        id,
        AuditOutcome::Success,
    )
    .await;
    state.notifier.notify(start_notification(&metadata)).await;

    let (sender, receiver) = oneshot::channel();
    let job_state = state.clone();
    tokio::spawn(async move {
        let metadata = run_job(job_state.clone(), metadata, task, collector).await;
        job_state.tasks.write().await.remove(&id);
        let _ = sender.send(metadata);
    });

    Ok(OperationHandle::new(id, receiver))
}

// An incremental backup needs a completed full backup to delta against; with
// none on record the request downgrades to a full backup, which is an
// informational outcome rather than an error.
async fn resolve_type(
    state: &EngineState,
    requested: BackupType,
) -> (BackupType, Option<BackupId>) {
    if !requested.profile().requires_parent {
        return (requested, None);
    }

    match state.registry.read().await.latest_completed_full() {
        Some(parent) => (requested, Some(parent.id)),
        None => {
            info!("no completed full backup to delta against, running a full backup instead");
            (BackupType::Full, None)
        }
    }
}

// Owns the metadata for the duration of the run; every transition is
// published to the registry as a whole record.
async fn run_job(
    state: Arc<EngineState>,
    mut metadata: BackupMetadata,
    task: Arc<BackupTask>,
    collector: Collector,
) -> BackupMetadata {
    let result = match state.workers.acquire().await {
        Ok(_permit) => {
            metadata.begin();
            publish(&state, &metadata).await;
            pipeline::run_forward(&state.store, &state.config, &metadata, &task, collector).await
        }
        Err(err) => Err(err.into()),
    };

    match result {
        Ok(output) => {
            let elapsed = elapsed_since(metadata.start_time);
            metadata.complete(output.original_size, output.stored_size, output.checksums);
            publish(&state, &metadata).await;
            state.stats.write().await.record_completed(&metadata);
            info!(
                "completed {} backup {} ({} stored in {})",
                metadata.backup_type,
                metadata.id,
                format_size(output.stored_size),
                humantime::format_duration(elapsed),
            );
            state.notifier.notify(success_notification(&metadata)).await;

            if state.config.auto_verify {
                match verify::run(&state, metadata.id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!("backup {} failed post-completion verification", metadata.id);
                    }
                    Err(err) => warn!("could not verify backup {}: {err}", metadata.id),
                }
                if let Some(fresh) = state.registry.read().await.get(&metadata.id) {
                    metadata = fresh.clone();
                }
            }
        }
        Err(err) => {
            warn!("backup {} failed: {err}", metadata.id);
            metadata.fail(err.to_string());
            publish(&state, &metadata).await;
            state.stats.write().await.record_failure();
            // the persist step is atomic, but a payload that reached disk
            // before a later stage failed must not outlive the failure
            if let Err(err) = state.store.delete(&metadata.file_name).await {
                warn!(
                    "could not remove file for failed backup {}: {err}",
                    metadata.id
                );
            }
            state.notifier.notify(failure_notification(&metadata)).await;
        }
    }

    save_index(&state).await;
    metadata
}

async fn publish(state: &EngineState, metadata: &BackupMetadata) {
    state.registry.write().await.insert(metadata.clone());
}

fn elapsed_since(start: Option<DateTime<Utc>>) -> std::time::Duration {
    start
        .map(|start| Utc::now() - start)
        .and_then(|delta| delta.to_std().ok())
        .unwrap_or_default()
}

fn start_notification(metadata: &BackupMetadata) -> Notification {
    Notification {
        recipient: metadata.created_by.clone(),
        category: Category::Backup,
        priority: Priority::Normal,
        title: "backup started".to_owned(),
        message: format!("{} backup {} is running", metadata.backup_type, metadata.id),
        detail: None,
    }
}

fn success_notification(metadata: &BackupMetadata) -> Notification {
    Notification {
        recipient: metadata.created_by.clone(),
        category: Category::Backup,
        priority: Priority::Normal,
        title: "backup completed".to_owned(),
        message: format!("{} backup {} completed", metadata.backup_type, metadata.id),
        detail: metadata.stored_size.map(format_size),
    }
}

fn failure_notification(metadata: &BackupMetadata) -> Notification {
    Notification {
        recipient: metadata.created_by.clone(),
        category: Category::Backup,
        priority: Priority::High,
        title: "backup failed".to_owned(),
        message: format!("{} backup {} failed", metadata.backup_type, metadata.id),
        detail: metadata.error_message.clone(),
    }
}
