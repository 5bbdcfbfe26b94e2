use std::{collections::BTreeMap, sync::Arc};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::{sync::oneshot, task::spawn_blocking};

use crate::{
    error::{Error, Result, OK},
    metadata::{BackupId, BackupStatus, BackupType},
    notify::{AuditAction, AuditOutcome, Category, Notification, Priority},
    pipeline::{self, Apply, Collector},
    task::OperationHandle,
};

use super::{backup, record_audit, verify, EngineState, RestoreHandle};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreResult {
    pub success: bool,
    pub message: String,
    pub restored_items: BTreeMap<String, u64>,
}

impl RestoreResult {
    fn completed(message: String, restored_items: BTreeMap<String, u64>) -> Self {
        RestoreResult {
            success: true,
            message,
            restored_items,
        }
    }

    fn failed(message: String) -> Self {
        RestoreResult {
            success: false,
            message,
            restored_items: BTreeMap::new(),
        }
    }
}

pub(super) fn start(
    state: Arc<EngineState>,
    id: BackupId,
    restored_by: String,
    safety_collector: Option<Collector>,
    apply: Apply,
) -> RestoreHandle {
    let (sender, receiver) = oneshot::channel();

    tokio::spawn(async move {
        state
            .notifier
            .notify(start_notification(&restored_by, id))
            .await;

        let result = match run(&state, id, &restored_by, safety_collector, apply).await {
            Ok(result) => result,
            // precondition and pipeline errors surface as a failed result,
            // never as a panic or error across the boundary
            Err(err) => RestoreResult::failed(err.to_string()),
        };

        if result.success {
            state.stats.write().await.record_restore();
            info!("restored backup {id} for {restored_by}");
        } else {
            warn!("restore of backup {id} failed: {}", result.message);
        }

        let outcome = if result.success {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failure
        };
        record_audit(&state, &restored_by, AuditAction::Restore, id, outcome).await;
        state
            .notifier
            .notify(outcome_notification(&restored_by, id, &result))
            .await;

        let _ = sender.send(result);
    });

    OperationHandle::new(id, receiver)
}

async fn run(
    state: &Arc<EngineState>,
    id: BackupId,
    restored_by: &str,
    safety_collector: Option<Collector>,
    apply: Apply,
) -> Result<RestoreResult> {
    if state.tasks.read().await.contains_key(&id) {
        return Err(Error::BackupInFlight(id));
    }

    let metadata = state
        .registry
        .read()
        .await
        .get(&id)
        .cloned()
        .ok_or(Error::BackupNotFound(id))?;

    if metadata.status != BackupStatus::Completed {
        return Err(Error::WrongStatus {
            id,
            status: metadata.status,
            expected: BackupStatus::Completed,
        });
    }

    // a backup that does not verify is never restored from
    if !verify::run(state, id).await? {
        return Ok(RestoreResult::failed(format!(
            "backup {id} failed integrity verification"
        )));
    }

    if let Some(collector) = safety_collector {
        run_safety_backup(state, restored_by, collector).await?;
    }

    let snapshot = pipeline::run_reverse(&state.store, &state.config, &metadata).await?;

    let restored_items = spawn_blocking(move || apply(snapshot))
        .await?
        .map_err(|err| Error::ApplyFailed(format!("{err:#}")))?;

    Ok(RestoreResult::completed(
        format!("restored backup {id}"),
        restored_items,
    ))
}

// Fail-closed: without a fallback point the restore does not proceed.
async fn run_safety_backup(
    state: &Arc<EngineState>,
    restored_by: &str,
    collector: Collector,
) -> Result<()> {
    let handle = backup::create(
        state.clone(),
        BackupType::Emergency,
        restored_by,
        "pre-restore safety backup",
        collector,
    )
    .await?;

    let metadata = handle.wait().await?;
    if metadata.status != BackupStatus::Completed {
        let reason = metadata
            .error_message
            .unwrap_or_else(|| "unknown failure".to_owned());
        return Err(Error::SafetyBackupFailed(reason));
    }

    info!("created safety backup {} before restore", metadata.id);
    OK
}

fn start_notification(restored_by: &str, id: BackupId) -> Notification {
    Notification {
        recipient: restored_by.to_owned(),
        category: Category::Restore,
        priority: Priority::Normal,
        title: "restore started".to_owned(),
        message: format!("restoring backup {id}"),
        detail: None,
    }
}

fn outcome_notification(restored_by: &str, id: BackupId, result: &RestoreResult) -> Notification {
    if result.success {
        let restored = result.restored_items.values().sum::<u64>();
        Notification {
            recipient: restored_by.to_owned(),
            category: Category::Restore,
            priority: Priority::Normal,
            title: "restore completed".to_owned(),
            message: format!("backup {id} restored ({restored} items)"),
            detail: None,
        }
    } else {
        Notification {
            recipient: restored_by.to_owned(),
            category: Category::Restore,
            priority: Priority::Critical,
            title: "restore failed".to_owned(),
            message: format!("backup {id} was not restored"),
            detail: Some(result.message.clone()),
        }
    }
}
