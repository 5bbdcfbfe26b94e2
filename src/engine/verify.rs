use log::{info, warn};
use tokio::task::spawn_blocking;

use crate::{
    error::{Error, Result, OK},
    hash::{checksums, PRIMARY_ALGORITHM, SECONDARY_ALGORITHM},
    metadata::{BackupId, BackupMetadata, BackupStatus},
    pipeline,
};

use super::{save_index, EngineState};

pub(super) async fn verify(state: &EngineState, id: BackupId) -> Result<bool> {
    if state.tasks.read().await.contains_key(&id) {
        return Err(Error::BackupInFlight(id));
    }

    run(state, id).await
}

// Shared by on-demand verification, the post-completion self-check, and the
// restore precondition. Never touches stored size or checksums; the only
// mutations are the verification fields and, on failure, the one-way
// demotion to corrupted.
pub(super) async fn run(state: &EngineState, id: BackupId) -> Result<bool> {
    let metadata = state
        .registry
        .read()
        .await
        .get(&id)
        .cloned()
        .ok_or(Error::BackupNotFound(id))?;

    match metadata.status {
        BackupStatus::Completed => {}
        BackupStatus::Failed | BackupStatus::Corrupted => return Ok(false),
        BackupStatus::Pending | BackupStatus::InProgress => {
            return Err(Error::BackupInFlight(id));
        }
    }

    let outcome = check(state, &metadata).await;
    let passed = outcome.is_ok();

    {
        let mut registry = state.registry.write().await;
        if let Some(record) = registry.get_mut(&id) {
            if let Err(err) = &outcome {
                warn!("backup {id} failed verification: {err}");
                record.demote_corrupted(err.to_string());
            }
            record.record_verification(passed);
        }
    }

    save_index(state).await;
    if passed {
        info!("backup {id} passed verification");
    }

    Ok(passed)
}

async fn check(state: &EngineState, metadata: &BackupMetadata) -> Result<()> {
    let (Some(expected_size), Some(expected_sums)) =
        (metadata.stored_size, metadata.checksums.clone())
    else {
        return Err(Error::MetadataIncomplete(metadata.id));
    };

    if !state.store.exists(&metadata.file_name).await? {
        return Err(Error::FileMissing(state.store.path(&metadata.file_name)));
    }

    let actual_size = state.store.len(&metadata.file_name).await?;
    if actual_size != expected_size {
        return Err(Error::SizeMismatch {
            actual: actual_size,
            expected: expected_size,
        });
    }

    let payload = state.store.read(&metadata.file_name).await?;
    let (actual_sums, payload) = spawn_blocking(move || {
        let sums = checksums(&payload);
        (sums, payload)
    })
    .await?;

    if actual_sums.primary != expected_sums.primary {
        return Err(Error::ChecksumMismatch {
            algorithm: PRIMARY_ALGORITHM,
            actual: actual_sums.primary,
            expected: expected_sums.primary,
        });
    }

    if actual_sums.secondary != expected_sums.secondary {
        return Err(Error::ChecksumMismatch {
            algorithm: SECONDARY_ALGORITHM,
            actual: actual_sums.secondary,
            expected: expected_sums.secondary,
        });
    }

    // structural check: the payload must decode all the way back
    pipeline::decode_payload(payload, metadata.encrypted, &state.config).await?;
    OK
}
