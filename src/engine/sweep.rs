use std::{sync::Arc, time::Duration};

use chrono::Utc;
use log::{debug, info, warn};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

use crate::{
    error::Result,
    notify::{AuditAction, AuditOutcome},
};

use super::{record_audit, save_index, EngineState};

// Expiry only ever selects terminal backups, so there is no overlap with a
// pipeline writing the same record.
pub(super) async fn clean_expired(state: &EngineState) -> Result<usize> {
    let expired = state.registry.read().await.expired_at(Utc::now());
    let mut removed = 0;

    for metadata in expired {
        if let Err(err) = state.store.delete(&metadata.file_name).await {
            warn!("could not delete expired backup {}: {err}", metadata.id);
            continue;
        }

        if state.registry.write().await.remove(&metadata.id).is_ok() {
            removed += 1;
            info!(
                "removed expired {} backup {} (retained {} days)",
                metadata.backup_type, metadata.id, metadata.retention_days
            );
            record_audit(
                state,
                "scheduler",
                AuditAction::Cleanup,
                metadata.id,
                AuditOutcome::Success,
            )
            .await;
        }
    }

    if removed > 0 {
        save_index(state).await;
    }

    Ok(removed)
}

// Runs on its own task at low frequency so backup traffic never starves it.
pub(super) fn spawn(state: Arc<EngineState>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match clean_expired(&state).await {
                Ok(0) => debug!("expiry sweep removed nothing"),
                Ok(count) => info!("expiry sweep removed {count} backups"),
                Err(err) => warn!("expiry sweep failed: {err}"),
            }
        }
    })
}
