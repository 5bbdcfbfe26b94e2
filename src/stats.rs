use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use humansize::{ToF64, Unsigned, DECIMAL};
use serde::{Deserialize, Serialize};

use crate::metadata::{BackupMetadata, BackupType};

// Updated under the engine's write lock on every terminal event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupStatistics {
    pub backups_created: u64,
    pub backups_failed: u64,
    pub restores_completed: u64,
    pub bytes_original: u64,
    pub bytes_stored: u64,
    pub by_type: BTreeMap<BackupType, u64>,
    pub last_backup_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_restore_time: Option<DateTime<Utc>>,
}

impl BackupStatistics {
    pub fn new() -> Self {
        BackupStatistics::default()
    }

    pub fn record_completed(&mut self, metadata: &BackupMetadata) {
        self.backups_created += 1;
        self.bytes_original += metadata.original_size.unwrap_or(0);
        self.bytes_stored += metadata.stored_size.unwrap_or(0);
        *self.by_type.entry(metadata.backup_type).or_default() += 1;
        self.last_backup_time = Some(Utc::now());
    }

    pub fn record_failure(&mut self) {
        self.backups_failed += 1;
        self.last_failure_time = Some(Utc::now());
    }

    pub fn record_restore(&mut self) {
        self.restores_completed += 1;
        self.last_restore_time = Some(Utc::now());
    }

    // Stored bytes over original bytes across all completed backups;
    // 1.0 when nothing has been backed up yet.
    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_original == 0 {
            1.0
        } else {
            self.bytes_stored as f64 / self.bytes_original as f64
        }
    }
}

pub fn format_size<T: ToF64 + Unsigned>(input: T) -> String {
    humansize::format_size(input, DECIMAL)
}
