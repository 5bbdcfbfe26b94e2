use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::BackupConfig, hash::Checksums};

pub const FILE_EXTENSION: &str = "bak";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BackupId(Uuid);

impl BackupId {
    pub fn new() -> Self {
        BackupId(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_owned()
    }
}

impl Default for BackupId {
    fn default() -> Self {
        BackupId::new()
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BackupType {
    Full,
    Incremental,
    Emergency,
    Differential,
}

// One profile per backup type, selected by lookup; the pipeline itself stays
// type-agnostic.
#[derive(Debug)]
pub struct TypeProfile {
    pub name: &'static str,
    pub file_prefix: &'static str,
    pub retention_multiplier: i64,
    pub requires_parent: bool,
}

const PROFILES: &[(BackupType, TypeProfile)] = &[
    (
        BackupType::Full,
        TypeProfile {
            name: "full",
            file_prefix: "full",
            retention_multiplier: 1,
            requires_parent: false,
        },
    ),
    (
        BackupType::Incremental,
        TypeProfile {
            name: "incremental",
            file_prefix: "incr",
            retention_multiplier: 1,
            requires_parent: true,
        },
    ),
    (
        BackupType::Emergency,
        TypeProfile {
            name: "emergency",
            file_prefix: "emerg",
            retention_multiplier: 3,
            requires_parent: false,
        },
    ),
    (
        BackupType::Differential,
        TypeProfile {
            name: "differential",
            file_prefix: "diff",
            retention_multiplier: 1,
            requires_parent: false,
        },
    ),
];

impl BackupType {
    pub fn profile(self) -> &'static TypeProfile {
        let (_, profile) = PROFILES
            .iter()
            .find(|(candidate, _)| *candidate == self)
            .unwrap();
        profile
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.profile().name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Corrupted,
}

impl BackupStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BackupStatus::Completed | BackupStatus::Failed | BackupStatus::Corrupted
        )
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackupStatus::Pending => "pending",
            BackupStatus::InProgress => "in progress",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
            BackupStatus::Corrupted => "corrupted",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: BackupId,
    pub backup_type: BackupType,
    pub status: BackupStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub description: String,
    pub file_name: String,
    pub original_size: Option<u64>,
    pub stored_size: Option<u64>,
    pub checksums: Option<Checksums>,
    pub encrypted: bool,
    pub compression_level: u8,
    pub parent_id: Option<BackupId>,
    pub retention_days: i64,
    pub verified: bool,
    pub last_verification_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl BackupMetadata {
    pub fn new(
        backup_type: BackupType,
        created_by: &str,
        description: &str,
        parent_id: Option<BackupId>,
        config: &BackupConfig,
    ) -> Self {
        let id = BackupId::new();
        let created_at = Utc::now();
        let profile = backup_type.profile();
        let file_name = format!(
            "{}-{}-{}.{FILE_EXTENSION}",
            profile.file_prefix,
            created_at.format("%Y%m%d%H%M%S"),
            id.short(),
        );

        BackupMetadata {
            id,
            backup_type,
            status: BackupStatus::Pending,
            created_by: created_by.to_owned(),
            created_at,
            start_time: None,
            completion_time: None,
            description: description.to_owned(),
            file_name,
            original_size: None,
            stored_size: None,
            checksums: None,
            encrypted: config.encrypt,
            compression_level: config.compression_level,
            parent_id,
            retention_days: config.retention_days * profile.retention_multiplier,
            verified: false,
            last_verification_time: None,
            error_message: None,
        }
    }

    pub fn begin(&mut self) {
        self.status = BackupStatus::InProgress;
        self.start_time = Some(Utc::now());
    }

    // Stored size and checksums are written exactly once, here.
    pub fn complete(&mut self, original_size: u64, stored_size: u64, checksums: Checksums) {
        self.status = BackupStatus::Completed;
        self.completion_time = Some(Utc::now());
        self.original_size = Some(original_size);
        self.stored_size = Some(stored_size);
        self.checksums = Some(checksums);
        self.error_message = None;
    }

    pub fn fail(&mut self, message: String) {
        self.status = BackupStatus::Failed;
        self.completion_time = Some(Utc::now());
        self.error_message = Some(message);
    }

    // Completed -> Corrupted is the only demotion, and it is one-way.
    pub fn demote_corrupted(&mut self, reason: String) {
        self.status = BackupStatus::Corrupted;
        self.error_message = Some(reason);
    }

    pub fn record_verification(&mut self, passed: bool) {
        self.verified = passed;
        self.last_verification_time = Some(Utc::now());
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_terminal() && now > self.created_at + Duration::days(self.retention_days)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::{BackupMetadata, BackupStatus, BackupType};
    use crate::{config::BackupConfig, crypto::EncryptionKey, hash::checksums};

    fn config() -> BackupConfig {
        BackupConfig::new("/tmp/backups", EncryptionKey::from_passphrase("test"))
    }

    fn metadata(backup_type: BackupType) -> BackupMetadata {
        BackupMetadata::new(backup_type, "tester", "test backup", None, &config())
    }

    #[test]
    fn new_metadata_defaults() {
        let meta = metadata(BackupType::Full);
        assert_eq!(meta.status, BackupStatus::Pending);
        assert!(meta.file_name.starts_with("full-"));
        assert!(meta.file_name.ends_with(".bak"));
        assert_eq!(meta.retention_days, config().retention_days);
        assert!(meta.stored_size.is_none());
        assert!(meta.checksums.is_none());
    }

    #[test]
    fn emergency_retention_is_extended() {
        let meta = metadata(BackupType::Emergency);
        assert_eq!(meta.retention_days, config().retention_days * 3);
        assert!(meta.file_name.starts_with("emerg-"));
    }

    #[test]
    fn lifecycle_transitions() {
        let mut meta = metadata(BackupType::Full);
        meta.begin();
        assert_eq!(meta.status, BackupStatus::InProgress);
        assert!(meta.start_time.is_some());

        meta.complete(100, 40, checksums(b"payload"));
        assert_eq!(meta.status, BackupStatus::Completed);
        assert_eq!(meta.original_size, Some(100));
        assert_eq!(meta.stored_size, Some(40));
        assert!(meta.completion_time.is_some());

        meta.demote_corrupted("digest mismatch".to_owned());
        assert_eq!(meta.status, BackupStatus::Corrupted);
        assert_eq!(meta.error_message.as_deref(), Some("digest mismatch"));
    }

    #[test]
    fn failure_records_message() {
        let mut meta = metadata(BackupType::Full);
        meta.begin();
        meta.fail("collector exploded".to_owned());
        assert_eq!(meta.status, BackupStatus::Failed);
        assert_eq!(meta.error_message.as_deref(), Some("collector exploded"));
    }

    #[test]
    fn expiry_boundary() {
        let mut meta = metadata(BackupType::Full);
        meta.begin();
        meta.complete(10, 10, checksums(b"x"));

        let retention = Duration::days(meta.retention_days);
        let just_before = meta.created_at + retention - Duration::days(1);
        let just_after = meta.created_at + retention + Duration::days(1);
        assert!(!meta.is_expired_at(just_before));
        assert!(meta.is_expired_at(just_after));
    }

    #[test]
    fn in_flight_backups_never_expire() {
        let mut meta = metadata(BackupType::Full);
        let far_future = meta.created_at + Duration::days(meta.retention_days * 10);
        assert!(!meta.is_expired_at(far_future));
        meta.begin();
        assert!(!meta.is_expired_at(far_future));
    }
}
