use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    metadata::{BackupId, BackupMetadata, BackupStatus, BackupType},
};

// Durable record of every backup, with a by-creation-time index. Serialized
// whole as the on-disk registry index.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MetadataStore {
    records: HashMap<BackupId, BackupMetadata>,
    by_created: BTreeSet<(DateTime<Utc>, BackupId)>,
}

impl MetadataStore {
    pub fn new() -> Self {
        MetadataStore {
            records: HashMap::new(),
            by_created: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &BackupId) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &BackupId) -> Option<&BackupMetadata> {
        self.records.get(id)
    }

    // Callers must not change `created_at`, which keys the index.
    pub fn get_mut(&mut self, id: &BackupId) -> Option<&mut BackupMetadata> {
        self.records.get_mut(id)
    }

    pub fn insert(&mut self, metadata: BackupMetadata) {
        self.by_created.insert((metadata.created_at, metadata.id));
        self.records.insert(metadata.id, metadata);
    }

    pub fn remove(&mut self, id: &BackupId) -> Result<BackupMetadata> {
        let metadata = self
            .records
            .remove(id)
            .ok_or(Error::BackupNotFound(*id))?;
        self.by_created.remove(&(metadata.created_at, metadata.id));
        Ok(metadata)
    }

    pub fn iter_by_created(&self) -> impl DoubleEndedIterator<Item = &BackupMetadata> {
        self.by_created
            .iter()
            .filter_map(|(_, id)| self.records.get(id))
    }

    pub fn all(&self) -> Vec<BackupMetadata> {
        self.iter_by_created().cloned().collect()
    }

    pub fn by_status(&self, status: BackupStatus) -> Vec<BackupMetadata> {
        self.iter_by_created()
            .filter(|metadata| metadata.status == status)
            .cloned()
            .collect()
    }

    pub fn by_type(&self, backup_type: BackupType) -> Vec<BackupMetadata> {
        self.iter_by_created()
            .filter(|metadata| metadata.backup_type == backup_type)
            .cloned()
            .collect()
    }

    pub fn expired_at(&self, now: DateTime<Utc>) -> Vec<BackupMetadata> {
        self.iter_by_created()
            .filter(|metadata| metadata.is_expired_at(now))
            .cloned()
            .collect()
    }

    pub fn count_by_status(&self, status: BackupStatus) -> usize {
        self.records
            .values()
            .filter(|metadata| metadata.status == status)
            .count()
    }

    pub fn latest_completed_full(&self) -> Option<&BackupMetadata> {
        self.iter_by_created().rev().find(|metadata| {
            metadata.backup_type == BackupType::Full && metadata.status == BackupStatus::Completed
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::MetadataStore;
    use crate::{
        config::BackupConfig,
        crypto::EncryptionKey,
        error::Error,
        hash::checksums,
        metadata::{BackupId, BackupMetadata, BackupStatus, BackupType},
    };

    fn config() -> BackupConfig {
        BackupConfig::new("/tmp/backups", EncryptionKey::from_passphrase("test"))
    }

    fn completed(backup_type: BackupType) -> BackupMetadata {
        let mut meta = BackupMetadata::new(backup_type, "tester", "", None, &config());
        meta.begin();
        meta.complete(100, 40, checksums(b"payload"));
        meta
    }

    #[test]
    fn insert_get_remove() {
        let mut store = MetadataStore::new();
        let meta = completed(BackupType::Full);
        let id = meta.id;

        store.insert(meta);
        assert_eq!(store.len(), 1);
        assert!(store.contains(&id));

        let removed = store.remove(&id).unwrap();
        assert_eq!(removed.id, id);
        assert!(store.is_empty());
        assert_eq!(store.remove(&id), Err(Error::BackupNotFound(id)));
    }

    #[test]
    fn filters_by_status_and_type() {
        let mut store = MetadataStore::new();
        store.insert(completed(BackupType::Full));
        store.insert(completed(BackupType::Emergency));

        let mut failed = BackupMetadata::new(BackupType::Full, "tester", "", None, &config());
        failed.begin();
        failed.fail("boom".to_owned());
        store.insert(failed);

        assert_eq!(store.by_status(BackupStatus::Completed).len(), 2);
        assert_eq!(store.by_status(BackupStatus::Failed).len(), 1);
        assert_eq!(store.by_type(BackupType::Full).len(), 2);
        assert_eq!(store.by_type(BackupType::Emergency).len(), 1);
        assert_eq!(store.count_by_status(BackupStatus::Completed), 2);
    }

    #[test]
    fn all_is_ordered_by_creation() {
        let mut store = MetadataStore::new();
        let mut older = completed(BackupType::Full);
        older.created_at = Utc::now() - Duration::days(2);
        let older_id = older.id;
        let newer = completed(BackupType::Full);
        let newer_id = newer.id;

        store.insert(newer);
        store.insert(older);

        let ids = store.all().iter().map(|m| m.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![older_id, newer_id]);
    }

    #[test]
    fn latest_completed_full_skips_other_records() {
        let mut store = MetadataStore::new();
        let mut old_full = completed(BackupType::Full);
        old_full.created_at = Utc::now() - Duration::days(3);
        let mut new_full = completed(BackupType::Full);
        new_full.created_at = Utc::now() - Duration::days(1);
        let new_full_id = new_full.id;

        store.insert(old_full);
        store.insert(new_full);
        store.insert(completed(BackupType::Emergency));
        store.insert(BackupMetadata::new(
            BackupType::Full,
            "tester",
            "",
            None,
            &config(),
        ));

        assert_eq!(store.latest_completed_full().unwrap().id, new_full_id);
    }

    #[test]
    fn expired_honors_retention_boundary() {
        let mut store = MetadataStore::new();
        let retention = config().retention_days;

        let mut expired = completed(BackupType::Full);
        expired.created_at = Utc::now() - Duration::days(retention + 1);
        let expired_id = expired.id;

        let mut fresh = completed(BackupType::Full);
        fresh.created_at = Utc::now() - Duration::days(retention - 1);

        let mut pending_old = BackupMetadata::new(BackupType::Full, "tester", "", None, &config());
        pending_old.created_at = Utc::now() - Duration::days(retention * 2);

        store.insert(expired);
        store.insert(fresh);
        store.insert(pending_old);

        let expired_ids = store
            .expired_at(Utc::now())
            .iter()
            .map(|m| m.id)
            .collect::<Vec<BackupId>>();
        assert_eq!(expired_ids, vec![expired_id]);
    }
}
