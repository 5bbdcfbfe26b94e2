use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    serde::{deserialize, serialize},
};

pub const SNAPSHOT_VERSION: u32 = 1;

// Versioned envelope around the application state handed to the pipeline.
// The version field gates decoding so snapshots taken by a different
// collector generation are rejected instead of misread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    version: u32,
    pub created: DateTime<Utc>,
    datasets: BTreeMap<String, Dataset>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    records: Vec<Vec<u8>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Snapshot {
            version: SNAPSHOT_VERSION,
            created: Utc::now(),
            datasets: BTreeMap::new(),
        }
    }

    pub fn dataset(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(name)
    }

    pub fn dataset_mut(&mut self, name: &str) -> &mut Dataset {
        self.datasets.entry(name.to_owned()).or_default()
    }

    pub fn dataset_names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn record_counts(&self) -> BTreeMap<String, u64> {
        self.datasets
            .iter()
            .map(|(name, dataset)| (name.clone(), dataset.len() as u64))
            .collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let snapshot: Snapshot = deserialize(bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::SnapshotVersionMismatch {
                actual: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }

        Ok(snapshot)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot::new()
    }
}

impl Dataset {
    pub fn push<T: Serialize>(&mut self, record: &T) -> Result<()> {
        self.records.push(serde_json::to_vec(record)?);
        Ok(())
    }

    pub fn records<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.records
            .iter()
            .map(|bytes| Ok(serde_json::from_slice(bytes)?))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::{Snapshot, SNAPSHOT_VERSION};
    use crate::error::Error;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: u64,
        name: String,
    }

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::new();
        let accounts = snapshot.dataset_mut("accounts");
        accounts
            .push(&Account {
                id: 1,
                name: "alice".to_owned(),
            })
            .unwrap();
        accounts
            .push(&Account {
                id: 2,
                name: "bob".to_owned(),
            })
            .unwrap();
        snapshot.dataset_mut("sessions");
        snapshot
    }

    #[test]
    fn typed_records_roundtrip() {
        let bytes = sample().encode().unwrap();
        let decoded = Snapshot::decode(&bytes).unwrap();
        let accounts: Vec<Account> = decoded.dataset("accounts").unwrap().records().unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[1].name, "bob");
    }

    #[test]
    fn record_counts_per_dataset() {
        let counts = sample().record_counts();
        assert_eq!(counts["accounts"], 2);
        assert_eq!(counts["sessions"], 0);
    }

    #[test]
    fn version_mismatch_rejected() {
        let mut snapshot = sample();
        snapshot.version = SNAPSHOT_VERSION + 1;
        let bytes = snapshot.encode().unwrap();
        assert_eq!(
            Snapshot::decode(&bytes),
            Err(Error::SnapshotVersionMismatch {
                actual: SNAPSHOT_VERSION + 1,
                expected: SNAPSHOT_VERSION,
            })
        );
    }
}
