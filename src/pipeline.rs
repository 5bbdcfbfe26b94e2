use std::collections::BTreeMap;

use tokio::task::spawn_blocking;

use crate::{
    compression::{compress, decompress},
    config::BackupConfig,
    crypto::{decrypt, encrypt},
    error::{Error, Result},
    hash::{checksums, Checksums},
    metadata::BackupMetadata,
    snapshot::Snapshot,
    storage::LocalStore,
    task::{stage, BackupTask},
};

// Caller-supplied callbacks: the collector snapshots live application state,
// the apply step writes a recovered snapshot back and reports per-dataset
// counts.
pub type Collector = Box<dyn FnOnce() -> anyhow::Result<Snapshot> + Send + 'static>;
pub type Apply =
    Box<dyn FnOnce(Snapshot) -> anyhow::Result<BTreeMap<String, u64>> + Send + 'static>;

#[derive(Debug)]
pub struct ForwardOutput {
    pub original_size: u64,
    pub stored_size: u64,
    pub checksums: Checksums,
}

// Forward pipeline: collect, serialize, compress, encrypt, persist, checksum.
// Byte transforms run off the async executor; cancellation is checked between
// stages and never after the payload has been persisted.
pub(crate) async fn run_forward(
    store: &LocalStore,
    config: &BackupConfig,
    metadata: &BackupMetadata,
    task: &BackupTask,
    collector: Collector,
) -> Result<ForwardOutput> {
    task.check_cancelled()?;
    task.advance(stage::COLLECT);
    let snapshot = spawn_blocking(collector)
        .await?
        .map_err(|err| Error::CollectionFailed(format!("{err:#}")))?;
    task.check_cancelled()?;

    task.advance(stage::SERIALIZE);
    let bytes = spawn_blocking(move || snapshot.encode()).await??;
    let original_size = bytes.len() as u64;
    task.check_cancelled()?;

    task.advance(stage::COMPRESS);
    let level = metadata.compression_level;
    let compressed = spawn_blocking(move || compress(&bytes, level)).await??;
    task.check_cancelled()?;

    let payload = if metadata.encrypted {
        task.advance(stage::ENCRYPT);
        let key = config.key.clone();
        let encrypted = spawn_blocking(move || encrypt(&compressed, &key)).await??;
        task.check_cancelled()?;
        encrypted
    } else {
        compressed
    };

    task.advance(stage::PERSIST);
    store.write_atomic(&metadata.file_name, &payload).await?;

    task.advance(stage::CHECKSUM);
    let stored_size = payload.len() as u64;
    let sums = spawn_blocking(move || checksums(&payload)).await?;
    task.advance(stage::DONE);

    Ok(ForwardOutput {
        original_size,
        stored_size,
        checksums: sums,
    })
}

// Reverse of the forward byte transforms: decrypt, decompress, deserialize.
pub(crate) async fn decode_payload(
    payload: Vec<u8>,
    encrypted: bool,
    config: &BackupConfig,
) -> Result<Snapshot> {
    let key = config.key.clone();
    spawn_blocking(move || {
        let compressed = if encrypted {
            decrypt(&payload, &key)?
        } else {
            payload
        };
        let bytes = decompress(&compressed)?;
        Snapshot::decode(&bytes)
    })
    .await?
}

pub(crate) async fn run_reverse(
    store: &LocalStore,
    config: &BackupConfig,
    metadata: &BackupMetadata,
) -> Result<Snapshot> {
    let payload = store.read(&metadata.file_name).await?;
    decode_payload(payload, metadata.encrypted, config).await
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::{run_forward, run_reverse, Collector};
    use crate::{
        config::BackupConfig,
        crypto::EncryptionKey,
        error::Error,
        metadata::{BackupMetadata, BackupType},
        snapshot::Snapshot,
        storage::LocalStore,
        task::BackupTask,
    };

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        id: u64,
        label: String,
    }

    fn sample_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::new();
        let entries = snapshot.dataset_mut("entries");
        for id in 0..200 {
            entries
                .push(&Entry {
                    id,
                    label: "a repetitive, highly compressible label".to_owned(),
                })
                .unwrap();
        }
        snapshot
    }

    fn config(dir: &std::path::Path, level: u8, encrypt: bool) -> BackupConfig {
        let mut config = BackupConfig::new(dir, EncryptionKey::from_passphrase("test"));
        config.compression_level = level;
        config.encrypt = encrypt;
        config
    }

    async fn assert_roundtrip(level: u8, encrypt: bool) {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), level, encrypt);
        let store = LocalStore::open(dir.path()).await.unwrap();
        let metadata = BackupMetadata::new(BackupType::Full, "tester", "", None, &config);
        let task = BackupTask::new(metadata.id);

        let expected = sample_snapshot();
        let snapshot = expected.clone();
        let collector: Collector = Box::new(move || Ok(snapshot));

        let output = run_forward(&store, &config, &metadata, &task, collector)
            .await
            .unwrap();
        assert_eq!(
            output.stored_size,
            store.len(&metadata.file_name).await.unwrap()
        );
        assert!(output.stored_size < output.original_size);

        let decoded = run_reverse(&store, &config, &metadata).await.unwrap();
        assert_eq!(decoded, expected);
    }

    #[tokio::test]
    async fn roundtrips_across_levels_and_modes() {
        for (level, encrypt) in [(1, false), (3, true), (19, true)] {
            assert_roundtrip(level, encrypt).await;
        }
    }

    #[tokio::test]
    async fn collector_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), 3, true);
        let store = LocalStore::open(dir.path()).await.unwrap();
        let metadata = BackupMetadata::new(BackupType::Full, "tester", "", None, &config);
        let task = BackupTask::new(metadata.id);
        let collector: Collector = Box::new(|| Err(anyhow::anyhow!("no data available")));

        let result = run_forward(&store, &config, &metadata, &task, collector).await;
        match result {
            Err(Error::CollectionFailed(message)) => {
                assert!(message.contains("no data available"));
            }
            other => panic!("expected collection failure, got {other:?}"),
        }
        assert!(!store.exists(&metadata.file_name).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_key_fails_decode() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), 3, true);
        let store = LocalStore::open(dir.path()).await.unwrap();
        let metadata = BackupMetadata::new(BackupType::Full, "tester", "", None, &config);
        let task = BackupTask::new(metadata.id);
        let collector: Collector = Box::new(|| Ok(sample_snapshot()));

        run_forward(&store, &config, &metadata, &task, collector)
            .await
            .unwrap();

        let mut other = config.clone();
        other.key = EncryptionKey::from_passphrase("not the same key");
        assert_eq!(
            run_reverse(&store, &other, &metadata).await,
            Err(Error::DecryptionFailed)
        );
    }

    #[tokio::test]
    async fn cancelled_task_stops_before_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), 3, true);
        let store = LocalStore::open(dir.path()).await.unwrap();
        let metadata = BackupMetadata::new(BackupType::Full, "tester", "", None, &config);
        let task = BackupTask::new(metadata.id);
        task.cancel();
        let collector: Collector = Box::new(|| Ok(sample_snapshot()));

        let result = run_forward(&store, &config, &metadata, &task, collector).await;
        assert_eq!(result.unwrap_err(), Error::Cancelled(metadata.id));
        assert!(!store.exists(&metadata.file_name).await.unwrap());
    }
}
