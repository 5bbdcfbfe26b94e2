use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::fs;

use crate::error::{Error, Result, OK};

pub const INDEX_FILE: &str = "backups.index";

// One flat directory; backup payloads plus the registry index file.
#[derive(Debug)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        fs::create_dir_all(dir.as_ref()).await?;
        Ok(LocalStore {
            dir: dir.as_ref().to_owned(),
        })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    // Write-to-temp-then-rename; a failed write never leaves a partial file
    // under the final name.
    pub async fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let temp_name = format!("{name}.tmp");
        let temp_path = self.path(&temp_name);

        if let Err(err) = fs::write(&temp_path, bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err.into());
        }

        if let Err(err) = fs::rename(&temp_path, self.path(name)).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err.into());
        }

        OK
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path(name);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Error::FileMissing(path)),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn try_read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match self.read(name).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(Error::FileMissing(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        let exists = fs::try_exists(self.path(name)).await?;
        Ok(exists)
    }

    pub async fn len(&self, name: &str) -> Result<u64> {
        let path = self.path(name);
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Error::FileMissing(path)),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        match fs::remove_file(self.path(name)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LocalStore;
    use crate::error::Error;

    #[tokio::test]
    async fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).await.unwrap();

        store.write_atomic("payload.bak", b"bytes").await.unwrap();
        assert_eq!(store.read("payload.bak").await.unwrap(), b"bytes");
        assert_eq!(store.len("payload.bak").await.unwrap(), 5);
        assert!(store.exists("payload.bak").await.unwrap());
    }

    #[tokio::test]
    async fn no_temp_file_remains() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).await.unwrap();

        store.write_atomic("payload.bak", b"bytes").await.unwrap();
        assert!(!store.exists("payload.bak.tmp").await.unwrap());
    }

    #[tokio::test]
    async fn missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).await.unwrap();

        assert!(matches!(
            store.read("absent.bak").await,
            Err(Error::FileMissing(_))
        ));
        assert_eq!(store.try_read("absent.bak").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).await.unwrap();

        store.write_atomic("payload.bak", b"bytes").await.unwrap();
        assert!(store.delete("payload.bak").await.unwrap());
        assert!(!store.delete("payload.bak").await.unwrap());
    }
}
