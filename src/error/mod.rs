mod from;

use std::{fmt::Display, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::metadata::{BackupId, BackupStatus};

pub type Result<T> = std::result::Result<T, Error>;

pub const OK: Result<()> = Ok(());

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("no backup found for id `{0}`")]
    BackupNotFound(BackupId),

    #[error("backup `{0}` is still in flight")]
    BackupInFlight(BackupId),

    #[error("active backup limit of {0} reached")]
    TooManyActiveBackups(usize),

    #[error("backup `{id}` is {status}, expected {expected}")]
    WrongStatus {
        id: BackupId,
        status: BackupStatus,
        expected: BackupStatus,
    },

    #[error("backup `{0}` has no recorded size or checksums")]
    MetadataIncomplete(BackupId),

    #[error("backup file `{0}` is missing")]
    FileMissing(PathBuf),

    #[error("backup file has {actual} bytes, expected {expected}")]
    SizeMismatch { actual: u64, expected: u64 },

    #[error("{algorithm} digest is `{actual}`, expected `{expected}`")]
    ChecksumMismatch {
        algorithm: &'static str,
        actual: String,
        expected: String,
    },

    #[error("snapshot version is {actual}, expected {expected}")]
    SnapshotVersionMismatch { actual: u32, expected: u32 },

    #[error("payload is truncated at {0} bytes")]
    PayloadTruncated(usize),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("data collection failed: {0}")]
    CollectionFailed(String),

    #[error("restore apply step failed: {0}")]
    ApplyFailed(String),

    #[error("safety backup failed: {0}")]
    SafetyBackupFailed(String),

    #[error("backup `{0}` was cancelled")]
    Cancelled(BackupId),

    #[error("operation is still running after {0:?}")]
    WaitTimedOut(Duration),

    #[error("operation worker is gone")]
    WorkerLost,

    #[error(transparent)]
    Other(AnyError),
}

#[derive(Error, Debug)]
pub struct AnyError(anyhow::Error);

impl Display for AnyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for AnyError {
    fn eq(&self, _other: &Self) -> bool {
        false
    }
}

impl Error {
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Other(AnyError(error.into()))
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::Other(AnyError(error))
    }
}
