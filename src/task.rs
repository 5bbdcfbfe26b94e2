use std::{
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
    time::Duration,
};

use tokio::sync::oneshot;

use crate::{
    error::{Error, Result, OK},
    metadata::BackupId,
};

// Pipeline stages in execution order; the index doubles as the progress
// ladder, advanced monotonically via fetch_max.
pub mod stage {
    pub const QUEUED: u8 = 0;
    pub const COLLECT: u8 = 1;
    pub const SERIALIZE: u8 = 2;
    pub const COMPRESS: u8 = 3;
    pub const ENCRYPT: u8 = 4;
    pub const PERSIST: u8 = 5;
    pub const CHECKSUM: u8 = 6;
    pub const DONE: u8 = 7;
}

const STAGES: &[(u8, &str)] = &[
    (0, "queued"),
    (10, "collect"),
    (25, "serialize"),
    (45, "compress"),
    (60, "encrypt"),
    (80, "persist"),
    (90, "checksum"),
    (100, "done"),
];

#[derive(Debug)]
pub struct BackupTask {
    id: BackupId,
    stage: AtomicU8,
    cancelled: AtomicBool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub id: BackupId,
    pub progress: u8,
    pub current_step: &'static str,
}

impl BackupTask {
    pub fn new(id: BackupId) -> Self {
        BackupTask {
            id,
            stage: AtomicU8::new(stage::QUEUED),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> BackupId {
        self.id
    }

    pub fn advance(&self, stage: u8) {
        self.stage.fetch_max(stage, Ordering::SeqCst);
    }

    pub fn status(&self) -> TaskStatus {
        let index = usize::from(self.stage.load(Ordering::SeqCst)).min(STAGES.len() - 1);
        let (progress, current_step) = STAGES[index];
        TaskStatus {
            id: self.id,
            progress,
            current_step,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled(self.id));
        }

        OK
    }
}

// Resolves to the operation's terminal outcome. A timed-out wait leaves the
// underlying operation running; poll again or check active tasks.
#[derive(Debug)]
pub struct OperationHandle<T> {
    id: BackupId,
    receiver: oneshot::Receiver<T>,
}

impl<T> OperationHandle<T> {
    pub(crate) fn new(id: BackupId, receiver: oneshot::Receiver<T>) -> Self {
        OperationHandle { id, receiver }
    }

    pub fn id(&self) -> BackupId {
        self.id
    }

    pub fn try_result(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    pub async fn wait(self) -> Result<T> {
        self.receiver.await.map_err(|_| Error::WorkerLost)
    }

    pub async fn wait_timeout(&mut self, limit: Duration) -> Result<T> {
        match tokio::time::timeout(limit, &mut self.receiver).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::WorkerLost),
            Err(_) => Err(Error::WaitTimedOut(limit)),
        }
    }
}
