use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Backup,
    Restore,
    Maintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub recipient: String,
    pub category: Category,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    pub detail: Option<String>,
}

// Delivery and persistence are entirely the sink's concern; the engine only
// emits.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Delete,
    Restore,
    Cleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub actor: String,
    pub action: AuditAction,
    pub target: String,
    pub outcome: AuditOutcome,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(actor: &str, action: AuditAction, target: String, outcome: AuditOutcome) -> Self {
        AuditRecord {
            actor: actor.to_owned(),
            action,
            target,
            outcome,
            timestamp: Utc::now(),
        }
    }
}

// The engine never depends on audit succeeding.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

// Default sink that writes events to the log facade.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, notification: Notification) {
        let Notification {
            recipient,
            category,
            priority,
            title,
            message,
            detail,
        } = notification;
        let detail = detail.map(|d| format!(" ({d})")).unwrap_or_default();
        info!("[{category}/{priority}] {title}: {message}{detail} -> {recipient}");
    }
}

#[async_trait]
impl AuditSink for LogSink {
    async fn record(&self, record: AuditRecord) {
        let AuditRecord {
            actor,
            action,
            target,
            outcome,
            timestamp,
        } = record;
        debug!("audit: {actor} {action} {target} {outcome} at {timestamp}");
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Backup => "backup",
            Category::Restore => "restore",
            Category::Maintenance => "maintenance",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditAction::Create => "create",
            AuditAction::Delete => "delete",
            AuditAction::Restore => "restore",
            AuditAction::Cleanup => "cleanup",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditOutcome::Success => "succeeded",
            AuditOutcome::Failure => "failed",
        };
        write!(f, "{name}")
    }
}
