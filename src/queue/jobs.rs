// Job definitions for the in-memory queue

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::ErrorCategory;
use crate::models::ChatMessage;

pub type JobId = Uuid;

/// Selects which producer runs a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Chat,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Chat => "chat",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(TaskType::Chat),
            other => Err(format!("Unknown task type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Queued -> Processing -> {Completed | Failed}; Cancelled only from a live state
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Processing) => true,
            (JobStatus::Queued, JobStatus::Cancelled) => true,
            (JobStatus::Processing, JobStatus::Completed) => true,
            (JobStatus::Processing, JobStatus::Failed) => true,
            (JobStatus::Processing, JobStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input captured at submission. Owned and shared read-only, so later changes to the
/// caller's request cannot reach a queued job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", rename_all = "snake_case")]
pub enum JobPayload {
    Chat(ChatPayload),
}

impl JobPayload {
    pub fn task_type(&self) -> TaskType {
        match self {
            JobPayload::Chat(_) => TaskType::Chat,
        }
    }

    pub fn as_chat(&self) -> Option<&ChatPayload> {
        match self {
            JobPayload::Chat(chat) => Some(chat),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    pub conversation_id: Option<String>,
    /// Restrict document search to these documents
    pub pdf_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub task_type: TaskType,
    pub payload: Arc<JobPayload>,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub(crate) cancel: CancellationToken,
}

impl Job {
    pub(crate) fn new(payload: JobPayload, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: payload.task_type(),
            payload: Arc::new(payload),
            status: JobStatus::Queued,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancel,
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            task_type: self.task_type,
            status: self.status,
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Point-in-time view of a job as returned by the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub task_type: TaskType,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Why a job did not complete
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub category: ErrorCategory,
    pub message: String,
}

impl JobFailure {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// Failure carrying only the category's client-facing text
    pub fn from_category(category: ErrorCategory) -> Self {
        Self::new(category, category.client_message())
    }

    pub fn unknown_task_type(task_type: TaskType) -> Self {
        Self::new(
            ErrorCategory::UnknownTaskType,
            format!("No producer registered for task type '{}'", task_type),
        )
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Cancelled, reason)
    }

    /// Terminal status this failure leads to
    pub fn status(&self) -> JobStatus {
        match self.category {
            ErrorCategory::Cancelled => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        }
    }
}
