//! Agent System
//!
//! Agents are the producers behind queued jobs. Given a job's payload, an agent
//! yields the ordered sequence of [`StreamEvent`]s that make up the reply:
//!
//! ```text
//! JobPayload ──► Producer::produce ──► Text / ToolCall / Citation / UIComponent ... Done
//! ```
//!
//! Producers are registered per [`TaskType`]; a job whose task type has no registered
//! producer fails with an `unknown_task_type` error.

pub mod chat;

pub use chat::{ChatAgent, GenerationSettings};

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::BoxStream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::events::{ErrorCategory, StreamEvent};
use crate::queue::{JobPayload, TaskType};
use crate::types::AppError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProducerError {
    #[error("Failed to generate response: {0}")]
    Generation(String),

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Generation was cancelled")]
    Cancelled,

    #[error("Internal producer error: {0}")]
    Internal(String),
}

impl ProducerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProducerError::Generation(_) => ErrorCategory::GenerationFailed,
            ProducerError::Cancelled => ErrorCategory::Cancelled,
            ProducerError::InvalidPayload(_) | ProducerError::Internal(_) => {
                ErrorCategory::InternalError
            }
        }
    }
}

impl From<AppError> for ProducerError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::LLMApi(msg) | AppError::LLMUnavailable(msg) => ProducerError::Generation(msg),
            other => ProducerError::Internal(other.to_string()),
        }
    }
}

pub type ProducerStream = BoxStream<'static, Result<StreamEvent, ProducerError>>;

/// Turns a job payload into its ordered event sequence.
///
/// `cancel` fires when the job is cancelled; implementations should stop at their next
/// suspension point. The caller also stops polling the stream once it fires.
pub trait Producer: Send + Sync {
    fn produce(&self, payload: Arc<JobPayload>, cancel: CancellationToken) -> ProducerStream;
}

/// Producers keyed by the task type they handle
#[derive(Clone, Default)]
pub struct ProducerRegistry {
    producers: HashMap<TaskType, Arc<dyn Producer>>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, task_type: TaskType, producer: Arc<dyn Producer>) -> Self {
        self.producers.insert(task_type, producer);
        self
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn Producer>> {
        self.producers.get(&task_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }
}
