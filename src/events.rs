//! Stream Event Model
//!
//! Every unit of output a job produces is a [`StreamEvent`]: a closed, tagged union of
//! payloads plus the time it was captured. Events serialize as
//! `{ "type": <kind>, "data": {...}, "timestamp": <ISO8601> }` and are framed for
//! Server-Sent-Events as `data: <json>\n\n`.
//!
//! Stream order is authoritative; the timestamp is only for diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminator of a [`StreamEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Text,
    ToolCall,
    Citation,
    UiComponent,
    Error,
    Done,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Text => "text",
            EventKind::ToolCall => "tool_call",
            EventKind::Citation => "citation",
            EventKind::UiComponent => "ui_component",
            EventKind::Error => "error",
            EventKind::Done => "done",
        }
    }

    /// Error and Done end a job's event sequence
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Error | EventKind::Done)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One streamed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

/// Kind-specific event data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Text(TextChunk),
    ToolCall(ToolCallUpdate),
    Citation(Citation),
    UiComponent(UiComponent),
    Error(ErrorInfo),
    Done(DoneInfo),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub content: String,
    #[serde(default)]
    pub is_complete: bool,
}

/// Reasoning/progress steps shown while a reply is being built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallType {
    Thinking,
    SearchingDocuments,
    RetrievingPdf,
    AnalyzingContent,
    GeneratingResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    InProgress,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallUpdate {
    #[serde(rename = "type")]
    pub kind: ToolCallType,
    pub status: ToolCallStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// A numbered reference into a document page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    pub number: u32,
    pub pdf_id: String,
    pub page_number: u32,
    pub text_snippet: String,
    /// Character offsets into the page text
    pub highlight_start: usize,
    pub highlight_end: usize,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiComponent {
    pub id: String,
    #[serde(flatten)]
    pub body: UiComponentData,
}

/// Structured payloads a client can render inline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum UiComponentData {
    InfoCard(InfoCard),
    DataTable(DataTable),
    Chart(Chart),
    SourceCard(SourceCard),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoCard {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub chart_type: String, // bar, line, pie
    pub title: String,
    pub labels: Vec<String>,
    pub datasets: Vec<serde_json::Value>,
}

/// Metadata card for a cited document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCard {
    pub pdf_id: String,
    pub filename: String,
    pub title: String,
    pub page_count: u32,
    pub relevant_pages: Vec<u32>,
    pub snippet: String,
}

/// Error categories exposed at the stream boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    GenerationFailed,
    UnknownTaskType,
    ResultBufferFull,
    Cancelled,
    NotFound,
    AlreadyStreaming,
    InternalError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::GenerationFailed => "generation_failed",
            ErrorCategory::UnknownTaskType => "unknown_task_type",
            ErrorCategory::ResultBufferFull => "result_buffer_full",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::AlreadyStreaming => "already_streaming",
            ErrorCategory::InternalError => "internal_error",
        }
    }
}

impl ErrorCategory {
    /// Text sent to clients for this category. Underlying error details only go to logs.
    pub const fn client_message(&self) -> &'static str {
        match self {
            ErrorCategory::GenerationFailed => "Failed to generate response",
            ErrorCategory::UnknownTaskType => "No handler is registered for this task type",
            ErrorCategory::ResultBufferFull => "The stream reader fell too far behind",
            ErrorCategory::Cancelled => "Job was cancelled",
            ErrorCategory::NotFound => "Job not found",
            ErrorCategory::AlreadyStreaming => "Another client is already streaming this job",
            ErrorCategory::InternalError => "An internal error occurred",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error: ErrorCategory,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneInfo {
    pub message: String,
}

impl StreamEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn text(content: impl Into<String>, is_complete: bool) -> Self {
        Self::new(EventPayload::Text(TextChunk {
            content: content.into(),
            is_complete,
        }))
    }

    pub fn tool_call(kind: ToolCallType, status: ToolCallStatus, message: impl Into<String>) -> Self {
        Self::new(EventPayload::ToolCall(ToolCallUpdate {
            kind,
            status,
            message: message.into(),
            duration_ms: None,
        }))
    }

    /// Attach the elapsed time to a tool call; other kinds are returned unchanged
    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        if let EventPayload::ToolCall(update) = &mut self.payload {
            update.duration_ms = Some(duration.as_millis() as u64);
        }
        self
    }

    pub fn citation(citation: Citation) -> Self {
        Self::new(EventPayload::Citation(citation))
    }

    pub fn ui_component(body: UiComponentData) -> Self {
        Self::new(EventPayload::UiComponent(UiComponent {
            id: uuid::Uuid::new_v4().to_string(),
            body,
        }))
    }

    pub fn error(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self::new(EventPayload::Error(ErrorInfo {
            error: category,
            message: message.into(),
        }))
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self::new(EventPayload::Done(DoneInfo {
            message: message.into(),
        }))
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Text(_) => EventKind::Text,
            EventPayload::ToolCall(_) => EventKind::ToolCall,
            EventPayload::Citation(_) => EventKind::Citation,
            EventPayload::UiComponent(_) => EventKind::UiComponent,
            EventPayload::Error(_) => EventKind::Error,
            EventPayload::Done(_) => EventKind::Done,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    /// Serialize as one Server-Sent-Events frame: `data: <json>\n\n`
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}
