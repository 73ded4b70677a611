use crate::agents::ChatAgent;
use crate::config::Config;
use crate::queue::{JobId, QueueService, QueueStats};
use validator::Validate;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub queue: QueueService,
    pub chat: ChatAgent,
}

// Conversation types shared by the API and job payloads

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    #[serde(default = "new_message_id")]
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default = "chrono::Utc::now")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role,
            content: content.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

// API Request/Response types

#[derive(Debug, Clone, serde::Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 4000))]
    pub message: String,
    pub conversation_id: Option<String>,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub history: Vec<ChatMessage>,
    pub pdf_ids: Option<Vec<String>>,
}

impl ChatRequest {
    pub fn into_payload(self) -> crate::queue::ChatPayload {
        crate::queue::ChatPayload {
            message: self.message,
            history: self.history,
            conversation_id: self.conversation_id,
            pdf_ids: self.pdf_ids,
        }
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct JobResponse {
    pub job_id: JobId,
    pub status: String,
    pub stream_url: String,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: Option<String>,
    pub code: String,
}

#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub services: HealthServices,
    pub queue: QueueStats,
}

#[derive(Debug, serde::Serialize)]
pub struct HealthServices {
    pub api: String,
    pub queue: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_defaults() {
        let message: ChatMessage =
            serde_json::from_str(r#"{"role": "user", "content": "hi"}"#).unwrap();

        assert_eq!(message.role, MessageRole::User);
        assert!(uuid::Uuid::parse_str(&message.id).is_ok());
    }

    #[test]
    fn test_chat_request_validation() {
        let ok: ChatRequest = serde_json::from_str(r#"{"message": "What is the refund policy?"}"#).unwrap();
        assert!(ok.validate().is_ok());
        assert!(ok.history.is_empty());

        let empty: ChatRequest = serde_json::from_str(r#"{"message": ""}"#).unwrap();
        assert!(empty.validate().is_err());

        let long = ChatRequest {
            message: "a".repeat(4001),
            conversation_id: None,
            history: vec![],
            pdf_ids: None,
        };
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let result = serde_json::from_str::<ChatMessage>(r#"{"role": "robot", "content": "hi"}"#);
        assert!(result.is_err());
    }
}
