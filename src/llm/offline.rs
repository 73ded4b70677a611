// Fallback used when no provider API key is configured

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::llm::provider::LLMAdapter;
use crate::types::{AppResult, LLMRequest, LLMResponse, TokenUsage};

/// Answers without calling out to a model, so the service stays usable in development
#[derive(Debug, Default, Clone)]
pub struct OfflineAdapter;

impl OfflineAdapter {
    pub fn new() -> Self {
        Self
    }

    /// The question the prompt was built for: the text after the last `Question:` marker,
    /// or the whole last user message
    fn question(request: &LLMRequest) -> &str {
        let content = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        match content.rfind("Question:") {
            Some(idx) => content[idx + "Question:".len()..].trim(),
            None => content.trim(),
        }
    }

    fn simple_response(question: &str) -> String {
        format!(
            "I received your question: \"{}\"\n\n\
            To provide you with accurate, document-grounded answers, please ensure an LLM API key is configured.\n\n\
            In the meantime, I can help you refine your question or point you to the uploaded documents.",
            question
        )
    }
}

#[async_trait]
impl LLMAdapter for OfflineAdapter {
    fn name(&self) -> &str {
        "offline"
    }

    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        let content = Self::simple_response(Self::question(request));
        Ok(LLMResponse {
            content,
            finish_reason: "stop".to_string(),
            usage: TokenUsage::default(),
        })
    }

    async fn create_chat_completion_stream(
        &self,
        request: &LLMRequest,
    ) -> AppResult<BoxStream<'static, AppResult<String>>> {
        let content = Self::simple_response(Self::question(request));
        let words: Vec<AppResult<String>> = content
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        Ok(stream::iter(words).boxed())
    }
}
