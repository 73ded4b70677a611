// OpenAI-compatible chat-completions adapter built on async-openai. Also backs the Groq
// and OpenRouter adapters, which only differ in their API base.

use std::time::Duration;

use async_openai::config::{Config, OpenAIConfig};
use async_openai::error::{ApiError, OpenAIError};
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    ChatCompletionResponseStream, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    CreateChatCompletionStreamResponse, FinishReason,
};
use async_openai::Client;
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use futures::stream::{BoxStream, StreamExt};
use tracing::{debug, warn};

use crate::llm::provider::LLMAdapter;
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest, LLMResponse, TokenUsage};
use crate::utils::{with_retry, RetryPolicy};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAIAdapter {
    client: Client<OpenAIConfig>,
    retry: RetryPolicy,
}

fn is_transient(error: &AppError) -> bool {
    matches!(error, AppError::LLMUnavailable(_))
}

fn is_rate_limit(error: &ApiError) -> bool {
    let quota = error.r#type.as_deref() == Some("insufficient_quota")
        || error.code.as_deref() == Some("insufficient_quota");
    let limited = error.code.as_deref() == Some("rate_limit_exceeded")
        || matches!(error.r#type.as_deref(), Some("rate_limit_error" | "requests" | "tokens"));
    limited && !quota
}

/// Transport failures, rate limits and 5xx come back as `LLMUnavailable` so the caller can
/// retry them. The provider's own text only goes to the log.
fn map_openai_error(error: OpenAIError) -> AppError {
    warn!(error = %error, "LLM provider request failed");

    match error {
        OpenAIError::Reqwest(_) | OpenAIError::StreamError(_) => {
            AppError::LLMUnavailable("provider could not be reached".to_string())
        }
        OpenAIError::ApiError(api) if is_rate_limit(&api) => {
            AppError::LLMUnavailable("provider rate limit reached".to_string())
        }
        // 5xx bodies are passed through untyped
        OpenAIError::ApiError(api) if api.r#type.is_none() && api.code.is_none() => {
            AppError::LLMUnavailable("provider returned a server error".to_string())
        }
        OpenAIError::ApiError(_) => AppError::LLMApi("provider rejected the request".to_string()),
        OpenAIError::JSONDeserialize(..) => {
            AppError::LLMApi("provider returned an invalid response".to_string())
        }
        _ => AppError::LLMApi("request could not be built".to_string()),
    }
}

fn finish_reason_name(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
        FinishReason::FunctionCall => "function_call",
    }
}

fn delta_text(chunk: CreateChatCompletionStreamResponse) -> Option<String> {
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
}

impl OpenAIAdapter {
    pub fn new(api_key: &str) -> Self {
        Self::new_with_api_base(api_key, OPENAI_API_BASE)
    }

    pub fn new_with_api_base(api_key: &str, api_base: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base.trim_end_matches('/'));

        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        // Retries go through `RetryPolicy`, so the client gives up after its first attempt
        let no_backoff = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();

        let client = Client::with_config(config)
            .with_http_client(http_client)
            .with_backoff(no_backoff);

        Self {
            client,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn api_base(&self) -> &str {
        self.client.config().api_base()
    }

    fn request_messages(request: &LLMRequest) -> AppResult<Vec<ChatCompletionRequestMessage>> {
        let system: Option<ChatCompletionRequestMessage> = request
            .system_instruction
            .clone()
            .map(|content| ChatCompletionRequestSystemMessage::from(content).into());

        let history = request.messages.iter().map(|m: &LLMMessage| -> AppResult<ChatCompletionRequestMessage> {
            let content = m.content.clone();
            match m.role.as_str() {
                "user" => Ok(ChatCompletionRequestUserMessage::from(content).into()),
                "assistant" => Ok(ChatCompletionRequestAssistantMessage::from(content).into()),
                "system" => Ok(ChatCompletionRequestSystemMessage::from(content).into()),
                other => Err(AppError::InvalidRequest(format!("Unknown message role: {}", other))),
            }
        });

        system.into_iter().map(Ok).chain(history).collect()
    }

    fn build_request(request: &LLMRequest) -> AppResult<CreateChatCompletionRequest> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&request.model)
            .messages(Self::request_messages(request)?);

        if let Some(max_tokens) = request.max_tokens {
            args.max_completion_tokens(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            args.temperature(temperature);
        }

        args.build().map_err(map_openai_error)
    }

    /// Open the stream and wait for its first chunk, so that connection and status errors
    /// surface here where they can still be retried.
    async fn open_stream_once(
        &self,
        body: CreateChatCompletionRequest,
    ) -> AppResult<(ChatCompletionResponseStream, Option<CreateChatCompletionStreamResponse>)> {
        let mut stream = self
            .client
            .chat()
            .create_stream(body)
            .await
            .map_err(map_openai_error)?;

        match stream.next().await {
            Some(Err(e)) => Err(map_openai_error(e)),
            Some(Ok(first)) => Ok((stream, Some(first))),
            None => Ok((stream, None)),
        }
    }
}

#[async_trait]
impl LLMAdapter for OpenAIAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        let body = Self::build_request(request)?;

        let response = with_retry(
            self.retry,
            || {
                let body = body.clone();
                async move { self.client.chat().create(body).await.map_err(map_openai_error) }
            },
            is_transient,
        )
        .await?;

        let usage = response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LLMApi("provider returned no choices".to_string()))?;

        Ok(LLMResponse {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice
                .finish_reason
                .map(finish_reason_name)
                .unwrap_or("stop")
                .to_string(),
            usage,
        })
    }

    async fn create_chat_completion_stream(
        &self,
        request: &LLMRequest,
    ) -> AppResult<BoxStream<'static, AppResult<String>>> {
        let body = Self::build_request(request)?;

        let (mut chunks, first) = with_retry(
            self.retry,
            || self.open_stream_once(body.clone()),
            is_transient,
        )
        .await?;
        debug!(model = %request.model, "Completion stream opened");

        let deltas = async_stream::try_stream! {
            if let Some(content) = first.and_then(delta_text) {
                yield content;
            }

            while let Some(chunk) = chunks.next().await {
                let chunk = chunk.map_err(map_openai_error)?;
                if let Some(content) = delta_text(chunk) {
                    yield content;
                }
            }
        };

        Ok(deltas.boxed())
    }
}
