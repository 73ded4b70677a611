use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{info, warn};

use crate::config::LLMConfig;
use crate::types::{AppError, AppResult, LLMRequest, LLMResponse};
use crate::utils::RetryPolicy;

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;

    /// Text deltas in generation order. Adapters without native streaming yield the whole
    /// completion as a single delta.
    async fn create_chat_completion_stream(
        &self,
        request: &LLMRequest,
    ) -> AppResult<BoxStream<'static, AppResult<String>>> {
        let response = self.create_chat_completion(request).await?;
        Ok(stream::once(async move { Ok(response.content) }).boxed())
    }
}

/// Configuration for one LLM provider
#[derive(Debug, Clone)]
pub struct LLMProviderConfig {
    pub name: String,
    pub api_key: String,
    pub retry: RetryPolicy,
}

pub struct LLM {
    adapter: Box<dyn LLMAdapter>,
    provider_name: String,
}

impl LLM {
    pub fn new(provider: LLMProviderConfig) -> AppResult<Self> {
        let adapter: Box<dyn LLMAdapter> = match provider.name.as_str() {
            "openai" => Box::new(
                crate::llm::openai::OpenAIAdapter::new(&provider.api_key).with_retry_policy(provider.retry),
            ),
            "groq" => Box::new(
                crate::llm::groq::GroqAdapter::new(&provider.api_key).with_retry_policy(provider.retry),
            ),
            "openrouter" => Box::new(
                crate::llm::openrouter::OpenRouterAdapter::new(&provider.api_key)
                    .with_retry_policy(provider.retry),
            ),
            "offline" => Box::new(crate::llm::offline::OfflineAdapter::new()),
            other => {
                return Err(AppError::InvalidRequest(format!(
                    "Unsupported LLM provider: {}",
                    other
                )))
            }
        };

        Ok(Self {
            adapter,
            provider_name: provider.name,
        })
    }

    /// Build the configured provider, or the offline adapter when it has no API key
    pub fn from_config(config: &LLMConfig) -> AppResult<Self> {
        let name = match config.active_api_key() {
            Some(_) => config.provider.clone(),
            None => {
                warn!(provider = %config.provider, "No LLM API key configured, using offline replies");
                "offline".to_string()
            }
        };

        let llm = Self::new(LLMProviderConfig {
            name,
            api_key: config.active_api_key().unwrap_or_default().to_string(),
            retry: RetryPolicy::new(config.max_retries, std::time::Duration::from_millis(500)),
        })?;

        info!(provider = %llm.provider_name, model = %config.model, "LLM provider ready");
        Ok(llm)
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }
}

#[async_trait]
impl LLMAdapter for LLM {
    fn name(&self) -> &str {
        self.adapter.name()
    }

    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.adapter.create_chat_completion(request).await
    }

    async fn create_chat_completion_stream(
        &self,
        request: &LLMRequest,
    ) -> AppResult<BoxStream<'static, AppResult<String>>> {
        self.adapter.create_chat_completion_stream(request).await
    }
}
