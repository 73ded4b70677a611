//! Chat Agent
//!
//! Answers a chat message grounded in the uploaded documents:
//!
//! 1. search the document index (skipped when nothing is indexed)
//! 2. build a prompt from the excerpts, recent history and the question
//! 3. stream the model's reply as text deltas
//! 4. emit a citation per excerpt and a source card per document
//! 5. finish with `done`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agents::{Producer, ProducerError, ProducerStream};
use crate::config::LLMConfig;
use crate::events::{Citation, SourceCard, StreamEvent, ToolCallStatus, ToolCallType, UiComponentData};
use crate::llm::LLMAdapter;
use crate::models::{ChatMessage, MessageRole};
use crate::queue::{ChatPayload, JobPayload};
use crate::search::{DocumentExcerpt, DocumentIndex};
use crate::types::{AppResult, LLMMessage, LLMRequest};
use crate::utils::truncate_chars;

const MAX_SEARCH_RESULTS: usize = 10;
const MAX_CONTEXT_CHARS: usize = 2000;
const HISTORY_TURNS: usize = 3;
const CITATION_SNIPPET_CHARS: usize = 200;
const SOURCE_SNIPPET_CHARS: usize = 150;
const CITATION_CONFIDENCE: f32 = 0.9;

const SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Use inline citations like [1], [2] when referencing documents.";

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationSettings {
    pub fn from_config(config: &LLMConfig) -> Self {
        Self {
            provider: config.provider.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[derive(Clone)]
pub struct ChatAgent {
    documents: Arc<dyn DocumentIndex>,
    llm: Arc<dyn LLMAdapter>,
    settings: GenerationSettings,
}

impl ChatAgent {
    pub fn new(
        documents: Arc<dyn DocumentIndex>,
        llm: Arc<dyn LLMAdapter>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            documents,
            llm,
            settings,
        }
    }

    /// Event stream answering `request`. Stops with `ProducerError::Cancelled` once
    /// `cancel` fires.
    pub fn respond(&self, request: ChatPayload, cancel: CancellationToken) -> ProducerStream {
        let documents = Arc::clone(&self.documents);
        let llm = Arc::clone(&self.llm);
        let settings = self.settings.clone();

        let events = async_stream::try_stream! {
            info!(
                message_len = request.message.len(),
                history = request.history.len(),
                "Generating chat reply"
            );

            let mut excerpts: Vec<DocumentExcerpt> = Vec::new();
            if !documents.is_empty() {
                yield StreamEvent::tool_call(
                    ToolCallType::SearchingDocuments,
                    ToolCallStatus::InProgress,
                    "Searching uploaded documents",
                );
                let started = Instant::now();
                excerpts = documents.search(&request.message, request.pdf_ids.as_deref(), MAX_SEARCH_RESULTS);
                debug!(hits = excerpts.len(), "Document search finished");
                yield StreamEvent::tool_call(
                    ToolCallType::SearchingDocuments,
                    ToolCallStatus::Completed,
                    format!("Found {} relevant passages", excerpts.len()),
                )
                .with_duration(started.elapsed());
            }

            let llm_request = LLMRequest {
                provider: settings.provider.clone(),
                model: settings.model.clone(),
                messages: vec![LLMMessage::user(build_prompt(&excerpts, &request.history, &request.message))],
                max_tokens: Some(settings.max_tokens),
                temperature: Some(settings.temperature),
                system_instruction: Some(SYSTEM_PROMPT.to_string()),
            };

            yield StreamEvent::tool_call(
                ToolCallType::GeneratingResponse,
                ToolCallStatus::InProgress,
                "Generating response",
            );
            let started = Instant::now();

            if cancel.is_cancelled() {
                Err::<(), _>(ProducerError::Cancelled)?;
            }
            let mut deltas = llm
                .create_chat_completion_stream(&llm_request)
                .await
                .map_err(ProducerError::from)?;

            let mut reply_len = 0;
            while let Some(delta) = next_delta(&mut deltas, &cancel).await? {
                if !delta.is_empty() {
                    reply_len += delta.len();
                    yield StreamEvent::text(delta, false);
                }
            }
            yield StreamEvent::text("", true);
            yield StreamEvent::tool_call(
                ToolCallType::GeneratingResponse,
                ToolCallStatus::Completed,
                "Response generated",
            )
            .with_duration(started.elapsed());
            info!(provider = %llm.name(), reply_len, "Chat reply generated");

            for citation in citations(&excerpts) {
                yield StreamEvent::citation(citation);
            }
            for card in source_cards(documents.as_ref(), &excerpts) {
                yield StreamEvent::ui_component(UiComponentData::SourceCard(card));
            }

            yield StreamEvent::done("Complete");
        };

        events.boxed()
    }
}

impl Producer for ChatAgent {
    fn produce(&self, payload: Arc<JobPayload>, cancel: CancellationToken) -> ProducerStream {
        match payload.as_chat() {
            Some(chat) => self.respond(chat.clone(), cancel),
            None => futures::stream::once(async {
                Err(ProducerError::InvalidPayload("expected a chat payload".to_string()))
            })
            .boxed(),
        }
    }
}

async fn next_delta(
    deltas: &mut BoxStream<'static, AppResult<String>>,
    cancel: &CancellationToken,
) -> Result<Option<String>, ProducerError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProducerError::Cancelled),
        next = deltas.next() => match next {
            Some(Ok(delta)) => Ok(Some(delta)),
            Some(Err(e)) => Err(ProducerError::from(e)),
            None => Ok(None),
        },
    }
}

fn build_context(excerpts: &[DocumentExcerpt]) -> String {
    if excerpts.is_empty() {
        return String::new();
    }

    let mut context = String::from("Here are relevant document excerpts to reference in your answer:\n");
    for (i, excerpt) in excerpts.iter().enumerate() {
        context.push_str(&format!(
            "\nDocument [{number}]: {title}\nSource: {filename} (Page {page})\nContent:\n{text}\n---\n",
            number = i + 1,
            title = excerpt.title,
            filename = excerpt.filename,
            page = excerpt.page,
            text = truncate_chars(&excerpt.text, MAX_CONTEXT_CHARS),
        ));
    }

    context.push_str(
        r#"
Instructions:
1. Use the document content above to answer the question
2. Include inline citations like [1], [2] when referencing documents
3. Be accurate and cite specific sections
4. If the documents don't contain relevant information, say so
"#,
    );
    context
}

fn build_prompt(excerpts: &[DocumentExcerpt], history: &[ChatMessage], message: &str) -> String {
    let recent = &history[history.len().saturating_sub(HISTORY_TURNS)..];
    let history_text = recent
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                MessageRole::User => "User",
                MessageRole::Assistant | MessageRole::System => "Assistant",
            };
            format!("{}: {}", speaker, turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{context}\n\nPrevious conversation:\n{history}\n\nQuestion: {message}",
        context = build_context(excerpts),
        history = history_text,
        message = message,
    )
}

fn citations(excerpts: &[DocumentExcerpt]) -> Vec<Citation> {
    excerpts
        .iter()
        .enumerate()
        .map(|(i, excerpt)| Citation {
            id: uuid::Uuid::new_v4().to_string(),
            number: i as u32 + 1,
            pdf_id: excerpt.pdf_id.clone(),
            page_number: excerpt.page,
            text_snippet: format!("{}...", truncate_chars(&excerpt.text, CITATION_SNIPPET_CHARS)),
            highlight_start: 0,
            highlight_end: excerpt.text.chars().count().min(CITATION_SNIPPET_CHARS),
            confidence: CITATION_CONFIDENCE,
        })
        .collect()
}

/// One card per distinct document, in order of first appearance
fn source_cards(documents: &dyn DocumentIndex, excerpts: &[DocumentExcerpt]) -> Vec<SourceCard> {
    let mut order: Vec<&DocumentExcerpt> = Vec::new();
    let mut pages: HashMap<&str, Vec<u32>> = HashMap::new();

    for excerpt in excerpts {
        let entry = pages.entry(excerpt.pdf_id.as_str()).or_default();
        if entry.is_empty() {
            order.push(excerpt);
        }
        entry.push(excerpt.page);
    }

    order
        .into_iter()
        .map(|first| SourceCard {
            pdf_id: first.pdf_id.clone(),
            filename: first.filename.clone(),
            title: first.title.clone(),
            page_count: documents
                .document(&first.pdf_id)
                .map(|info| info.page_count)
                .unwrap_or_default(),
            relevant_pages: pages.remove(first.pdf_id.as_str()).unwrap_or_default(),
            snippet: format!("{}...", truncate_chars(&first.text, SOURCE_SNIPPET_CHARS)),
        })
        .collect()
}
