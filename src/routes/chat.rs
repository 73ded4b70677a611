use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::agents::ProducerStream;
use crate::events::StreamEvent;
use crate::models::{AppState, ChatRequest, JobResponse};
use crate::queue::{JobId, JobPayload, JobSnapshot};
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat/message", post(submit_message))
        .route("/api/chat/stream", post(stream_direct))
        .route("/api/chat/stream/{job_id}", get(stream_job))
        .route("/api/chat/job/{job_id}", get(job_status))
        .route("/api/chat/job/{job_id}/cancel", post(cancel_job))
        .with_state(state)
}

/// Ids that do not parse cannot name a job, so they are reported like unknown ones
fn parse_job_id(raw: &str) -> AppResult<JobId> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound(format!("Job {} not found", raw)))
}

fn validated(request: Result<Json<ChatRequest>, JsonRejection>) -> AppResult<ChatRequest> {
    let Json(request) = request.map_err(|rejection| AppError::InvalidRequest(rejection.body_text()))?;
    request.validate()?;
    Ok(request)
}

/// Frame events as SSE `data:` lines
fn sse_response<S>(events: S) -> Response
where
    S: Stream<Item = StreamEvent> + Send + 'static,
{
    let frames = events.map(|event| Event::default().json_data(&event));
    (
        [("x-accel-buffering", "no")],
        Sse::new(frames).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

/// Queue a chat job and return where to stream its results
pub async fn submit_message(
    State(state): State<AppState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> AppResult<Json<JobResponse>> {
    let request = validated(request)?;
    let job = state
        .queue
        .submit(JobPayload::Chat(request.into_payload()))
        .await?;

    info!(job_id = %job.id, "Chat message queued");

    Ok(Json(JobResponse {
        job_id: job.id,
        status: job.status.to_string(),
        stream_url: format!("/api/chat/stream/{}", job.id),
    }))
}

/// Stream a job's events. Disconnecting does not cancel the job; a new request can
/// pick up the events that were not delivered yet.
pub async fn stream_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Response> {
    let job_id = parse_job_id(&job_id)?;
    let reader = state.queue.stream(&job_id).await?;

    info!(job_id = %job_id, "Streaming job results");
    Ok(sse_response(reader.into_stream()))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobSnapshot>> {
    let job_id = parse_job_id(&job_id)?;
    Ok(Json(state.queue.status(&job_id).await?))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobSnapshot>> {
    let job_id = parse_job_id(&job_id)?;
    Ok(Json(state.queue.cancel(&job_id).await?))
}

/// Answer inline without going through the queue
pub async fn stream_direct(
    State(state): State<AppState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> AppResult<Response> {
    let request = validated(request)?;
    info!(message_len = request.message.len(), "Streaming chat response directly");

    let events = state.chat.respond(request.into_payload(), CancellationToken::new());
    Ok(sse_response(until_terminal(events)))
}

/// Map producer output to events that end with exactly one Error or Done
fn until_terminal(mut events: ProducerStream) -> impl Stream<Item = StreamEvent> + Send + 'static {
    async_stream::stream! {
        let mut finished = false;
        while let Some(next) = events.next().await {
            match next {
                Ok(event) => {
                    finished = event.is_terminal();
                    yield event;
                }
                Err(err) => {
                    warn!(error = %err, "Direct chat stream failed");
                    finished = true;
                    yield StreamEvent::error(err.category(), err.category().client_message());
                }
            }
            if finished {
                break;
            }
        }
        if !finished {
            yield StreamEvent::done("Complete");
        }
    }
}
