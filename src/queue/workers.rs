// Worker loop: takes queued jobs one at a time, runs the registered producer and
// relays its events into the job's result channel.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::channel::{ChannelError, ResultWriter};
use super::jobs::{JobFailure, JobId, JobPayload, JobStatus, TaskType};
use super::registry::JobRegistry;
use crate::agents::{ProducerRegistry, ProducerStream};
use crate::events::{ErrorCategory, EventPayload, StreamEvent};

pub(crate) const CANCELLED_MESSAGE: &str = ErrorCategory::Cancelled.client_message();

/// A submitted job waiting for a worker, carrying the write end of its channel
pub(crate) struct QueuedJob {
    pub job_id: JobId,
    pub task_type: TaskType,
    pub payload: Arc<JobPayload>,
    pub writer: ResultWriter,
    pub cancel: CancellationToken,
}

/// Receiving side of the pending queue, shared by all workers
pub(crate) type JobReceiver = Arc<Mutex<mpsc::Receiver<QueuedJob>>>;

enum Poll {
    Job(QueuedJob),
    Idle,
    Closed,
}

pub struct Worker {
    id: usize,
    registry: JobRegistry,
    producers: ProducerRegistry,
    queue: JobReceiver,
    poll_interval: Duration,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        registry: JobRegistry,
        producers: ProducerRegistry,
        queue: JobReceiver,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id,
            registry,
            producers,
            queue,
            poll_interval,
        }
    }

    /// Process jobs until `shutdown` fires. A job already being processed is finished
    /// first; it only stops early if its own cancellation token fires.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(worker = self.id, "Worker started");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.poll() => next,
            };

            match next {
                Poll::Job(job) => self.process(job).await,
                Poll::Idle => continue,
                Poll::Closed => break,
            }
        }

        info!(worker = self.id, "Worker stopped");
    }

    async fn poll(&self) -> Poll {
        let recv = async {
            let mut queue = self.queue.lock().await;
            queue.recv().await
        };

        match tokio::time::timeout(self.poll_interval, recv).await {
            Ok(Some(job)) => Poll::Job(job),
            Ok(None) => Poll::Closed,
            Err(_) => Poll::Idle,
        }
    }

    pub(crate) async fn process(&self, job: QueuedJob) {
        let QueuedJob {
            job_id,
            task_type,
            payload,
            mut writer,
            cancel,
        } = job;

        if let Err(e) = self
            .registry
            .transition(&job_id, JobStatus::Processing, None)
            .await
        {
            // Cancelled (or evicted) while it waited in the queue. Whichever of this push
            // and the canceller's terminate lands second is refused, so the stream ends
            // with exactly one Error event.
            debug!(worker = self.id, job_id = %job_id, error = %e, "Skipping job");
            if let Err(e) = writer
                .push(StreamEvent::error(ErrorCategory::Cancelled, CANCELLED_MESSAGE))
                .await
            {
                debug!(job_id = %job_id, error = %e, "Stream already terminated");
            }
            writer.close();
            return;
        }

        info!(worker = self.id, job_id = %job_id, task_type = %task_type, "Processing job");

        let outcome = match self.producers.get(task_type) {
            None => Err(JobFailure::unknown_task_type(task_type)),
            Some(producer) => {
                let run = async {
                    let events = producer.produce(payload, cancel.clone());
                    relay(events, &mut writer, &cancel).await
                };

                match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let reason = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        error!(worker = self.id, job_id = %job_id, panic = %reason, "Producer panicked");
                        Err(JobFailure::new(
                            ErrorCategory::InternalError,
                            "The response generator stopped unexpectedly",
                        ))
                    }
                }
            }
        };

        self.finish(job_id, &mut writer, outcome).await;
    }

    /// Record the terminal status, then end the stream. The status is written before
    /// end-of-stream so a reader that saw the end also sees a terminal status.
    async fn finish(&self, job_id: JobId, writer: &mut ResultWriter, outcome: Result<(), JobFailure>) {
        let transition = match outcome {
            Ok(()) => {
                info!(worker = self.id, job_id = %job_id, "Job completed");
                self.registry
                    .transition(&job_id, JobStatus::Completed, None)
                    .await
            }
            Err(failure) => {
                warn!(
                    worker = self.id,
                    job_id = %job_id,
                    category = %failure.category,
                    message = %failure.message,
                    "Job did not complete"
                );
                if let Err(e) = writer
                    .push(StreamEvent::error(failure.category, failure.message.clone()))
                    .await
                {
                    debug!(job_id = %job_id, error = %e, "Error event not delivered");
                }
                self.registry
                    .transition(&job_id, failure.status(), Some(failure.message))
                    .await
            }
        };

        if let Err(e) = transition {
            warn!(worker = self.id, job_id = %job_id, error = %e, "Failed to record job outcome");
        }
        writer.close();
    }
}

fn push_failure(err: ChannelError) -> JobFailure {
    match err {
        ChannelError::Full { capacity, .. } => JobFailure::new(
            ErrorCategory::ResultBufferFull,
            format!(
                "Result buffer stayed full ({} events); the stream reader is not keeping up",
                capacity
            ),
        ),
        ChannelError::Closed(_) => JobFailure::cancelled(CANCELLED_MESSAGE),
        other => {
            warn!(error = %other, "Result channel rejected event");
            JobFailure::from_category(ErrorCategory::InternalError)
        }
    }
}

async fn push(
    writer: &mut ResultWriter,
    event: StreamEvent,
    cancel: &CancellationToken,
) -> Result<(), JobFailure> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(JobFailure::cancelled(CANCELLED_MESSAGE)),
        pushed = writer.push(event) => pushed.map_err(push_failure),
    }
}

/// Forward producer events in order. `Ok` means the sequence ended with Done; a
/// producer that just stops gets a Done appended. Terminal error events are left to
/// the caller so exactly one is written.
async fn relay(
    mut events: ProducerStream,
    writer: &mut ResultWriter,
    cancel: &CancellationToken,
) -> Result<(), JobFailure> {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(JobFailure::cancelled(CANCELLED_MESSAGE)),
            next = events.next() => next,
        };

        match next {
            None => return push(writer, StreamEvent::done("Complete"), cancel).await,
            Some(Err(e)) => {
                warn!(error = %e, category = %e.category(), "Producer failed");
                return Err(JobFailure::from_category(e.category()));
            }
            Some(Ok(event)) => {
                if let EventPayload::Error(info) = &event.payload {
                    return Err(JobFailure::new(info.error, info.message.clone()));
                }
                let done = event.is_terminal();
                push(writer, event, cancel).await?;
                if done {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Producer, ProducerError};
    use crate::events::EventKind;
    use crate::queue::jobs::{ChatPayload, Job};
    use crate::queue::ResultChannels;
    use futures::stream;

    struct Scripted(Vec<Result<StreamEvent, ProducerError>>);

    impl Producer for Scripted {
        fn produce(&self, _payload: Arc<JobPayload>, _cancel: CancellationToken) -> ProducerStream {
            stream::iter(self.0.clone()).boxed()
        }
    }

    struct Panicking;

    impl Producer for Panicking {
        fn produce(&self, _payload: Arc<JobPayload>, _cancel: CancellationToken) -> ProducerStream {
            stream::once(async { panic!("generator exploded") }).boxed()
        }
    }

    struct Harness {
        registry: JobRegistry,
        channels: ResultChannels,
        worker: Worker,
    }

    impl Harness {
        fn new(producers: ProducerRegistry) -> Self {
            let registry = JobRegistry::new();
            let (_tx, rx) = mpsc::channel(4);
            let worker = Worker::new(
                0,
                registry.clone(),
                producers,
                Arc::new(Mutex::new(rx)),
                Duration::from_millis(10),
            );
            Self {
                registry,
                channels: ResultChannels::new(32, Duration::from_secs(1)),
                worker,
            }
        }

        async fn enqueue(&self) -> QueuedJob {
            let cancel = CancellationToken::new();
            let job = Job::new(
                JobPayload::Chat(ChatPayload {
                    message: "hi".to_string(),
                    history: vec![],
                    conversation_id: None,
                    pdf_ids: None,
                }),
                cancel.clone(),
            );
            let queued = QueuedJob {
                job_id: job.id,
                task_type: job.task_type,
                payload: Arc::clone(&job.payload),
                writer: self.channels.create(job.id),
                cancel,
            };
            self.registry.insert(job).await;
            queued
        }

        async fn run_one(&self) -> (JobStatus, Option<String>, Vec<StreamEvent>) {
            let job = self.enqueue().await;
            let id = job.job_id;
            self.worker.process(job).await;

            let snapshot = self.registry.snapshot(&id).await.unwrap();
            let events = self.channels.drain(id).collect().await;
            (snapshot.status, snapshot.error, events)
        }
    }

    fn chat_producers(producer: impl Producer + 'static) -> ProducerRegistry {
        ProducerRegistry::new().register(TaskType::Chat, Arc::new(producer))
    }

    fn error_of(event: &StreamEvent) -> (ErrorCategory, String) {
        match &event.payload {
            EventPayload::Error(info) => (info.error, info.message.clone()),
            other => panic!("expected an error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_completed_job() {
        let harness = Harness::new(chat_producers(Scripted(vec![
            Ok(StreamEvent::text("hello", false)),
            Ok(StreamEvent::done("Complete")),
        ])));

        let (status, error, events) = harness.run_one().await;

        assert_eq!(status, JobStatus::Completed);
        assert!(error.is_none());
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind(), EventKind::Done);
    }

    #[tokio::test]
    async fn test_missing_done_is_appended() {
        let harness = Harness::new(chat_producers(Scripted(vec![Ok(StreamEvent::text(
            "hello", false,
        ))])));

        let (status, _, events) = harness.run_one().await;

        assert_eq!(status, JobStatus::Completed);
        assert_eq!(events.last().unwrap().kind(), EventKind::Done);
    }

    #[tokio::test]
    async fn test_events_after_done_are_ignored() {
        let harness = Harness::new(chat_producers(Scripted(vec![
            Ok(StreamEvent::done("Complete")),
            Ok(StreamEvent::text("straggler", false)),
        ])));

        let (_, _, events) = harness.run_one().await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_producer_error_fails_job_with_one_error_event() {
        let harness = Harness::new(chat_producers(Scripted(vec![
            Ok(StreamEvent::text("partial", false)),
            Err(ProducerError::Generation("model unavailable".to_string())),
        ])));

        let (status, error, events) = harness.run_one().await;

        assert_eq!(status, JobStatus::Failed);
        assert_eq!(events.len(), 2);
        let (category, message) = error_of(&events[1]);
        assert_eq!(category, ErrorCategory::GenerationFailed);
        assert_eq!(error.as_deref(), Some(message.as_str()));
    }

    #[tokio::test]
    async fn test_producer_error_details_stay_out_of_stream_and_status() {
        let harness = Harness::new(chat_producers(Scripted(vec![Err(ProducerError::Generation(
            "request failed: error sending request for url (https://api.groq.com/openai/v1/chat/completions)"
                .to_string(),
        ))])));

        let (status, error, events) = harness.run_one().await;

        assert_eq!(status, JobStatus::Failed);
        let (category, message) = error_of(&events[0]);
        assert_eq!(category, ErrorCategory::GenerationFailed);
        assert_eq!(message, "Failed to generate response");
        assert_eq!(error.as_deref(), Some("Failed to generate response"));
        assert!(!message.contains("api.groq.com"));
    }

    #[tokio::test]
    async fn test_error_event_from_producer_is_terminal() {
        let harness = Harness::new(chat_producers(Scripted(vec![
            Ok(StreamEvent::error(ErrorCategory::GenerationFailed, "bad output")),
            Ok(StreamEvent::done("Complete")),
        ])));

        let (status, error, events) = harness.run_one().await;

        assert_eq!(status, JobStatus::Failed);
        assert_eq!(error.as_deref(), Some("bad output"));
        assert_eq!(events.len(), 1);
        assert_eq!(error_of(&events[0]).0, ErrorCategory::GenerationFailed);
    }

    #[tokio::test]
    async fn test_unknown_task_type() {
        let harness = Harness::new(ProducerRegistry::new());

        let (status, error, events) = harness.run_one().await;

        assert_eq!(status, JobStatus::Failed);
        assert!(error.unwrap().contains("chat"));
        assert_eq!(events.len(), 1);
        assert_eq!(error_of(&events[0]).0, ErrorCategory::UnknownTaskType);
    }

    #[tokio::test]
    async fn test_panicking_producer_does_not_take_down_worker() {
        let harness = Harness::new(chat_producers(Panicking));

        let (status, _, events) = harness.run_one().await;
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(error_of(&events[0]).0, ErrorCategory::InternalError);

        // same worker keeps processing
        let (status, _, _) = harness.run_one().await;
        assert_eq!(status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancelled_before_processing_is_skipped() {
        let harness = Harness::new(chat_producers(Scripted(vec![Ok(StreamEvent::done(
            "Complete",
        ))])));
        let job = harness.enqueue().await;
        let id = job.job_id;
        harness
            .registry
            .transition(&id, JobStatus::Cancelled, Some(CANCELLED_MESSAGE.to_string()))
            .await
            .unwrap();

        harness.worker.process(job).await;

        let snapshot = harness.registry.snapshot(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Cancelled);
        assert!(snapshot.started_at.is_none());

        let events: Vec<StreamEvent> = harness.channels.drain(id).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(error_of(&events[0]).0, ErrorCategory::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_racing_worker_still_ends_with_one_error() {
        let harness = Harness::new(chat_producers(Scripted(vec![Ok(StreamEvent::done(
            "Complete",
        ))])));
        let job = harness.enqueue().await;
        let id = job.job_id;

        // the canceller records the status, the worker dequeues before it terminates
        harness
            .registry
            .transition(&id, JobStatus::Cancelled, Some(CANCELLED_MESSAGE.to_string()))
            .await
            .unwrap();
        harness.worker.process(job).await;
        let delivered = harness
            .channels
            .terminate(&id, StreamEvent::error(ErrorCategory::Cancelled, CANCELLED_MESSAGE));

        assert!(!delivered);
        let events: Vec<StreamEvent> = harness.channels.drain(id).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(error_of(&events[0]), (ErrorCategory::Cancelled, CANCELLED_MESSAGE.to_string()));
    }

    #[tokio::test]
    async fn test_cancel_token_stops_relay() {
        struct Hanging;

        impl Producer for Hanging {
            fn produce(&self, _payload: Arc<JobPayload>, _cancel: CancellationToken) -> ProducerStream {
                stream::once(async { Ok(StreamEvent::text("partial", false)) })
                    .chain(stream::pending())
                    .boxed()
            }
        }

        let harness = Harness::new(chat_producers(Hanging));
        let job = harness.enqueue().await;
        let id = job.job_id;
        let cancel = job.cancel.clone();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        harness.worker.process(job).await;
        canceller.await.unwrap();

        let snapshot = harness.registry.snapshot(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Cancelled);

        let events: Vec<StreamEvent> = harness.channels.drain(id).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(error_of(&events[1]).0, ErrorCategory::Cancelled);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let harness = Harness::new(ProducerRegistry::new());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), harness.worker.run(shutdown))
            .await
            .expect("worker should stop once shutdown fires");
    }
}
