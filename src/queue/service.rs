// Queue service: the submission, status and streaming gateway plus the lifecycle of the
// worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::{ResultChannels, ResultReader};
use super::jobs::{Job, JobId, JobPayload, JobSnapshot, JobStatus};
use super::registry::{JobCounts, JobRegistry};
use super::workers::{JobReceiver, QueuedJob, Worker, CANCELLED_MESSAGE};
use super::QueueError;
use crate::agents::ProducerRegistry;
use crate::config::QueueConfig;
use crate::events::{ErrorCategory, StreamEvent};

const SHUTDOWN_MESSAGE: &str = "Job cancelled: server is shutting down";

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub workers: usize,
    pub capacity: usize,
    pub result_buffer_capacity: usize,
    pub result_push_timeout: Duration,
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    pub job_retention: Duration,
    pub channel_retention: Duration,
    pub sweep_interval: Duration,
}

impl From<&QueueConfig> for QueueSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            capacity: config.capacity.max(1),
            result_buffer_capacity: config.result_buffer_capacity,
            result_push_timeout: config.result_push_timeout(),
            poll_interval: config.poll_interval(),
            shutdown_grace: config.shutdown_grace(),
            job_retention: config.job_retention(),
            channel_retention: config.channel_retention(),
            sweep_interval: config.sweep_interval(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub workers: usize,
    #[serde(flatten)]
    pub jobs: JobCounts,
    pub open_channels: usize,
}

struct Inner {
    settings: QueueSettings,
    registry: JobRegistry,
    channels: ResultChannels,
    sender: mpsc::Sender<QueuedJob>,
    receiver: JobReceiver,
    accepting: AtomicBool,
    /// Stops worker loops and the sweeper
    shutdown: CancellationToken,
    /// Parent of every job's cancellation token
    abort: CancellationToken,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

/// In-memory job queue with a fixed pool of workers
#[derive(Clone)]
pub struct QueueService {
    inner: Arc<Inner>,
}

impl QueueService {
    /// Spawn the worker pool and the retention sweeper. Must run inside a tokio runtime.
    pub fn start(settings: QueueSettings, producers: ProducerRegistry) -> Self {
        let (sender, receiver) = mpsc::channel(settings.capacity.max(1));
        let receiver: JobReceiver = Arc::new(Mutex::new(receiver));
        let registry = JobRegistry::new();
        let channels = ResultChannels::new(settings.result_buffer_capacity, settings.result_push_timeout);
        let shutdown = CancellationToken::new();

        let mut tasks = Vec::with_capacity(settings.workers + 1);
        for id in 0..settings.workers.max(1) {
            let worker = Worker::new(
                id,
                registry.clone(),
                producers.clone(),
                Arc::clone(&receiver),
                settings.poll_interval,
            );
            tasks.push(tokio::spawn(worker.run(shutdown.clone())));
        }

        info!(
            workers = settings.workers,
            capacity = settings.capacity,
            producers = producers.len(),
            "Job queue started"
        );

        let service = Self {
            inner: Arc::new(Inner {
                settings,
                registry,
                channels,
                sender,
                receiver,
                accepting: AtomicBool::new(true),
                shutdown,
                abort: CancellationToken::new(),
                tasks: StdMutex::new(Vec::new()),
            }),
        };

        tasks.push(tokio::spawn(service.clone().run_sweeper()));
        service.lock_tasks().extend(tasks);
        service
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.inner.settings
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Register a job and hand it to the pool. Returns as soon as the job is queued; the
    /// job and its result channel are visible before any worker can pick it up.
    pub async fn submit(&self, payload: JobPayload) -> Result<JobSnapshot, QueueError> {
        if !self.is_accepting() {
            return Err(QueueError::ShuttingDown);
        }

        let cancel = self.inner.abort.child_token();
        let job = Job::new(payload, cancel.clone());
        let snapshot = job.snapshot();
        let queued = QueuedJob {
            job_id: job.id,
            task_type: job.task_type,
            payload: Arc::clone(&job.payload),
            writer: self.inner.channels.create(job.id),
            cancel,
        };
        let job_id = job.id;
        self.inner.registry.insert(job).await;

        match self.inner.sender.try_send(queued) {
            Ok(()) => {
                info!(job_id = %job_id, task_type = %snapshot.task_type, "Job queued");
                Ok(snapshot)
            }
            Err(err) => {
                let refused = match &err {
                    mpsc::error::TrySendError::Full(_) => QueueError::QueueFull(self.inner.settings.capacity),
                    mpsc::error::TrySendError::Closed(_) => QueueError::ShuttingDown,
                };
                drop(err);
                self.inner.registry.remove(&job_id).await;
                self.inner.channels.release(&job_id);
                warn!(job_id = %job_id, error = %refused, "Job refused");
                Err(refused)
            }
        }
    }

    pub async fn status(&self, job_id: &JobId) -> Result<JobSnapshot, QueueError> {
        self.inner
            .registry
            .snapshot(job_id)
            .await
            .ok_or(QueueError::NotFound(*job_id))
    }

    /// Attach the single reader of a job's events. Works before, during and after
    /// processing; once a reader has seen end-of-stream the job's events are gone and
    /// later calls report `NotFound`.
    pub async fn stream(&self, job_id: &JobId) -> Result<ResultReader, QueueError> {
        if self.inner.registry.snapshot(job_id).await.is_none() {
            return Err(QueueError::NotFound(*job_id));
        }
        Ok(self.inner.channels.attach(*job_id)?)
    }

    /// Cancel a queued or running job. A queued job is cancelled right away; a running
    /// job is cancelled by its worker at the producer's next suspension point.
    pub async fn cancel(&self, job_id: &JobId) -> Result<JobSnapshot, QueueError> {
        let job = self
            .inner
            .registry
            .get(job_id)
            .await
            .ok_or(QueueError::NotFound(*job_id))?;

        if job.status.is_terminal() {
            return Err(QueueError::InvalidTransition {
                job_id: *job_id,
                from: job.status,
                to: JobStatus::Cancelled,
            });
        }

        job.cancel.cancel();

        if job.status == JobStatus::Queued {
            if let Ok(snapshot) = self
                .inner
                .registry
                .transition(job_id, JobStatus::Cancelled, Some(CANCELLED_MESSAGE.to_string()))
                .await
            {
                self.inner.channels.terminate(
                    job_id,
                    StreamEvent::error(ErrorCategory::Cancelled, CANCELLED_MESSAGE),
                );
                info!(job_id = %job_id, "Queued job cancelled");
                return Ok(snapshot);
            }
            // A worker picked it up in the meantime and will observe the token
        }

        info!(job_id = %job_id, "Cancellation requested for running job");
        self.status(job_id).await
    }

    pub async fn stats(&self) -> QueueStats {
        QueueStats {
            workers: self.inner.settings.workers,
            jobs: self.inner.registry.counts().await,
            open_channels: self.inner.channels.len(),
        }
    }

    /// Evict terminal jobs past their retention along with their channels, then closed
    /// channels nobody came back for. Returns (jobs, channels) evicted.
    pub async fn sweep(&self) -> (usize, usize) {
        let retention = chrono::Duration::from_std(self.inner.settings.job_retention)
            .unwrap_or_else(|_| chrono::Duration::days(36500));
        let expired = self
            .inner
            .registry
            .evict_finished_before(Utc::now() - retention)
            .await;

        let mut channels = 0;
        for job_id in &expired {
            if self.inner.channels.release(job_id) {
                channels += 1;
            }
        }
        channels += self.inner.channels.evict_idle(self.inner.settings.channel_retention);

        if !expired.is_empty() || channels > 0 {
            debug!(jobs = expired.len(), channels, "Retention sweep evicted entries");
        }
        (expired.len(), channels)
    }

    async fn run_sweeper(self) {
        let period = self.inner.settings.sweep_interval.max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// Stop accepting jobs, give running jobs `shutdown_grace` to finish, then cancel
    /// whatever is left. Every job ends in a terminal status with a closed stream.
    pub async fn shutdown(&self) {
        if !self.inner.accepting.swap(false, Ordering::AcqRel) {
            debug!("Job queue already shut down");
            return;
        }
        info!("Shutting down job queue");

        self.inner.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.lock_tasks());
        let all_stopped = futures::future::join_all(tasks);
        tokio::pin!(all_stopped);

        if tokio::time::timeout(self.inner.settings.shutdown_grace, &mut all_stopped)
            .await
            .is_err()
        {
            warn!(
                grace_ms = self.inner.settings.shutdown_grace.as_millis() as u64,
                "Jobs still running after grace period, cancelling"
            );
            self.inner.abort.cancel();
            all_stopped.await;
        }

        // Jobs still waiting in the queue never started
        let mut receiver = self.inner.receiver.lock().await;
        receiver.close();
        let mut cancelled = 0;
        while let Ok(mut job) = receiver.try_recv() {
            job.cancel.cancel();
            match self
                .inner
                .registry
                .transition(&job.job_id, JobStatus::Cancelled, Some(SHUTDOWN_MESSAGE.to_string()))
                .await
            {
                Ok(_) => {
                    if let Err(e) = job
                        .writer
                        .push(StreamEvent::error(ErrorCategory::Cancelled, SHUTDOWN_MESSAGE))
                        .await
                    {
                        debug!(job_id = %job.job_id, error = %e, "Cancellation event not delivered");
                    }
                    cancelled += 1;
                }
                Err(e) => debug!(job_id = %job.job_id, error = %e, "Queued job already finished"),
            }
            job.writer.close();
        }

        info!(cancelled_queued = cancelled, "Job queue stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Producer, ProducerError, ProducerStream};
    use crate::events::{EventKind, EventPayload};
    use crate::queue::jobs::{ChatPayload, TaskType};
    use futures::StreamExt;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;
    use tokio::time::{sleep, timeout};

    fn settings(workers: usize) -> QueueSettings {
        QueueSettings {
            workers,
            capacity: 16,
            result_buffer_capacity: 64,
            result_push_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(20),
            shutdown_grace: Duration::from_millis(200),
            job_retention: Duration::from_secs(3600),
            channel_retention: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(3600),
        }
    }

    fn chat(message: &str) -> JobPayload {
        JobPayload::Chat(ChatPayload {
            message: message.to_string(),
            history: vec![],
            conversation_id: None,
            pdf_ids: None,
        })
    }

    fn start(workers: usize, producer: impl Producer + 'static) -> QueueService {
        QueueService::start(
            settings(workers),
            ProducerRegistry::new().register(TaskType::Chat, Arc::new(producer)),
        )
    }

    /// Emits each chunk as a text event, then Done
    struct Echo {
        chunks: Vec<&'static str>,
        delay: Duration,
    }

    impl Producer for Echo {
        fn produce(&self, _payload: Arc<JobPayload>, _cancel: CancellationToken) -> ProducerStream {
            let chunks = self.chunks.clone();
            let delay = self.delay;
            async_stream::stream! {
                for chunk in chunks {
                    sleep(delay).await;
                    yield Ok(StreamEvent::text(chunk, false));
                }
                yield Ok(StreamEvent::done("Complete"));
            }
            .boxed()
        }
    }

    /// Emits "started", waits for a permit, then finishes
    struct Gated {
        gate: Arc<Semaphore>,
    }

    impl Producer for Gated {
        fn produce(&self, _payload: Arc<JobPayload>, _cancel: CancellationToken) -> ProducerStream {
            let gate = Arc::clone(&self.gate);
            async_stream::stream! {
                yield Ok(StreamEvent::text("started", false));
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
                yield Ok(StreamEvent::text("released", false));
                yield Ok(StreamEvent::done("Complete"));
            }
            .boxed()
        }
    }

    /// Fails after one text chunk
    struct Failing;

    impl Producer for Failing {
        fn produce(&self, _payload: Arc<JobPayload>, _cancel: CancellationToken) -> ProducerStream {
            futures::stream::iter(vec![
                Ok(StreamEvent::text("Partial answer", false)),
                Err(ProducerError::Generation("model crashed".to_string())),
            ])
            .boxed()
        }
    }

    /// Tracks how many producers run at the same time
    struct Counting {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Producer for Counting {
        fn produce(&self, _payload: Arc<JobPayload>, _cancel: CancellationToken) -> ProducerStream {
            let current = Arc::clone(&self.current);
            let peak = Arc::clone(&self.peak);
            async_stream::stream! {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(30)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                yield Ok(StreamEvent::done("Complete"));
            }
            .boxed()
        }
    }

    async fn wait_for(queue: &QueueService, id: JobId, status: JobStatus) -> JobSnapshot {
        timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = queue.status(&id).await.unwrap();
                if snapshot.status == status {
                    return snapshot;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("job {} never reached {}", id, status))
    }

    async fn drain(queue: &QueueService, id: JobId) -> Vec<StreamEvent> {
        let reader = queue.stream(&id).await.unwrap();
        timeout(Duration::from_secs(5), reader.into_stream().collect::<Vec<_>>())
            .await
            .expect("stream should end")
    }

    fn texts(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::Text(t) => Some(t.content.clone()),
                _ => None,
            })
            .collect()
    }

    fn error_of(event: &StreamEvent) -> (ErrorCategory, String) {
        match &event.payload {
            EventPayload::Error(info) => (info.error, info.message.clone()),
            other => panic!("expected an error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_returns_before_producer_finishes() {
        let queue = start(1, Echo { chunks: vec!["slow"], delay: Duration::from_secs(30) });

        let snapshot = timeout(Duration::from_millis(200), queue.submit(chat("hi")))
            .await
            .expect("submit must not wait for the producer")
            .unwrap();

        assert_eq!(snapshot.status, JobStatus::Queued);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_drain_after_completion() {
        let queue = start(1, Echo { chunks: vec!["a", "b", "c"], delay: Duration::ZERO });
        let job = queue.submit(chat("hi")).await.unwrap();
        wait_for(&queue, job.id, JobStatus::Completed).await;

        let events = drain(&queue, job.id).await;
        assert_eq!(texts(&events), vec!["a", "b", "c"]);
        assert_eq!(events.last().unwrap().kind(), EventKind::Done);

        // released on the first full drain
        assert!(matches!(queue.stream(&job.id).await, Err(QueueError::NotFound(_))));
        // the job record itself is still there
        assert_eq!(queue.status(&job.id).await.unwrap().status, JobStatus::Completed);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_drain_before_and_during_processing() {
        let gate = Arc::new(Semaphore::new(0));
        let queue = start(1, Gated { gate: Arc::clone(&gate) });

        let job = queue.submit(chat("hi")).await.unwrap();
        let mut reader = queue.stream(&job.id).await.unwrap();

        let first = timeout(Duration::from_secs(5), reader.recv()).await.unwrap().unwrap();
        assert_eq!(texts(&[first]), vec!["started"]);
        assert_eq!(queue.status(&job.id).await.unwrap().status, JobStatus::Processing);

        // a second concurrent reader is refused
        assert!(matches!(queue.stream(&job.id).await, Err(QueueError::AlreadyStreaming(_))));

        gate.add_permits(1);
        let rest: Vec<StreamEvent> = timeout(Duration::from_secs(5), reader.into_stream().collect())
            .await
            .unwrap();
        assert_eq!(texts(&rest), vec!["released"]);
        assert_eq!(rest.last().unwrap().kind(), EventKind::Done);

        let snapshot = queue.status(&job.id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert!(snapshot.started_at.is_some() && snapshot.completed_at.is_some());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_sequence_is_monotonic() {
        let queue = start(1, Echo { chunks: vec!["x"; 5], delay: Duration::from_millis(5) });
        let job = queue.submit(chat("hi")).await.unwrap();

        let mut seen = vec![JobStatus::Queued];
        timeout(Duration::from_secs(5), async {
            loop {
                let status = queue.status(&job.id).await.unwrap().status;
                if seen.last() != Some(&status) {
                    seen.push(status);
                }
                if status.is_terminal() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let order = [JobStatus::Queued, JobStatus::Processing, JobStatus::Completed];
        let mut position = 0;
        for status in &seen {
            position += order[position..]
                .iter()
                .position(|s| s == status)
                .unwrap_or_else(|| panic!("{:?} is not a forward progression", seen));
        }
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_by_pool_size() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let queue = start(
            2,
            Counting {
                current: Arc::clone(&current),
                peak: Arc::clone(&peak),
            },
        );

        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(queue.submit(chat(&format!("job {}", i))).await.unwrap().id);
        }
        for id in ids {
            wait_for(&queue, id, JobStatus::Completed).await;
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(queue.stats().await.jobs.completed, 6);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_job_stream_and_status_agree() {
        let queue = start(1, Failing);
        let job = queue.submit(chat("What is the refund policy?")).await.unwrap();
        let snapshot = wait_for(&queue, job.id, JobStatus::Failed).await;

        let events = drain(&queue, job.id).await;
        assert_eq!(texts(&events), vec!["Partial answer"]);
        assert_eq!(events.len(), 2);

        let (category, message) = error_of(&events[1]);
        assert_eq!(category, ErrorCategory::GenerationFailed);
        assert!(!message.is_empty());
        assert_eq!(snapshot.error.as_deref(), Some(message.as_str()));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_task_type_fails_job() {
        let queue = QueueService::start(settings(1), ProducerRegistry::new());
        let job = queue.submit(chat("hi")).await.unwrap();
        let snapshot = wait_for(&queue, job.id, JobStatus::Failed).await;

        let events = drain(&queue, job.id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(error_of(&events[0]).0, ErrorCategory::UnknownTaskType);
        assert!(snapshot.error.is_some());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let queue = start(1, Failing);
        let id = uuid::Uuid::new_v4();

        assert!(matches!(queue.status(&id).await, Err(QueueError::NotFound(_))));
        assert!(matches!(queue.stream(&id).await, Err(QueueError::NotFound(_))));
        assert!(matches!(queue.cancel(&id).await, Err(QueueError::NotFound(_))));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let gate = Arc::new(Semaphore::new(0));
        let queue = start(1, Gated { gate: Arc::clone(&gate) });

        let blocker = queue.submit(chat("first")).await.unwrap();
        wait_for(&queue, blocker.id, JobStatus::Processing).await;
        let waiting = queue.submit(chat("second")).await.unwrap();

        let snapshot = queue.cancel(&waiting.id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Cancelled);

        let events = drain(&queue, waiting.id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(error_of(&events[0]).0, ErrorCategory::Cancelled);

        // cancelling a finished job is refused
        assert!(matches!(
            queue.cancel(&waiting.id).await,
            Err(QueueError::InvalidTransition { .. })
        ));

        gate.add_permits(1);
        wait_for(&queue, blocker.id, JobStatus::Completed).await;
        // the worker skipped the cancelled job
        assert_eq!(queue.status(&waiting.id).await.unwrap().status, JobStatus::Cancelled);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let gate = Arc::new(Semaphore::new(0));
        let queue = start(1, Gated { gate });

        let job = queue.submit(chat("hi")).await.unwrap();
        wait_for(&queue, job.id, JobStatus::Processing).await;

        queue.cancel(&job.id).await.unwrap();
        let snapshot = wait_for(&queue, job.id, JobStatus::Cancelled).await;
        assert!(snapshot.error.is_some());

        let events = drain(&queue, job.id).await;
        assert_eq!(events.last().map(|e| error_of(e).0), Some(ErrorCategory::Cancelled));
        assert!(!events.iter().any(|e| e.kind() == EventKind::Done));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_queue_full_is_refused_without_a_job() {
        let gate = Arc::new(Semaphore::new(0));
        let mut config = settings(1);
        config.capacity = 1;
        let queue = QueueService::start(
            config,
            ProducerRegistry::new().register(TaskType::Chat, Arc::new(Gated { gate: Arc::clone(&gate) })),
        );

        let running = queue.submit(chat("running")).await.unwrap();
        wait_for(&queue, running.id, JobStatus::Processing).await;
        queue.submit(chat("waiting")).await.unwrap();

        let refused = queue.submit(chat("overflow")).await;
        assert!(matches!(refused, Err(QueueError::QueueFull(1))));

        let stats = queue.stats().await;
        assert_eq!(stats.jobs.queued + stats.jobs.processing, 2);
        assert_eq!(stats.open_channels, 2);

        gate.add_permits(2);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_unfinished_jobs() {
        let gate = Arc::new(Semaphore::new(0));
        let queue = start(1, Gated { gate });

        let running = queue.submit(chat("running")).await.unwrap();
        wait_for(&queue, running.id, JobStatus::Processing).await;
        let queued = queue.submit(chat("queued")).await.unwrap();

        timeout(Duration::from_secs(5), queue.shutdown())
            .await
            .expect("shutdown should finish after the grace period");

        assert_eq!(queue.status(&running.id).await.unwrap().status, JobStatus::Cancelled);
        assert_eq!(queue.status(&queued.id).await.unwrap().status, JobStatus::Cancelled);

        for id in [running.id, queued.id] {
            let events = drain(&queue, id).await;
            assert_eq!(events.last().map(|e| error_of(e).0), Some(ErrorCategory::Cancelled));
        }

        assert!(matches!(queue.submit(chat("late")).await, Err(QueueError::ShuttingDown)));
        // a second shutdown is a no-op
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_evicts_finished_jobs_and_idle_channels() {
        let mut config = settings(1);
        config.job_retention = Duration::ZERO;
        config.channel_retention = Duration::ZERO;
        let queue = QueueService::start(
            config,
            ProducerRegistry::new().register(
                TaskType::Chat,
                Arc::new(Echo { chunks: vec!["a"], delay: Duration::ZERO }),
            ),
        );

        let job = queue.submit(chat("hi")).await.unwrap();
        wait_for(&queue, job.id, JobStatus::Completed).await;
        sleep(Duration::from_millis(5)).await;

        let (jobs, channels) = queue.sweep().await;
        assert_eq!((jobs, channels), (1, 1));
        assert!(matches!(queue.status(&job.id).await, Err(QueueError::NotFound(_))));
        assert!(matches!(queue.stream(&job.id).await, Err(QueueError::NotFound(_))));
        queue.shutdown().await;
    }
}
