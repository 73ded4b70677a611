//! Per-job Result Channels
//!
//! A channel is created when a job is submitted and split into two capability handles:
//! a [`ResultWriter`] that travels with the queued job to the worker, and a
//! [`ResultReader`] handed to at most one stream consumer at a time.
//!
//! Buffer policy: the buffer holds at most `capacity` non-terminal events. A push into
//! a full buffer waits for the reader to make room, up to `push_timeout`, and then
//! fails with [`ChannelError::Full`]. Terminal events (Error/Done) are always accepted,
//! so a failing job can still finish its stream. The end-of-stream marker is written
//! by [`ResultWriter::close`] (or by dropping the writer).
//!
//! Teardown: the channel is released as soon as a reader observes end-of-stream.
//! Closed channels nobody drained are released by [`ResultChannels::evict_idle`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::jobs::JobId;
use crate::events::{ErrorCategory, StreamEvent};

#[derive(Debug, Error, PartialEq)]
pub enum ChannelError {
    #[error("No result channel for job {0}")]
    NotFound(JobId),

    #[error("Job {0} is already being streamed to another client")]
    AlreadyAttached(JobId),

    #[error("Result channel for job {0} is closed")]
    Closed(JobId),

    #[error("Result buffer for job {job_id} stayed full ({capacity} events) with no reader progress")]
    Full { job_id: JobId, capacity: usize },
}

struct ChannelState {
    buffer: VecDeque<StreamEvent>,
    closed: bool,
    closed_at: Option<Instant>,
}

struct Shared {
    job_id: JobId,
    capacity: usize,
    state: Mutex<ChannelState>,
    reader_attached: AtomicBool,
    readable: Notify,
    writable: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        // The state stays consistent across a panicking holder, so recover the guard
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type Slots = Arc<DashMap<JobId, Arc<Shared>>>;

/// Table of open result channels, keyed by job id
#[derive(Clone)]
pub struct ResultChannels {
    slots: Slots,
    capacity: usize,
    push_timeout: Duration,
}

impl ResultChannels {
    pub fn new(capacity: usize, push_timeout: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            push_timeout,
        }
    }

    /// Allocate an empty channel for `job_id` and return its write end
    pub fn create(&self, job_id: JobId) -> ResultWriter {
        let shared = Arc::new(Shared {
            job_id,
            capacity: self.capacity,
            state: Mutex::new(ChannelState {
                buffer: VecDeque::new(),
                closed: false,
                closed_at: None,
            }),
            reader_attached: AtomicBool::new(false),
            readable: Notify::new(),
            writable: Notify::new(),
        });

        if self.slots.insert(job_id, Arc::clone(&shared)).is_some() {
            warn!(job_id = %job_id, "Replaced an existing result channel");
        }

        ResultWriter {
            job_id,
            shared,
            push_timeout: self.push_timeout,
            closed: false,
        }
    }

    /// Take the read end of a job's channel. Only one reader may be attached at once.
    pub fn attach(&self, job_id: JobId) -> Result<ResultReader, ChannelError> {
        let shared = self
            .slots
            .get(&job_id)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or(ChannelError::NotFound(job_id))?;

        if shared
            .reader_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ChannelError::AlreadyAttached(job_id));
        }

        debug!(job_id = %job_id, "Reader attached to result channel");
        Ok(ResultReader {
            job_id,
            shared,
            slots: Arc::clone(&self.slots),
            finished: false,
        })
    }

    /// Lazily yield the job's events up to end-of-stream. An unknown job yields one
    /// Error event instead.
    pub fn drain(&self, job_id: JobId) -> BoxStream<'static, StreamEvent> {
        match self.attach(job_id) {
            Ok(reader) => reader.into_stream().boxed(),
            Err(ChannelError::AlreadyAttached(_)) => stream::once(async move {
                let category = ErrorCategory::AlreadyStreaming;
                StreamEvent::error(category, category.client_message())
            })
            .boxed(),
            Err(_) => stream::once(async move {
                StreamEvent::error(ErrorCategory::NotFound, ErrorCategory::NotFound.client_message())
            })
            .boxed(),
        }
    }

    /// Append `event` and end the stream without going through the writer. Used when a
    /// job is cancelled while its writer is still waiting in the queue. Returns false if
    /// the channel is unknown or already closed.
    pub fn terminate(&self, job_id: &JobId, event: StreamEvent) -> bool {
        let Some(shared) = self.slots.get(job_id).map(|slot| Arc::clone(slot.value())) else {
            return false;
        };

        {
            let mut state = shared.lock();
            if state.closed {
                return false;
            }
            state.buffer.push_back(event);
            state.closed = true;
            state.closed_at = Some(Instant::now());
        }
        shared.readable.notify_one();
        true
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.slots.contains_key(job_id)
    }

    /// Drop a channel regardless of its state. Any attached reader still sees the
    /// events it already holds a handle to.
    pub fn release(&self, job_id: &JobId) -> bool {
        self.slots.remove(job_id).is_some()
    }

    /// Release closed channels without a reader that were closed longer than `ttl` ago
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, shared| {
            if shared.reader_attached.load(Ordering::Acquire) {
                return true;
            }
            let closed_at = {
                let state = shared.lock();
                if state.closed { state.closed_at } else { None }
            };
            match closed_at {
                Some(at) if at.elapsed() >= ttl => {
                    debug!(job_id = %shared.job_id, "Evicting undrained result channel");
                    false
                }
                _ => true,
            }
        });
        before.saturating_sub(self.slots.len())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Write end of a job's channel, owned by the worker running the job
pub struct ResultWriter {
    job_id: JobId,
    shared: Arc<Shared>,
    push_timeout: Duration,
    closed: bool,
}

impl ResultWriter {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Append one event in producer order
    pub async fn push(&mut self, event: StreamEvent) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed(self.job_id));
        }

        let deadline = tokio::time::Instant::now() + self.push_timeout;
        loop {
            let space = self.shared.writable.notified();
            {
                let mut state = self.shared.lock();
                if state.closed {
                    // terminated from outside the writer (queued job cancelled)
                    drop(state);
                    self.closed = true;
                    return Err(ChannelError::Closed(self.job_id));
                }
                if event.is_terminal() || state.buffer.len() < self.shared.capacity {
                    state.buffer.push_back(event);
                    drop(state);
                    self.shared.readable.notify_one();
                    return Ok(());
                }
            }

            if tokio::time::timeout_at(deadline, space).await.is_err() {
                return Err(ChannelError::Full {
                    job_id: self.job_id,
                    capacity: self.shared.capacity,
                });
            }
        }
    }

    /// Write the end-of-stream marker. Repeated calls are no-ops.
    pub fn close(&mut self) {
        if self.closed {
            debug!(job_id = %self.job_id, "Result channel already closed");
            return;
        }
        self.closed = true;

        {
            let mut state = self.shared.lock();
            if !state.closed {
                state.closed = true;
                state.closed_at = Some(Instant::now());
            }
        }
        self.shared.readable.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for ResultWriter {
    fn drop(&mut self) {
        if !self.closed {
            self.close();
        }
    }
}

/// Read end of a job's channel
pub struct ResultReader {
    job_id: JobId,
    shared: Arc<Shared>,
    slots: Slots,
    finished: bool,
}

impl ResultReader {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Next event, or `None` once end-of-stream was reached. Reaching end-of-stream
    /// releases the channel.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        let shared = Arc::clone(&self.shared);
        loop {
            let ready = shared.readable.notified();
            {
                let mut state = shared.lock();
                if let Some(event) = state.buffer.pop_front() {
                    drop(state);
                    shared.writable.notify_one();
                    return Some(event);
                }
                if state.closed {
                    drop(state);
                    drop(ready);
                    self.finish();
                    return None;
                }
            }
            ready.await;
        }
    }

    pub fn into_stream(self) -> impl futures::Stream<Item = StreamEvent> + Send + 'static {
        stream::unfold(self, |mut reader| async move {
            reader.recv().await.map(|event| (event, reader))
        })
    }

    fn finish(&mut self) {
        self.finished = true;
        let shared = &self.shared;
        self.slots
            .remove_if(&self.job_id, |_, slot| Arc::ptr_eq(slot, shared));
        debug!(job_id = %self.job_id, "Result channel drained and released");
    }
}

impl Drop for ResultReader {
    fn drop(&mut self) {
        if !self.finished {
            // Detach without consuming; the rest stays buffered for the next reader
            self.shared.reader_attached.store(false, Ordering::Release);
            debug!(job_id = %self.job_id, "Reader detached before end of stream");
        }
    }
}
