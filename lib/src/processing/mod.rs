//! Background job processing pipeline (spec.md §4.5).
//!
//! Durable enqueue is the responsibility of [`crate::persistence::Store`]'s
//! outbox (`list_pending_jobs`/`reschedule_job`/`delete_job`): that is what
//! survives a restart. The [`JobQueue`] in this module is the in-process
//! hand-off between that outbox and the worker pool — a [`JobDispatcher`]
//! periodically drains due outbox rows into it, and workers pull from it.
//! Because the same outbox row can be drained more than once before a worker
//! finishes and deletes it, delivery is at-least-once; every handler must be
//! idempotent (spec.md §4.5 invariant).

pub mod handlers;
pub mod ifc;
pub mod properties;

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{broadcast, watch, Mutex, Notify};
use uuid::Uuid;

use crate::config::ProcessingConfig;
use crate::constants::processing::{BACKLOG_WARN_THRESHOLD, DEFAULT_BACKOFF_MAX_MS};
use crate::error::Result;
use crate::persistence::{PersistedJob, Store};

/// `JobEnvelope = {jobId, jobType, payload, enqueuedAt, attempt}` (spec.md
/// §4.5).
#[derive(Debug, Clone)]
pub struct JobEnvelope {
    pub job_id: Uuid,
    pub job_type: String,
    pub payload: String,
    pub enqueued_at: DateTime<Utc>,
    pub attempt: i32,
}

impl From<PersistedJob> for JobEnvelope {
    fn from(job: PersistedJob) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type,
            payload: job.payload,
            enqueued_at: job.enqueued_at,
            attempt: job.attempt,
        }
    }
}

/// An ordered, single-consumer-per-message queue. Delivery is at-least-once;
/// `complete` lets an implementation release any de-duplication bookkeeping
/// it keeps once a dequeued job has reached a terminal outcome for this
/// delivery (durable broker backends may no-op it).
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, envelope: JobEnvelope);

    async fn dequeue(&self) -> Option<JobEnvelope>;

    fn depth(&self) -> usize;

    async fn complete(&self, _job_id: Uuid) {}
}

#[derive(Default)]
struct QueueState {
    deque: VecDeque<JobEnvelope>,
    /// Ids currently queued or checked out by a worker, so a dispatcher
    /// sweep that re-reads the same still-pending outbox row doesn't pile up
    /// duplicate entries for work already in flight.
    tracked: HashSet<Uuid>,
}

/// The default in-process implementation: a bounded-in-spirit FIFO that
/// never refuses work but reports unbounded backlog growth as a metric
/// (spec.md §4.5).
pub struct InProcessQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    depth: AtomicUsize,
}

impl InProcessQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            depth: AtomicUsize::new(0),
        }
    }
}

impl Default for InProcessQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InProcessQueue {
    async fn enqueue(&self, envelope: JobEnvelope) {
        let depth = {
            let mut state = self.state.lock().await;
            if !state.tracked.insert(envelope.job_id) {
                return;
            }
            state.deque.push_back(envelope);
            state.deque.len()
        };
        self.depth.store(depth, Ordering::Relaxed);
        if depth >= BACKLOG_WARN_THRESHOLD {
            tracing::warn!(depth, "job queue backlog exceeds warn threshold");
        }
        self.notify.notify_one();
    }

    async fn dequeue(&self) -> Option<JobEnvelope> {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(envelope) = state.deque.pop_front() {
                    self.depth.store(state.deque.len(), Ordering::Relaxed);
                    return Some(envelope);
                }
            }
            self.notify.notified().await;
        }
    }

    fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    async fn complete(&self, job_id: Uuid) {
        self.state.lock().await.tracked.remove(&job_id);
    }
}

/// `progress = {jobId, modelVersionId, stage, percentComplete, message,
/// isComplete, isSuccess, errorMessage?}` (spec.md §4.5).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub job_id: Uuid,
    pub model_version_id: Uuid,
    pub stage: String,
    pub percent_complete: u8,
    pub message: String,
    pub is_complete: bool,
    pub is_success: bool,
    pub error_message: Option<String>,
}

/// The core does not mandate a transport; notifier failures must never fail
/// the job (spec.md §4.5).
#[async_trait]
pub trait ProgressNotifier: Send + Sync {
    async fn notify(&self, progress: Progress);

    /// Subscribes to progress events for one model version (SPEC_FULL §3
    /// progress-polling endpoint).
    fn subscribe(&self, model_version_id: Uuid) -> broadcast::Receiver<Progress>;
}

/// Pub/sub fan-out keyed by `modelVersionId`, backed by
/// `tokio::sync::broadcast`.
pub struct BroadcastProgressNotifier {
    channels: parking_lot::Mutex<std::collections::HashMap<Uuid, broadcast::Sender<Progress>>>,
}

impl BroadcastProgressNotifier {
    const CHANNEL_CAPACITY: usize = 64;

    pub fn new() -> Self {
        Self {
            channels: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn sender_for(&self, model_version_id: Uuid) -> broadcast::Sender<Progress> {
        self.channels
            .lock()
            .entry(model_version_id)
            .or_insert_with(|| broadcast::channel(Self::CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for BroadcastProgressNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressNotifier for BroadcastProgressNotifier {
    async fn notify(&self, progress: Progress) {
        let sender = self.sender_for(progress.model_version_id);
        // No subscriber is not an error; the spec requires notifier
        // failures to never fail the job.
        let _ = sender.send(progress);
    }

    fn subscribe(&self, model_version_id: Uuid) -> broadcast::Receiver<Progress> {
        self.sender_for(model_version_id).subscribe()
    }
}

/// A handler registered under one `jobType` string (§9: "a handler registry
/// keyed by jobType string; handlers register at startup").
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;

    async fn handle(&self, envelope: &JobEnvelope) -> Result<()>;
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: std::collections::HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type().to_string(), handler);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }
}

/// Drains due rows from the durable outbox into the in-process [`JobQueue`].
pub struct JobDispatcher {
    store: Arc<dyn Store>,
    queue: Arc<dyn JobQueue>,
}

impl JobDispatcher {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    pub async fn poll_once(&self) -> Result<usize> {
        let jobs = self.store.list_pending_jobs().await?;
        let drained = jobs.len();
        for job in jobs {
            self.queue.enqueue(job.into()).await;
        }
        Ok(drained)
    }

    pub async fn run(&self, poll_interval: std::time::Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, "failed to poll the durable job outbox");
                    }
                }
            }
        }
    }
}

fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms
        .saturating_mul(1u64 << attempt.min(31))
        .min(DEFAULT_BACKOFF_MAX_MS)
}

/// One worker's loop: `while running: env ← dequeue; handler ← registry[env.jobType];
/// try handler.handle(env); catch e: log; if attempt < maxAttempts: re-enqueue
/// with attempt+1 and backoff = base·2^attempt (cap backoff_max); else mark
/// terminal failure` (spec.md §4.5). Cooperatively stops on `shutdown`
/// between dequeues.
pub async fn run_worker(
    worker_id: usize,
    queue: Arc<dyn JobQueue>,
    registry: Arc<HandlerRegistry>,
    store: Arc<dyn Store>,
    config: ProcessingConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!(worker_id, "processing worker shutting down");
                    return;
                }
            }
            maybe_envelope = queue.dequeue() => {
                let Some(envelope) = maybe_envelope else { continue };
                process_one(worker_id, envelope, &queue, &registry, &store, &config).await;
            }
        }
    }
}

async fn process_one(
    worker_id: usize,
    envelope: JobEnvelope,
    queue: &Arc<dyn JobQueue>,
    registry: &HandlerRegistry,
    store: &Arc<dyn Store>,
    config: &ProcessingConfig,
) {
    let job_id = envelope.job_id;
    let job_type = envelope.job_type.clone();
    let attempt = envelope.attempt;

    let Some(handler) = registry.get(&job_type) else {
        tracing::error!(worker_id, %job_id, job_type, "no handler registered for job type; dropping");
        let _ = store.delete_job(job_id).await;
        queue.complete(job_id).await;
        return;
    };

    let outcome = handler.handle(&envelope).await;
    queue.complete(job_id).await;

    match outcome {
        Ok(()) => {
            if let Err(e) = store.delete_job(job_id).await {
                tracing::warn!(worker_id, %job_id, error = %e, "failed to remove completed job from the outbox");
            }
        }
        Err(e) => {
            tracing::warn!(worker_id, %job_id, job_type, attempt, error = %e, "job handler failed");
            if (attempt + 1) as u32 >= config.max_attempts {
                tracing::error!(worker_id, %job_id, job_type, attempt, "job exhausted retries; marking terminal failure");
                let _ = store.delete_job(job_id).await;
                return;
            }

            let next_attempt = attempt + 1;
            let delay_ms = backoff_delay_ms(config.backoff_base_ms, attempt as u32);
            let next_attempt_at = Utc::now() + ChronoDuration::milliseconds(delay_ms as i64);
            if let Err(e) = store.reschedule_job(job_id, next_attempt, next_attempt_at).await {
                tracing::warn!(worker_id, %job_id, error = %e, "failed to persist job reschedule");
            }

            let mut retry_envelope = envelope;
            retry_envelope.attempt = next_attempt;
            let queue = queue.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                queue.enqueue(retry_envelope).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_enqueue_of_an_in_flight_job_is_ignored() {
        let queue = InProcessQueue::new();
        let envelope = JobEnvelope {
            job_id: Uuid::now_v7(),
            job_type: "Test".to_string(),
            payload: "{}".to_string(),
            enqueued_at: Utc::now(),
            attempt: 0,
        };
        queue.enqueue(envelope.clone()).await;
        queue.enqueue(envelope.clone()).await;
        assert_eq!(queue.depth(), 1);

        let dequeued = queue.dequeue().await.unwrap();
        assert_eq!(dequeued.job_id, envelope.job_id);
        assert_eq!(queue.depth(), 0);

        // Still tracked as in-flight until `complete` is called.
        queue.enqueue(envelope.clone()).await;
        assert_eq!(queue.depth(), 0);

        queue.complete(envelope.job_id).await;
        queue.enqueue(envelope).await;
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn broadcast_notifier_fans_out_by_model_version() {
        let notifier = BroadcastProgressNotifier::new();
        let model_version_id = Uuid::now_v7();
        let mut subscriber = notifier.subscribe(model_version_id);

        notifier
            .notify(Progress {
                job_id: Uuid::now_v7(),
                model_version_id,
                stage: "Converting".to_string(),
                percent_complete: 50,
                message: "halfway".to_string(),
                is_complete: false,
                is_success: false,
                error_message: None,
            })
            .await;

        let received = subscriber.recv().await.unwrap();
        assert_eq!(received.model_version_id, model_version_id);
        assert_eq!(received.percent_complete, 50);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay_ms(500, 0), 500);
        assert_eq!(backoff_delay_ms(500, 1), 1000);
        assert_eq!(backoff_delay_ms(500, 2), 2000);
        assert_eq!(backoff_delay_ms(500, 20), DEFAULT_BACKOFF_MAX_MS);
    }
}
