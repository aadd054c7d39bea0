//! Queue Manager for the transcription router
//!
//! Bounded FIFO queue with a fixed number of concurrent workers. Admission fails fast
//! when the queue is full; results are kept for polling until they are collected or
//! their TTL expires.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::file_utils::cleanup_folder;
use crate::metrics::Metrics;
use crate::models::{ProcessedTranscription, TranscriptionRequest};
use crate::router::RouterError;

/// Job status for tracking the progress of transcription requests
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue
    Queued,
    /// Handed to a worker
    Processing,
    /// Finished successfully, result available
    Completed,
    /// Finished with an error
    Failed { error: String },
}

/// Failure of one processed request
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    /// Message safe to show to the user
    pub user_message: String,
    /// Full error for the logs
    pub detail: String,
}

impl JobFailure {
    pub fn internal<S: Into<String>>(detail: S) -> Self {
        Self {
            user_message: "An internal error occurred while processing your recording. Please try again.".to_string(),
            detail: detail.into(),
        }
    }
}

impl From<RouterError> for JobFailure {
    fn from(error: RouterError) -> Self {
        Self {
            user_message: error.user_message(),
            detail: error.to_string(),
        }
    }
}

pub type JobOutcome = Result<ProcessedTranscription, JobFailure>;

/// Work done for each dequeued request
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    async fn process(&self, request: TranscriptionRequest) -> JobOutcome;
}

/// Queue manager error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Queue is full ({max} requests waiting), please try again later")]
    QueueFull { max: usize },

    #[error("Audio duration {duration:.0}s exceeds the {max:.0}s limit")]
    DurationExceeded { duration: f64, max: f64 },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Cannot cancel job: {0}")]
    CannotCancelJob(String),

    #[error("Job not completed yet: {0}")]
    NotCompleted(String),

    #[error("Transcription failed: {0}")]
    JobFailed(String),

    #[error("No result after {0}s")]
    WaitTimeout(u64),

    #[error("Queue is closed")]
    Closed,
}

struct ProcessingEntry {
    started_at: Instant,
    estimate: f64,
}

struct JobRecord {
    status: JobStatus,
    folder: Option<PathBuf>,
    enqueued_at: Instant,
    outcome: Option<JobOutcome>,
    finished_at: Option<Instant>,
    waiters: Vec<oneshot::Sender<JobOutcome>>,
}

/// Internal state of the queue manager
struct QueueState {
    /// Requests waiting for a worker, FIFO
    pending: VecDeque<TranscriptionRequest>,
    /// Requests held by a worker
    processing: HashMap<String, ProcessingEntry>,
    /// Status and result of every known request
    records: HashMap<String, JobRecord>,
    closed: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    /// Signals a new pending request or closure
    notify: Notify,
    /// One permit per concurrent worker
    slots: Arc<Semaphore>,
    config: QueueConfig,
    metrics: Metrics,
}

/// Queue Manager for handling transcription requests
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<QueueInner>,
}

impl QueueManager {
    pub fn new(config: QueueConfig, metrics: Metrics) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    processing: HashMap::new(),
                    records: HashMap::new(),
                    closed: false,
                }),
                notify: Notify::new(),
                slots,
                config,
                metrics,
            }),
        }
    }

    /// Admit a request. Returns its 1-based position among pending requests.
    pub async fn enqueue(&self, request: TranscriptionRequest) -> Result<usize, QueueError> {
        let duration = request.context.duration_seconds;
        let max_duration = self.inner.config.max_audio_duration;
        if duration > max_duration {
            self.inner.metrics.record_request_rejected("too_long").await;
            return Err(QueueError::DurationExceeded {
                duration,
                max: max_duration,
            });
        }

        let request_id = request.id.clone();
        let priority = request.context.priority;
        let position = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                drop(state);
                self.inner.metrics.record_request_rejected("closed").await;
                return Err(QueueError::Closed);
            }
            if state.pending.len() >= self.inner.config.max_queue_size {
                drop(state);
                self.inner.metrics.record_request_rejected("queue_full").await;
                return Err(QueueError::QueueFull {
                    max: self.inner.config.max_queue_size,
                });
            }

            state.records.insert(
                request_id.clone(),
                JobRecord {
                    status: JobStatus::Queued,
                    folder: request.job_folder.clone(),
                    enqueued_at: Instant::now(),
                    outcome: None,
                    finished_at: None,
                    waiters: Vec::new(),
                },
            );
            state.pending.push_back(request);
            state.pending.len()
        };

        self.inner.notify.notify_one();
        self.inner.metrics.record_request_enqueued(priority.as_str()).await;
        self.inner.metrics.set_queue_depth(position).await;
        info!(
            "Request {} queued at position {} ({:.1}s audio, priority {})",
            request_id, position, duration, priority
        );
        Ok(position)
    }

    /// Start the worker loop. At most `max_concurrent` requests are processed at once;
    /// each one runs in its own task so a panicking processor only fails its own request.
    pub fn start_worker(&self, processor: Arc<dyn JobProcessor>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            info!(
                "Queue worker started (max_concurrent={}, max_queue_size={})",
                inner.config.max_concurrent, inner.config.max_queue_size
            );
            loop {
                let permit = match Arc::clone(&inner.slots).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let Some(request) = inner.next_request().await else {
                    break;
                };

                let inner = Arc::clone(&inner);
                let processor = Arc::clone(&processor);
                tokio::spawn(async move {
                    let request_id = request.id.clone();
                    let started = Instant::now();
                    let handle = tokio::spawn(async move { processor.process(request).await });
                    let outcome = match handle.await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!("Processing of request {} panicked: {}", request_id, e);
                            Err(JobFailure::internal(format!("processing task failed: {}", e)))
                        }
                    };
                    inner.finish(&request_id, outcome, started).await;
                    drop(permit);
                });
            }
            info!("Queue worker stopped");
        })
    }

    /// Start a background task evicting expired results
    pub fn start_cleanup_task(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let interval = Duration::from_secs(self.inner.config.cleanup_interval_secs);
        let ttl = Duration::from_secs(self.inner.config.result_ttl_secs);
        info!(
            "Starting cleanup task: result TTL {}s, interval {}s",
            ttl.as_secs(),
            interval.as_secs()
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let count = manager.cleanup_expired(ttl).await;
                if count > 0 {
                    info!("Cleaned up {} expired results", count);
                } else {
                    debug!("No expired results to clean up");
                }
            }
        })
    }

    /// Remove finished records older than `ttl`. Returns how many were removed.
    pub async fn cleanup_expired(&self, ttl: Duration) -> usize {
        let expired: Vec<(String, Option<PathBuf>)> = {
            let mut state = self.inner.state.lock().await;
            let ids: Vec<String> = state
                .records
                .iter()
                .filter(|(_, record)| record.finished_at.is_some_and(|t| t.elapsed() >= ttl))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| state.records.remove(&id).map(|record| (id, record.folder)))
                .collect()
        };

        for (id, folder) in &expired {
            debug!("Evicting expired result {}", id);
            if let Some(folder) = folder {
                cleanup_folder(folder).await;
            }
        }
        expired.len()
    }

    /// Number of requests waiting for a worker
    pub async fn get_queue_depth(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    pub async fn processing_count(&self) -> usize {
        self.inner.state.lock().await.processing.len()
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<JobStatus, QueueError> {
        let state = self.inner.state.lock().await;
        state
            .records
            .get(job_id)
            .map(|record| record.status.clone())
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))
    }

    /// Position of a pending request (1-based), None once it left the queue
    pub async fn get_job_position(&self, job_id: &str) -> Result<Option<usize>, QueueError> {
        let state = self.inner.state.lock().await;
        if !state.records.contains_key(job_id) {
            return Err(QueueError::JobNotFound(job_id.to_string()));
        }
        Ok(state
            .pending
            .iter()
            .position(|request| request.id == job_id)
            .map(|idx| idx + 1))
    }

    /// Seconds before `job_id` should start: remaining estimates of running requests plus
    /// estimates of pending requests ahead of it, spread over the worker count.
    /// Estimates are audio duration times the configured realtime factor.
    pub async fn get_estimated_wait_time(&self, job_id: &str) -> Result<f64, QueueError> {
        let state = self.inner.state.lock().await;
        if !state.records.contains_key(job_id) {
            return Err(QueueError::JobNotFound(job_id.to_string()));
        }
        let Some(index) = state.pending.iter().position(|r| r.id == job_id) else {
            return Ok(0.0);
        };

        let rtf = self.inner.config.estimate_rtf;
        let running: f64 = state
            .processing
            .values()
            .map(|entry| (entry.estimate - entry.started_at.elapsed().as_secs_f64()).max(0.0))
            .sum();
        let ahead: f64 = state
            .pending
            .iter()
            .take(index)
            .map(|r| r.estimated_processing_seconds(rtf))
            .sum();

        Ok((running + ahead) / self.inner.config.max_concurrent.max(1) as f64)
    }

    /// Collect a finished result. The record is evicted once collected.
    pub async fn take_result(&self, job_id: &str) -> Result<ProcessedTranscription, QueueError> {
        let mut state = self.inner.state.lock().await;
        let record = state
            .records
            .get(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        if record.outcome.is_none() {
            return Err(QueueError::NotCompleted(job_id.to_string()));
        }
        match state.records.remove(job_id).and_then(|record| record.outcome) {
            Some(Ok(processed)) => Ok(processed),
            Some(Err(failure)) => Err(QueueError::JobFailed(failure.user_message)),
            None => Err(QueueError::JobNotFound(job_id.to_string())),
        }
    }

    /// Wait until `job_id` finishes and collect its result
    pub async fn wait_for(&self, job_id: &str, timeout: Duration) -> Result<ProcessedTranscription, QueueError> {
        let receiver = {
            let mut state = self.inner.state.lock().await;
            let record = state
                .records
                .get_mut(job_id)
                .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
            if record.outcome.is_some() {
                drop(state);
                return self.take_result(job_id).await;
            }
            let (sender, receiver) = oneshot::channel();
            record.waiters.push(sender);
            receiver
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(Ok(processed))) => Ok(processed),
            Ok(Ok(Err(failure))) => Err(QueueError::JobFailed(failure.user_message)),
            Ok(Err(_)) => Err(QueueError::JobNotFound(job_id.to_string())),
            Err(_) => Err(QueueError::WaitTimeout(timeout.as_secs())),
        }
    }

    /// Cancel a pending request, or forget a finished one. Running requests cannot be cancelled.
    pub async fn cancel_job(&self, job_id: &str) -> Result<(), QueueError> {
        let folder = {
            let mut state = self.inner.state.lock().await;
            let status = state
                .records
                .get(job_id)
                .map(|record| record.status.clone())
                .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
            match status {
                JobStatus::Processing => {
                    return Err(QueueError::CannotCancelJob(
                        "Cannot cancel a job that is currently processing".to_string(),
                    ))
                }
                JobStatus::Queued => state.pending.retain(|request| request.id != job_id),
                JobStatus::Completed | JobStatus::Failed { .. } => {}
            }
            let depth = state.pending.len();
            let folder = state.records.remove(job_id).and_then(|record| record.folder);
            drop(state);
            self.inner.metrics.set_queue_depth(depth).await;
            folder
        };

        if let Some(folder) = folder {
            cleanup_folder(&folder).await;
        }
        self.inner.metrics.record_job_finished("cancelled", 0.0).await;
        info!("Canceled job: {}", job_id);
        Ok(())
    }

    /// Stop admitting requests. Pending requests still run; the worker exits once the queue drains.
    pub async fn close(&self) {
        self.inner.state.lock().await.closed = true;
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();
        info!("Queue closed to new requests");
    }
}

impl QueueInner {
    /// Next pending request, moved to the processing set. None once closed and drained.
    async fn next_request(&self) -> Option<TranscriptionRequest> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(request) = state.pending.pop_front() {
                    let estimate = request.estimated_processing_seconds(self.config.estimate_rtf);
                    state.processing.insert(
                        request.id.clone(),
                        ProcessingEntry {
                            started_at: Instant::now(),
                            estimate,
                        },
                    );
                    if let Some(record) = state.records.get_mut(&request.id) {
                        record.status = JobStatus::Processing;
                        debug!(
                            "Request {} waited {:.1}s in queue",
                            request.id,
                            record.enqueued_at.elapsed().as_secs_f64()
                        );
                    }
                    let (depth, running) = (state.pending.len(), state.processing.len());
                    drop(state);
                    self.metrics.set_queue_depth(depth).await;
                    self.metrics.set_jobs_processing(running).await;
                    info!("Processing request {}", request.id);
                    return Some(request);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    async fn finish(&self, request_id: &str, outcome: JobOutcome, started: Instant) {
        let elapsed = started.elapsed().as_secs_f64();
        let status_label = match &outcome {
            Ok(processed) => {
                info!(
                    "Request {} completed in {:.1}s by {} ({})",
                    request_id, elapsed, processed.result.provider_used, processed.result.model_name
                );
                "completed"
            }
            Err(failure) => {
                error!("Request {} failed: {}", request_id, failure.detail);
                "failed"
            }
        };

        let (running, folder) = {
            let mut state = self.state.lock().await;
            state.processing.remove(request_id);
            let mut folder = None;
            let mut delivered = false;
            if let Some(record) = state.records.get_mut(request_id) {
                record.status = match &outcome {
                    Ok(_) => JobStatus::Completed,
                    Err(failure) => JobStatus::Failed {
                        error: failure.user_message.clone(),
                    },
                };
                record.finished_at = Some(Instant::now());
                folder = record.folder.take();
                for waiter in record.waiters.drain(..) {
                    delivered |= waiter.send(outcome.clone()).is_ok();
                }
                record.outcome = Some(outcome);
            } else {
                warn!("Finished request {} has no record", request_id);
            }
            if delivered {
                state.records.remove(request_id);
            }
            (state.processing.len(), folder)
        };

        if let Some(folder) = folder {
            cleanup_folder(&folder).await;
        }
        self.metrics.set_jobs_processing(running).await;
        self.metrics.record_job_finished(status_label, elapsed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TranscriptionContext, TranscriptionResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn queue_config(max_queue_size: usize, max_concurrent: usize) -> QueueConfig {
        QueueConfig {
            max_queue_size,
            max_concurrent,
            estimate_rtf: 0.5,
            max_audio_duration: 3600.0,
            result_ttl_secs: 3600,
            cleanup_interval_secs: 60,
        }
    }

    fn request(duration: f64) -> TranscriptionRequest {
        TranscriptionRequest::new("user", PathBuf::from("/tmp/none.ogg"), TranscriptionContext::new(duration))
    }

    fn processed(request: &TranscriptionRequest) -> ProcessedTranscription {
        let result = TranscriptionResult::new("hello", None, 0.01, request.context.duration_seconds, "fake", "m");
        ProcessedTranscription {
            request_id: request.id.clone(),
            final_text: result.text.clone(),
            result,
            refined: false,
        }
    }

    /// Records processing order and peak concurrency; blocks until released when gated
    #[derive(Default)]
    struct RecordingProcessor {
        order: StdMutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay_ms: u64,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl JobProcessor for RecordingProcessor {
        async fn process(&self, request: TranscriptionRequest) -> JobOutcome {
            self.order.lock().unwrap().push(request.id.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(processed(&request))
        }
    }

    struct PanickingProcessor;

    #[async_trait]
    impl JobProcessor for PanickingProcessor {
        async fn process(&self, request: TranscriptionRequest) -> JobOutcome {
            if request.context.duration_seconds > 100.0 {
                panic!("decoder exploded");
            }
            Ok(processed(&request))
        }
    }

    #[tokio::test]
    async fn test_admission_is_bounded() {
        let queue = QueueManager::new(queue_config(2, 1), Metrics::disabled());
        assert_eq!(queue.enqueue(request(10.0)).await.unwrap(), 1);
        assert_eq!(queue.enqueue(request(10.0)).await.unwrap(), 2);
        assert_eq!(
            queue.enqueue(request(10.0)).await.unwrap_err(),
            QueueError::QueueFull { max: 2 }
        );
        assert_eq!(queue.get_queue_depth().await, 2);
    }

    #[tokio::test]
    async fn test_overlong_audio_is_refused() {
        let queue = QueueManager::new(queue_config(2, 1), Metrics::disabled());
        assert!(matches!(
            queue.enqueue(request(7200.0)).await,
            Err(QueueError::DurationExceeded { .. })
        ));
        assert_eq!(queue.get_queue_depth().await, 0);
    }

    #[tokio::test]
    async fn test_fifo_order_and_concurrency_bound() {
        let queue = QueueManager::new(queue_config(20, 2), Metrics::disabled());
        let processor = Arc::new(RecordingProcessor {
            delay_ms: 20,
            ..Default::default()
        });

        let mut ids = Vec::new();
        for _ in 0..8 {
            let request = request(5.0);
            ids.push(request.id.clone());
            queue.enqueue(request).await.unwrap();
        }
        queue.start_worker(processor.clone());

        for id in &ids {
            queue.wait_for(id, Duration::from_secs(5)).await.unwrap();
        }

        assert_eq!(*processor.order.lock().unwrap(), ids);
        assert!(processor.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(processor.peak.load(Ordering::SeqCst), 2);
        assert_eq!(queue.processing_count().await, 0);
    }

    #[tokio::test]
    async fn test_position_wait_estimate_and_cancel() {
        let gate = Arc::new(Notify::new());
        let queue = QueueManager::new(queue_config(10, 1), Metrics::disabled());
        let processor = Arc::new(RecordingProcessor {
            gate: Some(gate.clone()),
            ..Default::default()
        });

        let first = request(100.0);
        let second = request(40.0);
        let third = request(10.0);
        let (first_id, second_id, third_id) = (first.id.clone(), second.id.clone(), third.id.clone());
        for r in [first, second, third] {
            queue.enqueue(r).await.unwrap();
        }
        queue.start_worker(processor.clone());

        // Wait until the first request is picked up
        for _ in 0..100 {
            if queue.processing_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(queue.get_job_status(&first_id).await.unwrap(), JobStatus::Processing);
        assert_eq!(queue.get_job_position(&first_id).await.unwrap(), None);
        assert_eq!(queue.get_job_position(&second_id).await.unwrap(), Some(1));
        assert_eq!(queue.get_job_position(&third_id).await.unwrap(), Some(2));

        // first: 100s * 0.5 = 50s running; second: 40s * 0.5 = 20s ahead of third
        let wait = queue.get_estimated_wait_time(&third_id).await.unwrap();
        assert!(wait > 69.0 && wait <= 70.0, "wait was {}", wait);

        assert!(matches!(
            queue.cancel_job(&first_id).await,
            Err(QueueError::CannotCancelJob(_))
        ));
        queue.cancel_job(&second_id).await.unwrap();
        assert!(matches!(
            queue.get_job_status(&second_id).await,
            Err(QueueError::JobNotFound(_))
        ));
        assert_eq!(queue.get_job_position(&third_id).await.unwrap(), Some(1));

        gate.notify_waiters();
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_waiters();
        queue.wait_for(&third_id, Duration::from_secs(5)).await.unwrap();
        assert!(!processor.order.lock().unwrap().contains(&second_id));
    }

    #[tokio::test]
    async fn test_panic_fails_only_its_request() {
        let queue = QueueManager::new(queue_config(10, 1), Metrics::disabled());
        let bad = request(500.0);
        let good = request(5.0);
        let (bad_id, good_id) = (bad.id.clone(), good.id.clone());
        queue.enqueue(bad).await.unwrap();
        queue.enqueue(good).await.unwrap();
        queue.start_worker(Arc::new(PanickingProcessor));

        assert!(matches!(
            queue.wait_for(&bad_id, Duration::from_secs(5)).await,
            Err(QueueError::JobFailed(_))
        ));
        let result = queue.wait_for(&good_id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.final_text, "hello");
    }

    #[tokio::test]
    async fn test_take_result_evicts_and_ttl_cleanup() {
        let queue = QueueManager::new(queue_config(10, 1), Metrics::disabled());
        let first = request(5.0);
        let second = request(5.0);
        let (first_id, second_id) = (first.id.clone(), second.id.clone());
        queue.enqueue(first).await.unwrap();
        queue.enqueue(second).await.unwrap();
        assert!(matches!(
            queue.take_result(&first_id).await,
            Err(QueueError::NotCompleted(_))
        ));

        queue.start_worker(Arc::new(RecordingProcessor::default()));
        for _ in 0..100 {
            if queue.get_job_status(&second_id).await.unwrap() == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(queue.take_result(&first_id).await.unwrap().request_id, first_id);
        assert!(matches!(
            queue.take_result(&first_id).await,
            Err(QueueError::JobNotFound(_))
        ));

        assert_eq!(queue.cleanup_expired(Duration::from_secs(3600)).await, 0);
        assert_eq!(queue.cleanup_expired(Duration::ZERO).await, 1);
        assert!(queue.get_job_status(&second_id).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_queue_refuses_and_worker_exits() {
        let queue = QueueManager::new(queue_config(10, 1), Metrics::disabled());
        let handle = queue.start_worker(Arc::new(RecordingProcessor::default()));
        queue.close().await;
        assert_eq!(queue.enqueue(request(1.0)).await.unwrap_err(), QueueError::Closed);
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
