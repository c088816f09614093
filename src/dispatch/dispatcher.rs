//! Job dispatcher
//!
//! Resolves a handler for each job request, runs it, and normalizes the
//! outcome into exactly one [`JobResponse`]. Failures of any kind stay
//! inside the job: they become a `Failed` response and a log line.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::handlers::{HandlerRegistry, JobHandler};
use crate::protocol::{JobRequest, JobResponse};

use super::{JobTracker, ResponseEmitter};

// ─────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────

/// Turns job requests into job responses
pub struct JobDispatcher {
    registry: Arc<HandlerRegistry>,
    emitter: Arc<ResponseEmitter>,
    tracker: Arc<JobTracker>,
    job_timeout: Option<Duration>,
}

impl JobDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, emitter: Arc<ResponseEmitter>) -> Self {
        Self {
            registry,
            emitter,
            tracker: Arc::new(JobTracker::new()),
            job_timeout: None,
        }
    }

    /// Fail jobs whose handler runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn tracker(&self) -> Arc<JobTracker> {
        self.tracker.clone()
    }

    pub fn emitter(&self) -> Arc<ResponseEmitter> {
        self.emitter.clone()
    }

    /// Resolve, execute and normalize one job without emitting it
    pub async fn dispatch(&self, request: &JobRequest) -> JobResponse {
        self.tracker.start(&request.service_id);

        let handler = match self.resolve(request) {
            Ok(handler) => handler,
            Err(e) => {
                warn!(
                    service_id = %request.service_id,
                    error = %e.format_for_log(),
                    "Unsupported service request type"
                );
                let response = JobResponse::failed(request);
                self.tracker.finish_response(&response, true);
                return response;
            }
        };

        debug!(
            service_id = %request.service_id,
            service_name = %request.service_name,
            "Running handler"
        );

        let response = match self.run_handler(handler, request).await {
            Ok(results) => JobResponse::success(request, results),
            Err(e) if e.is_job_local() => {
                warn!(
                    service_id = %request.service_id,
                    service_name = %request.service_name,
                    error = %e.format_for_log(),
                    "Job failed"
                );
                JobResponse::failed(request)
            }
            Err(e) => {
                error!(
                    service_id = %request.service_id,
                    service_name = %request.service_name,
                    error = %e.format_for_log(),
                    "Job failed with an unexpected error"
                );
                JobResponse::failed(request)
            }
        };

        let elapsed_ms = self.tracker.finish_response(&response, false);
        info!(
            service_id = %response.service_id,
            service_name = %request.service_name,
            status = %response.status,
            elapsed_ms,
            "Job finished"
        );

        response
    }

    /// Dispatch one job and emit its response
    pub async fn handle(&self, request: JobRequest) -> Result<()> {
        let response = self.dispatch(&request).await;
        self.emitter.emit(response).await
    }

    /// Answer a job with `Failed` without running it
    pub async fn reject(&self, request: JobRequest, reason: &str) -> Result<()> {
        warn!(
            service_id = %request.service_id,
            service_name = %request.service_name,
            reason,
            "Rejecting job"
        );
        self.tracker.start(&request.service_id);
        let response = JobResponse::failed(&request);
        self.tracker.finish_response(&response, false);
        self.emitter.emit(response).await
    }

    /// Handler registered for the request's service name
    pub fn resolve(&self, request: &JobRequest) -> Result<Arc<dyn JobHandler>> {
        self.registry
            .resolve(&request.service_name)
            .ok_or_else(|| Error::UnsupportedJob {
                service_name: request.service_name.clone(),
            })
    }

    /// Run the handler on its own task so a panic stays contained
    async fn run_handler(&self, handler: Arc<dyn JobHandler>, request: &JobRequest) -> Result<Value> {
        let details = request.request_details.clone();
        let task = tokio::spawn(async move { handler.execute(details).await });
        let abort = task.abort_handle();

        let joined = match self.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Err(Error::JobTimeout {
                        service_id: request.service_id.to_string(),
                        timeout_secs: limit.as_secs(),
                    });
                }
            },
            None => task.await,
        };

        joined.map_err(|e| {
            let message = if e.is_panic() {
                "handler panicked"
            } else {
                "handler was cancelled"
            };
            Error::handler_failed(&request.service_name, message)
        })?
    }
}

// ─────────────────────────────────────────────────────────────────
// Dispatch Queue
// ─────────────────────────────────────────────────────────────────

/// Whether a submitted job will run or be answered `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The job will run when its turn comes
    Queued,
    /// More than `queue_size` jobs were waiting; the job gets a `Failed`
    /// response in its turn without running
    Rejected,
}

enum QueuedJob {
    Run(JobRequest),
    Reject(JobRequest),
}

/// Feeds jobs to the dispatcher from a dedicated task.
///
/// At most `max_concurrent` jobs run at once. A permit is held from the
/// start of a job until its response has been emitted, so with one permit
/// jobs run strictly one after another in arrival order. Jobs arriving
/// while `queue_size` others are waiting are not run, but their `Failed`
/// responses still take a permit in arrival order.
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    waiting: Arc<AtomicUsize>,
    queue_size: usize,
    task: JoinHandle<()>,
}

impl DispatchQueue {
    pub fn start(dispatcher: Arc<JobDispatcher>, max_concurrent: usize, queue_size: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let waiting = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(run_queue(dispatcher, rx, waiting.clone(), max_concurrent.max(1)));
        Self {
            tx,
            waiting,
            queue_size: queue_size.max(1),
            task,
        }
    }

    /// Queue a job without waiting. Fails only if the queue task is gone.
    pub fn submit(&self, request: JobRequest) -> Result<Admission> {
        let admitted = self
            .waiting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.queue_size).then_some(n + 1)
            })
            .is_ok();

        let (job, admission) = if admitted {
            (QueuedJob::Run(request), Admission::Queued)
        } else {
            (QueuedJob::Reject(request), Admission::Rejected)
        };

        self.tx.send(job).map_err(|_| {
            if admitted {
                self.waiting.fetch_sub(1, Ordering::SeqCst);
            }
            Error::Internal("dispatch queue closed".to_string())
        })?;
        Ok(admission)
    }

    /// Jobs accepted but not started yet
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs and wait for queued and running jobs to finish
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Dispatch queue ended abnormally");
        }
    }
}

async fn run_queue(
    dispatcher: Arc<JobDispatcher>,
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    waiting: Arc<AtomicUsize>,
    max_concurrent: usize,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent));

    while let Some(job) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };

        let dispatcher = dispatcher.clone();
        match job {
            QueuedJob::Run(request) => {
                waiting.fetch_sub(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let _permit = permit;
                    // Emit failures are logged and parked by the emitter
                    let _ = dispatcher.handle(request).await;
                });
            }
            QueuedJob::Reject(request) => {
                tokio::spawn(async move {
                    let _permit = permit;
                    let _ = dispatcher.reject(request, "dispatch queue full").await;
                });
            }
        }
    }

    // Wait for every running job to hand back its permit
    let _ = permits.acquire_many(max_concurrent as u32).await;
    debug!("Dispatch queue drained");
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    use crate::coordinator::{Channel, ConnectionState};
    use crate::handlers::handler_fn;
    use crate::protocol::{JobStatus, OutboundEvent};

    struct RecordingChannel {
        sent: Mutex<Vec<JobResponse>>,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn state(&self) -> ConnectionState {
            ConnectionState::Connected
        }

        async fn send(&self, event: OutboundEvent) -> Result<()> {
            if let OutboundEvent::ServiceResponse(response) = event {
                self.sent.lock().push(response);
            }
            Ok(())
        }
    }

    async fn setup(registry: HandlerRegistry) -> (Arc<JobDispatcher>, Arc<RecordingChannel>) {
        let emitter = Arc::new(ResponseEmitter::new(0));
        let channel = Arc::new(RecordingChannel {
            sent: Mutex::new(Vec::new()),
        });
        emitter.attach(channel.clone()).await;
        (Arc::new(JobDispatcher::new(Arc::new(registry), emitter)), channel)
    }

    fn seo_stub() -> HandlerRegistry {
        let registry = HandlerRegistry::new();
        registry.register(
            "SEO",
            Arc::new(handler_fn(|_| async { Ok(json!({ "rankings": ["url1"] })) })),
        );
        registry
    }

    #[tokio::test]
    async fn test_success_echoes_name_and_results() {
        let (dispatcher, channel) = setup(seo_stub()).await;
        dispatcher
            .handle(JobRequest::new("1", "SEO", json!({ "term": "cats" })))
            .await
            .unwrap();

        let sent = channel.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            serde_json::to_value(&sent[0]).unwrap(),
            json!({
                "serviceId": "1",
                "serviceName": "SEO",
                "results": { "rankings": ["url1"] },
                "status": "Success"
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_service_fails_without_error() {
        let (dispatcher, channel) = setup(seo_stub()).await;
        dispatcher
            .handle(JobRequest::new("2", "UNKNOWN", Value::Null))
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&channel.sent.lock()[0]).unwrap(),
            json!({ "serviceId": "2", "serviceName": "", "results": null, "status": "Failed" })
        );
        assert_eq!(dispatcher.tracker().stats().unsupported, 1);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failed() {
        let registry = HandlerRegistry::new();
        registry.register(
            "BOOM",
            Arc::new(handler_fn(|_| async { Err(Error::handler_failed("BOOM", "exploded")) })),
        );
        let (dispatcher, _) = setup(registry).await;

        let response = dispatcher.dispatch(&JobRequest::new("3", "BOOM", Value::Null)).await;
        assert_eq!(response.status, JobStatus::Failed);
        assert!(response.results.is_none());
        assert_eq!(dispatcher.tracker().stats().failed, 1);
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_failed() {
        let registry = HandlerRegistry::new();
        registry.register(
            "PANIC",
            Arc::new(handler_fn(|_| async {
                if true {
                    panic!("handler bug");
                }
                Ok(Value::Null)
            })),
        );
        let (dispatcher, _) = setup(registry).await;

        let response = dispatcher.dispatch(&JobRequest::new("4", "PANIC", Value::Null)).await;
        assert_eq!(response.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_timeout_becomes_failed() {
        let registry = HandlerRegistry::new();
        registry.register(
            "SLOW",
            Arc::new(handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Value::Null)
            })),
        );
        let emitter = Arc::new(ResponseEmitter::new(0));
        let dispatcher = JobDispatcher::new(Arc::new(registry), emitter)
            .with_timeout(Some(Duration::from_millis(50)));

        let response = dispatcher.dispatch(&JobRequest::new("5", "SLOW", Value::Null)).await;
        assert_eq!(response.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_handle_reports_unavailable_channel() {
        let emitter = Arc::new(ResponseEmitter::new(0));
        let dispatcher = JobDispatcher::new(Arc::new(seo_stub()), emitter);

        let err = dispatcher
            .handle(JobRequest::new("6", "SEO", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChannelUnavailable { .. }));
        assert_eq!(dispatcher.tracker().stats().succeeded, 1);
    }

    #[tokio::test]
    async fn test_reject_emits_failed() {
        let (dispatcher, channel) = setup(seo_stub()).await;
        dispatcher
            .reject(JobRequest::new("7", "SEO", Value::Null), "queue full")
            .await
            .unwrap();

        let sent = channel.sent.lock();
        assert_eq!(sent[0].status, JobStatus::Failed);
        assert_eq!(sent[0].service_id.as_str(), "7");
    }

    #[tokio::test]
    async fn test_queue_sequential_preserves_order() {
        let registry = HandlerRegistry::new();
        let running = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        {
            let running = running.clone();
            let overlap = overlap.clone();
            registry.register(
                "WORK",
                Arc::new(handler_fn(move |details: Value| {
                    let running = running.clone();
                    let overlap = overlap.clone();
                    async move {
                        if running.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlap.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(details)
                    }
                })),
            );
        }
        let (dispatcher, channel) = setup(registry).await;

        let queue = DispatchQueue::start(dispatcher.clone(), 1, 16);
        for i in 0..5 {
            queue
                .submit(JobRequest::new(i.to_string(), "WORK", json!(i)))
                .unwrap();
        }
        queue.shutdown().await;

        let ids: Vec<String> = channel
            .sent
            .lock()
            .iter()
            .map(|r| r.service_id.to_string())
            .collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_overflow_rejections_keep_arrival_order() {
        let registry = HandlerRegistry::new();
        registry.register(
            "WORK",
            Arc::new(handler_fn(|details: Value| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(details)
            })),
        );
        let (dispatcher, channel) = setup(registry).await;

        // The queue task has not run yet, so only the first job is admitted
        let queue = DispatchQueue::start(dispatcher.clone(), 1, 1);
        let admissions: Vec<Admission> = (0..5)
            .map(|i| queue.submit(JobRequest::new(i.to_string(), "WORK", json!(i))).unwrap())
            .collect();
        assert_eq!(admissions[0], Admission::Queued);
        assert!(admissions[1..].iter().all(|a| *a == Admission::Rejected));
        assert_eq!(queue.waiting(), 1);
        queue.shutdown().await;

        let sent: Vec<(String, JobStatus)> = channel
            .sent
            .lock()
            .iter()
            .map(|r| (r.service_id.to_string(), r.status))
            .collect();
        assert_eq!(
            sent,
            vec![
                ("0".to_string(), JobStatus::Success),
                ("1".to_string(), JobStatus::Failed),
                ("2".to_string(), JobStatus::Failed),
                ("3".to_string(), JobStatus::Failed),
                ("4".to_string(), JobStatus::Failed),
            ]
        );
        assert_eq!(dispatcher.tracker().stats().failed, 4);
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_unsupported_job() {
        let (dispatcher, _) = setup(seo_stub()).await;

        let err = dispatcher
            .resolve(&JobRequest::new("8", "seo", Value::Null))
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnsupportedJob { ref service_name } if service_name == "seo"));
        assert!(err.is_job_local());
        assert!(dispatcher.resolve(&JobRequest::new("9", "SEO", Value::Null)).is_ok());
    }

    #[tokio::test]
    async fn test_queue_concurrent_emits_every_response_once() {
        let (dispatcher, channel) = setup(seo_stub()).await;

        let queue = DispatchQueue::start(dispatcher.clone(), 4, 32);
        for i in 0..20 {
            let name = if i % 3 == 0 { "UNKNOWN" } else { "SEO" };
            queue
                .submit(JobRequest::new(i.to_string(), name, Value::Null))
                .unwrap();
        }
        queue.shutdown().await;

        let mut ids: Vec<u32> = channel
            .sent
            .lock()
            .iter()
            .map(|r| r.service_id.as_str().parse().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());
        assert_eq!(dispatcher.tracker().stats().completed(), 20);
    }
}
