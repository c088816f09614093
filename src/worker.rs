//! Worker supervisor
//!
//! Wires the session, connection, dispatcher and emitter together and runs
//! the event loop: connect, attach the emitter, hand job events to the
//! dispatch queue, and reconnect with exponential backoff when the
//! transport drops.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::coordinator::{Channel, Connection, ConnectionEvent, ConnectionManager};
use crate::dispatch::{Admission, DispatchQueue, JobDispatcher, JobStats, ResponseEmitter};
use crate::error::{Error, Result};
use crate::handlers::HandlerRegistry;
use crate::protocol::OutboundEvent;
use crate::session::SessionStore;

/// How a connection ended
enum SessionEnd {
    /// Shutdown was requested while connected
    Shutdown,
    /// The transport ended
    Lost(String),
}

/// The worker process: one connection at a time, jobs dispatched as they arrive
pub struct Worker {
    config: WorkerConfig,
    manager: ConnectionManager,
    dispatcher: Arc<JobDispatcher>,
}

impl Worker {
    pub fn new(config: WorkerConfig, manager: ConnectionManager, registry: Arc<HandlerRegistry>) -> Self {
        let emitter = Arc::new(ResponseEmitter::new(config.dispatch.outbox_capacity));
        let dispatcher = JobDispatcher::new(registry, emitter).with_timeout(config.dispatch.job_timeout());

        Self {
            config,
            manager,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Build a worker from configuration, using the most recent stored session
    pub fn from_config(config: WorkerConfig) -> Result<Self> {
        let store = SessionStore::open(config.session_store_path());
        let manager = ConnectionManager::from_store(config.coordinator.clone(), &store)?;
        let registry = Arc::new(HandlerRegistry::from_settings(&config.handlers)?);
        Ok(Self::new(config, manager, registry))
    }

    pub fn dispatcher(&self) -> Arc<JobDispatcher> {
        self.dispatcher.clone()
    }

    /// Run until Ctrl+C
    pub async fn run(self) -> Result<()> {
        self.run_until(tokio::signal::ctrl_c()).await
    }

    /// Run until `shutdown` completes, the handshake is rejected, or
    /// reconnection gives up
    pub async fn run_until<F: Future>(self, shutdown: F) -> Result<()> {
        info!(
            worker_name = %self.config.worker_name(),
            identity = %self.manager.session().identity,
            coordinator_url = %self.manager.url(),
            "Starting worker"
        );

        let queue = DispatchQueue::start(
            self.dispatcher.clone(),
            self.config.dispatch.max_concurrent_jobs,
            self.config.dispatch.queue_size,
        );

        let result = self.supervise(&queue, shutdown).await;

        queue.shutdown().await;
        let stats = self.dispatcher.tracker().stats();
        log_summary(&stats);

        result
    }

    async fn supervise<F: Future>(&self, queue: &DispatchQueue, shutdown: F) -> Result<()> {
        let mut backoff = self.build_backoff();
        let mut attempts: u32 = 0;
        tokio::pin!(shutdown);

        loop {
            let outcome = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    return Ok(());
                }
                outcome = self.manager.connect() => outcome,
            };

            let failure = match outcome {
                Ok(connection) => {
                    backoff.reset();
                    attempts = 0;

                    match self.drive(connection, queue, &mut shutdown).await {
                        SessionEnd::Shutdown => return Ok(()),
                        SessionEnd::Lost(reason) => {
                            warn!(reason = %reason, "Connection to coordinator lost");
                            Error::ConnectionLost { message: reason }
                        }
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!(error = %e.format_for_log(), "Failed to connect to coordinator");
                    e
                }
                Err(e) => {
                    error!(error = %e.format_for_log(), "Connection attempt rejected");
                    return Err(e);
                }
            };

            let Some(delay) = self.next_delay(&mut backoff, &mut attempts) else {
                return Err(failure);
            };

            info!(delay_ms = delay.as_millis() as u64, attempt = attempts, "Waiting before reconnection");

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Pump one connection's events until it ends or shutdown is requested
    async fn drive<F: Future>(
        &self,
        mut connection: Connection,
        queue: &DispatchQueue,
        shutdown: &mut std::pin::Pin<&mut F>,
    ) -> SessionEnd {
        let emitter = self.dispatcher.emitter();

        let end = loop {
            tokio::select! {
                _ = shutdown.as_mut() => {
                    info!("Shutdown signal received");
                    break SessionEnd::Shutdown;
                }

                event = connection.next_event() => {
                    match event {
                        Some(ConnectionEvent::Connected) => {
                            let channel = connection.channel();
                            emitter.attach(Arc::new(channel.clone())).await;
                            self.send_greeting(&channel).await;
                        }
                        Some(ConnectionEvent::Job(request)) => {
                            let service_id = request.service_id.clone();
                            match queue.submit(request) {
                                Ok(Admission::Queued) => {}
                                Ok(Admission::Rejected) => {
                                    warn!(service_id = %service_id, "Dispatch queue full, job will be answered Failed");
                                }
                                Err(e) => {
                                    error!(service_id = %service_id, error = %e.format_for_log(), "Job dropped");
                                }
                            }
                        }
                        Some(ConnectionEvent::Disconnected { reason }) => break SessionEnd::Lost(reason),
                        None => break SessionEnd::Lost("event stream closed".to_string()),
                    }
                }
            }
        };

        emitter.detach();

        if matches!(end, SessionEnd::Shutdown) {
            connection.close().await;
        }
        end
    }

    async fn send_greeting(&self, channel: &impl Channel) {
        let greeting = &self.config.coordinator.greeting;
        if greeting.is_empty() {
            return;
        }

        if let Err(e) = channel.send(OutboundEvent::Message(greeting.clone())).await {
            debug!(error = %e, "Greeting not delivered");
        }
    }

    fn build_backoff(&self) -> ExponentialBackoff {
        let settings = &self.config.coordinator;
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(settings.reconnect_interval_ms))
            .with_max_interval(Duration::from_millis(settings.max_reconnect_delay_ms))
            .with_max_elapsed_time(None)
            .build()
    }

    /// Delay before the next reconnection attempt, or `None` to give up
    fn next_delay(&self, backoff: &mut ExponentialBackoff, attempts: &mut u32) -> Option<Duration> {
        let settings = &self.config.coordinator;
        if !settings.auto_reconnect {
            info!("Automatic reconnection disabled");
            return None;
        }

        *attempts += 1;
        if settings.max_reconnect_attempts > 0 && *attempts > settings.max_reconnect_attempts {
            error!(
                attempts = *attempts - 1,
                max = settings.max_reconnect_attempts,
                "Max reconnection attempts reached"
            );
            return None;
        }

        Some(
            backoff
                .next_backoff()
                .unwrap_or(Duration::from_millis(settings.max_reconnect_delay_ms)),
        )
    }
}

fn log_summary(stats: &JobStats) {
    info!(
        received = stats.received,
        succeeded = stats.succeeded,
        failed = stats.failed,
        unsupported = stats.unsupported,
        in_flight = stats.in_flight,
        "Worker shutting down"
    );
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
