//! Response emitter
//!
//! Writes job responses to the currently attached channel. Responses that
//! cannot be delivered are parked in a bounded outbox and flushed, oldest
//! first, when the next channel attaches.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::coordinator::{Channel, ConnectionState};
use crate::error::{Error, Result};
use crate::protocol::{JobResponse, OutboundEvent};

/// Sends job responses over the live channel
pub struct ResponseEmitter {
    channel: RwLock<Option<Arc<dyn Channel>>>,
    outbox: Mutex<VecDeque<JobResponse>>,
    outbox_capacity: usize,
    /// Keeps flushes and emits from interleaving on the channel
    send_lock: tokio::sync::Mutex<()>,
}

impl ResponseEmitter {
    /// Create an emitter with no channel attached
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            channel: RwLock::new(None),
            outbox: Mutex::new(VecDeque::new()),
            outbox_capacity,
            send_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// State of the attached channel, `Disconnected` when none is attached
    pub fn state(&self) -> ConnectionState {
        self.channel
            .read()
            .as_ref()
            .map(|c| c.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Responses waiting for a channel
    pub fn pending(&self) -> usize {
        self.outbox.lock().len()
    }

    /// Attach a new channel and flush parked responses through it.
    /// Returns the number of responses flushed.
    pub async fn attach(&self, channel: Arc<dyn Channel>) -> usize {
        let _guard = self.send_lock.lock().await;
        *self.channel.write() = Some(channel.clone());

        let mut flushed = 0;
        loop {
            let next = self.outbox.lock().pop_front();
            let Some(response) = next else { break };

            let event = OutboundEvent::ServiceResponse(response.clone());
            if let Err(e) = channel.send(event).await {
                warn!(
                    service_id = %response.service_id,
                    error = %e,
                    "Flush interrupted, keeping remaining responses"
                );
                self.outbox.lock().push_front(response);
                break;
            }
            flushed += 1;
        }

        if flushed > 0 {
            info!(flushed, "Flushed queued responses");
        }
        flushed
    }

    /// Forget the current channel
    pub fn detach(&self) {
        if self.channel.write().take().is_some() {
            debug!("Channel detached from emitter");
        }
    }

    /// Send one response. Fails with [`Error::ChannelUnavailable`] when no
    /// connected channel is attached; the response is then parked.
    pub async fn emit(&self, response: JobResponse) -> Result<()> {
        let _guard = self.send_lock.lock().await;
        let channel = self.channel.read().clone();

        let result = match channel {
            Some(channel) => match channel.state() {
                ConnectionState::Connected => {
                    channel
                        .send(OutboundEvent::ServiceResponse(response.clone()))
                        .await
                }
                state => Err(Error::ChannelUnavailable {
                    state: state.to_string(),
                }),
            },
            None => Err(Error::ChannelUnavailable {
                state: ConnectionState::Disconnected.to_string(),
            }),
        };

        match result {
            Ok(()) => {
                debug!(
                    service_id = %response.service_id,
                    status = %response.status,
                    "Response emitted"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    service_id = %response.service_id,
                    error = %e,
                    "Could not emit response"
                );
                self.park(response);
                Err(e)
            }
        }
    }

    fn park(&self, response: JobResponse) {
        if self.outbox_capacity == 0 {
            warn!(service_id = %response.service_id, "Dropping undeliverable response");
            return;
        }

        let mut outbox = self.outbox.lock();
        if outbox.len() >= self.outbox_capacity {
            warn!(
                service_id = %response.service_id,
                capacity = self.outbox_capacity,
                "Outbox full, dropping response"
            );
            return;
        }

        outbox.push_back(response);
        debug!(pending = outbox.len(), "Response parked until reconnect");
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JobRequest;
    use async_trait::async_trait;
    use serde_json::json;

    /// In-memory channel recording what it sends
    struct RecordingChannel {
        state: Mutex<ConnectionState>,
        sent: Mutex<Vec<OutboundEvent>>,
    }

    impl RecordingChannel {
        fn new(state: ConnectionState) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(state),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent_ids(&self) -> Vec<String> {
            self.sent
                .lock()
                .iter()
                .filter_map(|e| match e {
                    OutboundEvent::ServiceResponse(r) => Some(r.service_id.to_string()),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn state(&self) -> ConnectionState {
            *self.state.lock()
        }

        async fn send(&self, event: OutboundEvent) -> Result<()> {
            self.sent.lock().push(event);
            Ok(())
        }
    }

    fn response(id: &str) -> JobResponse {
        JobResponse::success(&JobRequest::new(id, "SEO", json!({})), json!({ "ok": true }))
    }

    #[tokio::test]
    async fn test_emit_over_connected_channel() {
        let emitter = ResponseEmitter::new(4);
        let channel = RecordingChannel::new(ConnectionState::Connected);
        emitter.attach(channel.clone()).await;

        emitter.emit(response("1")).await.unwrap();
        assert_eq!(channel.sent_ids(), vec!["1"]);
    }

    #[tokio::test]
    async fn test_emit_without_channel_is_unavailable() {
        let emitter = ResponseEmitter::new(0);
        let err = emitter.emit(response("1")).await.unwrap_err();

        assert!(matches!(err, Error::ChannelUnavailable { .. }));
        assert_eq!(emitter.pending(), 0);
    }

    #[tokio::test]
    async fn test_emit_on_disconnected_channel_does_not_send() {
        let emitter = ResponseEmitter::new(0);
        let channel = RecordingChannel::new(ConnectionState::Disconnected);
        emitter.attach(channel.clone()).await;

        assert!(emitter.emit(response("1")).await.is_err());
        assert!(channel.sent_ids().is_empty());
    }

    #[tokio::test]
    async fn test_parked_responses_flush_in_order_on_attach() {
        let emitter = ResponseEmitter::new(4);
        emitter.emit(response("1")).await.unwrap_err();
        emitter.emit(response("2")).await.unwrap_err();
        assert_eq!(emitter.pending(), 2);

        let channel = RecordingChannel::new(ConnectionState::Connected);
        assert_eq!(emitter.attach(channel.clone()).await, 2);

        assert_eq!(channel.sent_ids(), vec!["1", "2"]);
        assert_eq!(emitter.pending(), 0);
    }

    #[tokio::test]
    async fn test_full_outbox_keeps_oldest() {
        let emitter = ResponseEmitter::new(2);
        for id in ["1", "2", "3"] {
            let _ = emitter.emit(response(id)).await;
        }
        assert_eq!(emitter.pending(), 2);

        let channel = RecordingChannel::new(ConnectionState::Connected);
        emitter.attach(channel.clone()).await;
        assert_eq!(channel.sent_ids(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_detach() {
        let emitter = ResponseEmitter::new(0);
        emitter.attach(RecordingChannel::new(ConnectionState::Connected)).await;
        assert!(emitter.is_connected());

        emitter.detach();
        assert!(!emitter.is_connected());
        assert!(emitter.emit(response("1")).await.is_err());
    }
}
