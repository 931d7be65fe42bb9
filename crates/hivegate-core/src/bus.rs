//! In-process message bus.
//!
//! Two logical topics over bounded tokio channels: inbound envelopes
//! consumed by the agent loop, and outbound envelopes fanned out to the
//! channel adapters. Each adapter registers for its fabric and receives
//! only envelopes addressed to it; envelopes for unregistered fabrics
//! land in a catch-all queue so nothing is silently dropped.
//!
//! Backpressure surfaces to the publisher: `publish_*` uses `try_send`
//! and reports a full queue, `publish_*_wait` suspends until space frees
//! up or the timeout elapses.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use hivegate_types::event::{InboundEnvelope, OutboundEnvelope};
use hivegate_types::{GatewayError, Result};

/// Default queue capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// The gateway's in-process pub/sub.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundEnvelope>,
    inbound_rx: Mutex<mpsc::Receiver<InboundEnvelope>>,
    capacity: usize,
    subscribers: Mutex<HashMap<String, mpsc::Sender<OutboundEnvelope>>>,
    unrouted_tx: mpsc::Sender<OutboundEnvelope>,
    unrouted_rx: Mutex<mpsc::Receiver<OutboundEnvelope>>,
}

impl MessageBus {
    /// Create a bus with the default capacity (1024).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with a custom queue capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (unrouted_tx, unrouted_rx) = mpsc::channel(capacity);
        debug!(capacity, "message bus created");
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            capacity,
            subscribers: Mutex::new(HashMap::new()),
            unrouted_tx,
            unrouted_rx: Mutex::new(unrouted_rx),
        }
    }

    /// Publish an inbound envelope without waiting.
    ///
    /// Fails with [`GatewayError::Bus`] when the queue is full
    /// (backpressure) or closed.
    pub fn publish_inbound(&self, envelope: InboundEnvelope) -> Result<()> {
        debug!(
            fabric = %envelope.fabric,
            conversation = %envelope.conversation,
            "publishing inbound envelope"
        );
        self.inbound_tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                GatewayError::Bus("inbound queue full (backpressure)".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                GatewayError::Bus("inbound queue closed".into())
            }
        })
    }

    /// Publish an inbound envelope, waiting up to `timeout` under
    /// backpressure.
    pub async fn publish_inbound_wait(
        &self,
        envelope: InboundEnvelope,
        timeout: Duration,
    ) -> Result<()> {
        match tokio::time::timeout(timeout, self.inbound_tx.send(envelope)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(GatewayError::Bus("inbound queue closed".into())),
            Err(_) => Err(GatewayError::Bus(
                "inbound publish timed out (backpressure)".into(),
            )),
        }
    }

    /// Consume the next inbound envelope. `None` when the bus is closed.
    pub async fn consume_inbound(&self) -> Option<InboundEnvelope> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Cloneable sender for channel adapters.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundEnvelope> {
        self.inbound_tx.clone()
    }

    /// Register an adapter for a fabric; returns its receiver.
    ///
    /// Re-registering a fabric replaces the previous subscription (the
    /// old receiver starts reporting a closed channel).
    pub async fn subscribe_outbound(
        &self,
        fabric: impl Into<String>,
    ) -> mpsc::Receiver<OutboundEnvelope> {
        let fabric = fabric.into();
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subscribers = self.subscribers.lock().await;
        debug!(fabric = %fabric, "outbound subscription registered");
        subscribers.insert(fabric, tx);
        rx
    }

    /// Publish an outbound envelope to its fabric's subscriber, or the
    /// catch-all queue when no adapter has registered the fabric.
    pub async fn publish_outbound(&self, envelope: OutboundEnvelope) -> Result<()> {
        debug!(
            fabric = %envelope.fabric,
            conversation = %envelope.conversation,
            "publishing outbound envelope"
        );
        let target = {
            let subscribers = self.subscribers.lock().await;
            subscribers.get(&envelope.fabric).cloned()
        };
        let tx = target.unwrap_or_else(|| self.unrouted_tx.clone());
        tx.send(envelope)
            .await
            .map_err(|_| GatewayError::Bus("outbound queue closed".into()))
    }

    /// Consume from the catch-all outbound queue (envelopes whose fabric
    /// has no registered adapter).
    pub async fn consume_unrouted_outbound(&self) -> Option<OutboundEnvelope> {
        let mut rx = self.unrouted_rx.lock().await;
        rx.recv().await
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn inbound(content: &str) -> InboundEnvelope {
        InboundEnvelope::new("test", "u1", "c1", content)
    }

    fn outbound(fabric: &str, content: &str) -> OutboundEnvelope {
        OutboundEnvelope::new(fabric, "c1", content)
    }

    #[tokio::test]
    async fn publish_and_consume_inbound() {
        let bus = MessageBus::new();
        bus.publish_inbound(inbound("hello")).unwrap();
        let received = bus.consume_inbound().await.unwrap();
        assert_eq!(received.content, "hello");
    }

    #[tokio::test]
    async fn inbound_order_preserved_per_publisher() {
        let bus = MessageBus::new();
        for i in 0..5 {
            bus.publish_inbound(inbound(&format!("m{i}"))).unwrap();
        }
        for i in 0..5 {
            assert_eq!(bus.consume_inbound().await.unwrap().content, format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn backpressure_reported_not_dropped() {
        let bus = MessageBus::with_capacity(2);
        bus.publish_inbound(inbound("a")).unwrap();
        bus.publish_inbound(inbound("b")).unwrap();
        let err = bus.publish_inbound(inbound("c")).unwrap_err();
        assert!(err.to_string().contains("backpressure"));
        // Nothing was lost: both queued messages still arrive.
        assert_eq!(bus.consume_inbound().await.unwrap().content, "a");
        assert_eq!(bus.consume_inbound().await.unwrap().content, "b");
    }

    #[tokio::test]
    async fn publish_wait_times_out_under_backpressure() {
        let bus = MessageBus::with_capacity(1);
        bus.publish_inbound(inbound("a")).unwrap();
        let err = bus
            .publish_inbound_wait(inbound("b"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn publish_wait_succeeds_when_space_frees() {
        let bus = Arc::new(MessageBus::with_capacity(1));
        bus.publish_inbound(inbound("a")).unwrap();

        let producer = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.publish_inbound_wait(inbound("b"), Duration::from_secs(5))
                    .await
            })
        };
        tokio::task::yield_now().await;
        let _ = bus.consume_inbound().await;
        producer.await.unwrap().unwrap();
        assert_eq!(bus.consume_inbound().await.unwrap().content, "b");
    }

    #[tokio::test]
    async fn outbound_routed_to_fabric_subscriber() {
        let bus = MessageBus::new();
        let mut whatsapp = bus.subscribe_outbound("whatsapp").await;
        let mut teams = bus.subscribe_outbound("teams").await;

        bus.publish_outbound(outbound("teams", "for teams")).await.unwrap();
        bus.publish_outbound(outbound("whatsapp", "for wa")).await.unwrap();

        assert_eq!(teams.recv().await.unwrap().content, "for teams");
        assert_eq!(whatsapp.recv().await.unwrap().content, "for wa");
    }

    #[tokio::test]
    async fn outbound_without_subscriber_goes_to_catch_all() {
        let bus = MessageBus::new();
        bus.publish_outbound(outbound("irc", "lost?")).await.unwrap();
        let env = bus.consume_unrouted_outbound().await.unwrap();
        assert_eq!(env.fabric, "irc");
        assert_eq!(env.content, "lost?");
    }

    #[tokio::test]
    async fn multi_producer_inbound() {
        let bus = MessageBus::new();
        let tx1 = bus.inbound_sender();
        let tx2 = bus.inbound_sender();
        tx1.try_send(inbound("one")).unwrap();
        tx2.try_send(inbound("two")).unwrap();
        assert_eq!(bus.consume_inbound().await.unwrap().content, "one");
        assert_eq!(bus.consume_inbound().await.unwrap().content, "two");
    }

    #[test]
    fn bus_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MessageBus>();
    }
}
