use super::Collector;
use crate::backend::{
    BusSubscription, MessageHandler, StartPosition, StreamingConnection, StreamingConnector,
    StreamingMessage, SubscriptionOptions,
};
use crate::config::StreamingConfig;
use crate::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
struct Subscriber {
    id: u64,
    /// Owning connection; `None` for test-side subscribers
    conn: Option<u64>,
    channel: String,
    durable: Option<String>,
    handler: Arc<dyn MessageHandler<StreamingMessage>>,
}

struct StreamingState {
    available: AtomicBool,
    epoch: AtomicU64,
    next_id: AtomicU64,
    channels: Mutex<HashMap<String, Vec<StreamingMessage>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    /// Last sequence delivered per (channel, durable name)
    durables: Mutex<HashMap<(String, String), u64>>,
    // one delivery at a time, so every subscriber sees channel order
    delivery: tokio::sync::Mutex<()>,
}

impl StreamingState {
    async fn deliver(&self, subscriber: &Subscriber, message: &StreamingMessage) {
        subscriber.handler.handle(message.clone()).await;
        if let Some(durable) = &subscriber.durable {
            self.durables
                .lock()
                .insert((subscriber.channel.clone(), durable.clone()), message.sequence);
        }
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> u64 {
        let _delivery = self.delivery.lock().await;

        let message = {
            let mut channels = self.channels.lock();
            let log = channels.entry(channel.to_string()).or_default();
            let message = StreamingMessage {
                channel: channel.to_string(),
                sequence: log.len() as u64 + 1,
                timestamp: Utc::now(),
                redelivered: false,
                payload,
            };
            log.push(message.clone());
            message
        };

        let subscribers: Vec<Subscriber> = self
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.channel == channel)
            .cloned()
            .collect();
        for subscriber in &subscribers {
            self.deliver(subscriber, &message).await;
        }

        message.sequence
    }

    /// First sequence a new subscription receives
    fn first_sequence(&self, channel: &str, options: Option<&SubscriptionOptions>) -> u64 {
        let channels = self.channels.lock();
        let log = channels.get(channel).map(Vec::as_slice).unwrap_or_default();
        let next = log.len() as u64 + 1;

        let Some(options) = options else {
            return next;
        };

        if let Some(durable) = &options.durable_name {
            let key = (channel.to_string(), durable.clone());
            if let Some(last) = self.durables.lock().get(&key) {
                return last + 1;
            }
        }

        match options.start {
            StartPosition::AllAvailable => 1,
            StartPosition::LastReceived => next.saturating_sub(1).max(1),
            StartPosition::Sequence(seq) => seq.max(1),
            StartPosition::Time(time) => log
                .iter()
                .find(|m| m.timestamp >= time)
                .map_or(next, |m| m.sequence),
        }
    }

    /// Register a subscriber after replaying its backlog
    async fn subscribe(
        &self,
        conn: Option<u64>,
        channel: &str,
        handler: Arc<dyn MessageHandler<StreamingMessage>>,
        options: Option<SubscriptionOptions>,
    ) -> u64 {
        let _delivery = self.delivery.lock().await;

        let first = self.first_sequence(channel, options.as_ref());
        let durable = options.and_then(|o| o.durable_name);
        let subscriber = Subscriber {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            conn,
            channel: channel.to_string(),
            durable: durable.clone(),
            handler,
        };

        if let Some(durable) = durable {
            self.durables
                .lock()
                .entry((channel.to_string(), durable))
                .or_insert(first - 1);
        }

        let backlog: Vec<StreamingMessage> = self
            .channels
            .lock()
            .get(channel)
            .map(|log| {
                log.iter()
                    .filter(|m| m.sequence >= first)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for message in &backlog {
            self.deliver(&subscriber, message).await;
        }

        let id = subscriber.id;
        self.subscribers.lock().push(subscriber);
        id
    }

    fn remove(&self, id: u64) -> Option<Subscriber> {
        let mut subscribers = self.subscribers.lock();
        let idx = subscribers.iter().position(|s| s.id == id)?;
        Some(subscribers.remove(idx))
    }
}

/// In-memory durable streaming server
#[derive(Clone)]
pub struct MemoryStreaming {
    state: Arc<StreamingState>,
}

impl MemoryStreaming {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StreamingState {
                available: AtomicBool::new(true),
                epoch: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
                channels: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
                durables: Mutex::new(HashMap::new()),
                delivery: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Take the server down or bring it back
    ///
    /// Going down drops every client connection and its subscriptions.
    /// Durable positions and stored messages survive.
    pub fn set_available(&self, available: bool) {
        if !available {
            self.state.epoch.fetch_add(1, Ordering::SeqCst);
            self.state.subscribers.lock().retain(|s| s.conn.is_none());
        }
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Publish as another streaming client would; returns the sequence
    pub async fn publish(&self, channel: &str, payload: impl Into<Bytes>) -> u64 {
        self.state.publish(channel, payload.into()).await
    }

    /// Receive everything published on `channel` from now on
    pub async fn subscribe(&self, channel: &str) -> mpsc::UnboundedReceiver<StreamingMessage> {
        let (collector, rx) = Collector::<StreamingMessage>::channel();
        self.state.subscribe(None, channel, collector, None).await;
        rx
    }

    /// Every message stored on `channel`, in sequence order
    pub fn messages(&self, channel: &str) -> Vec<StreamingMessage> {
        self.state
            .channels
            .lock()
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Last sequence delivered to a durable subscription, if it exists
    pub fn durable_position(&self, channel: &str, durable: &str) -> Option<u64> {
        self.state
            .durables
            .lock()
            .get(&(channel.to_string(), durable.to_string()))
            .copied()
    }

    /// Subscriptions held by client connections on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.conn.is_some() && s.channel == channel)
            .count()
    }
}

impl Default for MemoryStreaming {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamingConnector for MemoryStreaming {
    async fn connect(
        &self,
        config: &StreamingConfig,
    ) -> ConnectorResult<Arc<dyn StreamingConnection>> {
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(ConnectorError::unavailable(format!(
                "stan: cluster {} unreachable",
                config.cluster_id
            )));
        }

        Ok(Arc::new(MemoryStreamingConnection {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst),
            epoch: self.state.epoch.load(Ordering::SeqCst),
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryStreamingConnection {
    id: u64,
    epoch: u64,
    state: Arc<StreamingState>,
    closed: AtomicBool,
}

#[async_trait]
impl StreamingConnection for MemoryStreamingConnection {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.state.available.load(Ordering::SeqCst)
            && self.state.epoch.load(Ordering::SeqCst) == self.epoch
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> ConnectorResult<()> {
        if !self.is_connected() {
            return Err(ConnectorError::unavailable("stan: connection closed"));
        }
        self.state.publish(channel, payload).await;
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler<StreamingMessage>>,
        options: SubscriptionOptions,
    ) -> ConnectorResult<Box<dyn BusSubscription>> {
        if !self.is_connected() {
            return Err(ConnectorError::unavailable("stan: connection closed"));
        }
        let id = self
            .state
            .subscribe(Some(self.id), channel, handler, Some(options))
            .await;
        Ok(Box::new(MemoryStreamingSubscription {
            id,
            state: self.state.clone(),
        }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.state
            .subscribers
            .lock()
            .retain(|s| s.conn != Some(self.id));
    }
}

struct MemoryStreamingSubscription {
    id: u64,
    state: Arc<StreamingState>,
}

#[async_trait]
impl BusSubscription for MemoryStreamingSubscription {
    async fn unsubscribe(self: Box<Self>) -> ConnectorResult<()> {
        if let Some(subscriber) = self.state.remove(self.id) {
            if let Some(durable) = subscriber.durable {
                self.state
                    .durables
                    .lock()
                    .remove(&(subscriber.channel, durable));
            }
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> ConnectorResult<()> {
        self.state.remove(self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn durable(name: &str) -> SubscriptionOptions {
        SubscriptionOptions {
            durable_name: Some(name.to_string()),
            start: StartPosition::AllAvailable,
        }
    }

    #[tokio::test]
    async fn test_start_positions() {
        let stan = MemoryStreaming::new();
        for i in 1..=3u8 {
            stan.publish("c", vec![i]).await;
        }

        let conn = stan.connect(&StreamingConfig::default()).await.unwrap();
        let cases = [
            (StartPosition::AllAvailable, vec![1u64, 2, 3]),
            (StartPosition::LastReceived, vec![3u64]),
            (StartPosition::Sequence(2), vec![2u64, 3]),
        ];

        for (start, expected) in cases {
            let (collector, mut rx) = Collector::<StreamingMessage>::channel();
            let options = SubscriptionOptions {
                durable_name: None,
                start,
            };
            let sub = conn.subscribe("c", collector, options).await.unwrap();

            let mut seen = Vec::new();
            while let Ok(msg) = rx.try_recv() {
                seen.push(msg.sequence);
            }
            assert_eq!(seen, expected, "start {:?}", start);
            sub.unsubscribe().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_durable_close_keeps_position() {
        let stan = MemoryStreaming::new();
        let conn = stan.connect(&StreamingConfig::default()).await.unwrap();

        let (collector, _rx) = Collector::<StreamingMessage>::channel();
        let sub = conn.subscribe("c", collector, durable("d")).await.unwrap();
        stan.publish("c", "one").await;
        assert_eq!(stan.durable_position("c", "d"), Some(1));

        sub.close().await.unwrap();
        stan.publish("c", "two").await;
        assert_eq!(stan.durable_position("c", "d"), Some(1));

        // resumes after the last delivered message
        let (collector, mut rx) = Collector::<StreamingMessage>::channel();
        let sub = conn.subscribe("c", collector, durable("d")).await.unwrap();
        assert_eq!(rx.try_recv().unwrap().payload.as_ref(), b"two");
        assert!(rx.try_recv().is_err());

        sub.unsubscribe().await.unwrap();
        assert_eq!(stan.durable_position("c", "d"), None);
    }
}
