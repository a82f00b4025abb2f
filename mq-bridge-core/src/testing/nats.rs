use super::Collector;
use crate::backend::{BusSubscription, MessageHandler, NatsConnection, NatsConnector, NatsMessage};
use crate::config::NatsConfig;
use crate::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
struct Subscriber {
    id: u64,
    /// Owning connection; `None` for test-side subscribers
    conn: Option<u64>,
    subject: String,
    handler: Arc<dyn MessageHandler<NatsMessage>>,
}

struct NatsState {
    available: AtomicBool,
    epoch: AtomicU64,
    next_id: AtomicU64,
    connects: AtomicUsize,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl NatsState {
    /// Hand the message to every subscriber of its subject, one after another
    async fn dispatch(&self, message: NatsMessage) {
        let handlers: Vec<_> = self
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.subject == message.subject)
            .map(|s| s.handler.clone())
            .collect();

        for handler in handlers {
            handler.handle(message.clone()).await;
        }
    }

    fn subscribe(
        &self,
        conn: Option<u64>,
        subject: &str,
        handler: Arc<dyn MessageHandler<NatsMessage>>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().push(Subscriber {
            id,
            conn,
            subject: subject.to_string(),
            handler,
        });
        id
    }

    fn remove(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }
}

/// In-memory direct bus server
#[derive(Clone)]
pub struct MemoryNats {
    state: Arc<NatsState>,
}

impl MemoryNats {
    pub fn new() -> Self {
        Self {
            state: Arc::new(NatsState {
                available: AtomicBool::new(true),
                epoch: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
                connects: AtomicUsize::new(0),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Take the server down or bring it back
    ///
    /// Going down drops every client connection along with its
    /// subscriptions; clients must connect again afterwards.
    pub fn set_available(&self, available: bool) {
        if !available {
            self.state.epoch.fetch_add(1, Ordering::SeqCst);
            self.state.subscribers.lock().retain(|s| s.conn.is_none());
        }
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Publish as another bus client would
    pub async fn publish(&self, subject: &str, payload: impl Into<Bytes>) {
        self.state
            .dispatch(NatsMessage {
                subject: subject.to_string(),
                reply: None,
                payload: payload.into(),
            })
            .await;
    }

    /// Publish with a reply subject as another bus client would
    pub async fn request(&self, subject: &str, reply: &str, payload: impl Into<Bytes>) {
        self.state
            .dispatch(NatsMessage {
                subject: subject.to_string(),
                reply: Some(reply.to_string()),
                payload: payload.into(),
            })
            .await;
    }

    /// Receive everything published on `subject` from now on
    pub fn subscribe(&self, subject: &str) -> mpsc::UnboundedReceiver<NatsMessage> {
        let (collector, rx) = Collector::<NatsMessage>::channel();
        self.state.subscribe(None, subject, collector);
        rx
    }

    /// Subscriptions held by client connections on `subject`
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.state
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.conn.is_some() && s.subject == subject)
            .count()
    }

    /// Successful connects so far
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }
}

impl Default for MemoryNats {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NatsConnector for MemoryNats {
    async fn connect(&self, _config: &NatsConfig) -> ConnectorResult<Arc<dyn NatsConnection>> {
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(ConnectorError::unavailable("nats: no servers available"));
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryNatsConnection {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst),
            epoch: self.state.epoch.load(Ordering::SeqCst),
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryNatsConnection {
    id: u64,
    epoch: u64,
    state: Arc<NatsState>,
    closed: AtomicBool,
}

impl MemoryNatsConnection {
    fn ensure_connected(&self) -> ConnectorResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ConnectorError::unavailable("nats: connection closed"))
        }
    }
}

#[async_trait]
impl NatsConnection for MemoryNatsConnection {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.state.available.load(Ordering::SeqCst)
            && self.state.epoch.load(Ordering::SeqCst) == self.epoch
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> ConnectorResult<()> {
        self.ensure_connected()?;
        self.state
            .dispatch(NatsMessage {
                subject: subject.to_string(),
                reply: None,
                payload,
            })
            .await;
        Ok(())
    }

    async fn publish_request(
        &self,
        subject: &str,
        reply: &str,
        payload: Bytes,
    ) -> ConnectorResult<()> {
        self.ensure_connected()?;
        self.state
            .dispatch(NatsMessage {
                subject: subject.to_string(),
                reply: Some(reply.to_string()),
                payload,
            })
            .await;
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn MessageHandler<NatsMessage>>,
    ) -> ConnectorResult<Box<dyn BusSubscription>> {
        self.ensure_connected()?;
        let id = self.state.subscribe(Some(self.id), subject, handler);
        Ok(Box::new(MemoryNatsSubscription {
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

struct MemoryNatsSubscription {
    id: u64,
    state: Arc<NatsState>,
}

#[async_trait]
impl BusSubscription for MemoryNatsSubscription {
    async fn unsubscribe(self: Box<Self>) -> ConnectorResult<()> {
        self.state.remove(self.id);
        Ok(())
    }

    async fn close(self: Box<Self>) -> ConnectorResult<()> {
        self.state.remove(self.id);
        Ok(())
    }
}
