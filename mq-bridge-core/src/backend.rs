//! Capability interfaces for the three messaging backends.
//!
//! The bridge never speaks a wire protocol itself. It drives:
//! - an MQ queue manager (sessions, queues, topics, put/get)
//! - a direct pub/sub bus ("NATS": subjects, optional reply subjects)
//! - a durable streaming bus ("STAN": channels, durable positioned subscriptions)
//!
//! through the traits below. Production builds plug in real client libraries;
//! tests use the in-memory implementations from [`crate::testing`].

use crate::config::{MqConfig, NatsConfig, StreamingConfig};
use crate::metadata::MessageDescriptor;
use crate::ConnectorResult;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// How an MQ queue is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Destructive reads
    Input,
    /// Puts
    Output,
}

/// A message read from an MQ queue or topic subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqDelivery {
    pub descriptor: MessageDescriptor,
    pub body: Bytes,
}

/// Opens queue manager sessions
#[async_trait]
pub trait QueueManagerConnector: Send + Sync {
    async fn connect(&self, config: &MqConfig) -> ConnectorResult<Arc<dyn QueueManagerSession>>;
}

/// One connection to a queue manager
#[async_trait]
pub trait QueueManagerSession: Send + Sync {
    /// Name of the connected queue manager
    fn queue_manager_name(&self) -> String;

    fn is_connected(&self) -> bool;

    async fn open_queue(&self, name: &str, mode: OpenMode) -> ConnectorResult<Arc<dyn MqObject>>;

    /// Open a topic for publishing
    async fn open_topic(&self, name: &str) -> ConnectorResult<Arc<dyn MqObject>>;

    /// Create a non-durable managed subscription and return the object to read it from
    async fn subscribe_topic(&self, name: &str) -> ConnectorResult<Arc<dyn MqObject>>;

    async fn disconnect(&self) -> ConnectorResult<()>;
}

/// An open MQ queue, topic or managed subscription destination
#[async_trait]
pub trait MqObject: Send + Sync {
    fn name(&self) -> &str;

    async fn put(&self, descriptor: &MessageDescriptor, body: &[u8]) -> ConnectorResult<()>;

    /// Wait up to `wait` for a message; `Ok(None)` when nothing arrived
    async fn get(&self, wait: Duration) -> ConnectorResult<Option<MqDelivery>>;

    async fn close(&self) -> ConnectorResult<()>;
}

/// Receives messages from a bus subscription
///
/// Implementations must not block indefinitely: the bus invokes the handler
/// on its own delivery path.
#[async_trait]
pub trait MessageHandler<M: Send + 'static>: Send + Sync {
    async fn handle(&self, message: M);
}

/// A live subscription on either bus
#[async_trait]
pub trait BusSubscription: Send + Sync {
    /// Remove interest on the server, ending a durable subscription for good
    async fn unsubscribe(self: Box<Self>) -> ConnectorResult<()>;

    /// Release the local handle only, keeping durable state on the server
    async fn close(self: Box<Self>) -> ConnectorResult<()>;
}

/// A message on the direct bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsMessage {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Bytes,
}

/// Opens direct-bus connections
#[async_trait]
pub trait NatsConnector: Send + Sync {
    async fn connect(&self, config: &NatsConfig) -> ConnectorResult<Arc<dyn NatsConnection>>;
}

/// A shared direct-bus connection
#[async_trait]
pub trait NatsConnection: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn publish(&self, subject: &str, payload: Bytes) -> ConnectorResult<()>;

    async fn publish_request(&self, subject: &str, reply: &str, payload: Bytes)
        -> ConnectorResult<()>;

    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn MessageHandler<NatsMessage>>,
    ) -> ConnectorResult<Box<dyn BusSubscription>>;

    async fn close(&self);
}

/// Where a streaming subscription starts delivering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    AllAvailable,
    LastReceived,
    Sequence(u64),
    Time(DateTime<Utc>),
}

/// Streaming subscription options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionOptions {
    pub durable_name: Option<String>,
    pub start: StartPosition,
}

/// A message on the streaming bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingMessage {
    pub channel: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub redelivered: bool,
    pub payload: Bytes,
}

/// Opens streaming-bus connections
#[async_trait]
pub trait StreamingConnector: Send + Sync {
    async fn connect(
        &self,
        config: &StreamingConfig,
    ) -> ConnectorResult<Arc<dyn StreamingConnection>>;
}

/// A shared streaming-bus connection
#[async_trait]
pub trait StreamingConnection: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn publish(&self, channel: &str, payload: Bytes) -> ConnectorResult<()>;

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler<StreamingMessage>>,
        options: SubscriptionOptions,
    ) -> ConnectorResult<Box<dyn BusSubscription>>;

    async fn close(&self);
}

/// The client factories the bridge is built with
#[derive(Clone)]
pub struct Backends {
    pub mq: Arc<dyn QueueManagerConnector>,
    pub nats: Arc<dyn NatsConnector>,
    pub streaming: Arc<dyn StreamingConnector>,
}

impl Backends {
    pub fn new(
        mq: Arc<dyn QueueManagerConnector>,
        nats: Arc<dyn NatsConnector>,
        streaming: Arc<dyn StreamingConnector>,
    ) -> Self {
        Self {
            mq,
            nats,
            streaming,
        }
    }
}
