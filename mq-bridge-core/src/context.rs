//! Resources shared between the bridge server and its connectors.
//!
//! The server owns the shared bus connections; connectors only see them
//! through [`SharedConnections`], which hands out clones for publishing and
//! subscribing but offers no way to close or replace a connection.

use crate::backend::{Backends, NatsConnection, StreamingConnection};
use crate::config::{ConnectorConfig, ConnectorType};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// The optional direct and streaming bus connections
#[derive(Default)]
pub struct SharedConnections {
    nats: RwLock<Option<Arc<dyn NatsConnection>>>,
    stan: RwLock<Option<Arc<dyn StreamingConnection>>>,
}

impl SharedConnections {
    /// Whether the direct bus connection exists and is up
    pub fn check_nats(&self) -> bool {
        self.nats
            .read()
            .as_ref()
            .is_some_and(|conn| conn.is_connected())
    }

    /// Whether the streaming bus connection exists and is up
    pub fn check_stan(&self) -> bool {
        self.stan
            .read()
            .as_ref()
            .is_some_and(|conn| conn.is_connected())
    }

    /// The direct bus connection, if one was established
    pub fn nats(&self) -> Option<Arc<dyn NatsConnection>> {
        self.nats.read().clone()
    }

    /// The streaming bus connection, if one was established
    pub fn stan(&self) -> Option<Arc<dyn StreamingConnection>> {
        self.stan.read().clone()
    }

    pub(crate) fn replace_nats(
        &self,
        conn: Option<Arc<dyn NatsConnection>>,
    ) -> Option<Arc<dyn NatsConnection>> {
        std::mem::replace(&mut *self.nats.write(), conn)
    }

    pub(crate) fn replace_stan(
        &self,
        conn: Option<Arc<dyn StreamingConnection>>,
    ) -> Option<Arc<dyn StreamingConnection>> {
        std::mem::replace(&mut *self.stan.write(), conn)
    }
}

/// Reply-to lookup tables derived from the configured connectors.
///
/// A reply aimed at a bus destination is sent to the MQ queue whose connector
/// feeds that destination, and the reverse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyRoutes {
    subject_to_queue: HashMap<String, String>,
    queue_to_subject: HashMap<String, String>,
    channel_to_queue: HashMap<String, String>,
    queue_to_channel: HashMap<String, String>,
}

impl ReplyRoutes {
    /// Build the tables from connector configuration
    ///
    /// The first connector wins when two feed the same destination.
    pub fn from_config(connectors: &[ConnectorConfig]) -> Self {
        let mut routes = Self::default();

        for c in connectors {
            match c.connector_type {
                ConnectorType::Queue2Nats => {
                    routes
                        .subject_to_queue
                        .entry(c.subject.clone())
                        .or_insert_with(|| c.queue.clone());
                }
                ConnectorType::Nats2Queue => {
                    routes
                        .queue_to_subject
                        .entry(c.queue.clone())
                        .or_insert_with(|| c.subject.clone());
                }
                ConnectorType::Queue2Stan => {
                    routes
                        .channel_to_queue
                        .entry(c.channel.clone())
                        .or_insert_with(|| c.queue.clone());
                }
                ConnectorType::Stan2Queue => {
                    routes
                        .queue_to_channel
                        .entry(c.queue.clone())
                        .or_insert_with(|| c.channel.clone());
                }
                _ => {}
            }
        }

        routes
    }

    /// Queue whose messages are relayed to `subject`
    pub fn queue_for_subject(&self, subject: &str) -> Option<&str> {
        self.subject_to_queue.get(subject).map(String::as_str)
    }

    /// Subject whose messages are relayed to `queue`
    pub fn subject_for_queue(&self, queue: &str) -> Option<&str> {
        self.queue_to_subject.get(queue.trim()).map(String::as_str)
    }

    /// Queue whose messages are relayed to `channel`
    pub fn queue_for_channel(&self, channel: &str) -> Option<&str> {
        self.channel_to_queue.get(channel).map(String::as_str)
    }

    /// Channel whose messages are relayed to `queue`
    pub fn channel_for_queue(&self, queue: &str) -> Option<&str> {
        self.queue_to_channel.get(queue.trim()).map(String::as_str)
    }
}

/// Everything a connector borrows from the bridge
pub struct BridgeContext {
    pub(crate) backends: Backends,
    pub(crate) connections: SharedConnections,
    routes: RwLock<Arc<ReplyRoutes>>,
}

impl BridgeContext {
    pub fn new(backends: Backends) -> Self {
        Self {
            backends,
            connections: SharedConnections::default(),
            routes: RwLock::new(Arc::new(ReplyRoutes::default())),
        }
    }

    pub fn connections(&self) -> &SharedConnections {
        &self.connections
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Current reply-to tables
    pub fn routes(&self) -> Arc<ReplyRoutes> {
        self.routes.read().clone()
    }

    pub(crate) fn set_routes(&self, routes: ReplyRoutes) {
        *self.routes.write() = Arc::new(routes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_routes() {
        let connectors = vec![
            ConnectorConfig::new(ConnectorType::Nats2Queue)
                .with_subject("test")
                .with_queue("DEV.QUEUE.1"),
            ConnectorConfig::new(ConnectorType::Queue2Nats)
                .with_subject("best")
                .with_queue("DEV.QUEUE.2"),
            ConnectorConfig::new(ConnectorType::Stan2Queue)
                .with_channel("orders")
                .with_queue("DEV.QUEUE.3"),
            ConnectorConfig::new(ConnectorType::Queue2Stan)
                .with_channel("replies")
                .with_queue("DEV.QUEUE.4"),
            ConnectorConfig::new(ConnectorType::Topic2Nats)
                .with_subject("ignored")
                .with_topic("dev/"),
        ];

        let routes = ReplyRoutes::from_config(&connectors);
        assert_eq!(routes.queue_for_subject("best"), Some("DEV.QUEUE.2"));
        assert_eq!(routes.subject_for_queue("DEV.QUEUE.1"), Some("test"));
        assert_eq!(routes.queue_for_channel("replies"), Some("DEV.QUEUE.4"));
        assert_eq!(routes.channel_for_queue("DEV.QUEUE.3"), Some("orders"));

        assert_eq!(routes.queue_for_subject("test"), None);
        assert_eq!(routes.queue_for_subject("ignored"), None);
    }

    #[test]
    fn test_reply_queue_names_are_trimmed() {
        let connectors = vec![ConnectorConfig::new(ConnectorType::Nats2Queue)
            .with_subject("test")
            .with_queue("DEV.QUEUE.1")];

        let routes = ReplyRoutes::from_config(&connectors);
        // MQ pads object names with blanks
        assert_eq!(routes.subject_for_queue("DEV.QUEUE.1    "), Some("test"));
    }

    #[test]
    fn test_empty_connections() {
        let connections = SharedConnections::default();
        assert!(!connections.check_nats());
        assert!(!connections.check_stan());
        assert!(connections.nats().is_none());
        assert!(connections.stan().is_none());
    }
}
