//! In-memory backends for testing the bridge.
//!
//! Each backend models the server side of one messaging system and hands out
//! client connections implementing the [`crate::backend`] traits. Tests drive
//! the other end directly (putting to queues, publishing on subjects) and can
//! simulate outages with `set_available(false)`: every live connection is
//! dropped and new ones are refused until the backend comes back.

mod mq;
mod nats;
mod streaming;

pub use mq::MemoryQueueManager;
pub use nats::MemoryNats;
pub use streaming::MemoryStreaming;

use crate::backend::{Backends, MessageHandler};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One of each in-memory backend
#[derive(Clone)]
pub struct MemoryBackends {
    pub mq: MemoryQueueManager,
    pub nats: MemoryNats,
    pub streaming: MemoryStreaming,
}

impl MemoryBackends {
    /// Create backends with a queue manager called `queue_manager`
    pub fn new(queue_manager: &str) -> Self {
        Self {
            mq: MemoryQueueManager::new(queue_manager),
            nats: MemoryNats::new(),
            streaming: MemoryStreaming::new(),
        }
    }

    /// The client factories, for [`crate::BridgeServer::new`]
    pub fn backends(&self) -> Backends {
        Backends::new(
            Arc::new(self.mq.clone()),
            Arc::new(self.nats.clone()),
            Arc::new(self.streaming.clone()),
        )
    }
}

impl Default for MemoryBackends {
    fn default() -> Self {
        Self::new("QM1")
    }
}

/// Forwards every message to a channel a test can read
pub(crate) struct Collector<M> {
    tx: mpsc::UnboundedSender<M>,
}

impl<M> Collector<M> {
    pub(crate) fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<M>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl<M: Send + 'static> MessageHandler<M> for Collector<M> {
    async fn handle(&self, message: M) {
        // receiver dropped by the test
        let _ = self.tx.send(message);
    }
}
