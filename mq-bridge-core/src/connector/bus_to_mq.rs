//! Relay from a bus subscription to an MQ queue or topic.

use crate::backend::{
    BusSubscription, MessageHandler, MqObject, NatsMessage, OpenMode, QueueManagerSession,
    StreamingMessage, SubscriptionOptions,
};
use crate::config::{BusKind, ConnectorConfig, MqEndpointKind};
use crate::context::BridgeContext;
use crate::message::from_bus_format;
use crate::stats::ConnectorStats;
use crate::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{error, trace, warn};

/// The open MQ object a sink connector puts to
#[derive(Clone)]
pub(crate) struct SinkTarget {
    pub(crate) object: Arc<dyn MqObject>,
    pub(crate) queue_manager: String,
}

/// Empty whenever the connector is not running
pub(crate) type SinkSlot = RwLock<Option<SinkTarget>>;

/// Open the MQ object a sink connector writes to
pub(crate) async fn open_sink(
    session: &Arc<dyn QueueManagerSession>,
    config: &ConnectorConfig,
) -> ConnectorResult<Arc<dyn MqObject>> {
    let name = config.mq_object_name();

    let opened = match config.connector_type.mq_endpoint() {
        MqEndpointKind::Queue => session.open_queue(name, OpenMode::Output).await,
        MqEndpointKind::Topic => session.open_topic(name).await,
    };

    opened.map_err(|e| {
        ConnectorError::resource_with_source(format!("failed to open {} for writing", name), e)
    })
}

/// Subscribe the handler on the connector's bus
pub(crate) async fn subscribe(
    ctx: &BridgeContext,
    config: &ConnectorConfig,
    handler: Arc<BusToMq>,
) -> ConnectorResult<Box<dyn BusSubscription>> {
    let destination = config.bus_destination();

    let subscribed = match config.connector_type.bus() {
        BusKind::Nats => {
            let conn = ctx
                .connections
                .nats()
                .ok_or_else(|| ConnectorError::unavailable("nats is not connected"))?;
            conn.subscribe(destination, handler).await
        }
        BusKind::Stan => {
            let conn = ctx
                .connections
                .stan()
                .ok_or_else(|| ConnectorError::unavailable("stan is not connected"))?;
            let options = SubscriptionOptions {
                durable_name: config.durable_name.clone().filter(|n| !n.is_empty()),
                start: config.start_position(),
            };
            conn.subscribe(destination, handler, options).await
        }
    };

    subscribed.map_err(|e| {
        ConnectorError::resource_with_source(format!("failed to subscribe to {}", destination), e)
    })
}

/// Translates bus messages and puts them to MQ
pub(crate) struct BusToMq {
    name: String,
    bus: BusKind,
    exclude_headers: bool,
    maps_replies: bool,
    sink: Arc<SinkSlot>,
    ctx: Arc<BridgeContext>,
    stats: Arc<ConnectorStats>,
}

impl BusToMq {
    pub(crate) fn new(
        name: &str,
        config: &ConnectorConfig,
        sink: Arc<SinkSlot>,
        ctx: Arc<BridgeContext>,
        stats: Arc<ConnectorStats>,
    ) -> Self {
        Self {
            name: name.to_string(),
            bus: config.connector_type.bus(),
            exclude_headers: config.exclude_headers,
            maps_replies: config.connector_type.mq_endpoint() == MqEndpointKind::Queue,
            sink,
            ctx,
            stats,
        }
    }

    /// Put one bus payload to MQ
    ///
    /// `nats_reply` is the reply subject of a direct-bus message; streaming
    /// messages carry their reply channel in the envelope header instead.
    pub(crate) async fn deliver(
        &self,
        payload: &[u8],
        nats_reply: Option<&str>,
    ) -> ConnectorResult<()> {
        let mut message = from_bus_format(payload, self.exclude_headers)?;

        let target = self.sink.read().clone().ok_or_else(|| {
            ConnectorError::delivery(format!("{} is not running", self.name))
        })?;

        if self.maps_replies {
            let routes = self.ctx.routes();
            let reply_queue = match self.bus {
                BusKind::Nats => nats_reply.and_then(|s| routes.queue_for_subject(s)),
                BusKind::Stan => message
                    .reply_to_channel
                    .as_deref()
                    .and_then(|c| routes.queue_for_channel(c)),
            };

            if let Some(queue) = reply_queue {
                message.descriptor.reply_to_q = queue.to_string();
                message.descriptor.reply_to_q_mgr = target.queue_manager.clone();
            }
        }

        target
            .object
            .put(&message.descriptor, &message.body)
            .await
            .map_err(|e| {
                ConnectorError::delivery_with_source(
                    format!("failed to put message to {}", target.object.name()),
                    e,
                )
            })?;

        self.stats.add_message_out(message.body.len());
        trace!("{}: put {} bytes", self.name, message.body.len());
        Ok(())
    }

    fn report(&self, err: ConnectorError) {
        self.stats.add_failure();
        match err {
            ConnectorError::MalformedMessage(_) => {
                warn!("{}: dropping message: {}", self.name, err)
            }
            _ => error!("{}: failed to deliver message: {}", self.name, err),
        }
    }
}

#[async_trait]
impl MessageHandler<NatsMessage> for BusToMq {
    async fn handle(&self, message: NatsMessage) {
        self.stats.add_message_in(message.payload.len());
        if let Err(e) = self
            .deliver(&message.payload, message.reply.as_deref())
            .await
        {
            self.report(e);
        }
    }
}

#[async_trait]
impl MessageHandler<StreamingMessage> for BusToMq {
    async fn handle(&self, message: StreamingMessage) {
        self.stats.add_message_in(message.payload.len());
        if let Err(e) = self.deliver(&message.payload, None).await {
            self.report(e);
        }
    }
}
