//! Relay from an MQ queue or topic subscription to a bus destination.

use crate::backend::{MqDelivery, MqObject, OpenMode, QueueManagerSession};
use crate::config::{BusKind, ConnectorConfig, MqEndpointKind};
use crate::context::BridgeContext;
use crate::message::to_bus_format_with_reply;
use crate::stats::ConnectorStats;
use crate::{ConnectorError, ConnectorResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// How long a single get waits before the poller checks for cancellation
pub(crate) const GET_WAIT: Duration = Duration::from_millis(250);

/// Open the MQ object a source connector reads from
pub(crate) async fn open_source(
    session: &Arc<dyn QueueManagerSession>,
    config: &ConnectorConfig,
) -> ConnectorResult<Arc<dyn MqObject>> {
    let name = config.mq_object_name();

    let opened = match config.connector_type.mq_endpoint() {
        MqEndpointKind::Queue => session.open_queue(name, OpenMode::Input).await,
        MqEndpointKind::Topic => session.subscribe_topic(name).await,
    };

    opened.map_err(|e| {
        ConnectorError::resource_with_source(format!("failed to open {} for reading", name), e)
    })
}

/// Translates and publishes messages read from MQ
pub(crate) struct MqToBus {
    name: String,
    bus: BusKind,
    destination: String,
    exclude_headers: bool,
    maps_replies: bool,
    ctx: Arc<BridgeContext>,
    stats: Arc<ConnectorStats>,
}

impl MqToBus {
    pub(crate) fn new(
        name: &str,
        config: &ConnectorConfig,
        ctx: Arc<BridgeContext>,
        stats: Arc<ConnectorStats>,
    ) -> Self {
        Self {
            name: name.to_string(),
            bus: config.connector_type.bus(),
            destination: config.bus_destination().to_string(),
            exclude_headers: config.exclude_headers,
            maps_replies: config.connector_type.mq_endpoint() == MqEndpointKind::Queue,
            ctx,
            stats,
        }
    }

    fn bus_connected(&self) -> bool {
        match self.bus {
            BusKind::Nats => self.ctx.connections.check_nats(),
            BusKind::Stan => self.ctx.connections.check_stan(),
        }
    }

    /// Relay one message to the bus
    pub(crate) async fn relay(&self, delivery: MqDelivery) -> ConnectorResult<()> {
        self.stats.add_message_in(delivery.body.len());

        let routes = self.ctx.routes();
        let reply_queue = if self.maps_replies && delivery.descriptor.has_reply_to() {
            Some(delivery.descriptor.reply_to_q.as_str())
        } else {
            None
        };

        let size = match self.bus {
            BusKind::Nats => {
                let payload = to_bus_format_with_reply(
                    &delivery.descriptor,
                    &delivery.body,
                    self.exclude_headers,
                    None,
                )?;
                let size = payload.len();
                let conn = self.ctx.connections.nats().ok_or_else(|| {
                    ConnectorError::delivery(format!("{}: nats is not connected", self.name))
                })?;

                let published = match reply_queue.and_then(|q| routes.subject_for_queue(q)) {
                    Some(reply) => {
                        conn.publish_request(&self.destination, reply, payload)
                            .await
                    }
                    None => conn.publish(&self.destination, payload).await,
                };
                published.map_err(|e| {
                    ConnectorError::delivery_with_source(
                        format!("failed to publish to subject {}", self.destination),
                        e,
                    )
                })?;
                size
            }
            BusKind::Stan => {
                let reply_channel = reply_queue.and_then(|q| routes.channel_for_queue(q));
                let payload = to_bus_format_with_reply(
                    &delivery.descriptor,
                    &delivery.body,
                    self.exclude_headers,
                    reply_channel,
                )?;
                let size = payload.len();
                let conn = self.ctx.connections.stan().ok_or_else(|| {
                    ConnectorError::delivery(format!("{}: stan is not connected", self.name))
                })?;

                conn.publish(&self.destination, payload).await.map_err(|e| {
                    ConnectorError::delivery_with_source(
                        format!("failed to publish to channel {}", self.destination),
                        e,
                    )
                })?;
                size
            }
        };

        self.stats.add_message_out(size);
        trace!("{}: relayed {} bytes", self.name, size);
        Ok(())
    }

    /// Read and relay until cancelled
    ///
    /// A message already read is always relayed (or its failure logged)
    /// before the loop notices cancellation.
    async fn run(self, source: Arc<dyn MqObject>, cancel: CancellationToken) {
        debug!("{}: polling {}", self.name, source.name());

        loop {
            // leave messages on the queue while the bus is away
            if !self.bus_connected() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(GET_WAIT) => continue,
                }
            }

            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = source.get(GET_WAIT) => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    if let Err(e) = self.relay(delivery).await {
                        self.stats.add_failure();
                        match e {
                            ConnectorError::MalformedMessage(_) => {
                                warn!("{}: dropping message: {}", self.name, e)
                            }
                            _ => error!("{}: failed to relay message: {}", self.name, e),
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("{}: get from {} failed: {}", self.name, source.name(), e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(GET_WAIT) => {}
                    }
                }
            }
        }

        debug!("{}: stopped polling {}", self.name, source.name());
    }
}

/// The background task draining an MQ source
pub(crate) struct Poller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Poller {
    pub(crate) fn spawn(source: Arc<dyn MqObject>, relay: MqToBus) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(relay.run(source, cancel.clone()));
        Self { cancel, handle }
    }

    /// Cancel and wait for the in-flight message, if any
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!("poller task failed: {}", e);
        }
    }
}
