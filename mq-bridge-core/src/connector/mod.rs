//! Connectors: one directional relay between an MQ object and a bus destination.
//!
//! All eight configured types share one lifecycle, implemented by
//! [`BridgeConnector`]. What differs between them is which MQ object is opened,
//! which bus is used and in which direction messages flow; that lives in the
//! `mq_to_bus` and `bus_to_mq` relays.

mod bridge;
mod bus_to_mq;
mod mq_to_bus;

pub use bridge::BridgeConnector;

use crate::config::{BusKind, ConnectorConfig, Direction, MqEndpointKind};
use crate::context::BridgeContext;
use crate::stats::StatsSnapshot;
use crate::ConnectorResult;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Stopped,
    Starting,
    Running,
}

/// A relay the bridge server can start, stop and probe
///
/// `start`, `shutdown` and `check_connections` are mutually exclusive per
/// connector. Message handling runs concurrently with all of them.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Display {
    /// Acquire every resource and begin relaying
    ///
    /// On failure nothing acquired along the way is left open. Starting a
    /// running connector is a no-op.
    async fn start(&self) -> ConnectorResult<()>;

    /// Stop relaying and release resources in reverse order
    ///
    /// Shutting down a stopped connector is a no-op.
    async fn shutdown(&self) -> ConnectorResult<()>;

    /// Report whether the connections this connector depends on are alive
    async fn check_connections(&self) -> ConnectorResult<()>;

    fn config(&self) -> &ConnectorConfig;

    /// Human readable name, e.g. `Queue:DEV.QUEUE.1 to NATS:orders`
    fn name(&self) -> &str;

    fn id(&self) -> &str;

    fn state(&self) -> ConnectorState;

    fn stats(&self) -> StatsSnapshot;
}

/// Build the connector described by `config`
pub fn create_connector(
    config: ConnectorConfig,
    ctx: Arc<BridgeContext>,
) -> ConnectorResult<Arc<dyn Connector>> {
    Ok(Arc::new(BridgeConnector::new(config, ctx)?))
}

/// Name a connector after its endpoints
pub fn connector_name(config: &ConnectorConfig) -> String {
    let kind = config.connector_type;

    let mq = match kind.mq_endpoint() {
        MqEndpointKind::Queue => format!("Queue:{}", config.queue),
        MqEndpointKind::Topic => format!("Topic:{}", config.topic),
    };
    let bus = match kind.bus() {
        BusKind::Nats => format!("NATS:{}", config.subject),
        BusKind::Stan => format!("STAN:{}", config.channel),
    };

    match kind.direction() {
        Direction::MqToBus => format!("{} to {}", mq, bus),
        Direction::BusToMq => format!("{} to {}", bus, mq),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectorType;

    #[test]
    fn test_connector_names() {
        let cases = [
            (
                ConnectorConfig::new(ConnectorType::Queue2Nats)
                    .with_queue("Q1")
                    .with_subject("s1"),
                "Queue:Q1 to NATS:s1",
            ),
            (
                ConnectorConfig::new(ConnectorType::Nats2Queue)
                    .with_queue("Q1")
                    .with_subject("s1"),
                "NATS:s1 to Queue:Q1",
            ),
            (
                ConnectorConfig::new(ConnectorType::Topic2Stan)
                    .with_topic("dev/")
                    .with_channel("c1"),
                "Topic:dev/ to STAN:c1",
            ),
            (
                ConnectorConfig::new(ConnectorType::Stan2Topic)
                    .with_topic("dev/")
                    .with_channel("c1"),
                "STAN:c1 to Topic:dev/",
            ),
        ];

        for (config, expected) in cases {
            assert_eq!(connector_name(&config), expected);
        }
    }
}
