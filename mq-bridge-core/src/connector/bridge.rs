use super::bus_to_mq::{self, BusToMq, SinkSlot, SinkTarget};
use super::mq_to_bus::{self, MqToBus, Poller};
use super::{connector_name, Connector, ConnectorState};
use crate::backend::{BusSubscription, MqObject, QueueManagerSession};
use crate::config::{BusKind, ConnectorConfig, Direction};
use crate::context::BridgeContext;
use crate::stats::{ConnectorStats, StatsSnapshot};
use crate::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Everything a running connector holds, released in reverse order
#[derive(Default)]
struct Resources {
    session: Option<Arc<dyn QueueManagerSession>>,
    object: Option<Arc<dyn MqObject>>,
    subscription: Option<Box<dyn BusSubscription>>,
    poller: Option<Poller>,
}

/// The connector implementation shared by every configured type
pub struct BridgeConnector {
    config: ConnectorConfig,
    name: String,
    ctx: Arc<BridgeContext>,
    stats: Arc<ConnectorStats>,
    sink: Arc<SinkSlot>,
    state: Mutex<ConnectorState>,
    // serializes start, shutdown and check_connections
    resources: tokio::sync::Mutex<Resources>,
}

impl BridgeConnector {
    /// Create a stopped connector; fails on invalid configuration
    pub fn new(config: ConnectorConfig, ctx: Arc<BridgeContext>) -> ConnectorResult<Self> {
        config.validate()?;

        let name = connector_name(&config);
        let id = config
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        debug!("created connector {} with id {}", name, id);

        Ok(Self {
            stats: Arc::new(ConnectorStats::new(name.clone(), id)),
            config,
            name,
            ctx,
            sink: Arc::new(RwLock::new(None)),
            state: Mutex::new(ConnectorState::Stopped),
            resources: tokio::sync::Mutex::new(Resources::default()),
        })
    }

    fn set_state(&self, state: ConnectorState) {
        *self.state.lock() = state;
    }

    fn require_bus(&self) -> ConnectorResult<()> {
        let available = match self.config.connector_type.bus() {
            BusKind::Nats => self.ctx.connections.check_nats(),
            BusKind::Stan => self.ctx.connections.check_stan(),
        };

        if available {
            Ok(())
        } else {
            let bus = match self.config.connector_type.bus() {
                BusKind::Nats => "nats",
                BusKind::Stan => "stan",
            };
            Err(ConnectorError::unavailable(format!(
                "{} connector requires {} to be available",
                self.config.connector_type, bus
            )))
        }
    }

    fn holds_durable_subscription(&self) -> bool {
        self.config.connector_type.bus() == BusKind::Stan && self.config.is_durable()
    }

    async fn acquire(&self, res: &mut Resources) -> ConnectorResult<()> {
        self.require_bus()?;

        let qm = &self.config.mq.queue_manager;
        trace!("{}: connecting to queue manager {}", self.name, qm);
        let session = self
            .ctx
            .backends
            .mq
            .connect(&self.config.mq)
            .await
            .map_err(|e| {
                ConnectorError::resource_with_source(
                    format!("failed to connect to queue manager {}", qm),
                    e,
                )
            })?;
        res.session = Some(session.clone());

        match self.config.connector_type.direction() {
            Direction::MqToBus => {
                let source = mq_to_bus::open_source(&session, &self.config).await?;
                res.object = Some(source.clone());
                trace!("{}: opened {}", self.name, source.name());

                let relay = MqToBus::new(
                    &self.name,
                    &self.config,
                    self.ctx.clone(),
                    self.stats.clone(),
                );
                res.poller = Some(Poller::spawn(source, relay));
            }
            Direction::BusToMq => {
                let sink = bus_to_mq::open_sink(&session, &self.config).await?;
                res.object = Some(sink.clone());
                trace!("{}: opened {}", self.name, sink.name());

                *self.sink.write() = Some(SinkTarget {
                    object: sink,
                    queue_manager: session.queue_manager_name(),
                });

                let handler = Arc::new(BusToMq::new(
                    &self.name,
                    &self.config,
                    self.sink.clone(),
                    self.ctx.clone(),
                    self.stats.clone(),
                ));
                let subscription = bus_to_mq::subscribe(&self.ctx, &self.config, handler).await?;
                res.subscription = Some(subscription);
                trace!(
                    "{}: subscribed to {}",
                    self.name,
                    self.config.bus_destination()
                );
            }
        }

        Ok(())
    }

    /// Release whatever is held, subscription first and session last
    ///
    /// Only the error from closing the MQ object is returned; every step runs
    /// regardless.
    async fn release(&self, res: &mut Resources) -> ConnectorResult<()> {
        let mut result = Ok(());

        if let Some(poller) = res.poller.take() {
            poller.stop().await;
        }

        if let Some(subscription) = res.subscription.take() {
            let released = if self.holds_durable_subscription() {
                // keep the durable position on the server
                subscription.close().await
            } else {
                subscription.unsubscribe().await
            };
            if let Err(e) = released {
                warn!("{}: failed to release subscription: {}", self.name, e);
            }
        }

        self.sink.write().take();

        if let Some(object) = res.object.take() {
            if let Err(e) = object.close().await {
                warn!("{}: failed to close {}: {}", self.name, object.name(), e);
                result = Err(e);
            }
        }

        if let Some(session) = res.session.take() {
            if let Err(e) = session.disconnect().await {
                debug!("{}: disconnect failed: {}", self.name, e);
            }
        }

        result
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn start(&self) -> ConnectorResult<()> {
        let mut res = self.resources.lock().await;
        if self.state() == ConnectorState::Running {
            return Ok(());
        }

        info!("starting connection {}", self.name);
        self.set_state(ConnectorState::Starting);

        match self.acquire(&mut res).await {
            Ok(()) => {
                self.set_state(ConnectorState::Running);
                self.stats.add_connect();
                info!("started connection {}", self.name);
                Ok(())
            }
            Err(e) => {
                let _ = self.release(&mut res).await;
                self.set_state(ConnectorState::Stopped);
                Err(e)
            }
        }
    }

    async fn shutdown(&self) -> ConnectorResult<()> {
        let mut res = self.resources.lock().await;
        if self.state() == ConnectorState::Stopped {
            return Ok(());
        }

        info!("shutting down connection {}", self.name);
        let result = self.release(&mut res).await;
        self.set_state(ConnectorState::Stopped);
        self.stats.add_disconnect();
        result
    }

    async fn check_connections(&self) -> ConnectorResult<()> {
        let res = self.resources.lock().await;
        self.require_bus()?;

        if let Some(session) = &res.session {
            if !session.is_connected() {
                return Err(ConnectorError::unavailable(format!(
                    "{} lost its queue manager connection",
                    self.name
                )));
            }
        }

        Ok(())
    }

    fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> &str {
        self.stats.id()
    }

    fn state(&self) -> ConnectorState {
        *self.state.lock()
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl fmt::Display for BridgeConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
