//! Reconnection supervision.
//!
//! A single background task sweeps the bridge at a fixed interval. Each sweep
//! re-establishes any shared bus connection that went down, then restarts
//! every connector that is not running, fails its connection check, or was
//! subscribed through a bus connection that has just been replaced. A restart
//! is always a full `shutdown` followed by `start`, never an in-place repair.

use crate::config::{BridgeConfig, BusKind, NatsConfig, StreamingConfig};
use crate::connector::{Connector, ConnectorState};
use crate::context::BridgeContext;
use crate::ConnectorResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fixed-interval retry policy
///
/// There is no backoff curve. `max_attempts` only decides when a warning is
/// logged; sweeping continues until the bridge stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.reconnect_interval_ms.max(1)),
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Whether `failed_sweeps` consecutive failures reach the advisory ceiling
    pub fn exceeded(&self, failed_sweeps: u32) -> bool {
        self.max_attempts.is_some_and(|max| failed_sweeps == max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(5000))
    }
}

/// Open the direct bus connection and install it, closing any previous one
pub(crate) async fn connect_nats(ctx: &BridgeContext, config: &NatsConfig) -> ConnectorResult<()> {
    debug!("connecting to nats at {:?}", config.servers);
    let conn = ctx.backends.nats.connect(config).await?;
    if let Some(old) = ctx.connections.replace_nats(Some(conn)) {
        old.close().await;
    }
    info!("connected to nats");
    Ok(())
}

/// Open the streaming bus connection and install it, closing any previous one
pub(crate) async fn connect_stan(
    ctx: &BridgeContext,
    config: &StreamingConfig,
) -> ConnectorResult<()> {
    debug!(
        "connecting to stan cluster {} as {}",
        config.cluster_id, config.client_id
    );
    let conn = ctx.backends.streaming.connect(config).await?;
    if let Some(old) = ctx.connections.replace_stan(Some(conn)) {
        old.close().await;
    }
    info!("connected to stan cluster {}", config.cluster_id);
    Ok(())
}

/// What one supervisor instance watches
pub(crate) struct Watchlist {
    pub(crate) ctx: Arc<BridgeContext>,
    /// Set only when some connector uses the direct bus
    pub(crate) nats: Option<NatsConfig>,
    /// Set only when some connector uses the streaming bus
    pub(crate) stan: Option<StreamingConfig>,
    pub(crate) connectors: Vec<Arc<dyn Connector>>,
}

impl Watchlist {
    /// Run one sweep; returns whether everything was healthy afterwards
    pub(crate) async fn sweep(&self) -> bool {
        let mut healthy = true;
        let mut replaced_nats = false;
        let mut replaced_stan = false;

        if let Some(config) = &self.nats {
            if !self.ctx.connections.check_nats() {
                match connect_nats(&self.ctx, config).await {
                    Ok(()) => replaced_nats = true,
                    Err(e) => {
                        warn!("nats reconnect failed: {}", e);
                        healthy = false;
                    }
                }
            }
        }

        if let Some(config) = &self.stan {
            if !self.ctx.connections.check_stan() {
                match connect_stan(&self.ctx, config).await {
                    Ok(()) => replaced_stan = true,
                    Err(e) => {
                        warn!("stan reconnect failed: {}", e);
                        healthy = false;
                    }
                }
            }
        }

        for connector in &self.connectors {
            let resubscribe = connector.state() == ConnectorState::Running
                && match connector.config().connector_type.bus() {
                    BusKind::Nats => replaced_nats,
                    BusKind::Stan => replaced_stan,
                };

            let needs_restart = resubscribe
                || connector.state() != ConnectorState::Running
                || connector.check_connections().await.is_err();
            if !needs_restart {
                continue;
            }

            debug!("restarting connection {}", connector);
            if let Err(e) = connector.shutdown().await {
                debug!("shutdown of {} before restart failed: {}", connector, e);
            }
            match connector.start().await {
                Ok(()) => info!("restarted connection {}", connector),
                Err(e) => {
                    warn!("failed to restart {}: {}", connector, e);
                    healthy = false;
                }
            }
        }

        healthy
    }
}

/// Handle to the running supervisor task
pub(crate) struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Supervisor {
    pub(crate) fn spawn(watchlist: Watchlist, policy: ReconnectPolicy) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(policy.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately; the bridge was just started
            interval.tick().await;

            let mut failed_sweeps: u32 = 0;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                if watchlist.sweep().await {
                    if failed_sweeps > 0 {
                        info!("all connections recovered after {} attempts", failed_sweeps);
                    }
                    failed_sweeps = 0;
                } else {
                    failed_sweeps = failed_sweeps.saturating_add(1);
                    if policy.exceeded(failed_sweeps) {
                        warn!(
                            "connections still failing after {} reconnect attempts, retrying every {:?}",
                            failed_sweeps, policy.interval
                        );
                    }
                }
            }

            debug!("reconnect supervisor stopped");
        });

        Self { cancel, handle }
    }

    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("reconnect supervisor task failed: {}", e);
        }
    }
}
