//! The bridge server.
//!
//! [`BridgeServer`] owns the configuration, the shared bus connections and
//! every connector. It starts them in configuration order, keeps them alive
//! through the reconnect supervisor and tears everything down on stop.

use crate::backend::Backends;
use crate::config::{BridgeConfig, BusKind};
use crate::connector::{create_connector, Connector};
use crate::context::{BridgeContext, ReplyRoutes};
use crate::reconnect::{connect_nats, connect_stan, ReconnectPolicy, Supervisor, Watchlist};
use crate::stats::BridgeStats;
use crate::{ConnectorError, ConnectorResult};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Default)]
struct Lifecycle {
    supervisor: Option<Supervisor>,
}

/// Coordinates every connector of one bridge process
pub struct BridgeServer {
    config: RwLock<BridgeConfig>,
    ctx: Arc<BridgeContext>,
    connectors: RwLock<Vec<Arc<dyn Connector>>>,
    start_time: RwLock<DateTime<Utc>>,
    running: AtomicBool,
    // serializes start, stop and reload
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl BridgeServer {
    pub fn new(config: BridgeConfig, backends: Backends) -> Self {
        Self {
            config: RwLock::new(config),
            ctx: Arc::new(BridgeContext::new(backends)),
            connectors: RwLock::new(Vec::new()),
            start_time: RwLock::new(Utc::now()),
            running: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
        }
    }

    /// Connect the needed buses and start every connector
    ///
    /// A connector that cannot be built or started is logged and skipped; the
    /// others keep running. If any failed, a single
    /// [`ConnectorError::StartFailed`] summarizing them is returned while the
    /// server stays up, with the supervisor retrying the failed ones.
    pub async fn start(&self) -> ConnectorResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.start_locked(&mut lifecycle).await
    }

    async fn start_locked(&self, lifecycle: &mut Lifecycle) -> ConnectorResult<()> {
        if self.is_running() {
            return Ok(());
        }

        let config = self.config.read().clone();
        if config.reconnect_interval_ms == 0 {
            return Err(ConnectorError::config("reconnect_interval_ms must be > 0"));
        }

        info!("starting bridge with {} connectors", config.connect.len());
        self.ctx.set_routes(ReplyRoutes::from_config(&config.connect));

        let mut failures = Vec::new();
        let mut connectors = Vec::with_capacity(config.connect.len());
        for (idx, connector_config) in config.connect.iter().enumerate() {
            match create_connector(connector_config.clone(), self.ctx.clone()) {
                Ok(connector) => connectors.push(connector),
                Err(e) => {
                    error!("skipping connect[{}]: {}", idx, e);
                    failures.push(format!("connect[{}]: {}", idx, e));
                }
            }
        }

        let nats = if config.uses_bus(BusKind::Nats) {
            match &config.nats {
                Some(nats) => {
                    if let Err(e) = connect_nats(&self.ctx, nats).await {
                        error!("failed to connect to nats: {}", e);
                    }
                    Some(nats.clone())
                }
                None => {
                    warn!("NATS connectors are configured but nats is not");
                    None
                }
            }
        } else {
            None
        };

        let stan = if config.uses_bus(BusKind::Stan) {
            match &config.stan {
                Some(stan) => {
                    if let Err(e) = connect_stan(&self.ctx, stan).await {
                        error!("failed to connect to stan: {}", e);
                    }
                    Some(stan.clone())
                }
                None => {
                    warn!("Stan connectors are configured but stan is not");
                    None
                }
            }
        } else {
            None
        };

        for connector in &connectors {
            if let Err(e) = connector.start().await {
                error!("failed to start {}: {}", connector, e);
                failures.push(format!("{}: {}", connector.name(), e));
            }
        }

        *self.connectors.write() = connectors.clone();
        *self.start_time.write() = Utc::now();

        let watchlist = Watchlist {
            ctx: self.ctx.clone(),
            nats,
            stan,
            connectors,
        };
        lifecycle.supervisor = Some(Supervisor::spawn(
            watchlist,
            ReconnectPolicy::from_config(&config),
        ));
        self.running.store(true, Ordering::SeqCst);

        if failures.is_empty() {
            info!("bridge started");
            Ok(())
        } else {
            Err(ConnectorError::StartFailed {
                failed: failures.len(),
                total: config.connect.len(),
                summary: failures.join("; "),
            })
        }
    }

    /// Shut every connector down and close the shared connections
    ///
    /// Individual shutdown errors are logged, never returned.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.stop_locked(&mut lifecycle).await;
    }

    async fn stop_locked(&self, lifecycle: &mut Lifecycle) {
        if !self.is_running() {
            return;
        }
        info!("stopping bridge");

        if let Some(supervisor) = lifecycle.supervisor.take() {
            supervisor.stop().await;
        }

        let connectors = self.connectors.read().clone();
        let results = join_all(connectors.iter().map(|c| c.shutdown())).await;
        for (connector, result) in connectors.iter().zip(results) {
            if let Err(e) = result {
                warn!("error shutting down {}: {}", connector, e);
            }
        }

        if let Some(conn) = self.ctx.connections.replace_nats(None) {
            conn.close().await;
        }
        if let Some(conn) = self.ctx.connections.replace_stan(None) {
            conn.close().await;
        }

        self.running.store(false, Ordering::SeqCst);
        info!("bridge stopped");
    }

    /// Replace the configuration: a full stop, then a start with `config`
    ///
    /// Both steps run under the lifecycle lock, so a concurrent `stop` either
    /// precedes the reload or stops the reloaded bridge.
    pub async fn reload(&self, config: BridgeConfig) -> ConnectorResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        info!("reloading bridge configuration");
        self.stop_locked(&mut lifecycle).await;
        *self.config.write() = config;
        self.start_locked(&mut lifecycle).await
    }

    /// Whether the direct bus connection is up
    pub fn check_nats(&self) -> bool {
        self.ctx.connections.check_nats()
    }

    /// Whether the streaming bus connection is up
    pub fn check_stan(&self) -> bool {
        self.ctx.connections.check_stan()
    }

    /// Consistent copy of every connector's counters
    ///
    /// Each connector's counters are read under that connector's statistics
    /// lock only, so message handling is never held up for long.
    pub fn safe_stats(&self) -> BridgeStats {
        let snapshots = self
            .connectors
            .read()
            .iter()
            .map(|connector| connector.stats())
            .collect();

        BridgeStats::new(*self.start_time.read(), snapshots)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Names of the connectors built by the last start, in start order
    pub fn connector_names(&self) -> Vec<String> {
        self.connectors
            .read()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// The connectors built by the last start
    pub fn connectors(&self) -> Vec<Arc<dyn Connector>> {
        self.connectors.read().clone()
    }

    pub fn config(&self) -> BridgeConfig {
        self.config.read().clone()
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }
}
