#![allow(dead_code)]

use mq_bridge_core::testing::MemoryBackends;
use mq_bridge_core::{
    BridgeConfig, BridgeServer, ConnectorConfig, NatsConfig, StatsSnapshot, StreamingConfig,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const WAIT: Duration = Duration::from_secs(3);

/// Bridge config with both buses configured and a fast supervisor
pub fn bridge_config(connect: Vec<ConnectorConfig>) -> BridgeConfig {
    BridgeConfig {
        reconnect_interval_ms: 50,
        nats: Some(NatsConfig {
            servers: vec!["nats://localhost:4222".to_string()],
            ..NatsConfig::default()
        }),
        stan: Some(StreamingConfig {
            cluster_id: "test-cluster".to_string(),
            client_id: "mq-bridge".to_string(),
            ..StreamingConfig::default()
        }),
        connect,
        ..BridgeConfig::default()
    }
}

pub fn server(backends: &MemoryBackends, connect: Vec<ConnectorConfig>) -> BridgeServer {
    BridgeServer::new(bridge_config(connect), backends.backends())
}

/// Poll `check` until it holds or [`WAIT`] elapses
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) -> anyhow::Result<()> {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if check() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("timed out waiting for {}", what)
}

pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> anyhow::Result<T> {
    match tokio::time::timeout(WAIT, rx.recv()).await {
        Ok(Some(message)) => Ok(message),
        Ok(None) => anyhow::bail!("channel closed"),
        Err(_) => anyhow::bail!("no message within {:?}", WAIT),
    }
}

pub fn stats_for(server: &BridgeServer, name: &str) -> StatsSnapshot {
    server
        .safe_stats()
        .connectors
        .get(name)
        .cloned()
        .unwrap_or_default()
}
