//! # MQ Bridge Core
//!
//! Relays messages between an MQ queue manager and two flavours of pub/sub
//! bus: a direct bus ("NATS": subjects, optional reply subjects) and a durable
//! streaming bus ("STAN": channels with durable, positioned subscriptions).
//!
//! ## Overview
//!
//! A bridge is a set of one-way connectors. Each connector joins one MQ queue
//! or topic to one bus subject or channel:
//! - **Queue2NATS / Queue2Stan / Topic2NATS / Topic2Stan**: read from MQ and publish on the bus
//! - **NATS2Queue / Stan2Queue / NATS2Topic / Stan2Topic**: subscribe on the bus and put to MQ
//!
//! Unless a connector sets `exclude_headers`, the MQ message descriptor travels
//! with the body in a small JSON envelope so that priorities, correlation ids
//! and reply-to queues survive the trip.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mq_bridge_core::testing::MemoryBackends;
//! use mq_bridge_core::{BridgeConfig, BridgeServer, ConnectorConfig, ConnectorType, NatsConfig};
//!
//! # async fn run() -> mq_bridge_core::ConnectorResult<()> {
//! let mut config = BridgeConfig::default();
//! config.nats = Some(NatsConfig::default());
//! config.connect.push(
//!     ConnectorConfig::new(ConnectorType::Queue2Nats)
//!         .with_queue("DEV.QUEUE.1")
//!         .with_subject("orders"),
//! );
//!
//! // production builds pass real client factories here
//! let backends = MemoryBackends::default();
//! let server = BridgeServer::new(config, backends.backends());
//! server.start().await?;
//!
//! println!("{}", server.safe_stats().to_json().unwrap_or_default());
//! server.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Connector lifecycle**: start unwinds fully on failure, shutdown is idempotent
//! - **Reconnection**: a fixed-interval supervisor restarts connectors whose backends went away
//! - **Request/reply**: reply-to queues, subjects and channels are mapped across the bridge
//! - **Statistics**: consistent per-connector snapshots, mirrored to the `metrics` facade
//! - **Configuration**: TOML files with environment variable overrides

pub mod backend;
mod config;
pub mod connector;
mod context;
mod error;
pub mod message;
pub mod metadata;
pub mod reconnect;
mod server;
mod stats;
pub mod testing;

// Re-export public API
pub use backend::Backends;
pub use config::{
    BridgeConfig, BusKind, ConnectorConfig, ConnectorType, Direction, MqConfig, MqEndpointKind,
    NatsConfig, StreamingConfig, TlsConfig,
};
pub use connector::{Connector, ConnectorState};
pub use context::{BridgeContext, ReplyRoutes, SharedConnections};
pub use error::{BoxError, ConnectorError, ConnectorResult};
pub use metadata::MessageDescriptor;
pub use reconnect::ReconnectPolicy;
pub use server::BridgeServer;
pub use stats::{BridgeStats, ConnectorStats, StatsSnapshot};

pub use mq_bridge_common::{BridgeHeader, BridgeMessage, MessageError};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Install a `tracing` subscriber filtered by `RUST_LOG`, or `level` when unset
///
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
