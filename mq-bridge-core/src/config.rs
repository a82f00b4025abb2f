//! Configuration management for the bridge.

use crate::backend::StartPosition;
use crate::{ConnectorError, ConnectorResult};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

/// The eight connector variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorType {
    #[serde(rename = "Queue2NATS")]
    Queue2Nats,
    #[serde(rename = "Queue2Stan")]
    Queue2Stan,
    #[serde(rename = "NATS2Queue")]
    Nats2Queue,
    #[serde(rename = "Stan2Queue")]
    Stan2Queue,
    #[serde(rename = "Topic2NATS")]
    Topic2Nats,
    #[serde(rename = "Topic2Stan")]
    Topic2Stan,
    #[serde(rename = "NATS2Topic")]
    Nats2Topic,
    #[serde(rename = "Stan2Topic")]
    Stan2Topic,
}

/// Which MQ object a connector reads from or writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqEndpointKind {
    Queue,
    Topic,
}

/// Which bus connection a connector uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Nats,
    Stan,
}

/// Direction messages flow through a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    MqToBus,
    BusToMq,
}

impl ConnectorType {
    /// All variants, in declaration order
    pub const ALL: [ConnectorType; 8] = [
        ConnectorType::Queue2Nats,
        ConnectorType::Queue2Stan,
        ConnectorType::Nats2Queue,
        ConnectorType::Stan2Queue,
        ConnectorType::Topic2Nats,
        ConnectorType::Topic2Stan,
        ConnectorType::Nats2Topic,
        ConnectorType::Stan2Topic,
    ];

    pub fn mq_endpoint(&self) -> MqEndpointKind {
        match self {
            Self::Queue2Nats | Self::Queue2Stan | Self::Nats2Queue | Self::Stan2Queue => {
                MqEndpointKind::Queue
            }
            _ => MqEndpointKind::Topic,
        }
    }

    pub fn bus(&self) -> BusKind {
        match self {
            Self::Queue2Nats | Self::Nats2Queue | Self::Topic2Nats | Self::Nats2Topic => {
                BusKind::Nats
            }
            _ => BusKind::Stan,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Self::Queue2Nats | Self::Queue2Stan | Self::Topic2Nats | Self::Topic2Stan => {
                Direction::MqToBus
            }
            _ => Direction::BusToMq,
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queue2Nats => "Queue2NATS",
            Self::Queue2Stan => "Queue2Stan",
            Self::Nats2Queue => "NATS2Queue",
            Self::Stan2Queue => "Stan2Queue",
            Self::Topic2Nats => "Topic2NATS",
            Self::Topic2Stan => "Topic2Stan",
            Self::Nats2Topic => "NATS2Topic",
            Self::Stan2Topic => "Stan2Topic",
        };
        f.write_str(name)
    }
}

/// TLS material for a client connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub key: String,
    pub cert: String,
    pub root: String,
}

/// Connection information for one MQ queue manager
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqConfig {
    /// Host and port, e.g. `localhost(1414)`
    pub connection_name: String,
    /// Server-connection channel name
    pub channel_name: String,
    /// Queue manager name, empty for the default queue manager
    pub queue_manager: String,

    pub user_name: String,
    pub password: String,

    pub key_repository: String,
    pub certificate_label: String,
    pub ssl_peer_name: String,
}

/// Shared direct-bus (NATS) connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub servers: Vec<String>,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Wait between client reconnect attempts in milliseconds
    pub reconnect_wait_ms: u64,
    /// Client reconnect attempts, -1 for unlimited
    pub max_reconnects: i32,

    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: Option<TlsConfig>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            connect_timeout_ms: 2000,
            reconnect_wait_ms: 2000,
            max_reconnects: -1,
            username: None,
            password: None,
            tls: None,
        }
    }
}

/// Shared streaming-bus connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub cluster_id: String,
    pub client_id: String,

    /// Publish acknowledgement wait in milliseconds
    pub pub_ack_wait_ms: u64,
    pub discover_prefix: String,
    pub max_pub_acks_inflight: u32,
    /// Connect wait in milliseconds
    pub connect_wait_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            cluster_id: String::new(),
            client_id: String::new(),
            pub_ack_wait_ms: 5000,
            discover_prefix: "_STAN.discover".to_string(),
            max_pub_acks_inflight: 16384,
            connect_wait_ms: 2000,
        }
    }
}

/// Configuration for one connector (of any type)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(rename = "type")]
    pub connector_type: ConnectorType,

    /// Stable identifier, generated when absent
    #[serde(default)]
    pub id: Option<String>,

    /// Streaming channel, used by Stan connectors
    #[serde(default)]
    pub channel: String,
    /// Durable subscription name, used by Stan sources
    #[serde(default)]
    pub durable_name: Option<String>,
    /// -1 starts with the last received message, 0 delivers all available
    #[serde(default)]
    pub start_at_sequence: i64,
    /// Unix seconds, takes precedence over `start_at_sequence` when non-zero
    #[serde(default)]
    pub start_at_time: i64,

    /// Direct-bus subject, used by NATS connectors
    #[serde(default)]
    pub subject: String,

    /// Queue manager connection, never shared between connectors
    #[serde(default)]
    pub mq: MqConfig,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub queue: String,

    /// Relay only the body, without translating metadata
    #[serde(default)]
    pub exclude_headers: bool,
}

impl ConnectorConfig {
    /// Create a config for the given type with every endpoint empty
    pub fn new(connector_type: ConnectorType) -> Self {
        Self {
            connector_type,
            id: None,
            channel: String::new(),
            durable_name: None,
            start_at_sequence: 0,
            start_at_time: 0,
            subject: String::new(),
            mq: MqConfig::default(),
            topic: String::new(),
            queue: String::new(),
            exclude_headers: false,
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_durable_name(mut self, durable: impl Into<String>) -> Self {
        self.durable_name = Some(durable.into());
        self
    }

    pub fn with_mq(mut self, mq: MqConfig) -> Self {
        self.mq = mq;
        self
    }

    pub fn with_exclude_headers(mut self, exclude: bool) -> Self {
        self.exclude_headers = exclude;
        self
    }

    /// The MQ-side object name that is meaningful for this type
    pub fn mq_object_name(&self) -> &str {
        match self.connector_type.mq_endpoint() {
            MqEndpointKind::Queue => &self.queue,
            MqEndpointKind::Topic => &self.topic,
        }
    }

    /// The bus-side destination name that is meaningful for this type
    pub fn bus_destination(&self) -> &str {
        match self.connector_type.bus() {
            BusKind::Nats => &self.subject,
            BusKind::Stan => &self.channel,
        }
    }

    /// Whether this connector holds a durable streaming subscription
    pub fn is_durable(&self) -> bool {
        self.durable_name
            .as_deref()
            .is_some_and(|name| !name.is_empty())
    }

    /// Where a streaming subscription should begin
    pub fn start_position(&self) -> StartPosition {
        if self.start_at_time != 0 {
            if let Some(time) = Utc.timestamp_opt(self.start_at_time, 0).single() {
                return StartPosition::Time(time);
            }
        }

        match self.start_at_sequence {
            -1 => StartPosition::LastReceived,
            seq if seq > 0 => StartPosition::Sequence(seq as u64),
            _ => StartPosition::AllAvailable,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConnectorResult<()> {
        let kind = self.connector_type;

        match kind.mq_endpoint() {
            MqEndpointKind::Queue if self.queue.is_empty() => {
                return Err(ConnectorError::config(format!(
                    "{} connector requires a queue",
                    kind
                )));
            }
            MqEndpointKind::Topic if self.topic.is_empty() => {
                return Err(ConnectorError::config(format!(
                    "{} connector requires a topic",
                    kind
                )));
            }
            _ => {}
        }

        match kind.bus() {
            BusKind::Nats if self.subject.is_empty() => {
                return Err(ConnectorError::config(format!(
                    "{} connector requires a subject",
                    kind
                )));
            }
            BusKind::Stan if self.channel.is_empty() => {
                return Err(ConnectorError::config(format!(
                    "{} connector requires a channel",
                    kind
                )));
            }
            _ => {}
        }

        if self.start_at_sequence < -1 {
            return Err(ConnectorError::config(format!(
                "start_at_sequence must be -1 or greater, got {}",
                self.start_at_sequence
            )));
        }

        if self.start_at_time < 0 {
            return Err(ConnectorError::config("start_at_time cannot be negative"));
        }

        Ok(())
    }
}

/// Top-level bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Interval between reconnection sweeps in milliseconds
    pub reconnect_interval_ms: u64,

    /// Advisory ceiling on consecutive failed reconnects, only logged
    pub max_reconnect_attempts: Option<u32>,

    /// Log level used when `RUST_LOG` is not set
    pub log_level: String,

    /// Direct bus connection, omitted when no connector uses it
    pub nats: Option<NatsConfig>,

    /// Streaming bus connection, omitted when no connector uses it
    pub stan: Option<StreamingConfig>,

    /// Connectors, started in this order
    pub connect: Vec<ConnectorConfig>,
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> ConnectorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::config(format!("Failed to read config file {}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            ConnectorError::config(format!("Failed to parse config file {}: {}", path, e))
        })
    }

    /// Load configuration from TOML text
    pub fn from_toml_str(content: &str) -> ConnectorResult<Self> {
        toml::from_str(content)
            .map_err(|e| ConnectorError::config(format!("Failed to parse config: {}", e)))
    }

    /// Load from the file named by `MQ_BRIDGE_CONFIG_FILE`, apply env overrides and validate
    pub fn load() -> ConnectorResult<Self> {
        let mut config = match env::var("MQ_BRIDGE_CONFIG_FILE") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// - `MQ_BRIDGE_RECONNECT_INTERVAL_MS`: reconnect sweep interval
    /// - `MQ_BRIDGE_LOG_LEVEL`: fallback log level
    /// - `MQ_BRIDGE_NATS_SERVERS`: comma-separated NATS server URLs
    /// - `MQ_BRIDGE_STAN_CLUSTER_ID`: streaming cluster id
    /// - `MQ_BRIDGE_STAN_CLIENT_ID`: streaming client id
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("MQ_BRIDGE_RECONNECT_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.reconnect_interval_ms = n;
            }
        }
        if let Ok(val) = env::var("MQ_BRIDGE_LOG_LEVEL") {
            self.log_level = val;
        }
        if let Ok(val) = env::var("MQ_BRIDGE_NATS_SERVERS") {
            let servers = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            self.nats.get_or_insert_with(NatsConfig::default).servers = servers;
        }
        if let Ok(val) = env::var("MQ_BRIDGE_STAN_CLUSTER_ID") {
            self.stan
                .get_or_insert_with(StreamingConfig::default)
                .cluster_id = val;
        }
        if let Ok(val) = env::var("MQ_BRIDGE_STAN_CLIENT_ID") {
            self.stan.get_or_insert_with(StreamingConfig::default).client_id = val;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.reconnect_interval_ms == 0 {
            return Err(ConnectorError::config("reconnect_interval_ms must be > 0"));
        }

        if let Some(nats) = &self.nats {
            if nats.servers.is_empty() {
                return Err(ConnectorError::config(
                    "nats configuration requires at least one server",
                ));
            }
        }

        if let Some(stan) = &self.stan {
            if stan.cluster_id.is_empty() || stan.client_id.is_empty() {
                return Err(ConnectorError::config(
                    "stan configuration requires cluster_id and client_id",
                ));
            }
        }

        for (idx, connector) in self.connect.iter().enumerate() {
            connector.validate().map_err(|e| {
                ConnectorError::config(format!("connect[{}]: {}", idx, e))
            })?;
        }

        Ok(())
    }

    /// Whether any connector relays through the given bus
    pub fn uses_bus(&self, bus: BusKind) -> bool {
        self.connect.iter().any(|c| c.connector_type.bus() == bus)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: 5000,
            max_reconnect_attempts: None,
            log_level: "info".to_string(),
            nats: None,
            stan: None,
            connect: Vec::new(),
        }
    }
}
