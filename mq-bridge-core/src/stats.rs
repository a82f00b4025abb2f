//! Connector statistics.
//!
//! [`ConnectorStats`] keeps the counters of one connector behind a single
//! lock so that [`ConnectorStats::snapshot`] always returns a consistent set.
//! Every update is mirrored to the `metrics` facade, labelled by connector
//! name, for whatever exporter the hosting process installs.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Point-in-time copy of one connector's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub name: String,
    pub id: String,
    pub connected: bool,
    pub connects: u64,
    pub disconnects: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub failures: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Counters {
    connected: bool,
    connects: u64,
    disconnects: u64,
    messages_in: u64,
    messages_out: u64,
    bytes_in: u64,
    bytes_out: u64,
    failures: u64,
    last_activity: Option<DateTime<Utc>>,
}

/// Statistics collector for a single connector
#[derive(Debug)]
pub struct ConnectorStats {
    name: String,
    id: String,
    counters: Mutex<Counters>,
}

impl ConnectorStats {
    /// Create a collector with every counter at zero
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record a successful start
    pub fn add_connect(&self) {
        {
            let mut c = self.counters.lock();
            c.connects += 1;
            c.connected = true;
            c.last_activity = Some(Utc::now());
        }
        metrics::counter!("mq_bridge_connects_total", "connector" => self.name.clone())
            .increment(1);
        metrics::gauge!("mq_bridge_connected", "connector" => self.name.clone()).set(1.0);
    }

    /// Record a shutdown
    pub fn add_disconnect(&self) {
        {
            let mut c = self.counters.lock();
            c.disconnects += 1;
            c.connected = false;
            c.last_activity = Some(Utc::now());
        }
        metrics::counter!("mq_bridge_disconnects_total", "connector" => self.name.clone())
            .increment(1);
        metrics::gauge!("mq_bridge_connected", "connector" => self.name.clone()).set(0.0);
    }

    /// Record a message received from the source side
    pub fn add_message_in(&self, bytes: usize) {
        {
            let mut c = self.counters.lock();
            c.messages_in += 1;
            c.bytes_in += bytes as u64;
            c.last_activity = Some(Utc::now());
        }
        metrics::counter!("mq_bridge_messages_in_total", "connector" => self.name.clone())
            .increment(1);
        metrics::counter!("mq_bridge_bytes_in_total", "connector" => self.name.clone())
            .increment(bytes as u64);
    }

    /// Record a message written to the sink side
    pub fn add_message_out(&self, bytes: usize) {
        {
            let mut c = self.counters.lock();
            c.messages_out += 1;
            c.bytes_out += bytes as u64;
            c.last_activity = Some(Utc::now());
        }
        metrics::counter!("mq_bridge_messages_out_total", "connector" => self.name.clone())
            .increment(1);
        metrics::counter!("mq_bridge_bytes_out_total", "connector" => self.name.clone())
            .increment(bytes as u64);
    }

    /// Record a dropped message (malformed or undeliverable)
    pub fn add_failure(&self) {
        self.counters.lock().failures += 1;
        metrics::counter!("mq_bridge_failures_total", "connector" => self.name.clone())
            .increment(1);
    }

    /// Copy every counter under one lock acquisition
    pub fn snapshot(&self) -> StatsSnapshot {
        let c = self.counters.lock();
        StatsSnapshot {
            name: self.name.clone(),
            id: self.id.clone(),
            connected: c.connected,
            connects: c.connects,
            disconnects: c.disconnects,
            messages_in: c.messages_in,
            messages_out: c.messages_out,
            bytes_in: c.bytes_in,
            bytes_out: c.bytes_out,
            failures: c.failures,
            last_activity: c.last_activity,
        }
    }
}

/// Statistics for the whole bridge, as handed to a monitoring surface
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub start_time: DateTime<Utc>,
    pub uptime_secs: i64,
    /// Connector name to its counters
    pub connectors: BTreeMap<String, StatsSnapshot>,
}

impl BridgeStats {
    /// Build from per-connector snapshots, keyed by name
    ///
    /// Two connectors with the same name are told apart by their id.
    pub fn new(start_time: DateTime<Utc>, snapshots: Vec<StatsSnapshot>) -> Self {
        let mut connectors = BTreeMap::new();
        for snapshot in snapshots {
            let key = if connectors.contains_key(&snapshot.name) {
                format!("{} [{}]", snapshot.name, snapshot.id)
            } else {
                snapshot.name.clone()
            };
            connectors.insert(key, snapshot);
        }

        Self {
            start_time,
            uptime_secs: (Utc::now() - start_time).num_seconds(),
            connectors,
        }
    }

    /// Sum of messages received across connectors
    pub fn total_messages_in(&self) -> u64 {
        self.connectors.values().map(|s| s.messages_in).sum()
    }

    /// Sum of messages written across connectors
    pub fn total_messages_out(&self) -> u64 {
        self.connectors.values().map(|s| s.messages_out).sum()
    }

    /// Number of connectors currently connected
    pub fn connected_count(&self) -> usize {
        self.connectors.values().filter(|s| s.connected).count()
    }

    /// Render as JSON for a monitoring endpoint
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_initial_zeros() {
        let stats = ConnectorStats::new("Queue:Q1 to NATS:orders", "c1");
        let snap = stats.snapshot();

        assert_eq!(snap.name, "Queue:Q1 to NATS:orders");
        assert_eq!(snap.id, "c1");
        assert!(!snap.connected);
        assert_eq!(snap.connects, 0);
        assert_eq!(snap.messages_in, 0);
        assert!(snap.last_activity.is_none());
    }

    #[test]
    fn test_counters() {
        let stats = ConnectorStats::new("c", "1");
        stats.add_connect();
        stats.add_message_in(10);
        stats.add_message_in(5);
        stats.add_message_out(15);
        stats.add_failure();

        let snap = stats.snapshot();
        assert!(snap.connected);
        assert_eq!(snap.connects, 1);
        assert_eq!(snap.messages_in, 2);
        assert_eq!(snap.bytes_in, 15);
        assert_eq!(snap.messages_out, 1);
        assert_eq!(snap.bytes_out, 15);
        assert_eq!(snap.failures, 1);
        assert!(snap.last_activity.is_some());

        stats.add_disconnect();
        let snap = stats.snapshot();
        assert!(!snap.connected);
        assert_eq!(snap.disconnects, 1);
    }

    #[test]
    fn test_snapshot_is_never_torn() {
        let stats = Arc::new(ConnectorStats::new("c", "1"));

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.add_message_in(3);
                    }
                })
            })
            .collect();

        for _ in 0..1000 {
            let snap = stats.snapshot();
            assert_eq!(snap.bytes_in, snap.messages_in * 3);
        }

        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(stats.snapshot().messages_in, 4000);
    }

    #[test]
    fn test_bridge_stats_keys_and_totals() {
        let a = ConnectorStats::new("NATS:a to Queue:Q", "1");
        let b = ConnectorStats::new("NATS:a to Queue:Q", "2");
        a.add_connect();
        a.add_message_in(1);
        b.add_message_out(1);

        let bridge = BridgeStats::new(Utc::now(), vec![a.snapshot(), b.snapshot()]);
        assert_eq!(bridge.connectors.len(), 2);
        assert!(bridge.connectors.contains_key("NATS:a to Queue:Q"));
        assert!(bridge.connectors.contains_key("NATS:a to Queue:Q [2]"));
        assert_eq!(bridge.total_messages_in(), 1);
        assert_eq!(bridge.total_messages_out(), 1);
        assert_eq!(bridge.connected_count(), 1);

        let json: serde_json::Value = serde_json::from_str(&bridge.to_json().unwrap()).unwrap();
        assert_eq!(json["connectors"]["NATS:a to Queue:Q"]["messages_in"], 1);
    }
}
