mod common;

use common::{eventually, server, stats_for};
use mq_bridge_core::testing::MemoryBackends;
use mq_bridge_core::{ConnectorConfig, ConnectorType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const PAYLOAD: &[u8] = b"0123456789";
const MESSAGES: usize = 1000;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stats_stay_consistent_under_load() -> anyhow::Result<()> {
    let backends = MemoryBackends::default();
    let server = Arc::new(server(
        &backends,
        vec![ConnectorConfig::new(ConnectorType::Nats2Queue)
            .with_subject("load")
            .with_queue("DEV.QUEUE.1")
            .with_exclude_headers(true)],
    ));
    server.start().await?;

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let server = server.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut reads = 0usize;
            while !done.load(Ordering::SeqCst) {
                for snapshot in server.safe_stats().connectors.values() {
                    assert_eq!(snapshot.bytes_in, snapshot.messages_in * PAYLOAD.len() as u64);
                    assert_eq!(
                        snapshot.bytes_out,
                        snapshot.messages_out * PAYLOAD.len() as u64
                    );
                    let open = snapshot.connects - snapshot.disconnects;
                    assert!(open <= 1, "connects {} disconnects {}", snapshot.connects, snapshot.disconnects);
                }
                reads += 1;
                tokio::task::yield_now().await;
            }
            reads
        })
    };

    let publishers: Vec<_> = (0..MESSAGES)
        .map(|_| {
            let nats = backends.nats.clone();
            tokio::spawn(async move { nats.publish("load", PAYLOAD).await })
        })
        .collect();
    for publisher in publishers {
        publisher.await?;
    }

    let name = "NATS:load to Queue:DEV.QUEUE.1";
    eventually("every message to be relayed", || {
        stats_for(&server, name).messages_out == MESSAGES as u64
    })
    .await?;

    done.store(true, Ordering::SeqCst);
    let reads = reader.await?;
    assert!(reads > 0);

    let stats = stats_for(&server, name);
    assert_eq!(stats.messages_in, MESSAGES as u64);
    assert_eq!(stats.failures, 0);
    assert_eq!(backends.mq.depth("DEV.QUEUE.1"), MESSAGES);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connector_restarts() -> anyhow::Result<()> {
    let backends = MemoryBackends::default();
    let server = server(
        &backends,
        vec![ConnectorConfig::new(ConnectorType::Nats2Queue)
            .with_subject("restart")
            .with_queue("DEV.QUEUE.1")],
    );
    server.start().await?;
    let connector = server.connectors()[0].clone();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let connector = connector.clone();
            tokio::spawn(async move {
                if i % 2 == 0 {
                    connector.shutdown().await
                } else {
                    connector.start().await
                }
            })
        })
        .collect();
    for task in tasks {
        task.await??;
    }

    // whatever the interleaving, at most one session is held
    assert!(backends.mq.open_sessions() <= 1);
    assert!(backends.nats.subscriber_count("restart") <= 1);
    let stats = connector.stats();
    assert!(stats.connects - stats.disconnects <= 1);

    server.stop().await;
    assert_eq!(backends.mq.open_sessions(), 0);
    Ok(())
}
