mod common;

use bytes::Bytes;
use common::{eventually, recv, server, stats_for, WAIT};
use mq_bridge_core::backend::MqObject;
use mq_bridge_core::message::{from_bus_format, to_bus_format};
use mq_bridge_core::testing::MemoryBackends;
use mq_bridge_core::{
    BridgeHeader, BridgeMessage, ConnectorConfig, ConnectorType, MessageDescriptor,
};
use std::time::Duration;

fn nats_to_queue(subject: &str, queue: &str) -> ConnectorConfig {
    ConnectorConfig::new(ConnectorType::Nats2Queue)
        .with_subject(subject)
        .with_queue(queue)
}

fn queue_to_nats(queue: &str, subject: &str) -> ConnectorConfig {
    ConnectorConfig::new(ConnectorType::Queue2Nats)
        .with_queue(queue)
        .with_subject(subject)
}

#[tokio::test]
async fn test_simple_send_and_receive_on_queue_to_nats() -> anyhow::Result<()> {
    let backends = MemoryBackends::default();
    let server = server(
        &backends,
        vec![queue_to_nats("DEV.QUEUE.1", "test").with_exclude_headers(true)],
    );
    let mut rx = backends.nats.subscribe("test");
    server.start().await?;

    backends
        .mq
        .put("DEV.QUEUE.1", &MessageDescriptor::default(), b"hello world");

    let msg = recv(&mut rx).await?;
    assert_eq!(msg.payload.as_ref(), b"hello world");
    assert!(msg.reply.is_none());

    let stats = stats_for(&server, "Queue:DEV.QUEUE.1 to NATS:test");
    assert_eq!(stats.messages_in, 1);
    assert_eq!(stats.messages_out, 1);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_simple_send_and_receive_on_nats_to_queue() -> anyhow::Result<()> {
    let backends = MemoryBackends::default();
    let server = server(
        &backends,
        vec![nats_to_queue("test", "DEV.QUEUE.1").with_exclude_headers(true)],
    );
    server.start().await?;

    backends.nats.publish("test", "hello world").await;

    let delivery = backends
        .mq
        .get_wait("DEV.QUEUE.1", WAIT)
        .await
        .expect("message on queue");
    assert_eq!(delivery.body.as_ref(), b"hello world");

    // nothing but the body crossed, so the descriptor is a fresh one
    let fresh = MessageDescriptor::default();
    let md = &delivery.descriptor;
    assert_eq!(md.version, fresh.version);
    assert_eq!(md.expiry, fresh.expiry);
    assert_eq!(md.original_length, fresh.original_length);
    assert_eq!(md.priority, fresh.priority);
    assert_eq!(md.correl_id, fresh.correl_id);
    assert!(md.reply_to_q.is_empty());

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_headers_cross_the_bridge() -> anyhow::Result<()> {
    let backends = MemoryBackends::default();
    let server = server(&backends, vec![queue_to_nats("DEV.QUEUE.1", "test")]);
    let mut rx = backends.nats.subscribe("test");
    server.start().await?;

    let mut md = MessageDescriptor::default();
    md.priority = 9;
    md.correl_id = (1..=24).collect();
    md.expiry = 600;
    backends.mq.put("DEV.QUEUE.1", &md, b"hello world");

    let msg = recv(&mut rx).await?;
    let translated = from_bus_format(&msg.payload, false)?;
    assert_eq!(translated.body.as_ref(), b"hello world");
    assert_eq!(translated.descriptor.priority, 9);
    assert_eq!(translated.descriptor.correl_id, md.correl_id);
    // assigned again by the next put
    assert_eq!(translated.descriptor.expiry, MessageDescriptor::default().expiry);
    assert!(translated.descriptor.put_date.is_empty());

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_bus_headers_reach_the_queue() -> anyhow::Result<()> {
    let backends = MemoryBackends::default();
    let server = server(&backends, vec![nats_to_queue("test", "DEV.QUEUE.1")]);
    server.start().await?;

    let mut md = MessageDescriptor::default();
    md.priority = 4;
    md.correl_id = vec![7; 24];
    md.put_appl_name = "orders-service".to_string();
    let wire = to_bus_format(&md, b"hello world", false)?;
    backends.nats.publish("test", wire).await;

    let delivery = backends
        .mq
        .get_wait("DEV.QUEUE.1", WAIT)
        .await
        .expect("message on queue");
    assert_eq!(delivery.body.as_ref(), b"hello world");
    assert_eq!(delivery.descriptor.priority, 4);
    assert_eq!(delivery.descriptor.correl_id, vec![7; 24]);
    assert_eq!(delivery.descriptor.put_appl_name, "orders-service");
    assert!(!delivery.descriptor.put_date.is_empty());

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_stan_round_trip() -> anyhow::Result<()> {
    let backends = MemoryBackends::default();
    let server = server(
        &backends,
        vec![
            ConnectorConfig::new(ConnectorType::Queue2Stan)
                .with_queue("DEV.QUEUE.1")
                .with_channel("outbound"),
            ConnectorConfig::new(ConnectorType::Stan2Queue)
                .with_channel("inbound")
                .with_queue("DEV.QUEUE.2"),
        ],
    );
    let mut outbound = backends.streaming.subscribe("outbound").await;
    server.start().await?;

    backends
        .mq
        .put("DEV.QUEUE.1", &MessageDescriptor::default(), b"to stan");
    let msg = recv(&mut outbound).await?;
    assert_eq!(from_bus_format(&msg.payload, false)?.body.as_ref(), b"to stan");
    assert_eq!(msg.sequence, 1);

    let wire = to_bus_format(&MessageDescriptor::default(), b"from stan", false)?;
    backends.streaming.publish("inbound", wire).await;
    let delivery = backends
        .mq
        .get_wait("DEV.QUEUE.2", WAIT)
        .await
        .expect("message on queue");
    assert_eq!(delivery.body.as_ref(), b"from stan");

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_topic_connectors() -> anyhow::Result<()> {
    let backends = MemoryBackends::default();
    let server = server(
        &backends,
        vec![
            ConnectorConfig::new(ConnectorType::Topic2Nats)
                .with_topic("dev/news")
                .with_subject("news"),
            ConnectorConfig::new(ConnectorType::Nats2Topic)
                .with_subject("alerts")
                .with_topic("dev/alerts"),
            ConnectorConfig::new(ConnectorType::Stan2Topic)
                .with_channel("audit")
                .with_topic("dev/audit"),
        ],
    );
    let mut news = backends.nats.subscribe("news");
    let alerts = backends.mq.subscribe("dev/alerts");
    let audit = backends.mq.subscribe("dev/audit");
    server.start().await?;
    assert_eq!(backends.mq.topic_subscribers("dev/news"), 1);

    backends
        .mq
        .publish("dev/news", &MessageDescriptor::default(), b"extra");
    let msg = recv(&mut news).await?;
    assert_eq!(from_bus_format(&msg.payload, false)?.body.as_ref(), b"extra");

    let wire = to_bus_format(&MessageDescriptor::default(), b"fire", false)?;
    backends.nats.publish("alerts", wire.clone()).await;
    let delivery = alerts.get(WAIT).await?.expect("alert on topic");
    assert_eq!(delivery.body.as_ref(), b"fire");

    backends.streaming.publish("audit", wire).await;
    let delivery = audit.get(WAIT).await?.expect("audit on topic");
    assert_eq!(delivery.body.as_ref(), b"fire");

    server.stop().await;
    assert_eq!(backends.mq.topic_subscribers("dev/news"), 0);
    Ok(())
}

#[tokio::test]
async fn test_nats_request_reaches_queue_with_reply_queue() -> anyhow::Result<()> {
    let backends = MemoryBackends::new("QM1");
    let server = server(
        &backends,
        vec![
            nats_to_queue("requests", "DEV.QUEUE.1").with_exclude_headers(true),
            queue_to_nats("DEV.QUEUE.2", "responses").with_exclude_headers(true),
        ],
    );
    let mut responses = backends.nats.subscribe("responses");
    server.start().await?;

    backends.nats.request("requests", "responses", "ping").await;

    let request = backends
        .mq
        .get_wait("DEV.QUEUE.1", WAIT)
        .await
        .expect("request on queue");
    assert_eq!(request.body.as_ref(), b"ping");
    assert_eq!(request.descriptor.reply_to_q, "DEV.QUEUE.2");
    assert_eq!(request.descriptor.reply_to_q_mgr, "QM1");

    // the MQ application answers on the reply queue
    backends.mq.put(
        &request.descriptor.reply_to_q,
        &MessageDescriptor::default(),
        b"pong",
    );
    let response = recv(&mut responses).await?;
    assert_eq!(response.payload.as_ref(), b"pong");

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_queue_request_carries_reply_subject() -> anyhow::Result<()> {
    let backends = MemoryBackends::default();
    let server = server(
        &backends,
        vec![
            queue_to_nats("DEV.QUEUE.3", "requests"),
            nats_to_queue("responses", "DEV.QUEUE.4"),
        ],
    );
    let mut requests = backends.nats.subscribe("requests");
    server.start().await?;

    let mut md = MessageDescriptor::default();
    md.reply_to_q = "DEV.QUEUE.4".to_string();
    backends.mq.put("DEV.QUEUE.3", &md, b"ping");

    let request = recv(&mut requests).await?;
    assert_eq!(request.reply.as_deref(), Some("responses"));

    // a queue with no connector behind it gets no reply subject
    md.reply_to_q = "DEV.QUEUE.9".to_string();
    backends.mq.put("DEV.QUEUE.3", &md, b"ping");
    let request = recv(&mut requests).await?;
    assert!(request.reply.is_none());

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_stan_request_reply() -> anyhow::Result<()> {
    let backends = MemoryBackends::new("QM1");
    let server = server(
        &backends,
        vec![
            ConnectorConfig::new(ConnectorType::Stan2Queue)
                .with_channel("orders")
                .with_queue("DEV.QUEUE.1"),
            ConnectorConfig::new(ConnectorType::Queue2Stan)
                .with_queue("DEV.QUEUE.2")
                .with_channel("replies"),
        ],
    );
    let mut replies = backends.streaming.subscribe("replies").await;
    server.start().await?;

    let header = BridgeHeader {
        reply_to_channel: "replies".to_string(),
        ..BridgeHeader::default()
    };
    let wire = BridgeMessage::new(Bytes::from_static(b"order"))
        .with_header(header)
        .encode()?;
    backends.streaming.publish("orders", wire).await;

    let request = backends
        .mq
        .get_wait("DEV.QUEUE.1", WAIT)
        .await
        .expect("order on queue");
    assert_eq!(request.descriptor.reply_to_q, "DEV.QUEUE.2");
    assert_eq!(request.descriptor.reply_to_q_mgr, "QM1");
    let fresh = MessageDescriptor::default();
    assert_eq!(request.descriptor.priority, fresh.priority);
    assert_eq!(request.descriptor.msg_seq_number, fresh.msg_seq_number);
    assert_eq!(request.descriptor.original_length, fresh.original_length);

    // a reply asking for its own reply on the orders queue
    let mut md = MessageDescriptor::default();
    md.reply_to_q = "DEV.QUEUE.1".to_string();
    backends.mq.put("DEV.QUEUE.2", &md, b"confirmed");

    let reply = recv(&mut replies).await?;
    let translated = from_bus_format(&reply.payload, false)?;
    assert_eq!(translated.body.as_ref(), b"confirmed");
    assert_eq!(translated.reply_to_channel.as_deref(), Some("orders"));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_malformed_message_is_dropped_and_counted() -> anyhow::Result<()> {
    let backends = MemoryBackends::default();
    let server = server(&backends, vec![nats_to_queue("test", "DEV.QUEUE.1")]);
    server.start().await?;
    let name = "NATS:test to Queue:DEV.QUEUE.1";

    backends.nats.publish("test", "not an envelope").await;
    assert_eq!(backends.mq.depth("DEV.QUEUE.1"), 0);

    let stats = stats_for(&server, name);
    assert_eq!(stats.messages_in, 1);
    assert_eq!(stats.messages_out, 0);
    assert_eq!(stats.failures, 1);
    assert!(stats.connected);

    // the connector keeps relaying
    let wire = to_bus_format(&MessageDescriptor::default(), b"fine", false)?;
    backends.nats.publish("test", wire).await;
    assert_eq!(backends.mq.depth("DEV.QUEUE.1"), 1);
    assert_eq!(stats_for(&server, name).messages_out, 1);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_messages_wait_on_queue_while_nats_is_down() -> anyhow::Result<()> {
    let backends = MemoryBackends::default();
    let mut config = common::bridge_config(vec![queue_to_nats("DEV.QUEUE.1", "test")]);
    // keep the supervisor out of the way
    config.reconnect_interval_ms = 60_000;
    let server = mq_bridge_core::BridgeServer::new(config, backends.backends());
    server.start().await?;

    backends.nats.set_available(false);
    // let the get already in progress time out
    tokio::time::sleep(Duration::from_millis(400)).await;
    backends
        .mq
        .put("DEV.QUEUE.1", &MessageDescriptor::default(), b"held");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(backends.mq.depth("DEV.QUEUE.1"), 1);

    server.stop().await;
    eventually("poller to stop", || backends.mq.open_objects() == 0).await?;
    Ok(())
}
