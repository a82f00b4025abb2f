use crate::backend::{MqDelivery, MqObject, OpenMode, QueueManagerConnector, QueueManagerSession};
use crate::config::MqConfig;
use crate::metadata::{fixed_width, MessageDescriptor, ACCOUNTING_TOKEN_LENGTH, ID_LENGTH};
use crate::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Timelike, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Default)]
struct MemoryQueue {
    messages: Mutex<VecDeque<MqDelivery>>,
    notify: Notify,
}

impl MemoryQueue {
    fn push(&self, delivery: MqDelivery) {
        self.messages.lock().push_back(delivery);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<MqDelivery> {
        self.messages.lock().pop_front()
    }

    async fn pop_wait(&self, wait: Duration) -> Option<MqDelivery> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(delivery) = self.pop() {
                return Some(delivery);
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.pop();
            }
        }
    }

    fn len(&self) -> usize {
        self.messages.lock().len()
    }
}

struct QueueManagerState {
    name: String,
    available: AtomicBool,
    failing_opens: Mutex<HashSet<String>>,
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
    topics: Mutex<HashMap<String, Vec<(u64, Arc<MemoryQueue>)>>>,
    next_id: AtomicU64,
    open_sessions: AtomicUsize,
    open_objects: AtomicUsize,
}

impl QueueManagerState {
    fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        self.queues
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn ensure_available(&self) -> ConnectorResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConnectorError::unavailable(format!(
                "queue manager {} is not available",
                self.name
            )))
        }
    }

    fn check_open(&self, name: &str) -> ConnectorResult<()> {
        self.ensure_available()?;
        if self.failing_opens.lock().remove(name) {
            return Err(ConnectorError::resource(format!(
                "MQRC_UNKNOWN_OBJECT_NAME: {}",
                name
            )));
        }
        Ok(())
    }

    /// Fill in what a queue manager assigns on put
    fn stamp(descriptor: &MessageDescriptor, body: &[u8]) -> MqDelivery {
        let now = Utc::now();
        let mut md = descriptor.clone();

        md.put_date = now.format("%Y%m%d").to_string();
        md.put_time = format!(
            "{}{:02}",
            now.format("%H%M%S"),
            now.nanosecond() / 10_000_000 % 100
        );
        md.backout_count = 0;

        md.msg_id = fixed_width(&md.msg_id, ID_LENGTH);
        if md.has_empty_msg_id() {
            md.msg_id = fixed_width(Uuid::new_v4().as_bytes(), ID_LENGTH);
        }
        md.correl_id = fixed_width(&md.correl_id, ID_LENGTH);
        md.group_id = fixed_width(&md.group_id, ID_LENGTH);
        md.accounting_token = fixed_width(&md.accounting_token, ACCOUNTING_TOKEN_LENGTH);

        MqDelivery {
            descriptor: md,
            body: Bytes::copy_from_slice(body),
        }
    }

    fn put_queue(&self, queue: &str, descriptor: &MessageDescriptor, body: &[u8]) {
        self.queue(queue).push(Self::stamp(descriptor, body));
    }

    fn publish(&self, topic: &str, descriptor: &MessageDescriptor, body: &[u8]) {
        let subscribers: Vec<Arc<MemoryQueue>> = self
            .topics
            .lock()
            .get(topic)
            .map(|subs| subs.iter().map(|(_, q)| q.clone()).collect())
            .unwrap_or_default();

        let delivery = Self::stamp(descriptor, body);
        for subscriber in subscribers {
            subscriber.push(delivery.clone());
        }
    }

    fn subscribe(self: &Arc<Self>, topic: &str) -> Arc<MemoryObject> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let queue = Arc::new(MemoryQueue::default());
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push((id, queue.clone()));

        MemoryObject::open(
            self,
            topic,
            Target::Subscription {
                topic: topic.to_string(),
                id,
                queue,
            },
        )
    }
}

/// In-memory queue manager with queues and pub/sub topics
#[derive(Clone)]
pub struct MemoryQueueManager {
    state: Arc<QueueManagerState>,
}

impl MemoryQueueManager {
    pub fn new(name: &str) -> Self {
        Self {
            state: Arc::new(QueueManagerState {
                name: name.to_string(),
                available: AtomicBool::new(true),
                failing_opens: Mutex::new(HashSet::new()),
                queues: Mutex::new(HashMap::new()),
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                open_sessions: AtomicUsize::new(0),
                open_objects: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Take the queue manager down or bring it back
    ///
    /// While down, connects are refused and existing sessions report
    /// themselves disconnected.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Make the next open of `object` fail as an unknown object
    pub fn fail_next_open(&self, object: &str) {
        self.state.failing_opens.lock().insert(object.to_string());
    }

    /// Put a message as another MQ application would
    pub fn put(&self, queue: &str, descriptor: &MessageDescriptor, body: &[u8]) {
        self.state.put_queue(queue, descriptor, body);
    }

    /// Publish on a topic as another MQ application would
    pub fn publish(&self, topic: &str, descriptor: &MessageDescriptor, body: &[u8]) {
        self.state.publish(topic, descriptor, body);
    }

    /// Destructively read the next message, if any
    pub fn get(&self, queue: &str) -> Option<MqDelivery> {
        self.state.queue(queue).pop()
    }

    /// Wait up to `wait` for the next message
    pub async fn get_wait(&self, queue: &str, wait: Duration) -> Option<MqDelivery> {
        self.state.queue(queue).pop_wait(wait).await
    }

    /// Subscribe to a topic as another MQ application would
    pub fn subscribe(&self, topic: &str) -> Arc<dyn MqObject> {
        self.state.subscribe(topic)
    }

    pub fn depth(&self, queue: &str) -> usize {
        self.state.queue(queue).len()
    }

    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    /// Queues, topics and subscriptions opened and not yet closed
    pub fn open_objects(&self) -> usize {
        self.state.open_objects.load(Ordering::SeqCst)
    }

    pub fn topic_subscribers(&self, topic: &str) -> usize {
        self.state.topics.lock().get(topic).map_or(0, Vec::len)
    }
}

#[async_trait]
impl QueueManagerConnector for MemoryQueueManager {
    async fn connect(&self, config: &MqConfig) -> ConnectorResult<Arc<dyn QueueManagerSession>> {
        self.state.ensure_available()?;
        if !config.queue_manager.is_empty() && config.queue_manager != self.state.name {
            return Err(ConnectorError::resource(format!(
                "MQRC_Q_MGR_NAME_ERROR: {}",
                config.queue_manager
            )));
        }

        self.state.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemorySession {
            state: self.state.clone(),
            connected: AtomicBool::new(true),
        }))
    }
}

struct MemorySession {
    state: Arc<QueueManagerState>,
    connected: AtomicBool,
}

impl MemorySession {
    fn ensure_connected(&self) -> ConnectorResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            self.state.ensure_available()
        } else {
            Err(ConnectorError::unavailable("session is disconnected"))
        }
    }
}

#[async_trait]
impl QueueManagerSession for MemorySession {
    fn queue_manager_name(&self) -> String {
        self.state.name.clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.state.available.load(Ordering::SeqCst)
    }

    async fn open_queue(&self, name: &str, _mode: OpenMode) -> ConnectorResult<Arc<dyn MqObject>> {
        self.ensure_connected()?;
        self.state.check_open(name)?;
        Ok(MemoryObject::open(
            &self.state,
            name,
            Target::Queue(self.state.queue(name)),
        ))
    }

    async fn open_topic(&self, name: &str) -> ConnectorResult<Arc<dyn MqObject>> {
        self.ensure_connected()?;
        self.state.check_open(name)?;
        Ok(MemoryObject::open(
            &self.state,
            name,
            Target::Topic(name.to_string()),
        ))
    }

    async fn subscribe_topic(&self, name: &str) -> ConnectorResult<Arc<dyn MqObject>> {
        self.ensure_connected()?;
        self.state.check_open(name)?;
        Ok(self.state.subscribe(name))
    }

    async fn disconnect(&self) -> ConnectorResult<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

enum Target {
    Queue(Arc<MemoryQueue>),
    Topic(String),
    Subscription {
        topic: String,
        id: u64,
        queue: Arc<MemoryQueue>,
    },
}

struct MemoryObject {
    name: String,
    state: Arc<QueueManagerState>,
    target: Target,
    closed: AtomicBool,
}

impl MemoryObject {
    fn open(state: &Arc<QueueManagerState>, name: &str, target: Target) -> Arc<Self> {
        state.open_objects.fetch_add(1, Ordering::SeqCst);
        Arc::new(Self {
            name: name.to_string(),
            state: state.clone(),
            target,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> ConnectorResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectorError::resource(format!(
                "MQRC_HOBJ_ERROR: {} is closed",
                self.name
            )));
        }
        self.state.ensure_available()
    }
}

#[async_trait]
impl MqObject for MemoryObject {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, descriptor: &MessageDescriptor, body: &[u8]) -> ConnectorResult<()> {
        self.ensure_open()?;
        match &self.target {
            Target::Queue(queue) => queue.push(QueueManagerState::stamp(descriptor, body)),
            Target::Topic(topic) => self.state.publish(topic, descriptor, body),
            Target::Subscription { .. } => {
                return Err(ConnectorError::resource("cannot put to a subscription"))
            }
        }
        Ok(())
    }

    async fn get(&self, wait: Duration) -> ConnectorResult<Option<MqDelivery>> {
        self.ensure_open()?;
        match &self.target {
            Target::Queue(queue) | Target::Subscription { queue, .. } => {
                Ok(queue.pop_wait(wait).await)
            }
            Target::Topic(_) => Err(ConnectorError::resource("cannot get from a topic")),
        }
    }

    async fn close(&self) -> ConnectorResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.state.open_objects.fetch_sub(1, Ordering::SeqCst);

        if let Target::Subscription { topic, id, .. } = &self.target {
            if let Some(subs) = self.state.topics.lock().get_mut(topic) {
                subs.retain(|(sub_id, _)| sub_id != id);
            }
        }
        Ok(())
    }
}
