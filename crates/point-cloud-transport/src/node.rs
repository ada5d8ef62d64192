//! In-process topic bus and the node handle used to reach it.
//!
//! A [`NodeHandle`] resolves names relative to its namespace and gives access
//! to a bus shared by every handle derived from the same root. Publishers
//! push messages into per-subscription queues; callbacks run when the owner
//! of the bus calls [`NodeHandle::spin_once`] or [`NodeHandle::spin`].
//!
//! # Example
//!
//! ```
//! use point_cloud_transport::{NodeHandle, PeerCallbacks, PointCloud2};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! let nh = NodeHandle::new("talker");
//! let received = Arc::new(AtomicUsize::new(0));
//! let counter = received.clone();
//!
//! let _sub = nh.subscribe::<PointCloud2, _>("points", 4, move |_cloud| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! })?;
//! let publisher = nh.advertise::<PointCloud2>("points", 4, false, PeerCallbacks::default())?;
//!
//! publisher.publish(Arc::new(PointCloud2::default()));
//! assert_eq!(nh.spin_once(), 1);
//! assert_eq!(received.load(Ordering::SeqCst), 1);
//! # Ok::<(), point_cloud_transport::BusError>(())
//! ```

use crate::message::Message;
use indexmap::IndexMap;
use serde::{Serialize, de::DeserializeOwned};
use std::{
    any::{Any, TypeId},
    future::Future,
    marker::PhantomData,
    sync::{
        Arc, Mutex, MutexGuard, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

type Erased = Arc<dyn Any + Send + Sync>;
type ErasedCallback = Arc<dyn Fn(Erased) + Send + Sync>;
type LinkCallback = Arc<dyn Fn(&PeerLink) + Send + Sync>;

/// Callback invoked with a publisher addressing a single subscriber.
pub type PeerCallback<M> = Arc<dyn Fn(&SinglePeer<M>) + Send + Sync>;

/// Errors raised by the topic bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("invalid name '{0}'")]
    InvalidName(String),

    #[error("topic '{topic}' carries {existing}, cannot use it for {requested}")]
    TypeMismatch {
        topic: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("parameter '{name}' has an unexpected type: {source}")]
    Parameter {
        name: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Connection callbacks passed to [`NodeHandle::advertise`].
pub struct PeerCallbacks<M> {
    /// Invoked once per subscriber that connects to the topic.
    pub connect: Option<PeerCallback<M>>,
    /// Invoked once per subscriber that leaves the topic.
    pub disconnect: Option<PeerCallback<M>>,
}

impl<M> Default for PeerCallbacks<M> {
    fn default() -> Self {
        Self {
            connect: None,
            disconnect: None,
        }
    }
}

impl<M> Clone for PeerCallbacks<M> {
    fn clone(&self) -> Self {
        Self {
            connect: self.connect.clone(),
            disconnect: self.disconnect.clone(),
        }
    }
}

/// A subscription queue. When bounded and full, the oldest message is
/// dropped to make room.
#[derive(Clone)]
struct Queue {
    tx: flume::Sender<Erased>,
    rx: flume::Receiver<Erased>,
}

impl Queue {
    fn new(size: usize) -> Self {
        let (tx, rx) = if size == 0 {
            flume::unbounded()
        } else {
            flume::bounded(size)
        };
        Self { tx, rx }
    }

    fn push(&self, mut message: Erased) {
        loop {
            match self.tx.try_send(message) {
                Ok(()) => return,
                Err(flume::TrySendError::Full(rejected)) => {
                    let _ = self.rx.try_recv();
                    trace!("Subscription queue full, dropped oldest message");
                    message = rejected;
                }
                Err(flume::TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

#[derive(Clone)]
struct PeerLink {
    topic: String,
    subscriber_name: String,
    queue: Queue,
    bus: Weak<Bus>,
}

struct PublisherSlot {
    id: u64,
    latch: bool,
    latched: Option<Erased>,
    connect: Option<LinkCallback>,
    disconnect: Option<LinkCallback>,
}

struct SubscriberSlot {
    id: u64,
    caller_id: String,
    queue: Queue,
    callback: ErasedCallback,
}

struct TopicEntry {
    type_id: TypeId,
    type_name: &'static str,
    publishers: Vec<PublisherSlot>,
    subscribers: Vec<SubscriberSlot>,
}

impl TopicEntry {
    fn new<M: Message>() -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            type_name: M::TYPE_NAME,
            publishers: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    fn is_unused(&self) -> bool {
        self.publishers.is_empty() && self.subscribers.is_empty()
    }
}

#[derive(Default)]
struct Bus {
    topics: Mutex<IndexMap<String, TopicEntry>>,
    params: Mutex<IndexMap<String, serde_yaml::Value>>,
    next_id: AtomicU64,
}

impl Bus {
    fn topics(&self) -> MutexGuard<'_, IndexMap<String, TopicEntry>> {
        self.topics.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn params(&self) -> MutexGuard<'_, IndexMap<String, serde_yaml::Value>> {
        self.params.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn num_subscribers(&self, topic: &str) -> usize {
        self.topics()
            .get(topic)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    fn num_publishers(&self, topic: &str) -> usize {
        self.topics()
            .get(topic)
            .map(|entry| entry.publishers.len())
            .unwrap_or(0)
    }

    /// Look up or create the entry for `topic`, rejecting type changes.
    fn entry<'a, M: Message>(
        topics: &'a mut IndexMap<String, TopicEntry>,
        topic: &str,
    ) -> Result<&'a mut TopicEntry, BusError> {
        let entry = topics
            .entry(topic.to_string())
            .or_insert_with(TopicEntry::new::<M>);

        if entry.type_id != TypeId::of::<M>() {
            return Err(BusError::TypeMismatch {
                topic: topic.to_string(),
                existing: entry.type_name,
                requested: M::TYPE_NAME,
            });
        }

        Ok(entry)
    }
}

/// Handle to a namespace on the topic bus.
///
/// Cloning the handle or deriving children shares the underlying bus.
#[derive(Clone)]
pub struct NodeHandle {
    bus: Arc<Bus>,
    node_name: String,
    namespace: String,
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("node_name", &self.node_name)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl NodeHandle {
    /// Create a node on a fresh bus. The node lives in the namespace that
    /// contains it, e.g. `/sensors/lidar` lives in `/sensors`.
    pub fn new(node_name: &str) -> Self {
        let node_name = clean_name(&format!("/{node_name}"));
        let namespace = match node_name.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(pos) => node_name[..pos].to_string(),
        };

        Self {
            bus: Arc::new(Bus::default()),
            node_name,
            namespace,
        }
    }

    /// A handle on the same bus in a nested namespace.
    pub fn child(&self, namespace: &str) -> Result<Self, BusError> {
        Ok(Self {
            bus: self.bus.clone(),
            node_name: self.node_name.clone(),
            namespace: self.resolve_name(namespace)?,
        })
    }

    /// A handle whose namespace is the node's private namespace (`~`).
    pub fn private(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            node_name: self.node_name.clone(),
            namespace: self.node_name.clone(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Resolve a graph name against this handle.
    ///
    /// Absolute names are kept, `~name` is placed under the node name and
    /// relative names are placed under the handle's namespace.
    pub fn resolve_name(&self, name: &str) -> Result<String, BusError> {
        validate_name(name)?;

        let resolved = if let Some(private) = name.strip_prefix('~') {
            format!("{}/{}", self.node_name, private)
        } else if name.starts_with('/') {
            name.to_string()
        } else {
            format!("{}/{}", self.namespace, name)
        };

        Ok(clean_name(&resolved))
    }

    pub fn set_param<T: Serialize>(&self, name: &str, value: T) -> Result<(), BusError> {
        let key = self.resolve_name(name)?;
        let value = serde_yaml::to_value(value).map_err(|source| BusError::Parameter {
            name: key.clone(),
            source,
        })?;
        self.bus.params().insert(key, value);
        Ok(())
    }

    /// Read a parameter. Returns `Ok(None)` when it is not set.
    pub fn get_param<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, BusError> {
        let key = self.resolve_name(name)?;
        let Some(value) = self.bus.params().get(&key).cloned() else {
            return Ok(None);
        };

        serde_yaml::from_value(value)
            .map(Some)
            .map_err(|source| BusError::Parameter { name: key, source })
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.resolve_name(name)
            .map(|key| self.bus.params().contains_key(&key))
            .unwrap_or(false)
    }

    pub fn delete_param(&self, name: &str) -> bool {
        self.resolve_name(name)
            .map(|key| self.bus.params().shift_remove(&key).is_some())
            .unwrap_or(false)
    }

    /// Advertise a topic carrying messages of type `M`.
    ///
    /// The connect callback also fires for subscribers that were already
    /// present when the publisher is created.
    pub fn advertise<M: Message>(
        &self,
        topic: &str,
        queue_size: usize,
        latch: bool,
        callbacks: PeerCallbacks<M>,
    ) -> Result<TopicPublisher<M>, BusError> {
        let topic = self.resolve_topic(topic)?;
        let connect = callbacks.connect.map(erase_peer_callback);
        let disconnect = callbacks.disconnect.map(erase_peer_callback);

        let (id, existing) = {
            let mut topics = self.bus.topics();
            let entry = Bus::entry::<M>(&mut topics, &topic)?;
            let id = self.bus.next_id();
            let existing: Vec<_> = entry
                .subscribers
                .iter()
                .map(|sub| self.link(&topic, sub))
                .collect();

            entry.publishers.push(PublisherSlot {
                id,
                latch,
                latched: None,
                connect: connect.clone(),
                disconnect,
            });
            (id, existing)
        };

        if let Some(connect) = &connect {
            for link in &existing {
                connect(link);
            }
        }

        debug!(
            topic = %topic,
            msg_type = M::TYPE_NAME,
            queue_size,
            latch,
            "Advertised topic"
        );

        Ok(TopicPublisher {
            bus: self.bus.clone(),
            topic,
            id,
            active: true,
            _marker: PhantomData,
        })
    }

    /// Subscribe a callback to a topic carrying messages of type `M`.
    ///
    /// A `queue_size` of zero means the queue is unbounded.
    pub fn subscribe<M, F>(
        &self,
        topic: &str,
        queue_size: usize,
        callback: F,
    ) -> Result<TopicSubscription<M>, BusError>
    where
        M: Message,
        F: Fn(Arc<M>) + Send + Sync + 'static,
    {
        let topic = self.resolve_topic(topic)?;
        let queue = Queue::new(queue_size);
        let callback: ErasedCallback = {
            let topic = topic.clone();
            Arc::new(move |message: Erased| match message.downcast::<M>() {
                Ok(message) => callback(message),
                Err(_) => warn!(topic = %topic, "Dropped message of unexpected type"),
            })
        };

        let (id, connects) = {
            let mut topics = self.bus.topics();
            let entry = Bus::entry::<M>(&mut topics, &topic)?;
            let id = self.bus.next_id();

            for publisher in &entry.publishers {
                if let Some(latched) = &publisher.latched {
                    queue.push(latched.clone());
                }
            }

            let slot = SubscriberSlot {
                id,
                caller_id: self.node_name.clone(),
                queue,
                callback,
            };
            let link = self.link(&topic, &slot);
            let connects: Vec<_> = entry
                .publishers
                .iter()
                .filter_map(|publisher| publisher.connect.clone())
                .map(|connect| (connect, link.clone()))
                .collect();
            entry.subscribers.push(slot);
            (id, connects)
        };

        for (connect, link) in &connects {
            connect(link);
        }

        debug!(
            topic = %topic,
            msg_type = M::TYPE_NAME,
            queue_size,
            "Subscribed to topic"
        );

        Ok(TopicSubscription {
            bus: self.bus.clone(),
            topic,
            id,
            active: true,
            _marker: PhantomData,
        })
    }

    /// Deliver every message queued at the time of the call and return the
    /// number of callbacks invoked.
    pub fn spin_once(&self) -> usize {
        let pending: Vec<_> = self
            .bus
            .topics()
            .values()
            .flat_map(|entry| entry.subscribers.iter())
            .map(|sub| (sub.queue.rx.clone(), sub.callback.clone()))
            .collect();

        let mut handled = 0;
        for (rx, callback) in pending {
            for message in rx.drain() {
                callback(message);
                handled += 1;
            }
        }
        handled
    }

    /// Call [`spin_once`](Self::spin_once) every `period` until `shutdown`
    /// resolves.
    pub async fn spin(&self, period: Duration, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    let handled = self.spin_once();
                    if handled > 0 {
                        trace!(handled, "Dispatched messages");
                    }
                }
            }
        }
    }

    /// Advertised or subscribed topics with their message types.
    pub fn topics(&self) -> Vec<(String, &'static str)> {
        self.bus
            .topics()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.type_name))
            .collect()
    }

    fn resolve_topic(&self, topic: &str) -> Result<String, BusError> {
        if topic.is_empty() {
            return Err(BusError::InvalidName(topic.to_string()));
        }
        self.resolve_name(topic)
    }

    fn link(&self, topic: &str, slot: &SubscriberSlot) -> PeerLink {
        PeerLink {
            topic: topic.to_string(),
            subscriber_name: slot.caller_id.clone(),
            queue: slot.queue.clone(),
            bus: Arc::downgrade(&self.bus),
        }
    }
}

fn erase_peer_callback<M: Message>(callback: PeerCallback<M>) -> LinkCallback {
    Arc::new(move |link: &PeerLink| {
        callback(&SinglePeer {
            link: link.clone(),
            _marker: PhantomData,
        })
    })
}

/// Only ASCII alphanumerics, `_` and `/` are allowed, with an optional
/// leading `~`. Names must not start with a digit.
fn validate_name(name: &str) -> Result<(), BusError> {
    let body = name.strip_prefix('~').unwrap_or(name);
    let valid_chars = body
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '/');
    let valid_start = !body.starts_with(|c: char| c.is_ascii_digit());

    if valid_chars && valid_start {
        Ok(())
    } else {
        Err(BusError::InvalidName(name.to_string()))
    }
}

/// Collapse repeated slashes and drop a trailing slash.
pub fn clean_name(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    for c in name.chars() {
        if c == '/' && cleaned.ends_with('/') {
            continue;
        }
        cleaned.push(c);
    }
    if cleaned.len() > 1 && cleaned.ends_with('/') {
        cleaned.pop();
    }
    cleaned
}

/// Publishing end of a topic. Unadvertises on drop.
pub struct TopicPublisher<M> {
    bus: Arc<Bus>,
    topic: String,
    id: u64,
    active: bool,
    _marker: PhantomData<fn(M)>,
}

impl<M: Message> TopicPublisher<M> {
    pub fn publish(&self, message: Arc<M>) {
        if !self.active {
            warn!(topic = %self.topic, "Publish called on a shut down publisher");
            return;
        }

        let message: Erased = message;
        let queues: Vec<_> = {
            let mut topics = self.bus.topics();
            let Some(entry) = topics.get_mut(&self.topic) else {
                return;
            };
            if let Some(slot) = entry.publishers.iter_mut().find(|slot| slot.id == self.id)
                && slot.latch
            {
                slot.latched = Some(message.clone());
            }
            entry
                .subscribers
                .iter()
                .map(|sub| sub.queue.clone())
                .collect()
        };

        for queue in queues {
            queue.push(message.clone());
        }
    }
}

impl<M> TopicPublisher<M> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn num_subscribers(&self) -> usize {
        if !self.active {
            return 0;
        }
        self.bus.num_subscribers(&self.topic)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn shutdown(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        let mut topics = self.bus.topics();
        if let Some(entry) = topics.get_mut(&self.topic) {
            entry.publishers.retain(|slot| slot.id != self.id);
            if entry.is_unused() {
                topics.shift_remove(&self.topic);
            }
        }
        debug!(topic = %self.topic, "Unadvertised topic");
    }
}

impl<M> Drop for TopicPublisher<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Receiving end of a topic. Unsubscribes on drop.
pub struct TopicSubscription<M> {
    bus: Arc<Bus>,
    topic: String,
    id: u64,
    active: bool,
    _marker: PhantomData<fn(M)>,
}

impl<M> TopicSubscription<M> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn num_publishers(&self) -> usize {
        if !self.active {
            return 0;
        }
        self.bus.num_publishers(&self.topic)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Leave the topic and notify publishers through their disconnect
    /// callbacks.
    pub fn shutdown(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        let disconnects: Vec<_> = {
            let mut topics = self.bus.topics();
            let Some(entry) = topics.get_mut(&self.topic) else {
                return;
            };
            let Some(pos) = entry.subscribers.iter().position(|slot| slot.id == self.id) else {
                return;
            };
            let slot = entry.subscribers.remove(pos);
            let link = PeerLink {
                topic: self.topic.clone(),
                subscriber_name: slot.caller_id,
                queue: slot.queue,
                bus: Arc::downgrade(&self.bus),
            };
            let disconnects = entry
                .publishers
                .iter()
                .filter_map(|publisher| publisher.disconnect.clone())
                .map(|disconnect| (disconnect, link.clone()))
                .collect();
            if entry.is_unused() {
                topics.shift_remove(&self.topic);
            }
            disconnects
        };

        for (disconnect, link) in &disconnects {
            disconnect(link);
        }
        debug!(topic = %self.topic, "Unsubscribed from topic");
    }
}

impl<M> Drop for TopicSubscription<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A publisher that addresses exactly one subscriber, handed to connection
/// callbacks.
pub struct SinglePeer<M> {
    link: PeerLink,
    _marker: PhantomData<fn(M)>,
}

impl<M: Message> SinglePeer<M> {
    /// Name of the node owning the subscription.
    pub fn subscriber_name(&self) -> &str {
        &self.link.subscriber_name
    }

    pub fn topic(&self) -> &str {
        &self.link.topic
    }

    /// Number of subscribers on the topic as a whole.
    pub fn num_subscribers(&self) -> usize {
        self.link
            .bus
            .upgrade()
            .map(|bus| bus.num_subscribers(&self.link.topic))
            .unwrap_or(0)
    }

    pub fn publish(&self, message: Arc<M>) {
        self.link.queue.push(message);
    }
}
